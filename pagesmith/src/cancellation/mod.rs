//! Cooperative cancellation.
//!
//! One [`CancellationToken`] exists per run. The progress tracker sets it;
//! the orchestrator, the retry loop and fan-out phases observe it.

mod token;

pub use token::{CancelCallback, CancellationToken};
