//! Small helpers for identifiers, timestamps and durations.

mod ids;
pub mod timestamps;

pub use ids::{generate_pipeline_id, is_generated_id};
pub use timestamps::{duration_ms, iso_timestamp, now_utc, Timestamp};
