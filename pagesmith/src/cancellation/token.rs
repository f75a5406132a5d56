//! Cooperative cancellation token shared between a run and its callers.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::Notify;
use tracing::warn;

/// A callback type for cancellation notifications.
pub type CancelCallback = Box<dyn Fn(&str) + Send + Sync>;

/// A one-way cancellation flag.
///
/// Only the first reason is kept. Phases poll [`is_cancelled`](Self::is_cancelled)
/// at their checkpoints; async waiters can use [`cancelled`](Self::cancelled).
#[derive(Default)]
pub struct CancellationToken {
    cancelled: AtomicBool,
    reason: RwLock<Option<String>>,
    callbacks: RwLock<Vec<CancelCallback>>,
    notify: Notify,
}

impl CancellationToken {
    /// Creates a new cancellation token.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Returns true only for the call that flipped the flag.
    ///
    /// Callbacks run synchronously; panics in them are logged and suppressed.
    pub fn cancel(&self, reason: impl Into<String>) -> bool {
        let reason = reason.into();
        {
            let mut slot = self.reason.write();
            if self.cancelled.load(Ordering::SeqCst) {
                return false;
            }
            *slot = Some(reason.clone());
            self.cancelled.store(true, Ordering::SeqCst);
        }
        self.notify.notify_waiters();

        let callbacks = std::mem::take(&mut *self.callbacks.write());
        for callback in &callbacks {
            run_callback(callback.as_ref(), &reason);
        }
        true
    }

    /// Registers a callback; runs it immediately if already cancelled.
    pub fn on_cancel<F>(&self, callback: F)
    where
        F: Fn(&str) + Send + Sync + 'static,
    {
        let mut callbacks = self.callbacks.write();
        if let Some(reason) = self.reason() {
            drop(callbacks);
            run_callback(&callback, &reason);
        } else {
            callbacks.push(Box::new(callback));
        }
    }

    /// Returns whether cancellation has been requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Returns the cancellation reason, if any.
    #[must_use]
    pub fn reason(&self) -> Option<String> {
        self.reason.read().clone()
    }

    /// Resolves once cancellation has been requested.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

fn run_callback(callback: &(dyn Fn(&str) + Send + Sync), reason: &str) {
    if let Err(e) = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| callback(reason))) {
        warn!("Cancellation callback panicked: {:?}", e);
    }
}

impl std::fmt::Debug for CancellationToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancellationToken")
            .field("cancelled", &self.is_cancelled())
            .field("reason", &self.reason())
            .finish()
    }
}
