//! Event sink trait and implementations.

use async_trait::async_trait;
use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, Level};

/// Receives orchestrator lifecycle events.
///
/// Implementations must not panic; a slow `emit` delays the run that emitted it.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Emits an event, e.g. `"phase.completed"`, with an optional JSON payload.
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits without awaiting. Errors are logged and suppressed.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards all events. The orchestrator default.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoOpEventSink;

#[async_trait]
impl EventSink for NoOpEventSink {
    async fn emit(&self, _event_type: &str, _data: Option<Value>) {}

    fn try_emit(&self, _event_type: &str, _data: Option<Value>) {}
}

/// Writes events to `tracing`.
#[derive(Debug, Clone)]
pub struct LoggingEventSink {
    level: Level,
}

impl Default for LoggingEventSink {
    fn default() -> Self {
        Self { level: Level::INFO }
    }
}

impl LoggingEventSink {
    /// Creates a sink logging at `level`; anything other than DEBUG logs at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level logging sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let payload = data.map(Value::to_string).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = %payload, "Event: {}", event_type);
        } else {
            info!(event_type = %event_type, event_data = %payload, "Event: {}", event_type);
        }
    }
}

#[async_trait]
impl EventSink for LoggingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.log_event(event_type, data.as_ref());
    }
}

/// Records every event in memory, in emission order.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// All collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Just the event names, in order.
    #[must_use]
    pub fn names(&self) -> Vec<String> {
        self.events.read().iter().map(|(name, _)| name.clone()).collect()
    }

    /// Number of events named exactly `event_type`.
    #[must_use]
    pub fn count(&self, event_type: &str) -> usize {
        self.events
            .read()
            .iter()
            .filter(|(name, _)| name == event_type)
            .count()
    }

    /// Events whose name starts with `prefix`.
    #[must_use]
    pub fn events_of_type(&self, prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(name, _)| name.starts_with(prefix))
            .cloned()
            .collect()
    }

    /// Number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Drops all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    fn push(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.push(event_type, data);
    }
}

type EventCallback = Box<dyn Fn(&str, Option<&Value>) + Send + Sync>;

/// Runs a closure for every event. Useful for reacting to lifecycle points in tests.
pub struct CallbackEventSink {
    callback: EventCallback,
}

impl CallbackEventSink {
    /// Wraps `callback`.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&str, Option<&Value>) + Send + Sync + 'static,
    {
        Self {
            callback: Box::new(callback),
        }
    }

    fn dispatch(&self, event_type: &str, data: Option<&Value>) {
        let call = std::panic::AssertUnwindSafe(|| (self.callback)(event_type, data));
        if std::panic::catch_unwind(call).is_err() {
            tracing::warn!(event_type = %event_type, "Event callback panicked");
        }
    }
}

impl std::fmt::Debug for CallbackEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallbackEventSink").finish_non_exhaustive()
    }
}

#[async_trait]
impl EventSink for CallbackEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.dispatch(event_type, data.as_ref());
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.dispatch(event_type, data.as_ref());
    }
}
