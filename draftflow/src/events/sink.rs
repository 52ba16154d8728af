//! Event sink trait and implementations.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt::Debug;
use tracing::{debug, info, Level};

/// Receives run lifecycle events.
#[async_trait]
pub trait EventSink: Send + Sync + Debug {
    /// Emits an event.
    ///
    /// * `event_type` - e.g. `"stage.completed"`
    /// * `data` - optional payload
    async fn emit(&self, event_type: &str, data: Option<Value>);

    /// Emits an event without awaiting. Must never panic.
    fn try_emit(&self, event_type: &str, data: Option<Value>);
}

/// Discards all events.
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
    /// Creates a sink logging at `level`. Anything other than DEBUG logs at INFO.
    #[must_use]
    pub fn new(level: Level) -> Self {
        Self { level }
    }

    /// Creates a debug-level sink.
    #[must_use]
    pub fn debug() -> Self {
        Self::new(Level::DEBUG)
    }

    fn log_event(&self, event_type: &str, data: Option<&Value>) {
        let data = data.map(Value::to_string).unwrap_or_default();
        if self.level == Level::DEBUG {
            debug!(event_type = %event_type, event_data = %data, "event {event_type}");
        } else {
            info!(event_type = %event_type, event_data = %data, "event {event_type}");
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

/// Keeps every event in memory. Used by tests.
#[derive(Debug, Default)]
pub struct CollectingEventSink {
    events: parking_lot::RwLock<Vec<(String, Option<Value>)>>,
}

impl CollectingEventSink {
    /// Creates an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all collected events.
    #[must_use]
    pub fn events(&self) -> Vec<(String, Option<Value>)> {
        self.events.read().clone()
    }

    /// Returns the collected event types, in order.
    #[must_use]
    pub fn types(&self) -> Vec<String> {
        self.events.read().iter().map(|(t, _)| t.clone()).collect()
    }

    /// Returns the number of collected events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.read().len()
    }

    /// Returns true if nothing was collected.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.read().is_empty()
    }

    /// Clears all collected events.
    pub fn clear(&self) {
        self.events.write().clear();
    }

    /// Returns events whose type starts with `type_prefix`.
    #[must_use]
    pub fn events_of_type(&self, type_prefix: &str) -> Vec<(String, Option<Value>)> {
        self.events
            .read()
            .iter()
            .filter(|(t, _)| t.starts_with(type_prefix))
            .cloned()
            .collect()
    }
}

#[async_trait]
impl EventSink for CollectingEventSink {
    async fn emit(&self, event_type: &str, data: Option<Value>) {
        self.try_emit(event_type, data);
    }

    fn try_emit(&self, event_type: &str, data: Option<Value>) {
        self.events.write().push((event_type.to_string(), data));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_noop_and_logging_sinks_accept_events() {
        NoOpEventSink.emit("run.started", None).await;
        NoOpEventSink.try_emit("run.started", Some(json!({"x": 1})));

        let sink = LoggingEventSink::debug();
        sink.emit("stage.started", Some(json!({"stage": "plan"}))).await;
        LoggingEventSink::default().try_emit("run.completed", None);
    }

    #[tokio::test]
    async fn test_collecting_sink_keeps_order() {
        let sink = CollectingEventSink::new();
        assert!(sink.is_empty());

        sink.emit("run.started", None).await;
        sink.try_emit("stage.started", Some(json!({"stage": "ingest"})));
        sink.emit("stage.completed", None).await;

        assert_eq!(sink.len(), 3);
        assert_eq!(sink.types(), vec!["run.started", "stage.started", "stage.completed"]);
        assert_eq!(sink.events_of_type("stage.").len(), 2);

        sink.clear();
        assert!(sink.is_empty());
    }
}
