//! Fire-and-forget observability events.
//!
//! Emission never blocks and never fails the caller: events go over an
//! unbounded channel when a receiver is attached and are mirrored to
//! `tracing` either way. The CLI attaches a receiver to drive its progress
//! view; headless embedders can leave the bus disabled.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

/// Status of an emitted operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventStatus {
    Running,
    Success,
    Error,
}

/// One observability event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityEvent {
    pub component: String,
    pub operation: String,
    pub status: EventStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
    pub metadata: Value,
}

impl ObservabilityEvent {
    pub fn new(component: &str, operation: &str, status: EventStatus) -> Self {
        Self {
            component: component.to_string(),
            operation: operation.to_string(),
            status,
            duration_ms: None,
            metadata: Value::Null,
        }
    }

    pub fn with_duration_ms(mut self, millis: u64) -> Self {
        self.duration_ms = Some(millis);
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = metadata;
        self
    }
}

/// Cloneable handle for emitting events.
#[derive(Clone, Default)]
pub struct ObservabilityBus {
    tx: Option<mpsc::UnboundedSender<ObservabilityEvent>>,
}

impl ObservabilityBus {
    /// A bus that only mirrors to `tracing`.
    pub fn disabled() -> Self {
        Self { tx: None }
    }

    /// A bus with an attached receiver.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ObservabilityEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx: Some(tx) }, rx)
    }

    /// Emit an event. Never blocks; a closed receiver is ignored.
    pub fn emit(&self, event: ObservabilityEvent) {
        debug!(
            component = %event.component,
            operation = %event.operation,
            status = ?event.status,
            "observability event"
        );
        if let Some(tx) = &self.tx {
            let _ = tx.send(event);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_events_flow_through_channel() {
        let (bus, mut rx) = ObservabilityBus::channel();
        bus.emit(
            ObservabilityEvent::new("orchestrator", "pipeline_started", EventStatus::Running)
                .with_metadata(json!({"phases": 7})),
        );

        let event = rx.recv().await.unwrap();
        assert_eq!(event.operation, "pipeline_started");
        assert_eq!(event.metadata["phases"], 7);
    }

    #[test]
    fn test_emit_on_disabled_bus_is_noop() {
        let bus = ObservabilityBus::disabled();
        bus.emit(ObservabilityEvent::new("x", "y", EventStatus::Success));
    }

    #[tokio::test]
    async fn test_emit_after_receiver_dropped_does_not_panic() {
        let (bus, rx) = ObservabilityBus::channel();
        drop(rx);
        bus.emit(ObservabilityEvent::new("x", "y", EventStatus::Error));
    }
}
