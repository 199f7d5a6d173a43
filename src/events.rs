// src/events.rs - Notification sink for fleet lifecycle events
use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Value, json};
use tokio::sync::broadcast;

pub const PRINTER_CONNECTED: &str = "printer_connected";
pub const PRINTER_DISCONNECTED: &str = "printer_disconnected";
pub const PRINTER_CONNECTION_PROGRESS: &str = "printer_connection_progress";
pub const PRINT_PAUSED: &str = "print_paused";
pub const PRINT_RESUMED: &str = "print_resumed";
pub const PRINT_STOPPED: &str = "print_stopped";

/// Stage of a `connect_and_monitor` sequence, rendered into progress events.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressStage {
    Connecting,
    Connected,
    Monitoring,
    Failed,
    Error,
}

impl ProgressStage {
    pub fn as_str(self) -> &'static str {
        match self {
            ProgressStage::Connecting => "connecting",
            ProgressStage::Connected => "connected",
            ProgressStage::Monitoring => "monitoring",
            ProgressStage::Failed => "failed",
            ProgressStage::Error => "error",
        }
    }
}

/// A named event with a JSON payload. Every payload carries `printer_id` and
/// an ISO-8601 `timestamp`.
#[derive(Debug, Clone)]
pub struct FleetEvent {
    pub name: &'static str,
    pub payload: Value,
}

impl FleetEvent {
    fn named(name: &'static str, printer_id: &str, mut payload: Value) -> Self {
        if let Some(map) = payload.as_object_mut() {
            map.insert("printer_id".into(), json!(printer_id));
            map.insert("timestamp".into(), json!(Utc::now().to_rfc3339()));
        }
        Self { name, payload }
    }

    pub fn printer_connected(printer_id: &str) -> Self {
        Self::named(PRINTER_CONNECTED, printer_id, json!({}))
    }

    pub fn printer_disconnected(printer_id: &str) -> Self {
        Self::named(PRINTER_DISCONNECTED, printer_id, json!({}))
    }

    pub fn connection_progress(printer_id: &str, stage: ProgressStage, detail: Option<&str>) -> Self {
        let mut payload = json!({ "status": stage.as_str() });
        if let (Some(map), Some(detail)) = (payload.as_object_mut(), detail) {
            map.insert("detail".into(), json!(detail));
        }
        Self::named(PRINTER_CONNECTION_PROGRESS, printer_id, payload)
    }

    pub fn print_paused(printer_id: &str) -> Self {
        Self::named(PRINT_PAUSED, printer_id, json!({}))
    }

    pub fn print_resumed(printer_id: &str) -> Self {
        Self::named(PRINT_RESUMED, printer_id, json!({}))
    }

    pub fn print_stopped(printer_id: &str) -> Self {
        Self::named(PRINT_STOPPED, printer_id, json!({}))
    }
}

/// Publish-only event interface. The supervisor and dispatcher hold a shared
/// reference; whatever wires the service together owns the concrete sink and
/// fans events out to the operator-facing layer.
#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn publish(&self, event: FleetEvent);
}

/// Sink backed by a tokio broadcast channel. Subscribers that lag simply
/// miss events; publishing never blocks on a slow consumer.
pub struct BroadcastSink {
    tx: broadcast::Sender<FleetEvent>,
}

impl BroadcastSink {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FleetEvent> {
        self.tx.subscribe()
    }
}

#[async_trait]
impl NotificationSink for BroadcastSink {
    async fn publish(&self, event: FleetEvent) {
        // Send only fails when nobody is subscribed, which is fine.
        let _ = self.tx.send(event);
    }
}

/// Sink that writes events to the log. Used by the host binary when no
/// operator layer is attached.
pub struct LogSink;

#[async_trait]
impl NotificationSink for LogSink {
    async fn publish(&self, event: FleetEvent) {
        tracing::info!(event = event.name, payload = %event.payload, "fleet event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::DateTime;

    #[test]
    fn payload_carries_printer_id_and_timestamp() {
        let event = FleetEvent::printer_connected("bambu_001");
        assert_eq!(event.name, PRINTER_CONNECTED);
        assert_eq!(event.payload["printer_id"], "bambu_001");

        let ts = event.payload["timestamp"].as_str().unwrap();
        assert!(DateTime::parse_from_rfc3339(ts).is_ok());
    }

    #[test]
    fn progress_event_carries_stage_and_detail() {
        let event =
            FleetEvent::connection_progress("p1", ProgressStage::Failed, Some("unreachable"));
        assert_eq!(event.payload["status"], "failed");
        assert_eq!(event.payload["detail"], "unreachable");

        let bare = FleetEvent::connection_progress("p1", ProgressStage::Monitoring, None);
        assert_eq!(bare.payload["status"], "monitoring");
        assert!(bare.payload.get("detail").is_none());
    }

    #[tokio::test]
    async fn broadcast_sink_delivers_to_subscribers() {
        let sink = BroadcastSink::new(8);
        let mut rx = sink.subscribe();
        sink.publish(FleetEvent::print_paused("prusa_001")).await;

        let event = rx.recv().await.unwrap();
        assert_eq!(event.name, PRINT_PAUSED);
        assert_eq!(event.payload["printer_id"], "prusa_001");
    }
}
