// src/client/bambu.rs - Telemetry (MQTT) vendor client
//
// Bambu-class printers push status over a TLS MQTT session instead of being
// polled. Status arrives on `device/{serial}/report`; commands are published
// to `device/{serial}/request` and acknowledged by a later report, not by a
// request/response round trip.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, Event, EventLoop, MqttOptions, Packet, QoS, TlsConfiguration,
    Transport,
};
use serde_json::{Value, json};
use tokio::sync::{Mutex, broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout};

use crate::client::{PrinterClient, VendorKind};
use crate::config::{PrinterConfig, ServiceConfig};
use crate::error::ConnectionError;
use crate::status::{FileDescriptor, JobSnapshot, StatusSnapshot, Temperatures, UnifiedStatus};

const MQTT_PORT: u16 = 8883;
const MQTT_USERNAME: &str = "bblp";
const CAMERA_PORT: u16 = 322;

#[derive(Debug, Clone)]
struct BambuSettings {
    address: String,
    serial: String,
    access_code: String,
    connect_timeout: Duration,
    request_timeout: Duration,
    ack_timeout: Duration,
}

/// State shared with the background event-loop task.
struct Shared {
    status_tx: watch::Sender<Option<StatusSnapshot>>,
    report_tx: broadcast::Sender<Value>,
    connected: AtomicBool,
    saw_camera: AtomicBool,
}

struct Session {
    client: AsyncClient,
    task: JoinHandle<()>,
}

/// MQTT telemetry client for Bambu-class printers.
pub struct BambuClient {
    settings: BambuSettings,
    shared: Arc<Shared>,
    status_rx: watch::Receiver<Option<StatusSnapshot>>,
    session: Mutex<Option<Session>>,
}

impl BambuClient {
    pub fn new(config: &PrinterConfig, service: &ServiceConfig) -> Self {
        let (status_tx, status_rx) = watch::channel(None);
        let (report_tx, _) = broadcast::channel(32);
        Self {
            settings: BambuSettings {
                address: config.address.clone(),
                serial: config.serial_number.clone().unwrap_or_default(),
                access_code: config.access_code.clone().unwrap_or_default(),
                connect_timeout: Duration::from_secs(service.connect_timeout_secs),
                request_timeout: Duration::from_secs(service.request_timeout_secs),
                ack_timeout: Duration::from_secs(service.command_ack_timeout_secs),
            },
            shared: Arc::new(Shared {
                status_tx,
                report_tx,
                connected: AtomicBool::new(false),
                saw_camera: AtomicBool::new(false),
            }),
            status_rx,
            session: Mutex::new(None),
        }
    }

    fn report_topic(&self) -> String {
        format!("device/{}/report", self.settings.serial)
    }

    fn request_topic(&self) -> String {
        format!("device/{}/request", self.settings.serial)
    }

    /// Publish a command and wait for the device to acknowledge it: either a
    /// report echoing the command (with an optional result field) or a
    /// `gcode_state` transition into one of the expected states. No report
    /// inside the window counts as a failed command.
    async fn command(&self, command: &str, expected_states: &[&str]) -> Result<bool, ConnectionError> {
        let client = {
            let guard = self.session.lock().await;
            let session = guard
                .as_ref()
                .ok_or_else(|| ConnectionError::Unreachable("telemetry session not connected".into()))?;
            session.client.clone()
        };
        if !self.shared.connected.load(Ordering::Relaxed) {
            return Err(ConnectionError::Unreachable("telemetry session lost".into()));
        }

        // Subscribe before publishing so the ack cannot slip past us.
        let mut reports = self.shared.report_tx.subscribe();

        client
            .publish(
                self.request_topic(),
                QoS::AtMostOnce,
                false,
                command_payload(command),
            )
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;

        let deadline = Instant::now() + self.settings.ack_timeout;
        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(ConnectionError::Timeout(format!(
                    "no acknowledgment for `{command}`"
                )));
            }
            match timeout(remaining, reports.recv()).await {
                Err(_) => {
                    return Err(ConnectionError::Timeout(format!(
                        "no acknowledgment for `{command}`"
                    )));
                }
                Ok(Err(broadcast::error::RecvError::Lagged(_))) => continue,
                Ok(Err(broadcast::error::RecvError::Closed)) => {
                    return Err(ConnectionError::Unreachable("telemetry session closed".into()));
                }
                Ok(Ok(report)) => {
                    if let Some(echo) = report.pointer("/print/command").and_then(Value::as_str) {
                        if echo == command {
                            return match report.pointer("/print/result").and_then(Value::as_str) {
                                Some(r) if r.eq_ignore_ascii_case("success") => Ok(true),
                                // The device answered and refused.
                                Some(_) => Ok(false),
                                None => Ok(true),
                            };
                        }
                    }
                    if let Some(state) = report.pointer("/print/gcode_state").and_then(Value::as_str)
                    {
                        if expected_states.iter().any(|s| s.eq_ignore_ascii_case(state)) {
                            return Ok(true);
                        }
                    }
                }
            }
        }
    }
}

#[async_trait]
impl PrinterClient for BambuClient {
    async fn connect(&self) -> Result<(), ConnectionError> {
        let mut session = self.session.lock().await;

        // Already connected: no second handshake.
        if let Some(existing) = session.as_ref() {
            if !existing.task.is_finished() && self.shared.connected.load(Ordering::Relaxed) {
                return Ok(());
            }
        }
        if let Some(stale) = session.take() {
            stale.task.abort();
        }

        let client_id = format!("printfleet_{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, &self.settings.address, MQTT_PORT);
        options.set_credentials(MQTT_USERNAME, &self.settings.access_code);
        options.set_keep_alive(Duration::from_secs(30));
        options.set_clean_session(true);

        // The printer presents a self-signed certificate.
        let tls = TlsConfiguration::Simple {
            ca: vec![],
            alpn: None,
            client_auth: None,
        };
        options.set_transport(Transport::tls_with_config(tls));

        let (client, event_loop) = AsyncClient::new(options, 100);
        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_event_loop(event_loop, self.shared.clone(), ready_tx));

        match timeout(self.settings.connect_timeout, ready_rx).await {
            Err(_) => {
                task.abort();
                Err(ConnectionError::Timeout("MQTT session handshake".into()))
            }
            Ok(Err(_)) => {
                task.abort();
                Err(ConnectionError::Unreachable(
                    "telemetry session ended before ConnAck".into(),
                ))
            }
            Ok(Ok(Err(e))) => {
                task.abort();
                Err(e)
            }
            Ok(Ok(Ok(()))) => {
                if let Err(e) = client.subscribe(self.report_topic(), QoS::AtMostOnce).await {
                    task.abort();
                    return Err(ConnectionError::Protocol(e.to_string()));
                }
                // Ask for one full report so the status cache is primed.
                let _ = client
                    .publish(
                        self.request_topic(),
                        QoS::AtMostOnce,
                        false,
                        pushall_payload(),
                    )
                    .await;
                self.shared.connected.store(true, Ordering::Relaxed);
                *session = Some(Session { client, task });
                tracing::debug!(serial = %self.settings.serial, "telemetry session established");
                Ok(())
            }
        }
    }

    async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        if let Some(session) = session.take() {
            let _ = session.client.disconnect().await;
            session.task.abort();
        }
        self.shared.connected.store(false, Ordering::Relaxed);
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    async fn get_status(&self) -> Result<StatusSnapshot, ConnectionError> {
        if !self.shared.connected.load(Ordering::Relaxed) {
            return Err(ConnectionError::Unreachable(
                "telemetry session not connected".into(),
            ));
        }
        if let Some(snapshot) = self.status_rx.borrow().clone() {
            return Ok(snapshot);
        }

        // Nothing received yet: request a full push and wait for the first
        // report to land.
        {
            let guard = self.session.lock().await;
            if let Some(session) = guard.as_ref() {
                let _ = session
                    .client
                    .publish(
                        self.request_topic(),
                        QoS::AtMostOnce,
                        false,
                        pushall_payload(),
                    )
                    .await;
            }
        }
        let mut rx = self.status_rx.clone();
        timeout(self.settings.request_timeout, async move {
            loop {
                rx.changed()
                    .await
                    .map_err(|_| ConnectionError::Unreachable("telemetry session closed".into()))?;
                let snapshot = rx.borrow().clone();
                if let Some(snapshot) = snapshot {
                    return Ok(snapshot);
                }
            }
        })
        .await
        .map_err(|_| ConnectionError::Timeout("waiting for first telemetry report".into()))?
    }

    async fn list_files(&self) -> Result<Vec<FileDescriptor>, ConnectionError> {
        if !self.shared.connected.load(Ordering::Relaxed) {
            return Err(ConnectionError::Unreachable(
                "telemetry session not connected".into(),
            ));
        }
        // The broker session has no file-browse operation; telemetry only
        // exposes the file of the current or last job.
        let files = self
            .status_rx
            .borrow()
            .as_ref()
            .and_then(|s| s.job.as_ref())
            .and_then(|j| j.name.clone())
            .map(|name| {
                vec![FileDescriptor {
                    path: name.clone(),
                    name,
                    size: None,
                    origin: "telemetry".to_string(),
                }]
            })
            .unwrap_or_default();
        Ok(files)
    }

    async fn pause_print(&self) -> Result<bool, ConnectionError> {
        self.command("pause", &["PAUSE"]).await
    }

    async fn resume_print(&self) -> Result<bool, ConnectionError> {
        self.command("resume", &["RUNNING"]).await
    }

    async fn stop_print(&self) -> Result<bool, ConnectionError> {
        self.command("stop", &["IDLE", "FINISH", "FAILED"]).await
    }

    async fn has_camera(&self) -> bool {
        self.shared.saw_camera.load(Ordering::Relaxed)
    }

    async fn camera_stream_url(&self) -> Option<String> {
        if self.shared.saw_camera.load(Ordering::Relaxed) {
            Some(format!(
                "rtsps://{}:{}/streaming/live/1",
                self.settings.address, CAMERA_PORT
            ))
        } else {
            None
        }
    }

    fn kind(&self) -> VendorKind {
        VendorKind::TelemetryMqtt
    }
}

async fn run_event_loop(
    mut event_loop: EventLoop,
    shared: Arc<Shared>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
) {
    let mut ready = Some(ready);
    loop {
        match event_loop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                if ack.code == ConnectReturnCode::Success {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                } else {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Err(map_return_code(ack.code)));
                    }
                    break;
                }
            }
            Ok(Event::Incoming(Packet::Publish(publish))) => {
                if publish.topic.ends_with("/report") {
                    if let Ok(report) = serde_json::from_slice::<Value>(&publish.payload) {
                        if report.pointer("/print/ipcam").is_some() {
                            shared.saw_camera.store(true, Ordering::Relaxed);
                        }
                        if let Some(snapshot) = snapshot_from_report(&report) {
                            shared.status_tx.send_replace(Some(snapshot));
                        }
                        let _ = shared.report_tx.send(report);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => {
                let mapped = map_mqtt_error(e);
                match ready.take() {
                    Some(tx) => {
                        let _ = tx.send(Err(mapped));
                    }
                    None => {
                        tracing::warn!(error = %mapped, "telemetry session lost");
                    }
                }
                break;
            }
        }
    }
    shared.connected.store(false, Ordering::Relaxed);
}

fn map_return_code(code: ConnectReturnCode) -> ConnectionError {
    match code {
        ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => {
            ConnectionError::AuthRejected("broker refused the access code".into())
        }
        other => ConnectionError::Unreachable(format!("broker refused connection: {other:?}")),
    }
}

fn map_mqtt_error(error: rumqttc::ConnectionError) -> ConnectionError {
    match error {
        rumqttc::ConnectionError::ConnectionRefused(code) => map_return_code(code),
        rumqttc::ConnectionError::NetworkTimeout | rumqttc::ConnectionError::FlushTimeout => {
            ConnectionError::Timeout("MQTT network operation".into())
        }
        rumqttc::ConnectionError::Io(e) => ConnectionError::Unreachable(e.to_string()),
        other => ConnectionError::Protocol(other.to_string()),
    }
}

fn command_payload(command: &str) -> String {
    json!({
        "print": {
            "sequence_id": "0",
            "command": command,
            "param": ""
        }
    })
    .to_string()
}

fn pushall_payload() -> String {
    json!({
        "pushing": {
            "sequence_id": "0",
            "command": "pushall"
        }
    })
    .to_string()
}

/// Map the raw device state to the unified model. Total: every input,
/// including absent fields, maps to exactly one value. A nonzero error code
/// wins over everything else.
pub(crate) fn map_bambu_state(gcode_state: Option<&str>, print_error: Option<i64>) -> UnifiedStatus {
    if print_error.unwrap_or(0) != 0 {
        return UnifiedStatus::Error;
    }
    match gcode_state {
        Some(state) => match state.to_ascii_uppercase().as_str() {
            "RUNNING" | "PREPARE" | "SLICING" => UnifiedStatus::Printing,
            "PAUSE" => UnifiedStatus::Paused,
            "IDLE" | "FINISH" => UnifiedStatus::Online,
            "FAILED" => UnifiedStatus::Error,
            _ => UnifiedStatus::Unknown,
        },
        None => UnifiedStatus::Unknown,
    }
}

/// Build a snapshot from a report document. Partial pushes (deltas without
/// `gcode_state`) return `None`; the cache keeps the last full state.
fn snapshot_from_report(report: &Value) -> Option<StatusSnapshot> {
    let print = report.get("print")?;
    let gcode_state = print.get("gcode_state").and_then(Value::as_str)?;
    let print_error = print.get("print_error").and_then(Value::as_i64);

    let mut snapshot = StatusSnapshot::new(map_bambu_state(Some(gcode_state), print_error));
    snapshot.temperatures = Temperatures {
        nozzle: print.get("nozzle_temper").and_then(Value::as_f64),
        nozzle_target: print.get("nozzle_target_temper").and_then(Value::as_f64),
        bed: print.get("bed_temper").and_then(Value::as_f64),
        bed_target: print.get("bed_target_temper").and_then(Value::as_f64),
        chamber: print.get("chamber_temper").and_then(Value::as_f64),
    };

    let name = print
        .get("subtask_name")
        .or_else(|| print.get("gcode_file"))
        .and_then(Value::as_str)
        .filter(|n| !n.is_empty())
        .map(str::to_string);
    let progress = print.get("mc_percent").and_then(Value::as_f64);
    if name.is_some() || progress.is_some() {
        snapshot.job = Some(JobSnapshot {
            name,
            progress,
            layer_current: print
                .get("layer_num")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            layer_total: print
                .get("total_layer_num")
                .and_then(Value::as_u64)
                .map(|v| v as u32),
            time_remaining: print
                .get("mc_remaining_time")
                .and_then(Value::as_u64)
                .map(|minutes| minutes * 60),
        });
    }
    Some(snapshot)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mapping_is_total() {
        let states = [
            None,
            Some(""),
            Some("RUNNING"),
            Some("running"),
            Some("PAUSE"),
            Some("IDLE"),
            Some("FINISH"),
            Some("FAILED"),
            Some("PREPARE"),
            Some("SLICING"),
            Some("garbage"),
        ];
        for state in states {
            for error in [None, Some(0), Some(83886092)] {
                // Must map to exactly one unified value, never panic.
                let _ = map_bambu_state(state, error);
            }
        }
        assert_eq!(map_bambu_state(None, None), UnifiedStatus::Unknown);
        assert_eq!(map_bambu_state(Some("garbage"), None), UnifiedStatus::Unknown);
    }

    #[test]
    fn error_takes_precedence_over_printing() {
        assert_eq!(
            map_bambu_state(Some("RUNNING"), Some(83886092)),
            UnifiedStatus::Error
        );
        assert_eq!(map_bambu_state(Some("RUNNING"), Some(0)), UnifiedStatus::Printing);
        assert_eq!(map_bambu_state(Some("PAUSE"), None), UnifiedStatus::Paused);
        assert_eq!(map_bambu_state(Some("FAILED"), None), UnifiedStatus::Error);
    }

    #[test]
    fn snapshot_from_full_report() {
        let report = serde_json::json!({
            "print": {
                "gcode_state": "RUNNING",
                "mc_percent": 42.5,
                "layer_num": 57,
                "total_layer_num": 230,
                "mc_remaining_time": 90,
                "nozzle_temper": 219.8,
                "nozzle_target_temper": 220.0,
                "bed_temper": 60.1,
                "bed_target_temper": 60.0,
                "chamber_temper": 35.2,
                "subtask_name": "benchy.3mf",
                "wifi_signal": "-44dBm"
            }
        });
        let snapshot = snapshot_from_report(&report).unwrap();
        assert_eq!(snapshot.status, UnifiedStatus::Printing);
        assert_eq!(snapshot.temperatures.nozzle, Some(219.8));
        assert_eq!(snapshot.temperatures.chamber, Some(35.2));

        let job = snapshot.job.unwrap();
        assert_eq!(job.name.as_deref(), Some("benchy.3mf"));
        assert_eq!(job.progress, Some(42.5));
        assert_eq!(job.layer_current, Some(57));
        assert_eq!(job.layer_total, Some(230));
        assert_eq!(job.time_remaining, Some(90 * 60));
    }

    #[test]
    fn partial_report_does_not_produce_a_snapshot() {
        let delta = serde_json::json!({
            "print": { "nozzle_temper": 221.0 }
        });
        assert!(snapshot_from_report(&delta).is_none());
        assert!(snapshot_from_report(&serde_json::json!({})).is_none());
    }

    #[test]
    fn command_payload_shape() {
        let payload: Value = serde_json::from_str(&command_payload("pause")).unwrap();
        assert_eq!(payload["print"]["command"], "pause");
        assert_eq!(payload["print"]["sequence_id"], "0");

        let pushall: Value = serde_json::from_str(&pushall_payload()).unwrap();
        assert_eq!(pushall["pushing"]["command"], "pushall");
    }
}
