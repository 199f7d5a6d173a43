// src/client/octoprint.rs - REST + push-notification vendor client
//
// OctoPrint-class printers combine a polled REST API with a SockJS-style
// push channel (an HTTP streaming response emulating a socket) for
// low-latency state changes. Losing the push channel degrades the session
// to polling-only; it does not disconnect it.
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use rand::Rng;
use reqwest::StatusCode;
use serde::Deserialize;
use serde_json::{Value, json};
use tokio::sync::{Mutex, oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::{PrinterClient, VendorKind};
use crate::config::{PrinterConfig, ServiceConfig};
use crate::error::{ConfigError, ConnectionError};
use crate::status::{FileDescriptor, JobSnapshot, StatusSnapshot, Temperatures, UnifiedStatus};

const API_KEY_HEADER: &str = "X-Api-Key";

const URL_VERSION: &str = "/api/version";
const URL_PRINTER: &str = "/api/printer";
const URL_JOB: &str = "/api/job";
const URL_FILES: &str = "/api/files?recursive=true";
const URL_SETTINGS: &str = "/api/settings";

/// Raw state flags as the device reports them. Multiple flags can be true
/// at once; the mapping imposes the precedence.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
#[serde(default)]
pub(crate) struct OctoFlags {
    pub operational: bool,
    pub printing: bool,
    pub pausing: bool,
    pub paused: bool,
    pub cancelling: bool,
    pub error: bool,
    pub ready: bool,
    #[serde(rename = "closedOrError")]
    pub closed_or_error: bool,
}

#[derive(Debug, Deserialize)]
struct PrinterDto {
    #[serde(default)]
    state: Option<StateDto>,
    #[serde(default)]
    temperature: Option<TemperatureMapDto>,
}

#[derive(Debug, Deserialize)]
struct StateDto {
    #[serde(default)]
    flags: OctoFlags,
}

#[derive(Debug, Default, Deserialize)]
struct TemperatureMapDto {
    #[serde(default)]
    tool0: Option<TempDto>,
    #[serde(default)]
    bed: Option<TempDto>,
    #[serde(default)]
    chamber: Option<TempDto>,
}

#[derive(Debug, Deserialize)]
struct TempDto {
    #[serde(default)]
    actual: Option<f64>,
    #[serde(default)]
    target: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct JobDto {
    #[serde(default)]
    job: Option<JobInnerDto>,
    #[serde(default)]
    progress: Option<ProgressDto>,
}

#[derive(Debug, Deserialize)]
struct JobInnerDto {
    #[serde(default)]
    file: Option<JobFileDto>,
}

#[derive(Debug, Deserialize)]
struct JobFileDto {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    display: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ProgressDto {
    #[serde(default)]
    completion: Option<f64>,
    #[serde(rename = "printTimeLeft", default)]
    print_time_left: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct FileListDto {
    #[serde(default)]
    files: Vec<FileEntryDto>,
}

#[derive(Debug, Deserialize)]
struct FileEntryDto {
    #[serde(default)]
    name: String,
    #[serde(default)]
    path: Option<String>,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    origin: Option<String>,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    children: Vec<FileEntryDto>,
}

#[derive(Debug, Deserialize)]
struct SettingsDto {
    #[serde(default)]
    webcam: Option<WebcamDto>,
}

#[derive(Debug, Deserialize)]
struct WebcamDto {
    #[serde(rename = "webcamEnabled", default)]
    webcam_enabled: bool,
    #[serde(rename = "streamUrl", default)]
    stream_url: Option<String>,
}

/// State shared with the push-channel task.
struct PushShared {
    status_tx: watch::Sender<Option<StatusSnapshot>>,
    connected: AtomicBool,
    degraded: AtomicBool,
}

impl PushShared {
    /// Called when the push stream dies. A connected session falls back to
    /// polling-only instead of disconnecting.
    fn mark_push_lost(&self) {
        if self.connected.load(Ordering::Relaxed) {
            self.degraded.store(true, Ordering::Relaxed);
        }
    }
}

/// REST + push client for OctoPrint-class printers.
pub struct OctoPrintClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    /// Client for the push stream. No total request timeout: the streaming
    /// response is expected to stay open.
    stream_http: reqwest::Client,
    freshness: Duration,
    connect_timeout: Duration,
    shared: Arc<PushShared>,
    status_rx: watch::Receiver<Option<StatusSnapshot>>,
    push_task: Mutex<Option<JoinHandle<()>>>,
}

impl OctoPrintClient {
    pub fn new(config: &PrinterConfig, service: &ServiceConfig) -> Result<Self, ConfigError> {
        let build_error = |e: reqwest::Error| ConfigError::HttpClient {
            printer_id: config.id.clone(),
            detail: e.to_string(),
        };
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs))
            .connect_timeout(Duration::from_secs(service.connect_timeout_secs))
            .build()
            .map_err(build_error)?;
        let stream_http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(service.connect_timeout_secs))
            .build()
            .map_err(build_error)?;
        let (status_tx, status_rx) = watch::channel(None);
        Ok(Self {
            base_url: config.base_url(),
            api_key: config.api_key.clone().unwrap_or_default(),
            http,
            stream_http,
            freshness: Duration::from_secs(service.status_poll_secs),
            connect_timeout: Duration::from_secs(service.connect_timeout_secs),
            shared: Arc::new(PushShared {
                status_tx,
                connected: AtomicBool::new(false),
                degraded: AtomicBool::new(false),
            }),
            status_rx,
            push_task: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response, ConnectionError> {
        self.http
            .get(self.url(path))
            .header(API_KEY_HEADER, &self.api_key)
            .send()
            .await
            .map_err(map_http_error)
    }

    /// Open the SockJS streaming session. Returns once the server sent its
    /// open frame, or with the reason it could not.
    async fn open_push_channel(&self) -> Result<(), ConnectionError> {
        let server: u32 = rand::rng().random_range(0..1000);
        let session = uuid::Uuid::new_v4().simple().to_string();
        let url = format!(
            "{}/sockjs/{:03}/{}/xhr_streaming",
            self.base_url, server, session
        );

        let (ready_tx, ready_rx) = oneshot::channel();
        let task = tokio::spawn(run_push_channel(
            self.stream_http.clone(),
            url,
            self.api_key.clone(),
            self.shared.clone(),
            ready_tx,
        ));

        let result = match timeout(self.connect_timeout, ready_rx).await {
            Err(_) => Err(ConnectionError::Timeout("push channel handshake".into())),
            Ok(Err(_)) => Err(ConnectionError::Unreachable(
                "push channel closed before open frame".into(),
            )),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Ok(Ok(()))) => Ok(()),
        };

        let mut guard = self.push_task.lock().await;
        match &result {
            Ok(()) => {
                if let Some(old) = guard.replace(task) {
                    old.abort();
                }
            }
            Err(_) => task.abort(),
        }
        result
    }

    async fn job_command(&self, body: Value) -> Result<bool, ConnectionError> {
        let response = self
            .http
            .post(self.url(URL_JOB))
            .header(API_KEY_HEADER, &self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(map_http_error)?;
        check_auth(response.status())?;
        match response.status() {
            StatusCode::CONFLICT => Ok(false),
            s if s.is_success() => Ok(true),
            s => Err(ConnectionError::Protocol(format!(
                "job command answered {s}"
            ))),
        }
    }

    async fn poll_status(&self) -> Result<StatusSnapshot, ConnectionError> {
        let response = self.get(URL_PRINTER).await?;
        check_auth(response.status())?;

        // 409 means the server is up but not talking to the printer.
        if response.status() == StatusCode::CONFLICT {
            return Ok(StatusSnapshot::new(UnifiedStatus::Offline));
        }
        if !response.status().is_success() {
            return Err(ConnectionError::Protocol(format!(
                "printer endpoint answered {}",
                response.status()
            )));
        }
        let printer: PrinterDto = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        let flags = printer.state.map(|s| s.flags).unwrap_or_default();
        let mut snapshot = StatusSnapshot::new(map_octoprint_state(&flags));
        let temps = printer.temperature.unwrap_or_default();
        snapshot.temperatures = Temperatures {
            nozzle: temps.tool0.as_ref().and_then(|t| t.actual),
            nozzle_target: temps.tool0.as_ref().and_then(|t| t.target),
            bed: temps.bed.as_ref().and_then(|t| t.actual),
            bed_target: temps.bed.as_ref().and_then(|t| t.target),
            chamber: temps.chamber.as_ref().and_then(|t| t.actual),
        };

        let job_response = self.get(URL_JOB).await?;
        if job_response.status().is_success() {
            if let Ok(job) = job_response.json::<JobDto>().await {
                snapshot.job = job_snapshot(&job);
            }
        }
        Ok(snapshot)
    }
}

#[async_trait]
impl PrinterClient for OctoPrintClient {
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.shared.connected.load(Ordering::Relaxed) {
            return Ok(());
        }

        let response = self.get(URL_VERSION).await?;
        check_auth(response.status())?;
        if !response.status().is_success() {
            return Err(ConnectionError::Unreachable(format!(
                "identity probe answered {}",
                response.status()
            )));
        }
        self.shared.connected.store(true, Ordering::Relaxed);

        // The REST side is up; a failed push handshake degrades the session
        // to polling-only instead of failing the connect.
        match self.open_push_channel().await {
            Ok(()) => {
                self.shared.degraded.store(false, Ordering::Relaxed);
                tracing::debug!(base_url = %self.base_url, "push channel established");
            }
            Err(e) => {
                self.shared.degraded.store(true, Ordering::Relaxed);
                tracing::warn!(base_url = %self.base_url, error = %e, "push channel unavailable, polling only");
            }
        }
        Ok(())
    }

    async fn disconnect(&self) {
        if let Some(task) = self.push_task.lock().await.take() {
            task.abort();
        }
        self.shared.connected.store(false, Ordering::Relaxed);
        self.shared.degraded.store(false, Ordering::Relaxed);
    }

    async fn is_connected(&self) -> bool {
        self.shared.connected.load(Ordering::Relaxed)
    }

    async fn get_status(&self) -> Result<StatusSnapshot, ConnectionError> {
        // Reuse a fresh push snapshot before spending a round trip.
        let pushed = self.status_rx.borrow().clone();
        if let Some(snapshot) = pushed {
            let age = chrono::Utc::now() - snapshot.timestamp;
            if age.num_seconds() >= 0 && age.to_std().unwrap_or(Duration::MAX) < self.freshness {
                return Ok(snapshot);
            }
        }
        self.poll_status().await
    }

    async fn list_files(&self) -> Result<Vec<FileDescriptor>, ConnectionError> {
        let response = self.get(URL_FILES).await?;
        check_auth(response.status())?;
        if !response.status().is_success() {
            return Err(ConnectionError::Protocol(format!(
                "files endpoint answered {}",
                response.status()
            )));
        }
        let listing: FileListDto = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        let mut files = Vec::new();
        flatten_entries(None, listing.files, &mut files);
        Ok(files)
    }

    async fn pause_print(&self) -> Result<bool, ConnectionError> {
        self.job_command(json!({ "command": "pause", "action": "pause" }))
            .await
    }

    async fn resume_print(&self) -> Result<bool, ConnectionError> {
        self.job_command(json!({ "command": "pause", "action": "resume" }))
            .await
    }

    async fn stop_print(&self) -> Result<bool, ConnectionError> {
        self.job_command(json!({ "command": "cancel" })).await
    }

    async fn has_camera(&self) -> bool {
        match self.get(URL_SETTINGS).await {
            Ok(response) if response.status().is_success() => response
                .json::<SettingsDto>()
                .await
                .map(|s| {
                    s.webcam
                        .map(|w| w.webcam_enabled && w.stream_url.is_some())
                        .unwrap_or(false)
                })
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn camera_stream_url(&self) -> Option<String> {
        match self.get(URL_SETTINGS).await {
            Ok(response) if response.status().is_success() => {
                let settings = response.json::<SettingsDto>().await.ok()?;
                let webcam = settings.webcam?;
                if !webcam.webcam_enabled {
                    return None;
                }
                let stream = webcam.stream_url?;
                if stream.starts_with("http") {
                    Some(stream)
                } else {
                    Some(format!("{}{}", self.base_url, stream))
                }
            }
            _ => None,
        }
    }

    async fn is_degraded(&self) -> bool {
        self.shared.degraded.load(Ordering::Relaxed)
    }

    fn kind(&self) -> VendorKind {
        VendorKind::PushHttp
    }
}

enum Frame {
    Open,
    Heartbeat,
    Messages,
    Closed,
    Ignored,
}

async fn run_push_channel(
    http: reqwest::Client,
    url: String,
    api_key: String,
    shared: Arc<PushShared>,
    ready: oneshot::Sender<Result<(), ConnectionError>>,
) {
    let mut ready = Some(ready);
    let response = match http.post(&url).header(API_KEY_HEADER, &api_key).send().await {
        Ok(r) => r,
        Err(e) => {
            if let Some(tx) = ready.take() {
                let _ = tx.send(Err(map_http_error(e)));
            }
            return;
        }
    };
    if !response.status().is_success() {
        if let Some(tx) = ready.take() {
            let _ = tx.send(Err(ConnectionError::Unreachable(format!(
                "push endpoint answered {}",
                response.status()
            ))));
        }
        return;
    }

    let mut stream = response.bytes_stream();
    let mut buffer = String::new();
    'receive: while let Some(chunk) = stream.next().await {
        let bytes = match chunk {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(error = %e, "push stream read failed");
                break;
            }
        };
        buffer.push_str(&String::from_utf8_lossy(&bytes));
        while let Some(newline) = buffer.find('\n') {
            let line = buffer[..newline].trim().to_string();
            buffer.drain(..=newline);
            match handle_frame(&line, &shared.status_tx) {
                Frame::Open => {
                    if let Some(tx) = ready.take() {
                        let _ = tx.send(Ok(()));
                    }
                }
                Frame::Closed => break 'receive,
                Frame::Heartbeat | Frame::Messages | Frame::Ignored => {}
            }
        }
    }

    if let Some(tx) = ready.take() {
        let _ = tx.send(Err(ConnectionError::Unreachable(
            "push channel closed before open frame".into(),
        )));
    }
    shared.mark_push_lost();
    tracing::debug!("push channel ended");
}

/// Dispatch one SockJS frame. `o` opens the session, `h` is a heartbeat,
/// `a[...]` carries JSON-encoded messages, `c[...]` closes.
fn handle_frame(line: &str, status_tx: &watch::Sender<Option<StatusSnapshot>>) -> Frame {
    if line.is_empty() {
        return Frame::Ignored;
    }
    match line.as_bytes()[0] {
        b'o' => Frame::Open,
        b'h' => Frame::Heartbeat,
        b'c' => Frame::Closed,
        b'a' => {
            if let Ok(messages) = serde_json::from_str::<Vec<String>>(&line[1..]) {
                for message in messages {
                    if let Ok(value) = serde_json::from_str::<Value>(&message) {
                        if let Some(snapshot) = snapshot_from_push(&value) {
                            status_tx.send_replace(Some(snapshot));
                        }
                    }
                }
            }
            Frame::Messages
        }
        _ => Frame::Ignored,
    }
}

/// Build a snapshot from a `current`/`history` push message.
fn snapshot_from_push(message: &Value) -> Option<StatusSnapshot> {
    let payload = message.get("current").or_else(|| message.get("history"))?;
    let flags: OctoFlags = payload
        .pointer("/state/flags")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
        .unwrap_or_default();

    let mut snapshot = StatusSnapshot::new(map_octoprint_state(&flags));

    if let Some(temps) = payload.get("temps").and_then(Value::as_array).and_then(|a| a.last()) {
        snapshot.temperatures = Temperatures {
            nozzle: temps.pointer("/tool0/actual").and_then(Value::as_f64),
            nozzle_target: temps.pointer("/tool0/target").and_then(Value::as_f64),
            bed: temps.pointer("/bed/actual").and_then(Value::as_f64),
            bed_target: temps.pointer("/bed/target").and_then(Value::as_f64),
            chamber: temps.pointer("/chamber/actual").and_then(Value::as_f64),
        };
    }

    let name = payload
        .pointer("/job/file/display")
        .or_else(|| payload.pointer("/job/file/name"))
        .and_then(Value::as_str)
        .map(str::to_string);
    let progress = payload.pointer("/progress/completion").and_then(Value::as_f64);
    if name.is_some() || progress.is_some() {
        snapshot.job = Some(JobSnapshot {
            name,
            progress,
            layer_current: None,
            layer_total: None,
            time_remaining: payload
                .pointer("/progress/printTimeLeft")
                .and_then(Value::as_i64)
                .and_then(|v| u64::try_from(v).ok()),
        });
    }
    Some(snapshot)
}

fn job_snapshot(job: &JobDto) -> Option<JobSnapshot> {
    let name = job
        .job
        .as_ref()
        .and_then(|j| j.file.as_ref())
        .and_then(|f| f.display.clone().or_else(|| f.name.clone()));
    let progress = job.progress.as_ref().and_then(|p| p.completion);
    if name.is_none() && progress.is_none() {
        return None;
    }
    Some(JobSnapshot {
        name,
        progress,
        layer_current: None,
        layer_total: None,
        time_remaining: job
            .progress
            .as_ref()
            .and_then(|p| p.print_time_left)
            .and_then(|v| u64::try_from(v).ok()),
    })
}

/// Map raw state flags to the unified model. Total; an unreachable device
/// (`closedOrError`) forces `Offline` no matter what else is set.
pub(crate) fn map_octoprint_state(flags: &OctoFlags) -> UnifiedStatus {
    if flags.closed_or_error {
        return UnifiedStatus::Offline;
    }
    if flags.error {
        return UnifiedStatus::Error;
    }
    if flags.printing || flags.pausing || flags.cancelling {
        return UnifiedStatus::Printing;
    }
    if flags.paused {
        return UnifiedStatus::Paused;
    }
    if flags.operational || flags.ready {
        return UnifiedStatus::Online;
    }
    UnifiedStatus::Unknown
}

/// Flatten the recursive file tree into one sequence with composed paths.
fn flatten_entries(
    parent: Option<&str>,
    entries: Vec<FileEntryDto>,
    files: &mut Vec<FileDescriptor>,
) {
    for entry in entries {
        let path = entry.path.clone().unwrap_or_else(|| match parent {
            Some(parent) => format!("{}/{}", parent, entry.name),
            None => entry.name.clone(),
        });
        if entry.kind.eq_ignore_ascii_case("folder") {
            flatten_entries(Some(&path), entry.children, files);
        } else {
            files.push(FileDescriptor {
                name: entry.name,
                path,
                size: entry.size,
                origin: entry.origin.unwrap_or_else(|| "local".to_string()),
            });
        }
    }
}

fn map_http_error(error: reqwest::Error) -> ConnectionError {
    if error.is_timeout() {
        ConnectionError::Timeout(error.to_string())
    } else if error.is_connect() {
        ConnectionError::Unreachable(error.to_string())
    } else {
        ConnectionError::Protocol(error.to_string())
    }
}

fn check_auth(status: StatusCode) -> Result<(), ConnectionError> {
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(ConnectionError::AuthRejected(format!(
            "device answered {status}"
        )))
    } else {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flags(values: &Value) -> OctoFlags {
        serde_json::from_value(values.clone()).unwrap()
    }

    #[test]
    fn mapping_is_total_over_flag_combinations() {
        // Every combination of the interesting flags maps without panicking.
        for bits in 0..32u32 {
            let f = OctoFlags {
                operational: bits & 1 != 0,
                printing: bits & 2 != 0,
                paused: bits & 4 != 0,
                error: bits & 8 != 0,
                closed_or_error: bits & 16 != 0,
                ..Default::default()
            };
            let _ = map_octoprint_state(&f);
        }
        assert_eq!(map_octoprint_state(&OctoFlags::default()), UnifiedStatus::Unknown);
    }

    #[test]
    fn closed_or_error_forces_offline() {
        let f = flags(&json!({
            "closedOrError": true,
            "error": true,
            "printing": true,
            "operational": true
        }));
        assert_eq!(map_octoprint_state(&f), UnifiedStatus::Offline);
    }

    #[test]
    fn error_beats_printing_beats_paused() {
        let both = flags(&json!({ "error": true, "printing": true }));
        assert_eq!(map_octoprint_state(&both), UnifiedStatus::Error);

        let printing = flags(&json!({ "printing": true, "paused": true }));
        assert_eq!(map_octoprint_state(&printing), UnifiedStatus::Printing);

        let paused = flags(&json!({ "paused": true, "operational": true }));
        assert_eq!(map_octoprint_state(&paused), UnifiedStatus::Paused);

        let idle = flags(&json!({ "operational": true }));
        assert_eq!(map_octoprint_state(&idle), UnifiedStatus::Online);
    }

    #[test]
    fn push_frames_update_the_status_channel() {
        let (tx, rx) = watch::channel(None);

        assert!(matches!(handle_frame("o", &tx), Frame::Open));
        assert!(matches!(handle_frame("h", &tx), Frame::Heartbeat));
        assert!(rx.borrow().is_none());

        let current = json!({
            "current": {
                "state": { "flags": { "printing": true, "operational": true } },
                "job": { "file": { "name": "benchy.gcode", "display": "Benchy" } },
                "progress": { "completion": 57.2, "printTimeLeft": 1200 },
                "temps": [
                    { "tool0": { "actual": 215.3, "target": 215.0 }, "bed": { "actual": 60.0, "target": 60.0 } }
                ]
            }
        });
        let frame = format!("a[{}]", serde_json::to_string(&current.to_string()).unwrap());
        assert!(matches!(handle_frame(&frame, &tx), Frame::Messages));

        let snapshot = rx.borrow().clone().unwrap();
        assert_eq!(snapshot.status, UnifiedStatus::Printing);
        assert_eq!(snapshot.temperatures.nozzle, Some(215.3));
        let job = snapshot.job.unwrap();
        assert_eq!(job.name.as_deref(), Some("Benchy"));
        assert_eq!(job.progress, Some(57.2));
        assert_eq!(job.time_remaining, Some(1200));

        assert!(matches!(handle_frame("c[3000,\"Go away!\"]", &tx), Frame::Closed));
    }

    #[test]
    fn file_tree_is_flattened_with_composed_paths() {
        let listing: FileListDto = serde_json::from_value(json!({
            "files": [
                { "name": "benchy.gcode", "type": "machinecode", "origin": "local", "size": 2048 },
                {
                    "name": "cases",
                    "type": "folder",
                    "children": [
                        { "name": "lid.gcode", "type": "machinecode", "path": "cases/lid.gcode", "origin": "local" },
                        {
                            "name": "inserts",
                            "type": "folder",
                            "children": [
                                { "name": "m3.gcode", "type": "machinecode", "origin": "sdcard" }
                            ]
                        }
                    ]
                }
            ]
        }))
        .unwrap();

        let mut files = Vec::new();
        flatten_entries(None, listing.files, &mut files);

        let paths: Vec<&str> = files.iter().map(|f| f.path.as_str()).collect();
        assert_eq!(paths, vec!["benchy.gcode", "cases/lid.gcode", "cases/inserts/m3.gcode"]);
        assert_eq!(files[2].origin, "sdcard");
        assert_eq!(files[0].size, Some(2048));
    }

    #[test]
    fn push_message_without_state_is_unknown() {
        let message = json!({ "current": { "progress": { "completion": 10.0 } } });
        let snapshot = snapshot_from_push(&message).unwrap();
        assert_eq!(snapshot.status, UnifiedStatus::Unknown);

        assert!(snapshot_from_push(&json!({ "plugin": {} })).is_none());
    }
}
