// src/client/prusa.rs - Polling REST vendor client
//
// PrusaLink-class printers are polled over plain or TLS HTTP with an API key
// header. There is no push channel: every status read is a bounded request.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;

use crate::client::{PrinterClient, VendorKind};
use crate::config::{PrinterConfig, ServiceConfig};
use crate::error::{ConfigError, ConnectionError};
use crate::status::{FileDescriptor, JobSnapshot, StatusSnapshot, Temperatures, UnifiedStatus};

const API_KEY_HEADER: &str = "X-Api-Key";

const URL_VERSION: &str = "/api/version";
const URL_STATUS: &str = "/api/v1/status";
const URL_JOB: &str = "/api/v1/job";
const URL_STORAGE: &str = "/api/v1/storage";
const URL_FILES: &str = "/api/v1/files";
const URL_CAMERAS: &str = "/api/v1/cameras";

#[derive(Debug, Deserialize)]
struct StatusDto {
    #[serde(default)]
    printer: PrinterDto,
    #[serde(default)]
    job: Option<StatusJobDto>,
}

#[derive(Debug, Default, Deserialize)]
struct PrinterDto {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    temp_nozzle: Option<f64>,
    #[serde(default)]
    target_nozzle: Option<f64>,
    #[serde(default)]
    temp_bed: Option<f64>,
    #[serde(default)]
    target_bed: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct StatusJobDto {
    id: i64,
    #[serde(default)]
    progress: Option<f64>,
    #[serde(default)]
    time_remaining: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct JobDetailDto {
    #[serde(default)]
    file: Option<JobFileDto>,
}

#[derive(Debug, Deserialize)]
struct JobFileDto {
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StorageListDto {
    #[serde(default)]
    storage_list: Vec<StorageDto>,
}

#[derive(Debug, Deserialize)]
struct StorageDto {
    path: String,
    /// Treat a missing field as available; only an explicit false skips.
    #[serde(default = "storage_available_default")]
    available: bool,
}

fn storage_available_default() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct FileNodeDto {
    #[serde(default)]
    name: String,
    #[serde(rename = "type", default)]
    kind: String,
    #[serde(default)]
    size: Option<u64>,
    #[serde(default)]
    children: Vec<FileNodeDto>,
}

#[derive(Debug, Deserialize)]
struct CameraListDto {
    #[serde(default)]
    camera_list: Vec<CameraDto>,
}

#[derive(Debug, Deserialize)]
struct CameraDto {
    camera_id: String,
}

/// Polling REST client for PrusaLink-class printers.
pub struct PrusaClient {
    base_url: String,
    api_key: String,
    http: reqwest::Client,
    connected: AtomicBool,
}

impl PrusaClient {
    pub fn new(config: &PrinterConfig, service: &ServiceConfig) -> Result<Self, ConfigError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(service.request_timeout_secs))
            .connect_timeout(Duration::from_secs(service.connect_timeout_secs))
            .build()
            .map_err(|e| ConfigError::HttpClient {
                printer_id: config.id.clone(),
                detail: e.to_string(),
            })?;
        Ok(Self {
            base_url: config.base_url(),
            api_key: config.api_key.clone().unwrap_or_default(),
            http,
            connected: AtomicBool::new(false),
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

    /// Fetch the id of the currently running job, if any. Commands target a
    /// specific job id, so every command starts with this lookup.
    async fn current_job_id(&self) -> Result<Option<i64>, ConnectionError> {
        let response = self.get(URL_STATUS).await?;
        check_auth(response.status())?;
        if !response.status().is_success() {
            return Err(ConnectionError::Protocol(format!(
                "status endpoint answered {}",
                response.status()
            )));
        }
        let status: StatusDto = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
        Ok(status.job.map(|j| j.id))
    }

    /// Issue a job command. 204 means acknowledged; 409 means the device
    /// refused in its current state, which is a rejection, not a failure.
    async fn job_command(&self, method: reqwest::Method, path: String) -> Result<bool, ConnectionError> {
        let response = self
            .http
            .request(method, self.url(&path))
            .header(API_KEY_HEADER, &self.api_key)
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
}

#[async_trait]
impl PrinterClient for PrusaClient {
    async fn connect(&self) -> Result<(), ConnectionError> {
        if self.connected.load(Ordering::Relaxed) {
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
        self.connected.store(true, Ordering::Relaxed);
        tracing::debug!(base_url = %self.base_url, "REST session validated");
        Ok(())
    }

    async fn disconnect(&self) {
        // Stateless protocol: nothing to tear down beyond the flag.
        self.connected.store(false, Ordering::Relaxed);
    }

    async fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Relaxed)
    }

    async fn get_status(&self) -> Result<StatusSnapshot, ConnectionError> {
        let response = self.get(URL_STATUS).await?;
        check_auth(response.status())?;
        if !response.status().is_success() {
            return Err(ConnectionError::Protocol(format!(
                "status endpoint answered {}",
                response.status()
            )));
        }
        let status: StatusDto = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        // Pull the file name from the job detail endpoint when a job is
        // active; tolerate it answering 204 in the gap after job end.
        let mut file_name = None;
        if status.job.is_some() {
            let detail = self.get(URL_JOB).await?;
            if detail.status().is_success() && detail.status() != StatusCode::NO_CONTENT {
                if let Ok(detail) = detail.json::<JobDetailDto>().await {
                    file_name = detail
                        .file
                        .and_then(|f| f.display_name.or(f.name));
                }
            }
        }

        Ok(snapshot_from_status(&status, file_name))
    }

    async fn list_files(&self) -> Result<Vec<FileDescriptor>, ConnectionError> {
        let response = self.get(URL_STORAGE).await?;
        check_auth(response.status())?;
        if !response.status().is_success() {
            return Err(ConnectionError::Protocol(format!(
                "storage endpoint answered {}",
                response.status()
            )));
        }
        let storages: StorageListDto = response
            .json()
            .await
            .map_err(|e| ConnectionError::Protocol(e.to_string()))?;

        let mut files = Vec::new();
        for storage in storages.storage_list.iter().filter(|s| s.available) {
            // Walk the storage tree iteratively, one listing per folder.
            let mut pending = vec![storage.path.trim_end_matches('/').to_string()];
            while let Some(dir) = pending.pop() {
                let listing = self.get(&format!("{URL_FILES}{dir}/")).await?;
                if !listing.status().is_success() {
                    tracing::warn!(dir = %dir, status = %listing.status(), "skipping unreadable folder");
                    continue;
                }
                let node: FileNodeDto = listing
                    .json()
                    .await
                    .map_err(|e| ConnectionError::Protocol(e.to_string()))?;
                collect_children(&dir, &storage.path, &node.children, &mut files, &mut pending);
            }
        }
        Ok(files)
    }

    async fn pause_print(&self) -> Result<bool, ConnectionError> {
        match self.current_job_id().await? {
            // No active job: the device would refuse anyway.
            None => Ok(false),
            Some(id) => {
                self.job_command(reqwest::Method::PUT, format!("{URL_JOB}/{id}/pause"))
                    .await
            }
        }
    }

    async fn resume_print(&self) -> Result<bool, ConnectionError> {
        match self.current_job_id().await? {
            None => Ok(false),
            Some(id) => {
                self.job_command(reqwest::Method::PUT, format!("{URL_JOB}/{id}/resume"))
                    .await
            }
        }
    }

    async fn stop_print(&self) -> Result<bool, ConnectionError> {
        match self.current_job_id().await? {
            None => Ok(false),
            Some(id) => {
                self.job_command(reqwest::Method::DELETE, format!("{URL_JOB}/{id}"))
                    .await
            }
        }
    }

    async fn has_camera(&self) -> bool {
        match self.get(URL_CAMERAS).await {
            Ok(response) if response.status().is_success() => response
                .json::<CameraListDto>()
                .await
                .map(|c| !c.camera_list.is_empty())
                .unwrap_or(false),
            _ => false,
        }
    }

    async fn camera_stream_url(&self) -> Option<String> {
        match self.get(URL_CAMERAS).await {
            Ok(response) if response.status().is_success() => response
                .json::<CameraListDto>()
                .await
                .ok()
                .and_then(|c| c.camera_list.into_iter().next())
                .map(|camera| self.url(&format!("{URL_CAMERAS}/{}/snap", camera.camera_id))),
            _ => None,
        }
    }

    fn kind(&self) -> VendorKind {
        VendorKind::PollingHttp
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

/// Map the raw device state string to the unified model. Total.
pub(crate) fn map_prusa_state(state: Option<&str>) -> UnifiedStatus {
    match state {
        Some(state) => match state.to_ascii_uppercase().as_str() {
            "PRINTING" => UnifiedStatus::Printing,
            "PAUSED" => UnifiedStatus::Paused,
            "ERROR" | "ATTENTION" => UnifiedStatus::Error,
            "IDLE" | "READY" | "BUSY" | "FINISHED" | "STOPPED" => UnifiedStatus::Online,
            _ => UnifiedStatus::Unknown,
        },
        None => UnifiedStatus::Unknown,
    }
}

fn snapshot_from_status(status: &StatusDto, file_name: Option<String>) -> StatusSnapshot {
    let mut snapshot = StatusSnapshot::new(map_prusa_state(status.printer.state.as_deref()));
    snapshot.temperatures = Temperatures {
        nozzle: status.printer.temp_nozzle,
        nozzle_target: status.printer.target_nozzle,
        bed: status.printer.temp_bed,
        bed_target: status.printer.target_bed,
        chamber: None,
    };
    if let Some(job) = &status.job {
        snapshot.job = Some(JobSnapshot {
            name: file_name,
            progress: job.progress,
            layer_current: None,
            layer_total: None,
            time_remaining: job.time_remaining,
        });
    }
    snapshot
}

fn collect_children(
    dir: &str,
    storage: &str,
    children: &[FileNodeDto],
    files: &mut Vec<FileDescriptor>,
    pending: &mut Vec<String>,
) {
    for child in children {
        let path = format!("{}/{}", dir.trim_end_matches('/'), child.name);
        if child.kind.eq_ignore_ascii_case("FOLDER") {
            pending.push(path);
        } else {
            files.push(FileDescriptor {
                name: child.name.clone(),
                path,
                size: child.size,
                origin: storage.to_string(),
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_mapping_is_total() {
        for state in [
            None,
            Some(""),
            Some("PRINTING"),
            Some("printing"),
            Some("PAUSED"),
            Some("IDLE"),
            Some("READY"),
            Some("BUSY"),
            Some("FINISHED"),
            Some("STOPPED"),
            Some("ERROR"),
            Some("ATTENTION"),
            Some("garbage"),
        ] {
            let _ = map_prusa_state(state);
        }
        assert_eq!(map_prusa_state(None), UnifiedStatus::Unknown);
        assert_eq!(map_prusa_state(Some("garbage")), UnifiedStatus::Unknown);
    }

    #[test]
    fn state_mapping_values() {
        assert_eq!(map_prusa_state(Some("PRINTING")), UnifiedStatus::Printing);
        assert_eq!(map_prusa_state(Some("paused")), UnifiedStatus::Paused);
        assert_eq!(map_prusa_state(Some("ATTENTION")), UnifiedStatus::Error);
        assert_eq!(map_prusa_state(Some("FINISHED")), UnifiedStatus::Online);
    }

    #[test]
    fn snapshot_from_status_payload() {
        let status: StatusDto = serde_json::from_value(serde_json::json!({
            "job": { "id": 129, "progress": 50.0, "time_remaining": 520, "time_printing": 526 },
            "printer": {
                "state": "PRINTING",
                "temp_nozzle": 219.9,
                "target_nozzle": 220.0,
                "temp_bed": 60.2,
                "target_bed": 60.0
            }
        }))
        .unwrap();

        let snapshot = snapshot_from_status(&status, Some("benchy.gcode".into()));
        assert_eq!(snapshot.status, UnifiedStatus::Printing);
        assert_eq!(snapshot.temperatures.nozzle, Some(219.9));
        assert_eq!(snapshot.temperatures.chamber, None);

        let job = snapshot.job.unwrap();
        assert_eq!(job.name.as_deref(), Some("benchy.gcode"));
        assert_eq!(job.progress, Some(50.0));
        assert_eq!(job.time_remaining, Some(520));
    }

    #[test]
    fn idle_status_has_no_job() {
        let status: StatusDto = serde_json::from_value(serde_json::json!({
            "printer": { "state": "IDLE" }
        }))
        .unwrap();
        let snapshot = snapshot_from_status(&status, None);
        assert_eq!(snapshot.status, UnifiedStatus::Online);
        assert!(snapshot.job.is_none());
    }

    #[test]
    fn folder_children_are_flattened_with_composed_paths() {
        let children: Vec<FileNodeDto> = serde_json::from_value(serde_json::json!([
            { "name": "benchy.gcode", "type": "PRINT_FILE", "size": 1024 },
            { "name": "calibration", "type": "FOLDER" }
        ]))
        .unwrap();

        let mut files = Vec::new();
        let mut pending = Vec::new();
        collect_children("/usb", "/usb", &children, &mut files, &mut pending);

        assert_eq!(files.len(), 1);
        assert_eq!(files[0].path, "/usb/benchy.gcode");
        assert_eq!(files[0].size, Some(1024));
        assert_eq!(files[0].origin, "/usb");
        // The folder is queued for its own listing pass.
        assert_eq!(pending, vec!["/usb/calibration".to_string()]);
    }
}
