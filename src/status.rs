// src/status.rs - Unified status model shared by all vendor clients
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Vendor-independent printer status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum UnifiedStatus {
    Online,
    Offline,
    Printing,
    Paused,
    Error,
    Unknown,
}

/// Temperature readings. Everything is optional; not every device reports
/// every sensor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Temperatures {
    pub nozzle: Option<f64>,
    pub nozzle_target: Option<f64>,
    pub bed: Option<f64>,
    pub bed_target: Option<f64>,
    pub chamber: Option<f64>,
}

/// What the device reports about its current job, if any.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobSnapshot {
    pub name: Option<String>,
    /// Progress in percent (0-100).
    pub progress: Option<f64>,
    pub layer_current: Option<u32>,
    pub layer_total: Option<u32>,
    /// Estimated seconds remaining.
    pub time_remaining: Option<u64>,
}

/// Immutable status reading produced by a vendor client.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub status: UnifiedStatus,
    pub temperatures: Temperatures,
    pub job: Option<JobSnapshot>,
    pub timestamp: DateTime<Utc>,
}

impl StatusSnapshot {
    pub fn new(status: UnifiedStatus) -> Self {
        Self {
            status,
            temperatures: Temperatures::default(),
            job: None,
            timestamp: Utc::now(),
        }
    }
}

/// A file visible on the device, with device-side folders flattened into the
/// composed `path`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDescriptor {
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub origin: String,
}

/// Outcome of a pause/resume/stop command as seen by the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandResult {
    Accepted,
    Rejected(String),
}

/// Connection lifecycle of one printer session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Healthy,
    Degraded,
}

impl ConnectionState {
    /// A live session exists. Degraded sessions are still connected; they
    /// have only lost their push channel.
    pub fn is_connected(self) -> bool {
        matches!(
            self,
            ConnectionState::Connected | ConnectionState::Healthy | ConnectionState::Degraded
        )
    }
}

/// One managed physical device. The handle survives connect/disconnect
/// cycles; only removal from the fleet destroys it.
#[derive(Debug, Clone)]
pub struct PrinterHandle {
    pub id: String,
    pub name: String,
    pub address: String,
    /// Redacted credential, safe for logs and diagnostics.
    pub credential_hint: String,
    pub state: ConnectionState,
    pub last_snapshot: Option<StatusSnapshot>,
    pub last_contact: Option<DateTime<Utc>>,
}

impl PrinterHandle {
    pub fn new(id: &str, name: &str, address: &str, credential: &str) -> Self {
        Self {
            id: id.to_string(),
            name: name.to_string(),
            address: address.to_string(),
            credential_hint: redact(credential),
            state: ConnectionState::Disconnected,
            last_snapshot: None,
            last_contact: None,
        }
    }

    /// Cache a snapshot, keeping per-printer timestamps monotonic. A stale
    /// reading (e.g. a poll answered out of order) never overwrites a newer
    /// cached one.
    pub fn cache_snapshot(&mut self, snapshot: StatusSnapshot) {
        let stale = self
            .last_snapshot
            .as_ref()
            .is_some_and(|prev| prev.timestamp > snapshot.timestamp);
        if stale {
            return;
        }
        self.last_contact = Some(snapshot.timestamp);
        self.last_snapshot = Some(snapshot);
    }

    /// Seconds since the last successful contact, if any.
    pub fn last_status_age(&self) -> Option<f64> {
        self.last_contact
            .map(|t| (Utc::now() - t).num_milliseconds() as f64 / 1000.0)
    }
}

/// Show just enough of a credential to identify it in logs.
pub fn redact(credential: &str) -> String {
    if credential.is_empty() {
        return String::new();
    }
    let visible: String = credential.chars().take(2).collect();
    format!("{}****", visible)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn degraded_counts_as_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(ConnectionState::Healthy.is_connected());
        assert!(ConnectionState::Degraded.is_connected());
        assert!(!ConnectionState::Disconnected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
    }

    #[test]
    fn snapshot_cache_is_monotonic() {
        let mut handle = PrinterHandle::new("p1", "Test", "10.0.0.1", "secret");
        let newer = StatusSnapshot::new(UnifiedStatus::Printing);
        let mut older = StatusSnapshot::new(UnifiedStatus::Online);
        older.timestamp = newer.timestamp - Duration::seconds(30);

        handle.cache_snapshot(newer.clone());
        handle.cache_snapshot(older);

        let cached = handle.last_snapshot.unwrap();
        assert_eq!(cached.status, UnifiedStatus::Printing);
        assert_eq!(cached.timestamp, newer.timestamp);
        assert_eq!(handle.last_contact, Some(newer.timestamp));
    }

    #[test]
    fn credentials_are_redacted() {
        let handle = PrinterHandle::new("p1", "Test", "10.0.0.1", "12345678");
        assert_eq!(handle.credential_hint, "12****");
        assert!(!handle.credential_hint.contains("345678"));
        assert_eq!(redact(""), "");
    }
}
