// src/config/mod.rs - Fleet configuration system
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;

/// Top-level fleet configuration, loaded from a TOML file.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct FleetConfig {
    #[serde(default)]
    pub printers: Vec<PrinterConfig>,

    #[serde(default)]
    pub service: ServiceConfig,
}

/// One configured printer. `kind` stays a free-form string here so that a
/// single unknown vendor cannot fail parsing of the whole fleet file; the
/// client factory rejects unsupported kinds per printer.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PrinterConfig {
    pub id: String,

    #[serde(default)]
    pub name: String,

    pub kind: String,

    /// Hostname or IP address of the device.
    pub address: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default)]
    pub use_https: bool,

    /// Access code for telemetry (MQTT) printers.
    #[serde(default)]
    pub access_code: Option<String>,

    /// Device serial number, required for telemetry printers (scopes the
    /// MQTT topics).
    #[serde(default)]
    pub serial_number: Option<String>,

    /// API key for HTTP printers.
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default = "default_active")]
    pub active: bool,
}

impl PrinterConfig {
    /// Base URL for the HTTP vendor kinds: `scheme://address[:port]`.
    pub fn base_url(&self) -> String {
        let scheme = if self.use_https { "https" } else { "http" };
        let default = if self.use_https { 443 } else { 80 };
        if self.port == default {
            format!("{}://{}", scheme, self.address)
        } else {
            format!("{}://{}:{}", scheme, self.address, self.port)
        }
    }

    /// Display name, falling back to the id.
    pub fn display_name(&self) -> &str {
        if self.name.is_empty() { &self.id } else { &self.name }
    }

    /// The credential configured for this printer, whichever field carries
    /// it. Used only for redacted diagnostics.
    pub fn credential(&self) -> &str {
        self.access_code
            .as_deref()
            .or(self.api_key.as_deref())
            .unwrap_or("")
    }

    fn require<'a>(
        &self,
        field: &'static str,
        value: &'a Option<String>,
    ) -> Result<&'a str, ConfigError> {
        match value.as_deref().filter(|v| !v.is_empty()) {
            Some(v) => Ok(v),
            None => Err(ConfigError::MissingField {
                printer_id: self.id.clone(),
                field,
                kind: self.kind.clone(),
            }),
        }
    }

    /// Validate vendor-kind-specific required fields.
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self.kind.as_str() {
            "telemetry-mqtt" => {
                self.require("access_code", &self.access_code)?;
                self.require("serial_number", &self.serial_number)?;
            }
            "polling-http" | "push-http" => {
                self.require("api_key", &self.api_key)?;
            }
            other => {
                return Err(ConfigError::UnsupportedKind {
                    printer_id: self.id.clone(),
                    kind: other.to_string(),
                });
            }
        }
        Ok(())
    }
}

/// Tuning knobs for the supervisor and clients. Every network operation is
/// bounded by one of these.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
    /// Deadline for establishing a session.
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Deadline for a single status/file/command request.
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Window to wait for a telemetry command acknowledgment.
    #[serde(default = "default_ack_timeout")]
    pub command_ack_timeout_secs: u64,

    /// Interval between monitor polls of each printer.
    #[serde(default = "default_poll_interval")]
    pub status_poll_secs: u64,

    /// Deadline for the lightweight health-check probe.
    #[serde(default = "default_probe_timeout")]
    pub probe_timeout_secs: u64,

    /// Consecutive monitor failures before a session is marked degraded.
    #[serde(default = "default_degrade_after")]
    pub degrade_after_failures: u32,

    /// Consecutive monitor failures before a session is torn down.
    #[serde(default = "default_disconnect_after")]
    pub disconnect_after_failures: u32,

    /// Interval between fleet health summaries in the host binary.
    #[serde(default = "default_health_interval")]
    pub health_interval_secs: u64,
}

fn default_port() -> u16 {
    80
}
fn default_active() -> bool {
    true
}
fn default_connect_timeout() -> u64 {
    15
}
fn default_request_timeout() -> u64 {
    10
}
fn default_ack_timeout() -> u64 {
    5
}
fn default_poll_interval() -> u64 {
    5
}
fn default_probe_timeout() -> u64 {
    3
}
fn default_degrade_after() -> u32 {
    3
}
fn default_disconnect_after() -> u32 {
    6
}
fn default_health_interval() -> u64 {
    30
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: default_connect_timeout(),
            request_timeout_secs: default_request_timeout(),
            command_ack_timeout_secs: default_ack_timeout(),
            status_poll_secs: default_poll_interval(),
            probe_timeout_secs: default_probe_timeout(),
            degrade_after_failures: default_degrade_after(),
            disconnect_after_failures: default_disconnect_after(),
            health_interval_secs: default_health_interval(),
        }
    }
}

impl FleetConfig {
    /// Load the fleet configuration from a TOML file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        let config = Self::parse(&contents).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            source: e,
        })?;
        config.check_unique_ids()?;
        tracing::info!(
            path = %path.display(),
            printers = config.printers.len(),
            "loaded fleet configuration"
        );
        Ok(config)
    }

    fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    fn check_unique_ids(&self) -> Result<(), ConfigError> {
        let mut seen = std::collections::HashSet::new();
        for printer in &self.printers {
            if !seen.insert(printer.id.as_str()) {
                return Err(ConfigError::DuplicateId(printer.id.clone()));
            }
        }
        Ok(())
    }

    /// Printers the supervisor should manage.
    pub fn active_printers(&self) -> impl Iterator<Item = &PrinterConfig> {
        self.printers.iter().filter(|p| p.active)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_config() -> &'static str {
        r#"
[service]
status_poll_secs = 2

[[printers]]
id = "bambu_001"
name = "Bambu X1C"
kind = "telemetry-mqtt"
address = "192.168.1.50"
access_code = "12345678"
serial_number = "01S00C123400001"

[[printers]]
id = "prusa_001"
name = "Prusa MK4"
kind = "polling-http"
address = "192.168.1.51"
api_key = "prusa-key"

[[printers]]
id = "octo_001"
kind = "push-http"
address = "192.168.1.52"
port = 5000
api_key = "octo-key"
active = false
"#
    }

    #[test]
    fn parses_fleet_toml() {
        let config = FleetConfig::parse(sample_config()).unwrap();
        assert_eq!(config.printers.len(), 3);
        assert_eq!(config.service.status_poll_secs, 2);
        assert_eq!(config.service.request_timeout_secs, 10);

        let bambu = &config.printers[0];
        assert_eq!(bambu.id, "bambu_001");
        assert_eq!(bambu.serial_number.as_deref(), Some("01S00C123400001"));
        assert!(bambu.active);
    }

    #[test]
    fn active_filter_skips_inactive_printers() {
        let config = FleetConfig::parse(sample_config()).unwrap();
        let active: Vec<_> = config.active_printers().map(|p| p.id.as_str()).collect();
        assert_eq!(active, vec!["bambu_001", "prusa_001"]);
    }

    #[test]
    fn base_url_composition() {
        let mut printer = PrinterConfig {
            id: "p".into(),
            name: String::new(),
            kind: "push-http".into(),
            address: "octopi.local".into(),
            port: default_port(),
            use_https: false,
            access_code: None,
            serial_number: None,
            api_key: Some("k".into()),
            active: true,
        };
        assert_eq!(printer.base_url(), "http://octopi.local");

        printer.port = 5000;
        assert_eq!(printer.base_url(), "http://octopi.local:5000");

        printer.use_https = true;
        assert_eq!(printer.base_url(), "https://octopi.local:5000");

        printer.port = 443;
        assert_eq!(printer.base_url(), "https://octopi.local");
    }

    #[test]
    fn validation_requires_vendor_fields() {
        let config = FleetConfig::parse(sample_config()).unwrap();

        let mut bambu = config.printers[0].clone();
        assert!(bambu.validate().is_ok());
        bambu.serial_number = None;
        let err = bambu.validate().unwrap_err();
        assert!(matches!(
            err,
            ConfigError::MissingField { field: "serial_number", .. }
        ));

        let mut prusa = config.printers[1].clone();
        assert!(prusa.validate().is_ok());
        prusa.api_key = Some(String::new());
        assert!(prusa.validate().is_err());
    }

    #[test]
    fn unknown_kind_is_rejected_per_printer() {
        let printer = PrinterConfig {
            id: "mystery".into(),
            name: String::new(),
            kind: "laser-engraver".into(),
            address: "10.0.0.9".into(),
            port: default_port(),
            use_https: false,
            access_code: None,
            serial_number: None,
            api_key: None,
            active: true,
        };
        assert!(matches!(
            printer.validate().unwrap_err(),
            ConfigError::UnsupportedKind { .. }
        ));
    }

    #[test]
    fn duplicate_ids_are_rejected() {
        let doubled = r#"
[[printers]]
id = "p1"
kind = "polling-http"
address = "a"
api_key = "k"

[[printers]]
id = "p1"
kind = "polling-http"
address = "b"
api_key = "k"
"#;
        let config = FleetConfig::parse(doubled).unwrap();
        assert!(matches!(
            config.check_unique_ids().unwrap_err(),
            ConfigError::DuplicateId(id) if id == "p1"
        ));
    }

    #[test]
    fn load_reads_from_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fleet.toml");
        std::fs::write(&path, sample_config()).unwrap();
        let config = FleetConfig::load(&path).unwrap();
        assert_eq!(config.printers.len(), 3);

        assert!(matches!(
            FleetConfig::load(&dir.path().join("missing.toml")).unwrap_err(),
            ConfigError::Io { .. }
        ));
    }
}
