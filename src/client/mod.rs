// src/client/mod.rs - Vendor client contract and factory
pub mod bambu;
pub mod octoprint;
pub mod prusa;

use async_trait::async_trait;
use serde::Serialize;

use crate::config::{PrinterConfig, ServiceConfig};
use crate::error::{ConfigError, ConnectionError};
use crate::status::{FileDescriptor, StatusSnapshot};

pub use bambu::BambuClient;
pub use octoprint::OctoPrintClient;
pub use prusa::PrusaClient;

/// The printer's API family. Determines which protocol client is built for
/// a configured printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum VendorKind {
    TelemetryMqtt,
    PollingHttp,
    PushHttp,
}

impl VendorKind {
    /// Parse a configured kind string. Unknown kinds return `None`; the
    /// caller decides whether that is a warning (supervisor) or an error
    /// (factory).
    pub fn parse(kind: &str) -> Option<Self> {
        match kind {
            "telemetry-mqtt" => Some(VendorKind::TelemetryMqtt),
            "polling-http" => Some(VendorKind::PollingHttp),
            "push-http" => Some(VendorKind::PushHttp),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            VendorKind::TelemetryMqtt => "telemetry-mqtt",
            VendorKind::PollingHttp => "polling-http",
            VendorKind::PushHttp => "push-http",
        }
    }
}

/// Capability contract every vendor client implements. Any client is
/// substitutable anywhere a client is expected; the supervisor and
/// dispatcher only ever see this trait.
///
/// All methods normalize transport failures into [`ConnectionError`]; no
/// raw reqwest/rumqttc error escapes an implementation.
#[async_trait]
pub trait PrinterClient: Send + Sync {
    /// Establish the session. Idempotent: connecting while connected is a
    /// no-op returning success, without a second handshake.
    async fn connect(&self) -> Result<(), ConnectionError>;

    /// Release the session and any background tasks. Tolerant of being
    /// called while already disconnected; never fails.
    async fn disconnect(&self);

    /// Whether a live session currently exists.
    async fn is_connected(&self) -> bool;

    /// Latest known device state. Telemetry clients answer from the last
    /// pushed report; HTTP clients issue or reuse a bounded request.
    async fn get_status(&self) -> Result<StatusSnapshot, ConnectionError>;

    /// Files visible on the device, folders flattened into composed paths.
    async fn list_files(&self) -> Result<Vec<FileDescriptor>, ConnectionError>;

    /// `Ok(true)` only if the device acknowledged the command; a device-side
    /// conflict ("no active job") yields `Ok(false)`, never an error.
    async fn pause_print(&self) -> Result<bool, ConnectionError>;
    async fn resume_print(&self) -> Result<bool, ConnectionError>;
    async fn stop_print(&self) -> Result<bool, ConnectionError>;

    /// Camera capability probes. Fail soft: an unreachable capability
    /// endpoint means `false`/`None`, not an error.
    async fn has_camera(&self) -> bool;
    async fn camera_stream_url(&self) -> Option<String>;

    /// Whether the session lost a secondary capability (e.g. its push
    /// channel) and fell back to a lesser mode.
    async fn is_degraded(&self) -> bool {
        false
    }

    fn kind(&self) -> VendorKind;
}

/// Builds the right client for a configured printer. A trait so tests can
/// inject scripted clients through the same seam the supervisor uses.
pub trait ClientFactory: Send + Sync {
    fn create(&self, config: &PrinterConfig) -> Result<Box<dyn PrinterClient>, ConfigError>;
}

/// Production factory: validates the config for its kind and builds the
/// real vendor client.
pub struct DefaultClientFactory {
    service: ServiceConfig,
}

impl DefaultClientFactory {
    pub fn new(service: ServiceConfig) -> Self {
        Self { service }
    }
}

impl ClientFactory for DefaultClientFactory {
    fn create(&self, config: &PrinterConfig) -> Result<Box<dyn PrinterClient>, ConfigError> {
        let kind = VendorKind::parse(&config.kind).ok_or_else(|| ConfigError::UnsupportedKind {
            printer_id: config.id.clone(),
            kind: config.kind.clone(),
        })?;
        config.validate()?;

        match kind {
            VendorKind::TelemetryMqtt => Ok(Box::new(BambuClient::new(config, &self.service))),
            VendorKind::PollingHttp => Ok(Box::new(PrusaClient::new(config, &self.service)?)),
            VendorKind::PushHttp => Ok(Box::new(OctoPrintClient::new(config, &self.service)?)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn printer(kind: &str) -> PrinterConfig {
        PrinterConfig {
            id: "p1".into(),
            name: "Test".into(),
            kind: kind.into(),
            address: "10.0.0.5".into(),
            port: 80,
            use_https: false,
            access_code: Some("12345678".into()),
            serial_number: Some("01S00C123400001".into()),
            api_key: Some("key".into()),
            active: true,
        }
    }

    #[test]
    fn kind_parsing_round_trips() {
        for kind in [
            VendorKind::TelemetryMqtt,
            VendorKind::PollingHttp,
            VendorKind::PushHttp,
        ] {
            assert_eq!(VendorKind::parse(kind.as_str()), Some(kind));
        }
        assert_eq!(VendorKind::parse("resin-lcd"), None);
    }

    #[test]
    fn factory_builds_each_kind() {
        let factory = DefaultClientFactory::new(ServiceConfig::default());
        for kind in ["telemetry-mqtt", "polling-http", "push-http"] {
            let client = factory.create(&printer(kind)).unwrap();
            assert_eq!(client.kind().as_str(), kind);
        }
    }

    #[test]
    fn factory_rejects_unknown_kind() {
        let factory = DefaultClientFactory::new(ServiceConfig::default());
        assert!(matches!(
            factory.create(&printer("laser-engraver")).err().unwrap(),
            ConfigError::UnsupportedKind { .. }
        ));
    }

    #[test]
    fn factory_rejects_missing_credentials() {
        let factory = DefaultClientFactory::new(ServiceConfig::default());
        let mut config = printer("telemetry-mqtt");
        config.access_code = None;
        assert!(matches!(
            factory.create(&config).err().unwrap(),
            ConfigError::MissingField { field: "access_code", .. }
        ));
    }
}
