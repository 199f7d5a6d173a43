// src/error.rs - Error taxonomy for the fleet core
use thiserror::Error;

/// Failure of a network/protocol operation against one printer.
///
/// Every vendor client normalizes its low-level transport errors into this
/// enum; raw reqwest/rumqttc errors never cross a client's public surface.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The operation did not complete within its deadline.
    #[error("operation timed out: {0}")]
    Timeout(String),

    /// The device could not be reached (refused, DNS, dropped socket).
    #[error("printer unreachable: {0}")]
    Unreachable(String),

    /// The device rejected our credentials. Not retryable.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The device refused the request in its current state.
    #[error("device conflict: {0}")]
    DeviceConflict(String),

    /// The device answered with something we could not interpret.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ConnectionError {
    /// Whether the supervisor may retry the operation later.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, ConnectionError::AuthRejected(_))
    }
}

/// Per-printer configuration problem, fatal for that printer only.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("printer {printer_id}: unsupported kind `{kind}`")]
    UnsupportedKind { printer_id: String, kind: String },

    #[error("printer {printer_id}: missing required field `{field}` for kind `{kind}`")]
    MissingField {
        printer_id: String,
        field: &'static str,
        kind: String,
    },

    #[error("duplicate printer id `{0}`")]
    DuplicateId(String),

    #[error("printer {printer_id}: failed to build HTTP client: {detail}")]
    HttpClient { printer_id: String, detail: String },
}

/// Top-level error surface of the supervisor and dispatcher.
#[derive(Debug, Error)]
pub enum FleetError {
    /// No printer with this id is managed.
    #[error("printer not found: {0}")]
    NotFound(String),

    /// A connection-level failure, attributed to one printer.
    #[error("printer {printer_id}: {source}")]
    Connection {
        printer_id: String,
        #[source]
        source: ConnectionError,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl FleetError {
    pub fn connection(printer_id: &str, source: ConnectionError) -> Self {
        FleetError::Connection {
            printer_id: printer_id.to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_rejection_is_not_retryable() {
        assert!(!ConnectionError::AuthRejected("bad key".into()).is_retryable());
        assert!(ConnectionError::Timeout("probe".into()).is_retryable());
        assert!(ConnectionError::Unreachable("refused".into()).is_retryable());
        assert!(ConnectionError::DeviceConflict("no job".into()).is_retryable());
    }

    #[test]
    fn fleet_error_names_the_printer() {
        let err = FleetError::connection("prusa_001", ConnectionError::Timeout("status".into()));
        assert!(err.to_string().contains("prusa_001"));
    }
}
