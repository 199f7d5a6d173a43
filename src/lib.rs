//! Fleet connection core for heterogeneous 3D printers.
//!
//! Three incompatible vendor protocols — pushed MQTT telemetry, polled
//! REST, and REST with a push-notification channel — are normalized behind
//! one [`client::PrinterClient`] contract. The
//! [`supervisor::ConnectionSupervisor`] owns every session's lifecycle and
//! health, and the [`dispatch::CommandDispatcher`] routes operator commands
//! to whichever printer they target.

pub mod client;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod events;
pub mod status;
pub mod supervisor;

pub use client::{ClientFactory, DefaultClientFactory, PrinterClient, VendorKind};
pub use config::{FleetConfig, PrinterConfig, ServiceConfig};
pub use dispatch::{CommandDispatcher, PrintCommand};
pub use error::{ConfigError, ConnectionError, FleetError};
pub use events::{FleetEvent, NotificationSink};
pub use status::{
    CommandResult, ConnectionState, FileDescriptor, JobSnapshot, PrinterHandle, StatusSnapshot,
    Temperatures, UnifiedStatus,
};
pub use supervisor::{ConnectionSupervisor, FleetHealth, PrinterHealth};
