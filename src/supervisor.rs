// src/supervisor.rs - Connection lifecycle supervision for the whole fleet
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use serde::Serialize;
use tokio::sync::{Mutex, RwLock, broadcast};
use tokio::task::JoinHandle;
use tokio::time::timeout;

use crate::client::{ClientFactory, PrinterClient};
use crate::config::{PrinterConfig, ServiceConfig};
use crate::error::{ConnectionError, FleetError};
use crate::events::{FleetEvent, NotificationSink, ProgressStage};
use crate::status::{ConnectionState, PrinterHandle};

type SharedClient = Arc<Mutex<Box<dyn PrinterClient>>>;
type Registry = Arc<RwLock<HashMap<String, ManagedPrinter>>>;

/// One printer under supervision: its handle, its client session, and the
/// monitor task currently attached to it.
struct ManagedPrinter {
    handle: PrinterHandle,
    client: SharedClient,
    monitor: Option<JoinHandle<()>>,
}

/// Health of one printer as reported by `health_check`.
#[derive(Debug, Clone, Serialize)]
pub struct PrinterHealth {
    pub connected: bool,
    pub healthy: bool,
    /// Seconds since the last successful status read.
    pub last_status_age: Option<f64>,
}

/// Fleet-level health summary.
#[derive(Debug, Clone, Serialize)]
pub struct FleetHealth {
    pub service_active: bool,
    pub total_printers: usize,
    pub connected_printers: usize,
    pub healthy_printers: usize,
    pub printers: HashMap<String, PrinterHealth>,
}

/// Owns the registry of printer handles and live client sessions, and the
/// connect/disconnect/health lifecycle of every printer concurrently.
///
/// The registry is the only state shared across printer tasks; every
/// mutation goes through its lock. Each client sits behind its own mutex so
/// commands against one printer serialize while different printers proceed
/// in parallel.
pub struct ConnectionSupervisor {
    registry: Registry,
    factory: Box<dyn ClientFactory>,
    sink: Arc<dyn NotificationSink>,
    settings: ServiceConfig,
    shutdown_tx: broadcast::Sender<()>,
    active: AtomicBool,
}

impl ConnectionSupervisor {
    pub fn new(
        factory: Box<dyn ClientFactory>,
        sink: Arc<dyn NotificationSink>,
        settings: ServiceConfig,
    ) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        Self {
            registry: Arc::new(RwLock::new(HashMap::new())),
            factory,
            sink,
            settings,
            shutdown_tx,
            active: AtomicBool::new(true),
        }
    }

    /// Instantiate a client for every configured printer. A printer with an
    /// unsupported kind or broken configuration is skipped with a warning;
    /// the rest of the fleet loads normally. Returns how many printers are
    /// now managed.
    pub async fn load_and_instantiate(&self, configs: &[PrinterConfig]) -> usize {
        let mut registry = self.registry.write().await;
        for config in configs {
            if registry.contains_key(&config.id) {
                tracing::warn!(printer_id = %config.id, "printer already managed, skipping");
                continue;
            }
            match self.factory.create(config) {
                Ok(client) => {
                    let handle = PrinterHandle::new(
                        &config.id,
                        config.display_name(),
                        &config.address,
                        config.credential(),
                    );
                    tracing::info!(
                        printer_id = %config.id,
                        kind = %config.kind,
                        address = %config.address,
                        "printer registered"
                    );
                    registry.insert(
                        config.id.clone(),
                        ManagedPrinter {
                            handle,
                            client: Arc::new(Mutex::new(client)),
                            monitor: None,
                        },
                    );
                }
                Err(e) => {
                    tracing::warn!(printer_id = %config.id, error = %e, "skipping printer");
                }
            }
        }
        registry.len()
    }

    pub async fn printer_ids(&self) -> Vec<String> {
        self.registry.read().await.keys().cloned().collect()
    }

    /// Current handle snapshot for one printer.
    pub async fn printer_handle(&self, id: &str) -> Result<PrinterHandle, FleetError> {
        self.registry
            .read()
            .await
            .get(id)
            .map(|m| m.handle.clone())
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    pub async fn is_connected(&self, id: &str) -> Result<bool, FleetError> {
        Ok(self.printer_handle(id).await?.state.is_connected())
    }

    pub(crate) async fn client_for(&self, id: &str) -> Result<SharedClient, FleetError> {
        self.registry
            .read()
            .await
            .get(id)
            .map(|m| m.client.clone())
            .ok_or_else(|| FleetError::NotFound(id.to_string()))
    }

    async fn update_handle<F>(&self, id: &str, mutate: F)
    where
        F: FnOnce(&mut PrinterHandle),
    {
        if let Some(managed) = self.registry.write().await.get_mut(id) {
            mutate(&mut managed.handle);
        }
    }

    /// Connect one printer, cache its first status snapshot, and announce it.
    pub async fn connect_printer(&self, id: &str) -> Result<(), FleetError> {
        let client = self.client_for(id).await?;
        self.update_handle(id, |h| h.state = ConnectionState::Connecting)
            .await;

        let connect_result = client.lock().await.connect().await;
        if let Err(e) = connect_result {
            self.update_handle(id, |h| h.state = ConnectionState::Disconnected)
                .await;
            tracing::warn!(printer_id = id, error = %e, "connect failed");
            return Err(FleetError::connection(id, e));
        }

        match client.lock().await.get_status().await {
            Ok(snapshot) => {
                self.update_handle(id, |h| h.cache_snapshot(snapshot)).await;
            }
            Err(e) => {
                tracing::debug!(printer_id = id, error = %e, "no initial status snapshot");
            }
        }

        self.update_handle(id, |h| h.state = ConnectionState::Connected)
            .await;
        self.sink.publish(FleetEvent::printer_connected(id)).await;
        tracing::info!(printer_id = id, "printer connected");
        Ok(())
    }

    /// Idempotent connect followed by starting the background monitor.
    ///
    /// This runs unattended, so apart from an unknown id every failure is
    /// emitted as a progress event instead of propagated: observers see
    /// `connecting → connected → monitoring`, or a `failed`/`error` stage.
    pub async fn connect_and_monitor(&self, id: &str) -> Result<(), FleetError> {
        let already_connected = self.is_connected(id).await?;

        self.sink
            .publish(FleetEvent::connection_progress(
                id,
                ProgressStage::Connecting,
                None,
            ))
            .await;

        if !already_connected {
            if let Err(e) = self.connect_printer(id).await {
                self.sink
                    .publish(FleetEvent::connection_progress(
                        id,
                        ProgressStage::Failed,
                        Some(&e.to_string()),
                    ))
                    .await;
                return Ok(());
            }
        }

        self.sink
            .publish(FleetEvent::connection_progress(
                id,
                ProgressStage::Connected,
                None,
            ))
            .await;

        match self.start_monitor(id).await {
            Ok(()) => {
                self.sink
                    .publish(FleetEvent::connection_progress(
                        id,
                        ProgressStage::Monitoring,
                        None,
                    ))
                    .await;
            }
            Err(e) => {
                self.sink
                    .publish(FleetEvent::connection_progress(
                        id,
                        ProgressStage::Error,
                        Some(&e.to_string()),
                    ))
                    .await;
            }
        }
        Ok(())
    }

    /// Attach a monitor task to the printer if none is running.
    async fn start_monitor(&self, id: &str) -> Result<(), FleetError> {
        let mut registry = self.registry.write().await;
        let managed = registry
            .get_mut(id)
            .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
        if managed.monitor.as_ref().is_some_and(|t| !t.is_finished()) {
            return Ok(());
        }
        let task = tokio::spawn(monitor_loop(
            id.to_string(),
            managed.client.clone(),
            self.registry.clone(),
            self.sink.clone(),
            self.settings.clone(),
            self.shutdown_tx.subscribe(),
        ));
        managed.monitor = Some(task);
        Ok(())
    }

    /// Tear down one printer's session. Best-effort once the id resolves:
    /// the monitor is cancelled and the client released.
    pub async fn disconnect_printer(&self, id: &str) -> Result<(), FleetError> {
        let (client, monitor) = {
            let mut registry = self.registry.write().await;
            let managed = registry
                .get_mut(id)
                .ok_or_else(|| FleetError::NotFound(id.to_string()))?;
            managed.handle.state = ConnectionState::Disconnected;
            (managed.client.clone(), managed.monitor.take())
        };
        if let Some(task) = monitor {
            task.abort();
        }
        client.lock().await.disconnect().await;
        self.sink.publish(FleetEvent::printer_disconnected(id)).await;
        tracing::info!(printer_id = id, "printer disconnected");
        Ok(())
    }

    /// Remove a printer from the fleet entirely, destroying its handle.
    pub async fn remove_printer(&self, id: &str) -> Result<(), FleetError> {
        self.disconnect_printer(id).await?;
        self.registry.write().await.remove(id);
        tracing::info!(printer_id = id, "printer removed from fleet");
        Ok(())
    }

    /// Probe every managed printer and aggregate a fleet summary. Failures
    /// are recorded in the result, never raised.
    pub async fn health_check(&self) -> FleetHealth {
        let entries: Vec<(String, ConnectionState, Option<f64>, SharedClient)> = self
            .registry
            .read()
            .await
            .iter()
            .map(|(id, m)| {
                (
                    id.clone(),
                    m.handle.state,
                    m.handle.last_status_age(),
                    m.client.clone(),
                )
            })
            .collect();

        let probe_bound = Duration::from_secs(self.settings.probe_timeout_secs);
        let mut printers = HashMap::new();
        let mut connected_printers = 0;
        let mut healthy_printers = 0;

        for (id, state, last_status_age, client) in entries {
            let connected = state.is_connected();
            let mut healthy = false;
            if connected {
                connected_printers += 1;
                let probe = timeout(probe_bound, async {
                    let guard = client.lock().await;
                    let alive = guard.get_status().await.is_ok();
                    alive && !guard.is_degraded().await
                })
                .await;
                healthy = probe.unwrap_or(false);

                let new_state = if healthy {
                    ConnectionState::Healthy
                } else {
                    ConnectionState::Degraded
                };
                self.update_handle(&id, |h| {
                    if h.state.is_connected() {
                        h.state = new_state;
                    }
                })
                .await;
            }
            if healthy {
                healthy_printers += 1;
            }
            printers.insert(
                id,
                PrinterHealth {
                    connected,
                    healthy,
                    last_status_age,
                },
            );
        }

        FleetHealth {
            service_active: self.active.load(Ordering::Relaxed),
            total_printers: printers.len(),
            connected_printers,
            healthy_printers,
            printers,
        }
    }

    /// Disconnect the whole fleet. One failing device never blocks the
    /// shutdown of the rest.
    pub async fn shutdown(&self) {
        tracing::info!("shutting down printer fleet");
        self.active.store(false, Ordering::Relaxed);
        let _ = self.shutdown_tx.send(());
        for id in self.printer_ids().await {
            if let Err(e) = self.disconnect_printer(&id).await {
                tracing::warn!(printer_id = %id, error = %e, "disconnect during shutdown failed");
            }
        }
    }

    pub fn sink(&self) -> Arc<dyn NotificationSink> {
        self.sink.clone()
    }

    pub fn settings(&self) -> &ServiceConfig {
        &self.settings
    }
}

/// Per-printer monitor: polls status on an interval, keeps the cached
/// snapshot fresh, demotes the session on repeated failures, and tears it
/// down when the device stays gone. Cancelled through the shutdown channel
/// or by aborting the task on disconnect.
async fn monitor_loop(
    id: String,
    client: SharedClient,
    registry: Registry,
    sink: Arc<dyn NotificationSink>,
    settings: ServiceConfig,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut failures: u32 = 0;
    let mut interval = tokio::time::interval(Duration::from_secs(settings.status_poll_secs));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => {
                tracing::debug!(printer_id = %id, "monitor loop shutting down");
                break;
            }
            _ = interval.tick() => {
                let outcome = match timeout(
                    Duration::from_secs(settings.probe_timeout_secs),
                    async {
                        let guard = client.lock().await;
                        let status = guard.get_status().await;
                        let degraded = guard.is_degraded().await;
                        (status, degraded)
                    },
                )
                .await
                {
                    Err(_) => Err(ConnectionError::Timeout("status probe".into())),
                    Ok((Err(e), _)) => Err(e),
                    Ok((Ok(snapshot), degraded)) => Ok((snapshot, degraded)),
                };

                match outcome {
                    Ok((snapshot, degraded)) => {
                        failures = 0;
                        let mut registry = registry.write().await;
                        match registry.get_mut(&id) {
                            Some(managed) => {
                                managed.handle.cache_snapshot(snapshot);
                                if managed.handle.state.is_connected() {
                                    managed.handle.state = if degraded {
                                        ConnectionState::Degraded
                                    } else {
                                        ConnectionState::Healthy
                                    };
                                }
                            }
                            // Removed from the fleet while we were polling.
                            None => break,
                        }
                    }
                    Err(e) => {
                        failures += 1;
                        tracing::warn!(printer_id = %id, error = %e, failures, "status probe failed");
                        let fatal = !e.is_retryable()
                            || failures >= settings.disconnect_after_failures;
                        if fatal {
                            client.lock().await.disconnect().await;
                            if let Some(managed) = registry.write().await.get_mut(&id) {
                                managed.handle.state = ConnectionState::Disconnected;
                            }
                            sink.publish(FleetEvent::printer_disconnected(&id)).await;
                            tracing::warn!(printer_id = %id, "session torn down after repeated probe failures");
                            break;
                        }
                        if failures >= settings.degrade_after_failures {
                            if let Some(managed) = registry.write().await.get_mut(&id) {
                                if managed.handle.state.is_connected() {
                                    managed.handle.state = ConnectionState::Degraded;
                                }
                            }
                        }
                    }
                }
            }
        }
    }
}
