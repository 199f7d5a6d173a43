// src/dispatch.rs - Operator command dispatch over the supervisor registry
use std::sync::Arc;

use crate::error::FleetError;
use crate::events::{FleetEvent, NotificationSink};
use crate::status::CommandResult;
use crate::supervisor::ConnectionSupervisor;

/// The operator commands this core can route to any printer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PrintCommand {
    Pause,
    Resume,
    Stop,
}

impl PrintCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            PrintCommand::Pause => "pause",
            PrintCommand::Resume => "resume",
            PrintCommand::Stop => "stop",
        }
    }

    fn success_event(self, printer_id: &str) -> FleetEvent {
        match self {
            PrintCommand::Pause => FleetEvent::print_paused(printer_id),
            PrintCommand::Resume => FleetEvent::print_resumed(printer_id),
            PrintCommand::Stop => FleetEvent::print_stopped(printer_id),
        }
    }
}

/// Routes pause/resume/stop to the right client, making sure a session
/// exists first. Commands "just work" from the operator's point of view:
/// a dropped session gets exactly one transparent reconnect attempt before
/// the command is given up on.
pub struct CommandDispatcher {
    supervisor: Arc<ConnectionSupervisor>,
    sink: Arc<dyn NotificationSink>,
}

impl CommandDispatcher {
    pub fn new(supervisor: Arc<ConnectionSupervisor>) -> Self {
        let sink = supervisor.sink();
        Self { supervisor, sink }
    }

    pub async fn pause_printer(&self, id: &str) -> Result<bool, FleetError> {
        self.dispatch(id, PrintCommand::Pause).await
    }

    pub async fn resume_printer(&self, id: &str) -> Result<bool, FleetError> {
        self.dispatch(id, PrintCommand::Resume).await
    }

    pub async fn stop_printer(&self, id: &str) -> Result<bool, FleetError> {
        self.dispatch(id, PrintCommand::Stop).await
    }

    /// Same as [`dispatch`](Self::dispatch), shaped for callers that want a
    /// value to render instead of a bool.
    pub async fn execute(&self, id: &str, command: PrintCommand) -> Result<CommandResult, FleetError> {
        match self.dispatch(id, command).await? {
            true => Ok(CommandResult::Accepted),
            false => Ok(CommandResult::Rejected(
                "device refused the command in its current state".to_string(),
            )),
        }
    }

    pub async fn dispatch(&self, id: &str, command: PrintCommand) -> Result<bool, FleetError> {
        // Resolving the handle surfaces NotFound before anything is tried.
        let handle = self.supervisor.printer_handle(id).await?;

        if !handle.state.is_connected() {
            tracing::info!(
                printer_id = id,
                command = command.as_str(),
                "printer not connected, reconnecting before command"
            );
            self.supervisor.connect_printer(id).await?;
        }

        let client = self.supervisor.client_for(id).await?;
        let result = {
            let guard = client.lock().await;
            match command {
                PrintCommand::Pause => guard.pause_print().await,
                PrintCommand::Resume => guard.resume_print().await,
                PrintCommand::Stop => guard.stop_print().await,
            }
        };

        match result {
            Ok(true) => {
                self.sink.publish(command.success_event(id)).await;
                tracing::info!(printer_id = id, command = command.as_str(), "command acknowledged");
                Ok(true)
            }
            Ok(false) => {
                tracing::info!(
                    printer_id = id,
                    command = command.as_str(),
                    "command rejected by device"
                );
                Ok(false)
            }
            Err(e) => {
                tracing::warn!(
                    printer_id = id,
                    command = command.as_str(),
                    error = %e,
                    "command failed"
                );
                Err(FleetError::connection(id, e))
            }
        }
    }
}
