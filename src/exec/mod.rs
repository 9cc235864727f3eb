//! Execution domain: scheduled commands, results, and the pipeline
//! components that move them (queue, lock, worker, state registry).

pub mod fifo_lock;
pub mod queue;
pub mod registry;
pub mod worker;

pub use fifo_lock::FifoLock;
pub use queue::CommandQueue;
pub use registry::{ExecutionRegistry, MutexStatus, WorkerStatus};
pub use worker::Worker;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::chat::{CommandKind, ParsedCommand};
use crate::cluster::DeploymentStatus;
use crate::policy::Priority;

/// An EXECUTE command accepted by the gate and awaiting (or undergoing)
/// execution.
#[derive(Debug, Clone)]
pub struct ScheduledCommand {
    pub command_id: String,
    pub execution_id: String,
    pub user_id: String,
    pub priority: Priority,
    pub queued_at: DateTime<Utc>,
    pub parsed: ParsedCommand,
}

impl ScheduledCommand {
    /// Mint a scheduled command with fresh ids.
    #[must_use]
    pub fn new(user_id: String, priority: Priority, parsed: ParsedCommand) -> Self {
        Self {
            command_id: format!("cmd-{}", Uuid::new_v4().simple()),
            execution_id: format!("exec-{}", Uuid::new_v4().simple()),
            user_id,
            priority,
            queued_at: Utc::now(),
            parsed,
        }
    }

    /// Public view of the command. Carries only the action shape, never
    /// raw user text or identity.
    #[must_use]
    pub fn sanitized(&self) -> SanitizedCommand {
        match &self.parsed.kind {
            CommandKind::Execute(action) => SanitizedCommand {
                action: action.name().to_string(),
                requested_replicas: action.requested_replicas(),
            },
            other => SanitizedCommand {
                action: other.name().to_lowercase(),
                requested_replicas: None,
            },
        }
    }
}

/// Sanitized command view exposed through the state registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SanitizedCommand {
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_replicas: Option<i64>,
}

/// Lifecycle state of a command's execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CommandStatus {
    Pending,
    Running,
    Success,
    Failed,
}

/// Outcome record for a dequeued command. Created at dequeue, finalized
/// exactly once, retained in memory until process restart.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CommandResult {
    pub command_id: String,
    pub execution_id: String,
    pub status: CommandStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// Post-execution deployment snapshot, when one was taken.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<DeploymentStatus>,
}

impl CommandResult {
    /// Fresh RUNNING record for a just-dequeued command.
    #[must_use]
    pub fn running(command: &ScheduledCommand) -> Self {
        Self {
            command_id: command.command_id.clone(),
            execution_id: command.execution_id.clone(),
            status: CommandStatus::Running,
            error: None,
            completed_at: None,
            after: None,
        }
    }

    /// Finalize as SUCCESS.
    #[must_use]
    pub fn succeeded(mut self, after: Option<DeploymentStatus>) -> Self {
        self.status = CommandStatus::Success;
        self.completed_at = Some(Utc::now());
        self.after = after;
        self
    }

    /// Finalize as FAILED with the error's message.
    #[must_use]
    pub fn failed(mut self, error: impl Into<String>) -> Self {
        self.status = CommandStatus::Failed;
        self.error = Some(error.into());
        self.completed_at = Some(Utc::now());
        self
    }
}
