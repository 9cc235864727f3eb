//! Process-wide execution state registry.
//!
//! Single writable snapshot of the pipeline: worker and mutex status,
//! queue length, the sanitized in-flight command, and the last outcome.
//! Setters are fire-and-forget; readers get a deep copy and tolerate
//! staleness across fields. This registry is the sole source of truth for
//! the status and health endpoints and holds no secrets.

use std::sync::{PoisonError, RwLock};
use std::time::Instant;

use serde::Serialize;
use tracing::debug;

use super::{CommandResult, CommandStatus, SanitizedCommand};

/// Worker activity as observed from outside.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerStatus {
    Idle,
    Executing,
}

/// Observed mutex state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MutexStatus {
    Free,
    Locked,
}

#[derive(Clone)]
struct RegistryState {
    worker_status: WorkerStatus,
    mutex_status: MutexStatus,
    queue_length: usize,
    current_command: Option<SanitizedCommand>,
    last_result: Option<CommandResult>,
    last_error: Option<String>,
}

impl Default for RegistryState {
    fn default() -> Self {
        Self {
            worker_status: WorkerStatus::Idle,
            mutex_status: MutexStatus::Free,
            queue_length: 0,
            current_command: None,
            last_result: None,
            last_error: None,
        }
    }
}

/// Deep-copied view handed to readers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistrySnapshot {
    pub worker_status: WorkerStatus,
    pub mutex_status: MutexStatus,
    pub queue_length: usize,
    pub current_command: Option<SanitizedCommand>,
    pub last_result: Option<CommandResult>,
    pub last_error: Option<String>,
    pub uptime_ms: u64,
}

/// Process-singleton observability snapshot.
pub struct ExecutionRegistry {
    started_at: Instant,
    state: RwLock<RegistryState>,
}

impl Default for ExecutionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            started_at: Instant::now(),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn set_worker_status(&self, status: WorkerStatus) {
        self.write().worker_status = status;
    }

    pub fn set_mutex_status(&self, status: MutexStatus) {
        self.write().mutex_status = status;
    }

    pub fn set_queue_length(&self, length: usize) {
        self.write().queue_length = length;
    }

    pub fn set_current_command(&self, command: Option<SanitizedCommand>) {
        self.write().current_command = command;
    }

    /// Record a command result. Terminal failures also update the last
    /// error field.
    pub fn record_result(&self, result: CommandResult) {
        debug!(
            command_id = %result.command_id,
            status = ?result.status,
            "Recording command result"
        );
        let mut state = self.write();
        if result.status == CommandStatus::Failed {
            state.last_error = result.error.clone();
        }
        state.last_result = Some(result);
    }

    /// Deep-copied view of the current state.
    #[must_use]
    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self
            .state
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        RegistrySnapshot {
            worker_status: state.worker_status,
            mutex_status: state.mutex_status,
            queue_length: state.queue_length,
            current_command: state.current_command,
            last_result: state.last_result,
            last_error: state.last_error,
            uptime_ms: u64::try_from(self.started_at.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }

    /// Drop recorded results and errors. Test support; production state
    /// lives for the process lifetime.
    pub fn reset(&self) {
        *self.write() = RegistryState::default();
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }
}
