//! The single execution worker.
//!
//! One long-lived task owns the queue → lock → adapter pipeline: dequeue,
//! acquire the lock, mutate, verify, record, release, repeat. All cluster
//! mutation in the process funnels through this loop, so the lock scope is
//! the only critical section and it is released on every path out of it.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::{CommandResult, ExecutionRegistry, FifoLock, MutexStatus, ScheduledCommand, WorkerStatus};
use crate::chat::{CommandAction, CommandKind};
use crate::cluster::{ClusterAdapter, ClusterError, DeploymentStatus};
use crate::config::{SCALE_VERIFY_GRACE, SHUTDOWN_DEADLINE, WORKER_POLL_INTERVAL};
use crate::exec::CommandQueue;

/// Failure of a single command execution.
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error(transparent)]
    Cluster(#[from] ClusterError),

    #[error("verification failed: requested {expected} replicas, observed {observed}")]
    Verification { expected: i64, observed: i32 },
}

/// Lifecycle owner of the execution pipeline.
pub struct Worker {
    queue: Arc<CommandQueue>,
    lock: Arc<FifoLock>,
    registry: Arc<ExecutionRegistry>,
    cluster: Arc<dyn ClusterAdapter>,
    running: AtomicBool,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    #[must_use]
    pub fn new(
        queue: Arc<CommandQueue>,
        lock: Arc<FifoLock>,
        registry: Arc<ExecutionRegistry>,
        cluster: Arc<dyn ClusterAdapter>,
    ) -> Self {
        Self {
            queue,
            lock,
            registry,
            cluster,
            running: AtomicBool::new(false),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the run loop. Idempotent: a live loop is never duplicated.
    pub fn start(self: &Arc<Self>) {
        let mut handle = self.handle.lock().unwrap_or_else(PoisonError::into_inner);
        if handle.as_ref().is_some_and(|h| !h.is_finished()) {
            debug!("Worker already running; start ignored");
            return;
        }
        self.running.store(true, Ordering::SeqCst);
        let worker = Arc::clone(self);
        *handle = Some(tokio::spawn(worker.run_loop()));
    }

    /// Signal the loop to exit after any in-flight command. Idempotent.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    /// Stop intake and wait up to the shutdown deadline for the in-flight
    /// command. Returns even if the command is still running; it is left
    /// to complete, but nothing new begins.
    pub async fn graceful_shutdown(&self) {
        info!(phase = "system", "Graceful shutdown: command intake stopped");
        self.stop();

        let drained = tokio::time::timeout(SHUTDOWN_DEADLINE, self.wait_for_idle())
            .await
            .is_ok();
        if drained {
            info!(phase = "system", "Worker drained; shutdown boundary reached");
        } else {
            warn!(
                phase = "system",
                "Shutdown deadline reached with a command still in flight"
            );
        }
    }

    async fn wait_for_idle(&self) {
        loop {
            if self.registry.snapshot().worker_status == WorkerStatus::Idle {
                return;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
    }

    async fn run_loop(self: Arc<Self>) {
        info!("Worker loop started");
        while self.running.load(Ordering::SeqCst) {
            match self.queue.dequeue() {
                Some(command) => self.execute(command).await,
                None => tokio::time::sleep(WORKER_POLL_INTERVAL).await,
            }
        }
        info!(phase = "system", "Worker loop exited");
    }

    async fn execute(&self, command: ScheduledCommand) {
        // The gate only enqueues EXECUTE commands; anything else here is a
        // contract violation and must not reach the mutation path.
        let CommandKind::Execute(action) = &command.parsed.kind else {
            warn!(
                command_id = %command.command_id,
                kind = command.parsed.kind.name(),
                "Non-executable command reached the worker; dropped"
            );
            return;
        };
        let action = *action;

        info!(
            execution_id = %command.execution_id,
            command_id = %command.command_id,
            user_id = %command.user_id,
            phase = "executing",
            action = action.name(),
            "Executing command"
        );

        self.registry.set_worker_status(WorkerStatus::Executing);
        self.registry.set_current_command(Some(command.sanitized()));
        let result = CommandResult::running(&command);
        self.registry.record_result(result.clone());

        self.lock.acquire().await;
        self.registry.set_mutex_status(MutexStatus::Locked);

        // Critical section. `dispatch` returns on success, failure, and
        // timeout alike; the release below runs on every one of those
        // paths, so a failing adapter can never leak the lock.
        let outcome = self.dispatch(action, &command.execution_id).await;

        match outcome {
            Ok(after) => {
                info!(
                    execution_id = %command.execution_id,
                    command_id = %command.command_id,
                    phase = "completed",
                    "Command completed"
                );
                self.registry.record_result(result.succeeded(after));
            }
            Err(err) => {
                error!(
                    execution_id = %command.execution_id,
                    command_id = %command.command_id,
                    phase = "failed",
                    error = %err,
                    "Command failed"
                );
                self.registry.record_result(result.failed(err.to_string()));
            }
        }

        self.lock.release();
        self.registry.set_mutex_status(MutexStatus::Free);
        self.registry.set_worker_status(WorkerStatus::Idle);
        self.registry.set_current_command(None);
    }

    async fn dispatch(
        &self,
        action: CommandAction,
        execution_id: &str,
    ) -> Result<Option<DeploymentStatus>, ExecutionError> {
        match action {
            CommandAction::Scale { replicas } => {
                self.cluster.scale(replicas, execution_id).await?;

                // Let the API server settle before reading back.
                tokio::time::sleep(SCALE_VERIFY_GRACE).await;
                let status = self.cluster.status(execution_id).await?;
                if i64::from(status.replicas) != replicas {
                    return Err(ExecutionError::Verification {
                        expected: replicas,
                        observed: status.replicas,
                    });
                }
                Ok(Some(status))
            }
            CommandAction::Restart => {
                self.cluster.restart(execution_id).await?;
                // Connectivity confirmation only; the rollout proceeds at
                // the cluster's pace and no field is asserted.
                let status = self.cluster.status(execution_id).await?;
                Ok(Some(status))
            }
        }
    }
}

static PROCESS_WORKER_STARTED: Mutex<bool> = Mutex::new(false);

/// Start the process-wide worker exactly once.
///
/// Guarded by a process-global flag rather than module initialization so a
/// re-entrant bootstrap (supervisor restart, test harness re-import) can
/// never spawn a second pipeline. Returns whether this call started it.
pub fn start_process_worker(worker: &Arc<Worker>) -> bool {
    let mut started = PROCESS_WORKER_STARTED
        .lock()
        .unwrap_or_else(PoisonError::into_inner);
    if *started {
        warn!("Worker already started for this process; duplicate bootstrap ignored");
        return false;
    }
    *started = true;
    worker.start();
    true
}
