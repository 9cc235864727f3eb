//! Priority queue feeding the worker.
//!
//! Total order over `(priority, arrival)`: a smaller priority class always
//! leaves first, and commands within a class leave in arrival order.
//! Arrival is a process-wide monotonic sequence rather than wall-clock so
//! ties can never invert under clock adjustment. Every mutation publishes
//! the new length to the execution state registry.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, PoisonError};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::debug;

use super::{ExecutionRegistry, ScheduledCommand};
use crate::policy::Priority;

#[derive(Default)]
struct QueueState {
    entries: BTreeMap<(Priority, u64), ScheduledCommand>,
    next_seq: u64,
}

/// Ordered multiset of scheduled commands, safe for concurrent access.
pub struct CommandQueue {
    state: Mutex<QueueState>,
    registry: Arc<ExecutionRegistry>,
}

/// Sanitized view of one queued command, for status responses.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedCommandView {
    pub command_id: String,
    pub action: String,
    pub priority: u8,
    pub priority_label: &'static str,
    pub queued_at: DateTime<Utc>,
}

impl CommandQueue {
    #[must_use]
    pub fn new(registry: Arc<ExecutionRegistry>) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            registry,
        }
    }

    /// Insert a command, preserving order. Returns its one-based position
    /// in the queue at the time of enqueue.
    pub fn enqueue(&self, command: ScheduledCommand) -> usize {
        let (position, length) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let key = (command.priority, state.next_seq);
            state.next_seq += 1;

            debug!(
                command_id = %command.command_id,
                priority = command.priority.class(),
                "Command enqueued"
            );
            state.entries.insert(key, command);

            let position = state.entries.range(..key).count() + 1;
            (position, state.entries.len())
        };
        self.registry.set_queue_length(length);
        position
    }

    /// Remove and return the highest-priority, earliest-arrival command.
    pub fn dequeue(&self) -> Option<ScheduledCommand> {
        let (command, length) = {
            let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
            let command = state.entries.pop_first().map(|(_, cmd)| cmd);
            (command, state.entries.len())
        };
        if command.is_some() {
            self.registry.set_queue_length(length);
        }
        command
    }

    /// Number of commands currently queued.
    #[must_use]
    pub fn size(&self) -> usize {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }

    /// Sanitized listing in dequeue order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<QueuedCommandView> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .values()
            .map(|command| {
                let sanitized = command.sanitized();
                QueuedCommandView {
                    command_id: command.command_id.clone(),
                    action: sanitized.action,
                    priority: command.priority.class(),
                    priority_label: command.priority.label(),
                    queued_at: command.queued_at,
                }
            })
            .collect()
    }
}
