//! Task lifecycle.
//!
//! A task is one unit of delegated work: a skill invocation with an input,
//! tracked through a small state machine until it reaches a terminal state.
//!
//! ```text
//! Submitted ──► Working ──► Completed
//!     │           │  ▲  └──► Failed
//!     │           ▼  │
//!     │      InputRequired
//!     └──► Failed / Canceled (from any non-terminal state)
//! ```
//!
//! Tasks live in memory only. Terminal tasks are swept after a TTL, and the
//! oldest terminal tasks are evicted first once the store exceeds its capacity.

use crate::bus::EventBus;
use crate::capability::CapabilityRegistry;
use crate::events::{Event, Payload, SessionId, topics};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::sync::{Arc, Weak};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};
use utoipa::ToSchema;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "kebab-case")]
pub enum TaskState {
    Submitted,
    Working,
    InputRequired,
    Completed,
    Failed,
    Canceled,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Canceled)
    }

    pub fn can_transition_to(self, next: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, next),
            (Submitted, Working | Failed | Canceled)
                | (Working, Completed | Failed | Canceled | InputRequired)
                | (InputRequired, Working | Failed | Canceled)
        )
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Submitted => "submitted",
            Self::Working => "working",
            Self::InputRequired => "input-required",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Canceled => "canceled",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub state: TaskState,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Task {
    pub id: Uuid,
    pub session_id: SessionId,
    pub skill_id: String,
    #[schema(value_type = Object)]
    pub input: Value,
    pub state: TaskState,
    /// Present only once the task is completed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[schema(value_type = Option<Object>)]
    pub output: Option<Value>,
    /// Present only once the task has failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    fn new(skill_id: String, input: Value, session_id: SessionId) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            session_id,
            skill_id,
            input,
            state: TaskState::Submitted,
            output: None,
            error: None,
            history: vec![HistoryEntry {
                state: TaskState::Submitted,
                timestamp: now,
                message: None,
            }],
            created_at: now,
            updated_at: now,
        }
    }

    /// Moves the task to `next`, appending to its history.
    ///
    /// Timestamps never go backwards even if the wall clock does.
    pub fn transition(&mut self, next: TaskState, message: Option<String>) -> Result<(), TaskError> {
        if !self.state.can_transition_to(next) {
            return Err(TaskError::IllegalTransition {
                id: self.id,
                from: self.state,
                to: next,
            });
        }
        let timestamp = Utc::now().max(self.updated_at);
        self.state = next;
        self.updated_at = timestamp;
        self.history.push(HistoryEntry {
            state: next,
            timestamp,
            message,
        });
        Ok(())
    }

    fn complete(&mut self, output: Value) -> Result<(), TaskError> {
        self.transition(TaskState::Completed, None)?;
        self.output = Some(output);
        Ok(())
    }

    fn fail(&mut self, error: String) -> Result<(), TaskError> {
        self.transition(TaskState::Failed, Some(error.clone()))?;
        self.error = Some(error);
        Ok(())
    }
}

#[derive(Debug, Error, PartialEq)]
pub enum TaskError {
    #[error("task not found: {0}")]
    NotFound(Uuid),
    #[error("illegal transition for task {id}: {from} -> {to}")]
    IllegalTransition { id: Uuid, from: TaskState, to: TaskState },
}

#[derive(Debug, Clone, PartialEq)]
pub struct TaskManagerConfig {
    /// How long a terminal task is kept before it is swept.
    pub ttl: Duration,
    /// Soft upper bound on stored tasks; only terminal tasks are evicted.
    pub capacity: usize,
    pub sweep_interval: Duration,
    /// Deadline for a single handler invocation. `None` waits indefinitely.
    pub skill_timeout: Option<Duration>,
}

impl Default for TaskManagerConfig {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(3600),
            capacity: 1024,
            sweep_interval: Duration::from_secs(60),
            skill_timeout: None,
        }
    }
}

/// Creates, dispatches and tracks tasks.
pub struct TaskManager {
    tasks: DashMap<Uuid, Task>,
    registry: Arc<CapabilityRegistry>,
    bus: Arc<EventBus>,
    config: TaskManagerConfig,
}

impl fmt::Debug for TaskManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaskManager")
            .field("tasks", &self.tasks.len())
            .field("config", &self.config)
            .finish()
    }
}

impl TaskManager {
    pub fn new(config: TaskManagerConfig, registry: Arc<CapabilityRegistry>, bus: Arc<EventBus>) -> Self {
        Self {
            tasks: DashMap::new(),
            registry,
            bus,
            config,
        }
    }

    pub fn config(&self) -> &TaskManagerConfig {
        &self.config
    }

    /// Stores a new task in `Submitted`.
    pub fn create_task(&self, skill_id: impl Into<String>, input: Value, session_id: SessionId) -> Task {
        let task = Task::new(skill_id.into(), input, session_id);
        debug!(task_id = %task.id, skill = %task.skill_id, "Task created");
        self.tasks.insert(task.id, task.clone());
        self.publish(&task);
        if self.tasks.len() > self.config.capacity {
            self.sweep();
        }
        task
    }

    /// Runs the task's skill handler and records the outcome.
    ///
    /// A task whose skill has no handler fails immediately without entering
    /// `Working`. If the task is canceled while its handler runs, the handler's
    /// result is discarded and the canceled task is returned.
    #[instrument(name = "dispatch", skip(self), fields(skill = tracing::field::Empty))]
    pub async fn dispatch(&self, task_id: Uuid) -> Result<Task, TaskError> {
        let task = self.get_task(task_id)?;
        tracing::Span::current().record("skill", task.skill_id.as_str());

        let Some(handler) = self.registry.handler(&task.skill_id) else {
            let message = format!("no handler for skill: {}", task.skill_id);
            warn!(%message, "Dispatch failed");
            return self.update(task_id, |task| task.fail(message));
        };

        let working = self.update(task_id, |task| task.transition(TaskState::Working, None))?;

        let call = handler.handle(working.input.clone(), &working.session_id, &working);
        let outcome = match self.config.skill_timeout {
            Some(limit) => match tokio::time::timeout(limit, call).await {
                Ok(result) => result.map_err(|e| e.to_string()),
                Err(_) => Err(format!("skill timed out after {}ms", limit.as_millis())),
            },
            None => call.await.map_err(|e| e.to_string()),
        };

        let recorded = match outcome {
            Ok(output) => self.update(task_id, |task| task.complete(output)),
            Err(message) => {
                info!(%message, "Skill handler failed");
                self.update(task_id, |task| task.fail(message))
            }
        };
        match recorded {
            Err(TaskError::IllegalTransition { from, .. }) => {
                debug!(state = %from, "Discarding handler result for finished task");
                self.get_task(task_id)
            }
            other => other,
        }
    }

    /// `create_task` followed by `dispatch`.
    pub async fn send(&self, skill_id: impl Into<String>, input: Value, session_id: SessionId) -> Task {
        let task = self.create_task(skill_id, input, session_id);
        let id = task.id;
        // Only fails if the task was evicted between create and dispatch.
        self.dispatch(id).await.unwrap_or(task)
    }

    /// Moves a non-terminal task to `Canceled`.
    pub fn cancel(&self, task_id: Uuid) -> Result<Task, TaskError> {
        self.update(task_id, |task| {
            task.transition(TaskState::Canceled, Some("canceled by request".to_string()))
        })
    }

    /// Requests more input from the user while a handler is working.
    pub fn request_input(&self, task_id: Uuid, prompt: impl Into<String>) -> Result<Task, TaskError> {
        let prompt = prompt.into();
        self.update(task_id, |task| task.transition(TaskState::InputRequired, Some(prompt)))
    }

    /// Resumes an `InputRequired` task.
    pub fn resume(&self, task_id: Uuid) -> Result<Task, TaskError> {
        self.update(task_id, |task| task.transition(TaskState::Working, None))
    }

    pub fn get_task(&self, task_id: Uuid) -> Result<Task, TaskError> {
        self.tasks
            .get(&task_id)
            .map(|task| task.clone())
            .ok_or(TaskError::NotFound(task_id))
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Evicts expired terminal tasks, then the oldest tasks while the store is
    /// over capacity. Terminal tasks go first; live tasks are only evicted
    /// once no terminal task is left. Returns how many were removed.
    pub fn sweep(&self) -> usize {
        let cutoff = chrono::Duration::from_std(self.config.ttl)
            .ok()
            .and_then(|ttl| Utc::now().checked_sub_signed(ttl));
        let before = self.tasks.len();
        self.tasks.retain(|_, task| {
            !(task.state.is_terminal() && cutoff.is_some_and(|cutoff| task.updated_at < cutoff))
        });

        let excess = self.tasks.len().saturating_sub(self.config.capacity.max(1));
        if excess > 0 {
            // (live, updated_at, id): terminal tasks order before live ones.
            let mut candidates: Vec<(bool, DateTime<Utc>, Uuid)> = self
                .tasks
                .iter()
                .map(|task| (!task.state.is_terminal(), task.updated_at, task.id))
                .collect();
            candidates.select_nth_unstable(excess - 1);
            let evicted = &candidates[..excess];
            let live = evicted.iter().filter(|(live, _, _)| *live).count();
            if live > 0 {
                warn!(live, capacity = self.config.capacity, "Task store full; evicting unfinished tasks");
            }
            for (_, _, id) in evicted {
                self.tasks.remove(id);
            }
        }

        let removed = before.saturating_sub(self.tasks.len());
        if removed > 0 {
            debug!(removed, remaining = self.tasks.len(), "Swept tasks");
        }
        removed
    }

    /// Sweeps every `sweep_interval` until the manager is dropped.
    pub fn spawn_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let weak: Weak<Self> = Arc::downgrade(self);
        let period = self.config.sweep_interval;
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let Some(manager) = weak.upgrade() else {
                    break;
                };
                manager.sweep();
            }
        })
    }

    fn update<F>(&self, task_id: Uuid, apply: F) -> Result<Task, TaskError>
    where
        F: FnOnce(&mut Task) -> Result<(), TaskError>,
    {
        let snapshot = {
            let mut entry = self.tasks.get_mut(&task_id).ok_or(TaskError::NotFound(task_id))?;
            if let Err(e) = apply(&mut entry) {
                warn!(task_id = %task_id, error = %e, "Rejected task transition");
                return Err(e);
            }
            entry.clone()
        };
        self.publish(&snapshot);
        Ok(snapshot)
    }

    fn publish(&self, task: &Task) {
        self.bus.publish(
            topics::TASK_UPDATED,
            Event::new(task.session_id.clone(), Payload::TaskUpdated(Box::new(task.clone()))),
        );
    }
}
