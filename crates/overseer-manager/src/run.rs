//! Task runs: instantiations of a task config with a concrete input.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::Serialize;

use overseer_core::{AgentId, TaskRunId};

use crate::config::TaskConfig;
use crate::history::HistoryEntry;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TaskRunStatus {
    Created,
    Scheduled,
    Executing,
    Waiting,
    Completed,
    Failed,
    Stopped,
}

impl TaskRunStatus {
    /// Completed, failed and stopped runs take no further transitions
    /// except explicit destroy.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Stopped)
    }
}

/// Live run state. `occupied_by` is set iff status is EXECUTING and a
/// worker holds the run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRun {
    pub id: TaskRunId,
    pub status: TaskRunStatus,
    pub input: String,
    /// Config snapshot taken at creation; later config versions do not
    /// retroactively change a run.
    pub config: TaskConfig,
    /// The acting agent that created the run; used for system-initiated
    /// scheduling on its behalf.
    pub owner: String,
    pub occupied_by: Option<AgentId>,
    pub occupied_since: Option<DateTime<Utc>>,
    pub current_retry_attempt: u32,
    pub error_count: u32,
    pub completed_runs: u32,
    pub last_run_at: Option<DateTime<Utc>>,
    pub next_run_at: Option<DateTime<Utc>>,
    pub history: VecDeque<HistoryEntry>,
    /// Bumped on every occupancy grant so a stale timeout one-shot cannot
    /// release a newer occupancy.
    #[serde(skip)]
    pub occupancy_epoch: u64,
}

impl TaskRun {
    pub fn new(id: TaskRunId, config: TaskConfig, input: String, owner: String) -> Self {
        Self {
            id,
            status: TaskRunStatus::Created,
            input,
            config,
            owner,
            occupied_by: None,
            occupied_since: None,
            current_retry_attempt: 0,
            error_count: 0,
            completed_runs: 0,
            last_run_at: None,
            next_run_at: None,
            history: VecDeque::new(),
            occupancy_epoch: 0,
        }
    }

    pub fn is_occupied(&self) -> bool {
        self.occupied_by.is_some()
    }

    /// True once `completed_runs` has hit the configured bound.
    pub fn repeats_exhausted(&self) -> bool {
        self.config
            .max_repeats
            .is_some_and(|max| self.completed_runs >= max)
    }

    /// Compact view for event payloads; history travels separately.
    pub fn summary(&self) -> serde_json::Value {
        serde_json::json!({
            "taskRunId": self.id,
            "status": self.status,
            "occupiedBy": self.occupied_by,
            "currentRetryAttempt": self.current_retry_attempt,
            "errorCount": self.error_count,
            "completedRuns": self.completed_runs,
            "lastRunAt": self.last_run_at,
            "nextRunAt": self.next_run_at,
        })
    }
}
