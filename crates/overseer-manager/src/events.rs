//! Task state events, plus the assignment events shared into the agent
//! stream so monitors can correlate runs with the workers executing them.

use std::sync::Arc;

use serde_json::json;

use overseer_core::{AgentId, AgentKind, TaskConfigId, TaskRunId};
use overseer_workspace::EventLog;

use crate::config::TaskConfig;
use crate::history::HistoryEntry;
use crate::manager::TaskPoolStats;
use crate::run::TaskRun;

#[derive(Clone)]
pub struct TaskEvents {
    task_log: Arc<EventLog>,
    agent_log: Arc<EventLog>,
}

impl TaskEvents {
    pub fn new(task_log: Arc<EventLog>, agent_log: Arc<EventLog>) -> Self {
        Self {
            task_log,
            agent_log,
        }
    }

    pub fn agent_type_register(&self, kind: AgentKind, type_name: &str) {
        self.task_log.emit(
            "agent_type_register",
            json!({ "agentKind": kind, "agentType": type_name }),
        );
    }

    pub fn task_config_create(&self, config: &TaskConfig) {
        self.task_log.emit(
            "task_config_create",
            json!({ "configId": config.id(), "config": config }),
        );
    }

    pub fn task_config_update(&self, config: &TaskConfig) {
        self.task_log.emit(
            "task_config_update",
            json!({ "configId": config.id(), "config": config }),
        );
    }

    pub fn task_config_destroy(&self, config_id: &TaskConfigId) {
        self.task_log
            .emit("task_config_destroy", json!({ "configId": config_id }));
    }

    pub fn task_run_create(&self, run: &TaskRun) {
        self.task_log.emit(
            "task_run_create",
            json!({ "taskRunId": run.id, "input": run.input, "run": run.summary() }),
        );
    }

    pub fn task_run_update(&self, run: &TaskRun) {
        self.task_log.emit("task_run_update", run.summary());
    }

    pub fn task_run_destroy(&self, run_id: &TaskRunId) {
        self.task_log
            .emit("task_run_destroy", json!({ "taskRunId": run_id }));
    }

    pub fn history_entry_create(&self, run_id: &TaskRunId, entry: &HistoryEntry) {
        self.task_log.emit(
            "history_entry_create",
            json!({ "taskRunId": run_id, "entry": entry }),
        );
    }

    pub fn pool_change(&self, stats: &TaskPoolStats) {
        self.task_log.emit("pool_change", json!(stats));
    }

    // -- shared into the agent stream ---------------------------------------

    pub fn assignment_assign(&self, run_id: &TaskRunId, agent_id: &AgentId) {
        self.agent_log.emit(
            "assignment_assign",
            json!({ "taskRunId": run_id, "agentId": agent_id }),
        );
    }

    pub fn assignment_unassign(&self, run_id: &TaskRunId, agent_id: &AgentId) {
        self.agent_log.emit(
            "assignment_unassign",
            json!({ "taskRunId": run_id, "agentId": agent_id }),
        );
    }

    pub fn assignment_history_entry(&self, run_id: &TaskRunId, entry: &HistoryEntry) {
        self.agent_log.emit(
            "assignment_history_entry",
            json!({ "taskRunId": run_id, "entry": entry }),
        );
    }
}
