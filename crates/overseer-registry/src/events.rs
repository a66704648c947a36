//! Agent state events
//!
//! Every registry state transition lands in the agent event log through one
//! of these emitters, so the log is a faithful trace of the in-memory
//! transitions (apply + emit, never one without the other).

use std::sync::Arc;

use serde_json::json;

use overseer_core::{AgentConfigId, AgentId, AgentKind};
use overseer_tools::ToolInfo;
use overseer_workspace::EventLog;

use crate::config::AgentConfig;
use crate::pool::PoolStats;

#[derive(Clone)]
pub struct AgentEvents {
    log: Arc<EventLog>,
}

impl AgentEvents {
    pub fn new(log: Arc<EventLog>) -> Self {
        Self { log }
    }

    pub fn log(&self) -> &Arc<EventLog> {
        &self.log
    }

    pub fn available_tools_register(&self, kind: AgentKind, tools: &[ToolInfo]) {
        self.log.emit(
            "available_tools_register",
            json!({ "kind": kind, "tools": tools }),
        );
    }

    pub fn agent_config_create(&self, config: &AgentConfig) {
        self.log.emit(
            "agent_config_create",
            json!({ "configId": config.id(), "config": config }),
        );
    }

    pub fn agent_config_update(&self, config: &AgentConfig) {
        self.log.emit(
            "agent_config_update",
            json!({ "configId": config.id(), "config": config }),
        );
    }

    pub fn agent_config_destroy(&self, config_id: &AgentConfigId) {
        self.log
            .emit("agent_config_destroy", json!({ "configId": config_id }));
    }

    pub fn agent_create(&self, agent_id: &AgentId) {
        self.log.emit("agent_create", json!({ "agentId": agent_id }));
    }

    pub fn agent_acquire(&self, agent_id: &AgentId) {
        self.log.emit("agent_acquire", json!({ "agentId": agent_id }));
    }

    pub fn agent_release(&self, agent_id: &AgentId) {
        self.log.emit("agent_release", json!({ "agentId": agent_id }));
    }

    pub fn agent_destroy(&self, agent_id: &AgentId) {
        self.log.emit("agent_destroy", json!({ "agentId": agent_id }));
    }

    pub fn pool_change(&self, stats: &PoolStats) {
        self.log.emit("pool_change", json!(stats));
    }
}
