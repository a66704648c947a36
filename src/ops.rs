//! Supervisor tool surface
//!
//! The supervisor worker drives the control plane through structured
//! operations: a tagged record keyed by `method`, with explicit typed
//! fields per method (never a bag of optional keys). Successful calls
//! return `{ method, success, data }`; failures surface as the core error
//! type, which `error_payload` converts to transport form for the glue
//! layer.
//!
//!   { "method": "createTaskRun", "kind": "task", "typeName": "poem_generation", "input": "bee" }

use serde::Deserialize;
use serde_json::{json, Value};

use overseer_core::{
    AgentId, AgentKind, ControlPlaneConfig, Error, Result, TaskKind, TaskRunId,
};
use overseer_manager::{HistoryQuery, TaskConfigSpec, TaskConfigUpdate};
use overseer_registry::{AgentConfigSpec, AgentConfigUpdate, AgentFilter};

use crate::boot::ControlPlane;

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "method", rename_all = "camelCase")]
pub enum SupervisorOp {
    // -- agent registry ------------------------------------------------------
    GetAvailableTools {
        kind: AgentKind,
    },
    #[serde(rename_all = "camelCase")]
    CreateAgentConfig {
        config: AgentConfigSpec,
    },
    #[serde(rename_all = "camelCase")]
    UpdateAgentConfig {
        update: AgentConfigUpdate,
    },
    GetAllAgentConfigs,
    #[serde(rename_all = "camelCase")]
    GetAgentConfig {
        kind: AgentKind,
        type_name: String,
        #[serde(default)]
        version: Option<u32>,
    },
    #[serde(rename_all = "camelCase")]
    GetAgentConfigVersion {
        kind: AgentKind,
        type_name: String,
    },
    #[serde(rename_all = "camelCase")]
    GetActiveAgents {
        #[serde(default)]
        filter: AgentFilter,
    },
    #[serde(rename_all = "camelCase")]
    GetAgent {
        agent_id: AgentId,
    },
    /// Shared method name: the `kind` string routes to the agent registry
    /// ("supervisor"/"operator") or the task manager ("task").
    #[serde(rename_all = "camelCase")]
    GetPoolStats {
        kind: String,
        type_name: String,
    },

    // -- task manager --------------------------------------------------------
    #[serde(rename_all = "camelCase")]
    CreateTaskConfig {
        config: TaskConfigSpec,
        owner_agent_id: String,
    },
    #[serde(rename_all = "camelCase")]
    UpdateTaskConfig {
        update: TaskConfigUpdate,
    },
    #[serde(rename_all = "camelCase")]
    DestroyTaskConfig {
        kind: TaskKind,
        type_name: String,
    },
    #[serde(rename_all = "camelCase")]
    CreateTaskRun {
        kind: TaskKind,
        type_name: String,
        #[serde(default)]
        input: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    ScheduleStartTaskRun {
        task_run_id: TaskRunId,
    },
    #[serde(rename_all = "camelCase")]
    StopTaskRun {
        task_run_id: TaskRunId,
    },
    #[serde(rename_all = "camelCase")]
    DestroyTaskRun {
        task_run_id: TaskRunId,
    },
    GetAllTaskRuns,
    #[serde(rename_all = "camelCase")]
    GetTaskRun {
        task_run_id: TaskRunId,
    },
    #[serde(rename_all = "camelCase")]
    GetTaskRunHistory {
        task_run_id: TaskRunId,
        #[serde(default)]
        limit: Option<usize>,
    },
    #[serde(rename_all = "camelCase")]
    IsTaskRunOccupied {
        task_run_id: TaskRunId,
    },
}

impl SupervisorOp {
    pub fn method_name(&self) -> &'static str {
        match self {
            Self::GetAvailableTools { .. } => "getAvailableTools",
            Self::CreateAgentConfig { .. } => "createAgentConfig",
            Self::UpdateAgentConfig { .. } => "updateAgentConfig",
            Self::GetAllAgentConfigs => "getAllAgentConfigs",
            Self::GetAgentConfig { .. } => "getAgentConfig",
            Self::GetAgentConfigVersion { .. } => "getAgentConfigVersion",
            Self::GetActiveAgents { .. } => "getActiveAgents",
            Self::GetAgent { .. } => "getAgent",
            Self::GetPoolStats { .. } => "getPoolStats",
            Self::CreateTaskConfig { .. } => "createTaskConfig",
            Self::UpdateTaskConfig { .. } => "updateTaskConfig",
            Self::DestroyTaskConfig { .. } => "destroyTaskConfig",
            Self::CreateTaskRun { .. } => "createTaskRun",
            Self::ScheduleStartTaskRun { .. } => "scheduleStartTaskRun",
            Self::StopTaskRun { .. } => "stopTaskRun",
            Self::DestroyTaskRun { .. } => "destroyTaskRun",
            Self::GetAllTaskRuns => "getAllTaskRuns",
            Self::GetTaskRun { .. } => "getTaskRun",
            Self::GetTaskRunHistory { .. } => "getTaskRunHistory",
            Self::IsTaskRunOccupied { .. } => "isTaskRunOccupied",
        }
    }

    /// Methods hidden when `mutable_agent_configs` is off.
    fn mutates_agent_config(&self) -> bool {
        matches!(
            self,
            Self::CreateAgentConfig { .. } | Self::UpdateAgentConfig { .. }
        )
    }
}

/// The method list the supervisor is offered, honoring feature switches.
pub fn visible_methods(config: &ControlPlaneConfig) -> Vec<&'static str> {
    let mut methods = vec![
        "getAvailableTools",
        "createAgentConfig",
        "updateAgentConfig",
        "getAllAgentConfigs",
        "getAgentConfig",
        "getAgentConfigVersion",
        "getActiveAgents",
        "getAgent",
        "getPoolStats",
        "createTaskConfig",
        "updateTaskConfig",
        "destroyTaskConfig",
        "createTaskRun",
        "scheduleStartTaskRun",
        "stopTaskRun",
        "destroyTaskRun",
        "getAllTaskRuns",
        "getTaskRun",
        "getTaskRunHistory",
        "isTaskRunOccupied",
    ];
    if !config.agent_registry.mutable_agent_configs {
        methods.retain(|m| *m != "createAgentConfig" && *m != "updateAgentConfig");
    }
    methods
}

/// Successful transport envelope.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OpResponse {
    pub method: &'static str,
    pub success: bool,
    pub data: Value,
}

impl OpResponse {
    fn ok(method: &'static str, data: Value) -> Self {
        Self {
            method,
            success: true,
            data,
        }
    }
}

/// Transport form of a failed operation.
pub fn error_payload(method: &str, error: &Error) -> Value {
    json!({
        "method": method,
        "success": false,
        "error": { "kind": error.kind(), "message": error.to_string() },
    })
}

/// Validate-and-dispatch one supervisor operation.
pub async fn dispatch(
    plane: &ControlPlane,
    op: SupervisorOp,
    acting_agent: &str,
) -> Result<OpResponse> {
    let method = op.method_name();
    if op.mutates_agent_config() && !plane.config().agent_registry.mutable_agent_configs {
        return Err(Error::not_found(format!("method {method}")));
    }

    let registry = plane.registry();
    let manager = plane.manager();

    let data = match op {
        SupervisorOp::GetAvailableTools { kind } => {
            serde_json::to_value(registry.available_tools(kind))?
        }
        SupervisorOp::CreateAgentConfig { config } => {
            serde_json::to_value(registry.create_agent_config(config).await?)?
        }
        SupervisorOp::UpdateAgentConfig { update } => {
            serde_json::to_value(registry.update_agent_config(update).await?)?
        }
        SupervisorOp::GetAllAgentConfigs => {
            serde_json::to_value(registry.get_all_agent_configs().await)?
        }
        SupervisorOp::GetAgentConfig {
            kind,
            type_name,
            version,
        } => serde_json::to_value(registry.get_agent_config(kind, &type_name, version).await?)?,
        SupervisorOp::GetAgentConfigVersion { kind, type_name } => {
            json!({ "version": registry.get_agent_config_version(kind, &type_name).await? })
        }
        SupervisorOp::GetActiveAgents { filter } => {
            serde_json::to_value(registry.get_active_agents(filter).await)?
        }
        SupervisorOp::GetAgent { agent_id } => {
            serde_json::to_value(registry.get_agent(&agent_id).await?)?
        }
        SupervisorOp::GetPoolStats { kind, type_name } => {
            if let Ok(agent_kind) = kind.parse::<AgentKind>() {
                serde_json::to_value(registry.get_pool_stats(agent_kind, &type_name).await?)?
            } else {
                let task_kind: TaskKind = kind.parse()?;
                serde_json::to_value(
                    manager
                        .get_pool_stats(task_kind, &type_name, acting_agent)
                        .await?,
                )?
            }
        }
        SupervisorOp::CreateTaskConfig {
            config,
            owner_agent_id,
        } => serde_json::to_value(
            manager
                .create_task_config(config, &owner_agent_id, acting_agent)
                .await?,
        )?,
        SupervisorOp::UpdateTaskConfig { update } => {
            serde_json::to_value(manager.update_task_config(update, acting_agent).await?)?
        }
        SupervisorOp::DestroyTaskConfig { kind, type_name } => {
            manager
                .destroy_task_config(kind, &type_name, acting_agent)
                .await?;
            json!({ "destroyed": true })
        }
        SupervisorOp::CreateTaskRun {
            kind,
            type_name,
            input,
        } => serde_json::to_value(
            manager
                .create_task_run(kind, &type_name, input, acting_agent)
                .await?,
        )?,
        SupervisorOp::ScheduleStartTaskRun { task_run_id } => {
            manager
                .schedule_start_task_run(&task_run_id, acting_agent)
                .await?;
            json!({ "scheduled": true })
        }
        SupervisorOp::StopTaskRun { task_run_id } => {
            manager.stop_task_run(&task_run_id, acting_agent).await?;
            json!({ "stopped": true })
        }
        SupervisorOp::DestroyTaskRun { task_run_id } => {
            manager.destroy_task_run(&task_run_id, acting_agent).await?;
            json!({ "destroyed": true })
        }
        SupervisorOp::GetAllTaskRuns => {
            serde_json::to_value(manager.get_all_task_runs(acting_agent).await)?
        }
        SupervisorOp::GetTaskRun { task_run_id } => {
            serde_json::to_value(manager.get_task_run(&task_run_id, acting_agent).await?)?
        }
        SupervisorOp::GetTaskRunHistory { task_run_id, limit } => serde_json::to_value(
            manager
                .get_task_run_history(&task_run_id, HistoryQuery { limit }, acting_agent)
                .await?,
        )?,
        SupervisorOp::IsTaskRunOccupied { task_run_id } => {
            json!({ "occupied": manager.is_task_run_occupied(&task_run_id, acting_agent).await? })
        }
    };

    Ok(OpResponse::ok(method, data))
}
