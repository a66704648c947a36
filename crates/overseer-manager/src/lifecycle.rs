//! Seams to the registry and the worker runtime
//!
//! The manager never sees registry types; it brokers workers through
//! [`AgentAcquirer`] and hands execution to the external [`TaskRunner`],
//! which reports back through [`RunCallbacks`].

use std::sync::Arc;

use async_trait::async_trait;

use overseer_core::{AgentId, AgentKind, Result, TaskRunId};

use crate::manager::TaskManager;
use crate::run::TaskRun;

/// The narrow slice of the agent registry the manager depends on.
#[async_trait]
pub trait AgentAcquirer: Send + Sync {
    /// Hand out a worker of (kind,type), latest version unless pinned.
    async fn acquire_agent(
        &self,
        kind: AgentKind,
        type_name: &str,
        version: Option<u32>,
    ) -> Result<AgentId>;

    async fn release_agent(&self, agent_id: &AgentId) -> Result<()>;
}

/// The external worker runtime. Called once per dispatched run; everything
/// it learns flows back through the callbacks, in any order and at any
/// time. Errors are caught by the scheduler and leave the run recoverable.
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn on_task_start(&self, run: TaskRun, callbacks: RunCallbacks) -> Result<()>;
}

/// Handed to the runner at dispatch. Each method applies the corresponding
/// state transition; reports for runs that are no longer executing (stopped,
/// timed out, destroyed) are ignored.
#[derive(Clone)]
pub struct RunCallbacks {
    manager: Arc<TaskManager>,
}

impl RunCallbacks {
    pub(crate) fn new(manager: Arc<TaskManager>) -> Self {
        Self { manager }
    }

    /// The runner could not get a worker; the run parks until the registry
    /// announces availability.
    pub async fn on_awaiting_agent_acquired(&self, run_id: &TaskRunId) {
        self.manager.handle_awaiting_agent(run_id).await;
    }

    /// A worker took the run.
    pub async fn on_agent_acquired(&self, run_id: &TaskRunId, agent_id: &AgentId) -> Result<()> {
        self.manager.handle_agent_acquired(run_id, agent_id).await
    }

    /// The worker finished the attempt successfully.
    pub async fn on_agent_complete(
        &self,
        output: String,
        run_id: &TaskRunId,
        agent_id: &AgentId,
    ) -> Result<()> {
        self.manager
            .handle_agent_complete(output, run_id, agent_id)
            .await
    }

    /// The worker failed the attempt.
    pub async fn on_agent_error(
        &self,
        error: String,
        run_id: &TaskRunId,
        agent_id: &AgentId,
    ) -> Result<()> {
        self.manager.handle_agent_error(error, run_id, agent_id).await
    }
}
