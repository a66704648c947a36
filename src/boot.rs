//! Control-plane assembly
//!
//! Everything with process-wide lifecycle is created here once and injected
//! explicitly: the workspace, the two event logs, the registry, the manager,
//! and the periodic ticks. The registry/manager cycle is broken with two
//! adapters: the manager sees the registry only as `AgentAcquirer`, and the
//! registry announces through `RegistryObserver`, bound after both exist.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

use overseer_access::ResourceRegistry;
use overseer_core::{AgentId, AgentKind, ControlPlaneConfig, Result};
use overseer_manager::{
    spawn_scheduler, AgentAcquirer, TaskEvents, TaskManager, TaskManagerOptions, TaskRunner,
};
use overseer_registry::{AgentEvents, AgentFactory, AgentRegistry, RegistryObserver};
use overseer_tools::ToolFactoryRegistry;
use overseer_workspace::{EventLog, Workspace};

pub struct BootOptions {
    /// Directory holding `workspaces/` and `logs/`.
    pub root: PathBuf,
    pub workspace: String,
    pub config: ControlPlaneConfig,
    /// The worker runtime's instance builder.
    pub agent_factory: Arc<dyn AgentFactory>,
    /// The worker runtime's execution entry point.
    pub task_runner: Arc<dyn TaskRunner>,
}

pub struct ControlPlane {
    config: ControlPlaneConfig,
    workspace: Arc<Workspace>,
    registry: Arc<AgentRegistry>,
    manager: Arc<TaskManager>,
    cancel: CancellationToken,
    ticks: Vec<JoinHandle<()>>,
}

impl ControlPlane {
    /// Build and start the control plane: open the workspace, rotate the
    /// event logs, wire registry and manager together, replay persisted
    /// definitions, and start the ticks.
    pub async fn init(opts: BootOptions) -> Result<Self> {
        let workspace = Arc::new(Workspace::open(&opts.root, opts.workspace)?);
        let agent_log = Arc::new(EventLog::open(workspace.logs_dir().join("agent_state.log"))?);
        let task_log = Arc::new(EventLog::open(workspace.logs_dir().join("task_state.log"))?);

        let registry = Arc::new(AgentRegistry::new(
            Arc::new(ToolFactoryRegistry::new()),
            opts.agent_factory,
            AgentEvents::new(agent_log.clone()),
            Some(workspace.clone()),
        ));

        let manager = TaskManager::new(
            Arc::new(ResourceRegistry::new()),
            Arc::new(RegistryAcquirer(registry.clone())),
            opts.task_runner,
            TaskEvents::new(task_log, agent_log),
            Some(workspace.clone()),
            TaskManagerOptions {
                occupancy_timeout: Duration::from_millis(opts.config.occupancy_timeout_ms),
                max_history_entries: opts.config.max_history_entries,
                unlimited_concurrency_cap: opts.config.unlimited_concurrency_cap,
            },
        );
        registry.bind_observer(Arc::new(ManagerObserver(manager.clone())))?;

        // Registry first: its announcements register the agent types the
        // task-config replay validates against.
        if opts.config.agent_registry.restoration {
            registry.restore().await?;
        }
        if opts.config.task_manager.restoration {
            manager.restore().await?;
        }

        let cancel = CancellationToken::new();
        let ticks = vec![
            Arc::clone(&registry).spawn_cleanup(
                Duration::from_millis(opts.config.cleanup_tick_ms),
                cancel.child_token(),
            ),
            spawn_scheduler(
                &manager,
                Duration::from_millis(opts.config.scheduler_tick_ms),
                cancel.child_token(),
            ),
        ];

        info!(workspace = workspace.name(), "control plane started");
        Ok(Self {
            config: opts.config,
            workspace,
            registry,
            manager,
            cancel,
            ticks,
        })
    }

    pub fn config(&self) -> &ControlPlaneConfig {
        &self.config
    }

    pub fn workspace(&self) -> &Arc<Workspace> {
        &self.workspace
    }

    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.registry
    }

    pub fn manager(&self) -> &Arc<TaskManager> {
        &self.manager
    }

    /// Stop the ticks and wait for them to wind down. In-flight worker
    /// reports after shutdown are ignored by the usual late-report rules.
    pub async fn shutdown(self) {
        self.cancel.cancel();
        for tick in self.ticks {
            let _ = tick.await;
        }
        info!("control plane stopped");
    }
}

/// Manager-facing view of the registry.
struct RegistryAcquirer(Arc<AgentRegistry>);

#[async_trait]
impl AgentAcquirer for RegistryAcquirer {
    async fn acquire_agent(
        &self,
        kind: AgentKind,
        type_name: &str,
        version: Option<u32>,
    ) -> Result<AgentId> {
        self.0
            .acquire_agent(kind, type_name, version)
            .await
            .map(|(agent_id, _handle)| agent_id)
    }

    async fn release_agent(&self, agent_id: &AgentId) -> Result<()> {
        self.0.release_agent(agent_id).await
    }
}

/// Registry-facing view of the manager.
struct ManagerObserver(Arc<TaskManager>);

#[async_trait]
impl RegistryObserver for ManagerObserver {
    async fn on_agent_config_created(&self, kind: AgentKind, type_name: &str) {
        self.0.register_agent_type(kind, type_name).await;
    }

    async fn on_agent_available(&self, kind: AgentKind, type_name: &str, version: u32, count: usize) {
        self.0.agent_available(kind, type_name, version, count).await;
    }
}

/// File-logging setup for hosts that want it. Returns the guard that must
/// stay alive for the duration of the process.
pub fn init_tracing(logs_dir: &Path) -> tracing_appender::non_blocking::WorkerGuard {
    let appender = tracing_appender::rolling::daily(logs_dir, "overseer.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    guard
}
