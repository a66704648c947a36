//! Overseer: the control plane of a single-process multi-agent task
//! orchestrator.
//!
//! A supervisor worker defines operator templates and task definitions; the
//! control plane routes task runs to eligible workers, enforces concurrency
//! limits, retries failures, records history, and persists definitions for
//! restart recovery. See `boot::ControlPlane` for assembly and `ops` for
//! the operation surface the supervisor drives.

pub mod boot;
pub mod ops;

pub use boot::{init_tracing, BootOptions, ControlPlane};
pub use ops::{dispatch, error_payload, visible_methods, OpResponse, SupervisorOp};

pub use overseer_core::{
    AgentConfigId, AgentId, AgentKind, ControlPlaneConfig, Error, ManagerFeatures,
    RegistryFeatures, Result, TaskConfigId, TaskKind, TaskRunId,
};

pub use overseer_access::{Permission, ResourceRegistry};
pub use overseer_manager::{
    AgentAcquirer, ConcurrencyMode, HistoryEntry, HistoryQuery, RunCallbacks, TaskConfig,
    TaskConfigSpec, TaskConfigUpdate, TaskManager, TaskRun, TaskRunStatus, TaskRunner,
    TerminalStatus,
};
pub use overseer_registry::{
    AgentConfig, AgentConfigSpec, AgentConfigUpdate, AgentFactory, AgentFilter, AgentHandle,
    AgentRegistry, PoolStats,
};
pub use overseer_tools::{ToolFactory, ToolFactoryRegistry, ToolHandle, ToolInfo};
pub use overseer_workspace::{EventLog, EventRecord, Workspace, LOG_INIT};
