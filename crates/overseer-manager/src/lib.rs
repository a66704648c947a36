//! Task manager: versioned task definitions, run scheduling, retries,
//! history, and the access-control gate in front of it all.

pub mod config;
pub mod events;
pub mod history;
pub mod lifecycle;
pub mod manager;
pub mod run;
pub mod scheduler;

pub use config::{ConcurrencyMode, TaskConfig, TaskConfigSpec, TaskConfigUpdate};
pub use events::TaskEvents;
pub use history::{HistoryEntry, TerminalStatus};
pub use lifecycle::{AgentAcquirer, RunCallbacks, TaskRunner};
pub use manager::{
    HistoryQuery, TaskManager, TaskManagerOptions, TaskPoolStats, MANAGER_ROOT_RESOURCE,
};
pub use run::{TaskRun, TaskRunStatus};
pub use scheduler::spawn_scheduler;
