//! Shared types for the overseer control plane: structured ids, the error
//! enum, and the boot configuration.

pub mod config;
pub mod error;
pub mod ids;

pub use config::{ControlPlaneConfig, ManagerFeatures, RegistryFeatures};
pub use error::{Error, Result};
pub use ids::{AgentConfigId, AgentId, AgentKind, TaskConfigId, TaskKind, TaskRunId};
