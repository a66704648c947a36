//! Agent registry: versioned worker templates, live instance pools, and
//! acquire/release brokering for the task manager.

pub mod config;
pub mod events;
pub mod lifecycle;
pub mod pool;
pub mod registry;

pub use config::{AgentConfig, AgentConfigSpec, AgentConfigUpdate};
pub use events::AgentEvents;
pub use lifecycle::{AgentFactory, AgentHandle, RegistryObserver};
pub use pool::{PoolStats, VersionPoolStats};
pub use registry::{AgentFilter, AgentRegistry, AgentSnapshot};
