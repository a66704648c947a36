//! Seams to the worker runtime and the task manager
//!
//! The registry never sees LLM plumbing or manager types. Worker creation
//! and destruction go through [`AgentFactory`]; announcements the task
//! manager cares about go through [`RegistryObserver`], bound once at boot.

use std::sync::Arc;

use async_trait::async_trait;

use overseer_core::{AgentId, AgentKind, Result};

use crate::config::AgentConfig;

/// A live worker instance. Opaque to the control plane; the worker runtime
/// downcasts or wraps as it sees fit.
pub trait AgentHandle: Send + Sync {}

/// Builds and tears down worker instances. Callbacks are awaited serially;
/// a failed `on_create` fails the whole operation and leaves no partial
/// pool entry, a failed `on_destroy` is logged and swallowed.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    async fn on_create(
        &self,
        config: &AgentConfig,
        agent_id: &AgentId,
    ) -> Result<Arc<dyn AgentHandle>>;

    async fn on_destroy(&self, agent_id: &AgentId, handle: Arc<dyn AgentHandle>) -> Result<()>;
}

/// What the registry announces outward. The task manager sits behind this
/// at boot; the registry holds no manager types.
#[async_trait]
pub trait RegistryObserver: Send + Sync {
    /// A new (kind,type) exists; task configs may now target it.
    async fn on_agent_config_created(&self, kind: AgentKind, type_name: &str);

    /// Up to `count` workers of this (kind,type,version) can be acquired
    /// right now. Fired on release and on config creation, never on acquire.
    async fn on_agent_available(&self, kind: AgentKind, type_name: &str, version: u32, count: usize);
}
