//! Control-plane configuration
//!
//! Typed feature switches passed once at boot. There is no mutable global
//! state; components receive what they need at construction.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ControlPlaneConfig {
    pub agent_registry: RegistryFeatures,
    pub task_manager: ManagerFeatures,

    /// Task scheduler tick. One scheduled run is dispatched per tick.
    pub scheduler_tick_ms: u64,
    /// Stale-pool cleanup tick in the agent registry.
    pub cleanup_tick_ms: u64,
    /// Force-release occupancy after this long without a worker report.
    pub occupancy_timeout_ms: u64,
    /// Ring-buffer bound on per-run history.
    pub max_history_entries: usize,
    /// Concurrent-run cap used by `ConcurrencyMode::None`.
    pub unlimited_concurrency_cap: usize,
}

impl Default for ControlPlaneConfig {
    fn default() -> Self {
        Self {
            agent_registry: RegistryFeatures::default(),
            task_manager: ManagerFeatures::default(),
            scheduler_tick_ms: 100,
            cleanup_tick_ms: 1_000,
            occupancy_timeout_ms: 30 * 60 * 1_000,
            max_history_entries: 50,
            unlimited_concurrency_cap: 100,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct RegistryFeatures {
    /// When false, config-mutating methods are hidden from the tool surface.
    pub mutable_agent_configs: bool,
    /// When false, the workspace JSONL replay is skipped at boot.
    pub restoration: bool,
}

impl Default for RegistryFeatures {
    fn default() -> Self {
        Self {
            mutable_agent_configs: true,
            restoration: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ManagerFeatures {
    pub restoration: bool,
}

impl Default for ManagerFeatures {
    fn default() -> Self {
        Self { restoration: true }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let cfg = ControlPlaneConfig::default();
        assert!(cfg.agent_registry.mutable_agent_configs);
        assert!(cfg.agent_registry.restoration);
        assert!(cfg.task_manager.restoration);
        assert_eq!(cfg.scheduler_tick_ms, 100);
        assert_eq!(cfg.unlimited_concurrency_cap, 100);
    }

    #[test]
    fn partial_json_fills_defaults() {
        let cfg: ControlPlaneConfig = serde_json::from_str(
            r#"{ "agentRegistry": { "mutableAgentConfigs": false } }"#,
        )
        .unwrap();
        assert!(!cfg.agent_registry.mutable_agent_configs);
        assert!(cfg.agent_registry.restoration);
        assert_eq!(cfg.scheduler_tick_ms, 100);
    }
}
