//! Agent configuration: the template workers are materialized from.

use serde::{Deserialize, Serialize};

use overseer_core::{AgentConfigId, AgentKind};

/// One version of a worker template. Versions are immutable once created;
/// an update produces the next version.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfig {
    pub kind: AgentKind,
    pub type_name: String,
    pub instructions: String,
    pub description: String,
    /// Tool names resolved against the kind's factory. Empty means no tools.
    #[serde(default)]
    pub tools: Vec<String>,
    /// 0 disables pooling: acquire creates on demand, release destroys.
    pub max_pool_size: usize,
    pub auto_populate_pool: bool,
    pub version: u32,
}

impl AgentConfig {
    pub fn id(&self) -> AgentConfigId {
        AgentConfigId::new(self.kind, self.type_name.clone(), self.version)
    }
}

/// Input for `create_agent_config`. Version is assigned by the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigSpec {
    pub kind: AgentKind,
    pub type_name: String,
    pub instructions: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub tools: Vec<String>,
    #[serde(default)]
    pub max_pool_size: usize,
    #[serde(default)]
    pub auto_populate_pool: bool,
}

impl AgentConfigSpec {
    fn into_version(self, version: u32) -> AgentConfig {
        AgentConfig {
            kind: self.kind,
            type_name: self.type_name,
            instructions: self.instructions,
            description: self.description,
            tools: self.tools,
            max_pool_size: self.max_pool_size,
            auto_populate_pool: self.auto_populate_pool,
            version,
        }
    }

    pub(crate) fn into_initial(self) -> AgentConfig {
        self.into_version(1)
    }
}

/// Explicit per-field overrides for `update_agent_config`. Unset fields are
/// carried over from the previous version; there is no recursive merge.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentConfigUpdate {
    pub kind: Option<AgentKind>,
    pub type_name: Option<String>,
    pub instructions: Option<String>,
    pub description: Option<String>,
    pub tools: Option<Vec<String>>,
    pub max_pool_size: Option<usize>,
    pub auto_populate_pool: Option<bool>,
}

impl AgentConfigUpdate {
    pub fn new(kind: AgentKind, type_name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn tools(mut self, tools: Vec<String>) -> Self {
        self.tools = Some(tools);
        self
    }

    pub fn max_pool_size(mut self, size: usize) -> Self {
        self.max_pool_size = Some(size);
        self
    }

    pub fn auto_populate_pool(mut self, auto: bool) -> Self {
        self.auto_populate_pool = Some(auto);
        self
    }

    /// The next version, with unset fields inherited from `previous`.
    pub(crate) fn apply_to(self, previous: &AgentConfig) -> AgentConfig {
        AgentConfig {
            kind: previous.kind,
            type_name: previous.type_name.clone(),
            instructions: self.instructions.unwrap_or_else(|| previous.instructions.clone()),
            description: self.description.unwrap_or_else(|| previous.description.clone()),
            tools: self.tools.unwrap_or_else(|| previous.tools.clone()),
            max_pool_size: self.max_pool_size.unwrap_or(previous.max_pool_size),
            auto_populate_pool: self
                .auto_populate_pool
                .unwrap_or(previous.auto_populate_pool),
            version: previous.version + 1,
        }
    }
}
