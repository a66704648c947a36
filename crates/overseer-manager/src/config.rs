//! Task configuration: the template runs are instantiated from.

use serde::{Deserialize, Serialize};

use overseer_core::{AgentKind, TaskConfigId, TaskKind};

/// How many runs of one task type may be in flight at once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ConcurrencyMode {
    /// Bounded only by the implementation cap.
    None,
    /// One run at a time.
    Exclusive,
}

impl ConcurrencyMode {
    pub fn pool_size(self, unlimited_cap: usize) -> usize {
        match self {
            Self::Exclusive => 1,
            Self::None => unlimited_cap,
        }
    }
}

/// One version of a task definition. Immutable once created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub kind: TaskKind,
    pub type_name: String,
    /// Default input for runs created without an explicit one.
    pub input: String,
    pub description: String,
    /// 0 means single-shot; otherwise the run repeats on this period.
    pub interval_ms: u64,
    pub run_immediately: bool,
    /// None means no retries: one shot per invocation.
    pub max_retries: Option<u32>,
    pub retry_delay_ms: Option<u64>,
    /// Bound on completed runs; None means unbounded.
    pub max_repeats: Option<u32>,
    pub agent_kind: AgentKind,
    pub agent_type: String,
    pub concurrency_mode: ConcurrencyMode,
    pub owner_agent_id: String,
    pub version: u32,
}

impl TaskConfig {
    pub fn id(&self) -> TaskConfigId {
        TaskConfigId::new(self.kind, self.type_name.clone(), self.version)
    }
}

/// Input for `create_task_config`. Version and owner are assigned by the
/// manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfigSpec {
    pub kind: TaskKind,
    pub type_name: String,
    pub input: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub interval_ms: u64,
    #[serde(default)]
    pub run_immediately: bool,
    #[serde(default)]
    pub max_retries: Option<u32>,
    #[serde(default)]
    pub retry_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_repeats: Option<u32>,
    pub agent_kind: AgentKind,
    pub agent_type: String,
    pub concurrency_mode: ConcurrencyMode,
}

impl TaskConfigSpec {
    pub(crate) fn into_initial(self, owner_agent_id: String) -> TaskConfig {
        TaskConfig {
            kind: self.kind,
            type_name: self.type_name,
            input: self.input,
            description: self.description,
            interval_ms: self.interval_ms,
            run_immediately: self.run_immediately,
            max_retries: self.max_retries,
            retry_delay_ms: self.retry_delay_ms,
            max_repeats: self.max_repeats,
            agent_kind: self.agent_kind,
            agent_type: self.agent_type,
            concurrency_mode: self.concurrency_mode,
            owner_agent_id,
            version: 1,
        }
    }
}

/// Explicit per-field overrides for `update_task_config`; unset fields are
/// inherited from the previous version.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfigUpdate {
    pub kind: Option<TaskKind>,
    pub type_name: Option<String>,
    pub input: Option<String>,
    pub description: Option<String>,
    pub interval_ms: Option<u64>,
    pub run_immediately: Option<bool>,
    pub max_retries: Option<Option<u32>>,
    pub retry_delay_ms: Option<Option<u64>>,
    pub max_repeats: Option<Option<u32>>,
    pub concurrency_mode: Option<ConcurrencyMode>,
}

impl TaskConfigUpdate {
    pub fn new(kind: TaskKind, type_name: impl Into<String>) -> Self {
        Self {
            kind: Some(kind),
            type_name: Some(type_name.into()),
            ..Self::default()
        }
    }

    pub fn input(mut self, input: impl Into<String>) -> Self {
        self.input = Some(input.into());
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn interval_ms(mut self, interval_ms: u64) -> Self {
        self.interval_ms = Some(interval_ms);
        self
    }

    pub fn run_immediately(mut self, run_immediately: bool) -> Self {
        self.run_immediately = Some(run_immediately);
        self
    }

    pub fn max_retries(mut self, max_retries: Option<u32>) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn retry_delay_ms(mut self, retry_delay_ms: Option<u64>) -> Self {
        self.retry_delay_ms = Some(retry_delay_ms);
        self
    }

    pub fn max_repeats(mut self, max_repeats: Option<u32>) -> Self {
        self.max_repeats = Some(max_repeats);
        self
    }

    pub fn concurrency_mode(mut self, mode: ConcurrencyMode) -> Self {
        self.concurrency_mode = Some(mode);
        self
    }

    /// The next version, inheriting unset fields. The agent binding and the
    /// owner never change across versions.
    pub(crate) fn apply_to(self, previous: &TaskConfig) -> TaskConfig {
        TaskConfig {
            kind: previous.kind,
            type_name: previous.type_name.clone(),
            input: self.input.unwrap_or_else(|| previous.input.clone()),
            description: self.description.unwrap_or_else(|| previous.description.clone()),
            interval_ms: self.interval_ms.unwrap_or(previous.interval_ms),
            run_immediately: self.run_immediately.unwrap_or(previous.run_immediately),
            max_retries: self.max_retries.unwrap_or(previous.max_retries),
            retry_delay_ms: self.retry_delay_ms.unwrap_or(previous.retry_delay_ms),
            max_repeats: self.max_repeats.unwrap_or(previous.max_repeats),
            agent_kind: previous.agent_kind,
            agent_type: previous.agent_type.clone(),
            concurrency_mode: self.concurrency_mode.unwrap_or(previous.concurrency_mode),
            owner_agent_id: previous.owner_agent_id.clone(),
            version: previous.version + 1,
        }
    }
}
