//! Tool factory registry
//!
//! Workers are materialized with a set of tools. The worker runtime owns the
//! actual tool implementations; the control plane keeps a per-kind directory
//! of named constructors so agent configs can be validated and the available
//! set can be announced to monitors.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use tracing::info;

use overseer_core::{AgentKind, Error, Result};

/// A live tool instance handed to a worker. Opaque to the control plane.
pub trait ToolHandle: Send + Sync {}

/// A named tool constructor. The worker runtime implements this; the control
/// plane consumes only the name and description.
pub trait ToolFactory: Send + Sync {
    /// Unique tool name within a kind (e.g. "workdir_write").
    fn name(&self) -> &str;

    /// Human-readable description, surfaced to the supervisor.
    fn description(&self) -> &str;

    /// Build a fresh tool instance for a new worker.
    fn instantiate(&self) -> Box<dyn ToolHandle>;
}

/// Snapshot of a factory for events and the ops surface.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ToolInfo {
    pub name: String,
    pub description: String,
}

/// Per-kind directory of tool factories. A kind can be bound exactly once.
#[derive(Default)]
pub struct ToolFactoryRegistry {
    factories: DashMap<AgentKind, HashMap<String, Arc<dyn ToolFactory>>>,
}

impl ToolFactoryRegistry {
    pub fn new() -> Self {
        Self {
            factories: DashMap::new(),
        }
    }

    /// Bind a kind's tool source. Fails if the kind is already bound.
    /// Returns the name/description snapshot for the announcement event.
    pub fn bind(
        &self,
        kind: AgentKind,
        factories: Vec<Arc<dyn ToolFactory>>,
    ) -> Result<Vec<ToolInfo>> {
        if self.factories.contains_key(&kind) {
            return Err(Error::illegal_state(format!(
                "tools factory for kind '{kind}' is already bound"
            )));
        }
        let mut map = HashMap::new();
        for factory in factories {
            map.insert(factory.name().to_string(), factory);
        }
        info!(kind = %kind, tools = map.len(), "tools factory bound");
        self.factories.insert(kind, map);
        Ok(self.available(kind))
    }

    pub fn is_bound(&self, kind: AgentKind) -> bool {
        self.factories.contains_key(&kind)
    }

    /// All tools bound for a kind, sorted by name for deterministic output.
    pub fn available(&self, kind: AgentKind) -> Vec<ToolInfo> {
        let mut infos: Vec<ToolInfo> = self
            .factories
            .get(&kind)
            .map(|map| {
                map.values()
                    .map(|f| ToolInfo {
                        name: f.name().to_string(),
                        description: f.description().to_string(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        infos.sort_by(|a, b| a.name.cmp(&b.name));
        infos
    }

    /// Validate a config's tool list. An empty list means "no tools" and is
    /// always accepted.
    pub fn validate(&self, kind: AgentKind, tools: &[String]) -> Result<()> {
        if tools.is_empty() {
            return Ok(());
        }
        let bound = self.factories.get(&kind);
        for tool in tools {
            let known = bound.as_ref().is_some_and(|map| map.contains_key(tool));
            if !known {
                return Err(Error::unknown_tool(kind.to_string(), tool));
            }
        }
        Ok(())
    }

    /// Look up a constructor for the worker runtime.
    pub fn get(&self, kind: AgentKind, name: &str) -> Option<Arc<dyn ToolFactory>> {
        self.factories.get(&kind).and_then(|map| map.get(name).cloned())
    }
}
