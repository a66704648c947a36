//! Per-(kind,type,version) instance pools
//!
//! Invariants: `free ⊆ live`, `live.len() ≤ max_pool_size` when pooling is
//! enabled, and an instance is either in the free set or held by exactly
//! one acquirer.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

use serde::Serialize;

use overseer_core::AgentId;

use crate::lifecycle::AgentHandle;

pub(crate) struct PoolSlot {
    pub in_use: bool,
    pub handle: Arc<dyn AgentHandle>,
}

#[derive(Default)]
pub(crate) struct VersionPool {
    /// Insertion-ordered free set; acquire pops from the front.
    pub free: VecDeque<AgentId>,
    pub live: HashMap<AgentId, PoolSlot>,
    /// Total instances ever created for this version; the next instance
    /// number is `created_count + 1`.
    pub created_count: u32,
    pub max_pool_size: usize,
}

impl VersionPool {
    pub fn new(max_pool_size: usize) -> Self {
        Self {
            max_pool_size,
            ..Self::default()
        }
    }

    pub fn in_use_count(&self) -> usize {
        self.live.len() - self.free.len()
    }

    /// How many acquisitions could succeed immediately. An unpooled version
    /// (`max_pool_size == 0`) always creates on demand.
    pub fn available(&self) -> usize {
        if self.max_pool_size == 0 {
            1
        } else {
            self.free.len() + (self.max_pool_size - self.live.len())
        }
    }

    pub fn stats(&self, version: u32) -> VersionPoolStats {
        VersionPoolStats {
            version,
            live: self.live.len(),
            free: self.free.len(),
            in_use: self.in_use_count(),
            max_pool_size: self.max_pool_size,
            created_count: self.created_count,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct VersionPoolStats {
    pub version: u32,
    pub live: usize,
    pub free: usize,
    pub in_use: usize,
    pub max_pool_size: usize,
    pub created_count: u32,
}

/// Aggregate view over every version of a (kind,type) pool.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct PoolStats {
    pub kind: String,
    pub type_name: String,
    pub live: usize,
    pub free: usize,
    pub in_use: usize,
    pub versions: Vec<VersionPoolStats>,
}

impl PoolStats {
    pub fn aggregate(
        kind: impl Into<String>,
        type_name: impl Into<String>,
        versions: Vec<VersionPoolStats>,
    ) -> Self {
        Self {
            kind: kind.into(),
            type_name: type_name.into(),
            live: versions.iter().map(|v| v.live).sum(),
            free: versions.iter().map(|v| v.free).sum(),
            in_use: versions.iter().map(|v| v.in_use).sum(),
            versions,
        }
    }
}
