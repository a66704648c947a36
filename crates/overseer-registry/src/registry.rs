//! Agent registry: versioned worker templates plus live instance pools.
//!
//! One async mutex guards all registry state; public operations are atomic
//! with respect to each other. Lifecycle callbacks (`AgentFactory`) are
//! awaited while the lock is held so they stay serial, which is the
//! contract the worker runtime relies on. Observer announcements are made
//! while holding no registry state where noted, and never while holding any
//! manager lock (lock order is registry before manager).

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use overseer_core::{AgentConfigId, AgentId, AgentKind, Error, Result};
use overseer_tools::{ToolFactory, ToolFactoryRegistry, ToolInfo};
use overseer_workspace::Workspace;

use crate::config::{AgentConfig, AgentConfigSpec, AgentConfigUpdate};
use crate::events::AgentEvents;
use crate::lifecycle::{AgentFactory, AgentHandle, RegistryObserver};
use crate::pool::{PoolStats, PoolSlot, VersionPool};

const SNAPSHOT_FILE: &str = "agent_registry.jsonl";
const SNAPSHOT_OWNER: &str = "agent_registry";

type TypeKey = (AgentKind, String);

/// Filter for `get_active_agents`. Unset fields match everything.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentFilter {
    pub kind: Option<AgentKind>,
    pub type_name: Option<String>,
    pub version: Option<u32>,
    pub in_use: Option<bool>,
}

/// Read-only view of a live instance.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AgentSnapshot {
    pub agent_id: AgentId,
    pub in_use: bool,
}

#[derive(Default)]
struct RegistryState {
    /// (kind,type) → version → config. Versions are created densely from 1;
    /// retired stale versions are removed from the map.
    configs: HashMap<TypeKey, BTreeMap<u32, AgentConfig>>,
    pools: HashMap<TypeKey, BTreeMap<u32, VersionPool>>,
    /// Stale (kind,type,version) records queued for the cleanup tick.
    marked: BTreeSet<(AgentKind, String, u32)>,
}

impl RegistryState {
    fn latest_version(&self, key: &TypeKey) -> Option<u32> {
        self.configs
            .get(key)
            .and_then(|history| history.keys().next_back().copied())
    }

    fn pool_stats(&self, key: &TypeKey) -> Option<PoolStats> {
        let versions = self.pools.get(key)?;
        let stats = versions.iter().map(|(v, pool)| pool.stats(*v)).collect();
        Some(PoolStats::aggregate(
            key.0.to_string(),
            key.1.clone(),
            stats,
        ))
    }

    /// Queue every non-latest version of `key` for retirement.
    fn mark_stale(&mut self, key: &TypeKey) {
        let Some(latest) = self.latest_version(key) else {
            return;
        };
        if let Some(versions) = self.pools.get(key) {
            for version in versions.keys().filter(|v| **v != latest) {
                self.marked.insert((key.0, key.1.clone(), *version));
            }
        }
    }
}

pub struct AgentRegistry {
    state: Mutex<RegistryState>,
    tools: Arc<ToolFactoryRegistry>,
    factory: Arc<dyn AgentFactory>,
    events: AgentEvents,
    observer: OnceLock<Arc<dyn RegistryObserver>>,
    workspace: Option<Arc<Workspace>>,
}

impl AgentRegistry {
    pub fn new(
        tools: Arc<ToolFactoryRegistry>,
        factory: Arc<dyn AgentFactory>,
        events: AgentEvents,
        workspace: Option<Arc<Workspace>>,
    ) -> Self {
        Self {
            state: Mutex::new(RegistryState::default()),
            tools,
            factory,
            events,
            observer: OnceLock::new(),
            workspace,
        }
    }

    /// Bind the manager-facing observer. Once, at boot.
    pub fn bind_observer(&self, observer: Arc<dyn RegistryObserver>) -> Result<()> {
        self.observer
            .set(observer)
            .map_err(|_| Error::illegal_state("registry observer is already bound"))
    }

    pub fn tools(&self) -> &Arc<ToolFactoryRegistry> {
        &self.tools
    }

    /// Bind an available-tool source for a kind and announce the snapshot.
    pub fn register_tools_factory(
        &self,
        kind: AgentKind,
        factories: Vec<Arc<dyn ToolFactory>>,
    ) -> Result<Vec<ToolInfo>> {
        let snapshot = self.tools.bind(kind, factories)?;
        self.events.available_tools_register(kind, &snapshot);
        Ok(snapshot)
    }

    pub fn available_tools(&self, kind: AgentKind) -> Vec<ToolInfo> {
        self.tools.available(kind)
    }

    /// Materialize version 1 of a (kind,type) worker template.
    pub async fn create_agent_config(&self, spec: AgentConfigSpec) -> Result<AgentConfig> {
        let mut state = self.state.lock().await;
        let key: TypeKey = (spec.kind, spec.type_name.clone());
        if state.configs.contains_key(&key) {
            return Err(Error::duplicate_type(key.0.to_string(), key.1));
        }
        self.tools.validate(spec.kind, &spec.tools)?;

        let config = spec.into_initial();
        state
            .configs
            .entry(key.clone())
            .or_default()
            .insert(config.version, config.clone());
        state
            .pools
            .entry(key.clone())
            .or_default()
            .insert(config.version, VersionPool::new(config.max_pool_size));

        info!(config_id = %config.id(), "agent config created");
        self.events.agent_config_create(&config);

        if config.auto_populate_pool && config.max_pool_size > 0 {
            self.populate_locked(&mut state, &config).await?;
        }
        self.emit_pool_change(&state, &key);
        let available = state
            .pools
            .get(&key)
            .and_then(|m| m.get(&config.version))
            .map(VersionPool::available)
            .unwrap_or(0);
        let persisted = self.persist_locked(&state);
        drop(state);

        self.announce_config_created(config.kind, &config.type_name).await;
        self.announce_available(config.kind, &config.type_name, config.version, available)
            .await;

        persisted?;
        Ok(config)
    }

    /// Produce version v+1 of an existing (kind,type). Version v stays in
    /// place until its instances drain; the cleanup tick retires it.
    pub async fn update_agent_config(&self, update: AgentConfigUpdate) -> Result<AgentConfig> {
        let kind = update
            .kind
            .ok_or_else(|| Error::illegal_state("update is missing the agent kind"))?;
        let type_name = update
            .type_name
            .clone()
            .ok_or_else(|| Error::illegal_state("update is missing the agent type"))?;

        let mut state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.clone());
        let previous = state
            .configs
            .get(&key)
            .and_then(|history| history.values().next_back())
            .cloned()
            .ok_or_else(|| Error::not_found(format!("agent config {kind}:{type_name}")))?;

        if let Some(tools) = &update.tools {
            self.tools.validate(kind, tools)?;
        }

        let config = update.apply_to(&previous);
        state
            .configs
            .get_mut(&key)
            .expect("history exists")
            .insert(config.version, config.clone());
        state
            .pools
            .get_mut(&key)
            .expect("pool exists")
            .insert(config.version, VersionPool::new(config.max_pool_size));
        state.mark_stale(&key);

        info!(config_id = %config.id(), previous = previous.version, "agent config updated");
        self.events.agent_config_update(&config);

        if config.auto_populate_pool && config.max_pool_size > 0 {
            self.populate_locked(&mut state, &config).await?;
        }
        self.emit_pool_change(&state, &key);
        let available = state
            .pools
            .get(&key)
            .and_then(|m| m.get(&config.version))
            .map(VersionPool::available)
            .unwrap_or(0);
        let persisted = self.persist_locked(&state);
        drop(state);

        self.announce_available(kind, &type_name, config.version, available)
            .await;

        persisted?;
        Ok(config)
    }

    /// Hand out a worker of (kind,type). A free instance of the requested
    /// version wins; otherwise one is created while capacity remains.
    pub async fn acquire_agent(
        &self,
        kind: AgentKind,
        type_name: &str,
        version: Option<u32>,
    ) -> Result<(AgentId, Arc<dyn AgentHandle>)> {
        let mut state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        let latest = state
            .latest_version(&key)
            .ok_or_else(|| Error::not_found(format!("agent config {kind}:{type_name}")))?;
        let version = version.unwrap_or(latest);
        let config = state
            .configs
            .get(&key)
            .and_then(|history| history.get(&version))
            .cloned()
            .ok_or_else(|| {
                Error::not_found(AgentConfigId::new(kind, type_name, version).to_string())
            })?;

        // Free instance first, in insertion order.
        let reused = {
            let pool = state
                .pools
                .get_mut(&key)
                .and_then(|m| m.get_mut(&version))
                .ok_or_else(|| {
                    Error::not_found(AgentConfigId::new(kind, type_name, version).to_string())
                })?;
            match pool.free.pop_front() {
                Some(id) => {
                    let slot = pool.live.get_mut(&id).expect("free set member is live");
                    slot.in_use = true;
                    Some((id, slot.handle.clone()))
                }
                None => None,
            }
        };
        if let Some((id, handle)) = reused {
            debug!(agent_id = %id, "agent acquired from pool");
            self.events.agent_acquire(&id);
            self.emit_pool_change(&state, &key);
            return Ok((id, handle));
        }

        let (capacity_left, num) = {
            let pool = state
                .pools
                .get(&key)
                .and_then(|m| m.get(&version))
                .expect("pool checked above");
            (
                pool.max_pool_size == 0 || pool.live.len() < pool.max_pool_size,
                pool.created_count + 1,
            )
        };
        if !capacity_left {
            return Err(Error::pool_exhausted(
                AgentConfigId::new(kind, type_name, version).to_string(),
            ));
        }

        let id = AgentId::new(kind, type_name, num, version);
        // Serial lifecycle callback; a failure leaves no partial pool entry.
        let handle = self.factory.on_create(&config, &id).await?;
        {
            let pool = state
                .pools
                .get_mut(&key)
                .and_then(|m| m.get_mut(&version))
                .expect("pool checked above");
            pool.created_count = num;
            pool.live.insert(
                id.clone(),
                PoolSlot {
                    in_use: true,
                    handle: handle.clone(),
                },
            );
        }

        info!(agent_id = %id, "agent created");
        self.events.agent_create(&id);
        self.events.agent_acquire(&id);
        self.emit_pool_change(&state, &key);
        Ok((id, handle))
    }

    /// Return a worker. Current-version instances go back to the free set;
    /// stale or unpooled instances are destroyed on the spot.
    pub async fn release_agent(&self, agent_id: &AgentId) -> Result<()> {
        let mut state = self.state.lock().await;
        let key: TypeKey = (agent_id.kind, agent_id.type_name.clone());
        let latest = state
            .latest_version(&key)
            .ok_or_else(|| Error::not_found(agent_id.to_string()))?;

        let pool = state
            .pools
            .get_mut(&key)
            .and_then(|m| m.get_mut(&agent_id.version))
            .ok_or_else(|| Error::not_found(agent_id.to_string()))?;
        let in_use = pool.live.get(agent_id).map(|slot| slot.in_use);
        match in_use {
            Some(true) => {}
            // Already released (or never existed): the id is not held.
            _ => return Err(Error::not_found(agent_id.to_string())),
        }

        let pooled_current = agent_id.version == latest && pool.max_pool_size > 0;
        let mut retired = false;
        if pooled_current {
            if let Some(slot) = pool.live.get_mut(agent_id) {
                slot.in_use = false;
            }
            pool.free.push_back(agent_id.clone());
            debug!(agent_id = %agent_id, "agent released to pool");
            self.events.agent_release(agent_id);
        } else if let Some(slot) = pool.live.remove(agent_id) {
            debug!(agent_id = %agent_id, "agent released and destroyed (stale or unpooled)");
            self.events.agent_release(agent_id);
            self.events.agent_destroy(agent_id);
            self.destroy_quietly(agent_id, slot.handle).await;
            retired = self.retire_if_drained(&mut state, &key, agent_id.version);
        }

        state.mark_stale(&key);
        self.emit_pool_change(&state, &key);
        let persisted = if retired {
            self.persist_locked(&state)
        } else {
            Ok(())
        };
        drop(state);

        // Capacity freed at the current version wakes parked runs.
        if agent_id.version == latest {
            self.announce_available(agent_id.kind, &agent_id.type_name, latest, 1)
                .await;
        }
        persisted?;
        Ok(())
    }

    // -- queries ------------------------------------------------------------

    /// Latest config of every (kind,type), ordered.
    pub async fn get_all_agent_configs(&self) -> Vec<AgentConfig> {
        let state = self.state.lock().await;
        let mut keys: Vec<&TypeKey> = state.configs.keys().collect();
        keys.sort();
        keys.iter()
            .filter_map(|key| state.configs[*key].values().next_back().cloned())
            .collect()
    }

    pub async fn get_agent_config(
        &self,
        kind: AgentKind,
        type_name: &str,
        version: Option<u32>,
    ) -> Result<AgentConfig> {
        let state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        let history = state
            .configs
            .get(&key)
            .ok_or_else(|| Error::not_found(format!("agent config {kind}:{type_name}")))?;
        match version {
            Some(v) => history.get(&v).cloned().ok_or_else(|| {
                Error::not_found(AgentConfigId::new(kind, type_name, v).to_string())
            }),
            None => Ok(history.values().next_back().expect("history never empty").clone()),
        }
    }

    pub async fn get_agent_config_version(&self, kind: AgentKind, type_name: &str) -> Result<u32> {
        let state = self.state.lock().await;
        state
            .latest_version(&(kind, type_name.to_string()))
            .ok_or_else(|| Error::not_found(format!("agent config {kind}:{type_name}")))
    }

    pub async fn get_active_agents(&self, filter: AgentFilter) -> Vec<AgentSnapshot> {
        let state = self.state.lock().await;
        let mut agents: Vec<AgentSnapshot> = state
            .pools
            .iter()
            .filter(|((kind, type_name), _)| {
                filter.kind.map_or(true, |k| k == *kind)
                    && filter.type_name.as_deref().map_or(true, |t| t == type_name)
            })
            .flat_map(|(_, versions)| versions.iter())
            .filter(|(version, _)| filter.version.map_or(true, |v| v == **version))
            .flat_map(|(_, pool)| pool.live.iter())
            .filter(|(_, slot)| filter.in_use.map_or(true, |u| u == slot.in_use))
            .map(|(id, slot)| AgentSnapshot {
                agent_id: id.clone(),
                in_use: slot.in_use,
            })
            .collect();
        agents.sort_by(|a, b| a.agent_id.cmp(&b.agent_id));
        agents
    }

    pub async fn get_agent(&self, agent_id: &AgentId) -> Result<AgentSnapshot> {
        let state = self.state.lock().await;
        let key: TypeKey = (agent_id.kind, agent_id.type_name.clone());
        state
            .pools
            .get(&key)
            .and_then(|m| m.get(&agent_id.version))
            .and_then(|pool| pool.live.get(agent_id))
            .map(|slot| AgentSnapshot {
                agent_id: agent_id.clone(),
                in_use: slot.in_use,
            })
            .ok_or_else(|| Error::not_found(agent_id.to_string()))
    }

    /// The live instance handle, for the worker runtime.
    pub async fn get_agent_handle(&self, agent_id: &AgentId) -> Result<Arc<dyn AgentHandle>> {
        let state = self.state.lock().await;
        let key: TypeKey = (agent_id.kind, agent_id.type_name.clone());
        state
            .pools
            .get(&key)
            .and_then(|m| m.get(&agent_id.version))
            .and_then(|pool| pool.live.get(agent_id))
            .map(|slot| slot.handle.clone())
            .ok_or_else(|| Error::not_found(agent_id.to_string()))
    }

    pub async fn get_pool_stats(&self, kind: AgentKind, type_name: &str) -> Result<PoolStats> {
        let state = self.state.lock().await;
        state
            .pool_stats(&(kind, type_name.to_string()))
            .ok_or_else(|| Error::not_found(format!("agent config {kind}:{type_name}")))
    }

    // -- stale-version cleanup ----------------------------------------------

    /// One cleanup pass over the marked set. Destroys idle instances of
    /// stale versions and retires fully-drained version records. Returns
    /// the number of marks still outstanding.
    pub async fn cleanup_pass(&self) -> usize {
        let mut state = self.state.lock().await;
        let marks: Vec<_> = state.marked.iter().cloned().collect();
        let mut retired_any = false;

        for (kind, type_name, version) in marks {
            let key: TypeKey = (kind, type_name.clone());
            let mark = (kind, type_name.clone(), version);
            let Some(latest) = state.latest_version(&key) else {
                state.marked.remove(&mark);
                continue;
            };
            if version == latest {
                state.marked.remove(&mark);
                continue;
            }

            let pool_exists = state
                .pools
                .get(&key)
                .is_some_and(|m| m.contains_key(&version));
            if !pool_exists {
                state.marked.remove(&mark);
                continue;
            }

            let idle: Vec<(AgentId, Arc<dyn AgentHandle>)> = {
                let pool = state
                    .pools
                    .get_mut(&key)
                    .and_then(|m| m.get_mut(&version))
                    .expect("presence checked above");
                let ids: Vec<AgentId> = pool.free.drain(..).collect();
                ids.into_iter()
                    .filter_map(|id| pool.live.remove(&id).map(|slot| (id, slot.handle)))
                    .collect()
            };
            for (id, handle) in idle {
                self.events.agent_destroy(&id);
                self.destroy_quietly(&id, handle).await;
            }

            if self.retire_if_drained(&mut state, &key, version) {
                state.marked.remove(&mark);
                retired_any = true;
            }
            self.emit_pool_change(&state, &key);
        }

        if retired_any {
            if let Err(e) = self.persist_locked(&state) {
                warn!(error = %e, "snapshot rewrite after cleanup failed");
            }
        }
        state.marked.len()
    }

    /// Run `cleanup_pass` on a periodic tick until cancelled.
    pub fn spawn_cleanup(self: Arc<Self>, tick: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = self;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(tick);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        registry.cleanup_pass().await;
                    }
                }
            }
        })
    }

    // -- persistence ---------------------------------------------------------

    /// Replay the workspace snapshot. Configs reappear with their version
    /// history; instances do not (they are ephemeral). Non-latest versions
    /// go straight to the cleanup queue.
    pub async fn restore(&self) -> Result<usize> {
        let Some(workspace) = &self.workspace else {
            return Ok(0);
        };
        let records = workspace.read_snapshot(SNAPSHOT_FILE)?;

        let mut state = self.state.lock().await;
        let mut restored = 0usize;
        for (idx, owned) in records.iter().enumerate() {
            let config: AgentConfig =
                serde_json::from_value(owned.record.clone()).map_err(|e| Error::RestoreFailed {
                    path: SNAPSHOT_FILE.to_string(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            let key: TypeKey = (config.kind, config.type_name.clone());
            state
                .pools
                .entry(key.clone())
                .or_default()
                .insert(config.version, VersionPool::new(config.max_pool_size));
            self.events.agent_config_create(&config);
            state
                .configs
                .entry(key)
                .or_default()
                .insert(config.version, config);
            restored += 1;
        }

        let keys: Vec<TypeKey> = state.configs.keys().cloned().collect();
        for key in &keys {
            state.mark_stale(key);
            self.emit_pool_change(&state, key);
        }
        drop(state);

        for (kind, type_name) in keys {
            self.announce_config_created(kind, &type_name).await;
            let (latest, available) = {
                let state = self.state.lock().await;
                let latest = state.latest_version(&(kind, type_name.clone())).unwrap_or(0);
                let available = state
                    .pools
                    .get(&(kind, type_name.clone()))
                    .and_then(|m| m.get(&latest))
                    .map(VersionPool::available)
                    .unwrap_or(0);
                (latest, available)
            };
            self.announce_available(kind, &type_name, latest, available).await;
        }

        if restored > 0 {
            info!(configs = restored, "agent registry restored from workspace");
        }
        Ok(restored)
    }

    // -- internals -----------------------------------------------------------

    /// Pre-create instances up to `max_pool_size` for a fresh version.
    async fn populate_locked(
        &self,
        state: &mut RegistryState,
        config: &AgentConfig,
    ) -> Result<()> {
        let key: TypeKey = (config.kind, config.type_name.clone());
        let missing = {
            let pool = state
                .pools
                .get(&key)
                .and_then(|m| m.get(&config.version))
                .expect("pool initialized before populate");
            config.max_pool_size.saturating_sub(pool.live.len())
        };

        for _ in 0..missing {
            let num = state
                .pools
                .get(&key)
                .and_then(|m| m.get(&config.version))
                .expect("pool exists")
                .created_count
                + 1;
            let id = AgentId::new(config.kind, config.type_name.clone(), num, config.version);
            let handle = self.factory.on_create(config, &id).await?;
            let pool = state
                .pools
                .get_mut(&key)
                .and_then(|m| m.get_mut(&config.version))
                .expect("pool exists");
            pool.created_count = num;
            pool.live.insert(
                id.clone(),
                PoolSlot {
                    in_use: false,
                    handle,
                },
            );
            pool.free.push_back(id.clone());
            self.events.agent_create(&id);
        }
        Ok(())
    }

    /// Remove a fully-drained stale version record and its config entry.
    /// Returns true when the version was retired.
    fn retire_if_drained(&self, state: &mut RegistryState, key: &TypeKey, version: u32) -> bool {
        if state.latest_version(key) == Some(version) {
            return false;
        }
        let drained = state
            .pools
            .get(key)
            .and_then(|m| m.get(&version))
            .is_some_and(|pool| pool.live.is_empty());
        if !drained {
            return false;
        }
        if let Some(versions) = state.pools.get_mut(key) {
            versions.remove(&version);
        }
        if let Some(history) = state.configs.get_mut(key) {
            history.remove(&version);
        }
        let config_id = AgentConfigId::new(key.0, key.1.clone(), version);
        info!(config_id = %config_id, "stale agent config version retired");
        self.events.agent_config_destroy(&config_id);
        true
    }

    async fn destroy_quietly(&self, agent_id: &AgentId, handle: Arc<dyn AgentHandle>) {
        if let Err(e) = self.factory.on_destroy(agent_id, handle).await {
            warn!(agent_id = %agent_id, error = %e, "agent destroy callback failed");
        }
    }

    fn emit_pool_change(&self, state: &RegistryState, key: &TypeKey) {
        if let Some(stats) = state.pool_stats(key) {
            self.events.pool_change(&stats);
        }
    }

    fn persist_locked(&self, state: &RegistryState) -> Result<()> {
        let Some(workspace) = &self.workspace else {
            return Ok(());
        };
        let mut keys: Vec<&TypeKey> = state.configs.keys().collect();
        keys.sort();
        let mut records = Vec::new();
        for key in keys {
            for config in state.configs[key].values() {
                records.push(serde_json::to_value(config)?);
            }
        }
        workspace.write_snapshot(SNAPSHOT_FILE, SNAPSHOT_OWNER, &records)
    }

    async fn announce_config_created(&self, kind: AgentKind, type_name: &str) {
        if let Some(observer) = self.observer.get() {
            observer.on_agent_config_created(kind, type_name).await;
        }
    }

    async fn announce_available(
        &self,
        kind: AgentKind,
        type_name: &str,
        version: u32,
        count: usize,
    ) {
        if count == 0 {
            return;
        }
        if let Some(observer) = self.observer.get() {
            observer
                .on_agent_available(kind, type_name, version, count)
                .await;
        }
    }
}
