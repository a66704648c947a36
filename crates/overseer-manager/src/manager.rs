//! Task manager: versioned task definitions, run routing, concurrency
//! gating, retries, and history.
//!
//! One async mutex guards all manager state. Every public method checks
//! access first and leaves no side effects on denial. The manager calls the
//! registry (through `AgentAcquirer`) only after its own lock is dropped;
//! lock order across the system is registry before manager.

use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::{Arc, Weak};
use std::time::Duration;

use chrono::{TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use overseer_access::{Permission, ResourceRegistry};
use overseer_core::{AgentId, AgentKind, Error, Result, TaskKind, TaskRunId};
use overseer_workspace::Workspace;

use crate::config::{TaskConfig, TaskConfigSpec, TaskConfigUpdate};
use crate::events::TaskEvents;
use crate::history::{push_bounded, HistoryEntry, TerminalStatus};
use crate::lifecycle::{AgentAcquirer, RunCallbacks, TaskRunner};
use crate::run::{TaskRun, TaskRunStatus};

/// Resource id guarding manager-wide operations.
pub const MANAGER_ROOT_RESOURCE: &str = "task_manager:root";

const SNAPSHOT_FILE: &str = "task_manager.jsonl";
const SNAPSHOT_OWNER: &str = "task_manager";

type TypeKey = (TaskKind, String);

#[derive(Debug, Clone)]
pub struct TaskManagerOptions {
    pub occupancy_timeout: Duration,
    pub max_history_entries: usize,
    pub unlimited_concurrency_cap: usize,
}

impl Default for TaskManagerOptions {
    fn default() -> Self {
        Self {
            occupancy_timeout: Duration::from_secs(30 * 60),
            max_history_entries: 50,
            unlimited_concurrency_cap: 100,
        }
    }
}

/// Options for `get_task_run_history`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct HistoryQuery {
    /// Most recent N entries; None returns everything.
    pub limit: Option<usize>,
}

/// Run counts per (kind,type), by status.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct TaskPoolStats {
    pub kind: String,
    pub type_name: String,
    pub total: usize,
    pub created: usize,
    pub scheduled: usize,
    pub executing: usize,
    pub waiting: usize,
    pub completed: usize,
    pub failed: usize,
    pub stopped: usize,
}

#[derive(Default)]
struct ManagerState {
    configs: HashMap<TypeKey, BTreeMap<u32, TaskConfig>>,
    runs: HashMap<TaskRunId, TaskRun>,
    /// Next run number per (kind,type,version).
    run_counters: HashMap<(TaskKind, String, u32), u32>,
    /// Scheduled-start queue: (run, acting agent the dispatch is checked
    /// against). Drained one run per scheduler tick.
    scheduled: VecDeque<(TaskRunId, String)>,
    /// WAITING runs, oldest first.
    waiting: VecDeque<TaskRunId>,
    /// Agent (kind,type) pairs announced by the registry.
    registered_types: HashSet<(AgentKind, String)>,
}

impl ManagerState {
    fn latest_config(&self, key: &TypeKey) -> Option<&TaskConfig> {
        self.configs.get(key).and_then(|h| h.values().next_back())
    }

    fn count_status(&self, key: &TypeKey, version: u32, status: TaskRunStatus) -> usize {
        self.runs
            .values()
            .filter(|r| {
                r.id.kind == key.0
                    && r.id.type_name == key.1
                    && r.id.version == version
                    && r.status == status
            })
            .count()
    }

    fn pool_stats(&self, key: &TypeKey) -> TaskPoolStats {
        let mut stats = TaskPoolStats {
            kind: key.0.to_string(),
            type_name: key.1.clone(),
            total: 0,
            created: 0,
            scheduled: 0,
            executing: 0,
            waiting: 0,
            completed: 0,
            failed: 0,
            stopped: 0,
        };
        for run in self
            .runs
            .values()
            .filter(|r| r.id.kind == key.0 && r.id.type_name == key.1)
        {
            stats.total += 1;
            match run.status {
                TaskRunStatus::Created => stats.created += 1,
                TaskRunStatus::Scheduled => stats.scheduled += 1,
                TaskRunStatus::Executing => stats.executing += 1,
                TaskRunStatus::Waiting => stats.waiting += 1,
                TaskRunStatus::Completed => stats.completed += 1,
                TaskRunStatus::Failed => stats.failed += 1,
                TaskRunStatus::Stopped => stats.stopped += 1,
            }
        }
        stats
    }
}

pub struct TaskManager {
    state: Mutex<ManagerState>,
    acl: Arc<ResourceRegistry>,
    acquirer: Arc<dyn AgentAcquirer>,
    runner: Arc<dyn TaskRunner>,
    events: TaskEvents,
    workspace: Option<Arc<Workspace>>,
    options: TaskManagerOptions,
    weak: Weak<TaskManager>,
}

impl TaskManager {
    pub fn new(
        acl: Arc<ResourceRegistry>,
        acquirer: Arc<dyn AgentAcquirer>,
        runner: Arc<dyn TaskRunner>,
        events: TaskEvents,
        workspace: Option<Arc<Workspace>>,
        options: TaskManagerOptions,
    ) -> Arc<Self> {
        if !acl.contains(MANAGER_ROOT_RESOURCE) {
            let _ = acl.register(MANAGER_ROOT_RESOURCE, SNAPSHOT_OWNER, Permission::FULL);
        }
        Arc::new_cyclic(|weak| Self {
            state: Mutex::new(ManagerState::default()),
            acl,
            acquirer,
            runner,
            events,
            workspace,
            options,
            weak: weak.clone(),
        })
    }

    pub fn acl(&self) -> &Arc<ResourceRegistry> {
        &self.acl
    }

    /// Grant an acting identity FULL on the manager root. Root FULL also
    /// passes every per-resource check (admin override).
    pub fn register_admin_agent(&self, agent_id: &str) -> Result<()> {
        self.acl
            .grant(MANAGER_ROOT_RESOURCE, agent_id, Permission::FULL)
    }

    /// Declared by the registry when a worker (kind,type) starts existing.
    pub async fn register_agent_type(&self, kind: AgentKind, type_name: &str) {
        let mut state = self.state.lock().await;
        if state
            .registered_types
            .insert((kind, type_name.to_string()))
        {
            info!(agent_kind = %kind, agent_type = type_name, "agent type registered");
            self.events.agent_type_register(kind, type_name);
        }
    }

    // -- task configs --------------------------------------------------------

    pub async fn create_task_config(
        &self,
        spec: TaskConfigSpec,
        owner_agent_id: &str,
        acting_agent: &str,
    ) -> Result<TaskConfig> {
        self.check(MANAGER_ROOT_RESOURCE, acting_agent, Permission::WRITE)?;

        let mut state = self.state.lock().await;
        let key: TypeKey = (spec.kind, spec.type_name.clone());
        if state.configs.contains_key(&key) {
            return Err(Error::duplicate_type(key.0.to_string(), key.1));
        }
        if !state
            .registered_types
            .contains(&(spec.agent_kind, spec.agent_type.clone()))
        {
            return Err(Error::unknown_agent_type(
                spec.agent_kind.to_string(),
                spec.agent_type,
            ));
        }

        let config = spec.into_initial(owner_agent_id.to_string());
        self.acl.register(
            config.id().to_string(),
            owner_agent_id,
            Permission::READ_EXECUTE,
        )?;
        state
            .configs
            .entry(key.clone())
            .or_default()
            .insert(config.version, config.clone());

        info!(config_id = %config.id(), owner = owner_agent_id, "task config created");
        self.events.task_config_create(&config);
        self.events.pool_change(&state.pool_stats(&key));
        let persisted = self.persist_locked(&state);
        drop(state);

        persisted?;
        Ok(config)
    }

    pub async fn update_task_config(
        &self,
        update: TaskConfigUpdate,
        acting_agent: &str,
    ) -> Result<TaskConfig> {
        let kind = update
            .kind
            .ok_or_else(|| Error::illegal_state("update is missing the task kind"))?;
        let type_name = update
            .type_name
            .clone()
            .ok_or_else(|| Error::illegal_state("update is missing the task type"))?;

        let mut state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.clone());
        let previous = state
            .latest_config(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("task config {kind}:{type_name}")))?;
        self.check(
            &previous.id().to_string(),
            acting_agent,
            Permission::READ_WRITE,
        )?;

        let config = update.apply_to(&previous);
        self.acl.register(
            config.id().to_string(),
            config.owner_agent_id.clone(),
            Permission::READ_EXECUTE,
        )?;
        state
            .configs
            .get_mut(&key)
            .expect("config history exists")
            .insert(config.version, config.clone());

        info!(config_id = %config.id(), previous = previous.version, "task config updated");
        self.events.task_config_update(&config);
        let persisted = self.persist_locked(&state);
        drop(state);

        persisted?;
        Ok(config)
    }

    /// Destroy a definition and all its versions. Refused while any run of
    /// the type is still active; terminal runs are swept along with it.
    pub async fn destroy_task_config(
        &self,
        kind: TaskKind,
        type_name: &str,
        acting_agent: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        let versions: Vec<u32> = state
            .configs
            .get(&key)
            .map(|h| h.keys().copied().collect())
            .ok_or_else(|| Error::not_found(format!("task config {kind}:{type_name}")))?;

        for version in &versions {
            let config_id =
                overseer_core::TaskConfigId::new(kind, type_name.to_string(), *version);
            self.check(&config_id.to_string(), acting_agent, Permission::READ_WRITE)?;
        }

        let active = state
            .runs
            .values()
            .any(|r| r.id.kind == kind && r.id.type_name == type_name && !r.status.is_terminal());
        if active {
            return Err(Error::illegal_state(format!(
                "task config {kind}:{type_name} still has active runs"
            )));
        }

        // Sweep terminal runs of the type, then the versions themselves.
        let dead_runs: Vec<TaskRunId> = state
            .runs
            .keys()
            .filter(|id| id.kind == kind && id.type_name == type_name)
            .cloned()
            .collect();
        for run_id in dead_runs {
            state.runs.remove(&run_id);
            let _ = self.acl.remove(&run_id.to_string());
            self.events.task_run_destroy(&run_id);
        }
        state.configs.remove(&key);
        state
            .run_counters
            .retain(|(k, t, _), _| !(*k == kind && t == type_name));
        for version in versions {
            let config_id = overseer_core::TaskConfigId::new(kind, type_name.to_string(), version);
            let _ = self.acl.remove(&config_id.to_string());
            self.events.task_config_destroy(&config_id);
        }

        info!(task_kind = %kind, task_type = type_name, "task config destroyed");
        self.events.pool_change(&state.pool_stats(&key));
        let persisted = self.persist_locked(&state);
        drop(state);

        persisted?;
        Ok(())
    }

    // -- task runs -----------------------------------------------------------

    /// Instantiate a run of the current config version. The acting agent
    /// gets FULL on the run. `run_immediately` configs go straight to the
    /// scheduled-start queue.
    pub async fn create_task_run(
        &self,
        kind: TaskKind,
        type_name: &str,
        input: Option<String>,
        acting_agent: &str,
    ) -> Result<TaskRun> {
        let mut state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        let config = state
            .latest_config(&key)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("task config {kind}:{type_name}")))?;
        self.check(
            &config.id().to_string(),
            acting_agent,
            Permission::READ_EXECUTE,
        )?;

        let counter = state
            .run_counters
            .entry((kind, type_name.to_string(), config.version))
            .or_insert(0);
        *counter += 1;
        let run_id = TaskRunId::new(kind, type_name.to_string(), *counter, config.version);

        self.acl
            .register(run_id.to_string(), acting_agent, Permission::FULL)?;
        let input = input.unwrap_or_else(|| config.input.clone());
        let run = TaskRun::new(run_id.clone(), config.clone(), input, acting_agent.to_string());
        state.runs.insert(run_id.clone(), run);

        info!(run_id = %run_id, acting = acting_agent, "task run created");
        {
            let run = &state.runs[&run_id];
            self.events.task_run_create(run);
        }
        self.events.pool_change(&state.pool_stats(&key));

        if config.run_immediately {
            self.enqueue_locked(&mut state, &run_id, acting_agent);
        }
        Ok(state.runs[&run_id].clone())
    }

    /// Queue a run for dispatch, subject to the type's concurrency mode.
    /// At the limit the request is silently ignored and the run keeps its
    /// prior status.
    pub async fn schedule_start_task_run(
        &self,
        run_id: &TaskRunId,
        acting_agent: &str,
    ) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::FULL)?;

        match run.status {
            TaskRunStatus::Scheduled => return Ok(()),
            TaskRunStatus::Executing => {
                return Err(Error::illegal_state(format!(
                    "task run {run_id} is already executing"
                )))
            }
            status if status.is_terminal() => {
                return Err(Error::illegal_state(format!(
                    "task run {run_id} is {status:?} and cannot be scheduled"
                )))
            }
            _ => {}
        }

        let pool_size = run
            .config
            .concurrency_mode
            .pool_size(self.options.unlimited_concurrency_cap);
        let key: TypeKey = (run_id.kind, run_id.type_name.clone());
        let queued = state.count_status(&key, run_id.version, TaskRunStatus::Scheduled);
        if queued >= pool_size {
            debug!(run_id = %run_id, "schedule request ignored, queue at concurrency limit");
            return Ok(());
        }

        self.enqueue_locked(&mut state, run_id, acting_agent);
        Ok(())
    }

    /// Stop a run. Cooperative: an occupied worker is released but not
    /// interrupted; its eventual report is ignored. No-op when already
    /// stopped.
    pub async fn stop_task_run(&self, run_id: &TaskRunId, acting_agent: &str) -> Result<()> {
        let release = {
            let mut state = self.state.lock().await;
            if !state.runs.contains_key(run_id) {
                return Err(Error::not_found(run_id.to_string()));
            }
            self.check(&run_id.to_string(), acting_agent, Permission::FULL)?;

            let run = state.runs.get_mut(run_id).expect("presence checked");
            if run.status == TaskRunStatus::Stopped {
                return Ok(());
            }

            let mut release = None;
            if let Some(agent_id) = run.occupied_by.take() {
                let now = Utc::now();
                let exec_ms = elapsed_ms(run.occupied_since.take(), now);
                let entry = HistoryEntry {
                    timestamp: now,
                    terminal_status: TerminalStatus::Stopped,
                    output: None,
                    error: None,
                    run_number: run.completed_runs + 1,
                    retry_attempt: run.current_retry_attempt,
                    agent_id: agent_id.clone(),
                    execution_time_ms: exec_ms,
                };
                push_bounded(&mut run.history, entry.clone(), self.options.max_history_entries);
                self.events.history_entry_create(run_id, &entry);
                self.events.assignment_history_entry(run_id, &entry);
                self.events.assignment_unassign(run_id, &agent_id);
                release = Some(agent_id);
            }

            run.status = TaskRunStatus::Stopped;
            run.next_run_at = None;
            info!(run_id = %run_id, "task run stopped");
            self.events.task_run_update(run);
            let key: TypeKey = (run_id.kind, run_id.type_name.clone());
            self.events.pool_change(&state.pool_stats(&key));

            let target = run_id.clone();
            state.scheduled.retain(|(id, _)| *id != target);
            state.waiting.retain(|id| *id != target);
            release
        };

        if let Some(agent_id) = release {
            self.release_quietly(&agent_id).await;
        }
        Ok(())
    }

    /// Remove a run outright. Refused while executing.
    pub async fn destroy_task_run(&self, run_id: &TaskRunId, acting_agent: &str) -> Result<()> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::WRITE)?;
        if run.status == TaskRunStatus::Executing {
            return Err(Error::illegal_state(format!(
                "task run {run_id} is executing; stop it first"
            )));
        }

        state.runs.remove(run_id);
        state.scheduled.retain(|(id, _)| id != run_id);
        state.waiting.retain(|id| id != run_id);
        self.acl.remove(&run_id.to_string())?;

        info!(run_id = %run_id, "task run destroyed");
        self.events.task_run_destroy(run_id);
        let key: TypeKey = (run_id.kind, run_id.type_name.clone());
        self.events.pool_change(&state.pool_stats(&key));
        Ok(())
    }

    /// Replace the input of a run that is not currently executing.
    pub async fn update_task_run(
        &self,
        run_id: &TaskRunId,
        input: String,
        acting_agent: &str,
    ) -> Result<TaskRun> {
        let mut state = self.state.lock().await;
        let run = state
            .runs
            .get_mut(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::WRITE)?;
        if run.status == TaskRunStatus::Executing {
            return Err(Error::illegal_state(format!(
                "task run {run_id} is executing; its input is pinned"
            )));
        }
        run.input = input;
        self.events.task_run_update(run);
        Ok(run.clone())
    }

    // -- queries -------------------------------------------------------------

    /// Read a task definition. Permission is validated against the latest
    /// version's config id even when an older version is requested; old
    /// versions carry no access-control rows of their own.
    pub async fn get_task_config(
        &self,
        kind: TaskKind,
        type_name: &str,
        version: Option<u32>,
        acting_agent: &str,
    ) -> Result<TaskConfig> {
        let state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        let latest = state
            .latest_config(&key)
            .ok_or_else(|| Error::not_found(format!("task config {kind}:{type_name}")))?;
        self.check(&latest.id().to_string(), acting_agent, Permission::READ)?;
        match version {
            None => Ok(latest.clone()),
            Some(v) => state
                .configs
                .get(&key)
                .and_then(|h| h.get(&v))
                .cloned()
                .ok_or_else(|| {
                    Error::not_found(
                        overseer_core::TaskConfigId::new(kind, type_name.to_string(), v)
                            .to_string(),
                    )
                }),
        }
    }

    /// Every run the acting agent may read, ordered by id.
    pub async fn get_all_task_runs(&self, acting_agent: &str) -> Vec<TaskRun> {
        let state = self.state.lock().await;
        let mut runs: Vec<TaskRun> = state
            .runs
            .values()
            .filter(|run| {
                self.check(&run.id.to_string(), acting_agent, Permission::READ)
                    .is_ok()
            })
            .cloned()
            .collect();
        runs.sort_by(|a, b| a.id.cmp(&b.id));
        runs
    }

    pub async fn get_task_run(&self, run_id: &TaskRunId, acting_agent: &str) -> Result<TaskRun> {
        let state = self.state.lock().await;
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::READ)?;
        Ok(run.clone())
    }

    pub async fn get_task_run_history(
        &self,
        run_id: &TaskRunId,
        query: HistoryQuery,
        acting_agent: &str,
    ) -> Result<Vec<HistoryEntry>> {
        let state = self.state.lock().await;
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::READ)?;
        let entries: Vec<HistoryEntry> = run.history.iter().cloned().collect();
        let keep = query.limit.unwrap_or(entries.len()).min(entries.len());
        Ok(entries[entries.len() - keep..].to_vec())
    }

    pub async fn get_pool_stats(
        &self,
        kind: TaskKind,
        type_name: &str,
        acting_agent: &str,
    ) -> Result<TaskPoolStats> {
        self.check(MANAGER_ROOT_RESOURCE, acting_agent, Permission::READ)?;
        let state = self.state.lock().await;
        let key: TypeKey = (kind, type_name.to_string());
        if !state.configs.contains_key(&key) {
            return Err(Error::not_found(format!("task config {kind}:{type_name}")));
        }
        Ok(state.pool_stats(&key))
    }

    pub async fn is_task_run_occupied(
        &self,
        run_id: &TaskRunId,
        acting_agent: &str,
    ) -> Result<bool> {
        let state = self.state.lock().await;
        let run = state
            .runs
            .get(run_id)
            .ok_or_else(|| Error::not_found(run_id.to_string()))?;
        self.check(&run_id.to_string(), acting_agent, Permission::READ)?;
        Ok(run.is_occupied())
    }

    // -- registry-driven dispatch --------------------------------------------

    /// The registry freed (or created) capacity for an agent (kind,type).
    /// Move up to `count` matching WAITING runs into the scheduled queue,
    /// oldest first. Runs parked on a timer keep waiting for it.
    pub async fn agent_available(
        &self,
        kind: AgentKind,
        type_name: &str,
        _version: u32,
        count: usize,
    ) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut moved = 0usize;
        let mut still_waiting = VecDeque::new();

        while let Some(run_id) = state.waiting.pop_front() {
            if moved >= count {
                still_waiting.push_back(run_id);
                continue;
            }
            let eligible = match state.runs.get(&run_id) {
                Some(run) if run.status == TaskRunStatus::Waiting => {
                    run.config.agent_kind == kind
                        && run.config.agent_type == type_name
                        && run.next_run_at.map_or(true, |due| due <= now)
                }
                Some(_) => continue,
                None => continue,
            };
            if eligible {
                let owner = state.runs[&run_id].owner.clone();
                self.mark_scheduled_locked(&mut state, &run_id, &owner);
                moved += 1;
            } else {
                still_waiting.push_back(run_id);
            }
        }
        state.waiting = still_waiting;
        if moved > 0 {
            debug!(agent_kind = %kind, agent_type = type_name, moved, "waiting runs scheduled on availability");
        }
    }

    // -- scheduler -----------------------------------------------------------

    /// One scheduler tick: wake timer-due WAITING runs, then dispatch one
    /// run off the scheduled-start queue.
    pub async fn scheduler_pass(&self) {
        self.wake_due_runs().await;
        self.dispatch_next().await;
    }

    async fn wake_due_runs(&self) {
        let mut state = self.state.lock().await;
        let now = Utc::now();
        let mut still_waiting = VecDeque::new();
        let waiting = std::mem::take(&mut state.waiting);
        for run_id in waiting {
            let due = match state.runs.get(&run_id) {
                Some(run) if run.status == TaskRunStatus::Waiting => {
                    run.next_run_at.is_some_and(|due| due <= now)
                }
                _ => continue,
            };
            if due {
                let owner = state.runs[&run_id].owner.clone();
                self.mark_scheduled_locked(&mut state, &run_id, &owner);
            } else {
                still_waiting.push_back(run_id);
            }
        }
        state.waiting = still_waiting;
    }

    async fn dispatch_next(&self) {
        let dispatched = {
            let mut state = self.state.lock().await;
            let Some((run_id, acting)) = state.scheduled.pop_front() else {
                return;
            };
            let Some((status, pool_size)) = state.runs.get(&run_id).map(|run| {
                (
                    run.status,
                    run.config
                        .concurrency_mode
                        .pool_size(self.options.unlimited_concurrency_cap),
                )
            }) else {
                return;
            };
            if status != TaskRunStatus::Scheduled {
                return;
            }

            if let Err(e) = self.check(&run_id.to_string(), &acting, Permission::FULL) {
                warn!(run_id = %run_id, acting, error = %e, "dispatch refused, run returned to created");
                if let Some(run) = state.runs.get_mut(&run_id) {
                    run.status = TaskRunStatus::Created;
                    self.events.task_run_update(run);
                }
                return;
            }

            let key: TypeKey = (run_id.kind, run_id.type_name.clone());
            let executing = state.count_status(&key, run_id.version, TaskRunStatus::Executing);
            if executing >= pool_size {
                let run = state.runs.get_mut(&run_id).expect("presence checked");
                run.status = TaskRunStatus::Waiting;
                run.next_run_at = None;
                debug!(run_id = %run_id, "concurrency limit reached, run parked");
                self.events.task_run_update(run);
                state.waiting.push_back(run_id);
                return;
            }

            let now = Utc::now();
            let run = state.runs.get_mut(&run_id).expect("presence checked");
            run.status = TaskRunStatus::Executing;
            run.last_run_at = Some(now);
            run.next_run_at = if run.config.interval_ms > 0 && !run.repeats_exhausted() {
                Some(now + TimeDelta::milliseconds(run.config.interval_ms as i64))
            } else {
                None
            };
            debug!(run_id = %run_id, "run dispatched");
            self.events.task_run_update(run);
            run.clone()
        };

        // Hand off to the worker runtime outside every lock. Failures leave
        // the run parked for the next availability event.
        let Some(manager) = self.weak.upgrade() else {
            return;
        };
        let callbacks = RunCallbacks::new(manager);
        let runner = Arc::clone(&self.runner);
        let run_id = dispatched.id.clone();
        tokio::spawn(async move {
            if let Err(e) = runner.on_task_start(dispatched, callbacks.clone()).await {
                warn!(run_id = %run_id, error = %e, "task start failed, parking run");
                callbacks.on_awaiting_agent_acquired(&run_id).await;
            }
        });
    }

    // -- runner callbacks ----------------------------------------------------

    pub(crate) async fn handle_awaiting_agent(&self, run_id: &TaskRunId) {
        let mut state = self.state.lock().await;
        let Some(run) = state.runs.get_mut(run_id) else {
            return;
        };
        if run.status != TaskRunStatus::Executing || run.is_occupied() {
            return;
        }
        run.status = TaskRunStatus::Waiting;
        run.next_run_at = None;
        debug!(run_id = %run_id, "no worker available, run parked");
        self.events.task_run_update(run);
        state.waiting.push_back(run_id.clone());
    }

    pub(crate) async fn handle_agent_acquired(
        &self,
        run_id: &TaskRunId,
        agent_id: &AgentId,
    ) -> Result<()> {
        let epoch = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.get_mut(run_id) else {
                return Ok(());
            };
            if run.status != TaskRunStatus::Executing {
                debug!(run_id = %run_id, "late acquisition report ignored");
                return Ok(());
            }
            if run.is_occupied() {
                return Err(Error::illegal_state(format!(
                    "task run {run_id} is already occupied"
                )));
            }
            run.occupied_by = Some(agent_id.clone());
            run.occupied_since = Some(Utc::now());
            run.occupancy_epoch += 1;
            self.acl
                .grant(&run_id.to_string(), agent_id.to_string(), Permission::FULL)?;
            debug!(run_id = %run_id, agent_id = %agent_id, "run occupied");
            self.events.assignment_assign(run_id, agent_id);
            self.events.task_run_update(run);
            run.occupancy_epoch
        };

        // One-shot guard against workers that never report back.
        if let Some(manager) = self.weak.upgrade() {
            let run_id = run_id.clone();
            let agent_id = agent_id.clone();
            let timeout = self.options.occupancy_timeout;
            tokio::spawn(async move {
                tokio::time::sleep(timeout).await;
                manager.force_release_occupancy(&run_id, &agent_id, epoch).await;
            });
        }
        Ok(())
    }

    pub(crate) async fn handle_agent_complete(
        &self,
        output: String,
        run_id: &TaskRunId,
        agent_id: &AgentId,
    ) -> Result<()> {
        let release = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.get_mut(run_id) else {
                return Ok(());
            };
            if run.status != TaskRunStatus::Executing
                || run.occupied_by.as_ref() != Some(agent_id)
            {
                debug!(run_id = %run_id, agent_id = %agent_id, "late completion report ignored");
                return Ok(());
            }

            let now = Utc::now();
            run.completed_runs += 1;
            let entry = HistoryEntry {
                timestamp: now,
                terminal_status: TerminalStatus::Completed,
                output: Some(output),
                error: None,
                run_number: run.completed_runs,
                retry_attempt: run.current_retry_attempt,
                agent_id: agent_id.clone(),
                execution_time_ms: elapsed_ms(run.occupied_since, now),
            };
            push_bounded(&mut run.history, entry.clone(), self.options.max_history_entries);
            run.current_retry_attempt = 0;
            run.occupied_by = None;
            run.occupied_since = None;

            if run.repeats_exhausted() || run.config.interval_ms == 0 {
                run.status = TaskRunStatus::Completed;
                run.next_run_at = None;
                info!(run_id = %run_id, completed_runs = run.completed_runs, "task run completed");
            } else {
                // Interval task: park until the next period.
                run.status = TaskRunStatus::Waiting;
            }

            self.events.history_entry_create(run_id, &entry);
            self.events.assignment_history_entry(run_id, &entry);
            self.events.assignment_unassign(run_id, agent_id);
            self.events.task_run_update(run);
            let requeue = run.status == TaskRunStatus::Waiting;
            let key: TypeKey = (run_id.kind, run_id.type_name.clone());
            self.events.pool_change(&state.pool_stats(&key));
            if requeue {
                state.waiting.push_back(run_id.clone());
            }
            agent_id.clone()
        };

        self.release_quietly(&release).await;
        Ok(())
    }

    pub(crate) async fn handle_agent_error(
        &self,
        error: String,
        run_id: &TaskRunId,
        agent_id: &AgentId,
    ) -> Result<()> {
        let release = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.get_mut(run_id) else {
                return Ok(());
            };
            if run.status != TaskRunStatus::Executing
                || run.occupied_by.as_ref() != Some(agent_id)
            {
                debug!(run_id = %run_id, agent_id = %agent_id, "late failure report ignored");
                return Ok(());
            }

            let now = Utc::now();
            run.error_count += 1;
            run.completed_runs += 1;
            let entry = HistoryEntry {
                timestamp: now,
                terminal_status: TerminalStatus::Failed,
                output: None,
                error: Some(error),
                run_number: run.completed_runs,
                retry_attempt: run.current_retry_attempt,
                agent_id: agent_id.clone(),
                execution_time_ms: elapsed_ms(run.occupied_since, now),
            };
            push_bounded(&mut run.history, entry.clone(), self.options.max_history_entries);
            run.occupied_by = None;
            run.occupied_since = None;

            let can_retry = run
                .config
                .max_retries
                .is_some_and(|max| run.current_retry_attempt < max);
            if can_retry {
                run.current_retry_attempt += 1;
                run.status = TaskRunStatus::Waiting;
                let delay = run.config.retry_delay_ms.unwrap_or(0);
                run.next_run_at = Some(now + TimeDelta::milliseconds(delay as i64));
                debug!(run_id = %run_id, attempt = run.current_retry_attempt, "attempt failed, retry scheduled");
            } else {
                run.status = TaskRunStatus::Failed;
                run.next_run_at = None;
                warn!(run_id = %run_id, errors = run.error_count, "task run failed, retries exhausted");
            }

            self.events.history_entry_create(run_id, &entry);
            self.events.assignment_history_entry(run_id, &entry);
            self.events.assignment_unassign(run_id, agent_id);
            self.events.task_run_update(run);
            let requeue = run.status == TaskRunStatus::Waiting;
            let key: TypeKey = (run_id.kind, run_id.type_name.clone());
            self.events.pool_change(&state.pool_stats(&key));
            if requeue {
                state.waiting.push_back(run_id.clone());
            }
            agent_id.clone()
        };

        self.release_quietly(&release).await;
        Ok(())
    }

    /// Occupancy-timeout one-shot. Only fires for the occupancy it was armed
    /// for; later reports from the worker are ignored once this runs.
    pub(crate) async fn force_release_occupancy(
        &self,
        run_id: &TaskRunId,
        agent_id: &AgentId,
        epoch: u64,
    ) {
        let release = {
            let mut state = self.state.lock().await;
            let Some(run) = state.runs.get_mut(run_id) else {
                return;
            };
            if run.status != TaskRunStatus::Executing
                || !run.is_occupied()
                || run.occupancy_epoch != epoch
            {
                return;
            }
            warn!(run_id = %run_id, agent_id = %agent_id, "occupancy timeout, force releasing");
            run.occupied_by = None;
            run.occupied_since = None;
            run.status = TaskRunStatus::Waiting;
            run.next_run_at = None;
            self.events.assignment_unassign(run_id, agent_id);
            self.events.task_run_update(run);
            state.waiting.push_back(run_id.clone());
            agent_id.clone()
        };
        // The worker is assumed to tolerate the eventual double release.
        self.release_quietly(&release).await;
    }

    // -- persistence ---------------------------------------------------------

    /// Replay the workspace snapshot: configs reappear, runs do not.
    pub async fn restore(&self) -> Result<usize> {
        let Some(workspace) = &self.workspace else {
            return Ok(0);
        };
        let records = workspace.read_snapshot(SNAPSHOT_FILE)?;

        let mut state = self.state.lock().await;
        let mut restored = 0usize;
        for (idx, owned) in records.iter().enumerate() {
            let config: TaskConfig =
                serde_json::from_value(owned.record.clone()).map_err(|e| Error::RestoreFailed {
                    path: SNAPSHOT_FILE.to_string(),
                    line: idx + 1,
                    message: e.to_string(),
                })?;
            if !self.acl.contains(&config.id().to_string()) {
                self.acl.register(
                    config.id().to_string(),
                    config.owner_agent_id.clone(),
                    Permission::READ_EXECUTE,
                )?;
            }
            self.events.task_config_create(&config);
            let key: TypeKey = (config.kind, config.type_name.clone());
            state
                .configs
                .entry(key)
                .or_default()
                .insert(config.version, config);
            restored += 1;
        }
        if restored > 0 {
            info!(configs = restored, "task manager restored from workspace");
        }
        Ok(restored)
    }

    // -- internals -----------------------------------------------------------

    /// Per-resource check with the admin override: FULL on the manager root
    /// passes everything.
    fn check(&self, resource: &str, acting: &str, required: Permission) -> Result<()> {
        if resource != MANAGER_ROOT_RESOURCE
            && self.acl.has(MANAGER_ROOT_RESOURCE, acting, Permission::FULL)
        {
            return Ok(());
        }
        self.acl.check(resource, acting, required)
    }

    fn mark_scheduled_locked(&self, state: &mut ManagerState, run_id: &TaskRunId, acting: &str) {
        let Some(run) = state.runs.get_mut(run_id) else {
            return;
        };
        run.status = TaskRunStatus::Scheduled;
        self.events.task_run_update(run);
        state
            .scheduled
            .push_back((run_id.clone(), acting.to_string()));
    }

    fn enqueue_locked(&self, state: &mut ManagerState, run_id: &TaskRunId, acting: &str) {
        self.mark_scheduled_locked(state, run_id, acting);
        debug!(run_id = %run_id, "run queued for start");
    }

    async fn release_quietly(&self, agent_id: &AgentId) {
        if let Err(e) = self.acquirer.release_agent(agent_id).await {
            warn!(agent_id = %agent_id, error = %e, "agent release failed");
        }
    }

    fn persist_locked(&self, state: &ManagerState) -> Result<()> {
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
}

fn elapsed_ms(since: Option<chrono::DateTime<Utc>>, now: chrono::DateTime<Utc>) -> u64 {
    since
        .map(|t| (now - t).num_milliseconds().max(0) as u64)
        .unwrap_or(0)
}
