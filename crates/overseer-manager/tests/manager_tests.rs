//! Manager behavior with a scripted worker runtime: dispatch, concurrency,
//! retries, occupancy, access control, and restoration.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;

use overseer_access::ResourceRegistry;
use overseer_core::{AgentId, AgentKind, Error, TaskKind, TaskRunId};
use overseer_manager::{
    AgentAcquirer, ConcurrencyMode, HistoryQuery, RunCallbacks, TaskConfigSpec, TaskConfigUpdate,
    TaskEvents, TaskManager, TaskManagerOptions, TaskRun, TaskRunStatus, TaskRunner,
    TerminalStatus,
};
use overseer_workspace::{read_log, EventLog, Workspace};

const SUPERVISOR: &str = "supervisor:main[1]:v1";

/// What the scripted runner should do with the next dispatched attempt.
#[derive(Clone)]
enum Outcome {
    Complete(String),
    Fail(String),
    /// Acquire and report occupancy, then wait for the test to finish it.
    Hold,
    /// Acquire nothing at all.
    NoAgent,
    /// Acquire and never report back (occupancy-timeout fodder).
    Vanish,
}

struct MockAcquirer {
    counter: AtomicU32,
    released: Mutex<Vec<AgentId>>,
    manager: Mutex<Option<Weak<TaskManager>>>,
}

impl MockAcquirer {
    fn new() -> Self {
        Self {
            counter: AtomicU32::new(0),
            released: Mutex::new(Vec::new()),
            manager: Mutex::new(None),
        }
    }

    fn bind(&self, manager: &Arc<TaskManager>) {
        *self.manager.lock().unwrap() = Some(Arc::downgrade(manager));
    }

    fn released(&self) -> Vec<AgentId> {
        self.released.lock().unwrap().clone()
    }
}

#[async_trait]
impl AgentAcquirer for MockAcquirer {
    async fn acquire_agent(
        &self,
        kind: AgentKind,
        type_name: &str,
        _version: Option<u32>,
    ) -> overseer_core::Result<AgentId> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AgentId::new(kind, type_name, n, 1))
    }

    async fn release_agent(&self, agent_id: &AgentId) -> overseer_core::Result<()> {
        self.released.lock().unwrap().push(agent_id.clone());
        // Emulate the registry's availability announcement on release.
        let manager = self.manager.lock().unwrap().clone();
        if let Some(manager) = manager.and_then(|w| w.upgrade()) {
            manager
                .agent_available(agent_id.kind, &agent_id.type_name, agent_id.version, 1)
                .await;
        }
        Ok(())
    }
}

struct ScriptedRunner {
    acquirer: Arc<MockAcquirer>,
    outcomes: Mutex<VecDeque<Outcome>>,
    held: Mutex<Vec<(TaskRunId, AgentId, RunCallbacks)>>,
}

impl ScriptedRunner {
    fn new(acquirer: Arc<MockAcquirer>) -> Self {
        Self {
            acquirer,
            outcomes: Mutex::new(VecDeque::new()),
            held: Mutex::new(Vec::new()),
        }
    }

    fn script(&self, outcomes: impl IntoIterator<Item = Outcome>) {
        self.outcomes.lock().unwrap().extend(outcomes);
    }

    fn take_held(&self) -> Vec<(TaskRunId, AgentId, RunCallbacks)> {
        std::mem::take(&mut self.held.lock().unwrap())
    }
}

#[async_trait]
impl TaskRunner for ScriptedRunner {
    async fn on_task_start(
        &self,
        run: TaskRun,
        callbacks: RunCallbacks,
    ) -> overseer_core::Result<()> {
        let outcome = self
            .outcomes
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Outcome::Complete("ok".into()));

        if matches!(outcome, Outcome::NoAgent) {
            callbacks.on_awaiting_agent_acquired(&run.id).await;
            return Ok(());
        }

        let agent_id = self
            .acquirer
            .acquire_agent(run.config.agent_kind, &run.config.agent_type, None)
            .await?;
        callbacks.on_agent_acquired(&run.id, &agent_id).await?;

        match outcome {
            Outcome::Complete(output) => {
                callbacks.on_agent_complete(output, &run.id, &agent_id).await?;
            }
            Outcome::Fail(error) => {
                callbacks.on_agent_error(error, &run.id, &agent_id).await?;
            }
            Outcome::Hold => {
                self.held.lock().unwrap().push((run.id, agent_id, callbacks));
            }
            Outcome::Vanish => {}
            Outcome::NoAgent => unreachable!("handled above"),
        }
        Ok(())
    }
}

struct Harness {
    _dir: Option<tempfile::TempDir>,
    workspace: Arc<Workspace>,
    manager: Arc<TaskManager>,
    acquirer: Arc<MockAcquirer>,
    runner: Arc<ScriptedRunner>,
}

fn harness() -> Harness {
    harness_with(TaskManagerOptions::default())
}

fn harness_with(options: TaskManagerOptions) -> Harness {
    let dir = tempfile::tempdir().unwrap();
    let workspace = Arc::new(Workspace::open(dir.path(), "main").unwrap());
    let mut h = build(workspace, options);
    h._dir = Some(dir);
    h
}

fn build(workspace: Arc<Workspace>, options: TaskManagerOptions) -> Harness {
    let task_log = Arc::new(EventLog::open(workspace.logs_dir().join("task_state.log")).unwrap());
    let agent_log = Arc::new(EventLog::open(workspace.logs_dir().join("agent_state.log")).unwrap());
    let acquirer = Arc::new(MockAcquirer::new());
    let runner = Arc::new(ScriptedRunner::new(acquirer.clone()));
    let manager = TaskManager::new(
        Arc::new(ResourceRegistry::new()),
        acquirer.clone(),
        runner.clone(),
        TaskEvents::new(task_log, agent_log),
        Some(workspace.clone()),
        options,
    );
    acquirer.bind(&manager);
    manager.register_admin_agent(SUPERVISOR).unwrap();
    Harness {
        _dir: None,
        workspace,
        manager,
        acquirer,
        runner,
    }
}

fn poem_spec() -> TaskConfigSpec {
    TaskConfigSpec {
        kind: TaskKind::Task,
        type_name: "poem_generation".into(),
        input: "bee".into(),
        description: "generate a poem".into(),
        interval_ms: 0,
        run_immediately: true,
        max_retries: None,
        retry_delay_ms: None,
        max_repeats: Some(1),
        agent_kind: AgentKind::Operator,
        agent_type: "poet".into(),
        concurrency_mode: ConcurrencyMode::Exclusive,
    }
}

/// Let spawned runner tasks make progress.
async fn settle() {
    tokio::time::sleep(Duration::from_millis(20)).await;
}

/// Tick the scheduler until the run reaches a terminal status.
async fn drive(h: &Harness, run_id: &TaskRunId, max_ticks: usize) -> TaskRunStatus {
    for _ in 0..max_ticks {
        h.manager.scheduler_pass().await;
        settle().await;
        let run = h.manager.get_task_run(run_id, SUPERVISOR).await.unwrap();
        if run.status.is_terminal() {
            return run.status;
        }
    }
    h.manager
        .get_task_run(run_id, SUPERVISOR)
        .await
        .unwrap()
        .status
}

#[tokio::test]
async fn config_creation_guards() {
    let h = harness();

    // Target agent type not announced yet.
    assert!(matches!(
        h.manager
            .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
            .await,
        Err(Error::UnknownAgentType { .. })
    ));

    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    assert!(matches!(
        h.manager
            .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
            .await,
        Err(Error::DuplicateType { .. })
    ));

    // No WRITE on the manager root.
    assert!(matches!(
        h.manager
            .create_task_config(poem_spec(), "operator:poet[1]:v1", "operator:poet[1]:v1")
            .await,
        Err(Error::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn permission_denied_leaves_no_trace() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    let before = read_log(h.workspace.logs_dir().join("task_state.log"))
        .unwrap()
        .len();

    let err = h
        .manager
        .update_task_config(
            TaskConfigUpdate::new(TaskKind::Task, "poem_generation").interval_ms(9),
            "operator:poet[1]:v1",
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::PermissionDenied { .. }));

    // No event emitted, no version bumped, snapshot untouched.
    let after = read_log(h.workspace.logs_dir().join("task_state.log"))
        .unwrap()
        .len();
    assert_eq!(before, after);
    let snapshot = h.workspace.read_snapshot("task_manager.jsonl").unwrap();
    assert_eq!(snapshot.len(), 1);
    assert_eq!(snapshot[0].record["version"], 1);
}

#[tokio::test]
async fn immediate_one_shot_completes() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner
        .script([Outcome::Complete("a poem about a bee".into())]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", Some("bee".into()), SUPERVISOR)
        .await
        .unwrap();
    // run_immediately put it straight on the queue.
    assert_eq!(run.status, TaskRunStatus::Scheduled);
    assert_eq!(run.id.to_string(), "task:poem_generation[1]:v1");

    let status = drive(&h, &run.id, 2).await;
    assert_eq!(status, TaskRunStatus::Completed);

    let history = h
        .manager
        .get_task_run_history(&run.id, HistoryQuery::default(), SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].terminal_status, TerminalStatus::Completed);
    assert_eq!(history[0].output.as_deref(), Some("a poem about a bee"));
    assert_eq!(history[0].run_number, 1);
    assert_eq!(history[0].retry_attempt, 0);

    // The worker went back to the registry.
    assert_eq!(h.acquirer.released().len(), 1);
}

#[tokio::test]
async fn retries_until_success() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.max_retries = Some(2);
    spec.retry_delay_ms = Some(0);
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([
        Outcome::Fail("writer's block".into()),
        Outcome::Fail("still stuck".into()),
        Outcome::Complete("third time's the charm".into()),
    ]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    let status = drive(&h, &run.id, 10).await;
    assert_eq!(status, TaskRunStatus::Completed);

    let run = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert_eq!(run.error_count, 2);
    assert_eq!(run.completed_runs, 3);

    let history = h
        .manager
        .get_task_run_history(&run.id, HistoryQuery::default(), SUPERVISOR)
        .await
        .unwrap();
    let outcomes: Vec<(TerminalStatus, u32)> = history
        .iter()
        .map(|e| (e.terminal_status, e.retry_attempt))
        .collect();
    assert_eq!(
        outcomes,
        vec![
            (TerminalStatus::Failed, 0),
            (TerminalStatus::Failed, 1),
            (TerminalStatus::Completed, 2),
        ]
    );
}

#[tokio::test]
async fn no_retries_means_one_shot() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([Outcome::Fail("nope".into())]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    let status = drive(&h, &run.id, 3).await;
    assert_eq!(status, TaskRunStatus::Failed);
    let run = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert_eq!(run.error_count, 1);
}

#[tokio::test]
async fn exclusive_concurrency_parks_second_run() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.run_immediately = false;
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([Outcome::Hold, Outcome::Complete("second".into())]);
    let first = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    let second = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    h.manager
        .schedule_start_task_run(&first.id, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;
    assert_eq!(
        h.manager.get_task_run(&first.id, SUPERVISOR).await.unwrap().status,
        TaskRunStatus::Executing
    );

    // Second run gets queued, then parked by the dispatch concurrency gate.
    h.manager
        .schedule_start_task_run(&second.id, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;
    assert_eq!(
        h.manager.get_task_run(&second.id, SUPERVISOR).await.unwrap().status,
        TaskRunStatus::Waiting
    );

    // Finishing the first frees the worker; availability re-dispatches the
    // second.
    for (run_id, agent_id, callbacks) in h.runner.take_held() {
        callbacks
            .on_agent_complete("first done".into(), &run_id, &agent_id)
            .await
            .unwrap();
    }
    let status = drive(&h, &second.id, 5).await;
    assert_eq!(status, TaskRunStatus::Completed);
}

#[tokio::test]
async fn schedule_at_queue_limit_is_silently_ignored() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.run_immediately = false;
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    let first = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    let second = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    h.manager
        .schedule_start_task_run(&first.id, SUPERVISOR)
        .await
        .unwrap();
    // EXCLUSIVE queue is full: the request is dropped, status unchanged.
    h.manager
        .schedule_start_task_run(&second.id, SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(
        h.manager.get_task_run(&second.id, SUPERVISOR).await.unwrap().status,
        TaskRunStatus::Created
    );
}

#[tokio::test]
async fn awaiting_agent_parks_until_availability() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner
        .script([Outcome::NoAgent, Outcome::Complete("eventually".into())]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    h.manager.scheduler_pass().await;
    settle().await;
    assert_eq!(
        h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap().status,
        TaskRunStatus::Waiting
    );

    // Ticks alone do not wake an availability-parked run.
    h.manager.scheduler_pass().await;
    settle().await;
    assert_eq!(
        h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap().status,
        TaskRunStatus::Waiting
    );

    h.manager
        .agent_available(AgentKind::Operator, "poet", 1, 1)
        .await;
    let status = drive(&h, &run.id, 3).await;
    assert_eq!(status, TaskRunStatus::Completed);
}

#[tokio::test]
async fn occupancy_timeout_force_releases_and_ignores_late_report() {
    let h = harness_with(TaskManagerOptions {
        occupancy_timeout: Duration::from_millis(50),
        ..TaskManagerOptions::default()
    });
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([Outcome::Vanish]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;
    assert!(h
        .manager
        .is_task_run_occupied(&run.id, SUPERVISOR)
        .await
        .unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    let state = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert!(!state.is_occupied());
    assert_eq!(state.completed_runs, 0);
    // The worker went back to the registry even though it never reported.
    assert_eq!(h.acquirer.released().len(), 1);
}

#[tokio::test]
async fn stop_is_cooperative_and_idempotent() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([Outcome::Hold]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;

    h.manager.stop_task_run(&run.id, SUPERVISOR).await.unwrap();
    let stopped = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert_eq!(stopped.status, TaskRunStatus::Stopped);
    assert!(!stopped.is_occupied());
    assert_eq!(stopped.history.len(), 1);
    assert_eq!(stopped.history[0].terminal_status, TerminalStatus::Stopped);
    assert_eq!(h.acquirer.released().len(), 1);

    // The held worker reports after the stop; ignored.
    for (run_id, agent_id, callbacks) in h.runner.take_held() {
        callbacks
            .on_agent_complete("too late".into(), &run_id, &agent_id)
            .await
            .unwrap();
    }
    let after = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert_eq!(after.completed_runs, 0);
    assert_eq!(after.status, TaskRunStatus::Stopped);

    // Stopping again is a no-op.
    h.manager.stop_task_run(&run.id, SUPERVISOR).await.unwrap();
}

#[tokio::test]
async fn destroy_guards() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    h.manager
        .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([Outcome::Hold]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;

    // Executing runs block both destroys.
    assert!(matches!(
        h.manager.destroy_task_run(&run.id, SUPERVISOR).await,
        Err(Error::IllegalState(_))
    ));
    assert!(matches!(
        h.manager
            .destroy_task_config(TaskKind::Task, "poem_generation", SUPERVISOR)
            .await,
        Err(Error::IllegalState(_))
    ));

    h.manager.stop_task_run(&run.id, SUPERVISOR).await.unwrap();
    h.manager
        .destroy_task_config(TaskKind::Task, "poem_generation", SUPERVISOR)
        .await
        .unwrap();

    // Everything referencing the type is gone.
    assert!(matches!(
        h.manager.get_task_run(&run.id, SUPERVISOR).await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.manager
            .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
            .await,
        Err(Error::NotFound(_))
    ));
}

#[tokio::test]
async fn run_reads_are_gated_by_acl() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.run_immediately = false;
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    let stranger = "operator:critic[1]:v1";
    assert!(matches!(
        h.manager.get_task_run(&run.id, stranger).await,
        Err(Error::PermissionDenied { .. })
    ));
    assert!(h.manager.get_all_task_runs(stranger).await.is_empty());
    assert_eq!(h.manager.get_all_task_runs(SUPERVISOR).await.len(), 1);

    let stats = h
        .manager
        .get_pool_stats(TaskKind::Task, "poem_generation", SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.created, 1);
}

#[tokio::test]
async fn history_query_limits_to_most_recent() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.max_retries = Some(3);
    spec.retry_delay_ms = Some(0);
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([
        Outcome::Fail("one".into()),
        Outcome::Fail("two".into()),
        Outcome::Complete("done".into()),
    ]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    drive(&h, &run.id, 10).await;

    let tail = h
        .manager
        .get_task_run_history(&run.id, HistoryQuery { limit: Some(2) }, SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(tail.len(), 2);
    assert_eq!(tail[0].error.as_deref(), Some("two"));
    assert_eq!(tail[1].output.as_deref(), Some("done"));
}

#[tokio::test]
async fn task_config_reads_check_the_latest_version() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let owner = "supervisor:aux[1]:v1";
    h.manager
        .create_task_config(poem_spec(), owner, SUPERVISOR)
        .await
        .unwrap();
    h.manager
        .update_task_config(
            TaskConfigUpdate::new(TaskKind::Task, "poem_generation").interval_ms(1_000),
            SUPERVISOR,
        )
        .await
        .unwrap();

    // The owner reads both versions through the latest version's rights.
    let latest = h
        .manager
        .get_task_config(TaskKind::Task, "poem_generation", None, owner)
        .await
        .unwrap();
    assert_eq!(latest.version, 2);
    let old = h
        .manager
        .get_task_config(TaskKind::Task, "poem_generation", Some(1), owner)
        .await
        .unwrap();
    assert_eq!(old.interval_ms, 0);

    assert!(matches!(
        h.manager
            .get_task_config(TaskKind::Task, "poem_generation", Some(9), owner)
            .await,
        Err(Error::NotFound(_))
    ));
    assert!(matches!(
        h.manager
            .get_task_config(TaskKind::Task, "poem_generation", None, "operator:poet[1]:v1")
            .await,
        Err(Error::PermissionDenied { .. })
    ));
}

#[tokio::test]
async fn interval_task_repeats_until_bound() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.interval_ms = 30;
    spec.max_repeats = Some(2);
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    h.runner.script([
        Outcome::Complete("first".into()),
        Outcome::Complete("second".into()),
    ]);
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();

    // First attempt completes, then the run waits out the interval before
    // the second; the repeat bound then stops it.
    let status = drive(&h, &run.id, 20).await;
    assert_eq!(status, TaskRunStatus::Completed);
    let run = h.manager.get_task_run(&run.id, SUPERVISOR).await.unwrap();
    assert_eq!(run.completed_runs, 2);
    assert_eq!(run.history.len(), 2);
    assert!(run.next_run_at.is_none());
}

#[tokio::test]
async fn run_input_is_editable_between_attempts() {
    let h = harness();
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let mut spec = poem_spec();
    spec.run_immediately = false;
    h.manager
        .create_task_config(spec, SUPERVISOR, SUPERVISOR)
        .await
        .unwrap();

    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_generation", None, SUPERVISOR)
        .await
        .unwrap();
    // The config template was the default input.
    assert_eq!(run.input, "bee");

    let updated = h
        .manager
        .update_task_run(&run.id, "wasp".into(), SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(updated.input, "wasp");

    h.runner.script([Outcome::Hold]);
    h.manager
        .schedule_start_task_run(&run.id, SUPERVISOR)
        .await
        .unwrap();
    h.manager.scheduler_pass().await;
    settle().await;

    // Executing runs have their input pinned.
    assert!(matches!(
        h.manager
            .update_task_run(&run.id, "hornet".into(), SUPERVISOR)
            .await,
        Err(Error::IllegalState(_))
    ));
}

#[tokio::test]
async fn restore_brings_configs_back_but_not_runs() {
    let dir = tempfile::tempdir().unwrap();
    {
        let workspace = Arc::new(Workspace::open(dir.path(), "main").unwrap());
        let h = build(workspace, TaskManagerOptions::default());
        h.manager
            .register_agent_type(AgentKind::Operator, "poet")
            .await;
        h.manager
            .create_task_config(poem_spec(), SUPERVISOR, SUPERVISOR)
            .await
            .unwrap();
        let mut other = poem_spec();
        other.type_name = "poem_review".into();
        other.run_immediately = false;
        h.manager
            .create_task_config(other, SUPERVISOR, SUPERVISOR)
            .await
            .unwrap();
        h.manager
            .create_task_run(TaskKind::Task, "poem_review", None, SUPERVISOR)
            .await
            .unwrap();
    }

    let workspace = Arc::new(Workspace::open(dir.path(), "main").unwrap());
    let h = build(workspace, TaskManagerOptions::default());
    h.manager
        .register_agent_type(AgentKind::Operator, "poet")
        .await;
    let restored = h.manager.restore().await.unwrap();
    assert_eq!(restored, 2);

    // Configs are back; runs are not.
    assert!(h.manager.get_all_task_runs(SUPERVISOR).await.is_empty());
    let run = h
        .manager
        .create_task_run(TaskKind::Task, "poem_review", None, SUPERVISOR)
        .await
        .unwrap();
    assert_eq!(run.id.to_string(), "task:poem_review[1]:v1");
}
