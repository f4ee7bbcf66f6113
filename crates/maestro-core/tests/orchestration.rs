//! Integration tests for the orchestration core.
//!
//! Agents are replaced by an in-memory launcher whose handles act according
//! to the step's `action`:
//!
//! - `echo`  returns the resolved inputs
//! - `value` returns `inputs.value`
//! - `fail`  answers with an agent error
//! - `delay` sleeps `inputs.ms` milliseconds, then echoes
//! - `hang`  never answers until cancelled

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use maestro_core::agent::{AgentHandle, AgentLauncher, InvokeError, InvokeRequest};
use maestro_core::catalog::{AgentDescriptor, CatalogFile, DescriptorStore};
use maestro_core::error::{LifecycleError, OrchestratorError, StepErrorKind};
use maestro_core::models::{AgentStatus, ExecutionRecord, RunStatus, StepStatus};
use maestro_core::state::{AppState, AppStateInner};
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
struct Event {
    step_id: String,
    started: Instant,
    finished: Instant,
}

#[derive(Default)]
struct Recorder {
    launches: AtomicUsize,
    dispatches: AtomicUsize,
    events: Mutex<Vec<Event>>,
}

impl Recorder {
    fn event(&self, step_id: &str) -> Event {
        self.events
            .lock()
            .unwrap()
            .iter()
            .find(|e| e.step_id == step_id)
            .cloned()
            .unwrap_or_else(|| panic!("step {} was never dispatched", step_id))
    }
}

struct ScriptedHandle {
    recorder: Arc<Recorder>,
    alive: AtomicBool,
}

#[async_trait]
impl AgentHandle for ScriptedHandle {
    fn pid(&self) -> Option<u32> {
        None
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<Value, InvokeError> {
        self.recorder.dispatches.fetch_add(1, Ordering::SeqCst);
        let started = Instant::now();

        let outcome = match request.action.as_str() {
            "value" => Ok(request.inputs["value"].clone()),
            "fail" => Err(InvokeError::Rejected {
                code: -32000,
                message: "scripted failure".to_string(),
            }),
            "delay" => {
                let ms = request.inputs["ms"].as_u64().unwrap_or(0);
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(ms)) => Ok(request.inputs.clone()),
                    _ = cancel.cancelled() => Err(InvokeError::Cancelled),
                }
            }
            "hang" => {
                cancel.cancelled().await;
                Err(InvokeError::Cancelled)
            }
            _ => Ok(request.inputs.clone()),
        };

        self.recorder.events.lock().unwrap().push(Event {
            step_id: request.step_id.clone(),
            started,
            finished: Instant::now(),
        });
        outcome
    }

    async fn shutdown(&self, _grace: Duration) {
        self.alive.store(false, Ordering::SeqCst);
    }
}

struct ScriptedLauncher {
    recorder: Arc<Recorder>,
}

#[async_trait]
impl AgentLauncher for ScriptedLauncher {
    async fn launch(
        &self,
        _descriptor: &AgentDescriptor,
    ) -> Result<Arc<dyn AgentHandle>, LifecycleError> {
        self.recorder.launches.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(20)).await;
        Ok(Arc::new(ScriptedHandle {
            recorder: self.recorder.clone(),
            alive: AtomicBool::new(true),
        }))
    }
}

const AGENTS: &str = r#"
agents:
  - name: worker
    entrypoint: { command: "unused" }
  - name: helper
    entrypoint: { command: "unused" }
"#;

fn state_with(workflows: &str) -> (AppState, Arc<Recorder>) {
    let yaml = format!("{}\nworkflows:\n{}", AGENTS, workflows);
    let file = CatalogFile::from_yaml(&yaml).expect("catalog should parse");
    let (catalog, config) = DescriptorStore::from_catalog(file).expect("catalog should load");
    let recorder = Arc::new(Recorder::default());
    let launcher = Arc::new(ScriptedLauncher {
        recorder: recorder.clone(),
    });
    (
        Arc::new(AppStateInner::with_launcher(catalog, config, launcher)),
        recorder,
    )
}

async fn run(state: &AppState, workflow: &str, input: Value) -> ExecutionRecord {
    let run_id = state.execute(workflow, input).await.expect("run should start");
    tokio::time::timeout(Duration::from_secs(10), state.engine.wait(&run_id))
        .await
        .expect("run should finish")
        .expect("run should exist")
}

fn status_of(record: &ExecutionRecord, step_id: &str) -> StepStatus {
    record.step(step_id).expect("step in record").status
}

fn assert_counters(record: &ExecutionRecord) {
    let skipped = record.count(StepStatus::Skipped);
    assert_eq!(record.steps_completed, record.total_steps - skipped);
    assert!(record.steps.iter().all(|s| s.status.is_terminal()));
}

#[tokio::test]
async fn test_cycle_rejected_before_any_dispatch() {
    let (state, recorder) = state_with(
        r#"
  - name: loop
    steps:
      - { step_id: A, agent_name: worker, action: echo, inputs: { v: "${B}" } }
      - { step_id: B, agent_name: worker, action: echo, inputs: { v: "${A}" } }
"#,
    );
    let err = state.execute("loop", Value::Null).await.unwrap_err();
    assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));
    assert_eq!(recorder.dispatches.load(Ordering::SeqCst), 0);
    assert_eq!(recorder.launches.load(Ordering::SeqCst), 0);
    assert!(state.engine.list_runs().await.is_empty());
}

#[tokio::test]
async fn test_unknown_workflow_and_run() {
    let (state, _) = state_with("  []\n");
    assert!(matches!(
        state.execute("missing", Value::Null).await,
        Err(OrchestratorError::UnknownWorkflow(_))
    ));
    assert!(matches!(
        state.get_status("no-such-run").await,
        Err(OrchestratorError::UnknownRun(_))
    ));
}

#[tokio::test]
async fn test_sequential_failure_skips_the_rest() {
    let (state, recorder) = state_with(
        r#"
  - name: seq
    execution_mode: sequential
    steps:
      - { step_id: one, agent_name: worker, action: echo }
      - { step_id: two, agent_name: worker, action: fail }
      - { step_id: three, agent_name: worker, action: echo }
"#,
    );
    let record = run(&state, "seq", Value::Null).await;
    assert_eq!(status_of(&record, "one"), StepStatus::Succeeded);
    assert_eq!(status_of(&record, "two"), StepStatus::Failed);
    assert_eq!(status_of(&record, "three"), StepStatus::Skipped);
    assert_eq!(record.status, RunStatus::Failed);
    assert_eq!(recorder.dispatches.load(Ordering::SeqCst), 2);
    assert_counters(&record);

    let error = record.step("two").unwrap().error.clone().unwrap();
    assert_eq!(error.kind, StepErrorKind::AgentExecutionError);
    assert!(error.message.contains("scripted failure"));
}

#[tokio::test]
async fn test_continue_on_error_gives_partial_failure() {
    let (state, _) = state_with(
        r#"
  - name: tolerant
    steps:
      - { step_id: one, agent_name: worker, action: fail, continue_on_error: true }
      - { step_id: two, agent_name: worker, action: echo }
"#,
    );
    let record = run(&state, "tolerant", Value::Null).await;
    assert_eq!(status_of(&record, "two"), StepStatus::Succeeded);
    assert_eq!(record.status, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_parallel_dependent_waits_for_whole_wave() {
    let (state, recorder) = state_with(
        r#"
  - name: fan-in
    execution_mode: parallel
    steps:
      - { step_id: X, agent_name: worker, action: delay, inputs: { ms: 20 } }
      - { step_id: Y, agent_name: helper, action: delay, inputs: { ms: 300 } }
      - step_id: Z
        agent_name: worker
        action: echo
        inputs: { x: "${X.ms}", y: "${Y.ms}" }
"#,
    );
    let record = run(&state, "fan-in", Value::Null).await;
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(record.step("Z").unwrap().output, json!({"x": 20, "y": 300}));

    let (x, y, z) = (recorder.event("X"), recorder.event("Y"), recorder.event("Z"));
    assert!(x.started < y.finished, "X and Y should overlap");
    assert!(z.started >= x.finished);
    assert!(z.started >= y.finished);
    assert_counters(&record);
}

#[tokio::test]
async fn test_conditional_skip_propagates_to_dependents() {
    let (state, recorder) = state_with(
        r#"
  - name: gated
    execution_mode: conditional
    steps:
      - { step_id: A, agent_name: worker, action: fail, continue_on_error: true }
      - { step_id: B, agent_name: worker, action: echo, conditions: [previous_succeeded] }
      - { step_id: C, agent_name: worker, action: echo, inputs: { from_b: "${B}" } }
      - { step_id: D, agent_name: worker, action: echo, inputs: { from_c: "${C.from_b}" } }
      - { step_id: E, agent_name: worker, action: echo, conditions: [{ step_failed: A }] }
"#,
    );
    let record = run(&state, "gated", Value::Null).await;
    assert_eq!(status_of(&record, "A"), StepStatus::Failed);
    assert_eq!(status_of(&record, "B"), StepStatus::Skipped);
    assert_eq!(status_of(&record, "C"), StepStatus::Skipped);
    assert_eq!(status_of(&record, "D"), StepStatus::Skipped);
    assert_eq!(status_of(&record, "E"), StepStatus::Succeeded);
    assert_eq!(record.status, RunStatus::PartialFailure);
    assert_eq!(recorder.dispatches.load(Ordering::SeqCst), 2);
    assert_counters(&record);
}

#[tokio::test]
async fn test_reference_substitution() {
    let (state, _) = state_with(
        r#"
  - name: refs
    steps:
      - { step_id: A, agent_name: worker, action: value, inputs: { value: { result: 42 } } }
      - step_id: B
        agent_name: worker
        action: echo
        inputs:
          n: "${A.result}"
          text: "answer=${A.result} topic=${input.topic}"
          whole: "${input}"
"#,
    );
    let record = run(&state, "refs", json!({"topic": "rust"})).await;
    assert_eq!(record.status, RunStatus::Completed);
    assert_eq!(
        record.step("B").unwrap().output,
        json!({
            "n": 42,
            "text": "answer=42 topic=rust",
            "whole": {"topic": "rust"},
        })
    );
}

#[tokio::test]
async fn test_unresolved_reference_fails_only_that_step() {
    let (state, _) = state_with(
        r#"
  - name: partial
    execution_mode: parallel
    steps:
      - { step_id: C, agent_name: worker, action: fail }
      - { step_id: D, agent_name: worker, action: echo, inputs: { v: "${C}" } }
      - { step_id: E, agent_name: helper, action: echo }
      - { step_id: F, agent_name: helper, action: echo, inputs: { v: "${E.missing}" } }
"#,
    );
    let record = run(&state, "partial", Value::Null).await;
    assert_eq!(status_of(&record, "E"), StepStatus::Succeeded);
    for id in ["D", "F"] {
        let step = record.step(id).unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(
            step.error.as_ref().unwrap().kind,
            StepErrorKind::UnresolvedReference
        );
    }
    assert_eq!(record.status, RunStatus::PartialFailure);
}

#[tokio::test]
async fn test_timeout_is_bounded_and_run_continues() {
    let (state, _) = state_with(
        r#"
  - name: slow
    steps:
      - { step_id: stuck, agent_name: worker, action: hang, timeout_secs: 1, continue_on_error: true }
      - { step_id: after, agent_name: worker, action: echo }
"#,
    );
    let record = run(&state, "slow", Value::Null).await;
    let stuck = record.step("stuck").unwrap();
    assert_eq!(stuck.status, StepStatus::TimedOut);
    assert_eq!(
        stuck.error.as_ref().unwrap().kind,
        StepErrorKind::DispatchTimeout
    );
    let took = stuck.finished_at.unwrap() - stuck.started_at.unwrap();
    assert!(
        took.num_milliseconds() <= 1500,
        "timed out after {}ms",
        took.num_milliseconds()
    );
    assert_eq!(status_of(&record, "after"), StepStatus::Succeeded);
    assert_eq!(record.status, RunStatus::PartialFailure);

    // a timed-out call does not tear the agent down
    assert_eq!(
        state.agent_status("worker").await.unwrap().status,
        AgentStatus::Running
    );
}

#[tokio::test]
async fn test_cancel_run() {
    let (state, _) = state_with(
        r#"
  - name: cancellable
    steps:
      - { step_id: wait, agent_name: worker, action: hang, timeout_secs: 30 }
      - { step_id: never, agent_name: worker, action: echo }
"#,
    );
    let run_id = state.execute("cancellable", Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(
        state.get_status(&run_id).await.unwrap().status,
        RunStatus::Running
    );
    assert!(state.engine.cancel(&run_id).await.unwrap());

    let record = tokio::time::timeout(Duration::from_secs(5), state.engine.wait(&run_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    let wait = record.step("wait").unwrap();
    assert_eq!(wait.error.as_ref().unwrap().kind, StepErrorKind::Cancelled);
    assert_eq!(status_of(&record, "never"), StepStatus::Skipped);
    assert!(!state.engine.cancel(&run_id).await.unwrap());
}

#[tokio::test]
async fn test_cancel_parallel_run_mid_wave() {
    let (state, recorder) = state_with(
        r#"
  - name: wide
    execution_mode: parallel
    steps:
      - { step_id: P, agent_name: worker, action: hang, timeout_secs: 30 }
      - { step_id: Q, agent_name: helper, action: hang, timeout_secs: 30 }
      - { step_id: R, agent_name: worker, action: echo, inputs: { p: "${P}" } }
"#,
    );
    let run_id = state.execute("wide", Value::Null).await.unwrap();
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(recorder.dispatches.load(Ordering::SeqCst), 2);
    assert!(state.engine.cancel(&run_id).await.unwrap());

    let record = tokio::time::timeout(Duration::from_secs(5), state.engine.wait(&run_id))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(record.status, RunStatus::Cancelled);
    for id in ["P", "Q"] {
        let step = record.step(id).unwrap();
        assert_eq!(step.status, StepStatus::Failed);
        assert_eq!(step.error.as_ref().unwrap().kind, StepErrorKind::Cancelled);
    }
    assert_eq!(status_of(&record, "R"), StepStatus::Skipped);
    assert_eq!(recorder.dispatches.load(Ordering::SeqCst), 2);
    assert_counters(&record);
}

#[tokio::test]
async fn test_cancel_after_completion_is_refused() {
    let (state, _) = state_with(
        r#"
  - name: quick
    steps:
      - { step_id: only, agent_name: worker, action: echo }
"#,
    );
    let record = run(&state, "quick", Value::Null).await;
    assert_eq!(record.status, RunStatus::Completed);
    assert!(!state.engine.cancel(&record.run_id).await.unwrap());
    assert_eq!(
        state.get_status(&record.run_id).await.unwrap().status,
        RunStatus::Completed
    );
}

#[tokio::test]
async fn test_unknown_agent_is_a_step_failure() {
    let (state, _) = state_with(
        r#"
  - name: ghost
    steps:
      - { step_id: a, agent_name: nobody, action: echo, continue_on_error: true }
      - { step_id: b, agent_name: worker, action: echo }
"#,
    );
    let record = run(&state, "ghost", Value::Null).await;
    let a = record.step("a").unwrap();
    assert_eq!(a.status, StepStatus::Failed);
    assert_eq!(a.error.as_ref().unwrap().kind, StepErrorKind::AgentUnavailable);
    assert_eq!(status_of(&record, "b"), StepStatus::Succeeded);
}

#[tokio::test]
async fn test_concurrent_runs_share_one_agent_process() {
    let (state, recorder) = state_with(
        r#"
  - name: quick
    steps:
      - { step_id: a, agent_name: worker, action: delay, inputs: { ms: 50 } }
"#,
    );
    let (r1, r2) = tokio::join!(
        run(&state, "quick", Value::Null),
        run(&state, "quick", Value::Null)
    );
    assert_eq!(r1.status, RunStatus::Completed);
    assert_eq!(r2.status, RunStatus::Completed);
    assert_ne!(r1.run_id, r2.run_id);
    assert_eq!(recorder.launches.load(Ordering::SeqCst), 1);

    let metrics = state.agent_status("worker").await.unwrap().metrics;
    assert_eq!(metrics.requests_count, 2);
    assert_eq!(metrics.errors_count, 0);
    assert!(metrics.last_activity.is_some());
    assert_eq!(state.engine.list_runs().await.len(), 2);
}

#[tokio::test]
async fn test_concurrent_start_yields_single_process() {
    let (state, recorder) = state_with("  []\n");
    let (a, b) = tokio::join!(state.start_agent("worker"), state.start_agent("worker"));
    assert_eq!(recorder.launches.load(Ordering::SeqCst), 1);
    assert!(a.is_ok() ^ b.is_ok());
    assert!(matches!(
        a.err().or(b.err()),
        Some(LifecycleError::AlreadyRunning(_))
    ));
    assert_eq!(
        state.agent_status("worker").await.unwrap().status,
        AgentStatus::Running
    );

    state.stop_agent("worker").await.unwrap();
    assert_eq!(
        state.agent_status("worker").await.unwrap().status,
        AgentStatus::Stopped
    );
    assert!(matches!(
        state.stop_agent("worker").await,
        Err(LifecycleError::NotRunning(_))
    ));
}
