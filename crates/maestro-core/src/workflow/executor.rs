//! Workflow Orchestration Core.
//!
//! `WorkflowEngine::execute` validates and compiles the workflow, registers a
//! run and returns its id immediately; the run itself is driven by a spawned
//! task that owns the run's Execution Context and is the only writer of its
//! Execution Record.
//!
//! Failure policy per execution mode:
//! - sequential: steps run one at a time in plan order; a failed critical step
//!   (no `conditions`, no `continue_on_error`) marks every later step skipped
//! - conditional: like sequential, but a step whose conditions do not hold is
//!   skipped, and so is every step that transitively consumes its output
//! - parallel: waves run one after another, the steps of a wave concurrently;
//!   failures never stop later waves, dependents of a failed step fail on
//!   their unresolved references instead

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::context::ExecutionContext;
use super::dispatcher::StepDispatcher;
use super::plan::{self, ExecutionPlan};
use super::schema::ExecutionMode;
use crate::catalog::DescriptorStore;
use crate::config::EngineConfig;
use crate::error::{OrchestratorError, StepError};
use crate::lifecycle::LifecycleManager;
use crate::models::{ExecutionRecord, RunStatus, StepResult, StepStatus};
use crate::store::{ExecutionStore, RunEntry};

pub struct WorkflowEngine {
    catalog: Arc<DescriptorStore>,
    dispatcher: Arc<StepDispatcher>,
    store: Arc<ExecutionStore>,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        catalog: Arc<DescriptorStore>,
        lifecycle: Arc<LifecycleManager>,
        config: EngineConfig,
    ) -> Self {
        let dispatcher = Arc::new(StepDispatcher::new(lifecycle, config.cancel_grace()));
        let store = Arc::new(ExecutionStore::new(
            config.max_retained_runs,
            config.run_log_dir.clone(),
        ));
        Self {
            catalog,
            dispatcher,
            store,
            config,
        }
    }

    /// Compile a catalogued workflow without running it.
    pub fn validate(&self, workflow_name: &str) -> Result<ExecutionPlan, OrchestratorError> {
        let workflow = self
            .catalog
            .get_workflow(workflow_name)
            .ok_or_else(|| OrchestratorError::UnknownWorkflow(workflow_name.to_string()))?;
        plan::compile(workflow)
    }

    /// Start a run and return its id. Structural errors are reported here;
    /// everything that happens to individual steps lands in the record.
    pub async fn execute(
        &self,
        workflow_name: &str,
        input: Value,
    ) -> Result<String, OrchestratorError> {
        let plan = self.validate(workflow_name)?;
        let run_id = uuid::Uuid::new_v4().to_string();

        let record = ExecutionRecord::new(
            &run_id,
            &plan.workflow.name,
            plan.workflow.execution_mode,
            &plan.ordered_ids(),
        );
        let entry = self.store.insert(record).await;

        tracing::info!(
            "[WorkflowEngine] Run {} started: {} ({}, {} steps)",
            run_id,
            plan.workflow.name,
            plan.workflow.execution_mode.as_str(),
            plan.len()
        );

        let driver = RunDriver {
            run_id: run_id.clone(),
            plan,
            ctx: ExecutionContext::new(&run_id, input),
            dispatcher: self.dispatcher.clone(),
            entry,
            default_timeout: Duration::from_secs(self.config.default_timeout_secs),
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let entry = driver.entry.clone();
            driver.run().await;
            store.finish(&entry).await;
        });

        Ok(run_id)
    }

    pub async fn get_status(&self, run_id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        self.store.get(run_id).await
    }

    /// Cancel a run. `Ok(false)` means it had already finished.
    pub async fn cancel(&self, run_id: &str) -> Result<bool, OrchestratorError> {
        self.store.cancel(run_id).await
    }

    pub async fn wait(&self, run_id: &str) -> Result<ExecutionRecord, OrchestratorError> {
        self.store.wait(run_id).await
    }

    pub async fn list_runs(&self) -> Vec<ExecutionRecord> {
        self.store.list().await
    }
}

struct RunDriver {
    run_id: String,
    plan: ExecutionPlan,
    ctx: ExecutionContext,
    dispatcher: Arc<StepDispatcher>,
    entry: Arc<RunEntry>,
    default_timeout: Duration,
}

impl RunDriver {
    async fn run(mut self) {
        match self.plan.workflow.execution_mode {
            ExecutionMode::Sequential => self.run_ordered(false).await,
            ExecutionMode::Conditional => self.run_ordered(true).await,
            ExecutionMode::Parallel => self.run_waves().await,
        }
        self.finalize().await;
    }

    fn cancel_token(&self) -> CancellationToken {
        self.entry.cancel_token().clone()
    }

    fn timeout_for(&self, index: usize) -> Duration {
        self.plan
            .step(index)
            .timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(self.default_timeout)
    }

    async fn run_ordered(&mut self, evaluate_conditions: bool) {
        let cancel = self.cancel_token();
        let mut aborted_by: Option<String> = None;
        let mut skip: HashSet<usize> = HashSet::new();
        let mut previous: Option<String> = None;

        for position in 0..self.plan.order.len() {
            let index = self.plan.order[position];
            let step = self.plan.step(index).clone();

            if cancel.is_cancelled() || aborted_by.is_some() || skip.contains(&index) {
                self.record(StepResult::skipped(&step.step_id)).await;
                previous = Some(step.step_id);
                continue;
            }

            if evaluate_conditions && !self.ctx.conditions_met(&step, previous.as_deref()) {
                tracing::info!(
                    "[WorkflowEngine] Run {}: conditions not met for step '{}', skipping",
                    self.run_id,
                    step.step_id
                );
                skip.extend(self.plan.data_dependents(index));
                self.record(StepResult::skipped(&step.step_id)).await;
                previous = Some(step.step_id);
                continue;
            }

            let result = self.run_step(index, &cancel).await;
            if result.status.is_failure() && step.is_critical() && !cancel.is_cancelled() {
                tracing::warn!(
                    "[WorkflowEngine] Run {}: critical step '{}' failed, skipping the rest",
                    self.run_id,
                    step.step_id
                );
                aborted_by = Some(step.step_id.clone());
            }
            self.record(result).await;
            previous = Some(step.step_id);
        }
    }

    async fn run_waves(&mut self) {
        let cancel = self.cancel_token();
        let waves = self.plan.waves.clone();

        for (number, wave) in waves.iter().enumerate() {
            if cancel.is_cancelled() {
                for &index in wave {
                    let id = self.plan.step(index).step_id.clone();
                    self.record(StepResult::skipped(&id)).await;
                }
                continue;
            }

            tracing::debug!(
                "[WorkflowEngine] Run {}: wave {} with {} steps",
                self.run_id,
                number,
                wave.len()
            );

            let mut in_flight = Vec::with_capacity(wave.len());
            for &index in wave {
                let step = self.plan.step(index).clone();
                let started = Utc::now();
                let inputs = match self.ctx.resolve_inputs(&step) {
                    Ok(inputs) => inputs,
                    Err(e) => {
                        self.record(StepResult::failed(&step.step_id, &e, Some(started)))
                            .await;
                        continue;
                    }
                };
                self.mark_running(&step.step_id, started).await;

                let dispatcher = self.dispatcher.clone();
                let run_id = self.run_id.clone();
                let timeout = self.timeout_for(index);
                let cancel = cancel.clone();
                let task = tokio::spawn(async move {
                    dispatcher
                        .dispatch(&run_id, &step, inputs, timeout, &cancel)
                        .await
                });
                in_flight.push((index, started, task));
            }

            // the wave ends only when every step in it is terminal
            for (index, started, task) in in_flight {
                let id = self.plan.step(index).step_id.clone();
                let outcome = task.await.unwrap_or_else(|e| {
                    Err(StepError::AgentExecutionError {
                        agent: self.plan.step(index).agent_name.clone(),
                        message: format!("dispatch task failed: {}", e),
                    })
                });
                let result = match outcome {
                    Ok(output) => StepResult::succeeded(&id, output, started),
                    Err(e) => StepResult::failed(&id, &e, Some(started)),
                };
                self.record(result).await;
            }
        }
    }

    async fn run_step(&mut self, index: usize, cancel: &CancellationToken) -> StepResult {
        let step = self.plan.step(index).clone();
        let started = Utc::now();

        let inputs = match self.ctx.resolve_inputs(&step) {
            Ok(inputs) => inputs,
            Err(e) => {
                tracing::warn!(
                    "[WorkflowEngine] Run {}: step '{}' has unresolved inputs: {}",
                    self.run_id,
                    step.step_id,
                    e
                );
                return StepResult::failed(&step.step_id, &e, Some(started));
            }
        };

        self.mark_running(&step.step_id, started).await;
        match self
            .dispatcher
            .dispatch(&self.run_id, &step, inputs, self.timeout_for(index), cancel)
            .await
        {
            Ok(output) => StepResult::succeeded(&step.step_id, output, started),
            Err(e) => StepResult::failed(&step.step_id, &e, Some(started)),
        }
    }

    async fn mark_running(&self, step_id: &str, started: chrono::DateTime<Utc>) {
        self.entry
            .update(|record| {
                if let Some(step) = record.step_mut(step_id) {
                    step.status = StepStatus::Running;
                    step.started_at = Some(started);
                }
            })
            .await;
    }

    /// Write a terminal result to the context and the registry.
    async fn record(&mut self, result: StepResult) {
        if !self.ctx.record(result.clone()) {
            return;
        }
        self.entry
            .update(|record| {
                if let Some(step) = record.step_mut(&result.step_id) {
                    *step = result;
                }
                record.recount();
            })
            .await;
    }

    async fn finalize(&self) {
        let cancel = self.cancel_token();
        let mode = self.plan.workflow.execution_mode;
        let critical_failed = mode != ExecutionMode::Parallel
            && self.plan.workflow.steps.iter().any(|step| {
                step.is_critical()
                    && self
                        .ctx
                        .result(&step.step_id)
                        .is_some_and(|r| r.status.is_failure())
            });

        let record = self
            .entry
            .update(|record| {
                let failures =
                    record.count(StepStatus::Failed) + record.count(StepStatus::TimedOut);
                let attempted = record.total_steps - record.count(StepStatus::Skipped);

                // read under the record lock so a racing cancel either lands
                // here or is refused by the registry
                record.status = if cancel.is_cancelled() {
                    RunStatus::Cancelled
                } else if failures == 0 {
                    RunStatus::Completed
                } else if critical_failed || failures == attempted {
                    RunStatus::Failed
                } else {
                    RunStatus::PartialFailure
                };
                record.recount();
                record.finished_at = Some(Utc::now());
                record.clone()
            })
            .await;

        tracing::info!(
            "[WorkflowEngine] Run {} finished: {} ({}/{} steps completed)",
            self.run_id,
            record.status.as_str(),
            record.steps_completed,
            record.total_steps
        );
    }
}
