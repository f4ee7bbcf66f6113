//! Execution Context: the per-run, append-only store of step results.

use std::collections::HashMap;

use serde_json::Value;

use super::schema::{Condition, StepDefinition};
use super::template::{self, Reference};
use crate::error::StepError;
use crate::models::{StepResult, StepStatus};

static NULL: Value = Value::Null;

#[derive(Debug)]
pub struct ExecutionContext {
    run_id: String,
    input: Value,
    results: HashMap<String, StepResult>,
}

impl ExecutionContext {
    pub fn new(run_id: &str, input: Value) -> Self {
        Self {
            run_id: run_id.to_string(),
            input,
            results: HashMap::new(),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.results.get(step_id)
    }

    /// Record a terminal result. The first write for a step wins; later writes
    /// are ignored and reported as `false`.
    pub fn record(&mut self, result: StepResult) -> bool {
        if self.results.contains_key(&result.step_id) {
            tracing::warn!(
                "[ExecutionContext:{}] Ignoring second result for step '{}'",
                self.run_id,
                result.step_id
            );
            return false;
        }
        self.results.insert(result.step_id.clone(), result);
        true
    }

    /// Value of one reference expression against the run input and recorded outputs.
    pub fn lookup(&self, reference: &Reference) -> Result<Value, StepError> {
        let root = if reference.is_input() {
            &self.input
        } else {
            match self.results.get(&reference.step) {
                Some(result) if result.status == StepStatus::Succeeded => &result.output,
                Some(result) => {
                    return Err(StepError::unresolved(
                        reference.raw.clone(),
                        format!(
                            "step '{}' finished as {} and has no output",
                            reference.step,
                            result.status.as_str()
                        ),
                    ))
                }
                None => {
                    return Err(StepError::unresolved(
                        reference.raw.clone(),
                        format!("step '{}' has not run", reference.step),
                    ))
                }
            }
        };

        template::select(root, &reference.path)
            .cloned()
            .ok_or_else(|| {
                StepError::unresolved(
                    reference.raw.clone(),
                    format!("field '{}' not found", reference.path.join(".")),
                )
            })
    }

    /// The step's `inputs` with every reference substituted.
    pub fn resolve_inputs(&self, step: &StepDefinition) -> Result<Value, StepError> {
        let inputs = Value::Object(step.inputs.clone());
        template::resolve(&inputs, &|r: &Reference| self.lookup(r))
    }

    /// Evaluate one condition. `previous` is the step just before this one in
    /// execution order; with no previous step the run input stands in for its output.
    pub fn evaluate(&self, condition: &Condition, previous: Option<&str>) -> bool {
        let prev = previous.and_then(|id| self.results.get(id));
        match condition {
            Condition::PreviousSucceeded => {
                prev.map_or(true, |r| r.status == StepStatus::Succeeded)
            }
            Condition::PreviousFailed => prev.is_some_and(|r| r.status.is_failure()),
            Condition::HasData => has_data(self.data_of(previous)),
            Condition::StepSucceeded(id) => self.status_is(id, |s| s == StepStatus::Succeeded),
            Condition::StepFailed(id) => self.status_is(id, |s| s.is_failure()),
            Condition::StepSkipped(id) => self.status_is(id, |s| s == StepStatus::Skipped),
            Condition::OutputContains { step, value } => {
                let data = match step {
                    Some(id) => self.data_of(Some(id)),
                    None => self.data_of(previous),
                };
                contains(data, value)
            }
        }
    }

    pub fn conditions_met(&self, step: &StepDefinition, previous: Option<&str>) -> bool {
        step.conditions.iter().all(|c| self.evaluate(c, previous))
    }

    fn status_is(&self, step_id: &str, pred: impl Fn(StepStatus) -> bool) -> bool {
        self.results.get(step_id).is_some_and(|r| pred(r.status))
    }

    fn data_of(&self, step_id: Option<&str>) -> &Value {
        match step_id {
            Some(id) => self
                .results
                .get(id)
                .map(|r| &r.output)
                .unwrap_or(&NULL),
            None => &self.input,
        }
    }
}

fn has_data(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        _ => true,
    }
}

fn contains(value: &Value, needle: &str) -> bool {
    match value {
        Value::Null => false,
        Value::String(s) => s.contains(needle),
        other => other.to_string().contains(needle),
    }
}
