//! Validation and compilation of a workflow into an execution plan.
//!
//! A plan is computed once per run, before any step is dispatched:
//! step ids are checked, every reference expression is parsed and bound to a
//! declared step, the dependency graph is checked for cycles, and a stable
//! topological order plus parallel waves are derived from it.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use super::schema::{StepDefinition, WorkflowDefinition};
use super::template::{self, Reference, INPUT_REF};
use crate::error::OrchestratorError;

#[derive(Debug, Clone)]
pub struct ExecutionPlan {
    pub workflow: Arc<WorkflowDefinition>,
    /// Step indices in topological order; ties broken by declaration order.
    pub order: Vec<usize>,
    /// Groups of step indices whose dependencies all lie in earlier groups.
    pub waves: Vec<Vec<usize>>,
    /// Per step: steps whose output it references through its inputs.
    pub data_deps: Vec<Vec<usize>>,
    /// Per step: `data_deps` plus steps named in its conditions.
    pub order_deps: Vec<Vec<usize>>,
    /// Per step: parsed reference expressions from its inputs.
    pub references: Vec<Vec<Reference>>,
}

impl ExecutionPlan {
    pub fn step(&self, index: usize) -> &StepDefinition {
        &self.workflow.steps[index]
    }

    pub fn len(&self) -> usize {
        self.workflow.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workflow.steps.is_empty()
    }

    /// Step ids in execution order.
    pub fn ordered_ids(&self) -> Vec<String> {
        self.order
            .iter()
            .map(|&i| self.step(i).step_id.clone())
            .collect()
    }

    pub fn wave_ids(&self) -> Vec<Vec<String>> {
        self.waves
            .iter()
            .map(|wave| wave.iter().map(|&i| self.step(i).step_id.clone()).collect())
            .collect()
    }

    /// Steps that (transitively) consume the output of `index`.
    pub fn data_dependents(&self, index: usize) -> Vec<usize> {
        let mut found = BTreeSet::new();
        let mut frontier = vec![index];
        while let Some(current) = frontier.pop() {
            for (candidate, deps) in self.data_deps.iter().enumerate() {
                if deps.contains(&current) && found.insert(candidate) {
                    frontier.push(candidate);
                }
            }
        }
        found.into_iter().collect()
    }
}

fn invalid(workflow: &WorkflowDefinition, reason: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidWorkflow {
        workflow: workflow.name.clone(),
        reason: reason.into(),
    }
}

fn valid_step_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Compile `workflow` into an [`ExecutionPlan`], rejecting structural errors.
pub fn compile(workflow: Arc<WorkflowDefinition>) -> Result<ExecutionPlan, OrchestratorError> {
    let steps = &workflow.steps;
    if steps.is_empty() {
        return Err(invalid(&workflow, "workflow has no steps"));
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(steps.len());
    for (i, step) in steps.iter().enumerate() {
        if step.step_id == INPUT_REF {
            return Err(invalid(
                &workflow,
                format!("step id '{}' is reserved for the run input", INPUT_REF),
            ));
        }
        if !valid_step_id(&step.step_id) {
            return Err(invalid(
                &workflow,
                format!(
                    "step id '{}' may only contain letters, digits, '_' and '-'",
                    step.step_id
                ),
            ));
        }
        if index.insert(step.step_id.as_str(), i).is_some() {
            return Err(invalid(
                &workflow,
                format!("duplicate step id '{}'", step.step_id),
            ));
        }
    }

    let mut references = Vec::with_capacity(steps.len());
    let mut data_deps = Vec::with_capacity(steps.len());
    let mut order_deps = Vec::with_capacity(steps.len());

    for step in steps {
        let inputs = serde_json::Value::Object(step.inputs.clone());
        let refs = template::references(&inputs).map_err(|e| {
            OrchestratorError::InvalidStepReference {
                step: step.step_id.clone(),
                reference: e.token,
                reason: e.reason,
            }
        })?;

        let mut deps = BTreeSet::new();
        for r in refs.iter().filter(|r| !r.is_input()) {
            deps.insert(lookup(&index, step, &r.step, &r.raw)?);
        }

        let mut ordering = deps.clone();
        for condition in &step.conditions {
            if let Some(target) = condition.referenced_step() {
                ordering.insert(lookup(&index, step, target, target)?);
            }
        }

        references.push(refs);
        data_deps.push(deps.into_iter().collect::<Vec<_>>());
        order_deps.push(ordering.into_iter().collect::<Vec<_>>());
    }

    let order = topological_order(&order_deps).map_err(|cycle| {
        OrchestratorError::CyclicDependency {
            cycle: cycle
                .into_iter()
                .map(|i| steps[i].step_id.clone())
                .collect(),
        }
    })?;
    let waves = waves(&order, &order_deps);

    Ok(ExecutionPlan {
        workflow,
        order,
        waves,
        data_deps,
        order_deps,
        references,
    })
}

fn lookup(
    index: &HashMap<&str, usize>,
    step: &StepDefinition,
    target: &str,
    raw: &str,
) -> Result<usize, OrchestratorError> {
    index
        .get(target)
        .copied()
        .ok_or_else(|| OrchestratorError::InvalidStepReference {
            step: step.step_id.clone(),
            reference: raw.to_string(),
            reason: format!("no step named '{}' in this workflow", target),
        })
}

/// Kahn's algorithm, always taking the lowest ready declaration index.
/// On failure returns one dependency cycle as a closed path.
fn topological_order(deps: &[Vec<usize>]) -> Result<Vec<usize>, Vec<usize>> {
    let n = deps.len();
    let mut remaining: Vec<usize> = deps.iter().map(|d| d.len()).collect();
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); n];
    for (step, step_deps) in deps.iter().enumerate() {
        for &dep in step_deps {
            dependents[dep].push(step);
        }
    }

    let mut ready: BTreeSet<usize> = (0..n).filter(|&i| remaining[i] == 0).collect();
    let mut order = Vec::with_capacity(n);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &dependent in &dependents[next] {
            remaining[dependent] -= 1;
            if remaining[dependent] == 0 {
                ready.insert(dependent);
            }
        }
    }

    if order.len() == n {
        Ok(order)
    } else {
        Err(find_cycle(deps, &remaining))
    }
}

/// Depth-first search restricted to steps Kahn could not schedule.
fn find_cycle(deps: &[Vec<usize>], remaining: &[usize]) -> Vec<usize> {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        OnStack,
        Done,
    }

    fn visit(
        node: usize,
        deps: &[Vec<usize>],
        marks: &mut [Mark],
        stack: &mut Vec<usize>,
    ) -> Option<Vec<usize>> {
        marks[node] = Mark::OnStack;
        stack.push(node);
        for &dep in &deps[node] {
            match marks[dep] {
                Mark::OnStack => {
                    let start = stack.iter().position(|&s| s == dep).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    cycle.push(dep);
                    return Some(cycle);
                }
                Mark::New => {
                    if let Some(cycle) = visit(dep, deps, marks, stack) {
                        return Some(cycle);
                    }
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[node] = Mark::Done;
        None
    }

    let mut marks = vec![Mark::New; deps.len()];
    for start in (0..deps.len()).filter(|&i| remaining[i] > 0) {
        if marks[start] == Mark::New {
            let mut stack = Vec::new();
            if let Some(cycle) = visit(start, deps, &mut marks, &mut stack) {
                return cycle;
            }
        }
    }
    Vec::new()
}

fn waves(order: &[usize], deps: &[Vec<usize>]) -> Vec<Vec<usize>> {
    let mut level = vec![0usize; deps.len()];
    let mut waves: Vec<Vec<usize>> = Vec::new();
    for &step in order {
        let lvl = deps[step].iter().map(|&d| level[d] + 1).max().unwrap_or(0);
        level[step] = lvl;
        if waves.len() <= lvl {
            waves.resize_with(lvl + 1, Vec::new);
        }
        waves[lvl].push(step);
    }
    waves
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_yaml(yaml: &str) -> Result<ExecutionPlan, OrchestratorError> {
        compile(Arc::new(WorkflowDefinition::from_yaml(yaml).unwrap()))
    }

    #[test]
    fn test_stable_order_and_waves() {
        let plan = compile_yaml(
            r#"
name: diamond
execution_mode: parallel
steps:
  - { step_id: z, agent_name: a, inputs: { x: "${x}", y: "${y.value}" } }
  - { step_id: x, agent_name: a }
  - { step_id: y, agent_name: a, inputs: { q: "${input.q}" } }
"#,
        )
        .unwrap();
        assert_eq!(plan.ordered_ids(), vec!["x", "y", "z"]);
        assert_eq!(
            plan.wave_ids(),
            vec![vec!["x".to_string(), "y".to_string()], vec!["z".to_string()]]
        );
        assert_eq!(plan.data_dependents(1), vec![0]);
    }

    #[test]
    fn test_cycle_is_rejected_with_path() {
        let err = compile_yaml(
            r#"
name: loop
steps:
  - { step_id: a, agent_name: x, inputs: { v: "${b}" } }
  - { step_id: b, agent_name: x, inputs: { v: "${a}" } }
"#,
        )
        .unwrap_err();
        match err {
            OrchestratorError::CyclicDependency { cycle } => {
                assert_eq!(cycle.first(), cycle.last());
                assert!(cycle.contains(&"a".to_string()));
                assert!(cycle.contains(&"b".to_string()));
            }
            other => panic!("expected cycle, got {:?}", other),
        }
    }

    #[test]
    fn test_self_reference_is_a_cycle() {
        let err = compile_yaml(
            "name: s\nsteps:\n  - { step_id: a, agent_name: x, inputs: { v: \"${a.out}\" } }\n",
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));
    }

    #[test]
    fn test_condition_edges_take_part_in_cycles() {
        let err = compile_yaml(
            r#"
name: loop
execution_mode: conditional
steps:
  - { step_id: a, agent_name: x, conditions: [ { step_succeeded: b } ] }
  - { step_id: b, agent_name: x, inputs: { v: "${a}" } }
"#,
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::CyclicDependency { .. }));
    }

    #[test]
    fn test_unknown_and_malformed_references() {
        let err = compile_yaml(
            "name: u\nsteps:\n  - { step_id: a, agent_name: x, inputs: { v: \"${nope}\" } }\n",
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStepReference { .. }));

        let err = compile_yaml(
            "name: m\nsteps:\n  - { step_id: a, agent_name: x, inputs: { v: \"${}\" } }\n",
        )
        .unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidStepReference { .. }));
    }

    #[test]
    fn test_invalid_step_ids() {
        for yaml in [
            "name: r\nsteps:\n  - { step_id: input, agent_name: x }\n",
            "name: d\nsteps:\n  - { step_id: a, agent_name: x }\n  - { step_id: a, agent_name: y }\n",
            "name: c\nsteps:\n  - { step_id: \"a.b\", agent_name: x }\n",
            "name: e\nsteps: []\n",
        ] {
            assert!(
                matches!(compile_yaml(yaml), Err(OrchestratorError::InvalidWorkflow { .. })),
                "expected InvalidWorkflow for {}",
                yaml
            );
        }
    }
}
