//! Schema types for workflow definitions.
//!
//! A workflow is plain data, usually loaded from YAML:
//!
//! ```yaml
//! name: "content-research-pipeline"
//! description: "Research a topic, gather knowledge, write it up"
//! execution_mode: sequential      # sequential | parallel | conditional
//!
//! steps:
//!   - step_id: research
//!     agent_name: web-researcher
//!     action: search
//!     inputs:
//!       query: "${input.topic}"
//!     timeout_secs: 300
//!
//!   - step_id: content
//!     agent_name: blog-writer
//!     action: create
//!     inputs:
//!       topic: "${input.topic}"
//!       findings: "${research.key_findings}"
//!     conditions:
//!       - previous_succeeded
//! ```

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Scheduling discipline for a workflow's steps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// One step at a time in topological order; a critical failure aborts the rest.
    #[default]
    Sequential,
    /// Ready steps run concurrently in waves.
    Parallel,
    /// Sequential, with each step gated by its `conditions`.
    Conditional,
}

impl ExecutionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sequential => "sequential",
            Self::Parallel => "parallel",
            Self::Conditional => "conditional",
        }
    }
}

/// Top-level workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    /// Workflow name (unique within a catalog)
    pub name: String,

    #[serde(default)]
    pub description: Option<String>,

    #[serde(default, alias = "type")]
    pub execution_mode: ExecutionMode,

    pub steps: Vec<StepDefinition>,
}

/// A single step, bound to one agent invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the workflow; used by `${step_id}` references.
    #[serde(alias = "id")]
    pub step_id: String,

    /// Catalog name of the agent that runs this step.
    #[serde(alias = "agent")]
    pub agent_name: String,

    /// Opaque action string handed to the agent.
    #[serde(default = "default_action")]
    pub action: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Parameter name → literal value or reference expression.
    #[serde(default)]
    pub inputs: serde_json::Map<String, serde_json::Value>,

    /// Per-step timeout; the engine default applies when absent.
    #[serde(default, alias = "timeout", alias = "timeout_seconds")]
    pub timeout_secs: Option<u64>,

    /// Predicates over earlier step outcomes. All must hold.
    ///
    /// Written as plain names (`previous_succeeded`) or single-key maps
    /// (`step_failed: research`), not YAML `!tags`.
    #[serde(default, with = "serde_yaml::with::singleton_map_recursive")]
    pub conditions: Vec<Condition>,

    /// A failure of this step does not abort the rest of a sequential run.
    #[serde(default)]
    pub continue_on_error: bool,
}

fn default_action() -> String {
    "process".to_string()
}

impl StepDefinition {
    /// A critical step aborts sequential/conditional runs when it fails and
    /// marks the whole run `failed`.
    pub fn is_critical(&self) -> bool {
        self.conditions.is_empty() && !self.continue_on_error
    }
}

/// A predicate evaluated before a step runs in conditional mode.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Condition {
    /// The step immediately before this one succeeded.
    PreviousSucceeded,
    /// The step immediately before this one failed or timed out.
    PreviousFailed,
    /// The step immediately before this one produced non-empty output.
    HasData,
    StepSucceeded(String),
    StepFailed(String),
    StepSkipped(String),
    /// The output of `step` (or of the previous step) contains `value`.
    OutputContains {
        #[serde(default)]
        step: Option<String>,
        value: String,
    },
}

impl Condition {
    /// The step this condition names explicitly, if any.
    pub fn referenced_step(&self) -> Option<&str> {
        match self {
            Condition::StepSucceeded(s) | Condition::StepFailed(s) | Condition::StepSkipped(s) => {
                Some(s)
            }
            Condition::OutputContains { step, .. } => step.as_deref(),
            _ => None,
        }
    }
}

impl WorkflowDefinition {
    pub fn from_yaml(yaml: &str) -> Result<Self, serde_yaml::Error> {
        serde_yaml::from_str(yaml)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, CatalogError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|source| CatalogError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_yaml(&content).map_err(|source| CatalogError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    pub fn step(&self, step_id: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }
}
