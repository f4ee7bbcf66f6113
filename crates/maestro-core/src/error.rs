//! Error taxonomy for the orchestration core.
//!
//! Three layers, matching how failures propagate:
//!
//! - [`OrchestratorError`]: structural problems reported synchronously when a
//!   run is submitted, or when a caller asks about a run that does not exist.
//! - [`StepError`]: per-step failures. These never escape a run; they are
//!   captured into the step's `StepResult`.
//! - [`LifecycleError`]: process-level outcomes of the Lifecycle Manager.
//!
//! [`CatalogError`] covers reading catalog / workflow files from disk.

use serde::{Deserialize, Serialize};

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error("Unknown workflow: {0}")]
    UnknownWorkflow(String),

    #[error("Cyclic dependency between steps: {}", cycle.join(" -> "))]
    CyclicDependency { cycle: Vec<String> },

    #[error("Invalid reference '{reference}' in step '{step}': {reason}")]
    InvalidStepReference {
        step: String,
        reference: String,
        reason: String,
    },

    #[error("Invalid workflow '{workflow}': {reason}")]
    InvalidWorkflow { workflow: String, reason: String },

    #[error("Unknown run: {0}")]
    UnknownRun(String),
}

/// Machine-readable discriminant of a [`StepError`], stored next to the
/// message in `StepResult.error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepErrorKind {
    AgentUnavailable,
    DispatchTimeout,
    UnresolvedReference,
    AgentExecutionError,
    Cancelled,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum StepError {
    #[error("Agent '{agent}' unavailable: {reason}")]
    AgentUnavailable { agent: String, reason: String },

    #[error("Step timed out after {seconds}s")]
    DispatchTimeout { seconds: u64 },

    #[error("Unresolved reference '{reference}': {reason}")]
    UnresolvedReference { reference: String, reason: String },

    #[error("Agent '{agent}' failed: {message}")]
    AgentExecutionError { agent: String, message: String },

    #[error("Cancelled")]
    Cancelled,
}

impl StepError {
    pub fn kind(&self) -> StepErrorKind {
        match self {
            StepError::AgentUnavailable { .. } => StepErrorKind::AgentUnavailable,
            StepError::DispatchTimeout { .. } => StepErrorKind::DispatchTimeout,
            StepError::UnresolvedReference { .. } => StepErrorKind::UnresolvedReference,
            StepError::AgentExecutionError { .. } => StepErrorKind::AgentExecutionError,
            StepError::Cancelled => StepErrorKind::Cancelled,
        }
    }

    pub(crate) fn unresolved(reference: impl Into<String>, reason: impl Into<String>) -> Self {
        StepError::UnresolvedReference {
            reference: reference.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LifecycleError {
    #[error("Unknown agent: {0}")]
    UnknownAgent(String),

    #[error("Agent '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Agent '{0}' is not running")]
    NotRunning(String),

    #[error("Failed to launch agent '{agent}': {reason}")]
    LaunchError { agent: String, reason: String },
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Failed to read '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse '{path}': {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Duplicate {kind} '{name}'")]
    Duplicate { kind: &'static str, name: String },
}
