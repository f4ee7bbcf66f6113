use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{StepError, StepErrorKind};
use crate::workflow::schema::ExecutionMode;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Skipped,
    TimedOut,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
            Self::TimedOut => "timed_out",
        }
    }

    /// Terminal statuses; `skipped` counts as terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Failed | Self::TimedOut)
    }
}

/// The error half of a failed or timed-out [`StepResult`].
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepFailure {
    pub kind: StepErrorKind,
    pub message: String,
}

impl From<&StepError> for StepFailure {
    fn from(err: &StepError) -> Self {
        Self {
            kind: err.kind(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StepResult {
    pub step_id: String,
    pub status: StepStatus,
    #[serde(default)]
    pub output: serde_json::Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<StepFailure>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl StepResult {
    pub fn pending(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Pending,
            output: serde_json::Value::Null,
            error: None,
            started_at: None,
            finished_at: None,
        }
    }

    pub fn succeeded(step_id: &str, output: serde_json::Value, started_at: DateTime<Utc>) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Succeeded,
            output,
            error: None,
            started_at: Some(started_at),
            finished_at: Some(Utc::now()),
        }
    }

    /// A failed result; `DispatchTimeout` maps to `timed_out`, everything else to `failed`.
    pub fn failed(step_id: &str, err: &StepError, started_at: Option<DateTime<Utc>>) -> Self {
        let status = match err {
            StepError::DispatchTimeout { .. } => StepStatus::TimedOut,
            _ => StepStatus::Failed,
        };
        Self {
            step_id: step_id.to_string(),
            status,
            output: serde_json::Value::Null,
            error: Some(StepFailure::from(err)),
            started_at,
            finished_at: Some(Utc::now()),
        }
    }

    pub fn skipped(step_id: &str) -> Self {
        Self {
            step_id: step_id.to_string(),
            status: StepStatus::Skipped,
            output: serde_json::Value::Null,
            error: None,
            started_at: None,
            finished_at: Some(Utc::now()),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Completed,
    PartialFailure,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartialFailure => "partial_failure",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Running)
    }
}

/// Queryable record of one workflow run.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRecord {
    pub run_id: String,
    pub workflow_name: String,
    pub execution_mode: ExecutionMode,
    pub status: RunStatus,
    pub steps_completed: usize,
    pub total_steps: usize,
    /// One entry per step, in execution-plan order.
    pub steps: Vec<StepResult>,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl ExecutionRecord {
    pub fn new(
        run_id: &str,
        workflow_name: &str,
        mode: ExecutionMode,
        step_ids: &[String],
    ) -> Self {
        Self {
            run_id: run_id.to_string(),
            workflow_name: workflow_name.to_string(),
            execution_mode: mode,
            status: RunStatus::Running,
            steps_completed: 0,
            total_steps: step_ids.len(),
            steps: step_ids.iter().map(|id| StepResult::pending(id)).collect(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    pub fn step(&self, step_id: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_id == step_id)
    }

    pub(crate) fn step_mut(&mut self, step_id: &str) -> Option<&mut StepResult> {
        self.steps.iter_mut().find(|s| s.step_id == step_id)
    }

    pub fn count(&self, status: StepStatus) -> usize {
        self.steps.iter().filter(|s| s.status == status).count()
    }

    /// Steps that did not reach a terminal status or were skipped never count as completed.
    pub(crate) fn recount(&mut self) {
        self.steps_completed = self
            .steps
            .iter()
            .filter(|s| s.status.is_terminal() && s.status != StepStatus::Skipped)
            .count();
    }
}
