//! Step Dispatcher: run one step against its agent, bounded by a timeout.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::schema::StepDefinition;
use crate::agent::{InvokeError, InvokeRequest};
use crate::error::{LifecycleError, StepError};
use crate::lifecycle::LifecycleManager;

pub struct StepDispatcher {
    lifecycle: Arc<LifecycleManager>,
    cancel_grace: Duration,
}

impl StepDispatcher {
    pub fn new(lifecycle: Arc<LifecycleManager>, cancel_grace: Duration) -> Self {
        Self {
            lifecycle,
            cancel_grace,
        }
    }

    /// Dispatch `step` with already-resolved inputs.
    ///
    /// The timeout covers the agent call only, not agent start-up. On timeout
    /// the in-flight call is cancelled but the agent process is left running.
    /// `run_cancel` aborts the call and yields [`StepError::Cancelled`].
    pub async fn dispatch(
        &self,
        run_id: &str,
        step: &StepDefinition,
        inputs: Value,
        timeout: Duration,
        run_cancel: &CancellationToken,
    ) -> Result<Value, StepError> {
        let agent = step.agent_name.as_str();
        let handle = self
            .lifecycle
            .ensure_started(agent)
            .await
            .map_err(|e| StepError::AgentUnavailable {
                agent: agent.to_string(),
                reason: match e {
                    LifecycleError::UnknownAgent(_) => "not in the catalog".to_string(),
                    other => other.to_string(),
                },
            })?;

        let request = InvokeRequest {
            action: step.action.clone(),
            inputs,
            run_id: run_id.to_string(),
            step_id: step.step_id.clone(),
        };

        tracing::debug!(
            "[StepDispatcher:{}] Invoking {}.{} for step '{}'",
            run_id,
            agent,
            step.action,
            step.step_id
        );

        let call_cancel = run_cancel.child_token();
        let started = Instant::now();
        let call = handle.invoke(request, call_cancel.clone());
        tokio::pin!(call);

        let outcome = tokio::select! {
            result = &mut call => result.map_err(|e| execution_error(agent, e)),
            _ = tokio::time::sleep(timeout) => {
                call_cancel.cancel();
                let _ = tokio::time::timeout(self.cancel_grace, &mut call).await;
                Err(StepError::DispatchTimeout { seconds: timeout.as_secs() })
            }
        };

        let elapsed_ms = started.elapsed().as_secs_f64() * 1000.0;
        let outcome = match outcome {
            Err(StepError::AgentExecutionError { .. }) if run_cancel.is_cancelled() => {
                Err(StepError::Cancelled)
            }
            other => other,
        };
        self.lifecycle
            .record_request(agent, elapsed_ms, outcome.is_ok())
            .await;

        if let Err(e) = &outcome {
            tracing::warn!("[StepDispatcher:{}] Step '{}' failed: {}", run_id, step.step_id, e);
        }
        outcome
    }
}

fn execution_error(agent: &str, err: InvokeError) -> StepError {
    match err {
        InvokeError::Cancelled => StepError::Cancelled,
        InvokeError::Rejected { message, .. } => StepError::AgentExecutionError {
            agent: agent.to_string(),
            message,
        },
        other => StepError::AgentExecutionError {
            agent: agent.to_string(),
            message: other.to_string(),
        },
    }
}
