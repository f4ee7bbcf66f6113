//! The agent seam.
//!
//! The orchestrator never knows what an agent is. It only sees an
//! [`AgentHandle`] produced by an [`AgentLauncher`] from a descriptor. The
//! default launcher ([`process::ProcessLauncher`]) spawns the descriptor's
//! entry point and speaks newline-delimited JSON-RPC over its stdio; tests
//! plug in in-memory launchers instead.

pub mod process;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::catalog::AgentDescriptor;
use crate::error::LifecycleError;

pub use process::{resolve_command, AgentProcess, ProcessLauncher};

/// Parameters of the `invoke` request sent to an agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InvokeRequest {
    pub action: String,
    pub inputs: Value,
    pub run_id: String,
    pub step_id: String,
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum InvokeError {
    /// The agent answered with a JSON-RPC error object.
    #[error("agent error [{code}]: {message}")]
    Rejected { code: i64, message: String },

    #[error("agent process exited")]
    Exited,

    #[error("invocation cancelled")]
    Cancelled,

    #[error("transport error: {0}")]
    Transport(String),
}

/// A started agent.
#[async_trait]
pub trait AgentHandle: Send + Sync {
    /// OS process id, when the agent is backed by a process.
    fn pid(&self) -> Option<u32>;

    fn is_alive(&self) -> bool;

    /// Run one action. Cancelling `cancel` asks the agent to abandon the call
    /// and resolves the future with [`InvokeError::Cancelled`].
    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<Value, InvokeError>;

    /// Ask the agent to exit, forcing it after `grace`.
    async fn shutdown(&self, grace: Duration);
}

#[async_trait]
pub trait AgentLauncher: Send + Sync {
    async fn launch(
        &self,
        descriptor: &AgentDescriptor,
    ) -> Result<Arc<dyn AgentHandle>, LifecycleError>;
}
