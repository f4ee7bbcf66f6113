//! Process Lifecycle Manager.
//!
//! Owns agent name → running handle. Every agent has a slot with its own
//! control lock, so `start` / `stop` / `ensure_started` for one agent are
//! serialized while different agents proceed independently. At most one
//! process per agent name exists at a time.
//!
//! State machine per agent:
//!
//! ```text
//! stopped → starting → running → stopping → stopped
//!                         └──→ crashed (process exited on its own)
//! ```
//!
//! A crashed agent stays crashed until someone starts it again; the Step
//! Dispatcher does that through `ensure_started` on its next use.

mod monitor;

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::agent::{resolve_command, AgentHandle, AgentLauncher};
use crate::catalog::DescriptorStore;
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;
use crate::models::{AgentMetrics, AgentProcessState, AgentStatus};

pub(crate) struct AgentSlot {
    pub(crate) name: String,
    control: Mutex<Control>,
    pub(crate) state: RwLock<AgentProcessState>,
}

#[derive(Default)]
struct Control {
    handle: Option<Arc<dyn AgentHandle>>,
    monitor: Option<(CancellationToken, JoinHandle<()>)>,
}

impl Control {
    fn live_handle(&self) -> Option<Arc<dyn AgentHandle>> {
        self.handle.as_ref().filter(|h| h.is_alive()).cloned()
    }

    fn stop_monitor(&mut self) {
        if let Some((cancel, task)) = self.monitor.take() {
            cancel.cancel();
            task.abort();
        }
    }
}

/// Result of checking an agent's prerequisites without launching it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentValidation {
    pub agent_name: String,
    pub missing_credentials: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved_command: Option<String>,
    pub command_found: bool,
    pub cwd_exists: bool,
}

impl AgentValidation {
    pub fn is_ok(&self) -> bool {
        self.missing_credentials.is_empty() && self.command_found && self.cwd_exists
    }
}

pub struct LifecycleManager {
    catalog: Arc<DescriptorStore>,
    launcher: Arc<dyn AgentLauncher>,
    config: LifecycleConfig,
    slots: Mutex<HashMap<String, Arc<AgentSlot>>>,
}

impl LifecycleManager {
    pub fn new(
        catalog: Arc<DescriptorStore>,
        launcher: Arc<dyn AgentLauncher>,
        config: LifecycleConfig,
    ) -> Self {
        Self {
            catalog,
            launcher,
            config,
            slots: Mutex::new(HashMap::new()),
        }
    }

    async fn slot(&self, agent_name: &str) -> Result<Arc<AgentSlot>, LifecycleError> {
        if self.catalog.get_descriptor(agent_name).is_none() {
            return Err(LifecycleError::UnknownAgent(agent_name.to_string()));
        }
        let mut slots = self.slots.lock().await;
        Ok(slots
            .entry(agent_name.to_string())
            .or_insert_with(|| {
                Arc::new(AgentSlot {
                    name: agent_name.to_string(),
                    control: Mutex::new(Control::default()),
                    state: RwLock::new(AgentProcessState::stopped(agent_name)),
                })
            })
            .clone())
    }

    async fn existing_slot(&self, agent_name: &str) -> Option<Arc<AgentSlot>> {
        self.slots.lock().await.get(agent_name).cloned()
    }

    /// Launch the agent. Fails with `AlreadyRunning` when a live process exists.
    pub async fn start(&self, agent_name: &str) -> Result<AgentProcessState, LifecycleError> {
        let slot = self.slot(agent_name).await?;
        let mut control = slot.control.lock().await;
        if control.live_handle().is_some() {
            return Err(LifecycleError::AlreadyRunning(agent_name.to_string()));
        }
        self.launch_locked(&slot, &mut control).await?;
        drop(control);
        let state = slot.state.read().await.clone();
        Ok(state)
    }

    /// Return a live handle, starting (or restarting a crashed) agent if needed.
    pub async fn ensure_started(
        &self,
        agent_name: &str,
    ) -> Result<Arc<dyn AgentHandle>, LifecycleError> {
        let slot = self.slot(agent_name).await?;
        let mut control = slot.control.lock().await;
        if let Some(handle) = control.live_handle() {
            return Ok(handle);
        }
        self.launch_locked(&slot, &mut control).await
    }

    async fn launch_locked(
        &self,
        slot: &Arc<AgentSlot>,
        control: &mut Control,
    ) -> Result<Arc<dyn AgentHandle>, LifecycleError> {
        let descriptor = self
            .catalog
            .get_descriptor(&slot.name)
            .ok_or_else(|| LifecycleError::UnknownAgent(slot.name.clone()))?;

        control.stop_monitor();
        if control.handle.take().is_some() {
            tracing::info!("[LifecycleManager:{}] Replacing dead process", slot.name);
        }

        {
            let mut state = slot.state.write().await;
            *state = AgentProcessState::stopped(&slot.name);
            state.status = AgentStatus::Starting;
        }
        tracing::info!("[LifecycleManager:{}] Starting", slot.name);

        let handle = match self.launcher.launch(&descriptor).await {
            Ok(handle) => handle,
            Err(e) => {
                tracing::warn!("[LifecycleManager:{}] Launch failed: {}", slot.name, e);
                *slot.state.write().await = AgentProcessState::stopped(&slot.name);
                return Err(e);
            }
        };

        {
            let mut state = slot.state.write().await;
            state.status = AgentStatus::Running;
            state.pid = handle.pid();
            state.started_at = Some(Utc::now());
            state.metrics = AgentMetrics::default();
        }

        let cancel = CancellationToken::new();
        let task = monitor::spawn_monitor(
            slot.clone(),
            handle.clone(),
            self.config.poll_interval(),
            cancel.clone(),
        );
        control.monitor = Some((cancel, task));
        control.handle = Some(handle.clone());

        tracing::info!(
            "[LifecycleManager:{}] Running (pid {:?})",
            slot.name,
            handle.pid()
        );
        Ok(handle)
    }

    /// Gracefully stop the agent, forcing it after the configured grace period.
    pub async fn stop(&self, agent_name: &str) -> Result<(), LifecycleError> {
        let slot = self.slot(agent_name).await?;
        let mut control = slot.control.lock().await;
        let handle = match control.live_handle() {
            Some(handle) => handle,
            None => return Err(LifecycleError::NotRunning(agent_name.to_string())),
        };

        slot.state.write().await.status = AgentStatus::Stopping;
        tracing::info!("[LifecycleManager:{}] Stopping", agent_name);

        control.stop_monitor();
        handle.shutdown(self.config.grace_period()).await;
        control.handle = None;

        *slot.state.write().await = AgentProcessState::stopped(agent_name);
        tracing::info!("[LifecycleManager:{}] Stopped", agent_name);
        Ok(())
    }

    /// Stop if running, then start.
    pub async fn restart(&self, agent_name: &str) -> Result<AgentProcessState, LifecycleError> {
        match self.stop(agent_name).await {
            Ok(()) | Err(LifecycleError::NotRunning(_)) => {}
            Err(e) => return Err(e),
        }
        self.start(agent_name).await
    }

    /// Stop every running agent. Returns the names that were stopped.
    pub async fn stop_all(&self) -> Vec<String> {
        let slots: Vec<Arc<AgentSlot>> = self.slots.lock().await.values().cloned().collect();
        let mut stopped = Vec::new();
        for slot in slots {
            match self.stop(&slot.name).await {
                Ok(()) => stopped.push(slot.name.clone()),
                Err(LifecycleError::NotRunning(_)) => {}
                Err(e) => tracing::warn!("[LifecycleManager] Failed to stop {}: {}", slot.name, e),
            }
        }
        stopped
    }

    /// Snapshot of one agent. Never-started and stopped agents report `stopped`.
    pub async fn status(&self, agent_name: &str) -> Result<AgentProcessState, LifecycleError> {
        if self.catalog.get_descriptor(agent_name).is_none() {
            return Err(LifecycleError::UnknownAgent(agent_name.to_string()));
        }
        match self.existing_slot(agent_name).await {
            Some(slot) => Ok(snapshot(&slot).await),
            None => Ok(AgentProcessState::stopped(agent_name)),
        }
    }

    /// Snapshots of every catalogued agent, sorted by name.
    pub async fn list_statuses(&self) -> Vec<AgentProcessState> {
        let mut out = Vec::new();
        for descriptor in self.catalog.list_agents() {
            match self.existing_slot(&descriptor.name).await {
                Some(slot) => out.push(snapshot(&slot).await),
                None => out.push(AgentProcessState::stopped(&descriptor.name)),
            }
        }
        out
    }

    /// Check credentials, entry point and working directory without launching.
    pub fn validate(&self, agent_name: &str) -> Result<AgentValidation, LifecycleError> {
        let descriptor = self
            .catalog
            .get_descriptor(agent_name)
            .ok_or_else(|| LifecycleError::UnknownAgent(agent_name.to_string()))?;
        let entry = &descriptor.entrypoint;
        let resolved = resolve_command(&entry.command, entry.cwd.as_deref());
        Ok(AgentValidation {
            agent_name: descriptor.name.clone(),
            missing_credentials: descriptor.missing_credentials(),
            command_found: resolved.is_some(),
            resolved_command: resolved.map(|p| p.display().to_string()),
            cwd_exists: entry.cwd.as_ref().map_or(true, |dir| dir.is_dir()),
        })
    }

    /// Fold one dispatch outcome into the agent's request metrics.
    pub async fn record_request(&self, agent_name: &str, elapsed_ms: f64, ok: bool) {
        if let Some(slot) = self.existing_slot(agent_name).await {
            slot.state.write().await.metrics.record_request(elapsed_ms, ok);
        }
    }
}

async fn snapshot(slot: &AgentSlot) -> AgentProcessState {
    let mut state = slot.state.read().await.clone();
    if let (AgentStatus::Running, Some(started)) = (state.status, state.started_at) {
        state.metrics.uptime_seconds = (Utc::now() - started).num_seconds().max(0) as u64;
    }
    state
}
