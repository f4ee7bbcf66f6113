//! Background liveness and resource polling for one running agent.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sysinfo::{Pid, ProcessesToUpdate, System};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::AgentSlot;
use crate::agent::AgentHandle;
use crate::models::AgentStatus;

const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

/// Poll `handle` every `interval` until `cancel` fires or the agent dies.
///
/// An agent that dies while `running` is marked `crashed`; it is not restarted
/// here.
pub(crate) fn spawn_monitor(
    slot: Arc<AgentSlot>,
    handle: Arc<dyn AgentHandle>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut sys = System::new();
        let pid = handle.pid().map(Pid::from_u32);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(interval) => {}
            }

            if !handle.is_alive() {
                let mut state = slot.state.write().await;
                if state.status == AgentStatus::Running {
                    tracing::warn!(
                        "[LifecycleManager:{}] Process {:?} exited unexpectedly",
                        slot.name,
                        state.pid
                    );
                    state.status = AgentStatus::Crashed;
                    state.pid = None;
                    state.metrics.cpu_percent = 0.0;
                    state.metrics.memory_mb = 0.0;
                }
                break;
            }

            let sample = pid.and_then(|pid| {
                sys.refresh_processes(ProcessesToUpdate::Some(&[pid]), true);
                sys.process(pid)
                    .map(|p| (p.cpu_usage(), p.memory() as f64 / BYTES_PER_MB))
            });

            let mut state = slot.state.write().await;
            if state.status != AgentStatus::Running {
                continue;
            }
            if let Some((cpu, memory_mb)) = sample {
                state.metrics.cpu_percent = cpu;
                state.metrics.memory_mb = memory_mb;
            }
            if let Some(started) = state.started_at {
                state.metrics.uptime_seconds = (Utc::now() - started).num_seconds().max(0) as u64;
            }
        }
    })
}
