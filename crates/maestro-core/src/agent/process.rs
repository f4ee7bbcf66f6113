//! AgentProcess: one agent child process speaking JSON-RPC over stdio.
//!
//! Wire protocol, one JSON object per line:
//!   - `invoke` request, params `{action, inputs, runId, stepId}`; the
//!     response `result` is the step output, an `error` object is a failure
//!   - `cancel` notification, params `{id}`, abandons an in-flight invoke
//!   - `shutdown` notification asks the agent to exit; stdin is closed after it
//!
//! Lifecycle:
//!   1. `spawn(descriptor)`: start the child, the stdout/stderr readers and the exit watcher
//!   2. wait `startup_probe`; a child that already exited is a launch error
//!   3. `invoke(...)`: any number of concurrent requests, matched by id
//!   4. `shutdown(grace)`: notify, close stdin, kill after the grace period

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::ChildStdin;
use tokio::sync::{oneshot, watch, Mutex};
use tokio_util::sync::CancellationToken;

use super::{AgentHandle, AgentLauncher, InvokeError, InvokeRequest};
use crate::catalog::AgentDescriptor;
use crate::config::LifecycleConfig;
use crate::error::LifecycleError;

type PendingMap = Arc<Mutex<HashMap<u64, oneshot::Sender<Result<Value, InvokeError>>>>>;

/// Launches agents as child processes.
pub struct ProcessLauncher {
    startup_probe: Duration,
}

impl ProcessLauncher {
    pub fn new(config: &LifecycleConfig) -> Self {
        Self {
            startup_probe: config.startup_probe(),
        }
    }
}

#[async_trait]
impl AgentLauncher for ProcessLauncher {
    async fn launch(
        &self,
        descriptor: &AgentDescriptor,
    ) -> Result<Arc<dyn AgentHandle>, LifecycleError> {
        let process = AgentProcess::spawn(descriptor, self.startup_probe).await?;
        Ok(Arc::new(process))
    }
}

/// A managed agent child process.
pub struct AgentProcess {
    name: String,
    pid: Option<u32>,
    stdin: Arc<Mutex<Option<ChildStdin>>>,
    pending: PendingMap,
    next_id: AtomicU64,
    alive: Arc<AtomicBool>,
    exited: watch::Receiver<bool>,
    kill_tx: Mutex<Option<oneshot::Sender<()>>>,
}

impl AgentProcess {
    /// Spawn the agent's entry point and start the background tasks.
    pub async fn spawn(
        descriptor: &AgentDescriptor,
        startup_probe: Duration,
    ) -> Result<Self, LifecycleError> {
        let name = descriptor.name.clone();
        let launch_error = |reason: String| LifecycleError::LaunchError {
            agent: descriptor.name.clone(),
            reason,
        };

        let missing = descriptor.missing_credentials();
        if !missing.is_empty() {
            return Err(launch_error(format!(
                "missing required credentials: {}",
                missing.join(", ")
            )));
        }

        let entry = &descriptor.entrypoint;
        let resolved = resolve_command(&entry.command, entry.cwd.as_deref())
            .unwrap_or_else(|| PathBuf::from(&entry.command));

        tracing::info!(
            "[AgentProcess:{}] Spawning: {} {} (cwd: {})",
            name,
            resolved.display(),
            entry.args.join(" "),
            entry
                .cwd
                .as_ref()
                .map(|p| p.display().to_string())
                .unwrap_or_else(|| ".".to_string()),
        );

        let mut command = tokio::process::Command::new(&resolved);
        command
            .args(&entry.args)
            .envs(&entry.env)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);
        if let Some(cwd) = &entry.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            launch_error(format!(
                "failed to spawn '{}' (resolved: '{}'): {}",
                entry.command,
                resolved.display(),
                e
            ))
        })?;

        let pid = child.id();
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| launch_error("no stdin on child process".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| launch_error("no stdout on child process".to_string()))?;
        let stderr = child.stderr.take();

        let alive = Arc::new(AtomicBool::new(true));
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));

        if let Some(stderr) = stderr {
            let name_clone = name.clone();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        tracing::debug!("[AgentProcess:{} stderr] {}", name_clone, line);
                    }
                }
            });
        }

        // stdout reader: route responses to their pending callers
        let pending_clone = pending.clone();
        let name_clone = name.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let msg = match serde_json::from_str::<Value>(line) {
                    Ok(v) => v,
                    Err(_) => match try_parse_embedded_json(line) {
                        Some(v) => v,
                        None => {
                            tracing::debug!(
                                "[AgentProcess:{}] Non-JSON stdout: {}",
                                name_clone,
                                truncate(line, 200)
                            );
                            continue;
                        }
                    },
                };
                route_message(&name_clone, msg, &pending_clone).await;
            }
            tracing::debug!("[AgentProcess:{}] stdout reader finished", name_clone);
        });

        // exit watcher: owns the child; killing goes through `kill_tx`
        let (kill_tx, kill_rx) = oneshot::channel::<()>();
        let (exited_tx, exited_rx) = watch::channel(false);
        let alive_clone = alive.clone();
        let pending_clone = pending.clone();
        let name_clone = name.clone();
        tokio::spawn(async move {
            let waited = tokio::select! {
                status = child.wait() => Some(status),
                _ = kill_rx => None,
            };
            let status = match waited {
                Some(status) => status,
                None => {
                    tracing::warn!("[AgentProcess:{}] Killing process", name_clone);
                    if let Err(e) = child.kill().await {
                        tracing::warn!("[AgentProcess:{}] Kill failed: {}", name_clone, e);
                    }
                    child.wait().await
                }
            };
            match status {
                Ok(status) => tracing::info!("[AgentProcess:{}] Exited: {}", name_clone, status),
                Err(e) => tracing::warn!("[AgentProcess:{}] Wait failed: {}", name_clone, e),
            }
            alive_clone.store(false, Ordering::SeqCst);
            for (_, tx) in pending_clone.lock().await.drain() {
                let _ = tx.send(Err(InvokeError::Exited));
            }
            let _ = exited_tx.send(true);
        });

        tokio::time::sleep(startup_probe).await;

        if !alive.load(Ordering::SeqCst) {
            return Err(launch_error("process exited during startup".to_string()));
        }

        tracing::info!("[AgentProcess:{}] Process started (pid {:?})", name, pid);

        Ok(Self {
            name,
            pid,
            stdin: Arc::new(Mutex::new(Some(stdin))),
            pending,
            next_id: AtomicU64::new(1),
            alive,
            exited: exited_rx,
            kill_tx: Mutex::new(Some(kill_tx)),
        })
    }

    async fn write_message(&self, msg: &Value) -> Result<(), InvokeError> {
        let mut data =
            serde_json::to_string(msg).map_err(|e| InvokeError::Transport(e.to_string()))?;
        data.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| InvokeError::Transport("stdin closed".to_string()))?;
        stdin
            .write_all(data.as_bytes())
            .await
            .map_err(|e| InvokeError::Transport(format!("write: {}", e)))?;
        stdin
            .flush()
            .await
            .map_err(|e| InvokeError::Transport(format!("flush: {}", e)))
    }

    async fn wait_exited(&self, limit: Duration) -> bool {
        let mut exited = self.exited.clone();
        let finished = tokio::time::timeout(limit, exited.wait_for(|e| *e))
            .await
            .is_ok();
        finished
    }

    async fn kill(&self) {
        if let Some(tx) = self.kill_tx.lock().await.take() {
            let _ = tx.send(());
        }
    }
}

#[async_trait]
impl AgentHandle for AgentProcess {
    fn pid(&self) -> Option<u32> {
        self.pid
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    async fn invoke(
        &self,
        request: InvokeRequest,
        cancel: CancellationToken,
    ) -> Result<Value, InvokeError> {
        if !self.is_alive() {
            return Err(InvokeError::Exited);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        let params =
            serde_json::to_value(&request).map_err(|e| InvokeError::Transport(e.to_string()))?;
        let msg = json!({
            "jsonrpc": "2.0",
            "id": id,
            "method": "invoke",
            "params": params,
        });
        if let Err(e) = self.write_message(&msg).await {
            self.pending.lock().await.remove(&id);
            return Err(e);
        }

        tokio::select! {
            result = rx => result.unwrap_or(Err(InvokeError::Exited)),
            _ = cancel.cancelled() => {
                self.pending.lock().await.remove(&id);
                tracing::debug!("[AgentProcess:{}] Cancelling request {}", self.name, id);
                let notification = json!({
                    "jsonrpc": "2.0",
                    "method": "cancel",
                    "params": { "id": id },
                });
                let _ = self.write_message(&notification).await;
                Err(InvokeError::Cancelled)
            }
        }
    }

    async fn shutdown(&self, grace: Duration) {
        if !self.is_alive() {
            return;
        }

        tracing::info!("[AgentProcess:{}] Shutting down", self.name);
        let notification = json!({ "jsonrpc": "2.0", "method": "shutdown" });
        let _ = self.write_message(&notification).await;
        // closing stdin is the second, stronger hint
        self.stdin.lock().await.take();

        if self.wait_exited(grace).await {
            return;
        }

        tracing::warn!(
            "[AgentProcess:{}] Did not exit within {}ms, forcing",
            self.name,
            grace.as_millis()
        );
        self.kill().await;
        if !self.wait_exited(Duration::from_secs(5)).await {
            tracing::warn!("[AgentProcess:{}] Still not reaped after kill", self.name);
        }
    }
}

async fn route_message(name: &str, msg: Value, pending: &PendingMap) {
    let id = msg.get("id").and_then(|v| v.as_u64());
    let has_result = msg.get("result").is_some();
    let has_error = msg.get("error").is_some();

    match id {
        Some(id) if has_result || has_error => {
            let Some(tx) = pending.lock().await.remove(&id) else {
                tracing::debug!("[AgentProcess:{}] Response for unknown id {}", name, id);
                return;
            };
            let outcome = if has_error {
                Err(InvokeError::Rejected {
                    code: msg["error"]["code"].as_i64().unwrap_or(0),
                    message: msg["error"]["message"]
                        .as_str()
                        .unwrap_or("unknown error")
                        .to_string(),
                })
            } else {
                Ok(msg["result"].clone())
            };
            let _ = tx.send(outcome);
        }
        _ => {
            let method = msg.get("method").and_then(|m| m.as_str()).unwrap_or("");
            tracing::debug!("[AgentProcess:{}] Ignoring message: {}", name, method);
        }
    }
}

/// Locate `command` the way a shell would: paths containing a separator are
/// taken relative to `cwd`, bare names are searched on `PATH`.
pub fn resolve_command(command: &str, cwd: Option<&Path>) -> Option<PathBuf> {
    let candidate = Path::new(command);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        let full = match cwd {
            Some(dir) if candidate.is_relative() => dir.join(candidate),
            _ => candidate.to_path_buf(),
        };
        return is_executable(&full).then_some(full);
    }

    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(command))
        .find(|full| is_executable(full))
}

#[cfg(unix)]
fn is_executable(path: &Path) -> bool {
    use std::os::unix::fs::PermissionsExt;
    path.metadata()
        .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
        .unwrap_or(false)
}

#[cfg(not(unix))]
fn is_executable(path: &Path) -> bool {
    path.is_file() || path.with_extension("exe").is_file()
}

/// Find and parse the first embedded JSON object in a noisy line.
fn try_parse_embedded_json(line: &str) -> Option<Value> {
    let mut depth = 0i32;
    let mut start = None;

    for (i, ch) in line.char_indices() {
        match ch {
            '{' => {
                if depth == 0 {
                    start = Some(i);
                }
                depth += 1;
            }
            '}' if depth > 0 => {
                depth -= 1;
                if depth == 0 {
                    if let Some(s) = start.take() {
                        if let Ok(v) = serde_json::from_str::<Value>(&line[s..=i]) {
                            return Some(v);
                        }
                    }
                }
            }
            _ => {}
        }
    }
    None
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
