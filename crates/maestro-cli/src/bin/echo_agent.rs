//! Reference agent speaking the maestro stdio protocol.
//!
//! Reads one JSON-RPC message per line from stdin and answers `invoke`
//! requests on stdout. Actions:
//!   - `echo`: returns the inputs unchanged
//!   - `fail`: answers with an error (`inputs.message` if given)
//!   - `sleep`: waits `inputs.seconds`, then returns `{ "slept": seconds }`
//!   - `exit`: terminates the process with status 3
//!
//! A `cancel` notification `{id}` abandons the matching request. A `shutdown`
//! notification or end of stdin exits cleanly. Logs go to stderr.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::Mutex;
use tokio::task::AbortHandle;

type Stdout = Arc<Mutex<tokio::io::Stdout>>;
type InFlight = Arc<Mutex<HashMap<u64, AbortHandle>>>;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro_echo_agent=info".into()),
        )
        .init();

    let stdout: Stdout = Arc::new(Mutex::new(tokio::io::stdout()));
    let in_flight: InFlight = Arc::new(Mutex::new(HashMap::new()));
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    tracing::info!("[echo-agent] Ready (pid {})", std::process::id());

    while let Ok(Some(line)) = lines.next_line().await {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let msg: Value = match serde_json::from_str(line) {
            Ok(v) => v,
            Err(e) => {
                tracing::warn!("[echo-agent] Unparseable message: {}", e);
                continue;
            }
        };

        let method = msg["method"].as_str().unwrap_or("");
        match (method, msg["id"].as_u64()) {
            ("invoke", Some(id)) => {
                let stdout = stdout.clone();
                let registry = in_flight.clone();
                let params = msg["params"].clone();
                // hold the lock across spawn so the task cannot deregister before it is registered
                let mut guard = in_flight.lock().await;
                let task = tokio::spawn(async move {
                    let response = handle_invoke(id, &params).await;
                    registry.lock().await.remove(&id);
                    write_line(&stdout, &response).await;
                });
                guard.insert(id, task.abort_handle());
            }
            ("cancel", _) => {
                if let Some(id) = msg["params"]["id"].as_u64() {
                    if let Some(task) = in_flight.lock().await.remove(&id) {
                        task.abort();
                        tracing::info!("[echo-agent] Cancelled request {}", id);
                    }
                }
            }
            ("shutdown", _) => {
                tracing::info!("[echo-agent] Shutdown requested");
                break;
            }
            (other, id) => {
                tracing::warn!("[echo-agent] Unsupported method '{}'", other);
                if let Some(id) = id {
                    let response =
                        error_response(id, -32601, &format!("method not found: {}", other));
                    write_line(&stdout, &response).await;
                }
            }
        }
    }

    tracing::info!("[echo-agent] Exiting");
}

async fn handle_invoke(id: u64, params: &Value) -> Value {
    let inputs = params.get("inputs").cloned().unwrap_or(Value::Null);
    let action = params["action"].as_str().unwrap_or("echo");
    tracing::info!(
        "[echo-agent] {} step={} run={}",
        action,
        params["stepId"].as_str().unwrap_or("?"),
        params["runId"].as_str().unwrap_or("?")
    );

    match action {
        "echo" | "process" => json!({ "jsonrpc": "2.0", "id": id, "result": inputs }),
        "fail" => {
            let message = inputs["message"].as_str().unwrap_or("requested failure");
            error_response(id, -32000, message)
        }
        "sleep" => {
            let seconds = sleep_seconds(&inputs);
            tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
            json!({ "jsonrpc": "2.0", "id": id, "result": { "slept": seconds } })
        }
        "exit" => {
            tracing::warn!("[echo-agent] Exiting on request");
            std::process::exit(3);
        }
        other => error_response(id, -32601, &format!("unknown action: {}", other)),
    }
}

/// Longest sleep the agent accepts, one day.
const MAX_SLEEP_SECS: f64 = 86_400.0;

/// `inputs.seconds`, defaulting to one second and clamped to `0..=MAX_SLEEP_SECS`.
fn sleep_seconds(inputs: &Value) -> f64 {
    let seconds = inputs["seconds"].as_f64().unwrap_or(1.0);
    if seconds.is_nan() {
        return 0.0;
    }
    seconds.clamp(0.0, MAX_SLEEP_SECS)
}

fn error_response(id: u64, code: i64, message: &str) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "error": { "code": code, "message": message },
    })
}

async fn write_line(stdout: &Stdout, msg: &Value) {
    let mut data = msg.to_string();
    data.push('\n');
    let mut out = stdout.lock().await;
    if out.write_all(data.as_bytes()).await.is_err() || out.flush().await.is_err() {
        tracing::warn!("[echo-agent] stdout closed");
    }
}
