use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AgentStatus {
    Stopped,
    Starting,
    Running,
    Stopping,
    Crashed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Crashed => "crashed",
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentMetrics {
    pub cpu_percent: f32,
    pub memory_mb: f64,
    pub uptime_seconds: u64,
    pub requests_count: u64,
    pub errors_count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_activity: Option<DateTime<Utc>>,
    pub avg_response_ms: f64,
}

impl AgentMetrics {
    /// Fold one dispatch into the request/error counters and the running latency average.
    pub fn record_request(&mut self, elapsed_ms: f64, ok: bool) {
        self.requests_count += 1;
        if !ok {
            self.errors_count += 1;
        }
        let n = self.requests_count as f64;
        self.avg_response_ms += (elapsed_ms - self.avg_response_ms) / n;
        self.last_activity = Some(Utc::now());
    }
}

/// Snapshot of one agent's process as seen by the Lifecycle Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentProcessState {
    pub agent_name: String,
    pub status: AgentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    pub metrics: AgentMetrics,
}

impl AgentProcessState {
    pub fn stopped(agent_name: &str) -> Self {
        Self {
            agent_name: agent_name.to_string(),
            status: AgentStatus::Stopped,
            pid: None,
            started_at: None,
            metrics: AgentMetrics::default(),
        }
    }

    pub fn is_running(&self) -> bool {
        self.status == AgentStatus::Running
    }
}
