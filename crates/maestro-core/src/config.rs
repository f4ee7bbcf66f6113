//! Engine configuration.
//!
//! Every field has a default so a catalog file may omit the `settings:` block
//! entirely, or set only the values it cares about:
//!
//! ```yaml
//! settings:
//!   lifecycle:
//!     grace_period_ms: 2000
//!   engine:
//!     run_log_dir: "./runs"
//! ```

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MaestroConfig {
    #[serde(default)]
    pub lifecycle: LifecycleConfig,
    #[serde(default)]
    pub engine: EngineConfig,
}

/// Settings for the Process Lifecycle Manager.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LifecycleConfig {
    /// How long a freshly spawned process must stay alive to count as started.
    pub startup_probe_ms: u64,
    /// Time between the graceful shutdown request and a forced kill.
    pub grace_period_ms: u64,
    /// Liveness / metrics polling interval.
    pub poll_interval_ms: u64,
}

impl Default for LifecycleConfig {
    fn default() -> Self {
        Self {
            startup_probe_ms: 300,
            grace_period_ms: 5_000,
            poll_interval_ms: 1_000,
        }
    }
}

impl LifecycleConfig {
    pub fn startup_probe(&self) -> Duration {
        Duration::from_millis(self.startup_probe_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.grace_period_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(10))
    }
}

/// Settings for the orchestration engine and execution registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Timeout applied to steps that do not declare `timeout_secs`.
    pub default_timeout_secs: u64,
    /// How long a cancelled agent call may take to wind down before it is abandoned.
    pub cancel_grace_ms: u64,
    /// Finished runs kept in the registry before the oldest are evicted.
    pub max_retained_runs: usize,
    /// When set, every finished run is written to `<dir>/<run_id>.json`.
    pub run_log_dir: Option<PathBuf>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_timeout_secs: 300,
            cancel_grace_ms: 200,
            max_retained_runs: 1_000,
            run_log_dir: None,
        }
    }
}

impl EngineConfig {
    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_settings_keep_defaults() {
        let yaml = r#"
lifecycle:
  grace_period_ms: 2000
engine:
  run_log_dir: "./runs"
"#;
        let cfg: MaestroConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.lifecycle.grace_period_ms, 2000);
        assert_eq!(cfg.lifecycle.startup_probe_ms, 300);
        assert_eq!(cfg.engine.default_timeout_secs, 300);
        assert_eq!(cfg.engine.run_log_dir, Some(PathBuf::from("./runs")));
    }
}
