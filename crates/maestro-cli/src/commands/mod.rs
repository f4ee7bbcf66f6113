//! CLI command implementations.
//!
//! Each submodule corresponds to a top-level CLI command and works through
//! the maestro-core `AppState`.

pub mod agents;
pub mod workflow;

use std::path::Path;
use std::sync::Arc;

use maestro_core::state::{AppState, AppStateInner};

/// Build the shared `AppState` from the catalog file and workflow directory.
pub fn init_state(catalog: Option<&Path>, workflows: Option<&Path>) -> Result<AppState, String> {
    if catalog.is_none() && workflows.is_none() {
        return Err("no catalog given: pass --catalog <file> or set MAESTRO_CATALOG".to_string());
    }
    let state = AppStateInner::load(catalog, workflows).map_err(|e| e.to_string())?;
    Ok(Arc::new(state))
}

/// Pretty-print a JSON value to stdout.
pub fn print_json(value: &serde_json::Value) {
    println!(
        "{}",
        serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string())
    );
}

fn to_json<T: serde::Serialize>(value: &T) -> Result<serde_json::Value, String> {
    serde_json::to_value(value).map_err(|e| format!("Failed to serialize output: {}", e))
}

fn truncate(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        let truncated: String = s.chars().take(max.saturating_sub(3)).collect();
        format!("{}...", truncated)
    }
}
