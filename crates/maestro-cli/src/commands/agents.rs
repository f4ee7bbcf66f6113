//! `maestro agents`: list, inspect, start and validate catalogued agents.

use std::time::Duration;

use maestro_core::models::{AgentProcessState, AgentStatus};
use maestro_core::state::AppState;

use super::{print_json, to_json, truncate};

pub fn list(state: &AppState) -> Result<(), String> {
    let agents = state.list_agents();
    if agents.is_empty() {
        println!("No agents found.");
        return Ok(());
    }

    println!(
        "┌──────────────────────┬──────────────────────────────┬──────────────────────┬─────────────┐"
    );
    println!(
        "│ {:<20} │ {:<28} │ {:<20} │ {:<11} │",
        "Name", "Description", "Tags", "Credentials"
    );
    println!(
        "├──────────────────────┼──────────────────────────────┼──────────────────────┼─────────────┤"
    );
    for agent in &agents {
        let creds = if agent.required_credentials.is_empty() {
            "-".to_string()
        } else if agent.missing_credentials().is_empty() {
            "✅ set".to_string()
        } else {
            "❌ missing".to_string()
        };
        println!(
            "│ {:<20} │ {:<28} │ {:<20} │ {:<11} │",
            truncate(&agent.name, 20),
            truncate(agent.description.as_deref().unwrap_or(""), 28),
            truncate(&agent.capability_tags.join(","), 20),
            creds
        );
    }
    println!(
        "└──────────────────────┴──────────────────────────────┴──────────────────────┴─────────────┘"
    );
    Ok(())
}

pub async fn status(state: &AppState, name: &str) -> Result<(), String> {
    let process = state.agent_status(name).await.map_err(|e| e.to_string())?;
    print_json(&to_json(&process)?);
    Ok(())
}

/// Start an agent. With `probe` it is stopped again right away; otherwise
/// it is supervised until Ctrl-C or until it crashes.
pub async fn start(state: &AppState, name: &str, probe: bool) -> Result<(), String> {
    let process = state.start_agent(name).await.map_err(|e| e.to_string())?;
    print_state(&process);

    if probe {
        state.stop_agent(name).await.map_err(|e| e.to_string())?;
        println!("⏹  Agent '{}' stopped", name);
        return Ok(());
    }

    println!("Press Ctrl-C to stop.");
    let mut ticker = tokio::time::interval(Duration::from_secs(5));
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            _ = ticker.tick() => {
                let current = state.agent_status(name).await.map_err(|e| e.to_string())?;
                if current.status == AgentStatus::Crashed {
                    return Err(format!("Agent '{}' crashed", name));
                }
                tracing::info!(
                    "[maestro] {} cpu={:.1}% mem={:.1}MB uptime={}s",
                    name,
                    current.metrics.cpu_percent,
                    current.metrics.memory_mb,
                    current.metrics.uptime_seconds
                );
            }
        }
    }

    state.stop_agent(name).await.map_err(|e| e.to_string())?;
    println!("⏹  Agent '{}' stopped", name);
    Ok(())
}

fn print_state(process: &AgentProcessState) {
    println!(
        "▶ Agent '{}' is {} (pid {})",
        process.agent_name,
        process.status.as_str(),
        process
            .pid
            .map(|p| p.to_string())
            .unwrap_or_else(|| "-".to_string())
    );
}

/// Report missing credentials and entry point problems without launching.
pub fn validate(state: &AppState, name: &str) -> Result<(), String> {
    let report = state.lifecycle.validate(name).map_err(|e| e.to_string())?;

    let mark = |ok: bool| if ok { "✅" } else { "❌" };
    println!("Agent '{}'", report.agent_name);
    println!(
        "  {} command: {}",
        mark(report.command_found),
        report.resolved_command.as_deref().unwrap_or("not found")
    );
    println!("  {} working directory", mark(report.cwd_exists));
    if report.missing_credentials.is_empty() {
        println!("  ✅ credentials");
    } else {
        println!(
            "  ❌ credentials missing: {}",
            report.missing_credentials.join(", ")
        );
    }

    if report.is_ok() {
        Ok(())
    } else {
        Err(format!("Agent '{}' cannot be started", name))
    }
}
