//! `maestro run`, `maestro validate` and `maestro workflows`.

use maestro_core::models::{ExecutionRecord, RunStatus, StepStatus};
use maestro_core::state::AppState;
use serde_json::Value;

use super::{print_json, to_json, truncate};

/// Parse `--input`: JSON when it parses, otherwise the raw text as a string.
pub fn parse_input(raw: Option<&str>) -> Value {
    match raw {
        None => Value::Null,
        Some(text) => {
            serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
        }
    }
}

/// Run a workflow to completion. Ctrl-C cancels the run and waits for it to settle.
pub async fn run(
    state: &AppState,
    workflow_name: &str,
    input: Option<&str>,
    json_output: bool,
) -> Result<(), String> {
    let run_id = state
        .execute(workflow_name, parse_input(input))
        .await
        .map_err(|e| e.to_string())?;

    if !json_output {
        println!("▶ Running workflow '{}' (run {})", workflow_name, run_id);
    }

    let waited = tokio::select! {
        record = state.engine.wait(&run_id) => record,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("[maestro] Interrupted, cancelling run {}", run_id);
            match state.engine.cancel(&run_id).await {
                Ok(_) => state.engine.wait(&run_id).await,
                Err(e) => Err(e),
            }
        }
    };

    state.shutdown().await;
    let record = waited.map_err(|e| e.to_string())?;

    if json_output {
        print_json(&to_json(&record)?);
    } else {
        print_record(&record);
    }

    match record.status {
        RunStatus::Completed => Ok(()),
        status => Err(format!(
            "Workflow '{}' finished as {}",
            workflow_name,
            status.as_str()
        )),
    }
}

fn status_icon(status: StepStatus) -> &'static str {
    match status {
        StepStatus::Succeeded => "✅",
        StepStatus::Failed => "❌",
        StepStatus::TimedOut => "⏱",
        StepStatus::Skipped => "⏭",
        StepStatus::Pending | StepStatus::Running => "…",
    }
}

fn print_record(record: &ExecutionRecord) {
    println!();
    println!(
        "┌──────────────────────┬────────────┬──────────────────────────────────────────────┐"
    );
    println!(
        "│ {:<20} │ {:<10} │ {:<44} │",
        "Step", "Status", "Output / Error"
    );
    println!(
        "├──────────────────────┼────────────┼──────────────────────────────────────────────┤"
    );
    for step in &record.steps {
        let detail = match &step.error {
            Some(failure) => failure.message.clone(),
            None if step.output.is_null() => String::new(),
            None => match &step.output {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            },
        };
        println!(
            "│ {:<20} │ {} {:<8} │ {:<44} │",
            truncate(&step.step_id, 20),
            status_icon(step.status),
            truncate(step.status.as_str(), 8),
            truncate(&detail.replace('\n', " "), 44)
        );
    }
    println!(
        "└──────────────────────┴────────────┴──────────────────────────────────────────────┘"
    );
    println!(
        "Run {}: {} ({}/{} steps completed)",
        record.run_id,
        record.status.as_str(),
        record.steps_completed,
        record.total_steps
    );
}

/// Compile the workflow and print its order and parallel waves.
pub fn validate(state: &AppState, workflow_name: &str) -> Result<(), String> {
    let plan = state
        .engine
        .validate(workflow_name)
        .map_err(|e| e.to_string())?;

    println!("✅ Workflow '{}' is valid", workflow_name);
    println!("   Mode:  {}", plan.workflow.execution_mode.as_str());
    println!("   Steps: {}", plan.len());
    println!("   Order: {}", plan.ordered_ids().join(" → "));
    for (i, wave) in plan.wave_ids().iter().enumerate() {
        println!("   Wave {}: {}", i + 1, wave.join(", "));
    }

    let missing: Vec<String> = plan
        .workflow
        .steps
        .iter()
        .filter(|step| state.catalog.get_descriptor(&step.agent_name).is_none())
        .map(|step| format!("{} (step '{}')", step.agent_name, step.step_id))
        .collect();
    if !missing.is_empty() {
        println!("⚠️  Agents not in the catalog: {}", missing.join(", "));
    }
    Ok(())
}

pub fn list(state: &AppState) -> Result<(), String> {
    let workflows = state.catalog.list_workflows();
    if workflows.is_empty() {
        println!("No workflows found.");
        return Ok(());
    }

    println!(
        "┌──────────────────────────┬─────────────┬───────┬──────────────────────────────────┐"
    );
    println!(
        "│ {:<24} │ {:<11} │ {:<5} │ {:<32} │",
        "Name", "Mode", "Steps", "Description"
    );
    println!(
        "├──────────────────────────┼─────────────┼───────┼──────────────────────────────────┤"
    );
    for wf in &workflows {
        println!(
            "│ {:<24} │ {:<11} │ {:<5} │ {:<32} │",
            truncate(&wf.name, 24),
            wf.execution_mode.as_str(),
            wf.steps.len(),
            truncate(wf.description.as_deref().unwrap_or(""), 32)
        );
    }
    println!(
        "└──────────────────────────┴─────────────┴───────┴──────────────────────────────────┘"
    );
    Ok(())
}
