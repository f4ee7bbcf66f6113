//! Maestro CLI: run agent workflows and manage agent processes from a catalog.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use maestro_cli::commands;

/// Maestro: orchestrate external agent processes into workflows
#[derive(Parser)]
#[command(
    name = "maestro",
    version,
    about = "Maestro: orchestrate external agent processes into workflows"
)]
pub struct Cli {
    /// Catalog file with agents, workflows and settings
    #[arg(long, global = true, env = "MAESTRO_CATALOG")]
    catalog: Option<PathBuf>,

    /// Directory of additional workflow YAML files
    #[arg(long, global = true, env = "MAESTRO_WORKFLOWS")]
    workflows: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a workflow and wait for it to finish
    Run {
        /// Workflow name
        workflow: String,
        /// Initial input (JSON; anything else is passed as a string)
        #[arg(long)]
        input: Option<String>,
        /// Print the execution record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Validate a workflow and print its execution plan
    Validate {
        /// Workflow name
        workflow: String,
    },

    /// List catalogued workflows
    Workflows,

    /// Manage agents
    Agents {
        #[command(subcommand)]
        action: AgentsAction,
    },
}

#[derive(Subcommand)]
enum AgentsAction {
    /// List catalogued agents
    List,
    /// Show an agent's process state
    Status {
        /// Agent name
        name: String,
    },
    /// Start an agent and supervise it until Ctrl-C
    Start {
        /// Agent name
        name: String,
        /// Start, print the state, then stop again
        #[arg(long)]
        probe: bool,
    },
    /// Check credentials and entry point without launching
    Validate {
        /// Agent name
        name: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "maestro_core=info,maestro_cli=info".into()),
        )
        .init();

    let Some(command) = cli.command else {
        use clap::CommandFactory;
        Cli::command().print_help().ok();
        println!();
        return;
    };

    let result = match commands::init_state(cli.catalog.as_deref(), cli.workflows.as_deref()) {
        Err(e) => Err(e),
        Ok(state) => match command {
            Commands::Run {
                workflow,
                input,
                json,
            } => commands::workflow::run(&state, &workflow, input.as_deref(), json).await,
            Commands::Validate { workflow } => commands::workflow::validate(&state, &workflow),
            Commands::Workflows => commands::workflow::list(&state),
            Commands::Agents { action } => match action {
                AgentsAction::List => commands::agents::list(&state),
                AgentsAction::Status { name } => commands::agents::status(&state, &name).await,
                AgentsAction::Start { name, probe } => {
                    commands::agents::start(&state, &name, probe).await
                }
                AgentsAction::Validate { name } => commands::agents::validate(&state, &name),
            },
        },
    };

    if let Err(e) = result {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }
}
