//! sandagent - a sandboxed function-calling coding agent

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::error;
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{init_command, run_command, status_command, tools_command, RunOptions};

/// sandagent - AI coding agent confined to one working directory
#[derive(Parser)]
#[command(name = "sandagent")]
#[command(about = "◆ A sandboxed function-calling coding agent")]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize config and working directory
    Init,
    /// Run the agent on a single prompt
    Run {
        /// What the agent should do
        prompt: String,
        /// Print the prompt, every function call, and token usage
        #[arg(short, long)]
        verbose: bool,
        /// Directory the agent's tools are confined to
        #[arg(short, long)]
        working_dir: Option<PathBuf>,
        /// Model identifier
        #[arg(short, long)]
        model: Option<String>,
        /// Maximum number of model requests
        #[arg(long)]
        max_iterations: Option<u32>,
    },
    /// List the tools advertised to the model
    Tools,
    /// Show configuration status
    Status,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = if matches!(cli.command, Commands::Run { verbose: true, .. }) {
        EnvFilter::new(
            "warn,sandagent=debug,sandagent_agent=debug,sandagent_provider=debug,sandagent_config=debug",
        )
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Init => {
            if let Err(e) = init_command().await {
                error!("Init failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Run {
            prompt,
            verbose,
            working_dir,
            model,
            max_iterations,
        } => {
            let options = RunOptions {
                verbose,
                working_dir,
                model,
                max_iterations,
            };
            match run_command(prompt, options).await {
                Ok(true) => {}
                Ok(false) => std::process::exit(1),
                Err(e) => {
                    error!("Run failed: {:#}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Tools => {
            if let Err(e) = tools_command().await {
                error!("Tools failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Status => {
            if let Err(e) = status_command().await {
                error!("Status failed: {}", e);
                std::process::exit(1);
            }
        }
    }
}
