//! sandagent command implementations

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use sandagent_agent::tools::{default_registry, ToolRegistry, ToolSettings};
use sandagent_agent::{AgentConfig, AgentLoop, ContextBuilder, Turn};
use sandagent_config::{self, Config};
use sandagent_provider::OpenAiProvider;

/// Command-line overrides for a single run
#[derive(Debug, Default)]
pub struct RunOptions {
    pub verbose: bool,
    pub working_dir: Option<PathBuf>,
    pub model: Option<String>,
    pub max_iterations: Option<u32>,
}

/// Initialize config and working directory
pub async fn init_command() -> Result<()> {
    println!("◆ Initializing sandagent...");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    let config = sandagent_config::init().await?;

    println!("Config:      {}", sandagent_config::config_path().display());
    println!("Working dir: {}", config.working_dir().display());
    println!("\n◆ sandagent initialized");
    println!("\nNext steps:");
    println!("  1. Add your API key to ~/.sandagent/config.json");
    println!("     or export {}", sandagent_config::API_KEY_ENV);
    println!("  2. Run a task: sandagent run \"list the files\"");

    Ok(())
}

fn tool_settings(config: &Config) -> ToolSettings {
    ToolSettings {
        max_file_chars: config.agent.max_file_chars,
        python: config.agent.python.clone(),
    }
}

/// Map the loaded configuration onto the core's run parameters
fn agent_config(config: &Config, sandbox_root: PathBuf) -> AgentConfig {
    AgentConfig {
        model: config.model(),
        max_tokens: config.agent.max_tokens,
        temperature: config.agent.temperature,
        max_iterations: config.agent.max_iterations,
        max_retries: config.agent.max_retries,
        retry_backoff: config.retry_backoff(),
        sandbox_root,
        tool_timeout: config.tool_timeout(),
        request_timeout: config.request_timeout(),
        run_timeout: config.run_timeout(),
        diagnostic_turns: config.agent.diagnostic_turns,
        parallel_tool_calls: config.agent.parallel_tool_calls,
        ..AgentConfig::default()
    }
}

/// Run the agent once on `prompt`.
///
/// `Ok(false)` means the run itself failed and its diagnostic is already on stderr.
pub async fn run_command(prompt: String, options: RunOptions) -> Result<bool> {
    let mut config = Config::load().await?;
    if let Some(model) = options.model {
        config.agent.model = model;
    }
    if let Some(max_iterations) = options.max_iterations {
        config.agent.max_iterations = max_iterations;
    }

    let api_key = config.api_key().with_context(|| {
        format!(
            "No API key configured. Set provider.api_key in {} or export {}",
            sandagent_config::config_path().display(),
            sandagent_config::API_KEY_ENV
        )
    })?;

    let working_dir = options
        .working_dir
        .unwrap_or_else(|| config.working_dir());
    if !working_dir.is_dir() {
        anyhow::bail!(
            "Working directory {} does not exist. Run `sandagent init` or pass --working-dir",
            working_dir.display()
        );
    }
    let working_dir = tokio::fs::canonicalize(&working_dir)
        .await
        .with_context(|| {
            format!(
                "Failed to resolve working directory {}",
                working_dir.display()
            )
        })?;
    debug!("◆ WORKING DIRECTORY: {:?}", working_dir);

    let provider = OpenAiProvider::new(api_key, config.api_base(), Some(config.model()))
        .with_timeout(config.request_timeout());
    let registry = Arc::new(default_registry(&tool_settings(&config))?);
    let system_prompt = ContextBuilder::new()
        .with_override(config.agent.system_prompt.clone())
        .build_system_prompt(&registry);

    let mut agent = AgentLoop::new(provider, registry, agent_config(&config, working_dir))
        .with_system_prompt(system_prompt);
    if options.verbose {
        agent = agent.with_observer(Arc::new(print_turn));
    }

    let cancel = CancellationToken::new();
    let trigger = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("◆ INTERRUPT RECEIVED, CANCELLING RUN");
            trigger.cancel();
        }
    });

    match agent.run_with_cancel(&prompt, cancel).await {
        Ok(answer) => {
            println!("{}", answer.text);
            if options.verbose {
                println!();
                println!("Iterations: {}", answer.iterations);
                println!("Prompt tokens: {}", answer.usage.prompt_tokens);
                println!("Response tokens: {}", answer.usage.completion_tokens);
            }
            Ok(true)
        }
        Err(failure) => {
            eprintln!("{}", failure.summary());
            if options.verbose {
                eprintln!("Prompt tokens: {}", failure.usage.prompt_tokens);
                eprintln!("Response tokens: {}", failure.usage.completion_tokens);
            }
            Ok(false)
        }
    }
}

fn print_turn(turn: &Turn) {
    match turn {
        Turn::User(text) => println!("User prompt: {}", text),
        Turn::Model(Some(text)) => println!("Model: {}", text),
        Turn::Model(None) => {}
        Turn::CallRequest {
            name, arguments, ..
        } => println!(" - Calling function: {}({})", name, arguments),
        Turn::CallResult { outcome, .. } => println!("-> {}", outcome.payload_text()),
    }
}

/// List the tools advertised to the model
pub async fn tools_command() -> Result<()> {
    let config = Config::load().await?;
    let registry = default_registry(&tool_settings(&config))?;

    println!("◆ Available Tools");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");
    print_tools(&registry);

    Ok(())
}

fn print_tools(registry: &ToolRegistry) {
    for spec in registry.describe_all() {
        println!("{}", spec.name());
        println!("  {}", spec.description());
        for param in spec.params() {
            let mut flags = vec![if param.required { "required" } else { "optional" }];
            if param.path {
                flags.push("path");
            }
            let default = param
                .default
                .as_ref()
                .map(|d| format!(", default {}", d))
                .unwrap_or_default();
            println!(
                "  - {}: {} ({}{})",
                param.name,
                param.kind,
                flags.join(", "),
                default
            );
        }
    }
}

/// Show configuration status
pub async fn status_command() -> Result<()> {
    let config_path = sandagent_config::config_path();

    println!("◆ sandagent Status");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    println!(
        "Config:      {} {}",
        config_path.display(),
        if config_path.exists() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );

    let config = Config::load().await?;
    let working_dir = config.working_dir();
    println!(
        "Working dir: {} {}",
        working_dir.display(),
        if working_dir.is_dir() {
            "[OK]"
        } else {
            "[Missing]"
        }
    );
    println!("Model:       {}", config.model());
    println!(
        "API Key:     {}",
        if config.has_api_key() {
            "[Set]"
        } else {
            "[Missing]"
        }
    );
    println!(
        "API Base:    {}",
        config.api_base().unwrap_or_else(|| "[Default]".to_string())
    );
    println!("Max iterations: {}", config.agent.max_iterations);
    println!(
        "Tool calls:  {}",
        if config.agent.parallel_tool_calls {
            "parallel"
        } else {
            "sequential"
        }
    );

    println!("\n◆ Ready");

    Ok(())
}
