//! Pierre CLI
//!
//! Keyboard REPL, one-shot prompts, tool listing and telemetry statistics.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use pierre::assistant::{self, Assistant};
use pierre::telemetry::{self, ReloadTrigger};
use pierre::{Config, InteractionLoop, KeyboardFrontend, ProviderClient, TelemetryStore};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "pierre")]
#[command(about = "Pierre - an assistant whose tools reload without a restart", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (default: $XDG_CONFIG_HOME/pierre/config.yaml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Directory containing tool manifests
    #[arg(short, long)]
    tools_dir: Option<PathBuf>,

    /// LLM model to use
    #[arg(short, long)]
    model: Option<String>,

    /// Base URL of an OpenAI-compatible endpoint
    #[arg(long)]
    base_url: Option<String>,

    /// Data directory for logs and the telemetry database
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Reload tools automatically when the tools directory changes
    #[arg(short, long)]
    watch: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive session (default)
    Repl,

    /// Run a single prompt
    Prompt {
        /// The prompt to send to the assistant
        message: String,
    },

    /// List the tools the registry loads
    Tools {
        /// Reload every source before listing
        #[arg(long)]
        reload: bool,
    },

    /// Show telemetry statistics
    Stats {
        /// Number of recent interactions to show
        #[arg(short = 'n', long, default_value = "10")]
        limit: usize,
    },
}

/// CLI flags win over file and environment
fn apply_cli(config: &mut Config, cli: &Cli) {
    if let Some(dir) = &cli.tools_dir {
        config.tools_dir = dir.clone();
    }
    if let Some(model) = &cli.model {
        config.provider.default_model = model.clone();
    }
    if let Some(url) = &cli.base_url {
        config.provider.base_url = url.clone();
    }
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    if cli.watch {
        config.watch = true;
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref())?;
    apply_cli(&mut config, &cli);

    let _log_guard = telemetry::init_logging(&config.log_dir(), cli.verbose)?;

    match cli.command {
        Some(Commands::Tools { reload }) => show_tools(&config, reload),
        Some(Commands::Stats { limit }) => show_stats(&config, limit),
        Some(Commands::Prompt { ref message }) => {
            let (assistant, telemetry) = start(config)?;
            let reply = InteractionLoop::new(&assistant, Some(telemetry))
                .turn(message)
                .await;
            println!("{}", reply);
            Ok(())
        }
        Some(Commands::Repl) | None => {
            let (assistant, telemetry) = start(config)?;
            run_repl(&assistant, telemetry).await
        }
    }
}

fn start(config: Config) -> Result<(Assistant, Arc<TelemetryStore>)> {
    let model = ProviderClient::new(config.provider.clone())
        .with_context(|| format!("Failed to create {} client", config.provider.name))?;
    let telemetry = Arc::new(
        TelemetryStore::open(
            &config.db_path(),
            Some(&config.provider.default_model),
            Some(&config.provider.name),
        )
        .context("Failed to open telemetry database")?,
    );
    let assistant = Assistant::new(config, Arc::new(model))?;
    Ok((assistant, telemetry))
}

async fn run_repl(assistant: &Assistant, telemetry: Arc<TelemetryStore>) -> Result<()> {
    let config = assistant.config();

    let watcher = if config.watch {
        match assistant.spawn_watcher(Some(telemetry.clone())) {
            Ok(handle) => Some(handle),
            Err(e) => {
                eprintln!("Warning: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    println!("{} ({} via {})", config.assistant_name, config.provider.default_model, config.provider.name);
    println!("Tools: {}", config.tools_dir.display());
    println!("Session: {}", telemetry.session_id());
    println!("Type /help for commands.");
    println!();

    let mut frontend = KeyboardFrontend::new("you> ", Some(config.data_dir.join("history.txt")))?;
    InteractionLoop::new(assistant, Some(telemetry))
        .run(&mut frontend)
        .await?;

    assistant.shutdown().cancel();
    if let Some(handle) = watcher {
        let _ = handle.await;
    }
    Ok(())
}

fn show_tools(config: &Config, reload: bool) -> Result<()> {
    let registry = assistant::load_registry(config);
    if reload {
        let names = registry.write().reload_all();
        let store = TelemetryStore::open(&config.db_path(), None, None)?;
        let generation = registry.read().generation();
        store.record_reload(ReloadTrigger::Cli, "all", names.len(), generation, None);
    }

    let registry = registry.read();
    println!("Tools directory: {}\n", config.tools_dir.display());
    println!("{}", registry.summary());

    println!("\nSources:");
    for (id, state) in registry.sources() {
        println!("  {:20} {}", id, state);
    }
    Ok(())
}

fn show_stats(config: &Config, limit: usize) -> Result<()> {
    let store = TelemetryStore::open(&config.db_path(), None, None)?;
    println!("Telemetry Database: {}\n", store.db_path().display());

    println!("Recent Interactions (last {}):", limit);
    println!("{:-<80}", "");
    let recent = store.recent_interactions(limit)?;
    if recent.is_empty() {
        println!("  No interactions recorded.");
    }
    for i in recent {
        let outcome = match (&i.error, &i.reason) {
            (Some(error), _) => format!("error: {}", error),
            (None, Some(reason)) => reason.clone(),
            (None, None) => "-".to_string(),
        };
        println!(
            "  {} | {:>3} tool calls | {:>6}ms | {}",
            i.timestamp,
            i.tool_calls,
            i.duration_ms.unwrap_or(0),
            outcome
        );
        println!("    > {}", pierre::tool::truncate(&i.input, 70));
    }

    println!("\nTool Usage Statistics:");
    println!("{:-<80}", "");
    let tools = store.tool_stats()?;
    if tools.is_empty() {
        println!("  No tool calls recorded.");
    }
    for t in tools {
        let success_rate = if t.call_count > 0 {
            (t.success_count as f64 / t.call_count as f64) * 100.0
        } else {
            0.0
        };
        println!(
            "  {:20} | {:5} calls | {:6.1}ms avg | {:.0}% success",
            t.tool_name, t.call_count, t.avg_duration_ms, success_rate
        );
    }

    println!("\n{}", store.reload_stats()?);
    Ok(())
}
