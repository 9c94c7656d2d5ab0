mod blueprint;
mod deploy;
mod executor;
mod render;
mod wizard;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use guild_core::config::AppConfig;
use guild_core::context::ValueEnvironment;
use guild_core::error::GuildError;
use guild_core::event::EventBus;
use guild_core::traits::BlueprintSupplier;
use guild_engine::condition::{ConditionBoard, ConditionEvaluator};
use guild_engine::credentials::CredentialStore;
use guild_engine::graph::WorkflowGraph;
use guild_engine::simulation::SimulationRunner;

use crate::blueprint::TemplateBlueprintSupplier;
use crate::executor::TemplateAgentExecutor;

#[derive(Parser)]
#[command(name = "guild", version, about = "Assemble, simulate and deploy multi-agent Guilds")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "guild.toml")]
    config: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Walk through the setup wizard interactively (default)
    Wizard {
        /// Skip the intent prompt
        #[arg(long)]
        intent: Option<String>,
        /// JSON object file with extra simulation inputs
        #[arg(long)]
        inputs: Option<PathBuf>,
        /// Simulated latency per agent, in milliseconds
        #[arg(long, default_value = "400")]
        latency_ms: u64,
    },
    /// Generate a blueprint for an intent and print it as JSON
    Blueprint {
        /// What the guild should do
        #[arg(trailing_var_arg = true, required = true)]
        intent: Vec<String>,
        /// Print the workflow graph laid out from the blueprint instead
        #[arg(long)]
        graph: bool,
    },
    /// Validate a workflow graph JSON file
    Validate {
        /// Graph file
        graph: PathBuf,
    },
    /// Simulate a workflow graph JSON file
    Simulate {
        /// Graph file
        graph: PathBuf,
        /// JSON object file with extra simulation inputs
        #[arg(long)]
        inputs: Option<PathBuf>,
        /// Credential value as ID=VALUE (falls back to GUILD_<ID> env vars)
        #[arg(long = "credential", value_parser = parse_key_value)]
        credentials: Vec<(String, String)>,
        /// Simulated latency per agent, in milliseconds
        #[arg(long, default_value = "0")]
        latency_ms: u64,
        /// Print the result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the effective configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("guild=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    // Handle completions before config loading
    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "guild", &mut std::io::stdout());
        return Ok(());
    }

    let config = load_config(&cli.config)?;

    match cli.command {
        None => {
            let options = wizard::WizardOptions {
                intent: None,
                inputs: ValueEnvironment::new(),
                latency: Duration::from_millis(400),
            };
            wizard::run_wizard(&config, options).await?;
        }
        Some(Commands::Wizard {
            intent,
            inputs,
            latency_ms,
        }) => {
            let options = wizard::WizardOptions {
                intent,
                inputs: read_inputs(inputs.as_deref())?,
                latency: Duration::from_millis(latency_ms),
            };
            wizard::run_wizard(&config, options).await?;
        }
        Some(Commands::Blueprint { intent, graph }) => {
            let blueprint = TemplateBlueprintSupplier::new()
                .generate(intent.join(" "))
                .await?;
            if graph {
                let graph = WorkflowGraph::from_blueprint(&blueprint, &config.requirements());
                println!("{}", serde_json::to_string_pretty(&graph)?);
            } else {
                println!("{}", serde_json::to_string_pretty(&blueprint)?);
            }
        }
        Some(Commands::Validate { graph }) => {
            let graph = read_graph(&graph)?;
            graph.validate()?;
            let order = graph.topological_order()?;
            println!("Graph is valid ({} nodes, {} edges)", graph.node_count(), graph.edge_count());
            let ids: Vec<&str> = order.iter().map(|id| id.as_str()).collect();
            println!("Execution order: {}", ids.join(" -> "));
            let required = graph.required_credentials();
            if !required.is_empty() {
                let ids: Vec<&str> = required.iter().map(|id| id.as_str()).collect();
                println!("Credentials needed: {}", ids.join(", "));
            }
        }
        Some(Commands::Simulate {
            graph,
            inputs,
            credentials,
            latency_ms,
            json,
        }) => {
            let graph = read_graph(&graph)?;
            let inputs = read_inputs(inputs.as_deref())?;
            simulate(&config, graph, inputs, credentials, latency_ms, json).await?;
        }
        Some(Commands::Config) => {
            let mut effective = config.clone();
            effective.credentials = config.requirements();
            println!("{}", toml::to_string_pretty(&effective)?);
        }
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
    }

    Ok(())
}

fn load_config(path: &Path) -> anyhow::Result<AppConfig> {
    match AppConfig::load(path) {
        Ok(config) => {
            info!(path = %path.display(), "Loaded config");
            Ok(config)
        }
        Err(GuildError::ConfigNotFound(_)) => {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(AppConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}

fn read_graph(path: &Path) -> anyhow::Result<WorkflowGraph> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading graph file {}", path.display()))?;
    let graph = serde_json::from_str(&content)
        .with_context(|| format!("parsing graph file {}", path.display()))?;
    Ok(graph)
}

fn read_inputs(path: Option<&Path>) -> anyhow::Result<ValueEnvironment> {
    let Some(path) = path else {
        return Ok(ValueEnvironment::new());
    };
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("reading inputs file {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)?;
    if !value.is_object() {
        anyhow::bail!("inputs file {} must hold a JSON object", path.display());
    }
    Ok(ValueEnvironment::from_value(value))
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    raw.split_once('=')
        .map(|(k, v)| (k.trim().to_string(), v.to_string()))
        .filter(|(k, _)| !k.is_empty())
        .ok_or_else(|| format!("expected ID=VALUE, got '{raw}'"))
}

async fn simulate(
    config: &AppConfig,
    graph: WorkflowGraph,
    inputs: ValueEnvironment,
    given: Vec<(String, String)>,
    latency_ms: u64,
    json: bool,
) -> anyhow::Result<()> {
    let mut store = CredentialStore::with_requirements(config.requirements());
    for id in graph.required_credentials() {
        let var = format!("GUILD_{}", id.as_str().to_uppercase());
        if let Ok(value) = std::env::var(&var) {
            debug!(credential = %id, "Credential taken from environment");
            store.set(id, value);
        }
    }
    for (id, value) in given {
        store.set(id, value);
    }

    let event_bus = Arc::new(EventBus::new(config.events.capacity));
    let printer = (!json).then(|| render::spawn_event_printer(event_bus.subscribe()));
    let runner = SimulationRunner::new(
        Arc::new(TemplateAgentExecutor::new(Duration::from_millis(latency_ms))),
        config.simulation.clone(),
        event_bus.clone(),
        ConditionEvaluator::new(ConditionBoard::new(event_bus.clone())),
    );

    let handle = runner.run(&graph, &store, inputs)?;
    let cancel = handle.cancel_token();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });
    let outcome = handle.wait().await;
    watcher.abort();
    if let Some(printer) = printer {
        tokio::time::sleep(Duration::from_millis(50)).await;
        printer.abort();
    }

    let result = outcome?;
    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        render::print_result(&result);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("stripe_api_key=sk_test=abc"),
            Ok(("stripe_api_key".to_string(), "sk_test=abc".to_string()))
        );
        assert!(parse_key_value("no-separator").is_err());
        assert!(parse_key_value("=value").is_err());
    }

    #[test]
    fn test_cli_parses_simulate() {
        let cli = Cli::try_parse_from([
            "guild",
            "simulate",
            "graph.json",
            "--credential",
            "slack_webhook_url=https://hooks.slack.com/services/x",
            "--json",
        ])
        .unwrap();
        match cli.command {
            Some(Commands::Simulate { credentials, json, .. }) => {
                assert_eq!(credentials.len(), 1);
                assert!(json);
            }
            _ => panic!("expected simulate"),
        }
    }

    #[test]
    fn test_missing_config_uses_defaults() {
        let config = load_config(Path::new("/nonexistent/guild.toml")).unwrap();
        assert_eq!(config.simulation.max_concurrency, 4);
    }
}
