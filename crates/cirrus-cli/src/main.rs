//! `cirrus`: run Cirrus agents from the command line.

mod config;

use cirrus_agents::{Agent, AgentFactory, Collaborators, ToolRegistry, SPECIALIZATIONS};
use cirrus_core::{AgentContext, ExperienceStore};
use cirrus_memory::{FileExperienceStore, InMemoryExperienceStore};
use clap::{Parser, Subcommand};
use config::{CirrusConfig, MemoryBackend, API_KEY_ENV};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// Agent type used by `run` when nothing else is configured.
const DEFAULT_AGENT: &str = "coordinator";

#[derive(Parser)]
#[command(name = "cirrus", about = "Cirrus: multi-agent orchestration for infrastructure goals")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "cirrus.toml")]
    config: PathBuf,

    /// Emit logs as JSON
    #[arg(long)]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Plan and execute a goal
    Run {
        /// Natural-language goal
        goal: String,
        /// Configured agent name, agent type or specialization
        #[arg(short, long)]
        agent: Option<String>,
    },
    /// List configured agents and available agent types
    Agents,
    /// List built-in specializations
    Specializations,
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

async fn build_factory(config: &CirrusConfig) -> anyhow::Result<AgentFactory> {
    let completion = cirrus_llm::build_completion(&config.model)?;
    let memory: Arc<dyn ExperienceStore> = match config.memory.backend {
        MemoryBackend::Memory => Arc::new(InMemoryExperienceStore::new()),
        MemoryBackend::File => Arc::new(FileExperienceStore::open(&config.memory.path).await?),
    };
    let tools = ToolRegistry::with_simulated_defaults();
    info!(
        provider = ?config.model.provider,
        model = %config.model.model_id,
        tools = tools.tool_count(),
        memory = ?config.memory.backend,
        "Collaborators ready"
    );

    let collaborators = Collaborators::new(completion, Arc::new(tools), memory)
        .with_learning_config(config.learning.clone())
        .with_reactive_config(config.reactive.clone());
    Ok(AgentFactory::new(collaborators))
}

/// Resolve `--agent`: a configured agent name first, then a specialization,
/// then a bare agent type. Without `--agent`, the first configured agent.
async fn resolve_agent(
    factory: &AgentFactory,
    config: &CirrusConfig,
    requested: Option<&str>,
) -> anyhow::Result<Arc<dyn Agent>> {
    let Some(name) = requested else {
        return Ok(match config.agents.first() {
            Some(agent) => factory.from_config(agent)?,
            None => factory.create(DEFAULT_AGENT, AgentContext::default())?,
        });
    };

    if let Some(agent) = config.agent(name) {
        return Ok(factory.from_config(agent)?);
    }
    if SPECIALIZATIONS.contains(&name) {
        return Ok(factory
            .create_specialization(name, AgentContext::default())
            .await?);
    }
    Ok(factory.create(name, AgentContext::default())?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.json);

    let mut config = CirrusConfig::load(&cli.config).await?;
    config.apply_api_key(std::env::var(API_KEY_ENV).ok());

    match cli.command {
        Commands::Run { goal, agent } => {
            let factory = build_factory(&config).await?;
            let agent = resolve_agent(&factory, &config, agent.as_deref()).await?;
            info!(agent = %agent.name(), goal = %goal, "Running goal");

            let result = agent.run(&goal).await?;
            println!("{}", serde_json::to_string_pretty(&result)?);
            if !result.success {
                std::process::exit(1);
            }
        }
        Commands::Agents => {
            if config.agents.is_empty() {
                println!("No agents configured.");
                println!("Configure agents in {} under [[agents]]", cli.config.display());
            } else {
                println!("Configured agents:");
                for agent in &config.agents {
                    println!(
                        "  {} ({}), user {}, env {}, dry run {}",
                        agent.display_name(),
                        agent.agent_type,
                        agent.context.user_id,
                        agent.context.environment,
                        agent.context.dry_run
                    );
                }
            }

            let factory = build_factory(&config).await?;
            println!("\nAvailable agent types:");
            for agent_type in factory.list_available() {
                println!("  {agent_type}");
            }
        }
        Commands::Specializations => {
            println!("Specializations:");
            for name in SPECIALIZATIONS {
                println!("  {name}");
            }
        }
    }

    Ok(())
}
