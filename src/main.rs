//! Agent selector CLI
//!
//! Command-line interface for routing tasks and benchmarking selection.

use clap::{Parser, Subcommand};
use std::path::Path;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use agentmesh_selector::agent::load_agents;
use agentmesh_selector::{
    Benchmark, EngineConfig, NearestNeighborSelector, ProviderRegistry, Query, Result,
    SelectionAlgorithm, SelectionEngine, ValidateOptions,
};

#[derive(Parser)]
#[command(name = "agentsel")]
#[command(author, version, about = "Semantic agent selection", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "agentsel.toml")]
    config: String,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default configuration file
    Init {
        /// Output path for configuration file
        #[arg(short, long, default_value = "agentsel.toml")]
        output: String,
    },

    /// Pick the best agents for one task
    Select {
        /// Task text
        query: String,

        /// Agent records (JSON array)
        #[arg(short, long)]
        agents: String,

        /// Number of agents to return
        #[arg(short, long, default_value = "3")]
        k: usize,

        /// Maximum acceptable cost per 1M tokens
        #[arg(long)]
        max_cost: Option<f64>,

        /// Maximum acceptable response time in seconds
        #[arg(long)]
        max_latency: Option<f64>,

        /// Print the ranking as JSON
        #[arg(long)]
        json: bool,
    },

    /// Run the benchmark over labeled queries
    Bench {
        /// Agent records (JSON array)
        #[arg(short, long)]
        agents: String,

        /// Labeled queries (JSON array)
        #[arg(short, long)]
        queries: String,

        /// Depth for top-k accuracy (overrides config)
        #[arg(short, long)]
        k: Option<usize>,

        /// Benchmark the distance-only baseline instead of the fused engine
        #[arg(long)]
        baseline: bool,

        /// Keep per-query details in the report
        #[arg(long)]
        detail: bool,

        /// Write the report as JSON to this path
        #[arg(long)]
        report: Option<String>,
    },

    /// List embedding providers compiled into this build
    Providers,
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();
}

fn load_config(path: &str) -> Result<EngineConfig> {
    if Path::new(path).exists() {
        info!("Loading configuration from: {}", path);
        EngineConfig::load(path)
    } else {
        info!("Using default configuration");
        Ok(EngineConfig::default())
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_logging(cli.verbose);

    if let Err(e) = run(cli).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let registry = ProviderRegistry::with_builtin();

    match cli.command {
        Commands::Init { output } => {
            info!("Writing default configuration to: {}", output);
            EngineConfig::default().save(&output)?;
            info!("Configuration saved successfully");
        }

        Commands::Select {
            query,
            agents,
            k,
            max_cost,
            max_latency,
            json,
        } => {
            let config = load_config(&cli.config)?;
            let agents = load_agents(&agents)?;
            info!("Loaded {} agents", agents.len());

            let engine = SelectionEngine::from_registry(agents, &registry, config).await?;
            let mut query = Query::new(query);
            query.constraints.max_cost = max_cost;
            query.constraints.max_latency = max_latency;

            let candidates = engine.candidates(&query, k).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&candidates)?);
            } else {
                for (rank, candidate) in candidates.iter().enumerate() {
                    let name = engine
                        .store()
                        .get(&candidate.agent_id)
                        .map(|a| a.name)
                        .unwrap_or_default();
                    println!(
                        "{:>2}. {:<36} {:<28} score {:.4}  distance {:.4}  quality {:.4}",
                        rank + 1,
                        candidate.agent_id,
                        name,
                        candidate.fused_score,
                        candidate.distance,
                        candidate.quality_score
                    );
                }
            }
        }

        Commands::Bench {
            agents,
            queries,
            k,
            baseline,
            detail,
            report,
        } => {
            let config = load_config(&cli.config)?;
            let benchmark = Benchmark::from_files(&agents, &queries)?;
            info!(
                "Benchmark: {} agents, {} queries",
                benchmark.agents().len(),
                benchmark.queries().len()
            );

            let mut options = ValidateOptions::from(&config.benchmark);
            if let Some(k) = k {
                options.k = k;
            }
            options.verbose |= detail;

            let provider = registry.build(&config.embedder)?;
            let algorithm: Box<dyn SelectionAlgorithm> = if baseline {
                Box::new(
                    NearestNeighborSelector::from_pool(
                        benchmark.agents().to_vec(),
                        benchmark.agent_ids(),
                        provider,
                        config,
                    )
                    .await?,
                )
            } else {
                Box::new(
                    SelectionEngine::from_pool(
                        benchmark.agents().to_vec(),
                        benchmark.agent_ids(),
                        provider,
                        config,
                    )
                    .await?,
                )
            };

            let result = benchmark.validate(algorithm.as_ref(), options).await;
            println!("{}", result);

            if let Some(path) = report {
                std::fs::write(&path, serde_json::to_string_pretty(&result)?)?;
                info!("Report written to: {}", path);
            }
        }

        Commands::Providers => {
            for registration in registry.registrations() {
                println!("{:<12} {}", registration.name, registration.description);
            }
        }
    }

    Ok(())
}
