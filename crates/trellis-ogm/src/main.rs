//! CLI entry point for the trellis object-graph mapper.

mod demo;

use clap::{Parser, Subcommand};
use tracing_subscriber::{fmt, EnvFilter};

use trellis_core::config::Backend;
use trellis_graph::{GraphStore, MemoryGraph, Neo4jGraph};

use trellis_ogm::family::family_patches;
use trellis_ogm::{Mapper, PatchScheduler, Settings};

#[derive(Parser)]
#[command(name = "trellis")]
#[command(about = "Object-graph mapper for Neo4j and an embedded graph")]
struct Cli {
    /// Config file prefix (default: trellis).
    #[arg(short, long, default_value = "trellis")]
    config: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Seed the family model into an empty graph and print search results.
    Demo,

    /// Apply pending schema patches.
    Migrate {
        /// Target version (otherwise trellis.schema_version from config).
        #[arg(long)]
        to: Option<String>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let settings = Settings::load(&cli.config)?;

    match settings.trellis.backend {
        Backend::Memory => {
            tracing::info!("Using the embedded in-memory graph");
            run(cli.command, Mapper::with_config(MemoryGraph::new(), settings.trellis)).await
        }
        Backend::Neo4j => {
            let graph = Neo4jGraph::connect(&settings.neo4j).await?;
            run(cli.command, Mapper::with_config(graph, settings.trellis)).await
        }
    }
}

async fn run<S: GraphStore>(command: Command, mapper: Mapper<S>) -> anyhow::Result<()> {
    match command {
        Command::Demo => demo::run(&mapper).await,
        Command::Migrate { to } => {
            let mut scheduler = PatchScheduler::new(mapper);
            scheduler.register_all(family_patches::<S>());
            let report = match to {
                Some(version) => scheduler.run(version.parse()?).await?,
                None => scheduler.migrate().await?,
            };
            println!("{}", serde_json::to_string_pretty(&report)?);
            Ok(())
        }
    }
}
