//! CLI entry point for the riskgraph-import loader.

use std::path::PathBuf;

use clap::Parser;
use tracing_subscriber::{fmt, EnvFilter};

use riskgraph_core::{EntityType, RelType};
use riskgraph_graph::{ConnectionManager, GraphClient, GraphStore, MemoryStore};

use riskgraph_ingest::batch::CancelFlag;
use riskgraph_ingest::config::ImportConfig;
use riskgraph_ingest::pipeline::{Pipeline, RecordSources, RunAborted};
use riskgraph_ingest::report::RunReport;
use riskgraph_ingest::source::open_sources;

#[derive(Parser)]
#[command(name = "riskgraph-import")]
#[command(about = "Load customer risk CSV exports into the Neo4j risk graph")]
struct Cli {
    /// Directory holding the CSV exports (overrides sources.dir).
    #[arg(short, long)]
    data_dir: Option<PathBuf>,

    /// Config file prefix (default: riskgraph).
    #[arg(short, long, default_value = "riskgraph")]
    config: String,

    /// Records per transaction (overrides pipeline.batch_size).
    #[arg(short, long)]
    batch_size: Option<usize>,

    /// Map and load into an in-memory graph instead of Neo4j.
    #[arg(long)]
    dry_run: bool,

    /// Only load these entity types, e.g. `--only customer,linkman`.
    #[arg(long, value_delimiter = ',', value_parser = parse_entity)]
    only: Vec<EntityType>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).json().init();

    let cli = Cli::parse();
    let mut config = ImportConfig::load(&cli.config)?;
    if let Some(dir) = &cli.data_dir {
        config = config.with_data_dir(dir);
    }
    if let Some(batch_size) = cli.batch_size {
        config.pipeline.batch_size = batch_size;
    }

    let sources = open_sources(&config.sources, &cli.only)?;

    let cancel = CancelFlag::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("Interrupt received, stopping after the current batch");
                cancel.cancel();
            }
        });
    }

    let max_sessions = config.pipeline.max_sessions;
    let outcome = if cli.dry_run {
        tracing::info!("Dry run: loading into an in-memory graph");
        let conn = ConnectionManager::new(MemoryStore::new(), max_sessions);
        let outcome = import(&conn, &config, sources, cancel).await;
        let store = conn.store();
        tracing::info!(
            nodes = store.node_count(),
            edges = store.edge_count(),
            commits = store.commits(),
            "Dry run graph"
        );
        outcome
    } else {
        let conn = ConnectionManager::connect(&config.neo4j, max_sessions).await?;
        tracing::info!(uri = %config.neo4j.uri, "Connected to Neo4j");
        let outcome = import(&conn, &config, sources, cancel).await;
        if outcome.is_ok() {
            log_graph_counts(conn.store()).await;
        }
        conn.close();
        outcome
    };

    match outcome {
        Ok(report) => {
            print_report(&report)?;
            Ok(())
        }
        Err(aborted) => {
            tracing::error!(stage = %aborted.stage, reason = %aborted.reason, "Import aborted");
            print_report(&aborted.report)?;
            std::process::exit(1);
        }
    }
}

async fn import<S: GraphStore>(
    conn: &ConnectionManager<S>,
    config: &ImportConfig,
    sources: RecordSources,
    cancel: CancelFlag,
) -> Result<RunReport, RunAborted> {
    Pipeline::new(conn, config.pipeline.clone())
        .with_cancel(cancel)
        .run(sources)
        .await
}

async fn log_graph_counts(client: &GraphClient) {
    for entity in EntityType::LOAD_ORDER {
        match client.count_nodes(entity).await {
            Ok(count) => tracing::info!(label = %entity, count, "Node count"),
            Err(e) => tracing::warn!(label = %entity, error = %e, "Node count failed"),
        }
    }
    for rel_type in RelType::ALL {
        match client.count_edges(rel_type).await {
            Ok(count) => tracing::info!(rel_type = rel_type.as_cypher(), count, "Edge count"),
            Err(e) => tracing::warn!(rel_type = rel_type.as_cypher(), error = %e, "Edge count failed"),
        }
    }
}

fn print_report(report: &RunReport) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(report)?);
    Ok(())
}

fn parse_entity(s: &str) -> Result<EntityType, String> {
    EntityType::parse(s).ok_or_else(|| {
        format!("Invalid entity: {s}. Choose: account, customer, linkman, gps, order, blacklist")
    })
}
