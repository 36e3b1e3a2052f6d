use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;

use nodepool::{
    Engine, EngineConfig, ExportFormat, NodeFilter, NodeSnapshot, NodeView, ProbeScope, Protocol,
    SortOrder, SourceFetcher,
};

/// Aggregate proxy share links, probe them and export the best.
#[derive(Parser, Debug)]
#[command(name = "nodepool", version, about, arg_required_else_help = true)]
struct Cli {
    /// Config file (default: ~/.nodepool/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Node snapshot kept between runs (default: ~/.nodepool/nodes.json)
    #[arg(long, global = true)]
    state: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ingest share links from files, one per line ("-" reads stdin)
    Ingest {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Fetch configured sources, ingest them and probe new nodes
    Refresh,

    /// Probe stored nodes
    Probe {
        #[arg(long)]
        protocol: Option<Protocol>,

        /// Re-probe nodes that were already checked
        #[arg(long)]
        all: bool,
    },

    /// List stored nodes
    List {
        #[arg(long)]
        protocol: Option<Protocol>,

        #[arg(long)]
        healthy: bool,

        #[arg(long, default_value_t = SortOrder::Score)]
        sort: SortOrder,

        #[arg(long)]
        limit: Option<usize>,

        /// Print JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Export the best nodes
    Export {
        #[arg(long, default_value_t = ExportFormat::Raw)]
        format: ExportFormat,

        #[arg(long)]
        limit: Option<usize>,

        #[arg(long)]
        protocol: Option<Protocol>,

        #[arg(long)]
        healthy: bool,

        /// Write to a file instead of stdout
        #[arg(long, short)]
        output: Option<PathBuf>,
    },

    /// Probe links without storing them
    Ping {
        #[arg(required = true)]
        links: Vec<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(EngineConfig::default_path);
    let state_path = cli.state.unwrap_or_else(NodeSnapshot::default_path);

    let config = EngineConfig::load(&config_path)?;
    let engine = Engine::new(config)?;
    if let Some(snapshot) = NodeSnapshot::load(&state_path).await? {
        engine.restore(snapshot.nodes);
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupted, keeping partial results");
            ctrl_c.cancel();
        }
    });

    match cli.command {
        Command::Ingest { files } => {
            let mut lines = Vec::new();
            for file in &files {
                let body = read_input(file).await?;
                lines.extend(nodepool::sources::decode_body(&body));
            }
            let report = engine.ingest(&lines);
            println!("{}", serde_json::to_string_pretty(&report)?);
            NodeSnapshot::save(&engine.snapshot(), &state_path).await?;
        }
        Command::Refresh => {
            if engine.config().sources.is_empty() {
                anyhow::bail!("no sources configured in {}", config_path.display());
            }
            let fetcher = SourceFetcher::new()?;
            let report = engine.refresh(&fetcher, cancel).await;
            println!("{}", serde_json::to_string_pretty(&report)?);
            NodeSnapshot::save(&engine.snapshot(), &state_path).await?;
        }
        Command::Probe { protocol, all } => {
            let summary = engine.probe(ProbeScope::from(protocol), all, cancel).await;
            println!("{}", serde_json::to_string_pretty(&summary)?);
            NodeSnapshot::save(&engine.snapshot(), &state_path).await?;
        }
        Command::List {
            protocol,
            healthy,
            sort,
            limit,
            json,
        } => {
            let filter = NodeFilter {
                protocol,
                healthy_only: healthy,
            };
            let views = engine.list(&filter, sort, limit);
            if json {
                println!("{}", serde_json::to_string_pretty(&views)?);
            } else {
                for view in &views {
                    println!("{}", table_row(view));
                }
            }
        }
        Command::Export {
            format,
            limit,
            protocol,
            healthy,
            output,
        } => {
            let filter = NodeFilter {
                protocol,
                healthy_only: healthy,
            };
            let payload = engine.export(format, &filter, limit);
            tracing::info!(
                "exported {} node(s) as {format}, {} omitted",
                payload.exported,
                payload.omitted
            );
            match output {
                Some(path) => tokio::fs::write(&path, &payload.body)
                    .await
                    .with_context(|| format!("Failed to write {:?}", path))?,
                None => println!("{}", payload.body),
            }
        }
        Command::Ping { links } => {
            let results = engine.ping(&links, cancel).await;
            println!("{}", serde_json::to_string_pretty(&results)?);
        }
    }

    Ok(())
}

async fn read_input(path: &Path) -> Result<String> {
    if path == Path::new("-") {
        use tokio::io::AsyncReadExt;
        let mut body = String::new();
        tokio::io::stdin()
            .read_to_string(&mut body)
            .await
            .context("Failed to read stdin")?;
        return Ok(body);
    }
    tokio::fs::read_to_string(path)
        .await
        .with_context(|| format!("Failed to read {:?}", path))
}

fn table_row(view: &NodeView) -> String {
    let latency = view
        .latency_ms
        .map(|ms| format!("{ms}ms"))
        .unwrap_or_else(|| "-".into());
    format!(
        "{:<6} {:>5.2} {:<9} {:>7}  {}:{}  {}",
        view.protocol.to_string(),
        view.score,
        view.healthy.to_string(),
        latency,
        view.host,
        view.port,
        view.label
    )
}
