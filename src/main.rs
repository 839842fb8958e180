//! info-fetcher command line
//!
//! `fetch` runs the pipeline once over the current backlog, `enqueue` adds
//! candidate identifiers and `backlog` prints what a run would fetch.

use clap::{Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use info_fetcher::{Config, Database, InfoHash, MetadataFetcher, RunOutcome, cancel_on_signal};

#[derive(Parser)]
#[command(name = "info-fetcher")]
#[command(about = "Fetch BitTorrent metadata for every pending info hash")]
#[command(version)]
struct Cli {
    /// JSON config file (defaults apply when omitted)
    #[arg(long, short, env = "INFO_FETCHER_CONFIG")]
    config: Option<PathBuf>,

    /// Override the database path
    #[arg(long, env = "INFO_FETCHER_DATABASE")]
    database: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG says otherwise
    #[arg(long, short)]
    verbose: bool,

    /// What to do (default: fetch)
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch metadata for the whole backlog, then exit
    Fetch {
        /// Per-identifier metadata deadline in seconds
        #[arg(long)]
        timeout_secs: Option<u64>,

        /// Maximum number of identifiers fetched at once
        #[arg(long)]
        max_concurrent: Option<usize>,

        /// Tracker URL, replaces the configured list (repeatable)
        #[arg(long = "tracker")]
        trackers: Vec<String>,

        /// Serve the status endpoint on this address for the duration of the run
        #[arg(long)]
        status_addr: Option<SocketAddr>,
    },
    /// Add info hashes to the candidate table
    Enqueue {
        /// 40-character hex info hashes
        #[arg(required = true)]
        infohashes: Vec<InfoHash>,
    },
    /// Print the identifiers a run would fetch
    Backlog,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| default_level.into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = %e, "info-fetcher failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> info_fetcher::Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => {
            tracing::info!(config_path = %path.display(), "Loading configuration from file");
            Config::load(path)?
        }
        None => Config::default(),
    };
    if let Some(database) = cli.database {
        config.persistence.database_path = database;
    }

    let command = cli.command.unwrap_or(Commands::Fetch {
        timeout_secs: None,
        max_concurrent: None,
        trackers: Vec::new(),
        status_addr: None,
    });

    match command {
        Commands::Fetch {
            timeout_secs,
            max_concurrent,
            trackers,
            status_addr,
        } => {
            if let Some(secs) = timeout_secs {
                config.fetch.metadata_timeout = Duration::from_secs(secs);
            }
            if max_concurrent.is_some() {
                config.fetch.max_concurrent_fetches = max_concurrent;
            }
            if !trackers.is_empty() {
                config.fetch.trackers = trackers;
            }
            if let Some(addr) = status_addr {
                config.status.enabled = true;
                config.status.bind_address = addr;
            }
            config.validate()?;
            fetch(config).await
        }
        Commands::Enqueue { infohashes } => {
            let db = Database::new(&config.persistence.database_path).await?;
            let added = db.insert_candidates(&infohashes).await?;
            tracing::info!(added, given = infohashes.len(), "Candidates enqueued");
            db.close().await;
            Ok(ExitCode::SUCCESS)
        }
        Commands::Backlog => {
            let db = Database::new(&config.persistence.database_path).await?;
            for info_hash in db.resolve_backlog().await? {
                println!("{info_hash}");
            }
            db.close().await;
            Ok(ExitCode::SUCCESS)
        }
    }
}

async fn fetch(config: Config) -> info_fetcher::Result<ExitCode> {
    tracing::info!("info-fetcher v{}", env!("CARGO_PKG_VERSION"));

    let status = config.status.clone();
    let fetcher = Arc::new(MetadataFetcher::new(config).await?);

    let cancel = CancellationToken::new();
    cancel_on_signal(cancel.clone());

    // The status server shares the run's token; it is cancelled below once the run ends
    let server = status.enabled.then(|| {
        let fetcher = fetcher.clone();
        let shutdown = cancel.child_token();
        tokio::spawn(async move {
            if let Err(e) =
                info_fetcher::api::start_status_server(fetcher, status.bind_address, shutdown).await
            {
                tracing::error!(error = %e, "Status server failed");
            }
        })
    });

    let outcome = fetcher.run(cancel.clone()).await;
    cancel.cancel();
    if let Some(server) = server {
        server.await.ok();
    }

    let outcome = outcome?;
    let summary = outcome.summary();
    println!(
        "{}",
        serde_json::to_string(&outcome).unwrap_or_else(|_| format!("{summary:?}"))
    );

    Ok(match outcome {
        RunOutcome::Completed(_) => ExitCode::SUCCESS,
        RunOutcome::Interrupted { .. } => ExitCode::FAILURE,
    })
}
