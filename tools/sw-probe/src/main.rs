//! Command-line harness for the DevFlow offline worker.
//!
//! Drives the worker against the real network, or a simulated outage, and
//! prints what each request resolved to. Cache partitions are kept in a JSON
//! snapshot between runs.
//!
//! ## Usage
//!
//! ```bash
//! # Pre-cache the static assets and activate
//! sw-probe install
//!
//! # Resolve requests through the worker
//! sw-probe fetch https://api.github.com/user http://localhost:8080/index.html
//!
//! # Same, with the network gone
//! sw-probe fetch --offline https://api.github.com/user
//!
//! # Inspect or trim the caches
//! sw-probe size
//! sw-probe clear
//!
//! # Show the synthetic offline answer for a URL
//! sw-probe offline /index.html
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use devflow_common::{init_logging, LogConfig, LogFormat};
use devflow_net::{Fetcher, HttpFetcher, LoaderConfig, Request, Response, ScriptedFetcher};
use devflow_sw::{
    CacheStorage, FetchOutcome, OfflineResponder, Reply, ServiceWorker, WorkerConfig,
};
use serde_json::json;
use tracing::{debug, info};

#[derive(Parser)]
#[command(name = "sw-probe")]
#[command(about = "Drive the DevFlow offline worker from the command line")]
struct Cli {
    /// Worker configuration (JSON). Defaults are used when omitted.
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Cache snapshot file kept between runs.
    #[arg(short, long, global = true)]
    snapshot: Option<PathBuf>,

    /// Log filter, e.g. "debug" or "devflow_sw=trace".
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Debug logging with source locations and span events.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Log format: pretty, compact or json.
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pre-cache the static assets and activate
    Install,

    /// Resolve requests through the worker
    Fetch {
        /// URLs to request (relative URLs resolve against the origin)
        #[arg(required = true)]
        urls: Vec<String>,
        /// Simulate a total network outage
        #[arg(long)]
        offline: bool,
    },

    /// Print the total stored body size
    Size,

    /// Delete partitions from older cache versions
    Clear,

    /// Print the synthetic offline response for a URL
    Offline {
        /// URL to answer
        url: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let mut logging = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    if let Some(filter) = &cli.log_level {
        logging = logging.with_filter(filter.clone());
    }
    init_logging(logging.with_format(cli.log_format));

    let config = load_config(cli.config.as_deref())?;
    let snapshot = cli.snapshot.clone().unwrap_or_else(default_snapshot_path);
    debug!(snapshot = %snapshot.display(), "Using cache snapshot");

    match cli.command {
        Commands::Install => {
            let worker = open_worker(config, &snapshot, false)?;
            let count = worker
                .install()
                .await
                .context("install failed; nothing was cached")?;
            println!("Installed {count} static assets into {}", worker.config().static_cache_name());
            save(&worker, &snapshot).await?;
        }

        Commands::Fetch { urls, offline } => {
            let worker = Arc::new(open_worker(config, &snapshot, offline)?);
            if !worker.resume().await {
                bail!("no installed generation in {}; run `sw-probe install` first", snapshot.display());
            }

            let (handle, _loop) = Arc::clone(&worker).start();
            for raw in &urls {
                let url = worker
                    .config()
                    .origin
                    .join(raw)
                    .with_context(|| format!("invalid URL: {raw}"))?;
                let request = Request::get(url);
                let route = worker.route(&request);
                match handle.fetch(request).await? {
                    FetchOutcome::Respond(response) => {
                        println!("{route:<26} {}", describe(&response));
                    }
                    FetchOutcome::Passthrough(request) => {
                        println!("{route:<26} {} (not intercepted)", request.url);
                    }
                }
            }
            save(&worker, &snapshot).await?;
        }

        Commands::Size => {
            let worker = open_worker(config, &snapshot, true)?;
            match worker.handle_message(json!({"type": "GET_CACHE_SIZE"})).await {
                Some(Reply::CacheSize { cache_size }) => println!("{cache_size} bytes"),
                other => bail!("unexpected reply: {other:?}"),
            }
        }

        Commands::Clear => {
            let worker = open_worker(config, &snapshot, true)?;
            let before: Vec<String> = partition_names(&worker).await;
            worker.handle_message(json!({"type": "CLEAR_CACHE"})).await;
            let after = partition_names(&worker).await;
            for name in before.iter().filter(|n| !after.contains(*n)) {
                println!("deleted {name}");
            }
            save(&worker, &snapshot).await?;
        }

        Commands::Offline { url } => {
            let response = OfflineResponder::new(&config).respond_to_str(&url);
            println!("{}", describe(&response));
            println!();
            println!("{}", String::from_utf8_lossy(response.body()));
        }
    }

    Ok(())
}

fn default_snapshot_path() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("devflow")
        .join("sw-snapshot.json")
}

fn load_config(path: Option<&Path>) -> anyhow::Result<WorkerConfig> {
    match path {
        Some(path) => WorkerConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => Ok(WorkerConfig::default()),
    }
}

fn open_worker(config: WorkerConfig, snapshot: &Path, offline: bool) -> anyhow::Result<ServiceWorker> {
    let storage = CacheStorage::load(snapshot)
        .with_context(|| format!("failed to read snapshot {}", snapshot.display()))?;

    let fetcher: Arc<dyn Fetcher> = if offline {
        info!("Network disabled");
        Arc::new(ScriptedFetcher::offline())
    } else {
        Arc::new(HttpFetcher::new(LoaderConfig::default())?)
    };

    Ok(ServiceWorker::new(config, storage, fetcher)?)
}

async fn save(worker: &ServiceWorker, snapshot: &Path) -> anyhow::Result<()> {
    worker
        .storage()
        .read()
        .await
        .save(snapshot)
        .with_context(|| format!("failed to write snapshot {}", snapshot.display()))
}

async fn partition_names(worker: &ServiceWorker) -> Vec<String> {
    worker
        .storage()
        .read()
        .await
        .keys()
        .into_iter()
        .map(str::to_string)
        .collect()
}

/// One-line summary: status, URL, size and the cache markers.
fn describe(response: &Response) -> String {
    let mut line = format!(
        "{} {} {} ({} bytes)",
        response.status.as_u16(),
        response.status_text(),
        response.url,
        response.body_len()
    );
    if response.header_str("sw-offline-cache").is_some() {
        line.push_str(" [offline cache]");
    }
    if let Some(captured) = response.header_str("sw-cache-date") {
        line.push_str(&format!(" [captured {captured}]"));
    }
    line
}
