//! Shellcache CLI
//!
//! Runs the offline worker against the live network, keeping its cache
//! generations in a JSON snapshot between invocations.

mod store;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use http::{header, HeaderValue};
use shellcache_common::{init_logging, LogConfig, LogFormat};
use shellcache_net::{FetcherConfig, HttpFetcher, Request};
use shellcache_sw::{
    CacheStorage, FetchOutcome, OfflineWorker, ServiceWorkerEvent, WorkerConfig, WorkerHost,
};
use tokio::sync::mpsc;
use tracing::debug;
use url::Url;

use store::{InstalledWorker, Store};

#[derive(Parser)]
#[command(name = "shellcache")]
#[command(about = "Offline app-shell cache worker")]
struct Cli {
    /// Worker configuration (JSON); overrides --origin/--product/--release
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Controlled origin
    #[arg(long, global = true, default_value = "http://localhost:8080/")]
    origin: Url,

    /// Product name used in the cache name
    #[arg(long, global = true, default_value = "lknzmzd")]
    product: String,

    /// Cache version ordinal
    #[arg(long, global = true, default_value_t = 1)]
    release: u32,

    /// State directory (defaults to the platform cache directory)
    #[arg(long, global = true)]
    store: Option<PathBuf>,

    /// Log format: pretty, compact or json
    #[arg(long, global = true, default_value = "compact")]
    log_format: LogFormat,

    /// Log filter directives, e.g. "shellcache_sw=trace"
    #[arg(long, global = true)]
    log_filter: Option<String>,

    /// Verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Install and activate the worker, replacing older generations
    Install,

    /// Route one request through the worker
    Fetch {
        /// Request URL
        url: Url,

        /// Treat the request as a page navigation
        #[arg(long)]
        navigate: bool,

        /// Accept header value
        #[arg(long)]
        accept: Option<String>,
    },

    /// List cache generations and their entries
    Caches,

    /// Delete all saved state
    Purge,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_config = if cli.verbose {
        LogConfig::debug()
    } else {
        LogConfig::default()
    };
    let mut log_config = log_config.with_format(cli.log_format);
    if let Some(filter) = &cli.log_filter {
        log_config = log_config.with_filter(filter);
    }
    init_logging(log_config)?;

    let store = cli.store.clone().map(Store::new).unwrap_or_default();

    match &cli.command {
        Commands::Install => {
            let config = worker_config(&cli)?;
            let (host, events) = host_for(&store)?;
            let worker = install(config, host, &store).await?;
            drain(events);
            save(&worker, &store).await?;

            let caches = worker.caches();
            let caches = caches.read().await;
            println!("Active cache: {}", worker.config().cache_name());
            if let Some(cache) = caches.get(&worker.config().cache_name()) {
                println!("Precached {} entries", cache.len());
            }
        }

        Commands::Fetch {
            url,
            navigate,
            accept,
        } => {
            let config = worker_config(&cli)?;
            let (host, events) = host_for(&store)?;
            let worker = match store.installed()? {
                Some(installed) if installed == record_for(&config) => {
                    debug!(cache = %installed.cache_name, "Resuming activated worker");
                    OfflineWorker::resume(config, fetcher()?, host)
                }
                _ => install(config, host, &store).await?,
            };

            let mut request = if *navigate {
                Request::navigate(url.clone())
            } else {
                Request::get(url.clone())
            };
            if let Some(accept) = accept {
                let value = HeaderValue::from_str(accept).context("invalid --accept value")?;
                request = request.header(header::ACCEPT, value);
            }

            let outcome = worker.handle_fetch(request).await;
            drain(events);
            save(&worker, &store).await?;

            match outcome {
                FetchOutcome::Respond(response) => {
                    let source = if response.from_cache {
                        "cache"
                    } else if response.is_network_error() {
                        "error"
                    } else {
                        "network"
                    };
                    println!("{} {} ({source})", response.status, response.status_text);
                    println!("{} bytes", response.body.len());
                }
                FetchOutcome::Passthrough => {
                    println!("passthrough (not handled by the worker)");
                }
            }
        }

        Commands::Caches => {
            let caches = store.load_caches()?;
            let names = caches.keys();
            if names.is_empty() {
                println!("No caches in {}", store.dir().display());
            }
            for name in names {
                let Some(cache) = caches.get(name) else {
                    continue;
                };
                println!("{name} ({} entries)", cache.len());
                for key in cache.keys() {
                    println!("  {key}");
                }
            }
        }

        Commands::Purge => {
            if store.purge()? {
                println!("Purged {}", store.dir().display());
            } else {
                println!("Nothing to purge");
            }
        }
    }

    Ok(())
}

fn worker_config(cli: &Cli) -> Result<WorkerConfig> {
    match &cli.config {
        Some(path) => WorkerConfig::from_file(path)
            .with_context(|| format!("loading {}", path.display())),
        None => Ok(WorkerConfig::builder(&cli.product, cli.release, cli.origin.clone()).build()?),
    }
}

fn fetcher() -> Result<HttpFetcher> {
    Ok(HttpFetcher::new(FetcherConfig::default())?)
}

fn host_for(store: &Store) -> Result<(WorkerHost, mpsc::UnboundedReceiver<ServiceWorkerEvent>)> {
    let caches: CacheStorage = store.load_caches()?;
    Ok(WorkerHost::with_caches(caches))
}

fn record_for(config: &WorkerConfig) -> InstalledWorker {
    InstalledWorker {
        cache_name: config.cache_name(),
        origin: config.origin.to_string(),
    }
}

async fn install(
    config: WorkerConfig,
    host: WorkerHost,
    store: &Store,
) -> Result<OfflineWorker<HttpFetcher>> {
    let record = record_for(&config);
    let worker = OfflineWorker::new(config, fetcher()?, host);

    worker.install().await.context("install failed")?;
    let deleted = worker.activate().await.context("activate failed")?;

    store.record_installed(&record)?;
    debug!(cache = %record.cache_name, ?deleted, "Recorded installed worker");
    Ok(worker)
}

async fn save(worker: &OfflineWorker<HttpFetcher>, store: &Store) -> Result<()> {
    let caches = worker.caches();
    let caches = caches.read().await;
    store
        .save_caches(&caches)
        .with_context(|| format!("saving {}", store.caches_path().display()))
}

fn drain(mut events: mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
    while let Ok(event) = events.try_recv() {
        debug!(?event, "Worker event");
    }
}
