//! cachepatchd - Cache Patch Daemon
//!
//! Watches a game client's content cache, indexes artifact versions and
//! applies registered byte patches to new payloads as they appear.

use anyhow::Result;
use cachepatch_common::config::Config;
use cachepatch_index::ContentIndex;
use cachepatch_parser::{BundleParser, DescriptorTableParser};
use cachepatch_pipeline::{Blocklist, BlocklistHandler, PatchPipeline};
use cachepatch_watch::{
    spawn_rotation_monitor, ArtifactWatcher, LoadGate, TailMarkers, WatcherConfig,
};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "cachepatchd")]
#[command(about = "Game client cache patch daemon")]
#[command(version)]
struct Args {
    /// Configuration file path
    #[arg(short, long, default_value = "/etc/cachepatch/cachepatchd.toml")]
    config: String,

    /// Cache root directory (overrides the config file)
    #[arg(long)]
    cache_root: Option<PathBuf>,

    /// Client log directory (overrides the config file)
    #[arg(long)]
    log_dir: Option<PathBuf>,

    /// Index database path (overrides the config file)
    #[arg(long)]
    index_path: Option<PathBuf>,

    /// Log level
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command line arguments
    let args = Args::parse();

    // Load config file if it exists
    let mut config: Config = if std::path::Path::new(&args.config).exists() {
        let config_str = std::fs::read_to_string(&args.config)?;
        toml::from_str(&config_str).unwrap_or_else(|e| {
            eprintln!("Warning: Failed to parse config file: {}", e);
            Config::default()
        })
    } else {
        Config::default()
    };

    // Merge CLI args with config file (CLI takes precedence)
    if let Some(root) = args.cache_root {
        config.cache.root = Some(root);
    }
    if let Some(dir) = args.log_dir {
        config.client.log_dir = Some(dir);
    }
    if let Some(path) = args.index_path {
        config.index.path = path;
    }
    let log_level = args.log_level.unwrap_or_else(|| config.logging.level.clone());

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting cachepatchd");
    info!("Config file: {}", args.config);

    let Some(cache_root) = config.cache.root.clone() else {
        error!(
            "No cache root configured. Use --cache-root or set [cache] root in {}",
            args.config
        );
        std::process::exit(1);
    };
    if !cache_root.is_dir() {
        error!("Cache root {} is not a directory", cache_root.display());
        std::process::exit(1);
    }
    info!("Cache root: {}", cache_root.display());
    info!("Index database: {}", config.index.path.display());

    // Open the content index and bring it up to date with disk.
    let parser: Arc<dyn BundleParser> = Arc::new(DescriptorTableParser);
    let index = match ContentIndex::open(
        &config.index.path,
        parser.clone(),
        config.cache.payload_file.clone(),
    ) {
        Ok(index) => Arc::new(index),
        Err(e) => {
            error!("Failed to open content index: {}", e);
            std::process::exit(1);
        }
    };
    index.rescan(&cache_root, &config.cache.skip_dir);
    info!("Initial scan complete: {} artifacts indexed", index.len());

    // Blocklist data is optional; an empty blocklist applies to nothing.
    // A configured-but-absent file is tolerated, malformed data is not.
    let blocklist = match &config.patch.blocklist_path {
        Some(path) if path.is_file() => match Blocklist::from_json_file(path) {
            Ok(blocklist) => {
                info!(
                    "Loaded blocklist with {} entries from {}",
                    blocklist.len(),
                    path.display()
                );
                blocklist
            }
            Err(e) => {
                error!("Failed to load blocklist {}: {}", path.display(), e);
                std::process::exit(1);
            }
        },
        Some(path) => {
            warn!("Blocklist file {} not found; continuing without", path.display());
            Blocklist::empty()
        }
        None => Blocklist::empty(),
    };
    let pipeline = Arc::new(PatchPipeline::new(
        Vec::new(),
        BlocklistHandler::new(blocklist),
    ));

    // The gate is driven by the client log; without a log directory it
    // stays Idle and world patches are never held back.
    let gate = LoadGate::new();
    let monitor = config.client.log_dir.clone().map(|log_dir| {
        info!("Tailing client logs in {}", log_dir.display());
        spawn_rotation_monitor(
            log_dir,
            config.client.log_prefix.clone(),
            gate.clone(),
            TailMarkers {
                loading: config.client.loading_marker.clone(),
                idle: config.client.idle_marker.clone(),
            },
            Duration::from_millis(config.watch.tail_poll_ms),
            Duration::from_secs(config.watch.rotation_poll_secs),
        )
    });
    if monitor.is_none() {
        warn!("No client log directory configured; the load gate stays Idle");
    }

    let watcher = match ArtifactWatcher::spawn(
        &cache_root,
        WatcherConfig {
            marker_file: config.cache.marker_file.clone(),
            payload_file: config.cache.payload_file.clone(),
            retry_delay: Duration::from_millis(config.watch.retry_delay_ms),
        },
        index.clone(),
        parser,
        gate,
        pipeline,
    ) {
        Ok(watcher) => watcher,
        Err(e) => {
            error!("Failed to start artifact watcher: {}", e);
            std::process::exit(1);
        }
    };

    // Periodic index persistence
    let persist_index = index.clone();
    let persist_interval = Duration::from_secs(config.index.persist_interval_secs.max(1));
    let persist_handle = tokio::spawn(async move {
        let mut ticker = tokio::time::interval(persist_interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        // The first tick completes immediately; skip it.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            if let Err(e) = persist_index.persist() {
                error!("Periodic index persistence failed: {}", e);
            }
        }
    });

    info!("cachepatchd running");
    tokio::signal::ctrl_c().await?;
    info!("Shutting down...");

    persist_handle.abort();
    watcher.stop().await;
    if let Some(monitor) = monitor {
        monitor.stop().await;
    }
    if let Err(e) = index.persist() {
        error!("Final index persistence failed: {}", e);
    }

    info!("cachepatchd shut down gracefully");
    Ok(())
}
