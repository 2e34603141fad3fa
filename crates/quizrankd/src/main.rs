//! QuizRank Daemon - progression, achievements and leaderboards
//!
//! Wires the store, cache tiers and notifier into the progression service and
//! runs the background reconciler and cache warmer until interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use quizrank_common::cache::{MemorySharedCache, SharedCacheStore};
use quizrank_common::config::{CONFIG_ENV, CONFIG_PATH};
use quizrank_common::store::{MemoryStore, ProgressionStore};
use quizrank_common::{QuizRankConfig, Services};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "quizrankd")]
#[command(version, about = "QuizRank progression daemon")]
struct Cli {
    /// Config file (falls back to $QUIZRANK_CONFIG, then /etc/quizrank/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn config_path(cli: &Cli) -> PathBuf {
    cli.config
        .clone()
        .or_else(|| std::env::var_os(CONFIG_ENV).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(CONFIG_PATH))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let path = config_path(&cli);
    let config = QuizRankConfig::load(&path)
        .with_context(|| format!("Failed to load configuration from {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .init();

    info!("[BOOT] QuizRank Daemon v{} starting...", env!("CARGO_PKG_VERSION"));
    info!("[BOOT] Config loaded from {}", path.display());

    if cli.check {
        config.validate().context("Invalid configuration")?;
        info!("Configuration OK");
        return Ok(());
    }

    let store: Arc<dyn ProgressionStore> = Arc::new(MemoryStore::new());
    let shared_cache: Option<Arc<dyn SharedCacheStore>> = if config.cache.enabled {
        Some(Arc::new(MemorySharedCache::new()))
    } else {
        None
    };

    let services = Services::build(config, store, shared_cache).context("Failed to build services")?;
    info!("[BOOT] Services built ({:?} mode)", services.config.service.mode);

    services
        .seed_catalog()
        .await
        .context("Failed to load achievement catalog")?;

    if services.cache.is_enabled() {
        match services.ranker.warm().await {
            Ok(entries) => info!("[BOOT] Cache warmed ({} entries)", entries),
            Err(e) => warn!("[BOOT] Initial cache warm failed: {}", e),
        }
    }

    services.start_background().await;
    info!(
        "[BOOT] Background tasks started (sync every {:?})",
        services.reconciler.interval()
    );

    info!("[READY] quizrankd operational");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for shutdown signal")?;
    info!("Shutting down gracefully");

    services.shutdown().await;
    for report in services.supervisor.status().await {
        info!(
            "Task {} stopped after {} runs ({} failures)",
            report.name, report.runs, report.failures
        );
    }
    let cache = services.cache.stats().await;
    info!("Cache hit rate {:.1}% over {} lookups", cache.hit_rate * 100.0, cache.hits + cache.misses);

    Ok(())
}
