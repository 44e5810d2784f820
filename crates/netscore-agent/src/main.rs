//! Network Score Agent
//!
//! Daemon hosting one network score service.
//!
//! - Loads the provider list and cache setup from a TOML config
//! - Binds the active scorer's recommendation service over TCP
//! - Registers an in-memory score cache per configured network type
//! - Serves package, setting and score requests on a Unix control socket

mod binder;
mod cache;
mod control;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use netscore_core::{ConfiguredResolver, NetworkScoreApi, NetworkScoreService, ServiceConfig};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;

use crate::cache::MemoryScoreCache;

/// Network score agent daemon.
#[derive(Parser, Debug)]
#[command(name = "netscore-agent", about = "Network score service agent")]
struct Cli {
    /// Path to the TOML config. Defaults apply when omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Unix control socket path.
    #[arg(long, default_value = "/tmp/netscore-agent.sock")]
    socket: PathBuf,
}

/// Shared agent state accessible from all tasks.
pub struct AgentState {
    pub api: NetworkScoreApi,
    pub resolver: Arc<ConfiguredResolver>,
    pub caches: Vec<Arc<MemoryScoreCache>>,
    pub shutdown: watch::Receiver<bool>,
}

fn load_config(path: Option<&PathBuf>) -> anyhow::Result<ServiceConfig> {
    let Some(path) = path else {
        return Ok(ServiceConfig::default());
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    Ok(ServiceConfig::from_toml_str(&raw)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_ref())?;

    tracing::info!(
        providers = config.providers.len(),
        caches = config.cache_types.len(),
        recommendations_enabled = config.recommendations_enabled,
        socket = %cli.socket.display(),
        "netscore-agent starting"
    );

    // Shutdown signal
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let resolver = Arc::new(ConfiguredResolver::new(&config));
    let binder = Arc::new(binder::TcpServiceBinder::new(
        tokio::runtime::Handle::current(),
        &config,
    ));
    let service = NetworkScoreService::new(resolver.clone(), binder);

    let caches: Vec<Arc<MemoryScoreCache>> = config
        .cache_types
        .iter()
        .map(|&network_type| {
            let cache = Arc::new(MemoryScoreCache::new(network_type, config.cache_filter));
            service.register_score_cache(network_type, cache.clone(), cache.filter());
            cache
        })
        .collect();

    service.system_ready();
    service.system_running();

    let state = Arc::new(AgentState {
        api: NetworkScoreApi::new(service.clone()),
        resolver,
        caches,
        shutdown: shutdown_rx,
    });

    // ── Control socket ──────────────────────────────────────────
    let control_state = state.clone();
    let socket = cli.socket.clone();
    let mut control_handle =
        tokio::spawn(async move { control::run(control_state, &socket).await });

    // ── Shutdown handling ───────────────────────────────────────
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("received SIGINT, shutting down");
        }
        result = &mut control_handle => {
            match result {
                Ok(Err(e)) => tracing::error!("control socket failed: {e}"),
                Err(e) => tracing::error!("control task failed: {e}"),
                Ok(Ok(())) => {}
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if !control_handle.is_finished() {
        let _ = control_handle.await;
    }
    service.shutdown();

    tracing::info!("netscore-agent stopped");
    Ok(())
}
