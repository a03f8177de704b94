mod api;
mod broadcast;
mod cache;
mod chain;
mod config;
mod curves;
mod error;
mod ingest;
mod price_feed;
mod push;
mod recompute;
mod state;
mod synth;
mod types;
mod whitelist;

use std::sync::Arc;

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::api::routes::{router, ApiState};
use crate::broadcast::Broadcaster;
use crate::cache::Cache;
use crate::chain::{Heartbeat, HeightProvider, NodeClient};
use crate::config::Config;
use crate::error::Result;
use crate::ingest::Ingestor;
use crate::price_feed::PriceFeed;
use crate::push::RedisPublisher;
use crate::recompute::Recomputer;
use crate::state::PipelineState;

#[tokio::main]
async fn main() {
    let cfg = match Config::from_env() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Config error: {e}");
            std::process::exit(1);
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(&cfg.log_level))
        .init();

    if let Err(e) = run(cfg).await {
        error!("Fatal error: {e}");
        std::process::exit(1);
    }
}

async fn run(cfg: Config) -> Result<()> {
    // --- Shared infrastructure ---
    let cache = Cache::connect(&cfg.redis_url).await?;
    let publisher = RedisPublisher::connect(&cfg.redis_url).await?;
    let node_client: Arc<dyn HeightProvider> = Arc::new(NodeClient::new(cfg.node_uris.clone())?);
    info!("Cache and push channel ready at {}", cfg.redis_url);

    let leagues = whitelist::load(&cfg.whitelist_path)?;
    info!("Whitelist loaded: {} leagues from {}", leagues.len(), cfg.whitelist_path);

    let state = PipelineState::new();
    let broadcaster =
        Arc::new(Broadcaster::new(cache.clone(), Arc::new(publisher), Arc::clone(&state)));

    // --- Startup passes: exchange rate first, then a full ingestion, so the
    // cache is populated before any periodic job fires. ---
    let price_feed = PriceFeed::new(cache.clone(), Arc::clone(&state))?;
    if let Err(e) = price_feed.run_once().await {
        warn!("Startup price fetch failed, volumes start at zero rate: {e}");
    }

    let ingestor = Ingestor::new(cfg.clone(), cache.clone(), Arc::clone(&state), leagues)?;
    ingestor.run_once().await;
    info!("Startup ingestion complete");

    // --- Periodic jobs ---
    let heartbeat = Heartbeat::new(
        node_client,
        Arc::clone(&state),
        cache.clone(),
        Arc::clone(&broadcaster),
    );
    tokio::spawn(async move { heartbeat.run().await });

    tokio::spawn(async move { price_feed.run().await });
    tokio::spawn(async move { ingestor.run().await });

    let recomputer = Recomputer::new(cache.clone(), Arc::clone(&state));
    tokio::spawn(async move { recomputer.run().await });

    // --- HTTP API server ---
    let app = router(ApiState { state: Arc::clone(&state), cache: cache.clone() });
    let bind_addr = format!("0.0.0.0:{}", cfg.api_port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("HTTP API listening on {bind_addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    Ok(())
}
