// =============================================================================
// Helix Algorithm Engine — Main Entry Point
// =============================================================================
//
// Startup order: config → state → history seed → worker pool → dispatcher →
// feed → HTTP surface.  Every subsystem runs as its own task; the feed and
// dispatcher own their reconnect/retry loops, so nothing here restarts
// anything.
// =============================================================================

// ── Module declarations ──────────────────────────────────────────────────────
mod api;
mod app_state;
mod dispatch;
mod engine;
mod history;
mod indicators;
mod market_data;
mod matcher;
mod runtime_config;
mod signal_detector;
mod strategy;
mod types;

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::app_state::AppState;
use crate::dispatch::{ExecutionDispatcher, RetryPolicy};
use crate::matcher::DirectoryClient;
use crate::runtime_config::RuntimeConfig;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Helix Algorithm Engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });

    // Env overrides for deployment without touching the config file.
    if let Ok(syms) = std::env::var("HELIX_SYMBOLS") {
        config.symbols = syms
            .split(',')
            .map(|s| s.trim().to_uppercase())
            .filter(|s| !s.is_empty())
            .collect();
    }
    if let Ok(url) = std::env::var("HELIX_FEED_URL") {
        config.feed_url = url;
    }

    info!(
        symbols = ?config.symbols,
        intervals = ?config.intervals,
        strategies = config.strategies.len(),
        "engine configured"
    );

    // ── 2. Build shared state ────────────────────────────────────────────
    let state = Arc::new(AppState::new(config));

    if state.registry.is_empty() {
        warn!("strategy table is empty: candles will aggregate but nothing can fire");
    }

    // ── 3. Seed candle history (optional) ────────────────────────────────
    history::seed_store(&state).await;

    // ── 4. Engine worker pool ────────────────────────────────────────────
    let (signal_tx, signal_rx) = mpsc::unbounded_channel();
    let router = engine::spawn_engine(&state, signal_tx);

    // ── 5. Signal dispatcher ─────────────────────────────────────────────
    let (directory, dispatcher) = {
        let config = state.runtime_config.read();
        let policy = RetryPolicy::new(
            config.dispatch_max_attempts,
            Duration::from_millis(config.dispatch_base_delay_ms),
            Duration::from_millis(config.dispatch_max_delay_ms),
        );
        (
            DirectoryClient::new(config.directory_base_url.clone()),
            Arc::new(ExecutionDispatcher::new(&config.queue_base_url, policy)),
        )
    };

    let dispatcher_state = state.clone();
    tokio::spawn(async move {
        dispatch::run_signal_dispatcher(dispatcher_state, signal_rx, directory, dispatcher).await;
    });

    // ── 6. Candle feed ───────────────────────────────────────────────────
    let feed_state = state.clone();
    tokio::spawn(async move {
        market_data::feed::run_feed(feed_state, router).await;
    });

    // ── 7. HTTP surface ──────────────────────────────────────────────────
    let bind_addr = std::env::var("HELIX_BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3000".into());
    let api_state = state.clone();
    let api_addr = bind_addr.clone();
    tokio::spawn(async move {
        let app = api::router(api_state);
        match tokio::net::TcpListener::bind(&api_addr).await {
            Ok(listener) => {
                info!(addr = %api_addr, "HTTP surface listening");
                if let Err(e) = axum::serve(listener, app).await {
                    error!(error = %e, "HTTP server failed");
                }
            }
            Err(e) => {
                error!(addr = %api_addr, error = %e, "failed to bind HTTP surface");
            }
        }
    });

    info!("all subsystems running; press Ctrl+C to stop");

    // ── 8. Graceful shutdown ─────────────────────────────────────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received — stopping");

    if let Err(e) = state.runtime_config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save runtime config on shutdown");
    }

    info!("Helix Algorithm Engine shut down complete");
    Ok(())
}
