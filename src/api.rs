// =============================================================================
// HTTP surface — health and info endpoints (Axum 0.7)
// =============================================================================
//
// Two read-only endpoints for operators and orchestration probes.  /health
// reports degraded (503) while the feed is down; /info describes what the
// engine is watching and what it has fired recently.  CORS is permissive —
// these endpoints expose no secrets and take no actions.

use std::collections::BTreeMap;
use std::sync::atomic::Ordering;
use std::sync::Arc;

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::get,
    Json, Router,
};
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};

use crate::app_state::AppState;
use crate::market_data::FeedStatus;
use crate::types::SignalEvent;

/// Build the HTTP router with CORS middleware and shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health))
        .route("/info", get(info))
        .layer(cors)
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    timestamp: String,
    services: HealthServices,
}

#[derive(Serialize)]
struct HealthServices {
    feed: String,
}

async fn health(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let feed = state.feed_status();
    let healthy = feed == FeedStatus::Connected;

    let body = HealthResponse {
        status: if healthy { "ok" } else { "degraded" },
        timestamp: chrono::Utc::now().to_rfc3339(),
        services: HealthServices {
            feed: feed.to_string(),
        },
    };

    let code = if healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };
    (code, Json(body))
}

// =============================================================================
// Info
// =============================================================================

#[derive(Serialize)]
struct InfoResponse {
    symbols: Vec<String>,
    intervals: Vec<String>,
    strategies: Vec<StrategyInfo>,
    candles: BTreeMap<String, usize>,
    counters: Counters,
    uptime_secs: u64,
    recent_signals: Vec<SignalEvent>,
}

#[derive(Serialize)]
struct StrategyInfo {
    id: String,
    name: String,
}

#[derive(Serialize)]
struct Counters {
    events_processed: u64,
    signals_fired: u64,
    triggers_dispatched: u64,
    triggers_dropped: u64,
}

async fn info(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let (symbols, intervals) = {
        let config = state.runtime_config.read();
        (config.symbols.clone(), config.intervals.clone())
    };

    let strategies = state
        .registry
        .iter()
        .map(|(id, spec)| StrategyInfo {
            id: id.clone(),
            name: spec.display_name(),
        })
        .collect();

    let mut candles = BTreeMap::new();
    for key in state.candle_store.keys() {
        candles.insert(key.to_string(), state.candle_store.len(&key));
    }

    let body = InfoResponse {
        symbols,
        intervals,
        strategies,
        candles,
        counters: Counters {
            events_processed: state.events_processed.load(Ordering::Relaxed),
            signals_fired: state.signals_fired.load(Ordering::Relaxed),
            triggers_dispatched: state.triggers_dispatched.load(Ordering::Relaxed),
            triggers_dropped: state.triggers_dropped.load(Ordering::Relaxed),
        },
        uptime_secs: state.uptime_secs(),
        recent_signals: state.recent_signals.read().clone(),
    };

    Json(body)
}
