// =============================================================================
// Engine — per-key pipelines behind a consistent-hash worker pool
// =============================================================================
//
// Every (symbol, interval) key is pinned to exactly one worker, so all state
// transitions for a key (aggregate → store → indicators → detect) run
// sequentially with no interleaving from another update of the same key.
// Different keys land on different workers and proceed independently; the
// partitioning replaces locks on the hot path.
//
// All in-memory processing is synchronous.  The only async edges are the
// inbound work channel and the outbound fired-signal channel to the
// dispatcher task — a slow or failing dispatch can never stall ingestion.

use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::app_state::AppState;
use crate::indicators::IndicatorBank;
use crate::market_data::{
    interval_to_ms, Candle, CandleAggregator, CandleEvent, CandleKey, FeedUpdate,
};
use crate::signal_detector::SignalDetector;
use crate::strategy::EvalContext;
use crate::types::FiredSignal;

// ---------------------------------------------------------------------------
// Work items
// ---------------------------------------------------------------------------

/// One unit of work routed to a key's worker.
#[derive(Debug, Clone)]
pub enum WorkItem {
    /// Pre-bucketed candle update for one key.
    Candle { key: CandleKey, candle: Candle },
    /// Raw price tick, already expanded to one key.
    Tick {
        key: CandleKey,
        price: f64,
        timestamp: i64,
    },
}

impl WorkItem {
    fn key(&self) -> &CandleKey {
        match self {
            Self::Candle { key, .. } => key,
            Self::Tick { key, .. } => key,
        }
    }
}

// ---------------------------------------------------------------------------
// Router
// ---------------------------------------------------------------------------

/// Routes feed updates to the worker owning each key.
///
/// A raw tick fans out to every configured interval of its symbol — each
/// interval key is still routed (and therefore serialised) independently.
#[derive(Clone)]
pub struct EngineRouter {
    senders: Vec<mpsc::UnboundedSender<WorkItem>>,
    intervals: Vec<String>,
}

impl EngineRouter {
    pub fn new(senders: Vec<mpsc::UnboundedSender<WorkItem>>, intervals: Vec<String>) -> Self {
        Self { senders, intervals }
    }

    pub fn dispatch(&self, update: FeedUpdate) {
        match update {
            FeedUpdate::Candle { key, candle } => {
                self.send(WorkItem::Candle { key, candle });
            }
            FeedUpdate::Tick {
                symbol,
                price,
                timestamp,
            } => {
                for interval in &self.intervals {
                    self.send(WorkItem::Tick {
                        key: CandleKey::new(symbol.clone(), interval.clone()),
                        price,
                        timestamp,
                    });
                }
            }
        }
    }

    fn send(&self, item: WorkItem) {
        if self.senders.is_empty() {
            return;
        }
        let idx = (key_hash(item.key()) % self.senders.len() as u64) as usize;
        if self.senders[idx].send(item).is_err() {
            warn!(worker = idx, "engine worker channel closed; update dropped");
        }
    }
}

fn key_hash(key: &CandleKey) -> u64 {
    let mut hasher = DefaultHasher::new();
    key.hash(&mut hasher);
    hasher.finish()
}

// ---------------------------------------------------------------------------
// Per-key pipeline
// ---------------------------------------------------------------------------

/// All mutable state for one (symbol, interval) series.
struct KeyPipeline {
    aggregator: CandleAggregator,
    bank: IndicatorBank,
    detector: SignalDetector,
}

impl KeyPipeline {
    fn new(interval_ms: i64, state: &AppState) -> Self {
        Self {
            aggregator: CandleAggregator::new(interval_ms),
            bank: IndicatorBank::new(
                state.registry.ema_periods(),
                state.registry.rsi_periods(),
            ),
            detector: SignalDetector::new(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker
// ---------------------------------------------------------------------------

/// One engine worker: owns the pipelines for the keys hashed to it and
/// processes their updates strictly in arrival order.
pub struct EngineWorker {
    state: Arc<AppState>,
    signal_tx: mpsc::UnboundedSender<FiredSignal>,
    pipelines: HashMap<CandleKey, KeyPipeline>,
}

impl EngineWorker {
    pub fn new(state: Arc<AppState>, signal_tx: mpsc::UnboundedSender<FiredSignal>) -> Self {
        Self {
            state,
            signal_tx,
            pipelines: HashMap::new(),
        }
    }

    /// Process one work item synchronously.
    pub fn handle(&mut self, item: WorkItem) {
        let key = item.key().clone();

        if !self.pipelines.contains_key(&key) {
            let Some(width) = interval_to_ms(&key.interval) else {
                warn!(key = %key, "unknown interval; update dropped");
                return;
            };
            let mut pipeline = KeyPipeline::new(width, &self.state);
            // Warm the trackers from any seeded history before live data.
            let capacity = self.state.candle_store.capacity();
            pipeline
                .bank
                .catch_up(&self.state.candle_store.recent_closed(&key, capacity));
            self.pipelines.insert(key.clone(), pipeline);
        }
        let Some(pipeline) = self.pipelines.get_mut(&key) else {
            return;
        };

        let events = match item {
            WorkItem::Candle { candle, .. } => pipeline.aggregator.ingest_candle(candle),
            WorkItem::Tick {
                price, timestamp, ..
            } => pipeline.aggregator.ingest_tick(price, timestamp),
        };
        if events.is_empty() {
            return;
        }

        for event in &events {
            let candle = match event {
                CandleEvent::BarClosed(c) | CandleEvent::BarUpdated(c) => c.clone(),
            };
            self.state.candle_store.append_or_replace(&key, candle);
        }
        self.state.events_processed.fetch_add(1, Ordering::Relaxed);

        // Advance the incremental trackers over any newly closed bars, then
        // evaluate.  Evaluation runs on every update; the detector's per-bar
        // dedup keeps repeated evaluation of one bucket idempotent.
        let capacity = self.state.candle_store.capacity();
        let closed = self.state.candle_store.recent_closed(&key, capacity);
        pipeline.bank.catch_up(&closed);

        let Some(bucket) = pipeline.bank.last_applied_bucket() else {
            return;
        };
        let closes: Vec<f64> = closed.iter().map(|c| c.close).collect();
        let cx = EvalContext {
            closes: &closes,
            bank: &pipeline.bank,
        };

        let fired = pipeline
            .detector
            .evaluate(&self.state.registry, &cx, &key, bucket);
        for signal in fired {
            self.state.record_signal(&signal);
            if self.signal_tx.send(signal).is_err() {
                debug!(key = %key, "signal dispatcher gone; fire dropped");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Spawning
// ---------------------------------------------------------------------------

/// Spawn the worker pool and return the router feeding it.
pub fn spawn_engine(
    state: &Arc<AppState>,
    signal_tx: mpsc::UnboundedSender<FiredSignal>,
) -> EngineRouter {
    let (worker_count, intervals) = {
        let config = state.runtime_config.read();
        (config.engine_workers.max(1), config.intervals.clone())
    };

    let mut senders = Vec::with_capacity(worker_count);
    for worker_id in 0..worker_count {
        let (tx, mut rx) = mpsc::unbounded_channel::<WorkItem>();
        senders.push(tx);

        let mut worker = EngineWorker::new(state.clone(), signal_tx.clone());
        tokio::spawn(async move {
            debug!(worker = worker_id, "engine worker started");
            while let Some(item) = rx.recv().await {
                worker.handle(item);
            }
            debug!(worker = worker_id, "engine worker stopped");
        });
    }

    info!(workers = worker_count, "engine worker pool running");
    EngineRouter::new(senders, intervals)
}
