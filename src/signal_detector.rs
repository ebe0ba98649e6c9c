// =============================================================================
// SignalDetector — per-key strategy evaluation with per-bar deduplication
// =============================================================================
//
// One detector exists per (symbol, interval) key and holds one SignalRecord
// per registered strategy instance.  A strategy may fire at most once per bar
// close: the record remembers the bucket of the last fire, and a repeat
// evaluation of the same bar is suppressed.  This is the engine's only
// dedup mechanism — the crossover rules themselves re-trigger on every
// evaluation while the condition holds.

use std::collections::HashMap;

use tracing::{debug, info};

use crate::market_data::CandleKey;
use crate::strategy::{EvalContext, StrategyRegistry};
use crate::types::{FiredSignal, Signal};

/// Dedup state for one (strategy-instance, key) pair.
#[derive(Debug, Clone, Default)]
pub struct SignalRecord {
    pub last_trigger_bucket: Option<i64>,
}

/// Stateful evaluator for one candle series.
#[derive(Debug, Default)]
pub struct SignalDetector {
    records: HashMap<String, SignalRecord>,
}

impl SignalDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Evaluate every registered strategy against the current context and
    /// return the fires that survive deduplication.
    ///
    /// `bucket` is the open time of the most recent closed bar; calling this
    /// any number of times for the same bucket emits each fire at most once.
    pub fn evaluate(
        &mut self,
        registry: &StrategyRegistry,
        cx: &EvalContext<'_>,
        key: &CandleKey,
        bucket: i64,
    ) -> Vec<FiredSignal> {
        let mut fired = Vec::new();

        for (id, spec) in registry.iter() {
            let signal = spec.evaluate(cx);
            if signal == Signal::Hold {
                continue;
            }

            let record = self.records.entry(id.clone()).or_default();
            if record.last_trigger_bucket == Some(bucket) {
                debug!(key = %key, strategy = %id, bucket, "duplicate fire suppressed");
                continue;
            }
            record.last_trigger_bucket = Some(bucket);

            info!(
                key = %key,
                strategy = %id,
                direction = %signal,
                bucket,
                "signal fired"
            );
            fired.push(FiredSignal {
                key: key.clone(),
                indicator_id: id.clone(),
                indicator_name: spec.display_name(),
                direction: signal,
                bucket,
            });
        }

        fired
    }
}
