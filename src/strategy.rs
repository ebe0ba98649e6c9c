// =============================================================================
// Strategy registry — crossover / threshold strategy variants keyed by id
// =============================================================================
//
// Each registered strategy instance is a concrete tagged variant evaluated
// against the previous and current bar's indicator values.  The registry key
// is the stable indicator id the external directory stores inside
// subscription documents — matching never goes through display names.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::indicators::sma::sma;
use crate::indicators::IndicatorBank;
use crate::types::Signal;

// ---------------------------------------------------------------------------
// Evaluation context
// ---------------------------------------------------------------------------

/// Read-only view a strategy evaluates against: the closed-bar close window
/// (oldest-first) and the incremental indicator bank for the same key.
pub struct EvalContext<'a> {
    pub closes: &'a [f64],
    pub bank: &'a IndicatorBank,
}

// ---------------------------------------------------------------------------
// RSI threshold transitions
// ---------------------------------------------------------------------------

/// Which pair of RSI transitions a threshold strategy trades on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RsiMode {
    /// Trade the band entry: oversold => BUY, overbought => SELL.
    #[default]
    Reversal,
    /// Trade the band exit: leaving oversold => BUY, leaving overbought => SELL.
    Confirmation,
}

/// One RSI threshold edge between two consecutive bars.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RsiTransition {
    EnterOverbought,
    ExitOverbought,
    EnterOversold,
    ExitOversold,
}

/// Detect which threshold edge, if any, the RSI crossed between `prev` and
/// `curr`.
pub fn rsi_transition(
    prev: f64,
    curr: f64,
    overbought: f64,
    oversold: f64,
) -> Option<RsiTransition> {
    if prev <= overbought && curr > overbought {
        Some(RsiTransition::EnterOverbought)
    } else if prev > overbought && curr <= overbought {
        Some(RsiTransition::ExitOverbought)
    } else if prev >= oversold && curr < oversold {
        Some(RsiTransition::EnterOversold)
    } else if prev < oversold && curr >= oversold {
        Some(RsiTransition::ExitOversold)
    } else {
        None
    }
}

// ---------------------------------------------------------------------------
// Strategy variants
// ---------------------------------------------------------------------------

fn default_overbought() -> f64 {
    70.0
}

fn default_oversold() -> f64 {
    30.0
}

/// A concrete strategy instance. Serialised into the runtime config with an
/// explicit `kind` tag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StrategySpec {
    EmaCross {
        fast_period: usize,
        slow_period: usize,
    },
    SmaCross {
        fast_period: usize,
        slow_period: usize,
    },
    RsiThreshold {
        period: usize,
        #[serde(default = "default_overbought")]
        overbought: f64,
        #[serde(default = "default_oversold")]
        oversold: f64,
        #[serde(default)]
        mode: RsiMode,
    },
}

impl StrategySpec {
    /// Human-readable instance name carried on execution requests,
    /// e.g. "EMA_CROSS_9_50".
    pub fn display_name(&self) -> String {
        match self {
            Self::EmaCross {
                fast_period,
                slow_period,
            } => format!("EMA_CROSS_{fast_period}_{slow_period}"),
            Self::SmaCross {
                fast_period,
                slow_period,
            } => format!("SMA_CROSS_{fast_period}_{slow_period}"),
            Self::RsiThreshold { period, .. } => format!("RSI_{period}"),
        }
    }

    /// Evaluate the strategy over the previous and current bar.
    ///
    /// Any missing value — a tracker still warming up, a window shorter than
    /// the slow period plus one — yields `Hold`.
    pub fn evaluate(&self, cx: &EvalContext<'_>) -> Signal {
        match self {
            Self::EmaCross {
                fast_period,
                slow_period,
            } => {
                let (fast_prev, fast_curr) = cx.bank.ema_pair(*fast_period);
                let (slow_prev, slow_curr) = cx.bank.ema_pair(*slow_period);
                match (fast_prev, fast_curr, slow_prev, slow_curr) {
                    (Some(fp), Some(fc), Some(sp), Some(sc)) => cross_signal(fp, fc, sp, sc),
                    _ => Signal::Hold,
                }
            }
            Self::SmaCross {
                fast_period,
                slow_period,
            } => {
                if cx.closes.len() < slow_period + 1 {
                    return Signal::Hold;
                }
                let prev_window = &cx.closes[..cx.closes.len() - 1];
                match (
                    sma(prev_window, *fast_period),
                    sma(cx.closes, *fast_period),
                    sma(prev_window, *slow_period),
                    sma(cx.closes, *slow_period),
                ) {
                    (Some(fp), Some(fc), Some(sp), Some(sc)) => cross_signal(fp, fc, sp, sc),
                    _ => Signal::Hold,
                }
            }
            Self::RsiThreshold {
                period,
                overbought,
                oversold,
                mode,
            } => {
                let (prev, curr) = cx.bank.rsi_pair(*period);
                let (Some(prev), Some(curr)) = (prev, curr) else {
                    return Signal::Hold;
                };
                match (rsi_transition(prev, curr, *overbought, *oversold), mode) {
                    (Some(RsiTransition::EnterOversold), RsiMode::Reversal) => Signal::Buy,
                    (Some(RsiTransition::EnterOverbought), RsiMode::Reversal) => Signal::Sell,
                    (Some(RsiTransition::ExitOversold), RsiMode::Confirmation) => Signal::Buy,
                    (Some(RsiTransition::ExitOverbought), RsiMode::Confirmation) => Signal::Sell,
                    _ => Signal::Hold,
                }
            }
        }
    }
}

/// Two-line crossover rule over consecutive bars.
///
/// BUY when the fast line was at or below the slow line and is now above;
/// SELL for the mirrored case.
fn cross_signal(fast_prev: f64, fast_curr: f64, slow_prev: f64, slow_curr: f64) -> Signal {
    if fast_prev <= slow_prev && fast_curr > slow_curr {
        Signal::Buy
    } else if fast_prev >= slow_prev && fast_curr < slow_curr {
        Signal::Sell
    } else {
        Signal::Hold
    }
}

// ---------------------------------------------------------------------------
// Registry
// ---------------------------------------------------------------------------

/// One configured strategy instance: a stable id plus its variant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyEntry {
    pub id: String,
    #[serde(flatten)]
    pub spec: StrategySpec,
}

/// Explicit table of strategy instances keyed by stable indicator id.
#[derive(Debug, Clone, Default)]
pub struct StrategyRegistry {
    table: BTreeMap<String, StrategySpec>,
}

impl StrategyRegistry {
    pub fn from_entries(entries: &[StrategyEntry]) -> Self {
        let mut table = BTreeMap::new();
        for entry in entries {
            if table
                .insert(entry.id.clone(), entry.spec.clone())
                .is_some()
            {
                warn!(id = %entry.id, "duplicate strategy id in config; last entry wins");
            }
        }
        Self { table }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &StrategySpec)> {
        self.table.iter()
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// EMA periods any registered strategy needs incrementally tracked.
    pub fn ema_periods(&self) -> BTreeSet<usize> {
        let mut periods = BTreeSet::new();
        for spec in self.table.values() {
            if let StrategySpec::EmaCross {
                fast_period,
                slow_period,
            } = spec
            {
                periods.insert(*fast_period);
                periods.insert(*slow_period);
            }
        }
        periods
    }

    /// RSI periods any registered strategy needs incrementally tracked.
    pub fn rsi_periods(&self) -> BTreeSet<usize> {
        self.table
            .values()
            .filter_map(|spec| match spec {
                StrategySpec::RsiThreshold { period, .. } => Some(*period),
                _ => None,
            })
            .collect()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::market_data::Candle;

    fn closed(open_time: i64, close: f64) -> Candle {
        Candle {
            open_time,
            open: close,
            high: close,
            low: close,
            close,
            volume: 1.0,
            is_closed: true,
        }
    }

    fn bank_for(closes: &[f64], registry: &StrategyRegistry) -> IndicatorBank {
        let mut bank = IndicatorBank::new(registry.ema_periods(), registry.rsi_periods());
        let bars: Vec<Candle> = closes
            .iter()
            .enumerate()
            .map(|(i, &c)| closed(i as i64 * 60_000, c))
            .collect();
        bank.catch_up(&bars);
        bank
    }

    fn registry_of(entries: Vec<StrategyEntry>) -> StrategyRegistry {
        StrategyRegistry::from_entries(&entries)
    }

    fn entry(id: &str, spec: StrategySpec) -> StrategyEntry {
        StrategyEntry {
            id: id.into(),
            spec,
        }
    }

    #[test]
    fn cross_rule_edges() {
        assert_eq!(cross_signal(1.0, 3.0, 2.0, 2.0), Signal::Buy);
        assert_eq!(cross_signal(2.0, 3.0, 2.0, 2.5), Signal::Buy); // equality arms
        assert_eq!(cross_signal(3.0, 1.0, 2.0, 2.0), Signal::Sell);
        assert_eq!(cross_signal(3.0, 4.0, 2.0, 2.0), Signal::Hold); // already above
        assert_eq!(cross_signal(1.0, 1.5, 2.0, 2.0), Signal::Hold); // still below
    }

    #[test]
    fn ema_cross_fires_buy_on_spike() {
        let spec = StrategySpec::EmaCross {
            fast_period: 3,
            slow_period: 5,
        };
        let registry = registry_of(vec![entry("x", spec.clone())]);

        // Declining series keeps the fast EMA below the slow one, then a
        // spike pulls it across.
        let mut closes: Vec<f64> = (0..10).map(|i| 100.0 - i as f64).collect();
        closes.push(200.0);

        let bank = bank_for(&closes, &registry);
        let cx = EvalContext {
            closes: &closes,
            bank: &bank,
        };
        assert_eq!(spec.evaluate(&cx), Signal::Buy);
    }

    #[test]
    fn ema_cross_holds_during_warmup() {
        let spec = StrategySpec::EmaCross {
            fast_period: 3,
            slow_period: 5,
        };
        let registry = registry_of(vec![entry("x", spec.clone())]);

        let closes: Vec<f64> = (0..5).map(|i| 100.0 + i as f64).collect();
        let bank = bank_for(&closes, &registry);
        let cx = EvalContext {
            closes: &closes,
            bank: &bank,
        };
        // Slow tracker has no previous value yet at exactly `slow_period` bars.
        assert_eq!(spec.evaluate(&cx), Signal::Hold);
    }

    #[test]
    fn sma_cross_fires_on_crossover() {
        let spec = StrategySpec::SmaCross {
            fast_period: 2,
            slow_period: 4,
        };
        let registry = registry_of(vec![entry("x", spec.clone())]);

        let closes = vec![10.0, 9.0, 8.0, 7.0, 6.0, 20.0];
        let bank = bank_for(&closes, &registry);
        let cx = EvalContext {
            closes: &closes,
            bank: &bank,
        };
        // prev: fast (7+6)/2 = 6.5 <= slow (9+8+7+6)/4 = 7.5
        // curr: fast (6+20)/2 = 13 > slow (8+7+6+20)/4 = 10.25
        assert_eq!(spec.evaluate(&cx), Signal::Buy);
    }

    #[test]
    fn sma_cross_requires_slow_plus_one_bars() {
        let spec = StrategySpec::SmaCross {
            fast_period: 2,
            slow_period: 4,
        };
        let registry = registry_of(vec![entry("x", spec.clone())]);
        let closes = vec![10.0, 9.0, 8.0, 7.0];
        let bank = bank_for(&closes, &registry);
        let cx = EvalContext {
            closes: &closes,
            bank: &bank,
        };
        assert_eq!(spec.evaluate(&cx), Signal::Hold);
    }

    #[test]
    fn rsi_transitions_all_four_edges() {
        use RsiTransition::*;
        assert_eq!(rsi_transition(65.0, 75.0, 70.0, 30.0), Some(EnterOverbought));
        assert_eq!(rsi_transition(70.0, 70.1, 70.0, 30.0), Some(EnterOverbought));
        assert_eq!(rsi_transition(75.0, 65.0, 70.0, 30.0), Some(ExitOverbought));
        assert_eq!(rsi_transition(35.0, 25.0, 70.0, 30.0), Some(EnterOversold));
        assert_eq!(rsi_transition(30.0, 29.9, 70.0, 30.0), Some(EnterOversold));
        assert_eq!(rsi_transition(25.0, 35.0, 70.0, 30.0), Some(ExitOversold));
        assert_eq!(rsi_transition(50.0, 55.0, 70.0, 30.0), None);
    }

    #[test]
    fn rsi_mode_maps_direction() {
        let reversal = StrategySpec::RsiThreshold {
            period: 3,
            overbought: 70.0,
            oversold: 30.0,
            mode: RsiMode::Reversal,
        };
        let registry = registry_of(vec![entry("x", reversal.clone())]);

        // Rising then falling hard: the last pair drops RSI from ~33 into
        // oversold territory.
        let closes = vec![10.0, 11.0, 12.0, 13.0, 9.0, 5.0];
        let bank = bank_for(&closes, &registry);
        let cx = EvalContext {
            closes: &closes,
            bank: &bank,
        };
        let signal = reversal.evaluate(&cx);
        assert_eq!(signal, Signal::Buy);

        let confirmation = StrategySpec::RsiThreshold {
            period: 3,
            overbought: 70.0,
            oversold: 30.0,
            mode: RsiMode::Confirmation,
        };
        // Same data: the entry edge is a Hold in confirmation mode.
        assert_eq!(confirmation.evaluate(&cx), Signal::Hold);
    }

    #[test]
    fn display_names() {
        assert_eq!(
            StrategySpec::EmaCross {
                fast_period: 9,
                slow_period: 50
            }
            .display_name(),
            "EMA_CROSS_9_50"
        );
        assert_eq!(
            StrategySpec::RsiThreshold {
                period: 14,
                overbought: 70.0,
                oversold: 30.0,
                mode: RsiMode::Reversal
            }
            .display_name(),
            "RSI_14"
        );
    }

    #[test]
    fn entry_parses_tagged_config() {
        let json = r#"{ "id": "690a5940d863d469e89f962f", "kind": "ema_cross",
                        "fast_period": 9, "slow_period": 50 }"#;
        let entry: StrategyEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.id, "690a5940d863d469e89f962f");
        assert_eq!(
            entry.spec,
            StrategySpec::EmaCross {
                fast_period: 9,
                slow_period: 50
            }
        );

        let json = r#"{ "id": "a", "kind": "rsi_threshold", "period": 14 }"#;
        let entry: StrategyEntry = serde_json::from_str(json).unwrap();
        assert_eq!(
            entry.spec,
            StrategySpec::RsiThreshold {
                period: 14,
                overbought: 70.0,
                oversold: 30.0,
                mode: RsiMode::Reversal
            }
        );
    }

    #[test]
    fn registry_collects_tracked_periods() {
        let registry = registry_of(vec![
            entry(
                "a",
                StrategySpec::EmaCross {
                    fast_period: 9,
                    slow_period: 50,
                },
            ),
            entry(
                "b",
                StrategySpec::RsiThreshold {
                    period: 14,
                    overbought: 70.0,
                    oversold: 30.0,
                    mode: RsiMode::Reversal,
                },
            ),
            entry(
                "c",
                StrategySpec::SmaCross {
                    fast_period: 5,
                    slow_period: 20,
                },
            ),
        ]);

        assert_eq!(registry.len(), 3);
        assert_eq!(
            registry.ema_periods().into_iter().collect::<Vec<_>>(),
            vec![9, 50]
        );
        assert_eq!(
            registry.rsi_periods().into_iter().collect::<Vec<_>>(),
            vec![14]
        );
    }
}
