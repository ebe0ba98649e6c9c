// =============================================================================
// Shared types used across the Helix algorithm engine
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::market_data::CandleKey;

/// Trading direction produced by a strategy evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Signal {
    Buy,
    Sell,
    Hold,
}

impl Signal {
    /// Wire representation used in execution requests ("BUY" / "SELL").
    ///
    /// `Hold` never reaches the wire; callers filter it out before dispatch.
    pub fn as_wire(&self) -> &'static str {
        match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::Hold => "HOLD",
        }
    }
}

impl std::fmt::Display for Signal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_wire())
    }
}

/// A strategy fire emitted by the signal detector, en route to the
/// matcher/dispatcher task.
#[derive(Debug, Clone)]
pub struct FiredSignal {
    pub key: CandleKey,
    /// Stable indicator id the strategy instance is registered under.
    pub indicator_id: String,
    /// Human-readable indicator name (e.g. "EMA_CROSS_9_50").
    pub indicator_name: String,
    pub direction: Signal,
    /// Bucket (bar open time, ms) the fire is attributed to.
    pub bucket: i64,
}

/// One execution request published to the external work queue, one per
/// matched subscriber.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionRequest {
    pub strategy_id: String,
    pub user_id: String,
    pub asset_symbol: String,
    pub timeframe: String,
    pub indicator_name: String,
    /// "BUY" or "SELL".
    pub direction: String,
}

/// A recorded signal fire for the dashboard/audit log.
#[derive(Debug, Clone, Serialize)]
pub struct SignalEvent {
    pub symbol: String,
    pub interval: String,
    pub indicator_id: String,
    pub indicator_name: String,
    pub direction: String,
    /// Bar open time (ms) the signal fired on.
    pub bucket: i64,
    /// ISO 8601 timestamp of when the fire was observed.
    pub at: String,
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_wire_labels() {
        assert_eq!(Signal::Buy.as_wire(), "BUY");
        assert_eq!(Signal::Sell.as_wire(), "SELL");
        assert_eq!(Signal::Hold.to_string(), "HOLD");
    }

    #[test]
    fn execution_request_wire_shape() {
        let req = ExecutionRequest {
            strategy_id: "65f0c0ffee".into(),
            user_id: "u-1".into(),
            asset_symbol: "BTC".into(),
            timeframe: "1h".into(),
            indicator_name: "EMA_CROSS_9_50".into(),
            direction: "BUY".into(),
        };
        let json = serde_json::to_value(&req).unwrap();
        assert_eq!(json["strategyId"], "65f0c0ffee");
        assert_eq!(json["userId"], "u-1");
        assert_eq!(json["assetSymbol"], "BTC");
        assert_eq!(json["timeframe"], "1h");
        assert_eq!(json["indicatorName"], "EMA_CROSS_9_50");
        assert_eq!(json["direction"], "BUY");
    }
}
