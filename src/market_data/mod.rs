pub mod aggregator;
pub mod candle_store;
pub mod feed;

// Re-export the core candle types for convenient access
// (e.g. `use crate::market_data::Candle`).
pub use aggregator::{CandleAggregator, CandleEvent};
pub use candle_store::{interval_to_ms, Candle, CandleKey, CandleStore};
pub use feed::{FeedStatus, FeedUpdate, ReconnectPolicy};
