// =============================================================================
// CandleAggregator — folds raw ticks and feed candles into fixed-width bars
// =============================================================================
//
// One aggregator instance exists per (symbol, interval) key and owns that
// key's single in-progress bar.  The feed may deliver either shape:
//
//   * a raw tick { price, timestamp } — merged into the open bar, and
//   * a pre-bucketed candle { t, o, h, l, c, v } — replacing the open bar,
//     since the source already aggregated the bucket.
//
// A bar closes when the first update for a newer bucket arrives; the closed
// bar is emitted before the new one starts.  Updates for buckets older than
// the open bar are dropped — closed history is never rewritten.

use tracing::warn;

use super::candle_store::Candle;

/// Outcome of feeding one update into the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum CandleEvent {
    /// The in-progress bar changed (same bucket, or a new bar just opened).
    BarUpdated(Candle),
    /// A bar crossed its bucket boundary and is now final.
    BarClosed(Candle),
}

/// Per-key tick/candle folder. Holds at most one open bar.
#[derive(Debug)]
pub struct CandleAggregator {
    interval_ms: i64,
    current: Option<Candle>,
}

impl CandleAggregator {
    pub fn new(interval_ms: i64) -> Self {
        Self {
            interval_ms,
            current: None,
        }
    }

    /// Bucket start for a raw timestamp: `floor(ts / width) * width`.
    pub fn bucket_of(&self, timestamp: i64) -> i64 {
        timestamp.div_euclid(self.interval_ms) * self.interval_ms
    }

    /// The open bar, if one exists.
    pub fn current(&self) -> Option<&Candle> {
        self.current.as_ref()
    }

    /// Fold a raw price tick into the open bar.
    ///
    /// Emits `BarClosed` for the previous bucket (when the tick crosses a
    /// boundary) followed by `BarUpdated` for the bucket the tick lands in.
    /// Ticks older than the open bucket are dropped.
    pub fn ingest_tick(&mut self, price: f64, timestamp: i64) -> Vec<CandleEvent> {
        let bucket = self.bucket_of(timestamp);
        let mut events = Vec::with_capacity(2);

        match self.current.as_mut() {
            Some(bar) if bar.open_time == bucket => {
                bar.high = bar.high.max(price);
                bar.low = bar.low.min(price);
                bar.close = price;
                events.push(CandleEvent::BarUpdated(bar.clone()));
            }
            Some(bar) if bar.open_time > bucket => {
                warn!(
                    incoming = bucket,
                    open = bar.open_time,
                    "stale tick dropped"
                );
            }
            _ => {
                if let Some(closed) = self.close_current() {
                    events.push(CandleEvent::BarClosed(closed));
                }
                let bar = Candle {
                    open_time: bucket,
                    open: price,
                    high: price,
                    low: price,
                    close: price,
                    // Raw ticks carry no size; tick-built bars report zero volume.
                    volume: 0.0,
                    is_closed: false,
                };
                events.push(CandleEvent::BarUpdated(bar.clone()));
                self.current = Some(bar);
            }
        }

        events
    }

    /// Fold a pre-bucketed candle message into the open bar.
    ///
    /// Same-bucket messages replace the open bar wholesale — the feed supplies
    /// the aggregate, so its high/low/volume are already cumulative.  Newer
    /// buckets close the open bar first.  Older buckets are dropped.
    pub fn ingest_candle(&mut self, candle: Candle) -> Vec<CandleEvent> {
        let bucket = self.bucket_of(candle.open_time);
        let mut events = Vec::with_capacity(2);

        if let Some(bar) = self.current.as_ref() {
            if bar.open_time > bucket {
                warn!(
                    incoming = bucket,
                    open = bar.open_time,
                    "stale candle dropped"
                );
                return events;
            }
            if bar.open_time < bucket {
                if let Some(closed) = self.close_current() {
                    events.push(CandleEvent::BarClosed(closed));
                }
            }
        }

        let bar = Candle {
            open_time: bucket,
            is_closed: false,
            ..candle
        };
        events.push(CandleEvent::BarUpdated(bar.clone()));
        self.current = Some(bar);
        events
    }

    fn close_current(&mut self) -> Option<Candle> {
        self.current.take().map(|mut bar| {
            bar.is_closed = true;
            bar
        })
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    const MIN: i64 = 60_000;

    fn feed_candle(open_time: i64, close: f64, volume: f64) -> Candle {
        Candle {
            open_time,
            open: close - 1.0,
            high: close + 2.0,
            low: close - 2.0,
            close,
            volume,
            is_closed: false,
        }
    }

    #[test]
    fn bucket_assignment_floors() {
        let agg = CandleAggregator::new(MIN);
        assert_eq!(agg.bucket_of(0), 0);
        assert_eq!(agg.bucket_of(59_999), 0);
        assert_eq!(agg.bucket_of(60_000), MIN);
        assert_eq!(agg.bucket_of(61_234), MIN);
    }

    #[test]
    fn ticks_merge_into_open_bar() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_tick(100.0, 1_000);
        agg.ingest_tick(104.0, 2_000);
        let events = agg.ingest_tick(97.0, 3_000);

        assert_eq!(events.len(), 1);
        let bar = match &events[0] {
            CandleEvent::BarUpdated(c) => c,
            other => panic!("expected BarUpdated, got {other:?}"),
        };
        assert_eq!(bar.open_time, 0);
        assert!((bar.open - 100.0).abs() < f64::EPSILON);
        assert!((bar.high - 104.0).abs() < f64::EPSILON);
        assert!((bar.low - 97.0).abs() < f64::EPSILON);
        assert!((bar.close - 97.0).abs() < f64::EPSILON);
        assert!(!bar.is_closed);
    }

    #[test]
    fn boundary_tick_closes_previous_bar() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_tick(100.0, 1_000);
        let events = agg.ingest_tick(105.0, MIN + 500);

        assert_eq!(events.len(), 2);
        match &events[0] {
            CandleEvent::BarClosed(c) => {
                assert_eq!(c.open_time, 0);
                assert!(c.is_closed);
                assert!((c.close - 100.0).abs() < f64::EPSILON);
            }
            other => panic!("expected BarClosed first, got {other:?}"),
        }
        match &events[1] {
            CandleEvent::BarUpdated(c) => {
                assert_eq!(c.open_time, MIN);
                assert!(!c.is_closed);
                assert!((c.open - 105.0).abs() < f64::EPSILON);
            }
            other => panic!("expected BarUpdated second, got {other:?}"),
        }
    }

    #[test]
    fn stale_tick_is_dropped() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_tick(100.0, MIN + 100);
        let events = agg.ingest_tick(90.0, 100);

        assert!(events.is_empty());
        let bar = agg.current().unwrap();
        assert_eq!(bar.open_time, MIN);
        assert!((bar.close - 100.0).abs() < f64::EPSILON);
    }

    #[test]
    fn same_bucket_candle_replaces_aggregate() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_candle(feed_candle(0, 100.0, 5.0));
        let events = agg.ingest_candle(feed_candle(0, 102.0, 8.0));

        assert_eq!(events.len(), 1);
        let bar = agg.current().unwrap();
        assert!((bar.close - 102.0).abs() < f64::EPSILON);
        assert!((bar.volume - 8.0).abs() < f64::EPSILON);
    }

    #[test]
    fn newer_candle_closes_previous_bar() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_candle(feed_candle(0, 100.0, 5.0));
        let events = agg.ingest_candle(feed_candle(MIN, 101.0, 3.0));

        assert_eq!(events.len(), 2);
        assert!(matches!(&events[0], CandleEvent::BarClosed(c) if c.open_time == 0 && c.is_closed));
        assert!(matches!(&events[1], CandleEvent::BarUpdated(c) if c.open_time == MIN));
    }

    #[test]
    fn stale_candle_is_dropped() {
        let mut agg = CandleAggregator::new(MIN);

        agg.ingest_candle(feed_candle(2 * MIN, 100.0, 5.0));
        let events = agg.ingest_candle(feed_candle(0, 99.0, 1.0));

        assert!(events.is_empty());
        assert_eq!(agg.current().unwrap().open_time, 2 * MIN);
    }

    #[test]
    fn candle_open_time_is_rebucketed() {
        let mut agg = CandleAggregator::new(MIN);
        // A mid-bucket timestamp from a sloppy source still lands on the floor.
        let events = agg.ingest_candle(feed_candle(MIN + 17, 100.0, 1.0));
        assert!(matches!(&events[0], CandleEvent::BarUpdated(c) if c.open_time == MIN));
    }
}
