/// Candle Aggregator: per-token in-memory fixed-interval OHLC aggregation,
/// aligned to market open so period boundaries never drift.
use std::collections::HashMap;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use tokio::sync::Mutex;

use crate::types::{Candle, CandleBuffer};

pub struct CandleAggregator {
    interval: ChronoDuration,
    market_open: DateTime<Utc>,
    buffers: Mutex<HashMap<i64, CandleBuffer>>,
}

impl CandleAggregator {
    pub fn new(market_open: DateTime<Utc>, interval_minutes: i64) -> Self {
        CandleAggregator {
            interval: ChronoDuration::minutes(interval_minutes),
            market_open,
            buffers: Mutex::new(HashMap::new()),
        }
    }

    /// The period boundary `market_open + k*interval` that contains `ts`.
    fn period_start_for(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let elapsed = ts - self.market_open;
        let interval_secs = self.interval.num_seconds().max(1);
        let elapsed_secs = elapsed.num_seconds().max(0);
        let k = elapsed_secs / interval_secs;
        self.market_open + ChronoDuration::seconds(k * interval_secs)
    }

    /// Appends a price to the current period's buffer, creating it aligned
    /// to `market_open` if absent (I5).
    pub async fn add_tick(&self, token: i64, price: f64, ts: DateTime<Utc>) {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.entry(token).or_insert_with(|| {
            let period_start = self.period_start_for(ts);
            CandleBuffer {
                current_period_start: period_start,
                current_period_end: period_start + self.interval,
                ticks: Vec::new(),
            }
        });
        buffer.ticks.push((ts, price));
    }

    /// Called at ≥1 Hz. If `now` has crossed the current period's end,
    /// closes and returns that candle, advancing the buffer to the next
    /// period. A period that closes with zero ticks still advances but
    /// emits nothing.
    pub async fn tick_and_maybe_emit(&self, token: i64, now: DateTime<Utc>) -> Option<Candle> {
        let mut buffers = self.buffers.lock().await;
        let buffer = buffers.get_mut(&token)?;

        if now < buffer.current_period_end {
            return None;
        }

        let candle = if buffer.ticks.is_empty() {
            None
        } else {
            let open = buffer.ticks.first().unwrap().1;
            let close = buffer.ticks.last().unwrap().1;
            let high = buffer.ticks.iter().map(|(_, p)| *p).fold(f64::MIN, f64::max);
            let low = buffer.ticks.iter().map(|(_, p)| *p).fold(f64::MAX, f64::min);
            Some(Candle {
                period_start: buffer.current_period_start,
                period_end: buffer.current_period_end,
                open,
                high,
                low,
                close,
                tick_count: buffer.ticks.len(),
            })
        };

        buffer.current_period_start = buffer.current_period_end;
        buffer.current_period_end = buffer.current_period_start + self.interval;
        buffer.ticks.clear();

        candle
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn market_open() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 15, 3, 45, 0).unwrap() // 09:15 IST
    }

    #[tokio::test]
    async fn emits_closed_candle_with_correct_ohlc() {
        let agg = CandleAggregator::new(market_open(), 15);
        let start = market_open();

        agg.add_tick(100, 95.0, start + ChronoDuration::minutes(1)).await;
        agg.add_tick(100, 99.0, start + ChronoDuration::minutes(5)).await;
        agg.add_tick(100, 93.0, start + ChronoDuration::minutes(10)).await;
        agg.add_tick(100, 97.0, start + ChronoDuration::minutes(14)).await;

        let not_yet = agg.tick_and_maybe_emit(100, start + ChronoDuration::minutes(14)).await;
        assert!(not_yet.is_none());

        let candle = agg
            .tick_and_maybe_emit(100, start + ChronoDuration::minutes(15))
            .await
            .expect("period should have closed");

        assert_eq!(candle.open, 95.0);
        assert_eq!(candle.close, 97.0);
        assert_eq!(candle.high, 99.0);
        assert_eq!(candle.low, 93.0);
        assert_eq!(candle.tick_count, 4);
        assert_eq!(candle.period_start, market_open());
    }

    #[tokio::test]
    async fn empty_period_advances_without_emitting() {
        let agg = CandleAggregator::new(market_open(), 15);
        let start = market_open();

        agg.add_tick(100, 95.0, start + ChronoDuration::minutes(1)).await;
        agg.tick_and_maybe_emit(100, start + ChronoDuration::minutes(15)).await;

        let empty = agg.tick_and_maybe_emit(100, start + ChronoDuration::minutes(30)).await;
        assert!(empty.is_none());

        agg.add_tick(100, 101.0, start + ChronoDuration::minutes(31)).await;
        let next = agg
            .tick_and_maybe_emit(100, start + ChronoDuration::minutes(45))
            .await
            .expect("third period should close with one tick");
        assert_eq!(next.period_start, market_open() + ChronoDuration::minutes(30));
        assert_eq!(next.tick_count, 1);
    }
}
