/// 1-minute OHLCV accumulation for a single instrument
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use crate::time::{floor_to_minute, second_of_minute};
use crate::types::{Candle, Tick};

/// Liquid instruments tick within the first couple of seconds of every minute;
/// a later first tick is worth a warning.
const LATE_FIRST_TICK_SECS: u32 = 2;

/// Candle in progress (not yet sealed)
#[derive(Debug, Clone)]
pub struct CandleBuilder {
    token: String,
    bucket_start: DateTime<Utc>,
    open: i64,
    high: i64,
    low: i64,
    close: i64,
    day_volume_at_bucket_start: i64,
    day_volume: i64,
    tick_count: usize,
}

impl CandleBuilder {
    /// Open a bucket with its first tick.
    ///
    /// `bucket_start` must be minute aligned. `carried_day_volume` is the
    /// ending cumulative volume of the instrument's previous sealed candle;
    /// for the first bucket of the session the tick's own cumulative volume
    /// is the baseline.
    pub fn start(
        tick: &Tick,
        bucket_start: DateTime<Utc>,
        carried_day_volume: Option<i64>,
    ) -> Self {
        debug_assert_eq!(floor_to_minute(bucket_start), bucket_start);

        if second_of_minute(tick.timestamp) > LATE_FIRST_TICK_SECS {
            warn!(
                "[{}] First tick of the minute not received till {} seconds: {}",
                tick.token, LATE_FIRST_TICK_SECS, tick.timestamp
            );
        }

        let day_volume_at_bucket_start = carried_day_volume.unwrap_or(tick.day_volume);

        CandleBuilder {
            token: tick.token.clone(),
            bucket_start,
            open: tick.ltp,
            high: tick.ltp,
            low: tick.ltp,
            close: tick.ltp,
            day_volume_at_bucket_start,
            day_volume: tick.day_volume,
            tick_count: 1,
        }
    }

    /// Fold a later tick of the same bucket
    pub fn update(&mut self, tick: &Tick) {
        self.high = self.high.max(tick.ltp);
        self.low = self.low.min(tick.ltp);
        self.close = tick.ltp;
        self.day_volume = tick.day_volume;
        self.tick_count += 1;
    }

    pub fn bucket_start(&self) -> DateTime<Utc> {
        self.bucket_start
    }

    pub fn tick_count(&self) -> usize {
        self.tick_count
    }

    pub fn day_volume(&self) -> i64 {
        self.day_volume
    }

    /// Finalize into an immutable candle.
    ///
    /// A cumulative volume below the bucket baseline means the feed reset its
    /// counter; the candle volume is clamped to zero instead of failing.
    pub fn seal(self) -> Candle {
        let mut volume = self.day_volume - self.day_volume_at_bucket_start;
        if volume < 0 {
            warn!(
                "[{}] Day volume regressed in bucket {} ({} < {}), clamping candle volume to 0",
                self.token, self.bucket_start, self.day_volume, self.day_volume_at_bucket_start
            );
            volume = 0;
        }

        debug!(
            "[{}] Sealed {} - O:{} H:{} L:{} C:{} V:{} ({} ticks)",
            self.token,
            self.bucket_start,
            self.open,
            self.high,
            self.low,
            self.close,
            volume,
            self.tick_count
        );

        Candle {
            token: self.token,
            bucket_start: self.bucket_start,
            open: self.open,
            high: self.high,
            low: self.low,
            close: self.close,
            volume,
            partial: false,
            day_volume_at_bucket_start: self.day_volume_at_bucket_start,
            day_volume: self.day_volume,
        }
    }
}
