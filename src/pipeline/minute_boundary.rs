/// Global minute watermark: decides when a tick opens a new minute and
/// every instrument's candle must be sealed.
use chrono::{DateTime, Utc};

use crate::error::{PipelineError, Result};
use crate::time::{floor_to_minute, minute_of_day};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BoundaryDecision {
    /// First accepted tick of the process; nothing to seal yet
    FirstTick,
    SameMinute,
    /// Exactly one minute past the watermark: seal everything
    NewMinute,
    /// Older than the watermark; folded in without a seal
    Reordered { behind_by: u32 },
}

impl BoundaryDecision {
    pub fn is_new_minute(&self) -> bool {
        matches!(self, BoundaryDecision::NewMinute)
    }
}

#[derive(Debug, Default)]
pub struct MinuteBoundaryDetector {
    last_tick_minute: Option<u32>,
    last_bucket: Option<DateTime<Utc>>,
}

impl MinuteBoundaryDetector {
    pub fn new() -> Self {
        Self::default()
    }

    /// Classify a tick minute against the watermark without moving it.
    /// A jump of more than one minute is a feed discontinuity and fatal.
    pub fn classify(&self, current_minute: u32) -> Result<BoundaryDecision> {
        let Some(last_minute) = self.last_tick_minute else {
            return Ok(BoundaryDecision::FirstTick);
        };

        if current_minute == last_minute {
            Ok(BoundaryDecision::SameMinute)
        } else if current_minute == last_minute + 1 {
            Ok(BoundaryDecision::NewMinute)
        } else if current_minute < last_minute {
            Ok(BoundaryDecision::Reordered {
                behind_by: last_minute - current_minute,
            })
        } else {
            Err(PipelineError::MinuteGap(format!(
                "tick minute {:02}:{:02} skips past last tick minute {:02}:{:02}",
                current_minute / 60,
                current_minute % 60,
                last_minute / 60,
                last_minute % 60
            )))
        }
    }

    /// Classify an accepted tick and advance the watermark; never moves it back
    pub fn observe(&mut self, ts: DateTime<Utc>) -> Result<BoundaryDecision> {
        let current_minute = minute_of_day(ts);
        let decision = self.classify(current_minute)?;

        let bucket = floor_to_minute(ts);
        self.last_tick_minute = Some(
            self.last_tick_minute
                .map_or(current_minute, |m| m.max(current_minute)),
        );
        self.last_bucket = Some(self.last_bucket.map_or(bucket, |b| b.max(bucket)));

        Ok(decision)
    }

    pub fn last_tick_minute(&self) -> Option<u32> {
        self.last_tick_minute
    }

    /// Bucket of the newest accepted tick
    pub fn watermark_bucket(&self) -> Option<DateTime<Utc>> {
        self.last_bucket
    }
}
