/// Tick admission: drop session-boundary noise before any processing
use tracing::warn;

use crate::time::{is_within_tick_window, second_of_minute};
use crate::types::Tick;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Accept,
    /// Exchange time outside 09:15:00 - 15:30:59 IST
    OutsideSession,
    /// Arrived before any tick was accepted, too far into its minute; most
    /// likely a leftover of the previous minute flushed right after connect.
    PreviousMinuteLeftover,
}

#[derive(Debug)]
pub struct AdmissionFilter {
    first_tick_max_second: u32,
    accepted_any: bool,
    dropped_outside_session: u64,
    dropped_leftovers: u64,
}

impl AdmissionFilter {
    pub fn new(first_tick_max_second: u32) -> Self {
        AdmissionFilter {
            first_tick_max_second,
            accepted_any: false,
            dropped_outside_session: 0,
            dropped_leftovers: 0,
        }
    }

    pub fn admit(&mut self, tick: &Tick) -> Admission {
        if !is_within_tick_window(tick.timestamp) {
            self.dropped_outside_session += 1;
            warn!(
                "Tick (@ {}) for {} generated outside market hours, ignoring",
                tick.timestamp, tick.token
            );
            return Admission::OutsideSession;
        }

        if !self.accepted_any && second_of_minute(tick.timestamp) > self.first_tick_max_second {
            self.dropped_leftovers += 1;
            warn!(
                "Previous minute tick (@ {}) for {}, ignoring",
                tick.timestamp, tick.token
            );
            return Admission::PreviousMinuteLeftover;
        }

        self.accepted_any = true;
        Admission::Accept
    }

    pub fn dropped_outside_session(&self) -> u64 {
        self.dropped_outside_session
    }

    pub fn dropped_leftovers(&self) -> u64 {
        self.dropped_leftovers
    }
}
