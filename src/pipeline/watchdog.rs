/// Feed liveness watchdog
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error};

use crate::error::{PipelineError, Result};
use crate::time::{is_market_open, Clock};

pub struct LivenessWatchdog {
    timeout: Duration,
    clock: Arc<dyn Clock>,
}

impl LivenessWatchdog {
    pub fn new(timeout: Duration, clock: Arc<dyn Clock>) -> Self {
        LivenessWatchdog { timeout, clock }
    }

    /// Longest the worker waits for a tick
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Called when a dequeue wait expired. A silent feed during market hours
    /// is a stuck socket: fail so the supervisor restarts the process.
    pub fn on_timeout(&self) -> Result<()> {
        let now = self.clock.now();
        if is_market_open(now) {
            error!("Did not see any tick for {:?}!", self.timeout);
            error!("Feed may be stuck, terminating for restart");
            return Err(PipelineError::FeedStalled(format!(
                "no tick for {:?} at {}",
                self.timeout, now
            )));
        }
        debug!("No tick for {:?} outside market hours", self.timeout);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::ManualClock;
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 1, 15, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    #[test]
    fn test_stall_during_market_is_fatal() {
        let clock = Arc::new(ManualClock::new(ist(11, 0, 31)));
        let watchdog = LivenessWatchdog::new(Duration::from_secs(30), clock);
        let err = watchdog.on_timeout().unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(err.error_code(), "FEED_002");
    }

    #[test]
    fn test_stall_outside_market_is_benign() {
        let clock = Arc::new(ManualClock::new(ist(8, 45, 31)));
        let watchdog = LivenessWatchdog::new(Duration::from_secs(30), clock.clone());
        assert!(watchdog.on_timeout().is_ok());

        clock.set(ist(16, 0, 0));
        assert!(watchdog.on_timeout().is_ok());
    }
}
