/// Live session lifecycle: one per process. Wires queue, worker and gate
/// together and decides how the day's data is reconciled at startup.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::task::{JoinError, JoinHandle};
use tracing::{error, info, warn};

use crate::data::LivenessMarker;
use crate::error::{PipelineError, Result};
use crate::pipeline::gate::{BackfillJob, ReconciliationGate};
use crate::pipeline::processor::TickProcessor;
use crate::pipeline::queue::{IngestionQueue, IngestionReceiver};
use crate::pipeline::trigger::AggregationTrigger;
use crate::pipeline::watchdog::LivenessWatchdog;
use crate::pipeline::worker::{run_worker, WorkerSummary};
use crate::time::{is_after_close, is_market_open, second_of_minute, Clock};
use crate::types::Config;

static SESSION_ACTIVE: AtomicBool = AtomicBool::new(false);

/// How the session reconciled the day's data when it started
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartupMode {
    /// Started before the open; nothing to backfill
    PreOpen,
    /// Started during market hours; backfill running, rows buffered until it ends
    MidSession,
    /// Started after the close; no worker was launched
    SessionOver,
}

impl StartupMode {
    pub fn as_str(&self) -> &str {
        match self {
            StartupMode::PreOpen => "PRE_OPEN",
            StartupMode::MidSession => "MID_SESSION",
            StartupMode::SessionOver => "SESSION_OVER",
        }
    }
}

pub struct LiveSession {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    queue: IngestionQueue,
    gate: ReconciliationGate,
    marker: LivenessMarker,
    idle: Option<(TickProcessor, IngestionReceiver, LivenessWatchdog)>,
    worker: Option<JoinHandle<Result<WorkerSummary>>>,
    backfill: Option<JoinHandle<Result<()>>>,
}

enum Finished {
    Backfill(std::result::Result<Result<()>, JoinError>),
    Worker(std::result::Result<Result<WorkerSummary>, JoinError>),
}

fn joined<T>(res: std::result::Result<Result<T>, JoinError>, task: &str) -> Result<T> {
    res.map_err(|e| PipelineError::InternalError(format!("{} task failed: {}", task, e)))?
}

impl LiveSession {
    /// Claim the process-wide session. Fails if another one is alive.
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        trigger: Box<dyn AggregationTrigger>,
    ) -> Result<Self> {
        if SESSION_ACTIVE
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(PipelineError::AlreadyRunning(
                "a live session is already active in this process".to_string(),
            ));
        }

        let gate = ReconciliationGate::new();
        let (queue, receiver) = IngestionQueue::new(config.queue_backlog_warn);
        let processor = TickProcessor::new(
            Arc::clone(&config),
            Arc::clone(&clock),
            gate.clone(),
            trigger,
        );
        let watchdog = LivenessWatchdog::new(
            Duration::from_secs(config.tick_timeout_sec),
            Arc::clone(&clock),
        );

        Ok(LiveSession {
            marker: LivenessMarker::new(config.liveness_marker.clone()),
            config,
            clock,
            queue,
            gate,
            idle: Some((processor, receiver, watchdog)),
            worker: None,
            backfill: None,
        })
    }

    /// Reconcile with the backfill according to the time of day, then launch
    /// the worker. Before the open this waits for 09:15; mid-session it
    /// waits for the first seconds of a minute so the backfill cut-off lines
    /// up with a bucket boundary. The worker's idle timeout only starts
    /// counting once the caller can attach a feed.
    pub async fn start(&mut self, backfill: BackfillJob) -> Result<StartupMode> {
        let now = self.clock.now();
        if is_after_close(now) {
            info!("Market is closed for the day ({}), nothing to do", now);
            return Ok(StartupMode::SessionOver);
        }

        let (processor, receiver, watchdog) = self.idle.take().ok_or_else(|| {
            PipelineError::InternalError("live session already started".to_string())
        })?;

        let mode = if !is_market_open(now) {
            info!("Waiting for market to open");
            while !is_market_open(self.clock.now()) {
                self.marker.touch_quietly().await;
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
            info!("Market open, live rows go straight to the store");
            self.gate.open();
            StartupMode::PreOpen
        } else {
            while second_of_minute(self.clock.now()) > self.config.first_tick_max_second {
                self.marker.touch_quietly().await;
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            info!(
                "Started mid-session at {}, buffering live rows until backfill completes",
                self.clock.now()
            );
            self.backfill = Some(self.gate.spawn_backfill(backfill)?);
            StartupMode::MidSession
        };

        self.worker = Some(tokio::spawn(run_worker(processor, receiver, watchdog)));
        Ok(mode)
    }

    /// Wait for the worker to stop. A failed backfill ends the wait early
    /// with its error.
    pub async fn wait(&mut self) -> Result<WorkerSummary> {
        loop {
            let worker = self.worker.as_mut().ok_or_else(|| {
                PipelineError::InternalError("tick worker not running".to_string())
            })?;

            let finished = match self.backfill.as_mut() {
                Some(backfill) => tokio::select! {
                    res = backfill => Finished::Backfill(res),
                    res = worker => Finished::Worker(res),
                },
                None => Finished::Worker(worker.await),
            };

            match finished {
                Finished::Backfill(res) => {
                    self.backfill = None;
                    if let Err(e) = joined(res, "backfill") {
                        error!("Cannot reconcile today's data: {}", e);
                        return Err(e);
                    }
                }
                Finished::Worker(res) => {
                    self.worker = None;
                    return joined(res, "tick worker");
                }
            }
        }
    }

    /// Send the shutdown sentinel and join the worker. Returns `None` if no
    /// worker was running.
    pub async fn shutdown(&mut self) -> Result<Option<WorkerSummary>> {
        let Some(worker) = self.worker.take() else {
            return Ok(None);
        };

        if let Err(e) = self.queue.shutdown() {
            warn!("{}", e);
        }
        let summary = joined(worker.await, "tick worker")?;
        if let Some(backfill) = self.backfill.take() {
            backfill.abort();
        }
        info!("Live session stopped");
        Ok(Some(summary))
    }

    pub fn queue(&self) -> &IngestionQueue {
        &self.queue
    }

    pub fn gate(&self) -> &ReconciliationGate {
        &self.gate
    }
}

impl Drop for LiveSession {
    fn drop(&mut self) {
        SESSION_ACTIVE.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::trigger::ChannelTrigger;
    use crate::time::ManualClock;
    use crate::types::{Tick, TickMode};
    use chrono::{DateTime, TimeZone, Utc};
    use chrono_tz::Asia::Kolkata;
    use tokio::sync::Mutex;

    // Sessions are process-wide
    static SERIAL: Mutex<()> = Mutex::const_new(());

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 1, 15, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    /// Wall clock that moves with (paused) tokio time
    struct TokioClock {
        base: DateTime<Utc>,
        origin: tokio::time::Instant,
    }

    impl TokioClock {
        fn starting_at(base: DateTime<Utc>) -> Self {
            TokioClock {
                base,
                origin: tokio::time::Instant::now(),
            }
        }
    }

    impl Clock for TokioClock {
        fn now(&self) -> DateTime<Utc> {
            self.base + chrono::Duration::from_std(self.origin.elapsed()).unwrap()
        }
    }

    fn session(dir: &tempfile::TempDir, clock: Arc<dyn Clock>) -> Result<LiveSession> {
        let config = Arc::new(Config::rooted_at(dir.path()));
        let (trigger, _requests) = ChannelTrigger::new(1);
        LiveSession::new(config, clock, Box::new(trigger))
    }

    fn tick(ts: DateTime<Utc>, day_volume: i64) -> Tick {
        Tick::new("2885", ts.timestamp_millis(), 10000, day_volume, TickMode::Quote).unwrap()
    }

    #[tokio::test]
    async fn test_one_session_per_process() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(ist(16, 0, 0)));

        let first = session(&dir, clock.clone()).unwrap();
        let err = session(&dir, clock.clone()).err().unwrap();
        assert_eq!(err.error_code(), "SYS_001");

        drop(first);
        assert!(session(&dir, clock).is_ok());
    }

    #[tokio::test]
    async fn test_after_close_is_session_over() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(ist(15, 45, 0)));
        let mut live = session(&dir, clock).unwrap();

        let mode = live.start(Box::pin(async { Ok(()) })).await.unwrap();
        assert_eq!(mode, StartupMode::SessionOver);
        assert_eq!(live.shutdown().await.unwrap(), None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pre_open_waits_then_opens_gate() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(ist(9, 14, 57)));
        let mut live = session(&dir, clock.clone()).unwrap();

        let opener = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(3)).await;
            clock.set(ist(9, 15, 0));
        });

        let mode = live.start(Box::pin(async { Ok(()) })).await.unwrap();
        assert_eq!(mode, StartupMode::PreOpen);
        assert!(live.gate().is_open());
        assert!(!live.gate().backfill_started());
        assert!(dir.path().join("live_running.marker").exists());

        opener.await.unwrap();
        let summary = live.shutdown().await.unwrap().unwrap();
        assert_eq!(summary.ticks_dequeued, 0);
    }

    #[tokio::test]
    async fn test_mid_session_buffers_until_backfill() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(ist(10, 30, 1)));
        let mut live = session(&dir, clock).unwrap();

        let (release, released) = tokio::sync::oneshot::channel::<()>();
        let backfill: BackfillJob = Box::pin(async move {
            let _ = released.await;
            Ok(())
        });
        let mode = live.start(backfill).await.unwrap();
        assert_eq!(mode, StartupMode::MidSession);
        assert!(!live.gate().is_open());

        let feed = live.queue().connect();
        feed.enqueue(tick(ist(10, 30, 1), 10)).unwrap();
        feed.enqueue(tick(ist(10, 31, 0), 15)).unwrap();

        release.send(()).unwrap();
        for _ in 0..100 {
            if live.gate().is_open() {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert!(live.gate().is_open());

        feed.enqueue(tick(ist(10, 32, 0), 20)).unwrap();
        let summary = live.shutdown().await.unwrap().unwrap();
        assert_eq!(summary.sweeps, 2);

        let rows_file = dir.path().join("historical/2885/2885.live.csv");
        let rows = std::fs::read_to_string(rows_file).unwrap();
        assert_eq!(rows.lines().count(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_mid_session_worker_starts_after_minute_alignment() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(TokioClock::starting_at(ist(10, 30, 10)));
        let mut live = session(&dir, clock.clone()).unwrap();

        let (_release, released) = tokio::sync::oneshot::channel::<()>();
        let backfill: BackfillJob = Box::pin(async move {
            let _ = released.await;
            Ok(())
        });
        let mode = live.start(backfill).await.unwrap();
        assert_eq!(mode, StartupMode::MidSession);
        let started = clock.now();
        assert!(started >= ist(10, 31, 0) && started <= ist(10, 31, 2));

        // The feed attaches only now; the worker must still be waiting for it
        let feed = live.queue().connect();
        feed.enqueue(tick(ist(10, 31, 0), 10)).unwrap();
        let waited = tokio::time::timeout(Duration::from_secs(20), live.wait()).await;
        assert!(waited.is_err());

        let summary = live.shutdown().await.unwrap().unwrap();
        assert_eq!(summary.ticks_dequeued, 1);
        assert_eq!(summary.idle_timeouts, 0);
    }

    #[tokio::test]
    async fn test_failed_backfill_is_fatal() {
        let _serial = SERIAL.lock().await;
        let dir = tempfile::tempdir().unwrap();
        let clock = Arc::new(ManualClock::new(ist(11, 0, 0)));
        let mut live = session(&dir, clock).unwrap();

        let backfill: BackfillJob = Box::pin(async {
            Err(PipelineError::FileError(std::io::Error::new(
                std::io::ErrorKind::Other,
                "historical API unavailable",
            )))
        });
        live.start(backfill).await.unwrap();

        let err = live.wait().await.unwrap_err();
        assert_eq!(err.error_code(), "COLLAB_001");
        assert!(err.is_fatal());
        live.shutdown().await.unwrap();
    }
}
