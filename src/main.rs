/// Main entry point for the live candle service
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use live_candles::{
    collaborators::{command_backfill, spawn_aggregation_runner},
    config::load_config,
    pipeline::{ChannelTrigger, FeedHandle, LiveSession, StartupMode, WorkerSummary},
    time::{ist_date, is_after_close, is_within_tick_window, Clock, MarketCalendar, SystemClock},
    Config, PipelineError, RawTick,
};

/// Why the main loop stopped
enum Stop {
    Worker(live_candles::Result<WorkerSummary>),
    FeedClosed,
    Interrupted,
    SessionEnded,
}

/// Application state
pub struct LiveApp {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    session: LiveSession,
    aggregation: JoinHandle<()>,
}

impl LiveApp {
    pub fn new(config: Arc<Config>, clock: Arc<dyn Clock>) -> live_candles::Result<Self> {
        let (trigger, requests) = ChannelTrigger::new(config.aggregation_queue);
        let aggregation = spawn_aggregation_runner(config.aggregation_command.clone(), requests);
        let session = LiveSession::new(Arc::clone(&config), Arc::clone(&clock), Box::new(trigger))?;

        Ok(LiveApp {
            config,
            clock,
            session,
            aggregation,
        })
    }

    /// Start the live session and run until the feed ends, the session is
    /// over, Ctrl+C, or a fatal error.
    pub async fn run(mut self) -> anyhow::Result<()> {
        let backfill = command_backfill(
            self.config.backfill_command.clone(),
            Duration::from_secs(self.config.backfill_timeout_sec),
        );
        let mode = self.session.start(backfill).await?;
        info!("Live session started ({})", mode.as_str());
        if mode == StartupMode::SessionOver {
            return Ok(());
        }

        let mut feed = spawn_stdin_feed(self.session.queue().connect());

        let stop = tokio::select! {
            res = self.session.wait() => Stop::Worker(res),
            _ = &mut feed => Stop::FeedClosed,
            _ = tokio::signal::ctrl_c() => Stop::Interrupted,
            _ = wait_for_session_end(self.clock.as_ref()) => Stop::SessionEnded,
        };
        feed.abort();

        let result = match stop {
            Stop::Worker(Ok(summary)) => {
                warn!("Tick worker stopped on its own: {:?}", summary);
                Ok(())
            }
            Stop::Worker(Err(e)) => {
                error!("Fatal error: {} ({})", e, e.error_code());
                Err(e)
            }
            Stop::FeedClosed => {
                info!("Tick feed closed");
                Ok(())
            }
            Stop::Interrupted => {
                info!("Ctrl+C received - initiating graceful shutdown");
                Ok(())
            }
            Stop::SessionEnded => {
                info!("Market closed, ending live session");
                Ok(())
            }
        };

        self.shutdown_sequence().await?;
        result.context("live session failed")
    }

    async fn shutdown_sequence(self) -> live_candles::Result<()> {
        info!("Starting shutdown sequence...");
        let LiveApp {
            mut session,
            aggregation,
            ..
        } = self;

        if let Some(summary) = session.shutdown().await? {
            info!(
                "Processed {} ticks ({} dropped), {} sweeps over {} instruments",
                summary.ticks_dequeued, summary.ticks_dropped, summary.sweeps, summary.instruments
            );
        }
        // The trigger went away with the worker; the runner ends once
        // in-flight aggregations finish.
        drop(session);
        if let Err(e) = aggregation.await {
            warn!("Aggregation runner failed: {}", e);
        }

        info!("Shutdown sequence completed");
        Ok(())
    }
}

/// Read one JSON tick per line from stdin into the ingestion queue
fn spawn_stdin_feed(feed: FeedHandle) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Reading ticks from stdin (connection {})", feed.connection_id());
        let mut lines = BufReader::new(tokio::io::stdin()).lines();
        let mut malformed = 0u64;

        loop {
            match lines.next_line().await {
                Ok(Some(line)) if line.trim().is_empty() => continue,
                Ok(Some(line)) => match RawTick::parse(&line) {
                    Ok(tick) => {
                        if let Err(e) = feed.enqueue(tick) {
                            error!("{}", e);
                            break;
                        }
                    }
                    Err(e) => {
                        malformed += 1;
                        warn!("Dropping tick: {} ({})", e, e.error_code());
                    }
                },
                Ok(None) => break,
                Err(e) => {
                    error!("Failed to read tick feed: {}", e);
                    break;
                }
            }
        }

        if malformed > 0 {
            warn!("{} malformed ticks dropped", malformed);
        }
    })
}

/// Resolves once the tick window of the day has passed
async fn wait_for_session_end(clock: &dyn Clock) {
    loop {
        let now = clock.now();
        if is_after_close(now) && !is_within_tick_window(now) {
            return;
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
}

fn init_logging(config: &Config) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    if config.log_json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }
}

async fn run_live() -> anyhow::Result<()> {
    let config_path = std::env::var("CONFIG_PATH")
        .unwrap_or_else(|_| "config.toml".to_string());

    let config = Arc::new(
        load_config(&config_path).with_context(|| format!("loading {}", config_path))?,
    );
    init_logging(&config);
    info!("Configuration loaded from {}", config_path);

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let today = ist_date(clock.now());
    let calendar = MarketCalendar::new(config.holidays.iter().copied());
    info!("{} exchange holidays configured", calendar.holiday_count());
    if !calendar.is_trading_day(today) {
        info!("{} is not a trading day, nothing to do", today);
        return Ok(());
    }

    let app = LiveApp::new(config, clock).map_err(|e: PipelineError| {
        error!("{} ({})", e, e.error_code());
        e
    })?;
    app.run().await
}

fn main() -> anyhow::Result<()> {
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let result = runtime.block_on(run_live());
    // A stdin read in flight cannot be cancelled; do not wait on it
    runtime.shutdown_timeout(Duration::from_secs(1));
    result
}
