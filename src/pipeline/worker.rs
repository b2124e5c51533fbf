/// Single consumer of the ingestion queue; owns all pipeline state
use tracing::{error, info};

use crate::error::Result;
use crate::pipeline::processor::{TickOutcome, TickProcessor};
use crate::pipeline::queue::{Dequeued, IngestionReceiver};
use crate::pipeline::watchdog::LivenessWatchdog;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerSummary {
    pub ticks_dequeued: u64,
    pub ticks_dropped: u64,
    pub sweeps: u64,
    pub instruments: usize,
    pub idle_timeouts: u64,
}

/// Drain the queue until the shutdown sentinel arrives or every producer is
/// gone. Any error returned here is fatal for the process.
pub async fn run_worker(
    mut processor: TickProcessor,
    mut receiver: IngestionReceiver,
    watchdog: LivenessWatchdog,
) -> Result<WorkerSummary> {
    let mut summary = WorkerSummary::default();
    info!("Tick worker started (idle timeout {:?})", watchdog.timeout());

    loop {
        match receiver.dequeue(watchdog.timeout()).await {
            Dequeued::Tick(envelope) => {
                summary.ticks_dequeued += 1;
                match processor.process(envelope).await {
                    Ok(TickOutcome::Dropped(_)) => summary.ticks_dropped += 1,
                    Ok(TickOutcome::Accepted { .. }) => {}
                    Err(e) => {
                        error!("Tick worker failed: {} ({})", e, e.error_code());
                        return Err(e);
                    }
                }
            }
            Dequeued::TimedOut => {
                summary.idle_timeouts += 1;
                watchdog.on_timeout()?;
                processor.touch_liveness().await;
            }
            Dequeued::Shutdown => {
                info!("Got shutdown sentinel, stopping tick worker");
                break;
            }
            Dequeued::Closed => {
                info!("Ingestion queue closed, stopping tick worker");
                break;
            }
        }
    }

    summary.sweeps = processor.sweeps();
    summary.instruments = processor.instrument_count();
    info!(
        "Tick worker done: dequeued={} dropped={} sweeps={} instruments={}",
        summary.ticks_dequeued, summary.ticks_dropped, summary.sweeps, summary.instruments
    );
    Ok(summary)
}
