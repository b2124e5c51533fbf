/// Reconciliation gate between the live writer and the backfill collaborator.
///
/// While buffering, sealed rows stay in memory so the live writer never
/// appends to a store the backfill is still writing. The backfill must finish
/// its writes before it opens the gate.
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures_util::future::BoxFuture;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};

/// Backfill work supplied by the caller; resolves once the day's rows
/// preceding stream start-up are on disk.
pub type BackfillJob = BoxFuture<'static, Result<()>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateState {
    Buffering,
    Open,
}

impl GateState {
    pub fn as_str(&self) -> &str {
        match self {
            GateState::Buffering => "BUFFERING",
            GateState::Open => "OPEN",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ReconciliationGate {
    open: Arc<AtomicBool>,
    backfill_started: Arc<AtomicBool>,
}

impl ReconciliationGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> GateState {
        if self.is_open() {
            GateState::Open
        } else {
            GateState::Buffering
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::Acquire)
    }

    /// Open the gate. Returns false if it was already open.
    pub fn open(&self) -> bool {
        let was_open = self.open.swap(true, Ordering::AcqRel);
        if was_open {
            warn!("Reconciliation gate already open");
        } else {
            info!("Reconciliation gate open, live rows go straight to the store");
        }
        !was_open
    }

    /// Run the backfill on its own task; the gate opens when it succeeds.
    /// Only one backfill may ever be started per gate.
    pub fn spawn_backfill(&self, job: BackfillJob) -> Result<JoinHandle<Result<()>>> {
        if self.backfill_started.swap(true, Ordering::AcqRel) {
            return Err(PipelineError::BackfillFailed(
                "backfill already started for this session".to_string(),
            ));
        }

        let gate = self.clone();
        info!("Starting backfill of today's candles");
        Ok(tokio::spawn(async move {
            let started = std::time::Instant::now();
            match job.await {
                Ok(()) => {
                    info!("Backfill finished in {:?}", started.elapsed());
                    gate.open();
                    Ok(())
                }
                Err(e) => {
                    error!("Backfill failed: {} ({})", e, e.error_code());
                    Err(PipelineError::BackfillFailed(e.to_string()))
                }
            }
        }))
    }

    pub fn backfill_started(&self) -> bool {
        self.backfill_started.load(Ordering::Acquire)
    }
}
