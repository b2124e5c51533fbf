/// Fire-and-forget hand-off to the downstream aggregation stage
use chrono::{DateTime, Utc};
use tokio::sync::mpsc;

use crate::error::{PipelineError, Result};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationRequest {
    /// Sweep that produced the new rows
    pub sweep: u64,
    pub instruments: Vec<String>,
    pub requested_at: DateTime<Utc>,
}

/// Schedules downstream aggregation without waiting for it
pub trait AggregationTrigger: Send + Sync {
    fn schedule(&self, request: AggregationRequest) -> Result<()>;
}

/// Trigger backed by a bounded channel. A full channel drops the request:
/// the next sweep asks again with newer data.
#[derive(Debug, Clone)]
pub struct ChannelTrigger {
    tx: mpsc::Sender<AggregationRequest>,
}

impl ChannelTrigger {
    pub fn new(capacity: usize) -> (Self, mpsc::Receiver<AggregationRequest>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (ChannelTrigger { tx }, rx)
    }
}

impl AggregationTrigger for ChannelTrigger {
    fn schedule(&self, request: AggregationRequest) -> Result<()> {
        self.tx.try_send(request).map_err(|e| match e {
            mpsc::error::TrySendError::Full(req) => PipelineError::TriggerFailed(format!(
                "aggregation queue full, dropping request for sweep {}",
                req.sweep
            )),
            mpsc::error::TrySendError::Closed(req) => PipelineError::TriggerFailed(format!(
                "aggregation consumer gone, dropping request for sweep {}",
                req.sweep
            )),
        })
    }
}
