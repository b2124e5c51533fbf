/// Ingestion queue between the feed callback and the pipeline worker.
///
/// The feed side only stamps and pushes; all I/O happens on the worker.
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::error::{PipelineError, Result};
use crate::types::{Tick, TickEnvelope};

#[derive(Debug)]
pub enum QueueItem {
    Tick(TickEnvelope),
    /// Sentinel: drain what came before it, then stop the worker
    Shutdown,
}

/// Result of one bounded wait on the queue
#[derive(Debug)]
pub enum Dequeued {
    Tick(TickEnvelope),
    Shutdown,
    TimedOut,
    Closed,
}

/// Producer side of the queue
pub struct IngestionQueue {
    tx: mpsc::UnboundedSender<QueueItem>,
    depth: Arc<AtomicUsize>,
    backlog_warn: usize,
}

/// Consumer side, owned by the worker
pub struct IngestionReceiver {
    rx: mpsc::UnboundedReceiver<QueueItem>,
    depth: Arc<AtomicUsize>,
    backlog_warn: usize,
}

impl IngestionQueue {
    pub fn new(backlog_warn: usize) -> (Self, IngestionReceiver) {
        let (tx, rx) = mpsc::unbounded_channel();
        let depth = Arc::new(AtomicUsize::new(0));

        (
            IngestionQueue {
                tx,
                depth: Arc::clone(&depth),
                backlog_warn,
            },
            IngestionReceiver {
                rx,
                depth,
                backlog_warn,
            },
        )
    }

    /// Handle for a new feed connection, with its own id and sequence counter
    pub fn connect(&self) -> FeedHandle {
        let connection_id = Uuid::new_v4();
        debug!("Feed connection {} attached to ingestion queue", connection_id);
        FeedHandle {
            connection_id,
            next_sequence: AtomicU64::new(1),
            tx: self.tx.clone(),
            depth: Arc::clone(&self.depth),
            backlog_warn: self.backlog_warn,
        }
    }

    /// Enqueue the shutdown sentinel behind every tick already queued
    pub fn shutdown(&self) -> Result<()> {
        self.depth.fetch_add(1, Ordering::Relaxed);
        self.tx
            .send(QueueItem::Shutdown)
            .map_err(|_| PipelineError::QueueClosed("worker already gone".to_string()))
    }

    pub fn depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }
}

/// Producer handle given to one feed connection
pub struct FeedHandle {
    connection_id: Uuid,
    next_sequence: AtomicU64,
    tx: mpsc::UnboundedSender<QueueItem>,
    depth: Arc<AtomicUsize>,
    backlog_warn: usize,
}

impl FeedHandle {
    /// Non-blocking push from the feed callback. Returns the sequence number
    /// assigned to the tick.
    pub fn enqueue(&self, tick: Tick) -> Result<u64> {
        let sequence_number = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        let token = tick.token.clone();
        let envelope = TickEnvelope {
            tick,
            connection_id: self.connection_id,
            sequence_number,
        };

        let depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;
        if self.tx.send(QueueItem::Tick(envelope)).is_err() {
            self.depth.fetch_sub(1, Ordering::Relaxed);
            return Err(PipelineError::QueueClosed(format!(
                "dropping tick {} from connection {}",
                sequence_number, self.connection_id
            )));
        }

        if depth > self.backlog_warn {
            warn!("After enqueue ({}), queue depth: {}", token, depth);
        }
        Ok(sequence_number)
    }

    pub fn connection_id(&self) -> Uuid {
        self.connection_id
    }
}

impl IngestionReceiver {
    /// Wait up to `wait` for the next item
    pub async fn dequeue(&mut self, wait: Duration) -> Dequeued {
        let depth = self.depth.load(Ordering::Relaxed);
        if depth > self.backlog_warn {
            warn!("Before dequeue, queue depth: {}", depth);
        }

        match tokio::time::timeout(wait, self.rx.recv()).await {
            Ok(Some(item)) => {
                self.depth.fetch_sub(1, Ordering::Relaxed);
                match item {
                    QueueItem::Tick(envelope) => Dequeued::Tick(envelope),
                    QueueItem::Shutdown => Dequeued::Shutdown,
                }
            }
            Ok(None) => Dequeued::Closed,
            Err(_) => Dequeued::TimedOut,
        }
    }
}
