pub mod queue;
pub mod admission;
pub mod minute_boundary;
pub mod gate;
pub mod trigger;
pub mod watchdog;
pub mod processor;
pub mod worker;
pub mod session;

pub use queue::{Dequeued, FeedHandle, IngestionQueue, IngestionReceiver, QueueItem};
pub use admission::{Admission, AdmissionFilter};
pub use minute_boundary::{BoundaryDecision, MinuteBoundaryDetector};
pub use gate::{BackfillJob, GateState, ReconciliationGate};
pub use trigger::{AggregationRequest, AggregationTrigger, ChannelTrigger};
pub use watchdog::LivenessWatchdog;
pub use processor::{SweepReport, TickOutcome, TickProcessor};
pub use worker::{run_worker, WorkerSummary};
pub use session::{LiveSession, StartupMode};
