/// Centralized error types for the live candle pipeline
use thiserror::Error;

#[derive(Error, Debug)]
pub enum PipelineError {
    // Feed Errors
    #[error("Malformed tick: {0}")]
    MalformedTick(String),

    #[error("Feed stalled: {0}")]
    FeedStalled(String),

    #[error("Ingestion queue closed: {0}")]
    QueueClosed(String),

    // Data Errors
    #[error("Minute gap detected: {0}")]
    MinuteGap(String),

    #[error("Ledger state violation: {0}")]
    LedgerState(String),

    #[error("Deserialization failed: {0}")]
    DeserializationError(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),

    // Configuration Errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // File I/O Errors
    #[error("File I/O error: {0}")]
    FileError(#[from] std::io::Error),

    #[error("File write failed: {0}")]
    FileWriteFailed(String),

    // Collaborator Errors
    #[error("Backfill failed: {0}")]
    BackfillFailed(String),

    #[error("Aggregation trigger failed: {0}")]
    TriggerFailed(String),

    // System Errors
    #[error("Session already running: {0}")]
    AlreadyRunning(String),

    #[error("Internal error: {0}")]
    InternalError(String),
}

pub type Result<T> = std::result::Result<T, PipelineError>;

impl PipelineError {
    /// Errors the pipeline logs and keeps running through
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            PipelineError::MalformedTick(_)
                | PipelineError::TriggerFailed(_)
                | PipelineError::DeserializationError(_)
        )
    }

    /// Errors that must terminate the process so the supervisor restarts it
    /// and a fresh backfill heals the day's rows.
    pub fn is_fatal(&self) -> bool {
        !self.is_recoverable()
    }

    /// Get error code for logging/monitoring
    pub fn error_code(&self) -> &str {
        match self {
            PipelineError::MalformedTick(_) => "FEED_001",
            PipelineError::FeedStalled(_) => "FEED_002",
            PipelineError::QueueClosed(_) => "FEED_003",
            PipelineError::MinuteGap(_) => "DATA_001",
            PipelineError::LedgerState(_) => "DATA_002",
            PipelineError::DeserializationError(_) => "DATA_003",
            PipelineError::CsvError(_) => "DATA_004",
            PipelineError::ConfigError(_) => "CFG_001",
            PipelineError::FileError(_) => "FILE_001",
            PipelineError::FileWriteFailed(_) => "FILE_002",
            PipelineError::BackfillFailed(_) => "COLLAB_001",
            PipelineError::TriggerFailed(_) => "COLLAB_002",
            PipelineError::AlreadyRunning(_) => "SYS_001",
            PipelineError::InternalError(_) => "SYS_002",
        }
    }
}
