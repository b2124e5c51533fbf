/// Per-instrument persistence: append-only live candle rows (CSV, no header),
/// the latest-tick snapshot file and the process liveness marker.
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use chrono_tz::Asia::Kolkata;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};

use crate::error::{PipelineError, Result};
use crate::types::{Candle, Config, LtpSnapshot};

/// Row timestamp layout, e.g. `2023-11-17 09:15:00+05:30`
pub const ROW_TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%:z";

/// Render paise as a two-decimal price
pub fn format_price(paise: i64) -> String {
    let sign = if paise < 0 { "-" } else { "" };
    let abs = paise.unsigned_abs();
    format!("{}{}.{:02}", sign, abs / 100, abs % 100)
}

pub fn format_row_timestamp(ts: DateTime<Utc>) -> String {
    ts.with_timezone(&Kolkata).format(ROW_TIMESTAMP_FORMAT).to_string()
}

/// Parse the first column of a stored row. Rows written by the backfill
/// collaborator may use RFC 3339 instead of the space separated layout.
pub fn parse_row_timestamp(field: &str) -> Option<DateTime<Utc>> {
    let field = field.trim();
    DateTime::parse_from_str(field, ROW_TIMESTAMP_FORMAT)
        .or_else(|_| DateTime::parse_from_rfc3339(field))
        .ok()
        .map(|ts| ts.with_timezone(&Utc))
}

/// Store rows and snapshot for one instrument
#[derive(Debug, Clone)]
pub struct InstrumentStore {
    token: String,
    row_file: PathBuf,
    ltp_file: PathBuf,
    ltp_tmp_file: PathBuf,
}

impl InstrumentStore {
    /// Resolve paths for `token` and write the zeroed snapshot so order
    /// placement never finds the file missing.
    pub async fn create(config: &Config, token: &str) -> Result<Self> {
        let symbol = config.symbol_for(token);
        let row_dir = config.historical_dir.join(symbol);
        tokio::fs::create_dir_all(&row_dir).await?;
        tokio::fs::create_dir_all(&config.ltp_dir).await?;

        let store = InstrumentStore {
            token: token.to_string(),
            row_file: row_dir.join(format!("{}.live.csv", symbol)),
            ltp_file: config.ltp_dir.join(symbol),
            ltp_tmp_file: config.ltp_dir.join(format!(".{}.tmp", symbol)),
        };

        store
            .write_snapshot(&LtpSnapshot::initial(token))
            .await
            .map_err(|e| {
                PipelineError::FileWriteFailed(format!(
                    "initial LTP file {}: {}",
                    store.ltp_file.display(),
                    e
                ))
            })?;
        debug!("[{}] Created initial LTP file {}", token, store.ltp_file.display());

        Ok(store)
    }

    pub fn row_file(&self) -> &Path {
        &self.row_file
    }

    pub fn ltp_file(&self) -> &Path {
        &self.ltp_file
    }

    /// Append finalized candles to the live store
    pub async fn append_rows(&self, candles: &[Candle]) -> Result<()> {
        if candles.is_empty() {
            return Ok(());
        }

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        for candle in candles {
            writer.write_record([
                format_row_timestamp(candle.bucket_start),
                format_price(candle.open),
                format_price(candle.high),
                format_price(candle.low),
                format_price(candle.close),
                candle.volume.to_string(),
            ])?;
        }
        let bytes = writer.into_inner().map_err(|e| {
            PipelineError::FileWriteFailed(format!("{}: {}", self.row_file.display(), e))
        })?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.row_file)
            .await?;
        file.write_all(&bytes).await?;
        file.sync_all().await?;

        Ok(())
    }

    /// Bucket timestamps already present in the live store
    pub async fn persisted_timestamps(&self) -> Result<HashSet<DateTime<Utc>>> {
        let mut timestamps = HashSet::new();

        let bytes = match tokio::fs::read(&self.row_file).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                warn!("[{}] {} not found", self.token, self.row_file.display());
                return Ok(timestamps);
            }
            Err(e) => return Err(e.into()),
        };

        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(bytes.as_slice());
        for record in reader.records() {
            let record = record?;
            let Some(field) = record.get(0) else {
                continue;
            };
            match parse_row_timestamp(field) {
                Some(ts) => {
                    timestamps.insert(ts);
                }
                None => warn!(
                    "[{}] Unparseable timestamp {:?} in {}",
                    self.token,
                    field,
                    self.row_file.display()
                ),
            }
        }

        Ok(timestamps)
    }

    /// Replace the latest-tick snapshot. Readers see either the old file or
    /// the new one, never a partial write.
    pub async fn write_snapshot(&self, snapshot: &LtpSnapshot) -> Result<()> {
        let json = serde_json::to_vec_pretty(snapshot)?;
        tokio::fs::write(&self.ltp_tmp_file, json).await?;
        tokio::fs::rename(&self.ltp_tmp_file, &self.ltp_file).await?;
        Ok(())
    }
}

/// Marker file whose mtime tells the health checker the pipeline is alive
#[derive(Debug, Clone)]
pub struct LivenessMarker {
    path: PathBuf,
}

impl LivenessMarker {
    pub fn new(path: PathBuf) -> Self {
        LivenessMarker { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn touch(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent).await?;
            }
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await?;
        let file = file.into_std().await;
        file.set_modified(SystemTime::now())?;
        Ok(())
    }

    /// Touch, logging instead of failing; used from idle loops
    pub async fn touch_quietly(&self) {
        if let Err(e) = self.touch().await {
            warn!("Failed to touch liveness marker {}: {}", self.path.display(), e);
        }
    }
}
