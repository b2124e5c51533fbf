/// Per-instrument candle lifecycle, pending rows and reconciliation flush
use std::collections::HashSet;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::data::candle_builder::CandleBuilder;
use crate::data::persister::InstrumentStore;
use crate::error::{PipelineError, Result};
use crate::types::{Candle, Config, LtpSnapshot, TickEnvelope};

/// Lifecycle of the instrument's ongoing candle
#[derive(Debug, Clone)]
pub enum LedgerState {
    /// No tick in the current bucket yet. Carries the ending cumulative day
    /// volume of the last sealed candle, if any.
    Empty { carried_day_volume: Option<i64> },
    Accumulating(CandleBuilder),
    /// Finalized but not yet handed to the store or the pending list
    Sealed(Candle),
}

impl LedgerState {
    pub fn as_str(&self) -> &str {
        match self {
            LedgerState::Empty { .. } => "EMPTY",
            LedgerState::Accumulating(_) => "ACCUMULATING",
            LedgerState::Sealed(_) => "SEALED",
        }
    }
}

/// What one `seal_and_flush` pass did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlushReport {
    pub sealed: Option<DateTime<Utc>>,
    pub rows_written: usize,
    pub duplicates_skipped: usize,
    pub buffered: bool,
}

impl FlushReport {
    pub fn wrote(&self) -> bool {
        self.rows_written > 0
    }
}

pub struct InstrumentLedger {
    token: String,
    state: LedgerState,
    pending_rows: Vec<Candle>,
    store: InstrumentStore,
    ticks_received: u64,
    candles_sealed: u64,
    joined_at_sweep: u64,
}

impl InstrumentLedger {
    /// Create the ledger for a newly seen instrument. `joined_at_sweep` is the
    /// number of sweeps completed before its first tick.
    pub async fn open(config: &Config, token: &str, joined_at_sweep: u64) -> Result<Self> {
        let store = InstrumentStore::create(config, token).await?;
        info!(
            "[{}] Tracking instrument, rows -> {}",
            token,
            store.row_file().display()
        );

        Ok(InstrumentLedger {
            token: token.to_string(),
            state: LedgerState::Empty {
                carried_day_volume: None,
            },
            pending_rows: Vec::new(),
            store,
            ticks_received: 0,
            candles_sealed: 0,
            joined_at_sweep,
        })
    }

    /// Fold a tick into the ongoing candle and refresh the snapshot file.
    ///
    /// `bucket_start` is the minute the pipeline assigns the tick to; it only
    /// matters when the tick opens a new candle.
    pub async fn on_tick(
        &mut self,
        envelope: &TickEnvelope,
        bucket_start: DateTime<Utc>,
    ) -> Result<()> {
        let tick = &envelope.tick;
        if tick.token != self.token {
            return Err(PipelineError::LedgerState(format!(
                "tick for {} routed to ledger {}",
                tick.token, self.token
            )));
        }

        match &mut self.state {
            LedgerState::Empty { carried_day_volume } => {
                let builder = CandleBuilder::start(tick, bucket_start, *carried_day_volume);
                self.state = LedgerState::Accumulating(builder);
            }
            LedgerState::Accumulating(builder) => builder.update(tick),
            LedgerState::Sealed(candle) => {
                return Err(PipelineError::LedgerState(format!(
                    "[{}] tick arrived while candle {} is sealed but not persisted",
                    self.token, candle.bucket_start
                )));
            }
        }
        self.ticks_received += 1;

        self.store
            .write_snapshot(&LtpSnapshot::from_envelope(envelope))
            .await
            .map_err(|e| {
                PipelineError::FileWriteFailed(format!(
                    "LTP file {}: {}",
                    self.store.ltp_file().display(),
                    e
                ))
            })?;

        Ok(())
    }

    /// Seal the ongoing candle and persist or buffer it.
    ///
    /// With the gate open, pending rows are flushed first (skipping buckets the
    /// backfill already wrote) and the fresh row is appended. With the gate
    /// closed the fresh row joins the pending list.
    pub async fn seal_and_flush(&mut self, gate_open: bool) -> Result<FlushReport> {
        let mut report = FlushReport::default();

        if let LedgerState::Sealed(candle) = &self.state {
            return Err(PipelineError::LedgerState(format!(
                "[{}] candle {} was sealed but never handed off",
                self.token, candle.bucket_start
            )));
        }

        let Some(builder) = self.take_builder() else {
            // Nothing ticked this minute, but rows buffered earlier must not
            // wait for this instrument's next tick.
            if gate_open && !self.pending_rows.is_empty() {
                self.flush_pending(&mut report).await?;
            }
            return Ok(report);
        };

        let candle = builder.seal();
        let carried_day_volume = candle.day_volume;
        report.sealed = Some(candle.bucket_start);
        self.state = LedgerState::Sealed(candle.clone());

        if gate_open {
            if !self.pending_rows.is_empty() {
                self.flush_pending(&mut report).await?;
            }
            self.store.append_rows(std::slice::from_ref(&candle)).await?;
            report.rows_written += 1;
            debug!(
                "[{}] Dumped new row {} to {}",
                self.token,
                candle.bucket_start,
                self.store.row_file().display()
            );
        } else {
            self.pending_rows.push(candle);
            report.buffered = true;
            warn!(
                "[{}] Backfill not complete, holding row in pending (total={})",
                self.token,
                self.pending_rows.len()
            );
        }

        self.candles_sealed += 1;
        self.state = LedgerState::Empty {
            carried_day_volume: Some(carried_day_volume),
        };

        Ok(report)
    }

    fn take_builder(&mut self) -> Option<CandleBuilder> {
        let state = std::mem::replace(
            &mut self.state,
            LedgerState::Empty {
                carried_day_volume: None,
            },
        );
        match state {
            LedgerState::Accumulating(builder) => Some(builder),
            other => {
                self.state = other;
                None
            }
        }
    }

    /// Write pending rows whose bucket is not in the store yet, then drop the
    /// pending list. Runs once per gate opening.
    async fn flush_pending(&mut self, report: &mut FlushReport) -> Result<()> {
        let mut existing = self.store.persisted_timestamps().await?;
        warn!(
            "[{}] Dumping {} pending rows to {}",
            self.token,
            self.pending_rows.len(),
            self.store.row_file().display()
        );

        let mut fresh = Vec::with_capacity(self.pending_rows.len());
        for candle in &self.pending_rows {
            if existing.insert(candle.bucket_start) {
                fresh.push(candle.clone());
            } else {
                info!(
                    "[{}] Skipping already present live row {}",
                    self.token, candle.bucket_start
                );
                report.duplicates_skipped += 1;
            }
        }

        self.store.append_rows(&fresh).await?;
        report.rows_written += fresh.len();
        self.pending_rows.clear();

        Ok(())
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    pub fn state(&self) -> &LedgerState {
        &self.state
    }

    pub fn pending_rows(&self) -> &[Candle] {
        &self.pending_rows
    }

    pub fn ticks_received(&self) -> u64 {
        self.ticks_received
    }

    pub fn candles_sealed(&self) -> u64 {
        self.candles_sealed
    }

    pub fn joined_at_sweep(&self) -> u64 {
        self.joined_at_sweep
    }

    pub fn store(&self) -> &InstrumentStore {
        &self.store
    }

    /// Buckets currently in the pending list
    pub fn pending_buckets(&self) -> HashSet<DateTime<Utc>> {
        self.pending_rows.iter().map(|c| c.bucket_start).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::time::floor_to_minute;
    use crate::types::{Tick, TickMode};
    use chrono::TimeZone;
    use chrono_tz::Asia::Kolkata;
    use uuid::Uuid;

    fn ist(h: u32, m: u32, s: u32) -> DateTime<Utc> {
        Kolkata
            .with_ymd_and_hms(2025, 1, 15, h, m, s)
            .unwrap()
            .with_timezone(&Utc)
    }

    fn envelope(ts: DateTime<Utc>, ltp: i64, day_volume: i64, seq: u64) -> TickEnvelope {
        TickEnvelope {
            tick: Tick::new("2885", ts.timestamp_millis(), ltp, day_volume, TickMode::Quote)
                .unwrap(),
            connection_id: Uuid::nil(),
            sequence_number: seq,
        }
    }

    async fn feed(ledger: &mut InstrumentLedger, ts: DateTime<Utc>, ltp: i64, day_volume: i64) {
        let env = envelope(ts, ltp, day_volume, ledger.ticks_received() + 1);
        ledger.on_tick(&env, floor_to_minute(ts)).await.unwrap();
    }

    fn row_count(ledger: &InstrumentLedger) -> usize {
        std::fs::read_to_string(ledger.store().row_file())
            .map(|s| s.lines().count())
            .unwrap_or(0)
    }

    #[tokio::test]
    async fn test_empty_ledger_seals_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        let report = ledger.seal_and_flush(true).await.unwrap();
        assert_eq!(report, FlushReport::default());
        assert!(!report.wrote());
        assert_eq!(ledger.candles_sealed(), 0);
    }

    #[tokio::test]
    async fn test_gate_open_persists_and_carries_volume() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        feed(&mut ledger, ist(10, 5, 0), 10000, 10).await;
        feed(&mut ledger, ist(10, 5, 40), 10100, 25).await;
        let report = ledger.seal_and_flush(true).await.unwrap();
        assert!(report.wrote());
        assert_eq!(report.sealed, Some(ist(10, 5, 0)));

        match ledger.state() {
            LedgerState::Empty { carried_day_volume } => assert_eq!(*carried_day_volume, Some(25)),
            other => panic!("unexpected state {}", other.as_str()),
        }

        feed(&mut ledger, ist(10, 6, 0), 10050, 31).await;
        ledger.seal_and_flush(true).await.unwrap();

        let content = std::fs::read_to_string(ledger.store().row_file()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].ends_with(",15"));
        assert!(lines[1].ends_with(",6"));
    }

    #[tokio::test]
    async fn test_volume_telescopes_across_session() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        let volumes = [[100, 140], [150, 150], [180, 260], [300, 301]];
        for (minute, pair) in volumes.iter().enumerate() {
            feed(&mut ledger, ist(11, minute as u32, 0), 5000, pair[0]).await;
            feed(&mut ledger, ist(11, minute as u32, 30), 5001, pair[1]).await;
            ledger.seal_and_flush(false).await.unwrap();
        }

        let total: i64 = ledger.pending_rows().iter().map(|c| c.volume).sum();
        assert!(ledger.pending_rows().iter().all(|c| c.volume >= 0));
        assert_eq!(total, 301 - 100);
    }

    #[tokio::test]
    async fn test_scenario_c_flush_skips_backfilled_rows() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        feed(&mut ledger, ist(10, 5, 0), 10000, 10).await;
        let first = ledger.seal_and_flush(false).await.unwrap();
        assert!(first.buffered && !first.wrote());
        feed(&mut ledger, ist(10, 6, 0), 10100, 20).await;
        ledger.seal_and_flush(false).await.unwrap();
        assert_eq!(ledger.pending_rows().len(), 2);
        assert_eq!(ledger.candles_sealed(), 2);

        // Backfill wrote the 10:05 bucket before opening the gate
        std::fs::write(
            ledger.store().row_file(),
            "2025-01-15 10:05:00+05:30,100.00,100.00,100.00,100.00,9\n",
        )
        .unwrap();

        let report = ledger.seal_and_flush(true).await.unwrap();
        assert_eq!(report.sealed, None);
        assert_eq!(report.rows_written, 1);
        assert_eq!(report.duplicates_skipped, 1);
        assert!(ledger.pending_rows().is_empty());

        let content = std::fs::read_to_string(ledger.store().row_file()).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[1].starts_with("2025-01-15 10:06:00+05:30,101.00"));
    }

    #[tokio::test]
    async fn test_flush_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        feed(&mut ledger, ist(10, 5, 0), 10000, 10).await;
        ledger.seal_and_flush(false).await.unwrap();
        feed(&mut ledger, ist(10, 6, 0), 10000, 12).await;
        let report = ledger.seal_and_flush(true).await.unwrap();
        assert_eq!(report.rows_written, 2);
        assert_eq!(row_count(&ledger), 2);

        // Pending list already drained: a second pass is a no-op
        let again = ledger.seal_and_flush(true).await.unwrap();
        assert_eq!(again, FlushReport::default());
        assert_eq!(row_count(&ledger), 2);
        assert_eq!(ledger.pending_buckets().len(), 0);
    }

    #[tokio::test]
    async fn test_failed_write_leaves_sealed_state() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        // Make the row file unwritable by putting a directory in its place
        std::fs::create_dir_all(ledger.store().row_file()).unwrap();

        feed(&mut ledger, ist(10, 5, 0), 10000, 10).await;
        assert!(ledger.seal_and_flush(true).await.is_err());
        assert_eq!(ledger.state().as_str(), "SEALED");

        let env = envelope(ist(10, 6, 0), 10000, 11, 99);
        let err = ledger.on_tick(&env, ist(10, 6, 0)).await.unwrap_err();
        assert!(err.is_fatal());
        assert!(ledger.seal_and_flush(true).await.is_err());
    }

    #[tokio::test]
    async fn test_snapshot_tracks_latest_tick() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::rooted_at(dir.path());
        let mut ledger = InstrumentLedger::open(&config, "2885", 0).await.unwrap();

        feed(&mut ledger, ist(10, 5, 0), 10000, 10).await;
        feed(&mut ledger, ist(10, 5, 3), 10025, 14).await;

        let snapshot: LtpSnapshot =
            serde_json::from_slice(&std::fs::read(ledger.store().ltp_file()).unwrap()).unwrap();
        assert_eq!(snapshot.last_traded_price, 10025);
        assert_eq!(snapshot.sequence_number, 2);
        assert_eq!(snapshot.volume_trade_for_the_day, 14);
    }
}
