/// Core type definitions for the live candle pipeline
use std::collections::HashMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, Result};

/// Earliest exchange timestamp accepted from the feed (2023-01-01 00:00 IST).
pub const MIN_EXCHANGE_TIMESTAMP_MS: i64 = 1_672_511_400_000;

/// Feed subscription mode of a tick
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TickMode {
    Ltp,
    Quote,
    Depth,
}

impl TickMode {
    pub fn as_str(&self) -> &str {
        match self {
            TickMode::Ltp => "LTP",
            TickMode::Quote => "QUOTE",
            TickMode::Depth => "DEPTH",
        }
    }

    /// SmartStream wire value (1 = LTP, 2 = QUOTE, 3 = SNAP/DEPTH)
    pub fn from_wire(mode: u8) -> Option<Self> {
        match mode {
            1 => Some(TickMode::Ltp),
            2 => Some(TickMode::Quote),
            3 => Some(TickMode::Depth),
            _ => None,
        }
    }

    pub fn as_wire(&self) -> u8 {
        match self {
            TickMode::Ltp => 1,
            TickMode::Quote => 2,
            TickMode::Depth => 3,
        }
    }
}

/// Live trade tick, validated at the ingress boundary
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tick {
    pub token: String,
    pub timestamp: DateTime<Utc>,
    pub timestamp_ms: i64,
    /// Last traded price in paise
    pub ltp: i64,
    /// Cumulative traded volume for the day
    pub day_volume: i64,
    pub mode: TickMode,
}

impl Tick {
    pub fn new(
        token: impl Into<String>,
        timestamp_ms: i64,
        ltp: i64,
        day_volume: i64,
        mode: TickMode,
    ) -> Result<Self> {
        let token = token.into();
        if token.trim().is_empty() {
            return Err(PipelineError::MalformedTick("empty instrument token".to_string()));
        }
        if timestamp_ms < MIN_EXCHANGE_TIMESTAMP_MS {
            return Err(PipelineError::MalformedTick(format!(
                "[{}] exchange_timestamp {} predates 2023-01-01",
                token, timestamp_ms
            )));
        }
        if ltp < 0 {
            return Err(PipelineError::MalformedTick(format!("[{}] negative ltp {}", token, ltp)));
        }
        if day_volume < 0 {
            return Err(PipelineError::MalformedTick(format!(
                "[{}] negative day volume {}",
                token, day_volume
            )));
        }
        let timestamp = DateTime::from_timestamp_millis(timestamp_ms).ok_or_else(|| {
            PipelineError::MalformedTick(format!(
                "[{}] timestamp {} out of range",
                token, timestamp_ms
            ))
        })?;

        Ok(Tick {
            token,
            timestamp,
            timestamp_ms,
            ltp,
            day_volume,
            mode,
        })
    }
}

/// Tick as it arrives from the feed (SmartStream quote payload).
/// Unknown fields are ignored.
#[derive(Debug, Clone, Deserialize)]
pub struct RawTick {
    pub token: String,
    pub exchange_timestamp: i64,
    pub last_traded_price: i64,
    #[serde(default)]
    pub volume_trade_for_the_day: i64,
    pub subscription_mode: u8,
}

impl TryFrom<RawTick> for Tick {
    type Error = PipelineError;

    fn try_from(raw: RawTick) -> Result<Self> {
        let mode = TickMode::from_wire(raw.subscription_mode).ok_or_else(|| {
            PipelineError::MalformedTick(format!(
                "[{}] subscription_mode={}",
                raw.token, raw.subscription_mode
            ))
        })?;
        Tick::new(
            raw.token,
            raw.exchange_timestamp,
            raw.last_traded_price,
            raw.volume_trade_for_the_day,
            mode,
        )
    }
}

impl RawTick {
    /// Parse one JSON message from the feed into a validated tick
    pub fn parse(line: &str) -> Result<Tick> {
        let raw: RawTick = serde_json::from_str(line)
            .map_err(|e| PipelineError::MalformedTick(format!("{}: {}", e, line)))?;
        Tick::try_from(raw)
    }
}

/// Tick as carried through the ingestion queue, stamped by the feed connection
/// that received it. Sequence numbers restart at 1 on every connection.
#[derive(Debug, Clone)]
pub struct TickEnvelope {
    pub tick: Tick,
    pub connection_id: Uuid,
    pub sequence_number: u64,
}

/// Finalized 1-minute OHLCV candle. Prices are in paise.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candle {
    pub token: String,
    pub bucket_start: DateTime<Utc>,
    pub open: i64,
    pub high: i64,
    pub low: i64,
    pub close: i64,
    pub volume: i64,
    pub partial: bool,
    pub day_volume_at_bucket_start: i64,
    /// Cumulative day volume of the last tick folded into the candle
    pub day_volume: i64,
}

/// Latest-tick snapshot, rewritten on every tick for order placement readers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LtpSnapshot {
    pub connection_id: Option<Uuid>,
    pub sequence_number: u64,
    pub token: String,
    pub exchange_timestamp: i64,
    pub last_traded_price: i64,
    pub volume_trade_for_the_day: i64,
    pub subscription_mode: u8,
}

impl LtpSnapshot {
    /// Placeholder written before the first tick of an instrument arrives
    pub fn initial(token: &str) -> Self {
        LtpSnapshot {
            connection_id: None,
            sequence_number: 0,
            token: token.to_string(),
            exchange_timestamp: 0,
            last_traded_price: 0,
            volume_trade_for_the_day: 0,
            subscription_mode: 0,
        }
    }

    pub fn from_envelope(envelope: &TickEnvelope) -> Self {
        let tick = &envelope.tick;
        LtpSnapshot {
            connection_id: Some(envelope.connection_id),
            sequence_number: envelope.sequence_number,
            token: tick.token.clone(),
            exchange_timestamp: tick.timestamp_ms,
            last_traded_price: tick.ltp,
            volume_trade_for_the_day: tick.day_volume,
            subscription_mode: tick.mode.as_wire(),
        }
    }
}

/// Configuration for the live candle service
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    // Storage
    pub historical_dir: PathBuf,
    pub ltp_dir: PathBuf,
    pub liveness_marker: PathBuf,

    // Feed Health
    #[serde(default = "default_tick_timeout_sec")]
    pub tick_timeout_sec: u64,
    #[serde(default = "default_queue_backlog_warn")]
    pub queue_backlog_warn: usize,
    #[serde(default = "default_first_tick_max_second")]
    pub first_tick_max_second: u32,

    // Downstream Aggregation
    #[serde(default = "default_aggregation_warmup_min")]
    pub aggregation_warmup_min: i64,
    #[serde(default = "default_aggregation_queue")]
    pub aggregation_queue: usize,
    #[serde(default)]
    pub aggregation_command: Vec<String>,

    // Backfill
    #[serde(default)]
    pub backfill_command: Vec<String>,
    #[serde(default = "default_backfill_timeout_sec")]
    pub backfill_timeout_sec: u64,

    // Calendar
    #[serde(default)]
    pub holidays: Vec<NaiveDate>,

    // Instrument token -> file name
    #[serde(default)]
    pub symbols: HashMap<String, String>,

    // Logging
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub log_json: bool,
}

fn default_tick_timeout_sec() -> u64 {
    30
}

fn default_queue_backlog_warn() -> usize {
    100
}

fn default_first_tick_max_second() -> u32 {
    2
}

fn default_aggregation_warmup_min() -> i64 {
    15
}

fn default_aggregation_queue() -> usize {
    8
}

fn default_backfill_timeout_sec() -> u64 {
    300
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Default settings with every file placed under `root`
    pub fn rooted_at(root: &Path) -> Self {
        Config {
            historical_dir: root.join("historical"),
            ltp_dir: root.join("ltp"),
            liveness_marker: root.join("live_running.marker"),
            tick_timeout_sec: default_tick_timeout_sec(),
            queue_backlog_warn: default_queue_backlog_warn(),
            first_tick_max_second: default_first_tick_max_second(),
            aggregation_warmup_min: default_aggregation_warmup_min(),
            aggregation_queue: default_aggregation_queue(),
            aggregation_command: Vec::new(),
            backfill_command: Vec::new(),
            backfill_timeout_sec: default_backfill_timeout_sec(),
            holidays: Vec::new(),
            symbols: HashMap::new(),
            log_level: default_log_level(),
            log_json: false,
        }
    }

    /// File name used for an instrument's store and snapshot
    pub fn symbol_for<'a>(&'a self, token: &'a str) -> &'a str {
        self.symbols.get(token).map(String::as_str).unwrap_or(token)
    }
}
