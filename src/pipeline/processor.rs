/// Pipeline context owned by the worker: admission, minute boundaries,
/// instrument ledgers and the once-a-minute sweep.
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::data::{InstrumentLedger, LivenessMarker};
use crate::error::Result;
use crate::pipeline::admission::{Admission, AdmissionFilter};
use crate::pipeline::gate::ReconciliationGate;
use crate::pipeline::minute_boundary::{BoundaryDecision, MinuteBoundaryDetector};
use crate::pipeline::trigger::{AggregationRequest, AggregationTrigger};
use crate::time::{floor_to_minute, is_aggregation_window, Clock};
use crate::types::{Config, TickEnvelope};

/// What happened to one dequeued tick
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Dropped(Admission),
    Accepted {
        decision: BoundaryDecision,
        sweep: Option<SweepReport>,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub sweep: u64,
    pub candles_sealed: usize,
    pub instruments_written: usize,
    pub aggregation_requested: bool,
    /// Instruments whose sealed count fell further behind the sweep count
    pub lagging: Vec<String>,
}

pub struct TickProcessor {
    config: Arc<Config>,
    clock: Arc<dyn Clock>,
    gate: ReconciliationGate,
    trigger: Box<dyn AggregationTrigger>,
    marker: LivenessMarker,
    admission: AdmissionFilter,
    detector: MinuteBoundaryDetector,
    ledgers: BTreeMap<String, InstrumentLedger>,
    /// Last reported seal shortfall per instrument, to warn once per miss
    shortfalls: HashMap<String, u64>,
    sweeps: u64,
    ticks_accepted: u64,
    started_at: DateTime<Utc>,
}

impl TickProcessor {
    pub fn new(
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        gate: ReconciliationGate,
        trigger: Box<dyn AggregationTrigger>,
    ) -> Self {
        let started_at = clock.now();
        TickProcessor {
            admission: AdmissionFilter::new(config.first_tick_max_second),
            marker: LivenessMarker::new(config.liveness_marker.clone()),
            config,
            clock,
            gate,
            trigger,
            detector: MinuteBoundaryDetector::new(),
            ledgers: BTreeMap::new(),
            shortfalls: HashMap::new(),
            sweeps: 0,
            ticks_accepted: 0,
            started_at,
        }
    }

    /// Run one tick through the pipeline. Errors are fatal.
    pub async fn process(&mut self, envelope: TickEnvelope) -> Result<TickOutcome> {
        let admission = self.admission.admit(&envelope.tick);
        if admission != Admission::Accept {
            return Ok(TickOutcome::Dropped(admission));
        }

        let tick_time = envelope.tick.timestamp;
        let decision = self.detector.observe(tick_time)?;
        self.ticks_accepted += 1;

        if let BoundaryDecision::Reordered { behind_by } = decision {
            warn!(
                "Reordered tick received {} for {} ({} min behind last tick minute)",
                tick_time, envelope.tick.token, behind_by
            );
        }

        let sweep = if decision.is_new_minute() {
            info!("Got new minute tick [{}], sealing all instruments", tick_time);
            Some(self.sweep().await?)
        } else {
            None
        };

        // A reordered tick that opens a candle joins the current bucket so no
        // row is ever stamped behind one already sealed.
        let bucket = self
            .detector
            .watermark_bucket()
            .map_or(floor_to_minute(tick_time), |w| w.max(floor_to_minute(tick_time)));

        let token = envelope.tick.token.clone();
        if !self.ledgers.contains_key(&token) {
            let ledger = InstrumentLedger::open(&self.config, &token, self.sweeps).await?;
            self.ledgers.insert(token.clone(), ledger);
        }
        if let Some(ledger) = self.ledgers.get_mut(&token) {
            ledger.on_tick(&envelope, bucket).await?;
            debug!(
                "[{}] Instrument::on_tick #{} (seq {})",
                token,
                ledger.ticks_received(),
                envelope.sequence_number
            );
        }

        Ok(TickOutcome::Accepted { decision, sweep })
    }

    /// Seal every ledger for the minute that just ended
    pub async fn sweep(&mut self) -> Result<SweepReport> {
        self.sweeps += 1;
        let gate_open = self.gate.is_open();
        let mut report = SweepReport {
            sweep: self.sweeps,
            ..SweepReport::default()
        };

        for (token, ledger) in self.ledgers.iter_mut() {
            let flushed = ledger.seal_and_flush(gate_open).await?;
            if flushed.sealed.is_some() {
                report.candles_sealed += 1;
            }
            if flushed.wrote() {
                report.instruments_written += 1;
            }

            // Every instrument is expected to contribute a row each minute
            // once it has ticked.
            let expected = self.sweeps - ledger.joined_at_sweep();
            let shortfall = expected.saturating_sub(ledger.candles_sealed());
            let reported = self.shortfalls.entry(token.clone()).or_insert(0);
            if shortfall != *reported {
                if shortfall > 0 {
                    report.lagging.push(token.clone());
                    warn!(
                        "[{}] 1Min candles sealed ({}) != sweeps since first tick ({})",
                        token,
                        ledger.candles_sealed(),
                        expected
                    );
                }
                *reported = shortfall;
            }
        }

        info!(
            "Sweep {} done: sealed={} written={} gate={}",
            report.sweep,
            report.candles_sealed,
            report.instruments_written,
            self.gate.state().as_str()
        );

        if report.instruments_written > 0 {
            report.aggregation_requested = self.request_aggregation();
            self.marker.touch_quietly().await;
        }

        Ok(report)
    }

    /// Ask the downstream stage to rebuild aggregates, once it has enough
    /// live candles to produce a new bar of every intraday size.
    fn request_aggregation(&self) -> bool {
        let now = self.clock.now();
        let warmup = Duration::minutes(self.config.aggregation_warmup_min);
        if !is_aggregation_window(now) || now - self.started_at < warmup {
            warn!("Not finalizing live data yet as we don't have enough live candles");
            return false;
        }

        let request = AggregationRequest {
            sweep: self.sweeps,
            instruments: self.ledgers.keys().cloned().collect(),
            requested_at: now,
        };
        match self.trigger.schedule(request) {
            Ok(()) => {
                debug!("Scheduled aggregation for sweep {}", self.sweeps);
                true
            }
            Err(e) => {
                warn!("{} ({})", e, e.error_code());
                false
            }
        }
    }

    pub async fn touch_liveness(&self) {
        self.marker.touch_quietly().await;
    }

    pub fn ledger(&self, token: &str) -> Option<&InstrumentLedger> {
        self.ledgers.get(token)
    }

    pub fn instrument_count(&self) -> usize {
        self.ledgers.len()
    }

    pub fn sweeps(&self) -> u64 {
        self.sweeps
    }

    pub fn ticks_accepted(&self) -> u64 {
        self.ticks_accepted
    }

    pub fn admission(&self) -> &AdmissionFilter {
        &self.admission
    }
}
