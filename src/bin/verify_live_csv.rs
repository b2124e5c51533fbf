/// Standalone utility to check live candle stores for duplicate or
/// out-of-order rows
/// Usage: cargo run --bin verify_live_csv -- historical/RELIANCE/RELIANCE.live.csv [...]

use std::collections::HashSet;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::{DateTime, Utc};
use live_candles::data::{format_row_timestamp, parse_row_timestamp};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Debug, Default)]
struct StoreReport {
    rows: usize,
    duplicates: Vec<DateTime<Utc>>,
    out_of_order: Vec<DateTime<Utc>>,
    unparseable: usize,
}

impl StoreReport {
    fn is_clean(&self) -> bool {
        self.duplicates.is_empty() && self.out_of_order.is_empty() && self.unparseable == 0
    }
}

fn verify(path: &Path) -> anyhow::Result<StoreReport> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("opening {}", path.display()))?;

    let mut report = StoreReport::default();
    let mut seen = HashSet::new();
    let mut last: Option<DateTime<Utc>> = None;

    for record in reader.records() {
        let record = record.with_context(|| format!("reading {}", path.display()))?;
        report.rows += 1;

        let Some(ts) = record.get(0).and_then(parse_row_timestamp) else {
            report.unparseable += 1;
            continue;
        };

        if !seen.insert(ts) {
            report.duplicates.push(ts);
        } else if last.is_some_and(|prev| ts <= prev) {
            report.out_of_order.push(ts);
        }
        last = Some(last.map_or(ts, |prev| prev.max(ts)));
    }

    Ok(report)
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let files: Vec<String> = std::env::args().skip(1).collect();
    if files.is_empty() {
        bail!("usage: verify_live_csv <file.live.csv>...");
    }

    let mut dirty = 0;
    for file in &files {
        let path = Path::new(file);
        let report = verify(path)?;

        for ts in &report.duplicates {
            warn!("{}: duplicate row {}", path.display(), format_row_timestamp(*ts));
        }
        for ts in &report.out_of_order {
            warn!(
                "{}: row {} is not after the previous row",
                path.display(),
                format_row_timestamp(*ts)
            );
        }
        if report.unparseable > 0 {
            warn!("{}: {} rows with unparseable timestamps", path.display(), report.unparseable);
        }

        if report.is_clean() {
            info!("{}: {} rows OK", path.display(), report.rows);
        } else {
            error!(
                "{}: {} rows, {} duplicate, {} out of order",
                path.display(),
                report.rows,
                report.duplicates.len(),
                report.out_of_order.len()
            );
            dirty += 1;
        }
    }

    if dirty > 0 {
        bail!("{} of {} files failed verification", dirty, files.len());
    }
    Ok(())
}
