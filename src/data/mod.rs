pub mod candle_builder;
pub mod persister;
pub mod ledger;

pub use candle_builder::CandleBuilder;
pub use persister::{
    format_price, format_row_timestamp, parse_row_timestamp, InstrumentStore, LivenessMarker,
    ROW_TIMESTAMP_FORMAT,
};
pub use ledger::{FlushReport, InstrumentLedger, LedgerState};
