pub mod backfill;
pub mod aggregation;

pub use backfill::command_backfill;
pub use aggregation::spawn_aggregation_runner;
