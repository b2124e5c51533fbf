pub mod loader;

pub use loader::{load_config, parse_config, validate_config};
