/// Configuration loading from TOML file
use std::path::Path;

use crate::error::{PipelineError, Result};
use crate::types::Config;

/// Minutes in the 09:15 - 15:30 session
const SESSION_MINUTES: i64 = 375;

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::ConfigError(format!("Failed to read config file: {}", e)))?;

    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content)
        .map_err(|e| PipelineError::ConfigError(format!("Failed to parse config: {}", e)))?;

    validate_config(&config)?;

    Ok(config)
}

pub fn validate_config(config: &Config) -> Result<()> {
    // Storage
    for (name, path) in [
        ("historical_dir", &config.historical_dir),
        ("ltp_dir", &config.ltp_dir),
        ("liveness_marker", &config.liveness_marker),
    ] {
        if path.as_os_str().is_empty() {
            return Err(PipelineError::ConfigError(format!("{} is empty", name)));
        }
    }

    // Feed health
    if config.tick_timeout_sec == 0 {
        return Err(PipelineError::ConfigError("tick_timeout_sec must be > 0".to_string()));
    }
    if config.first_tick_max_second >= 60 {
        return Err(PipelineError::ConfigError(format!(
            "Invalid first_tick_max_second: {}",
            config.first_tick_max_second
        )));
    }

    // Aggregation
    if config.aggregation_warmup_min < 0 || config.aggregation_warmup_min >= SESSION_MINUTES {
        return Err(PipelineError::ConfigError(format!(
            "Invalid aggregation_warmup_min: {}",
            config.aggregation_warmup_min
        )));
    }
    if config.aggregation_queue == 0 {
        return Err(PipelineError::ConfigError("aggregation_queue must be > 0".to_string()));
    }

    // Backfill
    if config.backfill_timeout_sec == 0 {
        return Err(PipelineError::ConfigError("backfill_timeout_sec must be > 0".to_string()));
    }

    if config.symbols.values().any(|s| s.trim().is_empty() || s.contains('/')) {
        return Err(PipelineError::ConfigError(
            "symbol names must be non-empty file names".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"
historical_dir = "/var/lib/candles/historical"
ltp_dir = "/var/lib/candles/ltp"
liveness_marker = "/var/run/candles/live.marker"
tick_timeout_sec = 20
aggregation_command = ["python3", "aggregate.py"]
holidays = ["2026-01-26", "2026-03-03"]

[symbols]
"2885" = "RELIANCE"
"#;

    #[test]
    fn test_parse_with_defaults() {
        let config = parse_config(SAMPLE).unwrap();
        assert_eq!(config.tick_timeout_sec, 20);
        assert_eq!(config.first_tick_max_second, 2);
        assert_eq!(config.aggregation_warmup_min, 15);
        assert_eq!(config.backfill_timeout_sec, 300);
        assert!(config.backfill_command.is_empty());
        assert_eq!(config.aggregation_command.len(), 2);
        assert_eq!(config.holidays[0], NaiveDate::from_ymd_opt(2026, 1, 26).unwrap());
        assert_eq!(config.symbol_for("2885"), "RELIANCE");
        assert_eq!(config.log_level, "info");
    }

    #[test]
    fn test_missing_paths_rejected() {
        let err = parse_config("tick_timeout_sec = 5").unwrap_err();
        assert_eq!(err.error_code(), "CFG_001");
    }

    #[test]
    fn test_validation() {
        let mut config = parse_config(SAMPLE).unwrap();
        config.tick_timeout_sec = 0;
        assert!(validate_config(&config).is_err());

        let mut config = parse_config(SAMPLE).unwrap();
        config.first_tick_max_second = 60;
        assert!(validate_config(&config).is_err());

        let mut config = parse_config(SAMPLE).unwrap();
        config.aggregation_warmup_min = 400;
        assert!(validate_config(&config).is_err());

        let mut config = parse_config(SAMPLE).unwrap();
        config.symbols.insert("1".to_string(), "a/b".to_string());
        assert!(validate_config(&config).is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        assert!(load_config(&path).is_ok());
        assert!(load_config(dir.path().join("missing.toml")).is_err());
    }
}
