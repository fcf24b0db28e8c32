//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    service = %config.service.name,
    reconcile_secs = config.streams.reconcile_interval_secs,
    staleness_secs = config.streams.staleness_window_secs,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
fn validate_config(config: &AppConfig) -> Result<()> {
  let streams = &config.streams;

  anyhow::ensure!(
    streams.backoff_base_ms > 0,
    "backoff_base_ms must be positive"
  );
  anyhow::ensure!(
    streams.backoff_base_ms <= streams.backoff_cap_ms,
    "backoff_base_ms ({}) must not exceed backoff_cap_ms ({})",
    streams.backoff_base_ms,
    streams.backoff_cap_ms
  );
  anyhow::ensure!(
    streams.confirm_timeout_ms > 0 && streams.connect_timeout_ms > 0,
    "confirm and connect timeouts must be positive"
  );
  anyhow::ensure!(
    streams.staleness_window_secs > 0,
    "staleness_window_secs must be positive"
  );
  anyhow::ensure!(
    streams.reconcile_interval_secs > 0,
    "reconcile_interval_secs must be positive"
  );
  anyhow::ensure!(
    streams.poll_interval_secs > 0,
    "poll_interval_secs must be positive"
  );
  anyhow::ensure!(
    streams.kline_max_attempts > 0,
    "kline_max_attempts must be positive"
  );
  anyhow::ensure!(
    streams.max_listeners > 0,
    "max_listeners must be positive"
  );

  anyhow::ensure!(
    !config.demand.path.trim().is_empty(),
    "demand.path must not be empty"
  );

  if config.metrics.enabled {
    anyhow::ensure!(
      !config.metrics.bind_address.is_empty(),
      "metrics.bind_address must not be empty"
    );
  }

  Ok(())
}
