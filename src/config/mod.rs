//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Every timing
//! knob of the streaming core lives here; venue endpoints and wire
//! formats are fixed by the adapters.

pub mod loader;

use std::time::Duration;

use serde::Deserialize;

use crate::adapters::feeds::ticker_session::TickerTiming;

/// Top-level service configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
  /// Service identity and logging.
  pub service: ServiceConfig,
  /// Streaming core timings and limits.
  #[serde(default)]
  pub streams: StreamsConfig,
  /// Where active alert demand comes from.
  pub demand: DemandConfig,
  /// Metrics and health endpoints.
  #[serde(default)]
  pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error). `RUST_LOG` wins.
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// Streaming core configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct StreamsConfig {
  /// First reconnect delay (ms).
  #[serde(default = "default_backoff_base_ms")]
  pub backoff_base_ms: u64,
  /// Reconnect delay ceiling (ms).
  #[serde(default = "default_backoff_cap_ms")]
  pub backoff_cap_ms: u64,
  /// Subscription acknowledgement deadline (ms).
  #[serde(default = "default_confirm_timeout_ms")]
  pub confirm_timeout_ms: u64,
  /// WebSocket handshake timeout (ms).
  #[serde(default = "default_connect_timeout_ms")]
  pub connect_timeout_ms: u64,
  /// A feed with no tick for this long is stale (s).
  #[serde(default = "default_staleness_window_secs")]
  pub staleness_window_secs: u64,
  /// Demand reconciliation period (s).
  #[serde(default = "default_reconcile_interval_secs")]
  pub reconcile_interval_secs: u64,
  /// REST poll period for polling venues (s).
  #[serde(default = "default_poll_interval_secs")]
  pub poll_interval_secs: u64,
  /// Reconnect attempts before a kline feed is abandoned.
  #[serde(default = "default_kline_max_attempts")]
  pub kline_max_attempts: u32,
  /// Upper bound on registered tick listeners.
  #[serde(default = "default_max_listeners")]
  pub max_listeners: usize,
}

impl Default for StreamsConfig {
  fn default() -> Self {
    Self {
      backoff_base_ms: default_backoff_base_ms(),
      backoff_cap_ms: default_backoff_cap_ms(),
      confirm_timeout_ms: default_confirm_timeout_ms(),
      connect_timeout_ms: default_connect_timeout_ms(),
      staleness_window_secs: default_staleness_window_secs(),
      reconcile_interval_secs: default_reconcile_interval_secs(),
      poll_interval_secs: default_poll_interval_secs(),
      kline_max_attempts: default_kline_max_attempts(),
      max_listeners: default_max_listeners(),
    }
  }
}

impl StreamsConfig {
  /// Runtime view with `Duration`s.
  pub const fn settings(&self) -> StreamSettings {
    StreamSettings {
      backoff_base: Duration::from_millis(self.backoff_base_ms),
      backoff_cap: Duration::from_millis(self.backoff_cap_ms),
      confirm_timeout: Duration::from_millis(self.confirm_timeout_ms),
      connect_timeout: Duration::from_millis(self.connect_timeout_ms),
      staleness_window: Duration::from_secs(self.staleness_window_secs),
      reconcile_interval: Duration::from_secs(self.reconcile_interval_secs),
      poll_interval: Duration::from_secs(self.poll_interval_secs),
      kline_max_attempts: self.kline_max_attempts,
      max_listeners: self.max_listeners,
    }
  }
}

/// Streaming core settings as the runtime consumes them.
#[derive(Debug, Clone, Copy)]
pub struct StreamSettings {
  pub backoff_base: Duration,
  pub backoff_cap: Duration,
  pub confirm_timeout: Duration,
  pub connect_timeout: Duration,
  pub staleness_window: Duration,
  pub reconcile_interval: Duration,
  pub poll_interval: Duration,
  pub kline_max_attempts: u32,
  pub max_listeners: usize,
}

impl StreamSettings {
  pub const fn timing(&self) -> TickerTiming {
    TickerTiming {
      backoff_base: self.backoff_base,
      backoff_cap: self.backoff_cap,
      confirm_timeout: self.confirm_timeout,
      connect_timeout: self.connect_timeout,
    }
  }
}

impl Default for StreamSettings {
  fn default() -> Self {
    StreamsConfig::default().settings()
  }
}

/// Demand source configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct DemandConfig {
  /// JSON file listing active alert demand; re-read every cycle.
  pub path: String,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

const fn default_true() -> bool {
  true
}

const fn default_backoff_base_ms() -> u64 {
  500
}

const fn default_backoff_cap_ms() -> u64 {
  30_000
}

const fn default_confirm_timeout_ms() -> u64 {
  10_000
}

const fn default_connect_timeout_ms() -> u64 {
  10_000
}

const fn default_staleness_window_secs() -> u64 {
  30
}

const fn default_reconcile_interval_secs() -> u64 {
  30
}

const fn default_poll_interval_secs() -> u64 {
  5
}

const fn default_kline_max_attempts() -> u32 {
  10
}

const fn default_max_listeners() -> usize {
  64
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

const fn default_health_port() -> u16 {
  8080
}
