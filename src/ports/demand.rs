//! Demand Port - Active Alert Demand Query
//!
//! The alert store is an external collaborator. The reconciler only
//! needs a snapshot of what active alerts watch, once per cycle.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::market::{Market, Venue};

/// Kind of alert behind a demand record.
///
/// Carried through for logging; it does not change subscription shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
  PriceCross,
  PercentChange,
  Volatility,
  Other,
}

/// How an alert selects its symbols.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SelectionMode {
  /// Every symbol of the market (wildcard).
  All,
  /// Only the listed symbols.
  Selected,
}

/// One active alert's demand, as reported by the alert store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AlertDemand {
  /// Venue the alert watches.
  pub venue: Venue,
  /// Spot or futures.
  pub market: Market,
  /// Symbols in any venue/user format; normalized by the reconciler.
  #[serde(default)]
  pub symbols: Vec<String>,
  /// Alert kind.
  pub alert_type: AlertType,
  /// Symbol selection mode.
  pub selection_mode: SelectionMode,
}

/// Source of active alert demand.
///
/// Failures are tolerated: a failed query leaves every live connection
/// untouched until the next cycle.
#[async_trait]
pub trait DemandSource: Send + Sync + 'static {
  /// Return all currently active demand records.
  async fn active_demand(&self) -> anyhow::Result<Vec<AlertDemand>>;
}
