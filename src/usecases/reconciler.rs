//! Subscription Reconciler - Demand to Live Feeds
//!
//! Once at start and then on a fixed period:
//! 1. Snapshot active alert demand from the `DemandSource`
//! 2. Reduce it to feed keys plus per-key canonical symbol sets
//! 3. Close feeds nobody needs, open feeds for new keys
//! 4. Push the full symbol set to surviving per-symbol feeds
//!
//! A failed demand query leaves every live feed untouched. Feeds whose
//! task died for good are pruned and reopened if still demanded. The
//! registry has exactly one writer at a time (a tokio mutex).
//!
//! On shutdown every feed task is awaited (bounded by a grace period),
//! so no tick is delivered after `close_all` returns.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use futures_util::future::join_all;
use tokio::sync::{Mutex, broadcast};
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::market::{FeedKey, FeedMode, canonical_symbol};
use crate::ports::demand::{AlertDemand, DemandSource, SelectionMode};
use crate::ports::market_feed::{FeedLauncher, LiveFeed};

/// How long shutdown waits for feed tasks to exit.
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// Needed feeds and, for per-symbol feeds, their canonical symbols.
pub type DemandMap = BTreeMap<FeedKey, BTreeSet<String>>;

/// What one reconciliation cycle changed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
  pub opened: Vec<FeedKey>,
  pub closed: Vec<FeedKey>,
  /// Live per-symbol feeds that received a new symbol set.
  pub retargeted: Vec<FeedKey>,
  /// Dead feeds removed before diffing.
  pub pruned: Vec<FeedKey>,
}

impl ReconcileReport {
  pub fn is_noop(&self) -> bool {
    self.opened.is_empty()
      && self.closed.is_empty()
      && self.retargeted.is_empty()
      && self.pruned.is_empty()
  }
}

struct FeedRecord {
  feed: Box<dyn LiveFeed>,
  symbols: BTreeSet<String>,
}

/// Reduce demand records to feed keys and symbol sets.
///
/// Wildcard (`All`) records contribute the key only: per-symbol venues
/// cannot subscribe "everything", so those symbols stay unsubscribed.
pub fn compute_demand(records: &[AlertDemand]) -> DemandMap {
  let mut demand = DemandMap::new();
  for record in records {
    let key = FeedKey::new(record.venue, record.market);
    let symbols = demand.entry(key).or_default();
    let per_symbol =
      record.venue.ticker_protocol().feed_mode(record.market) == FeedMode::PerSymbol;
    if per_symbol && record.selection_mode == SelectionMode::Selected {
      symbols.extend(
        record
          .symbols
          .iter()
          .map(|s| canonical_symbol(s))
          .filter(|s| !s.is_empty()),
      );
    }
  }
  demand
}

pub struct Reconciler {
  demand_source: Arc<dyn DemandSource>,
  launcher: Arc<dyn FeedLauncher>,
  registry: Mutex<HashMap<FeedKey, FeedRecord>>,
  interval: Duration,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl Reconciler {
  pub fn new(
    demand_source: Arc<dyn DemandSource>,
    launcher: Arc<dyn FeedLauncher>,
    interval: Duration,
  ) -> Self {
    Self {
      demand_source,
      launcher,
      registry: Mutex::new(HashMap::new()),
      interval,
      metrics: None,
    }
  }

  #[must_use]
  pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
    self.metrics = Some(metrics);
    self
  }

  /// Run one reconciliation cycle.
  pub async fn reconcile(&self) -> Result<ReconcileReport> {
    let records = match self
      .demand_source
      .active_demand()
      .await
      .context("Demand query failed")
    {
      Ok(records) => records,
      Err(e) => {
        self.record_outcome("demand_error");
        return Err(e);
      }
    };
    let demand = compute_demand(&records);

    let mut registry = self.registry.lock().await;
    let mut report = ReconcileReport::default();

    registry.retain(|key, record| {
      if record.feed.is_finished() {
        report.pruned.push(*key);
        false
      } else {
        true
      }
    });

    let stale: Vec<FeedKey> = registry
      .keys()
      .filter(|key| !demand.contains_key(key))
      .copied()
      .collect();
    for key in stale {
      if let Some(record) = registry.remove(&key) {
        record.feed.close("no longer demanded");
        report.closed.push(key);
      }
    }

    for (key, symbols) in demand {
      match registry.get_mut(&key) {
        Some(record) => {
          if record.symbols != symbols {
            record.feed.set_symbols(symbols.clone());
            record.symbols = symbols;
            report.retargeted.push(key);
          }
        }
        None => match self.launcher.launch(key, symbols.clone()) {
          Ok(feed) => {
            registry.insert(key, FeedRecord { feed, symbols });
            report.opened.push(key);
          }
          Err(e) => warn!(feed = %key, error = %e, "Failed to open feed"),
        },
      }
    }

    self.record_outcome("ok");
    Ok(report)
  }

  /// Keys with a live feed right now.
  pub async fn active_keys(&self) -> Vec<FeedKey> {
    let mut keys: Vec<FeedKey> = self.registry.lock().await.keys().copied().collect();
    keys.sort();
    keys
  }

  /// Close and forget every feed, waiting for their tasks to exit.
  pub async fn close_all(&self, reason: &str) -> usize {
    let mut records: Vec<(FeedKey, FeedRecord)> = self.registry.lock().await.drain().collect();
    let count = records.len();
    let stopping = records.iter_mut().map(|(key, record)| {
      debug!(feed = %key, "Closing feed");
      record.feed.shutdown(reason)
    });
    if tokio::time::timeout(SHUTDOWN_GRACE, join_all(stopping)).await.is_err() {
      warn!(
        grace_secs = SHUTDOWN_GRACE.as_secs(),
        "Feeds did not stop within the grace period"
      );
    }
    count
  }

  /// Periodic loop; exits (closing every feed) on shutdown.
  #[instrument(skip(self, shutdown_rx), name = "reconcile_loop")]
  pub async fn run(self: Arc<Self>, mut shutdown_rx: broadcast::Receiver<()>) {
    let mut ticker = tokio::time::interval(self.interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
      tokio::select! {
        biased;
        _ = shutdown_rx.recv() => break,
        _ = ticker.tick() => match self.reconcile().await {
          Ok(report) if report.is_noop() => debug!("Reconcile: no changes"),
          Ok(report) => info!(
            opened = report.opened.len(),
            closed = report.closed.len(),
            retargeted = report.retargeted.len(),
            pruned = report.pruned.len(),
            "Reconcile applied"
          ),
          Err(e) => warn!(error = %e, "Reconcile skipped, feeds left untouched"),
        },
      }
    }

    let closed = self.close_all("shutdown").await;
    info!(closed, "Reconciler stopped");
  }

  fn record_outcome(&self, outcome: &str) {
    if let Some(metrics) = &self.metrics {
      metrics.record_reconcile(outcome);
    }
  }
}
