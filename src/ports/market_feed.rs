//! Market Feed Port - What the Streaming Core Emits
//!
//! Tick batches go to registered `TickListener`s after every successful
//! parse; candle updates go to the kline owner's `CandleSink`. Feeds are
//! opened through a `FeedLauncher` so the reconciler never touches
//! sockets directly.

use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;

use crate::domain::candle::{Candle, KlineInterval};
use crate::domain::market::{FeedKey, Market, Venue};

/// Prices parsed from one inbound message (or one poll).
#[derive(Debug, Clone, PartialEq)]
pub struct TickBatch {
  /// Source venue.
  pub venue: Venue,
  /// Spot or futures.
  pub market: Market,
  /// Canonical symbol -> last price.
  pub prices: HashMap<String, f64>,
}

/// Receiver of tick batches.
///
/// Called synchronously on the feed task, so implementations must be
/// quick. An `Err` (or a panic) is logged and isolated; it never stops
/// delivery to other listeners.
pub trait TickListener: Send + Sync + 'static {
  fn on_tick(&self, batch: &TickBatch) -> anyhow::Result<()>;
}

impl<F> TickListener for F
where
  F: Fn(&TickBatch) -> anyhow::Result<()> + Send + Sync + 'static,
{
  fn on_tick(&self, batch: &TickBatch) -> anyhow::Result<()> {
    self(batch)
  }
}

/// Owner-supplied callback for kline updates.
pub trait CandleSink: Send + Sync + 'static {
  fn on_candle_update(
    &self,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
    candle: &Candle,
  );
}

impl<F> CandleSink for F
where
  F: Fn(&str, KlineInterval, Market, &Candle) + Send + Sync + 'static,
{
  fn on_candle_update(
    &self,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
    candle: &Candle,
  ) {
    self(symbol, interval, market, candle);
  }
}

/// Owner-side view of one live feed (socket session or poller).
#[async_trait]
pub trait LiveFeed: Send + Sync {
  /// Push the full desired canonical symbol set. Aggregate and polling
  /// feeds ignore it.
  fn set_symbols(&self, symbols: BTreeSet<String>);

  /// Stop the feed. Idempotent; returns immediately.
  fn close(&self, reason: &str);

  /// True once the feed task has exited for good.
  fn is_finished(&self) -> bool;

  /// Stop the feed and wait for its task to exit. Nothing is emitted
  /// once this returns. Call at most once.
  async fn shutdown(&mut self, reason: &str);
}

/// Opens feeds for the reconciler.
pub trait FeedLauncher: Send + Sync + 'static {
  /// Start a feed for `key` with an initial canonical symbol set.
  fn launch(&self, key: FeedKey, symbols: BTreeSet<String>) -> anyhow::Result<Box<dyn LiveFeed>>;
}
