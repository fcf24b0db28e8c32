//! Stream Hub - Facade Over the Streaming Core
//!
//! Owns every piece of runtime state: the price cache, the listener set,
//! the subscription reconciler and the kline streams. Nothing is global;
//! callers hold the hub behind an `Arc`.
//!
//! Lifecycle:
//! - `start()` spawns the reconcile loop (first cycle runs immediately)
//! - `stop()` broadcasts shutdown, waits for the loop to close its feeds,
//!   then closes every kline feed. Each feed task is awaited, so once it
//!   returns no listener or candle sink hears from a feed again. Calling
//!   it twice is harmless.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::{Mutex, broadcast};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use super::ingest::TickIngest;
use super::kline_streams::KlineStreams;
use super::price_cache::{PriceCache, PriceSnapshot};
use super::reconciler::Reconciler;
use super::tick_publisher::{ListenerId, TickPublisher};
use crate::adapters::feeds::launcher::VenueFeedLauncher;
use crate::adapters::metrics::MetricsRegistry;
use crate::config::StreamSettings;
use crate::domain::candle::KlineInterval;
use crate::domain::market::{FeedKey, Market, Venue};
use crate::error::StreamError;
use crate::ports::demand::DemandSource;
use crate::ports::market_feed::{CandleSink, FeedLauncher, TickListener};
use crate::ports::price_source::PriceMapSource;

#[derive(Default)]
struct Lifecycle {
  shutdown_tx: Option<broadcast::Sender<()>>,
  task: Option<JoinHandle<()>>,
}

pub struct StreamHub {
  cache: Arc<PriceCache>,
  publisher: Arc<TickPublisher>,
  ingest: Arc<TickIngest>,
  reconciler: Arc<Reconciler>,
  klines: KlineStreams,
  lifecycle: Mutex<Lifecycle>,
}

impl StreamHub {
  /// Build a hub that opens real venue connections.
  pub fn new(
    settings: StreamSettings,
    demand_source: Arc<dyn DemandSource>,
    poll_sources: HashMap<Venue, Arc<dyn PriceMapSource>>,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> Self {
    let launcher_metrics = metrics.clone();
    Self::build(settings, demand_source, metrics, move |sink| {
      let mut launcher = VenueFeedLauncher::new(sink, settings.timing(), settings.poll_interval);
      for (venue, source) in poll_sources {
        launcher = launcher.with_poll_source(venue, source);
      }
      if let Some(metrics) = launcher_metrics {
        launcher = launcher.with_metrics(metrics);
      }
      Arc::new(launcher)
    })
  }

  /// Build a hub around a caller-supplied launcher.
  ///
  /// The launcher receives nothing from the hub; feed it through
  /// [`StreamHub::ingest`] to simulate ticks.
  pub fn with_launcher(
    settings: StreamSettings,
    demand_source: Arc<dyn DemandSource>,
    launcher: Arc<dyn FeedLauncher>,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> Self {
    Self::build(settings, demand_source, metrics, move |_| launcher)
  }

  fn build(
    settings: StreamSettings,
    demand_source: Arc<dyn DemandSource>,
    metrics: Option<Arc<MetricsRegistry>>,
    make_launcher: impl FnOnce(Arc<dyn TickListener>) -> Arc<dyn FeedLauncher>,
  ) -> Self {
    let cache = Arc::new(PriceCache::new(settings.staleness_window));
    let publisher = Arc::new(TickPublisher::new(settings.max_listeners));
    let ingest = Arc::new(TickIngest::new(
      Arc::clone(&cache),
      Arc::clone(&publisher),
      metrics.clone(),
    ));

    let sink: Arc<dyn TickListener> = ingest.clone();
    let mut reconciler = Reconciler::new(demand_source, make_launcher(sink), settings.reconcile_interval);
    if let Some(metrics) = &metrics {
      reconciler = reconciler.with_metrics(Arc::clone(metrics));
    }

    Self {
      cache,
      publisher,
      ingest,
      reconciler: Arc::new(reconciler),
      klines: KlineStreams::new(settings.timing(), settings.kline_max_attempts, metrics),
      lifecycle: Mutex::new(Lifecycle::default()),
    }
  }

  /// Begin reconciling demand into live feeds. No-op if already running.
  pub async fn start(&self) {
    let mut lifecycle = self.lifecycle.lock().await;
    if lifecycle.task.is_some() {
      return;
    }

    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
    let reconciler = Arc::clone(&self.reconciler);
    lifecycle.task = Some(tokio::spawn(reconciler.run(shutdown_rx)));
    lifecycle.shutdown_tx = Some(shutdown_tx);
    info!("Stream hub started");
  }

  /// Close every feed and stop reconciling. Safe to call repeatedly.
  pub async fn stop(&self) {
    let mut lifecycle = self.lifecycle.lock().await;
    let Some(task) = lifecycle.task.take() else {
      return;
    };
    if let Some(tx) = lifecycle.shutdown_tx.take() {
      let _ = tx.send(());
    }
    if let Err(e) = task.await {
      warn!(error = %e, "Reconcile task ended abnormally");
      self.reconciler.close_all("shutdown").await;
    }
    self.klines.close_all("shutdown").await;
    info!("Stream hub stopped");
  }

  pub async fn is_running(&self) -> bool {
    self.lifecycle.lock().await.task.is_some()
  }

  /// Latest price per canonical symbol for one feed.
  pub fn price_map(&self, venue: Venue, market: Market) -> HashMap<String, f64> {
    self.cache.price_map(venue, market)
  }

  pub fn price(&self, venue: Venue, market: Market, symbol: &str) -> Option<PriceSnapshot> {
    self.cache.price(venue, market, symbol)
  }

  /// Whether the feed delivered a tick within the staleness window.
  pub fn is_fresh(&self, venue: Venue, market: Market) -> bool {
    self.cache.is_fresh(venue, market)
  }

  /// Ready once at least one demanded feed is fresh.
  pub async fn is_ready(&self) -> bool {
    self
      .reconciler
      .active_keys()
      .await
      .into_iter()
      .any(|FeedKey { venue, market }| self.cache.is_fresh(venue, market))
  }

  pub async fn active_feeds(&self) -> Vec<FeedKey> {
    self.reconciler.active_keys().await
  }

  pub fn on_tick(&self, listener: Arc<dyn TickListener>) -> Result<ListenerId, StreamError> {
    self.publisher.on_tick(listener)
  }

  pub fn off_tick(&self, id: ListenerId) -> bool {
    self.publisher.off_tick(id)
  }

  pub fn subscribe_kline(
    &self,
    venue: Venue,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
    sink: Arc<dyn CandleSink>,
  ) -> Result<(), StreamError> {
    self.klines.subscribe_kline(venue, symbol, interval, market, sink)
  }

  pub fn unsubscribe_kline(
    &self,
    venue: Venue,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
  ) -> bool {
    self.klines.unsubscribe_kline(venue, symbol, interval, market)
  }

  /// The single write path every feed uses.
  pub fn ingest(&self) -> Arc<dyn TickListener> {
    self.ingest.clone()
  }

  pub fn reconciler(&self) -> &Reconciler {
    &self.reconciler
  }
}

#[cfg(test)]
mod tests {
  use std::collections::BTreeSet;
  use std::time::Duration;

  use async_trait::async_trait;

  use super::*;
  use crate::ports::demand::{AlertDemand, AlertType, SelectionMode};
  use crate::ports::market_feed::{LiveFeed, TickBatch};

  struct FixedDemand(Vec<AlertDemand>);

  #[async_trait]
  impl DemandSource for FixedDemand {
    async fn active_demand(&self) -> anyhow::Result<Vec<AlertDemand>> {
      Ok(self.0.clone())
    }
  }

  struct IdleFeed;

  #[async_trait]
  impl LiveFeed for IdleFeed {
    fn set_symbols(&self, _symbols: BTreeSet<String>) {}
    fn close(&self, _reason: &str) {}
    fn is_finished(&self) -> bool {
      false
    }
    async fn shutdown(&mut self, _reason: &str) {}
  }

  struct IdleLauncher;

  impl FeedLauncher for IdleLauncher {
    fn launch(&self, _key: FeedKey, _symbols: BTreeSet<String>) -> anyhow::Result<Box<dyn LiveFeed>> {
      Ok(Box::new(IdleFeed))
    }
  }

  fn hub() -> StreamHub {
    let demand = FixedDemand(vec![AlertDemand {
      venue: Venue::Okx,
      market: Market::Spot,
      symbols: vec!["BTC-USDT".to_string()],
      alert_type: AlertType::PriceCross,
      selection_mode: SelectionMode::Selected,
    }]);
    StreamHub::with_launcher(StreamSettings::default(), Arc::new(demand), Arc::new(IdleLauncher), None)
  }

  fn okx_tick(price: f64) -> TickBatch {
    TickBatch {
      venue: Venue::Okx,
      market: Market::Spot,
      prices: HashMap::from([("BTCUSDT".to_string(), price)]),
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_ready_after_demanded_feed_ticks() {
    let hub = hub();
    hub.reconciler().reconcile().await.unwrap();
    assert!(!hub.is_ready().await);

    hub.ingest().on_tick(&okx_tick(64_000.0)).unwrap();
    assert!(hub.is_ready().await);
    assert_eq!(hub.price_map(Venue::Okx, Market::Spot)["BTCUSDT"], 64_000.0);

    tokio::time::advance(Duration::from_secs(31)).await;
    assert!(!hub.is_ready().await);
  }

  #[tokio::test]
  async fn test_stop_is_idempotent() {
    let hub = hub();
    hub.stop().await;
    hub.start().await;
    hub.start().await;
    assert!(hub.is_running().await);
    hub.stop().await;
    hub.stop().await;
    assert!(!hub.is_running().await);
    assert!(hub.active_feeds().await.is_empty());
  }
}
