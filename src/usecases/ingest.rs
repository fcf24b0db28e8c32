//! Tick ingest: the single write path from any feed into the core.
//!
//! Socket sessions and the REST poller both hand their parsed batches to
//! [`TickIngest`], which updates the cache, bumps the tick counter and
//! then fans the batch out to listeners.

use std::sync::Arc;

use crate::adapters::metrics::MetricsRegistry;
use crate::domain::market::FeedKey;
use crate::ports::market_feed::{TickBatch, TickListener};

use super::price_cache::PriceCache;
use super::tick_publisher::TickPublisher;

pub struct TickIngest {
  cache: Arc<PriceCache>,
  publisher: Arc<TickPublisher>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl TickIngest {
  pub const fn new(
    cache: Arc<PriceCache>,
    publisher: Arc<TickPublisher>,
    metrics: Option<Arc<MetricsRegistry>>,
  ) -> Self {
    Self {
      cache,
      publisher,
      metrics,
    }
  }
}

impl TickListener for TickIngest {
  fn on_tick(&self, batch: &TickBatch) -> anyhow::Result<()> {
    let written = self.cache.apply(batch);
    if let Some(metrics) = &self.metrics {
      metrics.record_ticks(FeedKey::new(batch.venue, batch.market), written);
    }
    self.publisher.publish(batch);
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::sync::atomic::{AtomicUsize, Ordering};
  use std::time::Duration;

  use super::*;
  use crate::domain::market::{Market, Venue};

  #[tokio::test]
  async fn test_cache_is_written_before_listeners_run() {
    let cache = Arc::new(PriceCache::new(Duration::from_secs(30)));
    let publisher = Arc::new(TickPublisher::default());
    let seen = Arc::new(AtomicUsize::new(0));

    let listener_cache = Arc::clone(&cache);
    let listener_seen = Arc::clone(&seen);
    publisher
      .on_tick(Arc::new(move |batch: &TickBatch| -> anyhow::Result<()> {
        assert!(listener_cache.is_fresh(batch.venue, batch.market));
        listener_seen.fetch_add(batch.prices.len(), Ordering::SeqCst);
        Ok(())
      }))
      .unwrap();

    let ingest = TickIngest::new(Arc::clone(&cache), publisher, None);
    ingest
      .on_tick(&TickBatch {
        venue: Venue::Gate,
        market: Market::Futures,
        prices: HashMap::from([("BTCUSDT".to_string(), 5.0), ("ETHUSDT".to_string(), 6.0)]),
      })
      .unwrap();

    assert_eq!(seen.load(Ordering::SeqCst), 2);
    assert_eq!(cache.price_map(Venue::Gate, Market::Futures).len(), 2);
  }
}
