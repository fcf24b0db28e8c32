//! Price Source Port - REST Price-Map Producer
//!
//! Serves the venue whose socket feed is unreliable. The poller treats
//! the result as an opaque `symbol -> price` map keyed by venue symbol.

use std::collections::HashMap;

use async_trait::async_trait;

use crate::domain::market::Market;

/// Periodic price-map producer for a polling-only venue.
#[async_trait]
pub trait PriceMapSource: Send + Sync + 'static {
  /// Fetch the latest price of every symbol in `market`.
  ///
  /// Keys are venue-native symbols; the poller normalizes them.
  async fn fetch_prices(&self, market: Market) -> anyhow::Result<HashMap<String, f64>>;
}
