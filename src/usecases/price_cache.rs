//! Price Cache - Latest Price per (Venue, Market, Symbol)
//!
//! Readers never wait on the network: every feed task writes here after a
//! successful parse, and lookups are plain map reads behind a short
//! `parking_lot` lock. Entries are overwritten in place (last write wins,
//! regardless of venue timestamps) and never deleted; a feed that goes
//! quiet is reported stale by [`PriceCache::is_fresh`].

use std::collections::HashMap;
use std::time::Duration;

use chrono::Utc;
use parking_lot::RwLock;
use tokio::time::Instant;

use crate::domain::market::{FeedKey, Market, Venue};
use crate::ports::market_feed::TickBatch;

/// Latest observation of one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceSnapshot {
  pub venue: Venue,
  pub market: Market,
  pub symbol: String,
  pub price: f64,
  /// Monotonic arrival time.
  pub observed_at: Instant,
  /// Wall-clock arrival time (Unix ms).
  pub observed_at_ms: i64,
}

#[derive(Debug, Clone, Copy)]
struct Entry {
  price: f64,
  observed_at: Instant,
  observed_at_ms: i64,
}

#[derive(Debug, Default)]
struct FeedPrices {
  prices: HashMap<String, Entry>,
  last_update: Option<Instant>,
}

/// In-memory price store shared by all feeds.
#[derive(Debug)]
pub struct PriceCache {
  feeds: RwLock<HashMap<FeedKey, FeedPrices>>,
  staleness_window: Duration,
}

impl PriceCache {
  pub fn new(staleness_window: Duration) -> Self {
    Self {
      feeds: RwLock::new(HashMap::new()),
      staleness_window,
    }
  }

  /// Merge one batch. Returns the number of prices written.
  pub fn apply(&self, batch: &TickBatch) -> usize {
    let now = Instant::now();
    let now_ms = Utc::now().timestamp_millis();
    let key = FeedKey::new(batch.venue, batch.market);

    let mut feeds = self.feeds.write();
    let feed = feeds.entry(key).or_default();
    for (symbol, price) in &batch.prices {
      feed.prices.insert(
        symbol.clone(),
        Entry {
          price: *price,
          observed_at: now,
          observed_at_ms: now_ms,
        },
      );
    }
    feed.last_update = Some(now);
    batch.prices.len()
  }

  /// Copy of every known price for a feed; empty if none yet.
  pub fn price_map(&self, venue: Venue, market: Market) -> HashMap<String, f64> {
    self
      .feeds
      .read()
      .get(&FeedKey::new(venue, market))
      .map(|feed| {
        feed
          .prices
          .iter()
          .map(|(symbol, entry)| (symbol.clone(), entry.price))
          .collect()
      })
      .unwrap_or_default()
  }

  pub fn price(&self, venue: Venue, market: Market, symbol: &str) -> Option<PriceSnapshot> {
    let feeds = self.feeds.read();
    let entry = feeds.get(&FeedKey::new(venue, market))?.prices.get(symbol)?;
    Some(PriceSnapshot {
      venue,
      market,
      symbol: symbol.to_string(),
      price: entry.price,
      observed_at: entry.observed_at,
      observed_at_ms: entry.observed_at_ms,
    })
  }

  /// True iff the feed's last successful parse is within the staleness window.
  pub fn is_fresh(&self, venue: Venue, market: Market) -> bool {
    self
      .last_update(FeedKey::new(venue, market))
      .is_some_and(|at| at.elapsed() <= self.staleness_window)
  }

  pub fn last_update(&self, key: FeedKey) -> Option<Instant> {
    self.feeds.read().get(&key).and_then(|feed| feed.last_update)
  }

  pub const fn staleness_window(&self) -> Duration {
    self.staleness_window
  }
}
