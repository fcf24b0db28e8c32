//! Kline Streams - Owner-Facing Candle Subscriptions
//!
//! Keys are `(symbol, interval, market)` per venue; every key of one
//! (venue, market) shares a socket. Kline feeds stop reconnecting after
//! the attempt cap; a dead feed is dropped on the next subscribe, which
//! opens a fresh one.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures_util::future::join_all;
use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::adapters::feeds::kline::{KlineCommand, KlineHandle, KlineKey, KlineSession, channel_for};
use crate::adapters::feeds::ticker_session::TickerTiming;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::candle::KlineInterval;
use crate::domain::market::{FeedKey, Market, Venue, canonical_symbol};
use crate::error::StreamError;
use crate::ports::market_feed::CandleSink;
use crate::usecases::reconciler::SHUTDOWN_GRACE;

struct KlineFeed {
  handle: KlineHandle,
  keys: HashSet<KlineKey>,
}

pub struct KlineStreams {
  feeds: Mutex<HashMap<FeedKey, KlineFeed>>,
  timing: TickerTiming,
  max_attempts: u32,
  endpoints: HashMap<FeedKey, String>,
  metrics: Option<Arc<MetricsRegistry>>,
}

impl KlineStreams {
  pub fn new(timing: TickerTiming, max_attempts: u32, metrics: Option<Arc<MetricsRegistry>>) -> Self {
    Self {
      feeds: Mutex::new(HashMap::new()),
      timing,
      max_attempts,
      endpoints: HashMap::new(),
      metrics,
    }
  }

  /// Connect one kline feed somewhere other than the venue's endpoint.
  #[must_use]
  pub fn with_endpoint(mut self, key: FeedKey, url: impl Into<String>) -> Self {
    self.endpoints.insert(key, url.into());
    self
  }

  fn spawn_feed(&self, feed_key: FeedKey, session: KlineSession) -> KlineHandle {
    match self.endpoints.get(&feed_key) {
      Some(url) => session.spawn_at(url.clone(), self.timing, self.max_attempts),
      None => session.spawn(self.timing, self.max_attempts),
    }
  }

  /// Start streaming candles for one key into `sink`.
  ///
  /// Re-subscribing an existing key replaces its sink.
  pub fn subscribe_kline(
    &self,
    venue: Venue,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
    sink: Arc<dyn CandleSink>,
  ) -> Result<(), StreamError> {
    let protocol = venue.kline_protocol().ok_or(StreamError::NoKlineFeed(venue))?;
    let key = KlineKey {
      symbol: canonical_symbol(symbol),
      interval,
      market,
    };
    let channel = channel_for(protocol, &key)?;
    let feed_key = FeedKey::new(venue, market);

    let mut feeds = self.feeds.lock();
    if feeds.get(&feed_key).is_some_and(|f| f.handle.is_finished()) {
      info!(feed = %feed_key, "Kline feed was abandoned, reopening");
      feeds.remove(&feed_key);
    }
    let feed = feeds.entry(feed_key).or_insert_with(|| KlineFeed {
      handle: self.spawn_feed(feed_key, KlineSession::new(protocol, market, self.metrics.clone())),
      keys: HashSet::new(),
    });

    let command = KlineCommand::Subscribe {
      key: key.clone(),
      channel,
      sink,
    };
    if !feed.handle.command(command) {
      return Err(StreamError::FeedClosed(feed_key));
    }
    debug!(feed = %feed_key, key = %key, "Kline subscribed");
    feed.keys.insert(key);
    Ok(())
  }

  /// Stop one key. The socket closes with its last key. Returns false if
  /// the key was not subscribed.
  pub fn unsubscribe_kline(
    &self,
    venue: Venue,
    symbol: &str,
    interval: KlineInterval,
    market: Market,
  ) -> bool {
    let key = KlineKey {
      symbol: canonical_symbol(symbol),
      interval,
      market,
    };
    let feed_key = FeedKey::new(venue, market);

    let mut feeds = self.feeds.lock();
    let Some(feed) = feeds.get_mut(&feed_key) else {
      return false;
    };
    if !feed.keys.remove(&key) {
      return false;
    }
    if feed.keys.is_empty() {
      if let Some(feed) = feeds.remove(&feed_key) {
        feed.handle.close("last kline unsubscribed");
      }
    } else {
      feed.handle.command(KlineCommand::Unsubscribe(key));
    }
    true
  }

  /// Number of subscribed keys across all feeds.
  pub fn subscription_count(&self) -> usize {
    self.feeds.lock().values().map(|f| f.keys.len()).sum()
  }

  /// Close every kline feed and wait for their tasks to exit.
  pub async fn close_all(&self, reason: &str) {
    let mut handles: Vec<KlineHandle> = self.feeds.lock().drain().map(|(_, f)| f.handle).collect();
    let stopping = handles.iter_mut().map(|h| h.close_and_wait(reason));
    if tokio::time::timeout(SHUTDOWN_GRACE, join_all(stopping)).await.is_err() {
      warn!("Kline feeds did not stop within the grace period");
    }
  }
}
