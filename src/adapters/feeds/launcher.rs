//! Venue Feed Launcher - FeedKey to Running Feed
//!
//! Picks a socket session or a REST poller from the venue's feed mode and
//! wires it to the shared ingest path.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;

use super::poller::{Poller, PollerHandle};
use super::ticker_session::{TickerCommand, TickerHandle, TickerSession, TickerTiming};
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::market::{FeedKey, FeedMode, Venue};
use crate::ports::market_feed::{FeedLauncher, LiveFeed, TickListener};
use crate::ports::price_source::PriceMapSource;

#[async_trait]
impl LiveFeed for TickerHandle {
    fn set_symbols(&self, symbols: BTreeSet<String>) {
        self.command(TickerCommand::SetSymbols(symbols));
    }

    fn close(&self, reason: &str) {
        Self::close(self, reason);
    }

    fn is_finished(&self) -> bool {
        Self::is_finished(self)
    }

    async fn shutdown(&mut self, reason: &str) {
        self.close_and_wait(reason).await;
    }
}

#[async_trait]
impl LiveFeed for PollerHandle {
    fn set_symbols(&self, _symbols: BTreeSet<String>) {}

    fn close(&self, _reason: &str) {
        Self::close(self);
    }

    fn is_finished(&self) -> bool {
        Self::is_finished(self)
    }

    async fn shutdown(&mut self, _reason: &str) {
        self.close_and_wait().await;
    }
}

pub struct VenueFeedLauncher {
    sink: Arc<dyn TickListener>,
    timing: TickerTiming,
    poll_interval: Duration,
    poll_sources: HashMap<Venue, Arc<dyn PriceMapSource>>,
    endpoints: HashMap<FeedKey, String>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl VenueFeedLauncher {
    pub fn new(sink: Arc<dyn TickListener>, timing: TickerTiming, poll_interval: Duration) -> Self {
        Self {
            sink,
            timing,
            poll_interval,
            poll_sources: HashMap::new(),
            endpoints: HashMap::new(),
            metrics: None,
        }
    }

    /// Register the REST source serving a polling venue.
    #[must_use]
    pub fn with_poll_source(mut self, venue: Venue, source: Arc<dyn PriceMapSource>) -> Self {
        self.poll_sources.insert(venue, source);
        self
    }

    /// Connect one feed somewhere other than the venue's public endpoint.
    #[must_use]
    pub fn with_endpoint(mut self, key: FeedKey, url: impl Into<String>) -> Self {
        self.endpoints.insert(key, url.into());
        self
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }
}

impl FeedLauncher for VenueFeedLauncher {
    fn launch(&self, key: FeedKey, symbols: BTreeSet<String>) -> anyhow::Result<Box<dyn LiveFeed>> {
        let protocol = key.venue.ticker_protocol();
        match protocol.feed_mode(key.market) {
            FeedMode::Polling => {
                let source = self
                    .poll_sources
                    .get(&key.venue)
                    .cloned()
                    .with_context(|| format!("No price source registered for {key}"))?;
                let poller = Poller::new(key, source, Arc::clone(&self.sink), self.poll_interval);
                Ok(Box::new(poller.spawn()))
            }
            FeedMode::Aggregate | FeedMode::PerSymbol => {
                let session = TickerSession::new(
                    protocol,
                    key.market,
                    symbols,
                    Arc::clone(&self.sink),
                    self.metrics.clone(),
                );
                let handle = match self.endpoints.get(&key) {
                    Some(url) => session.spawn_at(url.clone(), self.timing),
                    None => session.spawn(self.timing),
                };
                Ok(Box::new(handle))
            }
        }
    }
}
