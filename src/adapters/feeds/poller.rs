//! REST Poller - Socketless Feed for Polling Venues
//!
//! Calls a [`PriceMapSource`] on a fixed interval and pushes the result
//! through the same ingest path as socket feeds. A failed poll is logged
//! and simply retried on the next tick.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use super::protocol::TickerProtocol;
use crate::domain::market::FeedKey;
use crate::ports::market_feed::{TickBatch, TickListener};
use crate::ports::price_source::PriceMapSource;

pub struct Poller {
    key: FeedKey,
    source: Arc<dyn PriceMapSource>,
    protocol: &'static dyn TickerProtocol,
    sink: Arc<dyn TickListener>,
    interval: Duration,
}

/// Owner-side handle of a running poller.
pub struct PollerHandle {
    key: FeedKey,
    stop_tx: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PollerHandle {
    pub const fn key(&self) -> FeedKey {
        self.key
    }

    /// Stop polling. Idempotent.
    pub fn close(&self) {
        self.stop_tx.send_replace(true);
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Stop polling and wait for an in-flight poll to be dropped.
    pub async fn close_and_wait(&mut self) {
        self.close();
        if let Err(e) = (&mut self.task).await {
            warn!(feed = %self.key, error = %e, "Poller task ended abnormally");
        }
    }
}

impl Poller {
    pub fn new(
        key: FeedKey,
        source: Arc<dyn PriceMapSource>,
        sink: Arc<dyn TickListener>,
        interval: Duration,
    ) -> Self {
        Self {
            key,
            source,
            protocol: key.venue.ticker_protocol(),
            sink,
            interval,
        }
    }

    pub fn spawn(self) -> PollerHandle {
        let key = self.key;
        let (stop_tx, stop_rx) = watch::channel(false);
        let task = tokio::spawn(self.run(stop_rx));
        PollerHandle { key, stop_tx, task }
    }

    #[instrument(skip(self, stop_rx), fields(feed = %self.key))]
    async fn run(self, mut stop_rx: watch::Receiver<bool>) {
        info!(interval_ms = u64::try_from(self.interval.as_millis()).unwrap_or(u64::MAX), "Poller started");
        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = stop_rx.changed() => break,
                _ = ticker.tick() => {
                    tokio::select! {
                        biased;
                        _ = stop_rx.changed() => break,
                        () = self.poll_once() => {}
                    }
                }
            }
        }
        info!("Poller stopped");
    }

    /// One fetch + ingest cycle.
    pub async fn poll_once(&self) {
        match self.source.fetch_prices(self.key.market).await {
            Ok(raw) => {
                let prices: HashMap<String, f64> = raw
                    .into_iter()
                    .map(|(symbol, price)| (self.protocol.to_canonical(self.key.market, &symbol), price))
                    .collect();
                debug!(count = prices.len(), "Poll succeeded");
                if prices.is_empty() {
                    return;
                }
                let batch = TickBatch {
                    venue: self.key.venue,
                    market: self.key.market,
                    prices,
                };
                if let Err(e) = self.sink.on_tick(&batch) {
                    warn!(error = %e, "Tick ingest failed");
                }
            }
            Err(e) => warn!(error = %e, "Poll failed, retrying next interval"),
        }
    }
}
