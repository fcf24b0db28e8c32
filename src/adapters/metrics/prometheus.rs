//! Prometheus Metrics Registry - Feed Observability
//!
//! Registers the `venue_stream_*` metric families and exposes them on
//! `/metrics` for scraping. Counters are labelled by venue and market so
//! a dashboard can spot one silent feed among many healthy ones.

use std::sync::Arc;

use axum::Router;
use axum::http::StatusCode;
use axum::routing::get;
use prometheus::{Encoder, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder};
use tokio::sync::broadcast;
use tracing::{error, info, instrument};

use crate::domain::market::{FeedKey, Venue};

/// Centralized Prometheus metrics for the streaming core.
pub struct MetricsRegistry {
    registry: Registry,
    /// Prices applied to the cache, per feed.
    pub ticks: IntCounterVec,
    /// Scheduled reconnects, per feed.
    pub reconnects: IntCounterVec,
    /// Feed connection status (1 = open, 0 = not).
    pub feed_connected: IntGaugeVec,
    /// Dropped inbound frames that failed to parse.
    pub parse_errors: IntCounterVec,
    /// Reconciliation cycles by outcome (`ok` / `demand_error`).
    pub reconcile_runs: IntCounterVec,
}

impl MetricsRegistry {
    /// Create and register all metric families.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks = IntCounterVec::new(
            Opts::new("venue_stream_ticks_total", "Prices applied to the cache"),
            &["venue", "market"],
        )?;
        let reconnects = IntCounterVec::new(
            Opts::new("venue_stream_reconnects_total", "Scheduled feed reconnects"),
            &["venue", "market"],
        )?;
        let feed_connected = IntGaugeVec::new(
            Opts::new(
                "venue_stream_feed_connected",
                "Feed connection status (1=connected, 0=disconnected)",
            ),
            &["venue", "market"],
        )?;
        let parse_errors = IntCounterVec::new(
            Opts::new(
                "venue_stream_parse_errors_total",
                "Inbound frames dropped because they failed to parse",
            ),
            &["venue"],
        )?;
        let reconcile_runs = IntCounterVec::new(
            Opts::new(
                "venue_stream_reconcile_runs_total",
                "Subscription reconciliation cycles",
            ),
            &["outcome"],
        )?;

        registry.register(Box::new(ticks.clone()))?;
        registry.register(Box::new(reconnects.clone()))?;
        registry.register(Box::new(feed_connected.clone()))?;
        registry.register(Box::new(parse_errors.clone()))?;
        registry.register(Box::new(reconcile_runs.clone()))?;

        Ok(Self {
            registry,
            ticks,
            reconnects,
            feed_connected,
            parse_errors,
            reconcile_runs,
        })
    }

    pub fn record_ticks(&self, key: FeedKey, count: usize) {
        self.ticks
            .with_label_values(&[key.venue.as_str(), key.market.as_str()])
            .inc_by(u64::try_from(count).unwrap_or(u64::MAX));
    }

    pub fn record_reconnect(&self, key: FeedKey) {
        self.reconnects
            .with_label_values(&[key.venue.as_str(), key.market.as_str()])
            .inc();
    }

    pub fn set_feed_connected(&self, key: FeedKey, connected: bool) {
        self.feed_connected
            .with_label_values(&[key.venue.as_str(), key.market.as_str()])
            .set(i64::from(connected));
    }

    pub fn record_parse_error(&self, venue: Venue) {
        self.parse_errors.with_label_values(&[venue.as_str()]).inc();
    }

    pub fn record_reconcile(&self, outcome: &str) {
        self.reconcile_runs.with_label_values(&[outcome]).inc();
    }

    /// Text exposition of every registered family.
    pub fn render(&self) -> anyhow::Result<String> {
        let mut buffer = Vec::new();
        TextEncoder::new().encode(&self.registry.gather(), &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }

    /// Serve `/metrics` on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics);
                async move {
                    match metrics.render() {
                        Ok(body) => (StatusCode::OK, body),
                        Err(e) => {
                            error!(error = %e, "Failed to encode metrics");
                            (StatusCode::INTERNAL_SERVER_ERROR, String::new())
                        }
                    }
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::market::Market;

    #[test]
    fn test_render_contains_labelled_series() {
        let metrics = MetricsRegistry::new().unwrap();
        let key = FeedKey::new(Venue::Okx, Market::Futures);
        metrics.record_ticks(key, 3);
        metrics.set_feed_connected(key, true);
        metrics.record_parse_error(Venue::Mexc);

        let text = metrics.render().unwrap();
        assert!(text.contains("venue_stream_ticks_total{market=\"futures\",venue=\"okx\"} 3"));
        assert!(text.contains("venue_stream_feed_connected{market=\"futures\",venue=\"okx\"} 1"));
        assert!(text.contains("venue_stream_parse_errors_total{venue=\"mexc\"} 1"));
    }
}
