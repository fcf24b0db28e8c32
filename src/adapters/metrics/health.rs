//! Health Check Server - Liveness and Readiness Probes
//!
//! Exposes /live and /ready endpoints via axum 0.7 for container
//! health checks. Readiness holds once any demanded feed is fresh.

use std::sync::Arc;

use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use tokio::sync::broadcast;
use tracing::{info, instrument};

use crate::usecases::stream_hub::StreamHub;

/// Axum-based health check HTTP server.
pub struct HealthServer {
    hub: Arc<StreamHub>,
    /// Bind port (default 8080 from config).
    port: u16,
}

impl HealthServer {
    pub const fn new(hub: Arc<StreamHub>, port: u16) -> Self {
        Self { hub, port }
    }

    fn router(&self) -> Router {
        Router::new()
            .route("/live", get(Self::liveness))
            .route("/ready", get(Self::readiness))
            .with_state(Arc::clone(&self.hub))
    }

    /// Serve until shutdown is broadcast.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) -> anyhow::Result<()> {
        let app = self.router();

        let addr = format!("0.0.0.0:{}", self.port);
        let listener = tokio::net::TcpListener::bind(&addr).await?;

        info!(address = %addr, "Health server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }

    /// Liveness probe: always returns 200 if the process is running.
    async fn liveness() -> impl IntoResponse {
        (StatusCode::OK, "OK")
    }

    async fn readiness(State(hub): State<Arc<StreamHub>>) -> impl IntoResponse {
        if hub.is_ready().await {
            (StatusCode::OK, "READY")
        } else {
            (StatusCode::SERVICE_UNAVAILABLE, "NOT READY")
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::{BTreeSet, HashMap};

    use async_trait::async_trait;

    use super::*;
    use crate::config::StreamSettings;
    use crate::domain::market::{FeedKey, Market, Venue};
    use crate::ports::demand::{AlertDemand, AlertType, DemandSource, SelectionMode};
    use crate::ports::market_feed::{FeedLauncher, LiveFeed, TickBatch, TickListener};

    struct BinanceDemand;

    #[async_trait]
    impl DemandSource for BinanceDemand {
        async fn active_demand(&self) -> anyhow::Result<Vec<AlertDemand>> {
            Ok(vec![AlertDemand {
                venue: Venue::Binance,
                market: Market::Futures,
                symbols: Vec::new(),
                alert_type: AlertType::PercentChange,
                selection_mode: SelectionMode::All,
            }])
        }
    }

    struct Idle;

    #[async_trait]
    impl LiveFeed for Idle {
        fn set_symbols(&self, _symbols: BTreeSet<String>) {}
        fn close(&self, _reason: &str) {}
        fn is_finished(&self) -> bool {
            false
        }
        async fn shutdown(&mut self, _reason: &str) {}
    }

    impl FeedLauncher for Idle {
        fn launch(&self, _key: FeedKey, _symbols: BTreeSet<String>) -> anyhow::Result<Box<dyn LiveFeed>> {
            Ok(Box::new(Self))
        }
    }

    #[tokio::test]
    async fn test_readiness_follows_feed_freshness() {
        let hub = Arc::new(StreamHub::with_launcher(
            StreamSettings::default(),
            Arc::new(BinanceDemand),
            Arc::new(Idle),
            None,
        ));
        hub.reconciler().reconcile().await.unwrap();

        let response = HealthServer::readiness(State(Arc::clone(&hub))).await.into_response();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);

        hub.ingest()
            .on_tick(&TickBatch {
                venue: Venue::Binance,
                market: Market::Futures,
                prices: HashMap::from([("BTCUSDT".to_string(), 64_000.0)]),
            })
            .unwrap();
        let response = HealthServer::readiness(State(hub)).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
