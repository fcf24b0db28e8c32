//! Integration Tests - Reconciler, Poller and Hub Wiring
//!
//! Tests the interaction between usecases, ports, and mock adapters.
//! Uses mockall for trait mocking and tokio::test for async tests.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use mockall::mock;
use mockall::predicate::*;
use parking_lot::Mutex;

use venue_stream::config::StreamSettings;
use venue_stream::domain::market::{FeedKey, Market, Venue};
use venue_stream::ports::demand::{AlertDemand, AlertType, SelectionMode};
use venue_stream::ports::market_feed::{LiveFeed, TickBatch, TickListener};
use venue_stream::usecases::reconciler::Reconciler;
use venue_stream::usecases::stream_hub::StreamHub;

// ---- Mock Definitions ----

mock! {
    pub Demand {}

    #[async_trait::async_trait]
    impl venue_stream::ports::demand::DemandSource for Demand {
        async fn active_demand(&self) -> anyhow::Result<Vec<AlertDemand>>;
    }
}

mock! {
    pub Prices {}

    #[async_trait::async_trait]
    impl venue_stream::ports::price_source::PriceMapSource for Prices {
        async fn fetch_prices(&self, market: Market) -> anyhow::Result<HashMap<String, f64>>;
    }
}

mock! {
    pub Launcher {}

    impl venue_stream::ports::market_feed::FeedLauncher for Launcher {
        fn launch(&self, key: FeedKey, symbols: BTreeSet<String>) -> anyhow::Result<Box<dyn LiveFeed>>;
    }
}

mock! {
    pub Feed {}

    #[async_trait::async_trait]
    impl LiveFeed for Feed {
        fn set_symbols(&self, symbols: BTreeSet<String>);
        fn close(&self, reason: &str);
        fn is_finished(&self) -> bool;
        async fn shutdown(&mut self, reason: &str);
    }
}

// ---- Helpers ----

fn demand(venue: Venue, market: Market, symbols: &[&str]) -> AlertDemand {
    AlertDemand {
        venue,
        market,
        symbols: symbols.iter().map(|s| (*s).to_string()).collect(),
        alert_type: AlertType::PriceCross,
        selection_mode: SelectionMode::Selected,
    }
}

fn symbols(list: &[&str]) -> BTreeSet<String> {
    list.iter().map(|s| (*s).to_string()).collect()
}

/// A feed that stays alive and must never be touched.
fn quiet_feed() -> Box<dyn LiveFeed> {
    let mut feed = MockFeed::new();
    feed.expect_is_finished().return_const(false);
    feed.expect_set_symbols().never();
    feed.expect_close().never();
    feed.expect_shutdown().never();
    Box::new(feed)
}

fn reconciler(demand: MockDemand, launcher: MockLauncher) -> Reconciler {
    Reconciler::new(Arc::new(demand), Arc::new(launcher), Duration::from_secs(30))
}

// ---- Reconciler ----

#[tokio::test]
async fn test_second_reconcile_with_same_demand_is_noop() {
    let mut source = MockDemand::new();
    source.expect_active_demand().times(2).returning(|| {
        Ok(vec![
            demand(Venue::Bybit, Market::Spot, &["BTCUSDT", "ETHUSDT"]),
            demand(Venue::Binance, Market::Futures, &["BTCUSDT"]),
        ])
    });

    let mut launcher = MockLauncher::new();
    launcher
        .expect_launch()
        .with(eq(FeedKey::new(Venue::Bybit, Market::Spot)), eq(symbols(&["BTCUSDT", "ETHUSDT"])))
        .times(1)
        .returning(|_, _| Ok(quiet_feed()));
    launcher
        .expect_launch()
        .with(eq(FeedKey::new(Venue::Binance, Market::Futures)), eq(BTreeSet::new()))
        .times(1)
        .returning(|_, _| Ok(quiet_feed()));

    let reconciler = reconciler(source, launcher);

    let first = reconciler.reconcile().await.unwrap();
    assert_eq!(first.opened.len(), 2);

    let second = reconciler.reconcile().await.unwrap();
    assert!(second.is_noop(), "unexpected changes: {second:?}");
    assert_eq!(reconciler.active_keys().await.len(), 2);
}

#[tokio::test]
async fn test_demand_failure_leaves_feeds_untouched() {
    let calls = AtomicUsize::new(0);
    let mut source = MockDemand::new();
    source.expect_active_demand().returning(move || {
        if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            Ok(vec![demand(Venue::Okx, Market::Futures, &["BTC-USDT-SWAP"])])
        } else {
            Err(anyhow::anyhow!("alert store unavailable"))
        }
    });

    let mut launcher = MockLauncher::new();
    launcher
        .expect_launch()
        .with(eq(FeedKey::new(Venue::Okx, Market::Futures)), eq(symbols(&["BTCUSDT"])))
        .times(1)
        .returning(|_, _| Ok(quiet_feed()));

    let reconciler = reconciler(source, launcher);
    reconciler.reconcile().await.unwrap();

    let err = reconciler.reconcile().await.unwrap_err();
    assert!(err.to_string().contains("Demand query failed"));
    assert_eq!(
        reconciler.active_keys().await,
        vec![FeedKey::new(Venue::Okx, Market::Futures)]
    );
}

#[tokio::test]
async fn test_symbol_change_retargets_and_dropped_key_closes() {
    let calls = AtomicUsize::new(0);
    let mut source = MockDemand::new();
    source.expect_active_demand().returning(move || {
        Ok(if calls.fetch_add(1, Ordering::SeqCst) == 0 {
            vec![
                demand(Venue::Gate, Market::Spot, &["BTC_USDT", "ETH_USDT"]),
                demand(Venue::Mexc, Market::Futures, &["BTC_USDT"]),
            ]
        } else {
            vec![demand(Venue::Gate, Market::Spot, &["BTC_USDT", "ETH_USDT", "SOL_USDT"])]
        })
    });

    let retargeted = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&retargeted);
    let mut launcher = MockLauncher::new();
    launcher
        .expect_launch()
        .with(eq(FeedKey::new(Venue::Gate, Market::Spot)), always())
        .times(1)
        .returning(move |_, _| {
            let seen = Arc::clone(&seen);
            let mut feed = MockFeed::new();
            feed.expect_is_finished().return_const(false);
            feed.expect_set_symbols().times(1).returning(move |s| seen.lock().push(s));
            feed.expect_close().never();
            Ok(Box::new(feed))
        });
    launcher
        .expect_launch()
        .with(eq(FeedKey::new(Venue::Mexc, Market::Futures)), always())
        .times(1)
        .returning(|_, _| {
            let mut feed = MockFeed::new();
            feed.expect_is_finished().return_const(false);
            feed.expect_close().with(eq("no longer demanded")).times(1).return_const(());
            Ok(Box::new(feed))
        });

    let reconciler = reconciler(source, launcher);
    reconciler.reconcile().await.unwrap();
    let report = reconciler.reconcile().await.unwrap();

    assert_eq!(report.closed, vec![FeedKey::new(Venue::Mexc, Market::Futures)]);
    assert_eq!(report.retargeted, vec![FeedKey::new(Venue::Gate, Market::Spot)]);
    assert_eq!(*retargeted.lock(), vec![symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"])]);
}

#[tokio::test]
async fn test_dead_feed_is_pruned_and_reopened() {
    let mut source = MockDemand::new();
    source
        .expect_active_demand()
        .returning(|| Ok(vec![demand(Venue::Bybit, Market::Futures, &["BTCUSDT"])]));

    let launches = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&launches);
    let mut launcher = MockLauncher::new();
    launcher.expect_launch().returning(move |_, _| {
        let first = counter.fetch_add(1, Ordering::SeqCst) == 0;
        let mut feed = MockFeed::new();
        feed.expect_is_finished().return_const(first);
        feed.expect_close().return_const(());
        Ok(Box::new(feed))
    });

    let reconciler = reconciler(source, launcher);
    reconciler.reconcile().await.unwrap();
    let report = reconciler.reconcile().await.unwrap();

    assert_eq!(report.pruned, vec![FeedKey::new(Venue::Bybit, Market::Futures)]);
    assert_eq!(report.opened, vec![FeedKey::new(Venue::Bybit, Market::Futures)]);
    assert_eq!(launches.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_launch_failure_is_retried_next_cycle() {
    let mut source = MockDemand::new();
    source
        .expect_active_demand()
        .returning(|| Ok(vec![demand(Venue::Okx, Market::Spot, &["BTCUSDT"])]));

    let attempts = AtomicUsize::new(0);
    let mut launcher = MockLauncher::new();
    launcher.expect_launch().times(2).returning(move |_, _| {
        if attempts.fetch_add(1, Ordering::SeqCst) == 0 {
            Err(anyhow::anyhow!("refused"))
        } else {
            Ok(quiet_feed())
        }
    });

    let reconciler = reconciler(source, launcher);
    assert!(reconciler.reconcile().await.unwrap().opened.is_empty());
    assert_eq!(reconciler.reconcile().await.unwrap().opened.len(), 1);
}

#[tokio::test]
async fn test_close_all_waits_for_every_feed() {
    let mut source = MockDemand::new();
    source.expect_active_demand().returning(|| {
        Ok(vec![
            demand(Venue::Okx, Market::Spot, &["BTCUSDT"]),
            demand(Venue::Binance, Market::Spot, &[]),
        ])
    });

    let stopped = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&stopped);
    let mut launcher = MockLauncher::new();
    launcher.expect_launch().times(2).returning(move |_, _| {
        let counter = Arc::clone(&counter);
        let mut feed = MockFeed::new();
        feed.expect_is_finished().return_const(false);
        feed.expect_close().never();
        feed.expect_shutdown().with(eq("shutdown")).times(1).returning(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        Ok(Box::new(feed))
    });

    let reconciler = reconciler(source, launcher);
    reconciler.reconcile().await.unwrap();
    assert_eq!(reconciler.close_all("shutdown").await, 2);
    assert_eq!(stopped.load(Ordering::SeqCst), 2);
    assert!(reconciler.active_keys().await.is_empty());
    assert_eq!(reconciler.close_all("shutdown").await, 0);
}

// ---- Hub ----

#[tokio::test(start_paused = true)]
async fn test_polled_venue_fills_cache_and_reaches_listeners() {
    let mut source = MockDemand::new();
    source
        .expect_active_demand()
        .returning(|| Ok(vec![demand(Venue::Bitget, Market::Spot, &["BTCUSDT"])]));

    let mut prices = MockPrices::new();
    prices
        .expect_fetch_prices()
        .with(eq(Market::Spot))
        .returning(|_| Ok(HashMap::from([("BTCUSDT".to_string(), 64_250.5)])));

    let settings = StreamSettings::default();
    let poll_sources: HashMap<Venue, Arc<dyn venue_stream::ports::price_source::PriceMapSource>> =
        HashMap::from([(Venue::Bitget, Arc::new(prices) as _)]);
    let hub = StreamHub::new(settings, Arc::new(source), poll_sources, None);

    let received = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&received);
    let listener: Arc<dyn TickListener> = Arc::new(move |batch: &TickBatch| -> anyhow::Result<()> {
        assert_eq!(batch.venue, Venue::Bitget);
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });
    let panicking: Arc<dyn TickListener> =
        Arc::new(|_: &TickBatch| -> anyhow::Result<()> { panic!("listener bug") });
    hub.on_tick(panicking).unwrap();
    let id = hub.on_tick(listener).unwrap();

    assert!(!hub.is_fresh(Venue::Bitget, Market::Spot));
    hub.start().await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    assert!(hub.is_fresh(Venue::Bitget, Market::Spot));
    assert!(hub.is_ready().await);
    assert_eq!(hub.price_map(Venue::Bitget, Market::Spot)["BTCUSDT"], 64_250.5);
    assert!(received.load(Ordering::SeqCst) >= 1);

    assert!(hub.off_tick(id));
    hub.stop().await;
    assert!(hub.active_feeds().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_freshness_expires_after_window() {
    let mut source = MockDemand::new();
    source.expect_active_demand().returning(|| Ok(Vec::new()));
    let hub = StreamHub::with_launcher(
        StreamSettings::default(),
        Arc::new(source),
        Arc::new(MockLauncher::new()),
        None,
    );

    assert!(!hub.is_fresh(Venue::Okx, Market::Spot));
    hub.ingest()
        .on_tick(&TickBatch {
            venue: Venue::Okx,
            market: Market::Spot,
            prices: HashMap::from([("ETHUSDT".to_string(), 3_100.0)]),
        })
        .unwrap();
    assert!(hub.is_fresh(Venue::Okx, Market::Spot));

    tokio::time::advance(StreamSettings::default().staleness_window + Duration::from_millis(1)).await;
    assert!(!hub.is_fresh(Venue::Okx, Market::Spot));
    // Prices outlive freshness.
    assert_eq!(hub.price_map(Venue::Okx, Market::Spot)["ETHUSDT"], 3_100.0);
}
