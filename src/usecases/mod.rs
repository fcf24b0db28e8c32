//! Use Cases Layer - Streaming Core Workflows
//!
//! Orchestrates feed adapters through the port interfaces. Each use
//! case owns one concern and is wired together by `StreamHub`.
//!
//! Use cases:
//! - `PriceCache`: last-write-wins prices with per-feed freshness
//! - `TickPublisher`: bounded, panic-isolated listener fan-out
//! - `TickIngest`: the single write path from feeds into the core
//! - `Reconciler`: demand to live feeds, once per cycle
//! - `KlineStreams`: owner-facing candle subscriptions
//! - `StreamHub`: facade and lifecycle

pub mod ingest;
pub mod kline_streams;
pub mod price_cache;
pub mod reconciler;
pub mod stream_hub;
pub mod tick_publisher;
