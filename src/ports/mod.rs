//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) between the streaming core and the
//! outside world. Adapters and external collaborators implement these.
//!
//! Port categories:
//! - `Demand`: which (venue, market, symbol) tuples active alerts need
//! - `PriceSource`: opaque price-map producer for the polling-only venue
//! - `MarketFeed`: what the core emits (tick batches, candle updates)

pub mod demand;
pub mod market_feed;
pub mod price_source;
