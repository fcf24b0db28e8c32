//! Domain layer - Core market-data types and pure algorithms.
//!
//! No I/O here (hexagonal architecture inner ring). Venue/market
//! identity, candles and the deterministic sub-minute resampler are
//! all testable in isolation.

pub mod candle;
pub mod market;
pub mod resampler;

// Re-export core types for convenience
pub use candle::{Candle, KlineInterval};
pub use market::{FeedKey, FeedMode, Market, Venue};
pub use resampler::{CandleTracker, SubMinuteSpan, resample};
