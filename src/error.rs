//! Typed errors surfaced by the streaming core.
//!
//! Application plumbing (I/O, config, HTTP) uses `anyhow` with context;
//! these variants are the ones callers are expected to match on.

use thiserror::Error;

use crate::domain::candle::KlineInterval;
use crate::domain::market::{FeedKey, Venue};

#[derive(Debug, Error)]
pub enum StreamError {
    #[error("unknown venue: {0}")]
    UnknownVenue(String),

    #[error("unknown kline interval: {0}")]
    UnknownInterval(String),

    #[error("{venue} does not serve {interval} klines")]
    UnsupportedInterval {
        venue: Venue,
        interval: KlineInterval,
    },

    #[error("{0} has no kline stream")]
    NoKlineFeed(Venue),

    #[error("span {0}s does not divide one minute into sub-candles")]
    InvalidSpan(u32),

    #[error("tick listener capacity ({0}) reached")]
    ListenerCapacity(usize),

    #[error("symbol {symbol} cannot be expressed on {venue}")]
    UnmappableSymbol { venue: Venue, symbol: String },

    #[error("feed {0} is not running")]
    FeedClosed(FeedKey),
}
