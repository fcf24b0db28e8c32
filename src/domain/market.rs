//! Venue and market identifiers shared across the crate.
//!
//! Defines the six supported venues, the spot/futures market split,
//! the `(venue, market)` feed key and canonical symbol helpers.
//!
//! Canonical symbols are bare upper-case `BASEQUOTE` strings
//! (e.g. `BTCUSDT`). Each venue adapter translates to and from its
//! own instrument naming convention.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

/// Quote assets recognized when splitting a canonical symbol.
///
/// Ordered so that longer suffixes win (`FDUSD` before `USD`).
pub const KNOWN_QUOTES: &[&str] = &[
    "FDUSD", "USDT", "USDC", "BUSD", "USD", "BTC", "ETH", "EUR", "TRY",
];

/// Supported exchange venues.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Venue {
    Binance,
    Bybit,
    Okx,
    Gate,
    Mexc,
    Bitget,
}

impl Venue {
    /// Every supported venue, in a stable order.
    pub const ALL: [Self; 6] = [
        Self::Binance,
        Self::Bybit,
        Self::Okx,
        Self::Gate,
        Self::Mexc,
        Self::Bitget,
    ];

    /// Lower-case name used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Binance => "binance",
            Self::Bybit => "bybit",
            Self::Okx => "okx",
            Self::Gate => "gate",
            Self::Mexc => "mexc",
            Self::Bitget => "bitget",
        }
    }
}

impl fmt::Display for Venue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Venue {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .into_iter()
            .find(|v| v.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| StreamError::UnknownVenue(s.to_string()))
    }
}

/// Instrument class within a venue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Market {
    Spot,
    Futures,
}

impl Market {
    /// Both markets, spot first.
    pub const ALL: [Self; 2] = [Self::Spot, Self::Futures];

    /// Lower-case name used in logs and metric labels.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Spot => "spot",
            Self::Futures => "futures",
        }
    }
}

impl fmt::Display for Market {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity of one logical feed: at most one live connection per key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct FeedKey {
    pub venue: Venue,
    pub market: Market,
}

impl FeedKey {
    pub const fn new(venue: Venue, market: Market) -> Self {
        Self { venue, market }
    }
}

impl fmt::Display for FeedKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.venue, self.market)
    }
}

/// How a venue delivers ticker data for one market.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedMode {
    /// One socket carries every symbol of the market.
    Aggregate,
    /// Each symbol must be named in a subscribe frame.
    PerSymbol,
    /// No usable socket feed; prices come from a periodic REST poll.
    Polling,
}

/// Normalize a user-supplied symbol to canonical form.
///
/// Strips the common separators (`-`, `_`, `/`) and upper-cases.
pub fn canonical_symbol(raw: &str) -> String {
    raw.chars()
        .filter(|c| !matches!(c, '-' | '_' | '/' | ' '))
        .flat_map(char::to_uppercase)
        .collect()
}

/// Split a canonical symbol into `(base, quote)` using [`KNOWN_QUOTES`].
pub fn split_canonical(symbol: &str) -> Option<(&str, &str)> {
    KNOWN_QUOTES.iter().find_map(|quote| {
        symbol
            .strip_suffix(quote)
            .filter(|base| !base.is_empty())
            .map(|base| (base, *quote))
    })
}
