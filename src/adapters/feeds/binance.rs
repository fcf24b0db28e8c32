//! Binance - Aggregate Mini-Ticker Streams
//!
//! The `!miniTicker@arr` stream pushes every symbol of the market once a
//! second; the stream is selected by URL, so no subscribe frame is sent.
//! Server pings are answered by the supervisor.

use anyhow::Context;
use serde::Deserialize;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Parsed, TickerProtocol, frame_text, price_str};
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

const SPOT_URL: &str = "wss://stream.binance.com:9443/ws/!miniTicker@arr";
const FUTURES_URL: &str = "wss://fstream.binance.com/ws/!miniTicker@arr";

/// One entry of the mini-ticker array.
#[derive(Debug, Deserialize)]
struct MiniTicker {
    /// Symbol.
    s: String,
    /// Close (last) price as string.
    c: String,
    /// Event time (Unix ms).
    #[serde(rename = "E")]
    _event_time: Option<u64>,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BinanceProtocol;

impl TickerProtocol for BinanceProtocol {
    fn venue(&self) -> Venue {
        Venue::Binance
    }

    fn endpoint(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => SPOT_URL,
            Market::Futures => FUTURES_URL,
        }
    }

    fn feed_mode(&self, _market: Market) -> FeedMode {
        FeedMode::Aggregate
    }

    fn subscribe_frames(&self, _market: Market, _symbols: &[String]) -> Vec<Message> {
        Vec::new()
    }

    fn parse(&self, _market: Market, frame: &Message) -> anyhow::Result<Parsed> {
        let Some(text) = frame_text(frame) else {
            return Ok(Parsed::Ignored);
        };
        let tickers: Vec<MiniTicker> =
            serde_json::from_str(text).context("Invalid miniTicker array")?;
        let prices = tickers
            .into_iter()
            .filter_map(|t| price_str(&t.c).map(|p| (t.s, p)))
            .collect();
        Ok(Parsed::Prices(prices))
    }

    fn to_venue_symbol(&self, _market: Market, canonical: &str) -> Result<String, StreamError> {
        Ok(canonical_symbol(canonical))
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol)
    }
}
