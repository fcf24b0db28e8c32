//! Exchange Protocol Capability - One Trait, Six Venues
//!
//! Every venue adapter is a zero-sized type implementing
//! [`TickerProtocol`]. Shared code never branches on the venue; it asks
//! [`Venue::ticker_protocol`] for the adapter and calls through the trait.

use serde_json::Value;
use tokio_tungstenite::tungstenite::Message;

use super::binance::BinanceProtocol;
use super::bitget::BitgetProtocol;
use super::bybit::BybitProtocol;
use super::gate::GateProtocol;
use super::mexc::MexcProtocol;
use super::okx::OkxProtocol;
use super::supervisor::KeepAlive;
use crate::domain::market::{FeedMode, Market, Venue};
use crate::error::StreamError;

/// Outcome of parsing one inbound frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Parsed {
    /// Venue symbol -> last price.
    Prices(Vec<(String, f64)>),
    /// Subscription acknowledged.
    Confirmed,
    /// Application-level answer the venue expects (e.g. `pong`).
    Reply(Message),
    /// Subscription refused for the whole connection; it is recycled.
    Rejected(String),
    /// The venue refused specific instruments (venue naming). The rest of
    /// the request stands and the socket stays up.
    Refused { symbols: Vec<String>, reason: String },
    /// Heartbeat ack, info event or anything else without prices.
    Ignored,
}

/// Wire protocol of one venue's ticker feeds.
pub trait TickerProtocol: Send + Sync + 'static {
    fn venue(&self) -> Venue;

    /// WebSocket URL (REST base URL for polling venues).
    fn endpoint(&self, market: Market) -> &'static str;

    fn feed_mode(&self, market: Market) -> FeedMode;

    /// Client heartbeat, if the venue drops silent clients.
    fn keepalive(&self, _market: Market) -> Option<KeepAlive> {
        None
    }

    /// Whether subscribe frames are acknowledged by the venue.
    fn confirms_subscription(&self, _market: Market) -> bool {
        false
    }

    /// Acknowledgements the venue sends for one subscribe request.
    ///
    /// One per frame unless the venue answers every argument separately.
    fn expected_acks(&self, _market: Market, _symbols: &[String], frames: &[Message]) -> usize {
        frames.len()
    }

    /// Subscribe frames for venue-native symbols.
    ///
    /// Aggregate feeds ignore `symbols` and return the frame (if any)
    /// that starts the all-symbols stream.
    fn subscribe_frames(&self, market: Market, symbols: &[String]) -> Vec<Message>;

    /// Unsubscribe frames; empty where the venue has no such operation.
    fn unsubscribe_frames(&self, _market: Market, _symbols: &[String]) -> Vec<Message> {
        Vec::new()
    }

    /// Parse one inbound frame. Errors are dropped by the caller.
    fn parse(&self, market: Market, frame: &Message) -> anyhow::Result<Parsed>;

    /// Canonical `BASEQUOTE` -> venue instrument name.
    fn to_venue_symbol(&self, market: Market, canonical: &str) -> Result<String, StreamError>;

    /// Venue instrument name -> canonical `BASEQUOTE`.
    fn to_canonical(&self, market: Market, venue_symbol: &str) -> String;
}

static BINANCE: BinanceProtocol = BinanceProtocol;
static BYBIT: BybitProtocol = BybitProtocol;
static OKX: OkxProtocol = OkxProtocol;
static GATE: GateProtocol = GateProtocol;
static MEXC: MexcProtocol = MexcProtocol;
static BITGET: BitgetProtocol = BitgetProtocol;

impl Venue {
    /// Wire protocol adapter for this venue.
    pub fn ticker_protocol(self) -> &'static dyn TickerProtocol {
        match self {
            Self::Binance => &BINANCE,
            Self::Bybit => &BYBIT,
            Self::Okx => &OKX,
            Self::Gate => &GATE,
            Self::Mexc => &MEXC,
            Self::Bitget => &BITGET,
        }
    }
}

/// Text payload of a frame, if it has one.
pub(crate) fn frame_text(frame: &Message) -> Option<&str> {
    match frame {
        Message::Text(text) => Some(text.as_str()),
        _ => None,
    }
}

/// Parse a JSON text frame; binary frames are an error.
pub(crate) fn frame_json(frame: &Message) -> anyhow::Result<Value> {
    let text = frame_text(frame).ok_or_else(|| anyhow::anyhow!("expected a text frame"))?;
    Ok(serde_json::from_str(text)?)
}

/// Price from a JSON string or number. Rejects non-finite and non-positive values.
pub(crate) fn price_value(value: &Value) -> Option<f64> {
    let price = match value {
        Value::String(s) => s.trim().parse::<f64>().ok()?,
        Value::Number(n) => n.as_f64()?,
        _ => return None,
    };
    (price.is_finite() && price > 0.0).then_some(price)
}

/// Parse a price carried as a decimal string.
pub(crate) fn price_str(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|p| p.is_finite() && *p > 0.0)
}

/// Insert `sep` between base and quote of a canonical symbol.
pub(crate) fn join_pair(venue: Venue, canonical: &str, sep: &str) -> Result<String, StreamError> {
    crate::domain::market::split_canonical(canonical)
        .map(|(base, quote)| format!("{base}{sep}{quote}"))
        .ok_or_else(|| StreamError::UnmappableSymbol {
            venue,
            symbol: canonical.to_string(),
        })
}

/// Instrument names that follow `marker` in a venue error text, e.g.
/// `tickers.` in `Invalid symbol :[tickers.FOOUSDT]`.
pub(crate) fn symbols_after(text: &str, marker: &str) -> Vec<String> {
    let mut symbols: Vec<String> = text
        .match_indices(marker)
        .filter_map(|(at, _)| {
            let rest = &text[at + marker.len()..];
            let end = rest
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '-' || c == '_'))
                .unwrap_or(rest.len());
            (end > 0).then(|| rest[..end].to_string())
        })
        .collect();
    symbols.sort();
    symbols.dedup();
    symbols
}

/// Symbol-level refusal when the error names instruments, otherwise a
/// connection-level rejection.
pub(crate) fn refusal(symbols: Vec<String>, reason: impl Into<String>) -> Parsed {
    let reason = reason.into();
    if symbols.is_empty() {
        Parsed::Rejected(reason)
    } else {
        Parsed::Refused { symbols, reason }
    }
}

pub(crate) fn text_frame(value: &Value) -> Message {
    Message::Text(value.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_table_lookup_matches_venue() {
        for venue in Venue::ALL {
            assert_eq!(venue.ticker_protocol().venue(), venue);
        }
    }

    #[test]
    fn test_price_value_accepts_strings_and_numbers() {
        assert_eq!(price_value(&json!("101.5")), Some(101.5));
        assert_eq!(price_value(&json!(42)), Some(42.0));
        assert_eq!(price_value(&json!("")), None);
        assert_eq!(price_value(&json!("0")), None);
        assert_eq!(price_value(&json!(null)), None);
    }

    #[test]
    fn test_refusal_names_symbols_or_falls_back() {
        let text = "Invalid symbol :[tickers.TYPOUSDT, tickers.FOO_BAR]";
        assert_eq!(symbols_after(text, "tickers."), vec!["FOO_BAR", "TYPOUSDT"]);
        assert_eq!(
            refusal(symbols_after(text, "tickers."), text),
            Parsed::Refused {
                symbols: vec!["FOO_BAR".to_string(), "TYPOUSDT".to_string()],
                reason: text.to_string(),
            }
        );
        assert_eq!(
            refusal(symbols_after("too many requests", "tickers."), "too many requests"),
            Parsed::Rejected("too many requests".to_string())
        );
    }

    #[test]
    fn test_join_pair() {
        assert_eq!(join_pair(Venue::Okx, "BTCUSDT", "-").unwrap(), "BTC-USDT");
        assert!(join_pair(Venue::Gate, "NOPE", "_").is_err());
    }
}
