//! MEXC - Protobuf Spot Tickers, Aggregate JSON Futures
//!
//! Spot: one `spot@public.miniTicker.v3.api.pb@<SYMBOL>@UTC+8` channel per
//! symbol; acks and heartbeats are JSON text, pushes are binary protobuf.
//! Futures: `sub.tickers` streams every contract in one JSON frame.

use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::mexc_proto::{decode_push, push_body::Body};
use super::protocol::{
    Parsed, TickerProtocol, frame_json, join_pair, price_str, price_value, refusal, symbols_after, text_frame,
};
use super::supervisor::KeepAlive;
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

pub const SPOT_URL: &str = "wss://wbs-api.mexc.com/ws";
pub const FUTURES_URL: &str = "wss://contract.mexc.com/edge";

/// Spot channel name for one symbol's mini ticker.
pub fn mini_ticker_channel(symbol: &str) -> String {
    format!("spot@public.miniTicker.v3.api.pb@{symbol}@UTC+8")
}

/// `SUBSCRIPTION` / `UNSUBSCRIPTION` frame for spot channels.
pub fn spot_method_frame(method: &str, channels: Vec<String>) -> Vec<Message> {
    if channels.is_empty() {
        return Vec::new();
    }
    vec![text_frame(&json!({ "method": method, "params": channels }))]
}

pub fn spot_keepalive() -> KeepAlive {
    KeepAlive {
        payload: text_frame(&json!({ "method": "PING" })),
        interval: Duration::from_secs(20),
    }
}

pub fn futures_keepalive() -> KeepAlive {
    KeepAlive {
        payload: text_frame(&json!({ "method": "ping" })),
        interval: Duration::from_secs(15),
    }
}

/// Classify a spot JSON control frame (`{"id":0,"code":0,"msg":...}`).
///
/// Refused channels come back with `code: 0` and a
/// `Not Subscribed successfully! [<channel>]` message.
pub fn spot_control(msg: &Value) -> Parsed {
    let text = msg.get("msg").and_then(Value::as_str).unwrap_or_default();
    if text == "PONG" {
        return Parsed::Ignored;
    }
    let refused = text.starts_with("Not Subscribed");
    match msg.get("code").and_then(Value::as_i64) {
        Some(0) if !refused => Parsed::Confirmed,
        Some(_) => refusal(symbols_after(text, ".api.pb@"), text),
        None => Parsed::Ignored,
    }
}

/// Classify a futures control frame by channel (`rs.sub.*`, `rs.error`, `pong`).
pub fn futures_control(msg: &Value, channel: &str) -> Option<Parsed> {
    if channel == "rs.error" {
        return Some(Parsed::Rejected(
            msg.get("data").map_or_else(String::new, ToString::to_string),
        ));
    }
    if channel.starts_with("rs.sub.") {
        let ok = msg.get("data").and_then(Value::as_str) != Some("failed");
        return Some(if ok {
            Parsed::Confirmed
        } else {
            Parsed::Rejected(format!("{channel} failed"))
        });
    }
    (channel == "pong" || channel.starts_with("rs.")).then_some(Parsed::Ignored)
}

#[derive(Debug, Clone, Copy, Default)]
pub struct MexcProtocol;

impl MexcProtocol {
    fn parse_spot(frame: &Message) -> anyhow::Result<Parsed> {
        if let Message::Binary(bytes) = frame {
            let push = decode_push(bytes)?;
            return Ok(match push.body {
                Some(Body::PublicMiniTicker(ticker)) => {
                    let symbol = if ticker.symbol.is_empty() {
                        push.symbol.unwrap_or_default()
                    } else {
                        ticker.symbol
                    };
                    match price_str(&ticker.price) {
                        Some(price) if !symbol.is_empty() => Parsed::Prices(vec![(symbol, price)]),
                        _ => anyhow::bail!("mini ticker push without symbol or price"),
                    }
                }
                _ => Parsed::Ignored,
            });
        }
        Ok(spot_control(&frame_json(frame)?))
    }

    fn parse_futures(frame: &Message) -> anyhow::Result<Parsed> {
        let msg = frame_json(frame)?;
        let channel = msg.get("channel").and_then(Value::as_str).unwrap_or_default();
        if let Some(parsed) = futures_control(&msg, channel) {
            return Ok(parsed);
        }
        if channel != "push.tickers" {
            return Ok(Parsed::Ignored);
        }
        let data = msg
            .get("data")
            .and_then(Value::as_array)
            .ok_or_else(|| anyhow::anyhow!("push.tickers without data array"))?;
        let prices = data
            .iter()
            .filter_map(|t| {
                let symbol = t.get("symbol").and_then(Value::as_str)?;
                let last = t.get("lastPrice").and_then(price_value)?;
                Some((symbol.to_string(), last))
            })
            .collect();
        Ok(Parsed::Prices(prices))
    }
}

impl TickerProtocol for MexcProtocol {
    fn venue(&self) -> Venue {
        Venue::Mexc
    }

    fn endpoint(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => SPOT_URL,
            Market::Futures => FUTURES_URL,
        }
    }

    fn feed_mode(&self, market: Market) -> FeedMode {
        match market {
            Market::Spot => FeedMode::PerSymbol,
            Market::Futures => FeedMode::Aggregate,
        }
    }

    fn keepalive(&self, market: Market) -> Option<KeepAlive> {
        Some(match market {
            Market::Spot => spot_keepalive(),
            Market::Futures => futures_keepalive(),
        })
    }

    fn confirms_subscription(&self, _market: Market) -> bool {
        true
    }

    fn subscribe_frames(&self, market: Market, symbols: &[String]) -> Vec<Message> {
        match market {
            Market::Spot => spot_method_frame(
                "SUBSCRIPTION",
                symbols.iter().map(|s| mini_ticker_channel(s)).collect(),
            ),
            Market::Futures => vec![text_frame(&json!({ "method": "sub.tickers", "param": {} }))],
        }
    }

    fn unsubscribe_frames(&self, market: Market, symbols: &[String]) -> Vec<Message> {
        match market {
            Market::Spot => spot_method_frame(
                "UNSUBSCRIPTION",
                symbols.iter().map(|s| mini_ticker_channel(s)).collect(),
            ),
            Market::Futures => Vec::new(),
        }
    }

    fn parse(&self, market: Market, frame: &Message) -> anyhow::Result<Parsed> {
        match market {
            Market::Spot => Self::parse_spot(frame),
            Market::Futures => Self::parse_futures(frame),
        }
    }

    fn to_venue_symbol(&self, market: Market, canonical: &str) -> Result<String, StreamError> {
        let canonical = canonical_symbol(canonical);
        match market {
            Market::Spot => Ok(canonical),
            Market::Futures => join_pair(Venue::Mexc, &canonical, "_"),
        }
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol)
    }
}
