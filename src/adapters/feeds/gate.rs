//! Gate v4 - Per-Symbol Ticker Channels
//!
//! Spot and USDT futures live on different hosts with different channel
//! prefixes (`spot.*` / `futures.*`). Pairs are written `BTC_USDT`.
//! Every request carries a Unix-seconds `time` field.

use chrono::Utc;
use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Parsed, TickerProtocol, frame_json, join_pair, price_value, refusal, text_frame};
use super::supervisor::KeepAlive;
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

const SPOT_URL: &str = "wss://api.gateio.ws/ws/v4/";
const FUTURES_URL: &str = "wss://fx-ws.gateio.ws/v4/ws/usdt";

#[derive(Debug, Clone, Copy, Default)]
pub struct GateProtocol;

impl GateProtocol {
    const fn prefix(market: Market) -> &'static str {
        match market {
            Market::Spot => "spot",
            Market::Futures => "futures",
        }
    }

    fn event_frame(market: Market, event: &str, symbols: &[String]) -> Vec<Message> {
        if symbols.is_empty() {
            return Vec::new();
        }
        vec![text_frame(&json!({
            "time": Utc::now().timestamp(),
            "channel": format!("{}.tickers", Self::prefix(market)),
            "event": event,
            "payload": symbols,
        }))]
    }

    /// Subscribe error, scoped to the pairs it names (`unknown currency
    /// pair: FOO_USDT`) or to the echoed payload when that is a single pair.
    fn rejection(msg: &Value) -> Option<Parsed> {
        let error = msg.get("error").filter(|e| !e.is_null())?;
        let reason = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("subscribe failed");

        let mut pairs: Vec<String> = reason
            .split(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
            .filter(|t| {
                t.contains('_')
                    && t.chars().all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
            })
            .map(str::to_string)
            .collect();
        if pairs.is_empty() {
            if let Some([Value::String(only)]) = msg.get("payload").and_then(Value::as_array).map(Vec::as_slice) {
                pairs.push(only.clone());
            }
        }
        Some(refusal(pairs, reason))
    }
}

impl TickerProtocol for GateProtocol {
    fn venue(&self) -> Venue {
        Venue::Gate
    }

    fn endpoint(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => SPOT_URL,
            Market::Futures => FUTURES_URL,
        }
    }

    fn feed_mode(&self, _market: Market) -> FeedMode {
        FeedMode::PerSymbol
    }

    fn keepalive(&self, market: Market) -> Option<KeepAlive> {
        Some(KeepAlive {
            payload: text_frame(&json!({
                "time": Utc::now().timestamp(),
                "channel": format!("{}.ping", Self::prefix(market)),
            })),
            interval: Duration::from_secs(20),
        })
    }

    fn confirms_subscription(&self, _market: Market) -> bool {
        true
    }

    fn subscribe_frames(&self, market: Market, symbols: &[String]) -> Vec<Message> {
        Self::event_frame(market, "subscribe", symbols)
    }

    fn unsubscribe_frames(&self, market: Market, symbols: &[String]) -> Vec<Message> {
        Self::event_frame(market, "unsubscribe", symbols)
    }

    fn parse(&self, _market: Market, frame: &Message) -> anyhow::Result<Parsed> {
        let msg = frame_json(frame)?;
        let event = msg.get("event").and_then(Value::as_str).unwrap_or_default();
        let is_ticker = msg
            .get("channel")
            .and_then(Value::as_str)
            .is_some_and(|c| c.ends_with(".tickers"));

        match event {
            "subscribe" => {
                if let Some(refused) = Self::rejection(&msg) {
                    return Ok(refused);
                }
                let success = msg
                    .pointer("/result/status")
                    .and_then(Value::as_str)
                    .is_some_and(|s| s == "success");
                Ok(if success { Parsed::Confirmed } else { Parsed::Ignored })
            }
            "update" if is_ticker => {
                let result = msg
                    .get("result")
                    .ok_or_else(|| anyhow::anyhow!("ticker update without result"))?;
                // Spot pushes one object, futures an array of them.
                let entries: Vec<&Value> = match result {
                    Value::Array(items) => items.iter().collect(),
                    single => vec![single],
                };
                let prices = entries
                    .into_iter()
                    .filter_map(|t| {
                        let symbol = t
                            .get("currency_pair")
                            .or_else(|| t.get("contract"))
                            .and_then(Value::as_str)?;
                        let last = t.get("last").and_then(price_value)?;
                        Some((symbol.to_string(), last))
                    })
                    .collect();
                Ok(Parsed::Prices(prices))
            }
            _ => Ok(Parsed::Ignored),
        }
    }

    fn to_venue_symbol(&self, _market: Market, canonical: &str) -> Result<String, StreamError> {
        join_pair(Venue::Gate, &canonical_symbol(canonical), "_")
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subscribe_frame_uses_market_channel() {
        let frames = GateProtocol.subscribe_frames(Market::Futures, &["BTC_USDT".to_string()]);
        let Message::Text(text) = &frames[0] else { panic!("text frame expected") };
        let v: Value = serde_json::from_str(text).unwrap();
        assert_eq!(v["channel"], "futures.tickers");
        assert_eq!(v["event"], "subscribe");
        assert_eq!(v["payload"], json!(["BTC_USDT"]));
        assert!(v["time"].is_i64());
    }

    #[test]
    fn test_parse_spot_and_futures_updates() {
        let spot = Message::Text(
            r#"{"time":1,"channel":"spot.tickers","event":"update","result":{"currency_pair":"BTC_USDT","last":"19106.55"}}"#
                .to_string(),
        );
        assert_eq!(
            GateProtocol.parse(Market::Spot, &spot).unwrap(),
            Parsed::Prices(vec![("BTC_USDT".to_string(), 19106.55)])
        );

        let futures = Message::Text(
            r#"{"time":1,"channel":"futures.tickers","event":"update","result":[{"contract":"ETH_USDT","last":"1800.1"}]}"#
                .to_string(),
        );
        assert_eq!(
            GateProtocol.parse(Market::Futures, &futures).unwrap(),
            Parsed::Prices(vec![("ETH_USDT".to_string(), 1800.1)])
        );
    }

    #[test]
    fn test_subscribe_ack_and_error() {
        let ok = Message::Text(
            r#"{"time":1,"channel":"spot.tickers","event":"subscribe","error":null,"result":{"status":"success"}}"#
                .to_string(),
        );
        assert_eq!(GateProtocol.parse(Market::Spot, &ok).unwrap(), Parsed::Confirmed);

        let bad = Message::Text(
            r#"{"time":1,"channel":"spot.tickers","event":"subscribe","error":{"code":2,"message":"unknown currency pair"},"result":null}"#
                .to_string(),
        );
        assert_eq!(
            GateProtocol.parse(Market::Spot, &bad).unwrap(),
            Parsed::Rejected("unknown currency pair".to_string())
        );

        let named = Message::Text(
            r#"{"time":1,"channel":"spot.tickers","event":"subscribe","error":{"code":2,"message":"unknown currency pair: TYPO_USDT"},"result":null}"#
                .to_string(),
        );
        assert_eq!(
            GateProtocol.parse(Market::Spot, &named).unwrap(),
            Parsed::Refused {
                symbols: vec!["TYPO_USDT".to_string()],
                reason: "unknown currency pair: TYPO_USDT".to_string(),
            }
        );

        let echoed = Message::Text(
            r#"{"time":1,"channel":"futures.tickers","event":"subscribe","payload":["NOPE_USDT"],"error":{"code":2,"message":"invalid argument"},"result":null}"#
                .to_string(),
        );
        assert!(matches!(
            GateProtocol.parse(Market::Futures, &echoed).unwrap(),
            Parsed::Refused { symbols, .. } if symbols == vec!["NOPE_USDT".to_string()]
        ));

        let pong = Message::Text(r#"{"time":1,"channel":"spot.pong","event":"","result":null}"#.to_string());
        assert_eq!(GateProtocol.parse(Market::Spot, &pong).unwrap(), Parsed::Ignored);
    }

    #[test]
    fn test_symbol_mapping() {
        assert_eq!(GateProtocol.to_venue_symbol(Market::Spot, "ethbtc").unwrap(), "ETH_BTC");
        assert_eq!(GateProtocol.to_canonical(Market::Futures, "ETH_USDT"), "ETHUSDT");
    }
}
