//! OKX v5 - Per-Symbol Ticker Channel
//!
//! Instruments are `BTC-USDT` on spot and `BTC-USDT-SWAP` for perpetuals.
//! The server drops connections idle for 30 s, so a text `ping` goes out
//! every 25 s and the literal `pong` reply is swallowed.

use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{
    Parsed, TickerProtocol, frame_json, frame_text, join_pair, price_value, refusal, symbols_after, text_frame,
};
use super::supervisor::KeepAlive;
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

pub const PUBLIC_URL: &str = "wss://ws.okx.com:8443/ws/v5/public";

const SWAP_SUFFIX: &str = "-SWAP";

/// Text heartbeat shared by the public and business endpoints.
pub fn okx_keepalive() -> KeepAlive {
    KeepAlive {
        payload: Message::Text("ping".to_string()),
        interval: Duration::from_secs(25),
    }
}

/// Classify an OKX event frame (`subscribe`, `error`, anything else).
///
/// Errors naming an `instId` refuse that instrument only.
pub fn okx_event(msg: &Value) -> Option<Parsed> {
    let event = msg.get("event").and_then(Value::as_str)?;
    Some(match event {
        "subscribe" => Parsed::Confirmed,
        "error" => {
            let text = msg.get("msg").and_then(Value::as_str).unwrap_or("");
            let reason = format!(
                "{} {}",
                msg.get("code").and_then(Value::as_str).unwrap_or("?"),
                text
            );
            refusal(symbols_after(text, "instId:"), reason)
        }
        _ => Parsed::Ignored,
    })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct OkxProtocol;

impl OkxProtocol {
    fn op_frame(op: &str, symbols: &[String]) -> Vec<Message> {
        if symbols.is_empty() {
            return Vec::new();
        }
        let args: Vec<Value> = symbols
            .iter()
            .map(|inst_id| json!({ "channel": "tickers", "instId": inst_id }))
            .collect();
        vec![text_frame(&json!({ "op": op, "args": args }))]
    }
}

impl TickerProtocol for OkxProtocol {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn endpoint(&self, _market: Market) -> &'static str {
        PUBLIC_URL
    }

    fn feed_mode(&self, _market: Market) -> FeedMode {
        FeedMode::PerSymbol
    }

    fn keepalive(&self, _market: Market) -> Option<KeepAlive> {
        Some(okx_keepalive())
    }

    fn confirms_subscription(&self, _market: Market) -> bool {
        true
    }

    fn expected_acks(&self, _market: Market, symbols: &[String], _frames: &[Message]) -> usize {
        symbols.len()
    }

    fn subscribe_frames(&self, _market: Market, symbols: &[String]) -> Vec<Message> {
        Self::op_frame("subscribe", symbols)
    }

    fn unsubscribe_frames(&self, _market: Market, symbols: &[String]) -> Vec<Message> {
        Self::op_frame("unsubscribe", symbols)
    }

    fn parse(&self, _market: Market, frame: &Message) -> anyhow::Result<Parsed> {
        if frame_text(frame) == Some("pong") {
            return Ok(Parsed::Ignored);
        }
        let msg = frame_json(frame)?;
        if let Some(parsed) = okx_event(&msg) {
            return Ok(parsed);
        }

        let Some(data) = msg.get("data").and_then(Value::as_array) else {
            return Ok(Parsed::Ignored);
        };
        let prices = data
            .iter()
            .filter_map(|t| {
                let inst_id = t.get("instId").and_then(Value::as_str)?;
                let last = t.get("last").and_then(price_value)?;
                Some((inst_id.to_string(), last))
            })
            .collect();
        Ok(Parsed::Prices(prices))
    }

    fn to_venue_symbol(&self, market: Market, canonical: &str) -> Result<String, StreamError> {
        let pair = join_pair(Venue::Okx, &canonical_symbol(canonical), "-")?;
        Ok(match market {
            Market::Spot => pair,
            Market::Futures => format!("{pair}{SWAP_SUFFIX}"),
        })
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol.strip_suffix(SWAP_SUFFIX).unwrap_or(venue_symbol))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_symbol_mapping_round_trip() {
        let okx = OkxProtocol;
        assert_eq!(okx.to_venue_symbol(Market::Spot, "BTCUSDT").unwrap(), "BTC-USDT");
        assert_eq!(okx.to_venue_symbol(Market::Futures, "ETHUSDT").unwrap(), "ETH-USDT-SWAP");
        assert_eq!(okx.to_canonical(Market::Futures, "ETH-USDT-SWAP"), "ETHUSDT");
        assert_eq!(okx.to_canonical(Market::Spot, "SOL-USDC"), "SOLUSDC");
    }

    #[test]
    fn test_subscribe_frame_shape() {
        let frames = OkxProtocol.subscribe_frames(Market::Spot, &["BTC-USDT".to_string()]);
        let Message::Text(text) = &frames[0] else { panic!("text frame expected") };
        let v: Value = serde_json::from_str(text).unwrap();
        assert_eq!(v, json!({"op":"subscribe","args":[{"channel":"tickers","instId":"BTC-USDT"}]}));
        assert!(OkxProtocol.subscribe_frames(Market::Spot, &[]).is_empty());
    }

    #[test]
    fn test_parse_ticker_push_and_events() {
        let push = Message::Text(
            r#"{"arg":{"channel":"tickers","instId":"BTC-USDT"},"data":[{"instType":"SPOT","instId":"BTC-USDT","last":"9999.99"}]}"#
                .to_string(),
        );
        assert_eq!(
            OkxProtocol.parse(Market::Spot, &push).unwrap(),
            Parsed::Prices(vec![("BTC-USDT".to_string(), 9999.99)])
        );

        let ack = Message::Text(r#"{"event":"subscribe","arg":{"channel":"tickers","instId":"BTC-USDT"}}"#.to_string());
        assert_eq!(OkxProtocol.parse(Market::Spot, &ack).unwrap(), Parsed::Confirmed);

        let err = Message::Text(r#"{"event":"error","code":"60012","msg":"Invalid request"}"#.to_string());
        assert_eq!(
            OkxProtocol.parse(Market::Spot, &err).unwrap(),
            Parsed::Rejected("60012 Invalid request".to_string())
        );

        let pong = Message::Text("pong".to_string());
        assert_eq!(OkxProtocol.parse(Market::Spot, &pong).unwrap(), Parsed::Ignored);
    }

    #[test]
    fn test_unknown_instrument_is_refused_alone() {
        let err = Message::Text(
            r#"{"event":"error","code":"60018","msg":"Wrong URL or channel:tickers,instId:TYPO-USDT-SWAP doesn't exist.","connId":"a4d3ae55"}"#
                .to_string(),
        );
        let Parsed::Refused { symbols, reason } = OkxProtocol.parse(Market::Futures, &err).unwrap() else {
            panic!("symbol-level refusal expected");
        };
        assert_eq!(symbols, vec!["TYPO-USDT-SWAP"]);
        assert!(reason.starts_with("60018"));
    }

    #[test]
    fn test_one_ack_per_instrument() {
        let symbols = vec!["BTC-USDT".to_string(), "ETH-USDT".to_string()];
        let frames = OkxProtocol.subscribe_frames(Market::Spot, &symbols);
        assert_eq!(frames.len(), 1);
        assert_eq!(OkxProtocol.expected_acks(Market::Spot, &symbols, &frames), 2);
    }
}
