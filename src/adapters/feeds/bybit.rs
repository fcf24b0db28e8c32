//! Bybit v5 - Per-Symbol Ticker Topics
//!
//! `tickers.<SYMBOL>` on the spot and linear public endpoints. A subscribe
//! frame carries at most 10 topics. Linear pushes are snapshot + delta;
//! deltas omit unchanged fields, so a missing `lastPrice` is skipped.

use serde_json::{Value, json};
use std::time::Duration;
use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Parsed, TickerProtocol, frame_json, price_value, refusal, symbols_after, text_frame};
use super::supervisor::KeepAlive;
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

const SPOT_URL: &str = "wss://stream.bybit.com/v5/public/spot";
const LINEAR_URL: &str = "wss://stream.bybit.com/v5/public/linear";

/// Venue limit on topics per subscribe request.
const MAX_ARGS_PER_FRAME: usize = 10;

#[derive(Debug, Clone, Copy, Default)]
pub struct BybitProtocol;

impl BybitProtocol {
    fn op_frames(op: &str, symbols: &[String]) -> Vec<Message> {
        symbols
            .chunks(MAX_ARGS_PER_FRAME)
            .map(|chunk| {
                let args: Vec<String> = chunk.iter().map(|s| format!("tickers.{s}")).collect();
                text_frame(&json!({ "op": op, "args": args }))
            })
            .collect()
    }
}

impl TickerProtocol for BybitProtocol {
    fn venue(&self) -> Venue {
        Venue::Bybit
    }

    fn endpoint(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => SPOT_URL,
            Market::Futures => LINEAR_URL,
        }
    }

    fn feed_mode(&self, _market: Market) -> FeedMode {
        FeedMode::PerSymbol
    }

    fn keepalive(&self, _market: Market) -> Option<KeepAlive> {
        Some(KeepAlive {
            payload: text_frame(&json!({ "op": "ping" })),
            interval: Duration::from_secs(20),
        })
    }

    fn confirms_subscription(&self, _market: Market) -> bool {
        true
    }

    fn subscribe_frames(&self, _market: Market, symbols: &[String]) -> Vec<Message> {
        Self::op_frames("subscribe", symbols)
    }

    fn unsubscribe_frames(&self, _market: Market, symbols: &[String]) -> Vec<Message> {
        Self::op_frames("unsubscribe", symbols)
    }

    fn parse(&self, _market: Market, frame: &Message) -> anyhow::Result<Parsed> {
        let msg = frame_json(frame)?;

        if let Some(op) = msg.get("op").and_then(Value::as_str) {
            let success = msg.get("success").and_then(Value::as_bool).unwrap_or(false);
            return Ok(match op {
                "subscribe" if success => Parsed::Confirmed,
                "subscribe" => {
                    let reason = msg
                        .get("ret_msg")
                        .and_then(Value::as_str)
                        .unwrap_or("subscribe failed");
                    refusal(symbols_after(reason, "tickers."), reason)
                }
                _ => Parsed::Ignored,
            });
        }

        let is_ticker = msg
            .get("topic")
            .and_then(Value::as_str)
            .is_some_and(|t| t.starts_with("tickers."));
        if !is_ticker {
            return Ok(Parsed::Ignored);
        }

        let data = msg
            .get("data")
            .ok_or_else(|| anyhow::anyhow!("ticker push without data"))?;
        let symbol = data
            .get("symbol")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow::anyhow!("ticker push without symbol"))?;

        Ok(match data.get("lastPrice").and_then(price_value) {
            Some(price) => Parsed::Prices(vec![(symbol.to_string(), price)]),
            None => Parsed::Ignored,
        })
    }

    fn to_venue_symbol(&self, _market: Market, canonical: &str) -> Result<String, StreamError> {
        Ok(canonical_symbol(canonical))
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(frame: &Message) -> &str {
        match frame {
            Message::Text(t) => t.as_str(),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn test_subscribe_chunks_at_ten_topics() {
        let symbols: Vec<String> = (0..23).map(|i| format!("C{i}USDT")).collect();
        let frames = BybitProtocol.subscribe_frames(Market::Spot, &symbols);
        assert_eq!(frames.len(), 3);

        let first: Value = serde_json::from_str(text(&frames[0])).unwrap();
        assert_eq!(first["op"], "subscribe");
        assert_eq!(first["args"].as_array().unwrap().len(), 10);
        assert_eq!(first["args"][0], "tickers.C0USDT");
    }

    #[test]
    fn test_parse_ticker_push() {
        let frame = Message::Text(
            r#"{"topic":"tickers.BTCUSDT","type":"snapshot","data":{"symbol":"BTCUSDT","lastPrice":"64000.5"}}"#
                .to_string(),
        );
        assert_eq!(
            BybitProtocol.parse(Market::Spot, &frame).unwrap(),
            Parsed::Prices(vec![("BTCUSDT".to_string(), 64000.5)])
        );
    }

    #[test]
    fn test_delta_without_last_price_is_ignored() {
        let frame = Message::Text(
            r#"{"topic":"tickers.BTCUSDT","type":"delta","data":{"symbol":"BTCUSDT","fundingRate":"0.0001"}}"#
                .to_string(),
        );
        assert_eq!(BybitProtocol.parse(Market::Futures, &frame).unwrap(), Parsed::Ignored);
    }

    #[test]
    fn test_subscribe_ack_and_rejection() {
        let ok = Message::Text(r#"{"success":true,"ret_msg":"","op":"subscribe","conn_id":"x"}"#.to_string());
        assert_eq!(BybitProtocol.parse(Market::Spot, &ok).unwrap(), Parsed::Confirmed);

        let bad = Message::Text(
            r#"{"success":false,"ret_msg":"Invalid symbol :[tickers.NOPEUSDT]","op":"subscribe"}"#.to_string(),
        );
        assert_eq!(
            BybitProtocol.parse(Market::Spot, &bad).unwrap(),
            Parsed::Refused {
                symbols: vec!["NOPEUSDT".to_string()],
                reason: "Invalid symbol :[tickers.NOPEUSDT]".to_string(),
            }
        );

        let limited = Message::Text(r#"{"success":false,"ret_msg":"args size >10","op":"subscribe"}"#.to_string());
        assert_eq!(
            BybitProtocol.parse(Market::Spot, &limited).unwrap(),
            Parsed::Rejected("args size >10".to_string())
        );

        let pong = Message::Text(r#"{"success":true,"ret_msg":"pong","op":"ping"}"#.to_string());
        assert_eq!(BybitProtocol.parse(Market::Spot, &pong).unwrap(), Parsed::Ignored);
    }
}
