//! MEXC spot v3 push messages (protobuf).
//!
//! Hand-declared prost messages covering the subset of
//! `PushDataV3ApiWrapper` the feeds read. Unknown fields and the other
//! `body` variants are skipped by the decoder.

use prost::Message;

#[derive(Clone, PartialEq, prost::Message)]
pub struct PushDataV3ApiWrapper {
    #[prost(string, tag = "1")]
    pub channel: String,
    #[prost(string, optional, tag = "3")]
    pub symbol: Option<String>,
    #[prost(string, optional, tag = "4")]
    pub symbol_id: Option<String>,
    #[prost(int64, optional, tag = "5")]
    pub create_time: Option<i64>,
    #[prost(int64, optional, tag = "6")]
    pub send_time: Option<i64>,
    #[prost(oneof = "push_body::Body", tags = "308, 309")]
    pub body: Option<push_body::Body>,
}

pub mod push_body {
    #[derive(Clone, PartialEq, prost::Oneof)]
    pub enum Body {
        #[prost(message, tag = "308")]
        PublicSpotKline(super::PublicSpotKlineV3Api),
        #[prost(message, tag = "309")]
        PublicMiniTicker(super::PublicMiniTickerV3Api),
    }
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PublicMiniTickerV3Api {
    #[prost(string, tag = "1")]
    pub symbol: String,
    #[prost(string, tag = "2")]
    pub price: String,
    #[prost(string, tag = "3")]
    pub rate: String,
    #[prost(string, tag = "5")]
    pub high: String,
    #[prost(string, tag = "6")]
    pub low: String,
    #[prost(string, tag = "7")]
    pub volume: String,
    #[prost(string, tag = "8")]
    pub quantity: String,
}

#[derive(Clone, PartialEq, prost::Message)]
pub struct PublicSpotKlineV3Api {
    /// `Min1`, `Min5`, ...
    #[prost(string, tag = "1")]
    pub interval: String,
    /// Window start, Unix seconds.
    #[prost(int64, tag = "2")]
    pub window_start: i64,
    #[prost(string, tag = "3")]
    pub opening_price: String,
    #[prost(string, tag = "4")]
    pub closing_price: String,
    #[prost(string, tag = "5")]
    pub highest_price: String,
    #[prost(string, tag = "6")]
    pub lowest_price: String,
    /// Base-asset volume.
    #[prost(string, tag = "7")]
    pub volume: String,
    /// Quote-asset turnover.
    #[prost(string, tag = "8")]
    pub amount: String,
    #[prost(int64, tag = "9")]
    pub window_end: i64,
}

/// Decode one binary push frame.
pub fn decode_push(bytes: &[u8]) -> Result<PushDataV3ApiWrapper, prost::DecodeError> {
    PushDataV3ApiWrapper::decode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mini_ticker_decodes_after_encode() {
        let push = PushDataV3ApiWrapper {
            channel: "spot@public.miniTicker.v3.api.pb@BTCUSDT@UTC+8".to_string(),
            symbol: Some("BTCUSDT".to_string()),
            send_time: Some(1_736_412_345_000),
            body: Some(push_body::Body::PublicMiniTicker(PublicMiniTickerV3Api {
                symbol: "BTCUSDT".to_string(),
                price: "93012.5".to_string(),
                ..Default::default()
            })),
            ..Default::default()
        };
        let decoded = decode_push(&push.encode_to_vec()).unwrap();
        assert_eq!(decoded, push);
    }

    #[test]
    fn test_garbage_fails_to_decode() {
        assert!(decode_push(&[0xff, 0xff, 0xff]).is_err());
    }
}
