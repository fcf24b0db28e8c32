//! Kline Streams - OKX and MEXC Candle Feeds
//!
//! One socket per (venue, market) carries every kline subscription of
//! that feed. Sub-minute intervals ride the venue's 1-minute channel and
//! are expanded by the resampler; native intervals are forwarded as-is.
//!
//! Venues without a closed flag (both MEXC markets) get one extra
//! `is_closed = true` emission of the previous window when a push for a
//! newer window arrives.
//!
//! A channel the venue refuses loses its routes; other channels on the
//! socket keep streaming.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use serde_json::{Value, json};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::mexc::{self, futures_control, spot_control, spot_method_frame};
use super::mexc_proto::{decode_push, push_body::Body};
use super::okx::{self, okx_event};
use super::protocol::{Parsed, frame_json, frame_text, price_str, price_value, text_frame};
use super::supervisor::{
    ConnectionHandler, KeepAlive, Outbound, Reaction, Supervisor, SupervisorConfig, SupervisorHandle,
};
use super::ticker_session::TickerTiming;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::candle::{Candle, KlineInterval};
use crate::domain::market::{FeedKey, Market, Venue};
use crate::domain::resampler::{CandleTracker, resample};
use crate::error::StreamError;
use crate::ports::market_feed::CandleSink;

pub const OKX_BUSINESS_URL: &str = "wss://ws.okx.com:8443/ws/v5/business";

/// One kline subscription as the owner sees it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct KlineKey {
    /// Canonical symbol.
    pub symbol: String,
    /// Requested interval (may be sub-minute).
    pub interval: KlineInterval,
    pub market: Market,
}

impl fmt::Display for KlineKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}:{}", self.symbol, self.interval, self.market)
    }
}

/// A venue channel: `(venue symbol, venue interval code)`.
pub type ChannelId = (String, String);

/// One candle push, still in venue naming.
#[derive(Debug, Clone, PartialEq)]
pub struct KlinePush {
    pub venue_symbol: String,
    pub code: String,
    pub candle: Candle,
}

#[derive(Debug, Clone, PartialEq)]
pub enum KlineParsed {
    Candles(Vec<KlinePush>),
    Control(Parsed),
}

/// Wire protocol of one venue's kline feeds.
pub trait KlineProtocol: Send + Sync + 'static {
    fn venue(&self) -> Venue;
    fn endpoint(&self, market: Market) -> &'static str;
    fn keepalive(&self, market: Market) -> Option<KeepAlive>;

    /// Venue code for a native interval; `None` if not served.
    fn interval_code(&self, market: Market, interval: KlineInterval) -> Option<&'static str>;

    fn subscribe_frames(&self, market: Market, channels: &[ChannelId]) -> Vec<Message>;

    /// Acknowledgements owed for one subscribe request.
    fn expected_acks(&self, _market: Market, _channels: &[ChannelId], frames: &[Message]) -> usize {
        frames.len()
    }

    fn unsubscribe_frames(&self, market: Market, channels: &[ChannelId]) -> Vec<Message>;
    fn parse(&self, market: Market, frame: &Message) -> anyhow::Result<KlineParsed>;

    /// Whether pushes say when a window is final.
    fn has_closed_flag(&self, market: Market) -> bool;

    fn to_venue_symbol(&self, market: Market, canonical: &str) -> Result<String, StreamError> {
        self.venue().ticker_protocol().to_venue_symbol(market, canonical)
    }
}

static OKX_KLINES: OkxKlines = OkxKlines;
static MEXC_KLINES: MexcKlines = MexcKlines;

impl Venue {
    /// Kline adapter, for venues that stream candles.
    pub fn kline_protocol(self) -> Option<&'static dyn KlineProtocol> {
        match self {
            Self::Okx => Some(&OKX_KLINES),
            Self::Mexc => Some(&MEXC_KLINES),
            Self::Binance | Self::Bybit | Self::Gate | Self::Bitget => None,
        }
    }
}

/// Resolve the venue channel for a subscription, validating the interval.
pub fn channel_for(
    protocol: &dyn KlineProtocol,
    key: &KlineKey,
) -> Result<ChannelId, StreamError> {
    let code = protocol
        .interval_code(key.market, key.interval.source())
        .ok_or(StreamError::UnsupportedInterval {
            venue: protocol.venue(),
            interval: key.interval,
        })?;
    let symbol = protocol.to_venue_symbol(key.market, &key.symbol)?;
    Ok((symbol, code.to_string()))
}

// ---- OKX ----

#[derive(Debug, Clone, Copy, Default)]
pub struct OkxKlines;

impl OkxKlines {
    fn op_frame(op: &str, channels: &[ChannelId]) -> Vec<Message> {
        if channels.is_empty() {
            return Vec::new();
        }
        let args: Vec<Value> = channels
            .iter()
            .map(|(inst_id, code)| json!({ "channel": code, "instId": inst_id }))
            .collect();
        vec![text_frame(&json!({ "op": op, "args": args }))]
    }

    /// `[ts, o, h, l, c, vol, volCcy, volCcyQuote, confirm]`
    fn candle(row: &[Value]) -> Option<Candle> {
        let field = |i: usize| row.get(i).and_then(Value::as_str);
        Some(Candle {
            open_time_ms: field(0)?.parse().ok()?,
            open: price_str(field(1)?)?,
            high: price_str(field(2)?)?,
            low: price_str(field(3)?)?,
            close: price_str(field(4)?)?,
            volume: field(5)?.parse().ok()?,
            is_closed: field(8) == Some("1"),
        })
    }
}

impl KlineProtocol for OkxKlines {
    fn venue(&self) -> Venue {
        Venue::Okx
    }

    fn endpoint(&self, _market: Market) -> &'static str {
        OKX_BUSINESS_URL
    }

    fn keepalive(&self, _market: Market) -> Option<KeepAlive> {
        Some(okx::okx_keepalive())
    }

    fn interval_code(&self, _market: Market, interval: KlineInterval) -> Option<&'static str> {
        match interval {
            KlineInterval::M1 => Some("candle1m"),
            KlineInterval::M3 => Some("candle3m"),
            KlineInterval::M5 => Some("candle5m"),
            KlineInterval::M15 => Some("candle15m"),
            KlineInterval::M30 => Some("candle30m"),
            KlineInterval::H1 => Some("candle1H"),
            KlineInterval::H4 => Some("candle4H"),
            KlineInterval::D1 => Some("candle1D"),
            KlineInterval::S1 | KlineInterval::S5 | KlineInterval::S15 => None,
        }
    }

    fn subscribe_frames(&self, _market: Market, channels: &[ChannelId]) -> Vec<Message> {
        Self::op_frame("subscribe", channels)
    }

    fn expected_acks(&self, _market: Market, channels: &[ChannelId], _frames: &[Message]) -> usize {
        channels.len()
    }

    fn unsubscribe_frames(&self, _market: Market, channels: &[ChannelId]) -> Vec<Message> {
        Self::op_frame("unsubscribe", channels)
    }

    fn parse(&self, _market: Market, frame: &Message) -> anyhow::Result<KlineParsed> {
        if frame_text(frame) == Some("pong") {
            return Ok(KlineParsed::Control(Parsed::Ignored));
        }
        let msg = frame_json(frame)?;
        if let Some(parsed) = okx_event(&msg) {
            return Ok(KlineParsed::Control(parsed));
        }
        let (Some(code), Some(inst_id)) = (
            msg.pointer("/arg/channel").and_then(Value::as_str),
            msg.pointer("/arg/instId").and_then(Value::as_str),
        ) else {
            return Ok(KlineParsed::Control(Parsed::Ignored));
        };
        let rows = msg
            .get("data")
            .and_then(Value::as_array)
            .context("candle push without data")?;
        let mut pushes = Vec::with_capacity(rows.len());
        for row in rows {
            let candle = row
                .as_array()
                .and_then(|r| Self::candle(r))
                .context("malformed candle row")?;
            pushes.push(KlinePush {
                venue_symbol: inst_id.to_string(),
                code: code.to_string(),
                candle,
            });
        }
        Ok(KlineParsed::Candles(pushes))
    }

    fn has_closed_flag(&self, _market: Market) -> bool {
        true
    }
}

// ---- MEXC ----

#[derive(Debug, Clone, Copy, Default)]
pub struct MexcKlines;

impl MexcKlines {
    fn spot_channel(symbol: &str, code: &str) -> String {
        format!("spot@public.kline.v3.api.pb@{symbol}@{code}")
    }

    fn futures_frames(method: &str, channels: &[ChannelId]) -> Vec<Message> {
        channels
            .iter()
            .map(|(symbol, code)| {
                text_frame(&json!({ "method": method, "param": { "symbol": symbol, "interval": code } }))
            })
            .collect()
    }

    fn parse_spot(frame: &Message) -> anyhow::Result<KlineParsed> {
        let Message::Binary(bytes) = frame else {
            return Ok(KlineParsed::Control(spot_control(&frame_json(frame)?)));
        };
        let push = decode_push(bytes)?;
        let Some(Body::PublicSpotKline(kline)) = push.body else {
            return Ok(KlineParsed::Control(Parsed::Ignored));
        };
        // Channel: spot@public.kline.v3.api.pb@<SYMBOL>@<CODE>
        let symbol = push
            .symbol
            .or_else(|| push.channel.split('@').nth(2).map(str::to_string))
            .context("kline push without symbol")?;
        let candle = Candle {
            open_time_ms: kline
                .window_start
                .checked_mul(1000)
                .context("window start out of range")?,
            open: price_str(&kline.opening_price).context("bad open")?,
            high: price_str(&kline.highest_price).context("bad high")?,
            low: price_str(&kline.lowest_price).context("bad low")?,
            close: price_str(&kline.closing_price).context("bad close")?,
            volume: kline.volume.parse().context("bad volume")?,
            is_closed: false,
        };
        Ok(KlineParsed::Candles(vec![KlinePush {
            venue_symbol: symbol,
            code: kline.interval,
            candle,
        }]))
    }

    fn parse_futures(frame: &Message) -> anyhow::Result<KlineParsed> {
        let msg = frame_json(frame)?;
        let channel = msg.get("channel").and_then(Value::as_str).unwrap_or_default();
        if let Some(parsed) = futures_control(&msg, channel) {
            return Ok(KlineParsed::Control(parsed));
        }
        if channel != "push.kline" {
            return Ok(KlineParsed::Control(Parsed::Ignored));
        }
        let data = msg.get("data").context("push.kline without data")?;
        let text = |name: &str| data.get(name).and_then(Value::as_str).map(str::to_string);
        let num = |name: &str| data.get(name).and_then(price_value);
        let symbol = text("symbol")
            .or_else(|| msg.get("symbol").and_then(Value::as_str).map(str::to_string))
            .context("push.kline without symbol")?;
        let candle = Candle {
            open_time_ms: data
                .get("t")
                .and_then(Value::as_i64)
                .context("missing t")?
                .checked_mul(1000)
                .context("t out of range")?,
            open: num("o").context("bad open")?,
            high: num("h").context("bad high")?,
            low: num("l").context("bad low")?,
            close: num("c").context("bad close")?,
            volume: data.get("q").and_then(Value::as_f64).unwrap_or(0.0),
            is_closed: false,
        };
        Ok(KlineParsed::Candles(vec![KlinePush {
            venue_symbol: symbol,
            code: text("interval").context("push.kline without interval")?,
            candle,
        }]))
    }
}

impl KlineProtocol for MexcKlines {
    fn venue(&self) -> Venue {
        Venue::Mexc
    }

    fn endpoint(&self, market: Market) -> &'static str {
        match market {
            Market::Spot => mexc::SPOT_URL,
            Market::Futures => mexc::FUTURES_URL,
        }
    }

    fn keepalive(&self, market: Market) -> Option<KeepAlive> {
        Some(match market {
            Market::Spot => mexc::spot_keepalive(),
            Market::Futures => mexc::futures_keepalive(),
        })
    }

    fn interval_code(&self, _market: Market, interval: KlineInterval) -> Option<&'static str> {
        match interval {
            KlineInterval::M1 => Some("Min1"),
            KlineInterval::M5 => Some("Min5"),
            KlineInterval::M15 => Some("Min15"),
            KlineInterval::M30 => Some("Min30"),
            KlineInterval::H1 => Some("Min60"),
            KlineInterval::H4 => Some("Hour4"),
            KlineInterval::D1 => Some("Day1"),
            KlineInterval::S1 | KlineInterval::S5 | KlineInterval::S15 | KlineInterval::M3 => None,
        }
    }

    fn subscribe_frames(&self, market: Market, channels: &[ChannelId]) -> Vec<Message> {
        match market {
            Market::Spot => spot_method_frame(
                "SUBSCRIPTION",
                channels.iter().map(|(s, c)| Self::spot_channel(s, c)).collect(),
            ),
            Market::Futures => Self::futures_frames("sub.kline", channels),
        }
    }

    fn unsubscribe_frames(&self, market: Market, channels: &[ChannelId]) -> Vec<Message> {
        match market {
            Market::Spot => spot_method_frame(
                "UNSUBSCRIPTION",
                channels.iter().map(|(s, c)| Self::spot_channel(s, c)).collect(),
            ),
            Market::Futures => Self::futures_frames("unsub.kline", channels),
        }
    }

    fn parse(&self, market: Market, frame: &Message) -> anyhow::Result<KlineParsed> {
        match market {
            Market::Spot => Self::parse_spot(frame),
            Market::Futures => Self::parse_futures(frame),
        }
    }

    fn has_closed_flag(&self, _market: Market) -> bool {
        false
    }
}

// ---- Session ----

/// Owner commands for a kline session.
pub enum KlineCommand {
    Subscribe {
        key: KlineKey,
        channel: ChannelId,
        sink: Arc<dyn CandleSink>,
    },
    Unsubscribe(KlineKey),
}

struct Route {
    channel: ChannelId,
    sink: Arc<dyn CandleSink>,
}

pub type KlineHandle = SupervisorHandle<KlineCommand>;

/// Connection handler multiplexing every kline key of one feed.
pub struct KlineSession {
    protocol: &'static dyn KlineProtocol,
    market: Market,
    routes: HashMap<KlineKey, Route>,
    tracker: CandleTracker<ChannelId>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl KlineSession {
    pub fn new(
        protocol: &'static dyn KlineProtocol,
        market: Market,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            protocol,
            market,
            routes: HashMap::new(),
            tracker: CandleTracker::new(!protocol.has_closed_flag(market)),
            metrics,
        }
    }

    fn feed(&self) -> FeedKey {
        FeedKey::new(self.protocol.venue(), self.market)
    }

    fn channels(&self) -> Vec<ChannelId> {
        self.routes
            .values()
            .map(|r| r.channel.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    fn channel_in_use(&self, channel: &ChannelId) -> bool {
        self.routes.values().any(|r| &r.channel == channel)
    }

    fn subscribe(&self, channels: &[ChannelId]) -> Outbound {
        let frames = self.protocol.subscribe_frames(self.market, channels);
        let acks = self.protocol.expected_acks(self.market, channels, &frames);
        Outbound::awaiting(frames, acks)
    }

    /// Drop every route on the refused venue symbols.
    fn refuse(&mut self, venue_symbols: &[String], reason: &str) {
        let refused: Vec<KlineKey> = self
            .routes
            .iter()
            .filter(|(_, r)| venue_symbols.contains(&r.channel.0))
            .map(|(key, _)| key.clone())
            .collect();
        for key in refused {
            if let Some(route) = self.routes.remove(&key) {
                warn!(feed = %self.feed(), key = %key, reason, "Venue refused kline channel, dropping it");
                if !self.channel_in_use(&route.channel) {
                    self.tracker.forget(&route.channel);
                }
            }
        }
    }

    /// Subscribed keys, in order.
    pub fn keys(&self) -> BTreeSet<KlineKey> {
        self.routes.keys().cloned().collect()
    }

    fn deliver(&mut self, push: KlinePush) {
        let channel = (push.venue_symbol, push.code);
        let candles = self.tracker.observe(&channel, push.candle);
        if candles.is_empty() {
            return;
        }
        for (key, route) in self.routes.iter().filter(|(_, r)| r.channel == channel) {
            for candle in &candles {
                match key.interval.sub_minute_span() {
                    Some(span) => {
                        for sub in resample(candle, span) {
                            route.sink.on_candle_update(&key.symbol, key.interval, key.market, &sub);
                        }
                    }
                    None => route.sink.on_candle_update(&key.symbol, key.interval, key.market, candle),
                }
            }
        }
    }

    /// Spawn a supervised connection with the kline attempt cap.
    pub fn spawn(self, timing: TickerTiming, max_attempts: u32) -> KlineHandle {
        let url = self.protocol.endpoint(self.market).to_string();
        self.spawn_at(url, timing, max_attempts)
    }

    /// Same as [`KlineSession::spawn`] against a specific endpoint.
    pub fn spawn_at(self, url: String, timing: TickerTiming, max_attempts: u32) -> KlineHandle {
        let config = SupervisorConfig {
            key: self.feed(),
            url,
            backoff_base: timing.backoff_base,
            backoff_cap: timing.backoff_cap,
            confirm_timeout: timing.confirm_timeout,
            connect_timeout: timing.connect_timeout,
            max_attempts: Some(max_attempts),
            keepalive: self.protocol.keepalive(self.market),
        };
        let metrics = self.metrics.clone();
        let supervisor = Supervisor::new(config, self);
        match metrics {
            Some(metrics) => supervisor.with_metrics(metrics).connect(),
            None => supervisor.connect(),
        }
    }
}

impl ConnectionHandler for KlineSession {
    type Command = KlineCommand;

    fn on_open(&mut self) -> Outbound {
        let channels = self.channels();
        debug!(feed = %self.feed(), channels = channels.len(), "Subscribing kline channels");
        self.subscribe(&channels)
    }

    fn on_message(&mut self, msg: &Message) -> Reaction {
        match self.protocol.parse(self.market, msg) {
            Ok(KlineParsed::Candles(pushes)) => {
                for push in pushes {
                    self.deliver(push);
                }
                Reaction::handled()
            }
            Ok(KlineParsed::Control(Parsed::Confirmed)) => Reaction::confirmed(),
            Ok(KlineParsed::Control(Parsed::Reply(frame))) => Reaction::reply(frame),
            Ok(KlineParsed::Control(Parsed::Rejected(reason))) => Reaction::rejected(reason),
            Ok(KlineParsed::Control(Parsed::Refused { symbols, reason })) => {
                self.refuse(&symbols, &reason);
                Reaction::confirmed()
            }
            Ok(KlineParsed::Control(_)) => Reaction::handled(),
            Err(e) => {
                debug!(feed = %self.feed(), error = %e, "Dropping unparseable kline frame");
                if let Some(metrics) = &self.metrics {
                    metrics.record_parse_error(self.protocol.venue());
                }
                Reaction::handled()
            }
        }
    }

    fn on_command(&mut self, cmd: KlineCommand, open: bool) -> Outbound {
        match cmd {
            KlineCommand::Subscribe { key, channel, sink } => {
                let fresh = !self.channel_in_use(&channel);
                self.routes.insert(
                    key,
                    Route {
                        channel: channel.clone(),
                        sink,
                    },
                );
                if fresh && open {
                    self.subscribe(&[channel])
                } else {
                    Outbound::none()
                }
            }
            KlineCommand::Unsubscribe(key) => {
                let Some(route) = self.routes.remove(&key) else {
                    warn!(feed = %self.feed(), key = %key, "Unsubscribe for unknown kline key");
                    return Outbound::none();
                };
                if self.channel_in_use(&route.channel) {
                    return Outbound::none();
                }
                self.tracker.forget(&route.channel);
                if open {
                    Outbound::frames(self.protocol.unsubscribe_frames(self.market, &[route.channel]))
                } else {
                    Outbound::none()
                }
            }
        }
    }
}
