//! Ticker Session - Venue Protocol Driven by a Supervisor
//!
//! Bridges a [`TickerProtocol`] to the [`ConnectionHandler`] contract:
//! keeps the desired and subscribed symbol sets, sends only the
//! increment when demand changes, re-subscribes everything on reconnect
//! and forwards parsed prices (as canonical symbols) to the ingest path.
//!
//! A symbol the venue refuses is quarantined: dropped from both sets and
//! kept out of every later subscribe until demand stops asking for it.
//! The socket and the other symbols are left alone.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use std::time::Duration;

use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, warn};

use super::protocol::{Parsed, TickerProtocol};
use super::supervisor::{
    ConnectionHandler, Outbound, Reaction, Supervisor, SupervisorConfig, SupervisorHandle,
};
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::market::{FeedKey, FeedMode, Market};
use crate::ports::market_feed::{TickBatch, TickListener};

/// Owner commands for a ticker session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickerCommand {
    /// Replace the desired canonical symbol set.
    SetSymbols(BTreeSet<String>),
}

pub type TickerHandle = SupervisorHandle<TickerCommand>;

/// Timing knobs shared by every ticker feed.
#[derive(Debug, Clone, Copy)]
pub struct TickerTiming {
    pub backoff_base: Duration,
    pub backoff_cap: Duration,
    pub confirm_timeout: Duration,
    pub connect_timeout: Duration,
}

pub struct TickerSession {
    protocol: &'static dyn TickerProtocol,
    market: Market,
    /// Canonical symbols the owner wants.
    desired: BTreeSet<String>,
    /// Canonical symbols subscribed on the current socket.
    subscribed: BTreeSet<String>,
    /// Canonical symbols the venue refused.
    quarantined: BTreeSet<String>,
    sink: Arc<dyn TickListener>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl TickerSession {
    pub fn new(
        protocol: &'static dyn TickerProtocol,
        market: Market,
        desired: BTreeSet<String>,
        sink: Arc<dyn TickListener>,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Self {
        Self {
            protocol,
            market,
            desired,
            subscribed: BTreeSet::new(),
            quarantined: BTreeSet::new(),
            sink,
            metrics,
        }
    }

    fn key(&self) -> FeedKey {
        FeedKey::new(self.protocol.venue(), self.market)
    }

    fn per_symbol(&self) -> bool {
        self.protocol.feed_mode(self.market) == FeedMode::PerSymbol
    }

    /// Canonical -> venue symbols, dropping (and logging) unmappable ones.
    fn venue_symbols<'a>(&self, canonical: impl Iterator<Item = &'a String>) -> Vec<String> {
        canonical
            .filter_map(|symbol| {
                self.protocol
                    .to_venue_symbol(self.market, symbol)
                    .map_err(|e| warn!(feed = %self.key(), error = %e, "Skipping symbol"))
                    .ok()
            })
            .collect()
    }

    /// Subscribe frames for venue symbols, with the acks they will earn.
    fn subscribe(&self, symbols: &[String]) -> Outbound {
        let frames = self.protocol.subscribe_frames(self.market, symbols);
        if self.protocol.confirms_subscription(self.market) {
            let acks = self.protocol.expected_acks(self.market, symbols, &frames);
            Outbound::awaiting(frames, acks)
        } else {
            Outbound::frames(frames)
        }
    }

    /// Currently subscribed canonical symbols.
    pub const fn subscribed(&self) -> &BTreeSet<String> {
        &self.subscribed
    }

    /// Symbols the venue refused and that are still demanded.
    pub const fn quarantined(&self) -> &BTreeSet<String> {
        &self.quarantined
    }

    fn quarantine(&mut self, venue_symbols: &[String], reason: &str) {
        for venue_symbol in venue_symbols {
            let symbol = self.protocol.to_canonical(self.market, venue_symbol);
            let wanted = self.desired.remove(&symbol);
            let live = self.subscribed.remove(&symbol);
            if wanted || live {
                warn!(feed = %self.key(), symbol = %symbol, reason, "Venue refused symbol, dropping it");
                self.quarantined.insert(symbol);
            }
        }
    }

    fn emit(&self, prices: Vec<(String, f64)>) {
        if prices.is_empty() {
            return;
        }
        let prices: HashMap<String, f64> = prices
            .into_iter()
            .map(|(symbol, price)| (self.protocol.to_canonical(self.market, &symbol), price))
            .collect();
        let batch = TickBatch {
            venue: self.protocol.venue(),
            market: self.market,
            prices,
        };
        if let Err(e) = self.sink.on_tick(&batch) {
            warn!(feed = %self.key(), error = %e, "Tick ingest failed");
        }
    }

    /// Spawn a supervised connection for this session.
    pub fn spawn(self, timing: TickerTiming) -> TickerHandle {
        let url = self.protocol.endpoint(self.market).to_string();
        self.spawn_at(url, timing)
    }

    /// Spawn against a specific endpoint (relay, testnet) instead of the
    /// venue's public one.
    pub fn spawn_at(self, url: String, timing: TickerTiming) -> TickerHandle {
        let config = SupervisorConfig {
            key: self.key(),
            url,
            backoff_base: timing.backoff_base,
            backoff_cap: timing.backoff_cap,
            confirm_timeout: timing.confirm_timeout,
            connect_timeout: timing.connect_timeout,
            max_attempts: None,
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

impl ConnectionHandler for TickerSession {
    type Command = TickerCommand;

    fn on_open(&mut self) -> Outbound {
        if !self.per_symbol() {
            return self.subscribe(&[]);
        }
        self.subscribed = self.desired.clone();
        let symbols = self.venue_symbols(self.subscribed.iter());
        debug!(feed = %self.key(), count = symbols.len(), "Subscribing full symbol set");
        self.subscribe(&symbols)
    }

    fn on_message(&mut self, msg: &Message) -> Reaction {
        match self.protocol.parse(self.market, msg) {
            Ok(Parsed::Prices(prices)) => {
                self.emit(prices);
                Reaction::handled()
            }
            Ok(Parsed::Confirmed) => Reaction::confirmed(),
            Ok(Parsed::Reply(frame)) => Reaction::reply(frame),
            Ok(Parsed::Rejected(reason)) => Reaction::rejected(reason),
            Ok(Parsed::Refused { symbols, reason }) => {
                self.quarantine(&symbols, &reason);
                Reaction::confirmed()
            }
            Ok(Parsed::Ignored) => Reaction::handled(),
            Err(e) => {
                debug!(feed = %self.key(), error = %e, "Dropping unparseable frame");
                if let Some(metrics) = &self.metrics {
                    metrics.record_parse_error(self.protocol.venue());
                }
                Reaction::handled()
            }
        }
    }

    fn on_command(&mut self, cmd: TickerCommand, open: bool) -> Outbound {
        let TickerCommand::SetSymbols(symbols) = cmd;
        // A symbol that leaves demand gets a fresh try if it comes back.
        self.quarantined.retain(|s| symbols.contains(s));
        self.desired = symbols.difference(&self.quarantined).cloned().collect();
        if !open || !self.per_symbol() {
            return Outbound::none();
        }

        let added: Vec<String> = self.desired.difference(&self.subscribed).cloned().collect();
        let removed: Vec<String> = self.subscribed.difference(&self.desired).cloned().collect();
        if added.is_empty() && removed.is_empty() {
            return Outbound::none();
        }

        let mut out = self.subscribe(&self.venue_symbols(added.iter()));
        out.frames.extend(
            self.protocol
                .unsubscribe_frames(self.market, &self.venue_symbols(removed.iter())),
        );
        debug!(
            feed = %self.key(),
            added = added.len(),
            removed = removed.len(),
            "Applying symbol set change"
        );
        self.subscribed = self.desired.clone();
        out
    }

    fn on_disconnect(&mut self, _reason: &str) {
        self.subscribed.clear();
    }
}

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use serde_json::Value;

    use super::*;
    use crate::domain::market::Venue;

    fn symbols(list: &[&str]) -> BTreeSet<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    fn collector() -> (Arc<Mutex<Vec<TickBatch>>>, Arc<dyn TickListener>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink_seen = Arc::clone(&seen);
        let sink: Arc<dyn TickListener> = Arc::new(move |batch: &TickBatch| -> anyhow::Result<()> {
            sink_seen.lock().push(batch.clone());
            Ok(())
        });
        (seen, sink)
    }

    fn args(frame: &Message) -> Vec<String> {
        let Message::Text(text) = frame else { panic!("text frame expected") };
        let v: Value = serde_json::from_str(text).unwrap();
        v["args"]
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a.as_str().unwrap().to_string())
            .collect()
    }

    #[test]
    fn test_added_symbol_sends_only_the_increment() {
        let (_, sink) = collector();
        let mut session = TickerSession::new(
            Venue::Bybit.ticker_protocol(),
            Market::Spot,
            symbols(&["BTCUSDT", "ETHUSDT"]),
            sink,
            None,
        );

        let open = session.on_open();
        assert_eq!(open.pending_acks, 1);
        assert_eq!(args(&open.frames[0]), vec!["tickers.BTCUSDT", "tickers.ETHUSDT"]);

        let out = session.on_command(
            TickerCommand::SetSymbols(symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"])),
            true,
        );
        assert_eq!(out.frames.len(), 1);
        assert_eq!(args(&out.frames[0]), vec!["tickers.SOLUSDT"]);

        let same = session.on_command(
            TickerCommand::SetSymbols(symbols(&["BTCUSDT", "ETHUSDT", "SOLUSDT"])),
            true,
        );
        assert!(same.frames.is_empty());
    }

    #[test]
    fn test_dropped_symbol_is_unsubscribed() {
        let (_, sink) = collector();
        let mut session = TickerSession::new(
            Venue::Bybit.ticker_protocol(),
            Market::Futures,
            symbols(&["BTCUSDT", "ETHUSDT"]),
            sink,
            None,
        );
        session.on_open();

        let out = session.on_command(TickerCommand::SetSymbols(symbols(&["BTCUSDT"])), true);
        assert_eq!(out.frames.len(), 1);
        assert!(!out.expects_confirmation());
        let Message::Text(text) = &out.frames[0] else { panic!() };
        assert!(text.contains("\"unsubscribe\""));
        assert_eq!(session.subscribed(), &symbols(&["BTCUSDT"]));
    }

    #[test]
    fn test_reconnect_resubscribes_full_set() {
        let (_, sink) = collector();
        let mut session =
            TickerSession::new(Venue::Okx.ticker_protocol(), Market::Spot, symbols(&["BTCUSDT"]), sink, None);
        session.on_open();
        session.on_disconnect("read error");
        assert!(session.subscribed().is_empty());

        // Demand changed while offline: nothing is sent until the next open.
        let offline = session.on_command(TickerCommand::SetSymbols(symbols(&["BTCUSDT", "ETHUSDT"])), false);
        assert!(offline.frames.is_empty());

        let reopened = session.on_open();
        let Message::Text(text) = &reopened.frames[0] else { panic!() };
        assert!(text.contains("BTC-USDT") && text.contains("ETH-USDT"));
    }

    #[test]
    fn test_refused_symbol_is_dropped_without_tearing_down_the_rest() {
        let (_, sink) = collector();
        let mut session = TickerSession::new(
            Venue::Bybit.ticker_protocol(),
            Market::Spot,
            symbols(&["BTCUSDT", "ETHUSDT", "TYPOUSDT"]),
            sink,
            None,
        );
        let open = session.on_open();
        assert_eq!(args(&open.frames[0]), vec!["tickers.BTCUSDT", "tickers.ETHUSDT", "tickers.TYPOUSDT"]);

        let refusal = Message::Text(
            r#"{"success":false,"ret_msg":"Invalid symbol :[tickers.TYPOUSDT]","conn_id":"c1","op":"subscribe"}"#
                .to_string(),
        );
        let reaction = session.on_message(&refusal);
        assert!(reaction.rejected.is_none());
        assert!(reaction.confirmed);
        assert_eq!(session.subscribed(), &symbols(&["BTCUSDT", "ETHUSDT"]));
        assert_eq!(session.quarantined(), &symbols(&["TYPOUSDT"]));

        // The same demand again sends nothing.
        let same = session.on_command(
            TickerCommand::SetSymbols(symbols(&["BTCUSDT", "ETHUSDT", "TYPOUSDT"])),
            true,
        );
        assert!(same.frames.is_empty());

        // A later reconnect leaves the refused symbol out.
        session.on_disconnect("read error");
        let reopened = session.on_open();
        assert_eq!(args(&reopened.frames[0]), vec!["tickers.BTCUSDT", "tickers.ETHUSDT"]);
    }

    #[test]
    fn test_refused_symbol_is_retried_after_leaving_demand() {
        let (_, sink) = collector();
        let mut session = TickerSession::new(
            Venue::Okx.ticker_protocol(),
            Market::Futures,
            symbols(&["BTCUSDT", "TYPOUSDT"]),
            sink,
            None,
        );
        let open = session.on_open();
        assert_eq!(open.pending_acks, 2);
        session.on_message(&Message::Text(
            r#"{"event":"error","code":"60018","msg":"Wrong URL or channel:tickers,instId:TYPO-USDT-SWAP doesn't exist."}"#
                .to_string(),
        ));
        assert_eq!(session.quarantined(), &symbols(&["TYPOUSDT"]));

        session.on_command(TickerCommand::SetSymbols(symbols(&["BTCUSDT"])), true);
        assert!(session.quarantined().is_empty());
        let back = session.on_command(TickerCommand::SetSymbols(symbols(&["BTCUSDT", "TYPOUSDT"])), true);
        let Message::Text(text) = &back.frames[0] else { panic!() };
        assert!(text.contains("TYPO-USDT-SWAP"));
        assert_eq!(back.pending_acks, 1);
    }

    #[test]
    fn test_prices_are_canonicalized_and_forwarded() {
        let (seen, sink) = collector();
        let mut session =
            TickerSession::new(Venue::Okx.ticker_protocol(), Market::Futures, symbols(&["BTCUSDT"]), sink, None);

        let push = Message::Text(
            r#"{"arg":{"channel":"tickers","instId":"BTC-USDT-SWAP"},"data":[{"instId":"BTC-USDT-SWAP","last":"65000"}]}"#
                .to_string(),
        );
        let reaction = session.on_message(&push);
        assert!(!reaction.confirmed && reaction.rejected.is_none());

        let batches = seen.lock();
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].venue, Venue::Okx);
        assert_eq!(batches[0].prices["BTCUSDT"], 65000.0);
    }

    #[test]
    fn test_malformed_frame_keeps_connection() {
        let (seen, sink) = collector();
        let mut session =
            TickerSession::new(Venue::Gate.ticker_protocol(), Market::Spot, BTreeSet::new(), sink, None);
        let reaction = session.on_message(&Message::Text("{not json".to_string()));
        assert!(reaction.rejected.is_none());
        assert!(seen.lock().is_empty());
    }

    #[test]
    fn test_aggregate_feed_ignores_symbol_changes() {
        let (_, sink) = collector();
        let mut session =
            TickerSession::new(Venue::Mexc.ticker_protocol(), Market::Futures, BTreeSet::new(), sink, None);
        let open = session.on_open();
        assert_eq!(open.frames.len(), 1);
        assert!(open.expects_confirmation());
        let out = session.on_command(TickerCommand::SetSymbols(symbols(&["BTCUSDT"])), true);
        assert!(out.frames.is_empty());
    }
}
