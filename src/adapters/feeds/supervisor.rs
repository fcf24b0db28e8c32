//! Connection Supervisor - One Resilient WebSocket per Feed Key
//!
//! Owns a single logical connection and drives it through
//! `Disconnected → Connecting → Open → Subscribed → Closing`.
//! Everything runs on one tokio task per connection, event-driven via
//! `tokio::select!` over:
//! - socket reads (protocol pings answered with pongs)
//! - the keep-alive interval, when the venue needs client heartbeats
//! - the subscription confirmation deadline
//! - the control channel (`send`, handler commands, `close`)
//!
//! Every subscribe request that the venue acknowledges is counted; the
//! deadline stays armed until each one is answered and is pushed back on
//! every answer. A silent request therefore still times the session out.
//!
//! Any close or error tears the session down and schedules a reconnect
//! after `min(base * 2^attempts, cap)`. Attempts reset once a session is
//! healthy: on open, or on the first acknowledgement when the open frames
//! expect one. An optional attempt cap turns persistent failure into the
//! terminal `Failed` state.
//!
//! Venue specifics live behind [`ConnectionHandler`]; the supervisor
//! never inspects payloads itself.

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, instrument, warn};

use super::backoff::Backoff;
use crate::adapters::metrics::MetricsRegistry;
use crate::domain::market::FeedKey;

/// Lifecycle of a supervised connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Open,
    /// Open and the venue acknowledged the subscription.
    Subscribed,
    Closing,
    /// Attempt cap exceeded; the task has exited.
    Failed,
}

impl ConnectionState {
    pub const fn is_connected(self) -> bool {
        matches!(self, Self::Open | Self::Subscribed)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Client heartbeat sent on a fixed interval while open.
#[derive(Debug, Clone)]
pub struct KeepAlive {
    pub payload: Message,
    pub interval: Duration,
}

/// Static configuration of one supervised connection.
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Feed identity, used for logs and metric labels.
    pub key: FeedKey,
    /// WebSocket endpoint.
    pub url: String,
    /// First reconnect delay.
    pub backoff_base: Duration,
    /// Upper bound on reconnect delay.
    pub backoff_cap: Duration,
    /// How long to wait for a subscription acknowledgement.
    pub confirm_timeout: Duration,
    /// Timeout for the TCP/TLS/WebSocket handshake.
    pub connect_timeout: Duration,
    /// Consecutive failed attempts before giving up (`None` = never).
    pub max_attempts: Option<u32>,
    /// Client heartbeat, if the venue requires one.
    pub keepalive: Option<KeepAlive>,
}

/// Frames a handler wants written to the socket.
#[derive(Debug, Default)]
pub struct Outbound {
    pub frames: Vec<Message>,
    /// Acknowledgements the venue owes once these frames are sent.
    pub pending_acks: usize,
}

impl Outbound {
    pub fn none() -> Self {
        Self::default()
    }

    pub const fn frames(frames: Vec<Message>) -> Self {
        Self {
            frames,
            pending_acks: 0,
        }
    }

    /// Subscribe frames the venue acknowledges one by one.
    pub fn confirmable(frames: Vec<Message>) -> Self {
        let acks = frames.len();
        Self::awaiting(frames, acks)
    }

    /// Subscribe frames answered by `acks` acknowledgements in total.
    pub fn awaiting(frames: Vec<Message>, acks: usize) -> Self {
        let pending_acks = if frames.is_empty() { 0 } else { acks };
        Self {
            frames,
            pending_acks,
        }
    }

    pub const fn expects_confirmation(&self) -> bool {
        self.pending_acks > 0
    }
}

/// Handler's verdict on one inbound message.
#[derive(Debug, Default)]
pub struct Reaction {
    /// Frame to write back (application-level pong, etc).
    pub reply: Option<Message>,
    /// The venue answered one pending subscribe request. Symbol-level
    /// refusals count as answers too.
    pub confirmed: bool,
    /// The venue refused the connection's subscription; the session is
    /// torn down.
    pub rejected: Option<String>,
}

impl Reaction {
    pub fn handled() -> Self {
        Self::default()
    }

    pub fn confirmed() -> Self {
        Self {
            confirmed: true,
            ..Self::default()
        }
    }

    pub fn reply(frame: Message) -> Self {
        Self {
            reply: Some(frame),
            ..Self::default()
        }
    }

    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            rejected: Some(reason.into()),
            ..Self::default()
        }
    }
}

/// Venue-specific behavior plugged into a supervisor.
///
/// All methods run on the connection task and must not block.
pub trait ConnectionHandler: Send + 'static {
    /// Typed commands from the owner (e.g. a new desired symbol set).
    type Command: Send + 'static;

    /// Socket is open; return the subscribe frames.
    fn on_open(&mut self) -> Outbound;

    /// One inbound text or binary frame.
    fn on_message(&mut self, msg: &Message) -> Reaction;

    /// Owner command. `open` tells whether returned frames will be sent.
    fn on_command(&mut self, cmd: Self::Command, open: bool) -> Outbound;

    /// Session ended; the supervisor is about to back off.
    fn on_disconnect(&mut self, _reason: &str) {}
}

enum Control<C> {
    Send(Message),
    Handler(C),
    Close(String),
}

/// Owner-side handle of a running supervisor.
///
/// Dropping every handle closes the connection.
pub struct SupervisorHandle<C> {
    key: FeedKey,
    control_tx: mpsc::UnboundedSender<Control<C>>,
    state_rx: watch::Receiver<ConnectionState>,
    attempts: Arc<AtomicU32>,
    task: JoinHandle<()>,
}

impl<C: Send + 'static> SupervisorHandle<C> {
    pub const fn key(&self) -> FeedKey {
        self.key
    }

    pub fn state(&self) -> ConnectionState {
        *self.state_rx.borrow()
    }

    /// Consecutive failed attempts since the last successful open.
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::Relaxed)
    }

    /// Write a raw frame. No-op unless the socket is open.
    pub fn send(&self, payload: Message) -> bool {
        if !self.state().is_connected() {
            return false;
        }
        self.control_tx.send(Control::Send(payload)).is_ok()
    }

    /// Forward a typed command to the handler.
    pub fn command(&self, cmd: C) -> bool {
        self.control_tx.send(Control::Handler(cmd)).is_ok()
    }

    /// Stop the connection and all its timers. Idempotent.
    pub fn close(&self, reason: &str) {
        let _ = self.control_tx.send(Control::Close(reason.to_string()));
    }

    /// True once the task has exited (closed or failed).
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Watch state transitions.
    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    /// Close and wait for the task to exit.
    pub async fn shutdown(mut self, reason: &str) {
        self.close_and_wait(reason).await;
    }

    /// Close and wait for the task to exit, keeping the handle.
    ///
    /// Awaits the task, so call it at most once per handle.
    pub async fn close_and_wait(&mut self, reason: &str) {
        self.close(reason);
        if let Err(e) = (&mut self.task).await {
            warn!(feed = %self.key, error = %e, "Feed task ended abnormally");
        }
    }
}

/// Subscribe requests still waiting for a venue answer.
#[derive(Debug, Default)]
struct Confirmations {
    outstanding: usize,
    deadline: Option<Instant>,
}

impl Confirmations {
    fn expect(&mut self, acks: usize, timeout: Duration) {
        if acks == 0 {
            return;
        }
        if self.outstanding == 0 {
            self.deadline = Some(Instant::now() + timeout);
        }
        self.outstanding += acks;
    }

    /// Record one answer. Returns true once nothing is outstanding.
    fn answer(&mut self, timeout: Duration) -> bool {
        self.outstanding = self.outstanding.saturating_sub(1);
        if self.outstanding == 0 {
            self.deadline = None;
            true
        } else {
            self.deadline = Some(Instant::now() + timeout);
            false
        }
    }
}

/// Why a session or a wait ended.
enum Exit {
    /// Owner closed the connection; do not reconnect.
    Closed,
    /// Transport or protocol failure; reconnect.
    Lost(String),
}

/// Connection supervisor, ready to be spawned with [`Supervisor::connect`].
pub struct Supervisor<H: ConnectionHandler> {
    config: SupervisorConfig,
    handler: H,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl<H: ConnectionHandler> Supervisor<H> {
    pub const fn new(config: SupervisorConfig, handler: H) -> Self {
        Self {
            config,
            handler,
            metrics: None,
        }
    }

    #[must_use]
    pub fn with_metrics(mut self, metrics: Arc<MetricsRegistry>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Spawn the connection task and return its handle.
    pub fn connect(self) -> SupervisorHandle<H::Command> {
        let key = self.config.key;
        let (control_tx, control_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let attempts = Arc::new(AtomicU32::new(0));

        let task = tokio::spawn(
            Runner {
                backoff: Backoff::new(self.config.backoff_base, self.config.backoff_cap),
                config: self.config,
                handler: self.handler,
                metrics: self.metrics,
                control_rx,
                state_tx,
                attempts: Arc::clone(&attempts),
            }
            .run(),
        );

        SupervisorHandle {
            key,
            control_tx,
            state_rx,
            attempts,
            task,
        }
    }
}

struct Runner<H: ConnectionHandler> {
    config: SupervisorConfig,
    handler: H,
    metrics: Option<Arc<MetricsRegistry>>,
    backoff: Backoff,
    control_rx: mpsc::UnboundedReceiver<Control<H::Command>>,
    state_tx: watch::Sender<ConnectionState>,
    attempts: Arc<AtomicU32>,
}

impl<H: ConnectionHandler> Runner<H> {
    #[instrument(skip(self), fields(feed = %self.config.key))]
    async fn run(mut self) {
        info!(url = %self.config.url, "Feed supervisor started");

        loop {
            let exit = self.session().await;
            self.set_connected(false);

            let reason = match exit {
                Exit::Closed => {
                    self.transition(ConnectionState::Disconnected);
                    info!("Feed closed");
                    return;
                }
                Exit::Lost(reason) => reason,
            };

            self.handler.on_disconnect(&reason);
            self.transition(ConnectionState::Disconnected);

            if let Some(cap) = self.config.max_attempts {
                if self.backoff.attempts() >= cap {
                    warn!(attempts = cap, reason = %reason, "Reconnect attempts exhausted, giving up");
                    self.transition(ConnectionState::Failed);
                    return;
                }
            }

            let delay = self.backoff.next_delay();
            self.attempts.store(self.backoff.attempts(), Ordering::Relaxed);
            if let Some(metrics) = &self.metrics {
                metrics.record_reconnect(self.config.key);
            }
            warn!(
                reason = %reason,
                attempt = self.backoff.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "Feed disconnected, scheduling reconnect"
            );

            if self.idle(delay).await {
                self.transition(ConnectionState::Disconnected);
                info!("Feed closed during backoff");
                return;
            }
        }
    }

    /// Wait out a backoff delay while still serving control messages.
    ///
    /// Returns true if the owner closed the connection meanwhile.
    async fn idle(&mut self, delay: Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                biased;
                ctrl = self.control_rx.recv() => {
                    if self.offline_control(ctrl) {
                        return true;
                    }
                }
                () = &mut sleep => return false,
            }
        }
    }

    /// Apply a control message while no socket is open.
    ///
    /// Returns true on close.
    fn offline_control(&mut self, ctrl: Option<Control<H::Command>>) -> bool {
        match ctrl {
            None => true,
            Some(Control::Close(reason)) => {
                info!(reason = %reason, "Close requested while disconnected");
                true
            }
            Some(Control::Send(_)) => {
                debug!("Dropping send while disconnected");
                false
            }
            Some(Control::Handler(cmd)) => {
                // Frames are discarded; the handler re-subscribes on open.
                let _ = self.handler.on_command(cmd, false);
                false
            }
        }
    }

    /// One connect + stream session.
    async fn session(&mut self) -> Exit {
        self.transition(ConnectionState::Connecting);

        let url = self.config.url.clone();
        let connect = tokio::time::timeout(
            self.config.connect_timeout,
            connect_async(url.as_str()),
        );
        tokio::pin!(connect);
        let ws_stream = loop {
            tokio::select! {
                biased;
                ctrl = self.control_rx.recv() => {
                    if self.offline_control(ctrl) {
                        return Exit::Closed;
                    }
                }
                result = &mut connect => match result {
                    Ok(Ok((stream, _))) => break stream,
                    Ok(Err(e)) => return Exit::Lost(format!("connect failed: {e}")),
                    Err(_) => return Exit::Lost("connect timed out".to_string()),
                },
            }
        };

        let (mut sink, mut stream) = ws_stream.split();
        self.transition(ConnectionState::Open);
        self.set_connected(true);
        info!("Feed connected");

        let timeout = self.config.confirm_timeout;
        let mut confirmations = Confirmations::default();
        let opened = self.handler.on_open();
        // A venue that refuses every open keeps backing off.
        let mut healthy = !opened.expects_confirmation();
        if healthy {
            self.mark_healthy();
        }
        if let Err(e) = write_all(&mut sink, opened.frames).await {
            return Exit::Lost(format!("subscribe send failed: {e}"));
        }
        confirmations.expect(opened.pending_acks, timeout);

        let mut heartbeat = self.config.keepalive.as_ref().map(|k| {
            tokio::time::interval_at(Instant::now() + k.interval, k.interval)
        });

        loop {
            tokio::select! {
                biased;
                ctrl = self.control_rx.recv() => match ctrl {
                    None => {
                        self.transition(ConnectionState::Closing);
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Closed;
                    }
                    Some(Control::Close(reason)) => {
                        info!(reason = %reason, "Close requested");
                        self.transition(ConnectionState::Closing);
                        let _ = sink.send(Message::Close(None)).await;
                        return Exit::Closed;
                    }
                    Some(Control::Send(frame)) => {
                        if let Err(e) = sink.send(frame).await {
                            return Exit::Lost(format!("send failed: {e}"));
                        }
                    }
                    Some(Control::Handler(cmd)) => {
                        let out = self.handler.on_command(cmd, true);
                        if let Err(e) = write_all(&mut sink, out.frames).await {
                            return Exit::Lost(format!("subscribe send failed: {e}"));
                        }
                        confirmations.expect(out.pending_acks, timeout);
                    }
                },
                () = until(confirmations.deadline) => {
                    return Exit::Lost(format!(
                        "subscription confirmation timed out ({} unanswered)",
                        confirmations.outstanding
                    ));
                }
                () = next_tick(&mut heartbeat) => {
                    if let Some(keepalive) = &self.config.keepalive {
                        if let Err(e) = sink.send(keepalive.payload.clone()).await {
                            return Exit::Lost(format!("keep-alive send failed: {e}"));
                        }
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Ping(payload))) => {
                        if let Err(e) = sink.send(Message::Pong(payload)).await {
                            return Exit::Lost(format!("pong send failed: {e}"));
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        let reason = frame.map_or_else(
                            || "peer closed".to_string(),
                            |f| format!("peer closed: {} {}", f.code, f.reason),
                        );
                        return Exit::Lost(reason);
                    }
                    Some(Ok(Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(frame)) => {
                        let reaction = self.handler.on_message(&frame);
                        if let Some(reason) = reaction.rejected {
                            return Exit::Lost(format!("subscription rejected: {reason}"));
                        }
                        if reaction.confirmed {
                            if !healthy {
                                healthy = true;
                                self.mark_healthy();
                            }
                            if confirmations.answer(timeout) {
                                self.transition(ConnectionState::Subscribed);
                            }
                        }
                        if let Some(reply) = reaction.reply {
                            if let Err(e) = sink.send(reply).await {
                                return Exit::Lost(format!("reply send failed: {e}"));
                            }
                        }
                    }
                    Some(Err(e)) => return Exit::Lost(format!("read error: {e}")),
                    None => return Exit::Lost("stream ended".to_string()),
                },
            }
        }
    }

    fn mark_healthy(&mut self) {
        self.backoff.reset();
        self.attempts.store(0, Ordering::Relaxed);
    }

    fn transition(&self, state: ConnectionState) {
        let previous = self.state_tx.send_replace(state);
        if previous != state {
            debug!(from = %previous, to = %state, "Feed state change");
        }
    }

    fn set_connected(&self, connected: bool) {
        if let Some(metrics) = &self.metrics {
            metrics.set_feed_connected(self.config.key, connected);
        }
    }
}

async fn write_all<S>(sink: &mut S, frames: Vec<Message>) -> Result<(), S::Error>
where
    S: Sink<Message> + Unpin,
{
    for frame in frames {
        sink.send(frame).await?;
    }
    Ok(())
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(at) => tokio::time::sleep_until(at).await,
        None => std::future::pending().await,
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
