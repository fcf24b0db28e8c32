//! Market Data Feed Adapters - Real-time Price Streaming
//!
//! Venue protocols are stateless trait objects picked from a static
//! table. Sessions own the socket and subscription state and are run by
//! the connection supervisor:
//! - Binance, Bybit, OKX, Gate, MEXC: WebSocket ticker protocols
//! - Bitget: REST polling through `Poller`
//! - Kline: candle streams for OKX and MEXC with sub-minute resampling
//! - Supervisor: connect, confirm, keep alive, reconnect with backoff

pub mod backoff;
pub mod binance;
pub mod bitget;
pub mod bybit;
pub mod gate;
pub mod kline;
pub mod launcher;
pub mod mexc;
pub mod mexc_proto;
pub mod okx;
pub mod poller;
pub mod protocol;
pub mod supervisor;
pub mod ticker_session;

pub use launcher::VenueFeedLauncher;
pub use protocol::{Parsed, TickerProtocol};
pub use supervisor::{ConnectionState, Supervisor, SupervisorHandle};
