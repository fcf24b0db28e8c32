//! REST Adapters - Polled Price Sources
//!
//! Sub-modules:
//! - `client`: HTTP client with concurrency limit and retries
//! - `bitget`: `PriceMapSource` for the polling-only venue

pub mod bitget;
pub mod client;

pub use bitget::BitgetPriceSource;
