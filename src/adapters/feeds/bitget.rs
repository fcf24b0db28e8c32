//! Bitget - Polling Venue
//!
//! Prices arrive through `PriceMapSource` (see `adapters::api::bitget`);
//! this adapter only names the venue's symbols and its feed mode.

use tokio_tungstenite::tungstenite::Message;

use super::protocol::{Parsed, TickerProtocol};
use crate::adapters::api::bitget::BASE_URL;
use crate::domain::market::{FeedMode, Market, Venue, canonical_symbol};
use crate::error::StreamError;

#[derive(Debug, Clone, Copy, Default)]
pub struct BitgetProtocol;

impl TickerProtocol for BitgetProtocol {
    fn venue(&self) -> Venue {
        Venue::Bitget
    }

    fn endpoint(&self, _market: Market) -> &'static str {
        BASE_URL
    }

    fn feed_mode(&self, _market: Market) -> FeedMode {
        FeedMode::Polling
    }

    fn subscribe_frames(&self, _market: Market, _symbols: &[String]) -> Vec<Message> {
        Vec::new()
    }

    fn parse(&self, _market: Market, _frame: &Message) -> anyhow::Result<Parsed> {
        Ok(Parsed::Ignored)
    }

    fn to_venue_symbol(&self, _market: Market, canonical: &str) -> Result<String, StreamError> {
        Ok(canonical_symbol(canonical))
    }

    fn to_canonical(&self, _market: Market, venue_symbol: &str) -> String {
        canonical_symbol(venue_symbol)
    }
}
