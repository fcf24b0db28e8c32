//! Candle and kline interval types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::StreamError;

use super::resampler::SubMinuteSpan;

/// One OHLCV bar.
///
/// `open_time_ms` is the Unix millisecond timestamp at which the bar's
/// window starts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time_ms: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    pub is_closed: bool,
}

impl Candle {
    /// True when close >= open.
    pub fn is_bullish(&self) -> bool {
        self.close >= self.open
    }

    /// High minus low.
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    /// Same bar with the closed flag set.
    pub const fn closed(mut self) -> Self {
        self.is_closed = true;
        self
    }
}

/// Kline intervals the streaming layer can serve.
///
/// Sub-minute intervals are not native on any supported venue; they are
/// synthesized from 1-minute bars by the resampler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum KlineInterval {
    #[serde(rename = "1s")]
    S1,
    #[serde(rename = "5s")]
    S5,
    #[serde(rename = "15s")]
    S15,
    #[serde(rename = "1m")]
    M1,
    #[serde(rename = "3m")]
    M3,
    #[serde(rename = "5m")]
    M5,
    #[serde(rename = "15m")]
    M15,
    #[serde(rename = "30m")]
    M30,
    #[serde(rename = "1h")]
    H1,
    #[serde(rename = "4h")]
    H4,
    #[serde(rename = "1d")]
    D1,
}

impl KlineInterval {
    const TABLE: [(Self, &'static str); 11] = [
        (Self::S1, "1s"),
        (Self::S5, "5s"),
        (Self::S15, "15s"),
        (Self::M1, "1m"),
        (Self::M3, "3m"),
        (Self::M5, "5m"),
        (Self::M15, "15m"),
        (Self::M30, "30m"),
        (Self::H1, "1h"),
        (Self::H4, "4h"),
        (Self::D1, "1d"),
    ];

    pub fn as_str(self) -> &'static str {
        Self::TABLE
            .iter()
            .find(|(i, _)| *i == self)
            .map_or("?", |(_, s)| *s)
    }

    /// Resampling span for sub-minute intervals.
    pub const fn sub_minute_span(self) -> Option<SubMinuteSpan> {
        match self {
            Self::S1 => Some(SubMinuteSpan::ONE_SECOND),
            Self::S5 => Some(SubMinuteSpan::FIVE_SECONDS),
            Self::S15 => Some(SubMinuteSpan::FIFTEEN_SECONDS),
            _ => None,
        }
    }

    /// Interval actually requested from the venue.
    ///
    /// Sub-minute intervals are fed by the 1-minute stream.
    pub const fn source(self) -> Self {
        if self.sub_minute_span().is_some() {
            Self::M1
        } else {
            self
        }
    }
}

impl fmt::Display for KlineInterval {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KlineInterval {
    type Err = StreamError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Self::TABLE
            .iter()
            .find(|(_, name)| *name == wanted)
            .map(|(i, _)| *i)
            .ok_or_else(|| StreamError::UnknownInterval(s.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_minute_intervals_source_from_one_minute() {
        assert_eq!(KlineInterval::S15.source(), KlineInterval::M1);
        assert_eq!(KlineInterval::S15.sub_minute_span(), Some(SubMinuteSpan::FIFTEEN_SECONDS));
        assert_eq!(KlineInterval::M5.source(), KlineInterval::M5);
        assert_eq!(KlineInterval::M5.sub_minute_span(), None);
    }

    #[test]
    fn test_interval_parse() {
        assert_eq!("5s".parse::<KlineInterval>().ok(), Some(KlineInterval::S5));
        assert_eq!("1H".parse::<KlineInterval>().ok(), Some(KlineInterval::H1));
        assert!("2m".parse::<KlineInterval>().is_err());
    }

    #[test]
    fn test_closed_sets_flag_only() {
        let c = Candle {
            open_time_ms: 60_000,
            open: 1.0,
            high: 2.0,
            low: 0.5,
            close: 1.5,
            volume: 3.0,
            is_closed: false,
        };
        let closed = c.closed();
        assert!(closed.is_closed);
        assert_eq!(closed.close, c.close);
    }
}
