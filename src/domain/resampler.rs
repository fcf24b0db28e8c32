//! Candle Resampler - Deterministic Sub-Minute Bars
//!
//! Turns one 1-minute candle into `60 / span` synthetic sub-candles.
//! The output is a pure function of `(open_time, open, high, low, close,
//! volume, is_closed, span)`: a fixed 32-bit LCG seeded from the open
//! time and span places the parent's extremes and perturbs the path, so
//! repeated calls are bit-identical.
//!
//! Also hosts [`CandleTracker`], the per-key memory of the last 1-minute
//! bar that keeps duplicate pushes from triggering a fresh resample.

use std::collections::HashMap;
use std::hash::Hash;

use crate::error::StreamError;

use super::candle::Candle;

/// LCG multiplier (Numerical Recipes).
const LCG_MUL: u32 = 1_664_525;
/// LCG increment (Numerical Recipes).
const LCG_INC: u32 = 1_013_904_223;
/// Max interior perturbation as a fraction of the parent range.
const PERTURBATION: f64 = 0.1;
/// Max wick length as a fraction of the parent range.
const WICK: f64 = 0.05;

/// Sub-minute resampling span, guaranteed to split a minute into at
/// least three equal sub-candles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubMinuteSpan(u32);

impl SubMinuteSpan {
    pub const ONE_SECOND: Self = Self(1);
    pub const FIVE_SECONDS: Self = Self(5);
    pub const FIFTEEN_SECONDS: Self = Self(15);

    /// Validate a span given in seconds.
    pub fn try_from_secs(secs: u32) -> Result<Self, StreamError> {
        if secs == 0 || 60 % secs != 0 || 60 / secs < 3 {
            return Err(StreamError::InvalidSpan(secs));
        }
        Ok(Self(secs))
    }

    pub const fn secs(self) -> u32 {
        self.0
    }

    /// Number of sub-candles per minute.
    pub const fn count(self) -> usize {
        (60 / self.0) as usize
    }
}

/// Seeded linear congruential generator.
///
/// `state = state * 1664525 + 1013904223 (mod 2^32)`; each draw is
/// `state / 2^32` in `[0, 1)`.
#[derive(Debug, Clone)]
pub struct Lcg {
    state: u32,
}

impl Lcg {
    /// Seed from a candle open time (ms) and span (s).
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub const fn seeded(open_time_ms: i64, span_secs: u32) -> Self {
        let secs = (open_time_ms / 1000) as u32;
        Self {
            state: secs.wrapping_mul(31).wrapping_add(span_secs),
        }
    }

    pub fn next_f64(&mut self) -> f64 {
        self.state = self.state.wrapping_mul(LCG_MUL).wrapping_add(LCG_INC);
        f64::from(self.state) / 4_294_967_296.0
    }

    /// Uniform index in `lo..=hi`.
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    fn pick(&mut self, lo: usize, hi: usize) -> usize {
        let len = hi - lo + 1;
        let offset = (self.next_f64() * len as f64) as usize;
        lo + offset.min(len - 1)
    }
}

/// Split one 1-minute candle into `span.count()` sub-candles.
///
/// Invariants of the output:
/// - first open equals the parent open, last close equals the parent close
/// - every sub high/low lies within the parent `[low, high]`
/// - volumes sum to the parent volume
/// - only the last sub-candle may be closed, and only if the parent is
pub fn resample(parent: &Candle, span: SubMinuteSpan) -> Vec<Candle> {
    let n = span.count();
    let span_ms = i64::from(span.secs()) * 1000;
    if parent.range() > 0.0 {
        let mut rng = Lcg::seeded(parent.open_time_ms, span.secs());
        let path = boundary_path(parent, n, &mut rng);
        assemble(parent, span_ms, &path, Some(&mut rng))
    } else {
        assemble(parent, span_ms, &flat_path(parent, n), None)
    }
}

/// Boundary prices for a zero-range parent.
fn flat_path(parent: &Candle, n: usize) -> Vec<f64> {
    let mut path = vec![parent.high; n + 1];
    path[0] = parent.open;
    path[n] = parent.close;
    path
}

/// Boundary prices `p[0..=n]` with the extremes pinned to interior points.
#[allow(clippy::cast_precision_loss)]
fn boundary_path(parent: &Candle, n: usize, rng: &mut Lcg) -> Vec<f64> {
    let mid = n / 2;
    let first_half = (1, mid);
    let second_half = (mid + 1, n - 1);
    let (high_half, low_half) = if parent.is_bullish() {
        (second_half, first_half)
    } else {
        (first_half, second_half)
    };
    let high_idx = rng.pick(high_half.0, high_half.1);
    let low_idx = rng.pick(low_half.0, low_half.1);

    let mut anchors = [
        (0, parent.open),
        (low_idx, parent.low),
        (high_idx, parent.high),
        (n, parent.close),
    ];
    anchors.sort_by_key(|(idx, _)| *idx);

    let range = parent.range();
    let mut path = vec![0.0; n + 1];
    for pair in anchors.windows(2) {
        let (ia, pa) = pair[0];
        let (ib, pb) = pair[1];
        path[ia] = pa;
        for k in ia + 1..ib {
            let t = (k - ia) as f64 / (ib - ia) as f64;
            let base = (pb - pa).mul_add(t, pa);
            let noise = (rng.next_f64() - 0.5) * 2.0 * PERTURBATION * range;
            path[k] = (base + noise).clamp(parent.low, parent.high);
        }
    }
    path[n] = parent.close;
    path
}

#[allow(clippy::cast_precision_loss, clippy::cast_possible_wrap)]
fn assemble(
    parent: &Candle,
    span_ms: i64,
    path: &[f64],
    mut rng: Option<&mut Lcg>,
) -> Vec<Candle> {
    let n = path.len() - 1;
    let range = parent.range();
    let per_volume = parent.volume / n as f64;

    (0..n)
        .map(|i| {
            let open = path[i];
            let close = path[i + 1];
            let body_high = open.max(close);
            let body_low = open.min(close);
            let (high, low) = match rng.as_deref_mut() {
                Some(rng) => {
                    let up = rng.next_f64() * WICK * range;
                    let down = rng.next_f64() * WICK * range;
                    (
                        (body_high + up).min(parent.high),
                        (body_low - down).max(parent.low),
                    )
                }
                None => (body_high, body_low),
            };
            let last = i == n - 1;
            let volume = if last {
                per_volume.mul_add(-((n - 1) as f64), parent.volume)
            } else {
                per_volume
            };
            Candle {
                open_time_ms: parent.open_time_ms + i as i64 * span_ms,
                open,
                high,
                low,
                close,
                volume,
                is_closed: last && parent.is_closed,
            }
        })
        .collect()
}

/// Remembers the most recent 1-minute candle per key.
///
/// [`CandleTracker::observe`] returns the bars that should be forwarded:
/// nothing for a duplicate push or a stale window, the new bar otherwise.
/// With `infer_close` set (venues without an explicit closed flag), a
/// push for a newer window first yields the previous bar marked closed.
#[derive(Debug)]
pub struct CandleTracker<K> {
    last: HashMap<K, Candle>,
    infer_close: bool,
}

impl<K: Eq + Hash + Clone> CandleTracker<K> {
    pub fn new(infer_close: bool) -> Self {
        Self {
            last: HashMap::new(),
            infer_close,
        }
    }

    pub fn observe(&mut self, key: &K, candle: Candle) -> Vec<Candle> {
        let mut out = Vec::with_capacity(2);
        if let Some(prev) = self.last.get(key) {
            if *prev == candle || candle.open_time_ms < prev.open_time_ms {
                return out;
            }
            if self.infer_close && candle.open_time_ms > prev.open_time_ms && !prev.is_closed {
                out.push(prev.closed());
            }
        }
        self.last.insert(key.clone(), candle);
        out.push(candle);
        out
    }

    pub fn forget(&mut self, key: &K) {
        self.last.remove(key);
    }

    pub fn len(&self) -> usize {
        self.last.len()
    }

    pub fn is_empty(&self) -> bool {
        self.last.is_empty()
    }
}
