//! Tick Publisher - Bounded, Isolated Listener Fan-out
//!
//! Listeners run synchronously on the feed task that produced the batch.
//! A listener that returns `Err` or panics is logged and skipped; the
//! remaining listeners still receive the batch.

use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use parking_lot::RwLock;
use tracing::{error, warn};

use crate::error::StreamError;
use crate::ports::market_feed::{TickBatch, TickListener};

/// Default upper bound on registered listeners.
pub const DEFAULT_MAX_LISTENERS: usize = 64;

/// Registration token returned by [`TickPublisher::on_tick`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

pub struct TickPublisher {
  listeners: RwLock<Vec<(ListenerId, Arc<dyn TickListener>)>>,
  next_id: AtomicU64,
  capacity: usize,
}

impl TickPublisher {
  pub fn new(capacity: usize) -> Self {
    Self {
      listeners: RwLock::new(Vec::new()),
      next_id: AtomicU64::new(1),
      capacity,
    }
  }

  /// Register a listener. Fails once `capacity` listeners are registered.
  pub fn on_tick(&self, listener: Arc<dyn TickListener>) -> Result<ListenerId, StreamError> {
    let mut listeners = self.listeners.write();
    if listeners.len() >= self.capacity {
      return Err(StreamError::ListenerCapacity(self.capacity));
    }
    let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
    listeners.push((id, listener));
    Ok(id)
  }

  /// Remove a listener. Returns false if it was not registered.
  pub fn off_tick(&self, id: ListenerId) -> bool {
    let mut listeners = self.listeners.write();
    let before = listeners.len();
    listeners.retain(|(lid, _)| *lid != id);
    listeners.len() != before
  }

  pub fn len(&self) -> usize {
    self.listeners.read().len()
  }

  pub fn is_empty(&self) -> bool {
    self.listeners.read().is_empty()
  }

  /// Deliver a batch to every listener. Returns how many succeeded.
  pub fn publish(&self, batch: &TickBatch) -> usize {
    // Snapshot so listeners may (un)register from inside the callback.
    let listeners: Vec<(ListenerId, Arc<dyn TickListener>)> = self.listeners.read().clone();

    let mut delivered = 0;
    for (id, listener) in listeners {
      match catch_unwind(AssertUnwindSafe(|| listener.on_tick(batch))) {
        Ok(Ok(())) => delivered += 1,
        Ok(Err(e)) => {
          warn!(listener = id.0, venue = %batch.venue, market = %batch.market, error = %e, "Tick listener failed");
        }
        Err(_) => {
          error!(listener = id.0, venue = %batch.venue, market = %batch.market, "Tick listener panicked");
        }
      }
    }
    delivered
  }
}

impl Default for TickPublisher {
  fn default() -> Self {
    Self::new(DEFAULT_MAX_LISTENERS)
  }
}

#[cfg(test)]
mod tests {
  use std::collections::HashMap;
  use std::sync::atomic::AtomicUsize;

  use super::*;
  use crate::domain::market::{Market, Venue};

  fn batch() -> TickBatch {
    TickBatch {
      venue: Venue::Binance,
      market: Market::Spot,
      prices: HashMap::from([("BTCUSDT".to_string(), 1.0)]),
    }
  }

  #[test]
  fn test_failing_and_panicking_listeners_are_isolated() {
    let publisher = TickPublisher::new(8);
    let hits = Arc::new(AtomicUsize::new(0));

    publisher
      .on_tick(Arc::new(|_: &TickBatch| -> anyhow::Result<()> { anyhow::bail!("boom") }))
      .unwrap();
    publisher
      .on_tick(Arc::new(|_: &TickBatch| -> anyhow::Result<()> { panic!("listener bug") }))
      .unwrap();
    let counter = Arc::clone(&hits);
    publisher
      .on_tick(Arc::new(move |_: &TickBatch| -> anyhow::Result<()> {
        counter.fetch_add(1, Ordering::SeqCst);
        Ok(())
      }))
      .unwrap();

    assert_eq!(publisher.publish(&batch()), 1);
    assert_eq!(publisher.publish(&batch()), 1);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
  }

  #[test]
  fn test_capacity_and_removal() {
    let publisher = TickPublisher::new(2);
    let noop = || Arc::new(|_: &TickBatch| -> anyhow::Result<()> { Ok(()) });

    let a = publisher.on_tick(noop()).unwrap();
    publisher.on_tick(noop()).unwrap();
    assert!(matches!(publisher.on_tick(noop()), Err(StreamError::ListenerCapacity(2))));

    assert!(publisher.off_tick(a));
    assert!(!publisher.off_tick(a));
    assert_eq!(publisher.len(), 1);
    assert!(publisher.on_tick(noop()).is_ok());
  }
}
