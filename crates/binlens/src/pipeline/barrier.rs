//! Ordering barrier
//!
//! Synthesis runs on several workers, but the output stream must keep the
//! envelopes' admission order. The barrier is one shared expected-sequence
//! counter behind a lock: a worker may publish only while the counter equals
//! its envelope's sequence, then advances it by one. Workers whose turn has
//! not come poll with short sleeps. Throughput is bounded by the slowest
//! earlier-sequenced envelope; that trade is accepted over a reorder buffer.

use std::time::Duration;

use tokio::sync::{Mutex, MutexGuard};

/// Poll interval while waiting for an earlier sequence to publish.
const POLL_INTERVAL: Duration = Duration::from_micros(50);

/// Sequence-preserving publication gate.
#[derive(Debug)]
pub struct OrderingBarrier {
    expected: Mutex<u64>,
}

impl OrderingBarrier {
    /// `first` is the first valid sequence index.
    pub fn new(first: u64) -> Self {
        Self {
            expected: Mutex::new(first),
        }
    }

    /// Wait until `sequence` is the next expected index. The returned ticket
    /// holds the barrier; publish while holding it, then call
    /// [`SequenceTicket::complete`] to pass the turn on.
    pub async fn acquire(&self, sequence: u64) -> SequenceTicket<'_> {
        loop {
            let slot = self.expected.lock().await;
            if *slot == sequence {
                return SequenceTicket { slot };
            }
            drop(slot);
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }
}

/// Exclusive right to publish the current sequence index.
pub struct SequenceTicket<'a> {
    slot: MutexGuard<'a, u64>,
}

impl SequenceTicket<'_> {
    /// Advance the barrier to the next sequence.
    pub fn complete(mut self) {
        *self.slot += 1;
    }
}
