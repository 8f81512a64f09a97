//! Per-round shard result table and completion countdown.
//!
//! Every shard ordinal owns one write-once slot, so concurrent completions
//! never contend on the table. The [`Countdown`] is the single shared
//! mutation point of a round: many completions race to decrement it and
//! exactly one observes zero and wakes the coordinator.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, OnceLock, PoisonError};
use tokio::sync::oneshot;

/// Fixed-size, index-addressed, write-once result slots.
pub struct ShardResultTable<T> {
    slots: Vec<OnceLock<T>>,
}

impl<T> ShardResultTable<T> {
    pub fn new(len: usize) -> Self {
        Self {
            slots: (0..len).map(|_| OnceLock::new()).collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Fill a slot. Returns the value back if the slot is out of range or
    /// already filled.
    pub fn set(&self, ordinal: usize, value: T) -> Result<(), T> {
        match self.slots.get(ordinal) {
            Some(slot) => slot.set(value),
            None => Err(value),
        }
    }

    pub fn get(&self, ordinal: usize) -> Option<&T> {
        self.slots.get(ordinal).and_then(OnceLock::get)
    }

    /// Filled slots in ordinal order.
    pub fn filled(&self) -> impl Iterator<Item = (usize, &T)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(ordinal, slot)| slot.get().map(|v| (ordinal, v)))
    }

    pub fn filled_count(&self) -> usize {
        self.filled().count()
    }

    /// The lowest filled ordinal; used as the round's representative.
    pub fn first_filled(&self) -> Option<(usize, &T)> {
        self.filled().next()
    }
}

/// Atomic countdown that fires a oneshot exactly once when it reaches zero.
pub struct Countdown {
    remaining: AtomicUsize,
    on_zero: Mutex<Option<oneshot::Sender<()>>>,
}

impl Countdown {
    /// Create a countdown of `count`. A zero count is complete immediately.
    pub fn new(count: usize) -> (Arc<Self>, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        let countdown = Arc::new(Self {
            remaining: AtomicUsize::new(count),
            on_zero: Mutex::new(Some(tx)),
        });
        if count == 0 {
            countdown.fire();
        }
        (countdown, rx)
    }

    /// Decrement once. Returns true for the one call that reached zero.
    pub fn count_down(&self) -> bool {
        let previous = self
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        match previous {
            Ok(1) => {
                self.fire();
                true
            }
            _ => false,
        }
    }

    pub fn remaining(&self) -> usize {
        self.remaining.load(Ordering::Acquire)
    }

    /// A guard that counts down when dropped, including on panic.
    pub fn guard(self: &Arc<Self>) -> CountdownGuard {
        CountdownGuard(Arc::clone(self))
    }

    fn fire(&self) {
        let sender = self
            .on_zero
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(tx) = sender {
            let _ = tx.send(());
        }
    }
}

/// Counts its countdown down exactly once, on drop.
pub struct CountdownGuard(Arc<Countdown>);

impl Drop for CountdownGuard {
    fn drop(&mut self) {
        self.0.count_down();
    }
}
