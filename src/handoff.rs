//! Depth-1 hand-off from the capture completion to the sampling task.
//!
//! The producer never blocks: a completion that arrives while another is
//! still pending replaces it, so the consumer only ever sees the newest one.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Condvar, Mutex, PoisonError};
use std::time::Duration;

pub trait Handoff<T>: Send + Sync {
    /// Non-blocking enqueue that overwrites a pending item.
    ///
    /// Returns `true` when a waiting consumer should be scheduled.
    fn offer(&self, item: T) -> bool;

    /// Waits at most `timeout` for an item. `Duration::ZERO` polls.
    fn take(&self, timeout: Duration) -> Option<T>;

    /// Number of items replaced before the consumer drained them.
    fn overwritten(&self) -> u32;
}

struct Slot<T> {
    item: Option<T>,
    waiters: usize,
}

/// Single-slot handoff for producers running in task context.
pub struct SlotHandoff<T> {
    slot: Mutex<Slot<T>>,
    ready: Condvar,
    overwritten: AtomicU32,
}

impl<T> SlotHandoff<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(Slot {
                item: None,
                waiters: 0,
            }),
            ready: Condvar::new(),
            overwritten: AtomicU32::new(0),
        }
    }
}

impl<T> Default for SlotHandoff<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Send> Handoff<T> for SlotHandoff<T> {
    fn offer(&self, item: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.item.replace(item).is_some() {
            self.overwritten.fetch_add(1, Ordering::Relaxed);
        }
        let woken = slot.waiters > 0;
        drop(slot);
        self.ready.notify_one();
        woken
    }

    fn take(&self, timeout: Duration) -> Option<T> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.item.is_none() && !timeout.is_zero() {
            slot.waiters += 1;
            let (mut guard, _) = self
                .ready
                .wait_timeout_while(slot, timeout, |slot| slot.item.is_none())
                .unwrap_or_else(PoisonError::into_inner);
            guard.waiters -= 1;
            slot = guard;
        }
        slot.item.take()
    }

    fn overwritten(&self) -> u32 {
        self.overwritten.load(Ordering::Relaxed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Instant;

    #[test]
    fn later_offer_replaces_pending() {
        let handoff = SlotHandoff::new();
        assert!(!handoff.offer(1));
        assert!(!handoff.offer(2));
        assert_eq!(handoff.overwritten(), 1);
        assert_eq!(handoff.take(Duration::from_millis(10)), Some(2));
        assert_eq!(handoff.take(Duration::ZERO), None);
    }

    #[test]
    fn take_times_out() {
        let handoff = SlotHandoff::<u8>::new();
        let started = Instant::now();
        assert_eq!(handoff.take(Duration::from_millis(30)), None);
        assert!(started.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn wakes_waiting_consumer() {
        let handoff = Arc::new(SlotHandoff::new());
        let consumer = {
            let handoff = handoff.clone();
            thread::spawn(move || handoff.take(Duration::from_secs(5)))
        };

        // Wait until the consumer is parked so the offer reports a wakeup.
        let deadline = Instant::now() + Duration::from_secs(5);
        while handoff.slot.lock().unwrap().waiters == 0 {
            assert!(Instant::now() < deadline);
            thread::yield_now();
        }
        assert!(handoff.offer(7u32));
        assert_eq!(consumer.join().unwrap(), Some(7));
    }
}
