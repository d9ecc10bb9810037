//! Single-slot latest-value mailbox
//!
//! Hands the newest decoded packet from a network thread to the periodic
//! consumer tick. Publishing overwrites; nothing ever queues.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Holds at most one unconsumed value.
///
/// Intended for exactly one writer and one reader. The lock is held only
/// for the slot swap, never across I/O.
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
    /// Set after a publish, cleared by the take that consumes it.
    fresh: AtomicBool,
    published: AtomicU64,
    superseded: AtomicU64,
}

impl<T> Mailbox<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            fresh: AtomicBool::new(false),
            published: AtomicU64::new(0),
            superseded: AtomicU64::new(0),
        }
    }

    /// Replace the pending value. Non-blocking apart from the slot swap.
    pub fn publish(&self, value: T) {
        let previous = self.slot.lock().replace(value);
        self.fresh.store(true, Ordering::Release);

        self.published.fetch_add(1, Ordering::Relaxed);
        if previous.is_some() {
            self.superseded.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Take the pending value if one arrived since the last take.
    pub fn take_if_new(&self) -> Option<T> {
        // Empty ticks never touch the lock.
        if !self.fresh.swap(false, Ordering::Acquire) {
            return None;
        }
        self.slot.lock().take()
    }

    /// Whether a value is waiting.
    pub fn has_new(&self) -> bool {
        self.fresh.load(Ordering::Acquire)
    }

    /// Total publishes since creation.
    pub fn published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    /// Publishes that overwrote a value nobody had taken.
    pub fn superseded(&self) -> u64 {
        self.superseded.load(Ordering::Relaxed)
    }
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Mailbox shared between an ingestion thread and the tick.
pub type SharedMailbox<T> = Arc<Mailbox<T>>;

pub fn create_shared_mailbox<T>() -> SharedMailbox<T> {
    Arc::new(Mailbox::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_latest_value_wins() {
        let mailbox = Mailbox::new();
        mailbox.publish("a");
        mailbox.publish("b");

        assert_eq!(mailbox.take_if_new(), Some("b"));
        assert_eq!(mailbox.take_if_new(), None);
        assert_eq!(mailbox.published(), 2);
        assert_eq!(mailbox.superseded(), 1);
    }

    #[test]
    fn test_empty_take() {
        let mailbox: Mailbox<u32> = Mailbox::default();
        assert!(!mailbox.has_new());
        assert_eq!(mailbox.take_if_new(), None);

        mailbox.publish(7);
        assert!(mailbox.has_new());
        assert_eq!(mailbox.take_if_new(), Some(7));
        assert!(!mailbox.has_new());
    }

    #[test]
    fn test_concurrent_writer_never_tears() {
        let mailbox = create_shared_mailbox::<[u64; 8]>();
        let writer = {
            let mailbox = mailbox.clone();
            thread::spawn(move || {
                for i in 0..10_000u64 {
                    mailbox.publish([i; 8]);
                }
            })
        };

        let mut last = None;
        while !writer.is_finished() || mailbox.has_new() {
            if let Some(value) = mailbox.take_if_new() {
                assert!(value.iter().all(|v| *v == value[0]));
                if let Some(prev) = last {
                    assert!(value[0] > prev);
                }
                last = Some(value[0]);
            }
        }
        writer.join().unwrap();

        if let Some(value) = mailbox.take_if_new() {
            last = Some(value[0]);
        }
        assert_eq!(last, Some(9_999));
    }
}
