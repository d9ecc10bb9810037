//! Lock-free ring buffer for audio samples
//!
//! Single-producer single-consumer sample queue sitting between the
//! real-time capture callback (producer) and the network tick (consumer).
//! Fullness and emptiness are derived from the two cursors alone; neither
//! side ever blocks.

use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicI16, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

/// Fixed-capacity sample ring.
///
/// `head` and `tail` count samples ever written and ever read. They only
/// grow (wrapping), so `head - tail` is the fill level and all `N` slots
/// are usable. The slot for a cursor is `cursor % N`.
pub struct SampleRing<const N: usize> {
    slots: Box<[AtomicI16]>,
    /// Written only by the producer.
    head: CachePadded<AtomicUsize>,
    /// Written only by the consumer.
    tail: CachePadded<AtomicUsize>,
    overflow_count: AtomicU64,
}

impl<const N: usize> SampleRing<N> {
    pub const CAPACITY: usize = N;

    fn new() -> Self {
        assert!(N > 0, "ring capacity must be non-zero");
        Self {
            slots: (0..N).map(|_| AtomicI16::new(0)).collect(),
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            overflow_count: AtomicU64::new(0),
        }
    }

    /// Create a ring and split it into its two endpoints.
    pub fn split() -> (RingProducer<N>, RingConsumer<N>) {
        let ring = Arc::new(Self::new());
        (
            RingProducer { ring: ring.clone() },
            RingConsumer { ring },
        )
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        head.wrapping_sub(tail)
    }
}

/// Write endpoint. Owned by the capture callback.
pub struct RingProducer<const N: usize> {
    ring: Arc<SampleRing<N>>,
}

impl<const N: usize> RingProducer<N> {
    /// Append one sample. Returns false, dropping the sample, when full.
    #[inline]
    pub fn try_write(&mut self, sample: i16) -> bool {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let tail = ring.tail.load(Ordering::Acquire);

        if head.wrapping_sub(tail) >= N {
            ring.overflow_count.fetch_add(1, Ordering::Relaxed);
            return false;
        }

        ring.slots[head % N].store(sample, Ordering::Relaxed);
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        true
    }

    /// Free slots as seen from the producer.
    pub fn free(&self) -> usize {
        N - self.ring.len()
    }

    pub fn is_full(&self) -> bool {
        self.free() == 0
    }

    /// Samples dropped because the ring was full.
    pub fn overflow_count(&self) -> u64 {
        self.ring.overflow_count.load(Ordering::Relaxed)
    }
}

/// Read endpoint. Owned by the network tick.
pub struct RingConsumer<const N: usize> {
    ring: Arc<SampleRing<N>>,
}

impl<const N: usize> RingConsumer<N> {
    /// Samples published by the producer and not yet read.
    pub fn available(&self) -> usize {
        self.ring.len()
    }

    /// Fill `out` in FIFO order. Reads at most `available()` samples and
    /// returns how many were copied.
    pub fn read(&mut self, out: &mut [i16]) -> usize {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);
        let count = head.wrapping_sub(tail).min(out.len());

        for (i, dst) in out.iter_mut().take(count).enumerate() {
            *dst = ring.slots[tail.wrapping_add(i) % N].load(Ordering::Relaxed);
        }
        ring.tail.store(tail.wrapping_add(count), Ordering::Release);
        count
    }

    /// Discard everything currently buffered.
    pub fn clear(&mut self) -> usize {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let head = ring.head.load(Ordering::Acquire);
        ring.tail.store(head, Ordering::Release);
        head.wrapping_sub(tail)
    }

    pub fn is_empty(&self) -> bool {
        self.available() == 0
    }

    pub fn capacity(&self) -> usize {
        N
    }

    /// Fill level as a fraction of capacity
    pub fn fill_level(&self) -> f32 {
        self.available() as f32 / N as f32
    }

    pub fn overflow_count(&self) -> u64 {
        self.ring.overflow_count.load(Ordering::Relaxed)
    }
}
