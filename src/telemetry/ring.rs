//! Lock-free multi-producer / single-consumer ring of [`Sample`]s.
//!
//! Every slot carries an unmasked sequence number. A slot is free for
//! position `p` when its sequence equals `p`, and readable when it equals
//! `p + 1`. After reading, the consumer stores `p + capacity`, which is what
//! a producer expects one lap later. Because the sequence is never masked
//! a lagging producer cannot mistake an old lap for a free slot.
//!
//! Producers never block: when the target slot is not free the sample is
//! dropped. Losing telemetry under backpressure is acceptable and nothing
//! about execution depends on a sample arriving.

use super::Sample;
use crate::error::EngineError;
use crossbeam::utils::CachePadded;
use std::cell::UnsafeCell;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

struct Slot {
    sequence: AtomicUsize,
    payload: UnsafeCell<Sample>,
}

pub(crate) struct TelemetryRing {
    slots: Box<[Slot]>,
    mask: usize,
    /// Next position to reserve; shared by producers.
    head: CachePadded<AtomicUsize>,
    /// Next position to read; only the consumer advances it.
    tail: CachePadded<AtomicUsize>,
    dropped: AtomicU64,
}

// SAFETY: a payload is written only by the producer that won the CAS for
// its position and read only by the consumer after observing the
// release-stored sequence, so no slot is ever accessed concurrently.
unsafe impl Sync for TelemetryRing {}
unsafe impl Send for TelemetryRing {}

impl TelemetryRing {
    /// # Errors
    /// [`EngineError::CapacityNotPowerOfTwo`] if `capacity` is zero or not a power of two.
    pub(crate) fn new(capacity: usize) -> Result<Self, EngineError> {
        if !capacity.is_power_of_two() {
            return Err(EngineError::CapacityNotPowerOfTwo {
                what: "telemetry ring",
                capacity,
            });
        }

        let slots = (0..capacity)
            .map(|i| Slot {
                sequence: AtomicUsize::new(i),
                payload: UnsafeCell::new(Sample::default()),
            })
            .collect();

        Ok(TelemetryRing {
            slots,
            mask: capacity - 1,
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            dropped: AtomicU64::new(0),
        })
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of samples dropped because the ring was full or a slot lagged.
    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Attempts to enqueue a sample. Returns `false` (and drops it) instead of blocking.
    pub(crate) fn try_write(&self, sample: Sample) -> bool {
        let mut head = self.head.load(Ordering::Relaxed);
        loop {
            let slot = &self.slots[head & self.mask];
            if slot.sequence.load(Ordering::Acquire) != head {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                return false;
            }

            match self.head.compare_exchange_weak(
                head,
                head.wrapping_add(1),
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => {
                    // SAFETY: winning the CAS grants exclusive access to this
                    // slot until the sequence is published below.
                    unsafe { *slot.payload.get() = sample };
                    slot.sequence.store(head.wrapping_add(1), Ordering::Release);
                    return true;
                }
                Err(current) => head = current,
            }
        }
    }

    /// Consumer side. The caller must be the only reader. Outside this
    /// module the sole caller is the one
    /// [`TelemetryAggregator`](super::TelemetryAggregator) that
    /// [`channel`](super::channel) creates for the ring.
    pub(crate) fn try_read(&self) -> Option<Sample> {
        let tail = self.tail.load(Ordering::Relaxed);
        let slot = &self.slots[tail & self.mask];
        if slot.sequence.load(Ordering::Acquire) != tail.wrapping_add(1) {
            return None;
        }

        // SAFETY: the sequence shows the producer finished writing and no
        // producer can claim the slot until we publish `tail + capacity`.
        let sample = unsafe { *slot.payload.get() };
        self.tail.store(tail.wrapping_add(1), Ordering::Relaxed);
        slot.sequence
            .store(tail.wrapping_add(self.slots.len()), Ordering::Release);
        Some(sample)
    }
}

impl std::fmt::Debug for TelemetryRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryRing")
            .field("capacity", &self.capacity())
            .field("head", &self.head.load(Ordering::Relaxed))
            .field("tail", &self.tail.load(Ordering::Relaxed))
            .field("dropped", &self.dropped())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    fn sample(n: usize) -> Sample {
        Sample {
            duration: Duration::from_nanos(n as u64 * 10),
            items: n,
            worker: n % 7,
            job: JobId::new((n % 64) as u16),
            pressure: None,
        }
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(
            TelemetryRing::new(100),
            Err(EngineError::CapacityNotPowerOfTwo { capacity: 100, .. })
        ));
    }

    #[test]
    fn test_fifo_up_to_capacity() {
        let ring = TelemetryRing::new(16).unwrap();
        for n in 0..16 {
            assert!(ring.try_write(sample(n)));
        }
        for n in 0..16 {
            assert_eq!(ring.try_read(), Some(sample(n)));
        }
        assert_eq!(ring.try_read(), None);
    }

    #[test]
    fn test_overflow_drops_without_corruption() {
        let ring = TelemetryRing::new(8).unwrap();
        for n in 0..8 {
            assert!(ring.try_write(sample(n)));
        }
        for n in 8..20 {
            assert!(!ring.try_write(sample(n)));
        }
        assert_eq!(ring.dropped(), 12);

        for n in 0..8 {
            assert_eq!(ring.try_read(), Some(sample(n)));
        }
        assert_eq!(ring.try_read(), None);
    }

    #[test]
    fn test_slots_reusable_after_wrap() {
        let ring = TelemetryRing::new(4).unwrap();
        for lap in 0..5 {
            for n in 0..4 {
                assert!(ring.try_write(sample(lap * 4 + n)));
            }
            for n in 0..4 {
                assert_eq!(ring.try_read(), Some(sample(lap * 4 + n)));
            }
        }
    }

    #[test]
    fn test_concurrent_producers_no_duplicates() {
        const PRODUCERS: usize = 4;
        const PER_PRODUCER: usize = 256;

        let ring = Arc::new(TelemetryRing::new(PRODUCERS * PER_PRODUCER).unwrap());
        let handles: Vec<_> = (0..PRODUCERS)
            .map(|p| {
                let ring = Arc::clone(&ring);
                thread::spawn(move || {
                    for n in 0..PER_PRODUCER {
                        assert!(ring.try_write(sample(p * PER_PRODUCER + n)));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let mut items: Vec<usize> = std::iter::from_fn(|| ring.try_read())
            .map(|s| s.items)
            .collect();
        items.sort_unstable();
        assert_eq!(items, (0..PRODUCERS * PER_PRODUCER).collect::<Vec<_>>());
        assert_eq!(ring.dropped(), 0);
    }
}
