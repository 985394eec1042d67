//! Tuning strategy and its lock-free publication cell.
//!
//! The [`StrategyCell`] is a double buffer: two slots and an atomic index
//! naming the active one. The single publisher writes the inactive slot and
//! then flips the index, so readers on the hot path pay one index load and
//! one slot read.
//!
//! A reader that loaded the index just before two back-to-back publishes
//! could otherwise be reading a slot that is being rewritten. Each slot
//! therefore carries a stamp (odd while being written) and the reader
//! retries on a stamp mismatch. The fields themselves are atomics, so
//! there is no data race at the language level either way.

use crossbeam::utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering, fence};

/// Batch size used until the oracle says otherwise.
pub const DEFAULT_BATCH_SIZE: u32 = 1024;
pub const DEFAULT_CONFIDENCE: f32 = 0.5;

/// Parameters governing how jobs are dispatched.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Strategy {
    /// Items claimed per fetch-and-add.
    pub batch_size: u32,
    /// Help records pushed per job.
    pub thread_count: u32,
    /// Oracle confidence, informational.
    pub confidence: f32,
    /// Core-type hint (e.g. 1 = performance cores only), informational.
    pub affinity_hint: u32,
}

impl Strategy {
    /// The conservative default: 1024-item batches across every logical core.
    pub fn conservative(logical_cores: usize) -> Self {
        Strategy {
            batch_size: DEFAULT_BATCH_SIZE,
            thread_count: logical_cores.clamp(1, u32::MAX as usize) as u32,
            confidence: DEFAULT_CONFIDENCE,
            affinity_hint: 0,
        }
    }

    /// Batch size as used by the executor (never zero).
    #[inline]
    pub fn effective_batch(&self) -> usize {
        self.batch_size.max(1) as usize
    }
}

struct Slot {
    stamp: AtomicU64,
    batch_size: AtomicU32,
    thread_count: AtomicU32,
    confidence: AtomicU32,
    affinity_hint: AtomicU32,
}

impl Slot {
    fn new(s: Strategy) -> Self {
        Slot {
            stamp: AtomicU64::new(0),
            batch_size: AtomicU32::new(s.batch_size),
            thread_count: AtomicU32::new(s.thread_count),
            confidence: AtomicU32::new(s.confidence.to_bits()),
            affinity_hint: AtomicU32::new(s.affinity_hint),
        }
    }

    fn store(&self, s: Strategy) {
        let stamp = self.stamp.load(Ordering::Relaxed);
        self.stamp.store(stamp.wrapping_add(1), Ordering::Relaxed);
        fence(Ordering::Release);

        self.batch_size.store(s.batch_size, Ordering::Relaxed);
        self.thread_count.store(s.thread_count, Ordering::Relaxed);
        self.confidence.store(s.confidence.to_bits(), Ordering::Relaxed);
        self.affinity_hint.store(s.affinity_hint, Ordering::Relaxed);

        self.stamp.store(stamp.wrapping_add(2), Ordering::Release);
    }

    /// Returns `None` if the slot was written during the read.
    fn try_load(&self) -> Option<Strategy> {
        let before = self.stamp.load(Ordering::Acquire);
        if before & 1 == 1 {
            return None;
        }

        let s = Strategy {
            batch_size: self.batch_size.load(Ordering::Relaxed),
            thread_count: self.thread_count.load(Ordering::Relaxed),
            confidence: f32::from_bits(self.confidence.load(Ordering::Relaxed)),
            affinity_hint: self.affinity_hint.load(Ordering::Relaxed),
        };

        fence(Ordering::Acquire);
        (self.stamp.load(Ordering::Relaxed) == before).then_some(s)
    }
}

struct Cell {
    slots: [CachePadded<Slot>; 2],
    active: CachePadded<AtomicUsize>,
    generation: AtomicU64,
}

/// Constructor namespace for the publisher/reader pair.
pub struct StrategyCell;

impl StrategyCell {
    /// Creates a cell holding `initial` in both slots.
    ///
    /// The publisher is not `Clone`, so exactly one writer exists.
    #[allow(clippy::new_ret_no_self)]
    pub fn new(initial: Strategy) -> (StrategyPublisher, StrategyReader) {
        let cell = Arc::new(Cell {
            slots: [
                CachePadded::new(Slot::new(initial)),
                CachePadded::new(Slot::new(initial)),
            ],
            active: CachePadded::new(AtomicUsize::new(0)),
            generation: AtomicU64::new(0),
        });
        (
            StrategyPublisher {
                cell: Arc::clone(&cell),
            },
            StrategyReader { cell },
        )
    }
}

/// The single writing handle.
pub struct StrategyPublisher {
    cell: Arc<Cell>,
}

impl StrategyPublisher {
    /// Writes `strategy` into the inactive slot and makes it active.
    pub fn publish(&mut self, strategy: Strategy) {
        let active = self.cell.active.load(Ordering::Relaxed);
        let back = active ^ 1;
        self.cell.slots[back].store(strategy);
        self.cell.active.swap(back, Ordering::AcqRel);
        self.cell.generation.fetch_add(1, Ordering::Release);
    }

    pub fn reader(&self) -> StrategyReader {
        StrategyReader {
            cell: Arc::clone(&self.cell),
        }
    }
}

/// Wait-free (in the absence of back-to-back publishes) reading handle.
#[derive(Clone)]
pub struct StrategyReader {
    cell: Arc<Cell>,
}

impl StrategyReader {
    /// The currently active strategy, always a complete published value.
    #[inline]
    pub fn read(&self) -> Strategy {
        loop {
            let active = self.cell.active.load(Ordering::Acquire);
            if let Some(s) = self.cell.slots[active].try_load() {
                return s;
            }
            std::hint::spin_loop();
        }
    }

    /// Number of publishes so far.
    pub fn generation(&self) -> u64 {
        self.cell.generation.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for StrategyReader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyReader")
            .field("current", &self.read())
            .field("generation", &self.generation())
            .finish()
    }
}

impl std::fmt::Debug for StrategyPublisher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StrategyPublisher").finish_non_exhaustive()
    }
}
