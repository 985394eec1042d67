//! Counter-based completion tracking for a dependency phase.
//!
//! The orchestrator increments the counter once per dispatched help record
//! and every thread that finishes a record decrements it. Draining the
//! primary queue is not enough on its own to close a phase, because a
//! thief may still be inside a record it stole. Waiting for the counter to
//! reach zero is what makes the drain a real barrier.

use crossbeam::utils::CachePadded;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

/// A thread-safe count of outstanding dispatch records.
#[derive(Clone, Debug, Default)]
pub struct PhaseCounter {
    inner: Arc<CachePadded<AtomicUsize>>,
}

impl PhaseCounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers one more outstanding record.
    #[inline]
    pub fn increment(&self) {
        self.inner.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks one record finished.
    ///
    /// Release ordering publishes everything the record wrote to whoever
    /// observes the counter at zero. Returns true if this was the last one.
    #[inline]
    pub fn decrement(&self) -> bool {
        self.inner.fetch_sub(1, Ordering::Release) == 1
    }

    #[inline]
    pub fn value(&self) -> usize {
        self.inner.load(Ordering::Acquire)
    }

    /// Checks if every registered record has finished.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.value() == 0
    }
}
