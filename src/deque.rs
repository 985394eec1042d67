//! Fixed-capacity lock-free work-stealing deque.
//!
//! The owner pushes and pops at `head` (LIFO), thieves steal at `tail`
//! (FIFO). Records are [`TaskDescriptor`]s packed into `AtomicU32` slots,
//! so the speculative slot read a thief performs before its CAS is an
//! ordinary atomic load and never a data race, even when the owner has
//! already recycled the slot.
//!
//! The handle split mirrors `crossbeam::deque`: [`LocalQueue`] may only be
//! used by the owning thread (it is `Send` but not `Sync`), while any number
//! of [`Stealer`] clones can be shared with peers.
//!
//! Unlike the unbounded crossbeam deque this one never grows. A push onto a
//! full queue is rejected with [`QueueFull`] instead of wrapping over live
//! records.

use crate::error::{EngineError, QueueFull};
use crate::task::TaskDescriptor;
use crossbeam::utils::CachePadded;
use std::cell::Cell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::sync::atomic::{AtomicIsize, AtomicU32, Ordering, fence};

/// Result of a steal attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Steal<T> {
    /// The queue was empty.
    Empty,
    /// A record was taken.
    Success(T),
    /// Lost a race with the owner or another thief; the queue may still hold work.
    Retry,
}

impl<T> Steal<T> {
    pub fn success(self) -> Option<T> {
        match self {
            Steal::Success(t) => Some(t),
            _ => None,
        }
    }

    pub fn is_retry(&self) -> bool {
        matches!(self, Steal::Retry)
    }
}

struct Buffer {
    slots: Box<[AtomicU32]>,
    mask: usize,
    /// Owner-controlled end.
    head: CachePadded<AtomicIsize>,
    /// End shared by thieves and the owner's last-item race.
    tail: CachePadded<AtomicIsize>,
}

impl Buffer {
    #[inline]
    fn slot(&self, index: isize) -> &AtomicU32 {
        &self.slots[index as usize & self.mask]
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        (head - tail).max(0) as usize
    }
}

/// Creates a queue with the given capacity, returning the owner handle and a stealer.
///
/// # Errors
/// [`EngineError::CapacityNotPowerOfTwo`] if `capacity` is zero or not a power of two.
pub fn work_queue(capacity: usize) -> Result<(LocalQueue, Stealer), EngineError> {
    if !capacity.is_power_of_two() {
        return Err(EngineError::CapacityNotPowerOfTwo {
            what: "work queue",
            capacity,
        });
    }

    let slots = (0..capacity).map(|_| AtomicU32::new(0)).collect();
    let buffer = Arc::new(Buffer {
        slots,
        mask: capacity - 1,
        head: CachePadded::new(AtomicIsize::new(0)),
        tail: CachePadded::new(AtomicIsize::new(0)),
    });

    let stealer = Stealer {
        buffer: Arc::clone(&buffer),
    };
    let local = LocalQueue {
        buffer,
        _not_sync: PhantomData,
    };
    Ok((local, stealer))
}

/// Owner side of the deque.
pub struct LocalQueue {
    buffer: Arc<Buffer>,
    _not_sync: PhantomData<Cell<()>>,
}

impl LocalQueue {
    /// Pushes a record at the owner end.
    ///
    /// # Errors
    /// Returns the record back inside [`QueueFull`] when `capacity` records
    /// are already queued.
    #[inline]
    pub fn push(&self, task: TaskDescriptor) -> Result<(), QueueFull> {
        let b = &*self.buffer;
        let head = b.head.load(Ordering::Relaxed);
        let tail = b.tail.load(Ordering::Acquire);

        // A stale tail can only make the queue look fuller than it is.
        if head - tail >= b.slots.len() as isize {
            return Err(QueueFull(task));
        }

        b.slot(head).store(task.to_bits(), Ordering::Relaxed);
        fence(Ordering::Release);
        b.head.store(head + 1, Ordering::Release);
        Ok(())
    }

    /// Pops the most recently pushed record.
    #[inline]
    pub fn pop(&self) -> Option<TaskDescriptor> {
        let b = &*self.buffer;
        let head = b.head.load(Ordering::Relaxed) - 1;
        b.head.store(head, Ordering::Relaxed);
        fence(Ordering::SeqCst);
        let tail = b.tail.load(Ordering::Relaxed);

        if head < tail {
            b.head.store(tail, Ordering::Relaxed);
            return None;
        }

        let task = TaskDescriptor::from_bits(b.slot(head).load(Ordering::Relaxed));

        if head == tail {
            // Last record: race any thief for it.
            let won = b
                .tail
                .compare_exchange(tail, tail + 1, Ordering::SeqCst, Ordering::Relaxed)
                .is_ok();
            b.head.store(tail + 1, Ordering::Relaxed);
            if !won {
                return None;
            }
        }

        Some(task)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    pub fn capacity(&self) -> usize {
        self.buffer.slots.len()
    }

    /// Creates another stealer for this queue.
    pub fn stealer(&self) -> Stealer {
        Stealer {
            buffer: Arc::clone(&self.buffer),
        }
    }
}

impl std::fmt::Debug for LocalQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalQueue")
            .field("len", &self.len())
            .field("capacity", &self.capacity())
            .finish()
    }
}

/// Thief side of the deque.
#[derive(Clone)]
pub struct Stealer {
    buffer: Arc<Buffer>,
}

impl Stealer {
    /// Attempts to take the oldest record.
    #[inline]
    pub fn steal(&self) -> Steal<TaskDescriptor> {
        let b = &*self.buffer;
        let tail = b.tail.load(Ordering::Acquire);
        fence(Ordering::SeqCst);
        let head = b.head.load(Ordering::Acquire);

        if head <= tail {
            return Steal::Empty;
        }

        let task = TaskDescriptor::from_bits(b.slot(tail).load(Ordering::Relaxed));

        if b
            .tail
            .compare_exchange(tail, tail + 1, Ordering::SeqCst, Ordering::Relaxed)
            .is_err()
        {
            return Steal::Retry;
        }

        Steal::Success(task)
    }

    pub fn is_empty(&self) -> bool {
        self.buffer.len() == 0
    }

    pub fn len(&self) -> usize {
        self.buffer.len()
    }
}

impl std::fmt::Debug for Stealer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Stealer").field("len", &self.len()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobId;
    use std::sync::atomic::{AtomicBool, AtomicUsize};
    use std::thread;

    fn task(n: u16) -> TaskDescriptor {
        TaskDescriptor::new(JobId::new(n))
    }

    #[test]
    fn test_rejects_non_power_of_two() {
        assert!(matches!(
            work_queue(3),
            Err(EngineError::CapacityNotPowerOfTwo { capacity: 3, .. })
        ));
        assert!(work_queue(0).is_err());
        assert!(work_queue(8).is_ok());
    }

    #[test]
    fn test_owner_pop_is_lifo() {
        let (local, _) = work_queue(8).unwrap();
        for n in 1..=3 {
            local.push(task(n)).unwrap();
        }
        assert_eq!(local.pop(), Some(task(3)));
        assert_eq!(local.pop(), Some(task(2)));
        assert_eq!(local.pop(), Some(task(1)));
        assert_eq!(local.pop(), None);
        assert!(local.is_empty());
    }

    #[test]
    fn test_steal_is_fifo() {
        let (local, stealer) = work_queue(8).unwrap();
        for n in 1..=3 {
            local.push(task(n)).unwrap();
        }
        assert_eq!(stealer.steal(), Steal::Success(task(1)));
        assert_eq!(stealer.steal(), Steal::Success(task(2)));
        assert_eq!(local.pop(), Some(task(3)));
        assert_eq!(stealer.steal(), Steal::Empty);
    }

    #[test]
    fn test_push_beyond_capacity_is_rejected() {
        let (local, stealer) = work_queue(4).unwrap();
        for n in 0..4 {
            local.push(task(n)).unwrap();
        }
        assert_eq!(local.push(task(99)), Err(QueueFull(task(99))));
        assert_eq!(local.len(), 4);

        // Existing records are intact and space frees up after a steal.
        assert_eq!(stealer.steal(), Steal::Success(task(0)));
        local.push(task(4)).unwrap();
        let drained: Vec<_> = std::iter::from_fn(|| local.pop()).collect();
        assert_eq!(drained, vec![task(4), task(3), task(2), task(1)]);
    }

    #[test]
    fn test_wraparound_reuses_slots() {
        let (local, stealer) = work_queue(4).unwrap();
        for round in 0..10u16 {
            local.push(task(round)).unwrap();
            local.push(task(round + 100)).unwrap();
            assert_eq!(stealer.steal(), Steal::Success(task(round)));
            assert_eq!(local.pop(), Some(task(round + 100)));
        }
        assert!(local.is_empty());
    }

    #[test]
    fn test_concurrent_steal_exactly_once() {
        const TASKS: usize = 4096;
        const THIEVES: usize = 4;

        let (local, stealer) = work_queue(TASKS).unwrap();
        let seen: Arc<Vec<AtomicUsize>> = Arc::new((0..TASKS).map(|_| AtomicUsize::new(0)).collect());
        let done = Arc::new(AtomicBool::new(false));

        let thieves: Vec<_> = (0..THIEVES)
            .map(|_| {
                let stealer = stealer.clone();
                let seen = Arc::clone(&seen);
                let done = Arc::clone(&done);
                thread::spawn(move || {
                    loop {
                        match stealer.steal() {
                            Steal::Success(t) => {
                                seen[t.job.index()].fetch_add(1, Ordering::Relaxed);
                            }
                            Steal::Retry => continue,
                            Steal::Empty => {
                                if done.load(Ordering::Acquire) {
                                    break;
                                }
                                std::hint::spin_loop();
                            }
                        }
                    }
                })
            })
            .collect();

        for n in 0..TASKS {
            local.push(task(n as u16)).unwrap();
            if n % 3 == 0 {
                if let Some(t) = local.pop() {
                    seen[t.job.index()].fetch_add(1, Ordering::Relaxed);
                }
            }
        }
        while let Some(t) = local.pop() {
            seen[t.job.index()].fetch_add(1, Ordering::Relaxed);
        }
        done.store(true, Ordering::Release);

        for thief in thieves {
            thief.join().unwrap();
        }

        for (n, count) in seen.iter().enumerate() {
            assert_eq!(count.load(Ordering::Relaxed), 1, "task {n} executed wrong number of times");
        }
    }
}
