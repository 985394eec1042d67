//! Job definitions and the registry that owns them.
//!
//! A job is a registered unit of work: an id, a read mask, a write mask and
//! a [`JobBody`] that processes an index range of its workload. Jobs are
//! created at registration and live until the engine is dropped.
//!
//! The [`JobRegistry`] is an arena addressed by [`JobId`]. It is owned by the
//! orchestrator; workers get a [`JobTable`] view of the same slots through
//! their context, so a worker that pops a
//! [`TaskDescriptor`](crate::task::TaskDescriptor) resolves the job with a
//! single index, without any global state.

use crate::error::EngineError;
use crate::executor::JobExecutor;
use crate::mask::DependencyMask;
use std::fmt;
use std::ops::Range;
use std::sync::{Arc, OnceLock};

/// Caller-assigned job identity, stable for the lifetime of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct JobId(u16);

impl JobId {
    pub const fn new(id: u16) -> Self {
        JobId(id)
    }

    #[inline]
    pub const fn index(self) -> usize {
        self.0 as usize
    }
}

impl From<u16> for JobId {
    fn from(id: u16) -> Self {
        JobId(id)
    }
}

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// The work a job performs.
///
/// `item_count` is queried once at the start of every dispatch.
/// `execute` is then called, possibly from several threads at once, with
/// disjoint ranges that together cover `0..item_count()` exactly once.
pub trait JobBody: Send + Sync {
    fn item_count(&self) -> usize;

    fn execute(&self, range: Range<usize>);
}

/// A [`JobBody`] built from two closures.
///
/// # Example
///
/// ```
/// use phasework::job::{FnJob, JobBody};
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let sum = AtomicUsize::new(0);
/// let job = FnJob::new(|| 10, |range: std::ops::Range<usize>| {
///     sum.fetch_add(range.sum::<usize>(), Ordering::Relaxed);
/// });
/// job.execute(0..job.item_count());
/// assert_eq!(sum.load(Ordering::Relaxed), 45);
/// ```
pub struct FnJob<C, F> {
    count: C,
    body: F,
}

impl<C, F> FnJob<C, F>
where
    C: Fn() -> usize + Send + Sync,
    F: Fn(Range<usize>) + Send + Sync,
{
    pub fn new(count: C, body: F) -> Self {
        FnJob { count, body }
    }
}

impl<F> FnJob<Box<dyn Fn() -> usize + Send + Sync>, F>
where
    F: Fn(Range<usize>) + Send + Sync,
{
    /// A job whose item count never changes.
    pub fn fixed(items: usize, body: F) -> Self {
        FnJob {
            count: Box::new(move || items),
            body,
        }
    }
}

impl<C, F> JobBody for FnJob<C, F>
where
    C: Fn() -> usize + Send + Sync,
    F: Fn(Range<usize>) + Send + Sync,
{
    fn item_count(&self) -> usize {
        (self.count)()
    }

    fn execute(&self, range: Range<usize>) {
        (self.body)(range)
    }
}

/// A registered job: identity, declared territory and executor.
pub struct Job {
    id: JobId,
    read: DependencyMask,
    write: DependencyMask,
    executor: JobExecutor,
}

impl Job {
    pub(crate) fn new(
        id: JobId,
        read: DependencyMask,
        write: DependencyMask,
        body: Box<dyn JobBody>,
    ) -> Self {
        Job {
            id,
            read,
            write,
            executor: JobExecutor::new(id, body),
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    pub fn read_mask(&self) -> &DependencyMask {
        &self.read
    }

    pub fn write_mask(&self) -> &DependencyMask {
        &self.write
    }

    pub(crate) fn executor(&self) -> &JobExecutor {
        &self.executor
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("read", &self.read)
            .field("write", &self.write)
            .finish_non_exhaustive()
    }
}

/// Arena of jobs indexed by [`JobId`].
///
/// Each slot is written once during registration (single-threaded, before
/// any frame) and only read afterwards, so lookups from workers are a plain
/// load with no locking.
pub struct JobRegistry {
    slots: Arc<[OnceLock<Job>]>,
    /// Registration order, which is what the planner scans.
    order: Vec<JobId>,
}

impl JobRegistry {
    pub fn with_capacity(capacity: usize) -> Self {
        JobRegistry {
            slots: (0..capacity).map(|_| OnceLock::new()).collect(),
            order: Vec::with_capacity(capacity),
        }
    }

    /// Adds a job.
    ///
    /// # Errors
    /// [`EngineError::RegistryFull`] if the id does not fit the arena,
    /// [`EngineError::DuplicateJob`] if the id is already in use.
    pub fn insert(&mut self, job: Job) -> Result<(), EngineError> {
        let id = job.id;
        let slot = self
            .slots
            .get(id.index())
            .ok_or(EngineError::RegistryFull {
                capacity: self.slots.len(),
            })?;
        slot.set(job).map_err(|_| EngineError::DuplicateJob(id))?;
        self.order.push(id);
        Ok(())
    }

    #[inline]
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.index()).and_then(OnceLock::get)
    }

    /// Jobs in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Job> {
        self.order.iter().filter_map(|&id| self.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// A shareable lookup view over the same slots.
    pub fn table(&self) -> JobTable {
        JobTable {
            slots: Arc::clone(&self.slots),
        }
    }
}

/// Read-only view of a [`JobRegistry`], handed to worker threads.
#[derive(Clone)]
pub struct JobTable {
    slots: Arc<[OnceLock<Job>]>,
}

impl JobTable {
    #[inline]
    pub fn get(&self, id: JobId) -> Option<&Job> {
        self.slots.get(id.index()).and_then(OnceLock::get)
    }
}

impl fmt::Debug for JobTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobTable")
            .field("capacity", &self.slots.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn noop_job(id: u16) -> Job {
        Job::new(
            JobId::new(id),
            DependencyMask::new(),
            DependencyMask::new().with(id as usize),
            Box::new(FnJob::fixed(0, |_: Range<usize>| {})),
        )
    }

    #[test]
    fn test_registry_insert_and_get() {
        let mut registry = JobRegistry::with_capacity(8);
        registry.insert(noop_job(3)).unwrap();
        registry.insert(noop_job(0)).unwrap();

        assert_eq!(registry.len(), 2);
        assert!(registry.get(JobId::new(3)).is_some());
        assert!(registry.get(JobId::new(1)).is_none());

        let order: Vec<_> = registry.iter().map(Job::id).collect();
        assert_eq!(order, vec![JobId::new(3), JobId::new(0)]);
    }

    #[test]
    fn test_registry_rejects_duplicate_id() {
        let mut registry = JobRegistry::with_capacity(4);
        registry.insert(noop_job(1)).unwrap();
        let err = registry.insert(noop_job(1)).unwrap_err();
        assert!(matches!(err, EngineError::DuplicateJob(id) if id == JobId::new(1)));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_registry_rejects_id_beyond_capacity() {
        let mut registry = JobRegistry::with_capacity(4);
        let err = registry.insert(noop_job(4)).unwrap_err();
        assert!(matches!(err, EngineError::RegistryFull { capacity: 4 }));
    }

    #[test]
    fn test_table_sees_later_registrations() {
        let mut registry = JobRegistry::with_capacity(4);
        let table = registry.table();
        assert!(table.get(JobId::new(2)).is_none());

        registry.insert(noop_job(2)).unwrap();
        let job = table.get(JobId::new(2)).unwrap();
        assert_eq!(job.id(), JobId::new(2));
        assert!(job.write_mask().contains(2));
    }

    #[test]
    fn test_fixed_job_reports_count() {
        let job = FnJob::fixed(17, |_: Range<usize>| {});
        assert_eq!(job.item_count(), 17);
    }
}
