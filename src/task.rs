//! Dispatch records.
//!
//! A [`TaskDescriptor`] carries no range information: it only names the job
//! a worker should help with. The worker claims actual index ranges from
//! the job's executor, so a single record keeps pulling batches until the
//! job's item space is exhausted.

use crate::job::JobId;

/// Plain record identifying which job a worker should help execute.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskDescriptor {
    pub job: JobId,
}

impl TaskDescriptor {
    pub const fn new(job: JobId) -> Self {
        Self { job }
    }

    /// Packs the record into a queue slot word.
    #[inline]
    pub(crate) const fn to_bits(self) -> u32 {
        self.job.index() as u32
    }

    #[inline]
    pub(crate) const fn from_bits(bits: u32) -> Self {
        Self {
            job: JobId::new(bits as u16),
        }
    }
}

