//! Phase planning.
//!
//! Jobs are grouped into phases with a greedy leveled topological sort.
//! Each pass opens a new phase with empty territory and scans the
//! still-unassigned jobs in registration order. A job is admitted unless it
//! would write something the phase already writes or reads, or read
//! something the phase already writes. Admission grows the territory
//! immediately, so later jobs in the same pass are checked against it.
//!
//! The result depends only on registration order and the masks, so the
//! same registrations always produce the same plan.

use crate::error::EngineError;
use crate::job::{Job, JobId};
use crate::mask::DependencyMask;
use std::ops::Range;

/// Job ids grouped into sequential phases.
///
/// Phases are contiguous ranges over a flat execution order; jobs inside a
/// phase keep their registration order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PhasePlan {
    order: Vec<JobId>,
    phases: Vec<Range<usize>>,
}

/// Planner view of a job: identity plus declared territory.
#[derive(Debug, Clone, Copy)]
pub struct PlanEntry {
    pub id: JobId,
    pub read: DependencyMask,
    pub write: DependencyMask,
}

impl From<&Job> for PlanEntry {
    fn from(job: &Job) -> Self {
        PlanEntry {
            id: job.id(),
            read: *job.read_mask(),
            write: *job.write_mask(),
        }
    }
}

impl PhasePlan {
    /// Builds the plan for `jobs`, given in registration order.
    ///
    /// # Errors
    /// [`EngineError::PlanStalled`] if a pass admits no job while some
    /// remain, [`EngineError::TooManyPhases`] if more than `max_phases`
    /// phases would be needed.
    pub fn build<I>(jobs: I, max_phases: usize) -> Result<PhasePlan, EngineError>
    where
        I: IntoIterator<Item = PlanEntry>,
    {
        let mut pending: Vec<PlanEntry> = jobs.into_iter().collect();
        let mut order = Vec::with_capacity(pending.len());
        let mut phases = Vec::new();

        while !pending.is_empty() {
            if phases.len() == max_phases {
                return Err(EngineError::TooManyPhases { limit: max_phases });
            }

            let mut phase_writes = DependencyMask::new();
            let mut phase_reads = DependencyMask::new();
            let start = order.len();

            pending.retain(|job| {
                let blocked = phase_writes.conflicts(&job.write)
                    || phase_reads.conflicts(&job.write)
                    || phase_writes.conflicts(&job.read);
                if blocked {
                    return true;
                }
                phase_writes.union(&job.write);
                phase_reads.union(&job.read);
                order.push(job.id);
                false
            });

            if order.len() == start {
                return Err(EngineError::PlanStalled {
                    remaining: pending.len(),
                });
            }

            tracing::debug!(
                phase = phases.len(),
                jobs = order.len() - start,
                writes = phase_writes.count(),
                reads = phase_reads.count(),
                "phase planned"
            );
            phases.push(start..order.len());
        }

        Ok(PhasePlan { order, phases })
    }

    /// Number of phases.
    pub fn len(&self) -> usize {
        self.phases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.phases.is_empty()
    }

    /// Iterates phases in execution order.
    pub fn phases(&self) -> impl ExactSizeIterator<Item = &[JobId]> + '_ {
        self.phases.iter().map(|r| &self.order[r.clone()])
    }

    pub fn phase_jobs(&self, phase: usize) -> Option<&[JobId]> {
        self.phases.get(phase).map(|r| &self.order[r.clone()])
    }

    /// Phase the job was assigned to, if it is part of the plan.
    pub fn phase_of(&self, id: JobId) -> Option<usize> {
        let pos = self.order.iter().position(|&j| j == id)?;
        self.phases.iter().position(|r| r.contains(&pos))
    }

    /// Flat execution order: phase 0 first, registration order within a phase.
    pub fn order(&self) -> &[JobId] {
        &self.order
    }

    pub fn job_count(&self) -> usize {
        self.order.len()
    }
}
