//! Atomic dynamic batch claiming.
//!
//! Each job owns a shared `next_index` counter. Dispatch resets it and
//! pushes a handful of generic help records into the primary queue. Every
//! record, wherever it ends up running, loops on `fetch_add(batch)` and
//! processes the range it claimed until the job's item space is exhausted.
//! A worker that finishes early simply claims again, and because every
//! range comes from a single fetch-and-add no index is ever processed twice.

use crate::counter::PhaseCounter;
use crate::deque::LocalQueue;
use crate::error::QueueFull;
use crate::job::{JobBody, JobId};
use crate::strategy::Strategy;
use crate::task::TaskDescriptor;
use crate::telemetry::{Sample, TelemetrySink};
use crossbeam::utils::CachePadded;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;

/// What a dispatch did with the job.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The job reported zero items.
    Skipped,
    /// The job ran to completion on the dispatching thread.
    Inline { items: usize },
    /// Help records were pushed for workers to pick up.
    Queued { records: usize },
}

/// Everything a dispatch needs from the orchestrator.
pub(crate) struct DispatchContext<'a> {
    /// The primary worker's queue.
    pub queue: &'a LocalQueue,
    pub counter: &'a PhaseCounter,
    pub sink: &'a TelemetrySink,
    /// Size of the worker pool, primary included. Caps the fan-out.
    pub workers: usize,
    /// Wakes the other workers once records are queued.
    pub wake: &'a dyn Fn(),
}

pub struct JobExecutor {
    id: JobId,
    body: Box<dyn JobBody>,
    total_items: AtomicUsize,
    batch_size: AtomicUsize,
    next_index: CachePadded<AtomicUsize>,
}

impl JobExecutor {
    pub(crate) fn new(id: JobId, body: Box<dyn JobBody>) -> Self {
        JobExecutor {
            id,
            body,
            total_items: AtomicUsize::new(0),
            batch_size: AtomicUsize::new(1),
            next_index: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Prepares the job for this frame and hands it out.
    ///
    /// Runs on the primary thread while no record of this job is in
    /// flight, so the resets below cannot race with a claimer. The stores are
    /// published to thieves by the queue's release on push.
    pub(crate) fn dispatch(&self, strategy: Strategy, ctx: &DispatchContext<'_>) -> Dispatch {
        let total = self.body.item_count();
        let batch = strategy.effective_batch();

        self.total_items.store(total, Ordering::Relaxed);
        self.batch_size.store(batch, Ordering::Relaxed);
        self.next_index.store(0, Ordering::Relaxed);

        if total == 0 {
            return Dispatch::Skipped;
        }

        let fan_out = (strategy.thread_count as usize).min(ctx.workers);
        if fan_out <= 1 || total < batch {
            let items = self.run_record(0, ctx.sink);
            tracing::trace!(job = %self.id, items, "dispatched inline");
            return Dispatch::Inline { items };
        }

        let mut records = 0;
        for _ in 0..fan_out {
            ctx.counter.increment();
            if let Err(QueueFull(task)) = ctx.queue.push(TaskDescriptor::new(self.id)) {
                ctx.counter.decrement();
                tracing::warn!(
                    job = %task.job,
                    pushed = records,
                    capacity = ctx.queue.capacity(),
                    "primary queue full, helping inline"
                );
                if records > 0 {
                    // Queued records are picked up while this thread helps.
                    (ctx.wake)();
                }
                // Whatever no queued record claims, this loop does.
                let items = self.run_record(0, ctx.sink);
                if records == 0 {
                    return Dispatch::Inline { items };
                }
                return Dispatch::Queued { records };
            }
            records += 1;
        }
        (ctx.wake)();

        tracing::trace!(job = %self.id, records, total, batch, "dispatched");
        Dispatch::Queued { records }
    }

    /// Executes one help record and reports a sample. Returns items processed.
    pub(crate) fn run_record(&self, worker: usize, sink: &TelemetrySink) -> usize {
        let start = Instant::now();
        let items = self.help();
        sink.report(Sample {
            duration: start.elapsed(),
            items,
            worker,
            job: self.id,
            pressure: None,
        });
        items
    }

    /// Claims and processes batches until the item space is exhausted.
    fn help(&self) -> usize {
        let total = self.total_items.load(Ordering::Relaxed);
        let batch = self.batch_size.load(Ordering::Relaxed);
        let mut processed = 0;

        loop {
            let start = self.next_index.fetch_add(batch, Ordering::Relaxed);
            if start >= total {
                return processed;
            }
            let len = batch.min(total - start);
            self.body.execute(start..start + len);
            processed += len;
        }
    }

    pub fn id(&self) -> JobId {
        self.id
    }

    /// Item count captured by the last dispatch.
    pub fn total_items(&self) -> usize {
        self.total_items.load(Ordering::Relaxed)
    }
}
