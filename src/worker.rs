//! Worker thread implementation.
//!
//! Every worker owns a [`LocalQueue`] and a stealer onto every peer's queue.
//! Worker 0 is the thread that runs frames (the primary); it is never
//! spawned and receives all dispatched help records. The other workers
//! sleep on a [`Parker`] between frames and, once woken, fight over the
//! primary's records until nothing is left to steal.

use crate::config::PinningStrategy;
use crate::counter::PhaseCounter;
use crate::deque::{LocalQueue, Steal, Stealer, work_queue};
use crate::error::EngineError;
use crate::job::JobTable;
use crate::task::TaskDescriptor;
use crate::telemetry::TelemetrySink;
use crate::topology::Topology;
use crossbeam::sync::{Parker, Unparker};
use crossbeam::utils::Backoff;
use std::any::Any;
use std::cell::Cell;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};

type PanicPayload = Box<dyn Any + Send + 'static>;

/// State shared by every worker, primary included.
pub(crate) struct WorkerContext {
    pub jobs: JobTable,
    /// Indexed by worker id.
    pub stealers: Box<[Stealer]>,
    pub counter: PhaseCounter,
    pub sink: TelemetrySink,
    shutdown: AtomicBool,
    /// First job panic of the current frame. Only touched on the panic path.
    panic: Mutex<Option<PanicPayload>>,
}

impl WorkerContext {
    pub fn new(jobs: JobTable, stealers: Box<[Stealer]>, sink: TelemetrySink) -> Self {
        WorkerContext {
            jobs,
            stealers,
            counter: PhaseCounter::new(),
            sink,
            shutdown: AtomicBool::new(false),
            panic: Mutex::new(None),
        }
    }

    /// Drains `local`, then steals from peers until a full round finds
    /// nothing. Returns the number of records executed.
    pub fn fight(&self, id: usize, local: &LocalQueue, rotation: &mut usize) -> usize {
        let mut executed = 0;
        loop {
            while let Some(task) = local.pop() {
                self.execute(id, task);
                executed += 1;
            }
            match self.steal_round(id, rotation) {
                Some(task) => {
                    self.execute(id, task);
                    executed += 1;
                }
                None => return executed,
            }
        }
    }

    /// Visits every peer once, starting from a rotating offset so thieves
    /// spread across victims. A round that hit contention is repeated.
    fn steal_round(&self, id: usize, rotation: &mut usize) -> Option<TaskDescriptor> {
        let peers = self.stealers.len();
        loop {
            let start = *rotation;
            *rotation = (*rotation + 1) % peers;

            let mut contended = false;
            for offset in 0..peers {
                let victim = (start + offset) % peers;
                if victim == id {
                    continue;
                }
                match self.stealers[victim].steal() {
                    Steal::Success(task) => return Some(task),
                    Steal::Retry => contended = true,
                    Steal::Empty => {}
                }
            }
            if !contended {
                return None;
            }
        }
    }

    /// Runs one help record. The phase counter is decremented whether or
    /// not the body panicked.
    fn execute(&self, worker: usize, task: TaskDescriptor) {
        match self.jobs.get(task.job) {
            Some(job) => {
                let result = panic::catch_unwind(AssertUnwindSafe(|| {
                    job.executor().run_record(worker, &self.sink)
                }));
                if let Err(payload) = result {
                    tracing::error!(worker, job = %task.job, "job body panicked");
                    self.stash_panic(payload);
                }
            }
            None => tracing::warn!(worker, job = %task.job, "record for unknown job"),
        }
        self.counter.decrement();
    }

    /// Keeps the first payload of a frame; later ones are dropped.
    pub fn stash_panic(&self, payload: PanicPayload) {
        let mut slot = self.panic.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_none() {
            *slot = Some(payload);
        }
    }

    pub fn take_panic(&self) -> Option<PanicPayload> {
        self.panic.lock().unwrap_or_else(|e| e.into_inner()).take()
    }

    fn is_shutdown(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }
}

/// A spawned worker thread.
pub struct Worker {
    id: usize,
    unparker: Unparker,
    handle: Option<JoinHandle<()>>,
}

impl Worker {
    fn spawn(
        id: usize,
        queue: LocalQueue,
        context: Arc<WorkerContext>,
        core: Option<usize>,
    ) -> Result<Self, EngineError> {
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        let handle = thread::Builder::new()
            .name(format!("phasework-worker-{id}"))
            .spawn(move || {
                if let Some(core) = core {
                    pin_current(id, core);
                }
                Worker::run_loop(id, queue, parker, context);
            })?;

        Ok(Worker {
            id,
            unparker,
            handle: Some(handle),
        })
    }

    fn run_loop(id: usize, queue: LocalQueue, parker: Parker, context: Arc<WorkerContext>) {
        let mut rotation = (id + 1) % context.stealers.len();
        loop {
            parker.park();
            if context.is_shutdown() {
                break;
            }

            // Spin briefly between rounds so records dispatched a moment
            // after the wake-up are still picked up.
            let backoff = Backoff::new();
            loop {
                if context.fight(id, &queue, &mut rotation) > 0 {
                    backoff.reset();
                    continue;
                }
                if backoff.is_completed() || context.is_shutdown() {
                    break;
                }
                backoff.snooze();
            }

            // Anything pushed locally during the last round is run before sleeping.
            if !queue.is_empty() {
                context.fight(id, &queue, &mut rotation);
            }
        }
        tracing::trace!(worker = id, "worker exiting");
    }

    pub fn id(&self) -> usize {
        self.id
    }

    fn wake(&self) {
        self.unparker.unpark();
    }

    /// Waits for the worker thread to finish.
    pub fn join(mut self) -> thread::Result<()> {
        match self.handle.take() {
            Some(handle) => handle.join(),
            None => Ok(()),
        }
    }
}

fn pin_current(id: usize, core: usize) {
    let pinned = core_affinity::get_core_ids()
        .and_then(|ids| ids.into_iter().find(|c| c.id == core))
        .is_some_and(core_affinity::set_for_current);
    if !pinned {
        tracing::warn!(worker = id, core, "failed to pin worker");
    }
}

/// Pool construction parameters.
#[derive(Debug, Clone)]
pub(crate) struct PoolConfig {
    pub workers: usize,
    pub queue_capacity: usize,
    pub pinning: PinningStrategy,
}

/// The primary's queue plus the spawned workers.
pub struct WorkerPool {
    primary: LocalQueue,
    rotation: Cell<usize>,
    workers: Vec<Worker>,
    context: Arc<WorkerContext>,
}

impl WorkerPool {
    pub(crate) fn new(
        config: &PoolConfig,
        topology: &Topology,
        jobs: JobTable,
        sink: TelemetrySink,
    ) -> Result<Self, EngineError> {
        if config.workers == 0 {
            return Err(EngineError::NoWorkers);
        }

        let mut queues = Vec::with_capacity(config.workers);
        let mut stealers = Vec::with_capacity(config.workers);
        for _ in 0..config.workers {
            let (queue, stealer) = work_queue(config.queue_capacity)?;
            queues.push(queue);
            stealers.push(stealer);
        }

        let context = Arc::new(WorkerContext::new(jobs, stealers.into(), sink));
        let mut queues = queues.into_iter();
        let primary = queues.next().ok_or(EngineError::NoWorkers)?;

        let available = core_affinity::get_core_ids().map_or(0, |ids| ids.len());
        let mut pool = WorkerPool {
            primary,
            rotation: Cell::new(if config.workers > 1 { 1 } else { 0 }),
            workers: Vec::with_capacity(config.workers - 1),
            context,
        };

        for (id, queue) in (1..).zip(queues) {
            let core = config.pinning.core_for(id, available, topology);
            // On failure the pool is dropped here, which stops the workers already running.
            let worker = Worker::spawn(id, queue, Arc::clone(&pool.context), core)?;
            pool.workers.push(worker);
        }

        Ok(pool)
    }

    /// Number of workers, primary included.
    pub fn size(&self) -> usize {
        self.workers.len() + 1
    }

    pub(crate) fn primary(&self) -> &LocalQueue {
        &self.primary
    }

    pub(crate) fn context(&self) -> &WorkerContext {
        &self.context
    }

    pub(crate) fn wake_all(&self) {
        for worker in &self.workers {
            worker.wake();
        }
    }

    /// Runs the primary's fight loop until every record of the current
    /// phase has finished, including records stolen by other workers.
    pub(crate) fn drain_phase(&self) {
        let backoff = Backoff::new();
        let mut rotation = self.rotation.get();
        loop {
            if self.context.fight(0, &self.primary, &mut rotation) > 0 {
                backoff.reset();
            }
            if self.context.counter.is_complete() {
                break;
            }
            backoff.snooze();
        }
        self.rotation.set(rotation);
    }

    fn stop(&mut self) -> usize {
        self.context.shutdown.store(true, Ordering::Release);
        let mut failed = 0;
        for worker in self.workers.drain(..) {
            worker.wake();
            let id = worker.id();
            if worker.join().is_err() {
                failed += 1;
                tracing::error!(worker = id, "worker thread panicked");
            }
        }
        failed
    }

    /// Signals every worker and waits for it to exit.
    ///
    /// Returns Err with the number of workers that panicked.
    pub fn shutdown(mut self) -> Result<(), usize> {
        match self.stop() {
            0 => Ok(()),
            failed => Err(failed),
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.workers.is_empty() {
            self.stop();
        }
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("size", &self.size())
            .field("queued", &self.primary.len())
            .finish_non_exhaustive()
    }
}
