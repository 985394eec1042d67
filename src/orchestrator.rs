//! The engine's front door.
//!
//! An [`Orchestrator`] owns the worker pool, the job registry, the phase
//! plan and the tuner. Jobs are registered once, the plan is built once,
//! and then [`execute_frame`](Orchestrator::execute_frame) runs every job
//! exactly once per call, phase after phase, on the calling thread plus
//! the pool.

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::executor::DispatchContext;
use crate::job::{Job, JobBody, JobId, JobRegistry};
use crate::mask::DependencyMask;
use crate::oracle::{self, Oracle};
use crate::plan::{PhasePlan, PlanEntry};
use crate::scout::{LoadSampler, ProcessLoadSampler};
use crate::strategy::{Strategy, StrategyCell, StrategyReader};
use crate::telemetry;
use crate::topology::Topology;
use crate::tuner::{BackgroundTuner, Tuner};
use crate::worker::{PoolConfig, WorkerPool};
use std::panic::{self, AssertUnwindSafe};

/// Registers jobs, plans phases and runs frames.
///
/// # Example
///
/// ```
/// use phasework::{DependencyMask, EngineConfig, FnJob, JobId, Orchestrator};
/// use std::ops::Range;
/// use std::sync::atomic::{AtomicUsize, Ordering};
/// use std::sync::Arc;
///
/// let config = EngineConfig { workers: Some(2), tuner_enabled: false, ..EngineConfig::default() };
/// let mut engine = Orchestrator::new(config).unwrap();
///
/// let total = Arc::new(AtomicUsize::new(0));
/// let sum = Arc::clone(&total);
/// engine
///     .register(
///         JobId::new(0),
///         DependencyMask::new(),
///         DependencyMask::new().with(0),
///         FnJob::fixed(100, move |range: Range<usize>| {
///             sum.fetch_add(range.len(), Ordering::Relaxed);
///         }),
///     )
///     .unwrap();
///
/// engine.build_plan().unwrap();
/// engine.execute_frame().unwrap();
/// assert_eq!(total.load(Ordering::Relaxed), 100);
/// engine.shutdown().unwrap();
/// ```
pub struct Orchestrator {
    config: EngineConfig,
    topology: Topology,
    registry: JobRegistry,
    plan: Option<PhasePlan>,
    strategy: StrategyReader,
    pool: WorkerPool,
    tuner: Option<BackgroundTuner>,
    /// Present instead of `tuner` when the background thread is disabled.
    manual_tuner: Option<Tuner>,
    frames: u64,
}

impl Orchestrator {
    /// Creates an engine on the detected hardware with no oracle.
    pub fn new(config: EngineConfig) -> Result<Self, EngineError> {
        Self::with_parts(config, Topology::detect(), None)
    }

    /// Creates an engine with an explicit topology and oracle.
    pub fn with_parts(
        config: EngineConfig,
        topology: Topology,
        oracle: Option<Box<dyn Oracle>>,
    ) -> Result<Self, EngineError> {
        let sampler = Box::new(ProcessLoadSampler::new(topology.logical_cores));
        Self::with_sampler(config, topology, oracle, sampler)
    }

    /// Like [`with_parts`](Self::with_parts), with a custom CPU-load source.
    pub fn with_sampler(
        config: EngineConfig,
        topology: Topology,
        oracle: Option<Box<dyn Oracle>>,
        sampler: Box<dyn LoadSampler>,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let workers = config.resolved_workers(&topology);

        let (sink, aggregator) = telemetry::channel(config.ring_capacity)?;
        let registry = JobRegistry::with_capacity(config.max_jobs);

        let pool_config = PoolConfig {
            workers,
            queue_capacity: config.queue_capacity,
            pinning: config.pinning,
        };
        let pool = WorkerPool::new(&pool_config, &topology, registry.table(), sink.clone())?;

        let (publisher, strategy) = StrategyCell::new(oracle::fallback_strategy(&topology));
        let tuner = Tuner::new(
            topology.clone(),
            aggregator,
            publisher,
            oracle,
            sampler,
            sink,
        );
        let (tuner, manual_tuner) = if config.tuner_enabled {
            (Some(BackgroundTuner::spawn(tuner, config.tuner_interval())?), None)
        } else {
            (None, Some(tuner))
        };

        tracing::info!(
            workers,
            queue_capacity = config.queue_capacity,
            ring_capacity = config.ring_capacity,
            pinning = ?config.pinning,
            tuner = config.tuner_enabled,
            "engine started"
        );

        Ok(Orchestrator {
            config,
            topology,
            registry,
            plan: None,
            strategy,
            pool,
            tuner,
            manual_tuner,
            frames: 0,
        })
    }

    /// Registers a job under `id`.
    ///
    /// Registering after [`build_plan`](Self::build_plan) discards the plan;
    /// it must be built again before the next frame.
    pub fn register<B>(
        &mut self,
        id: JobId,
        read: DependencyMask,
        write: DependencyMask,
        body: B,
    ) -> Result<(), EngineError>
    where
        B: JobBody + 'static,
    {
        self.registry.insert(Job::new(id, read, write, Box::new(body)))?;
        if self.plan.take().is_some() {
            tracing::debug!(job = %id, "registration invalidated the plan");
        }
        Ok(())
    }

    /// Builds the phase plan for the current registrations, or returns the
    /// existing one.
    pub fn build_plan(&mut self) -> Result<&PhasePlan, EngineError> {
        let plan = match self.plan.take() {
            Some(plan) => plan,
            None => {
                let plan = PhasePlan::build(
                    self.registry.iter().map(PlanEntry::from),
                    self.config.max_phases,
                )?;
                tracing::info!(jobs = plan.job_count(), phases = plan.len(), "plan built");
                plan
            }
        };
        Ok(self.plan.insert(plan))
    }

    /// Runs every job once.
    ///
    /// Phases run in order; a phase starts only after every record of the
    /// previous one has finished, on whichever thread it ran. If a job body
    /// panics, the frame still completes its barrier and the first panic is
    /// then resumed on this thread.
    pub fn execute_frame(&mut self) -> Result<(), EngineError> {
        let plan = self.plan.as_ref().ok_or(EngineError::PlanNotBuilt)?;
        let pool = &self.pool;
        let shared = pool.context();
        let ctx = DispatchContext {
            queue: pool.primary(),
            counter: &shared.counter,
            sink: &shared.sink,
            workers: pool.size(),
            wake: &|| pool.wake_all(),
        };

        for (phase, jobs) in plan.phases().enumerate() {
            for &id in jobs {
                let Some(job) = self.registry.get(id) else {
                    continue;
                };
                let strategy = self.strategy.read();
                let executor = job.executor();
                let dispatched =
                    panic::catch_unwind(AssertUnwindSafe(|| executor.dispatch(strategy, &ctx)));
                if let Err(payload) = dispatched {
                    tracing::error!(job = %id, "job body panicked");
                    shared.stash_panic(payload);
                }
            }

            pool.drain_phase();
            tracing::debug!(phase, jobs = jobs.len(), "phase complete");
        }

        self.frames += 1;
        if let Some(payload) = shared.take_panic() {
            panic::resume_unwind(payload);
        }
        Ok(())
    }

    /// Runs one tuner cycle on this thread. Only does anything when the
    /// background tuner is disabled.
    pub fn tune(&mut self) -> Option<Strategy> {
        self.manual_tuner.as_mut()?.step()
    }

    pub fn plan(&self) -> Option<&PhasePlan> {
        self.plan.as_ref()
    }

    /// Worker count, calling thread included.
    pub fn num_workers(&self) -> usize {
        self.pool.size()
    }

    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The strategy the next dispatch will use.
    pub fn strategy(&self) -> Strategy {
        self.strategy.read()
    }

    pub fn strategy_reader(&self) -> StrategyReader {
        self.strategy.clone()
    }

    pub fn frames(&self) -> u64 {
        self.frames
    }

    /// Samples lost to a full telemetry ring so far.
    pub fn telemetry_dropped(&self) -> u64 {
        self.pool.context().sink.dropped()
    }

    /// Stops the tuner and every worker and waits for them.
    ///
    /// Dropping the engine does the same, without reporting failures.
    pub fn shutdown(self) -> Result<(), EngineError> {
        let Orchestrator {
            pool, tuner, frames, ..
        } = self;

        let mut failed = 0;
        if let Some(tuner) = tuner {
            if tuner.shutdown().is_err() {
                failed += 1;
            }
        }
        if let Err(count) = pool.shutdown() {
            failed += count;
        }

        tracing::info!(frames, "engine stopped");
        match failed {
            0 => Ok(()),
            count => Err(EngineError::ThreadPanicked { count }),
        }
    }
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("workers", &self.pool.size())
            .field("jobs", &self.registry.len())
            .field("phases", &self.plan.as_ref().map(PhasePlan::len))
            .field("frames", &self.frames)
            .finish_non_exhaustive()
    }
}
