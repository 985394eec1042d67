//! Background tuner.
//!
//! A low-priority thread that, every interval, refreshes the CPU pressure
//! gauge, drains a batch of telemetry, asks the oracle for a strategy and
//! publishes it. It never blocks the frame: workers only ever touch the
//! ring and the strategy cell, both lock-free.

use crate::error::{EngineError, OracleError};
use crate::oracle::{self, Oracle};
use crate::scout::LoadSampler;
use crate::strategy::{Strategy, StrategyPublisher};
use crate::telemetry::{TelemetryAggregator, TelemetrySink};
use crate::topology::Topology;
use crossbeam::sync::{Parker, Unparker};
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const TUNER_THREAD_NAME: &str = "phasework-tuner";

/// One tuning cycle's worth of state, owned by the tuner thread.
pub struct Tuner {
    topology: Topology,
    aggregator: TelemetryAggregator,
    publisher: StrategyPublisher,
    oracle: Option<Box<dyn Oracle>>,
    sampler: Box<dyn LoadSampler>,
    sink: TelemetrySink,
}

impl Tuner {
    pub fn new(
        topology: Topology,
        aggregator: TelemetryAggregator,
        publisher: StrategyPublisher,
        oracle: Option<Box<dyn Oracle>>,
        sampler: Box<dyn LoadSampler>,
        sink: TelemetrySink,
    ) -> Self {
        Tuner {
            topology,
            aggregator,
            publisher,
            oracle,
            sampler,
            sink,
        }
    }

    /// Runs one cycle. Returns the strategy it published, if any.
    pub fn step(&mut self) -> Option<Strategy> {
        if let Some(load) = self.sampler.sample() {
            self.sink.set_pressure(load);
        }

        let samples = self.aggregator.collect();
        if samples.is_empty() {
            return None;
        }
        let active = self.oracle.as_mut()?;

        let topology = &self.topology;
        let proposal = panic::catch_unwind(AssertUnwindSafe(|| active.divine(topology, samples)))
            .unwrap_or(Err(OracleError::Panicked))
            .and_then(oracle::check);

        let strategy = match proposal {
            Ok(strategy) => strategy,
            Err(error) => {
                tracing::warn!(%error, "oracle failed, publishing fallback strategy");
                oracle::fallback_strategy(topology)
            }
        };

        self.publisher.publish(strategy);
        tracing::debug!(
            samples = samples.len(),
            batch_size = strategy.batch_size,
            thread_count = strategy.thread_count,
            confidence = strategy.confidence,
            "strategy published"
        );
        Some(strategy)
    }
}

/// Handle to the running tuner thread.
pub struct BackgroundTuner {
    shutdown: Arc<AtomicBool>,
    unparker: Unparker,
    handle: Option<JoinHandle<()>>,
}

impl BackgroundTuner {
    pub fn spawn(mut tuner: Tuner, interval: Duration) -> Result<Self, EngineError> {
        let shutdown = Arc::new(AtomicBool::new(false));
        let parker = Parker::new();
        let unparker = parker.unparker().clone();

        let stop = Arc::clone(&shutdown);
        let handle = thread::Builder::new()
            .name(TUNER_THREAD_NAME.to_string())
            .spawn(move || {
                lower_priority();
                while !stop.load(Ordering::Acquire) {
                    tuner.step();
                    parker.park_timeout(interval);
                }
                tracing::trace!("tuner exiting");
            })?;

        Ok(BackgroundTuner {
            shutdown,
            unparker,
            handle: Some(handle),
        })
    }

    fn stop(&mut self) -> Result<(), EngineError> {
        self.shutdown.store(true, Ordering::Release);
        self.unparker.unpark();
        match self.handle.take() {
            Some(handle) => handle.join().map_err(|_| {
                tracing::error!("tuner thread panicked");
                EngineError::ThreadPanicked { count: 1 }
            }),
            None => Ok(()),
        }
    }

    /// Stops the thread and waits for it.
    pub fn shutdown(mut self) -> Result<(), EngineError> {
        self.stop()
    }
}

impl Drop for BackgroundTuner {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

impl std::fmt::Debug for BackgroundTuner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BackgroundTuner")
            .field("running", &self.handle.is_some())
            .finish()
    }
}

/// Best-effort: drop the calling thread to the lowest scheduling priority.
#[cfg(target_os = "linux")]
fn lower_priority() {
    // On Linux PRIO_PROCESS with a thread id targets just that thread.
    let tid = unsafe { libc::gettid() };
    let rc = unsafe { libc::setpriority(libc::PRIO_PROCESS, tid as libc::id_t, 19) };
    if rc != 0 {
        tracing::debug!(
            error = %std::io::Error::last_os_error(),
            "could not lower tuner priority"
        );
    }
}

#[cfg(not(target_os = "linux"))]
fn lower_priority() {}
