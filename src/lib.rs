//! # phasework - Phase-Scheduled Parallel Job Engine
//!
//! A deterministic, low-latency execution engine for data-oriented
//! workloads: every registered job runs exactly once per frame, jobs that
//! touch disjoint resources run side by side, and jobs that conflict are
//! pushed into later phases.
//!
//! ## Architecture
//!
//! - **Dependency masks**: each job declares the resources it reads and
//!   writes as a 256-bit [`DependencyMask`].
//! - **Phase plan**: a greedy leveled sort groups conflict-free jobs into
//!   sequential phases ([`PhasePlan`]).
//! - **Workers**: one thread per core, each with a fixed-capacity
//!   work-stealing deque. The calling thread is worker 0 and receives all
//!   dispatched work; the others steal it.
//! - **Executor**: jobs are split by atomic dynamic batch claiming, so a
//!   fast worker simply claims more batches.
//! - **Tuner**: a low-priority thread drains execution telemetry, consults
//!   an [`Oracle`] and publishes a new [`Strategy`] (batch size, fan-out)
//!   through a lock-free double buffer.
//!
//! ## Example
//!
//! ```no_run
//! use phasework::{Column, DependencyMask, EngineConfig, FnJob, JobId, Orchestrator};
//! use std::ops::Range;
//! use std::sync::Arc;
//!
//! const POSITIONS: usize = 0;
//!
//! let mut engine = Orchestrator::new(EngineConfig::default()).unwrap();
//! let positions = Arc::new(Column::filled(1_000_000, 0.0f32));
//!
//! let column = Arc::clone(&positions);
//! engine
//!     .register(
//!         JobId::new(0),
//!         DependencyMask::new(),
//!         DependencyMask::new().with(POSITIONS),
//!         FnJob::fixed(column.len(), move |range: Range<usize>| {
//!             // The write mask keeps every other POSITIONS writer out of this phase.
//!             for p in unsafe { column.slice_mut(range) } {
//!                 *p += 1.0;
//!             }
//!         }),
//!     )
//!     .unwrap();
//!
//! engine.build_plan().unwrap();
//! for _ in 0..60 {
//!     engine.execute_frame().unwrap();
//! }
//! engine.shutdown().unwrap();
//! ```

pub mod column;
pub mod config;
pub mod counter;
pub mod deque;
pub mod error;
pub mod executor;
pub mod job;
pub mod mask;
pub mod oracle;
pub mod orchestrator;
pub mod plan;
pub mod scout;
pub mod strategy;
pub mod task;
pub mod telemetry;
pub mod topology;
pub mod tuner;
pub mod worker;
pub mod workload;

pub use column::Column;
pub use config::{EngineConfig, PinningStrategy};
pub use error::{EngineError, OracleError, QueueFull};
pub use job::{FnJob, JobBody, JobId};
pub use mask::DependencyMask;
pub use oracle::{Oracle, ThroughputOracle};
pub use orchestrator::Orchestrator;
pub use plan::PhasePlan;
pub use strategy::Strategy;
pub use telemetry::Sample;
pub use topology::Topology;
