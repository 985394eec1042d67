//! The pluggable decision function behind the tuner.
//!
//! An oracle looks at the hardware and a batch of recent samples and
//! answers with the [`Strategy`] executors should use next. It runs on the
//! tuner thread only, so it may keep state between calls.
//!
//! Any closure `Fn(&Topology, &[Sample]) -> Strategy` is an oracle:
//!
//! ```
//! use phasework::oracle::Oracle;
//! use phasework::strategy::Strategy;
//! use phasework::telemetry::Sample;
//! use phasework::topology::Topology;
//!
//! let mut oracle = |topo: &Topology, _samples: &[Sample]| Strategy {
//!     batch_size: 256,
//!     ..Strategy::conservative(topo.logical_cores)
//! };
//! let s = oracle.divine(&Topology::uniform(8), &[]).unwrap();
//! assert_eq!(s.batch_size, 256);
//! assert_eq!(s.thread_count, 8);
//! ```

use crate::error::OracleError;
use crate::strategy::Strategy;
use crate::telemetry::Sample;
use crate::topology::Topology;

pub trait Oracle: Send {
    /// Proposes the next strategy. `samples` is never empty.
    fn divine(&mut self, topology: &Topology, samples: &[Sample]) -> Result<Strategy, OracleError>;
}

impl<F> Oracle for F
where
    F: FnMut(&Topology, &[Sample]) -> Strategy + Send,
{
    fn divine(&mut self, topology: &Topology, samples: &[Sample]) -> Result<Strategy, OracleError> {
        Ok(self(topology, samples))
    }
}

/// The strategy in force before any oracle has answered, and whenever one fails.
pub fn fallback_strategy(topology: &Topology) -> Strategy {
    Strategy::conservative(topology.logical_cores)
}

/// Rejects strategies the executor could not honour.
pub(crate) fn check(strategy: Strategy) -> Result<Strategy, OracleError> {
    if strategy.batch_size == 0 {
        return Err(OracleError::InvalidStrategy("batch_size is 0".into()));
    }
    if strategy.thread_count == 0 {
        return Err(OracleError::InvalidStrategy("thread_count is 0".into()));
    }
    if !strategy.confidence.is_finite() {
        return Err(OracleError::InvalidStrategy(format!(
            "confidence {} is not finite",
            strategy.confidence
        )));
    }
    Ok(strategy)
}

/// Oracle that always answers with the fallback strategy.
#[derive(Debug, Clone, Copy, Default)]
pub struct StaticOracle;

impl Oracle for StaticOracle {
    fn divine(&mut self, topology: &Topology, _samples: &[Sample]) -> Result<Strategy, OracleError> {
        Ok(fallback_strategy(topology))
    }
}

/// Adjusts batch size to hold each record near a target duration.
///
/// Mean per-item cost over the batch gives the batch that would take
/// `target` to process; the answer is rounded to a power of two and moved
/// at most one doubling per call. Under high process CPU pressure the
/// fan-out is halved.
#[derive(Debug, Clone)]
pub struct ThroughputOracle {
    target: std::time::Duration,
    current: Option<u32>,
}

impl ThroughputOracle {
    pub const MIN_BATCH: u32 = 16;
    pub const MAX_BATCH: u32 = 1 << 16;
    const HIGH_PRESSURE: f32 = 0.9;

    pub fn new(target: std::time::Duration) -> Self {
        ThroughputOracle {
            target,
            current: None,
        }
    }
}

impl Default for ThroughputOracle {
    fn default() -> Self {
        ThroughputOracle::new(std::time::Duration::from_micros(200))
    }
}

impl Oracle for ThroughputOracle {
    fn divine(&mut self, topology: &Topology, samples: &[Sample]) -> Result<Strategy, OracleError> {
        let (items, nanos) = samples.iter().fold((0u128, 0u128), |(i, n), s| {
            (i + s.items as u128, n + s.duration.as_nanos())
        });
        let fallback = fallback_strategy(topology);
        let current = self.current.unwrap_or(fallback.batch_size);
        if items == 0 || nanos == 0 {
            return Ok(Strategy {
                batch_size: current,
                ..fallback
            });
        }

        let ideal = (self.target.as_nanos() * items / nanos).clamp(
            u128::from(Self::MIN_BATCH),
            u128::from(Self::MAX_BATCH),
        ) as u32;
        let ideal = ideal.next_power_of_two().min(Self::MAX_BATCH);
        let batch = ideal.clamp(current / 2, current.saturating_mul(2)).max(Self::MIN_BATCH);
        self.current = Some(batch);

        let pressure = samples
            .iter()
            .filter_map(|s| s.pressure)
            .fold(None, |acc: Option<f32>, p| Some(acc.map_or(p, |a| a.max(p))));
        let thread_count = match pressure {
            Some(p) if p >= Self::HIGH_PRESSURE => (fallback.thread_count / 2).max(1),
            _ => fallback.thread_count,
        };

        Ok(Strategy {
            batch_size: batch,
            thread_count,
            confidence: (samples.len() as f32 / crate::telemetry::BATCH_LIMIT as f32).min(1.0),
            affinity_hint: 0,
        })
    }
}
