//! Engine configuration.
//!
//! Every field has a default, so a TOML document only needs to name what it
//! overrides:
//!
//! ```
//! use phasework::config::{EngineConfig, PinningStrategy};
//!
//! let config = EngineConfig::from_toml_str(
//!     r#"
//!     workers = 4
//!     pinning = "AvoidSMT"
//!     "#,
//! )
//! .unwrap();
//! assert_eq!(config.workers, Some(4));
//! assert_eq!(config.pinning, PinningStrategy::AvoidSMT);
//! assert_eq!(config.queue_capacity, 4096);
//! ```

use crate::error::EngineError;
use crate::topology::Topology;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Strategy for pinning worker threads to CPU cores.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PinningStrategy {
    /// No pinning (standard OS scheduling).
    #[default]
    None,
    /// Linear pinning (worker i -> logical processor i).
    Linear,
    /// Pin to physical cores only (even-numbered logical processors), avoiding SMT contention.
    AvoidSMT,
    /// Pin to performance cores only, as reported by the topology. Workers
    /// beyond the performance-core count wrap around onto them.
    PerformanceCores,
}

impl PinningStrategy {
    /// Logical processor index for `worker`, or `None` to leave it unpinned.
    ///
    /// `available` is the number of logical processors the OS reports.
    pub fn core_for(self, worker: usize, available: usize, topology: &Topology) -> Option<usize> {
        if available == 0 {
            return None;
        }
        match self {
            PinningStrategy::None => None,
            PinningStrategy::Linear => Some(worker % available),
            PinningStrategy::AvoidSMT => {
                let physical = available.div_ceil(2);
                Some((worker % physical) * 2)
            }
            PinningStrategy::PerformanceCores => {
                let fast = topology.performance_cores.clamp(1, available);
                Some(worker % fast)
            }
        }
    }
}

/// Tunables for an [`Orchestrator`](crate::orchestrator::Orchestrator).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Worker count including the calling thread. `None` means one per
    /// logical core.
    pub workers: Option<usize>,
    /// Capacity of every work queue. Must be a power of two.
    pub queue_capacity: usize,
    /// Capacity of the telemetry ring. Must be a power of two.
    pub ring_capacity: usize,
    /// Highest job id plus one.
    pub max_jobs: usize,
    pub max_phases: usize,
    /// Pause between tuner iterations, in milliseconds.
    pub tuner_interval_ms: u64,
    pub pinning: PinningStrategy,
    /// Run the background tuner. When off, the initial strategy stays active.
    pub tuner_enabled: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            workers: None,
            queue_capacity: 4096,
            ring_capacity: 4096,
            max_jobs: 64,
            max_phases: 32,
            tuner_interval_ms: 16,
            pinning: PinningStrategy::None,
            tuner_enabled: true,
        }
    }
}

impl EngineConfig {
    /// Parses a TOML document and validates it.
    pub fn from_toml_str(input: &str) -> Result<Self, EngineError> {
        let config: EngineConfig = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the constraints construction relies on.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.workers == Some(0) {
            return Err(EngineError::NoWorkers);
        }
        if !self.queue_capacity.is_power_of_two() {
            return Err(EngineError::CapacityNotPowerOfTwo {
                what: "work queue",
                capacity: self.queue_capacity,
            });
        }
        if !self.ring_capacity.is_power_of_two() {
            return Err(EngineError::CapacityNotPowerOfTwo {
                what: "telemetry ring",
                capacity: self.ring_capacity,
            });
        }
        Ok(())
    }

    /// Worker count to use on `topology`.
    pub fn resolved_workers(&self, topology: &Topology) -> usize {
        self.workers.unwrap_or(topology.logical_cores).max(1)
    }

    pub fn tuner_interval(&self) -> Duration {
        Duration::from_millis(self.tuner_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn topology(logical: usize, performance: usize) -> Topology {
        Topology {
            logical_cores: logical,
            performance_cores: performance,
            ..Topology::default()
        }
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.workers, None);
        assert_eq!(config.max_jobs, 64);
        assert_eq!(config.max_phases, 32);
        assert_eq!(config.tuner_interval(), Duration::from_millis(16));
        assert!(config.tuner_enabled);
        config.validate().unwrap();
    }

    #[test]
    fn test_empty_toml_is_default() {
        let config = EngineConfig::from_toml_str("").unwrap();
        assert_eq!(config, EngineConfig::default());
    }

    #[test]
    fn test_toml_overrides() {
        let config = EngineConfig::from_toml_str(
            r#"
            queue_capacity = 256
            ring_capacity = 1024
            tuner_enabled = false
            pinning = "PerformanceCores"
            "#,
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 256);
        assert_eq!(config.ring_capacity, 1024);
        assert!(!config.tuner_enabled);
        assert_eq!(config.pinning, PinningStrategy::PerformanceCores);
    }

    #[test]
    fn test_rejects_bad_capacity() {
        let err = EngineConfig::from_toml_str("ring_capacity = 1000").unwrap_err();
        assert!(matches!(
            err,
            EngineError::CapacityNotPowerOfTwo {
                what: "telemetry ring",
                capacity: 1000
            }
        ));
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = EngineConfig::from_toml_str("workers = 0").unwrap_err();
        assert!(matches!(err, EngineError::NoWorkers));
    }

    #[test]
    fn test_rejects_malformed_toml() {
        let err = EngineConfig::from_toml_str("workers = \"many\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_resolved_workers() {
        let topo = topology(12, 4);
        assert_eq!(EngineConfig::default().resolved_workers(&topo), 12);
        let config = EngineConfig {
            workers: Some(3),
            ..EngineConfig::default()
        };
        assert_eq!(config.resolved_workers(&topo), 3);
    }

    #[test]
    fn test_pinning_core_selection() {
        let topo = topology(8, 2);
        assert_eq!(PinningStrategy::None.core_for(3, 8, &topo), None);
        assert_eq!(PinningStrategy::Linear.core_for(3, 8, &topo), Some(3));
        assert_eq!(PinningStrategy::Linear.core_for(9, 8, &topo), Some(1));
        assert_eq!(PinningStrategy::AvoidSMT.core_for(3, 8, &topo), Some(6));
        assert_eq!(PinningStrategy::AvoidSMT.core_for(4, 8, &topo), Some(0));
        assert_eq!(PinningStrategy::PerformanceCores.core_for(1, 8, &topo), Some(1));
        assert_eq!(PinningStrategy::PerformanceCores.core_for(5, 8, &topo), Some(1));
        assert_eq!(PinningStrategy::Linear.core_for(0, 0, &topo), None);
    }
}
