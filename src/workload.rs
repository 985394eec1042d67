//! A CPU-bound reference workload, used by the demo binary and the benches.
//!
//! [`HeavyMath`] is not a [`JobBody`] itself: its column is only written in
//! parallel once the engine owns it, so nothing outside a dispatch can hand
//! overlapping ranges to the same data.
//!
//! ```compile_fail
//! fn takes<B: phasework::JobBody>(_: B) {}
//! takes(phasework::workload::HeavyMath::new(8, 1));
//! ```

use crate::column::Column;
use crate::error::EngineError;
use crate::job::{JobBody, JobId};
use crate::mask::DependencyMask;
use crate::orchestrator::Orchestrator;
use std::ops::Range;
use std::sync::Arc;

/// Runs `complexity` rounds of `sin(v) * cos(v) + sqrt(|v|)` over every item
/// of its own column.
pub struct HeavyMath {
    data: Column<f32>,
    complexity: u32,
}

impl HeavyMath {
    /// A column of `count` items seeded deterministically in `[0, 100)`.
    pub fn new(count: usize, complexity: u32) -> Self {
        HeavyMath {
            data: Column::from_fn(count, |i| (i.wrapping_mul(7919) % 10_000) as f32 / 100.0),
            complexity,
        }
    }

    pub fn values(&mut self) -> &[f32] {
        self.data.get_mut()
    }

    /// The same computation on the calling thread, for comparison.
    pub fn run_serial(&mut self) {
        let complexity = self.complexity;
        for v in self.data.get_mut() {
            *v = Self::step(*v, complexity);
        }
    }

    #[inline]
    pub fn step(mut v: f32, complexity: u32) -> f32 {
        for _ in 0..complexity {
            v = v.sin() * v.cos() + v.abs().sqrt();
        }
        v
    }

    /// Hands the workload to `engine` as job `id`.
    ///
    /// The returned column is the job's output. Reading it is only sound
    /// between frames or from a job whose phase comes after this one, i.e.
    /// a job that reads a resource in `write`.
    pub fn register(
        self,
        engine: &mut Orchestrator,
        id: JobId,
        read: DependencyMask,
        write: DependencyMask,
    ) -> Result<Arc<Column<f32>>, EngineError> {
        let data = Arc::new(self.data);
        let job = HeavyMathJob {
            data: Arc::clone(&data),
            complexity: self.complexity,
        };
        engine.register(id, read, write, job)?;
        Ok(data)
    }
}

impl std::fmt::Debug for HeavyMath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HeavyMath")
            .field("items", &self.data.len())
            .field("complexity", &self.complexity)
            .finish()
    }
}

/// The registered form. Only the executor calls `execute`, with the
/// disjoint ranges of one dispatch.
struct HeavyMathJob {
    data: Arc<Column<f32>>,
    complexity: u32,
}

impl JobBody for HeavyMathJob {
    fn item_count(&self) -> usize {
        self.data.len()
    }

    fn execute(&self, range: Range<usize>) {
        // Ranges of one dispatch never overlap, and the column is written by
        // no other job in this phase.
        let values = unsafe { self.data.slice_mut(range) };
        for v in values {
            *v = HeavyMath::step(*v, self.complexity);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EngineConfig;
    use crate::scout::NoLoad;
    use crate::topology::Topology;

    #[test]
    fn test_engine_execution_matches_serial() {
        let mut serial = HeavyMath::new(1000, 8);
        serial.run_serial();

        let config = EngineConfig {
            workers: Some(3),
            tuner_enabled: false,
            ..EngineConfig::default()
        };
        let mut engine =
            Orchestrator::with_sampler(config, Topology::uniform(3), None, Box::new(NoLoad))
                .unwrap();
        let output = HeavyMath::new(1000, 8)
            .register(&mut engine, JobId::new(0), DependencyMask::new(), DependencyMask::new().with(0))
            .unwrap();
        engine.build_plan().unwrap();
        engine.execute_frame().unwrap();
        engine.shutdown().expect("Shutdown failed");

        let mut output = Arc::into_inner(output).unwrap();
        let expected = serial.values().to_vec();
        assert_eq!(output.get_mut().to_vec(), expected);
        assert_ne!(expected[1], 79.19);
    }

    #[test]
    fn test_serial_runs_compound() {
        let mut once = HeavyMath::new(16, 2);
        once.run_serial();
        let mut twice = HeavyMath::new(16, 1);
        twice.run_serial();
        twice.run_serial();
        assert_eq!(once.values(), twice.values());
    }

    #[test]
    fn test_zero_complexity_is_identity() {
        assert_eq!(HeavyMath::step(42.5, 0), 42.5);
        let v = HeavyMath::step(1.0, 1);
        assert!((v - (1.0f32.sin() * 1.0f32.cos() + 1.0)).abs() < 1e-6);
    }
}
