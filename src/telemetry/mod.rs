//! Execution telemetry.
//!
//! Workers report one [`Sample`] per executed dispatch record through a
//! [`TelemetrySink`]. Samples travel through a lock-free ring to the single
//! [`TelemetryAggregator`], which the background tuner drains once per
//! cycle. [`channel`] is the only way to make a ring, and it hands out
//! exactly one aggregator for it.

mod aggregator;
mod ring;

pub use aggregator::{BATCH_LIMIT, TelemetryAggregator};

use crate::error::EngineError;
use crate::job::JobId;
use ring::TelemetryRing;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;

/// One execution measurement.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Sample {
    /// Wall time spent in the record, claiming included.
    pub duration: Duration,
    /// Items the record processed.
    pub items: usize,
    /// Worker that ran the record; 0 is the primary thread.
    pub worker: usize,
    pub job: JobId,
    /// Normalized process CPU load in `[0, 1]` at the time of the sample, if known.
    pub pressure: Option<f32>,
}

impl Sample {
    /// Items per second, or 0 for an empty measurement.
    pub fn throughput(&self) -> f64 {
        let secs = self.duration.as_secs_f64();
        if secs > 0.0 {
            self.items as f64 / secs
        } else {
            0.0
        }
    }
}

/// Creates a telemetry ring of `capacity` samples and returns its producer
/// and consumer ends.
///
/// The sink may be cloned freely. The aggregator is the ring's only reader
/// and cannot be cloned or created any other way.
///
/// # Errors
/// [`EngineError::CapacityNotPowerOfTwo`] if `capacity` is zero or not a
/// power of two.
///
/// # Example
///
/// ```
/// use phasework::telemetry::{Sample, channel};
///
/// let (sink, mut aggregator) = channel(8).unwrap();
/// let other = sink.clone();
/// assert!(sink.report(Sample { items: 1, ..Sample::default() }));
/// assert!(other.report(Sample { items: 2, ..Sample::default() }));
/// assert_eq!(aggregator.collect().len(), 2);
/// ```
pub fn channel(capacity: usize) -> Result<(TelemetrySink, TelemetryAggregator), EngineError> {
    let ring = Arc::new(TelemetryRing::new(capacity)?);
    let sink = TelemetrySink {
        ring: Arc::clone(&ring),
        pressure: Arc::new(AtomicU32::new(NO_PRESSURE)),
    };
    Ok((sink, TelemetryAggregator::new(ring)))
}

/// Sentinel bit pattern meaning "no pressure reading yet" (a NaN).
const NO_PRESSURE: u32 = u32::MAX;

/// Producer-side handle: the ring plus the latest CPU pressure reading.
///
/// Cheap to clone; every worker holds one.
#[derive(Clone, Debug)]
pub struct TelemetrySink {
    ring: Arc<TelemetryRing>,
    pressure: Arc<AtomicU32>,
}

impl TelemetrySink {
    /// Stamps the current pressure onto `sample` and enqueues it. Returns
    /// `false` if the ring dropped it.
    #[inline]
    pub fn report(&self, mut sample: Sample) -> bool {
        if sample.pressure.is_none() {
            sample.pressure = self.pressure();
        }
        self.ring.try_write(sample)
    }

    /// Latest pressure published by the tuner.
    pub fn pressure(&self) -> Option<f32> {
        match self.pressure.load(Ordering::Relaxed) {
            NO_PRESSURE => None,
            bits => Some(f32::from_bits(bits)),
        }
    }

    pub(crate) fn set_pressure(&self, load: f32) {
        self.pressure
            .store(load.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// Samples lost to a full ring so far.
    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }
}
