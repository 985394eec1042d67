use super::Sample;
use super::ring::TelemetryRing;
use std::sync::Arc;

/// Maximum samples handed to the oracle per tuning cycle.
pub const BATCH_LIMIT: usize = 64;

/// Single consumer of the telemetry ring.
///
/// Drains up to [`BATCH_LIMIT`] samples per call into a private buffer and
/// lends them out as a slice. Whatever remains in the ring is picked up by
/// the next call.
///
/// Exactly one aggregator exists per ring: it is only created by
/// [`channel`](super::channel) and cannot be cloned.
///
/// ```compile_fail
/// let (_sink, aggregator) = phasework::telemetry::channel(8).unwrap();
/// let second = aggregator.clone();
/// ```
///
/// The ring itself is not reachable from outside the crate either:
///
/// ```compile_fail
/// let ring = phasework::telemetry::ring::TelemetryRing::new(8);
/// ```
pub struct TelemetryAggregator {
    ring: Arc<TelemetryRing>,
    batch: [Sample; BATCH_LIMIT],
    len: usize,
}

impl TelemetryAggregator {
    pub(super) fn new(ring: Arc<TelemetryRing>) -> Self {
        TelemetryAggregator {
            ring,
            batch: [Sample::default(); BATCH_LIMIT],
            len: 0,
        }
    }

    /// Drains whatever is available, up to the batch limit. Never blocks;
    /// returns an empty slice when the ring is empty.
    pub fn collect(&mut self) -> &[Sample] {
        self.len = 0;
        while self.len < BATCH_LIMIT {
            match self.ring.try_read() {
                Some(sample) => {
                    self.batch[self.len] = sample;
                    self.len += 1;
                }
                None => break,
            }
        }
        &self.batch[..self.len]
    }

    /// The batch produced by the last [`collect`](Self::collect).
    pub fn last_batch(&self) -> &[Sample] {
        &self.batch[..self.len]
    }

    pub fn dropped(&self) -> u64 {
        self.ring.dropped()
    }
}

impl std::fmt::Debug for TelemetryAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TelemetryAggregator")
            .field("ring", &self.ring)
            .field("len", &self.len)
            .finish()
    }
}
