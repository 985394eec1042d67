//! Process CPU-load sampling for the tuner.

use std::time::{Duration, Instant};
use sysinfo::{Pid, ProcessRefreshKind, System};

/// Source of the process's normalized CPU load.
pub trait LoadSampler: Send {
    /// Latest load in `[0, 1]`, or `None` if no reading is available.
    /// Called once per tuner iteration; implementations throttle themselves.
    fn sample(&mut self) -> Option<f32>;
}

/// How often [`ProcessLoadSampler`] actually queries the OS.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_millis(500);

/// Reads this process's CPU usage through `sysinfo`.
///
/// The usage sysinfo reports is a percentage of one core; it is divided by
/// the logical core count so that 1.0 means every core is busy.
pub struct ProcessLoadSampler {
    system: System,
    pid: Option<Pid>,
    cores: f32,
    interval: Duration,
    last_refresh: Option<Instant>,
    load: Option<f32>,
}

impl ProcessLoadSampler {
    pub fn new(logical_cores: usize) -> Self {
        Self::with_interval(logical_cores, DEFAULT_SAMPLE_INTERVAL)
    }

    pub fn with_interval(logical_cores: usize, interval: Duration) -> Self {
        let pid = sysinfo::get_current_pid()
            .inspect_err(|e| tracing::warn!(error = %e, "process id unavailable, load sampling disabled"))
            .ok();
        ProcessLoadSampler {
            system: System::new(),
            pid,
            cores: logical_cores.max(1) as f32,
            interval,
            last_refresh: None,
            load: None,
        }
    }

    fn refresh(&mut self, pid: Pid) -> Option<f32> {
        self.system
            .refresh_process_specifics(pid, ProcessRefreshKind::new().with_cpu());
        let usage = self.system.process(pid)?.cpu_usage();
        Some((usage / 100.0 / self.cores).clamp(0.0, 1.0))
    }
}

impl LoadSampler for ProcessLoadSampler {
    fn sample(&mut self) -> Option<f32> {
        let pid = self.pid?;
        let now = Instant::now();
        let due = self
            .last_refresh
            .is_none_or(|last| now.duration_since(last) >= self.interval);
        if !due {
            return self.load;
        }

        let first = self.last_refresh.is_none();
        self.last_refresh = Some(now);
        let load = self.refresh(pid);
        // The first refresh only establishes the baseline usage is measured against.
        if !first {
            self.load = load;
        }
        self.load
    }
}

impl std::fmt::Debug for ProcessLoadSampler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessLoadSampler")
            .field("pid", &self.pid)
            .field("interval", &self.interval)
            .field("load", &self.load)
            .finish_non_exhaustive()
    }
}

/// A sampler that never reports.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLoad;

impl LoadSampler for NoLoad {
    fn sample(&mut self) -> Option<f32> {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_reading_is_baseline_only() {
        let mut sampler = ProcessLoadSampler::with_interval(4, Duration::from_secs(3600));
        assert_eq!(sampler.sample(), None);
        // Throttled: no second refresh inside the interval.
        assert_eq!(sampler.sample(), None);
    }

    #[test]
    fn test_readings_are_normalized() {
        let mut sampler = ProcessLoadSampler::with_interval(1, Duration::ZERO);
        sampler.sample();
        let mut x = 0u64;
        for i in 0..2_000_000u64 {
            x = x.wrapping_mul(31).wrapping_add(i);
        }
        std::hint::black_box(x);
        std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
        if let Some(load) = sampler.sample() {
            assert!((0.0..=1.0).contains(&load));
        }
    }

    #[test]
    fn test_no_load() {
        assert_eq!(NoLoad.sample(), None);
    }
}
