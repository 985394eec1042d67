//! Hardware survey, captured once at engine construction.

use sysinfo::{CpuRefreshKind, System};

/// SIMD instruction sets available on this machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SimdFlags {
    pub avx2: bool,
    pub avx512: bool,
    pub neon: bool,
}

impl SimdFlags {
    #[cfg(target_arch = "x86_64")]
    pub fn detect() -> Self {
        SimdFlags {
            avx2: std::arch::is_x86_feature_detected!("avx2"),
            avx512: std::arch::is_x86_feature_detected!("avx512f"),
            neon: false,
        }
    }

    #[cfg(target_arch = "aarch64")]
    pub fn detect() -> Self {
        SimdFlags {
            neon: std::arch::is_aarch64_feature_detected!("neon"),
            ..SimdFlags::default()
        }
    }

    #[cfg(not(any(target_arch = "x86_64", target_arch = "aarch64")))]
    pub fn detect() -> Self {
        SimdFlags::default()
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct Topology {
    pub logical_cores: usize,
    /// Performance cores are assumed to occupy the lowest logical indices.
    pub performance_cores: usize,
    pub physical_cores: usize,
    pub cache_line_size: usize,
    /// 0 when unknown.
    pub l3_cache_bytes: u64,
    pub simd: SimdFlags,
    pub cpu_brand: String,
}

const DEFAULT_CACHE_LINE: usize = 64;

impl Topology {
    pub fn detect() -> Self {
        let mut system = System::new();
        system.refresh_cpu_specifics(CpuRefreshKind::everything());

        let cpus = system.cpus();
        let logical_cores = match cpus.len() {
            0 => num_cpus::get(),
            n => n,
        };
        let cpu_brand = cpus
            .first()
            .map(|cpu| cpu.brand().trim().to_string())
            .unwrap_or_default();

        // Hybrid core detection needs OS-specific queries; treat every core
        // as a performance core until one is available.
        let topology = Topology {
            logical_cores,
            performance_cores: logical_cores,
            physical_cores: num_cpus::get_physical().min(logical_cores),
            cache_line_size: cache::line_size().unwrap_or(DEFAULT_CACHE_LINE),
            l3_cache_bytes: cache::l3_bytes().unwrap_or(0),
            simd: SimdFlags::detect(),
            cpu_brand,
        };
        tracing::debug!(?topology, "hardware survey");
        topology
    }

    /// A fixed topology, for tests and for callers that know their hardware.
    pub fn uniform(logical_cores: usize) -> Self {
        Topology {
            logical_cores,
            performance_cores: logical_cores,
            physical_cores: logical_cores,
            cache_line_size: DEFAULT_CACHE_LINE,
            ..Topology::default()
        }
    }

    pub fn is_performance_core(&self, index: usize) -> bool {
        index < self.performance_cores
    }

    pub fn has_smt(&self) -> bool {
        self.physical_cores > 0 && self.physical_cores < self.logical_cores
    }
}

#[cfg(target_os = "linux")]
mod cache {
    use std::fs;

    const CACHE_DIR: &str = "/sys/devices/system/cpu/cpu0/cache";

    pub(super) fn line_size() -> Option<usize> {
        fs::read_to_string(format!("{CACHE_DIR}/index0/coherency_line_size"))
            .ok()?
            .trim()
            .parse::<usize>()
            .ok()
            .filter(|n| n.is_power_of_two())
    }

    /// Size of the first level-3 cache listed for cpu0.
    pub(super) fn l3_bytes() -> Option<u64> {
        for index in 0..8 {
            let dir = format!("{CACHE_DIR}/index{index}");
            let Ok(level) = fs::read_to_string(format!("{dir}/level")) else {
                break;
            };
            if level.trim() == "3" {
                return parse_size(&fs::read_to_string(format!("{dir}/size")).ok()?);
            }
        }
        None
    }

    /// Parses sysfs sizes such as `32768K` or `16M`.
    pub(super) fn parse_size(raw: &str) -> Option<u64> {
        let raw = raw.trim();
        let (digits, scale) = match raw.as_bytes().last()? {
            b'K' => (&raw[..raw.len() - 1], 1024),
            b'M' => (&raw[..raw.len() - 1], 1024 * 1024),
            b'G' => (&raw[..raw.len() - 1], 1024 * 1024 * 1024),
            _ => (raw, 1),
        };
        digits.parse::<u64>().ok().map(|n| n * scale)
    }
}

#[cfg(not(target_os = "linux"))]
mod cache {
    pub(super) fn line_size() -> Option<usize> {
        None
    }

    pub(super) fn l3_bytes() -> Option<u64> {
        None
    }
}
