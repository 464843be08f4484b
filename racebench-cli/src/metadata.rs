//! System Metadata Collection
//!
//! Report metadata: crate version, timestamp, suite name, the sampler settings
//! of the run and a short description of the machine.
//!
//! The CPU model is read from /proc/cpuinfo and degrades to "Unknown" on
//! other platforms.

use crate::config::IsolationMode;
use chrono::Utc;
use racebench_core::SamplerConfig;
use racebench_report::{ReportConfig, ReportMeta, SCHEMA_VERSION, SystemInfo};

/// Build report metadata for a run of `suite`
pub fn build_report_meta(
    suite: &str,
    config: &SamplerConfig,
    isolation: IsolationMode,
) -> ReportMeta {
    let system = SystemInfo {
        os: std::env::consts::OS.to_string(),
        arch: std::env::consts::ARCH.to_string(),
        cpu: get_cpu_model().unwrap_or_else(|| "Unknown".to_string()),
        cpu_cores: num_cpus(),
    };

    ReportMeta {
        schema_version: SCHEMA_VERSION,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
        suite: suite.to_string(),
        system,
        config: ReportConfig {
            min_time_ns: config.min_time.as_nanos() as u64,
            max_time_ns: config.max_time.as_nanos() as u64,
            min_cycle_time_ns: config.min_cycle_time.as_nanos() as u64,
            min_samples: config.min_samples,
            target_rme_percent: config.target_rme_percent,
            isolation: isolation.as_str().to_string(),
        },
    }
}

/// Get CPU model name from /proc/cpuinfo (Linux only)
fn get_cpu_model() -> Option<String> {
    #[cfg(target_os = "linux")]
    {
        std::fs::read_to_string("/proc/cpuinfo")
            .ok()
            .and_then(|content| {
                content
                    .lines()
                    .find(|l| l.starts_with("model name"))
                    .and_then(|l| l.split(':').nth(1))
                    .map(|s| s.trim().to_string())
            })
    }
    #[cfg(not(target_os = "linux"))]
    {
        None
    }
}

fn num_cpus() -> u32 {
    std::thread::available_parallelism()
        .map(|n| n.get() as u32)
        .unwrap_or(1)
}
