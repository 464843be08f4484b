//! Configuration loading from racebench.toml
//!
//! RaceBench configuration can be specified in a `racebench.toml` file in the
//! project root. The configuration is discovered by walking up from the
//! current directory; command line flags override it.

use racebench_core::SamplerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// File name looked up by [`RaceConfig::discover`]
pub const CONFIG_FILE: &str = "racebench.toml";

/// RaceBench configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RaceConfig {
    /// Runner configuration
    #[serde(default)]
    pub runner: RunnerConfig,
    /// Output configuration
    #[serde(default)]
    pub output: OutputConfig,
}

/// Where the sandbox runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum IsolationMode {
    /// Re-executed worker process (default)
    #[default]
    Process,
    /// Thread in the host process (no isolation, useful for debugging)
    Thread,
}

impl IsolationMode {
    /// Whether this mode provides process isolation
    pub fn is_isolated(self) -> bool {
        matches!(self, IsolationMode::Process)
    }

    /// Name used in reports
    pub fn as_str(self) -> &'static str {
        match self {
            IsolationMode::Process => "process",
            IsolationMode::Thread => "thread",
        }
    }
}

/// Runner configuration for candidate sampling
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerConfig {
    /// Minimum sampling time per candidate (e.g., "1s")
    #[serde(default = "default_min_time")]
    pub min_time: String,
    /// Hard sampling limit per candidate (e.g., "5s")
    #[serde(default = "default_max_time")]
    pub max_time: String,
    /// Minimum duration of one timed cycle (e.g., "50ms")
    #[serde(default = "default_min_cycle_time")]
    pub min_cycle_time: String,
    /// Minimum interval between progress events (e.g., "200ms")
    #[serde(default = "default_throttle")]
    pub throttle: String,
    /// Minimum number of recorded samples
    #[serde(default = "default_min_samples")]
    pub min_samples: u32,
    /// Stop once the relative margin of error drops to this percentage
    #[serde(default = "default_target_rme")]
    pub target_rme: f64,
    /// Isolation mode: "process" or "thread"
    #[serde(default)]
    pub isolation: IsolationMode,
    /// How long to wait for the sandbox to announce itself
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout: String,
    /// Upper bound for a whole run
    #[serde(default = "default_worker_timeout")]
    pub worker_timeout: String,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            min_time: default_min_time(),
            max_time: default_max_time(),
            min_cycle_time: default_min_cycle_time(),
            throttle: default_throttle(),
            min_samples: default_min_samples(),
            target_rme: default_target_rme(),
            isolation: IsolationMode::default(),
            ready_timeout: default_ready_timeout(),
            worker_timeout: default_worker_timeout(),
        }
    }
}

fn default_min_time() -> String {
    "1s".to_string()
}
fn default_max_time() -> String {
    "5s".to_string()
}
fn default_min_cycle_time() -> String {
    "50ms".to_string()
}
fn default_throttle() -> String {
    "200ms".to_string()
}
fn default_min_samples() -> u32 {
    5
}
fn default_target_rme() -> f64 {
    1.0
}
fn default_ready_timeout() -> String {
    "10s".to_string()
}
fn default_worker_timeout() -> String {
    "10m".to_string()
}

/// Output configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    /// Default output format: "human", "json" or "csv"
    #[serde(default = "default_format")]
    pub format: String,
    /// Output directory for reports
    #[serde(default = "default_output_dir")]
    pub directory: String,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            format: default_format(),
            directory: default_output_dir(),
        }
    }
}

fn default_format() -> String {
    "human".to_string()
}
fn default_output_dir() -> String {
    "target/racebench".to_string()
}

impl RaceConfig {
    /// Load configuration from a TOML file
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())?;
        let config: Self = toml::from_str(&content)?;
        Ok(config)
    }

    /// Try to discover and load configuration by walking up from current directory
    pub fn discover() -> Option<Self> {
        let mut dir = std::env::current_dir().ok()?;
        loop {
            let config_path = dir.join(CONFIG_FILE);
            if config_path.exists() {
                return match Self::load(&config_path) {
                    Ok(config) => Some(config),
                    Err(e) => {
                        tracing::warn!("ignoring {}: {}", config_path.display(), e);
                        None
                    }
                };
            }
            if !dir.pop() {
                break;
            }
        }
        None
    }

    /// Parse duration string (e.g., "3s", "500ms", "2m") to nanoseconds
    pub fn parse_duration(s: &str) -> anyhow::Result<u64> {
        let s = s.trim();
        if s.is_empty() {
            return Err(anyhow::anyhow!("Empty duration string"));
        }

        let (num_part, unit_part) = s
            .char_indices()
            .find(|(_, c)| c.is_alphabetic())
            .map(|(i, _)| s.split_at(i))
            .unwrap_or((s, "s"));

        let value: f64 = num_part
            .trim()
            .parse()
            .map_err(|_| anyhow::anyhow!("Invalid duration number: {}", num_part))?;
        if !value.is_finite() || value < 0.0 {
            return Err(anyhow::anyhow!("Invalid duration: {}", s));
        }

        let multiplier: u64 = match unit_part.to_lowercase().as_str() {
            "ns" => 1,
            "us" | "µs" => 1_000,
            "ms" => 1_000_000,
            "s" | "" => 1_000_000_000,
            "m" | "min" => 60_000_000_000,
            _ => return Err(anyhow::anyhow!("Unknown duration unit: {}", unit_part)),
        };

        Ok((value * multiplier as f64) as u64)
    }

    /// [`parse_duration`](Self::parse_duration) as a `Duration`
    pub fn duration(s: &str) -> anyhow::Result<Duration> {
        Self::parse_duration(s).map(Duration::from_nanos)
    }

    /// Sampler settings described by `[runner]`
    pub fn to_sampler_config(&self) -> anyhow::Result<SamplerConfig> {
        let runner = &self.runner;
        let config = SamplerConfig {
            min_time: Self::duration(&runner.min_time)?,
            max_time: Self::duration(&runner.max_time)?,
            min_cycle_time: Self::duration(&runner.min_cycle_time)?,
            min_samples: runner.min_samples,
            target_rme_percent: runner.target_rme,
            throttle_interval: Self::duration(&runner.throttle)?,
        };
        config.validate()?;
        Ok(config)
    }

    /// `ready_timeout` as a `Duration`
    pub fn ready_timeout(&self) -> anyhow::Result<Duration> {
        Self::duration(&self.runner.ready_timeout)
    }

    /// `worker_timeout` as a `Duration`
    pub fn worker_timeout(&self) -> anyhow::Result<Duration> {
        Self::duration(&self.runner.worker_timeout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RaceConfig::default();
        assert_eq!(config.runner.min_time, "1s");
        assert_eq!(config.runner.max_time, "5s");
        assert_eq!(config.runner.isolation, IsolationMode::Process);
        assert_eq!(config.output.format, "human");
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(RaceConfig::parse_duration("3s").unwrap(), 3_000_000_000);
        assert_eq!(RaceConfig::parse_duration("500ms").unwrap(), 500_000_000);
        assert_eq!(RaceConfig::parse_duration("100us").unwrap(), 100_000);
        assert_eq!(RaceConfig::parse_duration("1000ns").unwrap(), 1000);
        assert_eq!(RaceConfig::parse_duration("2m").unwrap(), 120_000_000_000);
        assert_eq!(RaceConfig::parse_duration("1.5s").unwrap(), 1_500_000_000);
        assert_eq!(RaceConfig::parse_duration("2").unwrap(), 2_000_000_000);
        assert!(RaceConfig::parse_duration("").is_err());
        assert!(RaceConfig::parse_duration("5h").is_err());
        assert!(RaceConfig::parse_duration("-1s").is_err());
    }

    #[test]
    fn test_parse_toml() {
        let toml_str = r#"
            [runner]
            min_time = "200ms"
            isolation = "thread"
        "#;

        let config: RaceConfig = toml::from_str(toml_str).unwrap();
        assert_eq!(config.runner.min_time, "200ms");
        assert_eq!(config.runner.isolation, IsolationMode::Thread);
        // Defaults should still apply
        assert_eq!(config.runner.max_time, "5s");
        assert_eq!(config.output.directory, "target/racebench");
    }

    #[test]
    fn test_to_sampler_config() {
        let sampler = RaceConfig::default().to_sampler_config().unwrap();
        assert_eq!(sampler.min_time, Duration::from_secs(1));
        assert_eq!(sampler.max_time, Duration::from_secs(5));
        assert_eq!(sampler.min_cycle_time, Duration::from_millis(50));
        assert_eq!(sampler.throttle_interval, Duration::from_millis(200));

        let mut config = RaceConfig::default();
        config.runner.max_time = "100ms".to_string();
        assert!(config.to_sampler_config().is_err());
    }
}
