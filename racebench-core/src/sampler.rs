//! Sampler - Timing One Candidate
//!
//! Runs a candidate in cycles until its rate is statistically stable:
//! - Calibration: start with one execution per cycle and grow the count until
//!   a cycle lasts at least `min_cycle_time`. Calibration cycles are not
//!   recorded.
//! - Sampling: one [`SampleRun`] per cycle, until the minimum time and sample
//!   count are met and the relative margin of error is at or below the target,
//!   or the maximum time is spent.
//!
//! The sampler advances one cycle per [`Sampler::step`], which lets the caller
//! handle inbound messages between cycles.

use crate::candidate::{CandidateCode, CandidateDefinition, CandidateError, Deferred};
use crate::measure::Timer;
use crate::suite::SuiteHooks;
use crate::throttle::Throttle;
use crossbeam_channel::RecvTimeoutError;
use racebench_ipc::RunOptions;
use racebench_stats::compute_summary;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;

/// Largest factor by which one calibration step may grow the cycle count
pub const MAX_CALIBRATION_GROWTH: u64 = 100;

/// Invalid sampler settings
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SamplerConfigError {
    #[error("max_time ({max:?}) must not be shorter than min_time ({min:?})")]
    MaxBelowMin { min: Duration, max: Duration },

    #[error("min_cycle_time must be greater than zero")]
    ZeroCycleTime,

    #[error("target rme must be a positive number, got {0}")]
    InvalidTarget(f64),

    #[error("min_samples must be at least 2, got {0}")]
    TooFewSamples(u32),
}

/// Sampling budget for one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct SamplerConfig {
    /// Minimum sampling time before the error target is checked
    pub min_time: Duration,
    /// Hard cap on sampling time; also how long one async execution may take to settle
    pub max_time: Duration,
    /// Target duration of one cycle
    pub min_cycle_time: Duration,
    /// Minimum recorded cycles before the error target is checked
    pub min_samples: u32,
    /// Relative margin of error (percent) at which sampling stops
    pub target_rme_percent: f64,
    /// Minimum interval between progress reports
    pub throttle_interval: Duration,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            min_time: Duration::from_secs(1),
            max_time: Duration::from_secs(5),
            min_cycle_time: Duration::from_millis(50),
            min_samples: 5,
            target_rme_percent: 1.0,
            throttle_interval: Duration::from_millis(200),
        }
    }
}

impl SamplerConfig {
    /// Apply per-run overrides. `max_time` is raised to `min_time` if needed.
    pub fn with_options(&self, options: &RunOptions) -> Self {
        let mut config = self.clone();
        if let Some(ns) = options.min_time_ns {
            config.min_time = Duration::from_nanos(ns);
        }
        if let Some(ns) = options.max_time_ns {
            config.max_time = Duration::from_nanos(ns);
        }
        if let Some(n) = options.min_samples {
            config.min_samples = n;
        }
        if let Some(rme) = options.target_rme_percent {
            config.target_rme_percent = rme;
        }
        config.max_time = config.max_time.max(config.min_time);
        config
    }

    /// The overrides that turn the defaults into this config
    pub fn to_options(&self) -> RunOptions {
        RunOptions {
            min_time_ns: Some(self.min_time.as_nanos() as u64),
            max_time_ns: Some(self.max_time.as_nanos() as u64),
            min_samples: Some(self.min_samples),
            target_rme_percent: Some(self.target_rme_percent),
        }
    }

    /// Check the settings are usable
    pub fn validate(&self) -> Result<(), SamplerConfigError> {
        if self.max_time < self.min_time {
            return Err(SamplerConfigError::MaxBelowMin {
                min: self.min_time,
                max: self.max_time,
            });
        }
        if self.min_cycle_time.is_zero() {
            return Err(SamplerConfigError::ZeroCycleTime);
        }
        if !(self.target_rme_percent.is_finite() && self.target_rme_percent > 0.0) {
            return Err(SamplerConfigError::InvalidTarget(self.target_rme_percent));
        }
        // A single sample has no spread to estimate an error from
        if self.min_samples < 2 {
            return Err(SamplerConfigError::TooFewSamples(self.min_samples));
        }
        Ok(())
    }
}

/// One timed, recorded cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleRun {
    /// Wall time of the cycle
    pub duration_nanos: u64,
    /// Executions in the cycle
    pub executions: u64,
}

impl SampleRun {
    /// Mean time per execution
    pub fn period_nanos(&self) -> f64 {
        self.duration_nanos as f64 / self.executions.max(1) as f64
    }
}

/// Outcome of sampling one candidate
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateStatistics {
    /// Recorded cycles
    pub sample_count: u32,
    /// All cycles, calibration included
    pub cycle_count: u32,
    /// Executions across recorded cycles
    pub executions: u64,
    /// Executions per second over recorded cycles
    pub rate_per_second: f64,
    /// Mean per-execution time over recorded cycles
    pub mean_period_nanos: f64,
    /// Relative margin of error of the mean period, in percent
    pub relative_margin_of_error_percent: f64,
    /// Wall time spent sampling
    pub elapsed: Duration,
    /// Error that ended sampling early
    pub error: Option<CandidateError>,
}

impl CandidateStatistics {
    /// Statistics that only carry an error
    pub fn failed(error: CandidateError) -> Self {
        Self {
            sample_count: 0,
            cycle_count: 0,
            executions: 0,
            rate_per_second: 0.0,
            mean_period_nanos: 0.0,
            relative_margin_of_error_percent: 0.0,
            elapsed: Duration::ZERO,
            error: Some(error),
        }
    }

    /// True when sampling ended with an error
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Progress report for an unfinished candidate
#[derive(Debug, Clone, PartialEq)]
pub struct Progress {
    /// Executions per cycle
    pub count: u64,
    /// Recorded samples
    pub size: u32,
    /// Current rate estimate (0 until the first sample)
    pub rate_per_second: f64,
}

/// Result of [`Sampler::step`]
#[derive(Debug, Clone, PartialEq)]
pub enum SamplerStep {
    /// A cycle ran; carries a progress report if the throttle allowed one
    Cycle(Option<Progress>),
    /// Sampling is over
    Finished(CandidateStatistics),
}

/// Drives one candidate through calibration and sampling.
pub struct Sampler {
    candidate: Arc<CandidateDefinition>,
    config: SamplerConfig,
    throttle: Throttle,
    started: Option<Instant>,
    count: u64,
    calibrated: bool,
    samples: Vec<SampleRun>,
    last_calibration: Option<SampleRun>,
    cycles: u32,
    finished: Option<CandidateStatistics>,
    runtime: Option<tokio::runtime::Runtime>,
}

impl Sampler {
    /// New sampler for `candidate`
    pub fn new(candidate: Arc<CandidateDefinition>, config: SamplerConfig) -> Self {
        let throttle = Throttle::new(config.throttle_interval);
        Self {
            candidate,
            config,
            throttle,
            started: None,
            count: 1,
            calibrated: false,
            samples: Vec::new(),
            last_calibration: None,
            cycles: 0,
            finished: None,
            runtime: None,
        }
    }

    /// The candidate being sampled
    pub fn candidate(&self) -> &Arc<CandidateDefinition> {
        &self.candidate
    }

    /// Executions per cycle
    pub fn count(&self) -> u64 {
        self.count
    }

    /// Recorded samples
    pub fn samples(&self) -> &[SampleRun] {
        &self.samples
    }

    /// Whether sampling has ended
    pub fn is_finished(&self) -> bool {
        self.finished.is_some()
    }

    /// Run one cycle and decide whether to continue.
    pub fn step(&mut self, hooks: &mut SuiteHooks) -> SamplerStep {
        if let Some(stats) = &self.finished {
            return SamplerStep::Finished(stats.clone());
        }

        let started = *self.started.get_or_insert_with(Instant::now);

        let nanos = match self.run_cycle(hooks) {
            Ok(nanos) => nanos,
            Err(error) => {
                tracing::debug!("{} failed: {}", self.candidate.title(), error);
                return SamplerStep::Finished(self.finish(started, Some(error)));
            }
        };
        self.cycles += 1;

        let run = SampleRun {
            duration_nanos: nanos,
            executions: self.count,
        };
        if self.calibrated {
            self.samples.push(run);
        } else if Duration::from_nanos(nanos) >= self.config.min_cycle_time {
            self.calibrated = true;
            self.samples.push(run);
        } else {
            self.last_calibration = Some(run);
            self.count = self.next_count(run);
        }

        let elapsed = started.elapsed();
        if elapsed >= self.config.max_time {
            return SamplerStep::Finished(self.finish(started, None));
        }
        if elapsed >= self.config.min_time && self.samples.len() as u32 >= self.config.min_samples {
            let rme = compute_summary(&self.periods()).rme;
            if rme <= self.config.target_rme_percent {
                return SamplerStep::Finished(self.finish(started, None));
            }
        }

        if self.throttle.ready(Instant::now()) {
            SamplerStep::Cycle(Some(Progress {
                count: self.count,
                size: self.samples.len() as u32,
                rate_per_second: self.rate(),
            }))
        } else {
            SamplerStep::Cycle(None)
        }
    }

    /// Step until finished, passing each unthrottled progress report on.
    pub fn run<F>(&mut self, hooks: &mut SuiteHooks, mut on_progress: F) -> CandidateStatistics
    where
        F: FnMut(&Progress),
    {
        loop {
            match self.step(hooks) {
                SamplerStep::Cycle(Some(progress)) => on_progress(&progress),
                SamplerStep::Cycle(None) => {}
                SamplerStep::Finished(stats) => return stats,
            }
        }
    }

    /// Executions for the next calibration cycle
    fn next_count(&self, run: SampleRun) -> u64 {
        let period = run.period_nanos().max(1.0);
        let target = (self.config.min_cycle_time.as_nanos() as f64 / period).ceil() as u64;
        let ceiling = self.count.saturating_mul(MAX_CALIBRATION_GROWTH);
        let floor = self.count.saturating_add(1);
        target.clamp(floor, ceiling.max(floor))
    }

    fn periods(&self) -> Vec<f64> {
        self.samples.iter().map(SampleRun::period_nanos).collect()
    }

    fn rate(&self) -> f64 {
        let executions: u64 = self.samples.iter().map(|s| s.executions).sum();
        let nanos: u64 = self.samples.iter().map(|s| s.duration_nanos).sum();
        if nanos == 0 {
            0.0
        } else {
            executions as f64 / (nanos as f64 / 1e9)
        }
    }

    fn finish(&mut self, started: Instant, error: Option<CandidateError>) -> CandidateStatistics {
        self.runtime = None;
        if error.is_none() && self.samples.is_empty() {
            // Ran out of time while calibrating; use the longest batch seen
            if let Some(run) = self.last_calibration.take() {
                self.samples.push(run);
            }
        }

        let summary = compute_summary(&self.periods());
        let stats = CandidateStatistics {
            sample_count: self.samples.len() as u32,
            cycle_count: self.cycles,
            executions: self.samples.iter().map(|s| s.executions).sum(),
            rate_per_second: self.rate(),
            mean_period_nanos: summary.mean,
            relative_margin_of_error_percent: summary.rme,
            elapsed: started.elapsed(),
            error,
        };
        self.finished = Some(stats.clone());
        stats
    }

    /// One cycle: untimed setup, timed batch, untimed teardown.
    fn run_cycle(&mut self, hooks: &mut SuiteHooks) -> Result<u64, CandidateError> {
        catch_unwind(AssertUnwindSafe(|| hooks.setup())).map_err(CandidateError::from_panic)?;
        let timed = self.execute_batch();
        catch_unwind(AssertUnwindSafe(|| hooks.teardown())).map_err(CandidateError::from_panic)?;
        timed
    }

    /// Each async execution gets its own `max_time` to settle; the sampling
    /// budget is only checked between cycles.
    fn execute_batch(&mut self) -> Result<u64, CandidateError> {
        let count = self.count;
        let candidate = Arc::clone(&self.candidate);
        let mut code = candidate.code().lock();

        if matches!(&*code, CandidateCode::Future(_)) && self.runtime.is_none() {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| CandidateError::Runtime {
                    message: e.to_string(),
                })?;
            self.runtime = Some(runtime);
        }
        let runtime = self.runtime.as_ref();
        let max_time = self.config.max_time;

        let outcome = catch_unwind(AssertUnwindSafe(|| -> Result<u64, CandidateError> {
            let timer = Timer::start();
            match &mut *code {
                CandidateCode::Sync(f) => {
                    for _ in 0..count {
                        f();
                    }
                }
                CandidateCode::Deferred(f) => {
                    for _ in 0..count {
                        let (handle, signal) = Deferred::pair();
                        f(handle);
                        match signal.recv_timeout(max_time) {
                            Ok(Ok(())) => {}
                            Ok(Err(message)) => return Err(CandidateError::Rejected { message }),
                            Err(RecvTimeoutError::Timeout) => {
                                return Err(CandidateError::Timeout { waited: max_time });
                            }
                            Err(RecvTimeoutError::Disconnected) => {
                                return Err(CandidateError::Abandoned);
                            }
                        }
                    }
                }
                CandidateCode::Future(f) => {
                    let Some(runtime) = runtime else {
                        return Err(CandidateError::Runtime {
                            message: "runtime not initialised".to_string(),
                        });
                    };
                    for _ in 0..count {
                        runtime
                            .block_on(async { tokio::time::timeout(max_time, f()).await })
                            .map_err(|_| CandidateError::Timeout { waited: max_time })?;
                    }
                }
            }
            Ok(timer.stop())
        }));

        match outcome {
            Ok(result) => result,
            Err(payload) => {
                drop(code);
                // A panic may leave spawned tasks behind
                self.runtime = None;
                Err(CandidateError::from_panic(payload))
            }
        }
    }
}
