#![warn(missing_docs)]
//! RaceBench Core - Sandbox Runtime
//!
//! This crate provides the execution environment for candidates:
//! - `Suite` and `CandidateSet` for defining what to compare
//! - `Sampler` for calibrated, cycle-based timing of one candidate
//! - `SuiteOrchestrator` for sequencing candidates and reporting over IPC
//! - Sandbox entry points for worker processes and debug threads

mod candidate;
mod measure;
mod orchestrator;
mod sampler;
mod sandbox;
mod suite;
mod throttle;

pub use candidate::{
    BoxFuture, Candidate, CandidateCode, CandidateDefinition, CandidateError, Deferred,
};
pub use measure::{Timer, pin_to_cpu};
pub use orchestrator::{SuiteOrchestrator, SuiteState};
pub use sampler::{
    CandidateStatistics, MAX_CALIBRATION_GROWTH, Progress, SampleRun, Sampler, SamplerConfig,
    SamplerConfigError, SamplerStep,
};
pub use sandbox::{
    IPC_FD_ENV, SandboxError, SandboxOptions, ThreadSandbox, process_endpoint,
    run_process_sandbox, run_sandbox, shutdown_requested, spawn_thread_sandbox,
};
pub use suite::{CandidateSet, Suite, SuiteError, SuiteHooks};
pub use throttle::Throttle;
