#![warn(missing_docs)]
//! # RaceBench
//!
//! Sandboxed comparative benchmarking: race several candidate snippets against
//! each other and rank them by throughput.
//!
//! - **Isolation**: candidates run in a re-executed worker process; a
//!   candidate that panics or hangs does not take the host down
//! - **Typed IPC**: a small message protocol (`ready`, `run`, `stop`,
//!   `shutdown`, `cycle`, `complete`) over rkyv frames
//! - **Calibrated sampling**: executions per cycle grow until a cycle is long
//!   enough to time; sampling stops once the relative margin of error is low
//! - **Ranking**: fastest/slowest and percent slower than the fastest, with
//!   errored candidates kept in the report
//!
//! ## Quick Start
//!
//! ```ignore
//! use racebench::prelude::*;
//! use std::hint::black_box;
//!
//! fn suite() -> Suite {
//!     let mut suite = Suite::new("strings");
//!     suite
//!         .add(Candidate::sync("push_str", || {
//!             let mut s = String::new();
//!             for _ in 0..16 {
//!                 s.push_str("ab");
//!             }
//!             black_box(s);
//!         }))
//!         .unwrap();
//!     suite
//!         .add(Candidate::sync("repeat", || {
//!             black_box("ab".repeat(16));
//!         }))
//!         .unwrap();
//!     suite
//! }
//!
//! fn main() -> anyhow::Result<()> {
//!     racebench::run(suite)
//! }
//! ```
//!
//! ## Async Candidates
//!
//! ```ignore
//! suite.add(Candidate::future("sleep", || async {
//!     tokio::time::sleep(Duration::from_micros(50)).await;
//! }))?;
//!
//! suite.add(Candidate::deferred("callback", |deferred| {
//!     std::thread::spawn(move || deferred.resolve());
//! }))?;
//! ```

// Re-export core types
pub use racebench_core::{
    Candidate, CandidateDefinition, CandidateError, CandidateSet, CandidateStatistics, Deferred,
    Sampler, SamplerConfig, SandboxOptions, Suite, SuiteError, SuiteHooks, SuiteOrchestrator,
    SuiteState, spawn_thread_sandbox,
};

// Re-export protocol types
pub use racebench_ipc::{
    CandidateId, CandidateStatus, Envelope, MessageKind, RankedResult, RunOptions, SuiteReport,
};

// Re-export host side
pub use racebench_cli::{
    BenchStatus, CandidateView, Cli, HostController, IsolationMode, RaceConfig, run, run_with_cli,
};

// Re-export stats and reporting
pub use racebench_report::{OutputFormat, Report};
pub use racebench_stats::{RankingInput, SummaryStatistics, compute_summary, rank};

/// Prelude for convenient imports
pub mod prelude {
    pub use crate::{Candidate, CandidateId, Deferred, Suite, SuiteHooks};
    pub use std::time::Duration;
}
