#![warn(missing_docs)]
//! RaceBench Statistical Engine
//!
//! Sample statistics for the sampler's stop criterion and the comparative
//! ranking of a finished run:
//! - Mean, sample variance and standard error over per-cycle periods
//! - Relative margin of error from Student's t critical values
//! - Fastest/slowest selection and percent-slower deltas

mod ranking;
mod student_t;
mod summary;

pub use ranking::{RankingInput, rank};
pub use student_t::{T_INFINITY, critical_value};
pub use summary::{SummaryStatistics, compute_summary};
