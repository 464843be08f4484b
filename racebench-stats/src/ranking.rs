//! Comparative ranking of a finished run.

use racebench_ipc::{CandidateId, RankedResult, SuiteReport};

/// One candidate's outcome, as fed to [`rank`]
#[derive(Debug, Clone, PartialEq)]
pub struct RankingInput {
    /// Candidate id
    pub candidate_id: CandidateId,
    /// Executions per second
    pub rate_per_second: f64,
    /// Relative margin of error, in percent
    pub relative_margin_of_error_percent: f64,
    /// Recorded cycles
    pub sample_count: u32,
    /// Error that ended the candidate, if any
    pub error: Option<String>,
}

impl RankingInput {
    /// Input for a candidate that produced statistics
    pub fn completed(candidate_id: CandidateId, rate_per_second: f64, rme: f64, samples: u32) -> Self {
        Self {
            candidate_id,
            rate_per_second,
            relative_margin_of_error_percent: rme,
            sample_count: samples,
            error: None,
        }
    }

    /// Input for a candidate that failed
    pub fn errored(candidate_id: CandidateId, error: impl Into<String>) -> Self {
        Self {
            candidate_id,
            rate_per_second: 0.0,
            relative_margin_of_error_percent: 0.0,
            sample_count: 0,
            error: Some(error.into()),
        }
    }
}

/// Rank candidates by rate.
///
/// Errored candidates are listed with their error and take no part in the
/// comparison. Output order follows input order.
pub fn rank(inputs: &[RankingInput]) -> SuiteReport {
    let mut fastest: Option<usize> = None;
    let mut slowest: Option<usize> = None;

    for (i, input) in inputs.iter().enumerate() {
        if input.error.is_some() {
            continue;
        }
        let rate = input.rate_per_second;
        // Strict for the fastest keeps the first of a tie, non-strict for the
        // slowest keeps the last
        if fastest.is_none_or(|f| rate > inputs[f].rate_per_second) {
            fastest = Some(i);
        }
        if slowest.is_none_or(|s| rate <= inputs[s].rate_per_second) {
            slowest = Some(i);
        }
    }

    let fastest_rate = fastest.map(|f| inputs[f].rate_per_second).unwrap_or(0.0);

    let results = inputs
        .iter()
        .enumerate()
        .map(|(i, input)| {
            if let Some(error) = &input.error {
                return RankedResult {
                    candidate_id: input.candidate_id,
                    rate_per_second: None,
                    relative_margin_of_error_percent: None,
                    sample_count: input.sample_count,
                    is_fastest: false,
                    is_slowest: false,
                    percent_slower_than_fastest: None,
                    error: Some(error.clone()),
                };
            }

            let is_fastest = fastest == Some(i);
            let percent = if is_fastest || fastest_rate <= 0.0 {
                0.0
            } else {
                round_percent((1.0 - input.rate_per_second / fastest_rate) * 100.0)
            };

            RankedResult {
                candidate_id: input.candidate_id,
                rate_per_second: Some(input.rate_per_second),
                relative_margin_of_error_percent: Some(input.relative_margin_of_error_percent),
                sample_count: input.sample_count,
                is_fastest,
                is_slowest: slowest == Some(i),
                percent_slower_than_fastest: Some(percent),
                error: None,
            }
        })
        .collect();

    SuiteReport { results }
}

/// Two decimals below one percent, whole percent otherwise
fn round_percent(percent: f64) -> f64 {
    if percent < 1.0 {
        (percent * 100.0).round() / 100.0
    } else {
        percent.round()
    }
}
