//! Report Data Structures

use chrono::{DateTime, Utc};
use racebench_ipc::{CandidateId, CandidateStatus, SuiteReport};
use serde::{Deserialize, Serialize};

/// Current JSON schema version
pub const SCHEMA_VERSION: u32 = 1;

/// Complete report of one suite run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub meta: ReportMeta,
    pub results: Vec<CandidateReportResult>,
    pub summary: ReportSummary,
}

/// Report metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMeta {
    pub schema_version: u32,
    pub version: String,
    pub timestamp: DateTime<Utc>,
    pub suite: String,
    pub system: SystemInfo,
    pub config: ReportConfig,
}

/// Sampler settings the run used
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportConfig {
    pub min_time_ns: u64,
    pub max_time_ns: u64,
    pub min_cycle_time_ns: u64,
    pub min_samples: u32,
    pub target_rme_percent: f64,
    pub isolation: String,
}

/// System information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SystemInfo {
    pub os: String,
    pub arch: String,
    pub cpu: String,
    pub cpu_cores: u32,
}

/// Host-side knowledge of a candidate that the ranked results lack
#[derive(Debug, Clone, PartialEq)]
pub struct CandidateInfo {
    pub id: CandidateId,
    pub name: String,
    pub status: CandidateStatus,
}

/// One candidate's line in the report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateReportResult {
    pub id: CandidateId,
    pub name: String,
    pub status: CandidateStatus,
    /// Executions per second; absent for errored candidates
    pub rate_per_second: Option<f64>,
    /// Relative margin of error of the rate
    pub rme_percent: Option<f64>,
    /// Recorded cycles
    pub samples: u32,
    pub is_fastest: bool,
    pub is_slowest: bool,
    /// Percent slower than the fastest candidate
    pub percent_slower: Option<f64>,
    pub error: Option<String>,
}

/// Report summary
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total_candidates: usize,
    pub completed: usize,
    pub errored: usize,
    pub fastest: Option<String>,
    pub slowest: Option<String>,
    pub total_duration_ms: f64,
}

impl Report {
    /// Build a report from ranked results and the host's candidate view.
    ///
    /// Results keep the ranked order. Candidates missing from `candidates` are
    /// named by id.
    pub fn from_suite(meta: ReportMeta, ranked: &SuiteReport, candidates: &[CandidateInfo]) -> Self {
        let results: Vec<CandidateReportResult> = ranked
            .results
            .iter()
            .map(|r| {
                let info = candidates.iter().find(|c| c.id == r.candidate_id);
                let status = match (info, &r.error) {
                    (_, Some(_)) => CandidateStatus::Error,
                    (Some(info), None) => info.status,
                    (None, None) => CandidateStatus::Completed,
                };
                CandidateReportResult {
                    id: r.candidate_id,
                    name: info
                        .map(|c| c.name.clone())
                        .unwrap_or_else(|| r.candidate_id.to_string()),
                    status,
                    rate_per_second: r.rate_per_second,
                    rme_percent: r.relative_margin_of_error_percent,
                    samples: r.sample_count,
                    is_fastest: r.is_fastest,
                    is_slowest: r.is_slowest,
                    percent_slower: r.percent_slower_than_fastest,
                    error: r.error.clone(),
                }
            })
            .collect();

        let summary = ReportSummary {
            total_candidates: results.len(),
            completed: results.iter().filter(|r| r.error.is_none()).count(),
            errored: results.iter().filter(|r| r.error.is_some()).count(),
            fastest: results.iter().find(|r| r.is_fastest).map(|r| r.name.clone()),
            slowest: results.iter().find(|r| r.is_slowest).map(|r| r.name.clone()),
            total_duration_ms: 0.0,
        };

        Self {
            meta,
            results,
            summary,
        }
    }

    /// Whether any candidate ended with an error
    pub fn has_errors(&self) -> bool {
        self.summary.errored > 0
    }
}
