#![warn(missing_docs)]
//! RaceBench Report - Reporting
//!
//! Turns a ranked suite report into output formats:
//! - JSON (machine-readable)
//! - CSV (spreadsheet-compatible)
//!
//! Human-readable terminal output lives with the CLI.

mod csv;
mod json;
mod report;

pub use csv::generate_csv_report;
pub use json::{generate_json_report, parse_json_report};
pub use report::{
    CandidateInfo, CandidateReportResult, Report, ReportConfig, ReportMeta, ReportSummary,
    SCHEMA_VERSION, SystemInfo,
};

/// Output format selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    /// JSON with full schema
    Json,
    /// CSV for spreadsheets
    Csv,
    /// Human-readable terminal output
    #[default]
    Human,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "json" => Ok(OutputFormat::Json),
            "csv" => Ok(OutputFormat::Csv),
            "human" | "text" => Ok(OutputFormat::Human),
            other => Err(format!("Unknown output format: {}", other)),
        }
    }
}

impl OutputFormat {
    /// File extension for reports written to disk
    pub fn extension(self) -> &'static str {
        match self {
            OutputFormat::Json => "json",
            OutputFormat::Csv => "csv",
            OutputFormat::Human => "txt",
        }
    }
}
