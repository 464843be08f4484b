//! Output Formatting
//!
//! Human-readable output for suite reports: one line per candidate with its
//! rate, margin of error and standing against the fastest, followed by a
//! summary block.

use racebench_ipc::CandidateStatus;
use racebench_report::{CandidateReportResult, Report};

/// Format a report for human-readable terminal display
pub fn format_human_output(report: &Report) -> String {
    let mut output = String::new();

    output.push('\n');
    output.push_str(&format!("RaceBench Results: {}\n", report.meta.suite));
    output.push_str(&"=".repeat(60));
    output.push_str("\n\n");

    let name_width = report
        .results
        .iter()
        .map(|r| r.name.chars().count())
        .max()
        .unwrap_or(0)
        .max(8);
    let rate_width = report
        .results
        .iter()
        .filter_map(|r| r.rate_per_second)
        .map(|rate| format_rate(rate).len())
        .max()
        .unwrap_or(0);

    for result in &report.results {
        let icon = match result.status {
            CandidateStatus::Completed => "✓",
            CandidateStatus::Error => "✗",
            CandidateStatus::Aborted => "⊘",
            _ => "·",
        };
        output.push_str(&format!(
            "  {} {:<width$}  ",
            icon,
            result.name,
            width = name_width
        ));

        match (result.rate_per_second, &result.error) {
            (Some(rate), None) => {
                output.push_str(&format!(
                    "{:>w$} ops/sec ±{:.2}%  ({} sample{})  {}\n",
                    format_rate(rate),
                    result.rme_percent.unwrap_or(0.0),
                    result.samples,
                    if result.samples == 1 { "" } else { "s" },
                    standing(result),
                    w = rate_width
                ));
            }
            (_, Some(error)) => output.push_str(&format!("error: {}\n", error)),
            (None, None) => output.push_str(&format!("{}\n", result.status)),
        }
    }

    output.push_str("\nSummary\n");
    output.push_str(&"-".repeat(60));
    output.push('\n');
    output.push_str(&format!(
        "  Total: {}  Completed: {}  Errored: {}\n",
        report.summary.total_candidates, report.summary.completed, report.summary.errored
    ));
    if let Some(fastest) = &report.summary.fastest {
        output.push_str(&format!("  Fastest: {}\n", fastest));
    }
    if report.summary.total_duration_ms > 0.0 {
        output.push_str(&format!(
            "  Duration: {:.2} ms\n",
            report.summary.total_duration_ms
        ));
    }

    output
}

/// "fastest", "N% slower", or nothing for a lone candidate
fn standing(result: &CandidateReportResult) -> String {
    if result.is_fastest {
        return "fastest".to_string();
    }
    match result.percent_slower {
        Some(percent) if percent > 0.0 => format!("{}% slower", format_percent(percent)),
        _ => String::new(),
    }
}

fn format_percent(percent: f64) -> String {
    if percent < 1.0 {
        format!("{:.2}", percent)
    } else {
        format!("{:.0}", percent)
    }
}

/// Operations per second with thousands separators.
///
/// Rates below 100 keep two decimals; faster ones are shown as integers.
pub fn format_rate(rate: f64) -> String {
    if !rate.is_finite() {
        return "-".to_string();
    }
    if rate < 100.0 {
        return format!("{:.2}", rate);
    }
    let digits = format!("{:.0}", rate);
    let mut grouped = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, ch) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(ch);
    }
    grouped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use racebench_ipc::{CandidateId, RankedResult, SuiteReport};
    use racebench_report::{CandidateInfo, ReportConfig, ReportMeta, SCHEMA_VERSION, SystemInfo};

    fn report() -> Report {
        let ranked = SuiteReport {
            results: vec![
                RankedResult {
                    candidate_id: CandidateId(0),
                    rate_per_second: Some(1_234_567.4),
                    relative_margin_of_error_percent: Some(0.42),
                    sample_count: 48,
                    is_fastest: true,
                    is_slowest: false,
                    percent_slower_than_fastest: Some(0.0),
                    error: None,
                },
                RankedResult {
                    candidate_id: CandidateId(1),
                    rate_per_second: Some(617_283.7),
                    relative_margin_of_error_percent: Some(1.5),
                    sample_count: 40,
                    is_fastest: false,
                    is_slowest: true,
                    percent_slower_than_fastest: Some(50.0),
                    error: None,
                },
                RankedResult {
                    candidate_id: CandidateId(2),
                    rate_per_second: None,
                    relative_margin_of_error_percent: None,
                    sample_count: 0,
                    is_fastest: false,
                    is_slowest: false,
                    percent_slower_than_fastest: None,
                    error: Some("panicked: boom".to_string()),
                },
            ],
        };
        let names = ["push_str", "format", "broken"];
        let candidates: Vec<CandidateInfo> = names
            .iter()
            .enumerate()
            .map(|(i, name)| CandidateInfo {
                id: CandidateId(i as u32),
                name: name.to_string(),
                status: CandidateStatus::Completed,
            })
            .collect();
        let meta = ReportMeta {
            schema_version: SCHEMA_VERSION,
            version: "0.1.0".to_string(),
            timestamp: Utc::now(),
            suite: "strings".to_string(),
            system: SystemInfo {
                os: "linux".to_string(),
                arch: "x86_64".to_string(),
                cpu: "test".to_string(),
                cpu_cores: 1,
            },
            config: ReportConfig::default(),
        };
        Report::from_suite(meta, &ranked, &candidates)
    }

    #[test]
    fn test_format_rate() {
        assert_eq!(format_rate(42.567), "42.57");
        assert_eq!(format_rate(99.994), "99.99");
        assert_eq!(format_rate(100.0), "100");
        assert_eq!(format_rate(1234.4), "1,234");
        assert_eq!(format_rate(1_234_567.0), "1,234,567");
        assert_eq!(format_rate(999_999.6), "1,000,000");
    }

    #[test]
    fn test_human_output() {
        let output = format_human_output(&report());
        assert!(output.contains("RaceBench Results: strings"));

        let push = output.lines().find(|l| l.contains("push_str")).unwrap();
        assert!(push.contains("1,234,567 ops/sec ±0.42%"));
        assert!(push.contains("(48 samples)"));
        assert!(push.trim_end().ends_with("fastest"));

        let format = output.lines().find(|l| l.contains("✓ format")).unwrap();
        assert!(format.contains("617,284 ops/sec"));
        assert!(format.trim_end().ends_with("50% slower"));

        let broken = output.lines().find(|l| l.contains("broken")).unwrap();
        assert!(broken.contains("error: panicked: boom"));

        assert!(output.contains("Total: 3  Completed: 2  Errored: 1"));
        assert!(output.contains("Fastest: push_str"));
    }

    #[test]
    fn test_standing_below_one_percent() {
        let mut result = report().results[1].clone();
        result.percent_slower = Some(0.25);
        assert_eq!(standing(&result), "0.25% slower");
    }
}
