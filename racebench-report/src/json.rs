//! JSON Output

use crate::report::Report;

/// Generate a prettified JSON report.
pub fn generate_json_report(report: &Report) -> Result<String, serde_json::Error> {
    serde_json::to_string_pretty(report)
}

/// Parse a report previously written by [`generate_json_report`].
pub fn parse_json_report(json: &str) -> Result<Report, serde_json::Error> {
    serde_json::from_str(json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[test]
    fn test_json_shape() {
        let json = generate_json_report(&sample_report()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();

        assert_eq!(value["meta"]["suite"], "strings");
        assert_eq!(value["results"][0]["id"], 0);
        assert_eq!(value["results"][0]["status"], "completed");
        assert_eq!(value["results"][1]["percent_slower"], 50.0);
        assert!(value["results"][2]["rate_per_second"].is_null());
        assert_eq!(value["summary"]["errored"], 1);
    }

    #[test]
    fn test_parse_back() {
        let json = generate_json_report(&sample_report()).unwrap();
        let report = parse_json_report(&json).unwrap();
        assert_eq!(report.results[1].name, "format!, joined");
    }
}
