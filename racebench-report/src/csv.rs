//! CSV Output

use crate::report::Report;

const HEADER: &str =
    "id,name,status,rate_per_second,rme_percent,samples,fastest,slowest,percent_slower,error\n";

/// Generate CSV content, one row per candidate.
pub fn generate_csv_report(report: &Report) -> String {
    let mut csv = String::from(HEADER);
    for r in &report.results {
        csv.push_str(&format!(
            "{},{},{},{},{},{},{},{},{},{}\n",
            r.id.0,
            escape(&r.name),
            r.status,
            optional(r.rate_per_second, 2),
            optional(r.rme_percent, 2),
            r.samples,
            r.is_fastest,
            r.is_slowest,
            optional(r.percent_slower, 2),
            escape(r.error.as_deref().unwrap_or("")),
        ));
    }
    csv
}

fn optional(value: Option<f64>, precision: usize) -> String {
    value
        .map(|v| format!("{:.*}", precision, v))
        .unwrap_or_default()
}

/// Quote a field if it contains a delimiter, quote or newline
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::tests::sample_report;

    #[test]
    fn test_csv_rows() {
        let csv = generate_csv_report(&sample_report());
        let lines: Vec<&str> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(lines[0], HEADER.trim_end());
        assert_eq!(lines[1], "0,push_str,completed,1234567.00,0.42,48,true,false,0.00,");
        assert_eq!(
            lines[2],
            "1,\"format!, joined\",completed,617283.50,1.50,40,false,true,50.00,"
        );
        assert_eq!(
            lines[3],
            "2,#2,error,,,0,false,false,,panicked: index out of bounds"
        );
    }

    #[test]
    fn test_escape() {
        assert_eq!(escape("plain"), "plain");
        assert_eq!(escape("say \"hi\""), "\"say \"\"hi\"\"\"");
    }
}
