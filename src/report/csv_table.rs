//! CSV export, one row per entry.

use anyhow::{Context, Result};
use chrono::SecondsFormat;

use super::{Report, Suggestions};

const HEADER: [&str; 11] = [
    "package",
    "version",
    "depth",
    "age_signal",
    "last_publish",
    "deprecated",
    "deprecated_notice",
    "fork_hint",
    "severity",
    "why",
    "suggestion",
];

/// Renders `report` as CSV. Without `suggestions` the last column is empty.
pub fn to_csv(report: &Report, suggestions: Option<&Suggestions>) -> Result<String> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(HEADER).context("Failed to write CSV header")?;

    for entry in &report.entries {
        let last_publish = entry
            .last_publish
            .map(|t| t.to_rfc3339_opts(SecondsFormat::Secs, true))
            .unwrap_or_default();
        let suggestion = suggestions
            .and_then(|s| s.get(&entry.name))
            .unwrap_or_default();
        let depth = entry.depth.to_string();
        let age = entry.age_signal.to_string();
        let severity = entry.severity.to_string();
        let why = entry.why.join("; ");

        writer
            .write_record([
                entry.name.as_str(),
                entry.version.as_str(),
                depth.as_str(),
                age.as_str(),
                last_publish.as_str(),
                if entry.deprecated { "true" } else { "false" },
                entry.deprecated_notice.as_deref().unwrap_or_default(),
                if entry.fork_hint { "true" } else { "false" },
                severity.as_str(),
                why.as_str(),
                suggestion,
            ])
            .with_context(|| format!("Failed to write CSV row for {}", entry.package_key))?;
    }

    let bytes = writer.into_inner().context("Failed to flush CSV output")?;
    String::from_utf8(bytes).context("CSV output is not UTF-8")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::report;

    #[test]
    fn test_rows_and_quoting() {
        let csv = to_csv(&report(), Some(&Suggestions::default())).unwrap();
        let lines: Vec<_> = csv.lines().collect();

        assert_eq!(lines.len(), 4);
        assert_eq!(
            lines[0],
            "package,version,depth,age_signal,last_publish,deprecated,deprecated_notice,fork_hint,severity,why,suggestion"
        );
        assert_eq!(
            lines[1],
            "left-pad,1.0.0,0,ancient,2016-03-09T18:12:38Z,false,,false,medium,,String.prototype.padStart"
        );
        assert_eq!(
            lines[2],
            "request,2.88.2,0,ancient,,true,\"request has been deprecated, see #3142\",false,high,,undici"
        );
        assert_eq!(
            lines[3],
            "tough-cookie-fork,2.5.0,1,unknown,,false,,true,low,request@2.88.2,"
        );
    }

    #[test]
    fn test_without_suggestions() {
        let csv = to_csv(&report(), None).unwrap();
        assert!(csv.lines().nth(1).unwrap().ends_with("medium,,"));
    }
}
