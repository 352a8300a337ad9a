//! Markdown rendering.

use crate::risk::{AgeSignal, RiskEntry};

use super::Report;

/// Table cells cannot contain raw pipes or newlines.
fn cell(text: &str) -> String {
    text.replace('|', "\\|").replace(['\r', '\n'], " ")
}

fn why_text(entry: &RiskEntry) -> String {
    if entry.why.is_empty() {
        "(direct)".to_string()
    } else {
        entry.why.join(", ")
    }
}

fn section<'a>(
    out: &mut String,
    title: &str,
    entries: impl Iterator<Item = &'a RiskEntry>,
    line: impl Fn(&RiskEntry) -> String,
) {
    let lines: Vec<String> = entries.map(line).collect();
    if lines.is_empty() {
        return;
    }
    out.push_str(&format!("## {} ({})\n\n", title, lines.len()));
    for l in lines {
        out.push_str(&format!("- {}\n", l));
    }
    out.push('\n');
}

pub fn to_markdown(report: &Report) -> String {
    let mut out = String::new();
    let summary = &report.summary;

    out.push_str("# Dependency lineage report\n\n");
    out.push_str(&format!("- Ecosystem: {}\n", report.ecosystem));
    out.push_str(&format!("- Generated: {}\n", report.generated_at_display()));
    out.push_str(&format!("- Ancient threshold: {} months\n\n", report.ancient_months));

    out.push_str("## Summary\n\n| Total | Ancient | Deprecated | Fork hints |\n|---|---|---|---|\n");
    out.push_str(&format!(
        "| {} | {} | {} | {} |\n\n",
        summary.total, summary.ancient, summary.deprecated, summary.fork_hint
    ));

    section(
        &mut out,
        "Deprecated",
        report.entries.iter().filter(|e| e.deprecated),
        |e| match &e.deprecated_notice {
            Some(notice) => format!("`{}`: {}", e.package_key, cell(notice)),
            None => format!("`{}`", e.package_key),
        },
    );
    section(
        &mut out,
        "Ancient",
        report
            .entries
            .iter()
            .filter(|e| e.age_signal == AgeSignal::Ancient),
        |e| match e.last_publish {
            Some(t) => format!("`{}`: last published {}", e.package_key, t.format("%Y-%m-%d")),
            None => format!("`{}`", e.package_key),
        },
    );
    section(
        &mut out,
        "Fork hints",
        report.entries.iter().filter(|e| e.fork_hint),
        |e| format!("`{}` (via {})", e.package_key, why_text(e)),
    );

    out.push_str("## Dependencies\n\n| Package | Version | Depth | Age | Severity | Why |\n|---|---|---|---|---|---|\n");
    for e in &report.entries {
        out.push_str(&format!(
            "| {} | {} | {} | {} | {} | {} |\n",
            cell(&e.name),
            cell(&e.version),
            e.depth,
            e.age_signal,
            e.severity,
            cell(&why_text(e))
        ));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::fixtures::report;

    #[test]
    fn test_sections_and_table() {
        let md = to_markdown(&report());

        assert!(md.starts_with("# Dependency lineage report\n"));
        assert!(md.contains("| 3 | 2 | 1 | 1 |"));
        assert!(md.contains("## Deprecated (1)\n\n- `request@2.88.2`: request has been deprecated, see #3142\n"));
        assert!(md.contains("- `left-pad@1.0.0`: last published 2016-03-09"));
        assert!(md.contains("## Fork hints (1)\n\n- `tough-cookie-fork@2.5.0` (via request@2.88.2)"));
        assert!(md.contains("| left-pad | 1.0.0 | 0 | ancient | medium | (direct) |"));
        assert!(md.contains("| tough-cookie-fork | 2.5.0 | 1 | unknown | low | request@2.88.2 |"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let mut report = report();
        report.entries.retain(|e| e.name == "left-pad");
        let md = to_markdown(&report);
        assert!(!md.contains("## Deprecated"));
        assert!(!md.contains("## Fork hints"));
        assert!(md.contains("## Ancient (1)"));
    }

    #[test]
    fn test_header_block_layout() {
        let md = to_markdown(&report());
        let head: Vec<&str> = md.lines().take(6).collect();
        assert_eq!(head[0], "# Dependency lineage report");
        assert_eq!(head[1], "");
        assert!(head[2].starts_with("- Ecosystem: "));
        assert!(head[3].starts_with("- Generated: "));
        assert!(head[4].starts_with("- Ancient threshold: "));
        assert_eq!(head[5], "");
        assert!(md.ends_with(" |\n"));
    }

    #[test]
    fn test_pipes_are_escaped() {
        assert_eq!(cell("a|b\nc"), "a\\|b c");
    }
}
