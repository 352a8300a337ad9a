//! Analysis report.
//!
//! A [`Report`] is built once from classified entries and never mutated. The
//! Markdown and CSV renderers are pure functions of it.

mod csv_table;
mod markdown;
mod suggestions;

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::ecosystem::Ecosystem;
use crate::risk::{AgeSignal, RiskEntry};

pub use csv_table::to_csv;
pub use markdown::to_markdown;
pub use suggestions::Suggestions;

/// Bucket counts. An entry can count toward several buckets.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub ancient: usize,
    pub deprecated: usize,
    pub fork_hint: usize,
}

impl Summary {
    fn tally(entries: &[RiskEntry]) -> Self {
        Self {
            total: entries.len(),
            ancient: entries
                .iter()
                .filter(|e| e.age_signal == AgeSignal::Ancient)
                .count(),
            deprecated: entries.iter().filter(|e| e.deprecated).count(),
            fork_hint: entries.iter().filter(|e| e.fork_hint).count(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Report {
    pub ecosystem: Ecosystem,
    #[serde(serialize_with = "serialize_millis")]
    pub generated_at: DateTime<Utc>,
    pub ancient_months: u32,
    pub summary: Summary,
    /// In tree (BFS) order.
    pub entries: Vec<RiskEntry>,
}

fn serialize_millis<S: serde::Serializer>(t: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_str(&t.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl Report {
    pub fn build(
        ecosystem: Ecosystem,
        entries: Vec<RiskEntry>,
        ancient_months: u32,
        generated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            ecosystem,
            generated_at,
            ancient_months,
            summary: Summary::tally(&entries),
            entries,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self).context("Failed to serialize report")
    }

    pub fn generated_at_display(&self) -> String {
        self.generated_at.to_rfc3339_opts(SecondsFormat::Millis, true)
    }
}
