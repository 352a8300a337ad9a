//! Risk classification.
//!
//! [`RiskPolicy::classify`] is a pure function of a tree node, its (optional)
//! registry metadata and the current time.

use std::fmt;

use chrono::{DateTime, Months, Utc};
use log::warn;
use serde::{Deserialize, Serialize};

use crate::registry::RegistryMetadata;
use crate::tree::PackageNode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgeSignal {
    Ancient,
    Fresh,
    Unknown,
}

impl fmt::Display for AgeSignal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AgeSignal::Ancient => write!(f, "ancient"),
            AgeSignal::Fresh => write!(f, "fresh"),
            AgeSignal::Unknown => write!(f, "unknown"),
        }
    }
}

/// Combined severity. Precedence: deprecated (high) over ancient (medium)
/// over fork hint (low).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::None => write!(f, "none"),
            Severity::Low => write!(f, "low"),
            Severity::Medium => write!(f, "medium"),
            Severity::High => write!(f, "high"),
        }
    }
}

/// Classification of one tree node.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RiskEntry {
    pub package_key: String,
    pub name: String,
    pub version: String,
    pub depth: usize,
    pub why: Vec<String>,
    pub age_signal: AgeSignal,
    pub last_publish: Option<DateTime<Utc>>,
    pub deprecated: bool,
    pub deprecated_notice: Option<String>,
    pub fork_hint: bool,
    /// pip only; independent of `age_signal`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub is_old_python: Option<bool>,
    pub severity: Severity,
}

pub struct RiskPolicy {
    ancient_months: u32,
    fork_patterns: Vec<glob::Pattern>,
}

impl RiskPolicy {
    /// Invalid glob patterns are skipped with a warning.
    pub fn new(ancient_months: u32, fork_patterns: &[String]) -> Self {
        let fork_patterns = fork_patterns
            .iter()
            .filter_map(|p| match glob::Pattern::new(&p.to_lowercase()) {
                Ok(pattern) => Some(pattern),
                Err(e) => {
                    warn!("Ignoring invalid fork pattern {:?}: {}", p, e);
                    None
                }
            })
            .collect();
        Self {
            ancient_months,
            fork_patterns,
        }
    }

    pub fn is_fork_hint(&self, name: &str) -> bool {
        let name = name.to_lowercase();
        self.fork_patterns.iter().any(|p| p.matches(&name))
    }

    pub fn age_signal(&self, last_publish: Option<DateTime<Utc>>, now: DateTime<Utc>) -> AgeSignal {
        let Some(published) = last_publish else {
            return AgeSignal::Unknown;
        };
        match now.checked_sub_months(Months::new(self.ancient_months)) {
            Some(cutoff) if published < cutoff => AgeSignal::Ancient,
            _ => AgeSignal::Fresh,
        }
    }

    pub fn classify(
        &self,
        node: &PackageNode,
        metadata: Option<&RegistryMetadata>,
        now: DateTime<Utc>,
    ) -> RiskEntry {
        let last_publish = metadata.and_then(|m| m.last_publish);
        let age_signal = self.age_signal(last_publish, now);
        let deprecated_notice = metadata
            .and_then(|m| m.deprecated.clone())
            .filter(|n| !n.trim().is_empty())
            .or_else(|| node.deprecated.clone().filter(|n| !n.trim().is_empty()));
        let deprecated = deprecated_notice.is_some();
        let fork_hint = self.is_fork_hint(&node.name);

        let severity = if deprecated {
            Severity::High
        } else if age_signal == AgeSignal::Ancient {
            Severity::Medium
        } else if fork_hint {
            Severity::Low
        } else {
            Severity::None
        };

        RiskEntry {
            package_key: node.key.clone(),
            name: node.name.clone(),
            version: node.version.clone(),
            depth: node.depth,
            why: node.why.clone(),
            age_signal,
            last_publish,
            deprecated,
            deprecated_notice,
            fork_hint,
            is_old_python: metadata.and_then(|m| m.old_python),
            severity,
        }
    }
}
