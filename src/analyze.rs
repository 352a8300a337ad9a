//! Read path: resolver, tree, metadata, risk, report.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info};

use crate::config::Config;
use crate::ecosystem::{Ecosystem, Resolver};
use crate::registry::{MetadataIndex, RegistrySet, fetch_all};
use crate::report::Report;
use crate::risk::RiskPolicy;
use crate::runtime::Runtime;
use crate::tree::DependencyGraph;

/// Why nothing could be analyzed. Returned as a value; not a crash.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnalyzeError {
    /// No supported lockfile or manifest under the root.
    NoEcosystem(PathBuf),
    /// The requested ecosystem's input is missing or unreadable.
    NotFound(Ecosystem, PathBuf),
}

impl fmt::Display for AnalyzeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyzeError::NoEcosystem(root) => write!(
                f,
                "No package-lock.json, requirements.txt, or go.mod found in {}",
                root.display()
            ),
            AnalyzeError::NotFound(eco, root) => write!(
                f,
                "No readable {} project found in {}",
                eco,
                root.display()
            ),
        }
    }
}

impl std::error::Error for AnalyzeError {}

#[derive(Debug, Clone, Default)]
pub struct AnalyzeOptions {
    /// Skip auto-detection.
    pub ecosystem: Option<Ecosystem>,
    pub skip_registry: bool,
}

pub struct Analyzer<'a, R: Runtime> {
    runtime: &'a R,
    config: &'a Config,
    registries: &'a RegistrySet,
}

impl<'a, R: Runtime> Analyzer<'a, R> {
    pub fn new(runtime: &'a R, config: &'a Config, registries: &'a RegistrySet) -> Self {
        Self {
            runtime,
            config,
            registries,
        }
    }

    /// First ecosystem (npm, pip, Go) whose resolver produces a graph.
    fn resolve(
        &self,
        root: &Path,
        requested: Option<Ecosystem>,
    ) -> Result<(Ecosystem, DependencyGraph), AnalyzeError> {
        if let Some(eco) = requested {
            return eco
                .resolver()
                .resolve(self.runtime, root)
                .map(|graph| (eco, graph))
                .ok_or_else(|| AnalyzeError::NotFound(eco, root.to_path_buf()));
        }

        Ecosystem::ALL
            .into_iter()
            .find_map(|eco| {
                eco.resolver()
                    .resolve(self.runtime, root)
                    .map(|graph| (eco, graph))
            })
            .ok_or_else(|| AnalyzeError::NoEcosystem(root.to_path_buf()))
    }

    #[tracing::instrument(skip(self))]
    pub async fn analyze(
        &self,
        root: &Path,
        options: &AnalyzeOptions,
        now: DateTime<Utc>,
    ) -> Result<Report, AnalyzeError> {
        let (ecosystem, graph) = self.resolve(root, options.ecosystem)?;
        let resolver: &dyn Resolver = ecosystem.resolver();
        let nodes = resolver.build_tree(&graph);
        info!("Resolved {} {} packages", nodes.len(), ecosystem);

        let metadata = if options.skip_registry || !resolver.fetches_metadata() {
            debug!("Registry lookups skipped for {}", ecosystem);
            MetadataIndex::new()
        } else {
            let registry = self.registries.for_ecosystem(ecosystem);
            fetch_all(registry.as_ref(), &nodes, self.config.registry.concurrency).await
        };

        let policy = RiskPolicy::new(self.config.ancient_months, &self.config.fork_patterns);
        let entries = nodes
            .iter()
            .map(|node| policy.classify(node, metadata.get(&node.key, &node.name), now))
            .collect();

        Ok(Report::build(ecosystem, entries, self.config.ancient_months, now))
    }
}
