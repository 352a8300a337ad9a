//! Bounded-concurrency metadata fetch for a whole tree.

use std::collections::{HashMap, HashSet};

use futures_util::stream::{self, StreamExt};
use log::{debug, info};

use crate::http::CallOutcome;
use crate::tree::PackageNode;

use super::{Registry, RegistryMetadata};

/// Metadata looked up by package key first, then by bare name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetadataIndex {
    by_key: HashMap<String, RegistryMetadata>,
    by_name: HashMap<String, RegistryMetadata>,
}

impl MetadataIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: &str, name: &str, metadata: RegistryMetadata) {
        let by_name = self.by_name.entry(name.to_string()).or_default();
        if by_name.is_empty() {
            *by_name = metadata.clone();
        }
        self.by_key.insert(key.to_string(), metadata);
    }

    pub fn get(&self, key: &str, name: &str) -> Option<&RegistryMetadata> {
        self.by_key.get(key).or_else(|| self.by_name.get(name))
    }

    pub fn len(&self) -> usize {
        self.by_key.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Fetches metadata for every distinct key in `nodes`, at most `concurrency`
/// requests in flight.
///
/// A failed lookup is recorded as an empty record; this function cannot fail.
#[tracing::instrument(skip(registry, nodes))]
pub async fn fetch_all(registry: &dyn Registry, nodes: &[PackageNode], concurrency: usize) -> MetadataIndex {
    let mut seen = HashSet::new();
    let unique: Vec<&PackageNode> = nodes.iter().filter(|n| seen.insert(n.key.as_str())).collect();
    info!("Fetching registry metadata for {} packages...", unique.len());

    let results: Vec<(&PackageNode, CallOutcome<RegistryMetadata>)> = stream::iter(unique)
        .map(|node| async move { (node, registry.metadata(&node.name, &node.version).await) })
        .buffered(concurrency.max(1))
        .collect()
        .await;

    let mut index = MetadataIndex::new();
    let mut failed = 0;
    for (node, outcome) in results {
        let metadata = match outcome {
            CallOutcome::Success(metadata) => metadata,
            other => {
                debug!("No metadata for {}: {}", node.key, other);
                failed += 1;
                RegistryMetadata::default()
            }
        };
        index.insert(&node.key, &node.name, metadata);
    }
    if failed > 0 {
        info!("{} metadata lookups failed; those packages are reported as unknown", failed);
    }
    index
}
