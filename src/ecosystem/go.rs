//! Go modules resolver.
//!
//! `go.mod` only lists direct and `// indirect` requirements, so the tree is a
//! two-level approximation: direct modules at depth 0, indirect ones at depth 1
//! attributed to [`GO_INDIRECT_REASON`].

use std::collections::HashSet;
use std::path::Path;

use anyhow::Result;
use log::debug;

use crate::runtime::Runtime;
use crate::tree::{DependencyGraph, GraphPackage, PackageNode, Resolution};

use super::{Ecosystem, Resolver};

/// Why-chain entry used for modules tagged `// indirect`.
pub const GO_INDIRECT_REASON: &str = "go.mod (indirect)";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GoModule {
    pub path: String,
    pub version: String,
    pub indirect: bool,
}

fn parse_require_entry(entry: &str) -> Option<GoModule> {
    let indirect = entry.contains("// indirect");
    let code = entry.split("//").next().unwrap_or("");
    let mut parts = code.split_whitespace();
    let path = parts.next()?;
    if path == ")" {
        return None;
    }
    Some(GoModule {
        path: path.to_string(),
        version: parts.next().unwrap_or("").to_string(),
        indirect,
    })
}

/// Requirements from a `go.mod`, in file order. Handles both
/// `require path v1.2.3` and `require ( ... )` blocks.
pub fn parse_go_mod(content: &str) -> Vec<GoModule> {
    let mut modules = Vec::new();
    let mut in_require = false;

    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("//") {
            continue;
        }

        if in_require {
            if trimmed.starts_with(')') {
                in_require = false;
            } else if let Some(module) = parse_require_entry(trimmed) {
                modules.push(module);
            }
            continue;
        }

        let Some(rest) = trimmed.strip_prefix("require") else {
            continue;
        };
        let rest = rest.trim_start();
        if rest.starts_with('(') {
            in_require = true;
        } else if let Some(module) = parse_require_entry(rest) {
            modules.push(module);
        }
    }

    modules
}

/// `module@version` entries listed in `go.sum`; empty when the file is absent.
pub fn load_go_sum(runtime: &dyn Runtime, root: &Path) -> Result<HashSet<String>> {
    let path = root.join("go.sum");
    if !runtime.is_file(&path) {
        return Ok(HashSet::new());
    }

    let content = runtime.read_to_string(&path)?;
    Ok(content
        .lines()
        .filter_map(|line| {
            let mut parts = line.split_whitespace();
            let module = parts.next()?;
            let version = parts.next()?;
            let version = version.strip_suffix("/go.mod").unwrap_or(version);
            Some(format!("{}@{}", module, version))
        })
        .collect())
}

pub struct GoResolver;

impl Resolver for GoResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Go
    }

    #[tracing::instrument(skip(self, runtime))]
    fn resolve(&self, runtime: &dyn Runtime, root: &Path) -> Option<DependencyGraph> {
        let path = root.join("go.mod");
        if !runtime.is_file(&path) {
            return None;
        }
        let content = runtime.read_to_string(&path).ok()?;
        let modules = parse_go_mod(&content);

        match load_go_sum(runtime, root) {
            Ok(sums) => debug!("go.mod lists {} modules, go.sum {}", modules.len(), sums.len()),
            Err(e) => debug!("Ignoring unreadable go.sum: {:#}", e),
        }

        let mut graph = DependencyGraph::new(Resolution::Flat);
        for module in modules {
            if graph.packages.contains_key(&module.path) {
                continue;
            }
            graph.root_dependencies.push(module.path.clone());
            graph.packages.insert(
                module.path.clone(),
                GraphPackage {
                    name: module.path,
                    version: module.version,
                    indirect: module.indirect,
                    ..Default::default()
                },
            );
        }
        Some(graph)
    }

    fn build_tree(&self, graph: &DependencyGraph) -> Vec<PackageNode> {
        graph
            .root_dependencies
            .iter()
            .filter_map(|path| graph.packages.get(path))
            .map(|module| PackageNode {
                key: module.key(),
                name: module.name.clone(),
                version: module.version.clone(),
                depth: usize::from(module.indirect),
                why: if module.indirect {
                    vec![GO_INDIRECT_REASON.to_string()]
                } else {
                    Vec::new()
                },
                deprecated: None,
                resolved: None,
            })
            .collect()
    }

    fn fetches_metadata(&self) -> bool {
        false
    }
}
