//! Provenance tree construction.
//!
//! Resolvers hand over a [`DependencyGraph`]: a flat map of concrete package
//! locations plus the names each one declares. [`build_tree`] walks it
//! breadth-first from a synthetic root, so `depth` is always the shortest path
//! from the project (0 = direct dependency) and `why` collects every distinct
//! parent that declares the package.

use std::collections::{HashMap, VecDeque};

use log::trace;
use serde::{Deserialize, Serialize};

/// Identity of a package in a tree: `name@version`.
pub fn package_key(name: &str, version: &str) -> String {
    format!("{}@{}", name, version)
}

/// A package reachable from the project root.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PackageNode {
    pub key: String,
    pub name: String,
    pub version: String,
    pub depth: usize,
    /// Keys of the direct parents that pull this package in. Empty only for
    /// direct dependencies nobody else requires.
    pub why: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deprecated: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resolved: Option<String>,
}

/// One concrete package location in a lockfile.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GraphPackage {
    pub name: String,
    pub version: String,
    /// Declared dependency names, in manifest order.
    pub dependencies: Vec<String>,
    pub deprecated: Option<String>,
    pub resolved: Option<String>,
    /// Go only: tagged `// indirect` in go.mod.
    pub indirect: bool,
}

impl GraphPackage {
    pub fn key(&self) -> String {
        package_key(&self.name, &self.version)
    }
}

/// Rule turning a declared dependency name into a concrete location.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution {
    /// npm: `<parent>/node_modules/<name>`, then each enclosing
    /// `node_modules`, ending at the hoisted `node_modules/<name>`.
    NestedThenHoisted,
    /// pip / Go: the location is the name itself.
    Flat,
}

impl Resolution {
    pub fn locate(
        self,
        packages: &HashMap<String, GraphPackage>,
        parent: &str,
        name: &str,
    ) -> Option<String> {
        match self {
            Resolution::Flat => packages.contains_key(name).then(|| name.to_string()),
            Resolution::NestedThenHoisted => {
                let mut scope = parent;
                loop {
                    let candidate = if scope.is_empty() {
                        format!("node_modules/{}", name)
                    } else {
                        format!("{}/node_modules/{}", scope, name)
                    };
                    if packages.contains_key(&candidate) {
                        return Some(candidate);
                    }
                    if scope.is_empty() {
                        return None;
                    }
                    scope = match scope.rfind("/node_modules/") {
                        Some(pos) => &scope[..pos],
                        None => "",
                    };
                }
            }
        }
    }
}

/// Flattened lockfile data, ready for traversal.
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyGraph {
    /// Declared direct dependency names of the project itself.
    pub root_dependencies: Vec<String>,
    /// Concrete packages keyed by location.
    pub packages: HashMap<String, GraphPackage>,
    pub resolution: Resolution,
}

impl DependencyGraph {
    pub fn new(resolution: Resolution) -> Self {
        Self {
            root_dependencies: Vec::new(),
            packages: HashMap::new(),
            resolution,
        }
    }
}

struct Visit {
    location: String,
    key: Option<String>,
    depth: Option<usize>,
}

/// Breadth-first walk from the synthetic root.
///
/// Nodes come out in visitation order. Unresolvable names are dropped, and
/// packages not reachable from the root never appear.
pub fn build_tree(graph: &DependencyGraph) -> Vec<PackageNode> {
    let mut nodes: Vec<PackageNode> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut queue = VecDeque::from([Visit {
        location: String::new(),
        key: None,
        depth: None,
    }]);

    while let Some(visit) = queue.pop_front() {
        let declared = match &visit.key {
            None => &graph.root_dependencies,
            Some(_) => match graph.packages.get(&visit.location) {
                Some(pkg) => &pkg.dependencies,
                None => continue,
            },
        };
        let child_depth = visit.depth.map_or(0, |d| d + 1);

        for name in declared {
            let Some(location) = graph
                .resolution
                .locate(&graph.packages, &visit.location, name)
            else {
                trace!("dropping unresolved dependency {} of {:?}", name, visit.key);
                continue;
            };
            let child = &graph.packages[&location];
            let key = child.key();
            if visit.key.as_deref() == Some(key.as_str()) {
                continue;
            }

            match index.get(&key) {
                Some(&i) => {
                    if let Some(parent) = &visit.key
                        && !nodes[i].why.contains(parent)
                    {
                        nodes[i].why.push(parent.clone());
                    }
                }
                None => {
                    index.insert(key.clone(), nodes.len());
                    nodes.push(PackageNode {
                        key: key.clone(),
                        name: child.name.clone(),
                        version: child.version.clone(),
                        depth: child_depth,
                        why: visit.key.iter().cloned().collect(),
                        deprecated: child.deprecated.clone(),
                        resolved: child.resolved.clone(),
                    });
                    queue.push_back(Visit {
                        location,
                        key: Some(key),
                        depth: Some(child_depth),
                    });
                }
            }
        }
    }

    nodes
}
