//! npm resolver: `package-lock.json` (lockfile v1, v2 and v3).

use std::collections::HashMap;
use std::path::Path;

use log::{debug, warn};
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::runtime::Runtime;
use crate::tree::{DependencyGraph, GraphPackage, Resolution};

use super::{Ecosystem, Resolver};

const LOCKFILE: &str = "package-lock.json";
const MANIFEST: &str = "package.json";

/// Dependency groups that count as direct dependencies of the project, in
/// traversal order.
const ROOT_GROUPS: [&str; 3] = ["dependencies", "devDependencies", "optionalDependencies"];

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct Lockfile {
    name: Option<String>,
    lockfile_version: Option<u32>,
    /// v2/v3: flat map keyed by `node_modules/...` path, `""` is the project.
    packages: Option<HashMap<String, PackageEntry>>,
    /// v1: nested tree keyed by package name.
    dependencies: Option<Map<String, Value>>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase", default)]
struct PackageEntry {
    name: Option<String>,
    version: Option<String>,
    resolved: Option<String>,
    deprecated: Option<String>,
    dependencies: Map<String, Value>,
    dev_dependencies: Map<String, Value>,
    optional_dependencies: Map<String, Value>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct LegacyEntry {
    version: Option<String>,
    resolved: Option<String>,
    deprecated: Option<String>,
    requires: Map<String, Value>,
    dependencies: Map<String, Value>,
}

pub struct NpmResolver;

impl Resolver for NpmResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    #[tracing::instrument(skip(self, runtime))]
    fn resolve(&self, runtime: &dyn Runtime, root: &Path) -> Option<DependencyGraph> {
        let lock_path = root.join(LOCKFILE);
        if !runtime.is_file(&lock_path) {
            debug!("No {} in {:?}", LOCKFILE, root);
            return None;
        }

        let lockfile: Lockfile = match runtime
            .read_to_string(&lock_path)
            .and_then(|raw| Ok(serde_json::from_str(&raw)?))
        {
            Ok(lockfile) => lockfile,
            Err(e) => {
                warn!("Ignoring unreadable {:?}: {:#}", lock_path, e);
                return None;
            }
        };
        debug!(
            "Loaded {} (lockfileVersion {:?}, project {:?})",
            LOCKFILE, lockfile.lockfile_version, lockfile.name
        );

        let manifest_roots = read_manifest_roots(runtime, root);
        Some(flatten_lockfile(lockfile, manifest_roots))
    }
}

/// Direct dependency names declared in `package.json`, when it is readable.
fn read_manifest_roots(runtime: &dyn Runtime, root: &Path) -> Option<Vec<String>> {
    let path = root.join(MANIFEST);
    if !runtime.is_file(&path) {
        return None;
    }
    let manifest: Map<String, Value> = runtime
        .read_to_string(&path)
        .ok()
        .and_then(|raw| serde_json::from_str(&raw).ok())?;

    let mut names = Vec::new();
    for group in ROOT_GROUPS {
        if let Some(Value::Object(deps)) = manifest.get(group) {
            push_unique(&mut names, deps.keys());
        }
    }
    Some(names)
}

fn push_unique<'a>(names: &mut Vec<String>, new: impl IntoIterator<Item = &'a String>) {
    for name in new {
        if !names.contains(name) {
            names.push(name.clone());
        }
    }
}

/// Package name implied by a lockfile location (`node_modules/@scope/pkg` -> `@scope/pkg`).
fn name_from_location(location: &str) -> String {
    match location.rfind("node_modules/") {
        Some(pos) => location[pos + "node_modules/".len()..].to_string(),
        None => location.to_string(),
    }
}

fn flatten_lockfile(lockfile: Lockfile, manifest_roots: Option<Vec<String>>) -> DependencyGraph {
    let mut graph = DependencyGraph::new(Resolution::NestedThenHoisted);

    if let Some(packages) = lockfile.packages {
        for (location, entry) in packages {
            if location.is_empty() {
                let mut roots = Vec::new();
                push_unique(&mut roots, entry.dependencies.keys());
                push_unique(&mut roots, entry.dev_dependencies.keys());
                push_unique(&mut roots, entry.optional_dependencies.keys());
                graph.root_dependencies = roots;
                continue;
            }
            let name = entry
                .name
                .clone()
                .unwrap_or_else(|| name_from_location(&location));
            let mut dependencies = Vec::new();
            push_unique(&mut dependencies, entry.dependencies.keys());
            push_unique(&mut dependencies, entry.optional_dependencies.keys());

            graph.packages.insert(
                location,
                GraphPackage {
                    name,
                    version: entry.version.unwrap_or_else(|| "0.0.0".to_string()),
                    dependencies,
                    deprecated: entry.deprecated,
                    resolved: entry.resolved,
                    indirect: false,
                },
            );
        }
    } else if let Some(dependencies) = lockfile.dependencies {
        graph.root_dependencies = dependencies.keys().cloned().collect();
        flatten_legacy(&mut graph, "", &dependencies);
    }

    if graph.root_dependencies.is_empty()
        && let Some(roots) = manifest_roots
    {
        graph.root_dependencies = roots;
    }

    graph
}

/// Lockfile v1 nests each package's private copies under `dependencies`;
/// rewrite them into the v2 path layout.
fn flatten_legacy(graph: &mut DependencyGraph, prefix: &str, entries: &Map<String, Value>) {
    for (name, value) in entries {
        let entry: LegacyEntry = match serde_json::from_value(value.clone()) {
            Ok(entry) => entry,
            Err(e) => {
                debug!("Skipping malformed lockfile v1 entry {}: {}", name, e);
                continue;
            }
        };
        let location = if prefix.is_empty() {
            format!("node_modules/{}", name)
        } else {
            format!("{}/node_modules/{}", prefix, name)
        };

        graph.packages.insert(
            location.clone(),
            GraphPackage {
                name: name.clone(),
                version: entry.version.unwrap_or_else(|| "0.0.0".to_string()),
                dependencies: entry.requires.keys().cloned().collect(),
                deprecated: entry.deprecated,
                resolved: entry.resolved,
                indirect: false,
            },
        );
        flatten_legacy(graph, &location, &entry.dependencies);
    }
}
