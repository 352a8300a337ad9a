//! pip resolver: `requirements.txt` with `-r` includes.

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};

use log::{debug, warn};

use crate::runtime::{Runtime, normalize_path};
use crate::tree::{DependencyGraph, GraphPackage, Resolution};

use super::{Ecosystem, Resolver};

const REQUIREMENTS: &str = "requirements.txt";

/// PEP 503 name normalization: lowercase, runs of `-`, `_` and `.` become `-`.
pub fn normalize_name(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    let mut pending_dash = false;
    for c in name.chars() {
        if matches!(c, '-' | '_' | '.') {
            pending_dash = true;
            continue;
        }
        if pending_dash && !out.is_empty() {
            out.push('-');
        }
        pending_dash = false;
        out.extend(c.to_lowercase());
    }
    out
}

/// One requirement specifier line, split into its editable parts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Requirement {
    pub name: String,
    /// Contents of `[...]`, without the brackets.
    pub extras: Option<String>,
    /// Version constraint as written, e.g. `==2.31.0` or `>=1.0,<2`.
    pub specifier: String,
    /// Environment marker after `;`.
    pub markers: Option<String>,
    /// Trailing `# ...` comment.
    pub comment: Option<String>,
}

impl Requirement {
    /// Pinned `==` version, else the raw specifier (possibly empty).
    pub fn version(&self) -> String {
        let spec = self.specifier.trim();
        match spec.strip_prefix("==") {
            Some(pinned) if !pinned.starts_with('=') && !pinned.contains(',') => {
                pinned.trim().to_string()
            }
            _ => spec.to_string(),
        }
    }
}

impl fmt::Display for Requirement {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)?;
        if let Some(extras) = &self.extras {
            write!(f, "[{}]", extras)?;
        }
        write!(f, "{}", self.specifier)?;
        if let Some(markers) = &self.markers {
            write!(f, "; {}", markers)?;
        }
        if let Some(comment) = &self.comment {
            write!(f, "  {}", comment)?;
        }
        Ok(())
    }
}

/// Parse a requirement line. Blank lines, comments and option lines
/// (`-r`, `-e`, `--index-url`, ...) yield `None`.
pub fn parse_requirement_line(line: &str) -> Option<Requirement> {
    let (body, comment) = split_comment(line);
    let body = body.trim();
    if body.is_empty() || body.starts_with('-') {
        return None;
    }

    let name_end = body
        .find(|c: char| !(c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.')))
        .unwrap_or(body.len());
    if name_end == 0 {
        return None;
    }
    let name = body[..name_end].to_string();
    let mut rest = body[name_end..].trim_start();

    let mut extras = None;
    if let Some(stripped) = rest.strip_prefix('[') {
        let close = stripped.find(']')?;
        extras = Some(stripped[..close].trim().to_string());
        rest = stripped[close + 1..].trim_start();
    }

    let (specifier, markers) = match rest.split_once(';') {
        Some((spec, markers)) => (spec, Some(markers.trim().to_string())),
        None => (rest, None),
    };
    // URL requirements (`name @ https://...`) carry no version.
    let specifier = if specifier.trim_start().starts_with('@') {
        String::new()
    } else {
        specifier.split_whitespace().collect::<String>()
    };

    Some(Requirement {
        name,
        extras,
        specifier,
        markers,
        comment,
    })
}

fn split_comment(line: &str) -> (&str, Option<String>) {
    if line.trim_start().starts_with('#') {
        return ("", Some(line.trim().to_string()));
    }
    match line.find(" #").or_else(|| line.find("\t#")) {
        Some(pos) => (&line[..pos], Some(line[pos..].trim().to_string())),
        None => (line, None),
    }
}

/// Target of an include line (`-r other.txt`, `--requirement=other.txt`).
fn include_target(line: &str) -> Option<&str> {
    let line = split_comment(line).0.trim();
    let rest = line
        .strip_prefix("--requirement")
        .or_else(|| line.strip_prefix("-r"))?;
    let target = rest.trim_start_matches('=').trim();
    (!target.is_empty()).then_some(target)
}

pub struct PipResolver;

impl PipResolver {
    fn collect(
        &self,
        runtime: &dyn Runtime,
        file: &Path,
        seen: &mut HashSet<PathBuf>,
        out: &mut Vec<Requirement>,
    ) {
        if !seen.insert(normalize_path(file)) {
            debug!("Skipping already included {:?}", file);
            return;
        }
        let content = match runtime.read_to_string(file) {
            Ok(content) => content,
            Err(e) => {
                warn!("Cannot read {:?}: {:#}", file, e);
                return;
            }
        };
        let base = file.parent().unwrap_or(Path::new(""));

        for line in content.lines() {
            if let Some(target) = include_target(line) {
                self.collect(runtime, &base.join(target), seen, out);
            } else if let Some(requirement) = parse_requirement_line(line) {
                out.push(requirement);
            }
        }
    }
}

impl Resolver for PipResolver {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pip
    }

    #[tracing::instrument(skip(self, runtime))]
    fn resolve(&self, runtime: &dyn Runtime, root: &Path) -> Option<DependencyGraph> {
        let path = root.join(REQUIREMENTS);
        if !runtime.is_file(&path) {
            debug!("No {} in {:?}", REQUIREMENTS, root);
            return None;
        }

        let mut requirements = Vec::new();
        self.collect(runtime, &path, &mut HashSet::new(), &mut requirements);

        let mut graph = DependencyGraph::new(Resolution::Flat);
        for requirement in requirements {
            let location = normalize_name(&requirement.name);
            if graph.packages.contains_key(&location) {
                continue;
            }
            graph.root_dependencies.push(location.clone());
            graph.packages.insert(
                location,
                GraphPackage {
                    version: requirement.version(),
                    name: requirement.name,
                    ..Default::default()
                },
            );
        }
        debug!("Found {} requirements", graph.packages.len());
        Some(graph)
    }
}
