//! Ecosystem abstraction.
//!
//! [`Ecosystem`] is the closed set of supported package managers. Each variant
//! maps to one [`Resolver`] that knows how to detect a project, flatten its
//! lockfile into a [`DependencyGraph`] and turn that into provenance nodes.

mod go;
mod npm;
mod pip;

use std::fmt;
use std::path::Path;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

use crate::runtime::Runtime;
use crate::tree::{self, DependencyGraph, PackageNode};

pub use go::{GO_INDIRECT_REASON, GoModule, GoResolver, load_go_sum, parse_go_mod};
pub use npm::NpmResolver;
pub use pip::{PipResolver, Requirement, normalize_name, parse_requirement_line};

/// Supported package ecosystems, in auto-detection order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Npm,
    Pip,
    Go,
}

impl fmt::Display for Ecosystem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Ecosystem::Npm => write!(f, "npm"),
            Ecosystem::Pip => write!(f, "pip"),
            Ecosystem::Go => write!(f, "go"),
        }
    }
}

impl FromStr for Ecosystem {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "npm" => Ok(Ecosystem::Npm),
            "pip" => Ok(Ecosystem::Pip),
            "go" => Ok(Ecosystem::Go),
            _ => anyhow::bail!("Unknown ecosystem: {}. Expected npm, pip, or go.", s),
        }
    }
}

impl Ecosystem {
    pub const ALL: [Ecosystem; 3] = [Ecosystem::Npm, Ecosystem::Pip, Ecosystem::Go];

    pub fn resolver(self) -> &'static dyn Resolver {
        match self {
            Ecosystem::Npm => &NpmResolver,
            Ecosystem::Pip => &PipResolver,
            Ecosystem::Go => &GoResolver,
        }
    }

    /// Files whose presence marks a project of this ecosystem.
    pub fn markers(self) -> &'static [&'static str] {
        match self {
            Ecosystem::Npm => &["package-lock.json", "package.json"],
            Ecosystem::Pip => &["requirements.txt", "pyproject.toml"],
            Ecosystem::Go => &["go.mod"],
        }
    }

    /// The manifest the apply engine edits.
    pub fn manifest_file(self) -> &'static str {
        match self {
            Ecosystem::Npm => "package.json",
            Ecosystem::Pip => "requirements.txt",
            Ecosystem::Go => "go.mod",
        }
    }

    /// Native installer invocation run after a manifest edit.
    pub fn install_command(self) -> &'static [&'static str] {
        match self {
            Ecosystem::Npm => &["npm", "install"],
            Ecosystem::Pip => &["pip", "install", "-r", "requirements.txt"],
            Ecosystem::Go => &["go", "mod", "tidy"],
        }
    }

    /// Consistency check that must exit cleanly after installing.
    pub fn verify_command(self) -> &'static [&'static str] {
        match self {
            Ecosystem::Npm => &["npm", "ls"],
            Ecosystem::Pip => &["pip", "check"],
            Ecosystem::Go => &["go", "mod", "verify"],
        }
    }

    /// First ecosystem whose marker files exist under `root`.
    pub fn detect(runtime: &dyn Runtime, root: &Path) -> Option<Ecosystem> {
        Self::ALL
            .into_iter()
            .find(|eco| eco.resolver().detect(runtime, root))
    }

    /// Fixed manifest and lockfile names a checkpoint covers.
    pub fn tracked_files(self) -> &'static [&'static str] {
        match self {
            Ecosystem::Npm => &["package.json", "package-lock.json"],
            Ecosystem::Pip => &["pyproject.toml", "requirements.txt"],
            Ecosystem::Go => &["go.mod", "go.sum"],
        }
    }

    /// Manifest and lockfile paths (relative to `root`) that exist and must be
    /// captured before a mutation.
    pub fn checkpoint_files(self, runtime: &dyn Runtime, root: &Path) -> Result<Vec<String>> {
        let mut files: Vec<String> = self
            .tracked_files()
            .iter()
            .filter(|rel| runtime.is_file(&root.join(rel)))
            .map(|rel| rel.to_string())
            .collect();

        if self == Ecosystem::Pip {
            let requirements_dir = root.join("requirements");
            if runtime.is_dir(&requirements_dir) {
                let mut extra: Vec<String> = runtime
                    .read_dir(&requirements_dir)?
                    .into_iter()
                    .filter(|p| p.extension().is_some_and(|e| e == "txt") && runtime.is_file(p))
                    .filter_map(|p| {
                        p.file_name()
                            .map(|n| format!("requirements/{}", n.to_string_lossy()))
                    })
                    .collect();
                extra.sort();
                files.extend(extra);
            }
        }

        Ok(files)
    }
}

/// Per-ecosystem dependency resolution.
pub trait Resolver: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Whether any of the ecosystem's marker files exist.
    fn detect(&self, runtime: &dyn Runtime, root: &Path) -> bool {
        self.ecosystem()
            .markers()
            .iter()
            .any(|m| runtime.is_file(&root.join(m)))
    }

    /// Reads the lockfile/manifest into a flat graph.
    ///
    /// `None` when the input this resolver needs is absent or unreadable; the
    /// project files are never modified.
    fn resolve(&self, runtime: &dyn Runtime, root: &Path) -> Option<DependencyGraph>;

    fn build_tree(&self, graph: &DependencyGraph) -> Vec<PackageNode> {
        tree::build_tree(graph)
    }

    /// Whether analysis queries a registry for this ecosystem.
    fn fetches_metadata(&self) -> bool {
        true
    }
}
