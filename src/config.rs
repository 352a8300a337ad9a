//! Per-invocation configuration.
//!
//! Loaded once from `<project>/.deplineage.json` (or an explicit path) and then
//! passed by reference to every component. Nothing below this module reads
//! environment variables on its own.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use log::debug;
use serde::{Deserialize, Serialize};

use crate::approval::ApprovalPolicy;
use crate::runtime::Runtime;

/// File looked up in the project root when no `--config` is given.
pub const CONFIG_FILE: &str = ".deplineage.json";

pub const DEFAULT_ANCIENT_MONTHS: u32 = 24;
pub const DEFAULT_NPM_REGISTRY: &str = "https://registry.npmjs.org";
pub const DEFAULT_PYPI_URL: &str = "https://pypi.org";
pub const DEFAULT_GO_PROXY: &str = "https://proxy.golang.org";

/// Glob patterns (matched against the lowercased package name) that suggest an
/// unofficial fork or rename of a well-known package.
pub fn default_fork_patterns() -> Vec<String> {
    [
        "*-fork",
        "*-fork-*",
        "*-forked",
        "*-fixed",
        "*-patched",
        "*-maintained",
        "*-continued",
        "*-revived",
        "*-community",
        "*-ng",
        "@*/*-fork",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RegistryConfig {
    pub npm_url: String,
    pub pypi_url: String,
    pub go_proxy_url: String,
    /// Upper bound on in-flight metadata requests.
    pub concurrency: usize,
    pub timeout_ms: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            npm_url: DEFAULT_NPM_REGISTRY.to_string(),
            pypi_url: DEFAULT_PYPI_URL.to_string(),
            go_proxy_url: DEFAULT_GO_PROXY.to_string(),
            concurrency: 8,
            timeout_ms: 10_000,
        }
    }
}

impl RegistryConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub ancient_months: u32,
    pub fork_patterns: Vec<String>,
    /// Lifecycle event receivers.
    pub webhooks: Vec<String>,
    pub notify_timeout_ms: u64,
    pub approval: ApprovalPolicy,
    pub registry: RegistryConfig,
    /// Extra `package -> recommended alternative` entries, merged over the built-ins.
    pub suggestions: BTreeMap<String, String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ancient_months: DEFAULT_ANCIENT_MONTHS,
            fork_patterns: default_fork_patterns(),
            webhooks: Vec::new(),
            notify_timeout_ms: 5_000,
            approval: ApprovalPolicy::default(),
            registry: RegistryConfig::default(),
            suggestions: BTreeMap::new(),
        }
    }
}

impl Config {
    /// Load configuration for `project_root`.
    ///
    /// An explicit `path` must exist; the implicit `.deplineage.json` is optional
    /// and its absence yields [`Config::default`].
    #[tracing::instrument(skip(runtime))]
    pub fn load<R: Runtime>(runtime: &R, project_root: &Path, path: Option<&Path>) -> Result<Self> {
        let (path, required): (PathBuf, bool) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => (project_root.join(CONFIG_FILE), false),
        };

        if !runtime.exists(&path) {
            if required {
                anyhow::bail!("Config file {:?} does not exist", path);
            }
            debug!("No config at {:?}, using defaults", path);
            return Ok(Self::default());
        }

        let content = runtime.read_to_string(&path)?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file {:?}", path))?;
        debug!("Loaded config from {:?}", path);
        Ok(config)
    }

    pub fn notify_timeout(&self) -> Duration {
        Duration::from_millis(self.notify_timeout_ms)
    }
}
