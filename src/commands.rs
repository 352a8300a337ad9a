//! Command implementations behind the CLI.
//!
//! Each command prints machine-readable output to stdout, progress and errors
//! to stderr, and returns `Ok(false)` for an expected, non-crashing failure
//! (nothing to analyze, no checkpoint, unsuccessful apply).

use std::path::{Path, PathBuf};

use anyhow::Result;
use chrono::Utc;
use log::debug;

use crate::analyze::{AnalyzeOptions, Analyzer};
use crate::apply::{ApplyEngine, ApplyRequest, NativeToolchain};
use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::events::WebhookEmitter;
use crate::http::build_http_client;
use crate::registry::RegistrySet;
use crate::report::{Suggestions, to_csv, to_markdown};
use crate::runtime::Runtime;

/// Settings given on the command line (or via environment variables) that
/// take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub config_path: Option<PathBuf>,
    pub npm_registry: Option<String>,
    pub pypi_url: Option<String>,
    pub go_proxy: Option<String>,
    pub ancient_months: Option<u32>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    #[default]
    Json,
    Markdown,
    Csv,
}

/// Loads the project config and applies `overrides` on top.
pub fn load_config<R: Runtime>(runtime: &R, root: &Path, overrides: &Overrides) -> Result<Config> {
    let mut config = Config::load(runtime, root, overrides.config_path.as_deref())?;
    if let Some(url) = &overrides.npm_registry {
        config.registry.npm_url = url.clone();
    }
    if let Some(url) = &overrides.pypi_url {
        config.registry.pypi_url = url.clone();
    }
    if let Some(url) = &overrides.go_proxy {
        config.registry.go_proxy_url = url.clone();
    }
    if let Some(months) = overrides.ancient_months {
        config.ancient_months = months;
    }
    debug!("Effective config: {:?}", config);
    Ok(config)
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn analyze<R: Runtime>(
    runtime: &R,
    root: &Path,
    overrides: &Overrides,
    options: &AnalyzeOptions,
    format: OutputFormat,
) -> Result<bool> {
    let config = load_config(runtime, root, overrides)?;
    let registries = RegistrySet::from_config(&config.registry)?;

    let report = match Analyzer::new(runtime, &config, &registries)
        .analyze(root, options, Utc::now())
        .await
    {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(false);
        }
    };

    eprintln!(
        "Analyzed {} {} packages: {} ancient, {} deprecated, {} fork hints",
        report.summary.total,
        report.ecosystem,
        report.summary.ancient,
        report.summary.deprecated,
        report.summary.fork_hint
    );
    let rendered = match format {
        OutputFormat::Json => report.to_json()?,
        OutputFormat::Markdown => to_markdown(&report),
        OutputFormat::Csv => to_csv(&report, Some(&Suggestions::new(&config.suggestions)))?,
    };
    print!("{}", rendered);
    if !rendered.ends_with('\n') {
        println!();
    }
    Ok(true)
}

pub fn checkpoint<R: Runtime>(runtime: &R, root: &Path, reason: &str) -> Result<bool> {
    match CheckpointManager::new(runtime, root).create(reason) {
        Ok(meta) => {
            println!("Created checkpoint {} ({})", meta.id, meta.ecosystem);
            for file in &meta.files {
                println!("  {}", file);
            }
            Ok(true)
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            Ok(false)
        }
    }
}

pub fn checkpoints<R: Runtime>(runtime: &R, root: &Path) -> Result<bool> {
    let list = match CheckpointManager::new(runtime, root).list() {
        Ok(list) => list,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(false);
        }
    };
    if list.is_empty() {
        eprintln!("No checkpoints in {}", root.display());
        return Ok(true);
    }
    for meta in list {
        println!(
            "{}  {}  {}  {}",
            meta.id,
            meta.ecosystem,
            meta.reason,
            meta.files.join(", ")
        );
    }
    Ok(true)
}

pub fn rollback<R: Runtime>(runtime: &R, root: &Path, dry_run: bool) -> Result<bool> {
    let report = match CheckpointManager::new(runtime, root).rollback(dry_run) {
        Ok(report) => report,
        Err(e) => {
            eprintln!("Error: {}", e);
            return Ok(false);
        }
    };

    let (restore_verb, remove_verb) = if dry_run {
        ("Would restore", "Would remove")
    } else {
        ("Restored", "Removed")
    };
    println!("Checkpoint {}", report.checkpoint);
    for file in &report.restored {
        println!("  {} {}", restore_verb, file);
    }
    for file in &report.removed {
        println!("  {} {}", remove_verb, file);
    }
    Ok(true)
}

#[tracing::instrument(skip(runtime, overrides))]
pub async fn apply<R: Runtime>(
    runtime: &R,
    root: &Path,
    overrides: &Overrides,
    request: &ApplyRequest,
) -> Result<bool> {
    let config = load_config(runtime, root, overrides)?;
    let registries = RegistrySet::from_config(&config.registry)?;
    // webhook traffic gets its own client so the registry timeout does not cut it short
    let webhook_client = build_http_client(config.approval.timeout().max(config.notify_timeout()))?;
    let emitter = WebhookEmitter::new(
        webhook_client.clone(),
        config.webhooks.clone(),
        config.notify_timeout(),
    );
    let engine = ApplyEngine::new(
        runtime,
        &config,
        &registries,
        &webhook_client,
        &NativeToolchain,
        &emitter,
    );

    let outcome = engine.apply(root, request).await?;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    if let Some(error) = &outcome.error {
        eprintln!("{} {}: {}", request.action, outcome.state, error);
    }
    Ok(outcome.ok)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::MockRuntime;

    #[test]
    fn test_overrides_win_over_file() {
        let mut runtime = MockRuntime::new();
        runtime.expect_exists().returning(|_| true);
        runtime
            .expect_read_to_string()
            .returning(|_| Ok(r#"{"ancientMonths": 12, "registry": {"npmUrl": "https://npm.internal"}}"#.into()));

        let overrides = Overrides {
            pypi_url: Some("http://localhost:9000".into()),
            ancient_months: Some(6),
            ..Default::default()
        };
        let config = load_config(&runtime, Path::new("/project"), &overrides).unwrap();
        assert_eq!(config.ancient_months, 6);
        assert_eq!(config.registry.npm_url, "https://npm.internal");
        assert_eq!(config.registry.pypi_url, "http://localhost:9000");
    }

    #[test]
    fn test_rollback_without_checkpoint_is_soft_failure() {
        let dir = tempfile::tempdir().unwrap();
        let ok = rollback(&crate::runtime::RealRuntime, dir.path(), true).unwrap();
        assert!(!ok);
    }
}
