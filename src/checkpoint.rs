//! Checkpoints of manifest and lockfile files.
//!
//! Layout under the project root:
//!
//! ```text
//! .deplineage/checkpoints/
//!   2025-01-02T03-04-05-678Z/
//!     meta.json
//!     package.json
//!     package-lock.json
//! ```
//!
//! Ids sort lexicographically in creation order; the greatest one is the
//! latest. Checkpoints are never deleted here.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::ecosystem::Ecosystem;
use crate::runtime::{Runtime, contained_path};

pub const CHECKPOINTS_DIR: &str = ".deplineage/checkpoints";
const META_FILE: &str = "meta.json";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CheckpointError {
    NoEcosystem,
    NoFiles(Ecosystem),
    NoCheckpoint,
    Io(String),
}

impl fmt::Display for CheckpointError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckpointError::NoEcosystem => write!(f, "No supported ecosystem detected"),
            CheckpointError::NoFiles(eco) => {
                write!(f, "No {} manifest or lockfile found to checkpoint", eco)
            }
            CheckpointError::NoCheckpoint => write!(f, "No checkpoint found"),
            CheckpointError::Io(e) => write!(f, "Checkpoint I/O failed: {}", e),
        }
    }
}

impl std::error::Error for CheckpointError {}

impl From<anyhow::Error> for CheckpointError {
    fn from(e: anyhow::Error) -> Self {
        CheckpointError::Io(format!("{:#}", e))
    }
}

/// Contents of `meta.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckpointMeta {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub ecosystem: Ecosystem,
    pub reason: String,
    /// Captured paths, relative to the project root.
    pub files: Vec<String>,
    /// Tracked files that did not exist; a restore removes them again.
    #[serde(default)]
    pub absent: Vec<String>,
}

/// What a restore did (or would do, for a dry run).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RestoreReport {
    pub checkpoint: String,
    pub dry_run: bool,
    pub restored: Vec<String>,
    pub removed: Vec<String>,
}

/// Sortable id for `time`: `YYYY-MM-DDTHH-MM-SS-mmmZ`.
pub fn checkpoint_id(time: DateTime<Utc>) -> String {
    time.format("%Y-%m-%dT%H-%M-%S-%3fZ").to_string()
}

pub struct CheckpointManager<'a, R: Runtime> {
    runtime: &'a R,
    project_root: PathBuf,
}

impl<'a, R: Runtime> CheckpointManager<'a, R> {
    pub fn new(runtime: &'a R, project_root: &Path) -> Self {
        Self {
            runtime,
            project_root: project_root.to_path_buf(),
        }
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.project_root.join(CHECKPOINTS_DIR)
    }

    fn checkpoint_dir(&self, id: &str) -> PathBuf {
        self.checkpoints_dir().join(id)
    }

    /// Checkpoint the detected ecosystem's files.
    pub fn create(&self, reason: &str) -> Result<CheckpointMeta, CheckpointError> {
        let ecosystem =
            Ecosystem::detect(self.runtime, &self.project_root).ok_or(CheckpointError::NoEcosystem)?;
        self.create_for(ecosystem, reason, Utc::now())
    }

    #[tracing::instrument(skip(self))]
    pub fn create_for(
        &self,
        ecosystem: Ecosystem,
        reason: &str,
        now: DateTime<Utc>,
    ) -> Result<CheckpointMeta, CheckpointError> {
        let files = ecosystem.checkpoint_files(self.runtime, &self.project_root)?;
        if files.is_empty() {
            return Err(CheckpointError::NoFiles(ecosystem));
        }
        let absent: Vec<String> = ecosystem
            .tracked_files()
            .iter()
            .filter(|f| !files.iter().any(|captured| captured == *f))
            .map(|f| f.to_string())
            .collect();

        let base_id = checkpoint_id(now);
        let mut id = base_id.clone();
        let mut suffix = 1;
        while self.runtime.exists(&self.checkpoint_dir(&id)) {
            id = format!("{}-{:03}", base_id, suffix);
            suffix += 1;
        }

        let dir = self.checkpoint_dir(&id);
        self.runtime.create_dir_all(&dir)?;
        for file in &files {
            let target = dir.join(file);
            if let Some(parent) = target.parent() {
                self.runtime.create_dir_all(parent)?;
            }
            self.runtime.copy(&self.project_root.join(file), &target)?;
        }

        let meta = CheckpointMeta {
            id,
            timestamp: now,
            ecosystem,
            reason: reason.to_string(),
            files,
            absent,
        };
        let content = serde_json::to_string_pretty(&meta)
            .map_err(|e| CheckpointError::Io(e.to_string()))?;
        // meta.json last: its presence marks a complete checkpoint
        self.runtime.write(&dir.join(META_FILE), content.as_bytes())?;

        info!("Created checkpoint {} ({} files)", meta.id, meta.files.len());
        Ok(meta)
    }

    /// All complete checkpoints, oldest first.
    pub fn list(&self) -> Result<Vec<CheckpointMeta>, CheckpointError> {
        let root = self.checkpoints_dir();
        if !self.runtime.is_dir(&root) {
            return Ok(Vec::new());
        }

        let mut checkpoints = Vec::new();
        for dir in self.runtime.read_dir(&root)? {
            let meta_path = dir.join(META_FILE);
            if !self.runtime.is_dir(&dir) || !self.runtime.is_file(&meta_path) {
                continue;
            }
            let parsed = self
                .runtime
                .read_to_string(&meta_path)
                .and_then(|raw| Ok(serde_json::from_str::<CheckpointMeta>(&raw)?));
            match parsed {
                Ok(meta) => checkpoints.push(meta),
                Err(e) => warn!("Skipping unreadable checkpoint {:?}: {:#}", dir, e),
            }
        }
        checkpoints.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(checkpoints)
    }

    pub fn latest(&self) -> Result<CheckpointMeta, CheckpointError> {
        self.list()?.pop().ok_or(CheckpointError::NoCheckpoint)
    }

    /// Copies every captured file back to its original path and removes
    /// tracked files that did not exist at capture time. A dry run only
    /// reports.
    #[tracing::instrument(skip(self, checkpoint), fields(id = %checkpoint.id))]
    pub fn restore(
        &self,
        checkpoint: &CheckpointMeta,
        dry_run: bool,
    ) -> Result<RestoreReport, CheckpointError> {
        let dir = self.checkpoint_dir(&checkpoint.id);
        let mut report = RestoreReport {
            checkpoint: checkpoint.id.clone(),
            dry_run,
            restored: Vec::new(),
            removed: Vec::new(),
        };

        for file in &checkpoint.files {
            let target = contained_path(&self.project_root, file).ok_or_else(|| {
                CheckpointError::Io(format!("refusing to restore outside the project: {}", file))
            })?;
            if !dry_run {
                if let Some(parent) = target.parent() {
                    self.runtime.create_dir_all(parent)?;
                }
                self.runtime.copy(&dir.join(file), &target)?;
            }
            report.restored.push(file.clone());
        }

        for file in &checkpoint.absent {
            let Some(target) = contained_path(&self.project_root, file) else {
                continue;
            };
            if !self.runtime.is_file(&target) {
                continue;
            }
            if !dry_run {
                self.runtime.remove_file(&target)?;
            }
            report.removed.push(file.clone());
        }

        debug!(
            "Restore of {} ({}): {} restored, {} removed",
            checkpoint.id,
            if dry_run { "dry run" } else { "applied" },
            report.restored.len(),
            report.removed.len()
        );
        Ok(report)
    }

    /// Restores the latest checkpoint.
    pub fn rollback(&self, dry_run: bool) -> Result<RestoreReport, CheckpointError> {
        let latest = self.latest()?;
        self.restore(&latest, dry_run)
    }
}
