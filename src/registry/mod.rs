//! Registry metadata lookups.
//!
//! One [`Registry`] per ecosystem answers two questions: when was this package
//! last published (and is it deprecated), and what is its latest version. Every
//! answer is a [`CallOutcome`], so a dead network degrades the report instead
//! of aborting it.

mod fetcher;
mod goproxy;
mod npm;
mod pypi;

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::Serialize;

use crate::config::RegistryConfig;
use crate::ecosystem::Ecosystem;
use crate::http::{CallOutcome, build_http_client};

pub use fetcher::{MetadataIndex, fetch_all};
pub use goproxy::{GoProxy, escape_module_path};
pub use npm::{NpmRegistry, encode_package_name};
pub use pypi::PypiRegistry;

/// What a registry knows about one package version.
///
/// Every field is optional; an all-`None` record is the degraded result of a
/// failed lookup.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegistryMetadata {
    pub last_publish: Option<DateTime<Utc>>,
    pub deprecated: Option<String>,
    /// pip only: the release targets Python 2 exclusively.
    pub old_python: Option<bool>,
    pub latest_version: Option<String>,
}

impl RegistryMetadata {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// Parses RFC 3339 timestamps, and the zone-less ISO form some registries emit
/// (read as UTC).
pub(crate) fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .ok()
        .or_else(|| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .ok()
                .map(|t| t.and_utc())
        })
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait Registry: Send + Sync {
    fn ecosystem(&self) -> Ecosystem;

    /// Metadata for `name@version`, falling back to the latest release when the
    /// version is unknown to the registry.
    async fn metadata(&self, name: &str, version: &str) -> CallOutcome<RegistryMetadata>;

    async fn latest_version(&self, name: &str) -> CallOutcome<String>;
}

/// One registry per ecosystem.
#[derive(Clone)]
pub struct RegistrySet {
    npm: Arc<dyn Registry>,
    pip: Arc<dyn Registry>,
    go: Arc<dyn Registry>,
}

impl RegistrySet {
    pub fn new(npm: Arc<dyn Registry>, pip: Arc<dyn Registry>, go: Arc<dyn Registry>) -> Self {
        Self { npm, pip, go }
    }

    /// Real registries sharing one HTTP client.
    pub fn from_config(config: &RegistryConfig) -> Result<Self> {
        let http = build_http_client(config.timeout())?;
        Ok(Self::new(
            Arc::new(NpmRegistry::new(http.clone(), &config.npm_url)),
            Arc::new(PypiRegistry::new(http.clone(), &config.pypi_url)),
            Arc::new(GoProxy::new(http, &config.go_proxy_url)),
        ))
    }

    pub fn for_ecosystem(&self, ecosystem: Ecosystem) -> Arc<dyn Registry> {
        match ecosystem {
            Ecosystem::Npm => self.npm.clone(),
            Ecosystem::Pip => self.pip.clone(),
            Ecosystem::Go => self.go.clone(),
        }
    }
}
