//! npm registry (`registry.npmjs.org` document API).

use async_trait::async_trait;
use log::debug;

use crate::ecosystem::Ecosystem;
use crate::http::{CallOutcome, HttpClient};

use super::{Registry, RegistryMetadata, parse_timestamp};

/// Registry document types (internal).
mod api {
    use std::collections::HashMap;

    use serde::Deserialize;
    use serde_json::Value;

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub struct Packument {
        #[serde(rename = "dist-tags")]
        pub dist_tags: HashMap<String, String>,
        pub versions: HashMap<String, VersionInfo>,
        /// Publish time per version, plus `created` and `modified`.
        /// Old documents carry non-string entries here.
        pub time: HashMap<String, Value>,
        pub deprecated: Option<Value>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub struct VersionInfo {
        /// A notice string; some publishers wrote `false` instead of omitting it.
        pub deprecated: Option<Value>,
    }

    /// The deprecation notice, if `value` is a non-empty string.
    pub fn notice(value: Option<&Value>) -> Option<String> {
        value
            .and_then(Value::as_str)
            .filter(|notice| !notice.is_empty())
            .map(str::to_string)
    }
}

/// `@scope/pkg` must travel as a single path segment.
pub fn encode_package_name(name: &str) -> String {
    name.replace('/', "%2F")
}

pub struct NpmRegistry {
    http_client: HttpClient,
    base_url: String,
}

impl NpmRegistry {
    pub fn new(http_client: HttpClient, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn packument(&self, name: &str) -> CallOutcome<api::Packument> {
        let url = format!("{}/{}", self.base_url, encode_package_name(name));
        debug!("Fetching npm metadata from {}...", url);
        self.http_client.fetch_json(&url).await
    }
}

fn to_metadata(doc: api::Packument, version: &str) -> RegistryMetadata {
    let latest = doc.dist_tags.get("latest").cloned();
    let chosen = if doc.versions.contains_key(version) {
        Some(version.to_string())
    } else {
        latest.clone()
    };

    let published = match &chosen {
        Some(v) => doc.time.get(v),
        None => doc.time.get("modified"),
    };
    let deprecated = chosen
        .as_ref()
        .and_then(|v| doc.versions.get(v))
        .and_then(|info| api::notice(info.deprecated.as_ref()))
        .or_else(|| api::notice(doc.deprecated.as_ref()));

    RegistryMetadata {
        last_publish: published
            .and_then(|t| t.as_str())
            .and_then(parse_timestamp),
        deprecated,
        old_python: None,
        latest_version: latest,
    }
}

#[async_trait]
impl Registry for NpmRegistry {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Npm
    }

    #[tracing::instrument(skip(self))]
    async fn metadata(&self, name: &str, version: &str) -> CallOutcome<RegistryMetadata> {
        self.packument(name)
            .await
            .map(|doc| to_metadata(doc, version))
    }

    #[tracing::instrument(skip(self))]
    async fn latest_version(&self, name: &str) -> CallOutcome<String> {
        match self.packument(name).await {
            CallOutcome::Success(doc) => match doc.dist_tags.get("latest") {
                Some(latest) => CallOutcome::Success(latest.clone()),
                None => CallOutcome::Error(format!("{} has no latest dist-tag", name)),
            },
            CallOutcome::Timeout => CallOutcome::Timeout,
            CallOutcome::Error(e) => CallOutcome::Error(e),
        }
    }
}
