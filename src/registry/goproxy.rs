//! Go module proxy protocol (`GOPROXY`).

use async_trait::async_trait;
use log::debug;
use serde::Deserialize;

use crate::ecosystem::Ecosystem;
use crate::http::{CallOutcome, HttpClient};

use super::{Registry, RegistryMetadata, parse_timestamp};

#[derive(Deserialize, Debug)]
#[serde(rename_all = "PascalCase")]
struct VersionInfo {
    version: String,
    time: Option<String>,
}

/// Case-encodes a module path for proxy URLs: each uppercase letter becomes
/// `!` followed by its lowercase form.
pub fn escape_module_path(path: &str) -> String {
    let mut escaped = String::with_capacity(path.len());
    for c in path.chars() {
        if c.is_ascii_uppercase() {
            escaped.push('!');
            escaped.push(c.to_ascii_lowercase());
        } else {
            escaped.push(c);
        }
    }
    escaped
}

pub struct GoProxy {
    http_client: HttpClient,
    base_url: String,
}

impl GoProxy {
    pub fn new(http_client: HttpClient, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn info(&self, url: String) -> CallOutcome<VersionInfo> {
        debug!("Fetching Go module info from {}...", url);
        self.http_client.fetch_json(&url).await
    }
}

#[async_trait]
impl Registry for GoProxy {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Go
    }

    #[tracing::instrument(skip(self))]
    async fn metadata(&self, name: &str, version: &str) -> CallOutcome<RegistryMetadata> {
        let module = escape_module_path(name);
        let info = if version.is_empty() {
            self.info(format!("{}/{}/@latest", self.base_url, module)).await
        } else {
            self.info(format!("{}/{}/@v/{}.info", self.base_url, module, escape_module_path(version)))
                .await
        };
        info.map(|info| RegistryMetadata {
            last_publish: info.time.as_deref().and_then(parse_timestamp),
            ..Default::default()
        })
    }

    #[tracing::instrument(skip(self))]
    async fn latest_version(&self, name: &str) -> CallOutcome<String> {
        self.info(format!("{}/{}/@latest", self.base_url, escape_module_path(name)))
            .await
            .map(|info| info.version)
    }
}
