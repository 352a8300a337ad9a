//! PyPI JSON API.

use async_trait::async_trait;
use log::debug;

use crate::ecosystem::Ecosystem;
use crate::http::{CallOutcome, HttpClient};

use super::{Registry, RegistryMetadata, parse_timestamp};

const INACTIVE_CLASSIFIER: &str = "Development Status :: 7 - Inactive";

mod api {
    use serde::Deserialize;

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub struct Release {
        pub info: Info,
        /// Files of this release (of the latest release for the project URL).
        pub urls: Vec<File>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub struct Info {
        pub version: String,
        pub classifiers: Vec<String>,
        pub requires_python: Option<String>,
        pub yanked: bool,
        pub yanked_reason: Option<String>,
    }

    #[derive(Deserialize, Debug, Default)]
    #[serde(default)]
    pub struct File {
        pub upload_time_iso_8601: Option<String>,
        pub upload_time: Option<String>,
    }
}

pub struct PypiRegistry {
    http_client: HttpClient,
    base_url: String,
}

impl PypiRegistry {
    pub fn new(http_client: HttpClient, base_url: &str) -> Self {
        Self {
            http_client,
            base_url: base_url.trim_end_matches('/').to_string(),
        }
    }

    async fn project(&self, name: &str) -> CallOutcome<api::Release> {
        let url = format!("{}/pypi/{}/json", self.base_url, name);
        debug!("Fetching PyPI project from {}...", url);
        self.http_client.fetch_json(&url).await
    }

    async fn release(&self, name: &str, version: &str) -> CallOutcome<api::Release> {
        let url = format!("{}/pypi/{}/{}/json", self.base_url, name, version);
        debug!("Fetching PyPI release from {}...", url);
        self.http_client.fetch_json(&url).await
    }
}

fn leading_major(version: &str) -> Option<u64> {
    version
        .trim()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|m| m.parse().ok())
}

/// Whether a `requires_python` constraint excludes every Python 3 release.
fn caps_below_python3(requires_python: &str) -> bool {
    requires_python.split(',').map(str::trim).any(|clause| {
        if let Some(v) = clause.strip_prefix("<=") {
            leading_major(v).is_some_and(|m| m < 3)
        } else if let Some(v) = clause.strip_prefix('<') {
            let v = v.trim();
            match leading_major(v) {
                Some(m) if m < 3 => true,
                Some(3) => v.trim_start_matches('3').chars().all(|c| c == '.' || c == '0'),
                _ => false,
            }
        } else if let Some(v) = clause.strip_prefix("==").or_else(|| clause.strip_prefix("~=")) {
            leading_major(v).is_some_and(|m| m < 3)
        } else {
            false
        }
    })
}

fn is_old_python(info: &api::Info) -> bool {
    let py2 = info
        .classifiers
        .iter()
        .any(|c| c.starts_with("Programming Language :: Python :: 2"));
    let py3 = info
        .classifiers
        .iter()
        .any(|c| c.starts_with("Programming Language :: Python :: 3"));
    (py2 && !py3)
        || info
            .requires_python
            .as_deref()
            .is_some_and(caps_below_python3)
}

fn to_metadata(release: api::Release, latest: Option<String>) -> RegistryMetadata {
    let last_publish = release
        .urls
        .iter()
        .filter_map(|file| {
            file.upload_time_iso_8601
                .as_deref()
                .or(file.upload_time.as_deref())
                .and_then(parse_timestamp)
        })
        .max();

    let info = &release.info;
    let deprecated = if info.yanked {
        Some(
            info.yanked_reason
                .clone()
                .filter(|r| !r.is_empty())
                .unwrap_or_else(|| "yanked".to_string()),
        )
    } else if info.classifiers.iter().any(|c| c == INACTIVE_CLASSIFIER) {
        Some(INACTIVE_CLASSIFIER.to_string())
    } else {
        None
    };

    RegistryMetadata {
        last_publish,
        deprecated,
        old_python: Some(is_old_python(info)),
        latest_version: latest,
    }
}

#[async_trait]
impl Registry for PypiRegistry {
    fn ecosystem(&self) -> Ecosystem {
        Ecosystem::Pip
    }

    /// Only pinned versions have a release document; anything else (or a
    /// failed release lookup) uses the project document, i.e. the latest release.
    #[tracing::instrument(skip(self))]
    async fn metadata(&self, name: &str, version: &str) -> CallOutcome<RegistryMetadata> {
        let pinned = !version.is_empty()
            && version
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | '+' | '!'));

        if pinned {
            match self.release(name, version).await {
                CallOutcome::Success(release) => return CallOutcome::Success(to_metadata(release, None)),
                other => debug!("No release document for {}=={} ({}), using project", name, version, other),
            }
        }

        self.project(name).await.map(|project| {
            let latest = Some(project.info.version.clone()).filter(|v| !v.is_empty());
            to_metadata(project, latest)
        })
    }

    #[tracing::instrument(skip(self))]
    async fn latest_version(&self, name: &str) -> CallOutcome<String> {
        match self.project(name).await {
            CallOutcome::Success(project) if !project.info.version.is_empty() => {
                CallOutcome::Success(project.info.version)
            }
            CallOutcome::Success(_) => CallOutcome::Error(format!("{} has no released version", name)),
            CallOutcome::Timeout => CallOutcome::Timeout,
            CallOutcome::Error(e) => CallOutcome::Error(e),
        }
    }
}
