//! Transactional upgrade or replacement of one dependency.
//!
//! The engine walks approval, checkpoint, manifest edit, install and verify.
//! Once the manifest has been touched it always finishes in either
//! [`ApplyState::Committed`] or [`ApplyState::RolledBack`]; a crash in between
//! leaves a checkpoint that `deplineage rollback` can restore.

pub mod manifest;
mod toolchain;

use std::fmt;
use std::path::Path;

use anyhow::{Result, anyhow};
use chrono::Utc;
use log::{debug, info, warn};
use serde::Serialize;
use serde_json::json;

use crate::approval::{ApprovalContext, ApprovalDecision, ApprovalGate};
use crate::checkpoint::{CheckpointManager, CheckpointMeta};
use crate::config::Config;
use crate::ecosystem::Ecosystem;
use crate::events::{Event, EventKind, EventSink};
use crate::http::{CallOutcome, HttpClient};
use crate::registry::RegistrySet;
use crate::runtime::Runtime;

pub use toolchain::{CommandOutput, NativeToolchain, Toolchain};
#[cfg(test)]
pub use toolchain::MockToolchain;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    Upgrade,
    Replace,
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionKind::Upgrade => write!(f, "upgrade"),
            ActionKind::Replace => write!(f, "replace"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplyRequest {
    pub action: ActionKind,
    pub package: String,
    /// Replacement package; only for [`ActionKind::Replace`].
    pub new_package: Option<String>,
    /// Explicit target version; `None` or `"latest"` asks the registry.
    pub version: Option<String>,
    /// Skip auto-detection.
    pub ecosystem: Option<Ecosystem>,
    pub dry_run: bool,
    pub skip_approval: bool,
}

impl ApplyRequest {
    pub fn upgrade(package: &str) -> Self {
        Self {
            action: ActionKind::Upgrade,
            package: package.to_string(),
            new_package: None,
            version: None,
            ecosystem: None,
            dry_run: false,
            skip_approval: false,
        }
    }

    pub fn replace(package: &str, new_package: &str) -> Self {
        Self {
            action: ActionKind::Replace,
            new_package: Some(new_package.to_string()),
            ..Self::upgrade(package)
        }
    }

    /// The package whose version is being resolved and written.
    pub fn target_package(&self) -> &str {
        self.new_package.as_deref().unwrap_or(&self.package)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ApplyState {
    /// Dry run: approved and planned, nothing written.
    Planned,
    Committed,
    RolledBack,
    Denied,
    /// Stopped before any checkpoint was taken.
    Failed,
}

impl fmt::Display for ApplyState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApplyState::Planned => write!(f, "planned"),
            ApplyState::Committed => write!(f, "committed"),
            ApplyState::RolledBack => write!(f, "rolled back"),
            ApplyState::Denied => write!(f, "denied"),
            ApplyState::Failed => write!(f, "failed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplyOutcome {
    pub ok: bool,
    pub dry_run: bool,
    pub state: ApplyState,
    pub action: ActionKind,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new_package: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl ApplyOutcome {
    fn new(request: &ApplyRequest, state: ApplyState) -> Self {
        Self {
            ok: matches!(state, ApplyState::Planned | ApplyState::Committed),
            dry_run: request.dry_run,
            state,
            action: request.action,
            package: request.package.clone(),
            new_package: request.new_package.clone(),
            before: None,
            after: None,
            checkpoint: None,
            error: None,
        }
    }

    fn failed(request: &ApplyRequest, error: String) -> Self {
        Self {
            error: Some(error),
            ..Self::new(request, ApplyState::Failed)
        }
    }
}

/// Leading numeric component of a version or range, e.g. `^4.17.20` -> 4.
fn major_component(version: &str) -> Option<u64> {
    let mut rest = version.trim();
    loop {
        let stripped = rest
            .trim_start_matches(['^', '~', '=', '>', '<', 'v', 'V'])
            .trim_start();
        if stripped == rest {
            break;
        }
        rest = stripped;
    }
    let digits: String = rest.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

/// Loose major-bump check: the target's leading number exceeds the current one.
pub fn is_major_bump(current: &str, target: &str) -> bool {
    match (major_component(current), major_component(target)) {
        (Some(current), Some(target)) => target > current,
        _ => false,
    }
}

/// Why a mutation was undone.
enum Failure {
    Edit(anyhow::Error),
    Install(String),
    Verify(String),
}

impl Failure {
    fn reason(&self) -> &'static str {
        match self {
            Failure::Edit(_) => "edit_failed",
            Failure::Install(_) => "install_failed",
            Failure::Verify(_) => "verify_failed",
        }
    }

    fn detail(&self) -> String {
        match self {
            Failure::Edit(e) => format!("{:#}", e),
            Failure::Install(detail) | Failure::Verify(detail) => detail.clone(),
        }
    }
}

pub struct ApplyEngine<'a, R: Runtime> {
    runtime: &'a R,
    config: &'a Config,
    registries: &'a RegistrySet,
    http_client: &'a HttpClient,
    toolchain: &'a dyn Toolchain,
    events: &'a dyn EventSink,
}

impl<'a, R: Runtime> ApplyEngine<'a, R> {
    pub fn new(
        runtime: &'a R,
        config: &'a Config,
        registries: &'a RegistrySet,
        http_client: &'a HttpClient,
        toolchain: &'a dyn Toolchain,
        events: &'a dyn EventSink,
    ) -> Self {
        Self {
            runtime,
            config,
            registries,
            http_client,
            toolchain,
            events,
        }
    }

    async fn emit(&self, kind: EventKind, payload: serde_json::Value) {
        self.events.emit(&Event::new(kind, payload)).await;
    }

    async fn resolve_version(&self, ecosystem: Ecosystem, request: &ApplyRequest) -> Result<String, String> {
        if let Some(version) = request.version.as_deref().filter(|v| *v != "latest") {
            return Ok(version.to_string());
        }
        let target = request.target_package();
        match self
            .registries
            .for_ecosystem(ecosystem)
            .latest_version(target)
            .await
        {
            CallOutcome::Success(version) if !version.is_empty() => Ok(version),
            CallOutcome::Success(_) => Err(format!("Could not resolve version for {}", target)),
            other => Err(format!("Could not resolve version for {}: {}", target, other)),
        }
    }

    /// Runs one apply. `Err` only when a rollback itself failed; every other
    /// problem is reported in the returned [`ApplyOutcome`].
    #[tracing::instrument(skip(self, request), fields(action = %request.action, package = %request.package))]
    pub async fn apply(&self, root: &Path, request: &ApplyRequest) -> Result<ApplyOutcome> {
        let Some(ecosystem) = request
            .ecosystem
            .or_else(|| Ecosystem::detect(self.runtime, root))
        else {
            return Ok(ApplyOutcome::failed(
                request,
                format!("No supported project found in {}", root.display()),
            ));
        };

        let manifest_name = ecosystem.manifest_file();
        let manifest_path = root.join(manifest_name);
        if !self.runtime.is_file(&manifest_path) {
            return Ok(ApplyOutcome::failed(request, format!("No {}", manifest_name)));
        }
        let original = match self.runtime.read_to_string(&manifest_path) {
            Ok(content) => content,
            Err(e) => return Ok(ApplyOutcome::failed(request, format!("{:#}", e))),
        };
        let declared = match manifest::find(ecosystem, &original, &request.package) {
            Ok(Some(declared)) => declared,
            Ok(None) => {
                return Ok(ApplyOutcome::failed(
                    request,
                    format!("Package {} not found in {}", request.package, manifest_name),
                ));
            }
            Err(e) => return Ok(ApplyOutcome::failed(request, format!("{:#}", e))),
        };

        let target_version = match self.resolve_version(ecosystem, request).await {
            Ok(version) => version,
            Err(e) => return Ok(ApplyOutcome::failed(request, e)),
        };
        let major_bump =
            request.action == ActionKind::Upgrade && is_major_bump(&declared.version, &target_version);
        debug!(
            "{} {}: {} -> {} (major: {})",
            request.action, declared.name, declared.version, target_version, major_bump
        );

        if !request.skip_approval {
            let context = ApprovalContext {
                action: request.action,
                package: request.package.clone(),
                target_package: request.new_package.clone(),
                current_version: declared.version.clone(),
                target_version: target_version.clone(),
                major_bump,
                project: root.display().to_string(),
            };
            let decision = ApprovalGate::new(self.runtime, &self.config.approval, self.http_client)
                .decide(&context)
                .await;
            if let ApprovalDecision::Denied(reason) = decision {
                info!("Approval denied for {}: {}", context, reason);
                return Ok(ApplyOutcome {
                    error: Some(format!("Approval denied: {}", reason)),
                    ..ApplyOutcome::new(request, ApplyState::Denied)
                });
            }
        }

        let mut outcome = ApplyOutcome::new(request, ApplyState::Planned);
        outcome.before = Some(declared.version.clone());
        outcome.after = Some(target_version.clone());
        if request.dry_run {
            return Ok(outcome);
        }

        let checkpoints = CheckpointManager::new(self.runtime, root);
        let reason = format!("apply-{}", request.action);
        let checkpoint = match checkpoints.create_for(ecosystem, &reason, Utc::now()) {
            Ok(meta) => meta,
            Err(e) => return Ok(ApplyOutcome::failed(request, e.to_string())),
        };
        outcome.checkpoint = Some(checkpoint.id.clone());
        self.emit(
            EventKind::CheckpointCreated,
            json!({"checkpoint": checkpoint.id, "files": checkpoint.files}),
        )
        .await;
        self.emit(
            EventKind::ApplyStarted,
            json!({
                "action": request.action,
                "package": request.package,
                "newPackage": request.new_package,
                "targetVersion": target_version,
            }),
        )
        .await;

        match self.mutate(ecosystem, root, &original, request, &target_version) {
            Ok(()) => {
                info!("Applied {} {} -> {}", request.action, request.package, target_version);
                self.emit(
                    EventKind::ApplyCompleted,
                    json!({
                        "action": request.action,
                        "package": request.package,
                        "newPackage": request.new_package,
                        "before": declared.version,
                        "after": target_version,
                        "checkpoint": checkpoint.id,
                    }),
                )
                .await;
                outcome.state = ApplyState::Committed;
                Ok(outcome)
            }
            Err(failure) => {
                self.roll_back(&checkpoints, &checkpoint, request, &failure).await?;
                outcome.ok = false;
                outcome.state = ApplyState::RolledBack;
                outcome.error = Some(failure.detail());
                Ok(outcome)
            }
        }
    }

    /// Edit, install, verify. Blocking child processes, no timeout of our own.
    fn mutate(
        &self,
        ecosystem: Ecosystem,
        root: &Path,
        original: &str,
        request: &ApplyRequest,
        version: &str,
    ) -> Result<(), Failure> {
        let edited = manifest::rewrite(
            ecosystem,
            original,
            &request.package,
            request.target_package(),
            version,
        )
        .map_err(Failure::Edit)?;
        self.runtime
            .write(&root.join(ecosystem.manifest_file()), edited.as_bytes())
            .map_err(Failure::Edit)?;

        self.run_step(root, ecosystem.install_command())
            .map_err(Failure::Install)?;
        self.run_step(root, ecosystem.verify_command())
            .map_err(Failure::Verify)
    }

    fn run_step(&self, root: &Path, command: &[&str]) -> Result<(), String> {
        let argv: Vec<String> = command.iter().map(|s| s.to_string()).collect();
        let line = argv.join(" ");
        match self.toolchain.run(root, &argv) {
            Ok(output) if output.success => Ok(()),
            Ok(output) => {
                let detail = output.detail();
                warn!("{} failed ({:?}): {}", line, output.status, detail);
                Err(if detail.is_empty() {
                    format!("{} failed", line)
                } else {
                    detail
                })
            }
            Err(e) => Err(format!("{:#}", e)),
        }
    }

    async fn roll_back(
        &self,
        checkpoints: &CheckpointManager<'_, R>,
        checkpoint: &CheckpointMeta,
        request: &ApplyRequest,
        failure: &Failure,
    ) -> Result<()> {
        self.emit(
            EventKind::ApplyFailed,
            json!({
                "action": request.action,
                "package": request.package,
                "stage": failure.reason(),
                "error": failure.detail(),
            }),
        )
        .await;
        self.emit(
            EventKind::RollbackTriggered,
            json!({"reason": failure.reason(), "checkpoint": checkpoint.id}),
        )
        .await;

        let report = checkpoints.restore(checkpoint, false).map_err(|e| {
            anyhow!(
                "Rollback to checkpoint {} failed: {}. Run `deplineage rollback` to restore it.",
                checkpoint.id,
                e
            )
        })?;
        info!("Rolled back to checkpoint {}", checkpoint.id);
        self.emit(
            EventKind::RollbackCompleted,
            json!({
                "checkpoint": checkpoint.id,
                "restored": report.restored,
                "removed": report.removed,
            }),
        )
        .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::approval::{ApprovalMode, ApprovalPolicy, ApprovalTrigger};
    use crate::checkpoint::CHECKPOINTS_DIR;
    use crate::events::RecordingSink;
    use crate::http::RetryPolicy;
    use crate::registry::{GoProxy, MockRegistry};
    use crate::runtime::RealRuntime;
    use std::sync::Arc;
    use tempfile::tempdir;

    const PACKAGE_JSON: &str = "{\n  \"name\": \"app\",\n  \"dependencies\": {\n    \"lodash\": \"^4.17.20\"\n  }\n}\n";

    fn npm_project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("package.json"), PACKAGE_JSON).unwrap();
        std::fs::write(dir.path().join("package-lock.json"), "{\"lockfileVersion\": 3}\n").unwrap();
        dir
    }

    fn registries_with_latest(version: &'static str) -> RegistrySet {
        let mut npm = MockRegistry::new();
        npm.expect_latest_version()
            .returning(move |_| CallOutcome::Success(version.to_string()));
        RegistrySet::new(
            Arc::new(npm),
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
        )
    }

    fn http() -> HttpClient {
        HttpClient::new(reqwest::Client::new()).with_retry_policy(RetryPolicy::none())
    }

    fn ok_output() -> CommandOutput {
        CommandOutput {
            success: true,
            status: Some(0),
            ..Default::default()
        }
    }

    fn checkpoint_count(root: &Path) -> usize {
        std::fs::read_dir(root.join(CHECKPOINTS_DIR))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }

    #[test]
    fn test_major_bump() {
        assert!(!is_major_bump("^4.17.20", "4.17.21"));
        assert!(is_major_bump("~3.10.1", "4.0.0"));
        assert!(is_major_bump(">= 1.2", "v2.0.0"));
        assert!(is_major_bump("==2.31.0", "3.0"));
        assert!(!is_major_bump("v1.9.3", "v1.10.0"));
        assert!(!is_major_bump("*", "5.0.0"));
        assert!(!is_major_bump("latest", "5.0.0"));
    }

    #[tokio::test]
    async fn test_dry_run_upgrade_touches_nothing() {
        let dir = npm_project();
        let config = Config::default();
        let registries = registries_with_latest("4.17.21");
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain.expect_run().never();
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let request = ApplyRequest {
            dry_run: true,
            ..ApplyRequest::upgrade("lodash")
        };
        let outcome = engine.apply(dir.path(), &request).await.unwrap();

        assert!(outcome.ok);
        assert!(outcome.dry_run);
        assert_eq!(outcome.state, ApplyState::Planned);
        assert_eq!(outcome.before.as_deref(), Some("^4.17.20"));
        assert_eq!(outcome.after.as_deref(), Some("4.17.21"));
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), PACKAGE_JSON);
        assert_eq!(checkpoint_count(dir.path()), 0);
        assert!(sink.names().is_empty());
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_install_rolls_back_in_order() {
        let dir = npm_project();
        let config = Config::default();
        let registries = registries_with_latest("4.17.21");
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "npm install")
            .times(1)
            .returning(|dir, _| {
                // the installer rewrites the lockfile before failing
                std::fs::write(dir.join("package-lock.json"), "corrupt").unwrap();
                Ok(CommandOutput {
                    success: false,
                    status: Some(1),
                    stderr: "npm ERR! code ETARGET".into(),
                    ..Default::default()
                })
            });
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let outcome = engine
            .apply(dir.path(), &ApplyRequest::upgrade("lodash"))
            .await
            .unwrap();

        assert!(!outcome.ok);
        assert_eq!(outcome.state, ApplyState::RolledBack);
        assert_eq!(outcome.error.as_deref(), Some("npm ERR! code ETARGET"));
        assert!(outcome.checkpoint.is_some());
        assert_eq!(checkpoint_count(dir.path()), 1);
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), PACKAGE_JSON);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("package-lock.json")).unwrap(),
            "{\"lockfileVersion\": 3}\n"
        );
        assert_eq!(
            sink.names(),
            vec![
                "checkpoint.created",
                "apply.started",
                "apply.failed",
                "rollback.triggered",
                "rollback.completed"
            ]
        );
    }

    const GO_MOD: &str = "module example.com/app\n\ngo 1.21\n\nrequire (\n\tgithub.com/pkg/errors v0.8.1\n\tgolang.org/x/sys v0.1.0 // indirect\n)\n";

    fn go_project() -> tempfile::TempDir {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("go.mod"), GO_MOD).unwrap();
        dir
    }

    #[test_log::test(tokio::test)]
    async fn test_failed_go_tidy_rolls_back() {
        let mut server = mockito::Server::new_async().await;
        let latest = server
            .mock("GET", "/github.com/pkg/errors/@latest")
            .with_status(200)
            .with_body(r#"{"Version": "v0.9.1", "Time": "2020-01-14T19:47:44Z"}"#)
            .expect(1)
            .create_async()
            .await;
        let dir = go_project();
        let config = Config::default();
        let registries = RegistrySet::new(
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
            Arc::new(GoProxy::new(http(), &server.url())),
        );
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "go mod tidy")
            .times(1)
            .returning(|dir, _| {
                let edited = std::fs::read_to_string(dir.join("go.mod")).unwrap();
                assert!(edited.contains("\tgithub.com/pkg/errors v0.9.1\n"));
                // tidy writes go.sum, then fails
                std::fs::write(dir.join("go.sum"), "github.com/pkg/errors v0.9.1 h1:abc=\n").unwrap();
                Ok(CommandOutput {
                    success: false,
                    status: Some(1),
                    stderr: "go: github.com/pkg/errors@v0.9.1: verifying module: checksum mismatch".into(),
                    ..Default::default()
                })
            });
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let outcome = engine
            .apply(dir.path(), &ApplyRequest::upgrade("github.com/pkg/errors"))
            .await
            .unwrap();

        latest.assert_async().await;
        assert_eq!(outcome.state, ApplyState::RolledBack);
        assert_eq!(outcome.before.as_deref(), Some("v0.8.1"));
        assert_eq!(outcome.after.as_deref(), Some("v0.9.1"));
        assert!(outcome.error.unwrap().contains("checksum mismatch"));
        assert_eq!(std::fs::read(dir.path().join("go.mod")).unwrap(), GO_MOD.as_bytes());
        assert!(!dir.path().join("go.sum").exists());
        assert_eq!(
            sink.names(),
            vec![
                "checkpoint.created",
                "apply.started",
                "apply.failed",
                "rollback.triggered",
                "rollback.completed"
            ]
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events[2].payload["stage"], "install_failed");
        assert_eq!(events[4].payload["restored"], serde_json::json!(["go.mod"]));
        assert_eq!(events[4].payload["removed"], serde_json::json!(["go.sum"]));
    }

    #[tokio::test]
    async fn test_go_upgrade_adds_version_prefix() {
        let dir = go_project();
        std::fs::write(dir.path().join("go.sum"), "golang.org/x/sys v0.1.0 h1:xyz=\n").unwrap();
        let config = Config::default();
        // explicit version: no proxy lookup
        let registries = RegistrySet::new(
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
        );
        let http = http();
        let mut toolchain = MockToolchain::new();
        let mut seq = mockall::Sequence::new();
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "go mod tidy")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ok_output()));
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "go mod verify")
            .times(1)
            .in_sequence(&mut seq)
            .returning(|_, _| Ok(ok_output()));
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let request = ApplyRequest {
            version: Some("0.15.0".into()),
            ..ApplyRequest::upgrade("golang.org/x/sys")
        };
        let outcome = engine.apply(dir.path(), &request).await.unwrap();

        assert_eq!(outcome.state, ApplyState::Committed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("go.mod")).unwrap(),
            GO_MOD.replace("golang.org/x/sys v0.1.0", "golang.org/x/sys v0.15.0")
        );
        assert_eq!(
            sink.names(),
            vec!["checkpoint.created", "apply.started", "apply.completed"]
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events[0].payload["files"], serde_json::json!(["go.mod", "go.sum"]));
    }

    #[tokio::test]
    async fn test_failed_verify_rolls_back() {
        let dir = npm_project();
        let config = Config::default();
        let registries = registries_with_latest("4.17.21");
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "npm install")
            .returning(|_, _| Ok(ok_output()));
        toolchain
            .expect_run()
            .withf(|_, argv| argv.join(" ") == "npm ls")
            .returning(|_, _| {
                Ok(CommandOutput {
                    success: false,
                    status: Some(1),
                    stdout: "npm ERR! invalid: lodash".into(),
                    ..Default::default()
                })
            });
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let outcome = engine
            .apply(dir.path(), &ApplyRequest::upgrade("lodash"))
            .await
            .unwrap();
        assert_eq!(outcome.state, ApplyState::RolledBack);
        assert_eq!(std::fs::read_to_string(dir.path().join("package.json")).unwrap(), PACKAGE_JSON);

        let events = sink.events.lock().unwrap();
        let triggered = events
            .iter()
            .find(|e| e.kind == EventKind::RollbackTriggered)
            .unwrap();
        assert_eq!(triggered.payload["reason"], "verify_failed");
    }

    #[tokio::test]
    async fn test_successful_replace_commits() {
        let dir = npm_project();
        let config = Config {
            approval: ApprovalPolicy {
                mode: ApprovalMode::None,
                ..Default::default()
            },
            ..Default::default()
        };
        let registries = registries_with_latest("4.17.21");
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain.expect_run().times(2).returning(|_, _| Ok(ok_output()));
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let outcome = engine
            .apply(dir.path(), &ApplyRequest::replace("lodash", "lodash-es"))
            .await
            .unwrap();

        assert!(outcome.ok);
        assert_eq!(outcome.state, ApplyState::Committed);
        let manifest = std::fs::read_to_string(dir.path().join("package.json")).unwrap();
        assert!(manifest.contains("\"lodash-es\": \"4.17.21\""));
        assert!(!manifest.contains("\"lodash\""));
        assert_eq!(
            sink.names(),
            vec!["checkpoint.created", "apply.started", "apply.completed"]
        );
        let events = sink.events.lock().unwrap();
        assert_eq!(events[2].payload["newPackage"], "lodash-es");
    }

    #[tokio::test]
    async fn test_denied_approval_touches_nothing() {
        let dir = npm_project();
        let config = Config {
            approval: ApprovalPolicy {
                mode: ApprovalMode::Webhook,
                require_for: vec![ApprovalTrigger::All],
                webhook_url: None,
                timeout_ms: 100,
            },
            ..Default::default()
        };
        let registries = registries_with_latest("5.0.0");
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain.expect_run().never();
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let outcome = engine
            .apply(dir.path(), &ApplyRequest::upgrade("lodash"))
            .await
            .unwrap();
        assert!(!outcome.ok);
        assert_eq!(outcome.state, ApplyState::Denied);
        assert_eq!(checkpoint_count(dir.path()), 0);
        assert!(sink.names().is_empty());

        // --yes bypasses the gate
        let request = ApplyRequest {
            skip_approval: true,
            dry_run: true,
            ..ApplyRequest::upgrade("lodash")
        };
        let outcome = engine.apply(dir.path(), &request).await.unwrap();
        assert_eq!(outcome.state, ApplyState::Planned);
    }

    #[tokio::test]
    async fn test_pre_checkpoint_failures() {
        let dir = npm_project();
        let config = Config::default();
        let mut npm = MockRegistry::new();
        npm.expect_latest_version()
            .returning(|_| CallOutcome::Error("connection refused".into()));
        let registries = RegistrySet::new(
            Arc::new(npm),
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
        );
        let http = http();
        let toolchain = MockToolchain::new();
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let missing = engine
            .apply(dir.path(), &ApplyRequest::upgrade("react"))
            .await
            .unwrap();
        assert_eq!(missing.state, ApplyState::Failed);
        assert_eq!(missing.error.as_deref(), Some("Package react not found in package.json"));

        let unresolved = engine
            .apply(dir.path(), &ApplyRequest::upgrade("lodash"))
            .await
            .unwrap();
        assert_eq!(unresolved.state, ApplyState::Failed);
        assert!(unresolved.error.unwrap().contains("Could not resolve version for lodash"));

        let empty = tempdir().unwrap();
        let none = engine
            .apply(empty.path(), &ApplyRequest::upgrade("lodash"))
            .await
            .unwrap();
        assert_eq!(none.state, ApplyState::Failed);
        assert_eq!(checkpoint_count(dir.path()), 0);
    }

    #[tokio::test]
    async fn test_pip_upgrade_with_explicit_version() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("requirements.txt"), "requests==2.25.0\nsix\n").unwrap();
        let config = Config::default();
        // explicit version: no registry lookup
        let registries = RegistrySet::new(
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
            Arc::new(MockRegistry::new()),
        );
        let http = http();
        let mut toolchain = MockToolchain::new();
        toolchain
            .expect_run()
            .withf(|_, argv| argv[0] == "pip")
            .times(2)
            .returning(|_, _| Ok(ok_output()));
        let sink = RecordingSink::default();
        let engine = ApplyEngine::new(&RealRuntime, &config, &registries, &http, &toolchain, &sink);

        let request = ApplyRequest {
            version: Some("2.31.0".into()),
            ..ApplyRequest::upgrade("requests")
        };
        let outcome = engine.apply(dir.path(), &request).await.unwrap();
        assert_eq!(outcome.state, ApplyState::Committed);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("requirements.txt")).unwrap(),
            "requests==2.31.0\nsix\n"
        );
    }
}
