//! Approval gate for mutating actions.
//!
//! The policy is loaded once with the rest of [`crate::config::Config`]. When no
//! trigger rule matches an action it is approved without any I/O.

use std::fmt;
use std::time::Duration;

use chrono::Utc;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::apply::ActionKind;
use crate::http::{CallOutcome, HttpClient};
use crate::runtime::Runtime;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalMode {
    None,
    #[default]
    Prompt,
    Webhook,
}

impl fmt::Display for ApprovalMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalMode::None => write!(f, "none"),
            ApprovalMode::Prompt => write!(f, "prompt"),
            ApprovalMode::Webhook => write!(f, "webhook"),
        }
    }
}

/// Which actions need approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ApprovalTrigger {
    All,
    Upgrade,
    MajorUpgrade,
    Replace,
}

impl ApprovalTrigger {
    fn matches(self, action: ActionKind, major_bump: bool) -> bool {
        match self {
            ApprovalTrigger::All => true,
            ApprovalTrigger::Upgrade => action == ActionKind::Upgrade,
            ApprovalTrigger::MajorUpgrade => action == ActionKind::Upgrade && major_bump,
            ApprovalTrigger::Replace => action == ActionKind::Replace,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ApprovalPolicy {
    pub mode: ApprovalMode,
    pub require_for: Vec<ApprovalTrigger>,
    pub webhook_url: Option<String>,
    pub timeout_ms: u64,
}

impl Default for ApprovalPolicy {
    fn default() -> Self {
        Self {
            mode: ApprovalMode::Prompt,
            require_for: vec![ApprovalTrigger::MajorUpgrade, ApprovalTrigger::Replace],
            webhook_url: None,
            timeout_ms: 30_000,
        }
    }
}

impl ApprovalPolicy {
    pub fn requires_approval(&self, action: ActionKind, major_bump: bool) -> bool {
        self.require_for
            .iter()
            .any(|t| t.matches(action, major_bump))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// What is being asked for. Also the webhook request body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovalContext {
    pub action: ActionKind,
    pub package: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_package: Option<String>,
    pub current_version: String,
    pub target_version: String,
    pub major_bump: bool,
    pub project: String,
}

impl fmt::Display for ApprovalContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.action, self.package)?;
        if let Some(target) = &self.target_package {
            write!(f, " -> {}", target)?;
        }
        write!(f, " @ {}", self.target_version)?;
        if self.major_bump {
            write!(f, " (major)")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalDecision {
    /// No trigger rule matched.
    NotRequired,
    Approved(ApprovalMode),
    Denied(String),
}

impl ApprovalDecision {
    pub fn is_approved(&self) -> bool {
        !matches!(self, ApprovalDecision::Denied(_))
    }
}

#[derive(Deserialize, Debug)]
struct WebhookReply {
    #[serde(default)]
    approved: bool,
    reason: Option<String>,
}

pub struct ApprovalGate<'a, R: Runtime> {
    runtime: &'a R,
    policy: &'a ApprovalPolicy,
    http_client: &'a HttpClient,
}

impl<'a, R: Runtime> ApprovalGate<'a, R> {
    pub fn new(runtime: &'a R, policy: &'a ApprovalPolicy, http_client: &'a HttpClient) -> Self {
        Self {
            runtime,
            policy,
            http_client,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn decide(&self, context: &ApprovalContext) -> ApprovalDecision {
        if !self
            .policy
            .requires_approval(context.action, context.major_bump)
        {
            debug!("No approval rule matches {}", context);
            return ApprovalDecision::NotRequired;
        }

        match self.policy.mode {
            ApprovalMode::None => ApprovalDecision::Approved(ApprovalMode::None),
            ApprovalMode::Webhook => self.ask_webhook(context).await,
            ApprovalMode::Prompt => self.ask_user(context),
        }
    }

    fn ask_user(&self, context: &ApprovalContext) -> ApprovalDecision {
        if !self.runtime.is_interactive() {
            return ApprovalDecision::Denied(
                "approval required but no interactive terminal; pass --yes or use webhook approval"
                    .to_string(),
            );
        }
        match self.runtime.confirm(&format!("Apply {}?", context)) {
            Ok(true) => ApprovalDecision::Approved(ApprovalMode::Prompt),
            Ok(false) => ApprovalDecision::Denied("declined at prompt".to_string()),
            Err(e) => ApprovalDecision::Denied(format!("prompt failed: {:#}", e)),
        }
    }

    async fn ask_webhook(&self, context: &ApprovalContext) -> ApprovalDecision {
        let Some(url) = self.policy.webhook_url.as_deref().filter(|u| !u.is_empty()) else {
            return ApprovalDecision::Denied("webhook approval configured without webhookUrl".to_string());
        };

        let body = serde_json::json!({
            "event": "approval.requested",
            "timestamp": Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            "context": context,
        });
        info!("Requesting approval for {} from {}", context, url);

        match self
            .http_client
            .post_json::<_, WebhookReply>(url, &body, self.policy.timeout())
            .await
        {
            CallOutcome::Success(reply) if reply.approved => ApprovalDecision::Approved(ApprovalMode::Webhook),
            CallOutcome::Success(reply) => ApprovalDecision::Denied(
                reply
                    .reason
                    .unwrap_or_else(|| "rejected by approval webhook".to_string()),
            ),
            CallOutcome::Timeout => {
                warn!("Approval webhook timed out after {:?}", self.policy.timeout());
                ApprovalDecision::Denied("approval webhook timed out".to_string())
            }
            CallOutcome::Error(e) => {
                warn!("Approval webhook failed: {}", e);
                ApprovalDecision::Denied(format!("approval webhook failed: {}", e))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::RetryPolicy;
    use crate::runtime::MockRuntime;

    fn context(action: ActionKind, major_bump: bool) -> ApprovalContext {
        ApprovalContext {
            action,
            package: "lodash".into(),
            target_package: None,
            current_version: "^3.10.1".into(),
            target_version: "4.17.21".into(),
            major_bump,
            project: "/project".into(),
        }
    }

    fn http() -> HttpClient {
        HttpClient::new(reqwest::Client::new()).with_retry_policy(RetryPolicy::none())
    }

    fn policy(mode: ApprovalMode, url: Option<String>) -> ApprovalPolicy {
        ApprovalPolicy {
            mode,
            require_for: vec![ApprovalTrigger::All],
            webhook_url: url,
            timeout_ms: 200,
        }
    }

    #[test]
    fn test_trigger_rules() {
        let policy = ApprovalPolicy::default();
        assert!(!policy.requires_approval(ActionKind::Upgrade, false));
        assert!(policy.requires_approval(ActionKind::Upgrade, true));
        assert!(policy.requires_approval(ActionKind::Replace, false));

        let upgrades = ApprovalPolicy {
            require_for: vec![ApprovalTrigger::Upgrade],
            ..Default::default()
        };
        assert!(upgrades.requires_approval(ActionKind::Upgrade, false));
        assert!(!upgrades.requires_approval(ActionKind::Replace, false));
    }

    #[tokio::test]
    async fn test_unmatched_rule_needs_no_io() {
        // Strict mock: any runtime call would panic.
        let runtime = MockRuntime::new();
        let policy = ApprovalPolicy::default();
        let http = http();
        let gate = ApprovalGate::new(&runtime, &policy, &http);

        let decision = gate.decide(&context(ActionKind::Upgrade, false)).await;
        assert_eq!(decision, ApprovalDecision::NotRequired);
    }

    #[tokio::test]
    async fn test_mode_none_approves_without_io() {
        let runtime = MockRuntime::new();
        let policy = policy(ApprovalMode::None, None);
        let http = http();
        let gate = ApprovalGate::new(&runtime, &policy, &http);

        let decision = gate.decide(&context(ActionKind::Replace, false)).await;
        assert_eq!(decision, ApprovalDecision::Approved(ApprovalMode::None));
    }

    #[tokio::test]
    async fn test_prompt_denies_without_terminal() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_interactive().returning(|| false);
        runtime.expect_confirm().never();
        let policy = policy(ApprovalMode::Prompt, None);
        let http = http();

        let decision = ApprovalGate::new(&runtime, &policy, &http)
            .decide(&context(ActionKind::Upgrade, true))
            .await;
        assert!(!decision.is_approved());
    }

    #[tokio::test]
    async fn test_prompt_asks_user() {
        let mut runtime = MockRuntime::new();
        runtime.expect_is_interactive().returning(|| true);
        runtime
            .expect_confirm()
            .withf(|prompt| prompt.to_string() == "Apply upgrade lodash @ 4.17.21 (major)?")
            .times(1)
            .returning(|_| Ok(true));
        let policy = policy(ApprovalMode::Prompt, None);
        let http = http();

        let decision = ApprovalGate::new(&runtime, &policy, &http)
            .decide(&context(ActionKind::Upgrade, true))
            .await;
        assert_eq!(decision, ApprovalDecision::Approved(ApprovalMode::Prompt));
    }

    #[tokio::test]
    async fn test_webhook_approves_and_rejects() {
        let mut server = mockito::Server::new_async().await;
        let approve = server
            .mock("POST", "/approve")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"event": "approval.requested", "context": {"package": "lodash", "majorBump": true}}"#.to_string(),
            ))
            .with_status(200)
            .with_body(r#"{"approved": true}"#)
            .create_async()
            .await;
        let _reject = server
            .mock("POST", "/reject")
            .with_status(200)
            .with_body(r#"{"approved": false, "reason": "freeze week"}"#)
            .create_async()
            .await;
        let runtime = MockRuntime::new();
        let http = http();

        let ok_policy = policy(ApprovalMode::Webhook, Some(format!("{}/approve", server.url())));
        let decision = ApprovalGate::new(&runtime, &ok_policy, &http)
            .decide(&context(ActionKind::Upgrade, true))
            .await;
        approve.assert_async().await;
        assert_eq!(decision, ApprovalDecision::Approved(ApprovalMode::Webhook));

        let no_policy = policy(ApprovalMode::Webhook, Some(format!("{}/reject", server.url())));
        let decision = ApprovalGate::new(&runtime, &no_policy, &http)
            .decide(&context(ActionKind::Upgrade, true))
            .await;
        assert_eq!(decision, ApprovalDecision::Denied("freeze week".into()));
    }

    #[tokio::test]
    async fn test_webhook_timeout_is_denial() {
        // Accepts the connection but never answers.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _hold = tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((socket, _)) = listener.accept().await {
                held.push(socket);
            }
        });

        let runtime = MockRuntime::new();
        let policy = policy(ApprovalMode::Webhook, Some(format!("http://{}/approve", addr)));
        let http = http();
        let decision = ApprovalGate::new(&runtime, &policy, &http)
            .decide(&context(ActionKind::Replace, false))
            .await;
        assert_eq!(decision, ApprovalDecision::Denied("approval webhook timed out".into()));
    }

    #[tokio::test]
    async fn test_webhook_without_url_or_server_is_denial() {
        let runtime = MockRuntime::new();
        let http = http();

        let missing = policy(ApprovalMode::Webhook, None);
        let decision = ApprovalGate::new(&runtime, &missing, &http)
            .decide(&context(ActionKind::Replace, false))
            .await;
        assert!(!decision.is_approved());

        let unreachable = policy(ApprovalMode::Webhook, Some("http://127.0.0.1:9/approve".into()));
        let decision = ApprovalGate::new(&runtime, &unreachable, &http)
            .decide(&context(ActionKind::Replace, false))
            .await;
        assert!(!decision.is_approved());
    }
}
