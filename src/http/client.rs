//! HTTP client with built-in retry logic and bounded-timeout posts.

use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, warn};
use reqwest::Client;
use serde::Serialize;
use serde::de::DeserializeOwned;

use super::outcome::CallOutcome;
use super::retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable};

/// How often and how patiently a GET is retried.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    pub attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: MAX_RETRIES,
            delay: Duration::from_millis(RETRY_DELAY_MS),
        }
    }
}

impl RetryPolicy {
    /// A single attempt, no waiting.
    pub fn none() -> Self {
        Self {
            attempts: 1,
            delay: Duration::ZERO,
        }
    }
}

/// Build the shared reqwest client used for registry and webhook traffic.
pub fn build_http_client(request_timeout: Duration) -> Result<HttpClient> {
    let client = Client::builder()
        .user_agent(concat!("deplineage/", env!("CARGO_PKG_VERSION")))
        .timeout(request_timeout)
        .build()
        .context("Failed to build HTTP client")?;
    Ok(HttpClient::new(client))
}

/// HTTP client with built-in retry logic for registry lookups.
#[derive(Clone)]
pub struct HttpClient {
    client: Client,
    retry: RetryPolicy,
}

impl HttpClient {
    /// Creates a new HTTP client wrapping the given reqwest Client.
    pub fn new(client: Client) -> Self {
        Self {
            client,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Performs a GET request and deserializes the JSON response.
    /// Automatically retries on transient errors.
    #[tracing::instrument(skip(self))]
    pub async fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T> {
        debug!("GET JSON from {}...", url);

        self.with_retry("GET JSON", || async {
            let response = self
                .client
                .get(url)
                .header(reqwest::header::ACCEPT, "application/json")
                .send()
                .await
                .context("Failed to send request")?;

            let response = response.error_for_status().map_err(check_retryable)?;

            let body = response.text().await.context("Failed to read response body")?;
            let result = serde_json::from_str::<T>(&body).map_err(|e| {
                anyhow::Error::from(NonRetryableError::InvalidResponse(e.to_string()))
                    .context("Failed to parse JSON response")
            })?;

            Ok(result)
        })
        .await
    }

    /// GET that never fails: the result is classified into a [`CallOutcome`].
    pub async fn fetch_json<T: DeserializeOwned>(&self, url: &str) -> CallOutcome<T> {
        match self.get_json(url).await {
            Ok(value) => CallOutcome::Success(value),
            Err(e) => {
                debug!("GET {} failed: {:#}", url, e);
                CallOutcome::from_error(&e)
            }
        }
    }

    /// POSTs `body` as JSON and deserializes the JSON reply, giving up after `timeout`.
    ///
    /// No retry: the deadline covers the whole exchange.
    #[tracing::instrument(skip(self, body))]
    pub async fn post_json<B, T>(&self, url: &str, body: &B, timeout: Duration) -> CallOutcome<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let exchange = async {
            let response = self
                .client
                .post(url)
                .json(body)
                .send()
                .await
                .context("Failed to send request")?
                .error_for_status()
                .context("Webhook returned an error status")?;
            response
                .json::<T>()
                .await
                .context("Failed to parse JSON response")
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(value)) => CallOutcome::Success(value),
            Ok(Err(e)) => CallOutcome::from_error(&e),
            Err(_) => CallOutcome::Timeout,
        }
    }

    /// POSTs `body` as JSON and only checks the status code.
    #[tracing::instrument(skip(self, body))]
    pub async fn post(&self, url: &str, body: &serde_json::Value, timeout: Duration) -> CallOutcome<()> {
        let exchange = async {
            self.client
                .post(url)
                .json(body)
                .send()
                .await
                .context("Failed to send request")?
                .error_for_status()
                .context("Webhook returned an error status")?;
            Ok::<_, anyhow::Error>(())
        };

        match tokio::time::timeout(timeout, exchange).await {
            Ok(Ok(())) => CallOutcome::Success(()),
            Ok(Err(e)) => CallOutcome::from_error(&e),
            Err(_) => CallOutcome::Timeout,
        }
    }

    /// Executes an async operation with retry logic.
    async fn with_retry<F, Fut, T>(&self, operation_name: &str, operation: F) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: std::future::Future<Output = Result<T>>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut last_error = None;

        for attempt in 1..=attempts {
            match operation().await {
                Ok(result) => return Ok(result),
                Err(e) => {
                    if !is_retryable_error(&e) {
                        debug!("{}: non-retryable error: {}", operation_name, e);
                        return Err(e);
                    }

                    if attempt < attempts {
                        warn!(
                            "{}: attempt {}/{} failed ({}), retrying in {:?}...",
                            operation_name, attempt, attempts, e, self.retry.delay
                        );
                        tokio::time::sleep(self.retry.delay).await;
                    }
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            anyhow::anyhow!("{}: failed after {} attempts", operation_name, attempts)
        }))
    }
}

/// Checks if an anyhow::Error is retryable based on its content.
fn is_retryable_error(e: &anyhow::Error) -> bool {
    e.downcast_ref::<NonRetryableError>().is_none()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn client() -> HttpClient {
        HttpClient::new(Client::new()).with_retry_policy(RetryPolicy {
            attempts: 3,
            delay: Duration::from_millis(1),
        })
    }

    #[derive(serde::Deserialize, Debug, PartialEq)]
    struct DistTags {
        latest: String,
    }

    #[tokio::test]
    async fn test_get_json_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/lodash")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"latest": "4.17.21"}"#)
            .create_async()
            .await;

        let result: DistTags = client()
            .get_json(&format!("{}/lodash", server.url()))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(result.latest, "4.17.21");
    }

    #[tokio::test]
    async fn test_get_json_not_found_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/missing")
            .with_status(404)
            .expect(1)
            .create_async()
            .await;

        let result: Result<serde_json::Value> =
            client().get_json(&format!("{}/missing", server.url())).await;

        mock.assert_async().await;
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<NonRetryableError>().is_some());
    }

    #[tokio::test]
    async fn test_get_json_malformed_body_is_not_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/broken")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body("{\"latest\": ")
            .expect(1)
            .create_async()
            .await;

        let result: Result<DistTags> = client().get_json(&format!("{}/broken", server.url())).await;

        mock.assert_async().await;
        let err = result.unwrap_err();
        assert!(err.downcast_ref::<NonRetryableError>().is_some());
        assert!(format!("{:#}", err).contains("Failed to parse JSON response"));
    }

    #[tokio::test]
    async fn test_get_json_server_error_is_retried() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/flaky")
            .with_status(503)
            .expect(3)
            .create_async()
            .await;

        let outcome: CallOutcome<serde_json::Value> =
            client().fetch_json(&format!("{}/flaky", server.url())).await;

        mock.assert_async().await;
        assert!(matches!(outcome, CallOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_post_json_success() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/approve")
            .match_body(mockito::Matcher::PartialJsonString(
                r#"{"action": "upgrade"}"#.to_string(),
            ))
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"approved": true}"#)
            .create_async()
            .await;

        let outcome: CallOutcome<serde_json::Value> = client()
            .post_json(
                &format!("{}/approve", server.url()),
                &serde_json::json!({"action": "upgrade"}),
                Duration::from_secs(5),
            )
            .await;

        mock.assert_async().await;
        assert_eq!(outcome.ok(), Some(serde_json::json!({"approved": true})));
    }

    #[tokio::test]
    async fn test_post_reports_error_status() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/hook")
            .with_status(500)
            .create_async()
            .await;

        let outcome = client()
            .post(
                &format!("{}/hook", server.url()),
                &serde_json::json!({"event": "apply.started"}),
                Duration::from_secs(5),
            )
            .await;

        assert!(matches!(outcome, CallOutcome::Error(_)));
    }

    #[tokio::test]
    async fn test_post_unreachable_is_error() {
        let outcome = client()
            .post(
                "http://127.0.0.1:9/hook",
                &serde_json::json!({}),
                Duration::from_secs(5),
            )
            .await;
        assert!(!outcome.is_success());
    }

    #[tokio::test]
    async fn test_with_retry_exhausts_attempts() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = client()
            .with_retry("test", || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::anyhow!("connection reset"))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_with_retry_stops_on_non_retryable() {
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();

        let result = client()
            .with_retry("test", || {
                let count = counter.clone();
                async move {
                    count.fetch_add(1, Ordering::SeqCst);
                    Err::<(), _>(anyhow::Error::from(NonRetryableError::NotFound(
                        "left-pad".to_string(),
                    )))
                }
            })
            .await;

        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
