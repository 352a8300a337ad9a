//! HTTP client module with retry logic, bounded timeouts and explicit outcomes.

mod client;
mod outcome;
mod retry;

pub use client::{HttpClient, RetryPolicy, build_http_client};
pub use outcome::CallOutcome;
pub use retry::{MAX_RETRIES, NonRetryableError, RETRY_DELAY_MS, check_retryable, classify_error};
