//! Lifecycle events.
//!
//! Events are delivered best-effort: a failed webhook is logged and dropped,
//! never surfaced to the apply engine.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use futures_util::future::join_all;
use log::{debug, info, warn};
use serde_json::{Map, Value};

use crate::http::{CallOutcome, HttpClient};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    CheckpointCreated,
    ApplyStarted,
    ApplyCompleted,
    ApplyFailed,
    RollbackTriggered,
    RollbackCompleted,
}

impl EventKind {
    pub fn name(self) -> &'static str {
        match self {
            EventKind::CheckpointCreated => "checkpoint.created",
            EventKind::ApplyStarted => "apply.started",
            EventKind::ApplyCompleted => "apply.completed",
            EventKind::ApplyFailed => "apply.failed",
            EventKind::RollbackTriggered => "rollback.triggered",
            EventKind::RollbackCompleted => "rollback.completed",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub payload: Map<String, Value>,
}

impl Event {
    pub fn new(kind: EventKind, payload: Value) -> Self {
        let payload = match payload {
            Value::Object(map) => map,
            Value::Null => Map::new(),
            other => Map::from_iter([("data".to_string(), other)]),
        };
        Self {
            kind,
            timestamp: Utc::now(),
            payload,
        }
    }

    /// Wire form: `{event, timestamp, ...payload}`.
    pub fn to_json(&self) -> Value {
        let mut body = Map::new();
        body.insert("event".into(), Value::String(self.kind.name().into()));
        body.insert(
            "timestamp".into(),
            Value::String(self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)),
        );
        for (key, value) in &self.payload {
            if key != "event" && key != "timestamp" {
                body.insert(key.clone(), value.clone());
            }
        }
        Value::Object(body)
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Delivers one event. Must not fail.
    async fn emit(&self, event: &Event);
}

/// Posts every event to each configured URL.
pub struct WebhookEmitter {
    http_client: HttpClient,
    urls: Vec<String>,
    timeout: Duration,
}

impl WebhookEmitter {
    pub fn new(http_client: HttpClient, urls: Vec<String>, timeout: Duration) -> Self {
        Self {
            http_client,
            urls,
            timeout,
        }
    }
}

#[async_trait]
impl EventSink for WebhookEmitter {
    #[tracing::instrument(skip(self, event), fields(event = %event.kind))]
    async fn emit(&self, event: &Event) {
        info!("{}", event.kind);
        if self.urls.is_empty() {
            return;
        }

        let body = event.to_json();
        let deliveries = self.urls.iter().map(|url| {
            let body = &body;
            async move { (url, self.http_client.post(url, body, self.timeout).await) }
        });
        for (url, outcome) in join_all(deliveries).await {
            match outcome {
                CallOutcome::Success(()) => debug!("Delivered {} to {}", event.kind, url),
                other => warn!("Dropping {} for {}: {}", event.kind, url, other),
            }
        }
    }
}

/// Collects events in memory.
#[cfg(test)]
#[derive(Default)]
pub struct RecordingSink {
    pub events: std::sync::Mutex<Vec<Event>>,
}

#[cfg(test)]
impl RecordingSink {
    pub fn names(&self) -> Vec<&'static str> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.kind.name())
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for RecordingSink {
    async fn emit(&self, event: &Event) {
        self.events.lock().unwrap().push(event.clone());
    }
}
