//! Outbound notifications
//!
//! Components publish [`Notification`] records to an [`EventSink`] instead of
//! broadcasting. Delivery is fire-and-forget: a failed send is logged and the
//! engine operation still succeeds.

use crate::engine::clock::Clock;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use cloudevents::{Event, EventBuilder, EventBuilderV10};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Source attribute on every notification
pub const EVENT_SOURCE: &str = "luova";

#[derive(Debug, Error)]
pub enum EventError {
    #[error("failed to serialize payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("failed to build CloudEvent: {0}")]
    Build(String),

    #[error("HTTP POST failed: {0}")]
    Http(String),

    #[error("notification queue is full")]
    QueueFull,

    #[error("notification queue is closed")]
    QueueClosed,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum EventType {
    #[serde(rename = "fatigue.detected")]
    FatigueDetected,
    #[serde(rename = "experiment.started")]
    ExperimentStarted,
    #[serde(rename = "experiment.completed")]
    ExperimentCompleted,
    #[serde(rename = "experiment.winner_implemented")]
    WinnerImplemented,
    #[serde(rename = "selection.winner_selected")]
    WinnerSelected,
    #[serde(rename = "selection.rollback_required")]
    RollbackRequired,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::FatigueDetected => "fatigue.detected",
            EventType::ExperimentStarted => "experiment.started",
            EventType::ExperimentCompleted => "experiment.completed",
            EventType::WinnerImplemented => "experiment.winner_implemented",
            EventType::WinnerSelected => "selection.winner_selected",
            EventType::RollbackRequired => "selection.rollback_required",
        }
    }
}

/// Severity levels
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        }
    }
}

/// Structured event for the alerting/report pipeline
///
/// `data` is the full data-model record the event is about.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Notification {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub source: String,
    #[serde(rename = "type")]
    pub event_type: EventType,
    pub severity: Severity,
    /// Id of the creative, experiment or selection the event concerns
    pub subject: String,
    pub data: serde_json::Value,
}

impl Notification {
    pub fn new(
        clock: &dyn Clock,
        event_type: EventType,
        severity: Severity,
        subject: impl Into<String>,
        record: &impl Serialize,
    ) -> Result<Self, EventError> {
        Ok(Notification {
            id: ulid::Ulid::new().to_string(),
            timestamp: clock.now(),
            source: EVENT_SOURCE.to_string(),
            event_type,
            severity,
            subject: subject.into(),
            data: serde_json::to_value(record)?,
        })
    }

    /// CloudEvents v1.0 envelope for HTTP delivery
    pub fn to_cloud_event(&self) -> Result<Event, EventError> {
        EventBuilderV10::new()
            .id(self.id.clone())
            .ty(format!("io.luova.{}", self.event_type.as_str()))
            .source(format!("https://luova.io/{}", self.source))
            .subject(self.subject.clone())
            .time(self.timestamp)
            .extension("severity", self.severity.as_str())
            .data("application/json", self.data.clone())
            .build()
            .map_err(|e| EventError::Build(e.to_string()))
    }
}

/// Trait for delivering notifications
///
/// Production code uses `HttpEventSink` or `ChannelEventSink`.
/// Tests use `MockEventSink` which stores notifications in memory for assertions.
#[async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, notification: &Notification) -> Result<(), EventError>;
}

/// Sink that POSTs CloudEvents to an HTTP endpoint
pub struct HttpEventSink {
    enabled: bool,
    sink_url: Option<String>,
    client: reqwest::Client,
}

impl HttpEventSink {
    /// Disabled sinks and sinks without a URL accept and drop every event
    pub fn new(enabled: bool, sink_url: Option<String>) -> Self {
        HttpEventSink {
            enabled,
            sink_url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_active(&self) -> bool {
        self.enabled && self.sink_url.is_some()
    }
}

#[async_trait]
impl EventSink for HttpEventSink {
    async fn send(&self, notification: &Notification) -> Result<(), EventError> {
        if !self.enabled {
            return Ok(());
        }

        let Some(url) = &self.sink_url else {
            return Ok(());
        };

        let event = notification.to_cloud_event()?;
        let response = self
            .client
            .post(url)
            .header("Content-Type", "application/cloudevents+json")
            .json(&event)
            .send()
            .await
            .map_err(|e| EventError::Http(e.to_string()))?;

        if !response.status().is_success() {
            return Err(EventError::Http(format!(
                "sink returned status {}",
                response.status()
            )));
        }

        Ok(())
    }
}

/// Sink that pushes notifications onto an explicit outbound queue
pub struct ChannelEventSink {
    sender: mpsc::Sender<Notification>,
}

impl ChannelEventSink {
    /// Create a bounded queue; the receiver belongs to the consumer
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Notification>) {
        let (sender, receiver) = mpsc::channel(capacity);
        (ChannelEventSink { sender }, receiver)
    }
}

#[async_trait]
impl EventSink for ChannelEventSink {
    async fn send(&self, notification: &Notification) -> Result<(), EventError> {
        self.sender
            .try_send(notification.clone())
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => EventError::QueueFull,
                mpsc::error::TrySendError::Closed(_) => EventError::QueueClosed,
            })
    }
}

/// Sink that drops everything
pub struct NoopEventSink;

#[async_trait]
impl EventSink for NoopEventSink {
    async fn send(&self, _notification: &Notification) -> Result<(), EventError> {
        Ok(())
    }
}

/// Mock event sink for testing - stores notifications in memory
#[cfg(test)]
#[derive(Clone, Default)]
pub struct MockEventSink {
    events: std::sync::Arc<std::sync::Mutex<Vec<Notification>>>,
}

#[cfg(test)]
impl MockEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::unwrap_used)]
    pub fn get_emitted_events(&self) -> Vec<Notification> {
        self.events.lock().unwrap().clone()
    }

    pub fn events_of(&self, event_type: EventType) -> Vec<Notification> {
        self.get_emitted_events()
            .into_iter()
            .filter(|n| n.event_type == event_type)
            .collect()
    }
}

#[cfg(test)]
#[async_trait]
impl EventSink for MockEventSink {
    async fn send(&self, notification: &Notification) -> Result<(), EventError> {
        #[allow(clippy::unwrap_used)]
        self.events.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

/// Build and deliver a notification, logging instead of failing
pub async fn publish(
    sink: &dyn EventSink,
    clock: &dyn Clock,
    event_type: EventType,
    severity: Severity,
    subject: &str,
    record: &impl Serialize,
) {
    let notification = match Notification::new(clock, event_type, severity, subject, record) {
        Ok(n) => n,
        Err(e) => {
            warn!(event_type = event_type.as_str(), subject = %subject, error = %e, "Failed to build notification");
            return;
        }
    };

    match sink.send(&notification).await {
        Ok(()) => {
            debug!(event_type = event_type.as_str(), subject = %subject, id = %notification.id, "Notification emitted")
        }
        Err(e) => {
            warn!(event_type = event_type.as_str(), subject = %subject, error = %e, "Failed to emit notification")
        }
    }
}
