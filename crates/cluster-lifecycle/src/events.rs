//! Cluster events
//!
//! Events are a best-effort side channel: `Events` wraps the injected sink
//! and logs sink failures instead of returning them.

use crate::error::CollaboratorError;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;
use std::sync::{Arc, Mutex};
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Info,
    Warning,
    Error,
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Error => "error",
            Severity::Critical => "critical",
        };
        f.write_str(s)
    }
}

/// A user-facing event about a cluster or one of its hosts.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClusterEvent {
    pub cluster_id: Uuid,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host_id: Option<Uuid>,
    pub severity: Severity,
    /// Stable machine-readable name, e.g. `cluster_status_updated`
    pub name: &'static str,
    pub message: String,
    pub event_time: DateTime<Utc>,
}

impl ClusterEvent {
    pub fn new(cluster_id: Uuid, severity: Severity, name: &'static str, message: impl Into<String>) -> Self {
        Self {
            cluster_id,
            host_id: None,
            severity,
            name,
            message: message.into(),
            event_time: Utc::now(),
        }
    }

    #[must_use]
    pub fn for_host(mut self, host_id: Uuid) -> Self {
        self.host_id = Some(host_id);
        self
    }
}

/// Destination of cluster events
#[async_trait::async_trait]
pub trait EventSink: Send + Sync {
    async fn send(&self, event: ClusterEvent) -> Result<(), CollaboratorError>;
}

/// Writes events to the log
#[derive(Debug, Clone, Copy, Default)]
pub struct LogEventSink;

#[async_trait::async_trait]
impl EventSink for LogEventSink {
    async fn send(&self, event: ClusterEvent) -> Result<(), CollaboratorError> {
        info!(
            cluster_id = %event.cluster_id,
            host_id = ?event.host_id,
            severity = %event.severity,
            event = event.name,
            "{}",
            event.message
        );
        Ok(())
    }
}

/// Keeps events in memory for assertions
#[derive(Debug, Clone, Default)]
pub struct RecordingEventSink {
    events: Arc<Mutex<Vec<ClusterEvent>>>,
    fail: bool,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// A sink that rejects every event
    pub fn failing() -> Self {
        Self {
            events: Arc::default(),
            fail: true,
        }
    }

    pub fn events(&self) -> Vec<ClusterEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    pub fn names(&self) -> Vec<&'static str> {
        self.events().iter().map(|e| e.name).collect()
    }
}

#[async_trait::async_trait]
impl EventSink for RecordingEventSink {
    async fn send(&self, event: ClusterEvent) -> Result<(), CollaboratorError> {
        if self.fail {
            return Err(CollaboratorError::new("event sink unavailable"));
        }
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
        Ok(())
    }
}

/// Best-effort event emitter
#[derive(Clone)]
pub struct Events {
    sink: Arc<dyn EventSink>,
}

impl fmt::Debug for Events {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Events").finish_non_exhaustive()
    }
}

impl Events {
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    pub async fn emit(&self, event: ClusterEvent) {
        let name = event.name;
        let cluster_id = event.cluster_id;
        if let Err(e) = self.sink.send(event).await {
            warn!(cluster_id = %cluster_id, event = name, "Failed to send event: {}", e);
        }
    }

    pub async fn info(&self, cluster_id: Uuid, name: &'static str, message: impl Into<String>) {
        self.emit(ClusterEvent::new(cluster_id, Severity::Info, name, message)).await;
    }

    pub async fn warning(&self, cluster_id: Uuid, name: &'static str, message: impl Into<String>) {
        self.emit(ClusterEvent::new(cluster_id, Severity::Warning, name, message)).await;
    }

    pub async fn error(&self, cluster_id: Uuid, name: &'static str, message: impl Into<String>) {
        self.emit(ClusterEvent::new(cluster_id, Severity::Error, name, message)).await;
    }
}

impl Default for Events {
    fn default() -> Self {
        Self::new(Arc::new(LogEventSink))
    }
}
