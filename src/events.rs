//! One-to-many notifications for the surrounding UI code.
//!
//! Each event kind is a tokio `broadcast` channel. Publishing never blocks
//! and never fails: with no subscribers the event is dropped, and a slow
//! subscriber only loses its own oldest events.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::metrics::MetricsSnapshot;
use crate::utils::format_capture_duration;

const EVENT_CAPACITY: usize = 64;

/// Payload of the artifact-saved event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSaved {
    pub path: Option<PathBuf>,
    pub duration: Duration,
}

impl fmt::Display for ArtifactSaved {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self
            .path
            .as_ref()
            .and_then(|p| p.file_name())
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "<unknown artifact>".to_string());
        write!(f, "{} ({})", name, format_capture_duration(self.duration))
    }
}

#[derive(Clone)]
pub struct EventHub {
    snapshots: broadcast::Sender<MetricsSnapshot>,
    status: broadcast::Sender<String>,
    artifacts: broadcast::Sender<ArtifactSaved>,
}

impl EventHub {
    pub fn new() -> Self {
        let (snapshots, _) = broadcast::channel(EVENT_CAPACITY);
        let (status, _) = broadcast::channel(EVENT_CAPACITY);
        let (artifacts, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            snapshots,
            status,
            artifacts,
        }
    }

    pub fn subscribe_snapshots(&self) -> broadcast::Receiver<MetricsSnapshot> {
        self.snapshots.subscribe()
    }

    pub fn subscribe_status(&self) -> broadcast::Receiver<String> {
        self.status.subscribe()
    }

    pub fn subscribe_artifacts(&self) -> broadcast::Receiver<ArtifactSaved> {
        self.artifacts.subscribe()
    }

    pub fn publish_snapshot(&self, snapshot: MetricsSnapshot) {
        let _ = self.snapshots.send(snapshot);
    }

    pub fn publish_status(&self, message: impl Into<String>) {
        let _ = self.status.send(message.into());
    }

    pub fn publish_artifact(&self, artifact: ArtifactSaved) {
        let _ = self.artifacts.send(artifact);
    }
}

impl Default for EventHub {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_status() {
        let hub = EventHub::new();
        let mut a = hub.subscribe_status();
        let mut b = hub.subscribe_status();
        hub.publish_status("Profiling started");
        assert_eq!(a.recv().await.unwrap(), "Profiling started");
        assert_eq!(b.recv().await.unwrap(), "Profiling started");
    }

    #[test]
    fn test_publish_without_subscribers_is_silent() {
        let hub = EventHub::new();
        hub.publish_status("nobody listening");
        hub.publish_snapshot(MetricsSnapshot::default());
    }

    #[test]
    fn test_artifact_display() {
        let saved = ArtifactSaved {
            path: Some(PathBuf::from("/tmp/captures/freeze-1.data")),
            duration: Duration::from_millis(4100),
        };
        assert_eq!(saved.to_string(), "freeze-1.data (4.1s)");

        let unknown = ArtifactSaved {
            path: None,
            duration: Duration::from_secs(2),
        };
        assert_eq!(unknown.to_string(), "<unknown artifact> (2.0s)");
    }
}
