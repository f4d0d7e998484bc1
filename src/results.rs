use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::config::MonitorConfig;
use crate::metrics::MetricsSnapshot;
use crate::utils::generate_session_id;
use crate::watchdog::FreezeEpisode;

/// Complete record of one monitoring session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub metadata: SessionMetadata,
    pub config: MonitorConfig,
    pub final_snapshot: MetricsSnapshot,
    pub episodes: Vec<FreezeEpisode>,
    pub summary: SessionSummary,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    pub session_id: String,
    pub version: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub os: String,
    pub architecture: String,
}

/// Freeze totals across the session.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub freezes: usize,
    pub captures_saved: usize,
    pub capture_failures: usize,
    pub longest_unresponsive_ms: f64,
    pub total_captured_ms: f64,
}

impl SessionSummary {
    pub fn from_episodes(episodes: &[FreezeEpisode]) -> Self {
        let mut summary = SessionSummary {
            freezes: episodes.len(),
            ..Default::default()
        };
        for episode in episodes {
            if episode.error.is_some() {
                summary.capture_failures += 1;
            } else {
                summary.captures_saved += 1;
            }
            summary.longest_unresponsive_ms =
                summary.longest_unresponsive_ms.max(episode.unresponsive_ms);
            summary.total_captured_ms += episode.captured_ms;
        }
        summary
    }
}

/// Writes the session report and, optionally, a live snapshot stream.
pub struct ResultsManager {
    session_id: String,
    started_at: DateTime<Utc>,
    report_file: PathBuf,
    stream: Option<BufWriter<File>>,
    snapshots_streamed: usize,
}

impl ResultsManager {
    pub fn new(report_file: &Path) -> Self {
        Self {
            session_id: generate_session_id(),
            started_at: Utc::now(),
            report_file: report_file.to_path_buf(),
            stream: None,
            snapshots_streamed: 0,
        }
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Stream every recorded snapshot to `path`, one JSON object per line.
    pub fn enable_streaming<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        ensure_parent(path)?;
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)
            .with_context(|| format!("failed to open snapshot stream {:?}", path))?;
        self.stream = Some(BufWriter::new(file));
        debug!("Streaming snapshots to {:?}", path);
        Ok(())
    }

    pub fn is_streaming(&self) -> bool {
        self.stream.is_some()
    }

    pub fn record_snapshot(&mut self, snapshot: &MetricsSnapshot) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            let line = StreamedSnapshot {
                timestamp: Utc::now(),
                snapshot,
            };
            serde_json::to_writer(&mut *stream, &line)?;
            writeln!(stream)?;
            stream.flush()?;
            self.snapshots_streamed += 1;
        }
        Ok(())
    }

    pub fn snapshots_streamed(&self) -> usize {
        self.snapshots_streamed
    }

    /// Close the stream and write the final report.
    pub fn finalize(
        &mut self,
        config: &MonitorConfig,
        final_snapshot: MetricsSnapshot,
        episodes: Vec<FreezeEpisode>,
    ) -> Result<SessionReport> {
        if let Some(mut stream) = self.stream.take() {
            stream.flush()?;
        }

        let report = SessionReport {
            metadata: SessionMetadata {
                session_id: self.session_id.clone(),
                version: crate::VERSION.to_string(),
                started_at: self.started_at,
                ended_at: Utc::now(),
                os: std::env::consts::OS.to_string(),
                architecture: std::env::consts::ARCH.to_string(),
            },
            config: config.clone(),
            final_snapshot,
            summary: SessionSummary::from_episodes(&episodes),
            episodes,
        };

        ensure_parent(&self.report_file)?;
        let json = serde_json::to_string_pretty(&report)?;
        std::fs::write(&self.report_file, json)
            .with_context(|| format!("failed to write report {:?}", self.report_file))?;

        info!("Session report written to: {:?}", self.report_file);
        Ok(report)
    }
}

#[derive(Serialize)]
struct StreamedSnapshot<'a> {
    timestamp: DateTime<Utc>,
    #[serde(flatten)]
    snapshot: &'a MetricsSnapshot,
}

fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("failed to create {:?}", parent))?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn episode(captured_ms: f64, error: Option<&str>) -> FreezeEpisode {
        FreezeEpisode {
            started_at: Utc::now(),
            unresponsive_ms: 3_200.0,
            captured_ms,
            artifact: error.is_none().then(|| PathBuf::from("/tmp/freeze-1.data")),
            error: error.map(str::to_string),
            warnings: Vec::new(),
        }
    }

    #[test]
    fn test_summary_from_episodes() {
        let summary = SessionSummary::from_episodes(&[
            episode(4_100.0, None),
            episode(0.0, Some("start failed: boom")),
        ]);
        assert_eq!(summary.freezes, 2);
        assert_eq!(summary.captures_saved, 1);
        assert_eq!(summary.capture_failures, 1);
        assert_eq!(summary.longest_unresponsive_ms, 3_200.0);
        assert_eq!(summary.total_captured_ms, 4_100.0);
    }

    #[test]
    fn test_finalize_writes_report() {
        let dir = TempDir::new().unwrap();
        let report_path = dir.path().join("out").join("report.json");
        let mut manager = ResultsManager::new(&report_path);

        let config = MonitorConfig::default();
        let report = manager
            .finalize(&config, MetricsSnapshot::default(), vec![episode(1_000.0, None)])
            .unwrap();
        assert_eq!(report.metadata.session_id, manager.session_id());

        let text = std::fs::read_to_string(&report_path).unwrap();
        let parsed: SessionReport = serde_json::from_str(&text).unwrap();
        assert_eq!(parsed.episodes.len(), 1);
        assert_eq!(parsed.summary.captures_saved, 1);
        assert_eq!(parsed.config.reservoir_capacity, config.reservoir_capacity);
    }

    #[test]
    fn test_snapshot_stream_is_json_lines() {
        let dir = TempDir::new().unwrap();
        let stream_path = dir.path().join("snapshots.jsonl");
        let mut manager = ResultsManager::new(&dir.path().join("report.json"));

        // Not streaming yet: recording is a no-op.
        manager.record_snapshot(&MetricsSnapshot::default()).unwrap();
        assert_eq!(manager.snapshots_streamed(), 0);

        manager.enable_streaming(&stream_path).unwrap();
        manager.record_snapshot(&MetricsSnapshot::default()).unwrap();
        manager.record_snapshot(&MetricsSnapshot::default()).unwrap();
        manager
            .finalize(&MonitorConfig::default(), MetricsSnapshot::default(), Vec::new())
            .unwrap();

        let text = std::fs::read_to_string(&stream_path).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        for line in lines {
            let value: serde_json::Value = serde_json::from_str(line).unwrap();
            assert!(value.get("timestamp").is_some());
            assert!(value.get("window").is_some());
            assert!(value.get("session").is_some());
        }
        assert!(!manager.is_streaming());
    }
}
