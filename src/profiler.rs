//! Profiling backend abstraction.
//!
//! The watchdog drives a capture through five opaque operations plus an
//! artifact lookup. The artifact format belongs to the backend; the
//! watchdog only reports the newest file it finds in the capture directory.

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::process::{Child, Command};
use tracing::{debug, info, warn};

use crate::shutdown::ShutdownSignal;

/// What the backend should record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum CaptureMode {
    /// Periodic stack sampling
    #[clap(name = "sampling")]
    Sampling,

    /// Full event timeline
    #[clap(name = "timeline")]
    Timeline,
}

impl std::fmt::Display for CaptureMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureMode::Sampling => write!(f, "sampling"),
            CaptureMode::Timeline => write!(f, "timeline"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptureConfig {
    pub capture_dir: PathBuf,
    pub mode: CaptureMode,
}

/// Progress callback for [`ProfilingBackend::initialize`], in percent.
pub type ProgressFn<'a> = &'a (dyn Fn(u8) + Send + Sync);

/// External profiler driven by the freeze watchdog.
///
/// The watchdog owns its backend and calls it from a single task, so
/// implementations may keep per-capture state behind `&mut self`.
#[async_trait]
pub trait ProfilingBackend: Send {
    /// One-time, possibly slow setup. Should return promptly once `cancel` fires.
    async fn initialize(&mut self, cancel: ShutdownSignal, progress: ProgressFn<'_>) -> Result<()>;

    async fn attach(&mut self, config: &CaptureConfig) -> Result<()>;

    async fn start_collecting(&mut self) -> Result<()>;

    /// Stop collecting and flush the capture to disk.
    async fn save_data(&mut self) -> Result<()>;

    async fn detach(&mut self) -> Result<()>;

    /// Most recently written artifact in `dir`.
    async fn latest_artifact(&mut self, dir: &Path) -> Result<Option<PathBuf>> {
        latest_artifact(dir).await
    }

    fn name(&self) -> &'static str;
}

/// Newest regular file in `dir` by modification time. `None` for an empty
/// or missing directory.
pub async fn latest_artifact(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e).with_context(|| format!("failed to list {:?}", dir)),
    };

    let mut newest: Option<(SystemTime, PathBuf)> = None;
    while let Some(entry) = entries.next_entry().await? {
        let metadata = entry.metadata().await?;
        if !metadata.is_file() {
            continue;
        }
        let modified = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        match &newest {
            Some((best, _)) if *best >= modified => {}
            _ => newest = Some((modified, entry.path())),
        }
    }
    Ok(newest.map(|(_, path)| path))
}

/// Backend that accepts every call and records nothing.
#[derive(Debug, Default)]
pub struct NullProfiler;

#[async_trait]
impl ProfilingBackend for NullProfiler {
    async fn initialize(&mut self, _cancel: ShutdownSignal, progress: ProgressFn<'_>) -> Result<()> {
        progress(100);
        Ok(())
    }

    async fn attach(&mut self, config: &CaptureConfig) -> Result<()> {
        debug!("Null profiler attach ({} into {:?})", config.mode, config.capture_dir);
        Ok(())
    }

    async fn start_collecting(&mut self) -> Result<()> {
        Ok(())
    }

    async fn save_data(&mut self) -> Result<()> {
        Ok(())
    }

    async fn detach(&mut self) -> Result<()> {
        Ok(())
    }

    async fn latest_artifact(&mut self, _dir: &Path) -> Result<Option<PathBuf>> {
        Ok(None)
    }

    fn name(&self) -> &'static str {
        "null"
    }
}

/// Backend that runs an external profiler command for the duration of a capture.
///
/// The command template is split on whitespace; `{output}` is replaced by
/// the capture file path, `{pid}` by the target process id and `{mode}` by
/// the capture mode. Saving interrupts the command (SIGINT on unix) and
/// waits for it to flush and exit.
pub struct CommandProfiler {
    template: Vec<String>,
    target_pid: u32,
    pending: Option<Vec<String>>,
    child: Option<Child>,
}

impl CommandProfiler {
    pub fn new(template: &str, target_pid: u32) -> Result<Self> {
        let template: Vec<String> = template.split_whitespace().map(str::to_string).collect();
        if template.is_empty() {
            bail!("profiler command cannot be empty");
        }
        Ok(Self {
            template,
            target_pid,
            pending: None,
            child: None,
        })
    }

    fn expand(&self, output: &Path, mode: CaptureMode) -> Vec<String> {
        let output = output.to_string_lossy();
        let pid = self.target_pid.to_string();
        let mode = mode.to_string();
        self.template
            .iter()
            .map(|arg| {
                arg.replace("{output}", &output)
                    .replace("{pid}", &pid)
                    .replace("{mode}", &mode)
            })
            .collect()
    }

    fn capture_file_name() -> String {
        format!(
            "freeze-{}.data",
            chrono::Local::now().format("%Y%m%d-%H%M%S%.3f")
        )
    }

    fn interrupt(child: &mut Child) -> Result<()> {
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = child.id() {
                kill(Pid::from_raw(pid as i32), Signal::SIGINT)
                    .map_err(|e| anyhow!("failed to interrupt profiler: {}", e))?;
                return Ok(());
            }
            Ok(())
        }
        #[cfg(not(unix))]
        {
            child.start_kill().context("failed to stop profiler")
        }
    }
}

#[async_trait]
impl ProfilingBackend for CommandProfiler {
    async fn initialize(&mut self, _cancel: ShutdownSignal, progress: ProgressFn<'_>) -> Result<()> {
        progress(0);
        let program = &self.template[0];
        debug!("Profiler command: {}", program);
        progress(100);
        Ok(())
    }

    async fn attach(&mut self, config: &CaptureConfig) -> Result<()> {
        if self.child.is_some() {
            bail!("a capture is already running");
        }
        tokio::fs::create_dir_all(&config.capture_dir)
            .await
            .with_context(|| format!("failed to create {:?}", config.capture_dir))?;
        let output = config.capture_dir.join(Self::capture_file_name());
        self.pending = Some(self.expand(&output, config.mode));
        Ok(())
    }

    async fn start_collecting(&mut self) -> Result<()> {
        let argv = self
            .pending
            .take()
            .ok_or_else(|| anyhow!("start_collecting called before attach"))?;
        let child = Command::new(&argv[0])
            .args(&argv[1..])
            .stdin(std::process::Stdio::null())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("failed to launch profiler '{}'", argv[0]))?;
        info!("Profiler process started (pid {:?})", child.id());
        self.child = Some(child);
        Ok(())
    }

    async fn save_data(&mut self) -> Result<()> {
        let mut child = self
            .child
            .take()
            .ok_or_else(|| anyhow!("no capture is running"))?;
        Self::interrupt(&mut child)?;
        let status = child.wait().await.context("failed to wait for profiler")?;
        match status.code() {
            Some(code) if code != 0 => bail!("profiler exited with status {}", code),
            _ => Ok(()),
        }
    }

    async fn detach(&mut self) -> Result<()> {
        self.pending = None;
        if let Some(mut child) = self.child.take() {
            warn!("Detaching while the profiler is still running; killing it");
            child.kill().await.context("failed to kill profiler")?;
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "command"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_latest_artifact_picks_newest_file() {
        let dir = TempDir::new().unwrap();
        assert_eq!(latest_artifact(dir.path()).await.unwrap(), None);

        std::fs::write(dir.path().join("old.data"), b"a").unwrap();
        std::thread::sleep(Duration::from_millis(20));
        std::fs::create_dir(dir.path().join("subdir")).unwrap();
        std::fs::write(dir.path().join("new.data"), b"b").unwrap();

        let newest = latest_artifact(dir.path()).await.unwrap().unwrap();
        assert_eq!(newest.file_name().unwrap(), "new.data");
    }

    #[tokio::test]
    async fn test_latest_artifact_missing_dir() {
        let dir = TempDir::new().unwrap();
        let missing = dir.path().join("nope");
        assert_eq!(latest_artifact(&missing).await.unwrap(), None);
    }

    #[test]
    fn test_command_template_expansion() {
        let profiler = CommandProfiler::new("perf record -p {pid} -o {output} --{mode}", 42).unwrap();
        let argv = profiler.expand(Path::new("/tmp/x.data"), CaptureMode::Sampling);
        assert_eq!(
            argv,
            vec!["perf", "record", "-p", "42", "-o", "/tmp/x.data", "--sampling"]
        );
        assert!(CommandProfiler::new("   ", 1).is_err());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_profiler_capture_cycle() {
        let dir = TempDir::new().unwrap();
        let mut profiler = CommandProfiler::new("sleep 30", std::process::id()).unwrap();

        let config = CaptureConfig {
            capture_dir: dir.path().join("captures"),
            mode: CaptureMode::Sampling,
        };
        assert!(profiler.start_collecting().await.is_err());
        profiler.attach(&config).await.unwrap();
        assert!(config.capture_dir.is_dir());
        profiler.start_collecting().await.unwrap();
        // sleep terminates on SIGINT; killed-by-signal is not a save failure.
        profiler.save_data().await.unwrap();
        profiler.detach().await.unwrap();
        assert!(profiler.save_data().await.is_err());
    }
}
