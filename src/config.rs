//! # Monitor Configuration
//!
//! [`MonitorConfig`] carries every tunable of the sampler, aggregator and
//! watchdog. Most values are constants in practice; the three an operator
//! edits (profiling mode, start delay, output directory) live in
//! [`Settings`], which validates input at the edge and keeps the last valid
//! value when given garbage.

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{Result, WatchdogError};
use crate::metrics::AggregatorConfig;
use crate::profiler::CaptureMode;
use crate::utils::{default_output_dir, validate_start_delay_secs};

/// When freeze-triggered profiling is allowed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ProfilingMode {
    /// Never start a capture
    #[clap(name = "off")]
    Off,

    /// Profile any freeze from startup on
    #[clap(name = "always")]
    AlwaysOn,

    /// Profile only after the readiness signal has fired
    #[clap(name = "gated")]
    GatedOnReadiness,
}

impl std::fmt::Display for ProfilingMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProfilingMode::Off => write!(f, "Off"),
            ProfilingMode::AlwaysOn => write!(f, "Always On"),
            ProfilingMode::GatedOnReadiness => write!(f, "Gated On Readiness"),
        }
    }
}

/// What to do with a capture still running when the watchdog shuts down.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum, Serialize, Deserialize)]
pub enum ShutdownPolicy {
    /// Leave the capture running
    #[clap(name = "abandon")]
    Abandon,

    /// Stop, save and report the capture before exiting
    #[clap(name = "stop-and-save")]
    StopAndSave,
}

/// Complete runtime configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MonitorConfig {
    pub sample_period: Duration,
    pub window_duration: Duration,
    pub reservoir_capacity: usize,
    pub publish_period: Duration,
    pub watchdog_tick: Duration,
    /// Latency at or above which the UI counts as unhealthy.
    pub high_latency_threshold: Duration,
    /// Continuous healthy time required to end a capture.
    pub recovery_window: Duration,
    pub start_delay: Duration,
    pub profiling_mode: ProfilingMode,
    pub capture_mode: CaptureMode,
    pub output_dir: PathBuf,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        use crate::defaults;
        Self {
            sample_period: defaults::SAMPLE_PERIOD,
            window_duration: defaults::WINDOW_DURATION,
            reservoir_capacity: defaults::RESERVOIR_CAPACITY,
            publish_period: defaults::PUBLISH_PERIOD,
            watchdog_tick: defaults::WATCHDOG_TICK,
            high_latency_threshold: defaults::HIGH_LATENCY_THRESHOLD,
            recovery_window: defaults::RECOVERY_WINDOW,
            start_delay: Duration::from_secs(defaults::START_DELAY_SECS),
            profiling_mode: ProfilingMode::AlwaysOn,
            capture_mode: CaptureMode::Sampling,
            output_dir: default_output_dir(),
            shutdown_policy: ShutdownPolicy::Abandon,
        }
    }
}

impl MonitorConfig {
    pub fn validate(&self) -> Result<()> {
        let periods = [
            ("sample period", self.sample_period),
            ("window duration", self.window_duration),
            ("publish period", self.publish_period),
            ("watchdog tick", self.watchdog_tick),
            ("high latency threshold", self.high_latency_threshold),
            ("recovery window", self.recovery_window),
        ];
        for (name, value) in periods {
            if value.is_zero() {
                return Err(WatchdogError::InvalidConfig(format!(
                    "{} must be greater than zero",
                    name
                )));
            }
        }
        if self.reservoir_capacity == 0 {
            return Err(WatchdogError::InvalidConfig(
                "reservoir capacity must be greater than zero".into(),
            ));
        }
        if self.start_delay < Duration::from_secs(1) {
            return Err(WatchdogError::InvalidConfig(
                "start delay must be at least 1 second".into(),
            ));
        }
        Ok(())
    }

    pub fn aggregator_config(&self) -> AggregatorConfig {
        AggregatorConfig {
            window_duration: self.window_duration,
            reservoir_capacity: self.reservoir_capacity,
            publish_period: self.publish_period,
            reservoir_seed: None,
        }
    }

    /// Overlay operator settings onto this configuration.
    pub fn apply_settings(&mut self, settings: &Settings) {
        self.profiling_mode = settings.profiling_mode;
        self.start_delay = settings.start_delay();
        self.output_dir = settings.output_dir.clone();
    }

    pub fn settings(&self) -> Settings {
        Settings {
            profiling_mode: self.profiling_mode,
            start_delay_secs: self.start_delay.as_secs().max(1),
            output_dir: self.output_dir.clone(),
        }
    }
}

/// Operator-editable fields.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub profiling_mode: ProfilingMode,
    pub start_delay_secs: u64,
    pub output_dir: PathBuf,
}

impl Default for Settings {
    fn default() -> Self {
        MonitorConfig::default().settings()
    }
}

impl Settings {
    pub fn start_delay(&self) -> Duration {
        Duration::from_secs(self.start_delay_secs)
    }

    /// Apply a raw start-delay value. Invalid input is rejected and the
    /// previous value kept.
    pub fn apply_start_delay(&mut self, raw: &str) -> Result<()> {
        let parsed = raw.trim().parse::<u64>().map_err(|_| {
            WatchdogError::InvalidConfig(format!("start delay '{}' is not a whole number", raw))
        });
        match parsed.and_then(|secs| validate_start_delay_secs(secs).map(|_| secs)) {
            Ok(secs) => {
                self.start_delay_secs = secs;
                Ok(())
            }
            Err(e) => {
                warn!(
                    "Rejected start delay '{}', keeping {}s: {}",
                    raw, self.start_delay_secs, e
                );
                Err(e)
            }
        }
    }

    /// Apply a raw profiling-mode value (`off`, `always`, `gated`).
    pub fn apply_mode(&mut self, raw: &str) -> Result<()> {
        match ProfilingMode::from_str(raw.trim(), true) {
            Ok(mode) => {
                self.profiling_mode = mode;
                Ok(())
            }
            Err(_) => {
                warn!(
                    "Rejected profiling mode '{}', keeping {}",
                    raw, self.profiling_mode
                );
                Err(WatchdogError::InvalidConfig(format!(
                    "unknown profiling mode '{}'",
                    raw
                )))
            }
        }
    }

    /// Apply a raw output directory. Empty input restores the default.
    pub fn apply_output_dir(&mut self, raw: &str) {
        let raw = raw.trim();
        self.output_dir = if raw.is_empty() {
            default_output_dir()
        } else {
            PathBuf::from(raw)
        };
    }

    /// Load settings from a JSON file. Fields that fail validation fall
    /// back to their defaults.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let mut settings: Settings = serde_json::from_str(&text)?;
        if validate_start_delay_secs(settings.start_delay_secs).is_err() {
            warn!(
                "Settings file {:?} has invalid start delay {}; using default",
                path, settings.start_delay_secs
            );
            settings.start_delay_secs = crate::defaults::START_DELAY_SECS;
        }
        debug!("Loaded settings from {:?}: {:?}", path, settings);
        Ok(settings)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}
