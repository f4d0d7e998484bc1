//! # Freeze Watchdog Library
//!
//! Measures the responsiveness of a UI (owning) thread and automatically
//! profiles the application while that thread is frozen.
//!
//! ## Architecture Overview
//!
//! ```text
//!   sampler ──post──► owning thread ──on_sample──► metrics aggregator ──► snapshots
//!                                                        │
//!                                  last_sample_ticks ◄───┤ listeners
//!                                                        ▼
//!                                                 freeze watchdog ──► profiling backend
//! ```
//!
//! - `sampler`: posts timestamped probes to the owning thread and reports
//!   how long each waited in its queue
//! - `metrics`: sliding-window and session statistics over those latencies
//! - `watchdog`: `Idle`/`Profiling` state machine that starts a capture after
//!   a sustained freeze and stops it once the thread has recovered
//! - `profiler`: the backend abstraction plus a command-line profiler backend
//! - `executor`: owning-thread executors (a real queue thread and a manual
//!   one for tests)
//! - `events`: broadcast channels for snapshots, status text and saved artifacts
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use freeze_watchdog::{
//!     EventHub, FreezeWatchdog, MainThreadQueue, MetricsAggregator, MonitorConfig,
//!     MonotonicClock, NullProfiler, Sampler, WatchdogConfig,
//! };
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = MonitorConfig::default();
//!     let clock = Arc::new(MonotonicClock::new());
//!     let ui = MainThreadQueue::spawn("ui")?;
//!
//!     let aggregator = Arc::new(MetricsAggregator::new(
//!         config.aggregator_config(),
//!         clock.clone(),
//!         EventHub::new(),
//!     ));
//!     aggregator.start()?;
//!
//!     let mut sampler = Sampler::new(config.sample_period, clock.clone(), aggregator.clone());
//!     sampler.start(Arc::new(ui.handle()))?;
//!
//!     let mut watchdog = FreezeWatchdog::new(
//!         WatchdogConfig::from(&config),
//!         &config.settings(),
//!         clock,
//!         aggregator.clone(),
//!         Box::new(NullProfiler),
//!     );
//!     watchdog.start(None)?;
//!
//!     tokio::time::sleep(std::time::Duration::from_secs(10)).await;
//!     println!("{:?}", aggregator.snapshot());
//!
//!     sampler.stop().await;
//!     watchdog.stop().await;
//!     aggregator.stop().await;
//!     ui.shutdown();
//!     Ok(())
//! }
//! ```

/// Command-line interface
///
/// Argument parsing using clap, with human-readable durations ("200ms",
/// "5s") and conversion into a [`MonitorConfig`].
pub mod cli;

pub mod clock;

/// Monitor configuration and operator settings
pub mod config;

pub mod error;
pub mod events;
pub mod executor;
pub mod logging;

/// Latency statistics
///
/// Exact percentiles over a trailing time window and reservoir-sampled
/// percentiles over the whole session, with threshold counters.
pub mod metrics;

pub mod profiler;

/// Session report output and snapshot streaming
pub mod results;

pub mod sampler;
pub mod shutdown;
pub mod utils;

/// Freeze detection and profiling control
pub mod watchdog;

pub use clock::{Clock, ManualClock, MonotonicClock};
pub use config::{MonitorConfig, ProfilingMode, Settings, ShutdownPolicy};
pub use error::{Result, WatchdogError};
pub use events::{ArtifactSaved, EventHub};
pub use executor::{MainThreadQueue, ManualExecutor, OwningThreadExecutor};
pub use metrics::{MetricsAggregator, MetricsSnapshot, Sample, SampleListener};
pub use profiler::{CaptureConfig, CaptureMode, CommandProfiler, NullProfiler, ProfilingBackend};
pub use results::{ResultsManager, SessionReport};
pub use sampler::{SampleSink, Sampler};
pub use watchdog::{FreezeEpisode, FreezeState, FreezeWatchdog, ReadinessSignal, WatchdogConfig};

/// The current version of the freeze watchdog
///
/// Populated from Cargo.toml and recorded in every session report.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Default configuration values
pub mod defaults {
    use std::time::Duration;

    /// Interval between responsiveness probes.
    ///
    /// 20 ms is just over one frame at 60 Hz: fine enough to see a dropped
    /// frame, coarse enough that probing costs nothing measurable.
    pub const SAMPLE_PERIOD: Duration = Duration::from_millis(20);

    /// Trailing window for "current" latency statistics.
    pub const WINDOW_DURATION: Duration = Duration::from_secs(5);

    /// Session reservoir size; bounds memory for arbitrarily long sessions.
    pub const RESERVOIR_CAPACITY: usize = 10_000;

    /// Interval between pushed metrics snapshots.
    pub const PUBLISH_PERIOD: Duration = Duration::from_secs(1);

    /// Watchdog evaluation period.
    pub const WATCHDOG_TICK: Duration = Duration::from_millis(200);

    /// Latency at or above which the UI counts as unhealthy.
    pub const HIGH_LATENCY_THRESHOLD: Duration = Duration::from_millis(100);

    /// Continuous healthy time required to end a capture.
    pub const RECOVERY_WINDOW: Duration = Duration::from_secs(1);

    /// Seconds of unresponsiveness before a capture starts.
    pub const START_DELAY_SECS: u64 = 3;

    /// Default session report file.
    pub const REPORT_FILE: &str = "freeze_report.json";
}
