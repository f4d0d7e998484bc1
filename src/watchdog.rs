//! # Freeze Watchdog
//!
//! A periodic loop, independent of the sampler's cadence, that decides when
//! to start and stop an external profiling capture.
//!
//! ## State Machine
//!
//! ```text
//!            time since last sample >= start delay
//!            (mode on, gate open, sample after gate open)
//!   ┌──────┐ ─────────────────────────────────────────► ┌───────────┐
//!   │ Idle │                                            │ Profiling │
//!   └──────┘ ◄───────────────────────────────────────── └───────────┘
//!            no high latency seen for the recovery window
//! ```
//!
//! "High latency" is refreshed from two places: the watchdog tick itself
//! while no probe has completed for longer than the threshold (an ongoing
//! stall), and the aggregator's sample listener whenever a completed probe
//! reports a latency at or above the threshold. Both write the same atomic
//! high-water mark.
//!
//! Backend failures never end the loop. A failed start falls back to
//! `Idle`; a failed save still returns to `Idle`. Both are reported on the
//! status channel.

use anyhow::Result as AnyResult;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::clock::{duration_to_ticks, ticks_to_duration, Clock};
use crate::config::{MonitorConfig, ProfilingMode, Settings, ShutdownPolicy};
use crate::error::{Result, WatchdogError};
use crate::events::{ArtifactSaved, EventHub};
use crate::metrics::{MetricsAggregator, Sample, SampleListener};
use crate::profiler::{CaptureConfig, CaptureMode, ProfilingBackend};
use crate::shutdown::{LoopHandle, ShutdownSignal};
use crate::utils::{create_progress_indicator, format_capture_duration};

const COMPONENT: &str = "freeze watchdog";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FreezeState {
    Idle,
    Profiling,
}

impl FreezeState {
    fn from_u8(value: u8) -> Self {
        if value == 1 {
            FreezeState::Profiling
        } else {
            FreezeState::Idle
        }
    }

    fn as_u8(self) -> u8 {
        match self {
            FreezeState::Idle => 0,
            FreezeState::Profiling => 1,
        }
    }
}

/// Fixed watchdog parameters.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub tick_period: Duration,
    pub high_latency_threshold: Duration,
    pub recovery_window: Duration,
    pub capture_mode: CaptureMode,
    pub shutdown_policy: ShutdownPolicy,
}

impl Default for WatchdogConfig {
    fn default() -> Self {
        Self {
            tick_period: crate::defaults::WATCHDOG_TICK,
            high_latency_threshold: crate::defaults::HIGH_LATENCY_THRESHOLD,
            recovery_window: crate::defaults::RECOVERY_WINDOW,
            capture_mode: CaptureMode::Sampling,
            shutdown_policy: ShutdownPolicy::Abandon,
        }
    }
}

impl From<&MonitorConfig> for WatchdogConfig {
    fn from(config: &MonitorConfig) -> Self {
        Self {
            tick_period: config.watchdog_tick,
            high_latency_threshold: config.high_latency_threshold,
            recovery_window: config.recovery_window,
            capture_mode: config.capture_mode,
            shutdown_policy: config.shutdown_policy,
        }
    }
}

/// One-shot readiness event (e.g. "workspace fully loaded").
#[derive(Clone, Debug)]
pub struct ReadinessSignal {
    sender: Arc<watch::Sender<bool>>,
}

impl ReadinessSignal {
    pub fn new() -> Self {
        let (sender, _) = watch::channel(false);
        Self {
            sender: Arc::new(sender),
        }
    }

    /// Fire the event. Later calls have no further effect.
    pub fn fire(&self) {
        self.sender.send_replace(true);
    }

    pub fn is_ready(&self) -> bool {
        *self.sender.borrow()
    }

    fn subscribe(&self) -> watch::Receiver<bool> {
        self.sender.subscribe()
    }
}

impl Default for ReadinessSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// Gate state: written once by the readiness listener, read by the loop.
#[derive(Debug, Default)]
pub struct ReadinessGate {
    open: AtomicBool,
    opened_at_ticks: AtomicU64,
}

impl ReadinessGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Open the gate at `now_ticks`. Only the first call takes effect.
    pub fn open_at(&self, now_ticks: u64) -> bool {
        if self.open.load(Ordering::Acquire) {
            return false;
        }
        self.opened_at_ticks.store(now_ticks, Ordering::Release);
        !self.open.swap(true, Ordering::AcqRel)
    }

    pub fn opened_at(&self) -> Option<u64> {
        if self.open.load(Ordering::Acquire) {
            Some(self.opened_at_ticks.load(Ordering::Acquire))
        } else {
            None
        }
    }
}

/// "When was the UI last known to be unhealthy", as a lock-free high-water mark.
#[derive(Debug)]
pub struct HighLatencyTracker {
    threshold_ms: f64,
    last_high_ticks: AtomicU64,
}

impl HighLatencyTracker {
    pub fn new(threshold: Duration) -> Self {
        Self {
            threshold_ms: threshold.as_secs_f64() * 1000.0,
            last_high_ticks: AtomicU64::new(0),
        }
    }

    pub fn stamp(&self, now_ticks: u64) {
        self.last_high_ticks.fetch_max(now_ticks, Ordering::AcqRel);
    }

    pub fn last_high_ticks(&self) -> u64 {
        self.last_high_ticks.load(Ordering::Acquire)
    }
}

impl SampleListener for HighLatencyTracker {
    fn on_sample(&self, sample: Sample) {
        if sample.latency_ms >= self.threshold_ms {
            self.stamp(sample.timestamp_ticks);
        }
    }
}

/// Operator settings as the loop sees them, refreshed every tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub mode: ProfilingMode,
    pub start_delay: Duration,
    pub output_dir: PathBuf,
}

impl From<&Settings> for RuntimeSettings {
    fn from(settings: &Settings) -> Self {
        Self {
            mode: settings.profiling_mode,
            start_delay: settings.start_delay(),
            output_dir: settings.output_dir.clone(),
        }
    }
}

/// Outcome of one watchdog evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Hold,
    StartProfiling { unresponsive_ticks: u64 },
    StopProfiling { captured_ticks: u64 },
}

/// Pure transition logic, separated from the loop and the backend.
#[derive(Debug)]
pub struct FreezeDetector {
    high_latency_ticks: u64,
    recovery_ticks: u64,
    gate: Arc<ReadinessGate>,
    tracker: Arc<HighLatencyTracker>,
    state: FreezeState,
    profiling_since: u64,
    /// Last-sample stamp of a freeze whose capture failed to start.
    failed_freeze: Option<u64>,
}

impl FreezeDetector {
    pub fn new(
        config: &WatchdogConfig,
        gate: Arc<ReadinessGate>,
        tracker: Arc<HighLatencyTracker>,
    ) -> Self {
        Self {
            high_latency_ticks: duration_to_ticks(config.high_latency_threshold),
            recovery_ticks: duration_to_ticks(config.recovery_window),
            gate,
            tracker,
            state: FreezeState::Idle,
            profiling_since: 0,
            failed_freeze: None,
        }
    }

    pub fn state(&self) -> FreezeState {
        self.state
    }

    /// Evaluate one tick. Does not change state; callers commit with
    /// [`FreezeDetector::enter_profiling`] / [`FreezeDetector::enter_idle`]
    /// once the backend call has been made.
    pub fn evaluate(
        &mut self,
        now_ticks: u64,
        last_sample_ticks: u64,
        settings: &RuntimeSettings,
    ) -> Decision {
        let since_last_sample = now_ticks.saturating_sub(last_sample_ticks);
        if since_last_sample >= self.high_latency_ticks {
            // No probe has completed for a while: the stall is ongoing.
            self.tracker.stamp(now_ticks);
        }

        match self.state {
            FreezeState::Idle => {
                match settings.mode {
                    ProfilingMode::Off => return Decision::Hold,
                    ProfilingMode::AlwaysOn => {}
                    ProfilingMode::GatedOnReadiness => match self.gate.opened_at() {
                        None => return Decision::Hold,
                        // A freeze already in progress when the gate opened does not count.
                        Some(opened_at) if last_sample_ticks < opened_at => {
                            return Decision::Hold
                        }
                        Some(_) => {}
                    },
                }
                // One start attempt per freeze.
                if self.failed_freeze == Some(last_sample_ticks) {
                    return Decision::Hold;
                }
                if since_last_sample >= duration_to_ticks(settings.start_delay) {
                    Decision::StartProfiling {
                        unresponsive_ticks: since_last_sample,
                    }
                } else {
                    Decision::Hold
                }
            }
            FreezeState::Profiling => {
                let healthy_for = now_ticks.saturating_sub(self.tracker.last_high_ticks());
                if healthy_for >= self.recovery_ticks {
                    Decision::StopProfiling {
                        captured_ticks: now_ticks.saturating_sub(self.profiling_since),
                    }
                } else {
                    Decision::Hold
                }
            }
        }
    }

    pub fn enter_profiling(&mut self, now_ticks: u64) {
        self.state = FreezeState::Profiling;
        self.profiling_since = now_ticks;
        self.failed_freeze = None;
        // The triggering freeze counts as unhealthy time.
        self.tracker.stamp(now_ticks);
    }

    /// Record a failed start so the same freeze is not retried every tick.
    pub fn start_failed(&mut self, last_sample_ticks: u64) {
        self.failed_freeze = Some(last_sample_ticks);
    }

    pub fn enter_idle(&mut self) {
        self.state = FreezeState::Idle;
    }
}

/// One freeze handled by the watchdog, for the session report.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FreezeEpisode {
    pub started_at: DateTime<Utc>,
    /// How long the UI had been unresponsive when the capture started.
    pub unresponsive_ms: f64,
    /// Capture length; zero when the capture never started.
    pub captured_ms: f64,
    pub artifact: Option<PathBuf>,
    /// Set when no capture was saved.
    pub error: Option<String>,
    /// Backend errors after a successful save (detach, artifact lookup).
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

struct Running {
    main_loop: LoopHandle,
    readiness: Option<LoopHandle>,
    listener_id: u64,
}

/// Periodic freeze detector driving a [`ProfilingBackend`].
pub struct FreezeWatchdog {
    config: WatchdogConfig,
    clock: Arc<dyn Clock>,
    aggregator: Arc<MetricsAggregator>,
    events: EventHub,
    settings: Arc<RwLock<RuntimeSettings>>,
    gate: Arc<ReadinessGate>,
    tracker: Arc<HighLatencyTracker>,
    state: Arc<AtomicU8>,
    episodes: Arc<Mutex<Vec<FreezeEpisode>>>,
    backend: Option<Box<dyn ProfilingBackend>>,
    running: Option<Running>,
}

impl FreezeWatchdog {
    pub fn new(
        config: WatchdogConfig,
        settings: &Settings,
        clock: Arc<dyn Clock>,
        aggregator: Arc<MetricsAggregator>,
        backend: Box<dyn ProfilingBackend>,
    ) -> Self {
        let events = aggregator.events().clone();
        let tracker = Arc::new(HighLatencyTracker::new(config.high_latency_threshold));
        Self {
            config,
            clock,
            aggregator,
            events,
            settings: Arc::new(RwLock::new(RuntimeSettings::from(settings))),
            gate: Arc::new(ReadinessGate::new()),
            tracker,
            state: Arc::new(AtomicU8::new(FreezeState::Idle.as_u8())),
            episodes: Arc::new(Mutex::new(Vec::new())),
            backend: Some(backend),
            running: None,
        }
    }

    /// Current state as last published by the loop.
    pub fn state(&self) -> FreezeState {
        FreezeState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn gate(&self) -> &ReadinessGate {
        &self.gate
    }

    pub fn episodes(&self) -> Vec<FreezeEpisode> {
        self.episodes.lock().clone()
    }

    /// Replace the operator settings; the loop picks them up on its next tick.
    pub fn apply_settings(&self, settings: &Settings) {
        let runtime = RuntimeSettings::from(settings);
        info!(
            "Watchdog settings: mode {}, start delay {:?}, output {:?}",
            runtime.mode, runtime.start_delay, runtime.output_dir
        );
        *self.settings.write() = runtime;
    }

    /// Start the loop.
    ///
    /// With `readiness`, the gate opens when the signal fires; without it the
    /// gate opens immediately. The gate only restricts starts in
    /// [`ProfilingMode::GatedOnReadiness`].
    pub fn start(&mut self, readiness: Option<ReadinessSignal>) -> Result<()> {
        if self.running.is_some() {
            return Err(WatchdogError::AlreadyStarted(COMPONENT));
        }
        let backend = self.backend.take().ok_or(WatchdogError::Stopped(COMPONENT))?;

        let listener_id = self.aggregator.subscribe(self.tracker.clone());

        let readiness = match readiness {
            Some(signal) => {
                let gate = self.gate.clone();
                let clock = self.clock.clone();
                let events = self.events.clone();
                let mut receiver = signal.subscribe();
                Some(LoopHandle::spawn("readiness listener", move |mut shutdown| async move {
                    tokio::select! {
                        _ = shutdown.wait() => {}
                        ready = receiver.wait_for(|ready| *ready) => {
                            if ready.is_ok() && gate.open_at(clock.now_ticks()) {
                                info!("Readiness signal received; freeze profiling armed");
                                events.publish_status("Ready: freeze profiling armed");
                            }
                        }
                    }
                }))
            }
            None => {
                self.gate.open_at(self.clock.now_ticks());
                None
            }
        };

        let worker = WatchdogLoop {
            config: self.config.clone(),
            clock: self.clock.clone(),
            aggregator: self.aggregator.clone(),
            events: self.events.clone(),
            settings: self.settings.clone(),
            detector: FreezeDetector::new(&self.config, self.gate.clone(), self.tracker.clone()),
            state: self.state.clone(),
            episodes: self.episodes.clone(),
            backend,
            backend_ready: false,
            backend_failed: false,
            episode_started_at: None,
        };
        let main_loop = LoopHandle::spawn("freeze watchdog", move |shutdown| worker.run(shutdown));

        info!(
            "Freeze watchdog started (tick {:?}, threshold {:?}, recovery {:?})",
            self.config.tick_period, self.config.high_latency_threshold, self.config.recovery_window
        );
        self.running = Some(Running {
            main_loop,
            readiness,
            listener_id,
        });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Cancel the loop, unsubscribe from the sample and readiness signals,
    /// and wait for the loop to exit. Idempotent.
    pub async fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        self.aggregator.unsubscribe(running.listener_id);
        if let Some(readiness) = running.readiness {
            readiness.stop().await;
        }
        running.main_loop.stop().await;
        info!("Freeze watchdog stopped");
    }
}

/// State owned by the loop task.
struct WatchdogLoop {
    config: WatchdogConfig,
    clock: Arc<dyn Clock>,
    aggregator: Arc<MetricsAggregator>,
    events: EventHub,
    settings: Arc<RwLock<RuntimeSettings>>,
    detector: FreezeDetector,
    state: Arc<AtomicU8>,
    episodes: Arc<Mutex<Vec<FreezeEpisode>>>,
    backend: Box<dyn ProfilingBackend>,
    backend_ready: bool,
    backend_failed: bool,
    episode_started_at: Option<(DateTime<Utc>, f64)>,
}

impl WatchdogLoop {
    async fn run(mut self, mut shutdown: ShutdownSignal) {
        let mode = self.settings.read().mode;
        if mode != ProfilingMode::Off {
            self.ensure_backend(&shutdown).await;
            if shutdown.is_shutdown() {
                return;
            }
        }

        let period = self.config.tick_period;
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = interval.tick() => {}
            }
            self.tick(&shutdown).await;
        }

        if self.detector.state() == FreezeState::Profiling {
            match self.config.shutdown_policy {
                ShutdownPolicy::Abandon => {
                    info!("Watchdog shutting down with a capture in progress; leaving it running");
                    self.events
                        .publish_status("Watchdog stopped; capture left running");
                }
                ShutdownPolicy::StopAndSave => {
                    let now = self.clock.now_ticks();
                    let captured = now.saturating_sub(self.detector.profiling_since);
                    self.stop_profiling(captured).await;
                }
            }
        }
        debug!("Watchdog loop exited");
    }

    async fn tick(&mut self, shutdown: &ShutdownSignal) {
        let now = self.clock.now_ticks();
        let last_sample = self.aggregator.last_sample_ticks();
        let settings = self.settings.read().clone();

        match self.detector.evaluate(now, last_sample, &settings) {
            Decision::Hold => {}
            Decision::StartProfiling { unresponsive_ticks } => {
                if !self.ensure_backend(shutdown).await {
                    return;
                }
                self.start_profiling(now, unresponsive_ticks, &settings).await;
            }
            Decision::StopProfiling { captured_ticks } => {
                self.stop_profiling(captured_ticks).await;
            }
        }
    }

    /// Initialize the backend once. Returns whether it is usable.
    async fn ensure_backend(&mut self, shutdown: &ShutdownSignal) -> bool {
        if self.backend_ready {
            return true;
        }
        if self.backend_failed {
            return false;
        }

        let events = self.events.clone();
        let progress = move |percent: u8| {
            events.publish_status(format!(
                "Initializing profiler {}",
                create_progress_indicator(percent, 20)
            ));
        };
        let mut cancel = shutdown.clone();
        let result = tokio::select! {
            result = self.backend.initialize(shutdown.clone(), &progress) => result,
            _ = cancel.wait() => return false,
        };

        match result {
            Ok(()) => {
                info!("Profiling backend '{}' initialized", self.backend.name());
                self.backend_ready = true;
            }
            Err(e) => {
                warn!("Profiling backend initialization failed: {:#}", e);
                self.events
                    .publish_status(format!("Profiler initialization failed: {:#}", e));
                self.backend_failed = true;
            }
        }
        self.backend_ready
    }

    fn publish_state(&self, state: FreezeState) {
        self.state.store(state.as_u8(), Ordering::Release);
    }

    async fn begin_capture(&mut self, config: &CaptureConfig) -> AnyResult<()> {
        self.backend.attach(config).await?;
        self.backend.start_collecting().await
    }

    async fn start_profiling(&mut self, now: u64, unresponsive_ticks: u64, settings: &RuntimeSettings) {
        let capture = CaptureConfig {
            capture_dir: settings.output_dir.clone(),
            mode: self.config.capture_mode,
        };
        let unresponsive = ticks_to_duration(unresponsive_ticks);
        let unresponsive_ms = unresponsive.as_secs_f64() * 1000.0;

        match self.begin_capture(&capture).await {
            Ok(()) => {
                self.detector.enter_profiling(now);
                self.publish_state(FreezeState::Profiling);
                self.episode_started_at = Some((Utc::now(), unresponsive_ms));
                info!(
                    "UI unresponsive for {}; profiling started into {:?}",
                    format_capture_duration(unresponsive),
                    capture.capture_dir
                );
                self.events.publish_status(format!(
                    "Profiling started (UI unresponsive for {})",
                    format_capture_duration(unresponsive)
                ));
            }
            Err(e) => {
                warn!("Failed to start profiling: {:#}", e);
                self.detector.start_failed(now.saturating_sub(unresponsive_ticks));
                if let Err(detach_err) = self.backend.detach().await {
                    debug!("Detach after failed start also failed: {:#}", detach_err);
                }
                self.events
                    .publish_status(format!("Profiling start failed: {:#}", e));
                self.episodes.lock().push(FreezeEpisode {
                    started_at: Utc::now(),
                    unresponsive_ms,
                    captured_ms: 0.0,
                    artifact: None,
                    error: Some(format!("start failed: {:#}", e)),
                    warnings: Vec::new(),
                });
            }
        }
    }

    async fn stop_profiling(&mut self, captured_ticks: u64) {
        let captured = ticks_to_duration(captured_ticks);
        let save = self.backend.save_data().await;
        let detach = self.backend.detach().await;

        self.detector.enter_idle();
        self.publish_state(FreezeState::Idle);

        let (started_at, unresponsive_ms) = self
            .episode_started_at
            .take()
            .unwrap_or_else(|| (Utc::now(), 0.0));
        let mut episode = FreezeEpisode {
            started_at,
            unresponsive_ms,
            captured_ms: captured.as_secs_f64() * 1000.0,
            artifact: None,
            error: None,
            warnings: Vec::new(),
        };

        match save {
            Ok(()) => {
                if let Err(e) = detach {
                    warn!("Profiler detach failed after save: {:#}", e);
                    self.events
                        .publish_status(format!("Profiler detach failed: {:#}", e));
                    episode.warnings.push(format!("detach failed: {:#}", e));
                }
                let output_dir = self.settings.read().output_dir.clone();
                match self.backend.latest_artifact(&output_dir).await {
                    Ok(artifact) => {
                        let saved = ArtifactSaved {
                            path: artifact.clone(),
                            duration: captured,
                        };
                        info!("Profiling stopped; saved {}", saved);
                        self.events.publish_status(format!(
                            "Profiling stopped after {}; saved {}",
                            format_capture_duration(captured),
                            saved
                        ));
                        self.events.publish_artifact(saved);
                        episode.artifact = artifact;
                    }
                    Err(e) => {
                        warn!("Could not locate saved capture in {:?}: {:#}", output_dir, e);
                        self.events
                            .publish_status(format!("Could not locate saved capture: {:#}", e));
                        self.events.publish_status(format!(
                            "Profiling stopped after {}",
                            format_capture_duration(captured)
                        ));
                        episode
                            .warnings
                            .push(format!("artifact lookup failed: {:#}", e));
                    }
                }
            }
            Err(e) => {
                warn!("Failed to save profiling data: {:#}", e);
                if let Err(detach_err) = detach {
                    debug!("Detach after failed save also failed: {:#}", detach_err);
                }
                self.events
                    .publish_status(format!("Profiling save failed: {:#}", e));
                episode.error = Some(format!("save failed: {:#}", e));
            }
        }
        self.episodes.lock().push(episode);
    }
}
