use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, trace};

use super::session::{Reservoir, SessionAccumulator, SessionMetrics};
use super::window::{SlidingWindow, WindowMetrics};
use super::Sample;
use crate::clock::{duration_to_ticks, Clock};
use crate::error::{Result, WatchdogError};
use crate::events::EventHub;
use crate::sampler::SampleSink;
use crate::shutdown::{LoopHandle, ShutdownSignal};

const COMPONENT: &str = "metrics aggregator";

/// Window and session metrics computed from one consistent state capture.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub window: WindowMetrics,
    pub session: SessionMetrics,
}

/// Observer of every accepted sample, invoked synchronously on the
/// producing thread before the aggregator lock is taken.
pub trait SampleListener: Send + Sync {
    fn on_sample(&self, sample: Sample);
}

#[derive(Debug, Clone)]
pub struct AggregatorConfig {
    pub window_duration: Duration,
    pub reservoir_capacity: usize,
    pub publish_period: Duration,
    /// Fixed seed for the reservoir; `None` seeds from entropy.
    pub reservoir_seed: Option<u64>,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            window_duration: crate::defaults::WINDOW_DURATION,
            reservoir_capacity: crate::defaults::RESERVOIR_CAPACITY,
            publish_period: crate::defaults::PUBLISH_PERIOD,
            reservoir_seed: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
enum Lifecycle {
    Created = 0,
    Running = 1,
    Stopped = 2,
}

struct State {
    window: SlidingWindow,
    session: SessionAccumulator,
}

/// Thread-safe metrics engine.
///
/// The sampler calls [`MetricsAggregator::on_sample`], the watchdog reads
/// [`MetricsAggregator::last_sample_ticks`] without locking, and snapshot
/// consumers either pull [`MetricsAggregator::snapshot`] or subscribe to the
/// periodic push on the [`EventHub`].
pub struct MetricsAggregator {
    clock: Arc<dyn Clock>,
    config: AggregatorConfig,
    state: Mutex<State>,
    last_sample_ticks: AtomicU64,
    lifecycle: AtomicU8,
    listeners: RwLock<Vec<(u64, Arc<dyn SampleListener>)>>,
    next_listener_id: AtomicU64,
    events: EventHub,
    publisher: Mutex<Option<LoopHandle>>,
}

impl MetricsAggregator {
    pub fn new(config: AggregatorConfig, clock: Arc<dyn Clock>, events: EventHub) -> Self {
        let reservoir = match config.reservoir_seed {
            Some(seed) => Reservoir::with_seed(config.reservoir_capacity, seed),
            None => Reservoir::new(config.reservoir_capacity),
        };
        let state = State {
            window: SlidingWindow::new(duration_to_ticks(config.window_duration)),
            session: SessionAccumulator::new(reservoir),
        };
        let now = clock.now_ticks();

        Self {
            clock,
            config,
            state: Mutex::new(state),
            last_sample_ticks: AtomicU64::new(now),
            lifecycle: AtomicU8::new(Lifecycle::Created as u8),
            listeners: RwLock::new(Vec::new()),
            next_listener_id: AtomicU64::new(1),
            events,
            publisher: Mutex::new(None),
        }
    }

    fn lifecycle(&self) -> Lifecycle {
        match self.lifecycle.load(Ordering::Acquire) {
            0 => Lifecycle::Created,
            1 => Lifecycle::Running,
            _ => Lifecycle::Stopped,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Begin accepting samples and arm the periodic snapshot publisher.
    ///
    /// Must be called from within a tokio runtime. Starting twice, or after
    /// `stop`, is an error.
    pub fn start(self: &Arc<Self>) -> Result<()> {
        match self.lifecycle.compare_exchange(
            Lifecycle::Created as u8,
            Lifecycle::Running as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        ) {
            Ok(_) => {}
            Err(current) if current == Lifecycle::Running as u8 => {
                return Err(WatchdogError::AlreadyStarted(COMPONENT))
            }
            Err(_) => return Err(WatchdogError::Stopped(COMPONENT)),
        }

        // Silence before the first sample counts from here.
        self.last_sample_ticks
            .store(self.clock.now_ticks(), Ordering::Release);

        let weak = Arc::downgrade(self);
        let period = self.config.publish_period;
        let handle = LoopHandle::spawn("snapshot publisher", move |shutdown| {
            Self::publish_loop(weak, period, shutdown)
        });
        *self.publisher.lock() = Some(handle);

        info!(
            "Metrics aggregator started (window {:?}, reservoir {}, publish every {:?})",
            self.config.window_duration, self.config.reservoir_capacity, period
        );
        Ok(())
    }

    async fn publish_loop(weak: Weak<Self>, period: Duration, mut shutdown: ShutdownSignal) {
        let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = interval.tick() => {
                    let Some(aggregator) = weak.upgrade() else { break };
                    // snapshot() drops the lock before subscribers are notified.
                    let snapshot = aggregator.snapshot();
                    trace!("Publishing snapshot: window count {}", snapshot.window.count);
                    aggregator.events.publish_snapshot(snapshot);
                }
            }
        }
        debug!("Snapshot publisher exited");
    }

    /// Record one latency measurement taken now.
    ///
    /// Returns `false` when the sample was ignored because the aggregator is
    /// not running.
    pub fn on_sample(&self, latency_ms: f64) -> bool {
        self.record(Sample::new(self.clock.now_ticks(), latency_ms))
    }

    /// Record a sample with an explicit timestamp.
    pub fn record(&self, sample: Sample) -> bool {
        if !self.is_running() {
            trace!("Ignoring sample while aggregator is not running");
            return false;
        }

        self.last_sample_ticks
            .fetch_max(sample.timestamp_ticks, Ordering::AcqRel);

        {
            let listeners = self.listeners.read();
            for (_, listener) in listeners.iter() {
                listener.on_sample(sample);
            }
        }

        let mut state = self.state.lock();
        state.window.push(sample);
        state.session.record(sample.latency_ms);
        true
    }

    /// Ticks of the most recent sample (or of `start` if none arrived yet).
    /// Lock-free; may be momentarily stale.
    pub fn last_sample_ticks(&self) -> u64 {
        self.last_sample_ticks.load(Ordering::Acquire)
    }

    /// Compute a snapshot at the current clock time, pruning stale window entries.
    pub fn snapshot(&self) -> MetricsSnapshot {
        let now = self.clock.now_ticks();
        let (window_values, session) = {
            let mut state = self.state.lock();
            state.window.prune(now);
            (state.window.values(), state.session.capture())
        };

        MetricsSnapshot {
            window: WindowMetrics::from_values(window_values),
            session: session.into_metrics(),
        }
    }

    /// Register a listener for every accepted sample. Returns an id for
    /// [`MetricsAggregator::unsubscribe`].
    pub fn subscribe(&self, listener: Arc<dyn SampleListener>) -> u64 {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.listeners.write().push((id, listener));
        id
    }

    pub fn unsubscribe(&self, id: u64) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|(existing, _)| *existing != id);
        listeners.len() != before
    }

    pub fn events(&self) -> &EventHub {
        &self.events
    }

    pub fn config(&self) -> &AggregatorConfig {
        &self.config
    }

    /// Disarm the publisher. Later samples are ignored. Idempotent.
    pub async fn stop(&self) {
        let previous = self
            .lifecycle
            .swap(Lifecycle::Stopped as u8, Ordering::AcqRel);
        let handle = self.publisher.lock().take();
        if let Some(handle) = handle {
            handle.stop().await;
        }
        if previous == Lifecycle::Running as u8 {
            info!("Metrics aggregator stopped");
        }
    }
}

impl SampleSink for MetricsAggregator {
    fn on_sample(&self, latency_ms: f64) -> bool {
        MetricsAggregator::on_sample(self, latency_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{ManualClock, MonotonicClock};
    use std::sync::atomic::AtomicUsize;

    fn aggregator_with(clock: Arc<dyn Clock>, capacity: usize) -> Arc<MetricsAggregator> {
        let config = AggregatorConfig {
            window_duration: Duration::from_secs(5),
            reservoir_capacity: capacity,
            publish_period: Duration::from_secs(1),
            reservoir_seed: Some(42),
        };
        Arc::new(MetricsAggregator::new(config, clock, EventHub::new()))
    }

    struct CountingListener(AtomicUsize);

    impl SampleListener for CountingListener {
        fn on_sample(&self, _sample: Sample) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn test_samples_rejected_before_start_and_after_stop() {
        let clock = Arc::new(ManualClock::new());
        let aggregator = aggregator_with(clock.clone(), 100);

        assert!(!aggregator.on_sample(1.0));
        aggregator.start().unwrap();
        assert!(aggregator.on_sample(1.0));
        aggregator.stop().await;
        assert!(!aggregator.on_sample(1.0));

        assert_eq!(aggregator.snapshot().session.count, 1);
        aggregator.stop().await;
    }

    #[tokio::test]
    async fn test_double_start_fails_loudly() {
        let aggregator = aggregator_with(Arc::new(ManualClock::new()), 10);
        aggregator.start().unwrap();
        assert!(matches!(
            aggregator.start(),
            Err(WatchdogError::AlreadyStarted(_))
        ));
        aggregator.stop().await;
        assert!(matches!(aggregator.start(), Err(WatchdogError::Stopped(_))));
    }

    #[tokio::test]
    async fn test_snapshot_prunes_window_without_new_samples() {
        let clock = Arc::new(ManualClock::new());
        let aggregator = aggregator_with(clock.clone(), 100);
        aggregator.start().unwrap();

        for _ in 0..10 {
            clock.advance(Duration::from_millis(100));
            aggregator.on_sample(150.0);
        }
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.window.count, 10);
        assert_eq!(snapshot.window.thresholds.over_100ms, 10);

        clock.advance(Duration::from_secs(10));
        let snapshot = aggregator.snapshot();
        assert_eq!(snapshot.window, WindowMetrics::default());
        assert_eq!(snapshot.session.count, 10);
        assert_eq!(snapshot.session.thresholds.over_100ms, 10);
        aggregator.stop().await;
    }

    #[tokio::test]
    async fn test_last_sample_ticks_and_listeners() {
        let clock = Arc::new(ManualClock::new());
        let aggregator = aggregator_with(clock.clone(), 100);
        let listener = Arc::new(CountingListener(AtomicUsize::new(0)));
        let id = aggregator.subscribe(listener.clone());

        clock.advance(Duration::from_millis(40));
        aggregator.start().unwrap();
        assert_eq!(aggregator.last_sample_ticks(), duration_to_ticks(Duration::from_millis(40)));

        clock.advance(Duration::from_millis(20));
        aggregator.on_sample(3.0);
        assert_eq!(aggregator.last_sample_ticks(), duration_to_ticks(Duration::from_millis(60)));
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);

        assert!(aggregator.unsubscribe(id));
        assert!(!aggregator.unsubscribe(id));
        aggregator.on_sample(3.0);
        assert_eq!(listener.0.load(Ordering::SeqCst), 1);
        aggregator.stop().await;
    }

    #[tokio::test]
    async fn test_reservoir_capped_session_exact() {
        let aggregator = aggregator_with(Arc::new(ManualClock::new()), 50);
        aggregator.start().unwrap();
        for i in 0..1000 {
            aggregator.on_sample((i % 300) as f64);
        }
        let session = aggregator.snapshot().session;
        assert_eq!(session.count, 1000);
        assert_eq!(session.reservoir_len, 50);
        assert_eq!(session.max_ms, 299.0);
        aggregator.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_publisher_pushes_on_cadence() {
        let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
        let aggregator = aggregator_with(clock, 100);
        let mut snapshots = aggregator.events().subscribe_snapshots();
        aggregator.start().unwrap();
        aggregator.on_sample(2.0);

        tokio::time::sleep(Duration::from_millis(3500)).await;
        aggregator.stop().await;

        let mut received = 0;
        while let Ok(snapshot) = snapshots.try_recv() {
            assert_eq!(snapshot.session.count, 1);
            received += 1;
        }
        assert_eq!(received, 3);

        // Publisher disarmed.
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert!(snapshots.try_recv().is_err());
    }
}
