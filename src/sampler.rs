//! # Responsiveness Sampler
//!
//! Measures main-thread queuing latency from a background task. Every
//! `period` the probe loop stamps `t0`, posts a no-op callback onto the
//! owning thread and, when the callback runs at `t1`, reports `t1 - t0` as
//! one sample.
//!
//! On a responsive thread the delta is pure scheduling overhead. On a
//! stalled thread the callback waits behind the stall, so the delta is the
//! freeze as a user experiences it. Probes are posted even while earlier
//! ones are still queued; the owning thread runs them in post order.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::clock::{ticks_to_ms, Clock};
use crate::error::{Result, WatchdogError};
use crate::executor::OwningThreadExecutor;
use crate::shutdown::{LoopHandle, ShutdownSignal};

const COMPONENT: &str = "sampler";

/// Consumer of latency samples, called on the owning thread.
pub trait SampleSink: Send + Sync {
    /// Returns `false` if the sample was not accepted.
    fn on_sample(&self, latency_ms: f64) -> bool;
}

struct Running {
    handle: LoopHandle,
    armed: Arc<RwLock<bool>>,
}

/// Periodic probe loop feeding a [`SampleSink`].
pub struct Sampler {
    period: Duration,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SampleSink>,
    probes_posted: Arc<AtomicU64>,
    running: Option<Running>,
}

impl Sampler {
    pub fn new(period: Duration, clock: Arc<dyn Clock>, sink: Arc<dyn SampleSink>) -> Self {
        Self {
            period,
            clock,
            sink,
            probes_posted: Arc::new(AtomicU64::new(0)),
            running: None,
        }
    }

    /// Start probing `executor`'s owning thread.
    ///
    /// The executor handle is captured for the lifetime of the loop and
    /// released once the loop has exited. Must be called inside a tokio
    /// runtime; starting an already running sampler is an error.
    pub fn start(&mut self, executor: Arc<dyn OwningThreadExecutor>) -> Result<()> {
        if self.running.is_some() {
            return Err(WatchdogError::AlreadyStarted(COMPONENT));
        }
        if self.period.is_zero() {
            return Err(WatchdogError::InvalidConfig(
                "sample period must be greater than zero".into(),
            ));
        }

        let armed = Arc::new(RwLock::new(true));
        let probe = Probe {
            period: self.period,
            clock: self.clock.clone(),
            sink: self.sink.clone(),
            armed: armed.clone(),
            probes_posted: self.probes_posted.clone(),
        };
        let handle = LoopHandle::spawn("sampler", move |shutdown| probe.run(executor, shutdown));

        info!("Sampler started (period {:?})", self.period);
        self.running = Some(Running { handle, armed });
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// Total probes posted since construction.
    pub fn probes_posted(&self) -> u64 {
        self.probes_posted.load(Ordering::Relaxed)
    }

    /// Cancel the probe loop and wait for it to exit. No-op when not running.
    ///
    /// Probes still queued on the owning thread are disarmed first. A probe
    /// already emitting holds the read side of `armed`, so disarming waits
    /// for it and no sample is emitted after this returns.
    pub async fn stop(&mut self) {
        if let Some(running) = self.running.take() {
            *running.armed.write() = false;
            running.handle.stop().await;
            info!("Sampler stopped after {} probes", self.probes_posted());
        }
    }
}

struct Probe {
    period: Duration,
    clock: Arc<dyn Clock>,
    sink: Arc<dyn SampleSink>,
    armed: Arc<RwLock<bool>>,
    probes_posted: Arc<AtomicU64>,
}

impl Probe {
    async fn run(self, executor: Arc<dyn OwningThreadExecutor>, mut shutdown: ShutdownSignal) {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(self.period) => {}
            }

            let t0 = self.clock.now_ticks();
            let clock = self.clock.clone();
            let sink = self.sink.clone();
            let armed = self.armed.clone();
            let posted = executor.post(Box::new(move || {
                let armed = armed.read();
                if !*armed {
                    return;
                }
                let t1 = clock.now_ticks();
                sink.on_sample(ticks_to_ms(t1.saturating_sub(t0)));
            }));

            if !posted {
                warn!("Owning thread no longer accepts callbacks; sampler exiting");
                break;
            }
            self.probes_posted.fetch_add(1, Ordering::Relaxed);
        }
        debug!("Sampler loop exited");
        // `executor` is dropped here, releasing the queue handle.
    }
}
