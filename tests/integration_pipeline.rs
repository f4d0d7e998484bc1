use anyhow::Result;
use freeze_watchdog::{
    config::{ProfilingMode, Settings},
    executor::{MainThreadQueue, OwningThreadExecutor},
    metrics::AggregatorConfig,
    results::ResultsManager,
    watchdog::{FreezeState, FreezeWatchdog, WatchdogConfig},
    Clock, EventHub, MetricsAggregator, MonitorConfig, MonotonicClock, NullProfiler, Sampler,
};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

/// Sampler, aggregator and watchdog wired to a real owning thread that is
/// blocked once for 1.5 s.
///
/// Runs in real time: the UI thread sleeps on the OS clock.
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn real_ui_thread_freeze_is_measured_and_profiled() -> Result<()> {
    let dir = TempDir::new()?;
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let events = EventHub::new();
    let mut status = events.subscribe_status();

    let ui = MainThreadQueue::spawn("ui-pipeline-test")?;
    let aggregator = Arc::new(MetricsAggregator::new(
        AggregatorConfig {
            publish_period: Duration::from_millis(250),
            ..Default::default()
        },
        clock.clone(),
        events.clone(),
    ));
    aggregator.start()?;

    let mut sampler = Sampler::new(Duration::from_millis(20), clock.clone(), aggregator.clone());
    sampler.start(Arc::new(ui.handle()))?;

    let settings = Settings {
        profiling_mode: ProfilingMode::AlwaysOn,
        start_delay_secs: 1,
        output_dir: dir.path().join("captures"),
    };
    let config = WatchdogConfig {
        recovery_window: Duration::from_millis(500),
        ..Default::default()
    };
    let mut watchdog = FreezeWatchdog::new(
        config,
        &settings,
        clock,
        aggregator.clone(),
        Box::new(NullProfiler),
    );
    watchdog.start(None)?;

    // Let a few healthy samples in, then freeze the UI thread.
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(ui.handle().post(Box::new(|| {
        std::thread::sleep(Duration::from_millis(1500))
    })));

    let mut saw_profiling = false;
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(20)).await;
        match watchdog.state() {
            FreezeState::Profiling => saw_profiling = true,
            FreezeState::Idle if saw_profiling => break,
            FreezeState::Idle => {}
        }
    }

    sampler.stop().await;
    watchdog.stop().await;
    aggregator.stop().await;
    ui.shutdown();

    assert!(saw_profiling, "the freeze never started a capture");
    assert_eq!(watchdog.state(), FreezeState::Idle);

    let snapshot = aggregator.snapshot();
    assert!(snapshot.session.count > 10);
    assert!(
        snapshot.session.max_ms >= 1000.0,
        "max latency {}",
        snapshot.session.max_ms
    );
    assert!(snapshot.session.thresholds.over_1000ms >= 1);

    let episodes = watchdog.episodes();
    assert_eq!(episodes.len(), 1);
    assert!(episodes[0].error.is_none());

    let mut messages = Vec::new();
    while let Ok(message) = status.try_recv() {
        messages.push(message);
    }
    assert!(messages.iter().any(|m| m.starts_with("Profiling started")));
    assert!(messages.iter().any(|m| m.starts_with("Profiling stopped after")));

    // The whole session round-trips through the report writer.
    let mut results = ResultsManager::new(&dir.path().join("report.json"));
    let report = results.finalize(&MonitorConfig::default(), snapshot, episodes)?;
    assert_eq!(report.summary.freezes, 1);
    assert_eq!(report.summary.captures_saved, 1);
    assert!(dir.path().join("report.json").is_file());
    Ok(())
}

/// Samples arriving after the aggregator stopped are ignored, and the
/// sampler emits nothing once stopped.
#[tokio::test]
async fn stopped_pipeline_records_nothing_more() -> Result<()> {
    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let ui = MainThreadQueue::spawn("ui-stop-test")?;
    let aggregator = Arc::new(MetricsAggregator::new(
        AggregatorConfig::default(),
        clock.clone(),
        EventHub::new(),
    ));
    aggregator.start()?;

    let mut sampler = Sampler::new(Duration::from_millis(10), clock, aggregator.clone());
    sampler.start(Arc::new(ui.handle()))?;
    tokio::time::sleep(Duration::from_millis(150)).await;
    sampler.stop().await;

    // Flush anything already queued on the UI thread.
    let (tx, rx) = tokio::sync::oneshot::channel();
    ui.handle().post(Box::new(move || {
        let _ = tx.send(());
    }));
    rx.await?;

    let count = aggregator.snapshot().session.count;
    assert!(count > 0);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(aggregator.snapshot().session.count, count);

    aggregator.stop().await;
    assert!(!aggregator.on_sample(5.0));
    assert_eq!(aggregator.snapshot().session.count, count);

    ui.shutdown();
    Ok(())
}
