//! # Freeze Watchdog - Main Entry Point
//!
//! Hosts the monitoring pipeline around a synthetic UI thread:
//!
//! 1. **Initialize logging**: colored console output, optional log file
//! 2. **Parse arguments** and overlay the operator settings file
//! 3. **Spawn the UI thread** and the workload that periodically stalls it
//! 4. **Start** the aggregator, the sampler and the freeze watchdog
//! 5. **Run** for `--duration` or until Ctrl-C, logging every event
//! 6. **Stop** sampler, watchdog, aggregator (in that order) and write the
//!    session report

use anyhow::{Context, Result};
use clap::Parser;
use freeze_watchdog::{
    cli::Args,
    config::Settings,
    events::EventHub,
    executor::{MainThreadHandle, MainThreadQueue, OwningThreadExecutor},
    logging::StatusFormatter,
    metrics::{MetricsAggregator, MetricsSnapshot},
    profiler::{CommandProfiler, NullProfiler, ProfilingBackend},
    results::ResultsManager,
    sampler::Sampler,
    shutdown::LoopHandle,
    utils::format_latency_ms,
    watchdog::{FreezeWatchdog, ReadinessSignal, WatchdogConfig},
    Clock, MonitorConfig, MonotonicClock,
};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{error, info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer};

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let _log_guard = init_logging(&args)?;

    if let Err(e) = run(args).await {
        error!("Freeze watchdog failed: {:#}", e);
        return Err(e);
    }
    Ok(())
}

/// Console logging through [`StatusFormatter`], plus a plain file layer
/// when `--log-file` is given. The returned guard flushes the file writer
/// on drop.
fn init_logging(args: &Args) -> Result<Option<WorkerGuard>> {
    // RUST_LOG wins; otherwise info, or debug with -v.
    let default_level = if args.verbose { "debug" } else { "info" };
    let filter = || {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level))
    };

    let console = fmt::layer()
        .event_format(StatusFormatter)
        .with_filter(filter());

    let (file_layer, guard) = match &args.log_file {
        Some(path) => {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)
                .with_context(|| format!("failed to open log file {:?}", path))?;
            let (writer, guard) = tracing_appender::non_blocking(file);
            let layer = fmt::layer()
                .with_ansi(false)
                .with_writer(writer)
                .with_filter(filter());
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(console)
        .with(file_layer)
        .init();
    Ok(guard)
}

async fn run(args: Args) -> Result<()> {
    let mut config = MonitorConfig::from(&args);
    if let Some(path) = &args.settings_file {
        if path.exists() {
            let settings = Settings::load(path)?;
            config.apply_settings(&settings);
        } else {
            config.settings().save(path)?;
            info!("Wrote default settings to {:?}", path);
        }
    }
    config.validate()?;

    info!("Starting Freeze Watchdog v{}", freeze_watchdog::VERSION);
    info!(
        "Mode: {}, start delay: {:?}, captures: {:?}",
        config.profiling_mode, config.start_delay, config.output_dir
    );

    let mut results = ResultsManager::new(&args.report_file);
    if let Some(path) = &args.stream_snapshots {
        results.enable_streaming(path)?;
    }
    let results = Arc::new(Mutex::new(results));

    let clock: Arc<dyn Clock> = Arc::new(MonotonicClock::new());
    let events = EventHub::new();
    let event_log = spawn_event_log(&events, results.clone());

    let ui = MainThreadQueue::spawn("ui")?;
    let workload = args
        .freeze_every
        .map(|every| spawn_workload(ui.handle(), every, args.freeze_for));

    let aggregator = Arc::new(MetricsAggregator::new(
        config.aggregator_config(),
        clock.clone(),
        events.clone(),
    ));
    aggregator.start()?;

    let mut sampler = Sampler::new(config.sample_period, clock.clone(), aggregator.clone());
    sampler.start(Arc::new(ui.handle()))?;

    let mut watchdog = FreezeWatchdog::new(
        WatchdogConfig::from(&config),
        &config.settings(),
        clock,
        aggregator.clone(),
        build_backend(&args)?,
    );
    let readiness = args.ready_after.map(|after| {
        let signal = ReadinessSignal::new();
        let trigger = signal.clone();
        tokio::spawn(async move {
            tokio::time::sleep(after).await;
            trigger.fire();
        });
        signal
    });
    watchdog.start(readiness)?;

    match args.duration {
        Some(duration) => {
            info!("Monitoring for {:?}", duration);
            tokio::select! {
                _ = tokio::time::sleep(duration) => {}
                _ = tokio::signal::ctrl_c() => info!("Interrupted"),
            }
        }
        None => {
            info!("Monitoring until Ctrl-C");
            tokio::signal::ctrl_c()
                .await
                .context("failed to listen for Ctrl-C")?;
        }
    }

    sampler.stop().await;
    watchdog.stop().await;
    aggregator.stop().await;
    if let Some(workload) = workload {
        workload.stop().await;
    }
    event_log.stop().await;
    ui.shutdown();

    let snapshot = aggregator.snapshot();
    log_snapshot(&snapshot);
    let report = results
        .lock()
        .finalize(&config, snapshot, watchdog.episodes())?;
    info!(
        "Session {}: {} freezes, {} captures saved, {} failed",
        report.metadata.session_id,
        report.summary.freezes,
        report.summary.captures_saved,
        report.summary.capture_failures
    );
    Ok(())
}

fn build_backend(args: &Args) -> Result<Box<dyn ProfilingBackend>> {
    match &args.profiler_command {
        Some(command) => {
            let pid = args.target_pid.unwrap_or_else(std::process::id);
            Ok(Box::new(CommandProfiler::new(command, pid)?))
        }
        None => {
            warn!("No --profiler-command given; freezes are detected but not recorded");
            Ok(Box::new(NullProfiler))
        }
    }
}

/// Periodically block the UI thread for `freeze_for`.
fn spawn_workload(ui: MainThreadHandle, every: Duration, freeze_for: Duration) -> LoopHandle {
    LoopHandle::spawn("workload", move |mut shutdown| async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                _ = tokio::time::sleep(every) => {}
            }
            info!("Stalling the UI thread for {:?}", freeze_for);
            let posted = ui.post(Box::new(move || std::thread::sleep(freeze_for)));
            if !posted {
                break;
            }
        }
    })
}

/// Log status and artifact events, and stream snapshots into the report.
fn spawn_event_log(events: &EventHub, results: Arc<Mutex<ResultsManager>>) -> LoopHandle {
    let mut snapshots = events.subscribe_snapshots();
    let mut status = events.subscribe_status();
    let mut artifacts = events.subscribe_artifacts();

    LoopHandle::spawn("event log", move |mut shutdown| async move {
        loop {
            tokio::select! {
                biased;
                _ = shutdown.wait() => break,
                message = status.recv() => match message {
                    Ok(message) => info!("{}", message),
                    Err(RecvError::Lagged(n)) => warn!("Missed {} status messages", n),
                    Err(RecvError::Closed) => break,
                },
                artifact = artifacts.recv() => match artifact {
                    Ok(artifact) => info!("Capture saved: {}", artifact),
                    Err(RecvError::Lagged(n)) => warn!("Missed {} artifact events", n),
                    Err(RecvError::Closed) => break,
                },
                snapshot = snapshots.recv() => match snapshot {
                    Ok(snapshot) => {
                        log_snapshot(&snapshot);
                        if let Err(e) = results.lock().record_snapshot(&snapshot) {
                            warn!("Failed to stream snapshot: {:#}", e);
                        }
                    }
                    Err(RecvError::Lagged(n)) => warn!("Missed {} snapshots", n),
                    Err(RecvError::Closed) => break,
                },
            }
        }
    })
}

fn log_snapshot(snapshot: &MetricsSnapshot) {
    let window = &snapshot.window;
    let session = &snapshot.session;
    info!(
        "window: n={} p50={} p95={} p99={} max={} | session: n={} p99={} max={} >1s={}",
        window.count,
        format_latency_ms(window.percentiles.p50_ms),
        format_latency_ms(window.percentiles.p95_ms),
        format_latency_ms(window.percentiles.p99_ms),
        format_latency_ms(window.max_ms),
        session.count,
        format_latency_ms(session.percentiles.p99_ms),
        format_latency_ms(session.max_ms),
        session.thresholds.over_1000ms,
    );
}
