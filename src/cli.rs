use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use crate::config::{MonitorConfig, ProfilingMode, ShutdownPolicy};
use crate::profiler::CaptureMode;

/// Freeze Watchdog - measure UI-thread responsiveness and profile freezes
#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
pub struct Args {
    /// When freeze-triggered profiling is allowed
    #[clap(short = 'm', long, value_enum, default_value_t = ProfilingMode::AlwaysOn, help_heading = "Profiling")]
    pub mode: ProfilingMode,

    /// Seconds the UI must be unresponsive before a capture starts
    #[clap(long, default_value_t = crate::defaults::START_DELAY_SECS, help_heading = "Profiling")]
    pub start_delay: u64,

    /// Directory receiving capture artifacts (default: platform data directory)
    #[clap(short = 'o', long, help_heading = "Profiling")]
    pub output_dir: Option<PathBuf>,

    /// What the profiler records
    #[clap(long, value_enum, default_value_t = CaptureMode::Sampling, help_heading = "Profiling")]
    pub capture_mode: CaptureMode,

    /// What to do with a capture still running at shutdown
    #[clap(long, value_enum, default_value_t = ShutdownPolicy::Abandon, help_heading = "Profiling")]
    pub shutdown_policy: ShutdownPolicy,

    /// External profiler command; {output}, {pid} and {mode} are substituted.
    /// Without it the null backend is used and nothing is recorded.
    #[clap(long, help_heading = "Profiling")]
    pub profiler_command: Option<String>,

    /// Process id handed to the profiler command (default: this process)
    #[clap(long, help_heading = "Profiling")]
    pub target_pid: Option<u32>,

    /// Open the readiness gate this long after startup (gated mode)
    #[clap(long, value_parser = parse_duration, help_heading = "Profiling")]
    pub ready_after: Option<Duration>,

    /// Interval between responsiveness probes
    #[clap(long, value_parser = parse_duration, default_value = "20ms", help_heading = "Detection")]
    pub sample_period: Duration,

    /// Latency at or above which the UI counts as unhealthy
    #[clap(long, value_parser = parse_duration, default_value = "100ms", help_heading = "Detection")]
    pub high_latency_threshold: Duration,

    /// Continuous healthy time required to end a capture
    #[clap(long, value_parser = parse_duration, default_value = "1s", help_heading = "Detection")]
    pub recovery_window: Duration,

    /// How long to monitor (default: until Ctrl-C)
    #[clap(short = 'd', long, value_parser = parse_duration, help_heading = "Workload")]
    pub duration: Option<Duration>,

    /// Stall the simulated UI thread this often
    #[clap(long, value_parser = parse_duration, help_heading = "Workload")]
    pub freeze_every: Option<Duration>,

    /// Length of each simulated stall
    #[clap(long, value_parser = parse_duration, default_value = "5s", help_heading = "Workload")]
    pub freeze_for: Duration,

    /// Session report file (JSON)
    #[clap(short = 'r', long, default_value = crate::defaults::REPORT_FILE, help_heading = "Output")]
    pub report_file: PathBuf,

    /// Append every published metrics snapshot to this file (JSON lines)
    #[clap(long, help_heading = "Output")]
    pub stream_snapshots: Option<PathBuf>,

    /// Operator settings file; overrides mode, start delay and output directory
    #[clap(long, help_heading = "Output")]
    pub settings_file: Option<PathBuf>,

    /// Also write logs to this file
    #[clap(long, help_heading = "Output")]
    pub log_file: Option<PathBuf>,

    /// Verbose output
    #[clap(short = 'v', long, default_value_t = false)]
    pub verbose: bool,
}

impl From<&Args> for MonitorConfig {
    fn from(args: &Args) -> Self {
        let defaults = MonitorConfig::default();
        Self {
            sample_period: args.sample_period,
            high_latency_threshold: args.high_latency_threshold,
            recovery_window: args.recovery_window,
            start_delay: Duration::from_secs(args.start_delay),
            profiling_mode: args.mode,
            capture_mode: args.capture_mode,
            output_dir: args.output_dir.clone().unwrap_or(defaults.output_dir.clone()),
            shutdown_policy: args.shutdown_policy,
            ..defaults
        }
    }
}

/// Parse duration from string (e.g., "200ms", "10s", "5m", "1h")
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();

    if s.is_empty() {
        return Err("Duration cannot be empty".to_string());
    }

    let (num_str, unit) = if let Some(stripped) = s.strip_suffix("ms") {
        (stripped, "ms")
    } else if let Some(stripped) = s.strip_suffix('s') {
        (stripped, "s")
    } else if let Some(stripped) = s.strip_suffix('m') {
        (stripped, "m")
    } else if let Some(stripped) = s.strip_suffix('h') {
        (stripped, "h")
    } else {
        (s, "s") // Default to seconds
    };

    let num: f64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("Invalid number in duration: {}", num_str))?;
    if !num.is_finite() || num < 0.0 {
        return Err(format!("Duration must be a non-negative number: {}", s));
    }

    let secs = match unit {
        "ms" => num / 1_000.0,
        "s" => num,
        "m" => num * 60.0,
        "h" => num * 3600.0,
        _ => return Err(format!("Invalid duration unit: {}", unit)),
    };

    Duration::try_from_secs_f64(secs)
        .map_err(|e| format!("Duration out of range: {}: {}", s, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("10s").unwrap(), Duration::from_secs(10));
        assert_eq!(parse_duration("5m").unwrap(), Duration::from_secs(300));
        assert_eq!(parse_duration("1h").unwrap(), Duration::from_secs(3600));
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration("1.5s").unwrap(), Duration::from_millis(1500));
        assert_eq!(parse_duration("10").unwrap(), Duration::from_secs(10));

        assert!(parse_duration("").is_err());
        assert!(parse_duration("invalid").is_err());
        assert!(parse_duration("-1s").is_err());
        assert!(parse_duration("1e30s").is_err());
        assert!(parse_duration("1e20h").is_err());
    }

    #[test]
    fn test_oversized_duration_is_rejected_by_clap() {
        let result = Args::try_parse_from(["freeze-watchdog", "--duration", "1e20h"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_defaults_match_monitor_config() {
        let args = Args::parse_from(["freeze-watchdog"]);
        let config = MonitorConfig::from(&args);
        let defaults = MonitorConfig::default();

        assert_eq!(config.sample_period, defaults.sample_period);
        assert_eq!(config.high_latency_threshold, defaults.high_latency_threshold);
        assert_eq!(config.recovery_window, defaults.recovery_window);
        assert_eq!(config.start_delay, defaults.start_delay);
        assert_eq!(config.profiling_mode, ProfilingMode::AlwaysOn);
        assert_eq!(config.output_dir, defaults.output_dir);
        assert!(args.duration.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_args_override_config() {
        let args = Args::parse_from([
            "freeze-watchdog",
            "--mode",
            "gated",
            "--start-delay",
            "5",
            "--output-dir",
            "/tmp/captures",
            "--shutdown-policy",
            "stop-and-save",
            "--recovery-window",
            "2s",
            "--freeze-every",
            "10s",
        ]);
        let config = MonitorConfig::from(&args);

        assert_eq!(config.profiling_mode, ProfilingMode::GatedOnReadiness);
        assert_eq!(config.start_delay, Duration::from_secs(5));
        assert_eq!(config.output_dir, PathBuf::from("/tmp/captures"));
        assert_eq!(config.shutdown_policy, ShutdownPolicy::StopAndSave);
        assert_eq!(config.recovery_window, Duration::from_secs(2));
        assert_eq!(args.freeze_every, Some(Duration::from_secs(10)));
        assert_eq!(args.freeze_for, Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_mode_rejected() {
        assert!(Args::try_parse_from(["freeze-watchdog", "--mode", "sometimes"]).is_err());
    }
}
