//! # Utility Functions
//!
//! Small helpers shared across the crate: human-readable formatting for
//! latencies and capture lengths, validation of operator input, and
//! platform paths.
//!
//! ```rust
//! use freeze_watchdog::utils::*;
//! use std::time::Duration;
//!
//! assert_eq!(format_capture_duration(Duration::from_millis(4100)), "4.1s");
//! assert_eq!(format_latency_ms(12.345), "12.3ms");
//! assert!(validate_start_delay_secs(0).is_err());
//! ```

use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{Result, WatchdogError};

/// Directory name used under the platform data directory.
const APP_DIR: &str = "freeze-watchdog";

/// Upper bound for the start delay; anything longer is almost certainly a typo.
pub const MAX_START_DELAY_SECS: u64 = 3600;

/// Unique identifier for one monitoring session.
///
/// Used to name report files and to correlate log lines with a report when
/// several sessions run on the same machine.
pub fn generate_session_id() -> String {
    Uuid::new_v4().to_string()
}

/// Format a capture or freeze length the way status messages show it,
/// with one decimal of seconds (`"3.2s"`).
pub fn format_capture_duration(duration: Duration) -> String {
    format!("{:.1}s", duration.as_secs_f64())
}

/// Format a latency in milliseconds.
///
/// Sub-second values keep one decimal of milliseconds; longer stalls switch
/// to seconds so that a 7 s freeze does not read as `7000.0ms`.
pub fn format_latency_ms(latency_ms: f64) -> String {
    if latency_ms < 1_000.0 {
        format!("{:.1}ms", latency_ms)
    } else {
        format!("{:.2}s", latency_ms / 1_000.0)
    }
}

/// Validate an operator-supplied start delay.
///
/// The delay is a whole number of seconds, at least one. Zero would start a
/// capture on the first scheduling hiccup.
pub fn validate_start_delay_secs(secs: u64) -> Result<()> {
    if secs == 0 {
        return Err(WatchdogError::InvalidConfig(
            "start delay must be at least 1 second".into(),
        ));
    }
    if secs > MAX_START_DELAY_SECS {
        return Err(WatchdogError::InvalidConfig(format!(
            "start delay {}s is too long (maximum {}s)",
            secs, MAX_START_DELAY_SECS
        )));
    }
    Ok(())
}

/// Default capture directory: `<data dir>/freeze-watchdog/captures`.
///
/// Falls back to the system temp directory when the platform has no data
/// directory (e.g. a stripped-down container without `$HOME`).
pub fn default_output_dir() -> PathBuf {
    dirs::data_local_dir()
        .or_else(dirs::data_dir)
        .unwrap_or_else(std::env::temp_dir)
        .join(APP_DIR)
        .join("captures")
}

/// Progress bar for backend initialization status, e.g. `[=====     ] 50%`.
pub fn create_progress_indicator(percent: u8, width: usize) -> String {
    let percent = percent.min(100) as usize;
    let filled = percent * width / 100;
    let empty = width - filled;
    format!("[{}{}] {}%", "=".repeat(filled), " ".repeat(empty), percent)
}
