use thiserror::Error;

/// Errors surfaced by the freeze watchdog library.
///
/// Backend failures inside the watchdog loop never reach callers as errors;
/// they are converted to status messages. The variants here cover lifecycle
/// misuse and configuration problems detected at the edges.
#[derive(Debug, Error)]
pub enum WatchdogError {
    /// A component was started twice.
    #[error("{0} is already started")]
    AlreadyStarted(&'static str),

    /// The component was stopped and cannot be restarted.
    #[error("{0} has been stopped")]
    Stopped(&'static str),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, WatchdogError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        assert_eq!(
            WatchdogError::AlreadyStarted("sampler").to_string(),
            "sampler is already started"
        );
        assert_eq!(
            WatchdogError::InvalidConfig("start delay must be at least 1s".into()).to_string(),
            "invalid configuration: start delay must be at least 1s"
        );
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing");
        let err: WatchdogError = io.into();
        assert!(matches!(err, WatchdogError::Io(_)));
    }
}
