use thiserror::Error;

/// Errors that can occur while running a workout session
#[derive(Error, Debug)]
pub enum WorkoutError {
    /// Bluetooth Low Energy related errors
    #[error("BLE error: {0}")]
    Ble(#[from] btleplug::Error),

    /// Rep counter not found during scanning
    #[error("Rep counter not found")]
    DeviceNotFound,

    /// Device connection failed
    #[error("Failed to connect to rep counter: {0}")]
    ConnectionFailed(String),

    /// Device disconnected unexpectedly
    #[error("Rep counter disconnected")]
    Disconnected,

    /// Operation timeout
    #[error("Operation timed out after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds
        timeout_ms: u64,
    },

    /// Invalid parameters (plan, weight input, configuration)
    #[error("Invalid parameters: {0}")]
    InvalidParameters(String),

    /// Wire protocol error
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// Persistence collaborator rejected the log entry
    #[error("Failed to save workout: {0}")]
    Persistence(String),

    /// The engine event loop is no longer running
    #[error("Workout engine has stopped")]
    EngineStopped,

    /// Other errors
    #[error("Other error: {0}")]
    Other(String),
}

/// Result type for workout engine operations
pub type Result<T> = std::result::Result<T, WorkoutError>;

impl WorkoutError {
    /// Check if this error indicates a sensor link issue
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Ble(_) | Self::ConnectionFailed(_) | Self::Disconnected | Self::DeviceNotFound
        )
    }

    /// Check if this error is recoverable by retrying
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. }
                | Self::Disconnected
                | Self::ConnectionFailed(_)
                | Self::DeviceNotFound
                | Self::Persistence(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_classification() {
        let connection_error = WorkoutError::ConnectionFailed("test".to_string());
        assert!(connection_error.is_connection_error());
        assert!(connection_error.is_recoverable());

        let timeout_error = WorkoutError::Timeout { timeout_ms: 5000 };
        assert!(!timeout_error.is_connection_error());
        assert!(timeout_error.is_recoverable());

        let invalid = WorkoutError::InvalidParameters("no sets".to_string());
        assert!(!invalid.is_connection_error());
        assert!(!invalid.is_recoverable());

        assert!(!WorkoutError::EngineStopped.is_recoverable());
    }

    #[test]
    fn test_error_display() {
        let error = WorkoutError::InvalidParameters("target reps must be positive".to_string());
        let error_string = format!("{error}");
        assert!(error_string.contains("Invalid parameters"));
        assert!(error_string.contains("target reps must be positive"));

        let error = WorkoutError::Persistence("backend unavailable".to_string());
        assert_eq!(
            error.to_string(),
            "Failed to save workout: backend unavailable"
        );
    }
}
