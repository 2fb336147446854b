//! Error types for capture session operations.

/// Errors surfaced by the session multiplexer.
///
/// `DeviceUnavailable` and `BindFailure` are broadcast to every consumer that
/// was part of the failed bind attempt, since binding is all-or-nothing.
/// Neither is retried automatically; re-acquiring is the caller's decision.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SessionError {
    /// Neither the requested nor the fallback device context could be obtained.
    #[error("no capture device context could be obtained: {0}")]
    DeviceUnavailable(String),

    /// The hardware rejected the requested combination of active consumers.
    #[error("hardware rejected the bind attempt: {0}")]
    BindFailure(String),

    /// Release without a matching acquire, or capture requested while the
    /// snapshot consumer is not active. Never affects session health.
    #[error("consumer misuse: {0}")]
    ConsumerMisuse(String),

    /// The hardware reported a capture failure for an accepted request.
    #[error("capture failed: {0}")]
    CaptureFailed(String),

    /// A requested capture produced no result within the caller's deadline.
    #[error("capture request produced no result within the deadline")]
    CaptureTimeout,

    /// The session actor is gone; only seen during process shutdown.
    #[error("capture session is shut down")]
    Closed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            format!("{}", SessionError::DeviceUnavailable("no camera".to_string())),
            "no capture device context could be obtained: no camera"
        );
        assert_eq!(
            format!("{}", SessionError::BindFailure("busy".to_string())),
            "hardware rejected the bind attempt: busy"
        );
        assert!(format!("{}", SessionError::CaptureTimeout).contains("deadline"));
        assert!(format!("{}", SessionError::Closed).contains("shut down"));
    }

    #[test]
    fn test_consumer_misuse_display() {
        let err = SessionError::ConsumerMisuse("release without acquire".to_string());
        assert_eq!(format!("{}", err), "consumer misuse: release without acquire");
    }
}
