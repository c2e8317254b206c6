//! Error types for subproc.
//!
//! Every error names the stage that failed ("start failed", "wait failed",
//! "signal failed", "restart failed") followed by the process id and the
//! OS-reported cause. Errors are `Clone` so a single supervision outcome can
//! be handed to several waiters.

use crate::types::{ExitCause, Signal, StreamKind};
use std::io;
use thiserror::Error;

/// Process-specific error types.
#[derive(Error, Debug, Clone)]
pub enum ProcessError {
    /// The OS refused to create the process (missing binary, permission
    /// denied, resource exhaustion).
    #[error("start failed: {id} - {reason}")]
    StartFailed {
        id: String,
        kind: io::ErrorKind,
        reason: String,
    },

    /// The process terminated with a non-zero exit code or by a signal.
    #[error("wait failed: {id} - {cause}")]
    WaitFailed { id: String, cause: ExitCause },

    #[error("signal failed: {id} - {signal}: {reason}")]
    SignalFailed {
        id: String,
        signal: Signal,
        reason: String,
    },

    /// A supervised restart could not launch the replacement process.
    #[error("restart failed: {id} - attempt {attempt}: {source}")]
    RestartFailed {
        id: String,
        attempt: u32,
        #[source]
        source: Box<ProcessError>,
    },

    #[error("restart limit exceeded: {id} - {max_restarts} restarts, last error: {last}")]
    RestartLimitExceeded {
        id: String,
        max_restarts: u32,
        last: Box<ProcessError>,
    },

    /// The stream is not bound to a readable pipe.
    #[error("not capturable: {id} - {stream} is not bound to a pipe")]
    NotCapturable { id: String, stream: StreamKind },

    /// Pull-mode read attempted on a stream bound to a capture buffer.
    #[error("mode conflict: {id} - {stream} is bound to a capture buffer, pull reads are not available")]
    ModeConflict { id: String, stream: StreamKind },

    #[error("invalid state: {id} - expected {expected}, got {actual}")]
    InvalidState {
        id: String,
        expected: String,
        actual: String,
    },

    #[error("configuration error: {id} - {reason}")]
    Configuration { id: String, reason: String },

    /// I/O failure on a pipe of a running process.
    #[error("i/o failed: {id} - {reason}")]
    Io { id: String, reason: String },
}

impl ProcessError {
    pub fn start_failed(id: impl Into<String>, err: &io::Error) -> Self {
        Self::StartFailed {
            id: id.into(),
            kind: err.kind(),
            reason: err.to_string(),
        }
    }

    pub fn wait_failed(id: impl Into<String>, cause: ExitCause) -> Self {
        Self::WaitFailed {
            id: id.into(),
            cause,
        }
    }

    pub fn signal_failed(id: impl Into<String>, signal: Signal, reason: impl Into<String>) -> Self {
        Self::SignalFailed {
            id: id.into(),
            signal,
            reason: reason.into(),
        }
    }

    pub fn restart_failed(id: impl Into<String>, attempt: u32, source: ProcessError) -> Self {
        Self::RestartFailed {
            id: id.into(),
            attempt,
            source: Box::new(source),
        }
    }

    pub fn restart_limit_exceeded(id: impl Into<String>, max_restarts: u32, last: ProcessError) -> Self {
        Self::RestartLimitExceeded {
            id: id.into(),
            max_restarts,
            last: Box::new(last),
        }
    }

    pub fn not_capturable(id: impl Into<String>, stream: StreamKind) -> Self {
        Self::NotCapturable {
            id: id.into(),
            stream,
        }
    }

    pub fn mode_conflict(id: impl Into<String>, stream: StreamKind) -> Self {
        Self::ModeConflict {
            id: id.into(),
            stream,
        }
    }

    pub fn invalid_state(
        id: impl Into<String>,
        expected: impl Into<String>,
        actual: impl Into<String>,
    ) -> Self {
        Self::InvalidState {
            id: id.into(),
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    pub fn configuration(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Configuration {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn io(id: impl Into<String>, err: &io::Error) -> Self {
        Self::Io {
            id: id.into(),
            reason: err.to_string(),
        }
    }

    /// Exit cause carried by a `WaitFailed`, looking through restart wrappers.
    pub fn exit_cause(&self) -> Option<ExitCause> {
        match self {
            Self::WaitFailed { cause, .. } => Some(*cause),
            Self::RestartFailed { source, .. } => source.exit_cause(),
            Self::RestartLimitExceeded { last, .. } => last.exit_cause(),
            _ => None,
        }
    }

    /// Whether the error comes from the OS refusing to launch the program.
    pub fn is_launch_failure(&self) -> bool {
        match self {
            Self::StartFailed { .. } => true,
            Self::RestartFailed { source, .. } => source.is_launch_failure(),
            _ => false,
        }
    }
}

/// Result type for process operations.
pub type ProcessResult<T> = std::result::Result<T, ProcessError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_tags_in_messages() {
        let err = ProcessError::start_failed(
            "sleeper",
            &io::Error::new(io::ErrorKind::NotFound, "No such file or directory"),
        );
        assert!(err.to_string().starts_with("start failed: sleeper"));
        assert!(matches!(err, ProcessError::StartFailed { kind: io::ErrorKind::NotFound, .. }));

        let err = ProcessError::wait_failed("sleeper", ExitCause::Code(3));
        assert_eq!(err.to_string(), "wait failed: sleeper - exit code 3");

        let err = ProcessError::signal_failed("sleeper", Signal::INT, "process already exited");
        assert_eq!(
            err.to_string(),
            "signal failed: sleeper - SIGINT: process already exited"
        );
    }

    #[test]
    fn test_restart_failed_wraps_source() {
        let inner = ProcessError::start_failed(
            "crasher",
            &io::Error::new(io::ErrorKind::PermissionDenied, "Permission denied"),
        );
        let err = ProcessError::restart_failed("crasher", 2, inner);

        assert!(err.to_string().contains("restart failed: crasher - attempt 2"));
        assert!(err.to_string().contains("start failed"));
        assert!(err.is_launch_failure());
        assert_eq!(err.exit_cause(), None);
    }

    #[test]
    fn test_exit_cause_through_limit() {
        let err = ProcessError::restart_limit_exceeded(
            "crasher",
            3,
            ProcessError::wait_failed("crasher", ExitCause::Signal(9)),
        );
        assert_eq!(err.exit_cause(), Some(ExitCause::Signal(9)));
        assert!(!err.is_launch_failure());
    }

    #[test]
    fn test_capture_misuse_errors_are_distinct() {
        let not_capturable = ProcessError::not_capturable("printer", StreamKind::Stdout);
        let conflict = ProcessError::mode_conflict("printer", StreamKind::Stderr);

        assert!(matches!(not_capturable, ProcessError::NotCapturable { .. }));
        assert!(matches!(conflict, ProcessError::ModeConflict { .. }));
        assert!(not_capturable.to_string().contains("stdout"));
        assert!(conflict.to_string().contains("stderr"));
    }
}
