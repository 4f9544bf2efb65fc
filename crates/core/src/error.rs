//! Pipeline error taxonomy
//!
//! Every failure that can surface from the handler chain or the policy
//! executor is a [`PipelineError`] variant carrying structured detail
//! (status code, configured bound, attempt count) so callers can branch on
//! the kind of failure rather than parsing message text.
//!
//! Classification rules worth knowing:
//! - `Cancelled` always reflects the *caller's* cancellation. A
//!   handler-imposed bound that elapsed is `Timeout` instead; the two are
//!   never conflated.
//! - Transport and downstream-status failures propagate unchanged unless a
//!   handler's contract explicitly intercepts them (401 retry, timeout
//!   translation).

use std::time::Duration;

use thiserror::Error;

/// Standard result type for pipeline operations
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors surfaced by handlers, policies, and the registry
#[derive(Debug, Error)]
pub enum PipelineError {
    /// The token endpoint rejected or failed the refresh attempt
    #[error("authorization refresh failed (status: {status:?}): {detail}")]
    AuthorizationFailed {
        /// Downstream status code, if a response was received at all
        status: Option<u16>,
        /// Human-readable context for logs
        detail: String,
    },

    /// Downstream rejected the request again after a forced token refresh
    #[error("request unauthorized after forced refresh (status: {status})")]
    UnauthorizedAfterRetry { status: u16 },

    /// A handler- or policy-imposed bound elapsed before the inner call
    /// completed
    #[error("operation timed out after {bound:?}")]
    Timeout { bound: Duration },

    /// The caller's own cancellation fired
    #[error("operation cancelled by caller")]
    Cancelled,

    /// Retry policy consumed its attempt budget
    #[error("retry attempts exhausted after {attempts} tries")]
    RetryExhausted {
        attempts: u32,
        /// Display form of the last error observed, for diagnostics
        last_error: Option<String>,
    },

    /// Circuit breaker refused to attempt the call (fails fast)
    #[error("circuit breaker is open, rejecting calls")]
    CircuitOpen,

    /// Bulkhead concurrency capacity exceeded
    #[error("bulkhead capacity exceeded: {capacity} concurrent operations")]
    BulkheadFull { capacity: usize },

    /// Registry lookup miss (programmer error, fails at setup time)
    #[error("no policy registered under name '{name}'")]
    NotFound { name: String },

    /// Duplicate registration (programmer error, fails at setup time)
    #[error("policy name '{name}' is already registered")]
    DuplicateName { name: String },

    /// Invalid policy or pipeline configuration
    #[error("invalid configuration: {message}")]
    InvalidConfiguration { message: String },

    /// Transport-level failure (connect, DNS, protocol)
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Payload could not be serialized or deserialized
    #[error("serialization error: {message}")]
    Serialization { message: String },

    /// Failure from an arbitrary caller-supplied operation run through the
    /// policy executor
    #[error("operation failed: {source}")]
    Operation {
        #[source]
        source: Box<dyn std::error::Error + Send + Sync + 'static>,
    },
}

impl PipelineError {
    /// Wrap an arbitrary operation error for execution under policies
    pub fn operation<E>(source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Operation { source: Box::new(source) }
    }

    /// Convenience constructor for transport failures
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport { message: message.into() }
    }

    /// Convenience constructor for serialization failures
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into() }
    }

    /// Whether a retry policy may re-attempt after this error
    ///
    /// Cancellation is never retryable: the caller asked to stop. Setup-time
    /// errors (registry misuse, bad configuration) are never retryable
    /// either. Circuit-open is excluded so a retry loop does not hammer a
    /// breaker that already decided to fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Transport { .. } | Self::Timeout { .. } | Self::Operation { .. } => true,
            Self::AuthorizationFailed { .. }
            | Self::UnauthorizedAfterRetry { .. }
            | Self::Cancelled
            | Self::RetryExhausted { .. }
            | Self::CircuitOpen
            | Self::BulkheadFull { .. }
            | Self::NotFound { .. }
            | Self::DuplicateName { .. }
            | Self::InvalidConfiguration { .. }
            | Self::Serialization { .. } => false,
        }
    }

    /// Whether this error reflects the caller's own cancellation
    pub fn is_cancellation(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

impl From<serde_json::Error> for PipelineError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization { message: err.to_string() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_and_timeout_are_retryable() {
        assert!(PipelineError::transport("connection refused").is_retryable());
        assert!(PipelineError::Timeout { bound: Duration::from_secs(1) }.is_retryable());
    }

    #[test]
    fn cancellation_is_terminal() {
        let err = PipelineError::Cancelled;
        assert!(!err.is_retryable());
        assert!(err.is_cancellation());
    }

    #[test]
    fn setup_errors_are_not_retryable() {
        assert!(!PipelineError::NotFound { name: "x".into() }.is_retryable());
        assert!(!PipelineError::DuplicateName { name: "x".into() }.is_retryable());
        assert!(
            !PipelineError::InvalidConfiguration { message: "bad".into() }.is_retryable()
        );
    }

    #[test]
    fn error_messages_carry_structured_detail() {
        let err = PipelineError::Timeout { bound: Duration::from_millis(250) };
        assert!(err.to_string().contains("250ms"));

        let err = PipelineError::UnauthorizedAfterRetry { status: 401 };
        assert!(err.to_string().contains("401"));
    }
}
