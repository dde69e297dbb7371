//! Error types for statebus.
//!
//! All errors in statebus are strongly typed using thiserror.
//! API misuse (bad arguments, missing callbacks) is always returned as an
//! error. Field resolution problems are reported through the container's
//! diagnostic sink and only become errors in strict mode.

use std::fmt;

use thiserror::Error;

/// Errors raised by the dispatch engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DispatchError {
    #[error("Listener for {filter} registered without a callback")]
    InvalidCallback {
        filter: String,
    },

    #[error("Pending result must be a deferred value; {found} given")]
    InvalidDisposition {
        found: &'static str,
    },
}

/// Errors raised by state operations on a container.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Key '{key}' is not a valid list index")]
    InvalidIndex {
        key: String,
    },

    #[error("Operation '{operation}' requires a list-backed container")]
    NotAList {
        operation: String,
    },

    #[error("Invalid arguments for {method}(): {reason}")]
    InvalidArguments {
        method: String,
        reason: String,
    },
}

/// A field or call could not be resolved.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ResolutionError {
    #[error("{name}() is not callable in the expression {expression}")]
    NotCallable {
        name: String,
        expression: String,
    },

    #[error("\"{name}\" is not a function (called on {scope})")]
    NotAFunction {
        name: String,
        scope: String,
    },

    #[error("Operation \"{operation}\" is not supported")]
    Unsupported {
        operation: String,
    },
}

/// A [`ResolutionError`] downgraded to a warning.
///
/// This is what the diagnostic sink receives when the container is not in
/// strict mode.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolutionWarning(pub ResolutionError);

impl fmt::Display for ResolutionWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "warning: {}", self.0)
    }
}

impl From<ResolutionError> for ResolutionWarning {
    fn from(err: ResolutionError) -> Self {
        Self(err)
    }
}

/// Errors raised by the change feed.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StreamError {
    #[error("Operation timed out after {duration_ms}ms")]
    Timeout {
        duration_ms: u64,
    },

    #[error("Change stream disconnected")]
    Disconnected,
}

/// Top-level error type for statebus.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ObservableError {
    #[error("Dispatch error: {0}")]
    Dispatch(#[from] DispatchError),

    #[error("State error: {0}")]
    State(#[from] StateError),

    #[error("Resolution error: {0}")]
    Resolution(#[from] ResolutionError),

    #[error("Stream error: {0}")]
    Stream(#[from] StreamError),
}

impl ObservableError {
    /// Returns true if this is a dispatch error.
    #[must_use]
    pub const fn is_dispatch(&self) -> bool {
        matches!(self, Self::Dispatch(_))
    }

    /// Returns true if this is a state error.
    #[must_use]
    pub const fn is_state(&self) -> bool {
        matches!(self, Self::State(_))
    }

    /// Returns true if this is a resolution error.
    #[must_use]
    pub const fn is_resolution(&self) -> bool {
        matches!(self, Self::Resolution(_))
    }

    /// Returns true if this is a stream error.
    #[must_use]
    pub const fn is_stream(&self) -> bool {
        matches!(self, Self::Stream(_))
    }

    /// Returns true if retrying the same call can succeed.
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Stream(StreamError::Timeout { .. }))
    }
}

/// Result type alias for statebus operations.
pub type ObservableResult<T> = Result<T, ObservableError>;
