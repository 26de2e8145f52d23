//! Shared error classification for the adapter services
//!
//! Every service keeps its own domain error enum (e.g. `IecSrvError`) and gains a
//! common outward-facing interface by implementing [`ClassifiedError`]. The retry
//! machinery and the response boundary only ever look at this interface.

use serde::{Deserialize, Serialize};

// ============================================================================
// ErrorInfo - boundary error payload
// ============================================================================

/// Standard error information attached to failure responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    /// Stable error code (e.g. `IECSRV_CONNECTION_FAILURE`)
    pub code: String,
    /// Human readable message
    pub message: String,
    /// Error category name
    pub category: String,
    /// Whether the caller may resubmit the request later
    pub retryable: bool,
    /// Detailed error description
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

impl ErrorInfo {
    /// Add details
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }
}

// ============================================================================
// ErrorCategory
// ============================================================================

/// Error category enum - used for classification and retry decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    // Infrastructure layer
    Configuration,
    Network,
    Timeout,

    // Protocol/communication layer
    Connection,
    Protocol,

    // Business logic layer
    Functional,
    Validation,
    NotFound,

    // System level
    Internal,
}

impl ErrorCategory {
    /// Transient categories: a later attempt against the same device may succeed
    pub fn is_transient(self) -> bool {
        matches!(self, Self::Connection | Self::Network | Self::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Configuration => "configuration",
            Self::Network => "network",
            Self::Timeout => "timeout",
            Self::Connection => "connection",
            Self::Protocol => "protocol",
            Self::Functional => "functional",
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::Internal => "internal",
        }
    }
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// ClassifiedError - architectural layer
// ============================================================================

/// Error capability trait
///
/// # Design principles
///
/// 1. Domain preservation: services keep their own error variants
/// 2. Unified interface: retry and response code only see this trait
/// 3. Sensible defaults: category-based behaviour, overridable per service
pub trait ClassifiedError: std::error::Error + Send + Sync + 'static {
    /// Get error code (for responses, logs, monitoring)
    fn error_code(&self) -> &'static str;

    /// Get error category
    fn category(&self) -> ErrorCategory;

    /// Whether an immediate retry of the failed operation may succeed
    fn is_transient(&self) -> bool {
        self.category().is_transient()
    }

    /// Whether the external caller may resubmit the whole request later
    fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Connection | ErrorCategory::Network
        )
    }

    /// Get log level
    fn log_level(&self) -> tracing::Level {
        use tracing::Level;
        match self.category() {
            ErrorCategory::Internal | ErrorCategory::Configuration | ErrorCategory::Protocol => {
                Level::ERROR
            },
            ErrorCategory::Network | ErrorCategory::Timeout | ErrorCategory::Connection => {
                Level::WARN
            },
            ErrorCategory::Functional | ErrorCategory::Validation | ErrorCategory::NotFound => {
                Level::INFO
            },
        }
    }

    /// Convert to boundary ErrorInfo
    fn to_error_info(&self) -> ErrorInfo {
        ErrorInfo {
            code: self.error_code().to_string(),
            message: self.to_string(),
            category: self.category().as_str().to_string(),
            retryable: self.is_retryable(),
            details: None,
        }
    }
}

/// Emit an error through `tracing` at the level its classification asks for
///
/// `tracing` macros need a constant level, hence the dispatch.
pub fn log_classified<E: ClassifiedError + ?Sized>(error: &E, context: &str) {
    let code = error.error_code();
    match error.log_level() {
        tracing::Level::ERROR => tracing::error!(error_code = code, "{}: {}", context, error),
        tracing::Level::WARN => tracing::warn!(error_code = code, "{}: {}", context, error),
        tracing::Level::INFO => tracing::info!(error_code = code, "{}: {}", context, error),
        tracing::Level::DEBUG => tracing::debug!(error_code = code, "{}: {}", context, error),
        tracing::Level::TRACE => tracing::trace!(error_code = code, "{}: {}", context, error),
    }
}

// Tests
#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    enum SampleError {
        #[error("link down")]
        LinkDown,
        #[error("bad index")]
        BadIndex,
        #[error("too slow")]
        TooSlow,
    }

    impl ClassifiedError for SampleError {
        fn error_code(&self) -> &'static str {
            match self {
                Self::LinkDown => "SAMPLE_LINK_DOWN",
                Self::BadIndex => "SAMPLE_BAD_INDEX",
                Self::TooSlow => "SAMPLE_TOO_SLOW",
            }
        }

        fn category(&self) -> ErrorCategory {
            match self {
                Self::LinkDown => ErrorCategory::Connection,
                Self::BadIndex => ErrorCategory::Functional,
                Self::TooSlow => ErrorCategory::Timeout,
            }
        }
    }

    #[test]
    fn test_transient_categories() {
        assert!(ErrorCategory::Connection.is_transient());
        assert!(ErrorCategory::Timeout.is_transient());
        assert!(!ErrorCategory::Protocol.is_transient());
        assert!(!ErrorCategory::Functional.is_transient());
        assert!(!ErrorCategory::NotFound.is_transient());
    }

    #[test]
    fn test_retryable_only_for_connection_class() {
        assert!(SampleError::LinkDown.is_retryable());
        assert!(!SampleError::TooSlow.is_retryable());
        assert!(SampleError::TooSlow.is_transient());
        assert!(!SampleError::BadIndex.is_retryable());
    }

    #[test]
    fn test_error_info() {
        let info = SampleError::LinkDown.to_error_info();
        assert_eq!(info.code, "SAMPLE_LINK_DOWN");
        assert_eq!(info.category, "connection");
        assert!(info.retryable);

        let json = serde_json::to_value(info.with_details("after 3 attempts")).unwrap();
        assert_eq!(json["details"], "after 3 attempts");
    }

    #[test]
    fn test_log_level() {
        assert_eq!(SampleError::BadIndex.log_level(), tracing::Level::INFO);
        assert_eq!(SampleError::LinkDown.log_level(), tracing::Level::WARN);
    }
}
