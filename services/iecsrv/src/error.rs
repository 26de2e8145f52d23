//! Error handling for the IEC 61850 adapter
//!
//! Connection-class errors (`ConnectionFailure`, `Timeout`) are transient and
//! drive the retry executor; everything else is fatal for the current request.

use errors::{ClassifiedError, ErrorCategory};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Business rule violations reported back to the caller
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FunctionalErrorType {
    /// Requested index is unknown, reserved, or not a LIGHT relay
    LightSwitchingNotAllowedForRelay,
}

impl FunctionalErrorType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::LightSwitchingNotAllowedForRelay => "LIGHT_SWITCHING_NOT_ALLOWED_FOR_RELAY",
        }
    }
}

impl std::fmt::Display for FunctionalErrorType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// IEC 61850 adapter error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IecSrvError {
    /// Association could not be opened or broke down (transient)
    #[error("Connection failure: {0}")]
    ConnectionFailure(String),

    /// Connect or read/write exceeded its time bound (transient)
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Protocol or data fault: missing node, bad value type, rejected write
    #[error("Protocol adapter failure: {0}")]
    ProtocolAdapterFailure(String),

    /// Business rule violation, never retried
    #[error("Functional error [{kind}]: {message}")]
    Functional {
        kind: FunctionalErrorType,
        message: String,
    },

    /// Unknown device or missing configuration record
    #[error("Not found: {0}")]
    NotFound(String),

    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),
}

/// Result type alias for the adapter
pub type Result<T> = std::result::Result<T, IecSrvError>;

impl IecSrvError {
    pub fn connection(msg: impl Into<String>) -> Self {
        IecSrvError::ConnectionFailure(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        IecSrvError::Timeout(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        IecSrvError::ProtocolAdapterFailure(msg.into())
    }

    pub fn functional(kind: FunctionalErrorType, msg: impl Into<String>) -> Self {
        IecSrvError::Functional {
            kind,
            message: msg.into(),
        }
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        IecSrvError::NotFound(msg.into())
    }

    pub fn config(msg: impl Into<String>) -> Self {
        IecSrvError::Config(msg.into())
    }

    // Convenience constructors for specific cases
    pub fn device_not_found(device_identification: impl std::fmt::Display) -> Self {
        IecSrvError::NotFound(format!("Device not found: {}", device_identification))
    }

    pub fn relay_not_allowed(index: u16) -> Self {
        IecSrvError::functional(
            FunctionalErrorType::LightSwitchingNotAllowedForRelay,
            format!("Light switching not allowed for relay with index {}", index),
        )
    }

    /// The functional type, when this is a functional error
    pub fn functional_kind(&self) -> Option<FunctionalErrorType> {
        match self {
            IecSrvError::Functional { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

// ============================================================================
// From implementations for external error types
// ============================================================================

impl From<std::io::Error> for IecSrvError {
    fn from(err: std::io::Error) -> Self {
        IecSrvError::Config(format!("IO: {err}"))
    }
}

impl From<serde_yaml::Error> for IecSrvError {
    fn from(err: serde_yaml::Error) -> Self {
        IecSrvError::Config(format!("YAML: {err}"))
    }
}

impl From<figment::Error> for IecSrvError {
    fn from(err: figment::Error) -> Self {
        IecSrvError::Config(format!("Figment: {err}"))
    }
}

impl From<anyhow::Error> for IecSrvError {
    fn from(err: anyhow::Error) -> Self {
        IecSrvError::Config(format!("{err:#}"))
    }
}

// ============================================================================
// Extension trait for adding context to errors
// ============================================================================

/// Extension trait for adding context to errors
pub trait ErrorExt<T> {
    fn config_error(self, msg: &str) -> Result<T>;
    fn protocol_error(self, msg: &str) -> Result<T>;
}

impl<T, E> ErrorExt<T> for std::result::Result<T, E>
where
    E: std::fmt::Display,
{
    fn config_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| IecSrvError::Config(format!("{msg}: {e}")))
    }

    fn protocol_error(self, msg: &str) -> Result<T> {
        self.map_err(|e| IecSrvError::ProtocolAdapterFailure(format!("{msg}: {e}")))
    }
}

// ============================================================================
// IecSrvError implements ClassifiedError
// ============================================================================

impl ClassifiedError for IecSrvError {
    fn error_code(&self) -> &'static str {
        match self {
            Self::ConnectionFailure(_) => "IECSRV_CONNECTION_FAILURE",
            Self::Timeout(_) => "IECSRV_TIMEOUT",
            Self::ProtocolAdapterFailure(_) => "IECSRV_PROTOCOL_ADAPTER_FAILURE",
            Self::Functional { .. } => "IECSRV_FUNCTIONAL_ERROR",
            Self::NotFound(_) => "IECSRV_NOT_FOUND",
            Self::Config(_) => "IECSRV_CONFIG_ERROR",
        }
    }

    fn category(&self) -> ErrorCategory {
        match self {
            Self::ConnectionFailure(_) => ErrorCategory::Connection,
            Self::Timeout(_) => ErrorCategory::Timeout,
            Self::ProtocolAdapterFailure(_) => ErrorCategory::Protocol,
            Self::Functional { .. } => ErrorCategory::Functional,
            Self::NotFound(_) => ErrorCategory::NotFound,
            Self::Config(_) => ErrorCategory::Configuration,
        }
    }
}
