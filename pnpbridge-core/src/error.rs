//! Error types for the bridge core.

use thiserror::Error;

/// Result type alias using [`BridgeError`].
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors reported by the bridge core and by plugins across the plugin boundary.
#[derive(Error, Debug)]
pub enum BridgeError {
    /// Malformed argument, manifest, payload or illegal lifecycle transition.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A resource could not be allocated.
    #[error("Insufficient memory: {0}")]
    InsufficientMemory(String),

    /// An identity or component name is already registered.
    #[error("Duplicate entry: {0}")]
    DuplicateEntry(String),

    /// Unknown component, adapter, or an unmatched device.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Generic adapter or cloud failure.
    #[error("Operation failed: {0}")]
    Failed(String),

    /// The component does not implement the requested command or property.
    #[error("Not supported: {0}")]
    NotSupported(String),

    /// No twin client is currently connected.
    #[error("Twin client is not connected")]
    NotConnected,

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file not found.
    #[error("Configuration file not found: {path}")]
    ConfigNotFound { path: String },

    /// Configuration parse error.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// Configuration validation error.
    #[error("Configuration validation failed: {0}")]
    ConfigValidation(String),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error with context.
    #[error("{context}: {source}")]
    WithContext {
        context: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },
}

impl BridgeError {
    /// Create an invalid argument error.
    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Create a duplicate entry error.
    pub fn duplicate(msg: impl Into<String>) -> Self {
        Self::DuplicateEntry(msg.into())
    }

    /// Create a not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    /// Create a generic failure.
    pub fn failed(msg: impl Into<String>) -> Self {
        Self::Failed(msg.into())
    }

    /// Create a not supported error.
    pub fn not_supported(msg: impl Into<String>) -> Self {
        Self::NotSupported(msg.into())
    }

    /// Create a configuration validation error.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::ConfigValidation(msg.into())
    }

    /// Wrap an error with context.
    pub fn with_context<E>(context: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::WithContext {
            context: context.into(),
            source: Box::new(source),
        }
    }

    /// Whether a reconciliation hitting this error should be retried later.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Failed(_) | Self::NotConnected | Self::Io(_) | Self::WithContext { .. }
        )
    }
}

impl From<serde_json::Error> for BridgeError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<json5::Error> for BridgeError {
    fn from(err: json5::Error) -> Self {
        Self::ConfigParse(err.to_string())
    }
}

impl From<std::collections::TryReserveError> for BridgeError {
    fn from(err: std::collections::TryReserveError) -> Self {
        Self::InsufficientMemory(err.to_string())
    }
}

impl From<pnpbridge_common::Error> for BridgeError {
    fn from(err: pnpbridge_common::Error) -> Self {
        match err {
            pnpbridge_common::Error::Config(msg) => Self::Config(msg),
            pnpbridge_common::Error::Io(e) => Self::Io(e),
            pnpbridge_common::Error::Json(e) => Self::Serialization(e.to_string()),
            pnpbridge_common::Error::Cbor(msg) => Self::Serialization(msg),
            other => Self::Failed(other.to_string()),
        }
    }
}
