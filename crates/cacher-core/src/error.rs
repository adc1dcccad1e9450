use thiserror::Error;

/// Errors produced by cache store, lock store and manager operations.
///
/// Every variant that comes from a store call carries the key and the
/// operation so callers can log it and fall through to the source of truth.
#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Key does not exist: {key}")]
    KeyNotExist { key: String },

    #[error("Timed out acquiring lock {name} after {attempts} attempts")]
    LockTimeout { name: String, attempts: u32 },

    #[error("Cache store unavailable during {operation} on {key}: {message}")]
    Unavailable {
        operation: &'static str,
        key: String,
        message: String,
    },

    #[error("Cache store {operation} on {key} exceeded {timeout_ms}ms")]
    Timeout {
        operation: &'static str,
        key: String,
        timeout_ms: u64,
    },

    #[error("Failed to decode cached payload for {key}: {source}")]
    Decode {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Failed to encode cache payload: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("Invalid cache item: {message}")]
    InvalidItem { message: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl CacheError {
    /// Create a new KeyNotExist error
    pub fn key_not_exist(key: impl Into<String>) -> Self {
        Self::KeyNotExist { key: key.into() }
    }

    /// Create a new LockTimeout error
    pub fn lock_timeout(name: impl Into<String>, attempts: u32) -> Self {
        Self::LockTimeout {
            name: name.into(),
            attempts,
        }
    }

    /// Create a new Unavailable error from any transport failure
    pub fn unavailable(
        operation: &'static str,
        key: impl Into<String>,
        err: impl std::fmt::Display,
    ) -> Self {
        Self::Unavailable {
            operation,
            key: key.into(),
            message: err.to_string(),
        }
    }

    /// Create a new Timeout error
    pub fn timeout(operation: &'static str, key: impl Into<String>, timeout_ms: u64) -> Self {
        Self::Timeout {
            operation,
            key: key.into(),
            timeout_ms,
        }
    }

    /// Create a new Decode error
    pub fn decode(key: impl Into<String>, source: serde_json::Error) -> Self {
        Self::Decode {
            key: key.into(),
            source,
        }
    }

    /// Create a new InvalidItem error
    pub fn invalid_item(message: impl Into<String>) -> Self {
        Self::InvalidItem {
            message: message.into(),
        }
    }

    /// Create a new Configuration error
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration(message.into())
    }

    /// True for the expected cache-miss signal.
    pub fn is_not_exist(&self) -> bool {
        matches!(self, Self::KeyNotExist { .. })
    }

    pub fn is_lock_timeout(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// True when the backing store could not be reached in time.
    pub fn is_unavailable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Timeout { .. })
    }

    /// Get error category for logging/monitoring
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::KeyNotExist { .. } => ErrorCategory::Miss,
            Self::LockTimeout { .. } => ErrorCategory::Contention,
            Self::Unavailable { .. } | Self::Timeout { .. } => ErrorCategory::Unavailable,
            Self::Decode { .. } | Self::Encode(_) => ErrorCategory::Serialization,
            Self::InvalidItem { .. } => ErrorCategory::Validation,
            Self::Configuration(_) => ErrorCategory::Configuration,
        }
    }
}

/// Error categories for monitoring and classification
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Miss,
    Contention,
    Unavailable,
    Serialization,
    Validation,
    Configuration,
}

impl std::fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Miss => write!(f, "miss"),
            Self::Contention => write!(f, "contention"),
            Self::Unavailable => write!(f, "unavailable"),
            Self::Serialization => write!(f, "serialization"),
            Self::Validation => write!(f, "validation"),
            Self::Configuration => write!(f, "configuration"),
        }
    }
}

/// Convenience result type for cache operations
pub type CacheResult<T> = std::result::Result<T, CacheError>;
