//! Error types for the gencache library.
//!
//! ## Key Components
//!
//! - [`CacheError`]: Returned by cache and index operations. The only variant is
//!   a lock timeout; misses, failed loads and stale-cache flushes are not errors.
//! - [`ConfigError`]: Returned when cache configuration parameters are invalid
//!   (e.g. zero capacity, `max_age` not above `min_age`).
//!
//! ## Example Usage
//!
//! ```
//! use std::time::Duration;
//! use gencache::builder::CacheBuilder;
//! use gencache::error::ConfigError;
//!
//! let bad = CacheBuilder::new(0).try_build::<String>();
//! assert!(matches!(bad, Err(ConfigError { .. })));
//!
//! let bad_ages = CacheBuilder::new(10)
//!     .min_age(Duration::from_secs(60))
//!     .max_age(Duration::from_secs(30))
//!     .try_build::<String>();
//! assert!(bad_ages.is_err());
//! ```

use std::time::Duration;

/// Errors surfaced by cache and index operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[non_exhaustive]
pub enum CacheError {
    /// A lock could not be acquired within the configured timeout.
    #[error("timed out after {timeout:?} waiting for the {resource} lock")]
    LockTimeout {
        /// Which lock timed out (`"generation ring"` or `"index `<name>`"`).
        resource: String,
        timeout: Duration,
    },
}

impl CacheError {
    pub(crate) fn lock_timeout(resource: impl Into<String>, timeout: Duration) -> Self {
        CacheError::LockTimeout {
            resource: resource.into(),
            timeout,
        }
    }

    /// Returns `true` if this error is a lock timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CacheError::LockTimeout { .. })
    }
}

/// Error returned when cache configuration parameters are invalid.
///
/// Produced by [`CacheBuilder::try_build`](crate::builder::CacheBuilder::try_build).
/// Carries a human-readable description of which parameter failed validation.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{message}")]
pub struct ConfigError {
    message: String,
}

impl ConfigError {
    /// Creates a new `ConfigError` with the given description.
    #[inline]
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            message: msg.into(),
        }
    }

    /// Returns the error description.
    #[inline]
    pub fn message(&self) -> &str {
        &self.message
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lock_timeout_display_names_resource() {
        let err = CacheError::lock_timeout("index `RoomID`", Duration::from_millis(250));
        let msg = err.to_string();
        assert!(msg.contains("index `RoomID`"));
        assert!(msg.contains("250ms"));
        assert!(err.is_timeout());
    }

    #[test]
    fn config_display_shows_message() {
        let err = ConfigError::new("capacity must be > 0");
        assert_eq!(err.to_string(), "capacity must be > 0");
        assert_eq!(err.message(), "capacity must be > 0");
    }

    #[test]
    fn errors_implement_std_error() {
        fn assert_error<T: std::error::Error + Send + Sync + 'static>() {}
        assert_error::<CacheError>();
        assert_error::<ConfigError>();
    }
}
