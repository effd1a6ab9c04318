//! Cache error types and result alias.
//!
//! Lookups against the indices never fail: a miss is an empty result, not an
//! error. The types here cover the remaining failure surfaces:
//!
//! - [`CacheError::Corruption`] - an index self-check found a broken invariant
//! - [`CacheError::Serialization`] - a model could not be encoded or decoded
//! - [`CacheError::Connection`] - a collaborator (e.g. the command repository) is unreachable
//! - [`CacheError::Internal`] - any other collaborator failure
//!
//! # Example
//!
//! ```
//! use gateway_common_cache::{CacheError, CacheResult};
//!
//! fn persist() -> CacheResult<()> {
//!     Err(CacheError::connection("repository unavailable"))
//! }
//!
//! assert!(persist().is_err());
//! ```

use std::sync::Arc;

use thiserror::Error;

/// A boxed error type for source chain tracking.
pub type BoxError = Arc<dyn std::error::Error + Send + Sync>;

/// Result type alias for cache and collaborator operations.
pub type CacheResult<T> = Result<T, CacheError>;

/// Errors raised by the cache layer and its collaborators.
///
/// # Non-exhaustive
///
/// New variants may be added in minor releases. Downstream match expressions
/// must include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum CacheError {
    /// An index invariant does not hold.
    ///
    /// The write paths make this structurally impossible; seeing it means a
    /// programming error. Callers should log it at error level and treat the
    /// node's cache as untrustworthy until it is rebuilt from the sync source.
    #[error("Index corruption in {index} at {key}: {reason}")]
    Corruption {
        /// The index in which the violation was found.
        index: &'static str,
        /// The offending key, rendered for diagnostics.
        key: String,
        /// What invariant was violated.
        reason: String,
    },

    /// Serialization or deserialization error.
    #[error("Serialization error: {message}")]
    Serialization {
        /// Description of the serialization error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// A collaborator could not be reached.
    #[error("Connection error: {message}")]
    Connection {
        /// Description of the connection error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },

    /// Catch-all for collaborator failures that fit no other category.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
        /// The underlying error.
        #[source]
        source: Option<BoxError>,
    },
}

impl CacheError {
    /// Creates a new `Corruption` error.
    #[must_use]
    pub fn corruption(
        index: &'static str,
        key: impl Into<String>,
        reason: impl Into<String>,
    ) -> Self {
        Self::Corruption { index, key: key.into(), reason: reason.into() }
    }

    /// Creates a new `Serialization` error with the given message.
    #[must_use]
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization { message: message.into(), source: None }
    }

    /// Creates a new `Serialization` error with a message and source error.
    #[must_use]
    pub fn serialization_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Serialization { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Connection` error with the given message.
    #[must_use]
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Connection { message: message.into(), source: None }
    }

    /// Creates a new `Connection` error with a message and source error.
    #[must_use]
    pub fn connection_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection { message: message.into(), source: Some(Arc::new(source)) }
    }

    /// Creates a new `Internal` error with the given message.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal { message: message.into(), source: None }
    }

    /// Creates a new `Internal` error with a message and source error.
    #[must_use]
    pub fn internal_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Internal { message: message.into(), source: Some(Arc::new(source)) }
    }
}

impl From<serde_json::Error> for CacheError {
    fn from(err: serde_json::Error) -> Self {
        Self::serialization_with_source(err.to_string(), err)
    }
}

/// Configuration validation errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ConfigError {
    /// A numeric or duration setting is below its allowed minimum.
    #[error("{field} must be at least {min}, got {value}")]
    BelowMinimum {
        /// The offending field.
        field: &'static str,
        /// The minimum accepted value, rendered.
        min: String,
        /// The supplied value, rendered.
        value: String,
    },

    /// A required setting is missing or empty.
    #[error("{field} is required")]
    Missing {
        /// The missing field.
        field: &'static str,
    },
}
