//! Error types for token resolution and subscription dispatch.
//!
//! Resolution itself never fails: an unknown token or a lookup miss is an
//! empty result. Errors only arise while building components from
//! configuration ([`AuthnError`]) and while handing a subscription to the
//! API runtime ([`DispatchError`]).

use std::time::Duration;

use gateway_common_cache::{BoxError, CacheError, ConfigError};
use thiserror::Error;

/// Errors raised while setting up or operating the authn components.
///
/// # Non-exhaustive
///
/// This enum is marked `#[non_exhaustive]`. Downstream match expressions must
/// include a wildcard arm (`_ =>`).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AuthnError {
    /// Invalid configuration.
    #[error("Invalid configuration: {0}")]
    Config(
        /// The validation failure.
        #[from]
        ConfigError,
    ),

    /// A cache collaborator failed.
    #[error("Cache error: {0}")]
    Cache(
        /// The underlying cache error.
        #[from]
        CacheError,
    ),
}

/// Result type alias for authn operations.
pub type Result<T> = std::result::Result<T, AuthnError>;

/// Failure to deploy a subscription to the API runtime of this node.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum DispatchError {
    /// The runtime refused the subscription.
    #[error("Dispatch rejected: {message}")]
    Rejected {
        /// Why the subscription was refused.
        message: String,
    },

    /// The runtime could not be reached.
    #[error("Dispatcher unavailable: {message}")]
    Unavailable {
        /// Description of the failure.
        message: String,
        /// The underlying error, if any.
        #[source]
        source: Option<BoxError>,
    },

    /// The dispatch did not complete within the configured timeout.
    #[error("Dispatch timed out after {after:?}")]
    Timeout {
        /// The timeout that elapsed.
        after: Duration,
    },
}

impl DispatchError {
    /// Creates a [`DispatchError::Rejected`].
    #[must_use]
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected { message: message.into() }
    }

    /// Creates a [`DispatchError::Unavailable`] without a source.
    #[must_use]
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable { message: message.into(), source: None }
    }

    /// Creates a [`DispatchError::Unavailable`] wrapping `source`.
    #[must_use]
    pub fn unavailable_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Unavailable { message: message.into(), source: Some(std::sync::Arc::new(source)) }
    }

    /// Creates a [`DispatchError::Timeout`].
    #[must_use]
    pub fn timeout(after: Duration) -> Self {
        Self::Timeout { after }
    }

    /// Returns `true` for [`DispatchError::Timeout`].
    #[must_use]
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Timeout { .. })
    }
}
