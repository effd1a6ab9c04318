//! # Gateway Common Authn
//!
//! Security-token resolution and subscription lifecycle coordination for the
//! gateway, on top of the indices in `gateway-common-cache`.
//!
//! This crate provides:
//! - **Token resolution**: [`SecurityTokenResolver`] maps an API key, MD5 API key, client id or
//!   client certificate to the subscription that authorizes it
//! - **Lifecycle coordination**: [`SubscriptionLifecycleCoordinator`] keeps the subscription
//!   index current and dispatches accepted subscriptions to the API runtime, reporting failures
//!   to the management plane as commands
//!
//! ## Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use gateway_common_authn::{SecurityToken, SecurityTokenResolver};
//! use gateway_common_cache::{ApiKeyIndex, Subscription, SubscriptionIndex, SubscriptionStatus};
//!
//! let subscriptions = Arc::new(SubscriptionIndex::new());
//! subscriptions.register(
//!     Subscription::builder()
//!         .id("sub-1")
//!         .api("api-1")
//!         .plan("gold")
//!         .client_id("my-app")
//!         .status(SubscriptionStatus::Accepted)
//!         .build(),
//! );
//!
//! let resolver = SecurityTokenResolver::builder()
//!     .subscriptions(subscriptions)
//!     .api_keys(Arc::new(ApiKeyIndex::new()))
//!     .build();
//!
//! let token = SecurityToken::from_parts("CLIENT_ID", "my-app");
//! let subscription = resolver.resolve("api-1", &token, Some("gold"));
//! assert_eq!(subscription.map(|s| s.id.to_string()), Some("sub-1".to_owned()));
//! ```
//!
//! ## Feature Flags
//!
//! - **`failpoints`**: Enables `fail` injection points in the coordinator
//!   (`coordinator-before-dispatch`, `coordinator-before-command-create`)
//! - **`testutil`**: Enables the `testutil` module with scripted dispatchers

#![deny(unsafe_code)]
#![warn(missing_docs)]

/// Resolver and coordinator configuration.
pub mod config;
/// Subscription lifecycle coordination.
pub mod coordinator;
/// Error types.
pub mod error;
/// Resolution and dispatch metrics.
pub mod metrics;
/// Security-token resolution.
pub mod resolver;
/// Scripted dispatchers for tests.
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
/// Security tokens.
pub mod token;

// Re-export key types for convenience
pub use config::{
    CoordinatorConfig, DEFAULT_COMMAND_TTL, DEFAULT_DISPATCH_TIMEOUT, DEFAULT_SCOPE_ID,
    ResolverConfig,
};
pub use coordinator::{SubscriptionDispatcher, SubscriptionLifecycleCoordinator};
pub use error::{AuthnError, DispatchError, Result};
pub use metrics::{
    DispatchMetrics, DispatchMetricsSnapshot, KindCounts, ResolutionMetrics,
    ResolutionMetricsSnapshot,
};
pub use resolver::SecurityTokenResolver;
pub use token::{SecurityToken, TokenKind};
