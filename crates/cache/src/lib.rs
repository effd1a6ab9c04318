//! In-memory credential indices for gateway request authorization.
//!
//! This crate holds the state the gateway consults on every request to turn
//! a presented credential into the subscription that authorizes it, without
//! touching the durable store on the hot path.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                Request path / sync collaborator             │
//! │        (token resolution, subscription lifecycle)           │
//! ├──────────────────────────────┬──────────────────────────────┤
//! │         ApiKeyIndex          │      SubscriptionIndex       │
//! │  (api, key) → record         │  id → subscription           │
//! │  api → keys                  │  (api, client, plan) → sub   │
//! │  md5 scan per api            │  (api, client) → sub         │
//! │                              │  (api, cert, plan?) → sub    │
//! │                              │  api → ids                   │
//! ├──────────────────────────────┴──────────────────────────────┤
//! │   TrustStoreBinding │ ServerLookup │ CommandRepository      │
//! │              (external collaborators)                       │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Quick Start
//!
//! ```
//! use gateway_common_cache::{
//!     ApiKeyIndex, ApiKeyRecord, Subscription, SubscriptionIndex, SubscriptionStatus,
//! };
//!
//! let subscriptions = SubscriptionIndex::new();
//! let keys = ApiKeyIndex::new();
//!
//! subscriptions.register(
//!     Subscription::builder()
//!         .id("sub-1")
//!         .api("api-1")
//!         .status(SubscriptionStatus::Accepted)
//!         .build(),
//! );
//! keys.register(
//!     ApiKeyRecord::builder()
//!         .id("key-1")
//!         .api("api-1")
//!         .key("my-key")
//!         .subscription("sub-1")
//!         .application("app-1")
//!         .build(),
//! );
//!
//! let record = keys.get_by_api_and_key("api-1", "my-key").expect("key registered");
//! let subscription = subscriptions.get_by_id(record.subscription.as_str());
//! assert!(subscription.is_some());
//! ```
//!
//! # Consistency
//!
//! Lookups never fail; a miss is `None` or an empty set. Both indices offer a
//! `check_consistency` self-check returning [`CacheError::Corruption`] if an
//! invariant between their maps is ever broken.
//!
//! # Feature Flags
//!
//! - **`testutil`**: Enables the `testutil` module with model factories, a failing command
//!   repository and assertion macros. Enable this in `[dev-dependencies]` for integration tests.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api_key;
pub mod api_key_index;
pub mod command;
pub mod error;
pub mod metrics;
pub mod subscription;
pub mod subscription_index;
#[cfg(any(test, feature = "testutil"))]
#[allow(clippy::expect_used, clippy::panic)]
pub mod testutil;
pub mod trust_store;
pub mod types;

// Re-export primary types at crate root for convenience
pub use api_key::ApiKeyRecord;
pub use api_key_index::ApiKeyIndex;
pub use command::{
    Command, CommandRepository, CommandTag, MemoryCommandRepository, MessageRecipient,
    SubscriptionFailurePayload,
};
pub use error::{BoxError, CacheError, CacheResult, ConfigError};
pub use metrics::{IndexMetrics, IndexMetricsSnapshot, LatencyHistogram, LatencyPercentiles};
pub use subscription::{Subscription, SubscriptionStatus};
pub use subscription_index::SubscriptionIndex;
pub use trust_store::{
    CertificateMatch, MemoryTrustStore, NoServers, NoopTrustStore, ServerLookup,
    StaticServerLookup, TrustStoreBinding,
};
pub use types::{ApiId, ApplicationId, PlanId, SubscriptionId};
