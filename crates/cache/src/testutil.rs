//! Shared test utilities for the credential indices.
//!
//! Factories for subscriptions and API keys, a command repository that always
//! fails, and assertion macros for lookup results. Feature-gated behind
//! `testutil` so nothing here leaks into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! gateway-common-cache = { path = "../cache", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use gateway_common_cache::testutil::{accepted_subscription, api_key};
//! ```

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use async_trait::async_trait;

use crate::{
    api_key::ApiKeyRecord,
    command::{Command, CommandRepository},
    error::{CacheError, CacheResult},
    subscription::{Subscription, SubscriptionStatus},
};

/// An accepted subscription without credentials or plan.
#[must_use]
pub fn accepted_subscription(id: &str, api: &str) -> Subscription {
    Subscription::builder().id(id).api(api).status(SubscriptionStatus::Accepted).build()
}

/// An accepted subscription bound to a client id, optionally within a plan.
#[must_use]
pub fn client_id_subscription(
    id: &str,
    api: &str,
    client_id: &str,
    plan: Option<&str>,
) -> Subscription {
    Subscription::builder()
        .id(id)
        .api(api)
        .maybe_plan(plan)
        .client_id(client_id)
        .status(SubscriptionStatus::Accepted)
        .build()
}

/// An accepted subscription bound to a client certificate, optionally within a plan.
#[must_use]
pub fn certificate_subscription(
    id: &str,
    api: &str,
    certificate: &str,
    plan: Option<&str>,
) -> Subscription {
    Subscription::builder()
        .id(id)
        .api(api)
        .maybe_plan(plan)
        .client_certificate(certificate)
        .status(SubscriptionStatus::Accepted)
        .build()
}

/// Returns a copy of `subscription` with another status.
#[must_use]
pub fn with_status(subscription: &Subscription, status: SubscriptionStatus) -> Subscription {
    Subscription { status, ..subscription.clone() }
}

/// An active API key for `api` linked to `subscription`.
#[must_use]
pub fn api_key(api: &str, key: &str, subscription: &str) -> ApiKeyRecord {
    ApiKeyRecord::builder()
        .id(format!("{api}:{key}"))
        .api(api)
        .key(key)
        .subscription(subscription)
        .application("app-test")
        .build()
}

/// Command repository whose `create` always fails with a connection error.
///
/// Counts the attempts so tests can assert a failure was reported exactly once.
#[derive(Debug, Default, Clone)]
pub struct FailingCommandRepository {
    attempts: Arc<AtomicUsize>,
}

impl FailingCommandRepository {
    /// Creates a new failing repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of `create` calls so far.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CommandRepository for FailingCommandRepository {
    async fn create(&self, _command: &Command) -> CacheResult<()> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(CacheError::connection("command repository unavailable"))
    }
}

/// Assert that a lookup returned the subscription with the given id.
///
/// # Examples
///
/// ```no_run
/// // Requires the `testutil` feature to be enabled.
/// use gateway_common_cache::{
///     SubscriptionIndex, assert_resolves_to, testutil::accepted_subscription,
/// };
///
/// let index = SubscriptionIndex::new();
/// index.register(accepted_subscription("sub-1", "api-1"));
/// assert_resolves_to!(index.get_by_id("sub-1"), "sub-1");
/// ```
#[macro_export]
macro_rules! assert_resolves_to {
    ($lookup:expr, $id:expr) => {
        match $lookup {
            Some(found) => assert_eq!(found.id.as_str(), $id, "resolved to the wrong subscription"),
            None => panic!("expected subscription {}, got nothing", $id),
        }
    };
    ($lookup:expr, $id:expr, $msg:expr) => {
        match $lookup {
            Some(found) => assert_eq!(found.id.as_str(), $id, "{}", $msg),
            None => panic!("{}: expected subscription {}, got nothing", $msg, $id),
        }
    };
}

/// Assert that a lookup returned nothing.
#[macro_export]
macro_rules! assert_unresolved {
    ($lookup:expr) => {
        if let Some(found) = $lookup {
            panic!("expected no match, got {:?}", found);
        }
    };
    ($lookup:expr, $msg:expr) => {
        if let Some(found) = $lookup {
            panic!("{}: expected no match, got {:?}", $msg, found);
        }
    };
}

/// Assert that a [`CacheResult`] is `Ok` and return the value.
#[macro_export]
macro_rules! assert_cache_ok {
    ($result:expr) => {
        match $result {
            Ok(val) => val,
            Err(e) => panic!("expected Ok, got CacheError: {e:?}"),
        }
    };
}
