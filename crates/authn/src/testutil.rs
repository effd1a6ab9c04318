//! Shared test utilities for resolution and dispatch testing.
//!
//! Dispatchers with scripted behaviour for exercising the
//! [`SubscriptionLifecycleCoordinator`](crate::SubscriptionLifecycleCoordinator).
//! Feature-gated behind `testutil` to prevent leaking into production builds.
//!
//! # Usage
//!
//! ```toml
//! [dev-dependencies]
//! gateway-common-authn = { path = "../authn", features = ["testutil"] }
//! ```
//!
//! ```no_run
//! // Requires the `testutil` feature to be enabled.
//! use gateway_common_authn::testutil::{FailingDispatcher, RecordingDispatcher};
//! ```

use std::{
    sync::{
        Arc,
        atomic::{AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use gateway_common_cache::{Subscription, SubscriptionId};
use parking_lot::Mutex;

use crate::{coordinator::SubscriptionDispatcher, error::DispatchError};

/// Dispatcher that succeeds and remembers what it dispatched, in order.
#[derive(Debug, Default, Clone)]
pub struct RecordingDispatcher {
    dispatched: Arc<Mutex<Vec<SubscriptionId>>>,
}

impl RecordingDispatcher {
    /// Creates a dispatcher with an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Ids dispatched so far, in dispatch order.
    #[must_use]
    pub fn dispatched(&self) -> Vec<SubscriptionId> {
        self.dispatched.lock().clone()
    }
}

#[async_trait]
impl SubscriptionDispatcher for RecordingDispatcher {
    async fn dispatch(&self, subscription: Arc<Subscription>) -> Result<(), DispatchError> {
        self.dispatched.lock().push(subscription.id.clone());
        Ok(())
    }
}

/// Dispatcher that rejects every subscription.
#[derive(Debug)]
pub struct FailingDispatcher {
    message: String,
    attempts: AtomicUsize,
}

impl FailingDispatcher {
    /// Creates a dispatcher rejecting with `message`.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self { message: message.into(), attempts: AtomicUsize::new(0) }
    }

    /// Number of dispatch attempts observed.
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl SubscriptionDispatcher for FailingDispatcher {
    async fn dispatch(&self, _subscription: Arc<Subscription>) -> Result<(), DispatchError> {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        Err(DispatchError::rejected(self.message.clone()))
    }
}

/// Dispatcher that succeeds after a fixed delay.
#[derive(Debug, Clone, Copy)]
pub struct SlowDispatcher {
    delay: Duration,
}

impl SlowDispatcher {
    /// Creates a dispatcher that takes `delay` per subscription.
    #[must_use]
    pub fn new(delay: Duration) -> Self {
        Self { delay }
    }
}

#[async_trait]
impl SubscriptionDispatcher for SlowDispatcher {
    async fn dispatch(&self, _subscription: Arc<Subscription>) -> Result<(), DispatchError> {
        tokio::time::sleep(self.delay).await;
        Ok(())
    }
}
