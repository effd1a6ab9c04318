//! mTLS trust-store binding and listener server lookup.
//!
//! Certificate verification proper (chains, digests, TLS handshakes) happens
//! in an external trust-store loader. This layer only tells the loader which
//! subscriptions are bound to which certificates, and on which servers, and
//! asks it which subscription a presented certificate belongs to.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use parking_lot::RwLock;

use crate::{
    subscription::Subscription,
    types::{ApiId, PlanId, SubscriptionId},
};

/// Outcome of a certificate lookup in the trust store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum CertificateMatch {
    /// The certificate belongs to this subscription.
    Found(Arc<Subscription>),
    /// The trust store knows the api/plan but not this certificate.
    NotFound,
    /// The trust store has nothing registered for the api/plan.
    NoBinding,
}

impl CertificateMatch {
    /// Converts the outcome into the matched subscription, if any.
    #[must_use]
    pub fn into_subscription(self) -> Option<Arc<Subscription>> {
        match self {
            Self::Found(subscription) => Some(subscription),
            Self::NotFound | Self::NoBinding => None,
        }
    }
}

/// Interface to the external mTLS trust-store loader.
///
/// Calls are made from the index write path and the request path, so
/// implementations must not block on I/O.
pub trait TrustStoreBinding: Send + Sync {
    /// Binds `subscription`'s client certificate on the given servers.
    ///
    /// A second call for the same subscription replaces the previous binding.
    fn register_subscription(&self, subscription: &Arc<Subscription>, servers: &HashSet<String>);

    /// Drops whatever binding `subscription` holds.
    fn unregister_subscription(&self, subscription: &Subscription);

    /// Finds the subscription bound to `certificate` for an api and plan.
    fn get_by_certificate(
        &self,
        api: &str,
        plan: Option<&str>,
        certificate: &str,
    ) -> CertificateMatch;
}

/// Trust store for gateways without mTLS plans. Never binds anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopTrustStore;

impl TrustStoreBinding for NoopTrustStore {
    fn register_subscription(
        &self,
        _subscription: &Arc<Subscription>,
        _servers: &HashSet<String>,
    ) {
    }

    fn unregister_subscription(&self, _subscription: &Subscription) {}

    fn get_by_certificate(&self, _api: &str, _plan: Option<&str>, _cert: &str) -> CertificateMatch {
        CertificateMatch::NoBinding
    }
}

type BindingKey = (ApiId, Option<PlanId>);

#[derive(Debug, Clone)]
struct Registration {
    keys: Vec<BindingKey>,
    certificate: String,
    servers: HashSet<String>,
}

#[derive(Debug, Default)]
struct MemoryTrustStoreInner {
    bindings: HashMap<BindingKey, HashMap<String, Arc<Subscription>>>,
    registrations: HashMap<SubscriptionId, Registration>,
}

impl MemoryTrustStoreInner {
    fn drop_registration(&mut self, id: &SubscriptionId) -> Option<Registration> {
        let registration = self.registrations.remove(id)?;
        for key in &registration.keys {
            if let Some(certs) = self.bindings.get_mut(key) {
                if certs.get(&registration.certificate).is_some_and(|s| &s.id == id) {
                    certs.remove(&registration.certificate);
                }
                if certs.is_empty() {
                    self.bindings.remove(key);
                }
            }
        }
        Some(registration)
    }
}

/// In-memory trust store matching certificates by exact value.
///
/// Subscriptions are bound under both their `(api, plan)` and `(api, no plan)`
/// keys. Re-registering a subscription with a new certificate swaps the
/// binding in a single critical section.
///
/// # Example
///
/// ```
/// use std::{collections::HashSet, sync::Arc};
///
/// use gateway_common_cache::{
///     CertificateMatch, MemoryTrustStore, Subscription, SubscriptionStatus, TrustStoreBinding,
/// };
///
/// let store = MemoryTrustStore::new();
/// let sub = Arc::new(
///     Subscription::builder()
///         .id("sub-1")
///         .api("api-1")
///         .client_certificate("cert-A")
///         .status(SubscriptionStatus::Accepted)
///         .build(),
/// );
/// store.register_subscription(&sub, &HashSet::new());
///
/// assert!(matches!(
///     store.get_by_certificate("api-1", None, "cert-A"),
///     CertificateMatch::Found(_)
/// ));
/// assert_eq!(store.get_by_certificate("api-1", None, "cert-B"), CertificateMatch::NotFound);
/// assert_eq!(store.get_by_certificate("api-2", None, "cert-A"), CertificateMatch::NoBinding);
/// ```
#[derive(Debug, Default, Clone)]
pub struct MemoryTrustStore {
    inner: Arc<RwLock<MemoryTrustStoreInner>>,
}

impl MemoryTrustStore {
    /// Creates an empty trust store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Servers on which a subscription's certificate is currently bound.
    #[must_use]
    pub fn servers_for_subscription(&self, id: &str) -> Option<HashSet<String>> {
        self.inner.read().registrations.get(id).map(|r| r.servers.clone())
    }

    /// Number of subscriptions with a bound certificate.
    #[must_use]
    pub fn registered_count(&self) -> usize {
        self.inner.read().registrations.len()
    }
}

impl TrustStoreBinding for MemoryTrustStore {
    fn register_subscription(&self, subscription: &Arc<Subscription>, servers: &HashSet<String>) {
        let mut inner = self.inner.write();
        inner.drop_registration(&subscription.id);

        let Some(certificate) = subscription.credential_certificate() else {
            return;
        };
        let mut keys = vec![(subscription.api.clone(), None)];
        if let Some(plan) = &subscription.plan {
            keys.push((subscription.api.clone(), Some(plan.clone())));
        }
        for key in &keys {
            inner
                .bindings
                .entry(key.clone())
                .or_default()
                .insert(certificate.to_owned(), Arc::clone(subscription));
        }
        inner.registrations.insert(
            subscription.id.clone(),
            Registration { keys, certificate: certificate.to_owned(), servers: servers.clone() },
        );
    }

    fn unregister_subscription(&self, subscription: &Subscription) {
        self.inner.write().drop_registration(&subscription.id);
    }

    fn get_by_certificate(
        &self,
        api: &str,
        plan: Option<&str>,
        certificate: &str,
    ) -> CertificateMatch {
        let key = (ApiId::from(api), plan.map(PlanId::from));
        let inner = self.inner.read();
        match inner.bindings.get(&key) {
            None => CertificateMatch::NoBinding,
            Some(certs) => certs
                .get(certificate)
                .map_or(CertificateMatch::NotFound, |s| CertificateMatch::Found(Arc::clone(s))),
        }
    }
}

/// Source of the server identifiers declared by an API's listener
/// configuration.
pub trait ServerLookup: Send + Sync {
    /// Server identifiers for `api`; empty when none are configured.
    fn servers_for(&self, api: &str) -> HashSet<String>;
}

/// Lookup for deployments where no API declares servers.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoServers;

impl ServerLookup for NoServers {
    fn servers_for(&self, _api: &str) -> HashSet<String> {
        HashSet::new()
    }
}

/// Server lookup backed by an in-memory table, updated as APIs deploy.
#[derive(Debug, Default, Clone)]
pub struct StaticServerLookup {
    servers: Arc<RwLock<HashMap<ApiId, HashSet<String>>>>,
}

impl StaticServerLookup {
    /// Creates an empty lookup.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares the servers of an API, replacing any previous declaration.
    pub fn set<I, S>(&self, api: impl Into<ApiId>, servers: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.servers.write().insert(api.into(), servers.into_iter().map(Into::into).collect());
    }

    /// Forgets the servers of an API.
    pub fn remove(&self, api: &str) {
        self.servers.write().remove(api);
    }
}

impl ServerLookup for StaticServerLookup {
    fn servers_for(&self, api: &str) -> HashSet<String> {
        self.servers.read().get(api).cloned().unwrap_or_default()
    }
}
