//! Concurrent multi-index cache of accepted subscriptions.
//!
//! # Indices
//!
//! | Index | Key | Purpose |
//! |-------|-----|---------|
//! | primary | subscription id | authoritative record |
//! | client id and plan | (api, client id, plan) | OAuth plans when the plan is known |
//! | client id | (api, client id) | OAuth plans when the request does not carry a plan |
//! | certificate | (api, certificate, plan?) | fallback for mTLS plans |
//! | by api | api → ids | teardown and re-dispatch |
//!
//! Secondary entries hold the full `Arc<Subscription>`; the owning id is the
//! record's own `id`. Removing a secondary entry is compare-and-delete: it only
//! goes away if its current owner is the subscription being removed, so a
//! stale unregister never clobbers a fresher registration for the same key.
//!
//! # Rotation
//!
//! When a subscription is re-registered with a new client id or certificate,
//! the new entries are inserted before the old ones are removed. A reader
//! therefore always resolves the subscription through at least one of the two
//! credentials, and for a short while through both.
//!
//! Old client-id entries are removed as part of the same registration. Old
//! certificate entries are kept until the subscription is unregistered or
//! moves to another API: the trust store is the authority for certificates and
//! the certificate index is only consulted when the trust store has no binding.
//!
//! # Concurrency
//!
//! Every index is a sharded [`DashMap`]; readers never take a global lock.
//! Writers are serialised by a writer-only mutex. The primary map and the
//! by-api map change together while the affected by-api shard is held, with
//! lock order by-api first, then primary.

use std::{collections::HashSet, fmt, sync::Arc};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::{
    error::{CacheError, CacheResult},
    metrics::IndexMetrics,
    subscription::Subscription,
    trust_store::{NoServers, NoopTrustStore, ServerLookup, TrustStoreBinding},
    types::{ApiId, PlanId, SubscriptionId},
};

/// Key of the client-id and certificate indices.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct CredentialKey {
    api: ApiId,
    value: String,
    plan: Option<PlanId>,
}

impl CredentialKey {
    fn new(api: &str, value: &str, plan: Option<&str>) -> Self {
        Self { api: ApiId::from(api), value: value.to_owned(), plan: plan.map(PlanId::from) }
    }
}

impl fmt::Display for CredentialKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.plan {
            Some(plan) => write!(f, "{}/{}/{}", self.api, self.value, plan),
            None => write!(f, "{}/{}", self.api, self.value),
        }
    }
}

/// The with-plan and plan-less keys a subscription occupies for one credential.
#[derive(Debug, Default, PartialEq, Eq)]
struct CredentialKeys {
    with_plan: Option<CredentialKey>,
    without_plan: Option<CredentialKey>,
}

impl CredentialKeys {
    fn for_value(subscription: &Subscription, value: Option<&str>) -> Self {
        let Some(value) = value else {
            return Self::default();
        };
        let api = subscription.api.as_str();
        Self {
            with_plan: subscription
                .plan_str()
                .map(|plan| CredentialKey::new(api, value, Some(plan))),
            without_plan: Some(CredentialKey::new(api, value, None)),
        }
    }

    fn client(subscription: &Subscription) -> Self {
        Self::for_value(subscription, subscription.credential_client_id())
    }

    fn certificate(subscription: &Subscription) -> Self {
        Self::for_value(subscription, subscription.credential_certificate())
    }

    fn iter(&self) -> impl Iterator<Item = &CredentialKey> {
        self.with_plan.iter().chain(self.without_plan.iter())
    }

    fn contains(&self, key: &CredentialKey) -> bool {
        self.iter().any(|k| k == key)
    }
}

type SecondaryIndex = DashMap<CredentialKey, Arc<Subscription>>;

/// Cache of accepted subscriptions with its secondary indices.
///
/// # Example
///
/// ```
/// use gateway_common_cache::{Subscription, SubscriptionIndex, SubscriptionStatus};
///
/// let index = SubscriptionIndex::new();
/// index.register(
///     Subscription::builder()
///         .id("sub-1")
///         .api("api-1")
///         .plan("plan-1")
///         .client_id("client-A")
///         .status(SubscriptionStatus::Accepted)
///         .build(),
/// );
///
/// assert!(index.get_by_id("sub-1").is_some());
/// assert!(index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-1").is_some());
/// assert!(index.get_by_api_id("api-1").contains("sub-1"));
/// ```
pub struct SubscriptionIndex {
    by_id: DashMap<SubscriptionId, Arc<Subscription>>,
    by_client_id_and_plan: SecondaryIndex,
    by_client_id: SecondaryIndex,
    by_certificate: SecondaryIndex,
    /// Certificate keys left behind by rotations, dropped on unregister.
    stale_certificates: DashMap<SubscriptionId, HashSet<CredentialKey>>,
    by_api: DashMap<ApiId, HashSet<SubscriptionId>>,
    trust_store: Arc<dyn TrustStoreBinding>,
    servers: Arc<dyn ServerLookup>,
    write_lock: Mutex<()>,
    metrics: IndexMetrics,
}

impl SubscriptionIndex {
    /// Creates an index without mTLS collaborators.
    #[must_use]
    pub fn new() -> Self {
        Self::with_collaborators(Arc::new(NoopTrustStore), Arc::new(NoServers))
    }

    /// Creates an index that keeps `trust_store` informed of certificate
    /// bindings, on the servers reported by `servers`.
    #[must_use]
    pub fn with_collaborators(
        trust_store: Arc<dyn TrustStoreBinding>,
        servers: Arc<dyn ServerLookup>,
    ) -> Self {
        Self {
            by_id: DashMap::new(),
            by_client_id_and_plan: DashMap::new(),
            by_client_id: DashMap::new(),
            by_certificate: DashMap::new(),
            stale_certificates: DashMap::new(),
            by_api: DashMap::new(),
            trust_store,
            servers,
            write_lock: Mutex::new(()),
            metrics: IndexMetrics::new(),
        }
    }

    /// The trust store this index notifies.
    #[must_use]
    pub fn trust_store(&self) -> &Arc<dyn TrustStoreBinding> {
        &self.trust_store
    }

    /// Registers an accepted subscription, or evicts it if it is not accepted.
    ///
    /// Registering the same subscription twice leaves the index unchanged.
    pub fn register(&self, subscription: impl Into<Arc<Subscription>>) {
        self.register_shared(subscription.into());
    }

    #[tracing::instrument(
        name = "subscription_index.register",
        skip(self, subscription),
        fields(
            subscription_id = %subscription.id,
            api = %subscription.api,
            status = %subscription.status,
        )
    )]
    fn register_shared(&self, subscription: Arc<Subscription>) {
        let _guard = self.write_lock.lock();

        if !subscription.is_accepted() {
            if self.remove_locked(&subscription) {
                self.metrics.record_eviction();
                debug!("Subscription evicted on status change");
            }
            return;
        }

        let previous = self.insert_primary(&subscription);

        let client_keys = CredentialKeys::client(&subscription);
        let certificate_keys = CredentialKeys::certificate(&subscription);

        // New entries become visible before any old entry is removed.
        if let Some(key) = &client_keys.with_plan {
            self.by_client_id_and_plan.insert(key.clone(), Arc::clone(&subscription));
        }
        if let Some(key) = &client_keys.without_plan {
            self.by_client_id.insert(key.clone(), Arc::clone(&subscription));
        }
        for key in certificate_keys.iter() {
            self.by_certificate.insert(key.clone(), Arc::clone(&subscription));
        }

        if let Some(previous) = &previous {
            self.retire_previous(&subscription, previous, &client_keys, &certificate_keys);
        }

        self.metrics.record_register();
        self.notify_trust_store(&subscription, previous.as_deref());
    }

    /// Removes a subscription from every index. Unknown ids are ignored.
    ///
    /// Secondary entries now owned by a different subscription are left
    /// untouched.
    #[tracing::instrument(
        name = "subscription_index.unregister",
        skip(self, subscription),
        fields(subscription_id = %subscription.id, api = %subscription.api)
    )]
    pub fn unregister(&self, subscription: &Subscription) {
        let _guard = self.write_lock.lock();
        if self.remove_locked(subscription) {
            self.metrics.record_unregister();
        }
    }

    /// Removes every subscription of an API and returns how many were removed.
    ///
    /// Subscriptions of other APIs are not touched. Unknown APIs are ignored.
    #[tracing::instrument(name = "subscription_index.unregister_by_api", skip(self))]
    pub fn unregister_by_api(&self, api: &str) -> usize {
        let _guard = self.write_lock.lock();

        let ids: Vec<SubscriptionId> =
            self.by_api.get(api).map(|ids| ids.iter().cloned().collect()).unwrap_or_default();

        let mut removed = 0;
        for id in ids {
            let Some(subscription) = self.by_id.get(&id).map(|entry| Arc::clone(entry.value()))
            else {
                continue;
            };
            if self.remove_locked(&subscription) {
                removed += 1;
            }
        }
        self.by_api.remove(api);

        self.metrics.record_api_teardown();
        info!(removed, "Subscriptions torn down");
        removed
    }

    /// Looks a subscription up by id.
    #[must_use]
    pub fn get_by_id(&self, id: &str) -> Option<Arc<Subscription>> {
        self.by_id.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Ids of the subscriptions of an API.
    #[must_use]
    pub fn get_by_api_id(&self, api: &str) -> HashSet<SubscriptionId> {
        self.by_api.get(api).map(|ids| ids.clone()).unwrap_or_default()
    }

    /// Subscriptions of an API, ordered by id.
    #[must_use]
    pub fn subscriptions_for_api(&self, api: &str) -> Vec<Arc<Subscription>> {
        let mut ids: Vec<_> = self.get_by_api_id(api).into_iter().collect();
        ids.sort();
        ids.iter().filter_map(|id| self.get_by_id(id.as_str())).collect()
    }

    /// Looks a subscription up by client id within a plan.
    #[must_use]
    pub fn get_by_api_and_client_id_and_plan(
        &self,
        api: &str,
        client_id: &str,
        plan: &str,
    ) -> Option<Arc<Subscription>> {
        self.by_client_id_and_plan
            .get(&CredentialKey::new(api, client_id, Some(plan)))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Looks a subscription up by client id regardless of plan.
    ///
    /// When several plans of the API share the client id, the subscription
    /// registered last wins.
    #[must_use]
    pub fn get_by_api_and_client_id(
        &self,
        api: &str,
        client_id: &str,
    ) -> Option<Arc<Subscription>> {
        self.by_client_id
            .get(&CredentialKey::new(api, client_id, None))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Looks a subscription up by client certificate.
    ///
    /// May return a subscription whose certificate has since been rotated;
    /// the trust store is authoritative for certificates.
    #[must_use]
    pub fn get_by_client_certificate(
        &self,
        api: &str,
        certificate: &str,
        plan: Option<&str>,
    ) -> Option<Arc<Subscription>> {
        self.by_certificate
            .get(&CredentialKey::new(api, certificate, plan))
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Number of cached subscriptions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.by_id.len()
    }

    /// Returns `true` if no subscription is cached.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_id.is_empty()
    }

    /// Write-path counters.
    #[must_use]
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// Verifies the relationships between all indices.
    ///
    /// Blocks writers for the duration of the check.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corruption`] describing the first violation found.
    pub fn check_consistency(&self) -> CacheResult<()> {
        let _guard = self.write_lock.lock();

        let mut primary_count = 0;
        for entry in &self.by_id {
            let (id, subscription) = (entry.key(), entry.value());
            if &subscription.id != id {
                return Err(CacheError::corruption("by_id", id.as_str(), "record id mismatch"));
            }
            if !subscription.is_accepted() {
                return Err(CacheError::corruption("by_id", id.as_str(), "non-accepted record"));
            }
            if !self.by_api.get(&subscription.api).is_some_and(|ids| ids.contains(id)) {
                return Err(CacheError::corruption(
                    "by_api",
                    subscription.api.as_str(),
                    format!("missing id {id}"),
                ));
            }
            primary_count += 1;
        }

        let mut reverse_count = 0;
        for entry in &self.by_api {
            let api = entry.key();
            if entry.value().is_empty() {
                return Err(CacheError::corruption("by_api", api.as_str(), "empty set not dropped"));
            }
            for id in entry.value() {
                if !self.by_id.get(id).is_some_and(|s| &s.api == api) {
                    return Err(CacheError::corruption(
                        "by_api",
                        api.as_str(),
                        format!("dangling id {id}"),
                    ));
                }
            }
            reverse_count += entry.value().len();
        }
        if reverse_count != primary_count {
            return Err(CacheError::corruption(
                "by_api",
                "*",
                format!("{reverse_count} reverse entries for {primary_count} subscriptions"),
            ));
        }

        for (name, index) in [
            ("by_client_id_and_plan", &self.by_client_id_and_plan),
            ("by_client_id", &self.by_client_id),
        ] {
            for entry in index {
                let key = entry.key();
                let current = self.by_id.get(&entry.value().id).map(|e| Arc::clone(e.value()));
                let owned = current.as_deref().is_some_and(|s| {
                    s.api == key.api
                        && s.credential_client_id() == Some(key.value.as_str())
                        && (key.plan.is_none() || s.plan == key.plan)
                });
                if !owned {
                    return Err(CacheError::corruption(
                        name,
                        key.to_string(),
                        "stale client id entry",
                    ));
                }
            }
        }

        for entry in &self.by_certificate {
            let key = entry.key();
            let Some(current) = self.by_id.get(&entry.value().id).map(|e| Arc::clone(e.value()))
            else {
                return Err(CacheError::corruption(
                    "by_certificate",
                    key.to_string(),
                    format!("dangling id {}", entry.value().id),
                ));
            };
            if current.api != key.api {
                return Err(CacheError::corruption(
                    "by_certificate",
                    key.to_string(),
                    format!("entry outlived move of {} to {}", current.id, current.api),
                ));
            }
        }
        for entry in &self.stale_certificates {
            if !self.by_id.contains_key(entry.key()) {
                return Err(CacheError::corruption(
                    "stale_certificates",
                    entry.key().as_str(),
                    "unknown subscription",
                ));
            }
        }
        Ok(())
    }

    /// Inserts the primary record and its by-api entry together and returns
    /// the record it replaced.
    fn insert_primary(&self, subscription: &Arc<Subscription>) -> Option<Arc<Subscription>> {
        let mut ids = self.by_api.entry(subscription.api.clone()).or_default();
        let previous = self.by_id.insert(subscription.id.clone(), Arc::clone(subscription));
        ids.insert(subscription.id.clone());
        drop(ids);

        if let Some(previous) = &previous
            && previous.api != subscription.api
        {
            self.detach_from_api(&previous.api, &subscription.id);
        }
        previous
    }

    /// Removes the primary record and its by-api entry together.
    fn remove_primary(&self, id: &SubscriptionId) -> Option<Arc<Subscription>> {
        let api = self.by_id.get(id)?.api.clone();
        let removed = match self.by_api.get_mut(&api) {
            Some(mut ids) => {
                let removed = self.by_id.remove(id).map(|(_, s)| s);
                ids.remove(id);
                removed
            },
            None => self.by_id.remove(id).map(|(_, s)| s),
        };
        self.by_api.remove_if(&api, |_, ids| ids.is_empty());
        removed
    }

    fn detach_from_api(&self, api: &ApiId, id: &SubscriptionId) {
        if let Some(mut ids) = self.by_api.get_mut(api) {
            ids.remove(id);
        }
        self.by_api.remove_if(api, |_, ids| ids.is_empty());
    }

    /// Drops the previous version's client-id entries that the new version no
    /// longer occupies and remembers its superseded certificate entries.
    fn retire_previous(
        &self,
        subscription: &Subscription,
        previous: &Subscription,
        client_keys: &CredentialKeys,
        certificate_keys: &CredentialKeys,
    ) {
        let id = &subscription.id;
        let old_client_keys = CredentialKeys::client(previous);
        if let Some(key) = &old_client_keys.with_plan
            && client_keys.with_plan.as_ref() != Some(key)
        {
            self.remove_owned(&self.by_client_id_and_plan, key, id);
        }
        if let Some(key) = &old_client_keys.without_plan
            && client_keys.without_plan.as_ref() != Some(key)
        {
            self.remove_owned(&self.by_client_id, key, id);
        }

        // Superseded certificate keys stay resolvable only within the API the
        // subscription now belongs to.
        let (superseded, foreign): (Vec<CredentialKey>, Vec<CredentialKey>) =
            CredentialKeys::certificate(previous)
                .iter()
                .filter(|key| !certificate_keys.contains(key))
                .cloned()
                .partition(|key| key.api == subscription.api);
        for key in &foreign {
            self.remove_owned(&self.by_certificate, key, id);
        }
        if !superseded.is_empty() {
            self.stale_certificates.entry(id.clone()).or_default().extend(superseded);
        }
        if let Some(mut stale) = self.stale_certificates.get_mut(id) {
            for key in certificate_keys.iter() {
                stale.remove(key);
            }
            let moved: Vec<CredentialKey> =
                stale.iter().filter(|key| key.api != subscription.api).cloned().collect();
            for key in &moved {
                stale.remove(key);
                self.remove_owned(&self.by_certificate, key, id);
            }
        }
        self.stale_certificates.remove_if(id, |_, stale| stale.is_empty());

        let client_rotated = previous.credential_client_id() != subscription.credential_client_id();
        let certificate_rotated =
            previous.credential_certificate() != subscription.credential_certificate();
        if client_rotated || certificate_rotated {
            self.metrics.record_rotation();
            info!(client_rotated, certificate_rotated, "Subscription credentials rotated");
        }
    }

    /// Removes every trace of a subscription, using both the cached record and
    /// the one passed in. Returns `true` if a cached record was removed.
    fn remove_locked(&self, subscription: &Subscription) -> bool {
        let id = &subscription.id;
        let cached = self.remove_primary(id);

        for record in cached.as_deref().into_iter().chain(std::iter::once(subscription)) {
            let client_keys = CredentialKeys::client(record);
            if let Some(key) = &client_keys.with_plan {
                self.remove_owned(&self.by_client_id_and_plan, key, id);
            }
            if let Some(key) = &client_keys.without_plan {
                self.remove_owned(&self.by_client_id, key, id);
            }
            for key in CredentialKeys::certificate(record).iter() {
                self.remove_owned(&self.by_certificate, key, id);
            }
        }
        if let Some((_, stale)) = self.stale_certificates.remove(id) {
            for key in &stale {
                self.remove_owned(&self.by_certificate, key, id);
            }
        }

        let bound = cached.as_deref().and_then(Subscription::credential_certificate).is_some()
            || subscription.credential_certificate().is_some();
        if bound {
            self.trust_store.unregister_subscription(cached.as_deref().unwrap_or(subscription));
        }
        cached.is_some()
    }

    /// Compare-and-delete: removes `key` only while `id` owns it.
    fn remove_owned(&self, index: &SecondaryIndex, key: &CredentialKey, id: &SubscriptionId) {
        if index.remove_if(key, |_, owner| &owner.id == id).is_none() && index.contains_key(key) {
            self.metrics.record_stale_removal_skipped();
            debug!(key = %key, "Secondary entry owned by a newer subscription, kept");
        }
    }

    fn notify_trust_store(
        &self,
        subscription: &Arc<Subscription>,
        previous: Option<&Subscription>,
    ) {
        if subscription.credential_certificate().is_some() {
            let servers = self.servers.servers_for(subscription.api.as_str());
            self.trust_store.register_subscription(subscription, &servers);
        } else if let Some(previous) = previous
            && previous.credential_certificate().is_some()
        {
            self.trust_store.unregister_subscription(previous);
        }
    }
}

impl Default for SubscriptionIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for SubscriptionIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionIndex")
            .field("subscriptions", &self.by_id.len())
            .field("client_ids_with_plan", &self.by_client_id_and_plan.len())
            .field("client_ids", &self.by_client_id.len())
            .field("certificates", &self.by_certificate.len())
            .field("apis", &self.by_api.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::{
        subscription::SubscriptionStatus,
        trust_store::{CertificateMatch, MemoryTrustStore, StaticServerLookup},
    };

    fn sub(id: &str, api: &str, client_id: Option<&str>, plan: Option<&str>) -> Subscription {
        Subscription::builder()
            .id(id)
            .api(api)
            .maybe_plan(plan)
            .maybe_client_id(client_id)
            .status(SubscriptionStatus::Accepted)
            .build()
    }

    fn cert_sub(id: &str, cert: &str) -> Subscription {
        Subscription::builder()
            .id(id)
            .api("api-1")
            .plan("plan-1")
            .client_certificate(cert)
            .status(SubscriptionStatus::Accepted)
            .build()
    }

    fn with_status(mut subscription: Subscription, status: SubscriptionStatus) -> Subscription {
        subscription.status = status;
        subscription
    }

    #[test]
    fn test_register_populates_every_index() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", Some("client-A"), Some("plan-1")));

        assert_eq!(index.get_by_id("sub-1").unwrap().id, "sub-1");
        let by_plan = index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-1");
        assert_eq!(by_plan.unwrap().id, "sub-1");
        assert_eq!(index.get_by_api_and_client_id("api-1", "client-A").unwrap().id, "sub-1");
        assert!(index.get_by_api_id("api-1").contains("sub-1"));
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_lookups_miss_on_other_keys() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", Some("client-A"), Some("plan-1")));

        assert!(index.get_by_id("sub-2").is_none());
        assert!(index.get_by_api_and_client_id_and_plan("api-2", "client-A", "plan-1").is_none());
        assert!(index.get_by_api_and_client_id_and_plan("api-1", "client-B", "plan-1").is_none());
        assert!(index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-2").is_none());
        assert!(index.get_by_api_id("api-2").is_empty());
    }

    #[test]
    fn test_client_id_rotation_cleans_old_entries() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", Some("old"), Some("plan-1")));
        index.register(sub("sub-1", "api-1", Some("new"), Some("plan-1")));

        assert!(index.get_by_api_and_client_id("api-1", "old").is_none());
        assert!(index.get_by_api_and_client_id_and_plan("api-1", "old", "plan-1").is_none());
        assert_eq!(index.get_by_api_and_client_id("api-1", "new").unwrap().id, "sub-1");
        assert_eq!(index.get_by_id("sub-1").unwrap().client_id.as_deref(), Some("new"));
        assert_eq!(index.metrics().snapshot().rotations, 1);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_register_twice_is_idempotent() {
        let index = SubscriptionIndex::new();
        let subscription = sub("sub-1", "api-1", Some("client-A"), Some("plan-1"));
        index.register(subscription.clone());
        let once = format!("{index:?}");

        index.register(subscription);

        assert_eq!(format!("{index:?}"), once);
        assert_eq!(index.metrics().snapshot().rotations, 0);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_non_accepted_status_evicts_everywhere() {
        for status in [
            SubscriptionStatus::Closed,
            SubscriptionStatus::Rejected,
            SubscriptionStatus::Paused,
            SubscriptionStatus::Pending,
            SubscriptionStatus::Unknown("RESUMED".into()),
        ] {
            let index = SubscriptionIndex::new();
            let subscription = sub("sub-1", "api-1", Some("client-A"), Some("plan-1"));
            index.register(subscription.clone());

            index.register(with_status(subscription, status));

            assert!(index.get_by_id("sub-1").is_none());
            assert!(
                index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-1").is_none()
            );
            assert!(index.get_by_api_and_client_id("api-1", "client-A").is_none());
            assert!(index.get_by_api_id("api-1").is_empty());
            assert!(index.is_empty());
            index.check_consistency().unwrap();
        }
    }

    #[test]
    fn test_closing_stale_subscription_keeps_newer_owner() {
        let index = SubscriptionIndex::new();
        let first = sub("sub-1", "api-1", Some("client"), Some("plan"));
        index.register(first.clone());
        index.register(sub("sub-2", "api-1", Some("client"), Some("plan")));

        let found = index.get_by_api_and_client_id_and_plan("api-1", "client", "plan");
        assert_eq!(found.unwrap().id, "sub-2");

        index.register(with_status(first, SubscriptionStatus::Closed));

        let found = index.get_by_api_and_client_id_and_plan("api-1", "client", "plan");
        assert_eq!(found.unwrap().id, "sub-2");
        assert_eq!(index.get_by_api_and_client_id("api-1", "client").unwrap().id, "sub-2");
        assert!(index.metrics().snapshot().stale_removals_skipped >= 1);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_plan_disambiguation() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", Some("client"), Some("plan-1")));
        index.register(sub("sub-2", "api-1", Some("client"), Some("plan-2")));

        let p1 = index.get_by_api_and_client_id_and_plan("api-1", "client", "plan-1").unwrap();
        let p2 = index.get_by_api_and_client_id_and_plan("api-1", "client", "plan-2").unwrap();
        assert_eq!(p1.id, "sub-1");
        assert_eq!(p2.id, "sub-2");
        assert_eq!(index.get_by_api_and_client_id("api-1", "client").unwrap().id, "sub-2");
    }

    #[test]
    fn test_unregister_unknown_is_noop() {
        let index = SubscriptionIndex::new();
        index.unregister(&sub("ghost", "api-1", Some("c"), None));
        assert_eq!(index.unregister_by_api("nowhere"), 0);
        assert_eq!(index.metrics().snapshot().unregistrations, 0);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_unregister_by_api_is_scoped() {
        let index = SubscriptionIndex::new();
        for i in 0..3 {
            let (client_a, client_b) = (format!("ca{i}"), format!("cb{i}"));
            index.register(sub(&format!("a{i}"), "api-1", Some(client_a.as_str()), Some("p")));
            index.register(sub(&format!("b{i}"), "api-2", Some(client_b.as_str()), Some("p")));
        }
        let before = index.subscriptions_for_api("api-2");

        assert_eq!(index.unregister_by_api("api-1"), 3);

        assert!(index.get_by_api_id("api-1").is_empty());
        assert!(index.get_by_api_and_client_id("api-1", "ca0").is_none());
        assert_eq!(index.subscriptions_for_api("api-2"), before);
        assert_eq!(index.len(), 3);
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_certificate_rotation_keeps_stale_entry_until_unregister() {
        let index = SubscriptionIndex::new();
        index.register(cert_sub("sub-1", "cert-old"));
        index.register(cert_sub("sub-1", "cert-new"));

        assert!(index.get_by_client_certificate("api-1", "cert-new", Some("plan-1")).is_some());
        assert!(index.get_by_client_certificate("api-1", "cert-new", None).is_some());
        // Superseded certificate entries are kept until unregister.
        assert!(index.get_by_client_certificate("api-1", "cert-old", Some("plan-1")).is_some());
        index.check_consistency().unwrap();

        index.unregister(&cert_sub("sub-1", "cert-new"));

        assert!(index.get_by_client_certificate("api-1", "cert-old", Some("plan-1")).is_none());
        assert!(index.get_by_client_certificate("api-1", "cert-new", None).is_none());
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_certificate_rotated_back_is_not_stale() {
        let index = SubscriptionIndex::new();
        index.register(cert_sub("sub-1", "a"));
        index.register(cert_sub("sub-1", "b"));
        index.register(cert_sub("sub-1", "a"));

        index.unregister(&cert_sub("sub-1", "a"));

        assert!(index.get_by_client_certificate("api-1", "a", None).is_none());
        assert!(index.get_by_client_certificate("api-1", "b", None).is_none());
        assert!(index.stale_certificates.is_empty());
    }

    #[test]
    fn test_trust_store_receives_servers_of_api() {
        let trust_store = Arc::new(MemoryTrustStore::new());
        let servers = Arc::new(StaticServerLookup::new());
        servers.set("api-1", ["server-1", "server-2"]);
        let index = SubscriptionIndex::with_collaborators(trust_store.clone(), servers);

        index.register(cert_sub("sub-1", "cert"));

        let bound = trust_store.servers_for_subscription("sub-1").unwrap();
        assert_eq!(bound.len(), 2);
        assert!(bound.contains("server-1"));
    }

    #[test]
    fn test_trust_store_gets_empty_servers_when_none_declared() {
        let trust_store = Arc::new(MemoryTrustStore::new());
        let index =
            SubscriptionIndex::with_collaborators(trust_store.clone(), Arc::new(NoServers));

        index.register(cert_sub("sub-1", "cert"));

        assert_eq!(trust_store.servers_for_subscription("sub-1"), Some(HashSet::new()));
    }

    #[test]
    fn test_trust_store_unbound_on_unregister_and_certificate_removal() {
        let trust_store = Arc::new(MemoryTrustStore::new());
        let index =
            SubscriptionIndex::with_collaborators(trust_store.clone(), Arc::new(NoServers));

        index.register(cert_sub("sub-1", "cert"));
        index.register(sub("sub-1", "api-1", None, Some("plan-1")));
        assert_eq!(trust_store.registered_count(), 0);

        index.register(cert_sub("sub-1", "cert"));
        index.register(with_status(cert_sub("sub-1", "cert"), SubscriptionStatus::Closed));
        assert_eq!(
            trust_store.get_by_certificate("api-1", Some("plan-1"), "cert"),
            CertificateMatch::NoBinding
        );
    }

    #[test]
    fn test_api_change_moves_reverse_entry() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", Some("c"), None));
        index.register(sub("sub-1", "api-2", Some("c"), None));

        assert!(index.get_by_api_id("api-1").is_empty());
        assert!(index.get_by_api_id("api-2").contains("sub-1"));
        assert!(index.get_by_api_and_client_id("api-1", "c").is_none());
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_api_change_drops_every_credential_of_old_api() {
        let on_api = |api: &str, cert: &str| {
            Subscription::builder()
                .id("sub-1")
                .api(api)
                .plan("plan-1")
                .client_id("client-A")
                .client_certificate(cert)
                .status(SubscriptionStatus::Accepted)
                .build()
        };
        let index = SubscriptionIndex::new();
        index.register(on_api("api-1", "cert-W"));
        index.register(on_api("api-1", "cert-X"));
        assert!(index.get_by_client_certificate("api-1", "cert-W", None).is_some());

        index.register(on_api("api-2", "cert-Y"));

        assert!(index.get_by_api_and_client_id_and_plan("api-1", "client-A", "plan-1").is_none());
        assert!(index.get_by_api_and_client_id("api-1", "client-A").is_none());
        for cert in ["cert-W", "cert-X", "cert-Y"] {
            assert!(index.get_by_client_certificate("api-1", cert, None).is_none());
            assert!(index.get_by_client_certificate("api-1", cert, Some("plan-1")).is_none());
        }
        assert_eq!(index.get_by_client_certificate("api-2", "cert-Y", None).unwrap().api, "api-2");
        assert!(index.get_by_api_and_client_id("api-2", "client-A").is_some());
        assert!(index.stale_certificates.is_empty());
        index.check_consistency().unwrap();
    }

    #[test]
    fn test_subscriptions_for_api_sorted() {
        let index = SubscriptionIndex::new();
        for id in ["sub-3", "sub-1", "sub-2"] {
            index.register(sub(id, "api-1", None, None));
        }
        let ids: Vec<_> =
            index.subscriptions_for_api("api-1").iter().map(|s| s.id.to_string()).collect();
        assert_eq!(ids, ["sub-1", "sub-2", "sub-3"]);
    }

    #[test]
    fn test_subscription_without_credentials_is_only_in_primary_and_reverse() {
        let index = SubscriptionIndex::new();
        index.register(sub("sub-1", "api-1", None, Some("plan-1")));

        assert!(index.get_by_id("sub-1").is_some());
        assert!(index.by_client_id.is_empty());
        assert!(index.by_client_id_and_plan.is_empty());
        assert!(index.by_certificate.is_empty());
        index.check_consistency().unwrap();
    }
}
