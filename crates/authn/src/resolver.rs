//! Security-token resolution.
//!
//! [`SecurityTokenResolver`] answers the one question the request path asks:
//! which subscription, if any, authorizes this token on this API (and plan)?
//!
//! # Resolution order
//!
//! ```text
//! CLIENT_ID          → (api, client, plan) when a plan is given
//!                      (api, client)       when no plan is given, or as a
//!                                          configured fallback
//! CLIENT_CERTIFICATE → trust store for (api, plan?)
//!                      subscription index only when no trust store is bound
//! API_KEY            → (api, key) → subscription id → subscription
//! MD5_API_KEY        → md5 scan of the api's keys → subscription id → subscription
//! anything else      → nothing
//! ```
//!
//! Resolution is synchronous, lock-free on the read side and never fails;
//! outcomes are counted per token kind in [`ResolutionMetrics`].

use std::sync::Arc;

use gateway_common_cache::{
    ApiKeyIndex, ApiKeyRecord, CertificateMatch, Subscription, SubscriptionIndex,
};
use tracing::debug;

use crate::{config::ResolverConfig, metrics::ResolutionMetrics, token::SecurityToken};

/// Resolves security tokens to the subscriptions they belong to.
///
/// Cheap to share: hold it behind an [`Arc`] or clone the indices into
/// several resolvers.
pub struct SecurityTokenResolver {
    subscriptions: Arc<SubscriptionIndex>,
    api_keys: Arc<ApiKeyIndex>,
    config: ResolverConfig,
    metrics: ResolutionMetrics,
}

#[bon::bon]
impl SecurityTokenResolver {
    /// Creates a resolver over the given indices.
    ///
    /// Certificates are resolved through the trust store the subscription
    /// index was built with.
    #[builder]
    pub fn new(
        subscriptions: Arc<SubscriptionIndex>,
        api_keys: Arc<ApiKeyIndex>,
        #[builder(default)] config: ResolverConfig,
    ) -> Self {
        Self { subscriptions, api_keys, config, metrics: ResolutionMetrics::new() }
    }

    /// Finds the subscription authorizing `token` on `api`.
    ///
    /// `plan` narrows client-id and certificate lookups; API keys are bound
    /// to a single subscription and ignore it.
    #[must_use]
    pub fn resolve(
        &self,
        api: &str,
        token: &SecurityToken,
        plan: Option<&str>,
    ) -> Option<Arc<Subscription>> {
        let found = match token {
            SecurityToken::ClientId(client_id) => self.resolve_client_id(api, client_id, plan),
            SecurityToken::ClientCertificate(certificate) => {
                self.resolve_certificate(api, certificate, plan)
            },
            SecurityToken::ApiKey(key) => {
                self.api_keys.get_by_api_and_key(api, key).and_then(|r| self.subscription_of(&r))
            },
            SecurityToken::Md5ApiKey(digest) => self
                .api_keys
                .get_by_api_and_md5_key(api, digest)
                .and_then(|r| self.subscription_of(&r)),
            SecurityToken::Unknown { kind, .. } => {
                debug!(api, kind = %kind, "unsupported security token kind");
                None
            },
        };

        self.metrics.record(token.kind(), found.is_some());
        if found.is_none() {
            debug!(api, kind = %token.kind(), plan, "security token did not resolve");
        }
        found
    }

    fn resolve_client_id(
        &self,
        api: &str,
        client_id: &str,
        plan: Option<&str>,
    ) -> Option<Arc<Subscription>> {
        match plan {
            Some(plan) => self
                .subscriptions
                .get_by_api_and_client_id_and_plan(api, client_id, plan)
                .or_else(|| {
                    self.config
                        .client_id_plan_fallback
                        .then(|| self.subscriptions.get_by_api_and_client_id(api, client_id))
                        .flatten()
                }),
            None => self.subscriptions.get_by_api_and_client_id(api, client_id),
        }
    }

    fn resolve_certificate(
        &self,
        api: &str,
        certificate: &str,
        plan: Option<&str>,
    ) -> Option<Arc<Subscription>> {
        match self.subscriptions.trust_store().get_by_certificate(api, plan, certificate) {
            CertificateMatch::Found(subscription) => Some(subscription),
            CertificateMatch::NotFound => None,
            CertificateMatch::NoBinding if self.config.certificate_index_fallback => {
                self.subscriptions.get_by_client_certificate(api, certificate, plan)
            },
            CertificateMatch::NoBinding => None,
        }
    }

    fn subscription_of(&self, record: &ApiKeyRecord) -> Option<Arc<Subscription>> {
        let subscription = self.subscriptions.get_by_id(record.subscription.as_str());
        if subscription.is_none() {
            debug!(
                api = %record.api,
                subscription_id = %record.subscription,
                "api key references a subscription that is not cached"
            );
        }
        subscription
    }

    /// The resolver's configuration.
    #[must_use]
    pub fn config(&self) -> &ResolverConfig {
        &self.config
    }

    /// Resolution outcome counters.
    #[must_use]
    pub fn metrics(&self) -> &ResolutionMetrics {
        &self.metrics
    }

    /// The subscription index this resolver reads.
    #[must_use]
    pub fn subscriptions(&self) -> &Arc<SubscriptionIndex> {
        &self.subscriptions
    }

    /// The API key index this resolver reads.
    #[must_use]
    pub fn api_keys(&self) -> &Arc<ApiKeyIndex> {
        &self.api_keys
    }
}

impl std::fmt::Debug for SecurityTokenResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SecurityTokenResolver")
            .field("subscriptions", &self.subscriptions.len())
            .field("api_keys", &self.api_keys.len())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
