//! API-key record model.

use chrono::{DateTime, Utc};
use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::types::{ApiId, ApplicationId, PlanId, SubscriptionId};

/// An API key as observed by the sync collaborator.
///
/// A key is scoped to one API: the same key string registered for two APIs
/// yields two independent records. The `subscription` field links the key to
/// the subscription it authorizes.
///
/// # Example
///
/// ```
/// use gateway_common_cache::ApiKeyRecord;
///
/// let key = ApiKeyRecord::builder()
///     .id("key-id-1")
///     .api("my-api")
///     .key("abc")
///     .subscription("sub-1")
///     .application("app-1")
///     .build();
///
/// assert!(key.active);
/// assert_eq!(key.md5_hex(), "900150983cd24fb0d6963f7d28e17f72");
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, bon::Builder)]
#[serde(deny_unknown_fields, rename_all = "camelCase")]
pub struct ApiKeyRecord {
    /// Record identifier.
    #[builder(into)]
    pub id: String,

    /// The API the key is valid for.
    #[builder(into)]
    pub api: ApiId,

    /// The raw key value presented by clients.
    #[builder(into)]
    pub key: String,

    /// The plan of the owning subscription, when known.
    #[builder(into)]
    pub plan: Option<PlanId>,

    /// The subscription this key authorizes.
    #[builder(into)]
    pub subscription: SubscriptionId,

    /// The application owning the key.
    #[builder(into)]
    pub application: ApplicationId,

    /// Whether the key may currently be used.
    ///
    /// Registering an inactive key removes it from the index.
    #[builder(default = true)]
    #[serde(default = "default_active")]
    pub active: bool,

    /// Expiry reported by the control plane. Informational only: expiry is
    /// enforced by the control plane deactivating the key.
    pub expire_at: Option<DateTime<Utc>>,
}

fn default_active() -> bool {
    true
}

impl ApiKeyRecord {
    /// Lower-case hex MD5 digest of the key value.
    #[must_use]
    pub fn md5_hex(&self) -> String {
        md5_hex(&self.key)
    }
}

/// Lower-case hex MD5 digest of `value`.
///
/// This is the form clients use when presenting a hashed API key.
#[must_use]
pub fn md5_hex(value: &str) -> String {
    hex::encode(Md5::digest(value.as_bytes()))
}
