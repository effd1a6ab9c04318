//! Concurrent index of active API keys.
//!
//! Keys are stored under their `(api, key)` pair together with the MD5
//! digest of the key value, computed once at registration so that hashed-key
//! lookups never hash on the request path. A reverse map from API to key set
//! serves API-scoped teardown and the MD5 scan.
//!
//! # Concurrency
//!
//! Both maps are sharded ([`DashMap`]), so readers only ever contend on the
//! shard holding their key. Writers are serialised by a writer-only mutex;
//! readers never take it. Whenever the primary map and the reverse map change
//! together, the reverse entry's shard is held across both updates, so a
//! reader going through the reverse map never observes one without the other.
//! Lock order is always reverse map first, then primary map.

use std::{collections::HashSet, sync::Arc};

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use crate::{
    api_key::ApiKeyRecord,
    error::{CacheError, CacheResult},
    metrics::IndexMetrics,
    types::ApiId,
};

/// Composite primary key of the index.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct KeyRef {
    api: ApiId,
    key: String,
}

impl KeyRef {
    fn new(api: &str, key: &str) -> Self {
        Self { api: ApiId::from(api), key: key.to_owned() }
    }
}

/// A record plus its precomputed digest.
#[derive(Debug)]
struct IndexedKey {
    record: Arc<ApiKeyRecord>,
    md5: String,
}

/// Index of active API keys, scoped by API.
///
/// # Example
///
/// ```
/// use gateway_common_cache::{ApiKeyIndex, ApiKeyRecord, api_key::md5_hex};
///
/// let index = ApiKeyIndex::new();
/// index.register(
///     ApiKeyRecord::builder()
///         .id("k1")
///         .api("my-api")
///         .key("key-0")
///         .subscription("sub-1")
///         .application("app-1")
///         .build(),
/// );
///
/// assert!(index.get_by_api_and_key("my-api", "key-0").is_some());
/// assert!(index.get_by_api_and_md5_key("my-api", &md5_hex("key-0")).is_some());
/// assert!(index.get_by_api_and_key("other-api", "key-0").is_none());
/// ```
#[derive(Default)]
pub struct ApiKeyIndex {
    keys: DashMap<KeyRef, IndexedKey>,
    by_api: DashMap<ApiId, HashSet<String>>,
    write_lock: Mutex<()>,
    metrics: IndexMetrics,
}

impl ApiKeyIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or overwrites an active key; an inactive key is removed instead.
    ///
    /// Re-registering an identical key is a no-op in effect.
    #[tracing::instrument(skip(self, record), fields(api = %record.api, key_id = %record.id))]
    pub fn register(&self, record: ApiKeyRecord) {
        let _guard = self.write_lock.lock();
        if !record.active {
            if self.remove_locked(record.api.as_str(), &record.key) {
                self.metrics.record_eviction();
                debug!("Inactive API key evicted");
            }
            return;
        }

        let md5 = record.md5_hex();
        let api = record.api.clone();
        let key = record.key.clone();
        let mut api_keys = self.by_api.entry(api.clone()).or_default();
        self.keys
            .insert(KeyRef { api, key: key.clone() }, IndexedKey { record: Arc::new(record), md5 });
        api_keys.insert(key);
        drop(api_keys);
        self.metrics.record_register();
    }

    /// Removes a key. Unknown keys are ignored.
    #[tracing::instrument(skip(self, record), fields(api = %record.api, key_id = %record.id))]
    pub fn unregister(&self, record: &ApiKeyRecord) {
        let _guard = self.write_lock.lock();
        if self.remove_locked(record.api.as_str(), &record.key) {
            self.metrics.record_unregister();
        }
    }

    /// Removes every key of an API and returns how many were removed.
    ///
    /// Unknown APIs are ignored.
    #[tracing::instrument(skip(self))]
    pub fn unregister_by_api(&self, api: &str) -> usize {
        let _guard = self.write_lock.lock();
        let removed = match self.by_api.get_mut(api) {
            Some(mut api_keys) => {
                let mut removed = 0;
                for key in api_keys.drain() {
                    if self.keys.remove(&KeyRef::new(api, &key)).is_some() {
                        removed += 1;
                    }
                }
                removed
            },
            None => 0,
        };
        self.by_api.remove_if(api, |_, api_keys| api_keys.is_empty());
        self.metrics.record_api_teardown();
        debug!(removed, "API keys torn down");
        removed
    }

    /// Point lookup by raw key value.
    #[must_use]
    pub fn get_by_api_and_key(&self, api: &str, key: &str) -> Option<Arc<ApiKeyRecord>> {
        self.keys.get(&KeyRef::new(api, key)).map(|entry| Arc::clone(&entry.record))
    }

    /// Lookup by the hex MD5 digest of the key value (case-insensitive).
    ///
    /// Scans the keys of `api` only.
    #[must_use]
    pub fn get_by_api_and_md5_key(&self, api: &str, md5: &str) -> Option<Arc<ApiKeyRecord>> {
        let api_keys = self.by_api.get(api)?;
        api_keys.iter().find_map(|key| {
            let entry = self.keys.get(&KeyRef::new(api, key))?;
            entry.md5.eq_ignore_ascii_case(md5).then(|| Arc::clone(&entry.record))
        })
    }

    /// All keys of an API, ordered by key value.
    #[must_use]
    pub fn get_by_api(&self, api: &str) -> Vec<Arc<ApiKeyRecord>> {
        let Some(api_keys) = self.by_api.get(api) else {
            return Vec::new();
        };
        let mut records: Vec<_> = api_keys
            .iter()
            .filter_map(|key| self.keys.get(&KeyRef::new(api, key)))
            .map(|entry| Arc::clone(&entry.record))
            .collect();
        drop(api_keys);
        records.sort_by(|a, b| a.key.cmp(&b.key));
        records
    }

    /// Number of keys in the reverse set of `api`.
    #[must_use]
    pub fn api_key_count(&self, api: &str) -> usize {
        self.by_api.get(api).map_or(0, |api_keys| api_keys.len())
    }

    /// Total number of indexed keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no key is indexed.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Write-path counters.
    #[must_use]
    pub fn metrics(&self) -> &IndexMetrics {
        &self.metrics
    }

    /// Verifies that the primary and reverse maps describe the same key set.
    ///
    /// Blocks writers for the duration of the check.
    ///
    /// # Errors
    ///
    /// Returns [`CacheError::Corruption`] describing the first violation found.
    pub fn check_consistency(&self) -> CacheResult<()> {
        let _guard = self.write_lock.lock();

        for entry in &self.keys {
            let key_ref = entry.key();
            if entry.value().record.api != key_ref.api || entry.value().record.key != key_ref.key {
                return Err(CacheError::corruption(
                    "api_keys",
                    format!("{}/{}", key_ref.api, key_ref.key),
                    "record does not match its key",
                ));
            }
            let listed =
                self.by_api.get(&key_ref.api).is_some_and(|keys| keys.contains(&key_ref.key));
            if !listed {
                return Err(CacheError::corruption(
                    "api_keys.by_api",
                    key_ref.api.as_str(),
                    format!("key {} missing from reverse set", key_ref.key),
                ));
            }
        }

        let mut listed_total = 0;
        for entry in &self.by_api {
            if entry.value().is_empty() {
                return Err(CacheError::corruption(
                    "api_keys.by_api",
                    entry.key().as_str(),
                    "empty reverse set not dropped",
                ));
            }
            listed_total += entry.value().len();
        }
        if listed_total != self.keys.len() {
            return Err(CacheError::corruption(
                "api_keys.by_api",
                "*",
                format!("{listed_total} reverse entries for {} keys", self.keys.len()),
            ));
        }
        Ok(())
    }

    fn remove_locked(&self, api: &str, key: &str) -> bool {
        let removed = match self.by_api.get_mut(api) {
            Some(mut api_keys) => {
                let removed = self.keys.remove(&KeyRef::new(api, key)).is_some();
                api_keys.remove(key);
                removed
            },
            None => self.keys.remove(&KeyRef::new(api, key)).is_some(),
        };
        self.by_api.remove_if(api, |_, api_keys| api_keys.is_empty());
        removed
    }
}

impl std::fmt::Debug for ApiKeyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiKeyIndex")
            .field("keys", &self.keys.len())
            .field("apis", &self.by_api.len())
            .finish_non_exhaustive()
    }
}
