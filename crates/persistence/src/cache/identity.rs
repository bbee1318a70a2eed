//! The parameter identity cache.
//!
//! Resolution is two-tiered. Each unit of work owns a [`TransactionCache`]:
//! a request-local tier holding ids minted during the current transaction
//! (not yet visible to anyone else) layered over a process-wide
//! [`SharedIdentityCache`] of bounded, LRU-evicting maps. Lookup checks the
//! local tier, then the shared tier; a miss in both is reported to the
//! caller, which resolves the key against the database in batch.
//!
//! Visibility follows the transaction: after a commit,
//! [`TransactionCache::update_shared_maps`] promotes local entries into the
//! shared tier; after a rollback, [`TransactionCache::clear_local`] discards
//! them without touching the shared tier, so ids for rows that never
//! committed cannot poison other transactions' view.
//!
//! Eviction never violates the append-only dictionary invariant: an evicted
//! id is simply re-resolved from the database on the next miss and comes
//! back identical.
//!
//! The shared cache is an explicitly constructed service owned by the
//! persistence layer - there is no process-wide registry to look it up in.

use std::collections::HashMap;
use std::hash::Hash;
use std::num::NonZeroUsize;
use std::sync::Arc;

use lru::LruCache;
use parking_lot::{Mutex, RwLock};

use crate::config::CacheConfig;
use crate::params::values::{
    CommonCanonicalValueKey, CommonTokenValueKey, LogicalResourceIdentKey,
};

/// Outcome of a batch cache lookup: the ids that were found, and the keys
/// that were not.
///
/// A miss is never an error; the caller either resolves the missing keys
/// against the database or, on the query path, treats them as "this value
/// does not exist" (the filter matches nothing).
#[derive(Debug)]
pub struct BatchResolution<K, V> {
    /// Keys resolved from the cache, with their ids.
    pub resolved: HashMap<K, V>,
    /// Keys not present in any cache tier.
    pub misses: Vec<K>,
}

impl<K, V> BatchResolution<K, V> {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            resolved: HashMap::with_capacity(capacity),
            misses: Vec::new(),
        }
    }
}

/// The get/add contract for identity resolution.
///
/// Implemented by both cache tiers; callers that only read (the query
/// compiler) and callers that also mint ids (the ingestion path) share it.
pub trait ParameterIdentityCache: Send + Sync {
    /// Looks up the id for a parameter name.
    fn get_parameter_name_id(&self, parameter_name: &str) -> Option<i32>;

    /// Records the id for a parameter name.
    fn add_parameter_name(&self, parameter_name: &str, id: i32);

    /// Looks up the id for a code system.
    fn get_code_system_id(&self, code_system: &str) -> Option<i32>;

    /// Records the id for a code system.
    fn add_code_system(&self, code_system: &str, id: i32);

    /// Looks up the id for a common token value.
    fn get_common_token_value_id(&self, key: &CommonTokenValueKey) -> Option<i64>;

    /// Records the id for a common token value.
    fn add_common_token_value(&self, key: CommonTokenValueKey, id: i64);

    /// Looks up the id for a canonical value.
    fn get_canonical_id(&self, key: &CommonCanonicalValueKey) -> Option<i64>;

    /// Records the id for a canonical value.
    fn add_canonical_value(&self, key: CommonCanonicalValueKey, id: i64);

    /// Looks up the id for a logical resource identity.
    fn get_logical_resource_id(&self, key: &LogicalResourceIdentKey) -> Option<i64>;

    /// Records the id for a logical resource identity.
    fn add_logical_resource_ident(&self, key: LogicalResourceIdentKey, id: i64);

    /// Looks up the id for a resource type name.
    fn get_resource_type_id(&self, resource_type: &str) -> Option<i32>;

    /// Looks up the name for a resource type id.
    fn get_resource_type_name(&self, resource_type_id: i32) -> Option<String>;

    /// Batch lookup of parameter-name ids, reporting misses separately.
    fn resolve_parameter_name_ids(&self, names: &[String]) -> BatchResolution<String, i32> {
        let mut result = BatchResolution::with_capacity(names.len());
        for name in names {
            match self.get_parameter_name_id(name) {
                Some(id) => {
                    result.resolved.insert(name.clone(), id);
                }
                None => result.misses.push(name.clone()),
            }
        }
        result
    }

    /// Batch lookup of code-system ids, reporting misses separately.
    fn resolve_code_system_ids(&self, systems: &[String]) -> BatchResolution<String, i32> {
        let mut result = BatchResolution::with_capacity(systems.len());
        for system in systems {
            match self.get_code_system_id(system) {
                Some(id) => {
                    result.resolved.insert(system.clone(), id);
                }
                None => result.misses.push(system.clone()),
            }
        }
        result
    }

    /// Batch lookup of common-token-value ids, reporting misses separately.
    fn resolve_common_token_value_ids(
        &self,
        keys: &[CommonTokenValueKey],
    ) -> BatchResolution<CommonTokenValueKey, i64> {
        let mut result = BatchResolution::with_capacity(keys.len());
        for key in keys {
            match self.get_common_token_value_id(key) {
                Some(id) => {
                    result.resolved.insert(key.clone(), id);
                }
                None => result.misses.push(key.clone()),
            }
        }
        result
    }

    /// Batch lookup of canonical-value ids, reporting misses separately.
    fn resolve_canonical_ids(
        &self,
        keys: &[CommonCanonicalValueKey],
    ) -> BatchResolution<CommonCanonicalValueKey, i64> {
        let mut result = BatchResolution::with_capacity(keys.len());
        for key in keys {
            match self.get_canonical_id(key) {
                Some(id) => {
                    result.resolved.insert(key.clone(), id);
                }
                None => result.misses.push(key.clone()),
            }
        }
        result
    }

    /// Batch lookup of logical-resource ids, reporting misses separately.
    fn resolve_logical_resource_ids(
        &self,
        keys: &[LogicalResourceIdentKey],
    ) -> BatchResolution<LogicalResourceIdentKey, i64> {
        let mut result = BatchResolution::with_capacity(keys.len());
        for key in keys {
            match self.get_logical_resource_id(key) {
                Some(id) => {
                    result.resolved.insert(key.clone(), id);
                }
                None => result.misses.push(key.clone()),
            }
        }
        result
    }
}

/// The process-wide, bounded cache tier.
///
/// Safe for concurrent readers and writers: each dictionary kind is an LRU
/// map behind its own mutex, so contention on token values never blocks
/// parameter-name lookups. The resource-type dictionary is tiny, fixed at
/// startup and append-only, so it lives in an unbounded map primed via
/// [`SharedIdentityCache::prime_resource_types`].
pub struct SharedIdentityCache {
    parameter_names: Mutex<LruCache<String, i32>>,
    code_systems: Mutex<LruCache<String, i32>>,
    common_token_values: Mutex<LruCache<CommonTokenValueKey, i64>>,
    canonical_values: Mutex<LruCache<CommonCanonicalValueKey, i64>>,
    logical_resource_idents: Mutex<LruCache<LogicalResourceIdentKey, i64>>,
    resource_types: RwLock<ResourceTypeMaps>,
}

#[derive(Default)]
struct ResourceTypeMaps {
    by_name: HashMap<String, i32>,
    by_id: HashMap<i32, String>,
}

fn bounded<K: Hash + Eq, V>(capacity: usize) -> Mutex<LruCache<K, V>> {
    // capacity 0 would make LruCache::new panic; clamp to 1
    let capacity = NonZeroUsize::new(capacity.max(1)).unwrap();
    Mutex::new(LruCache::new(capacity))
}

impl SharedIdentityCache {
    /// Creates a cache sized by the given configuration.
    pub fn new(config: &CacheConfig) -> Self {
        Self {
            parameter_names: bounded(config.parameter_names),
            code_systems: bounded(config.code_systems),
            common_token_values: bounded(config.common_token_values),
            canonical_values: bounded(config.canonical_values),
            logical_resource_idents: bounded(config.logical_resource_idents),
            resource_types: RwLock::new(ResourceTypeMaps::default()),
        }
    }

    /// Loads the resource-type dictionary.
    ///
    /// Called once at startup with the full table contents; may be called
    /// again after new types are provisioned (entries are only ever added).
    pub fn prime_resource_types<I>(&self, types: I)
    where
        I: IntoIterator<Item = (String, i32)>,
    {
        let mut maps = self.resource_types.write();
        for (name, id) in types {
            maps.by_id.insert(id, name.clone());
            maps.by_name.insert(name, id);
        }
    }
}

impl ParameterIdentityCache for SharedIdentityCache {
    fn get_parameter_name_id(&self, parameter_name: &str) -> Option<i32> {
        self.parameter_names.lock().get(parameter_name).copied()
    }

    fn add_parameter_name(&self, parameter_name: &str, id: i32) {
        self.parameter_names
            .lock()
            .put(parameter_name.to_string(), id);
    }

    fn get_code_system_id(&self, code_system: &str) -> Option<i32> {
        self.code_systems.lock().get(code_system).copied()
    }

    fn add_code_system(&self, code_system: &str, id: i32) {
        self.code_systems.lock().put(code_system.to_string(), id);
    }

    fn get_common_token_value_id(&self, key: &CommonTokenValueKey) -> Option<i64> {
        self.common_token_values.lock().get(key).copied()
    }

    fn add_common_token_value(&self, key: CommonTokenValueKey, id: i64) {
        self.common_token_values.lock().put(key, id);
    }

    fn get_canonical_id(&self, key: &CommonCanonicalValueKey) -> Option<i64> {
        self.canonical_values.lock().get(key).copied()
    }

    fn add_canonical_value(&self, key: CommonCanonicalValueKey, id: i64) {
        self.canonical_values.lock().put(key, id);
    }

    fn get_logical_resource_id(&self, key: &LogicalResourceIdentKey) -> Option<i64> {
        self.logical_resource_idents.lock().get(key).copied()
    }

    fn add_logical_resource_ident(&self, key: LogicalResourceIdentKey, id: i64) {
        self.logical_resource_idents.lock().put(key, id);
    }

    fn get_resource_type_id(&self, resource_type: &str) -> Option<i32> {
        self.resource_types.read().by_name.get(resource_type).copied()
    }

    fn get_resource_type_name(&self, resource_type_id: i32) -> Option<String> {
        self.resource_types.read().by_id.get(&resource_type_id).cloned()
    }
}

#[derive(Default)]
struct LocalMaps {
    parameter_names: HashMap<String, i32>,
    code_systems: HashMap<String, i32>,
    common_token_values: HashMap<CommonTokenValueKey, i64>,
    canonical_values: HashMap<CommonCanonicalValueKey, i64>,
    logical_resource_idents: HashMap<LogicalResourceIdentKey, i64>,
}

/// The per-unit-of-work view of the identity cache.
///
/// Owned by the thread driving one transaction. `add_*` writes land in the
/// request-local tier only; other transactions cannot observe them until
/// [`TransactionCache::update_shared_maps`] runs after a successful commit.
/// On rollback, call [`TransactionCache::clear_local`] instead.
pub struct TransactionCache {
    shared: Arc<SharedIdentityCache>,
    local: Mutex<LocalMaps>,
}

impl TransactionCache {
    /// Creates a transaction-scoped view over the shared cache.
    pub fn new(shared: Arc<SharedIdentityCache>) -> Self {
        Self {
            shared,
            local: Mutex::new(LocalMaps::default()),
        }
    }

    /// Returns the shared tier.
    pub fn shared(&self) -> &Arc<SharedIdentityCache> {
        &self.shared
    }

    /// Promotes all locally cached entries into the shared tier.
    ///
    /// Call exactly once, after the surrounding transaction has durably
    /// committed. The local tier is left empty.
    pub fn update_shared_maps(&self) {
        let taken = std::mem::take(&mut *self.local.lock());
        for (name, id) in taken.parameter_names {
            self.shared.add_parameter_name(&name, id);
        }
        for (system, id) in taken.code_systems {
            self.shared.add_code_system(&system, id);
        }
        for (key, id) in taken.common_token_values {
            self.shared.add_common_token_value(key, id);
        }
        for (key, id) in taken.canonical_values {
            self.shared.add_canonical_value(key, id);
        }
        for (key, id) in taken.logical_resource_idents {
            self.shared.add_logical_resource_ident(key, id);
        }
    }

    /// Discards all locally cached entries without touching the shared tier.
    ///
    /// Call when the surrounding transaction rolls back.
    pub fn clear_local(&self) {
        *self.local.lock() = LocalMaps::default();
    }
}

impl ParameterIdentityCache for TransactionCache {
    fn get_parameter_name_id(&self, parameter_name: &str) -> Option<i32> {
        if let Some(id) = self.local.lock().parameter_names.get(parameter_name) {
            return Some(*id);
        }
        self.shared.get_parameter_name_id(parameter_name)
    }

    fn add_parameter_name(&self, parameter_name: &str, id: i32) {
        self.local
            .lock()
            .parameter_names
            .insert(parameter_name.to_string(), id);
    }

    fn get_code_system_id(&self, code_system: &str) -> Option<i32> {
        if let Some(id) = self.local.lock().code_systems.get(code_system) {
            return Some(*id);
        }
        self.shared.get_code_system_id(code_system)
    }

    fn add_code_system(&self, code_system: &str, id: i32) {
        self.local
            .lock()
            .code_systems
            .insert(code_system.to_string(), id);
    }

    fn get_common_token_value_id(&self, key: &CommonTokenValueKey) -> Option<i64> {
        if let Some(id) = self.local.lock().common_token_values.get(key) {
            return Some(*id);
        }
        self.shared.get_common_token_value_id(key)
    }

    fn add_common_token_value(&self, key: CommonTokenValueKey, id: i64) {
        self.local.lock().common_token_values.insert(key, id);
    }

    fn get_canonical_id(&self, key: &CommonCanonicalValueKey) -> Option<i64> {
        if let Some(id) = self.local.lock().canonical_values.get(key) {
            return Some(*id);
        }
        self.shared.get_canonical_id(key)
    }

    fn add_canonical_value(&self, key: CommonCanonicalValueKey, id: i64) {
        self.local.lock().canonical_values.insert(key, id);
    }

    fn get_logical_resource_id(&self, key: &LogicalResourceIdentKey) -> Option<i64> {
        if let Some(id) = self.local.lock().logical_resource_idents.get(key) {
            return Some(*id);
        }
        self.shared.get_logical_resource_id(key)
    }

    fn add_logical_resource_ident(&self, key: LogicalResourceIdentKey, id: i64) {
        self.local.lock().logical_resource_idents.insert(key, id);
    }

    fn get_resource_type_id(&self, resource_type: &str) -> Option<i32> {
        self.shared.get_resource_type_id(resource_type)
    }

    fn get_resource_type_name(&self, resource_type_id: i32) -> Option<String> {
        self.shared.get_resource_type_name(resource_type_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::ShardKey;

    fn small_shared() -> Arc<SharedIdentityCache> {
        Arc::new(SharedIdentityCache::new(&CacheConfig::default()))
    }

    #[test]
    fn test_local_entries_invisible_until_promoted() {
        let shared = small_shared();
        let tx_a = TransactionCache::new(Arc::clone(&shared));
        let tx_b = TransactionCache::new(Arc::clone(&shared));

        tx_a.add_parameter_name("family", 17);
        assert_eq!(tx_a.get_parameter_name_id("family"), Some(17));
        // B must not see A's uncommitted entry
        assert_eq!(tx_b.get_parameter_name_id("family"), None);

        tx_a.update_shared_maps();
        assert_eq!(tx_b.get_parameter_name_id("family"), Some(17));
    }

    #[test]
    fn test_rollback_discards_local_entries() {
        let shared = small_shared();
        let tx = TransactionCache::new(Arc::clone(&shared));

        let key = LogicalResourceIdentKey::new(1, "p1");
        tx.add_logical_resource_ident(key.clone(), 1001);
        tx.clear_local();

        assert_eq!(tx.get_logical_resource_id(&key), None);
        assert_eq!(shared.get_logical_resource_id(&key), None);
    }

    #[test]
    fn test_eviction_then_readd_is_idempotent() {
        let config = CacheConfig {
            code_systems: 1,
            ..CacheConfig::default()
        };
        let shared = SharedIdentityCache::new(&config);

        shared.add_code_system("http://loinc.org", 1);
        shared.add_code_system("http://snomed.info/sct", 2);
        // capacity 1: loinc was evicted
        assert_eq!(shared.get_code_system_id("http://loinc.org"), None);

        // re-resolution from the database yields the identical id; re-adding
        // restores the mapping unchanged
        shared.add_code_system("http://loinc.org", 1);
        assert_eq!(shared.get_code_system_id("http://loinc.org"), Some(1));
    }

    #[test]
    fn test_batch_resolution_reports_misses() {
        let shared = small_shared();
        shared.add_code_system("http://loinc.org", 1);

        let systems = vec![
            "http://loinc.org".to_string(),
            "http://snomed.info/sct".to_string(),
        ];
        let result = shared.resolve_code_system_ids(&systems);
        assert_eq!(result.resolved.get("http://loinc.org"), Some(&1));
        assert_eq!(result.misses, vec!["http://snomed.info/sct".to_string()]);
    }

    #[test]
    fn test_token_values_keyed_by_shard_and_system() {
        let shared = small_shared();
        let key_a = CommonTokenValueKey::new(ShardKey::FIXED, 3, "1234-5");
        let key_b = CommonTokenValueKey::new(ShardKey::new(1), 3, "1234-5");

        shared.add_common_token_value(key_a.clone(), 42);
        assert_eq!(shared.get_common_token_value_id(&key_a), Some(42));
        // same (system, code) on another shard is a different dictionary row
        assert_eq!(shared.get_common_token_value_id(&key_b), None);
    }

    #[test]
    fn test_resource_types_primed_append_only() {
        let shared = small_shared();
        shared.prime_resource_types(vec![("Patient".to_string(), 1), ("Observation".to_string(), 2)]);

        assert_eq!(shared.get_resource_type_id("Patient"), Some(1));
        assert_eq!(shared.get_resource_type_name(2).as_deref(), Some("Observation"));
        assert_eq!(shared.get_resource_type_id("Device"), None);

        let tx = TransactionCache::new(Arc::new(SharedIdentityCache::new(&CacheConfig::default())));
        assert_eq!(tx.get_resource_type_id("Patient"), None);
    }

    #[test]
    fn test_concurrent_shared_access() {
        let shared = small_shared();
        let mut handles = Vec::new();
        for _ in 0..8 {
            let shared = Arc::clone(&shared);
            handles.push(std::thread::spawn(move || {
                for i in 0..100 {
                    let key = CommonTokenValueKey::new(ShardKey::FIXED, 1, format!("code-{i}"));
                    shared.add_common_token_value(key.clone(), i as i64);
                    // every worker observes the same id for the same key
                    assert_eq!(shared.get_common_token_value_id(&key), Some(i as i64));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }
    }
}
