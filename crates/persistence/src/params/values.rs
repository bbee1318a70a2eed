//! Dictionary value types.
//!
//! Natural keys awaiting surrogate-id resolution: parameter names, code
//! systems, common token values, common canonical values and logical
//! resource identities. Each value starts unresolved and is filled in from
//! the identity cache or from the database during batch resolution.
//!
//! Two occurrences of the same natural key must always resolve to the same
//! surrogate id; the dictionaries are append-only. Equality and ordering are
//! therefore defined on the natural key alone - the ordering doubles as the
//! deterministic insert order that keeps concurrent transactions acquiring
//! row locks in the same sequence.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::tenant::ShardKey;

/// Where a surrogate id came from.
///
/// Ids read from the shared cache were minted by a previously committed
/// transaction and survive a rollback of the current one. Ids obtained from
/// the database inside the current transaction may be rolled back with it,
/// so a batch retry must discard them and resolve again.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resolution<T> {
    /// No surrogate id has been assigned yet.
    Unresolved,
    /// Resolved from a cache tier or read from a row some other transaction
    /// had already committed; durable regardless of this transaction.
    FromCache(T),
    /// Resolved after this transaction's own insert; durable only once this
    /// transaction commits.
    FromDatabase(T),
}

impl<T: Copy> Resolution<T> {
    /// Returns the surrogate id, if resolved.
    pub fn id(&self) -> Option<T> {
        match self {
            Resolution::Unresolved => None,
            Resolution::FromCache(id) | Resolution::FromDatabase(id) => Some(*id),
        }
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        !matches!(self, Resolution::Unresolved)
    }

    /// Drops a database-sourced id, returning the value to unresolved.
    ///
    /// Cache-sourced ids are kept: they were committed by someone else.
    pub fn reset_database_resolution(&mut self) {
        if let Resolution::FromDatabase(_) = self {
            *self = Resolution::Unresolved;
        }
    }
}

/// A search parameter name awaiting its `parameter_name_id`.
#[derive(Debug, Clone)]
pub struct ParameterNameValue {
    parameter_name: String,
    resolution: Resolution<i32>,
}

impl ParameterNameValue {
    /// Creates an unresolved value for the given parameter name.
    pub fn new(parameter_name: impl Into<String>) -> Self {
        Self {
            parameter_name: parameter_name.into(),
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns the parameter name.
    pub fn parameter_name(&self) -> &str {
        &self.parameter_name
    }

    /// Returns the surrogate id, if resolved.
    pub fn parameter_name_id(&self) -> Option<i32> {
        self.resolution.id()
    }

    /// Records an id obtained from a cache tier.
    pub fn set_id_from_cache(&mut self, id: i32) {
        self.resolution = Resolution::FromCache(id);
    }

    /// Records an id obtained from the database in this transaction.
    pub fn set_id_from_database(&mut self, id: i32) {
        self.resolution = Resolution::FromDatabase(id);
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Discards a database-sourced id ahead of a batch retry.
    pub fn reset_database_resolution(&mut self) {
        self.resolution.reset_database_resolution();
    }
}

impl PartialEq for ParameterNameValue {
    fn eq(&self, other: &Self) -> bool {
        self.parameter_name == other.parameter_name
    }
}

impl Eq for ParameterNameValue {}

impl PartialOrd for ParameterNameValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ParameterNameValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.parameter_name.cmp(&other.parameter_name)
    }
}

/// A code system URI awaiting its `code_system_id`.
#[derive(Debug, Clone)]
pub struct CodeSystemValue {
    code_system: String,
    resolution: Resolution<i32>,
}

impl CodeSystemValue {
    /// Creates an unresolved value for the given code system.
    pub fn new(code_system: impl Into<String>) -> Self {
        Self {
            code_system: code_system.into(),
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns the code system URI.
    pub fn code_system(&self) -> &str {
        &self.code_system
    }

    /// Returns the surrogate id, if resolved.
    pub fn code_system_id(&self) -> Option<i32> {
        self.resolution.id()
    }

    /// Records an id obtained from a cache tier.
    pub fn set_id_from_cache(&mut self, id: i32) {
        self.resolution = Resolution::FromCache(id);
    }

    /// Records an id obtained from the database in this transaction.
    pub fn set_id_from_database(&mut self, id: i32) {
        self.resolution = Resolution::FromDatabase(id);
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Discards a database-sourced id ahead of a batch retry.
    pub fn reset_database_resolution(&mut self) {
        self.resolution.reset_database_resolution();
    }
}

impl PartialEq for CodeSystemValue {
    fn eq(&self, other: &Self) -> bool {
        self.code_system == other.code_system
    }
}

impl Eq for CodeSystemValue {}

impl PartialOrd for CodeSystemValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CodeSystemValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.code_system.cmp(&other.code_system)
    }
}

/// Unique key for a common token value: `(shard, code_system_id, token_value)`.
///
/// Token values are shared across all resource types - a `(system, code)`
/// pair observed on a Patient and on an Observation maps to the same row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommonTokenValueKey {
    /// Partition discriminator.
    pub shard_key: ShardKey,
    /// Resolved id of the code system the token belongs to.
    pub code_system_id: i32,
    /// The token value text.
    pub token_value: String,
}

impl CommonTokenValueKey {
    /// Creates a key from its parts.
    pub fn new(shard_key: ShardKey, code_system_id: i32, token_value: impl Into<String>) -> Self {
        Self {
            shard_key,
            code_system_id,
            token_value: token_value.into(),
        }
    }
}

/// A `(system, code)` token pair awaiting its `common_token_value_id`.
///
/// The code-system id is itself a dictionary lookup, so a token value is
/// keyed by the system *name* until code systems have been resolved, after
/// which [`CommonTokenValue::key`] yields the database key.
#[derive(Debug, Clone)]
pub struct CommonTokenValue {
    shard_key: ShardKey,
    code_system: String,
    token_value: String,
    code_system_id: Option<i32>,
    resolution: Resolution<i64>,
}

impl CommonTokenValue {
    /// Creates an unresolved token value.
    pub fn new(
        shard_key: ShardKey,
        code_system: impl Into<String>,
        token_value: impl Into<String>,
    ) -> Self {
        Self {
            shard_key,
            code_system: code_system.into(),
            token_value: token_value.into(),
            code_system_id: None,
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns the shard key.
    pub fn shard_key(&self) -> ShardKey {
        self.shard_key
    }

    /// Returns the code system URI.
    pub fn code_system(&self) -> &str {
        &self.code_system
    }

    /// Returns the token value text.
    pub fn token_value(&self) -> &str {
        &self.token_value
    }

    /// Returns the resolved code-system id, if known.
    pub fn code_system_id(&self) -> Option<i32> {
        self.code_system_id
    }

    /// Records the resolved code-system id so the database key can be built.
    pub fn set_code_system_id(&mut self, id: i32) {
        self.code_system_id = Some(id);
    }

    /// Returns the database key, once the code system has been resolved.
    pub fn key(&self) -> Option<CommonTokenValueKey> {
        self.code_system_id.map(|code_system_id| CommonTokenValueKey {
            shard_key: self.shard_key,
            code_system_id,
            token_value: self.token_value.clone(),
        })
    }

    /// Returns the surrogate id, if resolved.
    pub fn common_token_value_id(&self) -> Option<i64> {
        self.resolution.id()
    }

    /// Records an id obtained from a cache tier.
    pub fn set_id_from_cache(&mut self, id: i64) {
        self.resolution = Resolution::FromCache(id);
    }

    /// Records an id obtained from the database in this transaction.
    pub fn set_id_from_database(&mut self, id: i64) {
        self.resolution = Resolution::FromDatabase(id);
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Discards a database-sourced id ahead of a batch retry. The code-system
    /// link is reset alongside it when the code system itself was minted by
    /// the rolled-back attempt; the caller re-propagates system ids after
    /// re-resolution.
    pub fn reset_database_resolution(&mut self) {
        self.resolution.reset_database_resolution();
    }

    /// Clears the propagated code-system id.
    pub fn reset_code_system_id(&mut self) {
        self.code_system_id = None;
    }
}

impl PartialEq for CommonTokenValue {
    fn eq(&self, other: &Self) -> bool {
        self.shard_key == other.shard_key
            && self.code_system == other.code_system
            && self.token_value == other.token_value
    }
}

impl Eq for CommonTokenValue {}

impl PartialOrd for CommonTokenValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommonTokenValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.shard_key
            .cmp(&other.shard_key)
            .then_with(|| self.code_system.cmp(&other.code_system))
            .then_with(|| self.token_value.cmp(&other.token_value))
    }
}

/// Unique key for a canonical value: `(shard, url)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommonCanonicalValueKey {
    /// Partition discriminator.
    pub shard_key: ShardKey,
    /// The canonical URL.
    pub url: String,
}

impl CommonCanonicalValueKey {
    /// Creates a key from its parts.
    pub fn new(shard_key: ShardKey, url: impl Into<String>) -> Self {
        Self {
            shard_key,
            url: url.into(),
        }
    }
}

/// A canonical/profile URL awaiting its `canonical_id`.
#[derive(Debug, Clone)]
pub struct CommonCanonicalValue {
    key: CommonCanonicalValueKey,
    resolution: Resolution<i64>,
}

impl CommonCanonicalValue {
    /// Creates an unresolved canonical value.
    pub fn new(shard_key: ShardKey, url: impl Into<String>) -> Self {
        Self {
            key: CommonCanonicalValueKey::new(shard_key, url),
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns the canonical URL.
    pub fn url(&self) -> &str {
        &self.key.url
    }

    /// Returns the key for this value.
    pub fn key(&self) -> &CommonCanonicalValueKey {
        &self.key
    }

    /// Returns the surrogate id, if resolved.
    pub fn canonical_id(&self) -> Option<i64> {
        self.resolution.id()
    }

    /// Records an id obtained from a cache tier.
    pub fn set_id_from_cache(&mut self, id: i64) {
        self.resolution = Resolution::FromCache(id);
    }

    /// Records an id obtained from the database in this transaction.
    pub fn set_id_from_database(&mut self, id: i64) {
        self.resolution = Resolution::FromDatabase(id);
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Discards a database-sourced id ahead of a batch retry.
    pub fn reset_database_resolution(&mut self) {
        self.resolution.reset_database_resolution();
    }
}

impl PartialEq for CommonCanonicalValue {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CommonCanonicalValue {}

impl PartialOrd for CommonCanonicalValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CommonCanonicalValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

/// Unique key for a logical resource identity: `(resource_type_id, logical_id)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LogicalResourceIdentKey {
    /// Resolved id of the resource type.
    pub resource_type_id: i32,
    /// The resource's logical id.
    pub logical_id: String,
}

impl LogicalResourceIdentKey {
    /// Creates a key from its parts.
    pub fn new(resource_type_id: i32, logical_id: impl Into<String>) -> Self {
        Self {
            resource_type_id,
            logical_id: logical_id.into(),
        }
    }
}

/// The identity of a clinical record awaiting its `logical_resource_id`.
///
/// An identity may be registered before the record itself exists: a
/// reference to `Patient/123` pre-registers that identity even when the
/// Patient has not yet been created. Once minted, the id never changes.
#[derive(Debug, Clone)]
pub struct LogicalResourceIdentValue {
    resource_type: String,
    key: LogicalResourceIdentKey,
    resolution: Resolution<i64>,
}

impl LogicalResourceIdentValue {
    /// Creates an unresolved identity for the given record.
    pub fn new(
        resource_type: impl Into<String>,
        resource_type_id: i32,
        logical_id: impl Into<String>,
    ) -> Self {
        Self {
            resource_type: resource_type.into(),
            key: LogicalResourceIdentKey::new(resource_type_id, logical_id),
            resolution: Resolution::Unresolved,
        }
    }

    /// Returns the resource type name.
    pub fn resource_type(&self) -> &str {
        &self.resource_type
    }

    /// Returns the resource type id.
    pub fn resource_type_id(&self) -> i32 {
        self.key.resource_type_id
    }

    /// Returns the logical id.
    pub fn logical_id(&self) -> &str {
        &self.key.logical_id
    }

    /// Returns the key for this value.
    pub fn key(&self) -> &LogicalResourceIdentKey {
        &self.key
    }

    /// Returns the surrogate id, if resolved.
    pub fn logical_resource_id(&self) -> Option<i64> {
        self.resolution.id()
    }

    /// Records an id obtained from a cache tier.
    pub fn set_id_from_cache(&mut self, id: i64) {
        self.resolution = Resolution::FromCache(id);
    }

    /// Records an id obtained from the database in this transaction.
    pub fn set_id_from_database(&mut self, id: i64) {
        self.resolution = Resolution::FromDatabase(id);
    }

    /// Returns `true` once a surrogate id has been assigned.
    pub fn is_resolved(&self) -> bool {
        self.resolution.is_resolved()
    }

    /// Discards a database-sourced id ahead of a batch retry.
    pub fn reset_database_resolution(&mut self) {
        self.resolution.reset_database_resolution();
    }
}

impl PartialEq for LogicalResourceIdentValue {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for LogicalResourceIdentValue {}

impl PartialOrd for LogicalResourceIdentValue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for LogicalResourceIdentValue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolution_provenance() {
        let mut value = CodeSystemValue::new("http://loinc.org");
        assert!(!value.is_resolved());

        value.set_id_from_database(7);
        assert_eq!(value.code_system_id(), Some(7));

        // A batch retry discards ids minted by the failed attempt
        value.reset_database_resolution();
        assert!(!value.is_resolved());

        // but keeps ids that came from the shared cache
        value.set_id_from_cache(7);
        value.reset_database_resolution();
        assert_eq!(value.code_system_id(), Some(7));
    }

    #[test]
    fn test_natural_key_ordering() {
        let mut values = vec![
            CodeSystemValue::new("http://snomed.info/sct"),
            CodeSystemValue::new("http://loinc.org"),
        ];
        values.sort();
        assert_eq!(values[0].code_system(), "http://loinc.org");
    }

    #[test]
    fn test_token_value_key_requires_code_system() {
        let mut token = CommonTokenValue::new(ShardKey::FIXED, "http://loinc.org", "1234-5");
        assert!(token.key().is_none());

        token.set_code_system_id(3);
        let key = token.key().unwrap();
        assert_eq!(key.code_system_id, 3);
        assert_eq!(key.token_value, "1234-5");
    }

    #[test]
    fn test_token_value_ordering_is_shard_system_token() {
        let a = CommonTokenValue::new(ShardKey::FIXED, "http://loinc.org", "b");
        let b = CommonTokenValue::new(ShardKey::FIXED, "http://loinc.org", "a");
        let c = CommonTokenValue::new(ShardKey::new(1), "http://loinc.org", "a");
        let mut values = vec![c.clone(), a.clone(), b.clone()];
        values.sort();
        assert_eq!(values, vec![b, a, c]);
    }

    #[test]
    fn test_logical_resource_ident_equality_on_key() {
        let mut a = LogicalResourceIdentValue::new("Patient", 1, "p1");
        let b = LogicalResourceIdentValue::new("Patient", 1, "p1");
        a.set_id_from_database(99);
        // resolution state does not affect identity
        assert_eq!(a, b);
    }
}
