//! Per-transaction parameter value collection.
//!
//! The collector buffers every search-parameter value extracted from the
//! records of one ingestion transaction instead of resolving and inserting
//! per record. Resolving a dictionary id costs either a cache hit or a
//! database round trip, and per-record statements multiply round trips and
//! lengthen the window in which row locks are held - both are what the
//! batch exists to avoid.
//!
//! Alongside the buffered values, the collector tracks the *distinct* set of
//! dictionary keys they reference, probing the identity cache the first time
//! each key is seen. Whatever is still unresolved at publish time goes to
//! the batch processor in one select-or-insert sweep per kind.

use std::collections::HashMap;

use tracing::{debug, trace};

use crate::cache::ParameterIdentityCache;
use crate::error::{IntegrityError, PersistenceResult};
use crate::params::parameter::{
    DateParameter, LocationParameter, NumberParameter, ParameterRow, ProfileParameter,
    QuantityParameter, ReferenceParameter, RowCommon, SecurityParameter, StringParameter,
    TagParameter, TokenParameter,
};
use crate::params::processor::ParamValueProcessor;
use crate::params::values::{
    CodeSystemValue, CommonCanonicalValue, CommonCanonicalValueKey, CommonTokenValue,
    LogicalResourceIdentKey, LogicalResourceIdentValue, ParameterNameValue,
};
use crate::tenant::{RequestContext, ShardKey};

/// Identity of the record a buffered value belongs to.
#[derive(Debug, Clone, PartialEq)]
pub struct RowContext {
    /// Partition discriminator for the owning request.
    pub shard_key: ShardKey,
    /// The record's resource type.
    pub resource_type: String,
    /// The record's logical id.
    pub logical_id: String,
    /// The record's logical resource id (already minted by the caller).
    pub logical_resource_id: i64,
}

impl RowContext {
    fn new(ctx: &RequestContext, resource_type: &str, logical_id: &str, logical_resource_id: i64) -> Self {
        Self {
            shard_key: ctx.shard_key(),
            resource_type: resource_type.to_string(),
            logical_id: logical_id.to_string(),
            logical_resource_id,
        }
    }
}

/// A buffered parameter value awaiting dictionary resolution.
#[derive(Debug, Clone)]
enum PendingValue {
    String(RowContext, StringParameter),
    Number(RowContext, NumberParameter),
    Date(RowContext, DateParameter),
    Token(RowContext, TokenParameter),
    Tag(RowContext, TagParameter),
    Security(RowContext, SecurityParameter),
    Profile(RowContext, ProfileParameter),
    Quantity(RowContext, QuantityParameter),
    Location(RowContext, LocationParameter),
    /// Carries the resolved target resource-type id so the row build can
    /// address the ident map directly.
    Reference(RowContext, ReferenceParameter, i32),
}

/// In-memory key for a token value before its code system is resolved.
type TokenLookupKey = (ShardKey, String, String);

/// Buffers parameter values and their distinct dictionary keys for one
/// transaction.
///
/// Owned exclusively by the thread driving the transaction; no locking.
#[derive(Default)]
pub struct ParamValueCollector {
    parameter_names: HashMap<String, ParameterNameValue>,
    code_systems: HashMap<String, CodeSystemValue>,
    common_token_values: HashMap<TokenLookupKey, CommonTokenValue>,
    canonical_values: HashMap<CommonCanonicalValueKey, CommonCanonicalValue>,
    logical_resource_idents: HashMap<LogicalResourceIdentKey, LogicalResourceIdentValue>,
    pending: Vec<PendingValue>,
}

impl ParamValueCollector {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buffered parameter values.
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Number of distinct token values referenced by the buffered batch.
    pub fn distinct_token_values(&self) -> usize {
        self.common_token_values.len()
    }

    /// Clears all buffered state.
    ///
    /// Must be called if the surrounding transaction is rolled back, so a
    /// retried transaction does not double-publish.
    pub fn reset(&mut self) {
        self.parameter_names.clear();
        self.code_systems.clear();
        self.common_token_values.clear();
        self.canonical_values.clear();
        self.logical_resource_idents.clear();
        self.pending.clear();
    }

    /// Collects a string parameter value.
    pub fn collect_string<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: StringParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.pending.push(PendingValue::String(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a number parameter value.
    pub fn collect_number<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: NumberParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.pending.push(PendingValue::Number(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a date parameter value.
    pub fn collect_date<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: DateParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.pending.push(PendingValue::Date(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a token parameter value, registering its `(system, code)`
    /// pair in the token dictionary working set.
    pub fn collect_token<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: TokenParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.ensure_code_system(&value.system, cache);
        self.ensure_token_value(ctx.shard_key(), &value.system, &value.code, cache);
        self.pending.push(PendingValue::Token(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a `_tag` parameter value.
    pub fn collect_tag<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: TagParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.ensure_code_system(&value.system, cache);
        self.ensure_token_value(ctx.shard_key(), &value.system, &value.code, cache);
        self.pending.push(PendingValue::Tag(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a `_security` parameter value.
    pub fn collect_security<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: SecurityParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.ensure_code_system(&value.system, cache);
        self.ensure_token_value(ctx.shard_key(), &value.system, &value.code, cache);
        self.pending.push(PendingValue::Security(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a `_profile` (canonical) parameter value.
    pub fn collect_profile<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: ProfileParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.ensure_canonical_value(ctx.shard_key(), &value.url, cache);
        self.pending.push(PendingValue::Profile(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a quantity parameter value. The unit code system, when
    /// present, participates in code-system resolution.
    pub fn collect_quantity<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: QuantityParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        if let Some(system) = &value.system {
            self.ensure_code_system(system, cache);
        }
        self.pending.push(PendingValue::Quantity(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a location parameter value.
    pub fn collect_location<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: LocationParameter,
    ) {
        self.ensure_parameter_name(&value.name, cache);
        self.pending.push(PendingValue::Location(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
        ));
    }

    /// Collects a reference parameter value, pre-registering the referenced
    /// record's identity in the logical-resource-ident working set.
    ///
    /// Fails with an integrity error if the referenced resource type is not
    /// in the resource-type dictionary.
    pub fn collect_reference<C: ParameterIdentityCache>(
        &mut self,
        ctx: &RequestContext,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        cache: &C,
        value: ReferenceParameter,
    ) -> PersistenceResult<()> {
        self.ensure_parameter_name(&value.name, cache);
        let target_resource_type_id = self.ensure_logical_resource_ident(
            &value.target_resource_type,
            &value.target_logical_id,
            cache,
        )?;
        self.pending.push(PendingValue::Reference(
            RowContext::new(ctx, resource_type, logical_id, logical_resource_id),
            value,
            target_resource_type_id,
        ));
        Ok(())
    }

    /// Resolves every distinct dictionary key referenced by the buffered
    /// values, then publishes the fully-keyed parameter rows to the
    /// processor and pushes the batch.
    ///
    /// Resolution order matters: logical resource identities, parameter
    /// names and code systems first, then token values (whose keys need
    /// code-system ids) and canonical values. Rows are only built once every
    /// id they reference is resolved.
    pub async fn publish<P, C>(&mut self, processor: &mut P, cache: &C) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        debug!(
            pending = self.pending.len(),
            token_values = self.common_token_values.len(),
            "publishing buffered parameter values"
        );

        self.resolve_logical_resource_idents(processor, cache).await?;
        self.resolve_parameter_names(processor, cache).await?;
        self.resolve_code_systems(processor, cache).await?;
        self.propagate_code_system_ids()?;
        self.resolve_common_token_values(processor, cache).await?;
        self.resolve_canonical_values(processor, cache).await?;

        for pending in &self.pending {
            let row = self.build_row(pending)?;
            processor.publish(row)?;
        }
        processor.push_batch().await
    }

    /// Promotes every id resolved during this transaction into the given
    /// cache's request-local tier.
    ///
    /// Call only after the transaction has durably committed; the caller
    /// then promotes the local tier to the shared cache.
    pub fn publish_values_to_cache<C: ParameterIdentityCache>(&self, cache: &C) {
        for value in self.parameter_names.values() {
            if let Some(id) = value.parameter_name_id() {
                cache.add_parameter_name(value.parameter_name(), id);
            }
        }
        for value in self.code_systems.values() {
            if let Some(id) = value.code_system_id() {
                cache.add_code_system(value.code_system(), id);
            }
        }
        for value in self.common_token_values.values() {
            if let (Some(key), Some(id)) = (value.key(), value.common_token_value_id()) {
                cache.add_common_token_value(key, id);
            }
        }
        for value in self.canonical_values.values() {
            if let Some(id) = value.canonical_id() {
                cache.add_canonical_value(value.key().clone(), id);
            }
        }
        for value in self.logical_resource_idents.values() {
            if let Some(id) = value.logical_resource_id() {
                cache.add_logical_resource_ident(value.key().clone(), id);
            }
        }
    }

    /// Discards every id resolved from the database during the current
    /// (failed) attempt, keeping cache-sourced ids.
    ///
    /// The failed attempt's inserts may have been rolled back with the
    /// transaction, so none of them can be assumed durable. Buffered values
    /// are kept; the next [`publish`](Self::publish) resolves from scratch.
    pub fn invalidate_database_resolutions(&mut self) {
        for value in self.parameter_names.values_mut() {
            value.reset_database_resolution();
        }
        for value in self.code_systems.values_mut() {
            value.reset_database_resolution();
        }
        for value in self.common_token_values.values_mut() {
            value.reset_database_resolution();
            // re-propagated from the code-system map on the next publish
            value.reset_code_system_id();
        }
        for value in self.canonical_values.values_mut() {
            value.reset_database_resolution();
        }
        for value in self.logical_resource_idents.values_mut() {
            value.reset_database_resolution();
        }
    }

    fn ensure_parameter_name<C: ParameterIdentityCache>(&mut self, name: &str, cache: &C) {
        if !self.parameter_names.contains_key(name) {
            let mut value = ParameterNameValue::new(name);
            if let Some(id) = cache.get_parameter_name_id(name) {
                value.set_id_from_cache(id);
            }
            trace!(parameter_name = name, resolved = value.is_resolved(), "registered parameter name");
            self.parameter_names.insert(name.to_string(), value);
        }
    }

    fn ensure_code_system<C: ParameterIdentityCache>(&mut self, system: &str, cache: &C) {
        if !self.code_systems.contains_key(system) {
            let mut value = CodeSystemValue::new(system);
            if let Some(id) = cache.get_code_system_id(system) {
                value.set_id_from_cache(id);
            }
            self.code_systems.insert(system.to_string(), value);
        }
    }

    fn ensure_token_value<C: ParameterIdentityCache>(
        &mut self,
        shard_key: ShardKey,
        system: &str,
        code: &str,
        cache: &C,
    ) {
        let lookup = (shard_key, system.to_string(), code.to_string());
        if !self.common_token_values.contains_key(&lookup) {
            let mut value = CommonTokenValue::new(shard_key, system, code);
            // The token cache key needs the code-system id; only a system
            // already resolved lets us probe the token tier here.
            if let Some(system_id) = self
                .code_systems
                .get(system)
                .and_then(CodeSystemValue::code_system_id)
            {
                value.set_code_system_id(system_id);
                if let Some(key) = value.key() {
                    if let Some(id) = cache.get_common_token_value_id(&key) {
                        value.set_id_from_cache(id);
                    }
                }
            }
            self.common_token_values.insert(lookup, value);
        }
    }

    fn ensure_canonical_value<C: ParameterIdentityCache>(
        &mut self,
        shard_key: ShardKey,
        url: &str,
        cache: &C,
    ) {
        let key = CommonCanonicalValueKey::new(shard_key, url);
        if !self.canonical_values.contains_key(&key) {
            let mut value = CommonCanonicalValue::new(shard_key, url);
            if let Some(id) = cache.get_canonical_id(&key) {
                value.set_id_from_cache(id);
            }
            self.canonical_values.insert(key, value);
        }
    }

    fn ensure_logical_resource_ident<C: ParameterIdentityCache>(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        cache: &C,
    ) -> PersistenceResult<i32> {
        let resource_type_id = cache.get_resource_type_id(resource_type).ok_or_else(|| {
            IntegrityError::UnknownResourceType {
                resource_type: resource_type.to_string(),
            }
        })?;
        let key = LogicalResourceIdentKey::new(resource_type_id, logical_id);
        if !self.logical_resource_idents.contains_key(&key) {
            let mut value =
                LogicalResourceIdentValue::new(resource_type, resource_type_id, logical_id);
            if let Some(id) = cache.get_logical_resource_id(&key) {
                value.set_id_from_cache(id);
            }
            self.logical_resource_idents.insert(key, value);
        }
        Ok(resource_type_id)
    }

    async fn resolve_logical_resource_idents<P, C>(
        &mut self,
        processor: &mut P,
        cache: &C,
    ) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        // second cache sweep: another transaction may have committed these
        // keys since collect time
        let miss_keys: Vec<_> = self
            .logical_resource_idents
            .values()
            .filter(|v| !v.is_resolved())
            .map(|v| v.key().clone())
            .collect();
        if miss_keys.is_empty() {
            return Ok(());
        }
        let swept = cache.resolve_logical_resource_ids(&miss_keys);
        for (key, id) in &swept.resolved {
            if let Some(value) = self.logical_resource_idents.get_mut(key) {
                value.set_id_from_cache(*id);
            }
        }

        let mut unresolved: Vec<_> = swept
            .misses
            .iter()
            .filter_map(|key| self.logical_resource_idents.get(key).cloned())
            .collect();
        if !unresolved.is_empty() {
            processor.resolve_logical_resource_idents(&mut unresolved).await?;
            for value in unresolved {
                self.logical_resource_idents.insert(value.key().clone(), value);
            }
        }
        Ok(())
    }

    async fn resolve_parameter_names<P, C>(
        &mut self,
        processor: &mut P,
        cache: &C,
    ) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        let miss_keys: Vec<_> = self
            .parameter_names
            .values()
            .filter(|v| !v.is_resolved())
            .map(|v| v.parameter_name().to_string())
            .collect();
        if miss_keys.is_empty() {
            return Ok(());
        }
        let swept = cache.resolve_parameter_name_ids(&miss_keys);
        for (name, id) in &swept.resolved {
            if let Some(value) = self.parameter_names.get_mut(name) {
                value.set_id_from_cache(*id);
            }
        }

        let mut unresolved: Vec<_> = swept
            .misses
            .iter()
            .filter_map(|name| self.parameter_names.get(name).cloned())
            .collect();
        if !unresolved.is_empty() {
            processor.resolve_parameter_names(&mut unresolved).await?;
            for value in unresolved {
                self.parameter_names
                    .insert(value.parameter_name().to_string(), value);
            }
        }
        Ok(())
    }

    async fn resolve_code_systems<P, C>(
        &mut self,
        processor: &mut P,
        cache: &C,
    ) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        let miss_keys: Vec<_> = self
            .code_systems
            .values()
            .filter(|v| !v.is_resolved())
            .map(|v| v.code_system().to_string())
            .collect();
        if miss_keys.is_empty() {
            return Ok(());
        }
        let swept = cache.resolve_code_system_ids(&miss_keys);
        for (system, id) in &swept.resolved {
            if let Some(value) = self.code_systems.get_mut(system) {
                value.set_id_from_cache(*id);
            }
        }

        let mut unresolved: Vec<_> = swept
            .misses
            .iter()
            .filter_map(|system| self.code_systems.get(system).cloned())
            .collect();
        if !unresolved.is_empty() {
            processor.resolve_system_values(&mut unresolved).await?;
            for value in unresolved {
                self.code_systems.insert(value.code_system().to_string(), value);
            }
        }
        Ok(())
    }

    /// Copies resolved code-system ids into the token values that reference
    /// them, making their database keys buildable.
    fn propagate_code_system_ids(&mut self) -> PersistenceResult<()> {
        for value in self.common_token_values.values_mut() {
            if value.code_system_id().is_none() {
                let system_id = self
                    .code_systems
                    .get(value.code_system())
                    .and_then(CodeSystemValue::code_system_id)
                    .ok_or_else(|| IntegrityError::UnresolvedCodeSystem {
                        code_system: value.code_system().to_string(),
                    })?;
                value.set_code_system_id(system_id);
            }
        }
        Ok(())
    }

    async fn resolve_common_token_values<P, C>(
        &mut self,
        processor: &mut P,
        cache: &C,
    ) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        let miss_keys: Vec<_> = self
            .common_token_values
            .values()
            .filter(|v| !v.is_resolved())
            .filter_map(CommonTokenValue::key)
            .collect();
        if miss_keys.is_empty() {
            return Ok(());
        }
        let swept = cache.resolve_common_token_value_ids(&miss_keys);

        let mut unresolved = Vec::new();
        for value in self.common_token_values.values_mut() {
            if value.is_resolved() {
                continue;
            }
            match value.key().and_then(|key| swept.resolved.get(&key).copied()) {
                Some(id) => value.set_id_from_cache(id),
                None => unresolved.push(value.clone()),
            }
        }
        if !unresolved.is_empty() {
            processor.resolve_common_token_values(&mut unresolved).await?;
            for value in unresolved {
                let lookup = (
                    value.shard_key(),
                    value.code_system().to_string(),
                    value.token_value().to_string(),
                );
                self.common_token_values.insert(lookup, value);
            }
        }
        Ok(())
    }

    async fn resolve_canonical_values<P, C>(
        &mut self,
        processor: &mut P,
        cache: &C,
    ) -> PersistenceResult<()>
    where
        P: ParamValueProcessor,
        C: ParameterIdentityCache,
    {
        let miss_keys: Vec<_> = self
            .canonical_values
            .values()
            .filter(|v| !v.is_resolved())
            .map(|v| v.key().clone())
            .collect();
        if miss_keys.is_empty() {
            return Ok(());
        }
        let swept = cache.resolve_canonical_ids(&miss_keys);
        for (key, id) in &swept.resolved {
            if let Some(value) = self.canonical_values.get_mut(key) {
                value.set_id_from_cache(*id);
            }
        }

        let mut unresolved: Vec<_> = swept
            .misses
            .iter()
            .filter_map(|key| self.canonical_values.get(key).cloned())
            .collect();
        if !unresolved.is_empty() {
            processor.resolve_canonical_values(&mut unresolved).await?;
            for value in unresolved {
                self.canonical_values.insert(value.key().clone(), value);
            }
        }
        Ok(())
    }

    fn parameter_name_id(&self, name: &str) -> PersistenceResult<i32> {
        self.parameter_names
            .get(name)
            .and_then(ParameterNameValue::parameter_name_id)
            .ok_or_else(|| {
                IntegrityError::UnresolvedParameterName {
                    parameter_name: name.to_string(),
                }
                .into()
            })
    }

    fn token_value_id(&self, shard_key: ShardKey, system: &str, code: &str) -> PersistenceResult<i64> {
        let lookup = (shard_key, system.to_string(), code.to_string());
        self.common_token_values
            .get(&lookup)
            .and_then(CommonTokenValue::common_token_value_id)
            .ok_or_else(|| {
                IntegrityError::UnresolvedTokenValue {
                    token_value: format!("{system}|{code}"),
                }
                .into()
            })
    }

    fn common(&self, row: &RowContext, name: &str, composite_id: Option<i32>) -> PersistenceResult<RowCommon> {
        Ok(RowCommon {
            shard_key: row.shard_key,
            resource_type: row.resource_type.clone(),
            logical_resource_id: row.logical_resource_id,
            parameter_name_id: self.parameter_name_id(name)?,
            composite_id,
        })
    }

    fn build_row(&self, pending: &PendingValue) -> PersistenceResult<ParameterRow> {
        let row = match pending {
            PendingValue::String(row, p) => ParameterRow::String {
                common: self.common(row, &p.name, p.composite_id)?,
                value: p.value.clone(),
            },
            PendingValue::Number(row, p) => ParameterRow::Number {
                common: self.common(row, &p.name, p.composite_id)?,
                value: p.value,
                low: p.low,
                high: p.high,
            },
            PendingValue::Date(row, p) => ParameterRow::Date {
                common: self.common(row, &p.name, p.composite_id)?,
                start: p.start,
                end: p.end,
            },
            PendingValue::Token(row, p) => ParameterRow::Token {
                common: self.common(row, &p.name, p.composite_id)?,
                common_token_value_id: self.token_value_id(row.shard_key, &p.system, &p.code)?,
            },
            PendingValue::Tag(row, p) => ParameterRow::Tag {
                common: self.common(row, &p.name, None)?,
                common_token_value_id: self.token_value_id(row.shard_key, &p.system, &p.code)?,
            },
            PendingValue::Security(row, p) => ParameterRow::Security {
                common: self.common(row, &p.name, None)?,
                common_token_value_id: self.token_value_id(row.shard_key, &p.system, &p.code)?,
            },
            PendingValue::Profile(row, p) => {
                let key = CommonCanonicalValueKey::new(row.shard_key, &p.url);
                let canonical_id = self
                    .canonical_values
                    .get(&key)
                    .and_then(CommonCanonicalValue::canonical_id)
                    .ok_or_else(|| IntegrityError::UnresolvedCanonicalValue {
                        url: p.url.clone(),
                    })?;
                ParameterRow::Profile {
                    common: self.common(row, &p.name, None)?,
                    canonical_id,
                    version: p.version.clone(),
                    fragment: p.fragment.clone(),
                }
            }
            PendingValue::Quantity(row, p) => {
                let code_system_id = match &p.system {
                    Some(system) => Some(
                        self.code_systems
                            .get(system)
                            .and_then(CodeSystemValue::code_system_id)
                            .ok_or_else(|| IntegrityError::UnresolvedCodeSystem {
                                code_system: system.clone(),
                            })?,
                    ),
                    None => None,
                };
                ParameterRow::Quantity {
                    common: self.common(row, &p.name, p.composite_id)?,
                    code_system_id,
                    code: p.code.clone(),
                    value: p.value,
                    low: p.low,
                    high: p.high,
                }
            }
            PendingValue::Location(row, p) => ParameterRow::Location {
                common: self.common(row, &p.name, p.composite_id)?,
                latitude: p.latitude,
                longitude: p.longitude,
            },
            PendingValue::Reference(row, p, target_resource_type_id) => {
                let key =
                    LogicalResourceIdentKey::new(*target_resource_type_id, &p.target_logical_id);
                let ident = self
                    .logical_resource_idents
                    .get(&key)
                    .and_then(LogicalResourceIdentValue::logical_resource_id)
                    .ok_or_else(|| IntegrityError::UnresolvedLogicalResourceIdent {
                        resource_type_id: *target_resource_type_id,
                        logical_id: p.target_logical_id.clone(),
                    })?;
                ParameterRow::Reference {
                    common: self.common(row, &p.name, p.composite_id)?,
                    ref_logical_resource_id: ident,
                    ref_version_id: p.version,
                }
            }
        };
        Ok(row)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::cache::{SharedIdentityCache, TransactionCache};
    use crate::config::CacheConfig;
    use crate::tenant::{DatastoreId, TenantId};

    fn request_context() -> RequestContext {
        RequestContext::new(TenantId::new("acme"), DatastoreId::default_store())
    }

    fn tx_cache() -> TransactionCache {
        let shared = Arc::new(SharedIdentityCache::new(&CacheConfig::default()));
        shared.prime_resource_types(vec![("Patient".to_string(), 1)]);
        TransactionCache::new(shared)
    }

    #[test]
    fn test_distinct_keys_tracked_once() {
        let ctx = request_context();
        let cache = tx_cache();
        let mut collector = ParamValueCollector::new();

        for i in 0..5 {
            collector.collect_token(
                &ctx,
                "Patient",
                &format!("p{i}"),
                1000 + i,
                &cache,
                TokenParameter::new("identifier", "http://example.org/mrn", "dup"),
            );
        }
        assert_eq!(collector.pending_len(), 5);
        assert_eq!(collector.distinct_token_values(), 1);

        collector.reset();
        assert_eq!(collector.pending_len(), 0);
        assert_eq!(collector.distinct_token_values(), 0);
    }

    #[test]
    fn test_collect_probes_cache() {
        let ctx = request_context();
        let cache = tx_cache();
        cache.add_parameter_name("family", 7);

        let mut collector = ParamValueCollector::new();
        collector.collect_string(
            &ctx,
            "Patient",
            "p1",
            1001,
            &cache,
            StringParameter::new("family", "Smith"),
        );

        // a cache hit at collect time survives a retry invalidation
        collector.invalidate_database_resolutions();
        let value = collector.parameter_names.get("family").unwrap();
        assert_eq!(value.parameter_name_id(), Some(7));
    }

    #[test]
    fn test_unknown_reference_target_type_is_fatal() {
        let ctx = request_context();
        let cache = tx_cache();
        let mut collector = ParamValueCollector::new();

        let err = collector
            .collect_reference(
                &ctx,
                "Observation",
                "o1",
                2001,
                &cache,
                ReferenceParameter::new("subject", "Device", "d1"),
            )
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::PersistenceError::Integrity(IntegrityError::UnknownResourceType { .. })
        ));
    }
}
