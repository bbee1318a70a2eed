//! Batch dictionary resolution and parameter-row insertion.
//!
//! For each distinct dictionary kind the processor runs one select-or-insert
//! sweep: fetch the ids that exist, insert the ones that do not, fetch
//! again. Keys are sorted lexically before every statement so that
//! concurrent transactions touching overlapping keys acquire row and gap
//! locks in the same order - a liveness measure against deadlocks, not a
//! correctness requirement. A key still unresolved after its insert has run
//! is a fatal integrity error: the insert must have either found an existing
//! row or created one.
//!
//! On a deadlock or lock timeout the enclosing unit of work rolls back and
//! calls [`ParamValueProcessor::reset_batch`]; nothing from the failed
//! attempt is assumed durable.

use std::collections::HashMap;

use async_trait::async_trait;
use tracing::{debug, trace};

use crate::config::BatchConfig;
use crate::db::ParamValueStore;
use crate::error::{IntegrityError, PersistenceResult};
use crate::params::parameter::ParameterRow;
use crate::params::values::{
    CodeSystemValue, CommonCanonicalValue, CommonTokenValue, LogicalResourceIdentValue,
    ParameterNameValue,
};

/// The batch resolver/processor contract.
///
/// The collector drives one instance per unit of work: `start_batch`, the
/// per-kind `resolve_*` calls, `publish` for every fully-keyed row, then
/// `push_batch`. `reset_batch` discards in-memory state so a rolled-back
/// transaction can retry the whole batch from scratch.
#[async_trait]
pub trait ParamValueProcessor: Send {
    /// Begins a new batch with a clean slate.
    fn start_batch(&mut self);

    /// Resolves ids for the given logical resource identities, in place.
    async fn resolve_logical_resource_idents(
        &mut self,
        unresolved: &mut [LogicalResourceIdentValue],
    ) -> PersistenceResult<()>;

    /// Resolves ids for the given parameter names, in place.
    async fn resolve_parameter_names(
        &mut self,
        unresolved: &mut [ParameterNameValue],
    ) -> PersistenceResult<()>;

    /// Resolves ids for the given code systems, in place.
    async fn resolve_system_values(
        &mut self,
        unresolved: &mut [CodeSystemValue],
    ) -> PersistenceResult<()>;

    /// Resolves ids for the given common token values, in place. Every value
    /// must already carry its code-system id.
    async fn resolve_common_token_values(
        &mut self,
        unresolved: &mut [CommonTokenValue],
    ) -> PersistenceResult<()>;

    /// Resolves ids for the given canonical values, in place.
    async fn resolve_canonical_values(
        &mut self,
        unresolved: &mut [CommonCanonicalValue],
    ) -> PersistenceResult<()>;

    /// Buffers one fully-keyed parameter row for the batch insert.
    fn publish(&mut self, row: ParameterRow) -> PersistenceResult<()>;

    /// Executes the batch insert for all buffered rows.
    async fn push_batch(&mut self) -> PersistenceResult<()>;

    /// Discards all in-memory batch state after a rollback, ahead of a
    /// retry.
    fn reset_batch(&mut self);

    /// Releases any resources held by the processor.
    fn close(&mut self);
}

/// Store-backed processor implementation.
pub struct PlainParamValueProcessor<S> {
    store: S,
    config: BatchConfig,
    rows: Vec<ParameterRow>,
}

impl<S: ParamValueStore> PlainParamValueProcessor<S> {
    /// Creates a processor over the given store.
    pub fn new(store: S, config: BatchConfig) -> Self {
        Self {
            store,
            config,
            rows: Vec::new(),
        }
    }

    /// Returns the number of rows buffered for the next push.
    pub fn buffered_rows(&self) -> usize {
        self.rows.len()
    }
}

#[async_trait]
impl<S: ParamValueStore> ParamValueProcessor for PlainParamValueProcessor<S> {
    fn start_batch(&mut self) {
        self.rows.clear();
    }

    async fn resolve_logical_resource_idents(
        &mut self,
        unresolved: &mut [LogicalResourceIdentValue],
    ) -> PersistenceResult<()> {
        // sort first to avoid deadlocks with concurrent resolvers
        unresolved.sort();
        debug!(count = unresolved.len(), "resolving logical resource idents");

        let index: HashMap<_, usize> = unresolved
            .iter()
            .enumerate()
            .map(|(i, v)| (v.key().clone(), i))
            .collect();

        let chunk_size = self.config.max_logical_resources_per_statement;
        let keys: Vec<_> = unresolved.iter().map(|v| v.key().clone()).collect();
        for chunk in keys.chunks(chunk_size) {
            for (key, id) in self.store.fetch_logical_resource_ident_ids(chunk).await? {
                match index.get(&key) {
                    Some(&i) => unresolved[i].set_id_from_cache(id),
                    None => {
                        return Err(IntegrityError::UnexpectedResolutionRow {
                            message: format!("logical_resource_ident {key:?}"),
                        }
                        .into())
                    }
                }
            }
        }

        // whatever is still unresolved does not exist yet; insert in sorted
        // order, then read the ids back
        let missing: Vec<_> = unresolved
            .iter()
            .filter(|v| !v.is_resolved())
            .map(|v| v.key().clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for chunk in missing.chunks(chunk_size) {
            if let Err(e) = self.store.insert_logical_resource_idents(chunk).await {
                if !e.is_duplicate_key() {
                    return Err(e.into());
                }
                // a concurrent transaction won the race; the re-fetch below
                // picks up its id
            }
        }
        for chunk in missing.chunks(chunk_size) {
            for (key, id) in self.store.fetch_logical_resource_ident_ids(chunk).await? {
                if let Some(&i) = index.get(&key) {
                    unresolved[i].set_id_from_database(id);
                }
            }
        }

        if let Some(bad) = unresolved.iter().find(|v| !v.is_resolved()) {
            return Err(IntegrityError::UnresolvedLogicalResourceIdent {
                resource_type_id: bad.resource_type_id(),
                logical_id: bad.logical_id().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn resolve_parameter_names(
        &mut self,
        unresolved: &mut [ParameterNameValue],
    ) -> PersistenceResult<()> {
        // Parameter names have a very high cache hit rate, so we keep this
        // simple and go one-by-one. Sorted order still matters: several
        // threads may be creating names at the same time.
        unresolved.sort();
        for value in unresolved.iter_mut() {
            trace!(parameter_name = value.parameter_name(), "fetching parameter_name_id");
            match self.store.fetch_parameter_name_id(value.parameter_name()).await? {
                Some(id) => value.set_id_from_cache(id),
                None => {
                    let id = self.store.create_parameter_name(value.parameter_name()).await?;
                    value.set_id_from_database(id);
                }
            }
        }
        Ok(())
    }

    async fn resolve_system_values(
        &mut self,
        unresolved: &mut [CodeSystemValue],
    ) -> PersistenceResult<()> {
        unresolved.sort();
        debug!(count = unresolved.len(), "resolving code systems");

        let index: HashMap<_, usize> = unresolved
            .iter()
            .enumerate()
            .map(|(i, v)| (v.code_system().to_string(), i))
            .collect();

        let chunk_size = self.config.max_code_systems_per_statement;
        let keys: Vec<_> = unresolved
            .iter()
            .map(|v| v.code_system().to_string())
            .collect();
        for chunk in keys.chunks(chunk_size) {
            for (system, id) in self.store.fetch_code_system_ids(chunk).await? {
                match index.get(&system) {
                    Some(&i) => unresolved[i].set_id_from_cache(id),
                    None => {
                        return Err(IntegrityError::UnexpectedResolutionRow {
                            message: format!("code_system '{system}'"),
                        }
                        .into())
                    }
                }
            }
        }

        let missing: Vec<_> = unresolved
            .iter()
            .filter(|v| !v.is_resolved())
            .map(|v| v.code_system().to_string())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for chunk in missing.chunks(chunk_size) {
            if let Err(e) = self.store.insert_code_systems(chunk).await {
                if !e.is_duplicate_key() {
                    return Err(e.into());
                }
            }
        }
        for chunk in missing.chunks(chunk_size) {
            for (system, id) in self.store.fetch_code_system_ids(chunk).await? {
                if let Some(&i) = index.get(&system) {
                    unresolved[i].set_id_from_database(id);
                }
            }
        }

        if let Some(bad) = unresolved.iter().find(|v| !v.is_resolved()) {
            return Err(IntegrityError::UnresolvedCodeSystem {
                code_system: bad.code_system().to_string(),
            }
            .into());
        }
        Ok(())
    }

    async fn resolve_common_token_values(
        &mut self,
        unresolved: &mut [CommonTokenValue],
    ) -> PersistenceResult<()> {
        unresolved.sort();
        debug!(count = unresolved.len(), "resolving common token values");

        let mut index = HashMap::with_capacity(unresolved.len());
        for (i, value) in unresolved.iter().enumerate() {
            let key = value.key().ok_or_else(|| IntegrityError::UnresolvedCodeSystem {
                code_system: value.code_system().to_string(),
            })?;
            index.insert(key, i);
        }

        let chunk_size = self.config.max_common_token_values_per_statement;
        // statement order must be deterministic even though the index map
        // iterates arbitrarily
        let mut keys: Vec<_> = index.keys().cloned().collect();
        keys.sort();
        for chunk in keys.chunks(chunk_size) {
            for (key, id) in self.store.fetch_common_token_value_ids(chunk).await? {
                match index.get(&key) {
                    Some(&i) => unresolved[i].set_id_from_cache(id),
                    None => {
                        return Err(IntegrityError::UnexpectedResolutionRow {
                            message: format!("common_token_value {key:?}"),
                        }
                        .into())
                    }
                }
            }
        }

        let mut missing: Vec<_> = unresolved
            .iter()
            .filter(|v| !v.is_resolved())
            .filter_map(CommonTokenValue::key)
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        missing.sort();
        for chunk in missing.chunks(chunk_size) {
            if let Err(e) = self.store.insert_common_token_values(chunk).await {
                if !e.is_duplicate_key() {
                    return Err(e.into());
                }
            }
        }
        for chunk in missing.chunks(chunk_size) {
            for (key, id) in self.store.fetch_common_token_value_ids(chunk).await? {
                if let Some(&i) = index.get(&key) {
                    unresolved[i].set_id_from_database(id);
                }
            }
        }

        if let Some(bad) = unresolved.iter().find(|v| !v.is_resolved()) {
            return Err(IntegrityError::UnresolvedTokenValue {
                token_value: format!("{}|{}", bad.code_system(), bad.token_value()),
            }
            .into());
        }
        Ok(())
    }

    async fn resolve_canonical_values(
        &mut self,
        unresolved: &mut [CommonCanonicalValue],
    ) -> PersistenceResult<()> {
        unresolved.sort();
        debug!(count = unresolved.len(), "resolving canonical values");

        let index: HashMap<_, usize> = unresolved
            .iter()
            .enumerate()
            .map(|(i, v)| (v.key().clone(), i))
            .collect();

        let chunk_size = self.config.max_common_canonical_values_per_statement;
        let keys: Vec<_> = unresolved.iter().map(|v| v.key().clone()).collect();
        for chunk in keys.chunks(chunk_size) {
            for (key, id) in self.store.fetch_canonical_ids(chunk).await? {
                match index.get(&key) {
                    Some(&i) => unresolved[i].set_id_from_cache(id),
                    None => {
                        return Err(IntegrityError::UnexpectedResolutionRow {
                            message: format!("canonical value '{}'", key.url),
                        }
                        .into())
                    }
                }
            }
        }

        let missing: Vec<_> = unresolved
            .iter()
            .filter(|v| !v.is_resolved())
            .map(|v| v.key().clone())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        for chunk in missing.chunks(chunk_size) {
            if let Err(e) = self.store.insert_canonical_values(chunk).await {
                if !e.is_duplicate_key() {
                    return Err(e.into());
                }
            }
        }
        for chunk in missing.chunks(chunk_size) {
            for (key, id) in self.store.fetch_canonical_ids(chunk).await? {
                if let Some(&i) = index.get(&key) {
                    unresolved[i].set_id_from_database(id);
                }
            }
        }

        if let Some(bad) = unresolved.iter().find(|v| !v.is_resolved()) {
            return Err(IntegrityError::UnresolvedCanonicalValue {
                url: bad.url().to_string(),
            }
            .into());
        }
        Ok(())
    }

    fn publish(&mut self, row: ParameterRow) -> PersistenceResult<()> {
        self.rows.push(row);
        Ok(())
    }

    async fn push_batch(&mut self) -> PersistenceResult<()> {
        debug!(rows = self.rows.len(), "pushing parameter row batch");
        for chunk in self.rows.chunks(self.config.max_parameter_rows_per_statement) {
            self.store.insert_parameter_rows(chunk).await?;
        }
        self.rows.clear();
        Ok(())
    }

    fn reset_batch(&mut self) {
        // called when the transaction was rolled back because of a deadlock
        // or other retryable error and the batch will be processed again
        self.rows.clear();
    }

    fn close(&mut self) {
        self.rows.clear();
    }
}
