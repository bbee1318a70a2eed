//! Database access boundary for dictionary resolution.
//!
//! The persistence core never builds SQL text. A backend implements
//! [`ParamValueStore`] against its own dialect and connection handling; the
//! core drives it with pre-sorted, pre-chunked key slices and consumes
//! pre-classified [`DbError`](crate::error::DbError)s.

use std::sync::Arc;

use async_trait::async_trait;

use crate::error::DbResult;
use crate::params::parameter::ParameterRow;
use crate::params::values::{CommonCanonicalValueKey, CommonTokenValueKey, LogicalResourceIdentKey};

/// Batch fetch/insert operations over the dictionary tables and the
/// parameter-values tables.
///
/// # Contract
///
/// - Fetches return only the keys that exist; absent keys are simply not in
///   the result. Result order is unspecified - callers match rows back to
///   their requests by key, never by position.
/// - Inserts must tolerate concurrent winners: use the dialect's
///   conflict-tolerant insert (e.g. `ON CONFLICT DO NOTHING`). If the driver
///   surfaces the race as a duplicate-key error anyway, the caller treats it
///   as benign and re-reads the winner's row.
/// - Callers sort keys before calling and never exceed the configured
///   per-statement chunk size, so implementations can bind one statement per
///   call.
/// - Every failure must be translated into a classified
///   [`DbError`](crate::error::DbError) so the caller can decide
///   retryability.
#[async_trait]
pub trait ParamValueStore: Send + Sync {
    /// Fetches the id for a single parameter name, if present.
    ///
    /// Parameter names have a very high cache hit rate, so the name
    /// dictionary is resolved one key at a time rather than set-based.
    async fn fetch_parameter_name_id(&self, parameter_name: &str) -> DbResult<Option<i32>>;

    /// Creates a parameter name, returning its id. Must behave as
    /// select-or-insert under concurrency: if another transaction wins the
    /// race, the winner's id is returned.
    async fn create_parameter_name(&self, parameter_name: &str) -> DbResult<i32>;

    /// Fetches `(code_system, id)` pairs for the code systems that exist.
    async fn fetch_code_system_ids(&self, code_systems: &[String]) -> DbResult<Vec<(String, i32)>>;

    /// Inserts the given code systems, ignoring conflicts.
    async fn insert_code_systems(&self, missing: &[String]) -> DbResult<()>;

    /// Fetches `(key, id)` pairs for the common token values that exist.
    async fn fetch_common_token_value_ids(
        &self,
        keys: &[CommonTokenValueKey],
    ) -> DbResult<Vec<(CommonTokenValueKey, i64)>>;

    /// Inserts the given common token values, ignoring conflicts.
    async fn insert_common_token_values(&self, missing: &[CommonTokenValueKey]) -> DbResult<()>;

    /// Fetches `(key, id)` pairs for the canonical values that exist.
    async fn fetch_canonical_ids(
        &self,
        keys: &[CommonCanonicalValueKey],
    ) -> DbResult<Vec<(CommonCanonicalValueKey, i64)>>;

    /// Inserts the given canonical values, ignoring conflicts.
    async fn insert_canonical_values(&self, missing: &[CommonCanonicalValueKey]) -> DbResult<()>;

    /// Fetches `(key, id)` pairs for the logical resource identities that
    /// exist.
    async fn fetch_logical_resource_ident_ids(
        &self,
        keys: &[LogicalResourceIdentKey],
    ) -> DbResult<Vec<(LogicalResourceIdentKey, i64)>>;

    /// Inserts the given logical resource identities, ignoring conflicts.
    async fn insert_logical_resource_idents(
        &self,
        missing: &[LogicalResourceIdentKey],
    ) -> DbResult<()>;

    /// Inserts one chunk of fully-keyed parameter rows.
    async fn insert_parameter_rows(&self, rows: &[ParameterRow]) -> DbResult<()>;
}

#[async_trait]
impl<S: ParamValueStore + ?Sized> ParamValueStore for Arc<S> {
    async fn fetch_parameter_name_id(&self, parameter_name: &str) -> DbResult<Option<i32>> {
        (**self).fetch_parameter_name_id(parameter_name).await
    }

    async fn create_parameter_name(&self, parameter_name: &str) -> DbResult<i32> {
        (**self).create_parameter_name(parameter_name).await
    }

    async fn fetch_code_system_ids(&self, code_systems: &[String]) -> DbResult<Vec<(String, i32)>> {
        (**self).fetch_code_system_ids(code_systems).await
    }

    async fn insert_code_systems(&self, missing: &[String]) -> DbResult<()> {
        (**self).insert_code_systems(missing).await
    }

    async fn fetch_common_token_value_ids(
        &self,
        keys: &[CommonTokenValueKey],
    ) -> DbResult<Vec<(CommonTokenValueKey, i64)>> {
        (**self).fetch_common_token_value_ids(keys).await
    }

    async fn insert_common_token_values(&self, missing: &[CommonTokenValueKey]) -> DbResult<()> {
        (**self).insert_common_token_values(missing).await
    }

    async fn fetch_canonical_ids(
        &self,
        keys: &[CommonCanonicalValueKey],
    ) -> DbResult<Vec<(CommonCanonicalValueKey, i64)>> {
        (**self).fetch_canonical_ids(keys).await
    }

    async fn insert_canonical_values(&self, missing: &[CommonCanonicalValueKey]) -> DbResult<()> {
        (**self).insert_canonical_values(missing).await
    }

    async fn fetch_logical_resource_ident_ids(
        &self,
        keys: &[LogicalResourceIdentKey],
    ) -> DbResult<Vec<(LogicalResourceIdentKey, i64)>> {
        (**self).fetch_logical_resource_ident_ids(keys).await
    }

    async fn insert_logical_resource_idents(
        &self,
        missing: &[LogicalResourceIdentKey],
    ) -> DbResult<()> {
        (**self).insert_logical_resource_idents(missing).await
    }

    async fn insert_parameter_rows(&self, rows: &[ParameterRow]) -> DbResult<()> {
        (**self).insert_parameter_rows(rows).await
    }
}
