//! The query visitor contract.
//!
//! A renderer implements [`SearchQueryVisitor`] to turn the domain model
//! into an executable query. The domain model never inspects the query type
//! `T`; a relational renderer and a document-query renderer can both
//! implement the same contract.

use crate::error::PersistenceResult;
use crate::search::params::{QueryParameter, SortDirective};
use crate::search::query_data::QueryData;

/// Contract between the search domain model and a concrete query renderer.
///
/// Every method receives the current [`QueryData`] and returns a new one
/// reflecting the added clause. Filter methods are expected to attach a
/// correlated EXISTS (or the renderer's equivalent) against the parameter
/// table for the resource type in scope; chain methods wrap the query and
/// move the scope to the chain's target type.
pub trait SearchQueryVisitor<T> {
    /// Starts a count query for the given root resource type. No sorting or
    /// pagination will be applied to it.
    fn count_root(&self, root_resource_type: &str) -> QueryData<T>;

    /// Starts a data query for the given root resource type.
    fn data_root(&self, root_resource_type: &str) -> QueryData<T>;

    /// Starts a whole-system data query: fixed resource-type root, no
    /// per-parameter filtering.
    fn whole_system_data_root(&self, root_resource_type: &str, resource_type_id: i32)
        -> QueryData<T>;

    /// Adds a string parameter filter.
    fn add_string_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a number parameter filter.
    fn add_number_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a date parameter filter.
    fn add_date_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a token parameter filter.
    fn add_token_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a quantity parameter filter.
    fn add_quantity_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a reference parameter filter.
    fn add_reference_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a location (position) parameter filter.
    fn add_location_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a missing/not-missing test for a parameter. `is_missing` is the
    /// agreed value of the parameter's boolean coding.
    fn add_missing_param(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
        is_missing: bool,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a composite parameter filter.
    fn add_composite_param(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a missing/not-missing test for a composite parameter.
    fn add_composite_missing_param(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
        is_missing: bool,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a canonical (profile/url) parameter filter.
    fn add_canonical_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a `_tag` parameter filter.
    fn add_tag_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds a `_security` parameter filter.
    fn add_security_param(
        &self,
        query: QueryData<T>,
        resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Adds the generic typed filter for the terminal element of a chain.
    fn add_filter(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Wraps the query for one forward chain step: filter the current type
    /// by a parameter of a resource it references. The returned state is
    /// scoped to the referenced type.
    fn add_chained(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Wraps the query for one reverse chain step: filter the current type
    /// by resources of another type that reference it. The returned state is
    /// scoped to the referencing type.
    fn add_reverse_chained(
        &self,
        query: QueryData<T>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<T>>;

    /// Restricts a whole-system query to the given resource type ids
    /// (`_type`).
    fn add_resource_type_filter(
        &self,
        query: QueryData<T>,
        resource_type_ids: &[i32],
    ) -> PersistenceResult<QueryData<T>>;

    /// Joins the logical-resource selection to the version/content table.
    fn join_resources(&self, query: QueryData<T>) -> PersistenceResult<QueryData<T>>;

    /// Applies the sort clauses.
    ///
    /// The rendered ordering must be stable: implementations tiebreak on the
    /// logical-resource alias so paging never shuffles equal keys.
    fn add_sorting(
        &self,
        query: QueryData<T>,
        sorts: &[SortDirective],
    ) -> PersistenceResult<QueryData<T>>;

    /// Applies pagination. Whether `(offset, row_count)` renders as
    /// offset/limit or as a keyset predicate is the renderer's choice.
    fn add_pagination(
        &self,
        query: QueryData<T>,
        offset: i64,
        row_count: i64,
    ) -> PersistenceResult<QueryData<T>>;
}
