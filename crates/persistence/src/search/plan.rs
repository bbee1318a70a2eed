//! Structural query plan renderer.
//!
//! [`PlanRenderer`] implements the visitor contract by recording each step
//! as a [`PlanOp`], producing a backend-neutral [`QueryPlan`]. It exists to
//! make compiled query *shape* observable - in tests and in diagnostics -
//! without committing to any SQL dialect. A production renderer lives with
//! its backend and is driven through exactly the same contract.

use std::cell::Cell;

use crate::error::{PersistenceResult, SearchError};
use crate::search::params::{QueryParameter, SortDirective};
use crate::search::query_data::QueryData;
use crate::search::visitor::SearchQueryVisitor;

/// One recorded compilation step.
#[derive(Debug, Clone, PartialEq)]
pub enum PlanOp {
    /// Count root for a resource type.
    CountRoot(String),
    /// Data root for a resource type.
    DataRoot(String),
    /// Whole-system data root for a resource type and its id.
    WholeSystemDataRoot(String, i32),
    /// String filter on the named parameter.
    StringParam(String),
    /// Number filter on the named parameter.
    NumberParam(String),
    /// Date filter on the named parameter.
    DateParam(String),
    /// Token filter on the named parameter.
    TokenParam(String),
    /// Quantity filter on the named parameter.
    QuantityParam(String),
    /// Reference filter on the named parameter.
    ReferenceParam(String),
    /// Location filter on the named parameter.
    LocationParam(String),
    /// Missing/not-missing test on the named parameter.
    MissingParam {
        /// The parameter name.
        code: String,
        /// The agreed missing flag.
        is_missing: bool,
    },
    /// Composite filter on the named parameter.
    CompositeParam(String),
    /// Missing test on a composite parameter.
    CompositeMissingParam {
        /// The parameter name.
        code: String,
        /// The agreed missing flag.
        is_missing: bool,
    },
    /// Canonical filter on the named parameter.
    CanonicalParam(String),
    /// Tag filter.
    TagParam(String),
    /// Security filter.
    SecurityParam(String),
    /// Generic typed terminal filter on the named parameter.
    Filter(String),
    /// Forward chain step through the named reference onto the target type.
    Chained {
        /// The reference parameter chained through.
        code: String,
        /// The referenced resource type.
        target: String,
    },
    /// Reverse chain step from the named referencing type.
    ReverseChained {
        /// The reference parameter on the referencing type.
        code: String,
        /// The referencing resource type.
        source: String,
    },
    /// `_type` restriction to the given resource type ids.
    ResourceTypeFilter(Vec<i32>),
    /// Join to the version/content table.
    JoinResources,
    /// Sort clauses applied, with the sort key count.
    Sorting(usize),
    /// Pagination applied.
    Pagination {
        /// Row offset.
        offset: i64,
        /// Rows per page.
        row_count: i64,
    },
}

/// The recorded shape of one compiled query.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueryPlan {
    /// The steps, in compilation order.
    pub ops: Vec<PlanOp>,
}

impl QueryPlan {
    fn push(&self, op: PlanOp) -> Self {
        let mut ops = self.ops.clone();
        ops.push(op);
        Self { ops }
    }

    /// Returns `true` if any recorded op satisfies the predicate.
    pub fn any(&self, predicate: impl Fn(&PlanOp) -> bool) -> bool {
        self.ops.iter().any(predicate)
    }

    /// Counts the recorded ops satisfying the predicate.
    pub fn count(&self, predicate: impl Fn(&PlanOp) -> bool) -> usize {
        self.ops.iter().filter(|op| predicate(op)).count()
    }

    /// Returns `true` if the plan contains any sort clause.
    pub fn has_sorting(&self) -> bool {
        self.any(|op| matches!(op, PlanOp::Sorting(_)))
    }

    /// Returns `true` if the plan contains pagination.
    pub fn has_pagination(&self) -> bool {
        self.any(|op| matches!(op, PlanOp::Pagination { .. }))
    }
}

/// A visitor implementation that records the compiled shape.
#[derive(Default)]
pub struct PlanRenderer {
    alias_index: Cell<i32>,
}

impl PlanRenderer {
    /// Creates a renderer.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_alias(&self) -> i32 {
        let next = self.alias_index.get() + 1;
        self.alias_index.set(next);
        next
    }

    /// Chain steps need the parser-resolved target type to know which
    /// resource type the traversal moves to.
    fn chain_target(param: &QueryParameter) -> PersistenceResult<&str> {
        param
            .modifier_resource_type
            .as_deref()
            .ok_or_else(|| {
                SearchError::InvalidChain {
                    message: format!("chain element '{}' has no resolved target type", param.code),
                }
                .into()
            })
    }
}

impl SearchQueryVisitor<QueryPlan> for PlanRenderer {
    fn count_root(&self, root_resource_type: &str) -> QueryData<QueryPlan> {
        let plan = QueryPlan::default().push(PlanOp::CountRoot(root_resource_type.to_string()));
        QueryData::new(plan, "LR0", "P0", root_resource_type, 0)
    }

    fn data_root(&self, root_resource_type: &str) -> QueryData<QueryPlan> {
        let plan = QueryPlan::default().push(PlanOp::DataRoot(root_resource_type.to_string()));
        QueryData::new(plan, "LR0", "P0", root_resource_type, 0)
    }

    fn whole_system_data_root(
        &self,
        root_resource_type: &str,
        resource_type_id: i32,
    ) -> QueryData<QueryPlan> {
        let plan = QueryPlan::default().push(PlanOp::WholeSystemDataRoot(
            root_resource_type.to_string(),
            resource_type_id,
        ));
        QueryData::new(plan, "LR0", "P0", root_resource_type, 0)
    }

    fn add_string_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::StringParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_number_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::NumberParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_date_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::DateParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_token_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::TokenParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_quantity_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::QuantityParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_reference_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::ReferenceParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_location_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::LocationParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_missing_param(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
        is_missing: bool,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::MissingParam {
            code: param.code.clone(),
            is_missing,
        });
        Ok(query.with_query(plan))
    }

    fn add_composite_param(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::CompositeParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_composite_missing_param(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
        is_missing: bool,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::CompositeMissingParam {
            code: param.code.clone(),
            is_missing,
        });
        Ok(query.with_query(plan))
    }

    fn add_canonical_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::CanonicalParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_tag_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::TagParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_security_param(
        &self,
        query: QueryData<QueryPlan>,
        _resource_type: &str,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::SecurityParam(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_filter(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::Filter(param.code.clone()));
        Ok(query.with_query(plan))
    }

    fn add_chained(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let target = Self::chain_target(param)?.to_string();
        let plan = query.query().push(PlanOp::Chained {
            code: param.code.clone(),
            target: target.clone(),
        });
        let index = self.next_alias();
        Ok(query.step(plan, format!("LR{index}"), format!("P{index}"), target))
    }

    fn add_reverse_chained(
        &self,
        query: QueryData<QueryPlan>,
        param: &QueryParameter,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let source = Self::chain_target(param)?.to_string();
        let plan = query.query().push(PlanOp::ReverseChained {
            code: param.code.clone(),
            source: source.clone(),
        });
        let index = self.next_alias();
        Ok(query.step(plan, format!("LR{index}"), format!("P{index}"), source))
    }

    fn add_resource_type_filter(
        &self,
        query: QueryData<QueryPlan>,
        resource_type_ids: &[i32],
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query
            .query()
            .push(PlanOp::ResourceTypeFilter(resource_type_ids.to_vec()));
        Ok(query.with_query(plan))
    }

    fn join_resources(
        &self,
        query: QueryData<QueryPlan>,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::JoinResources);
        Ok(query.with_query(plan))
    }

    fn add_sorting(
        &self,
        query: QueryData<QueryPlan>,
        sorts: &[SortDirective],
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::Sorting(sorts.len()));
        Ok(query.with_query(plan))
    }

    fn add_pagination(
        &self,
        query: QueryData<QueryPlan>,
        offset: i64,
        row_count: i64,
    ) -> PersistenceResult<QueryData<QueryPlan>> {
        let plan = query.query().push(PlanOp::Pagination { offset, row_count });
        Ok(query.with_query(plan))
    }
}
