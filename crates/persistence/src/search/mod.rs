//! Search query compilation.
//!
//! The query path runs parsed search expression → [`builder`] → domain
//! model ([`query`], [`search_param`]) → [`visitor`] contract → executable
//! query. The domain model is pure: it performs no I/O and holds no shared
//! state; each request builds and discards its own tree.

pub mod builder;
pub mod params;
pub mod plan;
pub mod query;
pub mod query_data;
pub mod search_param;
pub mod visitor;

pub use builder::SearchQueryBuilder;
pub use params::{
    ChainMode, QueryParameter, QueryParameterValue, SearchContext, SearchModifier,
    SearchParamType, SearchPrefix, SortDirection, SortDirective,
};
pub use plan::{PlanOp, PlanRenderer, QueryPlan};
pub use query::{SearchExtension, SearchQuery, SearchQueryKind};
pub use query_data::QueryData;
pub use search_param::{SearchParam, SearchParamKind};
pub use visitor::SearchQueryVisitor;
