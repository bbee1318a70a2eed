//! Query variants of the search domain model.
//!
//! A [`SearchQuery`] is the rooted tree the compiler hands to a renderer.
//! Three variants exist:
//!
//! - **count** - no sorting, no pagination; produces a scalar;
//! - **data** - per-parameter filtering, then the version-table join, then
//!   sorting, then pagination, in that order;
//! - **whole-system data** - fixed resource-type root; carries no search
//!   parameters, so the per-parameter wrapping is skipped entirely, but any
//!   registered query extension and the version-table join still apply.

use tracing::debug;

use crate::error::PersistenceResult;
use crate::search::params::SortDirective;
use crate::search::query_data::QueryData;
use crate::search::search_param::SearchParam;
use crate::search::visitor::SearchQueryVisitor;

/// A registered query extension, visited right after the root is built.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchExtension {
    /// Restrict a whole-system query to the given resource type ids
    /// (`_type`).
    ResourceTypeFilter(Vec<i32>),
}

impl SearchExtension {
    fn visit<T, V>(&self, query: QueryData<T>, visitor: &V) -> PersistenceResult<QueryData<T>>
    where
        V: SearchQueryVisitor<T>,
    {
        match self {
            SearchExtension::ResourceTypeFilter(ids) => {
                visitor.add_resource_type_filter(query, ids)
            }
        }
    }
}

/// Which query variant a [`SearchQuery`] compiles to.
#[derive(Debug, Clone, PartialEq)]
pub enum SearchQueryKind {
    /// Scalar count of matching resources.
    Count,
    /// Resource data with sorting and pagination.
    Data {
        /// Sort directives, in user order.
        sorts: Vec<SortDirective>,
        /// Row offset of the requested page.
        offset: i64,
        /// Rows per page.
        row_count: i64,
    },
    /// Whole-system data fetch for one resource type.
    WholeSystemData {
        /// Resolved id of the root resource type.
        resource_type_id: i32,
    },
}

/// The root of a compiled search: variant, extensions and parameter nodes.
#[derive(Debug, Clone)]
pub struct SearchQuery {
    root_resource_type: String,
    kind: SearchQueryKind,
    extensions: Vec<SearchExtension>,
    params: Vec<SearchParam>,
}

impl SearchQuery {
    /// Creates a count query for the given root resource type.
    pub fn count(root_resource_type: impl Into<String>) -> Self {
        Self {
            root_resource_type: root_resource_type.into(),
            kind: SearchQueryKind::Count,
            extensions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Creates a data query for the given root resource type.
    pub fn data(
        root_resource_type: impl Into<String>,
        sorts: Vec<SortDirective>,
        offset: i64,
        row_count: i64,
    ) -> Self {
        Self {
            root_resource_type: root_resource_type.into(),
            kind: SearchQueryKind::Data {
                sorts,
                offset,
                row_count,
            },
            extensions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// Creates a whole-system data query for the given resource type.
    pub fn whole_system_data(
        root_resource_type: impl Into<String>,
        resource_type_id: i32,
    ) -> Self {
        Self {
            root_resource_type: root_resource_type.into(),
            kind: SearchQueryKind::WholeSystemData { resource_type_id },
            extensions: Vec::new(),
            params: Vec::new(),
        }
    }

    /// The root resource type.
    pub fn root_resource_type(&self) -> &str {
        &self.root_resource_type
    }

    /// The query variant.
    pub fn kind(&self) -> &SearchQueryKind {
        &self.kind
    }

    /// The parameter nodes.
    pub fn params(&self) -> &[SearchParam] {
        &self.params
    }

    /// Registers a query extension.
    pub fn add_extension(&mut self, extension: SearchExtension) {
        self.extensions.push(extension);
    }

    /// Adds a parameter node.
    pub fn add_param(&mut self, param: SearchParam) {
        self.params.push(param);
    }

    /// Compiles the query tree by driving the given visitor top-down.
    ///
    /// Returns the final traversal state; `into_query` yields the
    /// renderer's finished query value.
    pub fn visit<T, V>(&self, visitor: &V) -> PersistenceResult<QueryData<T>>
    where
        V: SearchQueryVisitor<T>,
    {
        debug!(
            root = %self.root_resource_type,
            params = self.params.len(),
            kind = ?self.kind,
            "compiling search query"
        );

        let mut query = match &self.kind {
            SearchQueryKind::Count => visitor.count_root(&self.root_resource_type),
            SearchQueryKind::Data { .. } => visitor.data_root(&self.root_resource_type),
            SearchQueryKind::WholeSystemData { resource_type_id } => {
                visitor.whole_system_data_root(&self.root_resource_type, *resource_type_id)
            }
        };

        for extension in &self.extensions {
            query = extension.visit(query, visitor)?;
        }

        match &self.kind {
            SearchQueryKind::Count => {
                for param in &self.params {
                    query = param.visit(query, visitor)?;
                }
                // a count needs neither sorting nor pagination
            }
            SearchQueryKind::Data {
                sorts,
                offset,
                row_count,
            } => {
                for param in &self.params {
                    query = param.visit(query, visitor)?;
                }
                query = visitor.join_resources(query)?;
                query = visitor.add_sorting(query, sorts)?;
                query = visitor.add_pagination(query, *offset, *row_count)?;
            }
            SearchQueryKind::WholeSystemData { .. } => {
                // known to carry no search parameters; skip the wrapping
                query = visitor.join_resources(query)?;
            }
        }
        Ok(query)
    }
}
