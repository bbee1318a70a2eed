//! Search parameter nodes of the query domain model.
//!
//! Each node wraps one [`QueryParameter`] together with the root resource
//! type and parameter name, and exposes a single operation:
//! [`SearchParam::visit`]. A node either terminates the traversal by adding
//! a filter, or - for chained expressions - asks the visitor to wrap the
//! query in a nested EXISTS and continues with the next chain element.

use tracing::trace;

use crate::error::{PersistenceResult, SearchError};
use crate::search::params::{ChainMode, QueryParameter, SearchModifier, SearchParamType};
use crate::search::query_data::QueryData;
use crate::search::visitor::SearchQueryVisitor;

/// The closed set of parameter-node shapes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchParamKind {
    /// Plain string filter.
    String,
    /// Plain number filter.
    Number,
    /// Plain date filter.
    Date,
    /// Plain token filter.
    Token,
    /// Plain quantity filter.
    Quantity,
    /// Plain reference filter (not chained).
    Reference,
    /// Location position filter.
    Location,
    /// Canonical (profile/url) filter.
    Canonical,
    /// `_tag` filter.
    Tag,
    /// `_security` filter.
    Security,
    /// Composite filter.
    Composite,
    /// `:missing` test.
    Missing,
    /// Forward or reverse chained expression.
    Chained,
}

/// One node of the search query tree.
#[derive(Debug, Clone)]
pub struct SearchParam {
    root_resource_type: String,
    name: String,
    kind: SearchParamKind,
    parameter: QueryParameter,
}

impl SearchParam {
    /// Creates a node for the given root resource type and parameter.
    pub fn new(
        root_resource_type: impl Into<String>,
        name: impl Into<String>,
        kind: SearchParamKind,
        parameter: QueryParameter,
    ) -> Self {
        Self {
            root_resource_type: root_resource_type.into(),
            name: name.into(),
            kind,
            parameter,
        }
    }

    /// The root resource type the query is built for.
    pub fn root_resource_type(&self) -> &str {
        &self.root_resource_type
    }

    /// The parameter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The node shape.
    pub fn kind(&self) -> SearchParamKind {
        self.kind
    }

    /// The wrapped query parameter.
    pub fn parameter(&self) -> &QueryParameter {
        &self.parameter
    }

    /// Compiles this node into the query, returning the updated traversal
    /// state.
    pub fn visit<T, V>(&self, query: QueryData<T>, visitor: &V) -> PersistenceResult<QueryData<T>>
    where
        V: SearchQueryVisitor<T>,
    {
        trace!(name = %self.name, kind = ?self.kind, "visiting search parameter");
        let root = self.root_resource_type.as_str();
        match self.kind {
            SearchParamKind::String => visitor.add_string_param(query, root, &self.parameter),
            SearchParamKind::Number => visitor.add_number_param(query, root, &self.parameter),
            SearchParamKind::Date => visitor.add_date_param(query, root, &self.parameter),
            SearchParamKind::Token => visitor.add_token_param(query, root, &self.parameter),
            SearchParamKind::Quantity => visitor.add_quantity_param(query, root, &self.parameter),
            SearchParamKind::Reference => visitor.add_reference_param(query, root, &self.parameter),
            SearchParamKind::Location => visitor.add_location_param(query, root, &self.parameter),
            SearchParamKind::Canonical => visitor.add_canonical_param(query, root, &self.parameter),
            SearchParamKind::Tag => visitor.add_tag_param(query, root, &self.parameter),
            SearchParamKind::Security => visitor.add_security_param(query, root, &self.parameter),
            SearchParamKind::Composite => visitor.add_composite_param(query, &self.parameter),
            SearchParamKind::Missing => visit_missing(query, visitor, &self.parameter),
            SearchParamKind::Chained => self.visit_chained(query, visitor),
        }
    }

    /// Walks the chain elements left to right.
    ///
    /// Every element before the last must be forward- or reverse-chained;
    /// the last must be terminal. Reverse steps scope the query to the
    /// referencing type, forward steps to the referenced type - the visitor
    /// returns the new scope either way.
    fn visit_chained<T, V>(
        &self,
        query: QueryData<T>,
        visitor: &V,
    ) -> PersistenceResult<QueryData<T>>
    where
        V: SearchQueryVisitor<T>,
    {
        let links = self.parameter.chain_links();
        let (terminal, hops) = links
            .split_last()
            .expect("chain_links always yields the head");

        let mut query = query;
        for hop in hops {
            query = match hop.chain {
                ChainMode::Reverse => visitor.add_reverse_chained(query, hop)?,
                ChainMode::Forward => visitor.add_chained(query, hop)?,
                ChainMode::None => {
                    return Err(SearchError::InvalidChain {
                        message: format!(
                            "element '{}' is neither chained nor reverse-chained",
                            hop.code
                        ),
                    }
                    .into())
                }
            };
        }

        if terminal.chain != ChainMode::None {
            return Err(SearchError::InvalidChain {
                message: format!("chain ends in non-terminal element '{}'", terminal.code),
            }
            .into());
        }
        visit_terminal(query, visitor, terminal)
    }
}

/// Dispatches the terminal element of a chain (or a plain `:missing`
/// parameter) to the matching filter method.
fn visit_terminal<T, V>(
    query: QueryData<T>,
    visitor: &V,
    param: &QueryParameter,
) -> PersistenceResult<QueryData<T>>
where
    V: SearchQueryVisitor<T>,
{
    if param.modifier == Some(SearchModifier::Missing) {
        return visit_missing(query, visitor, param);
    }
    if param.param_type == SearchParamType::Composite {
        return visitor.add_composite_param(query, param);
    }
    if is_canonical_filter(param) {
        let resource_type = query.resource_type().to_string();
        return visitor.add_canonical_param(query, &resource_type, param);
    }
    match param.code.as_str() {
        "_tag" => {
            let resource_type = query.resource_type().to_string();
            visitor.add_tag_param(query, &resource_type, param)
        }
        "_security" => {
            let resource_type = query.resource_type().to_string();
            visitor.add_security_param(query, &resource_type, param)
        }
        _ => visitor.add_filter(query, param),
    }
}

/// Canonical handling applies to `_profile`, to URI parameters named `url`,
/// and to anything the parser flagged as canonical.
fn is_canonical_filter(param: &QueryParameter) -> bool {
    param.is_canonical || param.code == "url" || param.code == "_profile"
}

/// Applies `:missing` semantics: all boolean-coded values must agree.
///
/// Mixed true/false values mean the client asked for the parameter to be
/// both present and absent - a search error, not something to guess about.
/// Composite parameters route to the composite-specific handling.
fn visit_missing<T, V>(
    query: QueryData<T>,
    visitor: &V,
    param: &QueryParameter,
) -> PersistenceResult<QueryData<T>>
where
    V: SearchQueryVisitor<T>,
{
    let is_missing = missing_flag(param)?;
    if param.param_type == SearchParamType::Composite {
        visitor.add_composite_missing_param(query, param, is_missing)
    } else {
        visitor.add_missing_param(query, param, is_missing)
    }
}

fn missing_flag(param: &QueryParameter) -> Result<bool, SearchError> {
    let mut agreed: Option<bool> = None;
    for value in &param.values {
        let flag = value.as_bool().ok_or_else(|| SearchError::InvalidMissingValue {
            parameter: param.code.clone(),
        })?;
        match agreed {
            None => agreed = Some(flag),
            Some(previous) if previous != flag => {
                return Err(SearchError::MissingModifierConflict {
                    parameter: param.code.clone(),
                })
            }
            Some(_) => {}
        }
    }
    agreed.ok_or_else(|| SearchError::InvalidMissingValue {
        parameter: param.code.clone(),
    })
}
