//! Parsed search-parameter representation.
//!
//! These types are the boundary with the search-string parser: one
//! [`QueryParameter`] per parameter occurrence, carrying its type, modifier,
//! values and - for dotted or `_has` expressions - a link to the next
//! element of the chain. The parser hands over a linked structure; the
//! domain model flattens it to an ordered slice before traversal.

use std::fmt;
use std::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// FHIR search parameter types.
///
/// See: https://build.fhir.org/search.html#ptypes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchParamType {
    /// A simple string, like a name or description.
    String,
    /// A search against a URI.
    Uri,
    /// A search for a number.
    Number,
    /// A search for a date, dateTime, or period.
    Date,
    /// A quantity, with a number and units.
    Quantity,
    /// A code from a code system or value set.
    Token,
    /// A reference to another resource.
    Reference,
    /// A composite search parameter that combines others.
    Composite,
    /// Special search parameters (e.g. `near` on Location).
    Special,
}

impl fmt::Display for SearchParamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchParamType::String => write!(f, "string"),
            SearchParamType::Uri => write!(f, "uri"),
            SearchParamType::Number => write!(f, "number"),
            SearchParamType::Date => write!(f, "date"),
            SearchParamType::Quantity => write!(f, "quantity"),
            SearchParamType::Token => write!(f, "token"),
            SearchParamType::Reference => write!(f, "reference"),
            SearchParamType::Composite => write!(f, "composite"),
            SearchParamType::Special => write!(f, "special"),
        }
    }
}

impl FromStr for SearchParamType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "string" => Ok(SearchParamType::String),
            "uri" => Ok(SearchParamType::Uri),
            "number" => Ok(SearchParamType::Number),
            "date" => Ok(SearchParamType::Date),
            "quantity" => Ok(SearchParamType::Quantity),
            "token" => Ok(SearchParamType::Token),
            "reference" => Ok(SearchParamType::Reference),
            "composite" => Ok(SearchParamType::Composite),
            "special" => Ok(SearchParamType::Special),
            _ => Err(format!("unknown search parameter type: {}", s)),
        }
    }
}

/// Search modifiers that can be applied to search parameters.
///
/// See: https://build.fhir.org/search.html#modifiers
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SearchModifier {
    /// Exact string match (string parameters).
    Exact,
    /// Contains substring (string parameters).
    Contains,
    /// Text search (token parameters).
    Text,
    /// Negation - exclude matches.
    Not,
    /// Match if value is missing.
    Missing,
    /// Match codes above in hierarchy (token/uri parameters).
    Above,
    /// Match codes below in hierarchy (token/uri parameters).
    Below,
    /// Match codes in a value set (token parameters).
    In,
    /// Match codes not in a value set (token parameters).
    NotIn,
    /// Match on identifier (reference parameters).
    Identifier,
    /// Specify reference type (reference parameters).
    Type(String),
}

impl fmt::Display for SearchModifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchModifier::Exact => write!(f, "exact"),
            SearchModifier::Contains => write!(f, "contains"),
            SearchModifier::Text => write!(f, "text"),
            SearchModifier::Not => write!(f, "not"),
            SearchModifier::Missing => write!(f, "missing"),
            SearchModifier::Above => write!(f, "above"),
            SearchModifier::Below => write!(f, "below"),
            SearchModifier::In => write!(f, "in"),
            SearchModifier::NotIn => write!(f, "not-in"),
            SearchModifier::Identifier => write!(f, "identifier"),
            SearchModifier::Type(t) => write!(f, "{}", t),
        }
    }
}

impl SearchModifier {
    /// Parses a modifier string, returning None for unknown modifiers.
    pub fn parse(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "exact" => Some(SearchModifier::Exact),
            "contains" => Some(SearchModifier::Contains),
            "text" => Some(SearchModifier::Text),
            "not" => Some(SearchModifier::Not),
            "missing" => Some(SearchModifier::Missing),
            "above" => Some(SearchModifier::Above),
            "below" => Some(SearchModifier::Below),
            "in" => Some(SearchModifier::In),
            "not-in" => Some(SearchModifier::NotIn),
            "identifier" => Some(SearchModifier::Identifier),
            _ => {
                // A leading capital marks a resource-type modifier
                if s.chars().next().map(|c| c.is_uppercase()).unwrap_or(false) {
                    Some(SearchModifier::Type(s.to_string()))
                } else {
                    None
                }
            }
        }
    }
}

/// Comparison prefixes for search parameter values.
///
/// See: https://build.fhir.org/search.html#prefix
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SearchPrefix {
    /// Equal (default).
    #[default]
    Eq,
    /// Not equal.
    Ne,
    /// Greater than.
    Gt,
    /// Less than.
    Lt,
    /// Greater than or equal.
    Ge,
    /// Less than or equal.
    Le,
    /// Starts after.
    Sa,
    /// Ends before.
    Eb,
    /// Approximately equal.
    Ap,
}

impl fmt::Display for SearchPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SearchPrefix::Eq => write!(f, "eq"),
            SearchPrefix::Ne => write!(f, "ne"),
            SearchPrefix::Gt => write!(f, "gt"),
            SearchPrefix::Lt => write!(f, "lt"),
            SearchPrefix::Ge => write!(f, "ge"),
            SearchPrefix::Le => write!(f, "le"),
            SearchPrefix::Sa => write!(f, "sa"),
            SearchPrefix::Eb => write!(f, "eb"),
            SearchPrefix::Ap => write!(f, "ap"),
        }
    }
}

impl FromStr for SearchPrefix {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "eq" => Ok(SearchPrefix::Eq),
            "ne" => Ok(SearchPrefix::Ne),
            "gt" => Ok(SearchPrefix::Gt),
            "lt" => Ok(SearchPrefix::Lt),
            "ge" => Ok(SearchPrefix::Ge),
            "le" => Ok(SearchPrefix::Le),
            "sa" => Ok(SearchPrefix::Sa),
            "eb" => Ok(SearchPrefix::Eb),
            "ap" => Ok(SearchPrefix::Ap),
            _ => Err(format!("unknown search prefix: {}", s)),
        }
    }
}

/// One value of a query parameter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum QueryParameterValue {
    /// A string or uri value.
    String(String),
    /// A numeric value with its comparison prefix.
    Number {
        /// Comparison prefix.
        prefix: SearchPrefix,
        /// The number.
        value: Decimal,
    },
    /// A date value, kept textual; the renderer owns precision handling.
    Date {
        /// Comparison prefix.
        prefix: SearchPrefix,
        /// The date text as received.
        value: String,
    },
    /// A `(system, code)` token value.
    Token {
        /// The code system, if given.
        system: Option<String>,
        /// The code.
        code: String,
    },
    /// A quantity value.
    Quantity {
        /// Comparison prefix.
        prefix: SearchPrefix,
        /// The number.
        value: Decimal,
        /// The unit code system, if given.
        system: Option<String>,
        /// The unit code, if given.
        code: Option<String>,
    },
    /// A reference value.
    Reference {
        /// The target resource type, if the reference included one.
        resource_type: Option<String>,
        /// The target logical id.
        logical_id: String,
        /// A pinned version, if the reference included one.
        version: Option<i32>,
    },
    /// A boolean-coded value (used by the `:missing` modifier).
    Boolean(bool),
}

impl QueryParameterValue {
    /// Creates a string value.
    pub fn string(value: impl Into<String>) -> Self {
        QueryParameterValue::String(value.into())
    }

    /// Creates a token value.
    pub fn token(system: Option<&str>, code: impl Into<String>) -> Self {
        QueryParameterValue::Token {
            system: system.map(str::to_string),
            code: code.into(),
        }
    }

    /// Returns the boolean coding, if this is a boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            QueryParameterValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }
}

/// How a chain element connects to the next one.
///
/// Forward and reverse chaining are structurally exclusive here: a single
/// element is exactly one of plain, forward-chained or reverse-chained, so
/// dispatch never depends on the order two boolean predicates are checked
/// in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ChainMode {
    /// Not a chain element; terminal filters use this.
    #[default]
    None,
    /// Filters by a parameter of a resource this one references.
    Forward,
    /// Filters by resources of another type that reference this one
    /// (`_has`).
    Reverse,
}

/// One parsed search-parameter occurrence.
///
/// Chained expressions arrive as a singly linked list via `next`; links are
/// consumed left-to-right and the last element must be terminal
/// ([`ChainMode::None`]).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryParameter {
    /// The parameter code (name), e.g. `code` or `general-practitioner`.
    pub code: String,
    /// The parameter type.
    pub param_type: SearchParamType,
    /// Modifier, if any.
    pub modifier: Option<SearchModifier>,
    /// Resource type named by a `:Type` modifier or chain hop, e.g. the
    /// `Patient` in `subject:Patient.name`.
    pub modifier_resource_type: Option<String>,
    /// Marks URI parameters that are searched as canonical references.
    pub is_canonical: bool,
    /// The value(s); multiple values are ORed.
    pub values: Vec<QueryParameterValue>,
    /// How this element connects to `next`.
    pub chain: ChainMode,
    /// The next element of a chained expression.
    pub next: Option<Box<QueryParameter>>,
}

impl QueryParameter {
    /// Creates a plain parameter with no values.
    pub fn new(code: impl Into<String>, param_type: SearchParamType) -> Self {
        Self {
            code: code.into(),
            param_type,
            modifier: None,
            modifier_resource_type: None,
            is_canonical: false,
            values: Vec::new(),
            chain: ChainMode::None,
            next: None,
        }
    }

    /// Sets the modifier.
    pub fn with_modifier(mut self, modifier: SearchModifier) -> Self {
        self.modifier = Some(modifier);
        self
    }

    /// Sets the modifier resource type.
    pub fn with_modifier_resource_type(mut self, resource_type: impl Into<String>) -> Self {
        self.modifier_resource_type = Some(resource_type.into());
        self
    }

    /// Adds a value.
    pub fn with_value(mut self, value: QueryParameterValue) -> Self {
        self.values.push(value);
        self
    }

    /// Marks the parameter as a canonical search.
    pub fn canonical(mut self) -> Self {
        self.is_canonical = true;
        self
    }

    /// Links this element to the next chain element with the given mode.
    pub fn chained_to(mut self, mode: ChainMode, next: QueryParameter) -> Self {
        self.chain = mode;
        self.next = Some(Box::new(next));
        self
    }

    /// Returns `true` if this element starts a chained expression.
    pub fn is_chained(&self) -> bool {
        self.chain != ChainMode::None
    }

    /// Flattens the linked chain into an ordered sequence, head first.
    ///
    /// The singly linked shape is the parser's; everything downstream works
    /// on the flattened slice.
    pub fn chain_links(&self) -> Vec<&QueryParameter> {
        let mut links = Vec::new();
        let mut current = self;
        loop {
            links.push(current);
            match current.next.as_deref() {
                Some(next) => current = next,
                None => break,
            }
        }
        links
    }
}

/// Sort direction for `_sort`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum SortDirection {
    /// Ascending order.
    #[default]
    Ascending,
    /// Descending order.
    Descending,
}

/// A sort directive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SortDirective {
    /// The parameter to sort by.
    pub parameter: String,
    /// The sort direction.
    pub direction: SortDirection,
}

impl SortDirective {
    /// Parses a sort parameter value (e.g., `-date` for descending).
    pub fn parse(s: &str) -> Self {
        if let Some(stripped) = s.strip_prefix('-') {
            Self {
                parameter: stripped.to_string(),
                direction: SortDirection::Descending,
            }
        } else {
            Self {
                parameter: s.to_string(),
                direction: SortDirection::Ascending,
            }
        }
    }
}

/// A parsed search request, as handed over by the search-string parser.
#[derive(Debug, Clone)]
pub struct SearchContext {
    /// The search parameters, in request order.
    pub parameters: Vec<QueryParameter>,
    /// Sort directives, in request order.
    pub sort: Vec<SortDirective>,
    /// Page size (`_count`).
    pub page_size: i64,
    /// 1-based page number.
    pub page_number: i64,
    /// Resource types named by `_type`, for whole-system searches.
    pub resource_types: Option<Vec<String>>,
}

impl Default for SearchContext {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchContext {
    /// Creates a context with the default page shape.
    pub fn new() -> Self {
        Self {
            parameters: Vec::new(),
            sort: Vec::new(),
            page_size: 10,
            page_number: 1,
            resource_types: None,
        }
    }

    /// Adds a parameter.
    pub fn with_parameter(mut self, parameter: QueryParameter) -> Self {
        self.parameters.push(parameter);
        self
    }

    /// Adds a sort directive.
    pub fn with_sort(mut self, sort: SortDirective) -> Self {
        self.sort.push(sort);
        self
    }

    /// Sets the page shape.
    pub fn with_page(mut self, page_size: i64, page_number: i64) -> Self {
        self.page_size = page_size;
        self.page_number = page_number;
        self
    }

    /// Sets the `_type` filter.
    pub fn with_resource_types(mut self, types: Vec<String>) -> Self {
        self.resource_types = Some(types);
        self
    }

    /// Returns the row offset implied by the page shape.
    pub fn offset(&self) -> i64 {
        (self.page_number.max(1) - 1) * self.page_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_param_type_parse() {
        assert_eq!(
            "token".parse::<SearchParamType>().unwrap(),
            SearchParamType::Token
        );
        assert_eq!(
            "REFERENCE".parse::<SearchParamType>().unwrap(),
            SearchParamType::Reference
        );
        assert!("unknown".parse::<SearchParamType>().is_err());
    }

    #[test]
    fn test_search_modifier_parse() {
        assert_eq!(SearchModifier::parse("missing"), Some(SearchModifier::Missing));
        assert_eq!(
            SearchModifier::parse("Patient"),
            Some(SearchModifier::Type("Patient".to_string()))
        );
        assert_eq!(SearchModifier::parse("bogus"), None);
    }

    #[test]
    fn test_chain_links_flattening() {
        let terminal = QueryParameter::new("code", SearchParamType::Token)
            .with_value(QueryParameterValue::token(Some("http://loinc.org"), "1234-5"));
        let chain = QueryParameter::new("general-practitioner", SearchParamType::Reference)
            .with_modifier_resource_type("Practitioner")
            .chained_to(ChainMode::Forward, terminal);

        let links = chain.chain_links();
        assert_eq!(links.len(), 2);
        assert_eq!(links[0].code, "general-practitioner");
        assert_eq!(links[0].chain, ChainMode::Forward);
        assert_eq!(links[1].code, "code");
        assert_eq!(links[1].chain, ChainMode::None);
    }

    #[test]
    fn test_sort_directive_parse() {
        let desc = SortDirective::parse("-_lastUpdated");
        assert_eq!(desc.parameter, "_lastUpdated");
        assert_eq!(desc.direction, SortDirection::Descending);

        let asc = SortDirective::parse("birthdate");
        assert_eq!(asc.direction, SortDirection::Ascending);
    }

    #[test]
    fn test_search_context_offset() {
        let ctx = SearchContext::new().with_page(20, 3);
        assert_eq!(ctx.offset(), 40);
        let first = SearchContext::new().with_page(20, 1);
        assert_eq!(first.offset(), 0);
    }
}
