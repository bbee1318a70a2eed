//! Extracted search-parameter values and batch insert rows.
//!
//! The typed `*Parameter` structs are the input side: one value extracted
//! from a record being ingested, not yet tied to any surrogate id.
//! [`ParameterRow`] is the output side: the same value once every dictionary
//! key it references has been resolved, ready for the batch insert.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;

use crate::tenant::ShardKey;

/// A string parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct StringParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// The extracted string.
    pub value: String,
}

impl StringParameter {
    /// Creates a string parameter value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            value: value.into(),
        }
    }
}

/// A number parameter value with its implicit-precision range bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct NumberParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// The extracted number.
    pub value: Decimal,
    /// Lower bound of the value's precision range.
    pub low: Option<Decimal>,
    /// Upper bound of the value's precision range.
    pub high: Option<Decimal>,
}

impl NumberParameter {
    /// Creates a number parameter value.
    pub fn new(name: impl Into<String>, value: Decimal) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            value,
            low: None,
            high: None,
        }
    }
}

/// A date parameter value, normalized to a `[start, end]` instant range.
#[derive(Debug, Clone, PartialEq)]
pub struct DateParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// Inclusive start of the period the value covers.
    pub start: DateTime<Utc>,
    /// Inclusive end of the period the value covers.
    pub end: DateTime<Utc>,
}

impl DateParameter {
    /// Creates a date parameter value.
    pub fn new(name: impl Into<String>, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            start,
            end,
        }
    }
}

/// A token parameter value: a `(system, code)` pair.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// The code system URI.
    pub system: String,
    /// The token value.
    pub code: String,
}

impl TokenParameter {
    /// Creates a token parameter value.
    pub fn new(
        name: impl Into<String>,
        system: impl Into<String>,
        code: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            system: system.into(),
            code: code.into(),
        }
    }
}

/// A `_tag` parameter value. Stored like a token but in the whole-system
/// tag table.
#[derive(Debug, Clone, PartialEq)]
pub struct TagParameter {
    /// The parameter name (always `_tag`).
    pub name: String,
    /// The code system URI.
    pub system: String,
    /// The tag code.
    pub code: String,
}

impl TagParameter {
    /// Creates a tag parameter value.
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: "_tag".to_string(),
            system: system.into(),
            code: code.into(),
        }
    }
}

/// A `_security` parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct SecurityParameter {
    /// The parameter name (always `_security`).
    pub name: String,
    /// The code system URI.
    pub system: String,
    /// The security label code.
    pub code: String,
}

impl SecurityParameter {
    /// Creates a security parameter value.
    pub fn new(system: impl Into<String>, code: impl Into<String>) -> Self {
        Self {
            name: "_security".to_string(),
            system: system.into(),
            code: code.into(),
        }
    }
}

/// A `_profile` (canonical) parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct ProfileParameter {
    /// The parameter name (always `_profile`).
    pub name: String,
    /// The canonical URL without version/fragment.
    pub url: String,
    /// The `|version` suffix, if present.
    pub version: Option<String>,
    /// The `#fragment` suffix, if present.
    pub fragment: Option<String>,
}

impl ProfileParameter {
    /// Creates a profile parameter value.
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            name: "_profile".to_string(),
            url: url.into(),
            version: None,
            fragment: None,
        }
    }
}

/// A quantity parameter value with unit coding and range bounds.
#[derive(Debug, Clone, PartialEq)]
pub struct QuantityParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// The unit code system, if coded.
    pub system: Option<String>,
    /// The unit code.
    pub code: Option<String>,
    /// The extracted value.
    pub value: Decimal,
    /// Lower bound of the value's precision range.
    pub low: Option<Decimal>,
    /// Upper bound of the value's precision range.
    pub high: Option<Decimal>,
}

impl QuantityParameter {
    /// Creates a quantity parameter value.
    pub fn new(name: impl Into<String>, value: Decimal) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            system: None,
            code: None,
            value,
            low: None,
            high: None,
        }
    }

    /// Sets the unit coding.
    pub fn with_coding(mut self, system: impl Into<String>, code: impl Into<String>) -> Self {
        self.system = Some(system.into());
        self.code = Some(code.into());
        self
    }
}

/// A location (position) parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct LocationParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// Latitude in degrees.
    pub latitude: f64,
    /// Longitude in degrees.
    pub longitude: f64,
}

impl LocationParameter {
    /// Creates a location parameter value.
    pub fn new(name: impl Into<String>, latitude: f64, longitude: f64) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            latitude,
            longitude,
        }
    }
}

/// A reference parameter value pointing at another record's identity.
///
/// The target record may not exist yet; its identity is pre-registered in
/// the logical-resource-ident dictionary during resolution.
#[derive(Debug, Clone, PartialEq)]
pub struct ReferenceParameter {
    /// The parameter name.
    pub name: String,
    /// Composite group this value belongs to, if any.
    pub composite_id: Option<i32>,
    /// The referenced resource type.
    pub target_resource_type: String,
    /// The referenced logical id.
    pub target_logical_id: String,
    /// A version-specific reference, if the reference pinned one.
    pub version: Option<i32>,
}

impl ReferenceParameter {
    /// Creates a reference parameter value.
    pub fn new(
        name: impl Into<String>,
        target_resource_type: impl Into<String>,
        target_logical_id: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            composite_id: None,
            target_resource_type: target_resource_type.into(),
            target_logical_id: target_logical_id.into(),
            version: None,
        }
    }
}

/// Columns shared by every parameter row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowCommon {
    /// Partition discriminator.
    pub shard_key: ShardKey,
    /// The resource type owning the row.
    pub resource_type: String,
    /// The owning record's logical resource id.
    pub logical_resource_id: i64,
    /// Resolved parameter-name id.
    pub parameter_name_id: i32,
    /// Composite group, if the value belongs to a composite parameter.
    pub composite_id: Option<i32>,
}

/// A fully-keyed parameter row, ready for the batch insert.
///
/// A row never references an unresolved id: constructing one requires every
/// dictionary lookup it depends on to have completed.
#[derive(Debug, Clone, PartialEq)]
pub enum ParameterRow {
    /// Row for the string-values table.
    String {
        /// Shared columns.
        common: RowCommon,
        /// The string value.
        value: String,
    },
    /// Row for the number-values table.
    Number {
        /// Shared columns.
        common: RowCommon,
        /// The numeric value.
        value: Decimal,
        /// Lower precision bound.
        low: Option<Decimal>,
        /// Upper precision bound.
        high: Option<Decimal>,
    },
    /// Row for the date-values table.
    Date {
        /// Shared columns.
        common: RowCommon,
        /// Period start.
        start: DateTime<Utc>,
        /// Period end.
        end: DateTime<Utc>,
    },
    /// Row for the resource-token-refs table.
    Token {
        /// Shared columns.
        common: RowCommon,
        /// Resolved common token value id.
        common_token_value_id: i64,
    },
    /// Row for the whole-system tag table.
    Tag {
        /// Shared columns.
        common: RowCommon,
        /// Resolved common token value id.
        common_token_value_id: i64,
    },
    /// Row for the whole-system security table.
    Security {
        /// Shared columns.
        common: RowCommon,
        /// Resolved common token value id.
        common_token_value_id: i64,
    },
    /// Row for the whole-system profile table.
    Profile {
        /// Shared columns.
        common: RowCommon,
        /// Resolved canonical id.
        canonical_id: i64,
        /// Canonical version suffix.
        version: Option<String>,
        /// Canonical fragment suffix.
        fragment: Option<String>,
    },
    /// Row for the quantity-values table.
    Quantity {
        /// Shared columns.
        common: RowCommon,
        /// Resolved id of the unit code system, if coded.
        code_system_id: Option<i32>,
        /// The unit code.
        code: Option<String>,
        /// The quantity value.
        value: Decimal,
        /// Lower precision bound.
        low: Option<Decimal>,
        /// Upper precision bound.
        high: Option<Decimal>,
    },
    /// Row for the lat/lng-values table.
    Location {
        /// Shared columns.
        common: RowCommon,
        /// Latitude in degrees.
        latitude: f64,
        /// Longitude in degrees.
        longitude: f64,
    },
    /// Row for the reference-values table.
    Reference {
        /// Shared columns.
        common: RowCommon,
        /// Resolved identity of the referenced record.
        ref_logical_resource_id: i64,
        /// Version pinned by the reference, if any.
        ref_version_id: Option<i32>,
    },
}

impl ParameterRow {
    /// Returns the shared columns.
    pub fn common(&self) -> &RowCommon {
        match self {
            ParameterRow::String { common, .. }
            | ParameterRow::Number { common, .. }
            | ParameterRow::Date { common, .. }
            | ParameterRow::Token { common, .. }
            | ParameterRow::Tag { common, .. }
            | ParameterRow::Security { common, .. }
            | ParameterRow::Profile { common, .. }
            | ParameterRow::Quantity { common, .. }
            | ParameterRow::Location { common, .. }
            | ParameterRow::Reference { common, .. } => common,
        }
    }

    /// Returns a short name for the row's target table, used in logging.
    pub fn kind(&self) -> &'static str {
        match self {
            ParameterRow::String { .. } => "string",
            ParameterRow::Number { .. } => "number",
            ParameterRow::Date { .. } => "date",
            ParameterRow::Token { .. } => "token",
            ParameterRow::Tag { .. } => "tag",
            ParameterRow::Security { .. } => "security",
            ParameterRow::Profile { .. } => "profile",
            ParameterRow::Quantity { .. } => "quantity",
            ParameterRow::Location { .. } => "location",
            ParameterRow::Reference { .. } => "reference",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_common_accessor() {
        let row = ParameterRow::Token {
            common: RowCommon {
                shard_key: ShardKey::FIXED,
                resource_type: "Observation".to_string(),
                logical_resource_id: 10,
                parameter_name_id: 3,
                composite_id: None,
            },
            common_token_value_id: 77,
        };
        assert_eq!(row.common().logical_resource_id, 10);
        assert_eq!(row.kind(), "token");
    }

    #[test]
    fn test_quantity_with_coding() {
        let q = QuantityParameter::new("value-quantity", Decimal::new(185, 1))
            .with_coding("http://unitsofmeasure.org", "cm");
        assert_eq!(q.code.as_deref(), Some("cm"));
        assert_eq!(q.value, Decimal::new(185, 1));
    }
}
