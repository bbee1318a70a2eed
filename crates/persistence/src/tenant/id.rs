//! Tenant, datastore and shard identifier types.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// An opaque tenant identifier.
///
/// # Examples
///
/// ```
/// use meridian_persistence::tenant::TenantId;
///
/// let tenant = TenantId::new("acme");
/// assert_eq!(tenant.as_str(), "acme");
/// ```
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TenantId(String);

impl TenantId {
    /// Creates a new tenant ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the tenant ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for TenantId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "TenantId({})", self.0)
    }
}

impl FromStr for TenantId {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self::new(s))
    }
}

impl From<&str> for TenantId {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

/// An opaque datastore identifier.
///
/// A tenant may be served by more than one datastore (for example a default
/// store and a profile-specific store); the datastore id selects which one a
/// request is bound to.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DatastoreId(String);

impl DatastoreId {
    /// Creates a new datastore ID from the given string.
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the default datastore ID.
    pub fn default_store() -> Self {
        Self("default".to_string())
    }

    /// Returns the datastore ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DatastoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for DatastoreId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DatastoreId({})", self.0)
    }
}

/// A tenant/partition discriminator included in dictionary keys.
///
/// The shard key keeps multi-tenant dictionary tables partition-local: two
/// tenants sharing a schema never collide on `(system, code)` pairs because
/// the shard key participates in every dictionary key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ShardKey(i16);

impl ShardKey {
    /// The shard used by deployments that do not distribute data.
    pub const FIXED: ShardKey = ShardKey(0);

    /// Creates a shard key from its raw value.
    pub fn new(value: i16) -> Self {
        Self(value)
    }

    /// Returns the raw shard value.
    pub fn value(&self) -> i16 {
        self.0
    }
}

impl fmt::Display for ShardKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tenant_id_roundtrip() {
        let tenant = TenantId::new("acme");
        assert_eq!(tenant.as_str(), "acme");
        assert_eq!(tenant.to_string(), "acme");
        assert_eq!("acme".parse::<TenantId>().unwrap(), tenant);
    }

    #[test]
    fn test_datastore_id_default() {
        assert_eq!(DatastoreId::default_store().as_str(), "default");
    }

    #[test]
    fn test_shard_key_ordering() {
        assert!(ShardKey::new(1) > ShardKey::FIXED);
        assert_eq!(ShardKey::FIXED.value(), 0);
    }
}
