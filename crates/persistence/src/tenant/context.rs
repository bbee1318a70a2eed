//! Request context for persistence operations.

use super::id::{DatastoreId, ShardKey, TenantId};

/// The tenant/shard context for one persistence request.
///
/// A `RequestContext` is created at the service boundary and threaded as an
/// explicit parameter through every call that needs tenant or shard
/// information. The persistence core never reaches for ambient state to
/// discover which tenant it is working for.
///
/// # Examples
///
/// ```
/// use meridian_persistence::tenant::{DatastoreId, RequestContext, ShardKey, TenantId};
///
/// let ctx = RequestContext::new(TenantId::new("acme"), DatastoreId::default_store());
/// assert_eq!(ctx.shard_key(), ShardKey::FIXED);
///
/// let sharded = ctx.with_shard_key(ShardKey::new(7));
/// assert_eq!(sharded.shard_key().value(), 7);
/// ```
#[derive(Debug, Clone)]
pub struct RequestContext {
    tenant_id: TenantId,
    datastore_id: DatastoreId,
    shard_key: ShardKey,
}

impl RequestContext {
    /// Creates a context for the given tenant and datastore, using the fixed
    /// shard.
    pub fn new(tenant_id: TenantId, datastore_id: DatastoreId) -> Self {
        Self {
            tenant_id,
            datastore_id,
            shard_key: ShardKey::FIXED,
        }
    }

    /// Returns a copy of this context bound to the given shard.
    pub fn with_shard_key(mut self, shard_key: ShardKey) -> Self {
        self.shard_key = shard_key;
        self
    }

    /// Returns the tenant ID.
    pub fn tenant_id(&self) -> &TenantId {
        &self.tenant_id
    }

    /// Returns the datastore ID.
    pub fn datastore_id(&self) -> &DatastoreId {
        &self.datastore_id
    }

    /// Returns the shard key for dictionary-value keys built on behalf of
    /// this request.
    pub fn shard_key(&self) -> ShardKey {
        self.shard_key
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_context_accessors() {
        let ctx = RequestContext::new(TenantId::new("acme"), DatastoreId::new("profile"));
        assert_eq!(ctx.tenant_id().as_str(), "acme");
        assert_eq!(ctx.datastore_id().as_str(), "profile");
        assert_eq!(ctx.shard_key(), ShardKey::FIXED);
    }
}
