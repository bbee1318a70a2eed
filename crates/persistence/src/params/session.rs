//! Unit-of-work orchestration for parameter ingestion.
//!
//! A [`ParamIngestionSession`] ties together the collector, the batch
//! processor and the transaction-scoped identity cache for one ingestion
//! transaction, and enforces the ordering guarantee: every dictionary id is
//! resolved before the parameter-row batch is pushed.

use tracing::{debug, warn};

use crate::cache::TransactionCache;
use crate::config::BatchConfig;
use crate::error::PersistenceResult;
use crate::params::collector::ParamValueCollector;
use crate::params::parameter::{
    DateParameter, LocationParameter, NumberParameter, ProfileParameter, QuantityParameter,
    ReferenceParameter, SecurityParameter, StringParameter, TagParameter, TokenParameter,
};
use crate::params::processor::ParamValueProcessor;
use crate::tenant::RequestContext;

/// Drives collector, processor and cache through one ingestion transaction.
///
/// Lifecycle:
///
/// 1. `collect_*` for every parameter value of every record in the batch;
/// 2. [`flush`](Self::flush) before the transaction commits - resolves all
///    dictionary ids and pushes the parameter rows, retrying a bounded
///    number of times on deadlock/lock-timeout;
/// 3. [`on_commit`](Self::on_commit) after a durable commit, or
///    [`on_rollback`](Self::on_rollback) if the transaction was abandoned.
pub struct ParamIngestionSession<P> {
    ctx: RequestContext,
    collector: ParamValueCollector,
    processor: P,
    cache: TransactionCache,
    max_retries: u32,
}

impl<P: ParamValueProcessor> ParamIngestionSession<P> {
    /// Creates a session for one unit of work.
    pub fn new(
        ctx: RequestContext,
        processor: P,
        cache: TransactionCache,
        config: &BatchConfig,
    ) -> Self {
        Self {
            ctx,
            collector: ParamValueCollector::new(),
            processor,
            cache,
            max_retries: config.max_batch_retries,
        }
    }

    /// Returns the request context this session is bound to.
    pub fn context(&self) -> &RequestContext {
        &self.ctx
    }

    /// Returns the transaction-scoped cache.
    pub fn cache(&self) -> &TransactionCache {
        &self.cache
    }

    /// Returns the collector.
    pub fn collector(&self) -> &ParamValueCollector {
        &self.collector
    }

    /// Collects a string parameter value for the given record.
    pub fn collect_string(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: StringParameter,
    ) {
        self.collector.collect_string(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a number parameter value for the given record.
    pub fn collect_number(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: NumberParameter,
    ) {
        self.collector.collect_number(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a date parameter value for the given record.
    pub fn collect_date(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: DateParameter,
    ) {
        self.collector.collect_date(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a token parameter value for the given record.
    pub fn collect_token(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: TokenParameter,
    ) {
        self.collector.collect_token(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a `_tag` parameter value for the given record.
    pub fn collect_tag(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: TagParameter,
    ) {
        self.collector.collect_tag(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a `_security` parameter value for the given record.
    pub fn collect_security(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: SecurityParameter,
    ) {
        self.collector.collect_security(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a `_profile` parameter value for the given record.
    pub fn collect_profile(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: ProfileParameter,
    ) {
        self.collector.collect_profile(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a quantity parameter value for the given record.
    pub fn collect_quantity(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: QuantityParameter,
    ) {
        self.collector.collect_quantity(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a location parameter value for the given record.
    pub fn collect_location(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: LocationParameter,
    ) {
        self.collector.collect_location(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        );
    }

    /// Collects a reference parameter value for the given record,
    /// pre-registering the referenced record's identity.
    pub fn collect_reference(
        &mut self,
        resource_type: &str,
        logical_id: &str,
        logical_resource_id: i64,
        value: ReferenceParameter,
    ) -> PersistenceResult<()> {
        self.collector.collect_reference(
            &self.ctx,
            resource_type,
            logical_id,
            logical_resource_id,
            &self.cache,
            value,
        )
    }

    /// Resolves all buffered dictionary keys and pushes the parameter rows.
    ///
    /// On deadlock or lock timeout the batch is reset - including every id
    /// the failed attempt resolved through the database, since its inserts
    /// were rolled back with the transaction - and retried from scratch, up
    /// to the configured bound. The caller's store is expected to run the
    /// retried statements in a fresh transaction.
    pub async fn flush(&mut self) -> PersistenceResult<()> {
        let mut attempt: u32 = 0;
        loop {
            self.processor.start_batch();
            match self.collector.publish(&mut self.processor, &self.cache).await {
                Ok(()) => {
                    debug!(tenant = %self.ctx.tenant_id(), "parameter batch flushed");
                    return Ok(());
                }
                Err(e) if e.is_retryable() && attempt < self.max_retries => {
                    attempt += 1;
                    warn!(
                        tenant = %self.ctx.tenant_id(),
                        attempt,
                        error = %e,
                        "transient failure while flushing parameter batch; retrying"
                    );
                    self.processor.reset_batch();
                    self.collector.invalidate_database_resolutions();
                }
                Err(e) => {
                    self.processor.reset_batch();
                    return Err(e);
                }
            }
        }
    }

    /// Publishes resolved ids to the cache and promotes them to the shared
    /// tier. Call only after the transaction has durably committed.
    pub fn on_commit(&mut self) {
        self.collector.publish_values_to_cache(&self.cache);
        self.cache.update_shared_maps();
        self.collector.reset();
    }

    /// Discards all transaction-local state. Call when the transaction is
    /// rolled back and will not be retried.
    pub fn on_rollback(&mut self) {
        self.collector.reset();
        self.processor.reset_batch();
        self.cache.clear_local();
    }

    /// Releases processor resources.
    pub fn close(&mut self) {
        self.processor.close();
    }
}
