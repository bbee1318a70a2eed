//! Configuration for the persistence core.
//!
//! All tunables live here: shared-cache capacities, batch statement sizing,
//! and the bounded retry budget for transient locking conflicts. Defaults
//! match the sizes the ingestion path was tuned with in production.

use serde::{Deserialize, Serialize};

/// Top-level configuration for the persistence core.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    /// Shared identity-cache sizing.
    pub cache: CacheConfig,
    /// Batch resolution and insert sizing.
    pub batch: BatchConfig,
}

/// Capacity of each tier of the shared identity cache.
///
/// Every capacity bounds an LRU map; evicted entries are re-resolved from the
/// database on the next miss, so capacities trade memory for round trips and
/// never affect correctness.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entries in the parameter-name cache. The set of parameter names is
    /// small and hot; this rarely needs tuning.
    pub parameter_names: usize,
    /// Entries in the code-system cache.
    pub code_systems: usize,
    /// Entries in the common token value cache. Token values dominate the
    /// dictionary traffic, so this is by far the largest tier.
    pub common_token_values: usize,
    /// Entries in the canonical value cache.
    pub canonical_values: usize,
    /// Entries in the logical-resource-ident cache.
    pub logical_resource_idents: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            parameter_names: 2_048,
            code_systems: 2_048,
            common_token_values: 100_000,
            canonical_values: 10_000,
            logical_resource_idents: 100_000,
        }
    }
}

impl CacheConfig {
    /// Sets the common token value capacity.
    pub fn with_common_token_values(mut self, capacity: usize) -> Self {
        self.common_token_values = capacity;
        self
    }

    /// Sets the logical-resource-ident capacity.
    pub fn with_logical_resource_idents(mut self, capacity: usize) -> Self {
        self.logical_resource_idents = capacity;
        self
    }
}

/// Sizing for batch dictionary resolution and parameter-row inserts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Maximum logical-resource-ident keys per fetch/insert statement.
    pub max_logical_resources_per_statement: usize,
    /// Maximum code-system keys per fetch/insert statement.
    pub max_code_systems_per_statement: usize,
    /// Maximum common token value keys per fetch/insert statement.
    pub max_common_token_values_per_statement: usize,
    /// Maximum canonical value keys per fetch/insert statement.
    pub max_common_canonical_values_per_statement: usize,
    /// Maximum parameter rows per batch insert statement.
    pub max_parameter_rows_per_statement: usize,
    /// How many times a batch is retried after a deadlock or lock timeout
    /// before the error is surfaced to the caller.
    pub max_batch_retries: u32,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_logical_resources_per_statement: 256,
            max_code_systems_per_statement: 512,
            max_common_token_values_per_statement: 256,
            max_common_canonical_values_per_statement: 256,
            max_parameter_rows_per_statement: 100,
            max_batch_retries: 3,
        }
    }
}

impl BatchConfig {
    /// Sets the retry budget for transient locking conflicts.
    pub fn with_max_batch_retries(mut self, retries: u32) -> Self {
        self.max_batch_retries = retries;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_chunk_sizes() {
        let cfg = BatchConfig::default();
        assert_eq!(cfg.max_logical_resources_per_statement, 256);
        assert_eq!(cfg.max_code_systems_per_statement, 512);
        assert_eq!(cfg.max_common_token_values_per_statement, 256);
        assert_eq!(cfg.max_batch_retries, 3);
    }

    #[test]
    fn test_config_deserializes_with_partial_input() {
        let cfg: PersistenceConfig =
            serde_json::from_str(r#"{"cache": {"common_token_values": 50}}"#).unwrap();
        assert_eq!(cfg.cache.common_token_values, 50);
        assert_eq!(cfg.batch.max_code_systems_per_statement, 512);
    }

    #[test]
    fn test_builder_overrides() {
        let cfg = CacheConfig::default().with_common_token_values(10);
        assert_eq!(cfg.common_token_values, 10);
        let batch = BatchConfig::default().with_max_batch_retries(1);
        assert_eq!(batch.max_batch_retries, 1);
    }
}
