//! Meridian FHIR Server persistence core.
//!
//! This crate is the persistence heart of the Meridian clinical-data server:
//! the identity resolution cache that maps natural-key dictionary values to
//! database surrogate ids during high-concurrency ingestion, and the search
//! query compiler that turns parsed search-parameter expressions - including
//! chaining and reverse chaining - into a backend-agnostic query tree.
//!
//! # Architecture
//!
//! - [`tenant`] - explicit tenant/shard request context
//! - [`config`] - cache and batch sizing
//! - [`error`] - client, database and integrity error taxonomy
//! - [`cache`] - two-tier (transaction-local + shared bounded LRU) identity
//!   cache
//! - [`params`] - dictionary value types, the per-transaction value
//!   collector, the batch resolver/processor and the ingestion session
//! - [`db`] - the store contract a database backend implements
//! - [`search`] - the search parameter domain model, visitor contract and
//!   query builder
//!
//! Ingestion path: record → collector → batch resolver (using the identity
//! cache) → persisted parameter rows. Query path: parsed search expression →
//! domain model → visitor contract → executable query.
//!
//! # Identity cache
//!
//! ```
//! use std::sync::Arc;
//! use meridian_persistence::cache::{
//!     ParameterIdentityCache, SharedIdentityCache, TransactionCache,
//! };
//! use meridian_persistence::config::PersistenceConfig;
//!
//! let config = PersistenceConfig::default();
//! let shared = Arc::new(SharedIdentityCache::new(&config.cache));
//! shared.prime_resource_types(vec![("Patient".to_string(), 1)]);
//!
//! // each unit of work gets its own transaction-scoped view
//! let tx = TransactionCache::new(Arc::clone(&shared));
//! tx.add_parameter_name("family", 42);
//! assert_eq!(tx.get_parameter_name_id("family"), Some(42));
//!
//! // uncommitted ids stay invisible to other transactions
//! assert_eq!(shared.get_parameter_name_id("family"), None);
//! tx.update_shared_maps(); // after a durable commit
//! assert_eq!(shared.get_parameter_name_id("family"), Some(42));
//! ```
//!
//! # Query compilation
//!
//! ```
//! use meridian_persistence::cache::SharedIdentityCache;
//! use meridian_persistence::config::PersistenceConfig;
//! use meridian_persistence::search::{
//!     PlanRenderer, QueryParameter, QueryParameterValue, SearchContext, SearchParamType,
//!     SearchQueryBuilder,
//! };
//!
//! let config = PersistenceConfig::default();
//! let cache = SharedIdentityCache::new(&config.cache);
//!
//! let context = SearchContext::new().with_parameter(
//!     QueryParameter::new("name", SearchParamType::String)
//!         .with_value(QueryParameterValue::string("Smith")),
//! );
//!
//! let builder = SearchQueryBuilder::new(&cache);
//! let query = builder.build_count_query("Patient", &context).unwrap();
//!
//! // drive any renderer through the visitor contract
//! let plan = query.visit(&PlanRenderer::new()).unwrap().into_query();
//! assert!(!plan.has_sorting()); // counts carry no sort or pagination
//! ```

#![warn(missing_docs)]
#![warn(rustdoc::missing_crate_level_docs)]

pub mod cache;
pub mod config;
pub mod db;
pub mod error;
pub mod params;
pub mod search;
pub mod tenant;

// Re-export commonly used types at crate root
pub use cache::{ParameterIdentityCache, SharedIdentityCache, TransactionCache};
pub use config::{BatchConfig, CacheConfig, PersistenceConfig};
pub use db::ParamValueStore;
pub use error::{DbError, DbErrorKind, PersistenceError, PersistenceResult, SearchError};
pub use params::{ParamIngestionSession, ParamValueCollector, PlainParamValueProcessor};
pub use search::{SearchQuery, SearchQueryBuilder, SearchQueryVisitor};
pub use tenant::{DatastoreId, RequestContext, ShardKey, TenantId};

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name.
pub const NAME: &str = env!("CARGO_PKG_NAME");
