//! Two-tier identity resolution cache.
//!
//! Maps natural-key dictionary values (parameter names, code systems, token
//! values, canonical URLs, logical resource identities) to their database
//! surrogate ids. See [`identity`] for the resolution algorithm and the
//! commit/rollback visibility rules.

mod identity;

pub use identity::{
    BatchResolution, ParameterIdentityCache, SharedIdentityCache, TransactionCache,
};
