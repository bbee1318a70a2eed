//! Error types for the persistence core.
//!
//! This module defines all error types used throughout the persistence core,
//! following a hierarchy that separates client search errors, classified
//! database errors, and data-integrity errors.

// Error enum variant fields are self-documenting via their #[error(...)] messages
#![allow(missing_docs)]

use std::fmt;

use thiserror::Error;

/// The primary error type for all persistence-core operations.
///
/// This enum encompasses all possible errors that can occur during parameter
/// ingestion and search query compilation, organized by category.
#[derive(Error, Debug)]
pub enum PersistenceError {
    /// Client search errors - invalid input, never retried.
    #[error(transparent)]
    Search(#[from] SearchError),

    /// Classified database errors, including transient deadlock/lock-timeout.
    #[error(transparent)]
    Database(#[from] DbError),

    /// Data-integrity errors - fatal, never retried.
    #[error(transparent)]
    Integrity(#[from] IntegrityError),
}

impl PersistenceError {
    /// Returns `true` if retrying the enclosing batch may succeed.
    ///
    /// Only transient database errors (deadlock, lock timeout) are retryable.
    /// Search and integrity errors are deterministic for the same input.
    pub fn is_retryable(&self) -> bool {
        match self {
            PersistenceError::Database(e) => e.is_retryable(),
            _ => false,
        }
    }
}

/// Errors raised while compiling a search expression.
///
/// These are client errors: the search request itself is malformed. They are
/// surfaced to the caller and never retried.
#[derive(Error, Debug)]
pub enum SearchError {
    /// A chained expression contains an intermediate element that is neither
    /// chained nor reverse-chained.
    #[error("invalid search parameter chain: {message}")]
    InvalidChain { message: String },

    /// A `:missing` parameter carries conflicting true/false values.
    #[error("conflicting values for missing modifier on parameter '{parameter}'")]
    MissingModifierConflict { parameter: String },

    /// A `:missing` parameter carries a value that is not boolean-coded.
    #[error("non-boolean value for missing modifier on parameter '{parameter}'")]
    InvalidMissingValue { parameter: String },

    /// The `_type` parameter names a resource type the server does not know.
    #[error("unknown resource type: {resource_type}")]
    UnknownResourceType { resource_type: String },

    /// The search parameter type has no compilation support.
    #[error("unsupported search parameter type: {param_type}")]
    UnsupportedParameterType { param_type: String },
}

/// Classification of a database failure.
///
/// The database access layer translates driver-specific failures into one of
/// these kinds so the persistence core can decide retryability without
/// knowing the dialect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbErrorKind {
    /// A uniqueness constraint rejected an insert. Benign during
    /// select-or-insert races: the loser re-reads the winner's row.
    DuplicateKey,
    /// A lock wait exceeded the configured timeout. Retryable.
    LockTimeout,
    /// The database chose this transaction as a deadlock victim. Retryable.
    Deadlock,
    /// The connection failed or was lost.
    Connection,
    /// A referenced table or column does not exist.
    UndefinedName,
    /// Any other database failure.
    Other,
}

impl fmt::Display for DbErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DbErrorKind::DuplicateKey => write!(f, "duplicate-key"),
            DbErrorKind::LockTimeout => write!(f, "lock-timeout"),
            DbErrorKind::Deadlock => write!(f, "deadlock"),
            DbErrorKind::Connection => write!(f, "connection-error"),
            DbErrorKind::UndefinedName => write!(f, "undefined-name"),
            DbErrorKind::Other => write!(f, "database-error"),
        }
    }
}

/// A database error, pre-classified by the access layer's translator.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DbError {
    kind: DbErrorKind,
    message: String,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl DbError {
    /// Creates a new error of the given kind.
    pub fn new(kind: DbErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Creates a deadlock error.
    pub fn deadlock(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Deadlock, message)
    }

    /// Creates a lock-timeout error.
    pub fn lock_timeout(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::LockTimeout, message)
    }

    /// Creates a duplicate-key error.
    pub fn duplicate_key(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::DuplicateKey, message)
    }

    /// Creates a connection error.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(DbErrorKind::Connection, message)
    }

    /// Attaches the underlying driver error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    /// Returns the classified kind of this error.
    pub fn kind(&self) -> DbErrorKind {
        self.kind
    }

    /// Returns `true` for transient locking conflicts that a retry of the
    /// whole batch may resolve.
    pub fn is_retryable(&self) -> bool {
        matches!(self.kind, DbErrorKind::Deadlock | DbErrorKind::LockTimeout)
    }

    /// Returns `true` if the error reports a uniqueness-constraint violation.
    pub fn is_duplicate_key(&self) -> bool {
        self.kind == DbErrorKind::DuplicateKey
    }
}

/// Fatal data-integrity errors.
///
/// A dictionary resolve-or-insert that still reports unresolved after the
/// insert step means the store is corrupt or the access layer is broken.
/// These are never retried.
#[derive(Error, Debug)]
pub enum IntegrityError {
    /// A parameter name could not be assigned a surrogate id.
    #[error("parameter name not resolved after insert: '{parameter_name}'")]
    UnresolvedParameterName { parameter_name: String },

    /// A code system could not be assigned a surrogate id.
    #[error("code system not resolved after insert: '{code_system}'")]
    UnresolvedCodeSystem { code_system: String },

    /// A common token value could not be assigned a surrogate id.
    #[error("common token value not resolved after insert: '{token_value}'")]
    UnresolvedTokenValue { token_value: String },

    /// A canonical value could not be assigned a surrogate id.
    #[error("canonical value not resolved after insert: '{url}'")]
    UnresolvedCanonicalValue { url: String },

    /// A logical resource identity could not be assigned a surrogate id.
    #[error("logical resource ident not resolved after insert: {resource_type_id}/{logical_id}")]
    UnresolvedLogicalResourceIdent {
        resource_type_id: i32,
        logical_id: String,
    },

    /// A resource type name is missing from the resource-type dictionary.
    #[error("resource type not registered: {resource_type}")]
    UnknownResourceType { resource_type: String },

    /// A dictionary fetch returned a row for a key this batch never asked for.
    #[error("dictionary query returned an unexpected row: {message}")]
    UnexpectedResolutionRow { message: String },
}

/// Result type alias for persistence-core operations.
pub type PersistenceResult<T> = Result<T, PersistenceError>;

/// Result type alias for search compilation.
pub type SearchResult<T> = Result<T, SearchError>;

/// Result type alias for database access operations.
pub type DbResult<T> = Result<T, DbError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_search_error_display() {
        let err = SearchError::MissingModifierConflict {
            parameter: "general-practitioner".to_string(),
        };
        assert!(err.to_string().contains("conflicting values"));

        let err = SearchError::InvalidChain {
            message: "expected a reference".to_string(),
        };
        assert!(err.to_string().contains("invalid search parameter chain"));
    }

    #[test]
    fn test_db_error_classification() {
        let err = DbError::deadlock("victim of deadlock detection");
        assert_eq!(err.kind(), DbErrorKind::Deadlock);
        assert!(err.is_retryable());

        let err = DbError::lock_timeout("lock wait timeout exceeded");
        assert!(err.is_retryable());

        let err = DbError::duplicate_key("unique constraint violated");
        assert!(!err.is_retryable());
        assert!(err.is_duplicate_key());

        let err = DbError::new(DbErrorKind::Other, "syntax error");
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_persistence_error_retryability() {
        let err: PersistenceError = DbError::deadlock("deadlock").into();
        assert!(err.is_retryable());

        let err: PersistenceError = SearchError::InvalidChain {
            message: "bad chain".to_string(),
        }
        .into();
        assert!(!err.is_retryable());

        let err: PersistenceError = IntegrityError::UnresolvedCodeSystem {
            code_system: "http://loinc.org".to_string(),
        }
        .into();
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_integrity_error_display() {
        let err = IntegrityError::UnresolvedLogicalResourceIdent {
            resource_type_id: 42,
            logical_id: "patient-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "logical resource ident not resolved after insert: 42/patient-1"
        );
    }
}
