//! Error types for EntiTrack core.

use crate::types::{EntityHandle, SessionId, TransactionId};
use std::fmt;
use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Message fragment the ORM engine reports when a fetch group is applied to
/// a query that selects scalar attributes instead of entities.
pub const FETCH_GROUP_ON_REPORT_QUERY: &str = "Fetch group cannot be set on report query";

/// Errors that can occur in EntiTrack core operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation requiring an active transaction was called without one.
    #[error("no transaction")]
    NoTransaction,

    /// The transaction-scoped registry is bound to another datastore.
    #[error("cannot handle entity from {requested} datastore because active transaction is for {bound}")]
    StoreMismatch {
        /// Datastore the caller asked for.
        requested: String,
        /// Datastore the registry is bound to.
        bound: String,
    },

    /// A session handed to the registry is not a unit of work.
    #[error("session is not a unit of work: {session}")]
    NotUnitOfWork {
        /// The offending session.
        session: SessionId,
    },

    /// A tracked instance was changed inside a read-only transaction.
    #[error("changed instance {entity} in read-only transaction")]
    ReadOnlyViolation {
        /// The changed instance.
        entity: EntityHandle,
    },

    /// The instance is not registered against the given session.
    #[error("instance {entity} is not registered in session {session}")]
    NotRegistered {
        /// The instance.
        entity: EntityHandle,
        /// The session that was searched.
        session: SessionId,
    },

    /// The handle does not refer to a live entity.
    #[error("entity not found: {entity}")]
    EntityNotFound {
        /// The missing handle.
        entity: EntityHandle,
    },

    /// The query shape cannot be executed by the data store.
    #[error("unsupported query: {message}")]
    UnsupportedQuery {
        /// Actionable description for the caller.
        message: String,
    },

    /// Error reported by the underlying persistence engine.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// A lifecycle or transaction listener failed.
    #[error("listener failed: {message}")]
    Listener {
        /// Description of the failure.
        message: String,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why operation is invalid.
        message: String,
    },

    /// The configured traversal round ceiling was reached.
    #[error("entity traversal did not converge after {rounds} rounds")]
    TraversalLimitExceeded {
        /// Rounds executed before giving up.
        rounds: usize,
    },

    /// The transaction was rolled back instead of committed.
    #[error("transaction {txid} rolled back: {reason}")]
    RolledBack {
        /// The transaction.
        txid: TransactionId,
        /// Why the commit did not happen.
        reason: String,
    },
}

impl CoreError {
    /// Creates a no transaction error.
    pub fn no_transaction() -> Self {
        Self::NoTransaction
    }

    /// Creates a store mismatch error.
    pub fn store_mismatch(requested: impl Into<String>, bound: impl Into<String>) -> Self {
        Self::StoreMismatch {
            requested: requested.into(),
            bound: bound.into(),
        }
    }

    /// Creates a listener failure.
    pub fn listener(message: impl Into<String>) -> Self {
        Self::Listener {
            message: message.into(),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an unsupported query error.
    pub fn unsupported_query(message: impl Into<String>) -> Self {
        Self::UnsupportedQuery {
            message: message.into(),
        }
    }

    /// Returns true for usage errors that abort the transaction and must not be retried.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        !matches!(self, Self::Engine(_))
    }
}

/// Category of an engine failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineErrorKind {
    /// Query compilation or execution failed.
    Query,
    /// Writing pending changes failed.
    Flush,
    /// Any other persistence failure.
    Other,
}

impl fmt::Display for EngineErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Query => write!(f, "query"),
            Self::Flush => write!(f, "flush"),
            Self::Other => write!(f, "persistence"),
        }
    }
}

/// Error surfaced by the ORM engine collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct EngineError {
    /// Failure category.
    pub kind: EngineErrorKind,
    /// Raw engine message.
    pub message: String,
}

impl EngineError {
    /// Creates an engine error.
    pub fn new(kind: EngineErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    /// Creates a query error.
    pub fn query(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Query, message)
    }

    /// Creates a flush error.
    pub fn flush(message: impl Into<String>) -> Self {
        Self::new(EngineErrorKind::Flush, message)
    }

    /// Returns true if the engine refused to apply a fetch group to a scalar query.
    #[must_use]
    pub fn is_fetch_group_on_report_query(&self) -> bool {
        self.kind == EngineErrorKind::Query && self.message.contains(FETCH_GROUP_ON_REPORT_QUERY)
    }
}
