//! Core type definitions for EntiTrack.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Name of the datastore used when a session does not carry one.
pub const MAIN_STORE: &str = "main";

/// Unique identifier for a transaction.
///
/// Transaction IDs are monotonically increasing and never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TransactionId(pub u64);

impl TransactionId {
    /// Creates a new transaction ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Returns the raw ID value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}

/// Stable identity of an entity instance inside an [`EntityArena`](crate::EntityArena).
///
/// Handles are assigned on insertion and never reused, so two handles are
/// equal exactly when they denote the same physical instance. Entities may
/// not have a usable business equality before they are persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityHandle(pub u64);

impl EntityHandle {
    /// Creates a handle from its raw value.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw handle value.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for EntityHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ent:{}", self.0)
    }
}

/// Identifier of an ORM session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SessionId(pub u64);

impl SessionId {
    /// Creates a new session ID.
    #[must_use]
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session:{}", self.0)
    }
}

/// Kind of ORM session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    /// Transactional unit of work; the only kind instances can be registered with.
    UnitOfWork,
    /// Shared server or client session used for reads outside a unit of work.
    Shared,
}

/// Reference to an ORM session as seen by the tracking layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRef {
    /// Session identity.
    pub id: SessionId,
    /// Kind of session.
    pub kind: SessionKind,
    /// Store name property of the session, if any.
    pub store: Option<String>,
}

impl SessionRef {
    /// Creates a unit-of-work session bound to a store.
    pub fn unit_of_work(id: SessionId, store: impl Into<String>) -> Self {
        Self {
            id,
            kind: SessionKind::UnitOfWork,
            store: Some(store.into()),
        }
    }

    /// Creates a shared (non unit-of-work) session.
    pub fn shared(id: SessionId, store: Option<String>) -> Self {
        Self {
            id,
            kind: SessionKind::Shared,
            store,
        }
    }

    /// Returns true if this is a unit of work.
    #[must_use]
    pub fn is_unit_of_work(&self) -> bool {
        self.kind == SessionKind::UnitOfWork
    }

    /// Returns the store name, treating a missing or empty property as `default`.
    #[must_use]
    pub fn store_name<'a>(&'a self, default: &'a str) -> &'a str {
        match self.store.as_deref() {
            Some(name) if !name.is_empty() => name,
            _ => default,
        }
    }
}
