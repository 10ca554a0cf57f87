//! Transaction state.

/// State of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    /// Transaction is active and can perform operations.
    Active,
    /// Transaction is running its before-commit callbacks.
    Committing,
    /// Transaction has been committed.
    Committed,
    /// Transaction has been rolled back.
    RolledBack,
}

/// Outcome reported to synchronizations after completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionStatus {
    /// The transaction committed.
    Committed,
    /// The transaction rolled back.
    RolledBack,
    /// The outcome could not be determined.
    Unknown,
}

impl CompletionStatus {
    /// Returns true for a committed outcome.
    #[must_use]
    pub const fn is_committed(self) -> bool {
        matches!(self, Self::Committed)
    }
}

/// Attributes of a transaction to begin.
#[derive(Debug, Clone)]
pub struct TransactionDefinition {
    /// Optional name used in diagnostics.
    pub name: Option<String>,

    /// Whether the transaction may not write.
    pub read_only: bool,

    /// Whether synchronizations may be registered.
    pub synchronization: bool,
}

impl Default for TransactionDefinition {
    fn default() -> Self {
        Self {
            name: None,
            read_only: false,
            synchronization: true,
        }
    }
}

impl TransactionDefinition {
    /// Creates a read-write definition with synchronization enabled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the transaction name.
    #[must_use]
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets whether the transaction is read-only.
    #[must_use]
    pub const fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    /// Sets whether synchronizations may be registered.
    #[must_use]
    pub const fn synchronization(mut self, value: bool) -> Self {
        self.synchronization = value;
        self
    }
}
