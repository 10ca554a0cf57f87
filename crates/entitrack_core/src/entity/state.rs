//! Per-instance identity state.

/// Identity flags carried by every entity instance.
///
/// In normal flow exactly one of `new`, `managed` and `detached` describes the
/// instance; `removed` is orthogonal and set when a hard delete is requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EntityState {
    new: bool,
    managed: bool,
    detached: bool,
    removed: bool,
}

impl EntityState {
    /// State of a freshly constructed instance that was never persisted.
    #[must_use]
    pub const fn new_instance() -> Self {
        Self {
            new: true,
            managed: false,
            detached: false,
            removed: false,
        }
    }

    /// State of an instance read back from the store and detached from any session.
    #[must_use]
    pub const fn detached_instance() -> Self {
        Self {
            new: false,
            managed: false,
            detached: true,
            removed: false,
        }
    }

    /// Returns true if the instance has not been committed yet.
    #[must_use]
    pub const fn is_new(&self) -> bool {
        self.new
    }

    /// Returns true if the instance is registered in a unit of work.
    #[must_use]
    pub const fn is_managed(&self) -> bool {
        self.managed
    }

    /// Returns true if the instance left unit-of-work scope.
    #[must_use]
    pub const fn is_detached(&self) -> bool {
        self.detached
    }

    /// Returns true if a hard delete was requested.
    #[must_use]
    pub const fn is_removed(&self) -> bool {
        self.removed
    }

    /// Sets the `new` flag.
    pub fn set_new(&mut self, value: bool) {
        self.new = value;
    }

    /// Sets the `managed` flag.
    pub fn set_managed(&mut self, value: bool) {
        self.managed = value;
    }

    /// Sets the `detached` flag.
    pub fn set_detached(&mut self, value: bool) {
        self.detached = value;
    }

    /// Sets the `removed` flag.
    pub fn set_removed(&mut self, value: bool) {
        self.removed = value;
    }

    /// Puts the flags into the state an instance has after leaving its unit of work.
    pub fn make_detached(&mut self) {
        self.new = false;
        self.managed = false;
        self.detached = true;
    }
}
