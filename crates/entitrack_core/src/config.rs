//! Tracking configuration.

use crate::types::MAIN_STORE;

/// Order of the registry synchronization unless configured otherwise.
pub const DEFAULT_SYNCHRONIZATION_ORDER: i32 = 100;

/// Configuration of the persistence support.
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Store name used when a session carries none.
    pub default_store: String,

    /// Whether implicit flush diagnostics include a captured backtrace.
    pub implicit_flush_backtrace: bool,

    /// Optional ceiling on traversal rounds; `None` keeps traversal unbounded.
    pub max_traversal_rounds: Option<usize>,

    /// Order of the registry synchronization among other synchronizations.
    pub synchronization_order: i32,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            default_store: MAIN_STORE.to_string(),
            implicit_flush_backtrace: false,
            max_traversal_rounds: None,
            synchronization_order: DEFAULT_SYNCHRONIZATION_ORDER,
        }
    }
}

impl TrackerConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the default store name.
    #[must_use]
    pub fn default_store(mut self, name: impl Into<String>) -> Self {
        self.default_store = name.into();
        self
    }

    /// Sets whether implicit flush diagnostics capture a backtrace.
    #[must_use]
    pub const fn implicit_flush_backtrace(mut self, value: bool) -> Self {
        self.implicit_flush_backtrace = value;
        self
    }

    /// Sets the traversal round ceiling.
    #[must_use]
    pub const fn max_traversal_rounds(mut self, rounds: Option<usize>) -> Self {
        self.max_traversal_rounds = rounds;
        self
    }

    /// Sets the registry synchronization order.
    #[must_use]
    pub const fn synchronization_order(mut self, order: i32) -> Self {
        self.synchronization_order = order;
        self
    }
}

/// Configuration of a data store.
#[derive(Debug, Clone)]
pub struct DataStoreConfig {
    /// Whether load operations run in read-only transactions.
    pub use_read_only_transaction_for_load: bool,

    /// Maximum number of ids per query when loading by ids; `None` loads all at once.
    pub max_ids_batch_size: Option<usize>,
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        Self {
            use_read_only_transaction_for_load: true,
            max_ids_batch_size: None,
        }
    }
}

impl DataStoreConfig {
    /// Creates a new configuration with default values.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets whether loads use read-only transactions.
    #[must_use]
    pub const fn use_read_only_transaction_for_load(mut self, value: bool) -> Self {
        self.use_read_only_transaction_for_load = value;
        self
    }

    /// Sets the id batch size.
    #[must_use]
    pub const fn max_ids_batch_size(mut self, size: Option<usize>) -> Self {
        self.max_ids_batch_size = size;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() {
        let config = TrackerConfig::default();
        assert_eq!(config.default_store, "main");
        assert!(!config.implicit_flush_backtrace);
        assert_eq!(config.max_traversal_rounds, None);
        assert_eq!(config.synchronization_order, 100);
    }

    #[test]
    fn builder_pattern() {
        let config = TrackerConfig::new()
            .default_store("audit")
            .implicit_flush_backtrace(true)
            .max_traversal_rounds(Some(64));

        assert_eq!(config.default_store, "audit");
        assert!(config.implicit_flush_backtrace);
        assert_eq!(config.max_traversal_rounds, Some(64));

        let store = DataStoreConfig::new()
            .use_read_only_transaction_for_load(false)
            .max_ids_batch_size(Some(2));
        assert!(!store.use_read_only_transaction_for_load);
        assert_eq!(store.max_ids_batch_size, Some(2));
    }
}
