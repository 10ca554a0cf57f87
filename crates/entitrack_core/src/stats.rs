//! Tracking statistics and observability.
//!
//! This module provides counters for monitoring the tracking layer.
//! All counters are atomic and can be safely read from multiple threads.

use crate::change::ChangeType;
use std::sync::atomic::{AtomicU64, Ordering};

/// Tracking statistics.
///
/// Counters are cumulative over the lifetime of a [`PersistenceSupport`](crate::PersistenceSupport).
#[derive(Debug, Default)]
pub struct TrackerStats {
    // Traversal counters
    /// Total number of traversals.
    traversals: AtomicU64,
    /// Total number of traversal rounds.
    traversal_rounds: AtomicU64,
    /// Total number of instances visited by traversals.
    visited: AtomicU64,

    // Classification counters
    /// Instances classified as inserted.
    creates: AtomicU64,
    /// Instances classified as updated.
    updates: AtomicU64,
    /// Instances classified as deleted.
    deletes: AtomicU64,

    // Flush counters
    /// Total number of explicit flushes.
    flushes: AtomicU64,

    // Transaction counters
    /// Transactions committed with a bound registry.
    commits: AtomicU64,
    /// Transactions rolled back with a bound registry.
    rollbacks: AtomicU64,

    /// Total number of published events.
    events_published: AtomicU64,

    /// Changed instances found in read-only transactions.
    read_only_violations: AtomicU64,

    /// Total number of listener and engine errors.
    errors: AtomicU64,
}

impl TrackerStats {
    /// Creates a new stats instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a finished traversal.
    pub(crate) fn record_traversal(&self, rounds: usize, visited: usize) {
        self.traversals.fetch_add(1, Ordering::Relaxed);
        self.traversal_rounds
            .fetch_add(rounds as u64, Ordering::Relaxed);
        self.visited.fetch_add(visited as u64, Ordering::Relaxed);
    }

    /// Records a classified change.
    pub(crate) fn record_change(&self, change_type: ChangeType) {
        let counter = match change_type {
            ChangeType::Create => &self.creates,
            ChangeType::Update => &self.updates,
            ChangeType::Delete => &self.deletes,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an explicit flush.
    pub(crate) fn record_flush(&self) {
        self.flushes.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a transaction completion.
    pub(crate) fn record_completion(&self, committed: bool) {
        if committed {
            self.commits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.rollbacks.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Records published events.
    pub(crate) fn record_events(&self, count: usize) {
        self.events_published
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    /// Records a read-only violation.
    pub(crate) fn record_read_only_violation(&self) {
        self.read_only_violations.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an error.
    pub(crate) fn record_error(&self) {
        self.errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Returns the total number of traversals.
    pub fn traversals(&self) -> u64 {
        self.traversals.load(Ordering::Relaxed)
    }

    /// Returns the total number of traversal rounds.
    ///
    /// A high ratio of rounds to traversals points at listeners that keep
    /// mutating instances.
    pub fn traversal_rounds(&self) -> u64 {
        self.traversal_rounds.load(Ordering::Relaxed)
    }

    /// Returns the total number of instances visited by traversals.
    pub fn visited(&self) -> u64 {
        self.visited.load(Ordering::Relaxed)
    }

    /// Returns the number of instances classified as inserted.
    pub fn creates(&self) -> u64 {
        self.creates.load(Ordering::Relaxed)
    }

    /// Returns the number of instances classified as updated.
    pub fn updates(&self) -> u64 {
        self.updates.load(Ordering::Relaxed)
    }

    /// Returns the number of instances classified as deleted.
    pub fn deletes(&self) -> u64 {
        self.deletes.load(Ordering::Relaxed)
    }

    /// Returns the total number of explicit flushes.
    pub fn flushes(&self) -> u64 {
        self.flushes.load(Ordering::Relaxed)
    }

    /// Returns the number of commits.
    pub fn commits(&self) -> u64 {
        self.commits.load(Ordering::Relaxed)
    }

    /// Returns the number of rollbacks.
    pub fn rollbacks(&self) -> u64 {
        self.rollbacks.load(Ordering::Relaxed)
    }

    /// Returns the total number of published events.
    pub fn events_published(&self) -> u64 {
        self.events_published.load(Ordering::Relaxed)
    }

    /// Returns the number of read-only violations.
    pub fn read_only_violations(&self) -> u64 {
        self.read_only_violations.load(Ordering::Relaxed)
    }

    /// Returns the total number of errors.
    pub fn errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Returns a snapshot of all stats.
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            traversals: self.traversals(),
            traversal_rounds: self.traversal_rounds(),
            visited: self.visited(),
            creates: self.creates(),
            updates: self.updates(),
            deletes: self.deletes(),
            flushes: self.flushes(),
            commits: self.commits(),
            rollbacks: self.rollbacks(),
            events_published: self.events_published(),
            read_only_violations: self.read_only_violations(),
            errors: self.errors(),
        }
    }
}

/// A point-in-time snapshot of tracking statistics.
///
/// Unlike `TrackerStats`, this is a simple struct that can be compared or
/// passed across threads without atomics.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    /// Total number of traversals.
    pub traversals: u64,
    /// Total number of traversal rounds.
    pub traversal_rounds: u64,
    /// Total number of instances visited by traversals.
    pub visited: u64,
    /// Instances classified as inserted.
    pub creates: u64,
    /// Instances classified as updated.
    pub updates: u64,
    /// Instances classified as deleted.
    pub deletes: u64,
    /// Total number of explicit flushes.
    pub flushes: u64,
    /// Number of commits.
    pub commits: u64,
    /// Number of rollbacks.
    pub rollbacks: u64,
    /// Total number of published events.
    pub events_published: u64,
    /// Changed instances found in read-only transactions.
    pub read_only_violations: u64,
    /// Total number of errors.
    pub errors: u64,
}
