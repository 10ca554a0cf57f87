//! Flush-until-stable traversal of registered instances.
//!
//! Visiting an instance may fire listeners that modify other instances or
//! register new ones. The traversal keeps visiting until a round produces no
//! change:
//!
//! 1. Visit every change-tracked instance of the current set and remember
//!    which of them reported no change.
//! 2. If anything changed, visit the instances registered in the meantime.
//! 3. Then visit again the instances found clean in step 1 that have pending
//!    changes now. Instances still clean are checked again once that nested
//!    visit is done.
//!
//! Steps 2 and 3 run depth-first on an explicit work stack, so an instance
//! dirtied by another instance's listener is always visited in a later round.
//! Without a configured round ceiling a listener set that keeps dirtying
//! instances never lets the traversal finish.

use crate::config::TrackerConfig;
use crate::error::{CoreError, CoreResult};
use crate::scope::TxScope;
use crate::types::EntityHandle;
use std::backtrace::Backtrace;
use std::collections::BTreeSet;
use tracing::{debug, trace, Level};

/// Log target of implicit flush diagnostics.
pub const IMPLICIT_FLUSH_TARGET: &str = "entitrack::implicit_flush";

/// Classifies one instance during a traversal.
pub trait EntityVisitor {
    /// Visits an instance and returns true if it was possibly changed.
    fn visit(&mut self, scope: &mut TxScope<'_>, entity: EntityHandle) -> CoreResult<bool>;
}

/// Summary of a finished traversal.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TraversalReport {
    /// Number of rounds executed.
    pub rounds: usize,
    /// Number of visitor calls.
    pub visited: usize,
    /// Number of visits that reported a change.
    pub changed: usize,
}

enum Step {
    Visit {
        instances: Vec<EntityHandle>,
        warn: bool,
    },
    NewlyRegistered,
    Recheck {
        clean: BTreeSet<EntityHandle>,
    },
}

/// Traversal settings.
#[derive(Debug, Clone)]
pub struct Traversal {
    warn_about_implicit_flush: bool,
    implicit_flush_backtrace: bool,
    max_rounds: Option<usize>,
}

impl Traversal {
    /// Creates a traversal from the tracking configuration.
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            warn_about_implicit_flush: false,
            implicit_flush_backtrace: config.implicit_flush_backtrace,
            max_rounds: config.max_traversal_rounds,
        }
    }

    /// Sets whether a change found by the first round is reported as an implicit flush.
    #[must_use]
    pub const fn warn_about_implicit_flush(mut self, value: bool) -> Self {
        self.warn_about_implicit_flush = value;
        self
    }

    /// Traverses every instance of the scope's registry.
    pub fn run(
        &self,
        scope: &mut TxScope<'_>,
        visitor: &mut dyn EntityVisitor,
    ) -> CoreResult<TraversalReport> {
        let mut report = TraversalReport::default();
        let mut processed = BTreeSet::new();
        let mut stack = vec![Step::Visit {
            instances: scope.registry().all_instances().into_iter().collect(),
            warn: self.warn_about_implicit_flush,
        }];

        while let Some(step) = stack.pop() {
            match step {
                Step::Visit { instances, warn } => {
                    report.rounds += 1;
                    if let Some(max) = self.max_rounds {
                        if report.rounds > max {
                            return Err(CoreError::TraversalLimitExceeded { rounds: max });
                        }
                    }

                    let mut changed = false;
                    let mut clean = BTreeSet::new();
                    for handle in instances {
                        processed.insert(handle);
                        let tracked = scope
                            .arena()
                            .get(handle)
                            .is_some_and(|e| e.entity_type().is_change_tracked());
                        if !tracked {
                            continue;
                        }

                        report.visited += 1;
                        if visitor.visit(scope, handle)? {
                            report.changed += 1;
                            changed = true;
                        } else {
                            clean.insert(handle);
                        }
                    }
                    debug!(
                        round = report.rounds,
                        changed,
                        store = %scope.store_name(),
                        "traversal round finished"
                    );
                    if !changed {
                        continue;
                    }

                    if warn {
                        self.log_implicit_flush();
                    }
                    stack.push(Step::Recheck { clean });
                    stack.push(Step::NewlyRegistered);
                }
                Step::NewlyRegistered => {
                    let added: Vec<_> = scope
                        .registry()
                        .all_instances()
                        .difference(&processed)
                        .copied()
                        .collect();
                    if !added.is_empty() {
                        stack.push(Step::Visit {
                            instances: added,
                            warn: false,
                        });
                    }
                }
                Step::Recheck { clean } => {
                    let (dirty, still_clean): (BTreeSet<_>, BTreeSet<_>) = clean
                        .into_iter()
                        .partition(|&h| scope.arena().get(h).is_some_and(|e| e.has_changes()));
                    if dirty.is_empty() {
                        continue;
                    }
                    // Instances still clean may be dirtied by the nested round.
                    if !still_clean.is_empty() {
                        stack.push(Step::Recheck { clean: still_clean });
                    }
                    stack.push(Step::Visit {
                        instances: dirty.into_iter().collect(),
                        warn: false,
                    });
                }
            }
        }

        Ok(report)
    }

    fn log_implicit_flush(&self) {
        if self.implicit_flush_backtrace
            && tracing::enabled!(target: IMPLICIT_FLUSH_TARGET, Level::TRACE)
        {
            let backtrace = Backtrace::force_capture();
            trace!(
                target: IMPLICIT_FLUSH_TARGET,
                "implicit flush due to query execution, see stack trace for the cause:\n{backtrace}"
            );
        } else {
            debug!(target: IMPLICIT_FLUSH_TARGET, "implicit flush due to query execution");
        }
    }
}
