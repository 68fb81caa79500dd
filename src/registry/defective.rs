//! Defective-component back-off.
//!
//! A component enters the set when any of its tasks fails to execute and
//! leaves it when one of its tasks next succeeds with at least one
//! sub-operation.  While a component is in the set, the per-cycle plan
//! keeps only a single task of it, bounding the cycle time wasted on a
//! device known to be failing while still probing it for recovery.
//!
//! The set is written from the drain lane and read from the planning lane,
//! so it lives in a concurrent set rather than behind a mutex.

use dashmap::DashSet;
use std::sync::Arc;

/// Set of source-component ids whose most recent task execution failed.
#[derive(Default)]
pub struct DefectiveComponentTracker {
    set: DashSet<String>,
}

impl DefectiveComponentTracker {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Mark `source_id` defective.  Returns `true` if it was not marked
    /// before.
    pub fn add(&self, source_id: &str) -> bool {
        self.set.insert(source_id.to_string())
    }

    /// Clear `source_id` after a successful execution.  Returns `true` if
    /// it was marked.
    pub fn remove(&self, source_id: &str) -> bool {
        self.set.remove(source_id).is_some()
    }

    pub fn contains(&self, source_id: &str) -> bool {
        self.set.contains(source_id)
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    /// Apply the back-off to a component → task-list multimap: defective
    /// components keep a single task (the first – which one is arbitrary by
    /// contract), healthy components keep all of theirs.
    pub fn limit<T>(&self, groups: Vec<(String, Vec<T>)>) -> Vec<(String, Vec<T>)> {
        groups
            .into_iter()
            .map(|(source_id, mut tasks)| {
                if self.contains(&source_id) {
                    tasks.truncate(1);
                }
                (source_id, tasks)
            })
            .collect()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
