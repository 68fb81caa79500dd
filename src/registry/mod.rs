//! Per-component task registration.
//!
//! Device drivers declare their tasks through a [`Protocol`] and attach and
//! detach at runtime.  The registry must be safe to mutate from a
//! configuration lane while the scheduler lanes read it, so it is built on
//! a concurrent map rather than a single mutex: each
//! [`ComponentRegistration`] is constructed whole before insertion and
//! removed in one O(1) delete – readers never observe a partially
//! added or removed component.

pub mod defective;

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{debug, info};

use crate::task::{ReadTask, WriteTask};
use crate::transport::BusAddress;

// ── Protocol ──────────────────────────────────────────────────────────────────

/// Declared by device drivers, not by this core: the read tasks, write
/// tasks and (through the read tasks' addresses) the frame-address
/// associations of one source component.  Every task carries its own
/// expected execution duration.
pub trait Protocol {
    fn read_tasks(&self) -> Vec<Arc<ReadTask>>;
    fn write_tasks(&self) -> Vec<Arc<WriteTask>>;
}

// ── ComponentRegistration ─────────────────────────────────────────────────────

/// Immutable snapshot of one component's task sets, built in full before
/// it becomes visible to any reader.
pub struct ComponentRegistration {
    read_tasks: Vec<Arc<ReadTask>>,
    write_tasks: Vec<Arc<WriteTask>>,
    /// Frame address → the read tasks listening on it.
    by_address: HashMap<BusAddress, Vec<Arc<ReadTask>>>,
}

impl ComponentRegistration {
    fn from_protocol(protocol: &dyn Protocol) -> Self {
        let read_tasks = protocol.read_tasks();
        let write_tasks = protocol.write_tasks();

        let mut by_address: HashMap<BusAddress, Vec<Arc<ReadTask>>> = HashMap::new();
        for task in &read_tasks {
            by_address.entry(task.address()).or_default().push(task.clone());
        }

        Self {
            read_tasks,
            write_tasks,
            by_address,
        }
    }

    pub fn read_tasks(&self) -> &[Arc<ReadTask>] {
        &self.read_tasks
    }

    pub fn write_tasks(&self) -> &[Arc<WriteTask>] {
        &self.write_tasks
    }
}

// ── TaskRegistry ──────────────────────────────────────────────────────────────

/// All currently attached components, keyed by source-component id.
///
/// No ordering guarantee exists across components at the data-model level;
/// the grouped accessors sort by component id purely so that planning is
/// deterministic.
#[derive(Default)]
pub struct TaskRegistry {
    components: DashMap<String, Arc<ComponentRegistration>>,
}

impl TaskRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Attach a component.  Re-registering an id replaces its previous
    /// registration atomically.
    pub fn register(&self, source_id: &str, protocol: &dyn Protocol) {
        let registration = Arc::new(ComponentRegistration::from_protocol(protocol));
        info!(
            component = source_id,
            read_tasks = registration.read_tasks.len(),
            write_tasks = registration.write_tasks.len(),
            "component registered"
        );
        self.components
            .insert(source_id.to_string(), registration);
    }

    /// Detach a component; its tasks stop being planned from the next
    /// rebuild on.
    pub fn unregister(&self, source_id: &str) {
        if self.components.remove(source_id).is_some() {
            debug!(component = source_id, "component unregistered");
        }
    }

    /// Every read task listening on `address`, across all components.  A
    /// single address may legitimately be claimed by more than one task.
    pub fn read_tasks_for(&self, address: BusAddress) -> Vec<Arc<ReadTask>> {
        let mut tasks = Vec::new();
        for entry in self.components.iter() {
            if let Some(listeners) = entry.value().by_address.get(&address) {
                tasks.extend(listeners.iter().cloned());
            }
        }
        tasks
    }

    /// Read tasks grouped by component id, sorted by id.
    pub fn read_tasks_by_component(&self) -> Vec<(String, Vec<Arc<ReadTask>>)> {
        let mut groups: Vec<(String, Vec<Arc<ReadTask>>)> = self
            .components
            .iter()
            .map(|e| (e.key().clone(), e.value().read_tasks.clone()))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    /// Write tasks grouped by component id, sorted by id.
    pub fn write_tasks_by_component(&self) -> Vec<(String, Vec<Arc<WriteTask>>)> {
        let mut groups: Vec<(String, Vec<Arc<WriteTask>>)> = self
            .components
            .iter()
            .map(|e| (e.key().clone(), e.value().write_tasks.clone()))
            .collect();
        groups.sort_by(|a, b| a.0.cmp(&b.0));
        groups
    }

    /// Whether any component currently declares any task at all.
    pub fn has_tasks(&self) -> bool {
        self.components
            .iter()
            .any(|e| !e.value().read_tasks.is_empty() || !e.value().write_tasks.is_empty())
    }

    pub fn component_count(&self) -> usize {
        self.components.len()
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::time::Duration;

    use super::*;
    use crate::task::{Element, Priority};

    /// Protocol stub assembling tasks from plain lists.
    pub(crate) struct StubProtocol {
        pub reads: Vec<Arc<ReadTask>>,
        pub writes: Vec<Arc<WriteTask>>,
    }

    impl Protocol for StubProtocol {
        fn read_tasks(&self) -> Vec<Arc<ReadTask>> {
            self.reads.clone()
        }
        fn write_tasks(&self) -> Vec<Arc<WriteTask>> {
            self.writes.clone()
        }
    }

    pub(crate) fn make_read(
        source: &str,
        address: BusAddress,
        priority: Priority,
        millis: u64,
    ) -> Arc<ReadTask> {
        ReadTask::new(
            source,
            address,
            priority,
            Duration::from_millis(millis),
            vec![Element::new(address)],
        )
    }

    pub(crate) fn make_write(source: &str, address: BusAddress, millis: u64) -> Arc<WriteTask> {
        WriteTask::new(
            source,
            address,
            Duration::from_millis(millis),
            vec![Element::new(address)],
        )
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{make_read, make_write, StubProtocol};
    use super::*;
    use crate::task::Priority;

    #[test]
    fn register_exposes_tasks_by_component_and_address() {
        let registry = TaskRegistry::new();
        registry.register(
            "meter0",
            &StubProtocol {
                reads: vec![
                    make_read("meter0", 0x20, Priority::High, 10),
                    make_read("meter0", 0x21, Priority::Low, 10),
                ],
                writes: vec![make_write("meter0", 0x30, 5)],
            },
        );

        assert_eq!(registry.component_count(), 1);
        assert!(registry.has_tasks());
        assert_eq!(registry.read_tasks_for(0x20).len(), 1);
        assert_eq!(registry.read_tasks_for(0x99).len(), 0);

        let reads = registry.read_tasks_by_component();
        assert_eq!(reads.len(), 1);
        assert_eq!(reads[0].0, "meter0");
        assert_eq!(reads[0].1.len(), 2);
    }

    #[test]
    fn shared_address_is_claimed_by_multiple_tasks() {
        let registry = TaskRegistry::new();
        registry.register(
            "meter0",
            &StubProtocol {
                reads: vec![make_read("meter0", 0x20, Priority::High, 10)],
                writes: vec![],
            },
        );
        registry.register(
            "meter1",
            &StubProtocol {
                reads: vec![make_read("meter1", 0x20, Priority::High, 10)],
                writes: vec![],
            },
        );

        assert_eq!(registry.read_tasks_for(0x20).len(), 2);
    }

    #[test]
    fn unregister_removes_all_traces() {
        let registry = TaskRegistry::new();
        registry.register(
            "meter0",
            &StubProtocol {
                reads: vec![make_read("meter0", 0x20, Priority::High, 10)],
                writes: vec![make_write("meter0", 0x30, 5)],
            },
        );
        registry.unregister("meter0");

        assert_eq!(registry.component_count(), 0);
        assert!(!registry.has_tasks());
        assert!(registry.read_tasks_for(0x20).is_empty());
        assert!(registry.write_tasks_by_component().is_empty());
    }

    #[test]
    fn groups_are_sorted_by_component_id() {
        let registry = TaskRegistry::new();
        for id in ["zeta", "alpha", "mid"] {
            registry.register(
                id,
                &StubProtocol {
                    reads: vec![make_read(id, 0x20, Priority::High, 10)],
                    writes: vec![],
                },
            );
        }

        let ids: Vec<String> = registry
            .read_tasks_by_component()
            .into_iter()
            .map(|(id, _)| id)
            .collect();
        assert_eq!(ids, vec!["alpha", "mid", "zeta"]);
    }

    #[test]
    fn reregistering_replaces_previous_tasks() {
        let registry = TaskRegistry::new();
        registry.register(
            "meter0",
            &StubProtocol {
                reads: vec![make_read("meter0", 0x20, Priority::High, 10)],
                writes: vec![],
            },
        );
        registry.register(
            "meter0",
            &StubProtocol {
                reads: vec![make_read("meter0", 0x21, Priority::High, 10)],
                writes: vec![],
            },
        );

        assert!(registry.read_tasks_for(0x20).is_empty());
        assert_eq!(registry.read_tasks_for(0x21).len(), 1);
    }
}
