/*
SPDX-License-Identifier: MIT
*/

//! Core task data structures for the cycle scheduler.
//!
//! Three task kinds model the three things a bus cycle can spend time on:
//!
//! ```text
//! device driver ──(Protocol)──►  ReadTask / WriteTask  ──(CycleScheduler)──►  TaskQueue
//!                                                           WaitTask ↑ pad to a full cycle
//! ```
//!
//! [`Task`] is a closed tagged union over the three, so the hot drain path
//! dispatches with a `match` instead of a virtual call.  Adding a new task
//! kind is an explicit, compiler-checked change.
//!
//! # Ownership model
//! `ReadTask` and `WriteTask` are shared (`Arc`) between the registry, the
//! frame-delivery path and the drain loop; their mutable parts (the pending
//! frame, the armed write value, the element cells) sit behind their own
//! locks.  `WaitTask` is a plain value created fresh on every queue rebuild.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use tracing::trace;

use crate::scheduler::error::TaskError;
use crate::transport::{BusAddress, BusRequest, Frame, Transport};

// ── Priority ──────────────────────────────────────────────────────────────────

/// Read-task priority.
///
/// `High` tasks are planned every cycle; at most one `Low` task is planned
/// per cycle (round-robin), which also serves run-once style tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Priority {
    #[default]
    High,
    Low,
}

// ── Element ───────────────────────────────────────────────────────────────────

/// A shared data cell a task is responsible for.
///
/// Downstream consumers hold the same `Arc<Element>` the task holds.  A
/// value of `None` means "undefined" – set initially, and again whenever the
/// owning task fails so stale values are never read as fresh.
#[derive(Debug)]
pub struct Element {
    address: BusAddress,
    value: RwLock<Option<Vec<u8>>>,
}

impl Element {
    pub fn new(address: BusAddress) -> Arc<Self> {
        Arc::new(Self {
            address,
            value: RwLock::new(None),
        })
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    /// Current value; `None` while undefined or invalidated.
    pub fn value(&self) -> Option<Vec<u8>> {
        self.value.read().clone()
    }

    pub fn set_value(&self, data: Vec<u8>) {
        *self.value.write() = Some(data);
    }

    /// Mark the cell undefined.
    pub fn invalidate(&self) {
        *self.value.write() = None;
    }

    pub fn is_defined(&self) -> bool {
        self.value.read().is_some()
    }
}

// ── ReadTask ──────────────────────────────────────────────────────────────────

/// A periodic read of one bus address into a set of [`Element`]s.
///
/// Execution does two things: it issues the read query on the bus (the
/// device's reply arrives later as a [`Frame`] via the collector), and it
/// applies the most recently delivered frame – if any – to the task's
/// elements.  Decoding the raw payload is the device driver's concern; the
/// elements store it as delivered.
#[derive(Debug)]
pub struct ReadTask {
    source_id: String,
    address: BusAddress,
    priority: Priority,
    expected_duration: Duration,
    elements: Vec<Arc<Element>>,
    /// Most recent undelivered frame; a newer frame for the same address
    /// always overwrites an older one, never queues.
    pending: Mutex<Option<Frame>>,
}

impl ReadTask {
    pub fn new(
        source_id: impl Into<String>,
        address: BusAddress,
        priority: Priority,
        expected_duration: Duration,
        elements: Vec<Arc<Element>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source_id: source_id.into(),
            address,
            priority,
            expected_duration,
            elements,
            pending: Mutex::new(None),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn priority(&self) -> Priority {
        self.priority
    }

    pub fn expected_duration(&self) -> Duration {
        self.expected_duration
    }

    pub fn elements(&self) -> &[Arc<Element>] {
        &self.elements
    }

    /// Store an arriving frame for the next execution.  Latest wins.
    pub fn deliver(&self, frame: Frame) {
        *self.pending.lock() = Some(frame);
    }

    /// Whether a frame is waiting to be applied (test/diagnostic aid).
    pub fn has_pending_frame(&self) -> bool {
        self.pending.lock().is_some()
    }

    fn execute(&self, transport: &dyn Transport) -> Result<usize, TaskError> {
        let mut count = 0usize;

        // Apply the delivered frame first so a subsequent send failure does
        // not discard fresh data.
        if let Some(frame) = self.pending.lock().take() {
            if frame.address != self.address {
                return Err(TaskError::ProtocolMismatch {
                    address: frame.address,
                });
            }
            for element in &self.elements {
                element.set_value(frame.data.clone());
            }
            count += self.elements.len();
            trace!(
                source = %self.source_id,
                address = self.address,
                elements = self.elements.len(),
                "applied frame"
            );
        }

        count += transport.send(&BusRequest::read(self.address))?;
        Ok(count)
    }

    fn invalidate_elements(&self) {
        for element in &self.elements {
            element.invalidate();
        }
    }
}

// ── WriteTask ─────────────────────────────────────────────────────────────────

/// A write of an armed value to one bus address.
///
/// A write task sits in the registry permanently but only touches the bus
/// when a value has been armed since its last execution.  Unarmed execution
/// returns `Ok(0)` – nothing to do, not a failure.
#[derive(Debug)]
pub struct WriteTask {
    source_id: String,
    address: BusAddress,
    expected_duration: Duration,
    elements: Vec<Arc<Element>>,
    next_value: Mutex<Option<Vec<u8>>>,
}

impl WriteTask {
    pub fn new(
        source_id: impl Into<String>,
        address: BusAddress,
        expected_duration: Duration,
        elements: Vec<Arc<Element>>,
    ) -> Arc<Self> {
        Arc::new(Self {
            source_id: source_id.into(),
            address,
            expected_duration,
            elements,
            next_value: Mutex::new(None),
        })
    }

    pub fn source_id(&self) -> &str {
        &self.source_id
    }

    pub fn address(&self) -> BusAddress {
        self.address
    }

    pub fn expected_duration(&self) -> Duration {
        self.expected_duration
    }

    /// Arm the value the next execution will write.  A second arm before
    /// execution replaces the first.
    pub fn arm(&self, data: Vec<u8>) {
        *self.next_value.lock() = Some(data);
    }

    pub fn is_armed(&self) -> bool {
        self.next_value.lock().is_some()
    }

    fn execute(&self, transport: &dyn Transport) -> Result<usize, TaskError> {
        let Some(data) = self.next_value.lock().take() else {
            return Ok(0);
        };
        let count = transport.send(&BusRequest::write(self.address, data))?;
        Ok(count)
    }

    fn invalidate_elements(&self) {
        for element in &self.elements {
            element.invalidate();
        }
    }
}

// ── WaitTask ──────────────────────────────────────────────────────────────────

/// Pure pad: sleeps so that planned work plus the wait fills an exact
/// multiple of the measured cycle length.  Always appended on rebuild so
/// the queue is never empty after a plan is published.
#[derive(Debug, Clone)]
pub struct WaitTask {
    duration: Duration,
}

impl WaitTask {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn duration(&self) -> Duration {
        self.duration
    }

    fn execute(&self) -> Result<usize, TaskError> {
        if !self.duration.is_zero() {
            std::thread::sleep(self.duration);
        }
        Ok(0)
    }
}

// ── Task union ────────────────────────────────────────────────────────────────

/// One unit of scheduled work against the bus.
#[derive(Debug, Clone)]
pub enum Task {
    Read(Arc<ReadTask>),
    Write(Arc<WriteTask>),
    Wait(WaitTask),
}

impl Task {
    /// Owning source-component id; `None` for the pad wait.
    pub fn source_id(&self) -> Option<&str> {
        match self {
            Task::Read(t) => Some(t.source_id()),
            Task::Write(t) => Some(t.source_id()),
            Task::Wait(_) => None,
        }
    }

    /// Expected execution duration used for planning.
    pub fn expected_duration(&self) -> Duration {
        match self {
            Task::Read(t) => t.expected_duration(),
            Task::Write(t) => t.expected_duration(),
            Task::Wait(t) => t.duration(),
        }
    }

    /// Execute the task against `transport`.
    ///
    /// Returns the number of sub-operations actually performed.  `Ok(0)`
    /// means "nothing to do" and must not be treated as a failure.
    pub fn execute(&self, transport: &dyn Transport) -> Result<usize, TaskError> {
        match self {
            Task::Read(t) => t.execute(transport),
            Task::Write(t) => t.execute(transport),
            Task::Wait(t) => t.execute(),
        }
    }

    /// Mark every element this task is responsible for as undefined.
    pub fn invalidate_elements(&self) {
        match self {
            Task::Read(t) => t.invalidate_elements(),
            Task::Write(t) => t.invalidate_elements(),
            Task::Wait(_) => {}
        }
    }

    pub fn is_wait(&self) -> bool {
        matches!(self, Task::Wait(_))
    }
}

impl fmt::Display for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Task::Read(t) => write!(f, "read[{}@{:#06x}]", t.source_id(), t.address()),
            Task::Write(t) => write!(f, "write[{}@{:#06x}]", t.source_id(), t.address()),
            Task::Wait(t) => write!(f, "wait[{} ms]", t.duration().as_millis()),
        }
    }
}

// ── Arithmetic helper ─────────────────────────────────────────────────────────

/// Ceiling division: the number of whole cycles `total` spans.
///
/// Returns at least `1` – even zero planned work occupies one cycle.
pub fn ceil_div(total_ms: u64, cycle_ms: u64) -> u64 {
    if cycle_ms == 0 {
        return 1;
    }
    ((total_ms + cycle_ms - 1) / cycle_ms).max(1)
}

// ── Tests ─────────────────────────────────────────────────────────────────────
