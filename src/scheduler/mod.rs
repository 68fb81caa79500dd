//! Cycle-synchronized task scheduler.
//!
//! [`CycleScheduler`] plans and drains all bus work of one bridge.  Two
//! callbacks arrive from the external control-cycle clock, in this order,
//! once per cycle:
//!
//! ```text
//! before_process_image ──► deliver collected frames to read tasks,
//!                          measure the real cycle length,
//!                          rebuild the task queue (if the previous plan
//!                          finished draining)
//! execute_write ─────────► measure the gap since before_process_image;
//!                          the next rebuild uses it to decide which reads
//!                          still fit before the write boundary
//! ```
//!
//! Independently of both, a no-wait [`WorkerLoop`] drains the queue one
//! task at a time, blocking while it is empty.  Net drain order of a plan:
//! write tasks, pre-write-boundary reads, post-write-boundary reads, then
//! one pad wait sizing the plan to an exact multiple of the measured cycle
//! length.
//!
//! A failing task marks its component defective (throttled to one task per
//! cycle until it recovers), raises the communication-failed indicator and
//! invalidates its elements; it never stops the scheduler.
//!
//! [`WorkerLoop`]: crate::worker::WorkerLoop

pub mod error;
pub mod queue;

pub use error::TaskError;
pub use queue::TaskQueue;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::collector::FrameCollector;
use crate::config::BridgeSettings;
use crate::metrics::MetricsSink;
use crate::registry::defective::DefectiveComponentTracker;
use crate::registry::TaskRegistry;
use crate::task::{ceil_div, Priority, ReadTask, Task, WaitTask, WriteTask};
use crate::transport::Transport;
use crate::worker::{Cadence, WorkerLoop};

/// How long the drain step parks on an empty queue before handing control
/// back to its worker loop (which re-checks the stop flag).
const DRAIN_POLL: Duration = Duration::from_millis(100);

// ── CycleScheduler ────────────────────────────────────────────────────────────

/// Plans one task queue per control cycle and drains it on its own lane.
///
/// All collaborators are handed in at construction; `start()`/`stop` (via
/// dropping the returned loop) replace any container lifecycle.  Every
/// piece of cycle state – stopwatch, measured cycle length, write gap,
/// condition flags – is instance-scoped.
pub struct CycleScheduler {
    transport: Arc<dyn Transport>,
    registry: Arc<TaskRegistry>,
    defective: Arc<DefectiveComponentTracker>,
    collector: Arc<FrameCollector>,
    metrics: Arc<dyn MetricsSink>,
    settings: BridgeSettings,

    queue: TaskQueue,

    /// Free-running stopwatch, restarted on every before-process-image.
    cycle_started_at: Mutex<Option<Instant>>,

    /// Most recent measured cycle length; starts at the configured
    /// assumption until the second before-process-image provides a real
    /// measurement.
    measured_cycle_ms: AtomicU64,

    /// Measured before-process-image → execute-write gap of the previous
    /// cycle; zero until the first execute-write.
    write_gap_ms: AtomicU64,

    /// Round-robin cursor over the Low-priority read tasks.
    low_cursor: AtomicUsize,

    communication_failed: AtomicBool,
}

impl CycleScheduler {
    pub fn new(
        transport: Arc<dyn Transport>,
        registry: Arc<TaskRegistry>,
        defective: Arc<DefectiveComponentTracker>,
        collector: Arc<FrameCollector>,
        metrics: Arc<dyn MetricsSink>,
        settings: BridgeSettings,
    ) -> Arc<Self> {
        let initial_cycle_ms = settings.initial_cycle_ms.max(1);
        Arc::new(Self {
            transport,
            registry,
            defective,
            collector,
            metrics,
            settings,
            queue: TaskQueue::new(),
            cycle_started_at: Mutex::new(None),
            measured_cycle_ms: AtomicU64::new(initial_cycle_ms),
            write_gap_ms: AtomicU64::new(0),
            low_cursor: AtomicUsize::new(0),
            communication_failed: AtomicBool::new(false),
        })
    }

    /// Spawn the queue-draining loop.  Drop (or `stop()`) the returned
    /// handle to stop it; the in-flight task finishes first.
    pub fn start(self: &Arc<Self>) -> anyhow::Result<WorkerLoop> {
        let scheduler = Arc::clone(self);
        WorkerLoop::spawn(
            "cyclebus-drain",
            Cadence::NoWait,
            self.settings.worker_backoff_cap(),
            move || {
                scheduler.drain_one(DRAIN_POLL);
                Ok(())
            },
        )
    }

    // ── Cycle-clock callbacks ─────────────────────────────────────────────────

    /// React to the "before process image" event: hand collected frames to
    /// their read tasks, take the cycle measurement, and rebuild the queue
    /// for the upcoming period unless the previous plan is still draining.
    pub fn on_before_process_image(&self) {
        self.distribute_frames();

        {
            let mut started = self.cycle_started_at.lock();
            if let Some(previous) = *started {
                let measured = previous.elapsed().as_millis().max(1) as u64;
                self.measured_cycle_ms.store(measured, Ordering::Relaxed);
            }
            *started = Some(Instant::now());
        }

        self.metrics
            .set_frames_per_cycle(self.collector.take_frames_received());

        // A non-empty queue means the previous plan spans multiple cycles
        // and has not finished draining; keep it.
        if !self.queue.is_empty() {
            debug!(pending = self.queue.len(), "previous plan still draining");
            return;
        }

        self.rebuild_queue();
    }

    /// React to the "execute write" event: store the gap since the last
    /// before-process-image for the next rebuild's before/after-write
    /// tagging.  Zero when no stopwatch is running.
    pub fn on_execute_write(&self) {
        let gap_ms = match *self.cycle_started_at.lock() {
            Some(started) => started.elapsed().as_millis() as u64,
            None => 0,
        };
        self.write_gap_ms.store(gap_ms, Ordering::Relaxed);
    }

    // ── Frame delivery ────────────────────────────────────────────────────────

    fn distribute_frames(&self) {
        for frame in self.collector.take_all() {
            let listeners = self.registry.read_tasks_for(frame.address);
            if listeners.is_empty() {
                debug!(
                    address = frame.address,
                    "frame without a registered read task"
                );
                continue;
            }
            // An address may be claimed by more than one task.
            for task in &listeners {
                task.deliver(frame.clone());
            }
        }
    }

    // ── Plan construction ─────────────────────────────────────────────────────

    fn rebuild_queue(&self) {
        let cycle_ms = self.measured_cycle_ms.load(Ordering::Relaxed).max(1);

        let reads = self.select_read_tasks();
        let writes = self.select_write_tasks();

        let read_ms: u64 = reads
            .iter()
            .map(|t| t.expected_duration().as_millis() as u64)
            .sum();
        let write_ms: u64 = writes
            .iter()
            .map(|t| t.expected_duration().as_millis() as u64)
            .sum();
        let total_ms = read_ms + write_ms;
        let planned_ms = total_ms + self.settings.safety_buffer_ms;
        let required_cycles = ceil_div(planned_ms, cycle_ms);

        self.metrics
            .set_execution_duration(Duration::from_millis(total_ms));

        // Suppressed while the communication-failed indicator is active –
        // inflated durations from a failing device would only duplicate
        // the lower-level alarm.
        let too_short =
            required_cycles > 1 && !self.communication_failed.load(Ordering::Relaxed);
        if too_short {
            warn!(
                required_cycles,
                cycle_ms, planned_ms, "cycle time too short for planned bus work"
            );
        }
        self.metrics.set_cycle_time_too_short(too_short);

        // Reads whose cumulative duration still fits within the measured
        // gap run before the write boundary; the rest run after it.
        let gap_ms = self.write_gap_ms.load(Ordering::Relaxed);
        let mut before_count = 0usize;
        let mut accumulated_ms = 0u64;
        for task in &reads {
            if accumulated_ms >= gap_ms {
                break;
            }
            before_count += 1;
            accumulated_ms += task.expected_duration().as_millis() as u64;
        }

        // Pad the plan to an exact multiple of the measured cycle length.
        let wait_ms = required_cycles * cycle_ms - planned_ms;

        // The queue drains from the tail, so each group is pushed to the
        // head in forward order; earlier pushes end up nearer the drain
        // end.  Tail-out order: writes, pre-boundary reads, post-boundary
        // reads, pad wait.
        let mut plan: VecDeque<Task> = VecDeque::with_capacity(writes.len() + reads.len() + 1);
        for task in writes {
            plan.push_front(Task::Write(task));
        }
        let mut reads = reads.into_iter();
        for task in reads.by_ref().take(before_count) {
            plan.push_front(Task::Read(task));
        }
        for task in reads {
            plan.push_front(Task::Read(task));
        }
        plan.push_front(Task::Wait(WaitTask::new(Duration::from_millis(wait_ms))));

        debug!(
            tasks = plan.len() - 1,
            before_boundary = before_count,
            gap_ms,
            required_cycles,
            wait_ms,
            "queue rebuilt"
        );
        self.queue.replace(plan);
    }

    /// Every High-priority read task plus at most one Low-priority task
    /// (round-robin), filtered through the defective back-off.
    fn select_read_tasks(&self) -> Vec<Arc<ReadTask>> {
        let groups = self.registry.read_tasks_by_component();

        let mut selected: Vec<(String, Vec<Arc<ReadTask>>)> = Vec::with_capacity(groups.len());
        let mut lows: Vec<Arc<ReadTask>> = Vec::new();
        for (source_id, tasks) in groups {
            let mut highs = Vec::new();
            for task in tasks {
                match task.priority() {
                    Priority::High => highs.push(task),
                    Priority::Low => lows.push(task),
                }
            }
            selected.push((source_id, highs));
        }

        if !lows.is_empty() {
            let index = self.low_cursor.fetch_add(1, Ordering::Relaxed) % lows.len();
            let low = lows.swap_remove(index);
            if let Some(group) = selected
                .iter_mut()
                .find(|(source_id, _)| source_id.as_str() == low.source_id())
            {
                group.1.push(low);
            }
        }

        self.defective
            .limit(selected)
            .into_iter()
            .flat_map(|(_, tasks)| tasks)
            .collect()
    }

    /// Every registered write task, filtered through the defective
    /// back-off.
    fn select_write_tasks(&self) -> Vec<Arc<WriteTask>> {
        self.defective
            .limit(self.registry.write_tasks_by_component())
            .into_iter()
            .flat_map(|(_, tasks)| tasks)
            .collect()
    }

    // ── Draining ──────────────────────────────────────────────────────────────

    /// Pop and execute one task.  Returns `false` when the queue stayed
    /// empty for the whole timeout.
    fn drain_one(&self, timeout: Duration) -> bool {
        let Some(task) = self.queue.take_next(timeout) else {
            return false;
        };

        // An idle bridge plans exactly one pad wait per cycle; skip the
        // sleep so the lane stays responsive while nothing is registered.
        if task.is_wait() && !self.registry.has_tasks() {
            return true;
        }

        match task.execute(self.transport.as_ref()) {
            // Zero sub-operations without an error: nothing to do, neither
            // success nor failure.
            Ok(0) => {}
            Ok(_) => {
                if let Some(source_id) = task.source_id() {
                    if self.defective.remove(source_id) {
                        debug!(component = source_id, "component recovered");
                    }
                }
                self.set_communication_failed(false);
            }
            Err(e) => {
                warn!(task = %task, error = %e, "task execution failed");
                if let Some(source_id) = task.source_id() {
                    self.defective.add(source_id);
                }
                self.set_communication_failed(true);
                // Downstream consumers must not read stale values as fresh.
                task.invalidate_elements();
            }
        }
        true
    }

    fn set_communication_failed(&self, active: bool) {
        if self.communication_failed.swap(active, Ordering::Relaxed) != active {
            self.metrics.set_communication_failed(active);
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
