//! Generic cooperative worker loop.
//!
//! [`WorkerLoop`] runs a user-supplied step function on a dedicated named OS
//! thread until stopped, honouring one of three [`Cadence`] modes.  An
//! explicit [`trigger`](WorkerLoop::trigger) preempts whatever the loop is
//! waiting on – the fixed-period sleep, the suspend wait, even the error
//! back-off – and starts the next iteration immediately.
//!
//! # Failure semantics
//! A step error never terminates the loop.  It is logged with a warning and
//! followed by an exponential back-off sleep: 1 s after the first failure,
//! growing by 1 s per consecutive failure up to a configurable cap, reset
//! on the next successful iteration.
//!
//! # Why threads, not an async runtime
//! The step functions in this crate block for bus I/O round-trips by
//! contract; a dedicated thread per lane is the honest model.

use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};

/// How the loop paces its iterations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Cadence {
    /// Next iteration starts `period` after the previous iteration started;
    /// an overrunning step makes the next iteration start immediately.
    Fixed(Duration),

    /// No pause between iterations.  The step function is expected to block
    /// on its own (e.g. on a task queue) – the loop itself never spins.
    NoWait,

    /// Block indefinitely until [`WorkerLoop::trigger`] is called.
    UntilTriggered,
}

// ── Shared control block ──────────────────────────────────────────────────────

#[derive(Default)]
struct ControlState {
    triggered: bool,
    stopping: bool,
}

struct Control {
    state: Mutex<ControlState>,
    wake: Condvar,
}

impl Control {
    fn new() -> Self {
        Self {
            state: Mutex::new(ControlState::default()),
            wake: Condvar::new(),
        }
    }

    /// Wait until the next iteration is due.
    ///
    /// `deadline: None` means wait indefinitely (until triggered or
    /// stopped).  Returns `true` when the loop should exit.
    fn pause_until(&self, deadline: Option<Instant>) -> bool {
        let mut state = self.state.lock();
        loop {
            if state.stopping {
                return true;
            }
            if state.triggered {
                state.triggered = false;
                return false;
            }
            match deadline {
                Some(deadline) => {
                    if Instant::now() >= deadline {
                        return false;
                    }
                    self.wake.wait_until(&mut state, deadline);
                }
                None => {
                    self.wake.wait(&mut state);
                }
            }
        }
    }
}

// ── WorkerLoop ────────────────────────────────────────────────────────────────

/// Handle to a running worker thread.  Stopping is cooperative: the current
/// iteration finishes, then the thread exits and is joined.  Dropping the
/// handle stops the loop.
pub struct WorkerLoop {
    name: String,
    control: std::sync::Arc<Control>,
    handle: Option<JoinHandle<()>>,
}

impl WorkerLoop {
    /// Spawn a named worker thread running `step` at the given cadence.
    ///
    /// `backoff_cap` bounds the error back-off sleep (see module docs).
    ///
    /// # Errors
    /// Fails only if the OS refuses to spawn the thread.
    pub fn spawn<F>(
        name: impl Into<String>,
        cadence: Cadence,
        backoff_cap: Duration,
        mut step: F,
    ) -> anyhow::Result<Self>
    where
        F: FnMut() -> anyhow::Result<()> + Send + 'static,
    {
        let name = name.into();
        let control = std::sync::Arc::new(Control::new());
        let thread_control = control.clone();
        let thread_name = name.clone();

        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                let mut last_start: Option<Instant> = None;
                let mut consecutive_failures: u64 = 0;

                loop {
                    let deadline = if consecutive_failures > 0 {
                        // Error back-off, preemptible by trigger().
                        let backoff = Duration::from_secs(consecutive_failures).min(backoff_cap);
                        Some(Instant::now() + backoff)
                    } else {
                        match cadence {
                            Cadence::NoWait => Some(Instant::now()),
                            Cadence::Fixed(period) => Some(
                                last_start
                                    .map(|t| t + period)
                                    .unwrap_or_else(Instant::now),
                            ),
                            Cadence::UntilTriggered => None,
                        }
                    };

                    if thread_control.pause_until(deadline) {
                        break;
                    }

                    last_start = Some(Instant::now());
                    match step() {
                        Ok(()) => {
                            if consecutive_failures > 0 {
                                debug!(worker = %thread_name, "step recovered");
                            }
                            consecutive_failures = 0;
                        }
                        Err(e) => {
                            consecutive_failures = consecutive_failures.saturating_add(1);
                            let backoff =
                                Duration::from_secs(consecutive_failures).min(backoff_cap);
                            warn!(
                                worker = %thread_name,
                                error = %e,
                                consecutive_failures,
                                backoff_s = backoff.as_secs(),
                                "worker step failed, backing off"
                            );
                        }
                    }
                }
                debug!(worker = %thread_name, "worker stopped");
            })?;

        Ok(Self {
            name,
            control,
            handle: Some(handle),
        })
    }

    /// Thread name this loop was spawned with.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Wake the loop immediately, preempting any wait.  Never an error: a
    /// trigger during an iteration simply makes the next one start without
    /// pause.
    pub fn trigger(&self) {
        let mut state = self.control.state.lock();
        state.triggered = true;
        self.control.wake.notify_all();
    }

    /// Ask the loop to exit after its current iteration and join the thread.
    pub fn stop(&mut self) {
        {
            let mut state = self.control.state.lock();
            state.stopping = true;
            self.control.wake.notify_all();
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerLoop {
    fn drop(&mut self) {
        self.stop();
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
