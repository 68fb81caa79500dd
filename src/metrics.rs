//! Observability sink.
//!
//! The scheduler publishes a handful of named indicators – fire-and-forget,
//! no response expected.  The host wires a concrete sink at construction
//! time (a channel/telemetry bridge in production, [`NullSink`] when
//! nothing listens, a recording sink in tests).
//!
//! `cycle_time_too_short` and `communication_failed` are persistent state
//! indicators, not events: they stay raised until the condition clears.

use std::time::Duration;

/// Receiver for the scheduler's metric updates.
pub trait MetricsSink: Send + Sync {
    /// Planned execution duration of the upcoming cycle (reads + writes,
    /// without the safety buffer).
    fn set_execution_duration(&self, duration: Duration);

    /// Raised while the planned work does not fit into one measured cycle.
    fn set_cycle_time_too_short(&self, active: bool);

    /// Raised while the most recent task execution failed; cleared by the
    /// next successful one.
    fn set_communication_failed(&self, active: bool);

    /// Frames collected since the previous cycle.
    fn set_frames_per_cycle(&self, frames: u64);
}

/// Sink that drops every update.
pub struct NullSink;

impl MetricsSink for NullSink {
    fn set_execution_duration(&self, _duration: Duration) {}
    fn set_cycle_time_too_short(&self, _active: bool) {}
    fn set_communication_failed(&self, _active: bool) {}
    fn set_frames_per_cycle(&self, _frames: u64) {}
}
