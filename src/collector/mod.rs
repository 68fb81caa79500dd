//! Frame collection thread.
//!
//! [`FrameCollector::poll`] runs on a short fixed-period [`WorkerLoop`] and
//! drains every frame the transport has received since the last poll,
//! keeping only the most recent frame per bus address – a newer frame
//! always overwrites an older unread one, never queues.
//!
//! [`take_all`](FrameCollector::take_all) is called once per control cycle
//! from the scheduler lane.  It sets a `blocked` flag for the duration of
//! the copy-and-clear; `poll()` is a no-op while the flag is up.  The flag
//! bounds – it does not eliminate – the race between a concurrent receive
//! and the hand-off: a frame arriving inside the blocked window is simply
//! picked up by the next poll, one collection cycle later, instead of
//! contending on the hot receive path.
//!
//! [`WorkerLoop`]: crate::worker::WorkerLoop

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

use crate::transport::{BusAddress, Frame, Transport};
use crate::worker::{Cadence, WorkerLoop};

/// Collects arriving bus frames, latest-wins per address.
pub struct FrameCollector {
    transport: Arc<dyn Transport>,
    latest: Mutex<HashMap<BusAddress, Frame>>,
    /// Up while a consumer is inside `take_all()`.
    blocked: AtomicBool,
    frames_received: AtomicU64,
    poll_cycles: AtomicU64,
}

impl FrameCollector {
    pub fn new(transport: Arc<dyn Transport>) -> Arc<Self> {
        Arc::new(Self {
            transport,
            latest: Mutex::new(HashMap::new()),
            blocked: AtomicBool::new(false),
            frames_received: AtomicU64::new(0),
            poll_cycles: AtomicU64::new(0),
        })
    }

    /// Spawn the collection loop at `period` (typically 100 ms).
    pub fn start(self: &Arc<Self>, period: Duration) -> anyhow::Result<WorkerLoop> {
        let collector = Arc::clone(self);
        WorkerLoop::spawn(
            "cyclebus-collector",
            Cadence::Fixed(period),
            Duration::from_secs(30),
            move || {
                collector.poll();
                Ok(())
            },
        )
    }

    /// One collection step: drain the transport and update the per-address
    /// store.  No-op while the transport is closed or a `take_all()` is in
    /// flight.
    pub fn poll(&self) {
        if self.blocked.load(Ordering::Acquire) {
            return;
        }
        if !self.transport.is_open() {
            return;
        }

        let frames = self.transport.receive_all();
        self.poll_cycles.fetch_add(1, Ordering::Relaxed);
        if frames.is_empty() {
            return;
        }

        self.frames_received
            .fetch_add(frames.len() as u64, Ordering::Relaxed);
        trace!(count = frames.len(), "collected frames");

        let mut latest = self.latest.lock();
        for frame in frames {
            // Overwrites any older unread frame for the same address.
            latest.insert(frame.address, frame);
        }
    }

    /// Atomically hand all pending frames to the consumer and clear the
    /// store.  A second call with no intervening `poll()` returns empty.
    pub fn take_all(&self) -> Vec<Frame> {
        self.blocked.store(true, Ordering::Release);
        let frames: Vec<Frame> = {
            let mut latest = self.latest.lock();
            latest.drain().map(|(_, frame)| frame).collect()
        };
        self.blocked.store(false, Ordering::Release);
        frames
    }

    /// Frames received since the previous call (fetch-and-reset).
    pub fn take_frames_received(&self) -> u64 {
        self.frames_received.swap(0, Ordering::Relaxed)
    }

    /// Poll cycles executed since the previous call (fetch-and-reset).
    pub fn take_poll_cycles(&self) -> u64 {
        self.poll_cycles.swap(0, Ordering::Relaxed)
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::testing::StubTransport;

    fn collector() -> (Arc<StubTransport>, Arc<FrameCollector>) {
        let transport = Arc::new(StubTransport::new());
        let collector = FrameCollector::new(transport.clone());
        (transport, collector)
    }

    #[test]
    fn latest_frame_per_address_wins() {
        let (t, c) = collector();
        t.queue_frame(Frame::new(0x20, vec![1]));
        t.queue_frame(Frame::new(0x20, vec![2]));
        t.queue_frame(Frame::new(0x21, vec![9]));
        c.poll();

        let mut frames = c.take_all();
        frames.sort_by_key(|f| f.address);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].data, vec![2], "older frame for 0x20 discarded");
        assert_eq!(frames[1].data, vec![9]);
    }

    #[test]
    fn overwrite_also_applies_across_polls() {
        let (t, c) = collector();
        t.queue_frame(Frame::new(0x20, vec![1]));
        c.poll();
        t.queue_frame(Frame::new(0x20, vec![2]));
        c.poll();

        let frames = c.take_all();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].data, vec![2]);
    }

    #[test]
    fn take_all_is_idempotent() {
        let (t, c) = collector();
        t.queue_frame(Frame::new(0x20, vec![1]));
        c.poll();

        assert_eq!(c.take_all().len(), 1);
        assert!(c.take_all().is_empty(), "second take with no poll is empty");
    }

    #[test]
    fn poll_is_a_no_op_while_transport_closed() {
        let (t, c) = collector();
        t.set_open(false);
        t.queue_frame(Frame::new(0x20, vec![1]));
        c.poll();

        assert!(c.take_all().is_empty());
        assert_eq!(c.take_poll_cycles(), 0, "closed polls are not counted");
    }

    #[test]
    fn counters_are_fetch_and_reset() {
        let (t, c) = collector();
        t.queue_frame(Frame::new(0x20, vec![1]));
        t.queue_frame(Frame::new(0x21, vec![2]));
        c.poll();
        c.poll(); // empty poll still counts a cycle

        assert_eq!(c.take_frames_received(), 2);
        assert_eq!(c.take_frames_received(), 0);
        assert_eq!(c.take_poll_cycles(), 2);
        assert_eq!(c.take_poll_cycles(), 0);
    }

    #[test]
    fn collection_loop_picks_up_frames() {
        let (t, c) = collector();
        let loop_handle = c.start(Duration::from_millis(5)).unwrap();

        t.queue_frame(Frame::new(0x20, vec![7]));
        std::thread::sleep(Duration::from_millis(50));
        drop(loop_handle);

        let frames = c.take_all();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].address, 0x20);
    }
}
