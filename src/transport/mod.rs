//! Bus transport seam.
//!
//! The scheduler core never talks to a physical field bus directly – it goes
//! through the [`Transport`] trait, which a concrete bus binding (serial
//! line, CAN socket, TCP gateway, …) implements.  The trait is deliberately
//! small: an open check, a non-blocking drain of received [`Frame`]s, a
//! blocking [`BusRequest`] send, and link-quality counters consumed for
//! observability only.
//!
//! The wire encoding of any specific bus protocol is out of scope here; a
//! `Frame` carries the raw payload bytes and the device protocol decides how
//! to decode them.

use std::time::Instant;

use thiserror::Error;

/// Integer key a device answers on.  One frame is retained per address
/// between collection cycles (latest wins).
pub type BusAddress = u32;

// ── Frame ─────────────────────────────────────────────────────────────────────

/// One unit of data received from the bus.
#[derive(Debug, Clone)]
pub struct Frame {
    /// Bus address this frame was received on.
    pub address: BusAddress,

    /// Raw payload bytes, undecoded.
    pub data: Vec<u8>,

    /// Arrival instant, stamped by the transport (or by [`Frame::new`]).
    pub received_at: Instant,
}

impl Frame {
    /// Create a frame stamped with the current instant.
    pub fn new(address: BusAddress, data: Vec<u8>) -> Self {
        Self {
            address,
            data,
            received_at: Instant::now(),
        }
    }
}

// ── BusRequest ────────────────────────────────────────────────────────────────

/// Direction of a [`BusRequest`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    /// Query a device; the reply arrives later as a [`Frame`].
    Read,
    /// Push a value to a device.
    Write,
}

/// What a task hands to the transport: one addressed read query or write.
#[derive(Debug, Clone)]
pub struct BusRequest {
    pub address: BusAddress,
    pub kind: RequestKind,
    /// Payload for writes; empty for reads.
    pub data: Vec<u8>,
}

impl BusRequest {
    /// A read query for `address`.
    pub fn read(address: BusAddress) -> Self {
        Self {
            address,
            kind: RequestKind::Read,
            data: Vec::new(),
        }
    }

    /// A write of `data` to `address`.
    pub fn write(address: BusAddress, data: Vec<u8>) -> Self {
        Self {
            address,
            kind: RequestKind::Write,
            data,
        }
    }
}

// ── Link statistics ───────────────────────────────────────────────────────────

/// Link-quality counters reported by the transport.
///
/// Consumed by observability only – the scheduler never branches on these.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LinkStats {
    /// Receive-side errors (framing, checksum, overrun) since link open.
    pub rx_errors: u64,
    /// Transmit-side errors since link open.
    pub tx_errors: u64,
}

// ── Errors ────────────────────────────────────────────────────────────────────

/// Bus-level I/O failure.
///
/// Recovered locally in every case: a failing send marks the owning
/// component defective and the drain loop moves on (see
/// [`CycleScheduler`](crate::scheduler::CycleScheduler)).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The link is not open; nothing can be sent or received.
    #[error("bus link is not open")]
    NotOpen,

    /// The device did not answer within the transport's own deadline.
    #[error("no reply from address {address:#06x} within {timeout_ms} ms")]
    Timeout { address: BusAddress, timeout_ms: u64 },

    /// Any other I/O failure, with the transport's description.
    #[error("bus I/O failed: {0}")]
    Io(String),
}

// ── Transport trait ───────────────────────────────────────────────────────────

/// Contract a concrete bus binding implements.
///
/// All methods are called from multiple execution lanes (the frame-collector
/// loop and the drain loop), so implementations must be `Send + Sync`.
pub trait Transport: Send + Sync {
    /// Whether the link is currently open.
    fn is_open(&self) -> bool;

    /// Drain all frames received since the last call.  Must not block beyond
    /// its own non-blocking receive; may return an empty vector.
    fn receive_all(&self) -> Vec<Frame>;

    /// Send one request on the bus, blocking for the bus round-trip.
    ///
    /// Returns the number of sub-operations actually performed.  Zero with
    /// `Ok` means "nothing to do" and is not a failure.
    fn send(&self, request: &BusRequest) -> Result<usize, TransportError>;

    /// Link-quality counters since the link was opened.
    fn link_stats(&self) -> LinkStats {
        LinkStats::default()
    }
}

// ── Test double ───────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};

    use parking_lot::Mutex;

    use super::*;

    /// In-memory transport used by the collector and scheduler tests.
    ///
    /// Frames queued with [`queue_frame`](Self::queue_frame) are handed out
    /// by the next `receive_all()`; addresses listed in `failing` make
    /// `send()` return a [`TransportError::Timeout`].
    pub(crate) struct StubTransport {
        open: AtomicBool,
        rx_queue: Mutex<Vec<Frame>>,
        sent: Mutex<Vec<BusRequest>>,
        failing: Mutex<HashSet<BusAddress>>,
    }

    impl StubTransport {
        pub(crate) fn new() -> Self {
            Self {
                open: AtomicBool::new(true),
                rx_queue: Mutex::new(Vec::new()),
                sent: Mutex::new(Vec::new()),
                failing: Mutex::new(HashSet::new()),
            }
        }

        pub(crate) fn set_open(&self, open: bool) {
            self.open.store(open, Ordering::SeqCst);
        }

        pub(crate) fn queue_frame(&self, frame: Frame) {
            self.rx_queue.lock().push(frame);
        }

        pub(crate) fn fail_address(&self, address: BusAddress) {
            self.failing.lock().insert(address);
        }

        pub(crate) fn heal_address(&self, address: BusAddress) {
            self.failing.lock().remove(&address);
        }

        pub(crate) fn sent_requests(&self) -> Vec<BusRequest> {
            self.sent.lock().clone()
        }
    }

    impl Transport for StubTransport {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn receive_all(&self) -> Vec<Frame> {
            std::mem::take(&mut *self.rx_queue.lock())
        }

        fn send(&self, request: &BusRequest) -> Result<usize, TransportError> {
            if !self.is_open() {
                return Err(TransportError::NotOpen);
            }
            if self.failing.lock().contains(&request.address) {
                return Err(TransportError::Timeout {
                    address: request.address,
                    timeout_ms: 0,
                });
            }
            self.sent.lock().push(request.clone());
            Ok(1)
        }
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
