/*
SPDX-License-Identifier: MIT
*/

//! Structured error types for task execution.
//!
//! A failing task never stops the scheduler.  The drain loop inspects the
//! variant, marks the owning component defective, invalidates the task's
//! elements and proceeds to the next task – nothing in this crate is fatal.
//!
//! | Variant | Meaning | Scheduler reaction |
//! |---|---|---|
//! | `Transport` | bus-level I/O failure | mark defective, set communication-failed |
//! | `Execution` | the task ran but failed | mark defective, set communication-failed |
//! | `ProtocolMismatch` | frame address not owned by the task | logged; a logic bug in the device driver, non-fatal |

use thiserror::Error;

use crate::transport::{BusAddress, TransportError};

/// Why a task execution failed.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The underlying bus transport failed.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The task ran but could not complete its sub-operations.
    #[error("task execution failed: {reason}")]
    Execution { reason: String },

    /// A delivered frame carries an address the task's protocol does not
    /// declare.  Treated as a logic bug in the registering driver: logged
    /// with a warning, never fatal.
    #[error("frame address {address:#06x} is not part of this task's protocol")]
    ProtocolMismatch { address: BusAddress },
}
