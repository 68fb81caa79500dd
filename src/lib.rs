/*
SPDX-License-Identifier: MIT
*/

//! cyclebus – cycle-synchronized field-bus task scheduling
//!
//! Plans read/write tasks of a shared field-bus link into per-cycle queues
//! and drains them on dedicated worker lanes, synchronized to an external
//! control-cycle clock.
//!
//! Module layout:
//!
//! ```text
//! lib.rs
//! ├── config/     – YAML bridge settings
//! ├── transport/  – bus link abstraction (frames, requests, errors)
//! ├── task.rs     – read / write / wait tasks and their elements
//! ├── worker/     – generic stoppable worker loop
//! ├── collector/  – background frame collection
//! ├── registry/   – component task registration + defective back-off
//! ├── scheduler/  – cycle-synchronized planning and draining
//! └── metrics.rs  – observability sink trait
//! ```
//!
//! A host wires one bridge like this: open a [`transport::Transport`],
//! start a [`collector::FrameCollector`] on it, register component
//! protocols with a [`registry::TaskRegistry`], hand everything to a
//! [`scheduler::CycleScheduler`], and forward the two control-cycle
//! callbacks (`on_before_process_image`, `on_execute_write`) from its
//! cycle clock.

pub mod collector;
pub mod config;
pub mod metrics;
pub mod registry;
pub mod scheduler;
pub mod task;
pub mod transport;
pub mod worker;
