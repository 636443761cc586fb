//! Scheduler runner -- owns the task registry, drives evaluation and runs bodies.
//!
//! Split into focused submodules:
//! - `core`: Scheduler struct, shared state, constructor, queries and waiting helpers
//! - `control`: public control API (schedule, cancel, delay, dependencies, pause, modes)
//! - `scheduling`: one evaluation pass over the registry
//! - `execution`: tick loop, body dispatch and completion handling

mod control;
mod core;
mod execution;
mod scheduling;

pub use self::core::Scheduler;
