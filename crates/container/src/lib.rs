//! Name-keyed store of task definitions.
//!
//! The container organizes task metadata (priority, enabled flag, retry
//! settings) and an opaque parameter blob per task name, independently of
//! live execution. The scheduler crate consumes [`TaskDefinition`]s from here.

pub mod container;
pub mod definition;

pub use container::TaskContainer;
pub use definition::TaskDefinition;
