//! # Core Abstractions
//!
//! The model-side data the task builder consumes.
//!
//! - **[`op`]:** Resolved ops, tensors and attributes, indexed by op index.
//! - **[`task_def`]:** Serialized FFTS+ task definitions as emitted by the compiler.
//! - **[`context`]:** The hardware context arena a task definition is translated into.
//! - **[`kernel_bin`]:** Compiled kernel binaries shipped with the model.
//! - **[`config`]:** Session scoping and dump switches.

pub mod op;
pub mod task_def;
pub mod context;
pub mod kernel_bin;
pub mod config;
pub mod loader;
