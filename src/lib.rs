//! # fftsplus: FFTS+ Task Builder and Kernel Binary Registry
//!
//! Turns compiled accelerator tasks into FFTS+ task descriptors (a DAG of
//! typed hardware contexts with a resolved argument buffer), launches them,
//! and keeps a process-wide, reference-counted registry of kernel binaries.
//!
//! ## Core Modules
//!
//! - **[`core`]**: Ops, serialized task definitions, the hardware context arena, configuration.
//! - **[`runtime`]**: [`FftsPlusTaskBuilder`], [`KernelBinaryRegistry`] and the shared [`HandleStore`].
//! - **[`backend`]**: The [`DeviceRuntime`] seam and a host-memory [`SimulatedRuntime`].
//! - **[`doctor`]**: Dump and profiling records for downstream consumers.

pub mod backend;
pub mod core;
pub mod doctor;
pub mod error;
pub mod runtime;

pub use crate::backend::{DeviceRuntime, SimulatedRuntime, StreamId};
pub use crate::core::config::{DumpProperties, LoaderConfig};
pub use crate::core::context::{ContextKind, HardwareContext};
pub use crate::core::kernel_bin::{KernelBin, KernelStore};
pub use crate::core::op::{AttrValue, OpDesc, OpTable, TensorDesc};
pub use crate::core::task_def::{ContextDef, ContextPayload, FftsPlusTaskDef};
pub use crate::doctor::Recorder;
pub use crate::error::{Error, Result, StatusKind};
pub use crate::runtime::{
    init_all, FftsPlusTaskBuilder, HandleStore, KernelBinaryRegistry, ModelAddressMap, ModelContext, RuntimeParam,
    StandardTranslator, TaskState,
};
