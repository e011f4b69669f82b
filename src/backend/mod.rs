//! Accelerator runtime seam.
//!
//! Every hardware entry point the task builder and the kernel registry call
//! goes through [`DeviceRuntime`]. Calls are blocking and return [`RtResult`].

use std::sync::Arc;

use crate::core::context::{DispatchInfo, FftsPlusSqe, HardwareContext};
use crate::error::RtResult;

pub mod simulated;

pub use simulated::SimulatedRuntime;

/// Device address.
pub type DevicePtr = u64;

/// Handle of a binary registered with the runtime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct BinHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct StreamId(pub u32);

/// Binary format tag understood by the runtime loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum BinaryMagic {
    #[default]
    Elf,
    AiVec,
    AiCube,
}

impl BinaryMagic {
    pub fn value(self) -> u32 {
        match self {
            BinaryMagic::Elf => 0x4355_4245,
            BinaryMagic::AiVec => 0x4141_5246,
            BinaryMagic::AiCube => 0x4149_4343,
        }
    }

    /// Parses the tag string carried in op attributes.
    pub fn from_attr(tag: &str) -> Option<Self> {
        match tag {
            "RT_DEV_BINARY_MAGIC_ELF" => Some(BinaryMagic::Elf),
            "RT_DEV_BINARY_MAGIC_ELF_AIVEC" => Some(BinaryMagic::AiVec),
            "RT_DEV_BINARY_MAGIC_ELF_AICUBE" => Some(BinaryMagic::AiCube),
            _ => None,
        }
    }
}

/// A binary ready to hand to the runtime.
#[derive(Debug, Clone)]
pub struct DevBinary {
    pub magic: BinaryMagic,
    pub version: u32,
    pub data: Arc<[u8]>,
}

/// Everything one FFTS+ launch needs.
#[derive(Debug)]
pub struct LaunchRequest<'a> {
    pub sqe: FftsPlusSqe,
    pub contexts: &'a [HardwareContext],
    pub args: DevicePtr,
    pub args_size: usize,
    pub stream: StreamId,
    pub dump: bool,
}

/// Task and stream ids assigned by the runtime to the last launch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LaunchIds {
    pub task_id: u32,
    pub stream_id: u32,
}

pub trait DeviceRuntime: Send + Sync {
    fn malloc(&self, size: usize) -> RtResult<DevicePtr>;

    fn free(&self, ptr: DevicePtr) -> RtResult<()>;

    /// Copies `src` into `dst`; `dst_max` is the capacity of the destination.
    fn memcpy_h2d(&self, dst: DevicePtr, dst_max: usize, src: &[u8]) -> RtResult<()>;

    /// Cache-residency hint for a persistent tensor.
    fn advise_cache_persist(&self, addr: DevicePtr, size: u64) -> RtResult<()>;

    fn launch_ffts_plus(&self, req: &LaunchRequest<'_>) -> RtResult<()>;

    fn task_and_stream_id(&self) -> RtResult<LaunchIds>;

    fn register_binary(&self, bin: &DevBinary) -> RtResult<BinHandle>;

    /// Registers a dynamic-shape binary whose entry points are selected per tiling key.
    fn register_all_kernel(&self, bin: &DevBinary) -> RtResult<BinHandle>;

    fn unregister_binary(&self, handle: BinHandle) -> RtResult<()>;

    fn register_metadata(&self, handle: BinHandle, metadata: &str) -> RtResult<()>;

    fn function_registered(&self, stub: &str) -> bool;

    fn register_function(&self, handle: BinHandle, stub: &str, kernel_name: &str) -> RtResult<()>;

    fn addr_and_pref_cnt(&self, stub: &str) -> RtResult<DispatchInfo>;

    fn addr_and_pref_cnt_by_tiling_key(&self, handle: BinHandle, tiling_key: u64) -> RtResult<DispatchInfo>;

    /// Loads a custom AICPU shared object; returns its device handle.
    fn load_custom_aicpu(&self, so_name: &str, bin: &[u8]) -> RtResult<DevicePtr>;

    fn create_aicpu_session(&self, session_id: u64, kernel_id: u64) -> RtResult<()>;
}
