use std::collections::{BTreeSet, HashMap};

use crate::backend::DevicePtr;
use crate::core::context::{FftsPlusSqe, HardwareContext};
use crate::doctor::FusionGroupRecord;
use crate::runtime::memory::DeviceBuffer;

pub const ADDR_WIDTH: usize = std::mem::size_of::<u64>();

/// Hardware task descriptor owned by one builder.
#[derive(Debug, Default)]
pub struct TaskDescriptor {
    pub sqe: FftsPlusSqe,
    /// Context arena; successor lists index into it.
    pub contexts: Vec<HardwareContext>,
    pub args: Option<DeviceBuffer>,
    /// Declared number of io-address slots.
    pub addr_size: usize,
    /// Byte size of the argument buffer.
    pub args_size: usize,
    pub io_addrs: Vec<u64>,
    /// Indices into `io_addrs` that already hold device pointers.
    pub absolute: BTreeSet<usize>,
    /// Byte offset of each op's first argument slot.
    pub args_offsets: HashMap<String, usize>,
    pub ext_info: Vec<DeviceBuffer>,
    pub fusion_groups: Vec<FusionGroupRecord>,
    pub dump: bool,
}

impl TaskDescriptor {
    pub fn args_ptr(&self) -> DevicePtr {
        self.args.as_ref().map_or(0, DeviceBuffer::ptr)
    }

    /// Bytes the current io-address list occupies.
    pub fn required_args_size(&self) -> usize {
        ADDR_WIDTH * self.io_addrs.len()
    }

    pub fn args_sufficient(&self) -> bool {
        self.args_size >= self.required_args_size()
    }

    /// Frees every owned device buffer and resets the descriptor.
    pub fn clear(&mut self) {
        *self = Self::default();
    }
}
