//! Hardware execution contexts of one FFTS+ task.
//!
//! A task is an arena of [`HardwareContext`] values; edges are indices into
//! that arena, so range checks do not depend on where the arena lives.

/// Entry address and prefetch count of a registered kernel.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct DispatchInfo {
    pub addr: u64,
    pub pref_cnt: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HardwareContext {
    pub op_index: u32,
    pub successors: Vec<u16>,
    /// Number of contexts listing this one as a successor.
    pub pred_cnt: u16,
    pub kind: ContextKind,
}

impl HardwareContext {
    pub fn new(op_index: u32, successors: Vec<u16>, kind: ContextKind) -> Self {
        Self {
            op_index,
            successors,
            pred_cnt: 0,
            kind,
        }
    }

    /// Every context index this context refers to: its successor list plus
    /// the branch and slot lists carried by control-flow payloads.
    pub fn referenced_indices(&self) -> impl Iterator<Item = u16> + '_ {
        let (first, second): (&[u16], &[u16]) = match &self.kind {
            ContextKind::ControlFlow(ControlFlowContext::CondSwitch { true_successors, false_successors, .. }) => {
                (true_successors.as_slice(), false_successors.as_slice())
            }
            ContextKind::ControlFlow(ControlFlowContext::AtEnd { at_start_slots, out_label_slots }) => {
                (at_start_slots.as_slice(), out_label_slots.as_slice())
            }
            _ => (&[], &[]),
        };
        self.successors.iter().chain(first).chain(second).copied()
    }

    pub fn type_name(&self) -> &'static str {
        self.kind.type_name()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ContextKind {
    Compute(ComputeContext),
    Sync(SyncContext),
    MemoryMove(SdmaContext),
    ControlFlow(ControlFlowContext),
    CachePersist(CachePersistContext),
    WriteValue(WriteValueContext),
    DataMove(DataMoveContext),
    HostOffload(AicpuContext),
}

impl ContextKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ContextKind::Compute(c) => match c.engine {
                ComputeEngine::Aic => "aic",
                ComputeEngine::Aiv => "aiv",
                ComputeEngine::MixAic => "mix_aic",
                ComputeEngine::MixAiv => "mix_aiv",
            },
            ContextKind::Sync(s) => match s.op {
                SyncOp::NotifyWait => "notify_wait",
                SyncOp::NotifyRecord => "notify_record",
            },
            ContextKind::MemoryMove(_) => "sdma",
            ContextKind::ControlFlow(cf) => match cf {
                ControlFlowContext::Label => "label",
                ControlFlowContext::CaseSwitch { .. } => "case_switch",
                ControlFlowContext::CaseDefault { .. } => "case_default",
                ControlFlowContext::CondSwitch { .. } => "cond_switch",
                ControlFlowContext::AtStart { .. } => "at_start",
                ControlFlowContext::AtEnd { .. } => "at_end",
            },
            ContextKind::CachePersist(_) => "cache_persist",
            ContextKind::WriteValue(_) => "write_value",
            ContextKind::DataMove(d) => match d.op {
                DataMoveOp::Flush => "flush",
                DataMoveOp::Writeback => "writeback",
            },
            ContextKind::HostOffload(a) => match a.kind {
                AicpuKind::Kernel => "aicpu_kernel",
                AicpuKind::Framework => "aicpu_framework",
                AicpuKind::Custom => "custom_aicpu",
            },
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComputeEngine {
    Aic,
    Aiv,
    MixAic,
    MixAiv,
}

impl ComputeEngine {
    pub fn is_mixed(self) -> bool {
        matches!(self, ComputeEngine::MixAic | ComputeEngine::MixAiv)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ComputeContext {
    pub engine: ComputeEngine,
    /// Byte offset of this context's parameters inside the task argument buffer.
    pub args_offset: usize,
    pub block_dim: u32,
    /// One dispatch entry per kernel; mixed kernels carry cube then vector.
    pub kernels: Vec<DispatchInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOp {
    NotifyWait,
    NotifyRecord,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncContext {
    pub op: SyncOp,
    pub notify_id: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SdmaContext {
    pub src_addr: u64,
    pub dst_addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlFlowContext {
    Label,
    CaseSwitch { start_label_id: u32, label_list_len: u32, load_addr: u64 },
    CaseDefault { start_label_id: u32, label_list_len: u32 },
    CondSwitch {
        condition: u32,
        load_addr0: u64,
        load_addr1: u64,
        true_successors: Vec<u16>,
        false_successors: Vec<u16>,
    },
    AtStart { thread_id: u16, thread_dim: u16, thread_window_size: u16 },
    AtEnd { at_start_slots: Vec<u16>, out_label_slots: Vec<u16> },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachePersistContext {
    pub persistent_id: u32,
    pub addr: u64,
    pub size: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteValueContext {
    pub write_addr: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataMoveOp {
    Flush,
    Writeback,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataMoveContext {
    pub op: DataMoveOp,
    pub src_addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AicpuKind {
    Kernel,
    Framework,
    Custom,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AicpuContext {
    pub kind: AicpuKind,
    pub kernel_id: u64,
    pub args_offset: usize,
    /// Device address of the extension-info block, 0 when the kernel has none.
    pub ext_info_addr: u64,
}

/// Submission header of an FFTS+ task.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FftsPlusSqe {
    pub total_context_num: u16,
    pub ready_context_num: u16,
    pub prefetch_ost_num: u16,
}
