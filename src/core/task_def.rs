//! Serialized FFTS+ task definitions, as emitted by the compiler.

use serde::{Deserialize, Serialize};

/// `AdditionalData::data_type` listing contexts whose first task address is
/// already an absolute device pointer.
pub const MODE_IN_ARGS_FIRST_FIELD: u32 = 1;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FftsPlusTaskDef {
    pub op_index: u32,
    /// Declared number of io-address slots in the argument buffer.
    #[serde(default)]
    pub addr_size: u32,
    #[serde(default)]
    pub ready_context_num: u16,
    #[serde(default)]
    pub prefetch_ost_num: u16,
    #[serde(default)]
    pub contexts: Vec<ContextDef>,
    #[serde(default)]
    pub additional_data: Vec<AdditionalData>,
}

impl FftsPlusTaskDef {
    /// True when `context_id` is listed under `data_type` in the additional data.
    pub fn has_additional(&self, data_type: u32, context_id: usize) -> bool {
        self.additional_data
            .iter()
            .filter(|d| d.data_type == data_type)
            .any(|d| d.context_ids.iter().any(|&id| id as usize == context_id))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdditionalData {
    pub data_type: u32,
    #[serde(default)]
    pub context_ids: Vec<u32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDef {
    pub op_index: u32,
    #[serde(default)]
    pub successors: Vec<u32>,
    #[serde(flatten)]
    pub payload: ContextPayload,
}

impl ContextDef {
    pub fn new(op_index: u32, payload: ContextPayload) -> Self {
        Self {
            op_index,
            successors: Vec::new(),
            payload,
        }
    }

    pub fn with_successors(mut self, successors: impl Into<Vec<u32>>) -> Self {
        self.successors = successors.into();
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ContextPayload {
    Aic(ComputeDef),
    Aiv(ComputeDef),
    MixAic(ComputeDef),
    MixAiv(ComputeDef),
    NotifyWait(NotifyDef),
    NotifyRecord(NotifyDef),
    Sdma(SdmaDef),
    Label,
    CaseSwitch(CaseSwitchDef),
    CaseDefault(CaseSwitchDef),
    CondSwitch(CondSwitchDef),
    AtStart(AtStartDef),
    AtEnd(AtEndDef),
    CachePersist(CachePersistDef),
    WriteValue(WriteValueDef),
    Flush(DataDef),
    Writeback(DataDef),
    AicpuKernel(AicpuDef),
    AicpuFramework(AicpuDef),
    CustomAicpu(AicpuDef),
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeDef {
    /// One entry point for AIC/AIV, two (cube then vector) for mixed kernels.
    pub kernel_names: Vec<String>,
    #[serde(default)]
    pub task_addrs: Vec<u64>,
    #[serde(default)]
    pub block_dim: u32,
    /// Set for dynamic-shape kernels dispatched per tiling key.
    #[serde(default)]
    pub tiling_key: Option<u64>,
    #[serde(default)]
    pub prefix: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotifyDef {
    pub notify_id: u32,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdmaDef {
    pub src_addr: u64,
    pub dst_addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseSwitchDef {
    pub start_label_id: u32,
    pub label_list_len: u32,
    #[serde(default)]
    pub load_addr: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CondSwitchDef {
    pub condition: u32,
    #[serde(default)]
    pub load_addr0: u64,
    #[serde(default)]
    pub load_addr1: u64,
    #[serde(default)]
    pub true_successors: Vec<u32>,
    #[serde(default)]
    pub false_successors: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtStartDef {
    pub thread_id: u16,
    pub thread_dim: u16,
    #[serde(default)]
    pub thread_window_size: u16,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AtEndDef {
    #[serde(default)]
    pub at_start_slots: Vec<u32>,
    #[serde(default)]
    pub out_label_slots: Vec<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachePersistDef {
    pub persistent_id: u32,
    pub addr: u64,
    pub size: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct WriteValueDef {
    pub write_addr: u64,
    pub value: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataDef {
    pub src_addr: u64,
    pub len: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AicpuDef {
    pub kernel_id: u64,
    #[serde(default)]
    pub so_name: String,
    #[serde(default)]
    pub kernel_name: String,
    #[serde(default)]
    pub task_addrs: Vec<u64>,
    #[serde(default)]
    pub ext_info: Vec<u8>,
}
