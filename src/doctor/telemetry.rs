use serde::{Deserialize, Serialize};

/// An op whose launch arguments must be dumped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpTaskRecord {
    pub op_index: u32,
    pub op_name: String,
    pub task_id: u32,
    pub stream_id: u32,
    /// Device address of the op's first argument slot.
    pub args_addr: u64,
    pub args_offset: usize,
    pub op_debug: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpProfileRecord {
    pub op_index: u32,
    pub op_name: String,
    pub op_type: String,
    pub task_id: u32,
    pub stream_id: u32,
    pub task_type: String,
}

/// Aggregate record of one launched FFTS+ task.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskProfileRecord {
    pub op_index: u32,
    pub task_id: u32,
    pub stream_id: u32,
    pub context_num: u16,
    /// Original op names when the task is the product of a fusion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub fused_op_names: Vec<String>,
}

/// Original ops fused into one task op.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FusionGroupRecord {
    pub op_name: String,
    pub original_op_names: Vec<String>,
}

pub fn log_record<T: Serialize>(kind: &str, record: &T) {
    let json = serde_json::to_string(record).unwrap_or_default();
    tracing::debug!(target: "fftsplus::telemetry", kind, "{json}");
}
