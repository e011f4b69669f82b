use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

use crate::core::kernel_bin::KernelBin;

/// Attribute names read by the registry, the translator and the dump logic.
pub mod attrs {
    /// Op is registered as one "all-kernel" binary and dispatched by tiling key.
    pub const ALL_KERNEL: &str = "_all_kernel";
    /// Op is thread-sliced: one binary per FFTS+ thread.
    pub const THREAD_SLICED: &str = "_ffts_thread_sliced";
    /// Per-thread kernel (and stub) names.
    pub const THREAD_KERNEL_NAME: &str = "_thread_kernelname";
    /// Per-thread binary magic tags.
    pub const THREAD_MAGIC: &str = "_thread_tvm_magic";
    /// Prefixed: entry-point name of the kernel.
    pub const KERNEL_NAME: &str = "_kernelname";
    /// Prefixed: name of the binary in the model kernel store.
    pub const KERNEL_BIN_NAME: &str = "_kernel_bin_name";
    /// Prefixed: binary magic tag.
    pub const MAGIC: &str = "tvm_magic";
    /// Prefixed: metadata string attached to a registered binary.
    pub const METADATA: &str = "tvm_metadata";
    /// Per-op dump request.
    pub const DUMP_FLAG: &str = "_dump_flag";
    /// Names of the original ops fused into this one.
    pub const ORIGINAL_OP_NAMES: &str = "_original_op_names";
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AttrValue {
    Bool(bool),
    Int(i64),
    Str(String),
    ListInt(Vec<i64>),
    ListStr(Vec<String>),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TensorDesc {
    #[serde(default)]
    pub name: String,
    pub size: u64,
    /// Compiled (logical) address; resolved against the runtime memory layout.
    pub logical_addr: u64,
    #[serde(default)]
    pub cache_persistent: bool,
}

/// One op of the compiled model, as resolved by the model loader.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OpDesc {
    pub index: u32,
    pub name: String,
    pub op_type: String,
    #[serde(default)]
    pub inputs: Vec<TensorDesc>,
    #[serde(default)]
    pub outputs: Vec<TensorDesc>,
    /// Logical addresses of the op's workspace tensors.
    #[serde(default)]
    pub workspaces: Vec<u64>,
    #[serde(default)]
    pub workspace_bytes: Vec<u64>,
    #[serde(default)]
    pub attrs: HashMap<String, AttrValue>,
    /// Binaries attached directly to the op, keyed by kernel prefix ("" for the plain kernel).
    #[serde(skip)]
    pub kernel_bins: HashMap<String, Arc<KernelBin>>,
    #[serde(skip)]
    pub thread_kernels: Vec<Arc<KernelBin>>,
}

impl OpDesc {
    pub fn new(index: u32, name: impl Into<String>, op_type: impl Into<String>) -> Self {
        Self {
            index,
            name: name.into(),
            op_type: op_type.into(),
            ..Default::default()
        }
    }

    pub fn with_attr(mut self, name: impl Into<String>, value: AttrValue) -> Self {
        self.attrs.insert(name.into(), value);
        self
    }

    pub fn with_kernel(mut self, prefix: impl Into<String>, kernel: Arc<KernelBin>) -> Self {
        self.kernel_bins.insert(prefix.into(), kernel);
        self
    }

    pub fn attr(&self, name: &str) -> Option<&AttrValue> {
        self.attrs.get(name)
    }

    pub fn attr_str(&self, name: &str) -> Option<&str> {
        match self.attrs.get(name) {
            Some(AttrValue::Str(s)) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn attr_bool(&self, name: &str) -> bool {
        match self.attrs.get(name) {
            Some(AttrValue::Bool(b)) => *b,
            Some(AttrValue::Int(i)) => *i != 0,
            _ => false,
        }
    }

    pub fn attr_list_str(&self, name: &str) -> Option<&[String]> {
        match self.attrs.get(name) {
            Some(AttrValue::ListStr(list)) => Some(list.as_slice()),
            _ => None,
        }
    }

    pub fn kernel_bin(&self, prefix: &str) -> Option<Arc<KernelBin>> {
        self.kernel_bins.get(prefix).cloned()
    }

    pub fn is_all_kernel(&self) -> bool {
        self.attr_bool(attrs::ALL_KERNEL)
    }

    pub fn is_thread_sliced(&self) -> bool {
        self.attr_bool(attrs::THREAD_SLICED)
    }

    /// Original op names when this op is the product of a fusion.
    pub fn original_op_names(&self) -> &[String] {
        self.attr_list_str(attrs::ORIGINAL_OP_NAMES).unwrap_or(&[])
    }
}

/// Resolved op table of a model, indexed by op index.
#[derive(Debug, Clone, Default)]
pub struct OpTable {
    ops: HashMap<u32, Arc<OpDesc>>,
}

impl OpTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, op: OpDesc) -> Arc<OpDesc> {
        let op = Arc::new(op);
        self.ops.insert(op.index, Arc::clone(&op));
        op
    }

    pub fn get(&self, index: u32) -> Option<Arc<OpDesc>> {
        self.ops.get(&index).cloned()
    }

    pub fn indices(&self) -> impl Iterator<Item = u32> + '_ {
        self.ops.keys().copied()
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }
}

impl FromIterator<OpDesc> for OpTable {
    fn from_iter<I: IntoIterator<Item = OpDesc>>(iter: I) -> Self {
        let mut table = OpTable::new();
        for op in iter {
            table.insert(op);
        }
        table
    }
}
