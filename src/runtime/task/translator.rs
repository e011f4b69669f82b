//! Translation of serialized context records into hardware contexts.

use std::sync::Arc;

use crate::backend::DevicePtr;
use crate::core::context::*;
use crate::core::op::OpDesc;
use crate::core::task_def::{AicpuDef, ComputeDef, ContextDef, ContextPayload, FftsPlusTaskDef, MODE_IN_ARGS_FIRST_FIELD};
use crate::error::{Error, Result};
use crate::runtime::kernel::{MIX_AIC_PREFIX, MIX_AIV_PREFIX};

/// Capabilities a translator may call while building one context.
pub trait ContextEnv {
    fn resolve_addr(&self, logical: u64) -> Result<DevicePtr>;

    /// Dispatch info of a static kernel, or of one tiling-key specialization.
    fn kernel_dispatch(&self, op: &OpDesc, kernel_name: &str, prefix: &str, tiling_key: Option<u64>) -> Result<DispatchInfo>;

    fn find_op(&self, index: u32) -> Result<Arc<OpDesc>>;

    fn io_addr_count(&self) -> usize;

    /// Appends one io address; `absolute` addresses skip resolution.
    fn push_io_addr(&mut self, addr: u64, absolute: bool);

    /// Records the byte offset of an op's first argument slot.
    fn record_dump_offset(&mut self, op_name: &str, offset: usize);

    fn session_id(&self) -> u64;

    fn create_aicpu_session(&self, kernel_id: u64) -> Result<()>;

    fn load_custom_aicpu(&self, op: &OpDesc, so_name: &str) -> Result<DevicePtr>;

    /// Copies an extension-info block to device memory owned by the task.
    fn alloc_ext_info(&mut self, data: &[u8]) -> Result<DevicePtr>;
}

pub trait ContextTranslator: Send + Sync {
    fn translate(
        &self,
        def: &ContextDef,
        task: &FftsPlusTaskDef,
        index: usize,
        env: &mut dyn ContextEnv,
    ) -> Result<HardwareContext>;
}

fn to_indices(list: &[u32]) -> Result<Vec<u16>> {
    list.iter()
        .map(|&i| u16::try_from(i).map_err(|_| Error::Failed(format!("context index {i} exceeds the hardware range"))))
        .collect()
}

/// Zero stays zero: optional control-flow load addresses.
fn resolve_optional(env: &dyn ContextEnv, addr: u64) -> Result<DevicePtr> {
    if addr == 0 {
        Ok(0)
    } else {
        env.resolve_addr(addr)
    }
}

/// One translation per context kind.
#[derive(Debug, Default, Clone, Copy)]
pub struct StandardTranslator;

impl StandardTranslator {
    fn compute(
        &self,
        def: &ContextDef,
        compute: &ComputeDef,
        engine: ComputeEngine,
        mode_first: bool,
        env: &mut dyn ContextEnv,
    ) -> Result<ContextKind> {
        let op = env.find_op(def.op_index)?;
        let args_offset = env.io_addr_count() * std::mem::size_of::<u64>();
        env.record_dump_offset(&op.name, args_offset);
        for (i, &addr) in compute.task_addrs.iter().enumerate() {
            env.push_io_addr(addr, mode_first && i == 0);
        }
        for &ws in &op.workspaces {
            env.push_io_addr(ws, false);
        }

        let kernels = match compute.tiling_key {
            // mixed all-kernel binaries are registered per engine prefix, cube then vector
            Some(key) if engine.is_mixed() => [MIX_AIC_PREFIX, MIX_AIV_PREFIX]
                .iter()
                .map(|prefix| env.kernel_dispatch(&op, "", prefix, Some(key)))
                .collect::<Result<Vec<_>>>()?,
            Some(key) => vec![env.kernel_dispatch(&op, "", &compute.prefix, Some(key))?],
            None => {
                let expected = if engine.is_mixed() { 2 } else { 1 };
                if compute.kernel_names.len() < expected {
                    return Err(Error::Internal(format!(
                        "op {}: {:?} context needs {expected} kernel names, got {}",
                        op.name,
                        engine,
                        compute.kernel_names.len()
                    )));
                }
                compute
                    .kernel_names
                    .iter()
                    .take(expected)
                    .map(|name| env.kernel_dispatch(&op, name, &compute.prefix, None))
                    .collect::<Result<Vec<_>>>()?
            }
        };
        Ok(ContextKind::Compute(ComputeContext {
            engine,
            args_offset,
            block_dim: compute.block_dim,
            kernels,
        }))
    }

    fn aicpu(&self, def: &ContextDef, aicpu: &AicpuDef, kind: AicpuKind, mode_first: bool, env: &mut dyn ContextEnv) -> Result<ContextKind> {
        let op = env.find_op(def.op_index)?;
        let args_offset = env.io_addr_count() * std::mem::size_of::<u64>();
        env.record_dump_offset(&op.name, args_offset);
        for (i, &addr) in aicpu.task_addrs.iter().enumerate() {
            env.push_io_addr(addr, mode_first && i == 0);
        }
        match kind {
            AicpuKind::Custom => {
                env.load_custom_aicpu(&op, &aicpu.so_name)?;
            }
            AicpuKind::Kernel | AicpuKind::Framework => env.create_aicpu_session(aicpu.kernel_id)?,
        }
        let ext_info_addr = if aicpu.ext_info.is_empty() {
            0
        } else {
            env.alloc_ext_info(&aicpu.ext_info)?
        };
        Ok(ContextKind::HostOffload(AicpuContext {
            kind,
            kernel_id: aicpu.kernel_id,
            args_offset,
            ext_info_addr,
        }))
    }
}

impl ContextTranslator for StandardTranslator {
    fn translate(
        &self,
        def: &ContextDef,
        task: &FftsPlusTaskDef,
        index: usize,
        env: &mut dyn ContextEnv,
    ) -> Result<HardwareContext> {
        let mode_first = task.has_additional(MODE_IN_ARGS_FIRST_FIELD, index);
        let kind = match &def.payload {
            ContextPayload::Aic(c) => self.compute(def, c, ComputeEngine::Aic, mode_first, env)?,
            ContextPayload::Aiv(c) => self.compute(def, c, ComputeEngine::Aiv, mode_first, env)?,
            ContextPayload::MixAic(c) => self.compute(def, c, ComputeEngine::MixAic, mode_first, env)?,
            ContextPayload::MixAiv(c) => self.compute(def, c, ComputeEngine::MixAiv, mode_first, env)?,
            ContextPayload::NotifyWait(n) => ContextKind::Sync(SyncContext {
                op: SyncOp::NotifyWait,
                notify_id: n.notify_id,
            }),
            ContextPayload::NotifyRecord(n) => ContextKind::Sync(SyncContext {
                op: SyncOp::NotifyRecord,
                notify_id: n.notify_id,
            }),
            ContextPayload::Sdma(s) => ContextKind::MemoryMove(SdmaContext {
                src_addr: env.resolve_addr(s.src_addr)?,
                dst_addr: env.resolve_addr(s.dst_addr)?,
                len: s.len,
            }),
            ContextPayload::Label => ContextKind::ControlFlow(ControlFlowContext::Label),
            ContextPayload::CaseSwitch(c) => ContextKind::ControlFlow(ControlFlowContext::CaseSwitch {
                start_label_id: c.start_label_id,
                label_list_len: c.label_list_len,
                load_addr: resolve_optional(env, c.load_addr)?,
            }),
            ContextPayload::CaseDefault(c) => ContextKind::ControlFlow(ControlFlowContext::CaseDefault {
                start_label_id: c.start_label_id,
                label_list_len: c.label_list_len,
            }),
            ContextPayload::CondSwitch(c) => ContextKind::ControlFlow(ControlFlowContext::CondSwitch {
                condition: c.condition,
                load_addr0: resolve_optional(env, c.load_addr0)?,
                load_addr1: resolve_optional(env, c.load_addr1)?,
                true_successors: to_indices(&c.true_successors)?,
                false_successors: to_indices(&c.false_successors)?,
            }),
            ContextPayload::AtStart(a) => ContextKind::ControlFlow(ControlFlowContext::AtStart {
                thread_id: a.thread_id,
                thread_dim: a.thread_dim,
                thread_window_size: a.thread_window_size,
            }),
            ContextPayload::AtEnd(a) => ContextKind::ControlFlow(ControlFlowContext::AtEnd {
                at_start_slots: to_indices(&a.at_start_slots)?,
                out_label_slots: to_indices(&a.out_label_slots)?,
            }),
            ContextPayload::CachePersist(c) => ContextKind::CachePersist(CachePersistContext {
                persistent_id: c.persistent_id,
                addr: env.resolve_addr(c.addr)?,
                size: c.size,
            }),
            ContextPayload::WriteValue(w) => ContextKind::WriteValue(WriteValueContext {
                write_addr: env.resolve_addr(w.write_addr)?,
                value: w.value,
            }),
            ContextPayload::Flush(d) => ContextKind::DataMove(DataMoveContext {
                op: DataMoveOp::Flush,
                src_addr: env.resolve_addr(d.src_addr)?,
                len: d.len,
            }),
            ContextPayload::Writeback(d) => ContextKind::DataMove(DataMoveContext {
                op: DataMoveOp::Writeback,
                src_addr: env.resolve_addr(d.src_addr)?,
                len: d.len,
            }),
            ContextPayload::AicpuKernel(a) => self.aicpu(def, a, AicpuKind::Kernel, mode_first, env)?,
            ContextPayload::AicpuFramework(a) => self.aicpu(def, a, AicpuKind::Framework, mode_first, env)?,
            ContextPayload::CustomAicpu(a) => self.aicpu(def, a, AicpuKind::Custom, mode_first, env)?,
        };
        tracing::debug!(index, op_index = def.op_index, kind = kind.type_name(), "context translated");
        Ok(HardwareContext::new(def.op_index, to_indices(&def.successors)?, kind))
    }
}
