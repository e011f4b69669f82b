//! FFTS+ task builder.
//!
//! One [`FftsPlusTaskBuilder`] turns one compiled task definition into a
//! hardware task descriptor, launches it and releases it again:
//!
//! ```text
//! Uninitialized --init--> Initialized --distribute--> Distributed
//!       \                     \                           \
//!        `-------------------- `-------- release ----------`--> Released
//! ```
//!
//! A failing `init` releases everything it built before returning.

use rayon::prelude::*;
use std::collections::HashSet;
use std::sync::Arc;

use crate::backend::{DevicePtr, DeviceRuntime, LaunchIds, StreamId};
use crate::core::context::{DispatchInfo, FftsPlusSqe};
use crate::core::op::OpDesc;
use crate::core::task_def::FftsPlusTaskDef;
use crate::doctor::FusionGroupRecord;
use crate::error::{Error, Result, RtResultExt};
use crate::runtime::memory::DeviceBuffer;
use crate::runtime::model::ModelContext;

pub mod args;
pub mod descriptor;
pub mod launcher;
pub mod post;
pub mod translator;

pub use descriptor::{TaskDescriptor, ADDR_WIDTH};
pub use translator::{ContextEnv, ContextTranslator, StandardTranslator};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Uninitialized,
    Initialized,
    Distributed,
    Released,
}

pub struct FftsPlusTaskBuilder {
    runtime: Arc<dyn DeviceRuntime>,
    translator: Arc<dyn ContextTranslator>,
    stream: StreamId,
    state: TaskState,
    desc: TaskDescriptor,
    model: Option<Arc<ModelContext>>,
    op_index: u32,
    launch_ids: LaunchIds,
}

/// Capabilities handed to the translator during `init`.
struct TranslateEnv<'a> {
    model: &'a ModelContext,
    runtime: &'a Arc<dyn DeviceRuntime>,
    desc: &'a mut TaskDescriptor,
}

impl ContextEnv for TranslateEnv<'_> {
    fn resolve_addr(&self, logical: u64) -> Result<DevicePtr> {
        self.model.addresses.resolve(logical)
    }

    fn kernel_dispatch(&self, op: &OpDesc, kernel_name: &str, prefix: &str, tiling_key: Option<u64>) -> Result<DispatchInfo> {
        match tiling_key {
            Some(key) => self.model.kernels.addr_and_pref_cnt_by_tiling_key(op, key, prefix),
            None => self.model.kernels.addr_and_pref_cnt(kernel_name),
        }
    }

    fn find_op(&self, index: u32) -> Result<Arc<OpDesc>> {
        self.model
            .ops
            .get(index)
            .ok_or_else(|| Error::ParamInvalid(format!("op index {index} not found")))
    }

    fn io_addr_count(&self) -> usize {
        self.desc.io_addrs.len()
    }

    fn push_io_addr(&mut self, addr: u64, absolute: bool) {
        if absolute {
            self.desc.absolute.insert(self.desc.io_addrs.len());
        }
        self.desc.io_addrs.push(addr);
    }

    fn record_dump_offset(&mut self, op_name: &str, offset: usize) {
        self.desc.args_offsets.entry(op_name.to_string()).or_insert(offset);
    }

    fn session_id(&self) -> u64 {
        self.model.session_id
    }

    fn create_aicpu_session(&self, kernel_id: u64) -> Result<()> {
        self.model.aicpu.ensure_session(self.session_id(), kernel_id)
    }

    fn load_custom_aicpu(&self, op: &OpDesc, so_name: &str) -> Result<DevicePtr> {
        self.model.aicpu.load_custom(op, so_name)
    }

    fn alloc_ext_info(&mut self, data: &[u8]) -> Result<DevicePtr> {
        let buf = DeviceBuffer::from_host(self.runtime, data)?;
        let ptr = buf.ptr();
        self.desc.ext_info.push(buf);
        Ok(ptr)
    }
}

impl FftsPlusTaskBuilder {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, translator: Arc<dyn ContextTranslator>, stream: StreamId) -> Self {
        Self {
            runtime,
            translator,
            stream,
            state: TaskState::Uninitialized,
            desc: TaskDescriptor::default(),
            model: None,
            op_index: 0,
            launch_ids: LaunchIds::default(),
        }
    }

    /// Builder using [`StandardTranslator`].
    pub fn standard(runtime: Arc<dyn DeviceRuntime>, stream: StreamId) -> Self {
        Self::new(runtime, Arc::new(StandardTranslator), stream)
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    pub fn descriptor(&self) -> &TaskDescriptor {
        &self.desc
    }

    pub fn launch_ids(&self) -> LaunchIds {
        self.launch_ids
    }

    #[tracing::instrument(skip(self, def, model), fields(op_index = def.op_index, contexts = def.contexts.len()))]
    pub fn init(&mut self, def: &FftsPlusTaskDef, model: &Arc<ModelContext>) -> Result<()> {
        if self.state != TaskState::Uninitialized {
            return Err(Error::Internal(format!("init called in state {:?}", self.state)));
        }
        self.model = Some(Arc::clone(model));
        self.op_index = def.op_index;
        match self.build(def, model) {
            Ok(()) => {
                self.state = TaskState::Initialized;
                tracing::info!(
                    contexts = self.desc.contexts.len(),
                    io_addrs = self.desc.io_addrs.len(),
                    "ffts+ task initialized"
                );
                Ok(())
            }
            Err(e) => {
                tracing::error!(kind = ?e.kind(), "ffts+ task init failed: {e}");
                self.release();
                Err(e)
            }
        }
    }

    fn build(&mut self, def: &FftsPlusTaskDef, model: &ModelContext) -> Result<()> {
        let op = model
            .ops
            .get(def.op_index)
            .ok_or_else(|| Error::ParamInvalid(format!("op index {} not found", def.op_index)))?;

        for input in op.inputs.iter().filter(|t| t.cache_persistent) {
            let addr = model.addresses.resolve(input.logical_addr)?;
            self.runtime
                .advise_cache_persist(addr, input.size)
                .or_failed("advise_cache_persist")?;
        }

        self.desc.addr_size = def.addr_size as usize;
        self.desc.args_size = ADDR_WIDTH * self.desc.addr_size;
        if self.desc.args_size > 0 {
            self.desc.args = Some(DeviceBuffer::alloc(&self.runtime, self.desc.args_size)?);
        }

        let total = def.contexts.len();
        if total > usize::from(u16::MAX) {
            return Err(Error::Failed(format!("{total} contexts exceed the hardware limit")));
        }
        let mut contexts = Vec::with_capacity(total);
        {
            let mut env = TranslateEnv {
                model,
                runtime: &self.runtime,
                desc: &mut self.desc,
            };
            for (i, cdef) in def.contexts.iter().enumerate() {
                let ctx = self.translator.translate(cdef, def, i, &mut env)?;
                if let Some(bad) = ctx.referenced_indices().find(|&s| usize::from(s) >= total) {
                    return Err(Error::Failed(format!(
                        "context {i} ({}) refers to context {bad}, task has {total}",
                        ctx.type_name()
                    )));
                }
                contexts.push(ctx);
            }
        }
        for i in 0..contexts.len() {
            for s in contexts[i].successors.clone() {
                let pred = &mut contexts[usize::from(s)].pred_cnt;
                *pred = pred.saturating_add(1);
            }
        }

        if !self.desc.args_sufficient() {
            return Err(Error::Internal(format!(
                "addr_size of task is less than number of task_addr: {} < {}",
                self.desc.addr_size,
                self.desc.io_addrs.len()
            )));
        }

        let mut seen = HashSet::new();
        for ctx in &contexts {
            if !seen.insert(ctx.op_index) {
                continue;
            }
            if let Some(ctx_op) = model.ops.get(ctx.op_index) {
                self.desc.dump |= model.dump.needs_dump(&ctx_op);
            }
        }
        if !op.original_op_names().is_empty() {
            self.desc.fusion_groups.push(FusionGroupRecord {
                op_name: op.name.clone(),
                original_op_names: op.original_op_names().to_vec(),
            });
        }

        let ready = if def.ready_context_num > 0 {
            def.ready_context_num
        } else {
            contexts.iter().filter(|c| c.pred_cnt == 0).count() as u16
        };
        self.desc.sqe = FftsPlusSqe {
            total_context_num: total as u16,
            ready_context_num: ready,
            prefetch_ost_num: def.prefetch_ost_num,
        };
        self.desc.contexts = contexts;

        self.update_args()
    }

    /// Frees the argument and extension-info buffers and clears the descriptor.
    /// Safe in every state and repeatable.
    pub fn release(&mut self) {
        if self.state == TaskState::Released && self.desc.args.is_none() && self.desc.ext_info.is_empty() {
            return;
        }
        tracing::debug!(
            op_index = self.op_index,
            args_size = self.desc.args_size,
            ext_info = self.desc.ext_info.len(),
            "releasing ffts+ task"
        );
        self.desc.clear();
        self.model = None;
        self.state = TaskState::Released;
    }
}

impl Drop for FftsPlusTaskBuilder {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for FftsPlusTaskBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FftsPlusTaskBuilder")
            .field("op_index", &self.op_index)
            .field("state", &self.state)
            .field("stream", &self.stream)
            .field("contexts", &self.desc.contexts.len())
            .field("io_addrs", &self.desc.io_addrs.len())
            .finish()
    }
}

/// Initializes independent builders on the rayon pool; returns the first error.
pub fn init_all(builders: &mut [FftsPlusTaskBuilder], defs: &[FftsPlusTaskDef], model: &Arc<ModelContext>) -> Result<()> {
    if builders.len() != defs.len() {
        return Err(Error::Internal(format!(
            "{} builders for {} task definitions",
            builders.len(),
            defs.len()
        )));
    }
    builders
        .par_iter_mut()
        .zip(defs.par_iter())
        .try_for_each(|(builder, def)| builder.init(def, model))
}
