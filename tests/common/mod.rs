#![allow(dead_code)]

use std::sync::Arc;

use fftsplus::core::task_def::{ComputeDef, ContextDef, ContextPayload, FftsPlusTaskDef};
use fftsplus::{
    DeviceRuntime, HandleStore, KernelBin, LoaderConfig, ModelAddressMap, ModelContext, OpDesc, OpTable, RuntimeParam,
    SimulatedRuntime,
};

pub const MEM_BASE: u64 = 0x2000_0000;
pub const LOGIC_MEM_BASE: u64 = 0x1000;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn param() -> RuntimeParam {
    RuntimeParam {
        mem_base: MEM_BASE,
        mem_size: 0x10_0000,
        logic_mem_base: LOGIC_MEM_BASE,
        ..Default::default()
    }
}

/// Device address a logical feature-map address resolves to.
pub fn resolved(logical: u64) -> u64 {
    MEM_BASE + (logical - LOGIC_MEM_BASE)
}

pub fn kernel(name: &str) -> Arc<KernelBin> {
    KernelBin::new(name, vec![0x7f, b'E', b'L', b'F', 1, 2, 3, 4])
}

/// A compute op with its own kernel binary attached.
pub fn compute_op(index: u32, name: &str) -> OpDesc {
    OpDesc::new(index, name, "Conv2D").with_kernel("", kernel(&format!("{name}_kernel")))
}

pub struct Harness {
    pub rt: Arc<SimulatedRuntime>,
    pub store: Arc<HandleStore>,
    pub addresses: Arc<ModelAddressMap>,
}

impl Harness {
    pub fn new() -> Self {
        init_tracing();
        Self {
            rt: Arc::new(SimulatedRuntime::new()),
            store: Arc::new(HandleStore::new()),
            addresses: Arc::new(ModelAddressMap::new(param())),
        }
    }

    pub fn runtime(&self) -> Arc<dyn DeviceRuntime> {
        self.rt.clone()
    }

    pub fn model_with(&self, ops: Vec<OpDesc>, config: &LoaderConfig) -> Arc<ModelContext> {
        let table: OpTable = ops.into_iter().collect();
        let model = ModelContext::new(self.runtime(), table, self.addresses.clone(), self.store.clone(), config);
        model.register_kernels().expect("kernel registration");
        Arc::new(model)
    }

    pub fn model(&self, ops: Vec<OpDesc>) -> Arc<ModelContext> {
        self.model_with(ops, &LoaderConfig::default())
    }
}

pub fn aic(op_index: u32, kernel_name: &str, task_addrs: Vec<u64>) -> ContextDef {
    ContextDef::new(
        op_index,
        ContextPayload::Aic(ComputeDef {
            kernel_names: vec![kernel_name.to_string()],
            task_addrs,
            block_dim: 8,
            ..Default::default()
        }),
    )
}

pub fn label(op_index: u32, successors: Vec<u32>) -> ContextDef {
    ContextDef::new(op_index, ContextPayload::Label).with_successors(successors)
}

pub fn task(op_index: u32, addr_size: u32, contexts: Vec<ContextDef>) -> FftsPlusTaskDef {
    FftsPlusTaskDef {
        op_index,
        addr_size,
        contexts,
        ..Default::default()
    }
}
