use std::sync::Arc;

use crate::backend::DeviceRuntime;
use crate::core::config::{DumpProperties, LoaderConfig};
use crate::core::kernel_bin::KernelStore;
use crate::core::op::{attrs, OpDesc, OpTable};
use crate::doctor::Recorder;
use crate::error::Result;
use crate::runtime::address::AddressResolver;
use crate::runtime::aicpu::{AicpuManager, CUSTOM_AICPU_KERNEL};
use crate::runtime::kernel::{HandleStore, KernelBinaryRegistry};

/// Everything a task builder reads from its loaded model.
pub struct ModelContext {
    pub ops: OpTable,
    pub kernel_store: KernelStore,
    pub addresses: Arc<dyn AddressResolver>,
    pub kernels: Arc<KernelBinaryRegistry>,
    pub aicpu: Arc<AicpuManager>,
    pub dump: DumpProperties,
    pub recorder: Arc<Recorder>,
    pub session_id: u64,
}

impl std::fmt::Debug for ModelContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelContext")
            .field("ops", &self.ops.len())
            .field("kernels", &self.kernels)
            .field("aicpu", &self.aicpu)
            .field("dump", &self.dump)
            .field("session_id", &self.session_id)
            .finish()
    }
}

impl ModelContext {
    pub fn new(
        runtime: Arc<dyn DeviceRuntime>,
        ops: OpTable,
        addresses: Arc<dyn AddressResolver>,
        store: Arc<HandleStore>,
        config: &LoaderConfig,
    ) -> Self {
        Self {
            ops,
            kernel_store: KernelStore::new(),
            addresses,
            kernels: Arc::new(KernelBinaryRegistry::new(
                Arc::clone(&runtime),
                store,
                config.session_graph_id.clone(),
            )),
            aicpu: Arc::new(AicpuManager::new(runtime)),
            dump: config.dump.clone(),
            recorder: Arc::new(Recorder::new()),
            session_id: 0,
        }
    }

    #[must_use]
    pub fn with_kernel_store(mut self, store: KernelStore) -> Self {
        self.kernel_store = store;
        self
    }

    #[must_use]
    pub fn with_recorder(mut self, recorder: Arc<Recorder>) -> Self {
        self.recorder = recorder;
        self
    }

    #[must_use]
    pub fn with_session_id(mut self, session_id: u64) -> Self {
        self.session_id = session_id;
        self
    }

    /// Kernel prefixes of `op` that need registering.
    fn kernel_prefixes(&self, op: &OpDesc) -> Vec<String> {
        let mut prefixes: Vec<String> = op
            .kernel_bins
            .keys()
            .filter(|k| k.as_str() != CUSTOM_AICPU_KERNEL)
            .cloned()
            .collect();
        if prefixes.is_empty()
            && (op.is_thread_sliced()
                || op.attr_str(attrs::KERNEL_BIN_NAME).is_some()
                || self.kernel_store.find(&self.kernels.scoped_key(&op.name)).is_some()
                || self.kernel_store.find(&op.name).is_some())
        {
            prefixes.push(String::new());
        }
        prefixes.sort();
        prefixes
    }

    /// Registers the kernels of every op with the shared store.
    #[tracing::instrument(skip(self))]
    pub fn register_kernels(&self) -> Result<()> {
        let mut indices: Vec<u32> = self.ops.indices().collect();
        indices.sort_unstable();
        for index in indices {
            let Some(op) = self.ops.get(index) else { continue };
            for prefix in self.kernel_prefixes(&op) {
                self.kernels.register(&op, &prefix, &self.kernel_store)?;
            }
        }
        Ok(())
    }
}
