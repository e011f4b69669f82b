//! Per-caller view of the process-wide kernel binary store.
//!
//! A [`KernelBinaryRegistry`] is owned by one loaded model and shared by all
//! of its task builders. It holds at most one claim per store key and caches
//! the dispatch metadata of the kernels it registered. The registry is the
//! unit of claiming: a store record's count is the number of registries
//! holding it, however many builders of each model launch the kernel.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{BinHandle, BinaryMagic, DevBinary, DeviceRuntime};
use crate::core::context::DispatchInfo;
use crate::core::kernel_bin::{KernelBin, KernelStore};
use crate::core::op::{attrs, OpDesc};
use crate::error::{Error, Result, RtResultExt};

pub mod handle_store;

pub use handle_store::{HandleStore, KernelBinaryRecord};

pub const MIX_AIC_PREFIX: &str = "_mix_aic";
pub const MIX_AIV_PREFIX: &str = "_mix_aiv";

/// Binary format tag for one kernel of `op`.
pub fn select_magic(op: &OpDesc, prefix: &str, thread_index: Option<usize>) -> Result<BinaryMagic> {
    match prefix {
        MIX_AIC_PREFIX => return Ok(BinaryMagic::AiCube),
        MIX_AIV_PREFIX => return Ok(BinaryMagic::AiVec),
        _ => {}
    }
    let tag = match (thread_index, op.attr_list_str(attrs::THREAD_MAGIC)) {
        (Some(i), Some(tags)) => Some(
            tags.get(i)
                .map(String::as_str)
                .ok_or_else(|| Error::Internal(format!("op {} has no magic for thread {i}", op.name)))?,
        ),
        _ => op.attr_str(&format!("{prefix}{}", attrs::MAGIC)),
    };
    match tag {
        None => Ok(BinaryMagic::Elf),
        Some(t) => BinaryMagic::from_attr(t)
            .ok_or_else(|| Error::ParamInvalid(format!("op {}: unsupported binary magic {t}", op.name))),
    }
}

/// Entry-point name of one kernel of `op`.
pub fn resolve_kernel_name(op: &OpDesc, prefix: &str, thread_index: Option<usize>, kernel: &KernelBin) -> Result<String> {
    if let Some(i) = thread_index {
        return op
            .attr_list_str(attrs::THREAD_KERNEL_NAME)
            .and_then(|names| names.get(i))
            .cloned()
            .ok_or_else(|| Error::Internal(format!("op {} has no kernel name for thread {i}", op.name)));
    }
    Ok(op
        .attr_str(&format!("{prefix}{}", attrs::KERNEL_NAME))
        .map(String::from)
        .unwrap_or_else(|| kernel.name.clone()))
}

pub struct KernelBinaryRegistry {
    runtime: Arc<dyn DeviceRuntime>,
    store: Arc<HandleStore>,
    session_graph_id: Option<String>,
    claims: Mutex<HashSet<String>>,
    dispatch: Mutex<HashMap<String, DispatchInfo>>,
}

impl KernelBinaryRegistry {
    pub fn new(runtime: Arc<dyn DeviceRuntime>, store: Arc<HandleStore>, session_graph_id: Option<String>) -> Self {
        Self {
            runtime,
            store,
            session_graph_id,
            claims: Mutex::new(HashSet::new()),
            dispatch: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> &Arc<HandleStore> {
        &self.store
    }

    pub fn runtime(&self) -> &Arc<dyn DeviceRuntime> {
        &self.runtime
    }

    /// Store key of `name`, scoped by the session-graph id when one is set.
    pub fn scoped_key(&self, name: &str) -> String {
        match &self.session_graph_id {
            Some(id) => format!("{id}_{name}"),
            None => name.to_string(),
        }
    }

    /// Keys this registry currently holds a claim on.
    pub fn claimed_keys(&self) -> Vec<String> {
        self.claims.lock().iter().cloned().collect()
    }

    /// Registers every kernel `op` needs for `prefix`.
    #[tracing::instrument(skip(self, op, store), fields(op = %op.name))]
    pub fn register(&self, op: &OpDesc, prefix: &str, store: &KernelStore) -> Result<()> {
        if op.is_all_kernel() {
            self.register_kernel_handle(op, store, prefix)
        } else if op.is_thread_sliced() {
            self.register_thread_handles(op)
        } else {
            self.register_handle(op, None, prefix, store)
        }
    }

    /// Registers the single static-shape kernel of `op`.
    pub fn register_handle(&self, op: &OpDesc, kernel: Option<Arc<KernelBin>>, prefix: &str, store: &KernelStore) -> Result<()> {
        if let Some(kernel) = kernel.or_else(|| op.kernel_bin(prefix)) {
            let key = self.scoped_key(&format!("{prefix}{}", op.name));
            return self.function_register(op, &key, &kernel, prefix, None);
        }
        let name = op
            .attr_str(&format!("{prefix}{}", attrs::KERNEL_BIN_NAME))
            .unwrap_or(&op.name)
            .to_string();
        let key = self.scoped_key(&name);
        let kernel = store
            .find(&key)
            .or_else(|| store.find(&name))
            .ok_or_else(|| Error::Internal(format!("kernel binary {name} of op {} not found", op.name)))?;
        self.function_register(op, &key, &kernel, prefix, None)
    }

    /// Registers one binary per FFTS+ thread of a thread-sliced op.
    pub fn register_thread_handles(&self, op: &OpDesc) -> Result<()> {
        let kernels = &op.thread_kernels;
        let names = op.attr_list_str(attrs::THREAD_KERNEL_NAME).unwrap_or(&[]);
        if kernels.is_empty() || names.is_empty() {
            return Err(Error::Internal(format!(
                "thread-sliced op {} has {} thread kernels and {} kernel names",
                op.name,
                kernels.len(),
                names.len()
            )));
        }
        if kernels.len() != names.len() {
            return Err(Error::Internal(format!(
                "thread-sliced op {}: {} thread kernels but {} kernel names",
                op.name,
                kernels.len(),
                names.len()
            )));
        }
        for (i, kernel) in kernels.iter().enumerate() {
            let key = self.scoped_key(&kernel.name);
            self.function_register(op, &key, kernel, "", Some(i))?;
        }
        Ok(())
    }

    /// Claims or registers the binary under `bin_key`, then resolves the kernel's dispatch info.
    pub fn function_register(
        &self,
        op: &OpDesc,
        bin_key: &str,
        kernel: &KernelBin,
        prefix: &str,
        thread_index: Option<usize>,
    ) -> Result<()> {
        let stub = self.store.stub_name(bin_key);
        let kernel_name = resolve_kernel_name(op, prefix, thread_index, kernel)?;
        let _guard = self.store.lock_registration();
        if self.runtime.function_registered(&stub) {
            if let Some(info) = self.store.dispatch(bin_key, &kernel_name) {
                self.claim(bin_key);
                self.dispatch.lock().insert(kernel_name.clone(), info);
                tracing::debug!(key = bin_key, kernel = %kernel_name, "kernel already registered");
                return Ok(());
            }
        }
        self.kernel_register(op, thread_index, &stub, bin_key, &kernel_name, prefix, kernel)
    }

    /// Registration body; the caller holds the store's registration lock.
    #[allow(clippy::too_many_arguments)]
    fn kernel_register(
        &self,
        op: &OpDesc,
        thread_index: Option<usize>,
        stub: &str,
        bin_key: &str,
        kernel_name: &str,
        prefix: &str,
        kernel: &KernelBin,
    ) -> Result<()> {
        let handle = match self.store.handle(bin_key) {
            Some(handle) => {
                self.claim(bin_key);
                handle
            }
            None => {
                let magic = select_magic(op, prefix, thread_index)?;
                let handle = self.register_binary(op, prefix, kernel, magic, false)?;
                self.store.insert(bin_key, handle, false);
                self.claims.lock().insert(bin_key.to_string());
                tracing::debug!(key = bin_key, handle = handle.0, ?magic, "kernel binary registered");
                handle
            }
        };
        self.runtime
            .register_function(handle, stub, kernel_name)
            .or_failed("register_function")?;
        let info = self.runtime.addr_and_pref_cnt(stub).or_failed("addr_and_pref_cnt")?;
        self.store.set_dispatch(bin_key, kernel_name, info);
        self.dispatch.lock().insert(kernel_name.to_string(), info);
        Ok(())
    }

    /// Registers the dynamic-shape binary of `op`. A key already in the store is
    /// only claimed.
    #[tracing::instrument(skip(self, op, store), fields(op = %op.name))]
    pub fn register_kernel_handle(&self, op: &OpDesc, store: &KernelStore, prefix: &str) -> Result<()> {
        let key = self.scoped_key(&format!("{prefix}{}", op.name));
        let _guard = self.store.lock_registration();
        if let Some(record) = self.store.record(&key) {
            if !record.all_kernel {
                return Err(Error::Internal(format!(
                    "op {}: binary {key} is registered as a static kernel, not all-kernel",
                    op.name
                )));
            }
            self.claim(&key);
            return Ok(());
        }
        let kernel = match op.kernel_bin(prefix) {
            Some(kernel) => kernel,
            None => {
                let name = op
                    .attr_str(&format!("{prefix}{}", attrs::KERNEL_BIN_NAME))
                    .unwrap_or(&op.name);
                store
                    .find(&self.scoped_key(name))
                    .or_else(|| store.find(name))
                    .ok_or_else(|| Error::Internal(format!("all-kernel binary {name} of op {} not found", op.name)))?
            }
        };
        let magic = select_magic(op, prefix, None)?;
        let handle = self.register_binary(op, prefix, &kernel, magic, true)?;
        self.store.insert(&key, handle, true);
        self.claims.lock().insert(key.clone());
        tracing::debug!(key = %key, handle = handle.0, "all-kernel binary registered");
        Ok(())
    }

    fn register_binary(&self, op: &OpDesc, prefix: &str, kernel: &KernelBin, magic: BinaryMagic, all_kernel: bool) -> Result<BinHandle> {
        let bin = DevBinary {
            magic,
            version: 0,
            data: Arc::clone(&kernel.data),
        };
        let handle = if all_kernel {
            self.runtime.register_all_kernel(&bin).or_failed("register_all_kernel")?
        } else {
            self.runtime.register_binary(&bin).or_failed("register_binary")?
        };
        if let Some(meta) = op.attr_str(&format!("{prefix}{}", attrs::METADATA)) {
            if let Err(e) = self.runtime.register_metadata(handle, meta).or_failed("register_metadata") {
                let _ = self.runtime.unregister_binary(handle);
                return Err(e);
            }
        }
        Ok(handle)
    }

    /// Dispatch info of a statically registered kernel.
    pub fn addr_and_pref_cnt(&self, kernel_name: &str) -> Result<DispatchInfo> {
        self.dispatch
            .lock()
            .get(kernel_name)
            .copied()
            .ok_or_else(|| Error::ParamInvalid(format!("kernel {kernel_name} is not registered")))
    }

    /// Dispatch info of one tiling-key specialization of a dynamic-shape kernel.
    pub fn addr_and_pref_cnt_by_tiling_key(&self, op: &OpDesc, tiling_key: u64, prefix: &str) -> Result<DispatchInfo> {
        let key = self.scoped_key(&format!("{prefix}{}", op.name));
        let handle = self
            .store
            .handle(&key)
            .ok_or_else(|| Error::Internal(format!("all-kernel binary {key} is not registered")))?;
        self.runtime
            .addr_and_pref_cnt_by_tiling_key(handle, tiling_key)
            .or_failed("addr_and_pref_cnt_by_tiling_key")
    }

    /// Releases every claim this registry holds and forgets its dispatch cache.
    pub fn clean_tbe_handle(&self) {
        let keys: Vec<String> = self.claims.lock().drain().collect();
        for key in keys {
            if let Err(e) = self.store.release(&key, self.runtime.as_ref()) {
                tracing::warn!(key = %key, "releasing kernel binary failed: {e}");
            }
        }
        self.dispatch.lock().clear();
    }

    /// At most one claim per key per registry.
    fn claim(&self, key: &str) {
        if self.claims.lock().insert(key.to_string()) {
            self.store.refer(key);
        }
    }
}

impl Drop for KernelBinaryRegistry {
    fn drop(&mut self) {
        self.clean_tbe_handle();
    }
}

impl std::fmt::Debug for KernelBinaryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelBinaryRegistry")
            .field("session_graph_id", &self.session_graph_id)
            .field("claims", &self.claims.lock().len())
            .field("kernels", &self.dispatch.lock().len())
            .finish()
    }
}
