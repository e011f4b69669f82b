//! Process-wide store of registered kernel binaries.

use parking_lot::{Mutex, MutexGuard};
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

use crate::backend::{BinHandle, DeviceRuntime};
use crate::core::context::DispatchInfo;
use crate::error::{Result, RtResultExt};

/// One registered binary shared by every caller that claimed it.
#[derive(Debug, Clone)]
pub struct KernelBinaryRecord {
    pub handle: BinHandle,
    /// Number of distinct callers holding a claim.
    pub ref_count: u32,
    /// Registered as a dynamic-shape binary dispatched by tiling key.
    pub all_kernel: bool,
    /// Dispatch metadata keyed by resolved kernel name.
    pub dispatch: HashMap<String, DispatchInfo>,
}

#[derive(Debug, Default)]
pub struct HandleStore {
    records: Mutex<HashMap<String, KernelBinaryRecord>>,
    stubs: Mutex<HashMap<String, String>>,
    register_lock: Mutex<()>,
}

static GLOBAL_STORE: OnceLock<Arc<HandleStore>> = OnceLock::new();

impl HandleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The process singleton.
    pub fn global() -> Arc<HandleStore> {
        Arc::clone(GLOBAL_STORE.get_or_init(|| Arc::new(HandleStore::new())))
    }

    /// Guards every check-then-register-or-claim sequence.
    pub fn lock_registration(&self) -> MutexGuard<'_, ()> {
        self.register_lock.lock()
    }

    /// Stub name of `key`. The first call fixes it; later calls return the same string.
    pub fn stub_name(&self, key: &str) -> String {
        let mut stubs = self.stubs.lock();
        let next = stubs.len();
        stubs.entry(key.to_string()).or_insert_with(|| format!("{key}_{next}")).clone()
    }

    pub fn contains(&self, key: &str) -> bool {
        self.records.lock().contains_key(key)
    }

    pub fn handle(&self, key: &str) -> Option<BinHandle> {
        self.records.lock().get(key).map(|r| r.handle)
    }

    pub fn record(&self, key: &str) -> Option<KernelBinaryRecord> {
        self.records.lock().get(key).cloned()
    }

    pub fn ref_count(&self, key: &str) -> Option<u32> {
        self.records.lock().get(key).map(|r| r.ref_count)
    }

    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.lock().is_empty()
    }

    /// Stores a freshly registered binary with one claim.
    pub fn insert(&self, key: &str, handle: BinHandle, all_kernel: bool) {
        self.records.lock().insert(
            key.to_string(),
            KernelBinaryRecord {
                handle,
                ref_count: 1,
                all_kernel,
                dispatch: HashMap::new(),
            },
        );
    }

    /// Adds one claim. False when `key` is unknown.
    pub fn refer(&self, key: &str) -> bool {
        match self.records.lock().get_mut(key) {
            Some(record) => {
                record.ref_count += 1;
                true
            }
            None => false,
        }
    }

    pub fn set_dispatch(&self, key: &str, kernel_name: &str, info: DispatchInfo) {
        if let Some(record) = self.records.lock().get_mut(key) {
            record.dispatch.insert(kernel_name.to_string(), info);
        }
    }

    pub fn dispatch(&self, key: &str, kernel_name: &str) -> Option<DispatchInfo> {
        self.records.lock().get(key).and_then(|r| r.dispatch.get(kernel_name).copied())
    }

    /// Drops one claim. The last claim unregisters the binary and removes the record.
    pub fn release(&self, key: &str, runtime: &dyn DeviceRuntime) -> Result<()> {
        let _guard = self.lock_registration();
        let handle = {
            let mut records = self.records.lock();
            let Some(record) = records.get_mut(key) else {
                tracing::warn!(key, "release of unknown kernel binary");
                return Ok(());
            };
            record.ref_count = record.ref_count.saturating_sub(1);
            if record.ref_count > 0 {
                tracing::debug!(key, ref_count = record.ref_count, "kernel binary claim released");
                return Ok(());
            }
            let handle = record.handle;
            records.remove(key);
            handle
        };
        tracing::debug!(key, handle = handle.0, "unregistering kernel binary");
        runtime.unregister_binary(handle).or_failed("unregister_binary")
    }

    /// Unregisters every binary regardless of claims. Process teardown only.
    pub fn clear(&self, runtime: &dyn DeviceRuntime) {
        let _guard = self.lock_registration();
        let drained: Vec<(String, KernelBinaryRecord)> = self.records.lock().drain().collect();
        for (key, record) in drained {
            if let Err(e) = runtime.unregister_binary(record.handle) {
                tracing::warn!(key = %key, "unregister during teardown failed: {e}");
            }
        }
    }
}
