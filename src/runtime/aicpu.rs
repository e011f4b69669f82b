//! AICPU sessions and custom AICPU kernel libraries.

use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use crate::backend::{DevicePtr, DeviceRuntime};
use crate::core::op::OpDesc;
use crate::error::{Error, Result, RtResultExt};

/// Key of the custom AICPU library in [`OpDesc::kernel_bins`].
pub const CUSTOM_AICPU_KERNEL: &str = "_cust_aicpu";

/// Creates each (session, kernel) AICPU session and loads each custom
/// library once per model.
pub struct AicpuManager {
    runtime: Arc<dyn DeviceRuntime>,
    sessions: Mutex<HashSet<(u64, u64)>>,
    custom_libs: Mutex<HashMap<String, DevicePtr>>,
}

impl AicpuManager {
    pub fn new(runtime: Arc<dyn DeviceRuntime>) -> Self {
        Self {
            runtime,
            sessions: Mutex::new(HashSet::new()),
            custom_libs: Mutex::new(HashMap::new()),
        }
    }

    pub fn ensure_session(&self, session_id: u64, kernel_id: u64) -> Result<()> {
        let mut sessions = self.sessions.lock();
        if sessions.contains(&(session_id, kernel_id)) {
            return Ok(());
        }
        self.runtime
            .create_aicpu_session(session_id, kernel_id)
            .or_failed("create_aicpu_session")?;
        sessions.insert((session_id, kernel_id));
        tracing::debug!(session_id, kernel_id, "aicpu session created");
        Ok(())
    }

    /// Loads the custom library `so_name` attached to `op`.
    pub fn load_custom(&self, op: &OpDesc, so_name: &str) -> Result<DevicePtr> {
        let mut libs = self.custom_libs.lock();
        if let Some(handle) = libs.get(so_name) {
            return Ok(*handle);
        }
        let bin = op
            .kernel_bin(CUSTOM_AICPU_KERNEL)
            .ok_or_else(|| Error::Internal(format!("op {} carries no custom aicpu binary", op.name)))?;
        let handle = self
            .runtime
            .load_custom_aicpu(so_name, &bin.data)
            .or_failed("load_custom_aicpu")?;
        libs.insert(so_name.to_string(), handle);
        tracing::debug!(so_name, "custom aicpu library loaded");
        Ok(handle)
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().len()
    }

    pub fn loaded_libraries(&self) -> usize {
        self.custom_libs.lock().len()
    }
}

impl std::fmt::Debug for AicpuManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AicpuManager")
            .field("sessions", &self.session_count())
            .field("custom_libs", &self.loaded_libraries())
            .finish()
    }
}
