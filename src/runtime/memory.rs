use std::sync::Arc;

use crate::backend::{DevicePtr, DeviceRuntime};
use crate::error::{Error, Result, RtResultExt};

/// Owned device allocation, freed on drop.
pub struct DeviceBuffer {
    runtime: Arc<dyn DeviceRuntime>,
    ptr: DevicePtr,
    size: usize,
}

impl DeviceBuffer {
    pub fn alloc(runtime: &Arc<dyn DeviceRuntime>, size: usize) -> Result<Self> {
        let ptr = runtime.malloc(size).or_failed("malloc")?;
        Ok(Self {
            runtime: Arc::clone(runtime),
            ptr,
            size,
        })
    }

    /// Allocates a buffer holding a copy of `data`.
    pub fn from_host(runtime: &Arc<dyn DeviceRuntime>, data: &[u8]) -> Result<Self> {
        let buf = Self::alloc(runtime, data.len())?;
        buf.write(0, data)?;
        Ok(buf)
    }

    pub fn ptr(&self) -> DevicePtr {
        self.ptr
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn write(&self, offset: usize, bytes: &[u8]) -> Result<()> {
        let room = self.size.saturating_sub(offset);
        if bytes.len() > room {
            return Err(Error::Internal(format!(
                "write of {} bytes at offset {offset} overruns {}-byte device buffer",
                bytes.len(),
                self.size
            )));
        }
        self.runtime
            .memcpy_h2d(self.ptr + offset as u64, room, bytes)
            .or_failed("memcpy_h2d")
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        if self.ptr != 0 {
            if let Err(e) = self.runtime.free(self.ptr) {
                tracing::warn!(ptr = self.ptr, "device free failed: {e}");
            }
        }
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("ptr", &format_args!("{:#x}", self.ptr))
            .field("size", &self.size)
            .finish()
    }
}
