//! Host-memory simulation of the accelerator runtime.
//!
//! Records every call for verification, hands out deterministic device
//! addresses and binary handles, and can be told to fail selected calls.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use super::{BinHandle, BinaryMagic, DevBinary, DevicePtr, DeviceRuntime, LaunchIds, LaunchRequest};
use crate::core::context::{DispatchInfo, FftsPlusSqe};
use crate::error::{RtError, RtResult};

const DEVICE_BASE: u64 = 0x1000_0000;
const ALLOC_ALIGN: u64 = 0x100;
const KERNEL_TEXT_BASE: u64 = 0x8000_0000;

/// One recorded runtime call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuntimeCall {
    Malloc { size: usize },
    Free { ptr: DevicePtr },
    MemcpyH2d { dst: DevicePtr, len: usize },
    AdviseCachePersist { addr: DevicePtr, size: u64 },
    Launch { total_context_num: u16, dump: bool },
    RegisterBinary { magic: BinaryMagic },
    RegisterAllKernel { magic: BinaryMagic },
    UnregisterBinary { handle: BinHandle },
    RegisterMetadata { handle: BinHandle },
    RegisterFunction { stub: String, kernel_name: String },
    LoadCustomAicpu { so_name: String },
    CreateAicpuSession { session_id: u64, kernel_id: u64 },
}

/// Snapshot of one FFTS+ launch.
#[derive(Debug, Clone)]
pub struct LaunchRecord {
    pub sqe: FftsPlusSqe,
    pub context_types: Vec<&'static str>,
    pub args: DevicePtr,
    /// Argument buffer contents at launch time.
    pub args_bytes: Vec<u8>,
    pub dump: bool,
    pub ids: LaunchIds,
}

#[derive(Debug, Clone)]
struct BinaryEntry {
    magic: BinaryMagic,
    all_kernel: bool,
    metadata: Option<String>,
}

#[derive(Debug, Default)]
struct SimState {
    memory: HashMap<DevicePtr, Vec<u8>>,
    next_addr: u64,
    binaries: HashMap<BinHandle, BinaryEntry>,
    next_handle: u64,
    /// stub -> (binary, kernel name, entry address)
    functions: HashMap<String, (BinHandle, String, u64)>,
    next_task_id: u32,
    last_ids: LaunchIds,
    calls: Vec<RuntimeCall>,
    launches: Vec<LaunchRecord>,
}

impl SimState {
    fn allocation_containing(&mut self, ptr: DevicePtr) -> Option<(DevicePtr, &mut Vec<u8>)> {
        self.memory
            .iter_mut()
            .find(|(base, buf)| ptr >= **base && ptr < **base + buf.len().max(1) as u64)
            .map(|(base, buf)| (*base, buf))
    }
}

pub struct SimulatedRuntime {
    state: Mutex<SimState>,
    fail_malloc: AtomicBool,
    fail_launch: AtomicBool,
    fail_register: AtomicBool,
    fail_advise: AtomicBool,
    fail_function_query: AtomicBool,
    register_delay: Option<Duration>,
}

impl Default for SimulatedRuntime {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedRuntime {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SimState {
                next_addr: DEVICE_BASE,
                next_handle: 1,
                next_task_id: 1,
                ..Default::default()
            }),
            fail_malloc: AtomicBool::new(false),
            fail_launch: AtomicBool::new(false),
            fail_register: AtomicBool::new(false),
            fail_advise: AtomicBool::new(false),
            fail_function_query: AtomicBool::new(false),
            register_delay: None,
        }
    }

    /// Stalls every binary registration, widening race windows in concurrency tests.
    #[must_use]
    pub fn with_register_delay(mut self, delay: Duration) -> Self {
        self.register_delay = Some(delay);
        self
    }

    pub fn set_fail_malloc(&self, fail: bool) {
        self.fail_malloc.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_launch(&self, fail: bool) {
        self.fail_launch.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_register(&self, fail: bool) {
        self.fail_register.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_advise(&self, fail: bool) {
        self.fail_advise.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_function_query(&self, fail: bool) {
        self.fail_function_query.store(fail, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<RuntimeCall> {
        self.state.lock().calls.clone()
    }

    pub fn count_calls(&self, pred: impl Fn(&RuntimeCall) -> bool) -> usize {
        self.state.lock().calls.iter().filter(|c| pred(c)).count()
    }

    pub fn register_binary_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::RegisterBinary { .. }))
    }

    pub fn all_kernel_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::RegisterAllKernel { .. }))
    }

    pub fn unregister_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::UnregisterBinary { .. }))
    }

    pub fn function_register_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::RegisterFunction { .. }))
    }

    pub fn advise_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::AdviseCachePersist { .. }))
    }

    pub fn memcpy_count(&self) -> usize {
        self.count_calls(|c| matches!(c, RuntimeCall::MemcpyH2d { .. }))
    }

    pub fn launches(&self) -> Vec<LaunchRecord> {
        self.state.lock().launches.clone()
    }

    pub fn live_allocations(&self) -> usize {
        self.state.lock().memory.len()
    }

    pub fn live_binaries(&self) -> usize {
        self.state.lock().binaries.len()
    }

    pub fn is_registered(&self, handle: BinHandle) -> bool {
        self.state.lock().binaries.contains_key(&handle)
    }

    pub fn binary_magic(&self, handle: BinHandle) -> Option<BinaryMagic> {
        self.state.lock().binaries.get(&handle).map(|b| b.magic)
    }

    pub fn binary_metadata(&self, handle: BinHandle) -> Option<String> {
        self.state.lock().binaries.get(&handle).and_then(|b| b.metadata.clone())
    }

    pub fn read_memory(&self, ptr: DevicePtr, len: usize) -> Option<Vec<u8>> {
        let mut state = self.state.lock();
        let (base, buf) = state.allocation_containing(ptr)?;
        let start = (ptr - base) as usize;
        buf.get(start..start.checked_add(len)?).map(<[u8]>::to_vec)
    }

    /// Reads `count` native-endian u64 values starting at `ptr`.
    pub fn read_u64s(&self, ptr: DevicePtr, count: usize) -> Option<Vec<u64>> {
        let bytes = self.read_memory(ptr, count.checked_mul(8)?)?;
        Some(bytes.chunks_exact(8).map(bytemuck::pod_read_unaligned::<u64>).collect())
    }

    fn register(&self, bin: &DevBinary, all_kernel: bool) -> RtResult<BinHandle> {
        if let Some(delay) = self.register_delay {
            std::thread::sleep(delay);
        }
        let mut state = self.state.lock();
        state.calls.push(if all_kernel {
            RuntimeCall::RegisterAllKernel { magic: bin.magic }
        } else {
            RuntimeCall::RegisterBinary { magic: bin.magic }
        });
        if self.fail_register.load(Ordering::SeqCst) {
            return Err(RtError::new(107_000, "binary registration rejected"));
        }
        if bin.data.is_empty() {
            return Err(RtError::new(107_001, "empty binary"));
        }
        let handle = BinHandle(state.next_handle);
        state.next_handle += 1;
        state.binaries.insert(
            handle,
            BinaryEntry {
                magic: bin.magic,
                all_kernel,
                metadata: None,
            },
        );
        Ok(handle)
    }
}

impl DeviceRuntime for SimulatedRuntime {
    fn malloc(&self, size: usize) -> RtResult<DevicePtr> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Malloc { size });
        if self.fail_malloc.load(Ordering::SeqCst) {
            return Err(RtError::new(207_001, "out of device memory"));
        }
        let ptr = state.next_addr;
        let span = (size as u64).max(1).div_ceil(ALLOC_ALIGN) * ALLOC_ALIGN;
        state.next_addr += span;
        state.memory.insert(ptr, vec![0u8; size]);
        Ok(ptr)
    }

    fn free(&self, ptr: DevicePtr) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Free { ptr });
        state
            .memory
            .remove(&ptr)
            .map(|_| ())
            .ok_or_else(|| RtError::new(207_002, format!("free of unknown pointer {ptr:#x}")))
    }

    fn memcpy_h2d(&self, dst: DevicePtr, dst_max: usize, src: &[u8]) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::MemcpyH2d { dst, len: src.len() });
        if src.len() > dst_max {
            return Err(RtError::new(207_003, "copy larger than destination"));
        }
        let (base, buf) = state
            .allocation_containing(dst)
            .ok_or_else(|| RtError::new(207_004, format!("copy to unmapped address {dst:#x}")))?;
        let start = (dst - base) as usize;
        let end = start + src.len();
        if end > buf.len() {
            return Err(RtError::new(207_003, "copy overruns allocation"));
        }
        buf[start..end].copy_from_slice(src);
        Ok(())
    }

    fn advise_cache_persist(&self, addr: DevicePtr, size: u64) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::AdviseCachePersist { addr, size });
        if self.fail_advise.load(Ordering::SeqCst) {
            return Err(RtError::new(207_005, "cache advise rejected"));
        }
        Ok(())
    }

    fn launch_ffts_plus(&self, req: &LaunchRequest<'_>) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::Launch {
            total_context_num: req.sqe.total_context_num,
            dump: req.dump,
        });
        if self.fail_launch.load(Ordering::SeqCst) {
            return Err(RtError::new(507_000, "ffts+ launch rejected"));
        }
        let args_bytes = if req.args_size == 0 {
            Vec::new()
        } else {
            state
                .memory
                .get(&req.args)
                .map(|b| b[..req.args_size.min(b.len())].to_vec())
                .unwrap_or_default()
        };
        let ids = LaunchIds {
            task_id: state.next_task_id,
            stream_id: req.stream.0,
        };
        state.next_task_id += 1;
        state.last_ids = ids;
        state.launches.push(LaunchRecord {
            sqe: req.sqe,
            context_types: req.contexts.iter().map(|c| c.type_name()).collect(),
            args: req.args,
            args_bytes,
            dump: req.dump,
            ids,
        });
        Ok(())
    }

    fn task_and_stream_id(&self) -> RtResult<LaunchIds> {
        Ok(self.state.lock().last_ids)
    }

    fn register_binary(&self, bin: &DevBinary) -> RtResult<BinHandle> {
        self.register(bin, false)
    }

    fn register_all_kernel(&self, bin: &DevBinary) -> RtResult<BinHandle> {
        self.register(bin, true)
    }

    fn unregister_binary(&self, handle: BinHandle) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::UnregisterBinary { handle });
        if state.binaries.remove(&handle).is_none() {
            return Err(RtError::new(107_002, format!("unknown binary handle {}", handle.0)));
        }
        state.functions.retain(|_, (h, _, _)| *h != handle);
        Ok(())
    }

    fn register_metadata(&self, handle: BinHandle, metadata: &str) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::RegisterMetadata { handle });
        let entry = state
            .binaries
            .get_mut(&handle)
            .ok_or_else(|| RtError::new(107_002, format!("unknown binary handle {}", handle.0)))?;
        entry.metadata = Some(metadata.to_string());
        Ok(())
    }

    fn function_registered(&self, stub: &str) -> bool {
        self.state.lock().functions.contains_key(stub)
    }

    fn register_function(&self, handle: BinHandle, stub: &str, kernel_name: &str) -> RtResult<()> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::RegisterFunction {
            stub: stub.to_string(),
            kernel_name: kernel_name.to_string(),
        });
        match state.binaries.get(&handle) {
            Some(entry) if !entry.all_kernel => {}
            Some(_) => return Err(RtError::new(107_003, "all-kernel binaries dispatch by tiling key")),
            None => return Err(RtError::new(107_002, format!("unknown binary handle {}", handle.0))),
        }
        if let Some((existing, _, _)) = state.functions.get(stub) {
            if *existing == handle {
                return Ok(());
            }
        }
        let addr = KERNEL_TEXT_BASE + handle.0 * 0x10_0000 + state.functions.len() as u64 * 0x1000;
        state.functions.insert(stub.to_string(), (handle, kernel_name.to_string(), addr));
        Ok(())
    }

    fn addr_and_pref_cnt(&self, stub: &str) -> RtResult<DispatchInfo> {
        if self.fail_function_query.load(Ordering::SeqCst) {
            return Err(RtError::new(107_004, "address query rejected"));
        }
        let state = self.state.lock();
        let (_, kernel_name, addr) = state
            .functions
            .get(stub)
            .ok_or_else(|| RtError::new(107_005, format!("stub {stub} not registered")))?;
        Ok(DispatchInfo {
            addr: *addr,
            pref_cnt: 1 + (kernel_name.len() % 4) as u32,
        })
    }

    fn addr_and_pref_cnt_by_tiling_key(&self, handle: BinHandle, tiling_key: u64) -> RtResult<DispatchInfo> {
        if self.fail_function_query.load(Ordering::SeqCst) {
            return Err(RtError::new(107_004, "address query rejected"));
        }
        let state = self.state.lock();
        match state.binaries.get(&handle) {
            Some(entry) if entry.all_kernel => Ok(DispatchInfo {
                addr: KERNEL_TEXT_BASE + handle.0 * 0x10_0000 + tiling_key * 0x100,
                pref_cnt: 1 + (tiling_key % 4) as u32,
            }),
            Some(_) => Err(RtError::new(107_003, "binary was not registered as all-kernel")),
            None => Err(RtError::new(107_002, format!("unknown binary handle {}", handle.0))),
        }
    }

    fn load_custom_aicpu(&self, so_name: &str, bin: &[u8]) -> RtResult<DevicePtr> {
        let mut state = self.state.lock();
        state.calls.push(RuntimeCall::LoadCustomAicpu {
            so_name: so_name.to_string(),
        });
        if bin.is_empty() {
            return Err(RtError::new(307_001, format!("custom aicpu binary {so_name} is empty")));
        }
        let handle = state.next_handle;
        state.next_handle += 1;
        Ok(handle)
    }

    fn create_aicpu_session(&self, session_id: u64, kernel_id: u64) -> RtResult<()> {
        self.state.lock().calls.push(RuntimeCall::CreateAicpuSession { session_id, kernel_id });
        Ok(())
    }
}

impl std::fmt::Debug for SimulatedRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("SimulatedRuntime")
            .field("allocations", &state.memory.len())
            .field("binaries", &state.binaries.len())
            .field("functions", &state.functions.len())
            .field("calls", &state.calls.len())
            .finish()
    }
}
