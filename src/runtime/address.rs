//! Logical-to-device address mapping.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::backend::DevicePtr;
use crate::error::{Error, Result};

/// Maps compiled (logical) addresses to device addresses.
pub trait AddressResolver: Send + Sync {
    fn resolve(&self, logical: u64) -> Result<DevicePtr>;
}

/// Runtime memory layout of a loaded model.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeParam {
    pub mem_base: u64,
    pub mem_size: u64,
    pub logic_mem_base: u64,
    #[serde(default)]
    pub weight_base: u64,
    #[serde(default)]
    pub weight_size: u64,
    #[serde(default)]
    pub logic_weight_base: u64,
    #[serde(default)]
    pub var_base: u64,
    #[serde(default)]
    pub var_size: u64,
    #[serde(default)]
    pub logic_var_base: u64,
}

fn translate(logical: u64, logic_base: u64, size: u64, base: u64) -> Option<Result<DevicePtr>> {
    if size == 0 || logical < logic_base {
        return None;
    }
    let offset = logical - logic_base;
    if offset >= size {
        return None;
    }
    Some(
        base.checked_add(offset)
            .ok_or_else(|| Error::ParamInvalid(format!("address {logical:#x} overflows device range"))),
    )
}

/// [`AddressResolver`] over a [`RuntimeParam`] plus a table of zero-copy
/// bindings that may be swapped between runs.
#[derive(Debug, Default)]
pub struct ModelAddressMap {
    param: RuntimeParam,
    zero_copy: RwLock<HashMap<u64, DevicePtr>>,
}

impl ModelAddressMap {
    pub fn new(param: RuntimeParam) -> Self {
        Self {
            param,
            zero_copy: RwLock::new(HashMap::new()),
        }
    }

    pub fn param(&self) -> &RuntimeParam {
        &self.param
    }

    /// Binds (or rebinds) a logical address to a user-supplied device buffer.
    pub fn bind_zero_copy(&self, logical: u64, device: DevicePtr) {
        self.zero_copy.write().insert(logical, device);
    }

    pub fn unbind_zero_copy(&self, logical: u64) {
        self.zero_copy.write().remove(&logical);
    }
}

impl AddressResolver for ModelAddressMap {
    fn resolve(&self, logical: u64) -> Result<DevicePtr> {
        if let Some(addr) = self.zero_copy.read().get(&logical) {
            return Ok(*addr);
        }
        let p = &self.param;
        let ranges = [
            (p.logic_mem_base, p.mem_size, p.mem_base),
            (p.logic_weight_base, p.weight_size, p.weight_base),
            (p.logic_var_base, p.var_size, p.var_base),
        ];
        for (logic_base, size, base) in ranges {
            if let Some(res) = translate(logical, logic_base, size, base) {
                return res;
            }
        }
        // Outside every model range: already a device address.
        Ok(logical)
    }
}
