use std::collections::HashMap;
use std::sync::Arc;

/// A compiled kernel binary shipped with the model.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KernelBin {
    pub name: String,
    pub data: Arc<[u8]>,
}

impl KernelBin {
    pub fn new(name: impl Into<String>, data: impl Into<Arc<[u8]>>) -> Arc<Self> {
        Arc::new(Self {
            name: name.into(),
            data: data.into(),
        })
    }
}

/// The model's packaged kernel binaries, looked up by binary name.
#[derive(Debug, Clone, Default)]
pub struct KernelStore {
    bins: HashMap<String, Arc<KernelBin>>,
}

impl KernelStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, key: impl Into<String>, bin: Arc<KernelBin>) {
        self.bins.insert(key.into(), bin);
    }

    pub fn find(&self, key: &str) -> Option<Arc<KernelBin>> {
        self.bins.get(key).cloned()
    }

    pub fn len(&self) -> usize {
        self.bins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bins.is_empty()
    }
}
