use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::fs;
use std::path::Path;

use crate::core::op::{OpDesc, OpTable};
use crate::core::task_def::FftsPlusTaskDef;
use crate::runtime::address::RuntimeParam;

/// On-disk form of a compiled model's task section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ModelFile {
    #[serde(default)]
    pub ops: Vec<OpDesc>,
    #[serde(default)]
    pub tasks: Vec<FftsPlusTaskDef>,
    #[serde(default)]
    pub runtime_param: RuntimeParam,
}

impl ModelFile {
    pub fn op_table(&self) -> OpTable {
        self.ops.iter().cloned().collect()
    }
}

pub struct ModelLoader;

impl ModelLoader {
    pub fn load_json<T: DeserializeOwned, P: AsRef<Path>>(path: P) -> crate::Result<T> {
        let content = fs::read_to_string(path)?;
        Ok(serde_json::from_str(&content)?)
    }

    pub fn save_json<T: Serialize, P: AsRef<Path>>(value: &T, path: P) -> crate::Result<()> {
        let content = serde_json::to_string_pretty(value)?;
        fs::write(path, content)?;
        Ok(())
    }

    /// Loads a model file (ops, task definitions and memory layout).
    pub fn load_model<P: AsRef<Path>>(path: P) -> crate::Result<ModelFile> {
        let model: ModelFile = Self::load_json(path)?;
        tracing::info!(ops = model.ops.len(), tasks = model.tasks.len(), "model file loaded");
        Ok(model)
    }

    pub fn parse_task_def(text: &str) -> crate::Result<FftsPlusTaskDef> {
        Ok(serde_json::from_str(text)?)
    }
}
