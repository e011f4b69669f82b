use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::core::op::{attrs, OpDesc};

pub const ENV_SESSION_GRAPH_ID: &str = "FFTS_SESSION_GRAPH_ID";
pub const ENV_DUMP_ENABLE: &str = "FFTS_DUMP_ENABLE";
pub const ENV_DUMP_ALL: &str = "FFTS_DUMP_ALL";
pub const ENV_DUMP_OPS: &str = "FFTS_DUMP_OPS";
pub const ENV_OP_DEBUG: &str = "FFTS_OP_DEBUG";

fn env_flag(name: &str) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "on" | "yes"),
        Err(_) => false,
    }
}

/// Dump and op-debug switches for one model.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DumpProperties {
    /// Dump saving is permitted at all.
    #[serde(default)]
    pub enabled: bool,
    /// Global debug-register flag: every op is treated as needing dump.
    #[serde(default)]
    pub op_debug: bool,
    #[serde(default)]
    pub dump_all: bool,
    /// Op names listed for dump.
    #[serde(default)]
    pub layers: HashSet<String>,
}

impl DumpProperties {
    pub fn from_env() -> Self {
        let layers = std::env::var(ENV_DUMP_OPS)
            .map(|v| {
                v.split(',')
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .map(String::from)
                    .collect()
            })
            .unwrap_or_default();
        Self {
            enabled: env_flag(ENV_DUMP_ENABLE),
            op_debug: env_flag(ENV_OP_DEBUG),
            dump_all: env_flag(ENV_DUMP_ALL),
            layers,
        }
    }

    pub fn with_layer(mut self, op_name: impl Into<String>) -> Self {
        self.layers.insert(op_name.into());
        self
    }

    /// Whether `op` must have its arguments dumped or debug-registered.
    pub fn needs_dump(&self, op: &OpDesc) -> bool {
        op.attr_bool(attrs::DUMP_FLAG) || self.op_debug || self.dump_all || self.layers.contains(&op.name)
    }

    pub fn saving_permitted(&self) -> bool {
        self.enabled
    }
}

/// Per-process loader settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoaderConfig {
    /// Scopes kernel store keys so co-resident models do not collide.
    #[serde(default)]
    pub session_graph_id: Option<String>,
    #[serde(default)]
    pub dump: DumpProperties,
}

impl LoaderConfig {
    pub fn from_env() -> Self {
        Self {
            session_graph_id: std::env::var(ENV_SESSION_GRAPH_ID).ok().filter(|s| !s.is_empty()),
            dump: DumpProperties::from_env(),
        }
    }

    pub fn from_json(text: &str) -> crate::Result<Self> {
        Ok(serde_json::from_str(text)?)
    }
}
