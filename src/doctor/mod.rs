//! Dump and profiling records produced by launched tasks.

pub mod telemetry;

pub use telemetry::{DumpTaskRecord, FusionGroupRecord, OpProfileRecord, TaskProfileRecord};

use parking_lot::Mutex;
use serde::Serialize;

#[derive(Debug, Clone, Default, Serialize)]
pub struct RecorderSnapshot {
    pub dumps: Vec<DumpTaskRecord>,
    pub ops: Vec<OpProfileRecord>,
    pub tasks: Vec<TaskProfileRecord>,
}

/// In-memory sink for the records the profiling and dump consumers read.
#[derive(Debug, Default)]
pub struct Recorder {
    dumps: Mutex<Vec<DumpTaskRecord>>,
    ops: Mutex<Vec<OpProfileRecord>>,
    tasks: Mutex<Vec<TaskProfileRecord>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_dump(&self, record: DumpTaskRecord) {
        telemetry::log_record("dump_task", &record);
        self.dumps.lock().push(record);
    }

    pub fn record_op(&self, record: OpProfileRecord) {
        telemetry::log_record("op_profile", &record);
        self.ops.lock().push(record);
    }

    pub fn record_task(&self, record: TaskProfileRecord) {
        telemetry::log_record("task_profile", &record);
        self.tasks.lock().push(record);
    }

    pub fn dumps(&self) -> Vec<DumpTaskRecord> {
        self.dumps.lock().clone()
    }

    pub fn ops(&self) -> Vec<OpProfileRecord> {
        self.ops.lock().clone()
    }

    pub fn tasks(&self) -> Vec<TaskProfileRecord> {
        self.tasks.lock().clone()
    }

    pub fn snapshot(&self) -> RecorderSnapshot {
        RecorderSnapshot {
            dumps: self.dumps(),
            ops: self.ops(),
            tasks: self.tasks(),
        }
    }

    pub fn to_json(&self) -> crate::Result<String> {
        Ok(serde_json::to_string_pretty(&self.snapshot())?)
    }

    pub fn clear(&self) {
        self.dumps.lock().clear();
        self.ops.lock().clear();
        self.tasks.lock().clear();
    }
}
