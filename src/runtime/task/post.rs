use std::collections::HashSet;

use super::FftsPlusTaskBuilder;
use crate::core::task_def::FftsPlusTaskDef;
use crate::doctor::{DumpTaskRecord, OpProfileRecord, TaskProfileRecord};
use crate::error::{Error, Result};

const TASK_TYPE: &str = "FFTS_PLUS";

impl FftsPlusTaskBuilder {
    /// Emits dump and profiling records for a distributed task. Each op is
    /// recorded once however many contexts it owns.
    pub fn post_process(&self, def: &FftsPlusTaskDef) -> Result<()> {
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::Internal("post_process on a task with no model".to_string()))?;
        let ids = self.launch_ids;
        let mut seen = HashSet::new();

        for ctx in &def.contexts {
            if !seen.insert(ctx.op_index) {
                continue;
            }
            let op = model
                .ops
                .get(ctx.op_index)
                .ok_or_else(|| Error::ParamInvalid(format!("op index {} not found", ctx.op_index)))?;
            let offset = self.desc.args_offsets.get(&op.name).copied();

            if model.dump.needs_dump(&op) && model.dump.saving_permitted() {
                if let Some(args_offset) = offset {
                    model.recorder.record_dump(DumpTaskRecord {
                        op_index: op.index,
                        op_name: op.name.clone(),
                        task_id: ids.task_id,
                        stream_id: ids.stream_id,
                        args_addr: self.desc.args_ptr() + args_offset as u64,
                        args_offset,
                        op_debug: model.dump.op_debug,
                    });
                }
            }
            model.recorder.record_op(OpProfileRecord {
                op_index: op.index,
                op_name: op.name.clone(),
                op_type: op.op_type.clone(),
                task_id: ids.task_id,
                stream_id: ids.stream_id,
                task_type: TASK_TYPE.to_string(),
            });
        }

        let fused_op_names = self
            .desc
            .fusion_groups
            .iter()
            .flat_map(|g| g.original_op_names.iter().cloned())
            .collect();
        model.recorder.record_task(TaskProfileRecord {
            op_index: def.op_index,
            task_id: ids.task_id,
            stream_id: ids.stream_id,
            context_num: self.desc.sqe.total_context_num,
            fused_op_names,
        });
        Ok(())
    }
}
