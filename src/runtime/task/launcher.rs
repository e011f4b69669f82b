use super::{FftsPlusTaskBuilder, TaskState};
use crate::backend::LaunchRequest;
use crate::error::{Error, Result, RtResultExt};

impl FftsPlusTaskBuilder {
    /// Launches the task on its stream and records the ids the runtime assigned.
    #[tracing::instrument(skip(self), fields(op_index = self.op_index))]
    pub fn distribute(&mut self) -> Result<()> {
        if !matches!(self.state, TaskState::Initialized | TaskState::Distributed) {
            return Err(Error::Internal(format!("distribute called in state {:?}", self.state)));
        }
        let req = LaunchRequest {
            sqe: self.desc.sqe,
            contexts: &self.desc.contexts,
            args: self.desc.args_ptr(),
            args_size: self.desc.args_size,
            stream: self.stream,
            dump: self.desc.dump,
        };
        self.runtime.launch_ffts_plus(&req).or_failed("launch_ffts_plus")?;
        self.launch_ids = self.runtime.task_and_stream_id().or_failed("task_and_stream_id")?;
        self.state = TaskState::Distributed;
        tracing::info!(
            task_id = self.launch_ids.task_id,
            stream_id = self.launch_ids.stream_id,
            dump = self.desc.dump,
            "ffts+ task distributed"
        );
        Ok(())
    }
}
