use super::FftsPlusTaskBuilder;
use crate::error::{Error, Result};

impl FftsPlusTaskBuilder {
    /// Resolves the io-address list and copies it into the argument buffer in
    /// one transfer. Absolute entries are copied as they are. Callable again
    /// after zero-copy addresses are rebound.
    pub fn update_args(&mut self) -> Result<()> {
        if self.desc.io_addrs.is_empty() {
            return Ok(());
        }
        if !self.desc.args_sufficient() {
            return Err(Error::Internal(format!(
                "addr_size of task is less than number of task_addr: {} < {}",
                self.desc.addr_size,
                self.desc.io_addrs.len()
            )));
        }
        let model = self
            .model
            .as_ref()
            .ok_or_else(|| Error::Internal("update_args on a task with no model".to_string()))?;
        let args = self
            .desc
            .args
            .as_ref()
            .ok_or_else(|| Error::Internal("task has io addresses but no argument buffer".to_string()))?;

        let resolved = self
            .desc
            .io_addrs
            .iter()
            .enumerate()
            .map(|(i, &addr)| {
                if self.desc.absolute.contains(&i) {
                    Ok(addr)
                } else {
                    model.addresses.resolve(addr)
                }
            })
            .collect::<Result<Vec<u64>>>()?;

        args.write(0, bytemuck::cast_slice(&resolved))?;
        tracing::debug!(
            op_index = self.op_index,
            io_addrs = resolved.len(),
            absolute = self.desc.absolute.len(),
            "task arguments updated"
        );
        Ok(())
    }
}
