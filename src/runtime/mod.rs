pub mod address;
pub mod aicpu;
pub mod kernel;
pub mod memory;
pub mod model;
pub mod task;

pub use address::{AddressResolver, ModelAddressMap, RuntimeParam};
pub use aicpu::AicpuManager;
pub use kernel::{HandleStore, KernelBinaryRecord, KernelBinaryRegistry};
pub use memory::DeviceBuffer;
pub use model::ModelContext;
pub use task::{init_all, FftsPlusTaskBuilder, StandardTranslator, TaskDescriptor, TaskState};
