pub mod api;
pub mod flags;
pub mod sim;
pub mod status;

pub use api::{
    ContextHandle, DeviceApi, DeviceInfo, ImageDesc, ImageFormat, ImageInfo, ImageType,
    KernelHandle, MemHandle, QueueHandle,
};
pub use flags::{MapFlags, MemFlags};
pub use sim::{SimDevice, SimOp, SimStats};
pub use status::ClStatus;
