pub mod context;
pub mod memory;

pub use context::{DeviceContext, ErrorObserver};
