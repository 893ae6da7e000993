//! Host/device memory objects for accelerator pipelines.
//!
//! A [`MemoryObject`] owns one logical buffer that can be host-mapped, bound to kernels as a
//! linear device buffer, or bound as a device image. It tracks which representation holds the
//! latest contents, copies between them only when a reader would otherwise see stale data,
//! and keeps host access and device access (a [`DeviceAccessGuard`]) mutually exclusive.
//!
//! The accelerator runtime itself sits behind the [`DeviceApi`] trait;
//! [`SimDevice`](device::SimDevice) implements it in host memory.

pub mod device;
pub mod error;
pub mod runtime;

pub use device::{ClStatus, DeviceApi, DeviceInfo};
pub use error::{MemError, MemResult};
pub use runtime::memory::{
    AccessMode, DeviceAccess, DeviceAccessGuard, HostAccess, KernelArg, MemoryObject,
    MemoryObjectBuilder, Representation, ResidencyMode, RunParams,
};
pub use runtime::{DeviceContext, ErrorObserver};
