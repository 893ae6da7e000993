pub mod allocation;
pub mod coherency;
pub mod guard;
pub mod object;

use crate::device::{DeviceInfo, KernelHandle, MapFlags, MemFlags};
use tracing::{debug, warn};

/// How the device may use a buffer, or how a kernel uses one argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    ReadOnly,
    WriteOnly,
    ReadWrite,
}

impl AccessMode {
    /// Device allocation flags for this access mode.
    #[must_use]
    pub const fn mem_flags(self) -> MemFlags {
        match self {
            Self::ReadOnly => MemFlags::READ_ONLY,
            Self::WriteOnly => MemFlags::WRITE_ONLY,
            Self::ReadWrite => MemFlags::READ_WRITE,
        }
    }

    /// Map flags for the mapping made right after allocation.
    ///
    /// The host fills buffers the device only reads, and reads buffers the device only
    /// writes.
    #[must_use]
    pub fn initial_map_flags(self) -> MapFlags {
        match self {
            Self::ReadOnly => MapFlags::WRITE_INVALIDATE_REGION,
            Self::WriteOnly => MapFlags::READ,
            Self::ReadWrite => MapFlags::READ | MapFlags::WRITE,
        }
    }

    /// Host access matching [`AccessMode::initial_map_flags`].
    #[must_use]
    pub const fn initial_host_access(self) -> HostAccess {
        match self {
            Self::ReadOnly => HostAccess::Write,
            Self::WriteOnly => HostAccess::Read,
            Self::ReadWrite => HostAccess::ReadWrite,
        }
    }

    #[must_use]
    pub const fn writes(self) -> bool {
        matches!(self, Self::WriteOnly | Self::ReadWrite)
    }
}

/// The access under which the host view is currently mapped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum HostAccess {
    #[default]
    None,
    Read,
    Write,
    ReadWrite,
}

impl HostAccess {
    #[must_use]
    pub fn map_flags(self) -> MapFlags {
        match self {
            Self::ReadWrite => MapFlags::READ | MapFlags::WRITE,
            Self::Write => MapFlags::WRITE_INVALIDATE_REGION,
            Self::None | Self::Read => MapFlags::READ,
        }
    }

    #[must_use]
    pub const fn is_readable(self) -> bool {
        matches!(self, Self::Read | Self::ReadWrite)
    }

    #[must_use]
    pub const fn is_writable(self) -> bool {
        matches!(self, Self::Write | Self::ReadWrite)
    }
}

/// How host and device memory relate for a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ResidencyMode {
    #[default]
    None,
    Coarse,
    Fine,
}

impl ResidencyMode {
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Coarse => "coarse",
            Self::Fine => "fine",
        }
    }
}

/// The allocation path a memory object takes.
///
/// Shared-virtual allocations are not supported by this backend, so every residency mode
/// resolves to a mapped buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ResidencyStrategy {
    /// A device buffer with host-accessible backing, mapped on demand.
    MappedBuffer,
}

impl ResidencyStrategy {
    #[must_use]
    pub fn select(mode: ResidencyMode, info: &DeviceInfo) -> Self {
        match mode {
            ResidencyMode::None => {}
            ResidencyMode::Coarse | ResidencyMode::Fine => {
                warn!(
                    residency = mode.name(),
                    device = %info.name,
                    svm_coarse = info.svm_coarse_grain,
                    svm_fine = info.svm_fine_grain,
                    "shared virtual memory is unavailable, using a mapped buffer"
                );
            }
        }
        debug!(residency = mode.name(), "selected mapped buffer residency");
        Self::MappedBuffer
    }
}

/// Which device allocation holds the latest contents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Representation {
    #[default]
    Buffer,
    /// Buffer and image hold the same contents.
    Same,
    Image,
}

/// Dimensionality of the kernel run a buffer is bound for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RunParams {
    num_dims: usize,
}

impl RunParams {
    /// `num_dims` is clamped to `1..=3`.
    #[must_use]
    pub fn new(num_dims: usize) -> Self {
        Self {
            num_dims: num_dims.clamp(1, 3),
        }
    }

    #[must_use]
    pub const fn num_dims(&self) -> usize {
        self.num_dims
    }
}

/// One memory argument slot of a kernel invocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelArg {
    pub kernel: KernelHandle,
    pub index: u32,
    /// The slot expects an image rather than a linear buffer.
    pub is_image: bool,
    pub access: AccessMode,
}

impl KernelArg {
    #[must_use]
    pub const fn buffer(kernel: KernelHandle, index: u32, access: AccessMode) -> Self {
        Self {
            kernel,
            index,
            is_image: false,
            access,
        }
    }

    #[must_use]
    pub const fn image(kernel: KernelHandle, index: u32, access: AccessMode) -> Self {
        Self {
            kernel,
            index,
            is_image: true,
            access,
        }
    }
}

pub use allocation::{AllocationKind, DeviceAllocation};
pub use coherency::Transcode;
pub use guard::{DeviceAccess, DeviceAccessGuard};
pub use object::{MemoryObject, MemoryObjectBuilder};
