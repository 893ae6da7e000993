use crate::device::ClStatus;
use crate::runtime::memory::HostAccess;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum MemError {
    #[error("Allocation failed in {op}: {status}")]
    Allocation { op: &'static str, status: ClStatus },

    #[error("Host map failed in {op}: {status}")]
    Map { op: &'static str, status: ClStatus },

    #[error("Host unmap failed in {op}: {status}")]
    Unmap { op: &'static str, status: ClStatus },

    #[error("Device access must be released before host access ({capacity} byte buffer)")]
    DeviceLocked { capacity: usize },

    #[error("Device access is already held for this buffer")]
    AlreadyDeviceLocked,

    #[error("Mapped buffer address moved: {expected:#x} != {actual:#x}")]
    MapAddressMismatch { expected: usize, actual: usize },

    #[error("Image query failed in {op}: {status}")]
    ImageQuery { op: &'static str, status: ClStatus },

    #[error("Image/buffer copy failed in {op}: {status}")]
    Copy { op: &'static str, status: ClStatus },

    #[error("Kernel argument bind failed in {op}: {status}")]
    KernelArg { op: &'static str, status: ClStatus },

    #[error("Release failed in {op}: {status}")]
    Release { op: &'static str, status: ClStatus },

    #[error("Memory object has not been allocated")]
    NotAllocated,

    #[error("Memory object is already allocated")]
    AlreadyAllocated,

    #[error("Image argument requested for a buffer without image dimensions")]
    MissingImageDimensions,

    #[error("Host access {current:?} does not permit {required:?}")]
    HostAccessMismatch {
        required: HostAccess,
        current: HostAccess,
    },

    #[error("Copy of {len} bytes exceeds buffer capacity {capacity}")]
    CopyLength { len: usize, capacity: usize },

    #[error("Device context has no command queues")]
    NoCommandQueues,
}

impl MemError {
    /// The device status code behind this error, if it came from a device call.
    #[must_use]
    pub const fn status(&self) -> Option<ClStatus> {
        match self {
            Self::Allocation { status, .. }
            | Self::Map { status, .. }
            | Self::Unmap { status, .. }
            | Self::ImageQuery { status, .. }
            | Self::Copy { status, .. }
            | Self::KernelArg { status, .. }
            | Self::Release { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// The failing device operation, if any.
    #[must_use]
    pub const fn op(&self) -> Option<&'static str> {
        match self {
            Self::Allocation { op, .. }
            | Self::Map { op, .. }
            | Self::Unmap { op, .. }
            | Self::ImageQuery { op, .. }
            | Self::Copy { op, .. }
            | Self::KernelArg { op, .. }
            | Self::Release { op, .. } => Some(*op),
            _ => None,
        }
    }

    /// Fatal errors leave the buffer unusable; everything else can be retried by the caller
    /// once the cause is addressed.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::Allocation { .. } | Self::MapAddressMismatch { .. }
        )
    }
}

pub type MemResult<T> = Result<T, MemError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_errors_carry_status_and_op() {
        let err = MemError::Map {
            op: "map_buffer",
            status: ClStatus::MAP_FAILURE,
        };
        assert_eq!(err.status(), Some(ClStatus::MAP_FAILURE));
        assert_eq!(err.op(), Some("map_buffer"));
        assert_eq!(
            err.to_string(),
            "Host map failed in map_buffer: MAP_FAILURE (-12)"
        );
        assert!(!err.is_fatal());
    }

    #[test]
    fn usage_errors_have_no_status() {
        let err = MemError::DeviceLocked { capacity: 16 };
        assert_eq!(err.status(), None);
        assert_eq!(err.op(), None);
    }

    #[test]
    fn fatal_classification() {
        assert!(MemError::MapAddressMismatch {
            expected: 0x1000,
            actual: 0x1040
        }
        .is_fatal());
        assert!(MemError::Allocation {
            op: "create_buffer",
            status: ClStatus::OUT_OF_RESOURCES
        }
        .is_fatal());
        assert!(!MemError::AlreadyDeviceLocked.is_fatal());
    }
}
