use crate::device::{DeviceApi, MemHandle};
use crate::error::{MemError, MemResult};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocationKind {
    Buffer,
    Image,
}

/// A RAII-wrapper around one device buffer or image.
///
/// The allocation is released exactly once: either through [`DeviceAllocation::release`],
/// which reports the outcome, or on drop, which logs failures.
pub struct DeviceAllocation {
    api: Arc<dyn DeviceApi>,
    handle: MemHandle,
    kind: AllocationKind,
    size: usize,
    released: bool,
}

impl DeviceAllocation {
    #[must_use]
    pub fn new(api: Arc<dyn DeviceApi>, handle: MemHandle, kind: AllocationKind, size: usize) -> Self {
        Self {
            api,
            handle,
            kind,
            size,
            released: false,
        }
    }

    #[must_use]
    pub const fn handle(&self) -> MemHandle {
        self.handle
    }

    #[must_use]
    pub const fn kind(&self) -> AllocationKind {
        self.kind
    }

    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Release the device allocation now.
    ///
    /// # Errors
    /// Returns [`MemError::Release`] if the device rejects the release. The allocation is
    /// considered gone either way and will not be released again on drop.
    pub fn release(mut self) -> MemResult<()> {
        self.release_inner()
    }

    fn release_inner(&mut self) -> MemResult<()> {
        if self.released {
            return Ok(());
        }
        self.released = true;
        self.api.release_mem(self.handle).map_err(|status| MemError::Release {
            op: match self.kind {
                AllocationKind::Buffer => "release_mem(buffer)",
                AllocationKind::Image => "release_mem(image)",
            },
            status,
        })?;
        debug!(handle = ?self.handle, kind = ?self.kind, size = self.size, "released device allocation");
        Ok(())
    }
}

impl Drop for DeviceAllocation {
    fn drop(&mut self) {
        if let Err(e) = self.release_inner() {
            error!(handle = ?self.handle, error = %e, "failed to release device allocation");
        }
    }
}

impl fmt::Debug for DeviceAllocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAllocation")
            .field("handle", &self.handle)
            .field("kind", &self.kind)
            .field("size", &self.size)
            .field("released", &self.released)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClStatus, ContextHandle, MemFlags, SimDevice, SimOp};

    fn buffer(sim: &Arc<SimDevice>) -> DeviceAllocation {
        let handle = sim
            .create_buffer(ContextHandle(1), MemFlags::READ_WRITE, 16)
            .unwrap();
        DeviceAllocation::new(sim.clone(), handle, AllocationKind::Buffer, 16)
    }

    #[test]
    fn drop_releases_once() {
        let sim = Arc::new(SimDevice::new());
        drop(buffer(&sim));
        assert_eq!(sim.stats().releases, 1);
        assert_eq!(sim.live_allocations(), 0);
    }

    #[test]
    fn explicit_release_is_not_repeated_on_drop() {
        let sim = Arc::new(SimDevice::new());
        let alloc = buffer(&sim);
        assert_eq!(alloc.kind(), AllocationKind::Buffer);
        assert_eq!(alloc.size(), 16);
        alloc.release().unwrap();
        assert_eq!(sim.stats().releases, 1);
    }

    #[test]
    fn failed_release_is_reported_and_not_retried() {
        let sim = Arc::new(SimDevice::new());
        let alloc = buffer(&sim);
        sim.fail_next(SimOp::Release, ClStatus::INVALID_MEM_OBJECT);

        let err = alloc.release().unwrap_err();
        assert_eq!(err.status(), Some(ClStatus::INVALID_MEM_OBJECT));
        assert_eq!(err.op(), Some("release_mem(buffer)"));
        assert_eq!(sim.stats().releases, 0);
    }
}
