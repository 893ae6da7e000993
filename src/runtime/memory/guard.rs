use super::{AccessMode, KernelArg, RunParams};
use crate::device::{DeviceApi, MemHandle};
use crate::error::{MemError, MemResult};
use std::fmt;
use std::sync::Arc;
use tracing::trace;

/// The capabilities a memory object exposes to an outstanding [`DeviceAccessGuard`].
pub trait DeviceAccess {
    /// Device access has ended; host access may be requested again.
    fn release_device_access(&self);

    /// Unmap the host view, if mapped, so the device can use the memory.
    ///
    /// # Errors
    /// Returns [`MemError::Unmap`] if the device rejects the unmap.
    fn unmap_for_device_use(&self, queue: usize) -> MemResult<()>;

    /// Pick the device allocation backing a kernel argument, creating the image and running
    /// any buffer/image copy needed so the kernel sees the latest contents.
    ///
    /// # Errors
    /// Propagates allocation, image query and copy failures.
    fn resolve_kernel_memory(
        &self,
        run: &RunParams,
        is_image: bool,
        access: AccessMode,
        queue: usize,
    ) -> MemResult<MemHandle>;
}

/// Scoped device access to one memory object.
///
/// While the guard is alive the owner refuses host access. Dropping it always releases the
/// device lock, whether or not [`DeviceAccessGuard::bind`] succeeded.
#[must_use = "dropping the guard releases device access immediately"]
pub struct DeviceAccessGuard<'a> {
    owner: &'a dyn DeviceAccess,
    api: Arc<dyn DeviceApi>,
}

impl<'a> DeviceAccessGuard<'a> {
    /// The owner must already consider itself device-locked.
    pub fn new(owner: &'a dyn DeviceAccess, api: Arc<dyn DeviceApi>) -> Self {
        Self { owner, api }
    }

    /// Bind the owner's memory to `arg`.
    ///
    /// # Errors
    /// Returns the first failure among unmapping the host view, resolving the kernel memory
    /// and setting the kernel argument.
    pub fn bind(&self, arg: &KernelArg, run: &RunParams, queue: usize) -> MemResult<()> {
        self.owner.unmap_for_device_use(queue)?;

        let mem = self
            .owner
            .resolve_kernel_memory(run, arg.is_image, arg.access, queue)?;

        self.api
            .set_kernel_arg(arg.kernel, arg.index, mem)
            .map_err(|status| MemError::KernelArg {
                op: "set_kernel_arg",
                status,
            })?;

        trace!(kernel = ?arg.kernel, index = arg.index, ?mem, "bound kernel memory argument");
        Ok(())
    }
}

impl Drop for DeviceAccessGuard<'_> {
    fn drop(&mut self) {
        self.owner.release_device_access();
    }
}

impl fmt::Debug for DeviceAccessGuard<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DeviceAccessGuard").finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::{ClStatus, ContextHandle, KernelHandle, MemFlags, SimDevice, SimOp};
    use std::cell::{Cell, RefCell};

    /// Records the calls a guard makes.
    struct Recorder {
        mem: MemHandle,
        calls: RefCell<Vec<&'static str>>,
        released: Cell<bool>,
        fail_unmap: bool,
    }

    impl Recorder {
        fn new(mem: MemHandle, fail_unmap: bool) -> Self {
            Self {
                mem,
                calls: RefCell::new(Vec::new()),
                released: Cell::new(false),
                fail_unmap,
            }
        }
    }

    impl DeviceAccess for Recorder {
        fn release_device_access(&self) {
            self.released.set(true);
        }

        fn unmap_for_device_use(&self, _queue: usize) -> MemResult<()> {
            self.calls.borrow_mut().push("unmap");
            if self.fail_unmap {
                return Err(MemError::Unmap {
                    op: "unmap",
                    status: ClStatus::INVALID_MEM_OBJECT,
                });
            }
            Ok(())
        }

        fn resolve_kernel_memory(
            &self,
            _run: &RunParams,
            is_image: bool,
            _access: AccessMode,
            _queue: usize,
        ) -> MemResult<MemHandle> {
            self.calls
                .borrow_mut()
                .push(if is_image { "resolve_image" } else { "resolve_buffer" });
            Ok(self.mem)
        }
    }

    fn sim_with_buffer() -> (Arc<SimDevice>, MemHandle) {
        let sim = Arc::new(SimDevice::new());
        let mem = sim
            .create_buffer(ContextHandle(1), MemFlags::READ_WRITE, 64)
            .unwrap();
        (sim, mem)
    }

    #[test]
    fn bind_unmaps_then_resolves_then_sets_arg() {
        let (sim, mem) = sim_with_buffer();
        let owner = Recorder::new(mem, false);
        let kernel = KernelHandle(3);
        {
            let guard = DeviceAccessGuard::new(&owner, sim.clone());
            guard
                .bind(
                    &KernelArg::buffer(kernel, 2, AccessMode::ReadOnly),
                    &RunParams::new(1),
                    0,
                )
                .unwrap();
            assert!(!owner.released.get());
        }
        assert_eq!(*owner.calls.borrow(), ["unmap", "resolve_buffer"]);
        assert_eq!(sim.kernel_arg(kernel, 2), Some(mem));
        assert!(owner.released.get());
    }

    #[test]
    fn drop_releases_after_failed_unmap() {
        let (sim, mem) = sim_with_buffer();
        let owner = Recorder::new(mem, true);
        {
            let guard = DeviceAccessGuard::new(&owner, sim.clone());
            let err = guard
                .bind(
                    &KernelArg::image(KernelHandle(1), 0, AccessMode::WriteOnly),
                    &RunParams::new(2),
                    0,
                )
                .unwrap_err();
            assert!(matches!(err, MemError::Unmap { .. }));
        }
        assert_eq!(*owner.calls.borrow(), ["unmap"]);
        assert!(owner.released.get());
        assert_eq!(sim.stats().kernel_args_set, 0);
    }

    #[test]
    fn kernel_arg_failure_is_reported() {
        let (sim, mem) = sim_with_buffer();
        let owner = Recorder::new(mem, false);
        sim.fail_next(SimOp::SetKernelArg, ClStatus::INVALID_ARG_INDEX);

        let guard = DeviceAccessGuard::new(&owner, sim.clone());
        let err = guard
            .bind(
                &KernelArg::buffer(KernelHandle(1), 9, AccessMode::ReadWrite),
                &RunParams::new(1),
                0,
            )
            .unwrap_err();
        assert_eq!(
            err,
            MemError::KernelArg {
                op: "set_kernel_arg",
                status: ClStatus::INVALID_ARG_INDEX
            }
        );
        drop(guard);
        assert!(owner.released.get());
    }
}
