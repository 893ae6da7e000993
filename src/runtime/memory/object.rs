use super::allocation::{AllocationKind, DeviceAllocation};
use super::coherency::Transcode;
use super::guard::{DeviceAccess, DeviceAccessGuard};
use super::{
    AccessMode, HostAccess, Representation, ResidencyMode, ResidencyStrategy, RunParams,
};
use crate::device::{ClStatus, ImageDesc, ImageFormat, ImageInfo, ImageType, MemFlags, MemHandle};
use crate::error::{MemError, MemResult};
use crate::runtime::context::DeviceContext;
use std::cell::RefCell;
use std::ptr::{self, NonNull};
use std::sync::Arc;
use tracing::{debug, trace};

/// Mutable residency state of a memory object.
#[derive(Debug, Default)]
struct MemState {
    buffer: Option<DeviceAllocation>,
    image: Option<DeviceAllocation>,
    /// Host address of the mapped buffer, recorded at allocation and stable afterwards.
    host_ptr: Option<NonNull<u8>>,
    host_mapped: bool,
    host_access: HostAccess,
    device_locked: bool,
    fresh: Representation,
}

/// One logical buffer that can live as host-mapped memory, a device buffer and a device
/// image.
///
/// Host phases ([`MemoryObject::set_host_access`] and the byte accessors) and device phases
/// (a [`DeviceAccessGuard`] from [`MemoryObject::acquire_device_access`]) must alternate.
/// Requesting host access while a guard is alive fails with [`MemError::DeviceLocked`].
///
/// The object is not thread-safe. Closures passed to the byte accessors must not call back
/// into the same object.
#[derive(Debug)]
pub struct MemoryObject {
    context: Arc<DeviceContext>,
    capacity: usize,
    access_mode: AccessMode,
    residency_mode: ResidencyMode,
    dimensions: [u32; 3],
    state: RefCell<MemState>,
}

impl MemoryObject {
    #[must_use]
    pub fn new(
        context: Arc<DeviceContext>,
        capacity: usize,
        access_mode: AccessMode,
        residency_mode: ResidencyMode,
        dimensions: [u32; 3],
    ) -> Self {
        Self {
            context,
            capacity,
            access_mode,
            residency_mode,
            dimensions,
            state: RefCell::new(MemState::default()),
        }
    }

    // ===========================================================================================
    // Accessors
    // ===========================================================================================

    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    #[must_use]
    pub const fn access_mode(&self) -> AccessMode {
        self.access_mode
    }

    #[must_use]
    pub const fn residency_mode(&self) -> ResidencyMode {
        self.residency_mode
    }

    #[must_use]
    pub const fn residency_name(&self) -> &'static str {
        self.residency_mode.name()
    }

    #[must_use]
    pub const fn dimensions(&self) -> [u32; 3] {
        self.dimensions
    }

    /// True if the buffer can also be represented as an image.
    #[must_use]
    pub const fn has_dimensions(&self) -> bool {
        self.dimensions[0] > 0
    }

    #[must_use]
    pub fn is_allocated(&self) -> bool {
        self.state.borrow().buffer.is_some()
    }

    #[must_use]
    pub fn is_host_mapped(&self) -> bool {
        self.state.borrow().host_mapped
    }

    #[must_use]
    pub fn host_access(&self) -> HostAccess {
        self.state.borrow().host_access
    }

    #[must_use]
    pub fn is_device_locked(&self) -> bool {
        self.state.borrow().device_locked
    }

    #[must_use]
    pub fn fresh_representation(&self) -> Representation {
        self.state.borrow().fresh
    }

    #[must_use]
    pub fn has_image(&self) -> bool {
        self.state.borrow().image.is_some()
    }

    /// Address of the host view while mapped.
    #[must_use]
    pub fn host_ptr(&self) -> Option<NonNull<u8>> {
        let state = self.state.borrow();
        if state.host_mapped { state.host_ptr } else { None }
    }

    #[must_use]
    pub fn buffer_handle(&self) -> Option<MemHandle> {
        self.state.borrow().buffer.as_ref().map(DeviceAllocation::handle)
    }

    #[must_use]
    pub fn image_handle(&self) -> Option<MemHandle> {
        self.state.borrow().image.as_ref().map(DeviceAllocation::handle)
    }

    // ===========================================================================================
    // Allocation
    // ===========================================================================================

    /// Create the device buffer and map it into host memory.
    ///
    /// Must succeed before any other access. The buffer starts out mapped with the host access
    /// complementary to the device's (the host fills read-only buffers and reads write-only
    /// ones).
    ///
    /// # Errors
    /// - [`MemError::AlreadyAllocated`] on a second call.
    /// - [`MemError::Allocation`] if the device buffer cannot be created.
    /// - [`MemError::Map`] if the initial mapping fails; the buffer is released again.
    pub fn allocate(&self) -> MemResult<()> {
        let mut state = self.state.borrow_mut();
        if state.buffer.is_some() {
            return Err(MemError::AlreadyAllocated);
        }

        match ResidencyStrategy::select(self.residency_mode, self.context.info()) {
            ResidencyStrategy::MappedBuffer => {}
        }

        let api = self.context.api();
        let flags = self.access_mode.mem_flags() | MemFlags::ALLOC_HOST_PTR;
        let handle = api
            .create_buffer(self.context.handle(), flags, self.capacity)
            .map_err(|status| MemError::Allocation {
                op: "create_buffer",
                status,
            })?;
        let buffer =
            DeviceAllocation::new(Arc::clone(api), handle, AllocationKind::Buffer, self.capacity);

        let raw = api
            .map_buffer(
                self.context.queue(0),
                handle,
                true,
                self.access_mode.initial_map_flags(),
                0,
                self.capacity,
            )
            .map_err(|status| MemError::Map {
                op: "map_buffer",
                status,
            })?;
        let host_ptr = NonNull::new(raw).ok_or(MemError::Map {
            op: "map_buffer",
            status: ClStatus::MAP_FAILURE,
        })?;

        state.buffer = Some(buffer);
        state.host_ptr = Some(host_ptr);
        state.host_mapped = true;
        state.host_access = self.access_mode.initial_host_access();
        state.fresh = Representation::Buffer;

        debug!(
            ?handle,
            capacity = self.capacity,
            access = ?self.access_mode,
            residency = self.residency_mode.name(),
            "allocated mapped buffer"
        );
        Ok(())
    }

    /// Unmap the host view and release every device allocation.
    ///
    /// Best effort and idempotent: each failure is reported to the context and the remaining
    /// resources are still released.
    pub fn release_allocations(&self) {
        let mut state = self.state.borrow_mut();

        if let Err(e) = self.unmap(&mut state, 0) {
            self.context.report(&e);
            state.host_mapped = false;
            state.host_access = HostAccess::None;
        }

        if let Some(image) = state.image.take() {
            if let Err(e) = image.release() {
                self.context.report(&e);
            }
        }

        if let Some(buffer) = state.buffer.take() {
            if let Err(e) = buffer.release() {
                self.context.report(&e);
            }
        }

        state.host_ptr = None;
        state.fresh = Representation::Buffer;
    }

    // ===========================================================================================
    // Device Access
    // ===========================================================================================

    /// Lock the buffer for device use.
    ///
    /// The returned guard binds the buffer to kernel arguments; host access is refused until it
    /// is dropped.
    ///
    /// # Errors
    /// Returns [`MemError::AlreadyDeviceLocked`] if another guard is still alive.
    pub fn acquire_device_access(&self) -> MemResult<DeviceAccessGuard<'_>> {
        let mut state = self.state.borrow_mut();
        if state.device_locked {
            return Err(MemError::AlreadyDeviceLocked);
        }
        state.device_locked = true;
        drop(state);

        trace!(capacity = self.capacity, "device access acquired");
        Ok(DeviceAccessGuard::new(self, Arc::clone(self.context.api())))
    }

    // ===========================================================================================
    // Host Access
    // ===========================================================================================

    /// Make the buffer host accessible with `mode`, remapping if the current mapping differs.
    ///
    /// When the image holds newer contents they are copied back first, unless the host only
    /// writes. `HostAccess::None` just drops the current mapping.
    ///
    /// # Errors
    /// - [`MemError::DeviceLocked`] while a device guard is alive.
    /// - [`MemError::NotAllocated`] before [`MemoryObject::allocate`].
    /// - [`MemError::Unmap`], [`MemError::Map`], [`MemError::ImageQuery`], [`MemError::Copy`]
    ///   from the device.
    /// - [`MemError::MapAddressMismatch`] if the device maps the buffer at a new address.
    pub fn set_host_access(&self, mode: HostAccess, queue: usize) -> MemResult<()> {
        let mut state = self.state.borrow_mut();
        if state.device_locked {
            return Err(MemError::DeviceLocked {
                capacity: self.capacity,
            });
        }

        if state.host_mapped && state.host_access != mode {
            self.unmap(&mut state, queue)?;
        }

        if state.host_mapped || mode == HostAccess::None {
            return Ok(());
        }

        let buffer = state
            .buffer
            .as_ref()
            .map(DeviceAllocation::handle)
            .ok_or(MemError::NotAllocated)?;
        let expected = state.host_ptr.ok_or(MemError::NotAllocated)?;

        let (transcode, next) = state.fresh.for_host_map(state.image.is_some(), mode);
        if transcode == Transcode::ImageToBuffer {
            self.copy_image_to_buffer(&mut state, queue)?;
        }

        let raw = self
            .context
            .api()
            .map_buffer(
                self.context.queue(queue),
                buffer,
                self.context.blocking_map(),
                mode.map_flags(),
                0,
                self.capacity,
            )
            .map_err(|status| MemError::Map {
                op: "map_buffer",
                status,
            })?;

        if raw != expected.as_ptr() {
            if let Err(status) = self
                .context
                .api()
                .unmap(self.context.queue(queue), buffer, raw)
            {
                self.context.report(&MemError::Unmap {
                    op: "unmap",
                    status,
                });
            }
            return Err(MemError::MapAddressMismatch {
                expected: expected.as_ptr() as usize,
                actual: raw as usize,
            });
        }

        state.host_mapped = true;
        state.host_access = mode;
        state.fresh = next;
        trace!(?buffer, ?mode, queue, "mapped host view");
        Ok(())
    }

    /// Copy `src` into the start of the mapped host view.
    ///
    /// # Errors
    /// - [`MemError::HostAccessMismatch`] unless the buffer is mapped for writing.
    /// - [`MemError::CopyLength`] if `src` is longer than the buffer.
    ///
    /// # Panics
    /// Panics if called from inside a [`MemoryObject::with_host_bytes`] or
    /// [`MemoryObject::with_host_bytes_mut`] closure.
    pub fn copy_from_host(&self, src: &[u8], queue: usize) -> MemResult<()> {
        let state = self.state.borrow_mut();
        let dst = self.mapped_view(&state, HostAccess::Write, src.len())?;

        // SAFETY: `dst` addresses `capacity` mapped bytes and `src.len() <= capacity`. The
        // exclusive borrow of `state` rules out a live slice over the view.
        unsafe { ptr::copy_nonoverlapping(src.as_ptr(), dst.as_ptr(), src.len()) };

        trace!(len = src.len(), queue, "copied host data into mapped view");
        Ok(())
    }

    /// Copy the start of the mapped host view into `dst`.
    ///
    /// # Errors
    /// - [`MemError::HostAccessMismatch`] unless the buffer is mapped for reading.
    /// - [`MemError::CopyLength`] if `dst` is longer than the buffer.
    pub fn copy_to_host(&self, dst: &mut [u8], queue: usize) -> MemResult<()> {
        let state = self.state.borrow();
        let src = self.mapped_view(&state, HostAccess::Read, dst.len())?;

        // SAFETY: `src` addresses `capacity` mapped bytes and `dst.len() <= capacity`.
        unsafe { ptr::copy(src.as_ptr(), dst.as_mut_ptr(), dst.len()) };

        trace!(len = dst.len(), queue, "copied mapped view to host");
        Ok(())
    }

    /// Run `f` over the mapped bytes.
    ///
    /// # Errors
    /// Returns [`MemError::HostAccessMismatch`] unless the buffer is mapped for reading.
    ///
    /// # Panics
    /// Panics if `f` calls [`MemoryObject::copy_from_host`] or any other method of this object
    /// that writes the mapped bytes or changes its state.
    pub fn with_host_bytes<R>(&self, f: impl FnOnce(&[u8]) -> R) -> MemResult<R> {
        let state = self.state.borrow();
        let view = self.mapped_view(&state, HostAccess::Read, 0)?;

        // SAFETY: the view stays mapped while `state` is borrowed, and unmapping needs a
        // mutable borrow.
        let bytes = unsafe { std::slice::from_raw_parts(view.as_ptr(), self.capacity) };
        Ok(f(bytes))
    }

    /// Run `f` over the mapped bytes, mutably.
    ///
    /// # Errors
    /// Returns [`MemError::HostAccessMismatch`] unless the buffer is mapped for writing.
    ///
    /// # Panics
    /// Panics if `f` calls any method of this object.
    pub fn with_host_bytes_mut<R>(&self, f: impl FnOnce(&mut [u8]) -> R) -> MemResult<R> {
        let state = self.state.borrow_mut();
        let view = self.mapped_view(&state, HostAccess::Write, 0)?;

        // SAFETY: the exclusive borrow of `state` keeps the view mapped and unaliased by other
        // accessors for the duration of `f`.
        let bytes = unsafe { std::slice::from_raw_parts_mut(view.as_ptr(), self.capacity) };
        Ok(f(bytes))
    }

    // ===========================================================================================
    // Internals
    // ===========================================================================================

    /// The mapped host view, if mapped with the capability `required` asks for and at least
    /// `len` bytes long.
    fn mapped_view(
        &self,
        state: &MemState,
        required: HostAccess,
        len: usize,
    ) -> MemResult<NonNull<u8>> {
        let permitted = match required {
            HostAccess::Read => state.host_access.is_readable(),
            HostAccess::Write => state.host_access.is_writable(),
            HostAccess::ReadWrite => {
                state.host_access.is_readable() && state.host_access.is_writable()
            }
            HostAccess::None => true,
        };
        if !state.host_mapped || !permitted {
            return Err(MemError::HostAccessMismatch {
                required,
                current: state.host_access,
            });
        }
        if len > self.capacity {
            return Err(MemError::CopyLength {
                len,
                capacity: self.capacity,
            });
        }
        state.host_ptr.ok_or(MemError::NotAllocated)
    }

    /// Unmap the host view if mapped. Flags change only when the unmap succeeds.
    fn unmap(&self, state: &mut MemState, queue: usize) -> MemResult<()> {
        if !state.host_mapped {
            return Ok(());
        }
        let (Some(buffer), Some(host_ptr)) = (
            state.buffer.as_ref().map(DeviceAllocation::handle),
            state.host_ptr,
        ) else {
            state.host_mapped = false;
            state.host_access = HostAccess::None;
            return Ok(());
        };

        self.context
            .api()
            .unmap(self.context.queue(queue), buffer, host_ptr.as_ptr())
            .map_err(|status| MemError::Unmap {
                op: "unmap",
                status,
            })?;

        state.host_mapped = false;
        state.host_access = HostAccess::None;
        trace!(?buffer, queue, "unmapped host view");
        Ok(())
    }

    fn copy_image_to_buffer(&self, state: &mut MemState, queue: usize) -> MemResult<()> {
        let (Some(image), Some(buffer)) = (
            state.image.as_ref().map(DeviceAllocation::handle),
            state.buffer.as_ref().map(DeviceAllocation::handle),
        ) else {
            return Ok(());
        };
        let api = self.context.api();
        let query = |info: ImageInfo, op: &'static str| {
            api.image_info(image, info)
                .map_err(|status| MemError::ImageQuery { op, status })
        };

        let mut region = [1usize; 3];
        region[0] = query(ImageInfo::Width, "image_info(width)")?;
        let height = query(ImageInfo::Height, "image_info(height)")?;
        if height > 0 {
            region[1] = height;
        }
        let depth = query(ImageInfo::Depth, "image_info(depth)")?;
        if depth > 0 {
            region[2] = depth;
        }

        api.copy_image_to_buffer(self.context.queue(queue), image, buffer, [0; 3], region, 0)
            .map_err(|status| MemError::Copy {
                op: "copy_image_to_buffer",
                status,
            })?;

        state.fresh = Representation::Same;
        trace!(?image, ?buffer, ?region, "copied image to buffer");
        Ok(())
    }

    fn copy_buffer_to_image(
        &self,
        buffer: MemHandle,
        image: MemHandle,
        run: &RunParams,
        queue: usize,
    ) -> MemResult<()> {
        let mut region = [1usize; 3];
        for (extent, dim) in region
            .iter_mut()
            .zip(self.dimensions)
            .take(run.num_dims())
        {
            *extent = dim as usize;
        }

        self.context
            .api()
            .copy_buffer_to_image(self.context.queue(queue), buffer, image, 0, [0; 3], region)
            .map_err(|status| MemError::Copy {
                op: "copy_buffer_to_image",
                status,
            })?;

        trace!(?buffer, ?image, ?region, "copied buffer to image");
        Ok(())
    }

    fn create_image(&self, run: &RunParams) -> MemResult<DeviceAllocation> {
        if !self.has_dimensions() {
            return Err(MemError::MissingImageDimensions);
        }

        let dims = run.num_dims();
        let desc = ImageDesc {
            image_type: if dims > 2 {
                ImageType::Image3d
            } else {
                ImageType::Image2d
            },
            width: self.dimensions[0] as usize,
            height: if dims > 1 {
                self.dimensions[1] as usize
            } else {
                1
            },
            depth: if dims > 2 {
                self.dimensions[2] as usize
            } else {
                1
            },
        };
        let format = ImageFormat::RGBA_FLOAT;
        let flags = self.access_mode.mem_flags() | MemFlags::HOST_NO_ACCESS;

        let api = self.context.api();
        let handle = api
            .create_image(self.context.handle(), flags, format, &desc)
            .map_err(|status| MemError::Allocation {
                op: "create_image",
                status,
            })?;

        debug!(?handle, ?desc, "created image allocation");
        Ok(DeviceAllocation::new(
            Arc::clone(api),
            handle,
            AllocationKind::Image,
            desc.pixel_count() * format.bytes_per_pixel(),
        ))
    }
}

impl DeviceAccess for MemoryObject {
    fn release_device_access(&self) {
        self.state.borrow_mut().device_locked = false;
        trace!(capacity = self.capacity, "device access released");
    }

    fn unmap_for_device_use(&self, queue: usize) -> MemResult<()> {
        let mut state = self.state.borrow_mut();
        self.unmap(&mut state, queue)
    }

    fn resolve_kernel_memory(
        &self,
        run: &RunParams,
        is_image: bool,
        access: AccessMode,
        queue: usize,
    ) -> MemResult<MemHandle> {
        let mut state = self.state.borrow_mut();
        let buffer = state
            .buffer
            .as_ref()
            .map(DeviceAllocation::handle)
            .ok_or(MemError::NotAllocated)?;

        if !is_image {
            let (transcode, next) = state.fresh.for_buffer_bind(state.image.is_some(), access);
            if transcode == Transcode::ImageToBuffer {
                self.copy_image_to_buffer(&mut state, queue)?;
            }
            state.fresh = next;
            return Ok(buffer);
        }

        let image = if let Some(image) = state.image.as_ref().map(DeviceAllocation::handle) {
            image
        } else {
            let image = self.create_image(run)?;
            let handle = image.handle();
            state.image = Some(image);
            handle
        };

        let (transcode, next) = state.fresh.for_image_bind(access);
        if transcode == Transcode::BufferToImage {
            self.copy_buffer_to_image(buffer, image, run, queue)?;
            state.fresh = Representation::Same;
        }
        state.fresh = next;
        Ok(image)
    }
}

impl Drop for MemoryObject {
    fn drop(&mut self) {
        self.release_allocations();
    }
}

// ===============================================================================================
// Builder
// ===============================================================================================

/// Builder for [`MemoryObject`]; defaults to a read-write, non-shared buffer without image
/// dimensions.
#[derive(Debug)]
pub struct MemoryObjectBuilder {
    context: Arc<DeviceContext>,
    capacity: usize,
    access_mode: AccessMode,
    residency_mode: ResidencyMode,
    dimensions: [u32; 3],
}

impl MemoryObjectBuilder {
    #[must_use]
    pub const fn new(context: Arc<DeviceContext>, capacity: usize) -> Self {
        Self {
            context,
            capacity,
            access_mode: AccessMode::ReadWrite,
            residency_mode: ResidencyMode::None,
            dimensions: [0; 3],
        }
    }

    #[must_use]
    pub const fn with_access(mut self, access: AccessMode) -> Self {
        self.access_mode = access;
        self
    }

    #[must_use]
    pub const fn with_residency(mut self, residency: ResidencyMode) -> Self {
        self.residency_mode = residency;
        self
    }

    #[must_use]
    pub const fn with_dimensions(mut self, dimensions: [u32; 3]) -> Self {
        self.dimensions = dimensions;
        self
    }

    #[must_use]
    pub fn build(self) -> MemoryObject {
        MemoryObject::new(
            self.context,
            self.capacity,
            self.access_mode,
            self.residency_mode,
            self.dimensions,
        )
    }

    /// Build and allocate in one step.
    ///
    /// # Errors
    /// See [`MemoryObject::allocate`].
    pub fn allocate(self) -> MemResult<MemoryObject> {
        let memory = self.build();
        memory.allocate()?;
        Ok(memory)
    }
}
