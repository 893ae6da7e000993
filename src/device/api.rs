use crate::device::flags::{MapFlags, MemFlags};
use crate::device::status::ClStatus;

/// Opaque handle to a device context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ContextHandle(pub u64);

/// Opaque handle to a command queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct QueueHandle(pub u64);

/// Opaque handle to a device memory object (buffer or image).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MemHandle(pub u64);

/// Opaque handle to a compiled kernel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct KernelHandle(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelOrder {
    Rgba,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ChannelType {
    Float,
}

/// Pixel layout of a device image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageFormat {
    pub order: ChannelOrder,
    pub data_type: ChannelType,
}

impl ImageFormat {
    pub const RGBA_FLOAT: Self = Self {
        order: ChannelOrder::Rgba,
        data_type: ChannelType::Float,
    };

    #[must_use]
    pub const fn bytes_per_pixel(self) -> usize {
        let channels = match self.order {
            ChannelOrder::Rgba => 4,
        };
        let width = match self.data_type {
            ChannelType::Float => 4,
        };
        channels * width
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageType {
    Image2d,
    Image3d,
}

/// Shape of a device image. Unused axes are `1`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageDesc {
    pub image_type: ImageType,
    pub width: usize,
    pub height: usize,
    pub depth: usize,
}

impl ImageDesc {
    #[must_use]
    pub const fn pixel_count(&self) -> usize {
        self.width * self.height * self.depth
    }
}

/// Image extent queried through [`DeviceApi::image_info`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageInfo {
    Width,
    Height,
    Depth,
}

/// Read-only capability descriptor of the device the context was created on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    /// (major, minor) API version reported by the device.
    pub version: (u32, u32),
    pub svm_coarse_grain: bool,
    pub svm_fine_grain: bool,
}

impl DeviceInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, version: (u32, u32)) -> Self {
        Self {
            name: name.into(),
            version,
            ..Default::default()
        }
    }

    #[must_use]
    pub const fn with_svm(mut self, coarse: bool, fine: bool) -> Self {
        self.svm_coarse_grain = coarse;
        self.svm_fine_grain = fine;
        self
    }
}

/// The command-queue and memory entry points the memory layer drives.
///
/// Implementations wrap a real accelerator runtime, or simulate one (see
/// [`SimDevice`](crate::device::sim::SimDevice)). Every call either completes or returns the
/// device status code describing the failure; nothing here retries.
pub trait DeviceApi: Send + Sync {
    /// Create a linear device buffer of `size` bytes.
    fn create_buffer(
        &self,
        context: ContextHandle,
        flags: MemFlags,
        size: usize,
    ) -> Result<MemHandle, ClStatus>;

    /// Create a device image.
    fn create_image(
        &self,
        context: ContextHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
    ) -> Result<MemHandle, ClStatus>;

    /// Drop the caller's reference to a buffer or image.
    fn release_mem(&self, mem: MemHandle) -> Result<(), ClStatus>;

    /// Map `size` bytes of `mem` starting at `offset` into host address space.
    ///
    /// With `blocking == false` the returned pointer is valid but the contents are only
    /// coherent once the queue has drained the map command.
    fn map_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        blocking: bool,
        flags: MapFlags,
        offset: usize,
        size: usize,
    ) -> Result<*mut u8, ClStatus>;

    /// Release a host mapping previously returned by [`DeviceApi::map_buffer`].
    fn unmap(&self, queue: QueueHandle, mem: MemHandle, host_ptr: *mut u8)
    -> Result<(), ClStatus>;

    /// Query one extent of an image. Axes the image does not have report `0`.
    fn image_info(&self, image: MemHandle, info: ImageInfo) -> Result<usize, ClStatus>;

    /// Enqueue a copy of `region` pixels from `src_image` into `dst_buffer`.
    fn copy_image_to_buffer(
        &self,
        queue: QueueHandle,
        src_image: MemHandle,
        dst_buffer: MemHandle,
        origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
    ) -> Result<(), ClStatus>;

    /// Enqueue a copy from `src_buffer` into `region` pixels of `dst_image`.
    fn copy_buffer_to_image(
        &self,
        queue: QueueHandle,
        src_buffer: MemHandle,
        dst_image: MemHandle,
        src_offset: usize,
        origin: [usize; 3],
        region: [usize; 3],
    ) -> Result<(), ClStatus>;

    /// Bind a memory object to argument slot `index` of `kernel`.
    fn set_kernel_arg(
        &self,
        kernel: KernelHandle,
        index: u32,
        mem: MemHandle,
    ) -> Result<(), ClStatus>;
}
