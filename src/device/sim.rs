//! In-memory device used for testing the memory layer without accelerator hardware.
//!
//! Buffers and images are plain heap storage. Mapping a buffer hands out the address of its
//! storage, so host writes through the mapping land directly in "device" memory, and image
//! copies move raw bytes between allocations. Every entry point is counted in [`SimStats`],
//! and a failure status can be injected for the next call of any [`SimOp`].

use crate::device::api::{
    ContextHandle, DeviceApi, ImageDesc, ImageFormat, ImageInfo, ImageType, KernelHandle,
    MemHandle, QueueHandle,
};
use crate::device::flags::{MapFlags, MemFlags};
use crate::device::status::ClStatus;
use parking_lot::Mutex;
use std::collections::HashMap;

/// Offset added to mapped addresses once drift is enabled.
const DRIFT_BYTES: usize = 64;

/// Device entry points that can be made to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SimOp {
    CreateBuffer,
    CreateImage,
    Release,
    Map,
    Unmap,
    ImageInfo,
    CopyImageToBuffer,
    CopyBufferToImage,
    SetKernelArg,
}

/// Call counters collected by [`SimDevice`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SimStats {
    pub buffers_created: usize,
    pub images_created: usize,
    pub releases: usize,
    pub maps: usize,
    pub unmaps: usize,
    pub image_to_buffer_copies: usize,
    pub buffer_to_image_copies: usize,
    pub kernel_args_set: usize,
    pub last_map_blocking: Option<bool>,
    pub last_map_flags: Option<MapFlags>,
    pub last_map_queue: Option<QueueHandle>,
}

impl SimStats {
    #[must_use]
    pub const fn allocations(&self) -> usize {
        self.buffers_created + self.images_created
    }

    #[must_use]
    pub const fn transcodes(&self) -> usize {
        self.image_to_buffer_copies + self.buffer_to_image_copies
    }
}

#[derive(Debug)]
enum SimKind {
    Buffer,
    Image(ImageDesc),
}

#[derive(Debug)]
struct SimMem {
    kind: SimKind,
    flags: MemFlags,
    bytes: Box<[u8]>,
    maps: usize,
    mapped: usize,
}

#[derive(Debug, Default)]
struct SimState {
    next_handle: u64,
    mems: HashMap<u64, SimMem>,
    stats: SimStats,
    failures: HashMap<SimOp, ClStatus>,
    drift: bool,
    kernel_args: HashMap<(u64, u32), MemHandle>,
}

impl SimState {
    fn check(&mut self, op: SimOp) -> Result<(), ClStatus> {
        match self.failures.remove(&op) {
            Some(status) => Err(status),
            None => Ok(()),
        }
    }

    fn insert(&mut self, mem: SimMem) -> MemHandle {
        self.next_handle += 1;
        self.mems.insert(self.next_handle, mem);
        MemHandle(self.next_handle)
    }
}

/// A [`DeviceApi`] backed entirely by host memory.
#[derive(Debug, Default)]
pub struct SimDevice {
    state: Mutex<SimState>,
}

impl SimDevice {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Snapshot of the call counters.
    pub fn stats(&self) -> SimStats {
        self.state.lock().stats.clone()
    }

    /// Make the next call of `op` fail with `status`. The injection is consumed by that call.
    pub fn fail_next(&self, op: SimOp, status: ClStatus) {
        self.state.lock().failures.insert(op, status);
    }

    /// When enabled, every map after a buffer's first one returns a shifted address.
    pub fn set_address_drift(&self, drift: bool) {
        self.state.lock().drift = drift;
    }

    /// Number of buffers and images not yet released.
    pub fn live_allocations(&self) -> usize {
        self.state.lock().mems.len()
    }

    /// Number of outstanding host mappings of `mem`.
    pub fn map_depth(&self, mem: MemHandle) -> usize {
        self.state.lock().mems.get(&mem.0).map_or(0, |m| m.mapped)
    }

    pub fn flags_of(&self, mem: MemHandle) -> Option<MemFlags> {
        self.state.lock().mems.get(&mem.0).map(|m| m.flags)
    }

    pub fn image_desc(&self, mem: MemHandle) -> Option<ImageDesc> {
        match self.state.lock().mems.get(&mem.0)?.kind {
            SimKind::Image(desc) => Some(desc),
            SimKind::Buffer => None,
        }
    }

    /// The memory object last bound to `index` of `kernel`.
    pub fn kernel_arg(&self, kernel: KernelHandle, index: u32) -> Option<MemHandle> {
        self.state.lock().kernel_args.get(&(kernel.0, index)).copied()
    }

    /// Overwrite the start of `mem` as a kernel would. Returns false if `mem` is unknown.
    pub fn write_device(&self, mem: MemHandle, data: &[u8]) -> bool {
        let mut state = self.state.lock();
        let Some(target) = state.mems.get_mut(&mem.0) else {
            return false;
        };
        let len = data.len().min(target.bytes.len());
        target.bytes[..len].copy_from_slice(&data[..len]);
        true
    }

    /// Copy of the raw contents of `mem`.
    pub fn read_device(&self, mem: MemHandle) -> Option<Vec<u8>> {
        self.state.lock().mems.get(&mem.0).map(|m| m.bytes.to_vec())
    }

    fn region_bytes(region: [usize; 3]) -> usize {
        region.iter().product::<usize>() * ImageFormat::RGBA_FLOAT.bytes_per_pixel()
    }
}

impl DeviceApi for SimDevice {
    fn create_buffer(
        &self,
        _context: ContextHandle,
        flags: MemFlags,
        size: usize,
    ) -> Result<MemHandle, ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::CreateBuffer)?;
        if size == 0 {
            return Err(ClStatus::INVALID_BUFFER_SIZE);
        }
        state.stats.buffers_created += 1;
        Ok(state.insert(SimMem {
            kind: SimKind::Buffer,
            flags,
            bytes: vec![0u8; size].into_boxed_slice(),
            maps: 0,
            mapped: 0,
        }))
    }

    fn create_image(
        &self,
        _context: ContextHandle,
        flags: MemFlags,
        format: ImageFormat,
        desc: &ImageDesc,
    ) -> Result<MemHandle, ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::CreateImage)?;
        if desc.pixel_count() == 0 {
            return Err(ClStatus::INVALID_IMAGE_SIZE);
        }
        if desc.image_type == ImageType::Image2d && desc.depth != 1 {
            return Err(ClStatus::INVALID_IMAGE_FORMAT_DESCRIPTOR);
        }
        state.stats.images_created += 1;
        let size = desc.pixel_count() * format.bytes_per_pixel();
        Ok(state.insert(SimMem {
            kind: SimKind::Image(*desc),
            flags,
            bytes: vec![0u8; size].into_boxed_slice(),
            maps: 0,
            mapped: 0,
        }))
    }

    fn release_mem(&self, mem: MemHandle) -> Result<(), ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::Release)?;
        if state.mems.remove(&mem.0).is_none() {
            return Err(ClStatus::INVALID_MEM_OBJECT);
        }
        state.stats.releases += 1;
        Ok(())
    }

    fn map_buffer(
        &self,
        queue: QueueHandle,
        mem: MemHandle,
        blocking: bool,
        flags: MapFlags,
        offset: usize,
        size: usize,
    ) -> Result<*mut u8, ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::Map)?;
        let drift = state.drift;
        let target = state
            .mems
            .get_mut(&mem.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        if !matches!(target.kind, SimKind::Buffer) {
            return Err(ClStatus::INVALID_MEM_OBJECT);
        }
        if offset + size > target.bytes.len() {
            return Err(ClStatus::INVALID_VALUE);
        }
        let shift = if drift && target.maps > 0 {
            DRIFT_BYTES
        } else {
            0
        };
        target.maps += 1;
        target.mapped += 1;
        let ptr = target.bytes.as_mut_ptr().wrapping_add(offset + shift);

        state.stats.maps += 1;
        state.stats.last_map_blocking = Some(blocking);
        state.stats.last_map_flags = Some(flags);
        state.stats.last_map_queue = Some(queue);
        Ok(ptr)
    }

    fn unmap(
        &self,
        _queue: QueueHandle,
        mem: MemHandle,
        _host_ptr: *mut u8,
    ) -> Result<(), ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::Unmap)?;
        let target = state
            .mems
            .get_mut(&mem.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        if target.mapped == 0 {
            return Err(ClStatus::INVALID_VALUE);
        }
        target.mapped -= 1;
        state.stats.unmaps += 1;
        Ok(())
    }

    fn image_info(&self, image: MemHandle, info: ImageInfo) -> Result<usize, ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::ImageInfo)?;
        let SimKind::Image(desc) = state
            .mems
            .get(&image.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?
            .kind
        else {
            return Err(ClStatus::INVALID_MEM_OBJECT);
        };
        Ok(match (info, desc.image_type) {
            (ImageInfo::Width, _) => desc.width,
            (ImageInfo::Height, _) => desc.height,
            (ImageInfo::Depth, ImageType::Image2d) => 0,
            (ImageInfo::Depth, ImageType::Image3d) => desc.depth,
        })
    }

    fn copy_image_to_buffer(
        &self,
        _queue: QueueHandle,
        src_image: MemHandle,
        dst_buffer: MemHandle,
        _origin: [usize; 3],
        region: [usize; 3],
        dst_offset: usize,
    ) -> Result<(), ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::CopyImageToBuffer)?;
        let src = state
            .mems
            .get(&src_image.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?
            .bytes
            .clone();
        let dst = state
            .mems
            .get_mut(&dst_buffer.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let available = dst.bytes.len().saturating_sub(dst_offset);
        let len = Self::region_bytes(region).min(src.len()).min(available);
        dst.bytes[dst_offset..dst_offset + len].copy_from_slice(&src[..len]);
        state.stats.image_to_buffer_copies += 1;
        Ok(())
    }

    fn copy_buffer_to_image(
        &self,
        _queue: QueueHandle,
        src_buffer: MemHandle,
        dst_image: MemHandle,
        src_offset: usize,
        _origin: [usize; 3],
        region: [usize; 3],
    ) -> Result<(), ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::CopyBufferToImage)?;
        let src = state
            .mems
            .get(&src_buffer.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?
            .bytes
            .clone();
        let dst = state
            .mems
            .get_mut(&dst_image.0)
            .ok_or(ClStatus::INVALID_MEM_OBJECT)?;
        let available = src.len().saturating_sub(src_offset);
        let len = Self::region_bytes(region)
            .min(dst.bytes.len())
            .min(available);
        dst.bytes[..len].copy_from_slice(&src[src_offset..src_offset + len]);
        state.stats.buffer_to_image_copies += 1;
        Ok(())
    }

    fn set_kernel_arg(
        &self,
        kernel: KernelHandle,
        index: u32,
        mem: MemHandle,
    ) -> Result<(), ClStatus> {
        let mut state = self.state.lock();
        state.check(SimOp::SetKernelArg)?;
        if !state.mems.contains_key(&mem.0) {
            return Err(ClStatus::INVALID_ARG_VALUE);
        }
        state.kernel_args.insert((kernel.0, index), mem);
        state.stats.kernel_args_set += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CTX: ContextHandle = ContextHandle(1);
    const QUEUE: QueueHandle = QueueHandle(1);

    #[test]
    fn injected_failure_is_consumed() {
        let sim = SimDevice::new();
        sim.fail_next(SimOp::CreateBuffer, ClStatus::OUT_OF_RESOURCES);

        let first = sim.create_buffer(CTX, MemFlags::READ_WRITE, 64);
        assert_eq!(first, Err(ClStatus::OUT_OF_RESOURCES));

        let second = sim.create_buffer(CTX, MemFlags::READ_WRITE, 64);
        assert!(second.is_ok());
        assert_eq!(sim.stats().buffers_created, 1);
    }

    #[test]
    fn map_returns_storage_address() {
        let sim = SimDevice::new();
        let mem = sim.create_buffer(CTX, MemFlags::READ_WRITE, 8).unwrap();
        let first = sim
            .map_buffer(QUEUE, mem, true, MapFlags::WRITE, 0, 8)
            .unwrap();
        unsafe { first.write(7) };
        sim.unmap(QUEUE, mem, first).unwrap();

        let second = sim
            .map_buffer(QUEUE, mem, true, MapFlags::READ, 0, 8)
            .unwrap();
        assert_eq!(first, second);
        assert_eq!(sim.read_device(mem).unwrap()[0], 7);
    }

    #[test]
    fn drift_shifts_later_maps() {
        let sim = SimDevice::new();
        sim.set_address_drift(true);
        let mem = sim.create_buffer(CTX, MemFlags::READ_WRITE, 128).unwrap();
        let first = sim.map_buffer(QUEUE, mem, true, MapFlags::READ, 0, 128).unwrap();
        sim.unmap(QUEUE, mem, first).unwrap();
        let second = sim.map_buffer(QUEUE, mem, true, MapFlags::READ, 0, 128).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn unmap_without_map_is_rejected() {
        let sim = SimDevice::new();
        let mem = sim.create_buffer(CTX, MemFlags::READ_WRITE, 8).unwrap();
        let result = sim.unmap(QUEUE, mem, std::ptr::null_mut());
        assert_eq!(result, Err(ClStatus::INVALID_VALUE));
    }

    #[test]
    fn image_copies_move_bytes() {
        let sim = SimDevice::new();
        let desc = ImageDesc {
            image_type: ImageType::Image2d,
            width: 2,
            height: 1,
            depth: 1,
        };
        let buffer = sim.create_buffer(CTX, MemFlags::READ_WRITE, 32).unwrap();
        let image = sim
            .create_image(CTX, MemFlags::READ_WRITE, ImageFormat::RGBA_FLOAT, &desc)
            .unwrap();
        assert_eq!(sim.image_info(image, ImageInfo::Depth), Ok(0));

        assert!(sim.write_device(buffer, &[9u8; 32]));
        sim.copy_buffer_to_image(QUEUE, buffer, image, 0, [0; 3], [2, 1, 1])
            .unwrap();
        assert_eq!(sim.read_device(image).unwrap(), vec![9u8; 32]);

        assert!(sim.write_device(image, &[3u8; 32]));
        sim.copy_image_to_buffer(QUEUE, image, buffer, [0; 3], [2, 1, 1], 0)
            .unwrap();
        assert_eq!(sim.read_device(buffer).unwrap(), vec![3u8; 32]);
        assert_eq!(sim.stats().transcodes(), 2);
    }

    #[test]
    fn release_twice_fails() {
        let sim = SimDevice::new();
        let mem = sim.create_buffer(CTX, MemFlags::READ_WRITE, 8).unwrap();
        assert!(sim.release_mem(mem).is_ok());
        assert_eq!(sim.release_mem(mem), Err(ClStatus::INVALID_MEM_OBJECT));
        assert_eq!(sim.stats().releases, 1);
        assert_eq!(sim.live_allocations(), 0);
    }
}
