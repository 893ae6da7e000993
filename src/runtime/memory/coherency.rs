//! Buffer/image freshness transitions.
//!
//! Each transition reports the copy that must run before the access proceeds and the
//! representation that is authoritative once the access has been granted. A copy that
//! succeeds leaves both representations equal, so callers record [`Representation::Same`]
//! right after it and the returned state once the access itself succeeds.

use super::{AccessMode, HostAccess, Representation};

/// Copy between the linear buffer and the image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transcode {
    None,
    BufferToImage,
    ImageToBuffer,
}

impl Representation {
    /// A kernel argument expects the image.
    ///
    /// Write-only kernels overwrite the whole image, so nothing is copied in. Readers get the
    /// buffer contents copied over when the buffer is newer. A read-write kernel may change
    /// the image, which makes it authoritative afterwards.
    #[must_use]
    pub const fn for_image_bind(self, access: AccessMode) -> (Transcode, Self) {
        match access {
            AccessMode::WriteOnly => (Transcode::None, Self::Image),
            AccessMode::ReadOnly | AccessMode::ReadWrite => {
                let transcode = match self {
                    Self::Buffer => Transcode::BufferToImage,
                    Self::Same | Self::Image => Transcode::None,
                };
                let next = match (self, access) {
                    (_, AccessMode::ReadWrite) | (Self::Image, _) => Self::Image,
                    _ => Self::Same,
                };
                (transcode, next)
            }
        }
    }

    /// A kernel argument expects the linear buffer.
    #[must_use]
    pub const fn for_buffer_bind(self, has_image: bool, access: AccessMode) -> (Transcode, Self) {
        let transcode = if has_image && matches!(self, Self::Image) {
            Transcode::ImageToBuffer
        } else {
            Transcode::None
        };
        let next = if !has_image || access.writes() {
            Self::Buffer
        } else if matches!(transcode, Transcode::ImageToBuffer) {
            Self::Same
        } else {
            self
        };
        (transcode, next)
    }

    /// The host maps the buffer with `mode`.
    ///
    /// Write-only maps skip the copy since the host replaces the contents.
    #[must_use]
    pub const fn for_host_map(self, has_image: bool, mode: HostAccess) -> (Transcode, Self) {
        let transcode = if has_image && matches!(self, Self::Image) && mode.is_readable() {
            Transcode::ImageToBuffer
        } else {
            Transcode::None
        };
        let next = if !has_image || mode.is_writable() {
            Self::Buffer
        } else if matches!(transcode, Transcode::ImageToBuffer) {
            Self::Same
        } else {
            self
        };
        (transcode, next)
    }
}
