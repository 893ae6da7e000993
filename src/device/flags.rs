//! Raw memory and map flag bits understood by the device API.

use std::ops::BitOr;

pub const MEM_READ_WRITE: u64 = 1 << 0;
pub const MEM_WRITE_ONLY: u64 = 1 << 1;
pub const MEM_READ_ONLY: u64 = 1 << 2;
pub const MEM_ALLOC_HOST_PTR: u64 = 1 << 4;
pub const MEM_HOST_NO_ACCESS: u64 = 1 << 9;

pub const MAP_READ: u64 = 1 << 0;
pub const MAP_WRITE: u64 = 1 << 1;
pub const MAP_WRITE_INVALIDATE_REGION: u64 = 1 << 2;

/// Allocation flags passed when creating a buffer or image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MemFlags(u64);

impl MemFlags {
    pub const READ_WRITE: Self = Self(MEM_READ_WRITE);
    pub const WRITE_ONLY: Self = Self(MEM_WRITE_ONLY);
    pub const READ_ONLY: Self = Self(MEM_READ_ONLY);
    pub const ALLOC_HOST_PTR: Self = Self(MEM_ALLOC_HOST_PTR);
    pub const HOST_NO_ACCESS: Self = Self(MEM_HOST_NO_ACCESS);

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for MemFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Flags controlling how a buffer is mapped into host address space.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct MapFlags(u64);

impl MapFlags {
    pub const READ: Self = Self(MAP_READ);
    pub const WRITE: Self = Self(MAP_WRITE);
    pub const WRITE_INVALIDATE_REGION: Self = Self(MAP_WRITE_INVALIDATE_REGION);

    #[must_use]
    pub const fn bits(self) -> u64 {
        self.0
    }

    /// True if the host may observe existing contents through this mapping.
    #[must_use]
    pub const fn reads(self) -> bool {
        self.0 & MAP_READ != 0
    }

    /// True if the host may modify contents through this mapping.
    #[must_use]
    pub const fn writes(self) -> bool {
        self.0 & (MAP_WRITE | MAP_WRITE_INVALIDATE_REGION) != 0
    }
}

impl BitOr for MapFlags {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_flags_combine() {
        let flags = MemFlags::READ_ONLY | MemFlags::ALLOC_HOST_PTR;
        assert!(flags.contains(MemFlags::READ_ONLY));
        assert!(flags.contains(MemFlags::ALLOC_HOST_PTR));
        assert!(!flags.contains(MemFlags::HOST_NO_ACCESS));
        assert_eq!(flags.bits(), MEM_READ_ONLY | MEM_ALLOC_HOST_PTR);
    }

    #[test]
    fn map_flags_direction() {
        assert!(MapFlags::READ.reads());
        assert!(!MapFlags::READ.writes());
        assert!(MapFlags::WRITE_INVALIDATE_REGION.writes());
        assert!(!MapFlags::WRITE_INVALIDATE_REGION.reads());
        let rw = MapFlags::READ | MapFlags::WRITE;
        assert!(rw.reads() && rw.writes());
    }
}
