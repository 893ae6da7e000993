use std::fmt;

/// A raw status code returned by the device API.
///
/// Negative values are errors; `0` is success. The named constants cover the codes the memory
/// layer can observe from buffer, image and kernel-argument calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ClStatus(pub i32);

impl ClStatus {
    pub const SUCCESS: Self = Self(0);
    pub const DEVICE_NOT_FOUND: Self = Self(-1);
    pub const DEVICE_NOT_AVAILABLE: Self = Self(-2);
    pub const MEM_OBJECT_ALLOCATION_FAILURE: Self = Self(-4);
    pub const OUT_OF_RESOURCES: Self = Self(-5);
    pub const OUT_OF_HOST_MEMORY: Self = Self(-6);
    pub const MEM_COPY_OVERLAP: Self = Self(-8);
    pub const IMAGE_FORMAT_NOT_SUPPORTED: Self = Self(-10);
    pub const MAP_FAILURE: Self = Self(-12);
    pub const INVALID_VALUE: Self = Self(-30);
    pub const INVALID_CONTEXT: Self = Self(-34);
    pub const INVALID_COMMAND_QUEUE: Self = Self(-36);
    pub const INVALID_MEM_OBJECT: Self = Self(-38);
    pub const INVALID_IMAGE_FORMAT_DESCRIPTOR: Self = Self(-39);
    pub const INVALID_IMAGE_SIZE: Self = Self(-40);
    pub const INVALID_KERNEL: Self = Self(-48);
    pub const INVALID_ARG_INDEX: Self = Self(-49);
    pub const INVALID_ARG_VALUE: Self = Self(-50);
    pub const INVALID_ARG_SIZE: Self = Self(-51);
    pub const INVALID_OPERATION: Self = Self(-59);
    pub const INVALID_BUFFER_SIZE: Self = Self(-61);

    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 == 0
    }

    /// Symbolic name of the status, or `"UNKNOWN"` for codes outside the table.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self.0 {
            0 => "SUCCESS",
            -1 => "DEVICE_NOT_FOUND",
            -2 => "DEVICE_NOT_AVAILABLE",
            -4 => "MEM_OBJECT_ALLOCATION_FAILURE",
            -5 => "OUT_OF_RESOURCES",
            -6 => "OUT_OF_HOST_MEMORY",
            -8 => "MEM_COPY_OVERLAP",
            -10 => "IMAGE_FORMAT_NOT_SUPPORTED",
            -12 => "MAP_FAILURE",
            -30 => "INVALID_VALUE",
            -34 => "INVALID_CONTEXT",
            -36 => "INVALID_COMMAND_QUEUE",
            -38 => "INVALID_MEM_OBJECT",
            -39 => "INVALID_IMAGE_FORMAT_DESCRIPTOR",
            -40 => "INVALID_IMAGE_SIZE",
            -48 => "INVALID_KERNEL",
            -49 => "INVALID_ARG_INDEX",
            -50 => "INVALID_ARG_VALUE",
            -51 => "INVALID_ARG_SIZE",
            -59 => "INVALID_OPERATION",
            -61 => "INVALID_BUFFER_SIZE",
            _ => "UNKNOWN",
        }
    }
}

impl fmt::Display for ClStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name(), self.0)
    }
}
