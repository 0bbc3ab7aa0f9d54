//! Element types understood by the convolution engine
//!
//! The engine itself is type-agnostic apart from element sizes (which feed every
//! workspace formula) and the 32-bit-only gates of the Winograd and FFT paths.

use std::fmt;

/// Element type of a tensor descriptor
///
/// # Discriminant Values
///
/// Discriminants are stable and appear in problem keys:
/// F64=0, F32=1, F16=2, BF16=3.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
#[non_exhaustive]
#[repr(u8)]
pub enum DType {
    /// 64-bit floating point
    F64 = 0,
    /// 32-bit floating point (most common)
    F32 = 1,
    /// 16-bit floating point (IEEE 754)
    F16 = 2,
    /// 16-bit brain floating point
    BF16 = 3,
}

impl DType {
    /// Size of one element in bytes
    #[inline]
    pub const fn size_in_bytes(self) -> usize {
        match self {
            Self::F64 => 8,
            Self::F32 => 4,
            Self::F16 | Self::BF16 => 2,
        }
    }

    /// Returns true for the reduced-precision 16-bit types
    #[inline]
    pub const fn is_half(self) -> bool {
        matches!(self, Self::F16 | Self::BF16)
    }

    /// Short name for display and problem keys (e.g., "f32")
    pub const fn short_name(self) -> &'static str {
        match self {
            Self::F64 => "f64",
            Self::F32 => "f32",
            Self::F16 => "f16",
            Self::BF16 => "bf16",
        }
    }

    /// Preprocessor define selecting the kernel element type
    pub(crate) const fn kernel_define(self) -> &'static str {
        match self {
            Self::F64 => "CONV_FP64",
            Self::F32 => "CONV_FP32",
            Self::F16 => "CONV_FP16",
            Self::BF16 => "CONV_BFP16",
        }
    }
}

impl fmt::Display for DType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.short_name())
    }
}
