//! Tensor descriptor: element type, dimensions and strides, no storage

use super::Dims;
use crate::dtype::DType;
use crate::error::{Error, Result};

/// Metadata for a tensor living in device memory
///
/// Descriptors are plain values. Derived descriptors (convolution outputs,
/// weight gradients) are always freshly constructed, never mutated in place.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct TensorDesc {
    dtype: DType,
    dims: Dims,
    strides: Dims,
}

impl TensorDesc {
    /// Create a packed (row-major) descriptor
    pub fn new(dtype: DType, dims: &[usize]) -> Self {
        let dims = Dims::from(dims);
        let strides = dims.packed_strides();
        Self {
            dtype,
            dims,
            strides,
        }
    }

    /// Create a descriptor with explicit strides
    pub fn with_strides(dtype: DType, dims: &[usize], strides: &[usize]) -> Result<Self> {
        if dims.len() != strides.len() {
            return Err(Error::bad_param(
                "strides",
                format!("{} strides for {} dims", strides.len(), dims.len()),
            ));
        }
        Ok(Self {
            dtype,
            dims: Dims::from(dims),
            strides: Dims::from(strides),
        })
    }

    /// Create a packed 4-D NCHW descriptor
    pub fn nchw(dtype: DType, n: usize, c: usize, h: usize, w: usize) -> Self {
        Self::new(dtype, &[n, c, h, w])
    }

    /// Element type
    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Dimensions
    #[inline]
    pub fn dims(&self) -> &[usize] {
        &self.dims
    }

    /// Strides in elements
    #[inline]
    pub fn strides(&self) -> &[usize] {
        &self.strides
    }

    /// Number of dimensions
    #[inline]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    /// Number of elements
    #[inline]
    pub fn element_count(&self) -> usize {
        self.dims.product()
    }

    /// Bytes covered by the descriptor when packed
    #[inline]
    pub fn byte_size(&self) -> usize {
        self.element_count() * self.dtype.size_in_bytes()
    }

    /// Whether the strides describe a packed row-major layout
    pub fn is_packed(&self) -> bool {
        self.strides == self.dims.packed_strides()
    }

    /// Dimensions as `[n, c, h, w]`, failing unless the descriptor is 4-D
    pub fn nchw_dims(&self) -> Result<[usize; 4]> {
        match self.dims() {
            &[n, c, h, w] => Ok([n, c, h, w]),
            dims => Err(Error::bad_param(
                "tensor",
                format!("expected a 4-D NCHW descriptor, got rank {}", dims.len()),
            )),
        }
    }
}
