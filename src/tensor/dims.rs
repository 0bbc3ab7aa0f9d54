//! Inline dimension lists for tensor descriptors

use smallvec::SmallVec;
use std::fmt;
use std::ops::Deref;

/// Convolution tensors are NCHW, so four entries never spill to the heap
const INLINE_DIMS: usize = 4;

/// Dimension sizes or element strides of a descriptor, outermost first
#[derive(Clone, PartialEq, Eq, Hash, Default)]
pub struct Dims(SmallVec<[usize; INLINE_DIMS]>);

impl Dims {
    /// Product of all entries (1 for an empty list)
    #[inline]
    pub fn product(&self) -> usize {
        self.0.iter().product()
    }

    /// Row-major strides, in elements, for a tensor with these sizes
    pub fn packed_strides(&self) -> Dims {
        let mut strides = Dims(SmallVec::from_elem(1, self.0.len()));
        for i in (1..self.0.len()).rev() {
            strides.0[i - 1] = strides.0[i] * self.0[i];
        }
        strides
    }
}

impl Deref for Dims {
    type Target = [usize];

    fn deref(&self) -> &[usize] {
        &self.0
    }
}

impl fmt::Debug for Dims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0.iter()).finish()
    }
}

impl From<&[usize]> for Dims {
    fn from(value: &[usize]) -> Self {
        Self(SmallVec::from_slice(value))
    }
}
