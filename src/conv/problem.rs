//! Resolved convolution problem and its canonical key
//!
//! A [`ConvProblem`] fixes the direction and the three NCHW geometries using
//! forward naming throughout: `x` is the data-side tensor (input or its
//! gradient), `w` the filter (or its gradient) and `y` the output side (output
//! or its gradient). Every calculator, predicate and executor reads this one
//! struct.

use super::params::{ConvMode, ConvolutionParams, Direction};
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::tensor::TensorDesc;
use std::fmt;

/// Packed NCHW extents
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Nchw {
    /// Batch (or filter output channels)
    pub n: usize,
    /// Channels (or filter input channels)
    pub c: usize,
    /// Height
    pub h: usize,
    /// Width
    pub w: usize,
}

impl Nchw {
    /// Build from explicit extents
    pub const fn new(n: usize, c: usize, h: usize, w: usize) -> Self {
        Self { n, c, h, w }
    }

    /// Read the extents of a 4-D descriptor
    pub fn from_desc(desc: &TensorDesc) -> Result<Self> {
        let [n, c, h, w] = desc.nchw_dims()?;
        Ok(Self { n, c, h, w })
    }

    /// Elements in one `h * w` plane
    #[inline]
    pub const fn spatial(&self) -> usize {
        self.h * self.w
    }

    /// Elements in one sample (`c * h * w`)
    #[inline]
    pub const fn sample(&self) -> usize {
        self.c * self.h * self.w
    }

    /// Total elements
    #[inline]
    pub const fn numel(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    /// Extents as an array
    #[inline]
    pub const fn dims(&self) -> [usize; 4] {
        [self.n, self.c, self.h, self.w]
    }
}

impl fmt::Display for Nchw {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}x{}x{}", self.n, self.c, self.h, self.w)
    }
}

/// One convolution problem in one direction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConvProblem {
    /// Direction being computed
    pub direction: Direction,
    /// Padding, stride, dilation and mode
    pub params: ConvolutionParams,
    /// Element type shared by all three tensors
    pub dtype: DType,
    /// Input (forward, backward-weights) or input gradient (backward-data)
    pub x: Nchw,
    /// Filter (forward, backward-data) or filter gradient (backward-weights); `n` = K
    pub w: Nchw,
    /// Output (forward) or output gradient (backward-data, backward-weights)
    pub y: Nchw,
}

impl ConvProblem {
    /// Resolve descriptors into a problem; all three must be 4-D and share a dtype
    pub fn new(
        direction: Direction,
        params: ConvolutionParams,
        x: &TensorDesc,
        w: &TensorDesc,
        y: &TensorDesc,
    ) -> Result<Self> {
        for other in [w, y] {
            if other.dtype() != x.dtype() {
                return Err(Error::DTypeMismatch {
                    lhs: x.dtype(),
                    rhs: other.dtype(),
                });
            }
        }
        Ok(Self {
            direction,
            params,
            dtype: x.dtype(),
            x: Nchw::from_desc(x)?,
            w: Nchw::from_desc(w)?,
            y: Nchw::from_desc(y)?,
        })
    }

    /// Check batch and channel agreement for the problem's mode
    ///
    /// Standard: `x_c == w_c`, `y_c == w_k`. Transpose: `x_c == w_k`, `y_c == w_c`.
    pub fn validate_channels(&self) -> Result<()> {
        let (x_c, y_c) = match self.params.mode() {
            ConvMode::Standard => (self.w.c, self.w.n),
            ConvMode::Transpose => (self.w.n, self.w.c),
        };
        if self.x.c != x_c {
            return Err(Error::shape_mismatch(&[x_c], &[self.x.c]));
        }
        if self.y.c != y_c {
            return Err(Error::shape_mismatch(&[y_c], &[self.y.c]));
        }
        if self.x.n != self.y.n {
            return Err(Error::shape_mismatch(&[self.x.n], &[self.y.n]));
        }
        Ok(())
    }

    /// Element size in bytes
    #[inline]
    pub fn elem_size(&self) -> usize {
        self.dtype.size_in_bytes()
    }

    /// Filter is `h x w`
    #[inline]
    pub fn filter_is(&self, h: usize, w: usize) -> bool {
        self.w.h == h && self.w.w == w
    }

    /// 1x1 filter with unit stride and no padding: GEMM runs directly on the tensors
    #[inline]
    pub fn is_pointwise(&self) -> bool {
        self.filter_is(1, 1) && self.params.is_unit_stride() && self.params.is_zero_pad()
    }

    /// Canonical key for caches and kernel lookup
    pub fn key(&self) -> ProblemKey {
        let p = &self.params;
        let mode = match p.mode() {
            ConvMode::Standard => "conv",
            ConvMode::Transpose => "trans",
        };
        ProblemKey {
            direction: self.direction,
            text: format!(
                "{}-{}-{}-p{}x{}-s{}x{}-d{}x{}-{}-{}-{}",
                self.x,
                self.w,
                self.y,
                p.pad_h(),
                p.pad_w(),
                p.stride_h(),
                p.stride_w(),
                p.dilation_h(),
                p.dilation_w(),
                mode,
                self.dtype,
                self.direction,
            ),
        }
    }
}

/// Canonical string identifying shapes, parameters and direction
///
/// Used as the network config when registering kernels and as the key of the
/// winner and workspace-size caches.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct ProblemKey {
    direction: Direction,
    text: String,
}

impl ProblemKey {
    /// Direction encoded in the key
    #[inline]
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Key text
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.text
    }

    /// Derived config for an auxiliary kernel of the same problem
    pub fn with_suffix(&self, suffix: &str) -> String {
        format!("{}{}", self.text, suffix)
    }
}

impl fmt::Display for ProblemKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}
