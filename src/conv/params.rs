//! Convolution parameters: padding, stride, dilation, mode and padding policy

use crate::error::{Error, Result};
use std::fmt;

/// Standard (cross-correlation) or transposed convolution
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum ConvMode {
    /// Regular convolution
    #[default]
    Standard,
    /// Transposed (fractionally strided) convolution
    Transpose,
}

impl ConvMode {
    /// Parse a raw mode value (0 = Standard, 1 = Transpose)
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Standard),
            1 => Ok(Self::Transpose),
            v => Err(Error::bad_param("mode", format!("unknown convolution mode {v}"))),
        }
    }
}

/// How output spatial size is derived from input size
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Hash)]
pub enum PaddingPolicy {
    /// Use the explicit pad values
    #[default]
    Default,
    /// Output = ceil(input / stride)
    Same,
    /// Output = ceil((input - filter + 1) / stride)
    Valid,
}

impl PaddingPolicy {
    /// Parse a raw policy value (0 = Default, 1 = Same, 2 = Valid)
    pub fn from_raw(value: i32) -> Result<Self> {
        match value {
            0 => Ok(Self::Default),
            1 => Ok(Self::Same),
            2 => Ok(Self::Valid),
            v => Err(Error::bad_param(
                "padding_policy",
                format!("unknown padding policy {v}"),
            )),
        }
    }
}

/// Which gradient (or the forward pass) is being computed
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Direction {
    /// y = conv(x, w)
    Forward,
    /// dx from dy and w
    BackwardData,
    /// dw from dy and x
    BackwardWeights,
}

impl Direction {
    /// Short tag used in problem keys
    pub const fn tag(self) -> &'static str {
        match self {
            Self::Forward => "fwd",
            Self::BackwardData => "bwd",
            Self::BackwardWeights => "wrw",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Validated convolution parameters; immutable after construction
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct ConvolutionParams {
    mode: ConvMode,
    padding: PaddingPolicy,
    pad_h: usize,
    pad_w: usize,
    stride_h: usize,
    stride_w: usize,
    dilation_h: usize,
    dilation_w: usize,
}

impl ConvolutionParams {
    /// Standard-mode parameters with explicit padding
    pub fn new(
        pad_h: i32,
        pad_w: i32,
        stride_h: i32,
        stride_w: i32,
        dilation_h: i32,
        dilation_w: i32,
    ) -> Result<Self> {
        Self::with_mode(
            ConvMode::Standard,
            PaddingPolicy::Default,
            pad_h,
            pad_w,
            stride_h,
            stride_w,
            dilation_h,
            dilation_w,
        )
    }

    /// Parameters with an explicit mode and padding policy
    ///
    /// Rejects negative padding, non-positive stride or dilation, and
    /// asymmetric dilation.
    #[allow(clippy::too_many_arguments)]
    pub fn with_mode(
        mode: ConvMode,
        padding: PaddingPolicy,
        pad_h: i32,
        pad_w: i32,
        stride_h: i32,
        stride_w: i32,
        dilation_h: i32,
        dilation_w: i32,
    ) -> Result<Self> {
        if pad_h < 0 || pad_w < 0 {
            return Err(Error::bad_param(
                "pad",
                format!("padding must be non-negative, got {pad_h}x{pad_w}"),
            ));
        }
        if stride_h <= 0 || stride_w <= 0 {
            return Err(Error::bad_param(
                "stride",
                format!("stride must be positive, got {stride_h}x{stride_w}"),
            ));
        }
        if dilation_h <= 0 || dilation_w <= 0 {
            return Err(Error::bad_param(
                "dilation",
                format!("dilation must be positive, got {dilation_h}x{dilation_w}"),
            ));
        }
        if dilation_h != dilation_w {
            return Err(Error::bad_param(
                "dilation",
                format!("asymmetric dilation {dilation_h}x{dilation_w} is not supported"),
            ));
        }
        Ok(Self {
            mode,
            padding,
            pad_h: pad_h as usize,
            pad_w: pad_w as usize,
            stride_h: stride_h as usize,
            stride_w: stride_w as usize,
            dilation_h: dilation_h as usize,
            dilation_w: dilation_w as usize,
        })
    }

    /// Convolution mode
    #[inline]
    pub fn mode(&self) -> ConvMode {
        self.mode
    }

    /// Padding policy
    #[inline]
    pub fn padding_policy(&self) -> PaddingPolicy {
        self.padding
    }

    /// Vertical padding
    #[inline]
    pub fn pad_h(&self) -> usize {
        self.pad_h
    }

    /// Horizontal padding
    #[inline]
    pub fn pad_w(&self) -> usize {
        self.pad_w
    }

    /// Vertical stride
    #[inline]
    pub fn stride_h(&self) -> usize {
        self.stride_h
    }

    /// Horizontal stride
    #[inline]
    pub fn stride_w(&self) -> usize {
        self.stride_w
    }

    /// Vertical dilation
    #[inline]
    pub fn dilation_h(&self) -> usize {
        self.dilation_h
    }

    /// Horizontal dilation
    #[inline]
    pub fn dilation_w(&self) -> usize {
        self.dilation_w
    }

    /// Both strides are 1
    #[inline]
    pub fn is_unit_stride(&self) -> bool {
        self.stride_h == 1 && self.stride_w == 1
    }

    /// Both pads are 0
    #[inline]
    pub fn is_zero_pad(&self) -> bool {
        self.pad_h == 0 && self.pad_w == 0
    }

    /// Both dilations are 1
    #[inline]
    pub fn is_unit_dilation(&self) -> bool {
        self.dilation_h == 1 && self.dilation_w == 1
    }
}

impl Default for ConvolutionParams {
    fn default() -> Self {
        Self {
            mode: ConvMode::Standard,
            padding: PaddingPolicy::Default,
            pad_h: 0,
            pad_w: 0,
            stride_h: 1,
            stride_w: 1,
            dilation_h: 1,
            dilation_w: 1,
        }
    }
}
