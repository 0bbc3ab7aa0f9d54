//! Output-shape derivation for the three convolution directions
//!
//! All functions are pure: they take descriptors by reference and return a
//! freshly built packed descriptor.

use super::params::{ConvMode, ConvolutionParams, PaddingPolicy};
use crate::error::{Error, Result};
use crate::tensor::TensorDesc;

fn check_dtypes(a: &TensorDesc, b: &TensorDesc) -> Result<()> {
    if a.dtype() != b.dtype() {
        return Err(Error::DTypeMismatch {
            lhs: a.dtype(),
            rhs: b.dtype(),
        });
    }
    Ok(())
}

/// Effective filter extent with dilation: `d * (k - 1) + 1`
#[inline]
pub(crate) fn dilated_extent(k: usize, dilation: usize) -> usize {
    dilation * k.saturating_sub(1) + 1
}

/// Standard-mode output length along one axis, clamped to at least 1
#[inline]
fn standard_len(input: usize, k: usize, pad: usize, stride: usize, dilation: usize) -> usize {
    let numer = input as i64 - dilated_extent(k, dilation) as i64 + 2 * pad as i64;
    (numer / stride as i64 + 1).max(1) as usize
}

/// Transpose-mode output length along one axis, clamped to at least 1
#[inline]
fn transpose_len(input: usize, k: usize, pad: usize, stride: usize, dilation: usize) -> usize {
    let len =
        (stride * input.saturating_sub(1) + dilated_extent(k, dilation)) as i64 - 2 * pad as i64;
    len.max(1) as usize
}

/// Output descriptor of the forward pass for input `x` and filter `w`
///
/// Channels must agree per mode: `x_c == w_c` (Standard) or `x_c == w_k`
/// (Transpose). `Same` and `Valid` policies ignore the explicit padding.
pub fn forward_output_desc(
    params: &ConvolutionParams,
    x: &TensorDesc,
    w: &TensorDesc,
) -> Result<TensorDesc> {
    check_dtypes(x, w)?;
    let [in_n, in_c, in_h, in_w] = x.nchw_dims()?;
    let [wei_k, wei_c, wei_h, wei_w] = w.nchw_dims()?;
    if wei_h == 0 || wei_w == 0 || in_h == 0 || in_w == 0 {
        return Err(Error::bad_param("tensor", "zero-sized spatial dimension"));
    }

    let expected_c = match params.mode() {
        ConvMode::Standard => wei_c,
        ConvMode::Transpose => wei_k,
    };
    if in_c != expected_c {
        return Err(Error::shape_mismatch(&[expected_c], &[in_c]));
    }

    let (out_c, out_h, out_w) = match (params.padding_policy(), params.mode()) {
        (PaddingPolicy::Default, ConvMode::Standard) => (
            wei_k,
            standard_len(
                in_h,
                wei_h,
                params.pad_h(),
                params.stride_h(),
                params.dilation_h(),
            ),
            standard_len(
                in_w,
                wei_w,
                params.pad_w(),
                params.stride_w(),
                params.dilation_w(),
            ),
        ),
        (PaddingPolicy::Default, ConvMode::Transpose) => (
            wei_c,
            transpose_len(
                in_h,
                wei_h,
                params.pad_h(),
                params.stride_h(),
                params.dilation_h(),
            ),
            transpose_len(
                in_w,
                wei_w,
                params.pad_w(),
                params.stride_w(),
                params.dilation_w(),
            ),
        ),
        (PaddingPolicy::Same, _) => (
            wei_k,
            in_h.div_ceil(params.stride_h()),
            in_w.div_ceil(params.stride_w()),
        ),
        (PaddingPolicy::Valid, _) => {
            if wei_h > in_h || wei_w > in_w {
                return Err(Error::bad_param(
                    "filter",
                    format!("{wei_h}x{wei_w} filter exceeds {in_h}x{in_w} input with Valid padding"),
                ));
            }
            (
                wei_k,
                (in_h - wei_h + 1).div_ceil(params.stride_h()),
                (in_w - wei_w + 1).div_ceil(params.stride_w()),
            )
        }
    };

    Ok(TensorDesc::nchw(x.dtype(), in_n, out_c, out_h, out_w))
}

/// Input-gradient descriptor recovered from output gradient `dy` and filter `w`
pub fn backward_output_desc(
    params: &ConvolutionParams,
    dy: &TensorDesc,
    w: &TensorDesc,
) -> Result<TensorDesc> {
    check_dtypes(dy, w)?;
    let [out_n, out_c, out_h, out_w] = dy.nchw_dims()?;
    let [wei_k, wei_c, wei_h, wei_w] = w.nchw_dims()?;

    match params.mode() {
        ConvMode::Standard => {
            if out_c != wei_k {
                return Err(Error::shape_mismatch(&[wei_k], &[out_c]));
            }
            let h = transpose_len(
                out_h,
                wei_h,
                params.pad_h(),
                params.stride_h(),
                params.dilation_h(),
            );
            let w_len = transpose_len(
                out_w,
                wei_w,
                params.pad_w(),
                params.stride_w(),
                params.dilation_w(),
            );
            Ok(TensorDesc::nchw(dy.dtype(), out_n, wei_c, h, w_len))
        }
        ConvMode::Transpose => {
            if out_c != wei_c {
                return Err(Error::shape_mismatch(&[wei_c], &[out_c]));
            }
            let h = standard_len(
                out_h,
                wei_h,
                params.pad_h(),
                params.stride_h(),
                params.dilation_h(),
            );
            let w_len = standard_len(
                out_w,
                wei_w,
                params.pad_w(),
                params.stride_w(),
                params.dilation_w(),
            );
            Ok(TensorDesc::nchw(dy.dtype(), out_n, wei_k, h, w_len))
        }
    }
}

/// Filter extent recovered from the large and small spatial lengths
fn recovered_filter_len(
    large: usize,
    small: usize,
    pad: usize,
    stride: usize,
    dilation: usize,
) -> Result<usize> {
    let extent = (2 * pad + large) as i64 - (stride * (small.max(1) - 1)) as i64;
    if extent < 1 {
        return Err(Error::shape_mismatch(&[large], &[small]));
    }
    Ok((extent as usize - 1) / dilation + 1)
}

/// Weight-gradient descriptor recovered from input `x` and output gradient `dy`
pub fn backward_weights_desc(
    params: &ConvolutionParams,
    x: &TensorDesc,
    dy: &TensorDesc,
) -> Result<TensorDesc> {
    check_dtypes(x, dy)?;
    let [in_n, in_c, in_h, in_w] = x.nchw_dims()?;
    let [out_n, out_c, out_h, out_w] = dy.nchw_dims()?;
    if in_n != out_n {
        return Err(Error::shape_mismatch(&[in_n], &[out_n]));
    }

    let (k, c, large_h, small_h, large_w, small_w) = match params.mode() {
        ConvMode::Standard => (out_c, in_c, in_h, out_h, in_w, out_w),
        ConvMode::Transpose => (in_c, out_c, out_h, in_h, out_w, in_w),
    };
    let kh = recovered_filter_len(
        large_h,
        small_h,
        params.pad_h(),
        params.stride_h(),
        params.dilation_h(),
    )?;
    let kw = recovered_filter_len(
        large_w,
        small_w,
        params.pad_w(),
        params.stride_w(),
        params.dilation_w(),
    )?;
    Ok(TensorDesc::nchw(x.dtype(), k, c, kh, kw))
}
