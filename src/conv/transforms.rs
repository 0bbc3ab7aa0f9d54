//! Helper kernels for the GEMM paths
//!
//! im2col / col2im windowing, NCHW↔CNHW transposes and tensor fill.
//! Geometry is compiled in through defines; the network config
//! of each helper is its geometry string, so identical shapes share one
//! compiled kernel.

use crate::dtype::DType;
use crate::error::Result;
use crate::runtime::{Buffer, CompileOptions, ExecutionContext, KernelArg, KernelSpec, KernelTimer};

const HELPER_GROUP: usize = 256;

/// Window geometry for im2col and col2im
///
/// The image is `c x h x w`; the column matrix is
/// `(c * kh * kw) x (out_h * out_w)`, row-major.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct WindowGeometry {
    pub c: usize,
    pub h: usize,
    pub w: usize,
    pub kh: usize,
    pub kw: usize,
    pub out_h: usize,
    pub out_w: usize,
    pub pad_h: usize,
    pub pad_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
    pub dilation_h: usize,
    pub dilation_w: usize,
}

impl WindowGeometry {
    fn config(&self) -> String {
        format!(
            "c{}h{}w{}-k{}x{}-o{}x{}-p{}x{}-s{}x{}-d{}x{}",
            self.c,
            self.h,
            self.w,
            self.kh,
            self.kw,
            self.out_h,
            self.out_w,
            self.pad_h,
            self.pad_w,
            self.stride_h,
            self.stride_w,
            self.dilation_h,
            self.dilation_w
        )
    }

    fn options(&self, dtype: DType) -> CompileOptions {
        CompileOptions::new()
            .define(dtype.kernel_define(), 1)
            .define_usize("WIN_C", self.c)
            .define_usize("WIN_H", self.h)
            .define_usize("WIN_W", self.w)
            .define_usize("WIN_KH", self.kh)
            .define_usize("WIN_KW", self.kw)
            .define_usize("WIN_OUT_H", self.out_h)
            .define_usize("WIN_OUT_W", self.out_w)
            .define_usize("WIN_PAD_H", self.pad_h)
            .define_usize("WIN_PAD_W", self.pad_w)
            .define_usize("WIN_STRIDE_H", self.stride_h)
            .define_usize("WIN_STRIDE_W", self.stride_w)
            .define_usize("WIN_DILATION_H", self.dilation_h)
            .define_usize("WIN_DILATION_W", self.dilation_w)
    }

    /// Elements of the column matrix
    pub fn col_len(&self) -> usize {
        self.c * self.kh * self.kw * self.out_h * self.out_w
    }
}

/// Expand one image at `img_off` into the column buffer
pub(crate) fn im2col<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    dtype: DType,
    geom: &WindowGeometry,
    img: Buffer,
    img_off: usize,
    col: Buffer,
) -> Result<()> {
    let spec = KernelSpec::linear(
        "im2col.cl",
        "im2col",
        geom.col_len(),
        HELPER_GROUP,
        geom.options(dtype),
    );
    timer.compile_and_launch(
        "im2col",
        &geom.config(),
        &spec,
        &[
            KernelArg::Mem(img),
            KernelArg::size(img_off),
            KernelArg::Mem(col),
        ],
    )
}

/// Fold the column buffer back into one image at `img_off`
///
/// Every image element is written (overlapping windows are summed), so the
/// destination needs no prior clearing.
pub(crate) fn col2im<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    dtype: DType,
    geom: &WindowGeometry,
    col: Buffer,
    img: Buffer,
    img_off: usize,
) -> Result<()> {
    let spec = KernelSpec::linear(
        "col2im.cl",
        "col2im",
        geom.c * geom.h * geom.w,
        HELPER_GROUP,
        geom.options(dtype),
    );
    timer.compile_and_launch(
        "col2im",
        &geom.config(),
        &spec,
        &[
            KernelArg::Mem(col),
            KernelArg::Mem(img),
            KernelArg::size(img_off),
        ],
    )
}

/// Layout change between NCHW and CNHW with a spatial stride on the NCHW side
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct TransposeGeometry {
    pub n: usize,
    pub c: usize,
    /// Spatial size on the NCHW side
    pub nchw_h: usize,
    pub nchw_w: usize,
    /// Spatial size on the CNHW side
    pub cnhw_h: usize,
    pub cnhw_w: usize,
    pub stride_h: usize,
    pub stride_w: usize,
}

impl TransposeGeometry {
    fn config(&self) -> String {
        format!(
            "n{}c{}-{}x{}-{}x{}-s{}x{}",
            self.n,
            self.c,
            self.nchw_h,
            self.nchw_w,
            self.cnhw_h,
            self.cnhw_w,
            self.stride_h,
            self.stride_w
        )
    }

    fn options(&self, dtype: DType) -> CompileOptions {
        CompileOptions::new()
            .define(dtype.kernel_define(), 1)
            .define_usize("TR_N", self.n)
            .define_usize("TR_C", self.c)
            .define_usize("TR_NCHW_H", self.nchw_h)
            .define_usize("TR_NCHW_W", self.nchw_w)
            .define_usize("TR_CNHW_H", self.cnhw_h)
            .define_usize("TR_CNHW_W", self.cnhw_w)
            .define_usize("TR_STRIDE_H", self.stride_h)
            .define_usize("TR_STRIDE_W", self.stride_w)
    }

    /// Elements on the CNHW side
    pub fn cnhw_len(&self) -> usize {
        self.n * self.c * self.cnhw_h * self.cnhw_w
    }
}

/// Gather strided NCHW samples into a packed CNHW buffer
pub(crate) fn transpose_nchw_to_cnhw<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    dtype: DType,
    geom: &TransposeGeometry,
    src: Buffer,
    src_off: usize,
    dst: Buffer,
    dst_off: usize,
) -> Result<()> {
    let spec = KernelSpec::linear(
        "transpose.cl",
        "transpose_nchw2cnhw",
        geom.cnhw_len(),
        HELPER_GROUP,
        geom.options(dtype),
    );
    timer.compile_and_launch(
        "transpose_nchw2cnhw",
        &geom.config(),
        &spec,
        &[
            KernelArg::Mem(src),
            KernelArg::size(src_off),
            KernelArg::Mem(dst),
            KernelArg::size(dst_off),
        ],
    )
}

/// Scatter a packed CNHW buffer into strided NCHW positions
///
/// Positions skipped by the stride are left untouched.
pub(crate) fn transpose_cnhw_to_nchw<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    dtype: DType,
    geom: &TransposeGeometry,
    src: Buffer,
    src_off: usize,
    dst: Buffer,
    dst_off: usize,
) -> Result<()> {
    let spec = KernelSpec::linear(
        "transpose.cl",
        "transpose_cnhw2nchw",
        geom.cnhw_len(),
        HELPER_GROUP,
        geom.options(dtype),
    );
    timer.compile_and_launch(
        "transpose_cnhw2nchw",
        &geom.config(),
        &spec,
        &[
            KernelArg::Mem(src),
            KernelArg::size(src_off),
            KernelArg::Mem(dst),
            KernelArg::size(dst_off),
        ],
    )
}

/// Fill `count` elements starting at `offset` with `value`
pub(crate) fn set_tensor<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    dtype: DType,
    buffer: Buffer,
    offset: usize,
    count: usize,
    value: f32,
) -> Result<()> {
    let options = CompileOptions::new()
        .define(dtype.kernel_define(), 1)
        .define_usize("SET_COUNT", count);
    let spec = KernelSpec::linear("set_tensor.cl", "set_tensor", count, HELPER_GROUP, options);
    timer.compile_and_launch(
        "set_tensor",
        &format!("{dtype}-{count}"),
        &spec,
        &[
            KernelArg::Mem(buffer),
            KernelArg::size(offset),
            KernelArg::Float(value),
        ],
    )
}
