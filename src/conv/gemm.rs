//! GEMM reformulation of convolution
//!
//! Three paths, chosen per call by [`plan`]:
//!
//! | Path      | When                                      | Workspace            |
//! |-----------|-------------------------------------------|----------------------|
//! | Pointwise | 1x1, stride 1, no padding                 | none                 |
//! | Cnhw      | 1x1 fast path that fits the workspace     | transposed in + out  |
//! | Im2Col    | everything else                           | one column matrix    |
//!
//! Pointwise and Im2Col loop over the batch; Cnhw transposes the whole batch
//! once, runs one large GEMM and transposes back.

use super::invoke::{ExecArgs, RunMode};
use super::params::{ConvMode, Direction};
use super::problem::{ConvProblem, Nchw};
use super::transforms::{self, TransposeGeometry, WindowGeometry};
use super::workspace::WorkspaceRequirement;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::{
    Buffer, CompileOptions, ExecutionContext, KernelArg, KernelSpec, KernelTimer,
};

const GEMM_TILE: usize = 16;

// ============================================================================
// Geometry
// ============================================================================

/// Row-major `C[m x n] (+)= op(A)[m x k] * op(B)[k x n]`
///
/// With `trans_a`, A is stored `k x m`; with `trans_b`, B is stored `n x k`.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct GemmGeometry {
    pub m: usize,
    pub n: usize,
    pub k: usize,
    pub lda: usize,
    pub ldb: usize,
    pub ldc: usize,
    pub trans_a: bool,
    pub trans_b: bool,
    /// Add into C instead of overwriting it
    pub accumulate: bool,
    pub dtype: DType,
}

impl GemmGeometry {
    /// Packed geometry: leading dimensions follow from the stored shapes
    fn packed(m: usize, n: usize, k: usize, trans_a: bool, trans_b: bool, dtype: DType) -> Self {
        Self {
            m,
            n,
            k,
            lda: if trans_a { m } else { k },
            ldb: if trans_b { k } else { n },
            ldc: n,
            trans_a,
            trans_b,
            accumulate: false,
            dtype,
        }
    }

    fn accumulating(mut self) -> Self {
        self.accumulate = true;
        self
    }

    fn config(&self) -> String {
        format!(
            "m{}n{}k{}-ld{}x{}x{}-t{}{}-acc{}-{}",
            self.m,
            self.n,
            self.k,
            self.lda,
            self.ldb,
            self.ldc,
            self.trans_a as u8,
            self.trans_b as u8,
            self.accumulate as u8,
            self.dtype
        )
    }

    fn spec(&self) -> KernelSpec {
        let options = CompileOptions::new()
            .define(self.dtype.kernel_define(), 1)
            .define_usize("GEMM_M", self.m)
            .define_usize("GEMM_N", self.n)
            .define_usize("GEMM_K", self.k)
            .define_usize("GEMM_LDA", self.lda)
            .define_usize("GEMM_LDB", self.ldb)
            .define_usize("GEMM_LDC", self.ldc)
            .define("GEMM_TRANS_A", self.trans_a as i64)
            .define("GEMM_TRANS_B", self.trans_b as i64)
            .define("GEMM_ACCUMULATE", self.accumulate as i64);
        KernelSpec {
            program: "gemm.cl".to_string(),
            entry: "gemm".to_string(),
            local: [GEMM_TILE, GEMM_TILE, 1],
            global: [
                self.n.div_ceil(GEMM_TILE).max(1) * GEMM_TILE,
                self.m.div_ceil(GEMM_TILE).max(1) * GEMM_TILE,
                1,
            ],
            options,
        }
    }
}

#[allow(clippy::too_many_arguments)]
fn gemm<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    geom: &GemmGeometry,
    a: Buffer,
    a_off: usize,
    b: Buffer,
    b_off: usize,
    c: Buffer,
    c_off: usize,
) -> Result<()> {
    timer.compile_and_launch(
        "gemm",
        &geom.config(),
        &geom.spec(),
        &[
            KernelArg::Mem(a),
            KernelArg::size(a_off),
            KernelArg::Mem(b),
            KernelArg::size(b_off),
            KernelArg::Mem(c),
            KernelArg::size(c_off),
        ],
    )
}

// ============================================================================
// Path selection
// ============================================================================

/// Which GEMM formulation runs
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum GemmPath {
    Pointwise,
    Cnhw,
    Im2Col,
}

/// Pick the path for the supplied workspace and return its requirement in bytes
pub(crate) fn plan(args: &ExecArgs<'_>) -> Result<(GemmPath, usize)> {
    let problem = args.problem;
    let calc = args.calculator();
    let capacity = args.workspace.capacity();

    if calc.cnhw_eligible(problem) {
        if let WorkspaceRequirement::Bytes(required) = calc.gemm_transpose(problem) {
            if capacity >= required {
                return Ok((GemmPath::Cnhw, required));
            }
            // Strided 1x1 reports the CNHW size, so it is the requirement
            if !problem.is_pointwise() {
                return Err(Error::insufficient_workspace(args.algorithm, required, capacity));
            }
        }
    }
    if problem.is_pointwise() {
        return Ok((GemmPath::Pointwise, 0));
    }
    match calc.gemm(problem) {
        WorkspaceRequirement::Bytes(required) => {
            args.workspace.require(args.algorithm, required)?;
            Ok((GemmPath::Im2Col, required))
        }
        WorkspaceRequirement::MemoryConstrained { required, ceiling } => {
            Err(Error::MemoryConstrained {
                algorithm: args.algorithm,
                required,
                ceiling,
            })
        }
    }
}

/// Window over `image` producing `cols.h x cols.w` column positions
fn window(problem: &ConvProblem, image: Nchw, cols: Nchw) -> WindowGeometry {
    let p = &problem.params;
    WindowGeometry {
        c: image.c,
        h: image.h,
        w: image.w,
        kh: problem.w.h,
        kw: problem.w.w,
        out_h: cols.h,
        out_w: cols.w,
        pad_h: p.pad_h(),
        pad_w: p.pad_w(),
        stride_h: p.stride_h(),
        stride_w: p.stride_w(),
        dilation_h: p.dilation_h(),
        dilation_w: p.dilation_w(),
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Run the GEMM strategy; returns device time in milliseconds
pub(crate) fn run<C: ExecutionContext + ?Sized>(ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
    let (path, required) = plan(args)?;
    tracing::debug!(
        algorithm = args.algorithm,
        key = %args.key,
        ?path,
        workspace = required,
        "GEMM path"
    );

    let mut timer = KernelTimer::new(ctx);
    let per_sample = match (args.problem.params.mode(), args.problem.direction) {
        (ConvMode::Standard, Direction::Forward) => forward(&mut timer, args, path)?,
        (ConvMode::Standard, Direction::BackwardData) => backward_data(&mut timer, args, path)?,
        (ConvMode::Standard, Direction::BackwardWeights) => {
            backward_weights(&mut timer, args, path)?
        }
        (ConvMode::Transpose, Direction::Forward) => transpose_forward(&mut timer, args, path)?,
        (ConvMode::Transpose, Direction::BackwardData) => {
            transpose_backward_data(&mut timer, args, path)?
        }
        (ConvMode::Transpose, Direction::BackwardWeights) => {
            transpose_backward_weights(&mut timer, args, path)?
        }
    };
    if per_sample && args.mode == RunMode::Estimate {
        timer.scale(args.problem.x.n);
    }
    Ok(timer.finish())
}

/// Each path function returns whether it looped per sample
fn forward<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (x, w, y) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    match path {
        GemmPath::Cnhw => {
            let p = &pr.params;
            let x_t = TransposeGeometry {
                n: x.n,
                c: x.c,
                nchw_h: x.h,
                nchw_w: x.w,
                cnhw_h: y.h,
                cnhw_w: y.w,
                stride_h: p.stride_h(),
                stride_w: p.stride_w(),
            };
            let x_t_len = x_t.cnhw_len();
            transforms::transpose_nchw_to_cnhw(timer, pr.dtype, &x_t, b.x, 0, ws, 0)?;
            let geom = GemmGeometry::packed(w.n, x.n * y.spatial(), x.c, false, false, pr.dtype);
            gemm(timer, &geom, b.w, 0, ws, 0, ws, x_t_len)?;
            let y_t = TransposeGeometry {
                n: y.n,
                c: y.c,
                nchw_h: y.h,
                nchw_w: y.w,
                cnhw_h: y.h,
                cnhw_w: y.w,
                stride_h: 1,
                stride_w: 1,
            };
            transforms::transpose_cnhw_to_nchw(timer, pr.dtype, &y_t, ws, x_t_len, b.y, 0)?;
            Ok(false)
        }
        GemmPath::Pointwise => {
            let geom = GemmGeometry::packed(w.n, x.spatial(), x.c, false, false, pr.dtype);
            for i in 0..args.samples() {
                gemm(timer, &geom, b.w, 0, b.x, i * x.sample(), b.y, i * y.sample())?;
            }
            Ok(true)
        }
        GemmPath::Im2Col => {
            let win = window(pr, x, y);
            let geom =
                GemmGeometry::packed(w.n, y.spatial(), w.c * w.h * w.w, false, false, pr.dtype);
            for i in 0..args.samples() {
                transforms::im2col(timer, pr.dtype, &win, b.x, i * x.sample(), ws)?;
                gemm(timer, &geom, b.w, 0, ws, 0, b.y, i * y.sample())?;
            }
            Ok(true)
        }
    }
}

fn backward_data<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (dx, w, dy) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    match path {
        GemmPath::Cnhw => {
            let p = &pr.params;
            // strided positions of dx receive nothing, so clear first
            transforms::set_tensor(timer, pr.dtype, b.x, 0, dx.numel(), 0.0)?;
            let dy_t = TransposeGeometry {
                n: dy.n,
                c: dy.c,
                nchw_h: dy.h,
                nchw_w: dy.w,
                cnhw_h: dy.h,
                cnhw_w: dy.w,
                stride_h: 1,
                stride_w: 1,
            };
            let dy_t_len = dy_t.cnhw_len();
            transforms::transpose_nchw_to_cnhw(timer, pr.dtype, &dy_t, b.y, 0, ws, 0)?;
            let geom = GemmGeometry::packed(w.c, dy.n * dy.spatial(), w.n, true, false, pr.dtype);
            gemm(timer, &geom, b.w, 0, ws, 0, ws, dy_t_len)?;
            let dx_t = TransposeGeometry {
                n: dx.n,
                c: dx.c,
                nchw_h: dx.h,
                nchw_w: dx.w,
                cnhw_h: dy.h,
                cnhw_w: dy.w,
                stride_h: p.stride_h(),
                stride_w: p.stride_w(),
            };
            transforms::transpose_cnhw_to_nchw(timer, pr.dtype, &dx_t, ws, dy_t_len, b.x, 0)?;
            Ok(false)
        }
        GemmPath::Pointwise => {
            let geom = GemmGeometry::packed(w.c, dy.spatial(), w.n, true, false, pr.dtype);
            for i in 0..args.samples() {
                gemm(timer, &geom, b.w, 0, b.y, i * dy.sample(), b.x, i * dx.sample())?;
            }
            Ok(true)
        }
        GemmPath::Im2Col => {
            let win = window(pr, dx, dy);
            let geom =
                GemmGeometry::packed(w.c * w.h * w.w, dy.spatial(), w.n, true, false, pr.dtype);
            for i in 0..args.samples() {
                gemm(timer, &geom, b.w, 0, b.y, i * dy.sample(), ws, 0)?;
                transforms::col2im(timer, pr.dtype, &win, ws, b.x, i * dx.sample())?;
            }
            Ok(true)
        }
    }
}

fn backward_weights<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (x, dw, dy) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    if args.mode == RunMode::Execute {
        transforms::set_tensor(timer, pr.dtype, b.w, 0, dw.numel(), 0.0)?;
    }
    match path {
        GemmPath::Pointwise => {
            let geom =
                GemmGeometry::packed(dw.n, dw.c, x.spatial(), false, true, pr.dtype).accumulating();
            for i in 0..args.samples() {
                gemm(timer, &geom, b.y, i * dy.sample(), b.x, i * x.sample(), b.w, 0)?;
            }
        }
        GemmPath::Im2Col | GemmPath::Cnhw => {
            let win = window(pr, x, dy);
            let geom = GemmGeometry::packed(
                dw.n,
                dw.c * dw.h * dw.w,
                dy.spatial(),
                false,
                true,
                pr.dtype,
            )
            .accumulating();
            for i in 0..args.samples() {
                transforms::im2col(timer, pr.dtype, &win, b.x, i * x.sample(), ws)?;
                gemm(timer, &geom, b.y, i * dy.sample(), ws, 0, b.w, 0)?;
            }
        }
    }
    Ok(true)
}

fn transpose_forward<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (x, w, y) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    if path == GemmPath::Pointwise {
        let geom = GemmGeometry::packed(w.c, x.spatial(), w.n, true, false, pr.dtype);
        for i in 0..args.samples() {
            gemm(timer, &geom, b.w, 0, b.x, i * x.sample(), b.y, i * y.sample())?;
        }
        return Ok(true);
    }
    let win = window(pr, y, x);
    let geom = GemmGeometry::packed(w.c * w.h * w.w, x.spatial(), w.n, true, false, pr.dtype);
    for i in 0..args.samples() {
        gemm(timer, &geom, b.w, 0, b.x, i * x.sample(), ws, 0)?;
        transforms::col2im(timer, pr.dtype, &win, ws, b.y, i * y.sample())?;
    }
    Ok(true)
}

fn transpose_backward_data<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (dx, w, dy) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    if path == GemmPath::Pointwise {
        let geom = GemmGeometry::packed(w.n, dx.spatial(), w.c, false, false, pr.dtype);
        for i in 0..args.samples() {
            gemm(timer, &geom, b.w, 0, b.y, i * dy.sample(), b.x, i * dx.sample())?;
        }
        return Ok(true);
    }
    let win = window(pr, dy, dx);
    let geom = GemmGeometry::packed(w.n, dx.spatial(), w.c * w.h * w.w, false, false, pr.dtype);
    for i in 0..args.samples() {
        transforms::im2col(timer, pr.dtype, &win, b.y, i * dy.sample(), ws)?;
        gemm(timer, &geom, b.w, 0, ws, 0, b.x, i * dx.sample())?;
    }
    Ok(true)
}

fn transpose_backward_weights<C: ExecutionContext + ?Sized>(
    timer: &mut KernelTimer<'_, C>,
    args: &ExecArgs<'_>,
    path: GemmPath,
) -> Result<bool> {
    let pr = args.problem;
    let (x, dw, dy) = (pr.x, pr.w, pr.y);
    let b = args.buffers;
    let ws = args.workspace.buffer();

    if args.mode == RunMode::Execute {
        transforms::set_tensor(timer, pr.dtype, b.w, 0, dw.numel(), 0.0)?;
    }
    if path == GemmPath::Pointwise {
        let geom =
            GemmGeometry::packed(dw.n, dw.c, x.spatial(), false, true, pr.dtype).accumulating();
        for i in 0..args.samples() {
            gemm(timer, &geom, b.x, i * x.sample(), b.y, i * dy.sample(), b.w, 0)?;
        }
        return Ok(true);
    }
    let win = window(pr, dy, x);
    let geom = GemmGeometry::packed(dw.n, dw.c * dw.h * dw.w, x.spatial(), false, true, pr.dtype)
        .accumulating();
    for i in 0..args.samples() {
        transforms::im2col(timer, pr.dtype, &win, b.y, i * dy.sample(), ws)?;
        gemm(timer, &geom, b.x, i * x.sample(), ws, 0, b.w, 0)?;
    }
    Ok(true)
}
