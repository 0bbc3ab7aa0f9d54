//! Direct convolution kernels
//!
//! A direct solution is a short list of [`KernelStep`]s built from the
//! problem alone. Search registers the kernels under `(algorithm, key)`;
//! execution looks them up again, so running a direct algorithm before a
//! search for the same problem fails with `KernelNotFound`.

use super::applicability::{
    is_bwd_weights_direct_applicable, is_direct_applicable, is_winograd_applicable,
    prefers_winograd_over_direct,
};
use super::invoke::{ExecArgs, KernelStep, run_steps};
use super::params::{ConvMode, Direction};
use super::problem::ConvProblem;
use crate::dtype::DType;
use crate::error::{Error, Result};
use crate::runtime::{CompileOptions, ExecutionContext, KernelArg, KernelSpec};

/// Output rows per tile of the 11x11 kernel
const ROW_TILE: usize = 8;
/// Samples summed per partial result in the backward-weights main kernel
pub(crate) const WRW_BATCH_TILE: usize = 4;
const DIRECT_GROUP: usize = 64;

/// Whether any direct solution may be tried for the problem
pub(crate) fn is_enabled(args: &ExecArgs<'_>) -> bool {
    let pr = args.problem;
    if !args.config.direct_enabled
        || pr.params.mode() != ConvMode::Standard
        || !pr.params.is_unit_dilation()
    {
        return false;
    }
    match pr.direction {
        Direction::BackwardWeights => is_bwd_weights_direct_applicable(pr) && pr.w.w >= pr.w.h,
        _ => {
            let winograd_wins = is_winograd_applicable(args.device, args.config, pr)
                && prefers_winograd_over_direct(pr);
            is_direct_applicable(pr) && !winograd_wins
        }
    }
}

/// Run the direct strategy; returns device time in milliseconds
pub(crate) fn run<C: ExecutionContext + ?Sized>(ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
    if !is_enabled(args) {
        return Err(Error::not_applicable(
            args.algorithm,
            "no direct kernel for this problem",
        ));
    }
    let steps = match args.problem.direction {
        Direction::BackwardWeights => {
            args.workspace
                .require(args.algorithm, wrw_workspace(args.problem))?;
            wrw_solution(args)
        }
        _ => solution(args),
    };
    tracing::trace!(
        algorithm = args.algorithm,
        kernels = steps.len(),
        "direct solution"
    );
    run_steps(ctx, args.mode, &steps)
}

// ============================================================================
// Forward / backward-data
// ============================================================================

fn uses_asm_1x1(problem: &ConvProblem) -> bool {
    problem.is_pointwise() && problem.dtype == DType::F32
}

/// Geometry defines in forward naming
fn geometry(problem: &ConvProblem) -> CompileOptions {
    let p = &problem.params;
    let (x, w, y) = (&problem.x, &problem.w, &problem.y);
    CompileOptions::new()
        .define(problem.dtype.kernel_define(), 1)
        .define_usize("MLO_BATCH_SZ", x.n)
        .define_usize("MLO_N_INPUTS", x.c)
        .define_usize("MLO_IN_HEIGHT", x.h)
        .define_usize("MLO_IN_WIDTH", x.w)
        .define_usize("MLO_N_OUTPUTS", w.n)
        .define_usize("MLO_OUT_HEIGHT", y.h)
        .define_usize("MLO_OUT_WIDTH", y.w)
        .define_usize("MLO_FILTER_SIZE1", w.h)
        .define_usize("MLO_FILTER_SIZE0", w.w)
        .define_usize("MLO_FILTER_PAD1", p.pad_h())
        .define_usize("MLO_FILTER_PAD0", p.pad_w())
        .define_usize("MLO_FILTER_STRIDE1", p.stride_h())
        .define_usize("MLO_FILTER_STRIDE0", p.stride_w())
}

/// 12-argument precompiled calling convention
fn asm_args(
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    k: usize,
    groups: usize,
    flags: i64,
) -> Vec<KernelArg> {
    vec![
        KernelArg::size(n),
        KernelArg::size(c),
        KernelArg::size(h),
        KernelArg::size(w),
        KernelArg::size(k),
        KernelArg::size(groups),
        KernelArg::Int(flags),
        KernelArg::Int(0),
    ]
}

fn solution(args: &ExecArgs<'_>) -> Vec<KernelStep> {
    let pr = args.problem;
    let key = args.key.as_str();
    let b = args.buffers;
    let forward = pr.direction == Direction::Forward;
    // data flows from `src` to `dst`
    let (src, dst) = if forward { (b.x, b.y) } else { (b.y, b.x) };

    if uses_asm_1x1(pr) {
        let (n, c, k) = if forward {
            (pr.x.n, pr.x.c, pr.w.n)
        } else {
            (pr.y.n, pr.w.n, pr.w.c)
        };
        // backward reads the filter with K and C swapped
        let flags = if forward { 0 } else { super::winograd::F_FLIP_K_C };
        let spec = KernelSpec::linear(
            "conv1x1u.s",
            "conv1x1u",
            n * k * pr.x.spatial(),
            DIRECT_GROUP,
            CompileOptions::new().define(pr.dtype.kernel_define(), 1),
        );
        let mut kargs = asm_args(n, c, pr.x.h, pr.x.w, k, args.device.compute_units, flags);
        kargs.extend([
            KernelArg::Mem(src),
            KernelArg::Mem(b.w),
            KernelArg::Mem(dst),
            KernelArg::Null,
        ]);
        return vec![KernelStep::new(args.algorithm, key, 0, spec).with_args(kargs)];
    }

    let options = geometry(pr)
        .define("MLO_DIR_FORWARD", forward as i64)
        .define("MLO_SEARCH", args.config.exhaustive_search as i64);
    let generic = |options: CompileOptions, rows: usize| {
        let work = if forward {
            pr.y.n * pr.y.c * rows * pr.y.w
        } else {
            pr.x.numel()
        };
        KernelSpec::linear("conv_direct.cl", "conv_direct", work, DIRECT_GROUP, options)
    };
    let kargs = vec![
        KernelArg::Mem(src),
        KernelArg::Mem(b.w),
        KernelArg::Mem(dst),
        KernelArg::Float(0.0),
    ];

    let out_h = pr.y.h;
    let tail = out_h % ROW_TILE;
    let split = forward
        && pr.filter_is(11, 11)
        && (pr.params.stride_h() > 1 || pr.params.stride_w() > 1)
        && tail != 0
        && out_h > ROW_TILE;
    if !split {
        let spec = generic(
            options
                .define("MLO_ROW_BEGIN", 0)
                .define_usize("MLO_ROW_END", out_h),
            out_h,
        );
        return vec![KernelStep::new(args.algorithm, key, 0, spec).with_args(kargs)];
    }

    let body = out_h - tail;
    let pass1 = generic(
        options
            .clone()
            .define("MLO_ROW_BEGIN", 0)
            .define_usize("MLO_ROW_END", body),
        body,
    );
    let pass2 = generic(
        options
            .define_usize("MLO_ROW_BEGIN", body)
            .define_usize("MLO_ROW_END", out_h),
        tail,
    );
    let pass2_algorithm = format!("{}_pass2", args.algorithm);
    vec![
        KernelStep::new(args.algorithm, key, 0, pass1).with_args(kargs.clone()),
        KernelStep::new(&pass2_algorithm, &args.key.with_suffix("x1"), 0, pass2).with_args(kargs),
    ]
}

// ============================================================================
// Backward-weights
// ============================================================================

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum WrwVariant {
    /// Precompiled 1x1 / 3x3 kernel, one pass
    Asm,
    /// Sub-sample the input, then the precompiled 1x1 kernel
    SubsampledAsm,
    /// Generic kernel writing the gradient directly
    SinglePass,
    /// Generic kernel writing per-tile partials, then a reduction
    Reduced,
}

fn wrw_variant(problem: &ConvProblem) -> WrwVariant {
    let p = &problem.params;
    let asm_ok = problem.dtype == DType::F32;
    if asm_ok && p.is_unit_stride() {
        let pad_matches = (problem.filter_is(1, 1) && p.is_zero_pad())
            || (problem.filter_is(3, 3) && p.pad_h() == 1 && p.pad_w() == 1);
        if pad_matches {
            return WrwVariant::Asm;
        }
    }
    if asm_ok && problem.filter_is(1, 1) && p.is_zero_pad() && p.stride_h() == 2 && p.stride_w() == 2
    {
        return WrwVariant::SubsampledAsm;
    }
    if problem.x.n <= WRW_BATCH_TILE {
        WrwVariant::SinglePass
    } else {
        WrwVariant::Reduced
    }
}

/// Scratch bytes for the backward-weights direct solution
pub(crate) fn wrw_workspace(problem: &ConvProblem) -> usize {
    let es = problem.elem_size();
    match wrw_variant(problem) {
        WrwVariant::Asm | WrwVariant::SinglePass => 0,
        WrwVariant::SubsampledAsm => problem.x.n * problem.x.c * problem.y.spatial() * es,
        WrwVariant::Reduced => problem.x.n.div_ceil(WRW_BATCH_TILE) * problem.w.numel() * es,
    }
}

fn wrw_solution(args: &ExecArgs<'_>) -> Vec<KernelStep> {
    let pr = args.problem;
    let key = args.key.as_str();
    let b = args.buffers;
    let ws = args.workspace.buffer();
    let groups = args.device.compute_units;
    let asm_options = || CompileOptions::new().define(pr.dtype.kernel_define(), 1);

    match wrw_variant(pr) {
        WrwVariant::Asm => {
            let entry = if pr.filter_is(1, 1) { "conv1x1wrw" } else { "conv3x3wrw" };
            let spec = KernelSpec::linear(
                format!("{entry}.s"),
                entry,
                pr.w.numel(),
                DIRECT_GROUP,
                asm_options(),
            );
            let mut kargs = asm_args(pr.x.n, pr.x.c, pr.x.h, pr.x.w, pr.w.n, groups, 0);
            kargs.extend([
                KernelArg::Mem(b.x),
                KernelArg::Mem(b.w),
                KernelArg::Mem(b.y),
                KernelArg::Null,
            ]);
            vec![KernelStep::new(args.algorithm, key, 0, spec).with_args(kargs)]
        }
        WrwVariant::SubsampledAsm => {
            let (out_h, out_w) = (pr.y.h, pr.y.w);
            let p = &pr.params;
            let sub_options = asm_options()
                .define_usize("SS_N", pr.x.n)
                .define_usize("SS_C", pr.x.c)
                .define_usize("SS_H", pr.x.h)
                .define_usize("SS_W", pr.x.w)
                .define_usize("SS_OUT_H", out_h)
                .define_usize("SS_OUT_W", out_w)
                .define_usize("SS_STRIDE_H", p.stride_h())
                .define_usize("SS_STRIDE_W", p.stride_w());
            let subsample = KernelSpec::linear(
                "subsample.cl",
                "subsample",
                pr.x.n * pr.x.c * out_h * out_w,
                DIRECT_GROUP,
                sub_options,
            );
            let main = KernelSpec::linear(
                "conv1x1wrw.s",
                "conv1x1wrw",
                pr.w.numel(),
                DIRECT_GROUP,
                asm_options(),
            );
            let mut kargs = asm_args(pr.x.n, pr.x.c, out_h, out_w, pr.w.n, groups, 0);
            kargs.extend([
                KernelArg::Mem(ws),
                KernelArg::Mem(b.w),
                KernelArg::Mem(b.y),
                KernelArg::Null,
            ]);
            vec![
                KernelStep::new(args.algorithm, key, 0, subsample)
                    .with_args(vec![KernelArg::Mem(b.x), KernelArg::Mem(ws)]),
                KernelStep::new(args.algorithm, key, 1, main).with_args(kargs),
            ]
        }
        WrwVariant::SinglePass => {
            let options = geometry(pr)
                .define_usize("MLO_BATCH_TILE", WRW_BATCH_TILE)
                .define("MLO_N_BATCH_TILES", 1);
            let spec = KernelSpec::linear(
                "conv_bwd_weights.cl",
                "conv_bwd_weights",
                pr.w.numel(),
                DIRECT_GROUP,
                options,
            );
            vec![KernelStep::new(args.algorithm, key, 0, spec).with_args(vec![
                KernelArg::Mem(b.y),
                KernelArg::Mem(b.x),
                KernelArg::Mem(b.w),
                KernelArg::Float(0.0),
            ])]
        }
        WrwVariant::Reduced => {
            let tiles = pr.x.n.div_ceil(WRW_BATCH_TILE);
            let options = geometry(pr)
                .define_usize("MLO_BATCH_TILE", WRW_BATCH_TILE)
                .define_usize("MLO_N_BATCH_TILES", tiles);
            let main = KernelSpec::linear(
                "conv_bwd_weights.cl",
                "conv_bwd_weights",
                tiles * pr.w.numel(),
                DIRECT_GROUP,
                options.clone(),
            );
            let reduce = KernelSpec::linear(
                "conv_bwd_weights.cl",
                "conv_bwd_weights_reduce",
                pr.w.numel(),
                DIRECT_GROUP,
                options.define_usize("MLO_WEI_SZ", pr.w.numel()),
            );
            vec![
                KernelStep::new(args.algorithm, key, 0, main).with_args(vec![
                    KernelArg::Mem(b.y),
                    KernelArg::Mem(b.x),
                    KernelArg::Mem(ws),
                    KernelArg::Float(0.0),
                ]),
                KernelStep::new(args.algorithm, key, 1, reduce)
                    .with_args(vec![KernelArg::Mem(ws), KernelArg::Mem(b.w)]),
            ]
        }
    }
}
