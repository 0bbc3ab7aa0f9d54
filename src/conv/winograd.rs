//! Precompiled 3x3 Winograd kernels
//!
//! Two binaries exist: `ConvBinWinograd3x3U` for the gfx8 family and
//! `ConvBinWinogradRxS` for gfx9, which takes the filter and padding
//! geometry as six extra trailing arguments. Backward-data reuses the forward
//! binary with the filter read reversed and channel-swapped.

use super::applicability::{DeviceFamily, is_winograd_applicable};
use super::invoke::{ExecArgs, KernelStep, run_steps};
use super::params::Direction;
use crate::error::{Error, Result};
use crate::runtime::{CompileOptions, ExecutionContext, KernelArg, KernelSpec};

/// Read filter rows bottom-up
pub(crate) const F_REVERSE_R: i64 = 1;
/// Read filter columns right-to-left
pub(crate) const F_REVERSE_S: i64 = 2;
/// Filter is stored `[C][K]` relative to the kernel's view
pub(crate) const F_FLIP_K_C: i64 = 4;

const WINOGRAD_GROUP: usize = 64;

/// Run the Winograd strategy; returns device time in milliseconds
pub(crate) fn run<C: ExecutionContext + ?Sized>(ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
    let pr = args.problem;
    if !is_winograd_applicable(args.device, args.config, pr) {
        return Err(Error::not_applicable(
            args.algorithm,
            format!("no Winograd binary for {} on {}", args.key, args.device.name),
        ));
    }

    let b = args.buffers;
    let (src, dst, n, c, k, h, w, out_h, out_w, flags) = match pr.direction {
        Direction::Forward => (
            b.x, b.y, pr.x.n, pr.x.c, pr.w.n, pr.x.h, pr.x.w, pr.y.h, pr.y.w, 0,
        ),
        _ => (
            b.y,
            b.x,
            pr.y.n,
            pr.w.n,
            pr.w.c,
            pr.y.h,
            pr.y.w,
            pr.x.h,
            pr.x.w,
            F_REVERSE_R | F_REVERSE_S | F_FLIP_K_C,
        ),
    };

    let (program, entry) = match args.device.family() {
        DeviceFamily::Gfx8 => ("conv_3x3_wheel_alpha_v3_0b.s", "ConvBinWinograd3x3U"),
        _ => ("conv_3x3_wheel_alpha_v9_2_7.s", "ConvBinWinogradRxS"),
    };
    let spec = KernelSpec {
        program: program.to_string(),
        entry: entry.to_string(),
        local: [WINOGRAD_GROUP, 1, 1],
        global: [WINOGRAD_GROUP * args.device.compute_units.max(1), 1, 1],
        options: CompileOptions::new().define(pr.dtype.kernel_define(), 1),
    };

    let mut kargs = vec![
        KernelArg::size(n),
        KernelArg::size(c),
        KernelArg::size(h),
        KernelArg::size(w),
        KernelArg::size(k),
        KernelArg::size(args.device.compute_units),
        KernelArg::Int(flags),
        KernelArg::Int(0),
        KernelArg::Mem(src),
        KernelArg::Mem(b.w),
        KernelArg::Mem(dst),
        KernelArg::Null,
    ];
    if entry == "ConvBinWinogradRxS" {
        let p = &pr.params;
        kargs.extend([
            KernelArg::size(pr.w.h),
            KernelArg::size(pr.w.w),
            KernelArg::size(p.pad_h()),
            KernelArg::size(p.pad_w()),
            KernelArg::size(out_h),
            KernelArg::size(out_w),
        ]);
    }

    let step = KernelStep::new(args.algorithm, args.key.as_str(), 0, spec).with_args(kargs);
    run_steps(ctx, args.mode, &[step])
}
