//! Frequency-domain convolution for 5x5 filters
//!
//! Every plane is zero-padded to a `T x T` tile (`T` the next power of two
//! covering the padded input) and stored as a half spectrum of
//! `T * (T/2 + 1)` complex values. The workspace has two halves:
//!
//! ```text
//! [ data spectra | 64 spare | filter spectra | 64 spare | ... ][ output spectra ... ]
//!   ^ 0                       ^ data + 64                       ^ temp planes
//! ```
//!
//! Four kernels share one `(algorithm, key)` entry and run in order: data
//! transform, filter transform, per-frequency channel reduction, inverse
//! transform with crop.

use super::applicability::is_fft_applicable;
use super::invoke::{ExecArgs, KernelStep, run_steps};
use super::params::Direction;
use super::problem::ConvProblem;
use crate::error::{Error, Result};
use crate::runtime::{CompileOptions, ExecutionContext, KernelArg, KernelSpec};

/// Spare planes after each spectrum block
const PLANE_SLACK: usize = 64;
const FFT_GROUP: usize = 64;

/// Plane counts as seen by the kernels: (batch, data channels, output channels)
fn roles(problem: &ConvProblem) -> (usize, usize, usize) {
    match problem.direction {
        Direction::BackwardData => (problem.y.n, problem.y.c, problem.x.c),
        _ => (problem.x.n, problem.x.c, problem.y.c),
    }
}

/// Transform tile edge
pub(crate) fn tile_size(problem: &ConvProblem) -> usize {
    (problem.x.h + 2 * problem.params.pad_h()).next_power_of_two()
}

/// Planes per workspace half
fn temp_planes(problem: &ConvProblem) -> usize {
    let (n, c_in, c_out) = roles(problem);
    let data = n * c_in + PLANE_SLACK;
    let filters = problem.w.n * problem.w.c + PLANE_SLACK;
    (data + filters).max(n * c_out + PLANE_SLACK)
}

/// Workspace bytes for the FFT strategy
pub(crate) fn workspace_bytes(problem: &ConvProblem) -> usize {
    let t = tile_size(problem);
    2 * 2 * t * (t / 2 + 1) * temp_planes(problem) * 4
}

/// Run the FFT strategy; returns device time in milliseconds
pub(crate) fn run<C: ExecutionContext + ?Sized>(ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
    let pr = args.problem;
    if !is_fft_applicable(args.config, pr) {
        return Err(Error::not_applicable(args.algorithm, "FFT gate failed"));
    }
    args.workspace
        .require(args.algorithm, workspace_bytes(pr))?;

    let t = tile_size(pr);
    // floats per half-spectrum plane
    let plane = t * (t / 2 + 1) * 2;
    let (n, c_in, c_out) = roles(pr);
    let backward = pr.direction == Direction::BackwardData;
    let filter_off = (n * c_in + PLANE_SLACK) * plane;
    let out_off = temp_planes(pr) * plane;

    let options = CompileOptions::new()
        .define(pr.dtype.kernel_define(), 1)
        .define_usize("FFT_TILE", t)
        .define_usize("FFT_N", n)
        .define_usize("FFT_C_IN", c_in)
        .define_usize("FFT_C_OUT", c_out)
        .define_usize("FFT_H", pr.x.h)
        .define_usize("FFT_W", pr.x.w)
        .define_usize("FFT_FILTER_H", pr.w.h)
        .define_usize("FFT_FILTER_W", pr.w.w)
        .define_usize("FFT_PAD_H", pr.params.pad_h())
        .define_usize("FFT_PAD_W", pr.params.pad_w())
        .define_usize("FFT_FILTER_OFF", filter_off)
        .define_usize("FFT_OUT_OFF", out_off)
        .define("FFT_BACKWARD", backward as i64);
    let spec = |entry: &str, planes: usize| {
        KernelSpec::linear(
            "fft_conv.cl",
            entry,
            planes * t,
            FFT_GROUP,
            options.clone(),
        )
    };

    let b = args.buffers;
    let ws = args.workspace.buffer();
    let (src, dst) = if backward { (b.y, b.x) } else { (b.x, b.y) };
    let key = args.key.as_str();
    let steps = [
        KernelStep::new(args.algorithm, key, 0, spec("fft_fwd_in", n * c_in))
            .with_args(vec![KernelArg::Mem(src), KernelArg::Mem(ws)]),
        KernelStep::new(args.algorithm, key, 1, spec("fft_fwd_we", c_in * c_out))
            .with_args(vec![KernelArg::Mem(b.w), KernelArg::Mem(ws)]),
        KernelStep::new(args.algorithm, key, 2, spec("fft_cgemm", n * c_out))
            .with_args(vec![KernelArg::Mem(ws)]),
        KernelStep::new(args.algorithm, key, 3, spec("fft_inv_out", n * c_out))
            .with_args(vec![KernelArg::Mem(ws), KernelArg::Mem(dst)]),
    ];
    run_steps(ctx, args.mode, &steps)
}
