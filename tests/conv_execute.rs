//! Integration tests for executing each convolution strategy on the host context.

mod common;

use common::{
    Geometry, HostTensor, assert_allclose_f32, create_context, create_context_on,
    naive_backward_data, naive_backward_weights, naive_forward, workspace,
};
use convtune::conv::{
    ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm, ConvMode,
    ConvolutionDescriptor, PaddingPolicy,
};
use convtune::dtype::DType;
use convtune::runtime::Workspace;
use convtune::runtime::cpu::CpuContext;
use convtune::tensor::TensorDesc;

const RTOL: f32 = 1e-4;
const ATOL: f32 = 1e-4;

fn descriptor(pad: i32, stride: i32) -> ConvolutionDescriptor {
    ConvolutionDescriptor::new(pad, pad, stride, stride, 1, 1).unwrap()
}

/// x, w and a zeroed y for a forward problem
fn forward_operands(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    x: [usize; 4],
    w: [usize; 4],
) -> (HostTensor, HostTensor, HostTensor) {
    let x = HostTensor::pattern(ctx, x, 1);
    let w = HostTensor::pattern(ctx, w, 2);
    let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
    let y = HostTensor::zeros(ctx, &y_desc);
    (x, w, y)
}

/// dy, w and a zeroed dx for a backward-data problem
fn backward_data_operands(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    x: [usize; 4],
    w: [usize; 4],
) -> (HostTensor, HostTensor, HostTensor) {
    let x_desc = TensorDesc::new(DType::F32, &x);
    let w = HostTensor::pattern(ctx, w, 2);
    let y_desc = conv.forward_output_desc(&x_desc, &w.desc).unwrap();
    let dy = HostTensor::pattern(ctx, y_desc.nchw_dims().unwrap(), 3);
    let dx = HostTensor::zeros(ctx, &x_desc);
    (dy, w, dx)
}

/// dy, x and a zeroed dw for a backward-weights problem
fn backward_weights_operands(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    x: [usize; 4],
    w: [usize; 4],
) -> (HostTensor, HostTensor, HostTensor) {
    let x = HostTensor::pattern(ctx, x, 1);
    let w_desc = TensorDesc::new(DType::F32, &w);
    let y_desc = conv.forward_output_desc(&x.desc, &w_desc).unwrap();
    let dy = HostTensor::pattern(ctx, y_desc.nchw_dims().unwrap(), 3);
    let dw = HostTensor::zeros(ctx, &w_desc);
    (dy, x, dw)
}

fn check_forward(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    algorithm: ConvFwdAlgorithm,
    xd: [usize; 4],
    wd: [usize; 4],
    g: Geometry,
) {
    let (x, w, y) = forward_operands(ctx, conv, xd, wd);
    let bytes = conv
        .forward_workspace_size(ctx, &w.desc, &x.desc, &y.desc)
        .unwrap();
    let ws = workspace(ctx, bytes);
    if algorithm != ConvFwdAlgorithm::Gemm {
        conv.find_forward_algorithm(ctx, x.arg(), w.arg(), y.arg(), 4, ws)
            .unwrap();
    }
    conv.forward(ctx, 1.0, x.arg(), w.arg(), algorithm, 0.0, y.arg(), ws)
        .unwrap();

    let expected = naive_forward(&x.read(ctx), xd, &w.read(ctx), wd, y.dims(), g);
    assert_allclose_f32(&y.read(ctx), &expected, RTOL, ATOL, &format!("{algorithm:?} forward"));
}

fn check_backward_data(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    algorithm: ConvBwdDataAlgorithm,
    xd: [usize; 4],
    wd: [usize; 4],
    g: Geometry,
) {
    let (dy, w, dx) = backward_data_operands(ctx, conv, xd, wd);
    let bytes = conv
        .backward_data_workspace_size(ctx, &w.desc, &dy.desc, &dx.desc)
        .unwrap();
    let ws = workspace(ctx, bytes);
    if algorithm != ConvBwdDataAlgorithm::Gemm {
        conv.find_backward_data_algorithm(ctx, dy.arg(), w.arg(), dx.arg(), 4, ws)
            .unwrap();
    }
    conv.backward_data(ctx, 1.0, dy.arg(), w.arg(), algorithm, 0.0, dx.arg(), ws)
        .unwrap();

    let expected = naive_backward_data(&dy.read(ctx), dy.dims(), &w.read(ctx), wd, xd, g);
    assert_allclose_f32(
        &dx.read(ctx),
        &expected,
        RTOL,
        ATOL,
        &format!("{algorithm:?} backward data"),
    );
}

fn check_backward_weights(
    ctx: &CpuContext,
    conv: &ConvolutionDescriptor,
    algorithm: ConvBwdWeightsAlgorithm,
    xd: [usize; 4],
    wd: [usize; 4],
    g: Geometry,
) {
    let (dy, x, dw) = backward_weights_operands(ctx, conv, xd, wd);
    let bytes = conv
        .backward_weights_workspace_size(ctx, &dy.desc, &x.desc, &dw.desc)
        .unwrap();
    let ws = workspace(ctx, bytes);
    if algorithm != ConvBwdWeightsAlgorithm::Gemm {
        conv.find_backward_weights_algorithm(ctx, dy.arg(), x.arg(), dw.arg(), 2, ws)
            .unwrap();
    }
    conv.backward_weights(ctx, 1.0, dy.arg(), x.arg(), algorithm, 0.0, dw.arg(), ws)
        .unwrap();

    let expected = naive_backward_weights(&dy.read(ctx), dy.dims(), &x.read(ctx), xd, wd, g);
    assert_allclose_f32(
        &dw.read(ctx),
        &expected,
        1e-3,
        1e-3,
        &format!("{algorithm:?} backward weights"),
    );
}

// =============================================================================
// GEMM
// =============================================================================

#[test]
fn test_gemm_forward_im2col() {
    let ctx = create_context();
    let conv = descriptor(1, 2);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Gemm,
        [2, 3, 9, 9],
        [4, 3, 3, 3],
        Geometry::new(1, 2),
    );
    let calls = ctx.invocations();
    assert_eq!(calls.iter().filter(|k| *k == "im2col").count(), 2);
    assert_eq!(calls.iter().filter(|k| *k == "gemm").count(), 2);
}

#[test]
fn test_gemm_forward_dilated() {
    let ctx = create_context();
    let conv = ConvolutionDescriptor::new(2, 2, 1, 1, 2, 2).unwrap();
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Gemm,
        [1, 2, 8, 8],
        [3, 2, 3, 3],
        Geometry::new(2, 1).dilated(2),
    );
}

#[test]
fn test_gemm_forward_pointwise_without_workspace() {
    let ctx = create_context();
    let conv = descriptor(0, 1);
    let (x, w, y) = forward_operands(&ctx, &conv, [2, 8, 6, 6], [5, 8, 1, 1]);
    conv.forward(
        &ctx,
        1.0,
        x.arg(),
        w.arg(),
        ConvFwdAlgorithm::Gemm,
        0.0,
        y.arg(),
        Workspace::NONE,
    )
    .unwrap();
    let expected = naive_forward(
        &x.read(&ctx),
        x.dims(),
        &w.read(&ctx),
        w.dims(),
        y.dims(),
        Geometry::new(0, 1),
    );
    assert_allclose_f32(&y.read(&ctx), &expected, RTOL, ATOL, "pointwise gemm");
    assert!(ctx.invocations().iter().all(|k| k == "gemm"));
}

#[test]
fn test_gemm_forward_cnhw_with_workspace() {
    let ctx = create_context();
    let conv = descriptor(0, 2);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Gemm,
        [2, 4, 10, 10],
        [6, 4, 1, 1],
        Geometry::new(0, 2),
    );
    let calls = ctx.invocations();
    assert!(calls.contains(&"transpose_nchw2cnhw".to_string()));
    assert!(calls.contains(&"transpose_cnhw2nchw".to_string()));
    // one GEMM for the whole batch
    assert_eq!(calls.iter().filter(|k| *k == "gemm").count(), 1);
}

#[test]
fn test_gemm_backward_data_im2col() {
    let ctx = create_context();
    let conv = descriptor(1, 2);
    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Gemm,
        [2, 3, 9, 9],
        [4, 3, 3, 3],
        Geometry::new(1, 2),
    );
}

#[test]
fn test_gemm_backward_data_cnhw() {
    let ctx = create_context();
    let conv = descriptor(0, 2);
    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Gemm,
        [2, 4, 8, 8],
        [6, 4, 1, 1],
        Geometry::new(0, 2),
    );
    assert_eq!(ctx.invocations()[0], "set_tensor");
}

#[test]
fn test_gemm_backward_weights_overwrites() {
    let ctx = create_context();
    let conv = descriptor(1, 1);
    let (dy, x, dw) = backward_weights_operands(&ctx, &conv, [3, 2, 6, 6], [4, 2, 3, 3]);
    // stale contents must not leak into the gradient
    ctx.write(dw.buffer, 0, &vec![7.0; 4 * 2 * 9]).unwrap();
    let bytes = conv
        .backward_weights_workspace_size(&ctx, &dy.desc, &x.desc, &dw.desc)
        .unwrap();
    let ws = workspace(&ctx, bytes);
    conv.backward_weights(
        &ctx,
        1.0,
        dy.arg(),
        x.arg(),
        ConvBwdWeightsAlgorithm::Gemm,
        0.0,
        dw.arg(),
        ws,
    )
    .unwrap();
    let expected = naive_backward_weights(
        &dy.read(&ctx),
        dy.dims(),
        &x.read(&ctx),
        x.dims(),
        dw.dims(),
        Geometry::new(1, 1),
    );
    assert_allclose_f32(&dw.read(&ctx), &expected, 1e-3, 1e-3, "gemm backward weights");
}

#[test]
fn test_gemm_backward_weights_pointwise() {
    let ctx = create_context();
    let conv = descriptor(0, 1);
    check_backward_weights(
        &ctx,
        &conv,
        ConvBwdWeightsAlgorithm::Gemm,
        [2, 3, 5, 5],
        [4, 3, 1, 1],
        Geometry::new(0, 1),
    );
}

// =============================================================================
// Direct
// =============================================================================

#[test]
fn test_direct_forward_generic() {
    let ctx = create_context();
    let conv = descriptor(2, 2);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Direct,
        [2, 3, 11, 11],
        [4, 3, 5, 5],
        Geometry::new(2, 2),
    );
}

#[test]
fn test_direct_forward_11x11_runs_two_passes() {
    let ctx = create_context();
    let conv = descriptor(0, 4);
    let (x, w, y) = forward_operands(&ctx, &conv, [1, 3, 47, 47], [2, 3, 11, 11]);
    assert_eq!(y.dims(), [1, 2, 10, 10]);
    conv.find_forward_algorithm(&ctx, x.arg(), w.arg(), y.arg(), 4, Workspace::NONE)
        .unwrap();
    ctx.clear_invocations();

    conv.forward(
        &ctx,
        1.0,
        x.arg(),
        w.arg(),
        ConvFwdAlgorithm::Direct,
        0.0,
        y.arg(),
        Workspace::NONE,
    )
    .unwrap();
    assert_eq!(ctx.invocations(), ["conv_direct", "conv_direct"]);
    let expected = naive_forward(
        &x.read(&ctx),
        x.dims(),
        &w.read(&ctx),
        w.dims(),
        y.dims(),
        Geometry::new(0, 4),
    );
    assert_allclose_f32(&y.read(&ctx), &expected, RTOL, ATOL, "11x11 direct");
}

#[test]
fn test_direct_pointwise_uses_precompiled_kernel() {
    let ctx = create_context();
    let conv = descriptor(0, 1);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Direct,
        [2, 6, 5, 5],
        [3, 6, 1, 1],
        Geometry::new(0, 1),
    );
    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Direct,
        [2, 6, 5, 5],
        [3, 6, 1, 1],
        Geometry::new(0, 1),
    );
    assert!(ctx.invocations().contains(&"conv1x1u".to_string()));
}

#[test]
fn test_direct_backward_data_strided() {
    let ctx = create_context();
    let conv = descriptor(2, 2);
    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Direct,
        [2, 3, 11, 11],
        [4, 3, 5, 5],
        Geometry::new(2, 2),
    );
}

#[test]
fn test_direct_backward_weights_variants() {
    let cases: [([usize; 4], [usize; 4], usize, usize, &str); 4] = [
        // precompiled 3x3, pad 1
        ([3, 4, 6, 6], [2, 4, 3, 3], 1, 1, "conv3x3wrw"),
        // sub-sampled 1x1, stride 2
        ([2, 3, 8, 8], [4, 3, 1, 1], 0, 2, "subsample"),
        // generic, single batch tile
        ([4, 2, 7, 7], [3, 2, 5, 5], 2, 1, "conv_bwd_weights"),
        // generic, partials reduced
        ([6, 2, 7, 7], [3, 2, 5, 5], 2, 1, "conv_bwd_weights_reduce"),
    ];
    for (xd, wd, pad, stride, kernel) in cases {
        let ctx = create_context();
        let conv = descriptor(pad as i32, stride as i32);
        check_backward_weights(
            &ctx,
            &conv,
            ConvBwdWeightsAlgorithm::Direct,
            xd,
            wd,
            Geometry::new(pad, stride),
        );
        assert!(
            ctx.invocations().iter().any(|k| k == kernel),
            "{kernel} not launched for {xd:?} / {wd:?}"
        );
    }
}

// =============================================================================
// Winograd
// =============================================================================

#[test]
fn test_winograd_forward_and_backward_gfx9() {
    let ctx = create_context_on("gfx900", 4);
    let conv = descriptor(1, 1);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Winograd,
        [1, 18, 6, 6],
        [4, 18, 3, 3],
        Geometry::new(1, 1),
    );
    assert!(ctx.invocations().contains(&"ConvBinWinogradRxS".to_string()));

    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Winograd,
        [1, 4, 6, 6],
        [18, 4, 3, 3],
        Geometry::new(1, 1),
    );
}

#[test]
fn test_winograd_forward_gfx8() {
    let ctx = create_context_on("gfx803", 4);
    let conv = descriptor(1, 1);
    check_forward(
        &ctx,
        &conv,
        ConvFwdAlgorithm::Winograd,
        [2, 16, 5, 5],
        [2, 16, 3, 3],
        Geometry::new(1, 1),
    );
    assert!(ctx.invocations().contains(&"ConvBinWinograd3x3U".to_string()));
}

// =============================================================================
// FFT
// =============================================================================

#[test]
fn test_fft_forward_and_backward() {
    let ctx = create_context();
    let conv = descriptor(2, 1);
    let (x, w, y) = forward_operands(&ctx, &conv, [4, 4, 7, 7], [4, 4, 5, 5]);
    let bytes = conv
        .forward_workspace_size(&ctx, &w.desc, &x.desc, &y.desc)
        .unwrap();
    let ws = workspace(&ctx, bytes);
    let found = conv
        .find_forward_algorithm(&ctx, x.arg(), w.arg(), y.arg(), 4, ws)
        .unwrap();
    assert!(found.iter().any(|p| p.algorithm == ConvFwdAlgorithm::Fft));

    conv.forward(&ctx, 1.0, x.arg(), w.arg(), ConvFwdAlgorithm::Fft, 0.0, y.arg(), ws)
        .unwrap();
    let expected = naive_forward(
        &x.read(&ctx),
        x.dims(),
        &w.read(&ctx),
        w.dims(),
        y.dims(),
        Geometry::new(2, 1),
    );
    assert_allclose_f32(&y.read(&ctx), &expected, 1e-3, 1e-3, "fft forward");

    check_backward_data(
        &ctx,
        &conv,
        ConvBwdDataAlgorithm::Fft,
        [4, 4, 7, 7],
        [4, 4, 5, 5],
        Geometry::new(2, 1),
    );
}

// =============================================================================
// Transpose mode
// =============================================================================

fn transpose_descriptor(pad: i32, stride: i32) -> ConvolutionDescriptor {
    ConvolutionDescriptor::with_mode(
        ConvMode::Transpose,
        PaddingPolicy::Default,
        pad,
        pad,
        stride,
        stride,
        1,
        1,
    )
    .unwrap()
}

#[test]
fn test_transpose_forward_matches_standard_backward_data() {
    let ctx = create_context();
    let conv = transpose_descriptor(1, 2);
    // transposed conv maps 2 channels to 3; filter is [in, out, r, s]
    let x = HostTensor::pattern(&ctx, [2, 2, 4, 4], 5);
    let w = HostTensor::pattern(&ctx, [2, 3, 3, 3], 6);
    let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
    assert_eq!(y_desc.dims(), &[2, 3, 7, 7]);
    let y = HostTensor::zeros(&ctx, &y_desc);
    let bytes = conv
        .forward_workspace_size(&ctx, &w.desc, &x.desc, &y.desc)
        .unwrap();
    let ws = workspace(&ctx, bytes);

    let found = conv
        .find_forward_algorithm(&ctx, x.arg(), w.arg(), y.arg(), 4, ws)
        .unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].algorithm, ConvFwdAlgorithm::Gemm);

    conv.forward(&ctx, 1.0, x.arg(), w.arg(), ConvFwdAlgorithm::Gemm, 0.0, y.arg(), ws)
        .unwrap();
    let expected = naive_backward_data(
        &x.read(&ctx),
        x.dims(),
        &w.read(&ctx),
        w.dims(),
        y.dims(),
        Geometry::new(1, 2),
    );
    assert_allclose_f32(&y.read(&ctx), &expected, RTOL, ATOL, "transpose forward");
}

#[test]
fn test_transpose_backward_paths() {
    let ctx = create_context();
    let conv = transpose_descriptor(1, 2);
    let g = Geometry::new(1, 2);
    let w = HostTensor::pattern(&ctx, [2, 3, 3, 3], 6);
    let x_desc = TensorDesc::new(DType::F32, &[1, 2, 4, 4]);
    let y_desc = conv.forward_output_desc(&x_desc, &w.desc).unwrap();
    let dy = HostTensor::pattern(&ctx, y_desc.nchw_dims().unwrap(), 7);
    let dx = HostTensor::zeros(&ctx, &x_desc);
    let bytes = conv
        .backward_data_workspace_size(&ctx, &w.desc, &dy.desc, &dx.desc)
        .unwrap();
    let ws = workspace(&ctx, bytes);

    for algorithm in [ConvBwdDataAlgorithm::Gemm, ConvBwdDataAlgorithm::TransposeGemm] {
        conv.backward_data(&ctx, 1.0, dy.arg(), w.arg(), algorithm, 0.0, dx.arg(), ws)
            .unwrap();
        // the input gradient of a transposed conv is a standard forward conv
        let expected = naive_forward(
            &dy.read(&ctx),
            dy.dims(),
            &w.read(&ctx),
            w.dims(),
            dx.dims(),
            g,
        );
        assert_allclose_f32(&dx.read(&ctx), &expected, RTOL, ATOL, "transpose backward data");
    }

    let x = HostTensor::pattern(&ctx, [1, 2, 4, 4], 8);
    let dw = HostTensor::zeros(&ctx, &w.desc);
    let bytes = conv
        .backward_weights_workspace_size(&ctx, &dy.desc, &x.desc, &dw.desc)
        .unwrap();
    let ws = workspace(&ctx, bytes);
    conv.backward_weights(
        &ctx,
        1.0,
        dy.arg(),
        x.arg(),
        ConvBwdWeightsAlgorithm::Gemm,
        0.0,
        dw.arg(),
        ws,
    )
    .unwrap();
    // roles of x and dy swap relative to a standard filter gradient
    let expected = naive_backward_weights(
        &x.read(&ctx),
        x.dims(),
        &dy.read(&ctx),
        dy.dims(),
        dw.dims(),
        g,
    );
    assert_allclose_f32(&dw.read(&ctx), &expected, 1e-3, 1e-3, "transpose backward weights");
}
