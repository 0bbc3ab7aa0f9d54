//! Integration tests for algorithm search: ranking, caching and failure handling.

mod common;

use common::{HostTensor, create_context, create_context_on, workspace};
use convtune::config::{ENV_DIRECT, TuningConfig};
use convtune::conv::{
    ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm, ConvolutionDescriptor,
};
use convtune::error::Error;
use convtune::runtime::ExecutionContext;
use convtune::runtime::cpu::CpuContext;

/// A 3x3 same-padding forward problem whose candidates are GEMM and Direct on the host
struct ForwardCase {
    conv: ConvolutionDescriptor,
    x: HostTensor,
    w: HostTensor,
    y: HostTensor,
    ws_bytes: usize,
}

impl ForwardCase {
    fn new(ctx: &CpuContext, conv: ConvolutionDescriptor) -> Self {
        let x = HostTensor::pattern(ctx, [1, 3, 8, 8], 1);
        let w = HostTensor::pattern(ctx, [4, 3, 3, 3], 2);
        let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
        let y = HostTensor::zeros(ctx, &y_desc);
        let ws_bytes = conv
            .forward_workspace_size(ctx, &w.desc, &x.desc, &y.desc)
            .unwrap();
        Self {
            conv,
            x,
            w,
            y,
            ws_bytes,
        }
    }

    fn standard(ctx: &CpuContext) -> Self {
        Self::new(ctx, ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap())
    }

    fn find(
        &self,
        ctx: &CpuContext,
        count: usize,
    ) -> convtune::error::Result<Vec<convtune::conv::AlgoPerf<ConvFwdAlgorithm>>> {
        let ws = workspace(ctx, self.ws_bytes);
        self.conv
            .find_forward_algorithm(ctx, self.x.arg(), self.w.arg(), self.y.arg(), count, ws)
    }
}

fn pin_forward_times(ctx: &CpuContext, im2col: f32, gemm: f32, direct: f32) {
    ctx.set_kernel_time("im2col", im2col);
    ctx.set_kernel_time("gemm", gemm);
    ctx.set_kernel_time("conv_direct", direct);
}

// =============================================================================
// Ranking
// =============================================================================

#[test]
fn test_fastest_candidate_ranks_first() {
    let ctx = create_context();
    pin_forward_times(&ctx, 0.5, 0.5, 0.1);
    let case = ForwardCase::standard(&ctx);

    let ranked = case.find(&ctx, 4).unwrap();
    let order: Vec<_> = ranked.iter().map(|p| p.algorithm).collect();
    assert_eq!(order, [ConvFwdAlgorithm::Direct, ConvFwdAlgorithm::Gemm]);
    assert!((ranked[0].time - 0.1).abs() < 1e-6);
    assert!((ranked[1].time - 1.0).abs() < 1e-6);
    assert_eq!(ranked[0].memory, 0);
    assert_eq!(ranked[1].memory, case.ws_bytes);
}

#[test]
fn test_ties_keep_enumeration_order() {
    let ctx = create_context();
    // GEMM costs im2col + gemm per sample, equal to one direct launch
    pin_forward_times(&ctx, 0.5, 0.5, 1.0);
    let case = ForwardCase::standard(&ctx);

    let ranked = case.find(&ctx, 4).unwrap();
    assert_eq!(ranked[0].algorithm, ConvFwdAlgorithm::Gemm);
    assert_eq!(ranked[1].algorithm, ConvFwdAlgorithm::Direct);
    assert_eq!(ranked[0].time, ranked[1].time);
}

#[test]
fn test_backward_data_ties_prefer_direct() {
    let ctx = create_context();
    ctx.set_kernel_time("gemm", 0.5);
    ctx.set_kernel_time("col2im", 0.5);
    ctx.set_kernel_time("conv_direct", 1.0);
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap();
    let w = HostTensor::pattern(&ctx, [4, 3, 3, 3], 2);
    let dy = HostTensor::pattern(&ctx, [1, 4, 8, 8], 3);
    let dx_desc = conv.backward_output_desc(&dy.desc, &w.desc).unwrap();
    let dx = HostTensor::zeros(&ctx, &dx_desc);
    let bytes = conv
        .backward_data_workspace_size(&ctx, &w.desc, &dy.desc, &dx.desc)
        .unwrap();

    let ranked = conv
        .find_backward_data_algorithm(
            &ctx,
            dy.arg(),
            w.arg(),
            dx.arg(),
            4,
            workspace(&ctx, bytes),
        )
        .unwrap();
    let order: Vec<_> = ranked.iter().map(|p| p.algorithm).collect();
    assert_eq!(order, [ConvBwdDataAlgorithm::Direct, ConvBwdDataAlgorithm::Gemm]);
}

#[test]
fn test_batch_estimate_scales_per_sample_paths() {
    let ctx = create_context();
    pin_forward_times(&ctx, 0.25, 0.25, 100.0);
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap();
    let x = HostTensor::pattern(&ctx, [6, 3, 8, 8], 1);
    let w = HostTensor::pattern(&ctx, [4, 3, 3, 3], 2);
    let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
    let y = HostTensor::zeros(&ctx, &y_desc);
    let bytes = conv
        .forward_workspace_size(&ctx, &w.desc, &x.desc, &y.desc)
        .unwrap();

    let ranked = conv
        .find_forward_algorithm(&ctx, x.arg(), w.arg(), y.arg(), 1, workspace(&ctx, bytes))
        .unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].algorithm, ConvFwdAlgorithm::Gemm);
    // one sample timed, scaled by the batch
    assert!((ranked[0].time - 3.0).abs() < 1e-5);
    assert_eq!(ctx.invocations().iter().filter(|k| *k == "im2col").count(), 1);
}

#[test]
fn test_request_count_truncates() {
    let ctx = create_context();
    let case = ForwardCase::standard(&ctx);
    assert_eq!(case.find(&ctx, 1).unwrap().len(), 1);
    assert_eq!(case.find(&ctx, 2).unwrap().len(), 2);
    assert_eq!(case.find(&ctx, 10).unwrap().len(), 2);
    assert!(matches!(
        case.find(&ctx, 0),
        Err(Error::BadParam {
            arg: "request_count",
            ..
        })
    ));
}

// =============================================================================
// Caching
// =============================================================================

#[test]
fn test_cached_winner_skips_timing() {
    let ctx = create_context();
    pin_forward_times(&ctx, 0.5, 0.5, 0.1);
    let case = ForwardCase::standard(&ctx);
    let first = case.find(&ctx, 4).unwrap();
    assert_eq!(case.conv.cache().winner_count(), 1);

    ctx.clear_invocations();
    let hit = case.find(&ctx, 1).unwrap();
    assert_eq!(hit, vec![first[0]]);
    assert!(ctx.invocations().is_empty());

    // asking for more than the winner searches again
    let again = case.find(&ctx, 2).unwrap();
    assert_eq!(again.len(), 2);
    assert!(!ctx.invocations().is_empty());
}

#[test]
fn test_first_winner_is_kept() {
    let ctx = create_context();
    pin_forward_times(&ctx, 0.5, 0.5, 0.1);
    let case = ForwardCase::standard(&ctx);
    assert_eq!(case.find(&ctx, 4).unwrap()[0].algorithm, ConvFwdAlgorithm::Direct);

    // GEMM is now faster, but the recorded winner stands
    pin_forward_times(&ctx, 0.01, 0.01, 5.0);
    let ranked = case.find(&ctx, 4).unwrap();
    assert_eq!(ranked[0].algorithm, ConvFwdAlgorithm::Gemm);
    assert_eq!(case.find(&ctx, 1).unwrap()[0].algorithm, ConvFwdAlgorithm::Direct);
}

#[test]
fn test_cache_is_per_device() {
    let host = create_context();
    let other = create_context_on("gfx1030", 8);
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap();
    let case = ForwardCase::new(&host, conv.clone());
    case.find(&host, 1).unwrap();

    let remote = ForwardCase::new(&other, conv);
    other.clear_invocations();
    remote.find(&other, 1).unwrap();
    assert!(!other.invocations().is_empty());
    assert_eq!(remote.conv.cache().winner_count(), 2);
}

#[test]
fn test_directions_cache_separately() {
    let ctx = create_context();
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap();
    let x = HostTensor::pattern(&ctx, [2, 3, 6, 6], 1);
    let w = HostTensor::pattern(&ctx, [4, 3, 3, 3], 2);
    let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
    let dy = HostTensor::pattern(&ctx, y_desc.nchw_dims().unwrap(), 3);
    let dw = HostTensor::zeros(&ctx, &w.desc);
    let bytes = conv
        .backward_weights_workspace_size(&ctx, &dy.desc, &x.desc, &dw.desc)
        .unwrap();

    let ranked = conv
        .find_backward_weights_algorithm(
            &ctx,
            dy.arg(),
            x.arg(),
            dw.arg(),
            2,
            workspace(&ctx, bytes),
        )
        .unwrap();
    assert_eq!(ranked.len(), 2);
    for algorithm in [ConvBwdWeightsAlgorithm::Gemm, ConvBwdWeightsAlgorithm::Direct] {
        assert!(ranked.iter().any(|p| p.algorithm == algorithm));
    }
    assert_eq!(conv.cache().winner_count(), 1);
}

// =============================================================================
// Side effects
// =============================================================================

#[test]
fn test_search_leaves_output_and_profiling_alone() {
    let ctx = create_context();
    let case = ForwardCase::standard(&ctx);
    let sentinel = vec![5.0; case.y.desc.element_count()];
    ctx.write(case.y.buffer, 0, &sentinel).unwrap();
    let live = ctx.live_buffers();

    assert!(!ctx.is_profiling_enabled());
    case.find(&ctx, 4).unwrap();
    assert!(!ctx.is_profiling_enabled());
    assert_eq!(case.y.read(&ctx), sentinel);

    // the temporary workspace from `find` is still alive; the scratch output is not
    assert_eq!(ctx.live_buffers(), live + usize::from(case.ws_bytes > 0));

    ctx.enable_profiling(true);
    case.find(&ctx, 4).unwrap();
    assert!(ctx.is_profiling_enabled());
}

#[test]
fn test_found_kernels_are_reused_by_execute() {
    let ctx = create_context();
    let case = ForwardCase::standard(&ctx);
    case.find(&ctx, 4).unwrap();
    let compiled = ctx.compiled_kernels();

    let ws = workspace(&ctx, case.ws_bytes);
    for algorithm in [ConvFwdAlgorithm::Direct, ConvFwdAlgorithm::Gemm] {
        case.conv
            .forward(
                &ctx,
                1.0,
                case.x.arg(),
                case.w.arg(),
                algorithm,
                0.0,
                case.y.arg(),
                ws,
            )
            .unwrap();
    }
    assert_eq!(ctx.compiled_kernels(), compiled);
}

// =============================================================================
// Failures
// =============================================================================

#[test]
fn test_failing_candidate_is_skipped() {
    let ctx = create_context();
    ctx.fail_compilation("conv_direct");
    let case = ForwardCase::standard(&ctx);
    let ranked = case.find(&ctx, 4).unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].algorithm, ConvFwdAlgorithm::Gemm);
}

#[test]
fn test_no_candidate_left() {
    let ctx = create_context();
    ctx.fail_compilation("conv_direct");
    ctx.fail_compilation("gemm");
    let case = ForwardCase::standard(&ctx);
    assert!(matches!(
        case.find(&ctx, 4),
        Err(Error::NoApplicableAlgorithm { .. })
    ));
    assert_eq!(case.conv.cache().winner_count(), 0);
}

#[test]
fn test_missing_workspace_skips_gemm() {
    let ctx = create_context();
    let case = ForwardCase::standard(&ctx);
    let ranked = case
        .conv
        .find_forward_algorithm(
            &ctx,
            case.x.arg(),
            case.w.arg(),
            case.y.arg(),
            4,
            convtune::runtime::Workspace::NONE,
        )
        .unwrap();
    assert_eq!(ranked.len(), 1);
    assert_eq!(ranked[0].algorithm, ConvFwdAlgorithm::Direct);
}

#[test]
fn test_disabled_direct_is_not_searched() {
    let ctx = create_context();
    let config = TuningConfig::from_lookup(|key| (key == ENV_DIRECT).then(|| "0".to_string()));
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1)
        .unwrap()
        .with_config(config);
    let case = ForwardCase::new(&ctx, conv);
    let ranked = case.find(&ctx, 4).unwrap();
    assert!(ranked.iter().all(|p| p.algorithm != ConvFwdAlgorithm::Direct));
    assert!(!ctx.invocations().iter().any(|k| k == "conv_direct"));
}

#[test]
fn test_winograd_displaces_direct_for_wide_outputs() {
    let ctx = create_context_on("gfx906", 4);
    let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1).unwrap();
    let x = HostTensor::pattern(&ctx, [1, 18, 5, 5], 1);
    let w = HostTensor::pattern(&ctx, [16, 18, 3, 3], 2);
    let y_desc = conv.forward_output_desc(&x.desc, &w.desc).unwrap();
    let y = HostTensor::zeros(&ctx, &y_desc);
    assert_eq!(
        conv.forward_workspace_size(&ctx, &w.desc, &x.desc, &y.desc)
            .unwrap(),
        0
    );

    let ranked = conv
        .find_forward_algorithm(
            &ctx,
            x.arg(),
            w.arg(),
            y.arg(),
            4,
            convtune::runtime::Workspace::NONE,
        )
        .unwrap();
    let order: Vec<_> = ranked.iter().map(|p| p.algorithm).collect();
    assert_eq!(order, [ConvFwdAlgorithm::Winograd]);
}
