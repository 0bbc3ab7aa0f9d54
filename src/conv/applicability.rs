//! Applicability predicates
//!
//! Hard compatibility gates deciding whether a strategy can run a problem at
//! all. None of these are performance heuristics except
//! [`prefers_winograd_over_direct`].

use super::params::{ConvMode, Direction};
use super::problem::ConvProblem;
use crate::config::TuningConfig;
use crate::dtype::DType;
use crate::runtime::ExecutionContext;

/// Winograd kernels take 16-bit shape arguments
const WINOGRAD_DIM_LIMIT: usize = 1 << 16;
/// Winograd kernels address with 28-bit offsets
const WINOGRAD_OFFSET_LIMIT: usize = 1 << 28;

/// Device family as far as kernel availability is concerned
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DeviceFamily {
    /// gfx8xx
    Gfx8,
    /// gfx9xx
    Gfx9,
    /// Anything else (including the host reference context)
    Other,
}

impl DeviceFamily {
    /// Classify a device name
    pub fn from_name(name: &str) -> Self {
        if name.starts_with("gfx8") {
            Self::Gfx8
        } else if name.starts_with("gfx9") {
            Self::Gfx9
        } else {
            Self::Other
        }
    }
}

/// Device identity snapshot used by the predicates
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device name (e.g. "gfx906")
    pub name: String,
    /// Compute unit count
    pub compute_units: usize,
}

impl DeviceInfo {
    /// Query a context
    pub fn query<C: ExecutionContext + ?Sized>(ctx: &C) -> Self {
        Self {
            name: ctx.device_name(),
            compute_units: ctx.max_compute_units(),
        }
    }

    /// Family of this device
    pub fn family(&self) -> DeviceFamily {
        DeviceFamily::from_name(&self.name)
    }
}

const DIRECT_FILTERS: [(usize, usize); 6] = [(1, 1), (3, 3), (5, 5), (7, 7), (9, 9), (11, 11)];

fn in_direct_allowed_set(problem: &ConvProblem) -> bool {
    let (kh, kw) = (problem.w.h, problem.w.w);
    if DIRECT_FILTERS.contains(&(kh, kw)) {
        return true;
    }
    // asymmetric filters only exist in the stride-2, unpadded form
    let p = &problem.params;
    ((kh, kw) == (5, 10) || (kh, kw) == (5, 20))
        && p.stride_h() == 2
        && p.stride_w() == 2
        && p.is_zero_pad()
}

#[inline]
fn is_even_by_even(problem: &ConvProblem) -> bool {
    problem.w.h % 2 == 0 && problem.w.w % 2 == 0
}

#[inline]
fn large_stride_small_filter(problem: &ConvProblem) -> bool {
    let p = &problem.params;
    let stride_over_2 = p.stride_h() > 2 || p.stride_w() > 2;
    stride_over_2 && (problem.filter_is(1, 1) || problem.filter_is(3, 3))
}

/// Whether a direct kernel exists for the forward / backward-data filter geometry
pub fn is_direct_applicable(problem: &ConvProblem) -> bool {
    in_direct_allowed_set(problem)
        && !large_stride_small_filter(problem)
        && !(problem.filter_is(1, 1) && !problem.params.is_zero_pad())
        && !is_even_by_even(problem)
}

/// Whether a direct kernel exists for the backward-weights filter geometry
pub fn is_bwd_weights_direct_applicable(problem: &ConvProblem) -> bool {
    in_direct_allowed_set(problem) && !large_stride_small_filter(problem) && !is_even_by_even(problem)
}

/// Input and output channel counts as seen by a Winograd kernel
fn winograd_channels(problem: &ConvProblem) -> (usize, usize, usize, usize, usize) {
    // (batch, inputs, outputs, h, w)
    match problem.direction {
        Direction::BackwardData => (
            problem.y.n,
            problem.y.c,
            problem.w.c,
            problem.y.h,
            problem.y.w,
        ),
        _ => (
            problem.x.n,
            problem.x.c,
            problem.w.n,
            problem.x.h,
            problem.x.w,
        ),
    }
}

/// Whether the precompiled 3x3 Winograd kernels can run the problem
pub fn is_winograd_applicable(
    device: &DeviceInfo,
    config: &TuningConfig,
    problem: &ConvProblem,
) -> bool {
    if !config.winograd_enabled {
        return false;
    }
    if problem.direction == Direction::BackwardWeights
        || problem.params.mode() != ConvMode::Standard
    {
        return false;
    }
    if !matches!(device.name.as_str(), "gfx803" | "gfx900" | "gfx906") {
        return false;
    }

    let p = &problem.params;
    if !(problem.filter_is(3, 3)
        && p.pad_h() == 1
        && p.pad_w() == 1
        && p.is_unit_stride()
        && p.is_unit_dilation())
    {
        return false;
    }

    let (batch, n_in, n_out, h, w) = winograd_channels(problem);
    let dims_fit = [batch, n_in, n_out, h, w, device.compute_units]
        .iter()
        .all(|&d| d < WINOGRAD_DIM_LIMIT);
    if !dims_fit {
        return false;
    }
    let offsets_fit = [n_in * h * w, n_out * h * w, n_in * 9, n_out * 9]
        .iter()
        .all(|&v| v <= WINOGRAD_OFFSET_LIMIT);
    if !offsets_fit {
        return false;
    }

    let min_inputs = match device.family() {
        DeviceFamily::Gfx8 => 16,
        _ => 18,
    };
    n_in % 2 == 0 && n_in >= min_inputs && problem.dtype == DType::F32
}

/// Winograd is expected to beat every direct kernel for this problem
///
/// Direct candidates are skipped when this holds and Winograd is applicable.
pub fn prefers_winograd_over_direct(problem: &ConvProblem) -> bool {
    let (_, _, n_out, _, _) = winograd_channels(problem);
    n_out >= 16 && n_out % 2 == 0
}

/// Input sizes for which FFT tiles exist
const FFT_SIZES: [usize; 3] = [7, 14, 28];

/// Whether the frequency-domain kernels can run the problem
pub fn is_fft_applicable(config: &TuningConfig, problem: &ConvProblem) -> bool {
    if !config.fft_enabled || problem.direction == Direction::BackwardWeights {
        return false;
    }
    let p = &problem.params;
    if p.mode() != ConvMode::Standard || problem.dtype != DType::F32 {
        return false;
    }
    if !(problem.filter_is(5, 5)
        && p.pad_h() == 2
        && p.pad_w() == 2
        && p.is_unit_stride()
        && p.is_unit_dilation())
    {
        return false;
    }
    let (x, y) = (&problem.x, &problem.y);
    if x.h != x.w || !FFT_SIZES.contains(&x.h) || y.h != x.h || y.w != x.w {
        return false;
    }
    let batch_ok = (1..=512).contains(&x.n);
    let filters_ok = (1..=512).contains(&problem.w.n);
    batch_ok
        && filters_ok
        && (x.n * x.c) % 16 == 0
        && (problem.w.n * problem.w.c) % 16 == 0
        && (y.n * y.c) % 16 == 0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conv::ConvolutionParams;
    use crate::tensor::TensorDesc;

    fn problem(
        direction: Direction,
        x: [usize; 4],
        w: [usize; 4],
        params: ConvolutionParams,
    ) -> ConvProblem {
        let xd = TensorDesc::new(DType::F32, &x);
        let wd = TensorDesc::new(DType::F32, &w);
        let yd = crate::conv::shape::forward_output_desc(&params, &xd, &wd).unwrap();
        ConvProblem::new(direction, params, &xd, &wd, &yd).unwrap()
    }

    fn gfx(name: &str) -> DeviceInfo {
        DeviceInfo {
            name: name.to_string(),
            compute_units: 64,
        }
    }

    fn params(pad: i32, stride: i32) -> ConvolutionParams {
        ConvolutionParams::new(pad, pad, stride, stride, 1, 1).unwrap()
    }

    #[test]
    fn test_direct_allowed_filters() {
        for k in [1, 3, 5, 7, 9, 11] {
            let pad = if k == 1 { 0 } else { 1 };
            let pr = problem(Direction::Forward, [1, 4, 32, 32], [4, 4, k, k], params(pad, 1));
            assert!(is_direct_applicable(&pr), "{k}x{k} should be direct-applicable");
        }
    }

    #[test]
    fn test_direct_rejects_even_filters() {
        for k in [2, 4, 6] {
            let pr = problem(Direction::Forward, [1, 4, 32, 32], [4, 4, k, k], params(0, 1));
            assert!(!is_direct_applicable(&pr));
            assert!(!is_bwd_weights_direct_applicable(&pr));
        }
    }

    #[test]
    fn test_direct_stride_and_padding_rules() {
        let strided_3x3 = problem(Direction::Forward, [1, 4, 32, 32], [4, 4, 3, 3], params(1, 3));
        assert!(!is_direct_applicable(&strided_3x3));
        assert!(!is_bwd_weights_direct_applicable(&strided_3x3));

        let padded_1x1 = problem(Direction::Forward, [1, 4, 32, 32], [4, 4, 1, 1], params(1, 1));
        assert!(!is_direct_applicable(&padded_1x1));
        assert!(is_bwd_weights_direct_applicable(&padded_1x1));

        let strided_5x5 = problem(Direction::Forward, [1, 4, 32, 32], [4, 4, 5, 5], params(2, 3));
        assert!(is_direct_applicable(&strided_5x5));
    }

    #[test]
    fn test_direct_asymmetric_filters() {
        let ok = problem(Direction::Forward, [1, 4, 32, 64], [4, 4, 5, 10], params(0, 2));
        assert!(is_direct_applicable(&ok));
        let wrong_stride = problem(Direction::Forward, [1, 4, 32, 64], [4, 4, 5, 20], params(0, 1));
        assert!(!is_direct_applicable(&wrong_stride));
        let other = problem(Direction::Forward, [1, 4, 32, 64], [4, 4, 3, 5], params(0, 1));
        assert!(!is_direct_applicable(&other));
    }

    #[test]
    fn test_winograd_gate() {
        let config = TuningConfig::default();
        let good = problem(Direction::Forward, [2, 32, 28, 28], [32, 32, 3, 3], params(1, 1));
        assert!(is_winograd_applicable(&gfx("gfx900"), &config, &good));
        assert!(is_winograd_applicable(&gfx("gfx803"), &config, &good));
        assert!(!is_winograd_applicable(&gfx("gfx1030"), &config, &good));
        assert!(!is_winograd_applicable(&gfx("cpu"), &config, &good));

        let disabled = TuningConfig {
            winograd_enabled: false,
            ..TuningConfig::default()
        };
        assert!(!is_winograd_applicable(&gfx("gfx900"), &disabled, &good));
    }

    #[test]
    fn test_winograd_channel_minimum_by_family() {
        let config = TuningConfig::default();
        let c16 = problem(Direction::Forward, [1, 16, 14, 14], [16, 16, 3, 3], params(1, 1));
        assert!(is_winograd_applicable(&gfx("gfx803"), &config, &c16));
        assert!(!is_winograd_applicable(&gfx("gfx906"), &config, &c16));

        let odd = problem(Direction::Forward, [1, 3, 32, 32], [16, 3, 3, 3], params(1, 1));
        assert!(!is_winograd_applicable(&gfx("gfx900"), &config, &odd));
    }

    #[test]
    fn test_winograd_geometry() {
        let config = TuningConfig::default();
        let strided = problem(Direction::Forward, [1, 32, 28, 28], [32, 32, 3, 3], params(1, 2));
        assert!(!is_winograd_applicable(&gfx("gfx900"), &config, &strided));
        let unpadded = problem(Direction::Forward, [1, 32, 28, 28], [32, 32, 3, 3], params(0, 1));
        assert!(!is_winograd_applicable(&gfx("gfx900"), &config, &unpadded));
        let big_batch = problem(Direction::Forward, [1 << 16, 32, 4, 4], [32, 32, 3, 3], params(1, 1));
        assert!(!is_winograd_applicable(&gfx("gfx900"), &config, &big_batch));
    }

    #[test]
    fn test_winograd_backward_uses_output_channels() {
        let config = TuningConfig::default();
        // dy has 32 channels (even, >= 18) even though x has 3
        let pr = problem(Direction::BackwardData, [1, 3, 16, 16], [32, 3, 3, 3], params(1, 1));
        assert!(is_winograd_applicable(&gfx("gfx900"), &config, &pr));
        assert!(!prefers_winograd_over_direct(&pr));
    }

    #[test]
    fn test_fft_gate() {
        let config = TuningConfig::default();
        let ok = problem(Direction::Forward, [4, 4, 7, 7], [4, 4, 5, 5], params(2, 1));
        assert!(is_fft_applicable(&config, &ok));
        let odd_batch = problem(Direction::Forward, [3, 4, 7, 7], [4, 4, 5, 5], params(2, 1));
        assert!(!is_fft_applicable(&config, &odd_batch));
        let size = problem(Direction::Forward, [4, 4, 9, 9], [4, 4, 5, 5], params(2, 1));
        assert!(!is_fft_applicable(&config, &size));
        let wrw = problem(Direction::BackwardWeights, [4, 4, 7, 7], [4, 4, 5, 5], params(2, 1));
        assert!(!is_fft_applicable(&config, &wrw));
    }
}
