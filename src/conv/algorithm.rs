//! Closed algorithm enums and ranked search results

use super::params::Direction;
use std::fmt;

/// Behaviour shared by the per-direction algorithm enums
pub trait Algorithm: Copy + Eq + fmt::Debug + Send + Sync + 'static {
    /// Direction this enum belongs to
    const DIRECTION: Direction;

    /// Stable name, also used as the algorithm half of kernel cache keys
    fn name(self) -> &'static str;
}

/// Forward strategies
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConvFwdAlgorithm {
    /// im2col + GEMM (or pointwise / CNHW GEMM)
    Gemm,
    /// Direct convolution kernels
    Direct,
    /// Frequency-domain convolution
    Fft,
    /// 3x3 Winograd kernels
    Winograd,
}

impl Algorithm for ConvFwdAlgorithm {
    const DIRECTION: Direction = Direction::Forward;

    fn name(self) -> &'static str {
        match self {
            Self::Gemm => "fwd_gemm",
            Self::Direct => "fwd_direct",
            Self::Fft => "fwd_fft",
            Self::Winograd => "fwd_winograd",
        }
    }
}

/// Backward-data strategies
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConvBwdDataAlgorithm {
    /// GEMM + col2im (or pointwise / CNHW GEMM)
    Gemm,
    /// Direct convolution kernels
    Direct,
    /// Frequency-domain convolution
    Fft,
    /// 3x3 Winograd kernels with reversed, channel-swapped filter
    Winograd,
    /// im2col + GEMM for transposed convolutions
    TransposeGemm,
}

impl Algorithm for ConvBwdDataAlgorithm {
    const DIRECTION: Direction = Direction::BackwardData;

    fn name(self) -> &'static str {
        match self {
            Self::Gemm => "bwd_data_gemm",
            Self::Direct => "bwd_data_direct",
            Self::Fft => "bwd_data_fft",
            Self::Winograd => "bwd_data_winograd",
            Self::TransposeGemm => "bwd_data_transpose_gemm",
        }
    }
}

/// Backward-weights strategies
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum ConvBwdWeightsAlgorithm {
    /// im2col + accumulating GEMM
    Gemm,
    /// Direct weight-gradient kernels
    Direct,
}

impl Algorithm for ConvBwdWeightsAlgorithm {
    const DIRECTION: Direction = Direction::BackwardWeights;

    fn name(self) -> &'static str {
        match self {
            Self::Gemm => "bwd_weights_gemm",
            Self::Direct => "bwd_weights_direct",
        }
    }
}

/// One ranked search result
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct AlgoPerf<A: Algorithm> {
    /// Strategy
    pub algorithm: A,
    /// Measured device time in milliseconds
    pub time: f32,
    /// Workspace bytes the strategy needs
    pub memory: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_names_are_unique() {
        let mut names = vec![
            ConvFwdAlgorithm::Gemm.name(),
            ConvFwdAlgorithm::Direct.name(),
            ConvFwdAlgorithm::Fft.name(),
            ConvFwdAlgorithm::Winograd.name(),
            ConvBwdDataAlgorithm::Gemm.name(),
            ConvBwdDataAlgorithm::Direct.name(),
            ConvBwdDataAlgorithm::Fft.name(),
            ConvBwdDataAlgorithm::Winograd.name(),
            ConvBwdDataAlgorithm::TransposeGemm.name(),
            ConvBwdWeightsAlgorithm::Gemm.name(),
            ConvBwdWeightsAlgorithm::Direct.name(),
        ];
        let total = names.len();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), total);
        assert_eq!(ConvBwdWeightsAlgorithm::DIRECTION, Direction::BackwardWeights);
    }
}
