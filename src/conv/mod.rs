//! 2-D convolution: shapes, workspace sizing, algorithm search and execution
//!
//! The public surface is [`ConvolutionDescriptor`]. Everything below it is
//! organised by concern:
//!
//! - `params`, `shape`, `problem`: parameter validation, shape derivation and
//!   the canonical problem key
//! - `applicability`, `workspace`: hard gates and workspace formulas
//! - `gemm`, `direct`, `winograd`, `fft`, `bias`: executors
//! - `search`: timing, ranking and winner caching

mod algorithm;
mod applicability;
mod bias;
mod descriptor;
mod direct;
mod fft;
mod gemm;
mod invoke;
mod params;
mod problem;
mod search;
mod shape;
mod transforms;
mod validate;
mod winograd;
mod workspace;

pub use algorithm::{
    AlgoPerf, Algorithm, ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm,
};
pub use applicability::{
    DeviceFamily, DeviceInfo, is_bwd_weights_direct_applicable, is_direct_applicable,
    is_fft_applicable, is_winograd_applicable, prefers_winograd_over_direct,
};
pub use bias::convolution_backward_bias;
pub use descriptor::ConvolutionDescriptor;
pub use params::{ConvMode, ConvolutionParams, Direction, PaddingPolicy};
pub use problem::{ConvProblem, Nchw, ProblemKey};
pub use search::SearchCache;
pub use shape::{backward_output_desc, backward_weights_desc, forward_output_desc};
pub use validate::TensorArg;
pub use workspace::{WorkspaceCalculator, WorkspaceRequirement};
