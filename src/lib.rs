//! # convtune
//!
//! **Algorithm selection, autotuning and dispatch for 2-D convolution.**
//!
//! convtune sits between a deep-learning framework and an accelerator. Given
//! tensor shapes and convolution parameters it derives output shapes, sizes
//! scratch workspaces, times every applicable algorithm (GEMM, direct,
//! Winograd, FFT) on the live device, caches the winner per problem and runs
//! the chosen algorithm on caller-owned buffers.
//!
//! ## Architecture
//!
//! ```text
//! ConvolutionDescriptor
//! ├── shape / workspace queries   (pure, cached per problem + device)
//! ├── find_*_algorithm            (profile candidates, rank, cache winner)
//! └── forward / backward_*        (validate, dispatch one algorithm)
//!          │
//!          ▼
//! ExecutionContext                (device identity, timing, memory, programs)
//! ```
//!
//! The engine never compiles or launches code itself; that is the job of an
//! [`runtime::ExecutionContext`]. The `cpu` feature ships
//! [`runtime::cpu::CpuContext`], which interprets every kernel on the host.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use convtune::prelude::*;
//!
//! let ctx = CpuContext::new();
//! let conv = ConvolutionDescriptor::new(1, 1, 1, 1, 1, 1)?;
//! let x_desc = TensorDesc::nchw(DType::F32, 1, 3, 32, 32);
//! let w_desc = TensorDesc::nchw(DType::F32, 16, 3, 3, 3);
//! let y_desc = conv.forward_output_desc(&x_desc, &w_desc)?;
//!
//! let ws_size = conv.forward_workspace_size(&ctx, &w_desc, &x_desc, &y_desc)?;
//! let perf = conv.find_forward_algorithm(&ctx, x, w, y, 4, workspace)?;
//! conv.forward(&ctx, 1.0, x, w, perf[0].algorithm, 0.0, y, workspace)?;
//! ```
//!
//! ## Feature Flags
//!
//! - `cpu` (default): host execution context
//! - `rayon` (default): multi-threaded host kernels
//!
//! ## Environment
//!
//! [`config::TuningConfig::from_env`] reads `CONVTUNE_DEBUG_CONV_DIRECT`,
//! `CONVTUNE_DEBUG_CONV_WINOGRAD`, `CONVTUNE_DEBUG_CONV_FFT` (set to `0` to
//! disable a family), `CONVTUNE_FIND_EXHAUSTIVE` and
//! `CONVTUNE_GEMM_WORKSPACE_LIMIT_MB`.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_inception)]

pub mod config;
pub mod conv;
pub mod dtype;
pub mod error;
pub mod runtime;
pub mod tensor;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::config::TuningConfig;
    pub use crate::conv::{
        AlgoPerf, Algorithm, ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm,
        ConvMode, ConvolutionDescriptor, PaddingPolicy, TensorArg, convolution_backward_bias,
    };
    pub use crate::dtype::DType;
    pub use crate::error::{Error, Result};
    pub use crate::runtime::{Buffer, ExecutionContext, Workspace};
    pub use crate::tensor::TensorDesc;

    #[cfg(feature = "cpu")]
    pub use crate::runtime::cpu::{CpuContext, CpuDevice};
}
