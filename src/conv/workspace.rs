//! Workspace sizing per strategy and in aggregate
//!
//! Sizes are in bytes. A GEMM size above the device-class ceiling is reported
//! as [`WorkspaceRequirement::MemoryConstrained`]; the public `usize` views
//! collapse that to 0, which callers must read as "use a cheaper variant".

use super::applicability::{
    is_bwd_weights_direct_applicable, is_fft_applicable, is_winograd_applicable, DeviceInfo,
};
use super::params::{ConvMode, Direction};
use super::problem::ConvProblem;
use super::{direct, fft};
use crate::config::TuningConfig;

/// Workspace a strategy needs, or the reason it cannot have it
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum WorkspaceRequirement {
    /// The strategy needs this many bytes (0 = none)
    Bytes(usize),
    /// The strategy would need `required` bytes, above the device ceiling
    MemoryConstrained {
        /// Unconstrained requirement
        required: usize,
        /// Ceiling for the device class
        ceiling: usize,
    },
}

impl WorkspaceRequirement {
    /// Bytes to report publicly (0 when memory-constrained)
    #[inline]
    pub fn reported(self) -> usize {
        match self {
            Self::Bytes(b) => b,
            Self::MemoryConstrained { .. } => 0,
        }
    }

    /// Bytes if the strategy is usable at all
    #[inline]
    pub fn usable(self) -> Option<usize> {
        match self {
            Self::Bytes(b) => Some(b),
            Self::MemoryConstrained { .. } => None,
        }
    }
}

/// Workspace arithmetic bound to one device and configuration
#[derive(Clone, Copy)]
pub struct WorkspaceCalculator<'a> {
    device: &'a DeviceInfo,
    config: &'a TuningConfig,
}

impl<'a> WorkspaceCalculator<'a> {
    /// Bind to a device and configuration
    pub fn new(device: &'a DeviceInfo, config: &'a TuningConfig) -> Self {
        Self { device, config }
    }

    fn ceiled(&self, bytes: usize) -> WorkspaceRequirement {
        match self.config.memory_ceiling(&self.device.name) {
            Some(ceiling) if bytes > ceiling => {
                tracing::warn!(
                    device = %self.device.name,
                    required = bytes,
                    ceiling,
                    "GEMM workspace exceeds device ceiling"
                );
                WorkspaceRequirement::MemoryConstrained {
                    required: bytes,
                    ceiling,
                }
            }
            _ => WorkspaceRequirement::Bytes(bytes),
        }
    }

    /// Column buffer for the im2col / col2im GEMM path
    ///
    /// `w_c * w_h * w_w` rows by the column-spatial size: the output side in
    /// Standard mode, the input side in Transpose mode. Pointwise needs none.
    pub fn gemm(&self, problem: &ConvProblem) -> WorkspaceRequirement {
        if problem.is_pointwise() {
            return WorkspaceRequirement::Bytes(0);
        }
        let spatial = match problem.params.mode() {
            ConvMode::Standard => problem.y.spatial(),
            ConvMode::Transpose => problem.x.spatial(),
        };
        let w = &problem.w;
        self.ceiled(w.c * w.h * w.w * spatial * problem.elem_size())
    }

    /// Whether the CNHW transpose fast path exists for the problem
    pub fn cnhw_eligible(&self, problem: &ConvProblem) -> bool {
        let p = &problem.params;
        if p.mode() != ConvMode::Standard
            || !problem.filter_is(1, 1)
            || !p.is_zero_pad()
            || !p.is_unit_dilation()
        {
            return false;
        }
        let stride_2 = p.stride_h() == 2 && p.stride_w() == 2;
        match problem.direction {
            Direction::Forward => {
                stride_2 || (p.is_unit_stride() && problem.x.h <= 14 && problem.x.w <= 14)
            }
            Direction::BackwardData => stride_2,
            Direction::BackwardWeights => false,
        }
    }

    /// Transposed input plus transposed output for the CNHW fast path
    ///
    /// `x_n * x_c * y_h * y_w` for the (sub-sampled) data side plus the full
    /// output side.
    pub fn gemm_transpose(&self, problem: &ConvProblem) -> WorkspaceRequirement {
        if !self.cnhw_eligible(problem) {
            return WorkspaceRequirement::Bytes(0);
        }
        let x = &problem.x;
        let es = problem.elem_size();
        self.ceiled(x.n * x.c * problem.y.spatial() * es + problem.y.numel() * es)
    }

    /// Direct kernels (only backward-weights ever needs scratch)
    pub fn direct(&self, problem: &ConvProblem) -> usize {
        if !self.config.direct_enabled
            || problem.direction != Direction::BackwardWeights
            || problem.params.mode() != ConvMode::Standard
            || !problem.params.is_unit_dilation()
            || !is_bwd_weights_direct_applicable(problem)
        {
            return 0;
        }
        direct::wrw_workspace(problem)
    }

    /// Frequency-domain buffers
    pub fn fft(&self, problem: &ConvProblem) -> usize {
        if !is_fft_applicable(self.config, problem) {
            return 0;
        }
        fft::workspace_bytes(problem)
    }

    /// Largest workspace any usable strategy may need, or 0 if a
    /// zero-workspace strategy applies
    pub fn total(&self, problem: &ConvProblem) -> usize {
        let p = &problem.params;
        if p.mode() == ConvMode::Transpose {
            return self.gemm(problem).reported();
        }

        // Pointwise GEMM runs without scratch in every direction and dtype
        if problem.is_pointwise() {
            return 0;
        }

        let gemm = self.gemm(problem).reported();
        let direct = self.direct(problem);
        if problem.direction == Direction::BackwardWeights {
            return gemm.max(direct);
        }
        if !p.is_unit_dilation() {
            return gemm.max(direct);
        }
        if self.cnhw_eligible(problem) {
            return self.gemm_transpose(problem).reported().max(direct);
        }
        if is_winograd_applicable(self.device, self.config, problem) {
            return 0;
        }
        self.fft(problem).max(gemm).max(direct)
    }
}
