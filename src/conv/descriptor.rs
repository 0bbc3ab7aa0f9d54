//! Convolution descriptor: the public entry point
//!
//! A descriptor holds validated parameters, the tuning configuration and a
//! shared [`SearchCache`]. Every public call validates its arguments in a
//! fixed order before touching the device:
//!
//! 1. buffers non-null
//! 2. equal ranks, rank >= 3, rank == 4
//! 3. equal dtypes
//! 4. channel agreement for the mode
//! 5. `alpha == 1`, `beta == 0` (execute only)
//! 6. packed strides and buffers large enough for their tensors
//! 7. workspace declaration within its buffer

use super::algorithm::{
    AlgoPerf, ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm,
};
use super::applicability::DeviceInfo;
use super::invoke::{ConvBuffers, ExecArgs, RunMode};
use super::params::{ConvMode, ConvolutionParams, Direction, PaddingPolicy};
use super::problem::ConvProblem;
use super::search::{self, SearchCache, SearchRequest, Strategy};
use super::shape;
use super::validate::{self, TensorArg};
use super::workspace::WorkspaceCalculator;
use crate::config::TuningConfig;
use crate::error::{Error, Result};
use crate::runtime::{ExecutionContext, Workspace};
use crate::tensor::TensorDesc;
use std::sync::Arc;

/// 2-D convolution descriptor
#[derive(Clone)]
pub struct ConvolutionDescriptor {
    params: ConvolutionParams,
    config: TuningConfig,
    cache: Arc<SearchCache>,
}

impl std::fmt::Debug for ConvolutionDescriptor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConvolutionDescriptor")
            .field("params", &self.params)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

/// Tensors in forward naming plus their buffers
struct Operands<'a> {
    x: TensorArg<'a>,
    w: TensorArg<'a>,
    y: TensorArg<'a>,
}

impl Operands<'_> {
    fn buffers(&self) -> ConvBuffers {
        ConvBuffers {
            x: self.x.buffer,
            w: self.w.buffer,
            y: self.y.buffer,
        }
    }
}

/// Argument names in caller terms, per direction: (x, w, y)
fn names(direction: Direction) -> [&'static str; 3] {
    match direction {
        Direction::Forward => ["x", "w", "y"],
        Direction::BackwardData => ["dx", "w", "dy"],
        Direction::BackwardWeights => ["x", "dw", "dy"],
    }
}

impl ConvolutionDescriptor {
    /// Standard-mode descriptor with explicit padding
    pub fn new(
        pad_h: i32,
        pad_w: i32,
        u: i32,
        v: i32,
        dilation_h: i32,
        dilation_w: i32,
    ) -> Result<Self> {
        ConvolutionParams::new(pad_h, pad_w, u, v, dilation_h, dilation_w).map(Self::from_params)
    }

    /// Descriptor with an explicit mode and padding policy
    #[allow(clippy::too_many_arguments)]
    pub fn with_mode(
        mode: ConvMode,
        padding: PaddingPolicy,
        pad_h: i32,
        pad_w: i32,
        u: i32,
        v: i32,
        dilation_h: i32,
        dilation_w: i32,
    ) -> Result<Self> {
        ConvolutionParams::with_mode(mode, padding, pad_h, pad_w, u, v, dilation_h, dilation_w)
            .map(Self::from_params)
    }

    /// Descriptor over already-validated parameters with the default configuration
    pub fn from_params(params: ConvolutionParams) -> Self {
        Self {
            params,
            config: TuningConfig::default(),
            cache: Arc::new(SearchCache::new()),
        }
    }

    /// Replace the tuning configuration
    pub fn with_config(mut self, config: TuningConfig) -> Self {
        self.config = config;
        self
    }

    /// Share winner and size caches with other descriptors
    pub fn with_cache(mut self, cache: Arc<SearchCache>) -> Self {
        self.cache = cache;
        self
    }

    /// Convolution parameters
    #[inline]
    pub fn params(&self) -> &ConvolutionParams {
        &self.params
    }

    /// Tuning configuration
    #[inline]
    pub fn config(&self) -> &TuningConfig {
        &self.config
    }

    /// Winner and size caches
    #[inline]
    pub fn cache(&self) -> &Arc<SearchCache> {
        &self.cache
    }

    // ------------------------------------------------------------------------
    // Shapes
    // ------------------------------------------------------------------------

    /// Output descriptor of the forward pass
    pub fn forward_output_desc(&self, x: &TensorDesc, w: &TensorDesc) -> Result<TensorDesc> {
        shape::forward_output_desc(&self.params, x, w)
    }

    /// Input-gradient descriptor for output gradient `dy`
    pub fn backward_output_desc(&self, dy: &TensorDesc, w: &TensorDesc) -> Result<TensorDesc> {
        shape::backward_output_desc(&self.params, dy, w)
    }

    /// Filter-gradient descriptor for input `x` and output gradient `dy`
    pub fn backward_weights_desc(&self, x: &TensorDesc, dy: &TensorDesc) -> Result<TensorDesc> {
        shape::backward_weights_desc(&self.params, x, dy)
    }

    // ------------------------------------------------------------------------
    // Workspace sizes
    // ------------------------------------------------------------------------

    fn problem(
        &self,
        direction: Direction,
        x: &TensorDesc,
        w: &TensorDesc,
        y: &TensorDesc,
    ) -> Result<ConvProblem> {
        let [xn, wn, yn] = names(direction);
        validate::ranks(&[(xn, x), (wn, w), (yn, y)])?;
        validate::dtypes(&[x, w, y])?;
        let problem = ConvProblem::new(direction, self.params, x, w, y)?;
        problem.validate_channels()?;
        Ok(problem)
    }

    fn workspace_size<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        problem: &ConvProblem,
    ) -> usize {
        let device = DeviceInfo::query(ctx);
        let key = search::cache_key(&problem.key(), &device);
        self.cache.workspace_size(&key, || {
            WorkspaceCalculator::new(&device, &self.config).total(problem)
        })
    }

    /// Largest workspace any forward strategy may need
    ///
    /// Returns 0 when a zero-workspace strategy applies or when the GEMM
    /// requirement exceeds the device ceiling.
    pub fn forward_workspace_size<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        w: &TensorDesc,
        x: &TensorDesc,
        y: &TensorDesc,
    ) -> Result<usize> {
        let problem = self.problem(Direction::Forward, x, w, y)?;
        Ok(self.workspace_size(ctx, &problem))
    }

    /// Largest workspace any backward-data strategy may need
    pub fn backward_data_workspace_size<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        w: &TensorDesc,
        dy: &TensorDesc,
        dx: &TensorDesc,
    ) -> Result<usize> {
        let problem = self.problem(Direction::BackwardData, dx, w, dy)?;
        Ok(self.workspace_size(ctx, &problem))
    }

    /// Largest workspace any backward-weights strategy may need
    pub fn backward_weights_workspace_size<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        dy: &TensorDesc,
        x: &TensorDesc,
        dw: &TensorDesc,
    ) -> Result<usize> {
        let problem = self.problem(Direction::BackwardWeights, x, dw, dy)?;
        Ok(self.workspace_size(ctx, &problem))
    }

    // ------------------------------------------------------------------------
    // Search
    // ------------------------------------------------------------------------

    fn checked(
        &self,
        direction: Direction,
        ops: &Operands<'_>,
        workspace: Workspace,
    ) -> Result<ConvProblem> {
        let [xn, wn, yn] = names(direction);
        validate::non_null(&[(xn, ops.x.buffer), (wn, ops.w.buffer), (yn, ops.y.buffer)])?;
        let problem = self.problem(direction, ops.x.desc, ops.w.desc, ops.y.desc)?;
        validate::storage(&[(xn, ops.x), (wn, ops.w), (yn, ops.y)])?;
        workspace.validate()?;
        Ok(problem)
    }

    fn find<A: Strategy, C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        ops: Operands<'_>,
        request_count: usize,
        workspace: Workspace,
    ) -> Result<Vec<AlgoPerf<A>>> {
        if request_count == 0 {
            return Err(Error::bad_param("request_count", "must be at least 1"));
        }
        let problem = self.checked(A::DIRECTION, &ops, workspace)?;
        let key = problem.key();
        let device = DeviceInfo::query(ctx);
        let request = SearchRequest {
            problem: &problem,
            key: &key,
            device: &device,
            config: &self.config,
            buffers: ops.buffers(),
            workspace,
            request_count,
        };
        search::find(ctx, &self.cache, &request)
    }

    /// Rank the forward strategies for this problem, best first
    ///
    /// With `request_count == 1` a previously found winner is returned
    /// without re-timing. Search output goes to scratch memory; `y` is
    /// never written.
    pub fn find_forward_algorithm<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        x: TensorArg<'_>,
        w: TensorArg<'_>,
        y: TensorArg<'_>,
        request_count: usize,
        workspace: Workspace,
    ) -> Result<Vec<AlgoPerf<ConvFwdAlgorithm>>> {
        self.find(ctx, Operands { x, w, y }, request_count, workspace)
    }

    /// Rank the backward-data strategies for this problem, best first
    pub fn find_backward_data_algorithm<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        dy: TensorArg<'_>,
        w: TensorArg<'_>,
        dx: TensorArg<'_>,
        request_count: usize,
        workspace: Workspace,
    ) -> Result<Vec<AlgoPerf<ConvBwdDataAlgorithm>>> {
        self.find(ctx, Operands { x: dx, w, y: dy }, request_count, workspace)
    }

    /// Rank the backward-weights strategies for this problem, best first
    pub fn find_backward_weights_algorithm<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        dy: TensorArg<'_>,
        x: TensorArg<'_>,
        dw: TensorArg<'_>,
        request_count: usize,
        workspace: Workspace,
    ) -> Result<Vec<AlgoPerf<ConvBwdWeightsAlgorithm>>> {
        self.find(ctx, Operands { x, w: dw, y: dy }, request_count, workspace)
    }

    // ------------------------------------------------------------------------
    // Execute
    // ------------------------------------------------------------------------

    /// Whether the mode admits the algorithm at all
    fn mode_allows<A: Strategy>(&self, algorithm: A) -> bool {
        A::executable(self.params.mode()).contains(&algorithm)
    }

    #[allow(clippy::too_many_arguments)]
    fn execute<A: Strategy, C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        alpha: f32,
        ops: Operands<'_>,
        algorithm: A,
        beta: f32,
        workspace: Workspace,
    ) -> Result<()> {
        let [xn, wn, yn] = names(A::DIRECTION);
        validate::non_null(&[(xn, ops.x.buffer), (wn, ops.w.buffer), (yn, ops.y.buffer)])?;
        let problem = self.problem(A::DIRECTION, ops.x.desc, ops.w.desc, ops.y.desc)?;
        validate::identity_scaling(alpha, beta)?;
        validate::storage(&[(xn, ops.x), (wn, ops.w), (yn, ops.y)])?;
        workspace.validate()?;

        if !self.mode_allows(algorithm) {
            return Err(Error::not_applicable(
                algorithm.name(),
                format!("not available in {:?} mode", self.params.mode()),
            ));
        }

        let key = problem.key();
        let device = DeviceInfo::query(ctx);
        let args = ExecArgs {
            algorithm: algorithm.name(),
            problem: &problem,
            key: &key,
            device: &device,
            config: &self.config,
            buffers: ops.buffers(),
            workspace,
            mode: RunMode::Execute,
        };
        let time = algorithm.run(ctx, &args)?;
        tracing::debug!(algorithm = algorithm.name(), key = %key, time, "executed");
        Ok(())
    }

    /// Run the forward convolution `y = conv(x, w)` with the chosen strategy
    ///
    /// Direct, Winograd and FFT need a prior search for the same problem;
    /// GEMM compiles on demand.
    #[allow(clippy::too_many_arguments)]
    pub fn forward<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        alpha: f32,
        x: TensorArg<'_>,
        w: TensorArg<'_>,
        algorithm: ConvFwdAlgorithm,
        beta: f32,
        y: TensorArg<'_>,
        workspace: Workspace,
    ) -> Result<()> {
        self.execute(ctx, alpha, Operands { x, w, y }, algorithm, beta, workspace)
    }

    /// Compute the input gradient `dx` from `dy` and `w`
    #[allow(clippy::too_many_arguments)]
    pub fn backward_data<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        alpha: f32,
        dy: TensorArg<'_>,
        w: TensorArg<'_>,
        algorithm: ConvBwdDataAlgorithm,
        beta: f32,
        dx: TensorArg<'_>,
        workspace: Workspace,
    ) -> Result<()> {
        self.execute(
            ctx,
            alpha,
            Operands { x: dx, w, y: dy },
            algorithm,
            beta,
            workspace,
        )
    }

    /// Compute the filter gradient `dw` from `dy` and `x`
    ///
    /// `dw` is overwritten, not accumulated into.
    #[allow(clippy::too_many_arguments)]
    pub fn backward_weights<C: ExecutionContext + ?Sized>(
        &self,
        ctx: &C,
        alpha: f32,
        dy: TensorArg<'_>,
        x: TensorArg<'_>,
        algorithm: ConvBwdWeightsAlgorithm,
        beta: f32,
        dw: TensorArg<'_>,
        workspace: Workspace,
    ) -> Result<()> {
        self.execute(
            ctx,
            alpha,
            Operands { x, w: dw, y: dy },
            algorithm,
            beta,
            workspace,
        )
    }
}
