//! Arguments shared by every executor

use super::applicability::DeviceInfo;
use super::problem::{ConvProblem, ProblemKey};
use super::workspace::WorkspaceCalculator;
use crate::config::TuningConfig;
use crate::error::{Error, Result};
use crate::runtime::{
    Buffer, ExecutionContext, KernelArg, KernelHandle, KernelSpec, KernelTimer, Workspace,
};

/// Whether an executor produces real results or a timing estimate
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum RunMode {
    /// Full computation into the caller's output
    Execute,
    /// Search timing into a throwaway output; per-sample paths run one sample
    /// and scale the time by the batch size
    Estimate,
}

/// Device buffers in forward naming (see [`ConvProblem`])
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ConvBuffers {
    pub x: Buffer,
    pub w: Buffer,
    pub y: Buffer,
}

/// Everything an executor needs for one run
pub(crate) struct ExecArgs<'a> {
    /// Name reported in workspace errors
    pub algorithm: &'static str,
    pub problem: &'a ConvProblem,
    pub key: &'a ProblemKey,
    pub device: &'a DeviceInfo,
    pub config: &'a TuningConfig,
    pub buffers: ConvBuffers,
    pub workspace: Workspace,
    pub mode: RunMode,
}

impl ExecArgs<'_> {
    pub fn calculator(&self) -> WorkspaceCalculator<'_> {
        WorkspaceCalculator::new(self.device, self.config)
    }

    /// Samples to actually run in per-sample loops
    pub fn samples(&self) -> usize {
        match self.mode {
            RunMode::Execute => self.problem.x.n,
            RunMode::Estimate => self.problem.x.n.min(1),
        }
    }
}

/// One kernel launch of a precompiled-solution strategy
///
/// `index` is the kernel's position under its `(algorithm, config)` key, so
/// multi-kernel solutions find the right handle again at execute time.
#[derive(Clone, Debug)]
pub(crate) struct KernelStep {
    pub algorithm: String,
    pub config: String,
    pub index: usize,
    pub spec: KernelSpec,
    pub args: Vec<KernelArg>,
}

impl KernelStep {
    pub fn new(algorithm: &str, config: &str, index: usize, spec: KernelSpec) -> Self {
        Self {
            algorithm: algorithm.to_string(),
            config: config.to_string(),
            index,
            spec,
            args: Vec::new(),
        }
    }

    pub fn with_args(mut self, args: Vec<KernelArg>) -> Self {
        self.args = args;
        self
    }
}

/// Resolve the handle for a step
///
/// Search compiles (find-or-compile); execution only looks up what a search
/// already registered and fails with `KernelNotFound` otherwise.
fn resolve<C: ExecutionContext + ?Sized>(
    ctx: &C,
    mode: RunMode,
    step: &KernelStep,
) -> Result<KernelHandle> {
    match mode {
        RunMode::Estimate => ctx.add_kernel(&step.algorithm, &step.config, &step.spec),
        RunMode::Execute => ctx
            .get_kernels(&step.algorithm, &step.config)?
            .into_iter()
            .nth(step.index)
            .ok_or_else(|| Error::KernelNotFound {
                algorithm: step.algorithm.clone(),
                network_config: format!("{}[{}]", step.config, step.index),
            }),
    }
}

/// Launch steps in order; returns total device time in milliseconds
pub(crate) fn run_steps<C: ExecutionContext + ?Sized>(
    ctx: &C,
    mode: RunMode,
    steps: &[KernelStep],
) -> Result<f32> {
    let handles = steps
        .iter()
        .map(|step| resolve(ctx, mode, step))
        .collect::<Result<Vec<_>>>()?;
    let mut timer = KernelTimer::new(ctx);
    for (step, handle) in steps.iter().zip(&handles) {
        timer.launch(handle, &step.args)?;
    }
    Ok(timer.finish())
}
