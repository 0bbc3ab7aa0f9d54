//! Scoped profiling and kernel-time accounting

use super::{ExecutionContext, KernelArg, KernelHandle, KernelSpec};
use crate::error::Result;
use std::ops::Deref;

/// Enables profiling on a shared context and restores the previous flag on drop
///
/// The context may be shared by several descriptors, so the saved flag is put
/// back on every exit path, including `?` returns and unwinding.
pub struct ProfilingScope<'a, C: ExecutionContext + ?Sized> {
    ctx: &'a C,
    previous: bool,
}

impl<'a, C: ExecutionContext + ?Sized> ProfilingScope<'a, C> {
    /// Turn profiling on and reset the kernel time
    pub fn enable(ctx: &'a C) -> Self {
        let previous = ctx.is_profiling_enabled();
        ctx.enable_profiling(true);
        ctx.reset_kernel_time();
        Self { ctx, previous }
    }
}

impl<C: ExecutionContext + ?Sized> Deref for ProfilingScope<'_, C> {
    type Target = C;

    fn deref(&self) -> &C {
        self.ctx
    }
}

impl<C: ExecutionContext + ?Sized> Drop for ProfilingScope<'_, C> {
    fn drop(&mut self) {
        self.ctx.enable_profiling(self.previous);
    }
}

/// Sums device time across the kernels of one executor call
///
/// When profiling is on, [`KernelTimer::finish`] leaves the total readable
/// through `kernel_time()` so callers see one number per call.
pub(crate) struct KernelTimer<'a, C: ExecutionContext + ?Sized> {
    ctx: &'a C,
    profiling: bool,
    total: f32,
}

impl<'a, C: ExecutionContext + ?Sized> KernelTimer<'a, C> {
    pub(crate) fn new(ctx: &'a C) -> Self {
        Self {
            ctx,
            profiling: ctx.is_profiling_enabled(),
            total: 0.0,
        }
    }

    /// Find-or-compile a kernel, then launch it
    pub(crate) fn compile_and_launch(
        &mut self,
        algorithm: &str,
        network_config: &str,
        spec: &KernelSpec,
        args: &[KernelArg],
    ) -> Result<()> {
        let kernel = self.ctx.add_kernel(algorithm, network_config, spec)?;
        self.launch(&kernel, args)
    }

    /// Invoke a kernel and add its elapsed time
    pub(crate) fn launch(&mut self, kernel: &KernelHandle, args: &[KernelArg]) -> Result<()> {
        self.ctx.invoke(kernel, args)?;
        if self.profiling {
            self.total += self.ctx.kernel_time();
        }
        Ok(())
    }

    /// Scale the accumulated time (per-sample estimates)
    pub(crate) fn scale(&mut self, factor: usize) {
        self.total *= factor as f32;
    }

    /// Publish the total to the context and return it
    pub(crate) fn finish(self) -> f32 {
        if self.profiling {
            self.ctx.reset_kernel_time();
            self.ctx.accum_kernel_time(self.total);
        }
        self.total
    }
}
