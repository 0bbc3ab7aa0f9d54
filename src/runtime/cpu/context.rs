//! Host execution context

use super::device::CpuDevice;
use super::kernels;
use super::memory::HostMemory;
use crate::error::{Error, Result};
use crate::runtime::{
    Buffer, ExecutionContext, KernelArg, KernelHandle, KernelSpec, ProgramCache,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Instant;

/// [`ExecutionContext`] that runs every kernel on the host
///
/// Memory is plain f32 arrays addressed by [`Buffer`] handles and kernels
/// are interpreted from their spec. Besides the trait surface it offers a
/// few hooks for exercising the engine: pinned kernel times, forced
/// compilation failures and a log of launched entry points.
///
/// # Example
///
/// ```
/// use convtune::runtime::cpu::CpuContext;
/// use convtune::runtime::ExecutionContext;
///
/// let ctx = CpuContext::new();
/// let x = ctx.upload(&[1.0, 2.0, 3.0]).unwrap();
/// assert_eq!(x.len(), 12);
/// assert_eq!(ctx.read(x).unwrap(), vec![1.0, 2.0, 3.0]);
/// ctx.release_buffer(x);
/// ```
pub struct CpuContext {
    device: CpuDevice,
    memory: HostMemory,
    programs: ProgramCache,
    profiling: AtomicBool,
    kernel_time: Mutex<f32>,
    pinned: Mutex<HashMap<String, f32>>,
    failing: Mutex<HashSet<String>>,
    invocations: Mutex<Vec<String>>,
}

impl Default for CpuContext {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuContext {
    /// Context for the host CPU
    pub fn new() -> Self {
        Self::with_device(CpuDevice::new())
    }

    /// Context reporting the given device identity
    pub fn with_device(device: CpuDevice) -> Self {
        Self {
            device,
            memory: HostMemory::new(),
            programs: ProgramCache::new(),
            profiling: AtomicBool::new(false),
            kernel_time: Mutex::new(0.0),
            pinned: Mutex::new(HashMap::new()),
            failing: Mutex::new(HashSet::new()),
            invocations: Mutex::new(Vec::new()),
        }
    }

    /// Device identity
    pub fn device(&self) -> &CpuDevice {
        &self.device
    }

    /// Allocate a buffer holding `data`
    pub fn upload(&self, data: &[f32]) -> Result<Buffer> {
        let buffer = self.create_buffer(std::mem::size_of_val(data))?;
        self.memory.write(buffer, 0, data)?;
        Ok(buffer)
    }

    /// Copy a buffer's contents back
    pub fn read(&self, buffer: Buffer) -> Result<Vec<f32>> {
        self.memory.read(buffer)
    }

    /// Overwrite part of a buffer
    pub fn write(&self, buffer: Buffer, offset: usize, data: &[f32]) -> Result<()> {
        self.memory.write(buffer, offset, data)
    }

    /// Report `ms` as the elapsed time of every launch of `entry`
    pub fn set_kernel_time(&self, entry: &str, ms: f32) {
        self.pinned.lock().insert(entry.to_string(), ms);
    }

    /// Make compilation of `entry` fail from now on
    pub fn fail_compilation(&self, entry: &str) {
        self.failing.lock().insert(entry.to_string());
    }

    /// Entry points launched so far, in order
    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().clone()
    }

    /// Forget the launch log
    pub fn clear_invocations(&self) {
        self.invocations.lock().clear();
    }

    /// Buffers currently allocated
    pub fn live_buffers(&self) -> usize {
        self.memory.live_buffers()
    }

    /// Kernels compiled so far
    pub fn compiled_kernels(&self) -> usize {
        self.programs.len()
    }

    fn compile(&self, spec: &KernelSpec) -> Result<()> {
        if self.failing.lock().contains(&spec.entry) {
            return Err(Error::Backend(format!(
                "build of {}:{} failed",
                spec.program, spec.entry
            )));
        }
        kernels::compile(spec)
    }
}

impl ExecutionContext for CpuContext {
    fn device_name(&self) -> String {
        self.device.name().to_string()
    }

    fn max_compute_units(&self) -> usize {
        self.device.compute_units()
    }

    fn is_profiling_enabled(&self) -> bool {
        self.profiling.load(Ordering::Acquire)
    }

    fn enable_profiling(&self, enable: bool) {
        self.profiling.store(enable, Ordering::Release);
    }

    fn kernel_time(&self) -> f32 {
        *self.kernel_time.lock()
    }

    fn reset_kernel_time(&self) {
        *self.kernel_time.lock() = 0.0;
    }

    fn accum_kernel_time(&self, time: f32) {
        *self.kernel_time.lock() += time;
    }

    fn create_buffer(&self, bytes: usize) -> Result<Buffer> {
        Ok(self.memory.allocate(bytes))
    }

    fn release_buffer(&self, buffer: Buffer) {
        self.memory.release(buffer);
    }

    fn add_kernel(
        &self,
        algorithm: &str,
        network_config: &str,
        spec: &KernelSpec,
    ) -> Result<KernelHandle> {
        self.programs
            .get_or_compile(algorithm, network_config, spec, |spec| self.compile(spec))
    }

    fn get_kernels(&self, algorithm: &str, network_config: &str) -> Result<Vec<KernelHandle>> {
        self.programs.get(algorithm, network_config)
    }

    fn invoke(&self, kernel: &KernelHandle, args: &[KernelArg]) -> Result<()> {
        let start = Instant::now();
        kernels::run(&self.memory, kernel.spec(), args)?;
        let elapsed = start.elapsed().as_secs_f32() * 1e3;

        self.invocations.lock().push(kernel.name().to_string());
        if self.is_profiling_enabled() {
            let time = self
                .pinned
                .lock()
                .get(kernel.name())
                .copied()
                .unwrap_or(elapsed);
            *self.kernel_time.lock() = time;
        }
        tracing::trace!(kernel = kernel.name(), id = kernel.id(), elapsed_ms = elapsed, "invoke");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::{CompileOptions, ProfilingScope};

    fn fill_spec(count: usize) -> KernelSpec {
        let options = CompileOptions::new()
            .define("CONV_FP32", 1)
            .define_usize("SET_COUNT", count);
        KernelSpec::linear("set_tensor.cl", "set_tensor", count, 256, options)
    }

    #[test]
    fn test_pinned_time_is_reported() {
        let ctx = CpuContext::new();
        let buf = ctx.create_buffer(16).unwrap();
        let kernel = ctx.add_kernel("fill", "4", &fill_spec(4)).unwrap();
        ctx.set_kernel_time("set_tensor", 2.5);
        {
            let _scope = ProfilingScope::enable(&ctx);
            ctx.invoke(&kernel, &[buf.into(), KernelArg::Int(0), KernelArg::Float(1.0)])
                .unwrap();
            assert_eq!(ctx.kernel_time(), 2.5);
            ctx.accum_kernel_time(0.5);
            assert_eq!(ctx.kernel_time(), 3.0);
        }
        assert!(!ctx.is_profiling_enabled());
        assert_eq!(ctx.read(buf).unwrap(), vec![1.0; 4]);
        assert_eq!(ctx.invocations(), ["set_tensor"]);
    }

    #[test]
    fn test_compile_failures() {
        let ctx = CpuContext::new();
        ctx.fail_compilation("set_tensor");
        assert!(matches!(
            ctx.add_kernel("fill", "4", &fill_spec(4)),
            Err(Error::Backend(_))
        ));

        let unknown = KernelSpec::linear("x.cl", "nope", 1, 1, CompileOptions::new());
        assert!(ctx.add_kernel("a", "b", &unknown).is_err());

        let f16 = KernelSpec::linear(
            "set_tensor.cl",
            "set_tensor",
            1,
            1,
            CompileOptions::new().define("CONV_FP16", 1),
        );
        assert!(ctx.add_kernel("a", "b", &f16).is_err());
        assert_eq!(ctx.compiled_kernels(), 0);
    }

    #[test]
    fn test_bad_arguments_are_backend_errors() {
        let ctx = CpuContext::new();
        let kernel = ctx.add_kernel("fill", "8", &fill_spec(8)).unwrap();
        let small = ctx.create_buffer(16).unwrap();
        assert!(matches!(
            ctx.invoke(&kernel, &[small.into(), KernelArg::Int(0), KernelArg::Float(0.0)]),
            Err(Error::Backend(_))
        ));
        assert!(ctx.invoke(&kernel, &[KernelArg::Null]).is_err());
    }
}
