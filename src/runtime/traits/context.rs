//! Trait for the device execution context collaborator

use crate::error::Result;
use crate::runtime::{Buffer, KernelArg, KernelHandle, KernelSpec};

/// Device, queue and program cache as seen by the convolution engine
///
/// All methods take `&self`: a context is shared between descriptors, so
/// implementors keep their mutable state (profiling flag, kernel time,
/// program cache, allocations) behind interior mutability.
///
/// # Kernel time
///
/// While profiling is enabled, every [`invoke`](Self::invoke) overwrites the
/// stored kernel time with that kernel's elapsed milliseconds.
/// [`accum_kernel_time`](Self::accum_kernel_time) adds to the stored value and
/// [`reset_kernel_time`](Self::reset_kernel_time) zeroes it.
pub trait ExecutionContext {
    /// Device identity (e.g. "gfx900")
    fn device_name(&self) -> String;

    /// Number of compute units on the device
    fn max_compute_units(&self) -> usize;

    /// Whether kernel timing is being recorded
    fn is_profiling_enabled(&self) -> bool;

    /// Turn kernel timing on or off
    fn enable_profiling(&self, enable: bool);

    /// Elapsed time in milliseconds of the most recent kernel (or accumulated value)
    fn kernel_time(&self) -> f32;

    /// Zero the stored kernel time
    fn reset_kernel_time(&self);

    /// Add `time` milliseconds to the stored kernel time
    fn accum_kernel_time(&self, time: f32);

    /// Allocate device memory
    fn create_buffer(&self, bytes: usize) -> Result<Buffer>;

    /// Return memory obtained from [`create_buffer`](Self::create_buffer)
    fn release_buffer(&self, buffer: Buffer);

    /// Find or compile a kernel and register it under `(algorithm, network_config)`
    fn add_kernel(
        &self,
        algorithm: &str,
        network_config: &str,
        spec: &KernelSpec,
    ) -> Result<KernelHandle>;

    /// Every kernel registered under the key, in insertion order
    ///
    /// Fails with `KernelNotFound` if nothing was added under the key.
    fn get_kernels(&self, algorithm: &str, network_config: &str) -> Result<Vec<KernelHandle>>;

    /// First kernel registered under the key
    fn get_kernel(&self, algorithm: &str, network_config: &str) -> Result<KernelHandle> {
        let mut kernels = self.get_kernels(algorithm, network_config)?;
        Ok(kernels.swap_remove(0))
    }

    /// Run a kernel to completion with positional arguments
    fn invoke(&self, kernel: &KernelHandle, args: &[KernelArg]) -> Result<()>;
}
