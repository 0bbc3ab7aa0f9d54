//! Host runtime
//!
//! [`CpuContext`] implements [`ExecutionContext`](crate::runtime::ExecutionContext)
//! on plain host memory. Each kernel spec the executors emit is matched by
//! entry point to a host implementation in `kernels`, which reads the same
//! defines and positional arguments a device binary would.

mod context;
mod device;
mod kernels;
mod memory;

pub use context::CpuContext;
pub use device::CpuDevice;
