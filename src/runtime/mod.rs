//! Device collaborator interfaces
//!
//! The convolution engine never compiles or launches code itself. It talks to
//! an [`ExecutionContext`], which owns the queue, memory and program cache.
//!
//! # Architecture
//!
//! ```text
//! ExecutionContext (device identity, timing, buffers)
//! ├── ProgramCache   (algorithm + network config → compiled kernels)
//! ├── KernelSpec     (program, entry, launch geometry, defines)
//! └── KernelArg      (positional calling convention)
//! ```
//!
//! The `cpu` feature provides [`cpu::CpuContext`], a host implementation that
//! interprets every kernel the executors emit.

mod buffer;
pub mod kernel;
mod profiling;
mod program;
pub mod traits;

#[cfg(feature = "cpu")]
pub mod cpu;

pub use buffer::{Buffer, ScratchBuffer, Workspace};
pub use kernel::{CompileOptions, KernelArg, KernelHandle, KernelSpec};
pub use profiling::ProfilingScope;
pub(crate) use profiling::KernelTimer;
pub use program::ProgramCache;
pub use traits::ExecutionContext;
