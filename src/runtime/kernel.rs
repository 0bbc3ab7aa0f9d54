//! Kernel descriptions and calling conventions
//!
//! Executors never see compiled code. They describe a kernel with a
//! [`KernelSpec`] (program, entry point, launch geometry, compile-time
//! defines), register it with the context under an `(algorithm, network_config)`
//! key, and later invoke the returned [`KernelHandle`] with positional
//! [`KernelArg`]s.
//!
//! ```text
//! executor ──add_kernel(algorithm, config, spec)──► ProgramCache ──► KernelHandle
//!     │                                                                  │
//!     └──────────────invoke(handle, [Mem, Int, Float, Null, ...])────────┘
//! ```

use super::Buffer;
use std::fmt;
use std::sync::Arc;

// ============================================================================
// Compile options
// ============================================================================

/// Ordered set of preprocessor defines passed to the kernel compiler
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct CompileOptions {
    defines: Vec<(String, i64)>,
}

impl CompileOptions {
    /// Empty option set
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `-D{name}={value}`, replacing an earlier value for the same name
    pub fn define(mut self, name: impl Into<String>, value: i64) -> Self {
        let name = name.into();
        match self.defines.iter_mut().find(|(n, _)| *n == name) {
            Some(slot) => slot.1 = value,
            None => self.defines.push((name, value)),
        }
        self
    }

    /// Add `-D{name}={value}` for a non-negative size
    pub fn define_usize(self, name: impl Into<String>, value: usize) -> Self {
        self.define(name, value as i64)
    }

    /// Value of a define, if present
    pub fn get(&self, name: &str) -> Option<i64> {
        self.defines
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| *v)
    }

    /// Iterate defines in insertion order
    pub fn iter(&self) -> impl Iterator<Item = (&str, i64)> {
        self.defines.iter().map(|(n, v)| (n.as_str(), *v))
    }
}

impl fmt::Display for CompileOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (name, value)) in self.defines.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "-D{name}={value}")?;
        }
        Ok(())
    }
}

// ============================================================================
// Kernel spec and handle
// ============================================================================

/// Everything needed to find-or-compile one kernel
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct KernelSpec {
    /// Program (source file) name
    pub program: String,
    /// Entry-point function name
    pub entry: String,
    /// Local work size
    pub local: [usize; 3],
    /// Global work size
    pub global: [usize; 3],
    /// Compile-time defines
    pub options: CompileOptions,
}

impl KernelSpec {
    /// Spec with a 1-D launch covering `work_items` in groups of `local`
    pub fn linear(
        program: impl Into<String>,
        entry: impl Into<String>,
        work_items: usize,
        local: usize,
        options: CompileOptions,
    ) -> Self {
        let groups = work_items.div_ceil(local).max(1);
        Self {
            program: program.into(),
            entry: entry.into(),
            local: [local, 1, 1],
            global: [groups * local, 1, 1],
            options,
        }
    }
}

/// Reference to a kernel owned by the program cache
///
/// Cloning is cheap; the spec is shared.
#[derive(Clone, Debug)]
pub struct KernelHandle {
    id: u64,
    spec: Arc<KernelSpec>,
}

impl KernelHandle {
    /// Wrap a compiled kernel. Called by context implementations.
    pub fn new(id: u64, spec: KernelSpec) -> Self {
        Self {
            id,
            spec: Arc::new(spec),
        }
    }

    /// Unique id assigned by the program cache
    #[inline]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Entry-point name
    #[inline]
    pub fn name(&self) -> &str {
        &self.spec.entry
    }

    /// Full spec the kernel was built from
    #[inline]
    pub fn spec(&self) -> &KernelSpec {
        &self.spec
    }

    /// Compile-time defines
    #[inline]
    pub fn options(&self) -> &CompileOptions {
        &self.spec.options
    }
}

impl PartialEq for KernelHandle {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

// ============================================================================
// Arguments
// ============================================================================

/// One positional kernel argument
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum KernelArg {
    /// Device buffer
    Mem(Buffer),
    /// Integer scalar (shape values, offsets, flags)
    Int(i64),
    /// Float scalar
    Float(f32),
    /// Null pointer argument
    Null,
}

impl KernelArg {
    /// Integer argument from a size or offset
    #[inline]
    pub fn size(value: usize) -> Self {
        Self::Int(value as i64)
    }
}

impl From<Buffer> for KernelArg {
    fn from(value: Buffer) -> Self {
        Self::Mem(value)
    }
}
