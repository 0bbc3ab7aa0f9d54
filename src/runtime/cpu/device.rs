//! Host device identity

/// Identity the host context reports to the engine
///
/// The name drives applicability decisions, so tests can pose as a
/// particular accelerator (e.g. `gfx900`) while running on the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CpuDevice {
    name: String,
    compute_units: usize,
}

impl Default for CpuDevice {
    fn default() -> Self {
        Self::new()
    }
}

impl CpuDevice {
    /// The host CPU
    pub fn new() -> Self {
        let compute_units = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(1);
        Self {
            name: "cpu".to_string(),
            compute_units,
        }
    }

    /// A device with an explicit identity
    pub fn emulating(name: impl Into<String>, compute_units: usize) -> Self {
        Self {
            name: name.into(),
            compute_units,
        }
    }

    /// Device name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Compute unit count
    pub fn compute_units(&self) -> usize {
        self.compute_units
    }
}
