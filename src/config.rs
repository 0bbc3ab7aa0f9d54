//! Tuning configuration
//!
//! Controls which strategies the search may try and how much workspace a
//! strategy may demand on a given device class. Values come from
//! [`TuningConfig::default`] or, with [`TuningConfig::from_env`], from
//! `CONVTUNE_*` environment variables.

/// Disable the Direct candidates (`0`/`false`).
pub const ENV_DIRECT: &str = "CONVTUNE_DEBUG_CONV_DIRECT";
/// Disable the precompiled Winograd binaries (`0`/`false`).
pub const ENV_WINOGRAD: &str = "CONVTUNE_DEBUG_CONV_WINOGRAD";
/// Disable the FFT candidates (`0`/`false`).
pub const ENV_FFT: &str = "CONVTUNE_DEBUG_CONV_FFT";
/// Request exhaustive direct-solver search (`1`/`true`).
pub const ENV_EXHAUSTIVE: &str = "CONVTUNE_FIND_EXHAUSTIVE";
/// Workspace ceiling in MiB applied to every device.
pub const ENV_GEMM_LIMIT_MB: &str = "CONVTUNE_GEMM_WORKSPACE_LIMIT_MB";

/// Largest GEMM workspace the gfx803 family can back reliably.
pub const GFX803_GEMM_CEILING: usize = 1 << 30;

/// Workspace ceiling for one device class
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemoryCeiling {
    /// Device-name prefix this ceiling applies to; empty matches every device
    pub device_prefix: String,
    /// Largest workspace in bytes a strategy may request
    pub max_bytes: usize,
}

impl MemoryCeiling {
    /// Create a ceiling for devices whose name starts with `device_prefix`
    pub fn new(device_prefix: impl Into<String>, max_bytes: usize) -> Self {
        Self {
            device_prefix: device_prefix.into(),
            max_bytes,
        }
    }

    fn matches(&self, device_name: &str) -> bool {
        device_name.starts_with(&self.device_prefix)
    }
}

/// Configuration options for algorithm search
#[derive(Debug, Clone)]
pub struct TuningConfig {
    /// Allow Direct candidates (default: true)
    pub direct_enabled: bool,

    /// Allow precompiled Winograd binaries (default: true)
    ///
    /// This is the feature flag consulted by the Winograd applicability gate.
    pub winograd_enabled: bool,

    /// Allow FFT candidates (default: true)
    pub fft_enabled: bool,

    /// Exhaustive direct-solver search (default: false)
    pub exhaustive_search: bool,

    /// Workspace ceilings per device class (default: gfx803 at 1 GiB)
    ///
    /// The first matching entry wins.
    pub memory_ceilings: Vec<MemoryCeiling>,
}

impl Default for TuningConfig {
    fn default() -> Self {
        Self {
            direct_enabled: true,
            winograd_enabled: true,
            fft_enabled: true,
            exhaustive_search: false,
            memory_ceilings: vec![MemoryCeiling::new("gfx803", GFX803_GEMM_CEILING)],
        }
    }
}

impl TuningConfig {
    /// Defaults overridden by `CONVTUNE_*` environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by values from an arbitrary key lookup
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let mut config = Self::default();
        if let Some(v) = lookup(ENV_DIRECT).as_deref().and_then(parse_flag) {
            config.direct_enabled = v;
        }
        if let Some(v) = lookup(ENV_WINOGRAD).as_deref().and_then(parse_flag) {
            config.winograd_enabled = v;
        }
        if let Some(v) = lookup(ENV_FFT).as_deref().and_then(parse_flag) {
            config.fft_enabled = v;
        }
        if let Some(v) = lookup(ENV_EXHAUSTIVE).as_deref().and_then(parse_flag) {
            config.exhaustive_search = v;
        }
        if let Some(mb) = lookup(ENV_GEMM_LIMIT_MB).and_then(|s| s.trim().parse::<usize>().ok()) {
            config
                .memory_ceilings
                .insert(0, MemoryCeiling::new("", mb * 1024 * 1024));
        }
        config
    }

    /// Ceiling in bytes for the named device, if any applies
    pub fn memory_ceiling(&self, device_name: &str) -> Option<usize> {
        self.memory_ceilings
            .iter()
            .find(|c| c.matches(device_name))
            .map(|c| c.max_bytes)
    }
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" | "enable" | "enabled" => Some(true),
        "0" | "false" | "no" | "off" | "disable" | "disabled" => Some(false),
        _ => None,
    }
}
