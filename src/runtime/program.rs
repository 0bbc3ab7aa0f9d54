//! Program cache: `(algorithm, network_config)` → compiled kernels
//!
//! Context implementations embed a [`ProgramCache`] and supply a compile
//! callback. Several kernels may live under one key (multi-pass strategies);
//! they are returned in insertion order.

use super::{KernelHandle, KernelSpec};
use crate::error::{Error, Result};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

type CacheKey = (String, String);

/// Append-only cache of compiled kernels
pub struct ProgramCache {
    kernels: Mutex<HashMap<CacheKey, Vec<KernelHandle>>>,
    next_id: AtomicU64,
}

impl Default for ProgramCache {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgramCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self {
            kernels: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Find a kernel with the same entry point under the key, or compile and append it
    ///
    /// `compile` is only called on a miss; its error leaves the cache untouched.
    pub fn get_or_compile(
        &self,
        algorithm: &str,
        network_config: &str,
        spec: &KernelSpec,
        compile: impl FnOnce(&KernelSpec) -> Result<()>,
    ) -> Result<KernelHandle> {
        let mut kernels = self.kernels.lock();
        let key = (algorithm.to_string(), network_config.to_string());
        if let Some(existing) = kernels
            .get(&key)
            .and_then(|list| list.iter().find(|k| k.spec() == spec))
        {
            return Ok(existing.clone());
        }

        compile(spec)?;
        let handle = KernelHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed), spec.clone());
        tracing::debug!(
            algorithm,
            network_config,
            entry = %spec.entry,
            options = %spec.options,
            "compiled kernel"
        );
        kernels.entry(key).or_default().push(handle.clone());
        Ok(handle)
    }

    /// All kernels registered under a key, in insertion order
    pub fn get(&self, algorithm: &str, network_config: &str) -> Result<Vec<KernelHandle>> {
        self.kernels
            .lock()
            .get(&(algorithm.to_string(), network_config.to_string()))
            .filter(|list| !list.is_empty())
            .cloned()
            .ok_or_else(|| Error::KernelNotFound {
                algorithm: algorithm.to_string(),
                network_config: network_config.to_string(),
            })
    }

    /// Whether any kernel is registered under a key
    pub fn contains(&self, algorithm: &str, network_config: &str) -> bool {
        self.kernels
            .lock()
            .contains_key(&(algorithm.to_string(), network_config.to_string()))
    }

    /// Total number of compiled kernels
    pub fn len(&self) -> usize {
        self.kernels.lock().values().map(Vec::len).sum()
    }

    /// Whether nothing has been compiled yet
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
