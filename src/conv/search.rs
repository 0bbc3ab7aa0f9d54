//! Performance search: enumerate, time, rank, memoize
//!
//! ```text
//! lookup winner ──hit (count == 1)──► return
//!      │ miss
//!      ▼
//! enumerate candidates ──► time each into scratch output ──► stable sort
//!      ──► cache winner ──► return top `count`
//! ```
//!
//! Candidates run in [`RunMode::Estimate`]: their output goes to a scratch
//! buffer that lives for one search, and their kernels are registered so a
//! later execute finds them. A failing candidate is logged and skipped.

use super::algorithm::{
    AlgoPerf, Algorithm, ConvBwdDataAlgorithm, ConvBwdWeightsAlgorithm, ConvFwdAlgorithm,
};
use super::applicability::{DeviceInfo, is_fft_applicable, is_winograd_applicable};
use super::invoke::{ConvBuffers, ExecArgs, RunMode};
use super::params::{ConvMode, Direction};
use super::problem::{ConvProblem, ProblemKey};
use super::{direct, fft, gemm, winograd};
use crate::config::TuningConfig;
use crate::error::{Error, Result};
use crate::runtime::{Buffer, ExecutionContext, ProfilingScope, ScratchBuffer, Workspace};
use parking_lot::Mutex;
use std::collections::HashMap;

// ============================================================================
// Caches
// ============================================================================

/// Best algorithm per problem key for one direction
pub(crate) struct FindCache<A: Algorithm> {
    winners: Mutex<HashMap<String, AlgoPerf<A>>>,
}

impl<A: Algorithm> FindCache<A> {
    fn new() -> Self {
        Self {
            winners: Mutex::new(HashMap::new()),
        }
    }

    pub(crate) fn get(&self, key: &str) -> Option<AlgoPerf<A>> {
        self.winners.lock().get(key).copied()
    }

    /// Keep the first winner recorded for a key
    fn insert(&self, key: &str, perf: AlgoPerf<A>) {
        self.winners.lock().entry(key.to_string()).or_insert(perf);
    }

    fn len(&self) -> usize {
        self.winners.lock().len()
    }
}

/// Winner and workspace-size memo tables
///
/// Owned by a descriptor; share one between descriptors with
/// [`ConvolutionDescriptor::with_cache`](super::ConvolutionDescriptor::with_cache).
/// Entries live until the cache is dropped.
pub struct SearchCache {
    pub(crate) forward: FindCache<ConvFwdAlgorithm>,
    pub(crate) backward_data: FindCache<ConvBwdDataAlgorithm>,
    pub(crate) backward_weights: FindCache<ConvBwdWeightsAlgorithm>,
    sizes: Mutex<HashMap<String, usize>>,
}

impl Default for SearchCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SearchCache {
    /// Empty cache
    pub fn new() -> Self {
        Self {
            forward: FindCache::new(),
            backward_data: FindCache::new(),
            backward_weights: FindCache::new(),
            sizes: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached winners across all directions
    pub fn winner_count(&self) -> usize {
        self.forward.len() + self.backward_data.len() + self.backward_weights.len()
    }

    /// Cached workspace size, computing it on a miss
    pub(crate) fn workspace_size(&self, key: &str, compute: impl FnOnce() -> usize) -> usize {
        if let Some(&size) = self.sizes.lock().get(key) {
            return size;
        }
        let size = compute();
        *self.sizes.lock().entry(key.to_string()).or_insert(size)
    }
}

/// Cache entries are per device: the same problem may rank differently elsewhere
pub(crate) fn cache_key(key: &ProblemKey, device: &DeviceInfo) -> String {
    format!("{}@{}", key, device.name)
}

// ============================================================================
// Ranked results
// ============================================================================

/// Measured candidates, ranked by time
pub(crate) struct PerfDb<A: Algorithm> {
    entries: Vec<AlgoPerf<A>>,
}

impl<A: Algorithm> PerfDb<A> {
    fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    fn push(&mut self, perf: AlgoPerf<A>) {
        self.entries.push(perf);
    }

    /// Stable ascending sort: equal times keep enumeration order
    fn into_ranked(mut self) -> Vec<AlgoPerf<A>> {
        self.entries.sort_by(|a, b| a.time.total_cmp(&b.time));
        self.entries
    }
}

// ============================================================================
// Strategies
// ============================================================================

/// Executor dispatch for one algorithm enum
pub(crate) trait Strategy: Algorithm {
    /// Search candidates for the mode, in enumeration order
    fn candidates(mode: ConvMode) -> &'static [Self];

    /// Algorithms a caller may execute in the mode
    fn executable(mode: ConvMode) -> &'static [Self] {
        Self::candidates(mode)
    }

    /// Whether the candidate is worth timing; inapplicable ones are skipped quietly
    fn admits(self, args: &ExecArgs<'_>) -> bool;

    /// Workspace bytes the candidate will use with this workspace
    fn memory(self, args: &ExecArgs<'_>) -> Result<usize>;

    /// Run the executor
    fn run<C: ExecutionContext + ?Sized>(self, ctx: &C, args: &ExecArgs<'_>) -> Result<f32>;

    /// Cache slot for this direction
    fn cache(cache: &SearchCache) -> &FindCache<Self>;
}

fn fits(args: &ExecArgs<'_>, bytes: usize) -> bool {
    let fits = args.workspace.fits(bytes);
    if !fits {
        tracing::debug!(
            algorithm = args.algorithm,
            required = bytes,
            provided = args.workspace.capacity(),
            "candidate skipped, workspace too small"
        );
    }
    fits
}

fn fft_admits(args: &ExecArgs<'_>) -> bool {
    is_fft_applicable(args.config, args.problem) && fits(args, fft::workspace_bytes(args.problem))
}

fn gemm_memory(args: &ExecArgs<'_>) -> Result<usize> {
    gemm::plan(args).map(|(_, bytes)| bytes)
}

impl Strategy for ConvFwdAlgorithm {
    fn candidates(mode: ConvMode) -> &'static [Self] {
        match mode {
            ConvMode::Standard => &[Self::Gemm, Self::Winograd, Self::Direct, Self::Fft],
            ConvMode::Transpose => &[Self::Gemm],
        }
    }

    fn admits(self, args: &ExecArgs<'_>) -> bool {
        match self {
            Self::Gemm => true,
            Self::Winograd => is_winograd_applicable(args.device, args.config, args.problem),
            Self::Direct => direct::is_enabled(args),
            Self::Fft => fft_admits(args),
        }
    }

    fn memory(self, args: &ExecArgs<'_>) -> Result<usize> {
        match self {
            Self::Gemm => gemm_memory(args),
            Self::Winograd | Self::Direct => Ok(0),
            Self::Fft => Ok(fft::workspace_bytes(args.problem)),
        }
    }

    fn run<C: ExecutionContext + ?Sized>(self, ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
        match self {
            Self::Gemm => gemm::run(ctx, args),
            Self::Winograd => winograd::run(ctx, args),
            Self::Direct => direct::run(ctx, args),
            Self::Fft => fft::run(ctx, args),
        }
    }

    fn cache(cache: &SearchCache) -> &FindCache<Self> {
        &cache.forward
    }
}

impl Strategy for ConvBwdDataAlgorithm {
    fn candidates(mode: ConvMode) -> &'static [Self] {
        match mode {
            ConvMode::Standard => &[Self::Winograd, Self::Direct, Self::Fft, Self::Gemm],
            ConvMode::Transpose => &[Self::TransposeGemm],
        }
    }

    fn executable(mode: ConvMode) -> &'static [Self] {
        match mode {
            ConvMode::Standard => Self::candidates(mode),
            ConvMode::Transpose => &[Self::Gemm, Self::TransposeGemm],
        }
    }

    fn admits(self, args: &ExecArgs<'_>) -> bool {
        match self {
            Self::Gemm | Self::TransposeGemm => true,
            Self::Winograd => is_winograd_applicable(args.device, args.config, args.problem),
            Self::Direct => direct::is_enabled(args),
            Self::Fft => fft_admits(args),
        }
    }

    fn memory(self, args: &ExecArgs<'_>) -> Result<usize> {
        match self {
            Self::Gemm | Self::TransposeGemm => gemm_memory(args),
            Self::Winograd | Self::Direct => Ok(0),
            Self::Fft => Ok(fft::workspace_bytes(args.problem)),
        }
    }

    fn run<C: ExecutionContext + ?Sized>(self, ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
        match self {
            Self::Gemm | Self::TransposeGemm => gemm::run(ctx, args),
            Self::Winograd => winograd::run(ctx, args),
            Self::Direct => direct::run(ctx, args),
            Self::Fft => fft::run(ctx, args),
        }
    }

    fn cache(cache: &SearchCache) -> &FindCache<Self> {
        &cache.backward_data
    }
}

impl Strategy for ConvBwdWeightsAlgorithm {
    fn candidates(mode: ConvMode) -> &'static [Self] {
        match mode {
            ConvMode::Standard => &[Self::Gemm, Self::Direct],
            ConvMode::Transpose => &[Self::Gemm],
        }
    }

    fn admits(self, args: &ExecArgs<'_>) -> bool {
        match self {
            Self::Gemm => true,
            Self::Direct => {
                direct::is_enabled(args) && fits(args, direct::wrw_workspace(args.problem))
            }
        }
    }

    fn memory(self, args: &ExecArgs<'_>) -> Result<usize> {
        match self {
            Self::Gemm => gemm_memory(args),
            Self::Direct => Ok(direct::wrw_workspace(args.problem)),
        }
    }

    fn run<C: ExecutionContext + ?Sized>(self, ctx: &C, args: &ExecArgs<'_>) -> Result<f32> {
        match self {
            Self::Gemm => gemm::run(ctx, args),
            Self::Direct => direct::run(ctx, args),
        }
    }

    fn cache(cache: &SearchCache) -> &FindCache<Self> {
        &cache.backward_weights
    }
}

// ============================================================================
// Search
// ============================================================================

/// Inputs of one search call
pub(crate) struct SearchRequest<'a> {
    pub problem: &'a ConvProblem,
    pub key: &'a ProblemKey,
    pub device: &'a DeviceInfo,
    pub config: &'a TuningConfig,
    /// Caller buffers; the output side is replaced by scratch memory
    pub buffers: ConvBuffers,
    pub workspace: Workspace,
    pub request_count: usize,
}

/// Bytes of the tensor a direction writes
fn output_bytes(problem: &ConvProblem) -> usize {
    let written = match problem.direction {
        Direction::Forward => problem.y,
        Direction::BackwardData => problem.x,
        Direction::BackwardWeights => problem.w,
    };
    written.numel() * problem.elem_size()
}

fn with_output(buffers: ConvBuffers, direction: Direction, scratch: Buffer) -> ConvBuffers {
    let mut out = buffers;
    match direction {
        Direction::Forward => out.y = scratch,
        Direction::BackwardData => out.x = scratch,
        Direction::BackwardWeights => out.w = scratch,
    }
    out
}

/// Rank every applicable candidate for the request
pub(crate) fn find<A: Strategy, C: ExecutionContext + ?Sized>(
    ctx: &C,
    cache: &SearchCache,
    req: &SearchRequest<'_>,
) -> Result<Vec<AlgoPerf<A>>> {
    let winners = A::cache(cache);
    let slot = cache_key(req.key, req.device);
    if req.request_count == 1 {
        if let Some(hit) = winners.get(&slot) {
            tracing::debug!(key = %req.key, algorithm = hit.algorithm.name(), "search cache hit");
            return Ok(vec![hit]);
        }
    }

    let profiled = ProfilingScope::enable(ctx);
    let scratch = ScratchBuffer::new(&*profiled, output_bytes(req.problem))?;
    let buffers = with_output(req.buffers, A::DIRECTION, scratch.buffer());

    let mut db = PerfDb::new();
    for &algorithm in A::candidates(req.problem.params.mode()) {
        let args = ExecArgs {
            algorithm: algorithm.name(),
            problem: req.problem,
            key: req.key,
            device: req.device,
            config: req.config,
            buffers,
            workspace: req.workspace,
            mode: RunMode::Estimate,
        };
        if !algorithm.admits(&args) {
            tracing::trace!(algorithm = algorithm.name(), "candidate not applicable");
            continue;
        }
        let measured = algorithm
            .memory(&args)
            .and_then(|memory| Ok((algorithm.run(&*profiled, &args)?, memory)));
        match measured {
            Ok((time, memory)) => {
                tracing::debug!(algorithm = algorithm.name(), time, memory, "candidate timed");
                db.push(AlgoPerf {
                    algorithm,
                    time,
                    memory,
                });
            }
            Err(err) => {
                tracing::warn!(
                    algorithm = algorithm.name(),
                    error = %err,
                    "candidate failed, skipping"
                );
            }
        }
    }

    let mut ranked = db.into_ranked();
    let Some(&best) = ranked.first() else {
        return Err(Error::NoApplicableAlgorithm {
            direction: A::DIRECTION,
        });
    };
    winners.insert(&slot, best);
    tracing::info!(
        key = %req.key,
        algorithm = best.algorithm.name(),
        time = best.time,
        candidates = ranked.len(),
        "search finished"
    );
    ranked.truncate(req.request_count);
    Ok(ranked)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ranking_is_stable() {
        let mut db = PerfDb::new();
        db.push(AlgoPerf {
            algorithm: ConvFwdAlgorithm::Gemm,
            time: 2.0,
            memory: 0,
        });
        db.push(AlgoPerf {
            algorithm: ConvFwdAlgorithm::Winograd,
            time: 1.0,
            memory: 0,
        });
        db.push(AlgoPerf {
            algorithm: ConvFwdAlgorithm::Direct,
            time: 1.0,
            memory: 0,
        });
        let order: Vec<_> = db.into_ranked().iter().map(|p| p.algorithm).collect();
        assert_eq!(
            order,
            [
                ConvFwdAlgorithm::Winograd,
                ConvFwdAlgorithm::Direct,
                ConvFwdAlgorithm::Gemm
            ]
        );
    }

    #[test]
    fn test_size_cache_memoizes() {
        let cache = SearchCache::new();
        assert_eq!(cache.workspace_size("k@cpu", || 42), 42);
        assert_eq!(cache.workspace_size("k@cpu", || 7), 42);
        assert_eq!(cache.workspace_size("k@gfx900", || 7), 7);
    }
}
