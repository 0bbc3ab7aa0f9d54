//! Host interpretations of the device kernels
//!
//! Each entry point reads its geometry from the compile-time defines of the
//! spec it was built from and its operands from the positional arguments,
//! following the same calling conventions a device binary would.

mod bias;
mod direct;
mod fft;
mod gemm;
mod window;
mod winograd;

use super::memory::HostMemory;
use crate::error::{Error, Result};
use crate::runtime::{Buffer, KernelArg, KernelSpec};

type KernelFn = fn(&Launch<'_>) -> Result<()>;

/// Entry points the host context can run
const ENTRIES: &[(&str, KernelFn)] = &[
    ("gemm", gemm::gemm),
    ("im2col", window::im2col),
    ("col2im", window::col2im),
    ("transpose_nchw2cnhw", window::transpose_nchw_to_cnhw),
    ("transpose_cnhw2nchw", window::transpose_cnhw_to_nchw),
    ("set_tensor", window::set_tensor),
    ("subsample", window::subsample),
    ("conv_direct", direct::conv_direct),
    ("conv1x1u", direct::conv1x1u),
    ("conv1x1wrw", direct::conv_wrw_asm),
    ("conv3x3wrw", direct::conv_wrw_asm),
    ("conv_bwd_weights", direct::conv_bwd_weights),
    ("conv_bwd_weights_reduce", direct::conv_bwd_weights_reduce),
    ("ConvBinWinograd3x3U", winograd::winograd),
    ("ConvBinWinogradRxS", winograd::winograd),
    ("fft_fwd_in", fft::forward_data),
    ("fft_fwd_we", fft::forward_filter),
    ("fft_cgemm", fft::multiply),
    ("fft_inv_out", fft::inverse),
    ("conv_bwd_bias", bias::conv_bwd_bias),
];

fn lookup(entry: &str) -> Option<KernelFn> {
    ENTRIES
        .iter()
        .find(|(name, _)| *name == entry)
        .map(|&(_, f)| f)
}

/// Host "compilation": the entry must exist and the element type must be f32
pub(crate) fn compile(spec: &KernelSpec) -> Result<()> {
    if lookup(&spec.entry).is_none() {
        return Err(Error::Backend(format!(
            "no host implementation of kernel '{}' in {}",
            spec.entry, spec.program
        )));
    }
    if spec.options.get("CONV_FP32") != Some(1) {
        return Err(Error::Backend(format!(
            "host kernel '{}' only supports f32 ({})",
            spec.entry, spec.options
        )));
    }
    Ok(())
}

/// Run a compiled kernel
pub(crate) fn run(memory: &HostMemory, spec: &KernelSpec, args: &[KernelArg]) -> Result<()> {
    let f = lookup(&spec.entry).ok_or_else(|| {
        Error::Backend(format!("no host implementation of kernel '{}'", spec.entry))
    })?;
    f(&Launch { memory, spec, args })
}

/// One kernel launch: defines, arguments and memory
pub(crate) struct Launch<'a> {
    memory: &'a HostMemory,
    spec: &'a KernelSpec,
    args: &'a [KernelArg],
}

impl Launch<'_> {
    fn entry(&self) -> &str {
        &self.spec.entry
    }

    /// Required non-negative define
    fn define(&self, name: &str) -> Result<usize> {
        match self.spec.options.get(name) {
            Some(v) if v >= 0 => Ok(v as usize),
            Some(v) => Err(Error::Backend(format!(
                "{}: define {name}={v} is negative",
                self.entry()
            ))),
            None => Err(Error::Backend(format!(
                "{}: missing define {name}",
                self.entry()
            ))),
        }
    }

    /// Optional boolean define
    fn flag(&self, name: &str) -> bool {
        self.spec.options.get(name).is_some_and(|v| v != 0)
    }

    fn arg(&self, index: usize) -> Result<&KernelArg> {
        self.args.get(index).ok_or_else(|| {
            Error::Backend(format!(
                "{}: expected argument {index}, got {}",
                self.entry(),
                self.args.len()
            ))
        })
    }

    fn mem(&self, index: usize) -> Result<Buffer> {
        match self.arg(index)? {
            KernelArg::Mem(b) if !b.is_null() => Ok(*b),
            other => Err(Error::Backend(format!(
                "{}: argument {index} should be a buffer, got {other:?}",
                self.entry()
            ))),
        }
    }

    fn int(&self, index: usize) -> Result<usize> {
        match self.arg(index)? {
            KernelArg::Int(v) if *v >= 0 => Ok(*v as usize),
            other => Err(Error::Backend(format!(
                "{}: argument {index} should be a non-negative int, got {other:?}",
                self.entry()
            ))),
        }
    }

    fn float(&self, index: usize) -> Result<f32> {
        match self.arg(index)? {
            KernelArg::Float(v) => Ok(*v),
            other => Err(Error::Backend(format!(
                "{}: argument {index} should be a float, got {other:?}",
                self.entry()
            ))),
        }
    }

    fn with_output<R>(
        &self,
        output: Buffer,
        inputs: &[Buffer],
        f: impl FnOnce(&[&[f32]], &mut [f32]) -> Result<R>,
    ) -> Result<R> {
        self.memory.with_output(output, inputs, f)
    }
}

/// Fail unless `[offset, offset + extent)` lies inside a buffer of `len` elements
fn check_range(entry: &str, what: &str, offset: usize, extent: usize, len: usize) -> Result<()> {
    if offset + extent > len {
        return Err(Error::Backend(format!(
            "{entry}: {what} range {offset}..{} exceeds {len} elements",
            offset + extent
        )));
    }
    Ok(())
}

/// Zero-padded read from one `h x w` plane
#[inline]
fn sample(plane: &[f32], h: usize, w: usize, row: isize, col: isize, pad_value: f32) -> f32 {
    if row < 0 || col < 0 || row as usize >= h || col as usize >= w {
        pad_value
    } else {
        plane[row as usize * w + col as usize]
    }
}

/// Run `f(index, chunk)` over consecutive `len`-element chunks of `out`
fn for_each_chunk<F>(out: &mut [f32], len: usize, f: F)
where
    F: Fn(usize, &mut [f32]) + Send + Sync,
{
    if len == 0 {
        return;
    }
    #[cfg(feature = "rayon")]
    {
        use rayon::prelude::*;
        out.par_chunks_mut(len)
            .enumerate()
            .for_each(|(i, chunk)| f(i, chunk));
    }
    #[cfg(not(feature = "rayon"))]
    out.chunks_mut(len)
        .enumerate()
        .for_each(|(i, chunk)| f(i, chunk));
}

/// Precompiled-kernel flag bits
const F_REVERSE_R: i64 = 1;
const F_REVERSE_S: i64 = 2;
const F_FLIP_K_C: i64 = 4;

/// Leading integer arguments of the precompiled kernels
struct AsmShape {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    k: usize,
    flags: i64,
}

impl AsmShape {
    fn from_launch(launch: &Launch<'_>) -> Result<Self> {
        let flags = match launch.arg(6)? {
            KernelArg::Int(v) => *v,
            other => {
                return Err(Error::Backend(format!(
                    "{}: argument 6 should be flags, got {other:?}",
                    launch.entry()
                )));
            }
        };
        Ok(Self {
            n: launch.int(0)?,
            c: launch.int(1)?,
            h: launch.int(2)?,
            w: launch.int(3)?,
            k: launch.int(4)?,
            flags,
        })
    }
}
