//! Frequency-domain convolution kernels
//!
//! Real `T x T` tiles are transformed with a radix-2 Stockham FFT over rows,
//! then columns, and stored as half spectra: `T * (T/2 + 1)` complex values
//! per plane, interleaved re/im.
//!
//! # Algorithm: Stockham Radix-2 FFT
//!
//! ```text
//! For each stage s = 0..log2(N):
//!     half_m = 2^s
//!     m = 2^(s+1)
//!     For each group g = 0..(N/m):
//!         For each butterfly b = 0..half_m:
//!             twiddle = exp(sign * 2πi * b / m)
//!             even = src[g * half_m + b]
//!             odd = src[N/2 + g * half_m + b] * twiddle
//!             dst[g * m + b] = even + odd
//!             dst[g * m + b + half_m] = even - odd
//!     swap(src, dst)
//! ```

use super::{Launch, check_range, for_each_chunk};
use crate::error::{Error, Result};
use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

// ============================================================================
// Complex arithmetic and 1-D / 2-D transforms
// ============================================================================

#[derive(Copy, Clone, Debug, Default, PartialEq)]
struct Complex {
    re: f32,
    im: f32,
}

impl Complex {
    const fn new(re: f32, im: f32) -> Self {
        Self { re, im }
    }

    fn conj(self) -> Self {
        Self::new(self.re, -self.im)
    }

    fn scale(self, factor: f32) -> Self {
        Self::new(self.re * factor, self.im * factor)
    }
}

impl Add for Complex {
    type Output = Self;
    fn add(self, rhs: Self) -> Self {
        Self::new(self.re + rhs.re, self.im + rhs.im)
    }
}

impl Sub for Complex {
    type Output = Self;
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.re - rhs.re, self.im - rhs.im)
    }
}

impl Mul for Complex {
    type Output = Self;
    fn mul(self, rhs: Self) -> Self {
        Self::new(
            self.re * rhs.re - self.im * rhs.im,
            self.re * rhs.im + self.im * rhs.re,
        )
    }
}

/// In-place Stockham FFT; `data.len()` must be a power of two
fn stockham(data: &mut [Complex], inverse: bool) {
    let n = data.len();
    if n <= 1 {
        return;
    }
    let sign = if inverse { 1.0f64 } else { -1.0f64 };
    let mut src = data.to_vec();
    let mut dst = vec![Complex::default(); n];

    for stage in 0..n.trailing_zeros() {
        let half_m = 1usize << stage;
        let m = half_m << 1;
        for g in 0..n / m {
            for b in 0..half_m {
                let theta = sign * 2.0 * PI * (b as f64) / (m as f64);
                let twiddle = Complex::new(theta.cos() as f32, theta.sin() as f32);
                let even = src[g * half_m + b];
                let odd = src[n / 2 + g * half_m + b] * twiddle;
                dst[g * m + b] = even + odd;
                dst[g * m + b + half_m] = even - odd;
            }
        }
        std::mem::swap(&mut src, &mut dst);
    }
    data.copy_from_slice(&src);
}

/// 2-D transform of a row-major `t x t` tile (unnormalized)
fn fft_2d(tile: &mut [Complex], t: usize, inverse: bool) {
    for row in tile.chunks_mut(t) {
        stockham(row, inverse);
    }
    let mut column = vec![Complex::default(); t];
    for j in 0..t {
        for (i, slot) in column.iter_mut().enumerate() {
            *slot = tile[i * t + j];
        }
        stockham(&mut column, inverse);
        for (i, value) in column.iter().enumerate() {
            tile[i * t + j] = *value;
        }
    }
}

// ============================================================================
// Kernel geometry
// ============================================================================

struct FftGeometry {
    tile: usize,
    n: usize,
    c_in: usize,
    c_out: usize,
    h: usize,
    w: usize,
    filter_h: usize,
    filter_w: usize,
    pad_h: usize,
    pad_w: usize,
    filter_off: usize,
    out_off: usize,
    backward: bool,
}

impl FftGeometry {
    fn from_launch(launch: &Launch<'_>) -> Result<Self> {
        let tile = launch.define("FFT_TILE")?;
        if !tile.is_power_of_two() {
            return Err(Error::Backend(format!(
                "{}: tile {tile} is not a power of two",
                launch.entry()
            )));
        }
        Ok(Self {
            tile,
            n: launch.define("FFT_N")?,
            c_in: launch.define("FFT_C_IN")?,
            c_out: launch.define("FFT_C_OUT")?,
            h: launch.define("FFT_H")?,
            w: launch.define("FFT_W")?,
            filter_h: launch.define("FFT_FILTER_H")?,
            filter_w: launch.define("FFT_FILTER_W")?,
            pad_h: launch.define("FFT_PAD_H")?,
            pad_w: launch.define("FFT_PAD_W")?,
            filter_off: launch.define("FFT_FILTER_OFF")?,
            out_off: launch.define("FFT_OUT_OFF")?,
            backward: launch.flag("FFT_BACKWARD"),
        })
    }

    /// Complex values per stored half spectrum
    fn half(&self) -> usize {
        self.tile * (self.tile / 2 + 1)
    }

    /// Floats per stored plane
    fn plane(&self) -> usize {
        self.half() * 2
    }

    /// Store the half spectrum of `tile` into `dst` (interleaved)
    fn store_half(&self, tile: &[Complex], dst: &mut [f32]) {
        let t = self.tile;
        let cols = t / 2 + 1;
        for u in 0..t {
            for v in 0..cols {
                let value = tile[u * t + v];
                let at = (u * cols + v) * 2;
                dst[at] = value.re;
                dst[at + 1] = value.im;
            }
        }
    }

    fn load_half(&self, src: &[f32], at: usize) -> Complex {
        Complex::new(src[at * 2], src[at * 2 + 1])
    }

    /// Rebuild the full spectrum from a stored half through Hermitian symmetry
    fn expand(&self, src: &[f32]) -> Vec<Complex> {
        let t = self.tile;
        let cols = t / 2 + 1;
        let mut full = vec![Complex::default(); t * t];
        for u in 0..t {
            for v in 0..t {
                full[u * t + v] = if v < cols {
                    self.load_half(src, u * cols + v)
                } else {
                    self.load_half(src, ((t - u) % t) * cols + (t - v)).conj()
                };
            }
        }
        full
    }
}

fn real_tile(t: usize) -> Vec<Complex> {
    vec![Complex::default(); t * t]
}

// ============================================================================
// Kernels
// ============================================================================

/// Transform every data plane. Args: `(src, workspace)`
///
/// Each `h x w` plane lands at `(pad_h, pad_w)` inside its tile.
pub(super) fn forward_data(launch: &Launch<'_>) -> Result<()> {
    let g = FftGeometry::from_launch(launch)?;
    let (src, ws) = (launch.mem(0)?, launch.mem(1)?);
    let planes = g.n * g.c_in;
    let plane_sp = g.h * g.w;

    launch.with_output(ws, &[src], |inputs, out| {
        let src = inputs[0];
        check_range("fft_fwd_in", "src", 0, planes * plane_sp, src.len())?;
        check_range("fft_fwd_in", "spectra", 0, planes * g.plane(), out.len())?;
        if g.h + g.pad_h > g.tile || g.w + g.pad_w > g.tile {
            return Err(Error::Backend(format!(
                "fft_fwd_in: {}x{} plane does not fit tile {}",
                g.h, g.w, g.tile
            )));
        }
        for_each_chunk(&mut out[..planes * g.plane()], g.plane(), |p, dst| {
            let mut tile = real_tile(g.tile);
            let plane = &src[p * plane_sp..][..plane_sp];
            for i in 0..g.h {
                for j in 0..g.w {
                    tile[(i + g.pad_h) * g.tile + j + g.pad_w] = Complex::new(plane[i * g.w + j], 0.0);
                }
            }
            fft_2d(&mut tile, g.tile, false);
            g.store_half(&tile, dst);
        });
        Ok(())
    })
}

/// Transform every filter. Args: `(weights, workspace)`
///
/// Filter `(o, i)` maps input channel `i` to output channel `o`. Backward
/// reads the stored `C_IN x C_OUT` filter rotated by 180 degrees.
pub(super) fn forward_filter(launch: &Launch<'_>) -> Result<()> {
    let g = FftGeometry::from_launch(launch)?;
    let (wei, ws) = (launch.mem(0)?, launch.mem(1)?);
    let (fh, fw) = (g.filter_h, g.filter_w);
    let filters = g.c_out * g.c_in;

    launch.with_output(ws, &[wei], |inputs, out| {
        let w = inputs[0];
        check_range("fft_fwd_we", "weights", 0, filters * fh * fw, w.len())?;
        check_range("fft_fwd_we", "spectra", g.filter_off, filters * g.plane(), out.len())?;
        let region = &mut out[g.filter_off..g.filter_off + filters * g.plane()];
        for_each_chunk(region, g.plane(), |f, dst| {
            let (o, i) = (f / g.c_in, f % g.c_in);
            let mut tile = real_tile(g.tile);
            for r in 0..fh {
                for s in 0..fw {
                    let value = if g.backward {
                        w[((i * g.c_out + o) * fh + (fh - 1 - r)) * fw + (fw - 1 - s)]
                    } else {
                        w[((o * g.c_in + i) * fh + r) * fw + s]
                    };
                    tile[r * g.tile + s] = Complex::new(value, 0.0);
                }
            }
            fft_2d(&mut tile, g.tile, false);
            g.store_half(&tile, dst);
        });
        Ok(())
    })
}

/// Per-frequency channel reduction. Args: `(workspace)`
///
/// `Out[n, o] = sum_i X[n, i] * conj(F[o, i])`, a correlation in space.
pub(super) fn multiply(launch: &Launch<'_>) -> Result<()> {
    let g = FftGeometry::from_launch(launch)?;
    let ws = launch.mem(0)?;
    let half = g.half();
    let plane = g.plane();
    let outputs = g.n * g.c_out;

    launch.with_output(ws, &[ws], |inputs, out| {
        let spectra = inputs[0];
        check_range("fft_cgemm", "data", 0, g.n * g.c_in * plane, spectra.len())?;
        check_range("fft_cgemm", "filters", g.filter_off, g.c_out * g.c_in * plane, spectra.len())?;
        check_range("fft_cgemm", "output", g.out_off, outputs * plane, out.len())?;
        let region = &mut out[g.out_off..g.out_off + outputs * plane];
        for_each_chunk(region, plane, |idx, dst| {
            let (n, o) = (idx / g.c_out, idx % g.c_out);
            for at in 0..half {
                let mut acc = Complex::default();
                for i in 0..g.c_in {
                    let x = g.load_half(&spectra[(n * g.c_in + i) * plane..], at);
                    let f = g.load_half(&spectra[g.filter_off + (o * g.c_in + i) * plane..], at);
                    acc = acc + x * f.conj();
                }
                dst[at * 2] = acc.re;
                dst[at * 2 + 1] = acc.im;
            }
        });
        Ok(())
    })
}

/// Inverse transform and crop to `h x w`. Args: `(workspace, dst)`
pub(super) fn inverse(launch: &Launch<'_>) -> Result<()> {
    let g = FftGeometry::from_launch(launch)?;
    let (ws, dst) = (launch.mem(0)?, launch.mem(1)?);
    let plane = g.plane();
    let outputs = g.n * g.c_out;
    let plane_sp = g.h * g.w;
    let norm = 1.0 / (g.tile * g.tile) as f32;

    launch.with_output(dst, &[ws], |inputs, out| {
        let spectra = inputs[0];
        check_range("fft_inv_out", "output spectra", g.out_off, outputs * plane, spectra.len())?;
        check_range("fft_inv_out", "dst", 0, outputs * plane_sp, out.len())?;
        for_each_chunk(&mut out[..outputs * plane_sp], plane_sp, |idx, y_plane| {
            let mut tile = g.expand(&spectra[g.out_off + idx * plane..][..plane]);
            fft_2d(&mut tile, g.tile, true);
            for i in 0..g.h {
                for j in 0..g.w {
                    y_plane[i * g.w + j] = tile[i * g.tile + j].scale(norm).re;
                }
            }
        });
        Ok(())
    })
}
