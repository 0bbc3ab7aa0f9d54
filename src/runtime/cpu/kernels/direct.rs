//! Direct convolution kernels
//!
//! Geometry defines use forward naming throughout: `N_INPUTS` is the channel
//! count of x, `N_OUTPUTS` the channel count of y, whatever the direction.

use super::{AsmShape, F_FLIP_K_C, Launch, check_range, for_each_chunk, sample};
use crate::error::Result;
use std::ops::Range;

/// Forward-named geometry of the generic direct kernels
#[derive(Copy, Clone)]
struct Geometry {
    n: usize,
    c: usize,
    h: usize,
    w: usize,
    k: usize,
    out_h: usize,
    out_w: usize,
    fh: usize,
    fw: usize,
    pad_h: usize,
    pad_w: usize,
    stride_h: usize,
    stride_w: usize,
}

impl Geometry {
    fn from_launch(launch: &Launch<'_>) -> Result<Self> {
        Ok(Self {
            n: launch.define("MLO_BATCH_SZ")?,
            c: launch.define("MLO_N_INPUTS")?,
            h: launch.define("MLO_IN_HEIGHT")?,
            w: launch.define("MLO_IN_WIDTH")?,
            k: launch.define("MLO_N_OUTPUTS")?,
            out_h: launch.define("MLO_OUT_HEIGHT")?,
            out_w: launch.define("MLO_OUT_WIDTH")?,
            fh: launch.define("MLO_FILTER_SIZE1")?,
            fw: launch.define("MLO_FILTER_SIZE0")?,
            pad_h: launch.define("MLO_FILTER_PAD1")?,
            pad_w: launch.define("MLO_FILTER_PAD0")?,
            stride_h: launch.define("MLO_FILTER_STRIDE1")?.max(1),
            stride_w: launch.define("MLO_FILTER_STRIDE0")?.max(1),
        })
    }

    fn x_len(&self) -> usize {
        self.n * self.c * self.h * self.w
    }

    fn y_len(&self) -> usize {
        self.n * self.k * self.out_h * self.out_w
    }

    fn w_len(&self) -> usize {
        self.k * self.c * self.fh * self.fw
    }

    #[inline]
    fn w_index(&self, k: usize, c: usize, r: usize, s: usize) -> usize {
        ((k * self.c + c) * self.fh + r) * self.fw + s
    }

    /// Correlation of dy with x over `samples` for one flattened filter index
    fn weight_grad(&self, dy: &[f32], x: &[f32], samples: Range<usize>, idx: usize) -> f32 {
        let s = idx % self.fw;
        let r = (idx / self.fw) % self.fh;
        let c = (idx / (self.fw * self.fh)) % self.c;
        let k = idx / (self.fw * self.fh * self.c);
        let mut acc = 0.0f32;
        for n in samples {
            let out_sp = self.out_h * self.out_w;
            let dy_plane = &dy[(n * self.k + k) * out_sp..][..out_sp];
            let x_plane = &x[(n * self.c + c) * self.h * self.w..][..self.h * self.w];
            for oh in 0..self.out_h {
                let ih = (oh * self.stride_h + r) as isize - self.pad_h as isize;
                for ow in 0..self.out_w {
                    let iw = (ow * self.stride_w + s) as isize - self.pad_w as isize;
                    acc += dy_plane[oh * self.out_w + ow]
                        * sample(x_plane, self.h, self.w, ih, iw, 0.0);
                }
            }
        }
        acc
    }
}

/// Args: `(src, weights, dst, pad_value)`
///
/// Forward writes output rows `[MLO_ROW_BEGIN, MLO_ROW_END)` of every plane.
/// Backward (`MLO_DIR_FORWARD=0`) reads dy and writes all of dx.
pub(super) fn conv_direct(launch: &Launch<'_>) -> Result<()> {
    let g = Geometry::from_launch(launch)?;
    let forward = launch.flag("MLO_DIR_FORWARD");
    let (src, wei, dst) = (launch.mem(0)?, launch.mem(1)?, launch.mem(2)?);
    let pad_value = launch.float(3)?;

    if forward {
        let row_begin = launch.define("MLO_ROW_BEGIN")?;
        let row_end = launch.define("MLO_ROW_END")?.min(g.out_h);
        launch.with_output(dst, &[src, wei], |inputs, out| {
            let (x, w) = (inputs[0], inputs[1]);
            check_range("conv_direct", "x", 0, g.x_len(), x.len())?;
            check_range("conv_direct", "w", 0, g.w_len(), w.len())?;
            check_range("conv_direct", "y", 0, g.y_len(), out.len())?;
            let plane = g.out_h * g.out_w;
            for_each_chunk(&mut out[..g.y_len()], plane, |idx, y_plane| {
                let (n, k) = (idx / g.k, idx % g.k);
                for oh in row_begin..row_end {
                    for ow in 0..g.out_w {
                        let mut acc = 0.0f32;
                        for c in 0..g.c {
                            let x_plane = &x[(n * g.c + c) * g.h * g.w..][..g.h * g.w];
                            for r in 0..g.fh {
                                let ih = (oh * g.stride_h + r) as isize - g.pad_h as isize;
                                for s in 0..g.fw {
                                    let iw = (ow * g.stride_w + s) as isize - g.pad_w as isize;
                                    acc += sample(x_plane, g.h, g.w, ih, iw, pad_value)
                                        * w[g.w_index(k, c, r, s)];
                                }
                            }
                        }
                        y_plane[oh * g.out_w + ow] = acc;
                    }
                }
            });
            Ok(())
        })
    } else {
        launch.with_output(dst, &[src, wei], |inputs, out| {
            let (dy, w) = (inputs[0], inputs[1]);
            check_range("conv_direct", "dy", 0, g.y_len(), dy.len())?;
            check_range("conv_direct", "w", 0, g.w_len(), w.len())?;
            check_range("conv_direct", "dx", 0, g.x_len(), out.len())?;
            let plane = g.h * g.w;
            for_each_chunk(&mut out[..g.x_len()], plane, |idx, dx_plane| {
                let (n, c) = (idx / g.c, idx % g.c);
                for ih in 0..g.h {
                    for iw in 0..g.w {
                        let mut acc = 0.0f32;
                        for r in 0..g.fh {
                            let Some(oh) = tap_source(ih, g.pad_h, r, g.stride_h, g.out_h) else {
                                continue;
                            };
                            for s in 0..g.fw {
                                let Some(ow) = tap_source(iw, g.pad_w, s, g.stride_w, g.out_w)
                                else {
                                    continue;
                                };
                                for k in 0..g.k {
                                    acc += dy[((n * g.k + k) * g.out_h + oh) * g.out_w + ow]
                                        * w[g.w_index(k, c, r, s)];
                                }
                            }
                        }
                        dx_plane[ih * g.w + iw] = acc;
                    }
                }
            });
            Ok(())
        })
    }
}

/// Output coordinate reading input `pos` through tap `tap`, if any
#[inline]
fn tap_source(pos: usize, pad: usize, tap: usize, stride: usize, out: usize) -> Option<usize> {
    let shifted = (pos + pad).checked_sub(tap)?;
    (shifted % stride == 0 && shifted / stride < out).then_some(shifted / stride)
}

/// Pointwise convolution. Args: 8 ints, then `(src, weights, dst, null)`
///
/// With the K/C flip flag the filter is read as `C x K` instead of `K x C`.
pub(super) fn conv1x1u(launch: &Launch<'_>) -> Result<()> {
    let s = AsmShape::from_launch(launch)?;
    let flip = s.flags & F_FLIP_K_C != 0;
    let (src, wei, dst) = (launch.mem(8)?, launch.mem(9)?, launch.mem(10)?);
    let plane = s.h * s.w;

    launch.with_output(dst, &[src, wei], |inputs, out| {
        let (x, w) = (inputs[0], inputs[1]);
        check_range("conv1x1u", "src", 0, s.n * s.c * plane, x.len())?;
        check_range("conv1x1u", "weights", 0, s.k * s.c, w.len())?;
        check_range("conv1x1u", "dst", 0, s.n * s.k * plane, out.len())?;
        for_each_chunk(&mut out[..s.n * s.k * plane], plane, |idx, y_plane| {
            let (n, k) = (idx / s.k, idx % s.k);
            y_plane.fill(0.0);
            for c in 0..s.c {
                let weight = if flip { w[c * s.k + k] } else { w[k * s.c + c] };
                let x_plane = &x[(n * s.c + c) * plane..][..plane];
                for (y, xv) in y_plane.iter_mut().zip(x_plane) {
                    *y += weight * xv;
                }
            }
        });
        Ok(())
    })
}

/// Unit-stride weight gradient. Args: 8 ints, then `(x, dw, dy, null)`
///
/// `conv1x1wrw` has no padding; `conv3x3wrw` pads by one on each side.
pub(super) fn conv_wrw_asm(launch: &Launch<'_>) -> Result<()> {
    let s = AsmShape::from_launch(launch)?;
    let (fsize, pad) = if launch.entry() == "conv3x3wrw" { (3, 1) } else { (1, 0) };
    let (x, dw, dy) = (launch.mem(8)?, launch.mem(9)?, launch.mem(10)?);
    let g = Geometry {
        n: s.n,
        c: s.c,
        h: s.h,
        w: s.w,
        k: s.k,
        out_h: s.h + 2 * pad + 1 - fsize,
        out_w: s.w + 2 * pad + 1 - fsize,
        fh: fsize,
        fw: fsize,
        pad_h: pad,
        pad_w: pad,
        stride_h: 1,
        stride_w: 1,
    };

    launch.with_output(dw, &[dy, x], |inputs, out| {
        let (dy, x) = (inputs[0], inputs[1]);
        check_range(launch.entry(), "x", 0, g.x_len(), x.len())?;
        check_range(launch.entry(), "dy", 0, g.y_len(), dy.len())?;
        check_range(launch.entry(), "dw", 0, g.w_len(), out.len())?;
        for_each_chunk(&mut out[..g.w_len()], 1, |idx, slot| {
            slot[0] = g.weight_grad(dy, x, 0..g.n, idx);
        });
        Ok(())
    })
}

/// Generic weight gradient. Args: `(dy, x, out, pad_value)`
///
/// With one batch tile the gradient is written directly; otherwise tile `t`
/// writes its partial sum to `out[t * |dw| ..]`.
pub(super) fn conv_bwd_weights(launch: &Launch<'_>) -> Result<()> {
    let g = Geometry::from_launch(launch)?;
    let batch_tile = launch.define("MLO_BATCH_TILE")?.max(1);
    let tiles = launch.define("MLO_N_BATCH_TILES")?.max(1);
    let (dy, x, dst) = (launch.mem(0)?, launch.mem(1)?, launch.mem(2)?);
    let wei = g.w_len();

    launch.with_output(dst, &[dy, x], |inputs, out| {
        let (dy, x) = (inputs[0], inputs[1]);
        check_range("conv_bwd_weights", "dy", 0, g.y_len(), dy.len())?;
        check_range("conv_bwd_weights", "x", 0, g.x_len(), x.len())?;
        check_range("conv_bwd_weights", "out", 0, tiles * wei, out.len())?;
        for_each_chunk(&mut out[..tiles * wei], 1, |slot_idx, slot| {
            let (t, idx) = (slot_idx / wei, slot_idx % wei);
            let samples = if tiles == 1 {
                0..g.n
            } else {
                (t * batch_tile).min(g.n)..((t + 1) * batch_tile).min(g.n)
            };
            slot[0] = g.weight_grad(dy, x, samples, idx);
        });
        Ok(())
    })
}

/// Sum the per-tile partials. Args: `(partials, dw)`
pub(super) fn conv_bwd_weights_reduce(launch: &Launch<'_>) -> Result<()> {
    let wei = launch.define("MLO_WEI_SZ")?;
    let tiles = launch.define("MLO_N_BATCH_TILES")?.max(1);
    let (partials, dw) = (launch.mem(0)?, launch.mem(1)?);

    launch.with_output(dw, &[partials], |inputs, out| {
        let partials = inputs[0];
        check_range("conv_bwd_weights_reduce", "partials", 0, tiles * wei, partials.len())?;
        check_range("conv_bwd_weights_reduce", "dw", 0, wei, out.len())?;
        for (i, slot) in out[..wei].iter_mut().enumerate() {
            *slot = (0..tiles).map(|t| partials[t * wei + i]).sum();
        }
        Ok(())
    })
}
