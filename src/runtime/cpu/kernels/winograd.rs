//! Stride-1 3x3 / RxS convolution behind the precompiled Winograd entry points
//!
//! The host computes the same result directly. Args: `N, C, H, W, K, groups,
//! flags, 0, src, weights, dst, null`, and for `ConvBinWinogradRxS` also
//! `R, S, pad_h, pad_w, out_h, out_w`. Padding is given in forward terms;
//! with the reverse flags set the effective padding is `R - 1 - pad`.

use super::{
    AsmShape, F_FLIP_K_C, F_REVERSE_R, F_REVERSE_S, Launch, check_range, for_each_chunk, sample,
};
use crate::error::Result;

pub(super) fn winograd(launch: &Launch<'_>) -> Result<()> {
    let s = AsmShape::from_launch(launch)?;
    let (src, wei, dst) = (launch.mem(8)?, launch.mem(9)?, launch.mem(10)?);
    let reverse_r = s.flags & F_REVERSE_R != 0;
    let reverse_s = s.flags & F_REVERSE_S != 0;
    let flip = s.flags & F_FLIP_K_C != 0;

    let (fh, fw, pad_h, pad_w) = if launch.entry() == "ConvBinWinogradRxS" {
        (launch.int(12)?, launch.int(13)?, launch.int(14)?, launch.int(15)?)
    } else {
        (3, 3, 1, 1)
    };
    let pad_h = if reverse_r { (fh - 1).saturating_sub(pad_h) } else { pad_h };
    let pad_w = if reverse_s { (fw - 1).saturating_sub(pad_w) } else { pad_w };
    let (out_h, out_w) = if launch.entry() == "ConvBinWinogradRxS" {
        (launch.int(16)?, launch.int(17)?)
    } else {
        ((s.h + 2 * pad_h + 1).saturating_sub(fh), (s.w + 2 * pad_w + 1).saturating_sub(fw))
    };

    let w_index = |k: usize, c: usize, r: usize, q: usize| {
        let r = if reverse_r { fh - 1 - r } else { r };
        let q = if reverse_s { fw - 1 - q } else { q };
        let plane = if flip { c * s.k + k } else { k * s.c + c };
        (plane * fh + r) * fw + q
    };

    let in_plane = s.h * s.w;
    let out_plane = out_h * out_w;
    launch.with_output(dst, &[src, wei], |inputs, out| {
        let (x, w) = (inputs[0], inputs[1]);
        check_range(launch.entry(), "src", 0, s.n * s.c * in_plane, x.len())?;
        check_range(launch.entry(), "weights", 0, s.k * s.c * fh * fw, w.len())?;
        check_range(launch.entry(), "dst", 0, s.n * s.k * out_plane, out.len())?;
        for_each_chunk(&mut out[..s.n * s.k * out_plane], out_plane, |idx, y_plane| {
            let (n, k) = (idx / s.k, idx % s.k);
            for i in 0..out_h {
                for j in 0..out_w {
                    let mut acc = 0.0f32;
                    for c in 0..s.c {
                        let x_plane = &x[(n * s.c + c) * in_plane..][..in_plane];
                        for r in 0..fh {
                            let ih = (i + r) as isize - pad_h as isize;
                            for q in 0..fw {
                                let iw = (j + q) as isize - pad_w as isize;
                                acc += sample(x_plane, s.h, s.w, ih, iw, 0.0) * w[w_index(k, c, r, q)];
                            }
                        }
                    }
                    y_plane[i * out_w + j] = acc;
                }
            }
        });
        Ok(())
    })
}
