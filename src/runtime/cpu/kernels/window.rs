//! Windowing, layout and fill helpers

use super::{Launch, check_range, sample};
use crate::error::Result;

struct Window {
    c: usize,
    h: usize,
    w: usize,
    kh: usize,
    kw: usize,
    out_h: usize,
    out_w: usize,
    pad_h: usize,
    pad_w: usize,
    stride_h: usize,
    stride_w: usize,
    dilation_h: usize,
    dilation_w: usize,
}

impl Window {
    fn from_launch(launch: &Launch<'_>) -> Result<Self> {
        Ok(Self {
            c: launch.define("WIN_C")?,
            h: launch.define("WIN_H")?,
            w: launch.define("WIN_W")?,
            kh: launch.define("WIN_KH")?,
            kw: launch.define("WIN_KW")?,
            out_h: launch.define("WIN_OUT_H")?,
            out_w: launch.define("WIN_OUT_W")?,
            pad_h: launch.define("WIN_PAD_H")?,
            pad_w: launch.define("WIN_PAD_W")?,
            stride_h: launch.define("WIN_STRIDE_H")?.max(1),
            stride_w: launch.define("WIN_STRIDE_W")?.max(1),
            dilation_h: launch.define("WIN_DILATION_H")?.max(1),
            dilation_w: launch.define("WIN_DILATION_W")?.max(1),
        })
    }

    fn image_len(&self) -> usize {
        self.c * self.h * self.w
    }

    fn col_len(&self) -> usize {
        self.c * self.kh * self.kw * self.out_h * self.out_w
    }

    /// Output coordinate that reads image coordinate `pos` through filter tap `tap`
    #[inline]
    fn source(pos: usize, pad: usize, tap: usize, dilation: usize, stride: usize, out: usize) -> Option<usize> {
        let shifted = (pos + pad).checked_sub(tap * dilation)?;
        (shifted % stride == 0 && shifted / stride < out).then_some(shifted / stride)
    }
}

/// Args: `(img, img_off, col)`
pub(super) fn im2col(launch: &Launch<'_>) -> Result<()> {
    let g = Window::from_launch(launch)?;
    let (img, img_off, col) = (launch.mem(0)?, launch.int(1)?, launch.mem(2)?);
    let out_sp = g.out_h * g.out_w;

    launch.with_output(col, &[img], |inputs, out| {
        let img = inputs[0];
        check_range("im2col", "image", img_off, g.image_len(), img.len())?;
        check_range("im2col", "columns", 0, g.col_len(), out.len())?;
        for c in 0..g.c {
            let plane = &img[img_off + c * g.h * g.w..][..g.h * g.w];
            for r in 0..g.kh {
                for s in 0..g.kw {
                    let row = ((c * g.kh + r) * g.kw + s) * out_sp;
                    for oh in 0..g.out_h {
                        let ih = (oh * g.stride_h + r * g.dilation_h) as isize - g.pad_h as isize;
                        for ow in 0..g.out_w {
                            let iw =
                                (ow * g.stride_w + s * g.dilation_w) as isize - g.pad_w as isize;
                            out[row + oh * g.out_w + ow] = sample(plane, g.h, g.w, ih, iw, 0.0);
                        }
                    }
                }
            }
        }
        Ok(())
    })
}

/// Args: `(col, img, img_off)`
pub(super) fn col2im(launch: &Launch<'_>) -> Result<()> {
    let g = Window::from_launch(launch)?;
    let (col, img, img_off) = (launch.mem(0)?, launch.mem(1)?, launch.int(2)?);
    let out_sp = g.out_h * g.out_w;

    launch.with_output(img, &[col], |inputs, out| {
        let col = inputs[0];
        check_range("col2im", "columns", 0, g.col_len(), col.len())?;
        check_range("col2im", "image", img_off, g.image_len(), out.len())?;
        for c in 0..g.c {
            for ih in 0..g.h {
                for iw in 0..g.w {
                    let mut acc = 0.0f32;
                    for r in 0..g.kh {
                        let Some(oh) =
                            Window::source(ih, g.pad_h, r, g.dilation_h, g.stride_h, g.out_h)
                        else {
                            continue;
                        };
                        for s in 0..g.kw {
                            if let Some(ow) =
                                Window::source(iw, g.pad_w, s, g.dilation_w, g.stride_w, g.out_w)
                            {
                                acc += col[((c * g.kh + r) * g.kw + s) * out_sp + oh * g.out_w + ow];
                            }
                        }
                    }
                    out[img_off + (c * g.h + ih) * g.w + iw] = acc;
                }
            }
        }
        Ok(())
    })
}

struct Transpose {
    n: usize,
    c: usize,
    nchw_h: usize,
    nchw_w: usize,
    cnhw_h: usize,
    cnhw_w: usize,
    stride_h: usize,
    stride_w: usize,
}

impl Transpose {
    fn from_launch(launch: &Launch<'_>) -> Result<Self> {
        Ok(Self {
            n: launch.define("TR_N")?,
            c: launch.define("TR_C")?,
            nchw_h: launch.define("TR_NCHW_H")?,
            nchw_w: launch.define("TR_NCHW_W")?,
            cnhw_h: launch.define("TR_CNHW_H")?,
            cnhw_w: launch.define("TR_CNHW_W")?,
            stride_h: launch.define("TR_STRIDE_H")?.max(1),
            stride_w: launch.define("TR_STRIDE_W")?.max(1),
        })
    }

    fn nchw_len(&self) -> usize {
        self.n * self.c * self.nchw_h * self.nchw_w
    }

    fn cnhw_len(&self) -> usize {
        self.n * self.c * self.cnhw_h * self.cnhw_w
    }

    /// `(nchw index, cnhw index)` for every element of the CNHW side
    fn pairs(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        (0..self.n).flat_map(move |n| {
            (0..self.c).flat_map(move |c| {
                (0..self.cnhw_h).flat_map(move |i| {
                    (0..self.cnhw_w).map(move |j| {
                        let nchw = ((n * self.c + c) * self.nchw_h + i * self.stride_h)
                            * self.nchw_w
                            + j * self.stride_w;
                        let cnhw = ((c * self.n + n) * self.cnhw_h + i) * self.cnhw_w + j;
                        (nchw, cnhw)
                    })
                })
            })
        })
    }
}

/// Args: `(src, src_off, dst, dst_off)`
pub(super) fn transpose_nchw_to_cnhw(launch: &Launch<'_>) -> Result<()> {
    let g = Transpose::from_launch(launch)?;
    let (src, src_off) = (launch.mem(0)?, launch.int(1)?);
    let (dst, dst_off) = (launch.mem(2)?, launch.int(3)?);

    launch.with_output(dst, &[src], |inputs, out| {
        let src = inputs[0];
        check_range("transpose_nchw2cnhw", "src", src_off, g.nchw_len(), src.len())?;
        check_range("transpose_nchw2cnhw", "dst", dst_off, g.cnhw_len(), out.len())?;
        for (nchw, cnhw) in g.pairs() {
            out[dst_off + cnhw] = src[src_off + nchw];
        }
        Ok(())
    })
}

/// Args: `(src, src_off, dst, dst_off)`
pub(super) fn transpose_cnhw_to_nchw(launch: &Launch<'_>) -> Result<()> {
    let g = Transpose::from_launch(launch)?;
    let (src, src_off) = (launch.mem(0)?, launch.int(1)?);
    let (dst, dst_off) = (launch.mem(2)?, launch.int(3)?);

    launch.with_output(dst, &[src], |inputs, out| {
        let src = inputs[0];
        check_range("transpose_cnhw2nchw", "src", src_off, g.cnhw_len(), src.len())?;
        check_range("transpose_cnhw2nchw", "dst", dst_off, g.nchw_len(), out.len())?;
        for (nchw, cnhw) in g.pairs() {
            out[dst_off + nchw] = src[src_off + cnhw];
        }
        Ok(())
    })
}

/// Args: `(buffer, offset, value)`
pub(super) fn set_tensor(launch: &Launch<'_>) -> Result<()> {
    let count = launch.define("SET_COUNT")?;
    let (buffer, offset, value) = (launch.mem(0)?, launch.int(1)?, launch.float(2)?);
    launch.with_output(buffer, &[], |_, out| {
        check_range("set_tensor", "tensor", offset, count, out.len())?;
        out[offset..offset + count].fill(value);
        Ok(())
    })
}

/// Args: `(src, dst)`
pub(super) fn subsample(launch: &Launch<'_>) -> Result<()> {
    let (n, c) = (launch.define("SS_N")?, launch.define("SS_C")?);
    let (h, w) = (launch.define("SS_H")?, launch.define("SS_W")?);
    let (out_h, out_w) = (launch.define("SS_OUT_H")?, launch.define("SS_OUT_W")?);
    let stride_h = launch.define("SS_STRIDE_H")?.max(1);
    let stride_w = launch.define("SS_STRIDE_W")?.max(1);
    let (src, dst) = (launch.mem(0)?, launch.mem(1)?);

    launch.with_output(dst, &[src], |inputs, out| {
        let src = inputs[0];
        check_range("subsample", "src", 0, n * c * h * w, src.len())?;
        check_range("subsample", "dst", 0, n * c * out_h * out_w, out.len())?;
        for plane in 0..n * c {
            for i in 0..out_h {
                for j in 0..out_w {
                    out[(plane * out_h + i) * out_w + j] =
                        src[(plane * h + i * stride_h) * w + j * stride_w];
                }
            }
        }
        Ok(())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_respects_stride_and_padding() {
        // pos 2, pad 1, tap 1, dilation 1, stride 2 -> (2 + 1 - 1) / 2 = 1
        assert_eq!(Window::source(2, 1, 1, 1, 2, 4), Some(1));
        assert_eq!(Window::source(1, 1, 1, 1, 2, 4), None);
        assert_eq!(Window::source(0, 0, 1, 1, 1, 4), None);
        assert_eq!(Window::source(7, 0, 0, 1, 1, 4), None);
    }
}
