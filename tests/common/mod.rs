//! Common test utilities
#![allow(dead_code)]

use convtune::conv::TensorArg;
use convtune::dtype::DType;
use convtune::runtime::cpu::{CpuContext, CpuDevice};
use convtune::runtime::{Buffer, ExecutionContext, Workspace};
use convtune::tensor::TensorDesc;

/// Host context posing as the plain CPU
pub fn create_context() -> CpuContext {
    CpuContext::new()
}

/// Host context posing as a named accelerator
pub fn create_context_on(name: &str, compute_units: usize) -> CpuContext {
    CpuContext::with_device(CpuDevice::emulating(name, compute_units))
}

/// A descriptor and the buffer holding its data
pub struct HostTensor {
    pub desc: TensorDesc,
    pub buffer: Buffer,
}

impl HostTensor {
    /// Packed f32 NCHW tensor filled with `data`
    pub fn from_data(ctx: &CpuContext, dims: [usize; 4], data: &[f32]) -> Self {
        let desc = TensorDesc::new(DType::F32, &dims);
        assert_eq!(desc.element_count(), data.len(), "data length for {dims:?}");
        let buffer = ctx.upload(data).unwrap();
        Self { desc, buffer }
    }

    /// Packed f32 NCHW tensor filled with a deterministic pattern
    pub fn pattern(ctx: &CpuContext, dims: [usize; 4], seed: u32) -> Self {
        let len = dims.iter().product();
        Self::from_data(ctx, dims, &pattern(len, seed))
    }

    /// Zero-filled tensor shaped like `desc`
    pub fn zeros(ctx: &CpuContext, desc: &TensorDesc) -> Self {
        let buffer = ctx.create_buffer(desc.byte_size()).unwrap();
        Self {
            desc: desc.clone(),
            buffer,
        }
    }

    pub fn arg(&self) -> TensorArg<'_> {
        TensorArg::new(&self.desc, self.buffer)
    }

    pub fn dims(&self) -> [usize; 4] {
        self.desc.nchw_dims().unwrap()
    }

    /// Contents, trimmed to the element count
    pub fn read(&self, ctx: &CpuContext) -> Vec<f32> {
        let mut data = ctx.read(self.buffer).unwrap();
        data.truncate(self.desc.element_count());
        data
    }
}

/// Workspace backed by a fresh buffer of `bytes` (none for 0)
pub fn workspace(ctx: &CpuContext, bytes: usize) -> Workspace {
    if bytes == 0 {
        return Workspace::NONE;
    }
    Workspace::from_buffer(ctx.create_buffer(bytes).unwrap())
}

/// Deterministic values in [-1, 1)
pub fn pattern(len: usize, seed: u32) -> Vec<f32> {
    let mut state = seed.wrapping_mul(2_654_435_761).wrapping_add(12_345);
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state % 2000) as f32 / 1000.0 - 1.0
        })
        .collect()
}

/// Padding, stride and dilation as `[h, w]` pairs
#[derive(Copy, Clone, Debug)]
pub struct Geometry {
    pub pad: [usize; 2],
    pub stride: [usize; 2],
    pub dilation: [usize; 2],
}

impl Geometry {
    pub fn new(pad: usize, stride: usize) -> Self {
        Self {
            pad: [pad, pad],
            stride: [stride, stride],
            dilation: [1, 1],
        }
    }

    pub fn dilated(mut self, dilation: usize) -> Self {
        self.dilation = [dilation, dilation];
        self
    }

    /// Input coordinate read by output `o` through tap `t`, if inside the image
    fn source(&self, axis: usize, o: usize, t: usize, extent: usize) -> Option<usize> {
        let pos = (o * self.stride[axis] + t * self.dilation[axis]) as isize
            - self.pad[axis] as isize;
        (pos >= 0 && (pos as usize) < extent).then_some(pos as usize)
    }
}

/// Visit every `(x index, w index, y index)` triple of a standard convolution
fn for_each_tap(
    x: [usize; 4],
    w: [usize; 4],
    y: [usize; 4],
    g: Geometry,
    mut f: impl FnMut(usize, usize, usize),
) {
    let [n, c, h, wd] = x;
    let [k, _, r, s] = w;
    let [_, _, oh, ow] = y;
    for b in 0..n {
        for ko in 0..k {
            for i in 0..oh {
                for j in 0..ow {
                    let yi = ((b * k + ko) * oh + i) * ow + j;
                    for ci in 0..c {
                        for ri in 0..r {
                            let Some(ih) = g.source(0, i, ri, h) else {
                                continue;
                            };
                            for si in 0..s {
                                let Some(iw) = g.source(1, j, si, wd) else {
                                    continue;
                                };
                                let xi = ((b * c + ci) * h + ih) * wd + iw;
                                let wi = ((ko * c + ci) * r + ri) * s + si;
                                f(xi, wi, yi);
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Reference forward convolution (cross-correlation)
pub fn naive_forward(
    x: &[f32],
    xd: [usize; 4],
    w: &[f32],
    wd: [usize; 4],
    yd: [usize; 4],
    g: Geometry,
) -> Vec<f32> {
    let mut y = vec![0.0; yd.iter().product()];
    for_each_tap(xd, wd, yd, g, |xi, wi, yi| y[yi] += x[xi] * w[wi]);
    y
}

/// Reference input gradient
pub fn naive_backward_data(
    dy: &[f32],
    yd: [usize; 4],
    w: &[f32],
    wd: [usize; 4],
    xd: [usize; 4],
    g: Geometry,
) -> Vec<f32> {
    let mut dx = vec![0.0; xd.iter().product()];
    for_each_tap(xd, wd, yd, g, |xi, wi, yi| dx[xi] += dy[yi] * w[wi]);
    dx
}

/// Reference filter gradient
pub fn naive_backward_weights(
    dy: &[f32],
    yd: [usize; 4],
    x: &[f32],
    xd: [usize; 4],
    wd: [usize; 4],
    g: Geometry,
) -> Vec<f32> {
    let mut dw = vec![0.0; wd.iter().product()];
    for_each_tap(xd, wd, yd, g, |xi, wi, yi| dw[wi] += dy[yi] * x[xi]);
    dw
}

/// Assert two f32 slices are close within tolerance
///
/// Uses the formula: |a - b| <= atol + rtol * |b|
pub fn assert_allclose_f32(a: &[f32], b: &[f32], rtol: f32, atol: f32, msg: &str) {
    assert_eq!(a.len(), b.len(), "{}: length mismatch", msg);
    for (i, (x, y)) in a.iter().zip(b.iter()).enumerate() {
        let diff = (x - y).abs();
        let tol = atol + rtol * y.abs();
        assert!(
            diff <= tol,
            "{}: element {} differs: {} vs {} (diff={}, tol={})",
            msg,
            i,
            x,
            y,
            diff,
            tol
        );
    }
}
