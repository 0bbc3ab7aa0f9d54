//! Bias gradient: sum of the output gradient over batch and space per channel

use super::validate::{self, TensorArg};
use crate::error::{Error, Result};
use crate::runtime::{CompileOptions, ExecutionContext, KernelArg, KernelSpec, KernelTimer};

const BIAS_GROUP: usize = 256;
/// Elements per aligned read
const BIAS_UNIT: usize = 4;

/// Reduce `dy` into the per-channel bias gradient `db`
///
/// `db` must be 4-D with `db_c == dy_c`. No workspace is needed. Only
/// `alpha = 1`, `beta = 0` is supported.
pub fn convolution_backward_bias<C: ExecutionContext + ?Sized>(
    ctx: &C,
    alpha: f32,
    dy: TensorArg<'_>,
    beta: f32,
    db: TensorArg<'_>,
) -> Result<()> {
    validate::non_null(&[("dy", dy.buffer), ("db", db.buffer)])?;
    validate::ranks(&[("dy", dy.desc), ("db", db.desc)])?;
    validate::dtypes(&[dy.desc, db.desc])?;
    let [n, c, h, w] = dy.desc.nchw_dims()?;
    let [_, db_c, _, _] = db.desc.nchw_dims()?;
    if db_c != c {
        return Err(Error::shape_mismatch(&[c], &[db_c]));
    }
    validate::identity_scaling(alpha, beta)?;
    validate::storage(&[("dy", dy), ("db", db)])?;

    let spatial = h * w;
    let options = CompileOptions::new()
        .define(dy.desc.dtype().kernel_define(), 1)
        .define_usize("MLO_CONVBWD_GROUP_SZ0", BIAS_GROUP)
        .define("MLO_CONVBWD_GROUP_SZ1", 1)
        .define_usize("MLO_CONVBWDB_LCL_MEMSZ", BIAS_GROUP)
        .define_usize("MLO_CONVBWDB_UNITSIZE", BIAS_UNIT)
        .define_usize("MLO_OUT_WIDTH", w)
        .define_usize("MLO_OUT_HEIGHT", h)
        .define_usize("MLO_OUT_BATCH_SZ", n)
        .define_usize("MLO_OUT_CHANNEL_STRIDE", spatial)
        .define_usize("MLO_OUT_BATCH_STRIDE", c * spatial)
        .define_usize("MLO_WK_SIZE", spatial.div_ceil(BIAS_UNIT))
        .define_usize("MLO_N_PIX_OFF", spatial % BIAS_UNIT);
    let spec = KernelSpec {
        program: "conv_bwd_bias.cl".to_string(),
        entry: "conv_bwd_bias".to_string(),
        local: [BIAS_GROUP, 1, 1],
        global: [BIAS_GROUP, c, 1],
        options,
    };

    let config = format!("{n}x{c}x{h}x{w}-{}", dy.desc.dtype());
    let mut timer = KernelTimer::new(ctx);
    timer.compile_and_launch(
        "conv_bwd_bias",
        &config,
        &spec,
        &[KernelArg::Mem(dy.buffer), KernelArg::Mem(db.buffer)],
    )?;
    let time = timer.finish();
    tracing::debug!(config = %config, time, "backward bias");
    Ok(())
}
