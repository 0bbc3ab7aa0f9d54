//! Bias gradient reduction

use super::{Launch, check_range};
use crate::error::Result;

/// `db[c] = sum over samples and pixels of dy`. Args: `(dy, db)`
///
/// One work-group column per channel; the channel count is `global[1]`.
pub(super) fn conv_bwd_bias(launch: &Launch<'_>) -> Result<()> {
    let n = launch.define("MLO_OUT_BATCH_SZ")?;
    let spatial = launch.define("MLO_OUT_WIDTH")? * launch.define("MLO_OUT_HEIGHT")?;
    let channel_stride = launch.define("MLO_OUT_CHANNEL_STRIDE")?;
    let batch_stride = launch.define("MLO_OUT_BATCH_STRIDE")?;
    let channels = launch.spec.global[1];
    let (dy, db) = (launch.mem(0)?, launch.mem(1)?);

    launch.with_output(db, &[dy], |inputs, out| {
        let dy = inputs[0];
        if n > 0 && channels > 0 {
            let extent = (n - 1) * batch_stride + (channels - 1) * channel_stride + spatial;
            check_range("conv_bwd_bias", "dy", 0, extent, dy.len())?;
        }
        check_range("conv_bwd_bias", "db", 0, channels, out.len())?;
        for (c, slot) in out[..channels].iter_mut().enumerate() {
            *slot = (0..n)
                .map(|b| {
                    dy[b * batch_stride + c * channel_stride..][..spatial]
                        .iter()
                        .sum::<f32>()
                })
                .sum();
        }
        Ok(())
    })
}
