//! Row-major GEMM with optional transposes and accumulation

use super::{Launch, check_range};
use crate::error::Result;

#[cfg(feature = "rayon")]
use rayon::prelude::*;

/// Args: `(A, a_off, B, b_off, C, c_off)`
pub(super) fn gemm(launch: &Launch<'_>) -> Result<()> {
    let m = launch.define("GEMM_M")?;
    let n = launch.define("GEMM_N")?;
    let k = launch.define("GEMM_K")?;
    let lda = launch.define("GEMM_LDA")?;
    let ldb = launch.define("GEMM_LDB")?;
    let ldc = launch.define("GEMM_LDC")?;
    let trans_a = launch.flag("GEMM_TRANS_A");
    let trans_b = launch.flag("GEMM_TRANS_B");
    let accumulate = launch.flag("GEMM_ACCUMULATE");

    let (a, a_off) = (launch.mem(0)?, launch.int(1)?);
    let (b, b_off) = (launch.mem(2)?, launch.int(3)?);
    let (c, c_off) = (launch.mem(4)?, launch.int(5)?);

    if m == 0 || n == 0 {
        return Ok(());
    }
    // Last element touched, measured from the offset
    let a_extent = if trans_a { (k.max(1) - 1) * lda + m } else { (m - 1) * lda + k };
    let b_extent = if trans_b { (n - 1) * ldb + k } else { (k.max(1) - 1) * ldb + n };
    let c_extent = (m - 1) * ldc + n;

    launch.with_output(c, &[a, b], |inputs, out| {
        let (a, b) = (inputs[0], inputs[1]);
        check_range("gemm", "A", a_off, a_extent, a.len())?;
        check_range("gemm", "B", b_off, b_extent, b.len())?;
        check_range("gemm", "C", c_off, c_extent, out.len())?;

        let a_at = |i: usize, p: usize| {
            if trans_a { a[a_off + p * lda + i] } else { a[a_off + i * lda + p] }
        };
        let b_at = |p: usize, j: usize| {
            if trans_b { b[b_off + j * ldb + p] } else { b[b_off + p * ldb + j] }
        };
        let row = |i: usize, c_row: &mut [f32]| {
            for (j, slot) in c_row.iter_mut().take(n).enumerate() {
                let mut acc = 0.0f32;
                for p in 0..k {
                    acc += a_at(i, p) * b_at(p, j);
                }
                if accumulate {
                    *slot += acc;
                } else {
                    *slot = acc;
                }
            }
        };

        let c_rows = &mut out[c_off..c_off + c_extent];
        #[cfg(feature = "rayon")]
        c_rows
            .par_chunks_mut(ldc)
            .enumerate()
            .for_each(|(i, c_row)| row(i, c_row));
        #[cfg(not(feature = "rayon"))]
        c_rows
            .chunks_mut(ldc)
            .enumerate()
            .for_each(|(i, c_row)| row(i, c_row));
        Ok(())
    })
}
