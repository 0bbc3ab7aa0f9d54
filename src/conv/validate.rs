//! Argument checks shared by every public entry point

use crate::error::{Error, Result};
use crate::runtime::Buffer;
use crate::tensor::TensorDesc;

/// A tensor descriptor paired with the device buffer holding its data
#[derive(Copy, Clone, Debug)]
pub struct TensorArg<'a> {
    /// Shape, strides and dtype
    pub desc: &'a TensorDesc,
    /// Device memory
    pub buffer: Buffer,
}

impl<'a> TensorArg<'a> {
    /// Pair a descriptor with its buffer
    pub fn new(desc: &'a TensorDesc, buffer: Buffer) -> Self {
        Self { desc, buffer }
    }
}

/// Blend factors are only supported at their identity values
const SCALE_EPSILON: f32 = 1e-6;

#[inline]
fn float_equal(a: f32, b: f32) -> bool {
    (a - b).abs() <= SCALE_EPSILON
}

/// Reject null buffers
pub(crate) fn non_null(args: &[(&'static str, Buffer)]) -> Result<()> {
    for &(name, buffer) in args {
        if buffer.is_null() {
            return Err(Error::bad_param(name, "null buffer"));
        }
    }
    Ok(())
}

/// Equal ranks, at least 3, and exactly 4
pub(crate) fn ranks(descs: &[(&'static str, &TensorDesc)]) -> Result<()> {
    let Some(&(_, first)) = descs.first() else {
        return Ok(());
    };
    for &(name, desc) in descs {
        if desc.rank() != first.rank() {
            return Err(Error::bad_param(
                name,
                format!("rank {} differs from rank {}", desc.rank(), first.rank()),
            ));
        }
    }
    if first.rank() < 3 {
        return Err(Error::bad_param(
            descs[0].0,
            format!("rank {} is below 3", first.rank()),
        ));
    }
    if first.rank() != 4 {
        return Err(Error::bad_param(
            descs[0].0,
            format!("only 4-D NCHW tensors are supported, got rank {}", first.rank()),
        ));
    }
    Ok(())
}

/// Same dtype everywhere
pub(crate) fn dtypes(descs: &[&TensorDesc]) -> Result<()> {
    if let Some(first) = descs.first() {
        for desc in &descs[1..] {
            if desc.dtype() != first.dtype() {
                return Err(Error::DTypeMismatch {
                    lhs: first.dtype(),
                    rhs: desc.dtype(),
                });
            }
        }
    }
    Ok(())
}

/// Only `alpha == 1`, `beta == 0` is supported
pub(crate) fn identity_scaling(alpha: f32, beta: f32) -> Result<()> {
    if float_equal(alpha, 1.0) && float_equal(beta, 0.0) {
        Ok(())
    } else {
        Err(Error::NotImplemented {
            feature: "alpha/beta blending (only alpha = 1, beta = 0 is supported)",
        })
    }
}

/// Packed layout and buffers large enough to hold their tensors
pub(crate) fn storage(args: &[(&'static str, TensorArg<'_>)]) -> Result<()> {
    for (_, arg) in args {
        if !arg.desc.is_packed() {
            return Err(Error::NotImplemented {
                feature: "strided tensors",
            });
        }
    }
    for &(name, arg) in args {
        if arg.buffer.len() < arg.desc.byte_size() {
            return Err(Error::bad_param(
                name,
                format!(
                    "buffer holds {} bytes, tensor needs {}",
                    arg.buffer.len(),
                    arg.desc.byte_size()
                ),
            ));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;

    #[test]
    fn test_scaling_identity() {
        assert!(identity_scaling(1.0, 0.0).is_ok());
        assert!(matches!(
            identity_scaling(0.5, 0.0),
            Err(Error::NotImplemented { .. })
        ));
        assert!(matches!(
            identity_scaling(1.0, 1.0),
            Err(Error::NotImplemented { .. })
        ));
    }

    #[test]
    fn test_rank_order() {
        let a = TensorDesc::new(DType::F32, &[2, 3]);
        let b = TensorDesc::new(DType::F32, &[2, 3, 4]);
        let c = TensorDesc::new(DType::F32, &[1, 2, 3, 4, 5]);
        assert!(ranks(&[("x", &a), ("y", &a)]).is_err());
        assert!(ranks(&[("x", &b), ("y", &b)]).is_err());
        assert!(ranks(&[("x", &c), ("y", &b)]).is_err());
        let d = TensorDesc::nchw(DType::F32, 1, 1, 1, 1);
        assert!(ranks(&[("x", &d), ("y", &d)]).is_ok());
    }

    #[test]
    fn test_storage_checks() {
        let desc = TensorDesc::nchw(DType::F32, 1, 2, 2, 2);
        let small = TensorArg::new(&desc, Buffer::from_raw(1, 16));
        assert!(matches!(
            storage(&[("x", small)]),
            Err(Error::BadParam { arg: "x", .. })
        ));
        let strided = TensorDesc::with_strides(DType::F32, &[1, 2, 2, 2], &[16, 8, 4, 1]).unwrap();
        let arg = TensorArg::new(&strided, Buffer::from_raw(1, 1024));
        assert!(matches!(
            storage(&[("x", arg)]),
            Err(Error::NotImplemented { .. })
        ));
    }
}
