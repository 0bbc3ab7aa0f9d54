//! Tensor metadata value types
//!
//! Descriptors carry dtype, dimensions and strides only. Storage is owned by
//! the caller and referenced through [`crate::runtime::Buffer`] handles.

mod desc;
mod dims;

pub use desc::TensorDesc;
pub use dims::Dims;
