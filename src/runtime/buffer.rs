//! Device buffer handles, caller workspaces and scoped scratch memory

use super::ExecutionContext;
use crate::error::{Error, Result};
use std::ops::Deref;

/// Opaque handle to device memory plus its size in bytes
///
/// Buffers are owned by whoever created them; the engine only borrows them
/// for the duration of a call.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Buffer {
    handle: u64,
    len: usize,
}

impl Buffer {
    /// The null buffer
    pub const NULL: Self = Self { handle: 0, len: 0 };

    /// Wrap a raw device handle. Handle 0 is reserved for null.
    #[inline]
    pub const fn from_raw(handle: u64, len: usize) -> Self {
        Self { handle, len }
    }

    /// Raw device handle
    #[inline]
    pub const fn handle(&self) -> u64 {
        self.handle
    }

    /// Size in bytes
    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Whether the buffer has zero bytes
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Whether this is the null handle
    #[inline]
    pub const fn is_null(&self) -> bool {
        self.handle == 0
    }
}

/// Caller-supplied scratch memory and its declared capacity
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Workspace {
    buffer: Buffer,
    size: usize,
}

impl Workspace {
    /// No workspace
    pub const NONE: Self = Self {
        buffer: Buffer::NULL,
        size: 0,
    };

    /// Workspace of `size` bytes backed by `buffer`
    pub const fn new(buffer: Buffer, size: usize) -> Self {
        Self { buffer, size }
    }

    /// Workspace spanning a whole buffer
    pub const fn from_buffer(buffer: Buffer) -> Self {
        Self {
            buffer,
            size: buffer.len(),
        }
    }

    /// Backing buffer (may be null)
    #[inline]
    pub fn buffer(&self) -> Buffer {
        self.buffer
    }

    /// Usable bytes: the declared size, or 0 without a backing buffer
    #[inline]
    pub fn capacity(&self) -> usize {
        if self.buffer.is_null() { 0 } else { self.size }
    }

    /// Whether `required` bytes fit
    #[inline]
    pub fn fits(&self, required: usize) -> bool {
        required == 0 || self.capacity() >= required
    }

    /// Fail with `InsufficientWorkspace` unless `required` bytes fit
    pub fn require(&self, algorithm: &'static str, required: usize) -> Result<()> {
        if self.fits(required) {
            Ok(())
        } else {
            Err(Error::insufficient_workspace(
                algorithm,
                required,
                self.capacity(),
            ))
        }
    }

    /// Reject a declared size that overruns the backing buffer
    pub fn validate(&self) -> Result<()> {
        if !self.buffer.is_null() && self.size > self.buffer.len() {
            return Err(Error::bad_param(
                "workspace",
                format!(
                    "declared size {} exceeds buffer length {}",
                    self.size,
                    self.buffer.len()
                ),
            ));
        }
        Ok(())
    }
}

impl Default for Workspace {
    fn default() -> Self {
        Self::NONE
    }
}

/// Scratch buffer released back to the context when dropped
///
/// Used for the throwaway output written by every search candidate.
pub struct ScratchBuffer<'a, C: ExecutionContext + ?Sized> {
    ctx: &'a C,
    buffer: Buffer,
}

impl<'a, C: ExecutionContext + ?Sized> ScratchBuffer<'a, C> {
    /// Allocate `bytes` from `ctx`
    pub fn new(ctx: &'a C, bytes: usize) -> Result<Self> {
        let buffer = ctx.create_buffer(bytes)?;
        Ok(Self { ctx, buffer })
    }

    /// The underlying buffer
    #[inline]
    pub fn buffer(&self) -> Buffer {
        self.buffer
    }
}

impl<C: ExecutionContext + ?Sized> Deref for ScratchBuffer<'_, C> {
    type Target = Buffer;

    fn deref(&self) -> &Buffer {
        &self.buffer
    }
}

impl<C: ExecutionContext + ?Sized> Drop for ScratchBuffer<'_, C> {
    fn drop(&mut self) {
        self.ctx.release_buffer(self.buffer);
    }
}
