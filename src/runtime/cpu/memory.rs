//! Host memory behind `Buffer` handles

use crate::error::{Error, Result};
use crate::runtime::Buffer;
use parking_lot::Mutex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

const F32_BYTES: usize = std::mem::size_of::<f32>();

/// f32 arrays addressed by handle
///
/// Allocations are zero-filled. A kernel writes one output buffer; its
/// inputs may alias that output, in which case they see the contents from
/// before the kernel started.
pub(crate) struct HostMemory {
    buffers: Mutex<HashMap<u64, Vec<f32>>>,
    next_handle: AtomicU64,
}

impl HostMemory {
    pub(crate) fn new() -> Self {
        Self {
            buffers: Mutex::new(HashMap::new()),
            next_handle: AtomicU64::new(1),
        }
    }

    pub(crate) fn allocate(&self, bytes: usize) -> Buffer {
        let handle = self.next_handle.fetch_add(1, Ordering::Relaxed);
        self.buffers
            .lock()
            .insert(handle, vec![0.0; bytes.div_ceil(F32_BYTES)]);
        Buffer::from_raw(handle, bytes)
    }

    pub(crate) fn release(&self, buffer: Buffer) {
        self.buffers.lock().remove(&buffer.handle());
    }

    pub(crate) fn live_buffers(&self) -> usize {
        self.buffers.lock().len()
    }

    fn missing(buffer: Buffer) -> Error {
        Error::Backend(format!("unknown buffer handle {}", buffer.handle()))
    }

    pub(crate) fn read(&self, buffer: Buffer) -> Result<Vec<f32>> {
        self.buffers
            .lock()
            .get(&buffer.handle())
            .cloned()
            .ok_or_else(|| Self::missing(buffer))
    }

    pub(crate) fn write(&self, buffer: Buffer, offset: usize, data: &[f32]) -> Result<()> {
        let mut buffers = self.buffers.lock();
        let dst = buffers
            .get_mut(&buffer.handle())
            .ok_or_else(|| Self::missing(buffer))?;
        let end = offset + data.len();
        if end > dst.len() {
            return Err(Error::Backend(format!(
                "write of {} elements at {offset} overruns buffer of {}",
                data.len(),
                dst.len()
            )));
        }
        dst[offset..end].copy_from_slice(data);
        Ok(())
    }

    /// Run `f` with read access to `inputs` and write access to `output`
    pub(crate) fn with_output<R>(
        &self,
        output: Buffer,
        inputs: &[Buffer],
        f: impl FnOnce(&[&[f32]], &mut [f32]) -> Result<R>,
    ) -> Result<R> {
        let mut buffers = self.buffers.lock();
        let mut out = buffers
            .remove(&output.handle())
            .ok_or_else(|| Self::missing(output))?;

        let result = {
            let mut views: Vec<Cow<'_, [f32]>> = Vec::with_capacity(inputs.len());
            let mut lookup = Ok(());
            for &input in inputs {
                if input.handle() == output.handle() {
                    views.push(Cow::Owned(out.clone()));
                } else if let Some(data) = buffers.get(&input.handle()) {
                    views.push(Cow::Borrowed(data.as_slice()));
                } else {
                    lookup = Err(Self::missing(input));
                    break;
                }
            }
            lookup.and_then(|()| {
                let refs: Vec<&[f32]> = views.iter().map(|v| v.as_ref()).collect();
                f(&refs, &mut out)
            })
        };

        buffers.insert(output.handle(), out);
        result
    }
}
