// Staging buffer pool
//
// Uploads and readbacks stage through host visible buffers handed out
// here. A command buffer bump-allocates from one transfer buffer at a
// time; the buffer's offset is reset when the command buffer's fence
// completes and it returns to the pool.

use ash::vk;

use crate::buffer::BufferInternal;
use crate::device::Device;
use crate::memory::Allocation;
use crate::Result;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

const STARTING_TRANSFER_SIZE: u64 = 8 * 1024 * 1024;

/// Copy offsets into images must be texel aligned; 16 covers every
/// format the layer exposes.
const TRANSFER_ALIGN: u64 = 16;

pub(crate) struct TransferBuffer {
    tb_dev: Arc<Device>,
    pub tb_buffer: vk::Buffer,
    tb_alloc: Allocation,
    pub tb_size: u64,
    /// Bump offset of the next staging copy
    tb_offset: AtomicU64,
}

impl TransferBuffer {
    fn new(dev: Arc<Device>, size: u64) -> Result<Arc<Self>> {
        let (buffer, alloc) = BufferInternal::new_host_visible(
            dev.clone(),
            vk::BufferUsageFlags::TRANSFER_SRC | vk::BufferUsageFlags::TRANSFER_DST,
            size,
        )?;

        Ok(Arc::new(Self {
            tb_dev: dev,
            tb_buffer: buffer,
            tb_alloc: alloc,
            tb_size: size,
            tb_offset: AtomicU64::new(0),
        }))
    }

    /// Copy `data` into the staging area, returning the byte offset
    /// it landed at. None means the buffer is full and the caller
    /// needs a larger one from the pool.
    pub fn push(&self, data: &[u8]) -> Option<u64> {
        let offset = crate::memory::round_up(self.tb_offset.load(Ordering::Acquire), TRANSFER_ALIGN);
        let len = data.len() as u64;

        if offset + len > self.tb_size {
            return None;
        }

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.tb_alloc.a_map.add(offset as usize),
                data.len(),
            );
        }
        self.tb_offset.store(offset + len, Ordering::Release);

        Some(offset)
    }

    /// Reserve space without writing to it, for GPU-side copies into
    /// the staging buffer (readbacks).
    pub fn reserve(&self, len: u64) -> Option<u64> {
        let offset = crate::memory::round_up(self.tb_offset.load(Ordering::Acquire), TRANSFER_ALIGN);

        if offset + len > self.tb_size {
            return None;
        }
        self.tb_offset.store(offset + len, Ordering::Release);

        Some(offset)
    }

    /// Read staged bytes back out, used after a readback completes
    pub fn read(&self, offset: u64, out: &mut [u8]) {
        unsafe {
            std::ptr::copy_nonoverlapping(
                self.tb_alloc.a_map.add(offset as usize),
                out.as_mut_ptr(),
                out.len(),
            );
        }
    }

    pub fn reset(&self) {
        self.tb_offset.store(0, Ordering::Release);
    }
}

impl Drop for TransferBuffer {
    fn drop(&mut self) {
        unsafe {
            self.tb_dev.dev.destroy_buffer(self.tb_buffer, None);
        }
        self.tb_dev
            .d_allocator
            .free(&self.tb_dev.dev, &self.tb_alloc);
    }
}

/// The pool of idle transfer buffers
pub(crate) struct TransferPool {
    tp_available: Mutex<Vec<Arc<TransferBuffer>>>,
}

impl TransferPool {
    pub fn new() -> Self {
        Self {
            tp_available: Mutex::new(Vec::new()),
        }
    }

    /// Get a staging buffer with room for `required` bytes
    ///
    /// Prefers an idle buffer that fits. New buffers start at 8 MB
    /// and double until the request fits.
    pub fn acquire(&self, dev: &Arc<Device>, required: u64) -> Result<Arc<TransferBuffer>> {
        {
            let mut available = self.tp_available.lock().unwrap();
            if let Some(pos) = available.iter().position(|b| b.tb_size >= required) {
                return Ok(available.remove(pos));
            }
        }

        let mut size = STARTING_TRANSFER_SIZE;
        while size < required + TRANSFER_ALIGN {
            size *= 2;
        }

        TransferBuffer::new(dev.clone(), size)
    }

    /// Return a buffer whose command buffer has completed
    pub fn reclaim(&self, buf: Arc<TransferBuffer>) {
        buf.reset();
        self.tp_available.lock().unwrap().push(buf);
    }
}
