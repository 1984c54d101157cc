// GPU buffers
//
// Buffers are device local; uploads and readbacks go through the
// staging pool. The handle the user holds is a thin reference, the
// backing object frees its Vulkan buffer and memory region when the
// last reference drops.

use ash::vk;

use crate::access::AccessKind;
use crate::device::Device;
use crate::memory::Allocation;
use crate::types::BufferUsage;
use crate::{Result, SquallError};
use utils::log;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

/// The access kind a buffer rests in between uses
///
/// This is derived from the usage flags at creation and is what the
/// layer transitions the buffer back to after transfers and compute.
pub(crate) fn default_buffer_access(usage: BufferUsage) -> AccessKind {
    if usage.contains(BufferUsage::VERTEX) {
        AccessKind::VERTEX_BUFFER
    } else if usage.contains(BufferUsage::INDEX) {
        AccessKind::INDEX_BUFFER
    } else if usage.contains(BufferUsage::INDIRECT) {
        AccessKind::INDIRECT_BUFFER
    } else if usage.contains(BufferUsage::COMPUTE) {
        AccessKind::COMPUTE_SHADER_READ_OTHER
    } else {
        AccessKind::NONE
    }
}

pub(crate) struct BufferInternal {
    b_dev: Arc<Device>,
    pub b_buffer: vk::Buffer,
    b_alloc: Allocation,
    pub b_size: u64,
    pub b_usage: BufferUsage,
    /// Current AccessKind, mutated only by the recording command buffer
    pub b_access: AtomicU8,
    /// Number of command buffers currently referencing us
    pub b_refcount: AtomicU32,
}

impl BufferInternal {
    pub fn new(dev: Arc<Device>, usage: BufferUsage, size: u64) -> Result<Arc<Self>> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let buffer = unsafe {
            dev.dev.create_buffer(&create_info, None).or_else(|e| {
                log::error!("vkCreateBuffer failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        // Prefer device local memory. If the pool is exhausted the
        // host visible types are still usable for buffers, so retry
        // there before giving up.
        let alloc = match dev.alloc_bind_buffer(
            buffer,
            vk::MemoryPropertyFlags::DEVICE_LOCAL,
            false,
        ) {
            Ok(a) => a,
            Err(SquallError::OUT_OF_DEVICE_MEMORY) => {
                log::error!("Out of device memory, falling back to host visible");
                dev.alloc_bind_buffer(
                    buffer,
                    vk::MemoryPropertyFlags::HOST_VISIBLE
                        | vk::MemoryPropertyFlags::HOST_COHERENT,
                    false,
                )
                .map_err(|e| {
                    unsafe { dev.dev.destroy_buffer(buffer, None) };
                    e
                })?
            }
            Err(e) => {
                unsafe { dev.dev.destroy_buffer(buffer, None) };
                return Err(e);
            }
        };

        let access = default_buffer_access(usage);

        Ok(Arc::new(Self {
            b_dev: dev,
            b_buffer: buffer,
            b_alloc: alloc,
            b_size: size,
            b_usage: usage,
            b_access: AtomicU8::new(access as u8),
            b_refcount: AtomicU32::new(0),
        }))
    }

    /// Create a host visible buffer the caller will map through the
    /// allocation. Used by the uniform and staging pools.
    pub fn new_host_visible(
        dev: Arc<Device>,
        vk_usage: vk::BufferUsageFlags,
        size: u64,
    ) -> Result<(vk::Buffer, Allocation)> {
        let create_info = vk::BufferCreateInfo::builder()
            .size(size)
            .usage(vk_usage)
            .sharing_mode(vk::SharingMode::EXCLUSIVE)
            .build();

        let buffer = unsafe {
            dev.dev.create_buffer(&create_info, None).or_else(|e| {
                log::error!("vkCreateBuffer failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let alloc = dev
            .alloc_bind_buffer(
                buffer,
                vk::MemoryPropertyFlags::HOST_VISIBLE | vk::MemoryPropertyFlags::HOST_COHERENT,
                false,
            )
            .map_err(|e| {
                unsafe { dev.dev.destroy_buffer(buffer, None) };
                e
            })?;

        Ok((buffer, alloc))
    }

    pub fn get_access(&self) -> AccessKind {
        AccessKind::from_raw(self.b_access.load(Ordering::Acquire))
    }

    pub fn set_access(&self, kind: AccessKind) {
        self.b_access.store(kind as u8, Ordering::Release);
    }

    pub fn default_access(&self) -> AccessKind {
        default_buffer_access(self.b_usage)
    }
}

impl Drop for BufferInternal {
    fn drop(&mut self) {
        unsafe {
            self.b_dev.dev.destroy_buffer(self.b_buffer, None);
        }
        self.b_dev.d_allocator.free(&self.b_dev.dev, &self.b_alloc);
    }
}

/// A GPU buffer
///
/// Cheap to clone; the backing storage lives until the renderer's
/// destroy queue reaps it.
#[derive(Clone)]
pub struct Buffer {
    pub(crate) b_internal: Arc<BufferInternal>,
}

impl Buffer {
    pub fn size(&self) -> u64 {
        self.b_internal.b_size
    }

    pub fn usage(&self) -> BufferUsage {
        self.b_internal.b_usage
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resting_access_follows_usage() {
        assert_eq!(
            default_buffer_access(BufferUsage::VERTEX),
            AccessKind::VERTEX_BUFFER
        );
        assert_eq!(
            default_buffer_access(BufferUsage::INDEX),
            AccessKind::INDEX_BUFFER
        );
        assert_eq!(
            default_buffer_access(BufferUsage::INDIRECT),
            AccessKind::INDIRECT_BUFFER
        );
        assert_eq!(
            default_buffer_access(BufferUsage::COMPUTE),
            AccessKind::COMPUTE_SHADER_READ_OTHER
        );
        // vertex wins when several bits are set
        assert_eq!(
            default_buffer_access(BufferUsage::VERTEX | BufferUsage::COMPUTE),
            AccessKind::VERTEX_BUFFER
        );
        assert_eq!(
            default_buffer_access(BufferUsage::empty()),
            AccessKind::NONE
        );
    }
}
