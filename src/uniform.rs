// Dynamic uniform buffer pools
//
// Each shader stage draws 16 KB host-coherent buffers from a pool.
// A buffer is a linear arena: pushes advance by the bound pipeline's
// block size and a full buffer is retired to the command buffer and
// swapped for a fresh one, never wrapped in place. Every buffer is
// born with a dynamic-offset descriptor set already pointing at it.

use ash::vk;

use crate::buffer::BufferInternal;
use crate::device::Device;
use crate::memory::Allocation;
use crate::{Result, SquallError};
use utils::log;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) const UBO_BUFFER_SIZE: u64 = 16384;

/// Descriptor sets are minted for uniform buffers in pools of this
/// many at a time.
const UB_SET_GROWTH: u32 = 128;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

impl ShaderStage {
    pub fn to_vk(&self) -> vk::ShaderStageFlags {
        match self {
            ShaderStage::Vertex => vk::ShaderStageFlags::VERTEX,
            ShaderStage::Fragment => vk::ShaderStageFlags::FRAGMENT,
            ShaderStage::Compute => vk::ShaderStageFlags::COMPUTE,
        }
    }
}

/// Where the next push lands, or None when the arena is exhausted
/// and the caller must rotate to a fresh buffer.
fn next_push_offset(offset: u64, block_size: u64) -> Option<u64> {
    if offset + block_size >= UBO_BUFFER_SIZE {
        return None;
    }
    Some(offset)
}

pub(crate) struct UniformBuffer {
    ub_dev: Option<Arc<Device>>,
    pub ub_buffer: vk::Buffer,
    ub_alloc: Option<Allocation>,
    /// Pre-built set with one dynamic uniform binding at offset zero
    pub ub_set: vk::DescriptorSet,
    ub_offset: AtomicU64,
    #[cfg(test)]
    ub_test_backing: Vec<u8>,
}

impl UniformBuffer {
    fn new(dev: Arc<Device>, set: vk::DescriptorSet) -> Result<Arc<Self>> {
        let (buffer, alloc) = BufferInternal::new_host_visible(
            dev.clone(),
            vk::BufferUsageFlags::UNIFORM_BUFFER,
            UBO_BUFFER_SIZE,
        )?;

        let ret = Arc::new(Self {
            ub_dev: Some(dev.clone()),
            ub_buffer: buffer,
            ub_alloc: Some(alloc),
            ub_set: set,
            ub_offset: AtomicU64::new(0),
            #[cfg(test)]
            ub_test_backing: Vec::new(),
        });

        // point the set at the whole buffer; binds shrink the range
        // to the pipeline's block size later
        let infos = [vk::DescriptorBufferInfo::builder()
            .buffer(buffer)
            .offset(0)
            .range(UBO_BUFFER_SIZE)
            .build()];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&infos)
            .build()];
        unsafe { dev.dev.update_descriptor_sets(&writes, &[]) };

        Ok(ret)
    }

    fn map_ptr(&self) -> *mut u8 {
        #[cfg(test)]
        if self.ub_alloc.is_none() {
            return self.ub_test_backing.as_ptr() as *mut u8;
        }

        self.ub_alloc.as_ref().unwrap().a_map
    }

    /// Copy `data` in and return the dynamic offset for the draw
    ///
    /// The offset advances by `block_size`, the fixed stride of the
    /// bound pipeline's uniform block, not by the pushed length.
    /// None means full; the caller retires this buffer and retries
    /// on a fresh one.
    pub fn push(&self, data: &[u8], block_size: u64) -> Option<u64> {
        let offset = next_push_offset(self.ub_offset.load(Ordering::Acquire), block_size)?;

        unsafe {
            std::ptr::copy_nonoverlapping(
                data.as_ptr(),
                self.map_ptr().add(offset as usize),
                data.len(),
            );
        }
        self.ub_offset.store(offset + block_size, Ordering::Release);

        Some(offset)
    }

    pub fn reset(&self) {
        self.ub_offset.store(0, Ordering::Release);
    }

    #[cfg(test)]
    fn for_test() -> Arc<Self> {
        Arc::new(Self {
            ub_dev: None,
            ub_buffer: vk::Buffer::null(),
            ub_alloc: None,
            ub_set: vk::DescriptorSet::null(),
            ub_offset: AtomicU64::new(0),
            ub_test_backing: vec![0; UBO_BUFFER_SIZE as usize],
        })
    }
}

impl Drop for UniformBuffer {
    fn drop(&mut self) {
        if let (Some(dev), Some(alloc)) = (self.ub_dev.as_ref(), self.ub_alloc.as_ref()) {
            unsafe { dev.dev.destroy_buffer(self.ub_buffer, None) };
            dev.d_allocator.free(&dev.dev, alloc);
        }
    }
}

struct UbPoolInternal {
    up_available: Vec<Arc<UniformBuffer>>,
    up_desc_pools: Vec<vk::DescriptorPool>,
    up_sets_remaining: u32,
}

/// The per-stage supply of uniform buffers
pub(crate) struct UniformBufferPool {
    /// The stage's fixed dynamic-UBO set layout
    pub up_layout: vk::DescriptorSetLayout,
    up_internal: Mutex<UbPoolInternal>,
}

impl UniformBufferPool {
    pub fn new(layout: vk::DescriptorSetLayout) -> Self {
        Self {
            up_layout: layout,
            up_internal: Mutex::new(UbPoolInternal {
                up_available: Vec::new(),
                up_desc_pools: Vec::new(),
                up_sets_remaining: 0,
            }),
        }
    }

    /// Take a uniform buffer out of the pool, creating one if the
    /// pool is dry. The returned buffer starts at offset zero.
    pub fn acquire(&self, dev: &Arc<Device>) -> Result<Arc<UniformBuffer>> {
        let set = {
            let mut internal = self.up_internal.lock().unwrap();

            if let Some(ub) = internal.up_available.pop() {
                ub.reset();
                return Ok(ub);
            }

            // a new buffer needs a descriptor set; grow the pool
            // chain when the current one is spent
            if internal.up_sets_remaining == 0 {
                let sizes = [vk::DescriptorPoolSize::builder()
                    .ty(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
                    .descriptor_count(UB_SET_GROWTH)
                    .build()];
                let info = vk::DescriptorPoolCreateInfo::builder()
                    .pool_sizes(&sizes)
                    .max_sets(UB_SET_GROWTH);

                let pool = unsafe {
                    dev.dev.create_descriptor_pool(&info, None).or_else(|e| {
                        log::error!("vkCreateDescriptorPool failed: {:?}", e);
                        Err(SquallError::COULD_NOT_CREATE_OBJECT)
                    })?
                };
                internal.up_desc_pools.push(pool);
                internal.up_sets_remaining = UB_SET_GROWTH;
            }

            let pool = *internal.up_desc_pools.last().unwrap();
            let layouts = [self.up_layout];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&layouts)
                .build();
            let set = unsafe {
                dev.dev
                    .allocate_descriptor_sets(&alloc_info)
                    .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?[0]
            };
            internal.up_sets_remaining -= 1;

            set
        };

        UniformBuffer::new(dev.clone(), set)
    }

    /// Return a buffer whose command buffer has completed
    pub fn reclaim(&self, ub: Arc<UniformBuffer>) {
        self.up_internal.lock().unwrap().up_available.push(ub);
    }

    pub fn destroy(&self, dev: &ash::Device) {
        let mut internal = self.up_internal.lock().unwrap();
        internal.up_available.clear();
        for pool in internal.up_desc_pools.drain(..) {
            unsafe { dev.destroy_descriptor_pool(pool, None) };
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn offsets_step_by_block_size() {
        let ub = UniformBuffer::for_test();
        let data = [7u8; 64];

        // spec: pushes return 0, B, 2B, ...
        for i in 0..10u64 {
            assert_eq!(ub.push(&data, 256), Some(i * 256));
        }
    }

    #[test]
    fn arena_retires_at_sixteen_kb() {
        let ub = UniformBuffer::for_test();
        let data = [0u8; 4];

        // 63 pushes of 256 fit: offsets 0..=15872
        for i in 0..63u64 {
            assert_eq!(ub.push(&data, 256), Some(i * 256));
        }
        // the 64th would end exactly at 16384 and must not fit
        assert_eq!(ub.push(&data, 256), None);

        // a fresh arena starts over at zero
        let fresh = UniformBuffer::for_test();
        assert_eq!(fresh.push(&data, 256), Some(0));
    }

    #[test]
    fn pushed_bytes_land_at_the_returned_offset() {
        let ub = UniformBuffer::for_test();

        ub.push(&[1; 16], 256).unwrap();
        let offset = ub.push(&[2; 16], 256).unwrap() as usize;

        assert_eq!(&ub.ub_test_backing[offset..offset + 16], &[2; 16]);
        assert_eq!(&ub.ub_test_backing[0..16], &[1; 16]);
    }

    #[test]
    fn odd_block_sizes_wrap_before_overflow() {
        let ub = UniformBuffer::for_test();
        let data = [0u8; 1];

        let mut count = 0;
        while ub.push(&data, 4096).is_some() {
            count += 1;
        }
        // 4 * 4096 == 16384, so only three pushes fit below the cap
        assert_eq!(count, 3);
    }
}
