// Descriptor set machinery
//
// Layouts are deduplicated by (type, binding count, stage). Each
// pipeline layout slot then owns a DescriptorSetCache: a growing chain
// of fixed-size descriptor pools whose sets are recycled exactly when
// the fence of the command buffer that used them signals.

use ash::vk;

use crate::{Result, SquallError};
use utils::log;

use std::collections::HashMap;
use std::sync::Mutex;

/// Sets allocated when a cache's first pool is created; doubles on
/// every subsequent pool.
const STARTING_POOL_SIZE: u32 = 256;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct LayoutKey {
    pub lk_type: vk::DescriptorType,
    pub lk_count: u32,
    pub lk_stage: vk::ShaderStageFlags,
}

/// Deduplicates descriptor set layouts
///
/// Pipelines with the same binding shape share one layout, which in
/// turn lets the pipeline layout cache hit.
pub(crate) struct DescriptorSetLayoutCache {
    dl_layouts: Mutex<HashMap<LayoutKey, vk::DescriptorSetLayout>>,
}

impl DescriptorSetLayoutCache {
    pub fn new() -> Self {
        Self {
            dl_layouts: Mutex::new(HashMap::new()),
        }
    }

    /// Get the layout for `key`, creating it on first use
    ///
    /// The layout has `lk_count` bindings numbered from zero, each
    /// holding one descriptor of `lk_type` visible to `lk_stage`.
    pub fn fetch(&self, dev: &ash::Device, key: LayoutKey) -> Result<vk::DescriptorSetLayout> {
        let mut layouts = self.dl_layouts.lock().unwrap();

        if let Some(layout) = layouts.get(&key) {
            return Ok(*layout);
        }

        let bindings: Vec<vk::DescriptorSetLayoutBinding> = (0..key.lk_count)
            .map(|i| {
                vk::DescriptorSetLayoutBinding::builder()
                    .binding(i)
                    .descriptor_type(key.lk_type)
                    .descriptor_count(1)
                    .stage_flags(key.lk_stage)
                    .build()
            })
            .collect();
        let info = vk::DescriptorSetLayoutCreateInfo::builder().bindings(&bindings);

        let layout = unsafe {
            dev.create_descriptor_set_layout(&info, None).or_else(|e| {
                log::error!("vkCreateDescriptorSetLayout failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        layouts.insert(key, layout);
        Ok(layout)
    }

    pub fn destroy(&self, dev: &ash::Device) {
        let mut layouts = self.dl_layouts.lock().unwrap();
        for (_, layout) in layouts.drain() {
            unsafe { dev.destroy_descriptor_set_layout(layout, None) };
        }
    }
}

struct DescCacheInternal {
    dc_pools: Vec<vk::DescriptorPool>,
    dc_inactive: Vec<vk::DescriptorSet>,
    dc_next_pool_size: u32,
}

/// A recycling allocator for descriptor sets of one layout
///
/// Creating descriptor pools is expensive, so pools are created in
/// batches of sets and never freed until the cache dies. A fetched
/// set rides along on its command buffer and returns to the inactive
/// stack when the fence completes, after which its writes may be
/// safely overwritten.
pub(crate) struct DescriptorSetCache {
    pub dc_layout: vk::DescriptorSetLayout,
    dc_type: vk::DescriptorType,
    dc_binding_count: u32,
    dc_internal: Mutex<DescCacheInternal>,
}

impl DescriptorSetCache {
    pub fn new(layout: vk::DescriptorSetLayout, ty: vk::DescriptorType, binding_count: u32) -> Self {
        Self {
            dc_layout: layout,
            dc_type: ty,
            dc_binding_count: binding_count,
            dc_internal: Mutex::new(DescCacheInternal {
                dc_pools: Vec::new(),
                dc_inactive: Vec::new(),
                dc_next_pool_size: STARTING_POOL_SIZE,
            }),
        }
    }

    /// Pop an inactive set, growing the pool chain if empty
    ///
    /// The caller fills the set with vkUpdateDescriptorSets and hands
    /// it back through return_set once its fence has signaled.
    pub fn fetch_set(&self, dev: &ash::Device) -> Result<vk::DescriptorSet> {
        let mut internal = self.dc_internal.lock().unwrap();

        if internal.dc_inactive.is_empty() {
            let count = internal.dc_next_pool_size;

            let sizes = [vk::DescriptorPoolSize::builder()
                .ty(self.dc_type)
                .descriptor_count(count * self.dc_binding_count)
                .build()];
            let info = vk::DescriptorPoolCreateInfo::builder()
                .pool_sizes(&sizes)
                .max_sets(count);

            let pool = unsafe {
                dev.create_descriptor_pool(&info, None).or_else(|e| {
                    log::error!("vkCreateDescriptorPool failed: {:?}", e);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?
            };
            internal.dc_pools.push(pool);

            // allocate the entire pool up front
            let layouts = vec![self.dc_layout; count as usize];
            let alloc_info = vk::DescriptorSetAllocateInfo::builder()
                .descriptor_pool(pool)
                .set_layouts(&layouts)
                .build();
            let sets = unsafe {
                dev.allocate_descriptor_sets(&alloc_info).or_else(|e| {
                    log::error!("vkAllocateDescriptorSets failed: {:?}", e);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?
            };
            internal.dc_inactive.extend(sets);

            internal.dc_next_pool_size = count * 2;
            log::debug!("Descriptor cache grew by {} sets", count);
        }

        Ok(internal.dc_inactive.pop().unwrap())
    }

    /// Return a set whose command buffer has completed
    pub fn return_set(&self, set: vk::DescriptorSet) {
        self.dc_internal.lock().unwrap().dc_inactive.push(set);
    }

    pub fn destroy(&self, dev: &ash::Device) {
        let mut internal = self.dc_internal.lock().unwrap();
        for pool in internal.dc_pools.drain(..) {
            unsafe { dev.destroy_descriptor_pool(pool, None) };
        }
        internal.dc_inactive.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_keys_dedup_structurally() {
        let mut map = HashMap::new();

        let a = LayoutKey {
            lk_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            lk_count: 4,
            lk_stage: vk::ShaderStageFlags::FRAGMENT,
        };
        let b = LayoutKey {
            lk_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
            lk_count: 4,
            lk_stage: vk::ShaderStageFlags::FRAGMENT,
        };
        // differs only in stage
        let c = LayoutKey {
            lk_stage: vk::ShaderStageFlags::VERTEX,
            ..a
        };

        map.insert(a, 1u32);
        assert_eq!(map.get(&b), Some(&1));
        assert_eq!(map.get(&c), None);
        map.insert(c, 2);
        assert_eq!(map.len(), 2);
    }
}
