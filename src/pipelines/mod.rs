// Pipelines
//
// Shader modules pass through to Vulkan untouched. Pipeline layouts
// are deduplicated by their descriptor set layout tuple; each cached
// layout owns the descriptor set caches its bind points allocate from.

mod compute;
mod graphics;

use ash::vk;

use crate::descpool::{DescriptorSetCache, DescriptorSetLayoutCache, LayoutKey};
use crate::device::Device;
use crate::{Result, SquallError};
use utils::log;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

pub(crate) struct ShaderModuleInternal {
    sm_dev: Arc<Device>,
    pub sm_module: vk::ShaderModule,
    /// Pipelines built from this module hold a reference
    pub sm_refcount: AtomicU32,
}

impl ShaderModuleInternal {
    pub fn new(dev: Arc<Device>, bytecode: &[u8]) -> Result<Arc<Self>> {
        if bytecode.len() % 4 != 0 {
            log::error!("Shader bytecode length must be a multiple of four");
            return Err(SquallError::INVALID);
        }

        // repack to u32 words, the blob may not be aligned
        let words: Vec<u32> = bytecode
            .chunks_exact(4)
            .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let info = vk::ShaderModuleCreateInfo::builder().code(&words);
        let module = unsafe {
            dev.dev.create_shader_module(&info, None).or_else(|e| {
                log::error!("vkCreateShaderModule failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        Ok(Arc::new(Self {
            sm_dev: dev,
            sm_module: module,
            sm_refcount: AtomicU32::new(0),
        }))
    }
}

impl Drop for ShaderModuleInternal {
    fn drop(&mut self) {
        unsafe {
            self.sm_dev.dev.destroy_shader_module(self.sm_module, None);
        }
    }
}

/// Opaque shader bytecode handle
#[derive(Clone)]
pub struct ShaderModule {
    pub(crate) sm_internal: Arc<ShaderModuleInternal>,
}

/// A graphics pipeline layout and the sampler set caches for its two
/// stages. A cache is absent when the stage binds no samplers; binds
/// substitute the shared empty set instead.
pub(crate) struct GraphicsPipelineLayout {
    pub gpl_layout: vk::PipelineLayout,
    pub gpl_vertex_sampler_cache: Option<Arc<DescriptorSetCache>>,
    pub gpl_fragment_sampler_cache: Option<Arc<DescriptorSetCache>>,
}

pub(crate) struct ComputePipelineLayout {
    pub cpl_layout: vk::PipelineLayout,
    pub cpl_buffer_cache: Option<Arc<DescriptorSetCache>>,
    pub cpl_image_cache: Option<Arc<DescriptorSetCache>>,
}

/// Deduplicates pipeline layouts by their set layout tuples
///
/// The uniform set layouts are fixed singletons, so the key reduces
/// to the per-pipeline sampler (or buffer/image) layouts.
pub(crate) struct PipelineLayoutCache {
    plc_graphics:
        Mutex<HashMap<(vk::DescriptorSetLayout, vk::DescriptorSetLayout), Arc<GraphicsPipelineLayout>>>,
    plc_compute:
        Mutex<HashMap<(vk::DescriptorSetLayout, vk::DescriptorSetLayout), Arc<ComputePipelineLayout>>>,
}

impl PipelineLayoutCache {
    pub fn new() -> Self {
        Self {
            plc_graphics: Mutex::new(HashMap::new()),
            plc_compute: Mutex::new(HashMap::new()),
        }
    }

    /// Layout for a graphics pipeline with the given sampler counts
    ///
    /// Set order is fixed: vertex samplers, fragment samplers, vertex
    /// uniforms, fragment uniforms. Draws depend on this order.
    pub fn fetch_graphics(
        &self,
        dev: &ash::Device,
        layouts: &DescriptorSetLayoutCache,
        empty_layout: vk::DescriptorSetLayout,
        vertex_ubo_layout: vk::DescriptorSetLayout,
        fragment_ubo_layout: vk::DescriptorSetLayout,
        vertex_sampler_count: u32,
        fragment_sampler_count: u32,
    ) -> Result<Arc<GraphicsPipelineLayout>> {
        let vertex_layout = if vertex_sampler_count > 0 {
            layouts.fetch(
                dev,
                LayoutKey {
                    lk_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    lk_count: vertex_sampler_count,
                    lk_stage: vk::ShaderStageFlags::VERTEX,
                },
            )?
        } else {
            empty_layout
        };
        let fragment_layout = if fragment_sampler_count > 0 {
            layouts.fetch(
                dev,
                LayoutKey {
                    lk_type: vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    lk_count: fragment_sampler_count,
                    lk_stage: vk::ShaderStageFlags::FRAGMENT,
                },
            )?
        } else {
            empty_layout
        };

        let mut cache = self.plc_graphics.lock().unwrap();
        if let Some(layout) = cache.get(&(vertex_layout, fragment_layout)) {
            return Ok(layout.clone());
        }

        let set_layouts = [
            vertex_layout,
            fragment_layout,
            vertex_ubo_layout,
            fragment_ubo_layout,
        ];
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let vk_layout = unsafe {
            dev.create_pipeline_layout(&info, None).or_else(|e| {
                log::error!("vkCreatePipelineLayout failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let layout = Arc::new(GraphicsPipelineLayout {
            gpl_layout: vk_layout,
            gpl_vertex_sampler_cache: (vertex_sampler_count > 0).then(|| {
                Arc::new(DescriptorSetCache::new(
                    vertex_layout,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    vertex_sampler_count,
                ))
            }),
            gpl_fragment_sampler_cache: (fragment_sampler_count > 0).then(|| {
                Arc::new(DescriptorSetCache::new(
                    fragment_layout,
                    vk::DescriptorType::COMBINED_IMAGE_SAMPLER,
                    fragment_sampler_count,
                ))
            }),
        });
        cache.insert((vertex_layout, fragment_layout), layout.clone());

        Ok(layout)
    }

    /// Layout for a compute pipeline: buffers, images, uniforms
    pub fn fetch_compute(
        &self,
        dev: &ash::Device,
        layouts: &DescriptorSetLayoutCache,
        empty_layout: vk::DescriptorSetLayout,
        compute_ubo_layout: vk::DescriptorSetLayout,
        buffer_count: u32,
        image_count: u32,
    ) -> Result<Arc<ComputePipelineLayout>> {
        let buffer_layout = if buffer_count > 0 {
            layouts.fetch(
                dev,
                LayoutKey {
                    lk_type: vk::DescriptorType::STORAGE_BUFFER,
                    lk_count: buffer_count,
                    lk_stage: vk::ShaderStageFlags::COMPUTE,
                },
            )?
        } else {
            empty_layout
        };
        let image_layout = if image_count > 0 {
            layouts.fetch(
                dev,
                LayoutKey {
                    lk_type: vk::DescriptorType::STORAGE_IMAGE,
                    lk_count: image_count,
                    lk_stage: vk::ShaderStageFlags::COMPUTE,
                },
            )?
        } else {
            empty_layout
        };

        let mut cache = self.plc_compute.lock().unwrap();
        if let Some(layout) = cache.get(&(buffer_layout, image_layout)) {
            return Ok(layout.clone());
        }

        let set_layouts = [buffer_layout, image_layout, compute_ubo_layout];
        let info = vk::PipelineLayoutCreateInfo::builder().set_layouts(&set_layouts);
        let vk_layout = unsafe {
            dev.create_pipeline_layout(&info, None).or_else(|e| {
                log::error!("vkCreatePipelineLayout failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let layout = Arc::new(ComputePipelineLayout {
            cpl_layout: vk_layout,
            cpl_buffer_cache: (buffer_count > 0).then(|| {
                Arc::new(DescriptorSetCache::new(
                    buffer_layout,
                    vk::DescriptorType::STORAGE_BUFFER,
                    buffer_count,
                ))
            }),
            cpl_image_cache: (image_count > 0).then(|| {
                Arc::new(DescriptorSetCache::new(
                    image_layout,
                    vk::DescriptorType::STORAGE_IMAGE,
                    image_count,
                ))
            }),
        });
        cache.insert((buffer_layout, image_layout), layout.clone());

        Ok(layout)
    }

    pub fn destroy(&self, dev: &ash::Device) {
        let mut graphics = self.plc_graphics.lock().unwrap();
        for (_, layout) in graphics.drain() {
            unsafe { dev.destroy_pipeline_layout(layout.gpl_layout, None) };
            if let Some(c) = layout.gpl_vertex_sampler_cache.as_ref() {
                c.destroy(dev);
            }
            if let Some(c) = layout.gpl_fragment_sampler_cache.as_ref() {
                c.destroy(dev);
            }
        }

        let mut compute = self.plc_compute.lock().unwrap();
        for (_, layout) in compute.drain() {
            unsafe { dev.destroy_pipeline_layout(layout.cpl_layout, None) };
            if let Some(c) = layout.cpl_buffer_cache.as_ref() {
                c.destroy(dev);
            }
            if let Some(c) = layout.cpl_image_cache.as_ref() {
                c.destroy(dev);
            }
        }
    }
}

/// Round a shader's uniform block up to the device's dynamic offset
/// alignment. Pushes advance by this stride.
pub(crate) fn align_block_size(size: u64, min_align: u64) -> u64 {
    if size == 0 {
        return 0;
    }
    crate::memory::round_up(size, min_align)
}

pub(crate) struct GraphicsPipelineInternal {
    p_dev: Arc<Device>,
    pub p_pipeline: vk::Pipeline,
    pub p_layout: Arc<GraphicsPipelineLayout>,
    /// Draw calls turn primitive counts into vertex counts with this
    pub p_primitive_type: crate::types::PrimitiveType,
    pub p_vertex_block_size: u64,
    pub p_fragment_block_size: u64,
    pub p_vertex_sampler_count: u32,
    pub p_fragment_sampler_count: u32,
    p_shaders: Vec<Arc<ShaderModuleInternal>>,
    pub p_refcount: AtomicU32,
}

impl GraphicsPipelineInternal {
    pub(crate) fn new(
        dev: Arc<Device>,
        pipeline: vk::Pipeline,
        layout: Arc<GraphicsPipelineLayout>,
        primitive_type: crate::types::PrimitiveType,
        vertex_block_size: u64,
        fragment_block_size: u64,
        vertex_sampler_count: u32,
        fragment_sampler_count: u32,
        shaders: Vec<Arc<ShaderModuleInternal>>,
    ) -> Arc<Self> {
        for shader in shaders.iter() {
            shader.sm_refcount.fetch_add(1, Ordering::AcqRel);
        }

        Arc::new(Self {
            p_dev: dev,
            p_pipeline: pipeline,
            p_layout: layout,
            p_primitive_type: primitive_type,
            p_vertex_block_size: vertex_block_size,
            p_fragment_block_size: fragment_block_size,
            p_vertex_sampler_count: vertex_sampler_count,
            p_fragment_sampler_count: fragment_sampler_count,
            p_shaders: shaders,
            p_refcount: AtomicU32::new(0),
        })
    }
}

impl Drop for GraphicsPipelineInternal {
    fn drop(&mut self) {
        for shader in self.p_shaders.iter() {
            shader.sm_refcount.fetch_sub(1, Ordering::AcqRel);
        }
        unsafe {
            self.p_dev.dev.destroy_pipeline(self.p_pipeline, None);
        }
    }
}

#[derive(Clone)]
pub struct GraphicsPipeline {
    pub(crate) p_internal: Arc<GraphicsPipelineInternal>,
}

pub(crate) struct ComputePipelineInternal {
    p_dev: Arc<Device>,
    pub p_pipeline: vk::Pipeline,
    pub p_layout: Arc<ComputePipelineLayout>,
    pub p_block_size: u64,
    pub p_buffer_count: u32,
    pub p_image_count: u32,
    p_shaders: Vec<Arc<ShaderModuleInternal>>,
    pub p_refcount: AtomicU32,
}

impl ComputePipelineInternal {
    pub(crate) fn new(
        dev: Arc<Device>,
        pipeline: vk::Pipeline,
        layout: Arc<ComputePipelineLayout>,
        block_size: u64,
        buffer_count: u32,
        image_count: u32,
        shaders: Vec<Arc<ShaderModuleInternal>>,
    ) -> Arc<Self> {
        for shader in shaders.iter() {
            shader.sm_refcount.fetch_add(1, Ordering::AcqRel);
        }

        Arc::new(Self {
            p_dev: dev,
            p_pipeline: pipeline,
            p_layout: layout,
            p_block_size: block_size,
            p_buffer_count: buffer_count,
            p_image_count: image_count,
            p_shaders: shaders,
            p_refcount: AtomicU32::new(0),
        })
    }
}

impl Drop for ComputePipelineInternal {
    fn drop(&mut self) {
        for shader in self.p_shaders.iter() {
            shader.sm_refcount.fetch_sub(1, Ordering::AcqRel);
        }
        unsafe {
            self.p_dev.dev.destroy_pipeline(self.p_pipeline, None);
        }
    }
}

#[derive(Clone)]
pub struct ComputePipeline {
    pub(crate) p_internal: Arc<ComputePipelineInternal>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn block_sizes_round_up_to_device_alignment() {
        assert_eq!(align_block_size(0, 256), 0);
        assert_eq!(align_block_size(1, 256), 256);
        assert_eq!(align_block_size(256, 256), 256);
        assert_eq!(align_block_size(257, 256), 512);
        assert_eq!(align_block_size(100, 64), 128);
    }
}
