// Compute pipeline creation
//
// Compute pipelines are a single stage and three descriptor sets:
// storage buffers, storage images, and the stage's dynamic uniforms.

use ash::vk;

use crate::pipelines::{align_block_size, ComputePipelineInternal};
use crate::renderer::Renderer;
use crate::types::ComputeShaderInfo;
use crate::{ComputePipeline, Result, SquallError};
use utils::log;

use std::ffi::CString;

impl Renderer {
    pub fn create_compute_pipeline(&self, info: &ComputeShaderInfo) -> Result<ComputePipeline> {
        let dev = &self.r_dev;

        let layout = self.r_pipeline_layouts.fetch_compute(
            &dev.dev,
            &self.r_desc_layouts,
            self.r_empty_desc_layout,
            self.r_compute_ubo_layout,
            info.buffer_binding_count,
            info.image_binding_count,
        )?;

        let entry = CString::new(info.entry_point.as_str()).or(Err(SquallError::INVALID))?;
        let stage = vk::PipelineShaderStageCreateInfo::builder()
            .stage(vk::ShaderStageFlags::COMPUTE)
            .module(info.shader_module.sm_internal.sm_module)
            .name(&entry)
            .build();

        let create_info = vk::ComputePipelineCreateInfo::builder()
            .stage(stage)
            .layout(layout.cpl_layout)
            .build();

        let pipeline = unsafe {
            dev.dev
                .create_compute_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map(|p| p[0])
                .or_else(|(_, e)| {
                    log::error!("vkCreateComputePipelines failed: {:?}", e);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?
        };

        let internal = ComputePipelineInternal::new(
            dev.clone(),
            pipeline,
            layout,
            align_block_size(info.uniform_buffer_size, dev.min_ubo_align),
            info.buffer_binding_count,
            info.image_binding_count,
            vec![info.shader_module.sm_internal.clone()],
        );

        Ok(ComputePipeline {
            p_internal: internal,
        })
    }
}
