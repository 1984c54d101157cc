// Graphics pipeline creation
//
// Translates the renderer-neutral pipeline description into a Vulkan
// graphics pipeline. A transient render pass compatible with the
// pipeline's attachment shapes is built just for creation and thrown
// away; the real pass comes out of the render pass cache at draw time.

use ash::vk;

use crate::pipelines::{align_block_size, GraphicsPipelineInternal};
use crate::renderer::Renderer;
use crate::renderpass::create_compatible_render_pass;
use crate::types::GraphicsPipelineCreateInfo;
use crate::{GraphicsPipeline, Result, SquallError};
use utils::log;

use std::ffi::CString;

impl Renderer {
    /// Create a graphics pipeline
    ///
    /// The shader uniform block sizes are rounded up to the device's
    /// dynamic offset alignment here; pushes for this pipeline advance
    /// by the rounded stride.
    pub fn create_graphics_pipeline(
        &self,
        info: &GraphicsPipelineCreateInfo,
    ) -> Result<GraphicsPipeline> {
        let dev = &self.r_dev;
        let samples = info
            .multisample_state
            .sample_count
            .to_vk_clamped(dev.supported_sample_counts);

        let color_formats: Vec<vk::Format> = info
            .attachment_info
            .color_attachment_descriptions
            .iter()
            .map(|d| d.format.to_vk())
            .collect();
        let depth_format = if info.attachment_info.has_depth_stencil_attachment {
            info.attachment_info.depth_stencil_format.map(|f| f.to_vk())
        } else {
            None
        };

        let layout = self.r_pipeline_layouts.fetch_graphics(
            &dev.dev,
            &self.r_desc_layouts,
            self.r_empty_desc_layout,
            self.r_vertex_ubo_layout,
            self.r_fragment_ubo_layout,
            info.vertex_shader_info.sampler_binding_count,
            info.fragment_shader_info.sampler_binding_count,
        )?;

        // loadOp/storeOp do not matter for compatibility, so this
        // throwaway pass stands in for every pass the pipeline will
        // actually render inside
        let compat_pass =
            create_compatible_render_pass(&dev.dev, &color_formats, samples, depth_format)?;

        let vertex_entry = CString::new(info.vertex_shader_info.entry_point.as_str())
            .or(Err(SquallError::INVALID))?;
        let fragment_entry = CString::new(info.fragment_shader_info.entry_point.as_str())
            .or(Err(SquallError::INVALID))?;

        let stages = [
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::VERTEX)
                .module(info.vertex_shader_info.shader_module.sm_internal.sm_module)
                .name(&vertex_entry)
                .build(),
            vk::PipelineShaderStageCreateInfo::builder()
                .stage(vk::ShaderStageFlags::FRAGMENT)
                .module(info.fragment_shader_info.shader_module.sm_internal.sm_module)
                .name(&fragment_entry)
                .build(),
        ];

        let bindings: Vec<vk::VertexInputBindingDescription> = info
            .vertex_input_state
            .bindings
            .iter()
            .map(|b| {
                vk::VertexInputBindingDescription::builder()
                    .binding(b.binding)
                    .stride(b.stride)
                    .input_rate(b.input_rate.to_vk())
                    .build()
            })
            .collect();
        let attributes: Vec<vk::VertexInputAttributeDescription> = info
            .vertex_input_state
            .attributes
            .iter()
            .map(|a| {
                vk::VertexInputAttributeDescription::builder()
                    .location(a.location)
                    .binding(a.binding)
                    .format(a.format.to_vk())
                    .offset(a.offset)
                    .build()
            })
            .collect();
        let vertex_input = vk::PipelineVertexInputStateCreateInfo::builder()
            .vertex_binding_descriptions(&bindings)
            .vertex_attribute_descriptions(&attributes)
            .build();

        let input_assembly = vk::PipelineInputAssemblyStateCreateInfo::builder()
            .topology(info.primitive_type.to_vk())
            .build();

        // contents are dynamic state, only the counts matter
        let viewport_state = vk::PipelineViewportStateCreateInfo::builder()
            .viewport_count(1)
            .scissor_count(1)
            .build();

        let raster = &info.rasterizer_state;
        let rasterization = vk::PipelineRasterizationStateCreateInfo::builder()
            .depth_clamp_enable(raster.depth_clamp_enable)
            .rasterizer_discard_enable(false)
            .polygon_mode(raster.fill_mode.to_vk())
            .cull_mode(raster.cull_mode.to_vk())
            .front_face(raster.front_face.to_vk())
            .depth_bias_enable(raster.depth_bias_enable)
            .depth_bias_constant_factor(raster.depth_bias_constant_factor)
            .depth_bias_clamp(raster.depth_bias_clamp)
            .depth_bias_slope_factor(raster.depth_bias_slope_factor)
            .line_width(raster.line_width)
            .build();

        let sample_masks = [info.multisample_state.sample_mask];
        let multisample = vk::PipelineMultisampleStateCreateInfo::builder()
            .rasterization_samples(samples)
            .sample_mask(&sample_masks)
            .build();

        let ds = &info.depth_stencil_state;
        let depth_stencil = vk::PipelineDepthStencilStateCreateInfo::builder()
            .depth_test_enable(ds.depth_test_enable)
            .depth_write_enable(ds.depth_write_enable)
            .depth_compare_op(ds.compare_op.to_vk())
            .depth_bounds_test_enable(ds.depth_bounds_test_enable)
            .stencil_test_enable(ds.stencil_test_enable)
            .front(ds.front_stencil_state.to_vk())
            .back(ds.back_stencil_state.to_vk())
            .min_depth_bounds(ds.min_depth_bounds)
            .max_depth_bounds(ds.max_depth_bounds)
            .build();

        let blend_attachments: Vec<vk::PipelineColorBlendAttachmentState> = info
            .attachment_info
            .color_attachment_descriptions
            .iter()
            .map(|d| {
                let b = &d.blend_state;
                vk::PipelineColorBlendAttachmentState::builder()
                    .blend_enable(b.blend_enable)
                    .src_color_blend_factor(b.src_color_blend_factor.to_vk())
                    .dst_color_blend_factor(b.dst_color_blend_factor.to_vk())
                    .color_blend_op(b.color_blend_op.to_vk())
                    .src_alpha_blend_factor(b.src_alpha_blend_factor.to_vk())
                    .dst_alpha_blend_factor(b.dst_alpha_blend_factor.to_vk())
                    .alpha_blend_op(b.alpha_blend_op.to_vk())
                    .color_write_mask(b.color_write_mask.to_vk())
                    .build()
            })
            .collect();
        let color_blend = vk::PipelineColorBlendStateCreateInfo::builder()
            .attachments(&blend_attachments)
            .blend_constants(info.blend_constants)
            .build();

        let dynamic_states = [vk::DynamicState::VIEWPORT, vk::DynamicState::SCISSOR];
        let dynamic = vk::PipelineDynamicStateCreateInfo::builder()
            .dynamic_states(&dynamic_states)
            .build();

        let create_info = vk::GraphicsPipelineCreateInfo::builder()
            .stages(&stages)
            .vertex_input_state(&vertex_input)
            .input_assembly_state(&input_assembly)
            .viewport_state(&viewport_state)
            .rasterization_state(&rasterization)
            .multisample_state(&multisample)
            .depth_stencil_state(&depth_stencil)
            .color_blend_state(&color_blend)
            .dynamic_state(&dynamic)
            .layout(layout.gpl_layout)
            .render_pass(compat_pass)
            .subpass(0)
            .build();

        let pipeline = unsafe {
            dev.dev
                .create_graphics_pipelines(vk::PipelineCache::null(), &[create_info], None)
                .map(|p| p[0])
                .or_else(|(_, e)| {
                    log::error!("vkCreateGraphicsPipelines failed: {:?}", e);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })
        };
        // the compatible pass has served its purpose either way
        unsafe { dev.dev.destroy_render_pass(compat_pass, None) };
        let pipeline = pipeline?;

        let internal = GraphicsPipelineInternal::new(
            dev.clone(),
            pipeline,
            layout,
            info.primitive_type,
            align_block_size(info.vertex_shader_info.uniform_buffer_size, dev.min_ubo_align),
            align_block_size(
                info.fragment_shader_info.uniform_buffer_size,
                dev.min_ubo_align,
            ),
            info.vertex_shader_info.sampler_binding_count,
            info.fragment_shader_info.sampler_binding_count,
            vec![
                info.vertex_shader_info.shader_module.sm_internal.clone(),
                info.fragment_shader_info.shader_module.sm_internal.clone(),
            ],
        );

        Ok(GraphicsPipeline {
            p_internal: internal,
        })
    }
}
