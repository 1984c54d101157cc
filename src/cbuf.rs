// Command buffers
//
// A command buffer is acquired from a per-thread pool, recorded on
// that thread only, submitted, and reclaimed when its fence signals.
// While recording it accumulates references to every resource it
// touches; those references hold the resources alive until the
// reclaim sweep releases them.

use ash::vk;

use crate::access::{self, AccessKind};
use crate::buffer::BufferInternal;
use crate::descpool::DescriptorSetCache;
use crate::image::{SamplerInternal, TextureInternal};
use crate::pipelines::{ComputePipelineInternal, GraphicsPipelineInternal};
use crate::renderer::Renderer;
use crate::renderpass::{
    FramebufferInternal, FramebufferKey, MsaaTarget, RenderPassColorKey, RenderPassDepthKey,
    RenderPassKey, RenderTargetKey,
};
use crate::transfer::TransferBuffer;
use crate::types::*;
use crate::uniform::{ShaderStage, UniformBuffer};
use crate::{Buffer, ComputePipeline, GraphicsPipeline, Result, Sampler, SquallError, Texture};
use utils::log;

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::ThreadId;

/// Implemented by every resource a command buffer can reference
pub(crate) trait Tracked {
    fn refcount(&self) -> &AtomicU32;
}

impl Tracked for BufferInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.b_refcount
    }
}
impl Tracked for TextureInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.t_refcount
    }
}
impl Tracked for SamplerInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.s_refcount
    }
}
impl Tracked for GraphicsPipelineInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.p_refcount
    }
}
impl Tracked for ComputePipelineInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.p_refcount
    }
}
impl Tracked for FramebufferInternal {
    fn refcount(&self) -> &AtomicU32 {
        &self.f_refcount
    }
}

/// Remember that this command buffer uses `res`
///
/// Each buffer holds at most one reference per resource; re-tracking
/// an already listed resource is a no-op.
pub(crate) fn track<T: Tracked>(list: &mut Vec<Arc<T>>, res: &Arc<T>) {
    if list.iter().any(|r| Arc::ptr_eq(r, res)) {
        return;
    }
    res.refcount().fetch_add(1, Ordering::AcqRel);
    list.push(res.clone());
}

/// Drop every reference the list holds
pub(crate) fn release_all<T: Tracked>(list: &mut Vec<Arc<T>>) {
    for res in list.drain(..) {
        res.refcount().fetch_sub(1, Ordering::AcqRel);
    }
}

/// A present registered during recording, fulfilled at submit
pub(crate) struct PresentIntent {
    pub pi_window: u64,
    pub pi_image_index: u32,
    pub pi_texture: Arc<TextureInternal>,
    /// Signaled by the acquire, waited on by the submit
    pub pi_wait_sema: vk::Semaphore,
    /// Signaled by the submit, waited on by the present
    pub pi_signal_sema: vk::Semaphore,
}

/// Everything that mutates during recording
pub(crate) struct CbufState {
    pub cb_in_render_pass: bool,
    pub cb_graphics_pipeline: Option<Arc<GraphicsPipelineInternal>>,
    pub cb_compute_pipeline: Option<Arc<ComputePipelineInternal>>,

    /// Uniform buffers currently receiving pushes, one per stage
    pub cb_vertex_ub: Option<Arc<UniformBuffer>>,
    pub cb_fragment_ub: Option<Arc<UniformBuffer>>,
    pub cb_compute_ub: Option<Arc<UniformBuffer>>,

    /// Descriptor sets the next draw or dispatch will bind
    pub cb_vertex_sampler_set: vk::DescriptorSet,
    pub cb_fragment_sampler_set: vk::DescriptorSet,
    pub cb_buffer_set: vk::DescriptorSet,
    pub cb_image_set: vk::DescriptorSet,

    /// Color attachment textures of the pass in progress
    pub cb_pass_colors: Vec<Arc<TextureInternal>>,

    /// Retired uniform buffers, returned to their pools on reclaim
    pub cb_bound_ubs: Vec<(ShaderStage, Arc<UniformBuffer>)>,
    /// Descriptor sets to recycle into their caches on reclaim
    pub cb_set_returns: Vec<(Arc<DescriptorSetCache>, vk::DescriptorSet)>,

    pub cb_used_buffers: Vec<Arc<BufferInternal>>,
    pub cb_used_textures: Vec<Arc<TextureInternal>>,
    pub cb_used_samplers: Vec<Arc<SamplerInternal>>,
    pub cb_used_graphics_pipelines: Vec<Arc<GraphicsPipelineInternal>>,
    pub cb_used_compute_pipelines: Vec<Arc<ComputePipelineInternal>>,
    pub cb_used_framebuffers: Vec<Arc<FramebufferInternal>>,

    /// Resources bound to the current compute pipeline, retargeted to
    /// their graphics access kinds after the dispatch
    pub cb_bound_compute_buffers: Vec<Arc<BufferInternal>>,
    pub cb_bound_compute_textures: Vec<Arc<TextureInternal>>,

    /// The staging buffer the next upload bump-allocates from
    pub cb_transfer: Option<Arc<TransferBuffer>>,
    pub cb_transfer_bufs: Vec<Arc<TransferBuffer>>,

    pub cb_presents: Vec<PresentIntent>,
}

impl CbufState {
    pub fn new() -> Self {
        Self {
            cb_in_render_pass: false,
            cb_graphics_pipeline: None,
            cb_compute_pipeline: None,
            cb_vertex_ub: None,
            cb_fragment_ub: None,
            cb_compute_ub: None,
            cb_vertex_sampler_set: vk::DescriptorSet::null(),
            cb_fragment_sampler_set: vk::DescriptorSet::null(),
            cb_buffer_set: vk::DescriptorSet::null(),
            cb_image_set: vk::DescriptorSet::null(),
            cb_pass_colors: Vec::new(),
            cb_bound_ubs: Vec::new(),
            cb_set_returns: Vec::new(),
            cb_used_buffers: Vec::new(),
            cb_used_textures: Vec::new(),
            cb_used_samplers: Vec::new(),
            cb_used_graphics_pipelines: Vec::new(),
            cb_used_compute_pipelines: Vec::new(),
            cb_used_framebuffers: Vec::new(),
            cb_bound_compute_buffers: Vec::new(),
            cb_bound_compute_textures: Vec::new(),
            cb_transfer: None,
            cb_transfer_bufs: Vec::new(),
            cb_presents: Vec::new(),
        }
    }
}

pub(crate) struct CommandBufferInternal {
    pub cb_dev: Arc<crate::device::Device>,
    pub cb_cbuf: vk::CommandBuffer,
    pub cb_fence: vk::Fence,
    /// The thread that acquired us; recording anywhere else is a
    /// contract violation.
    pub cb_thread: ThreadId,
    pub cb_fixed: AtomicBool,
    pub cb_submitted: AtomicBool,
    pub cb_state: Mutex<CbufState>,
}

impl CommandBufferInternal {
    /// Drop all references so queued destroys can complete. Called on
    /// reclaim for one-shot buffers and at end of life for fixed ones.
    pub fn release_references(&self, state: &mut CbufState) {
        release_all(&mut state.cb_used_buffers);
        release_all(&mut state.cb_used_textures);
        release_all(&mut state.cb_used_samplers);
        release_all(&mut state.cb_used_graphics_pipelines);
        release_all(&mut state.cb_used_compute_pipelines);
        release_all(&mut state.cb_used_framebuffers);
    }
}

impl Drop for CommandBufferInternal {
    fn drop(&mut self) {
        // fixed buffers hold their references for life
        let mut state = self.cb_state.lock().unwrap();
        let mut stolen = std::mem::replace(&mut *state, CbufState::new());
        drop(state);
        self.release_references(&mut stolen);

        // the vkCommandBuffer itself dies with its pool
        unsafe { self.cb_dev.dev.destroy_fence(self.cb_fence, None) };
    }
}

/// A recording surface for GPU work
///
/// Acquired from the renderer, recorded on the acquiring thread, and
/// handed back through submit. Handles are cheap clones of the same
/// recording.
#[derive(Clone)]
pub struct CommandBuffer {
    pub(crate) cb_internal: Arc<CommandBufferInternal>,
}

/// Per-thread supply of inactive command buffers
pub(crate) struct CommandPool {
    pub cp_pool: vk::CommandPool,
    pub cp_inactive: Vec<Arc<CommandBufferInternal>>,
}

impl Renderer {
    fn state_for<'a>(&self, cbuf: &'a CommandBuffer) -> MutexGuard<'a, CbufState> {
        if std::thread::current().id() != cbuf.cb_internal.cb_thread {
            log::error!("Command buffer recorded from a thread that did not acquire it");
        }
        cbuf.cb_internal.cb_state.lock().unwrap()
    }

    /// Move `buffer` to `kind`, emitting a barrier when one is needed
    pub(crate) fn transition_buffer(
        &self,
        cbuf: vk::CommandBuffer,
        buffer: &BufferInternal,
        kind: AccessKind,
    ) {
        let prev = buffer.get_access();
        if prev == kind && !kind.is_write() {
            return;
        }

        unsafe {
            access::buffer_barrier(&self.r_dev.dev, cbuf, buffer.b_buffer, prev, kind);
        }
        buffer.set_access(kind);
    }

    /// Move every subresource of `texture` to `kind`
    pub(crate) fn transition_texture(
        &self,
        cbuf: vk::CommandBuffer,
        texture: &TextureInternal,
        discard: bool,
        kind: AccessKind,
    ) {
        let prev = texture.get_access();
        if prev == kind && !kind.is_write() {
            return;
        }

        unsafe {
            access::image_barrier(
                &self.r_dev.dev,
                cbuf,
                texture.t_image,
                texture.aspect_mask(),
                0,
                texture.t_layer_count,
                0,
                texture.t_level_count,
                discard,
                prev,
                kind,
            );
        }
        texture.set_access(kind);
    }

    pub(crate) fn transition_msaa(
        &self,
        cbuf: vk::CommandBuffer,
        msaa: &MsaaTarget,
        kind: AccessKind,
    ) {
        let prev = AccessKind::from_raw(msaa.mt_access.load(Ordering::Acquire));
        if prev == kind && !kind.is_write() {
            return;
        }

        unsafe {
            access::image_barrier(
                &self.r_dev.dev,
                cbuf,
                msaa.mt_image,
                vk::ImageAspectFlags::COLOR,
                0,
                1,
                0,
                1,
                false,
                prev,
                kind,
            );
        }
        msaa.mt_access.store(kind as u8, Ordering::Release);
    }

    /// Begin a render pass over the given attachments
    ///
    /// The pass renders at the smallest attachment extent, fetches its
    /// render pass and framebuffer from the caches, and leaves a
    /// full-extent viewport and scissor set.
    pub fn begin_render_pass(
        &self,
        cbuf: &CommandBuffer,
        color_attachments: &[ColorAttachmentInfo],
        depth_attachment: Option<&DepthStencilAttachmentInfo>,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        if state.cb_in_render_pass {
            log::error!("begin_render_pass called inside a render pass");
            return Err(SquallError::INVALID);
        }

        let samples = color_attachments
            .first()
            .map(|c| c.sample_count.to_vk_clamped(self.r_dev.supported_sample_counts))
            .unwrap_or(vk::SampleCountFlags::TYPE_1);

        // the pass covers the smallest attachment mip extent
        let mut width = u32::MAX;
        let mut height = u32::MAX;
        for info in color_attachments.iter() {
            let t = &info.texture.t_internal;
            width = std::cmp::min(width, std::cmp::max(t.t_width >> info.level, 1));
            height = std::cmp::min(height, std::cmp::max(t.t_height >> info.level, 1));
        }
        if let Some(info) = depth_attachment {
            let t = &info.texture.t_internal;
            width = std::cmp::min(width, std::cmp::max(t.t_width >> info.level, 1));
            height = std::cmp::min(height, std::cmp::max(t.t_height >> info.level, 1));
        }
        if width == u32::MAX {
            log::error!("begin_render_pass needs at least one attachment");
            return Err(SquallError::INVALID);
        }

        let mut pass_key = RenderPassKey {
            rp_colors: Vec::with_capacity(color_attachments.len()),
            rp_depth: None,
            rp_samples: samples,
        };
        let mut fb_key = FramebufferKey {
            fb_colors: Vec::with_capacity(color_attachments.len()),
            fb_msaa: Vec::with_capacity(color_attachments.len()),
            fb_depth: vk::ImageView::null(),
            fb_width: width,
            fb_height: height,
        };
        let mut clear_values = Vec::new();

        for info in color_attachments.iter() {
            let texture = &info.texture.t_internal;
            let clear = info.clear_color.to_array();

            pass_key.rp_colors.push(RenderPassColorKey {
                rp_format: texture.t_format.to_vk(),
                rp_load: info.load_op.to_vk(),
                rp_store: info.store_op.to_vk(),
                rp_clear: [
                    clear[0].to_bits(),
                    clear[1].to_bits(),
                    clear[2].to_bits(),
                    clear[3].to_bits(),
                ],
            });

            let rt_key = RenderTargetKey {
                rt_image: texture.t_image,
                rt_depth: info.depth,
                rt_layer: info.layer,
                rt_level: info.level,
                rt_samples: samples,
            };
            let target = self.r_render_targets.fetch(&self.r_dev, texture, &rt_key)?;

            self.transition_texture(vk_cbuf, texture, false, AccessKind::COLOR_ATTACHMENT_WRITE);

            let clear_value = vk::ClearValue {
                color: vk::ClearColorValue { float32: clear },
            };
            clear_values.push(clear_value);

            fb_key.fb_colors.push(target.rt_view);
            if let Some(msaa) = target.rt_msaa.as_ref() {
                self.transition_msaa(vk_cbuf, msaa, AccessKind::COLOR_ATTACHMENT_WRITE);
                fb_key.fb_msaa.push(msaa.mt_view);
                clear_values.push(clear_value);
            } else {
                fb_key.fb_msaa.push(vk::ImageView::null());
            }

            track(&mut state.cb_used_textures, texture);
            state.cb_pass_colors.push(texture.clone());
        }

        if let Some(info) = depth_attachment {
            let texture = &info.texture.t_internal;

            pass_key.rp_depth = Some(RenderPassDepthKey {
                rp_format: texture.t_format.to_vk(),
                rp_load: info.load_op.to_vk(),
                rp_store: info.store_op.to_vk(),
                rp_stencil_load: info.stencil_load_op.to_vk(),
                rp_stencil_store: info.stencil_store_op.to_vk(),
            });

            let rt_key = RenderTargetKey {
                rt_image: texture.t_image,
                rt_depth: info.depth,
                rt_layer: info.layer,
                rt_level: info.level,
                rt_samples: vk::SampleCountFlags::TYPE_1,
            };
            let target = self.r_render_targets.fetch(&self.r_dev, texture, &rt_key)?;

            self.transition_texture(
                vk_cbuf,
                texture,
                false,
                AccessKind::DEPTH_STENCIL_ATTACHMENT_WRITE,
            );

            clear_values.push(vk::ClearValue {
                depth_stencil: vk::ClearDepthStencilValue {
                    depth: info.depth_stencil_clear_value.depth,
                    stencil: info.depth_stencil_clear_value.stencil,
                },
            });

            fb_key.fb_depth = target.rt_view;
            track(&mut state.cb_used_textures, texture);
        }

        let render_pass = self.r_render_passes.fetch(&self.r_dev.dev, &pass_key)?;
        let framebuffer = self.r_framebuffers.fetch(&self.r_dev, &fb_key, render_pass)?;
        track(&mut state.cb_used_framebuffers, &framebuffer);

        let begin_info = vk::RenderPassBeginInfo::builder()
            .render_pass(render_pass)
            .framebuffer(framebuffer.f_framebuffer)
            .render_area(vk::Rect2D {
                offset: vk::Offset2D { x: 0, y: 0 },
                extent: vk::Extent2D { width, height },
            })
            .clear_values(&clear_values)
            .build();

        unsafe {
            self.r_dev
                .dev
                .cmd_begin_render_pass(vk_cbuf, &begin_info, vk::SubpassContents::INLINE);

            self.r_dev.dev.cmd_set_viewport(
                vk_cbuf,
                0,
                &[vk::Viewport {
                    x: 0.0,
                    y: 0.0,
                    width: width as f32,
                    height: height as f32,
                    min_depth: 0.0,
                    max_depth: 1.0,
                }],
            );
            self.r_dev.dev.cmd_set_scissor(
                vk_cbuf,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D { x: 0, y: 0 },
                    extent: vk::Extent2D { width, height },
                }],
            );
        }

        state.cb_in_render_pass = true;
        Ok(())
    }

    /// End the render pass in progress
    ///
    /// Color attachments that are also sampleable or storage capable
    /// are moved straight into their shader-read kinds so later passes
    /// can sample them without their own transitions.
    pub fn end_render_pass(&self, cbuf: &CommandBuffer) {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        if !state.cb_in_render_pass {
            log::error!("end_render_pass called with no render pass in progress");
            return;
        }

        unsafe { self.r_dev.dev.cmd_end_render_pass(vk_cbuf) };

        // retire the stage uniform buffers the bound pipeline was using
        if state.cb_graphics_pipeline.is_some() {
            if let Some(ub) = state.cb_vertex_ub.take() {
                state.cb_bound_ubs.push((ShaderStage::Vertex, ub));
            }
            if let Some(ub) = state.cb_fragment_ub.take() {
                state.cb_bound_ubs.push((ShaderStage::Fragment, ub));
            }
        }

        let colors = std::mem::take(&mut state.cb_pass_colors);
        for texture in colors.iter() {
            if texture.t_usage.contains(TextureUsage::SAMPLER) {
                self.transition_texture(
                    vk_cbuf,
                    texture,
                    false,
                    AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
                );
            } else if texture.t_usage.contains(TextureUsage::COMPUTE) {
                self.transition_texture(vk_cbuf, texture, false, AccessKind::ANY_SHADER_READ_OTHER);
            }
        }

        state.cb_in_render_pass = false;
        state.cb_graphics_pipeline = None;
    }

    /// Bind a graphics pipeline and acquire its stage uniform buffers
    pub fn bind_graphics_pipeline(
        &self,
        cbuf: &CommandBuffer,
        pipeline: &GraphicsPipeline,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);
        let internal = &pipeline.p_internal;

        unsafe {
            self.r_dev.dev.cmd_bind_pipeline(
                vk_cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                internal.p_pipeline,
            );
        }
        track(&mut state.cb_used_graphics_pipelines, internal);

        // each stage with a uniform block gets a pool buffer; the
        // set's bound range shrinks to the pipeline's block size
        if internal.p_vertex_block_size > 0 {
            if state.cb_vertex_ub.is_none() {
                state.cb_vertex_ub = Some(self.r_vertex_ub_pool.acquire(&self.r_dev)?);
            }
            self.update_ub_range(
                state.cb_vertex_ub.as_ref().unwrap(),
                internal.p_vertex_block_size,
            );
        }
        if internal.p_fragment_block_size > 0 {
            if state.cb_fragment_ub.is_none() {
                state.cb_fragment_ub = Some(self.r_fragment_ub_pool.acquire(&self.r_dev)?);
            }
            self.update_ub_range(
                state.cb_fragment_ub.as_ref().unwrap(),
                internal.p_fragment_block_size,
            );
        }

        state.cb_vertex_sampler_set = vk::DescriptorSet::null();
        state.cb_fragment_sampler_set = vk::DescriptorSet::null();
        state.cb_graphics_pipeline = Some(internal.clone());

        Ok(())
    }

    fn update_ub_range(&self, ub: &UniformBuffer, block_size: u64) {
        let infos = [vk::DescriptorBufferInfo::builder()
            .buffer(ub.ub_buffer)
            .offset(0)
            .range(block_size)
            .build()];
        let writes = [vk::WriteDescriptorSet::builder()
            .dst_set(ub.ub_set)
            .dst_binding(0)
            .dst_array_element(0)
            .descriptor_type(vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC)
            .buffer_info(&infos)
            .build()];
        unsafe { self.r_dev.dev.update_descriptor_sets(&writes, &[]) };
    }

    pub fn bind_compute_pipeline(
        &self,
        cbuf: &CommandBuffer,
        pipeline: &ComputePipeline,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);
        let internal = &pipeline.p_internal;

        unsafe {
            self.r_dev.dev.cmd_bind_pipeline(
                vk_cbuf,
                vk::PipelineBindPoint::COMPUTE,
                internal.p_pipeline,
            );
        }
        track(&mut state.cb_used_compute_pipelines, internal);

        if internal.p_block_size > 0 {
            if state.cb_compute_ub.is_none() {
                state.cb_compute_ub = Some(self.r_compute_ub_pool.acquire(&self.r_dev)?);
            }
            self.update_ub_range(state.cb_compute_ub.as_ref().unwrap(), internal.p_block_size);
        }

        state.cb_buffer_set = vk::DescriptorSet::null();
        state.cb_image_set = vk::DescriptorSet::null();
        state.cb_compute_pipeline = Some(internal.clone());

        Ok(())
    }

    pub fn bind_vertex_buffers(
        &self,
        cbuf: &CommandBuffer,
        first_binding: u32,
        buffers: &[Buffer],
        offsets: &[u64],
    ) {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let mut raw = Vec::with_capacity(buffers.len());
        for buffer in buffers.iter() {
            track(&mut state.cb_used_buffers, &buffer.b_internal);
            raw.push(buffer.b_internal.b_buffer);
        }

        unsafe {
            self.r_dev
                .dev
                .cmd_bind_vertex_buffers(vk_cbuf, first_binding, &raw, offsets);
        }
    }

    pub fn bind_index_buffer(
        &self,
        cbuf: &CommandBuffer,
        buffer: &Buffer,
        offset: u64,
        index_element_size: IndexElementSize,
    ) {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        track(&mut state.cb_used_buffers, &buffer.b_internal);

        unsafe {
            self.r_dev.dev.cmd_bind_index_buffer(
                vk_cbuf,
                buffer.b_internal.b_buffer,
                offset,
                index_element_size.to_vk(),
            );
        }
    }

    /// Build a sampler descriptor set for one graphics stage
    fn bind_samplers(
        &self,
        state: &mut CbufState,
        cache: &Arc<DescriptorSetCache>,
        textures: &[Texture],
        samplers: &[Sampler],
    ) -> Result<vk::DescriptorSet> {
        let set = cache.fetch_set(&self.r_dev.dev)?;

        let infos: Vec<vk::DescriptorImageInfo> = textures
            .iter()
            .zip(samplers.iter())
            .map(|(texture, sampler)| {
                vk::DescriptorImageInfo::builder()
                    .sampler(sampler.s_internal.s_sampler)
                    .image_view(texture.t_internal.t_view)
                    .image_layout(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
                    .build()
            })
            .collect();

        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .enumerate()
            .map(|(i, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(i as u32)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::COMBINED_IMAGE_SAMPLER)
                    .image_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();
        unsafe { self.r_dev.dev.update_descriptor_sets(&writes, &[]) };

        for texture in textures.iter() {
            track(&mut state.cb_used_textures, &texture.t_internal);
        }
        for sampler in samplers.iter() {
            track(&mut state.cb_used_samplers, &sampler.s_internal);
        }
        state.cb_set_returns.push((cache.clone(), set));

        Ok(set)
    }

    pub fn bind_vertex_samplers(
        &self,
        cbuf: &CommandBuffer,
        textures: &[Texture],
        samplers: &[Sampler],
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_graphics_pipeline.clone() {
            Some(p) => p,
            None => {
                log::error!("bind_vertex_samplers requires a bound graphics pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };
        let cache = match pipeline.p_layout.gpl_vertex_sampler_cache.as_ref() {
            Some(c) => c,
            None => {
                log::error!("The bound pipeline has no vertex sampler bindings");
                return Err(SquallError::INVALID);
            }
        };
        if textures.len() != pipeline.p_vertex_sampler_count as usize {
            log::error!(
                "The pipeline expects {} vertex samplers, got {}",
                pipeline.p_vertex_sampler_count,
                textures.len()
            );
            return Err(SquallError::INVALID);
        }

        for texture in textures.iter() {
            self.transition_texture(
                vk_cbuf,
                &texture.t_internal,
                false,
                AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
            );
        }

        state.cb_vertex_sampler_set = self.bind_samplers(&mut state, cache, textures, samplers)?;
        Ok(())
    }

    pub fn bind_fragment_samplers(
        &self,
        cbuf: &CommandBuffer,
        textures: &[Texture],
        samplers: &[Sampler],
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_graphics_pipeline.clone() {
            Some(p) => p,
            None => {
                log::error!("bind_fragment_samplers requires a bound graphics pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };
        let cache = match pipeline.p_layout.gpl_fragment_sampler_cache.as_ref() {
            Some(c) => c,
            None => {
                log::error!("The bound pipeline has no fragment sampler bindings");
                return Err(SquallError::INVALID);
            }
        };
        if textures.len() != pipeline.p_fragment_sampler_count as usize {
            log::error!(
                "The pipeline expects {} fragment samplers, got {}",
                pipeline.p_fragment_sampler_count,
                textures.len()
            );
            return Err(SquallError::INVALID);
        }

        for texture in textures.iter() {
            self.transition_texture(
                vk_cbuf,
                &texture.t_internal,
                false,
                AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
            );
        }

        state.cb_fragment_sampler_set = self.bind_samplers(&mut state, cache, textures, samplers)?;
        Ok(())
    }

    pub fn bind_compute_buffers(&self, cbuf: &CommandBuffer, buffers: &[Buffer]) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_compute_pipeline.clone() {
            Some(p) => p,
            None => {
                log::error!("bind_compute_buffers requires a bound compute pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };
        let cache = match pipeline.p_layout.cpl_buffer_cache.as_ref() {
            Some(c) => c,
            None => {
                log::error!("The bound pipeline has no buffer bindings");
                return Err(SquallError::INVALID);
            }
        };
        if buffers.len() != pipeline.p_buffer_count as usize {
            log::error!(
                "The pipeline expects {} buffers, got {}",
                pipeline.p_buffer_count,
                buffers.len()
            );
            return Err(SquallError::INVALID);
        }

        let set = cache.fetch_set(&self.r_dev.dev)?;

        let infos: Vec<vk::DescriptorBufferInfo> = buffers
            .iter()
            .map(|buffer| {
                vk::DescriptorBufferInfo::builder()
                    .buffer(buffer.b_internal.b_buffer)
                    .offset(0)
                    .range(vk::WHOLE_SIZE)
                    .build()
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .enumerate()
            .map(|(i, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(i as u32)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_BUFFER)
                    .buffer_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();
        unsafe { self.r_dev.dev.update_descriptor_sets(&writes, &[]) };

        for buffer in buffers.iter() {
            self.transition_buffer(
                vk_cbuf,
                &buffer.b_internal,
                AccessKind::COMPUTE_SHADER_BUFFER_READ_WRITE,
            );
            track(&mut state.cb_used_buffers, &buffer.b_internal);
            track(&mut state.cb_bound_compute_buffers, &buffer.b_internal);
        }

        state.cb_set_returns.push((cache.clone(), set));
        state.cb_buffer_set = set;

        Ok(())
    }

    pub fn bind_compute_textures(&self, cbuf: &CommandBuffer, textures: &[Texture]) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_compute_pipeline.clone() {
            Some(p) => p,
            None => {
                log::error!("bind_compute_textures requires a bound compute pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };
        let cache = match pipeline.p_layout.cpl_image_cache.as_ref() {
            Some(c) => c,
            None => {
                log::error!("The bound pipeline has no image bindings");
                return Err(SquallError::INVALID);
            }
        };
        if textures.len() != pipeline.p_image_count as usize {
            log::error!(
                "The pipeline expects {} storage images, got {}",
                pipeline.p_image_count,
                textures.len()
            );
            return Err(SquallError::INVALID);
        }

        let set = cache.fetch_set(&self.r_dev.dev)?;

        let infos: Vec<vk::DescriptorImageInfo> = textures
            .iter()
            .map(|texture| {
                vk::DescriptorImageInfo::builder()
                    .image_view(texture.t_internal.t_view)
                    .image_layout(vk::ImageLayout::GENERAL)
                    .build()
            })
            .collect();
        let writes: Vec<vk::WriteDescriptorSet> = infos
            .iter()
            .enumerate()
            .map(|(i, info)| {
                vk::WriteDescriptorSet::builder()
                    .dst_set(set)
                    .dst_binding(i as u32)
                    .dst_array_element(0)
                    .descriptor_type(vk::DescriptorType::STORAGE_IMAGE)
                    .image_info(std::slice::from_ref(info))
                    .build()
            })
            .collect();
        unsafe { self.r_dev.dev.update_descriptor_sets(&writes, &[]) };

        for texture in textures.iter() {
            self.transition_texture(
                vk_cbuf,
                &texture.t_internal,
                false,
                AccessKind::COMPUTE_SHADER_STORAGE_IMAGE_READ_WRITE,
            );
            track(&mut state.cb_used_textures, &texture.t_internal);
            track(&mut state.cb_bound_compute_textures, &texture.t_internal);
        }

        state.cb_set_returns.push((cache.clone(), set));
        state.cb_image_set = set;

        Ok(())
    }

    fn push_uniforms(
        &self,
        stage: ShaderStage,
        state: &mut CbufState,
        data: &[u8],
        block_size: u64,
    ) -> Result<u32> {
        if data.len() as u64 > block_size || block_size >= crate::uniform::UBO_BUFFER_SIZE {
            log::error!(
                "Push of {} bytes does not fit the pipeline's {} byte uniform block",
                data.len(),
                block_size
            );
            return Err(SquallError::INVALID);
        }

        let slot = match stage {
            ShaderStage::Vertex => &mut state.cb_vertex_ub,
            ShaderStage::Fragment => &mut state.cb_fragment_ub,
            ShaderStage::Compute => &mut state.cb_compute_ub,
        };
        let ub = slot.as_ref().unwrap().clone();

        let offset = match ub.push(data, block_size) {
            Some(offset) => offset,
            None => {
                // arena exhausted: retire it and push into a fresh one
                let pool = match stage {
                    ShaderStage::Vertex => &self.r_vertex_ub_pool,
                    ShaderStage::Fragment => &self.r_fragment_ub_pool,
                    ShaderStage::Compute => &self.r_compute_ub_pool,
                };
                let fresh = pool.acquire(&self.r_dev)?;
                self.update_ub_range(&fresh, block_size);

                let retired = slot.replace(fresh.clone()).unwrap();
                state.cb_bound_ubs.push((stage, retired));

                fresh.push(data, block_size).unwrap()
            }
        };

        Ok(offset as u32)
    }

    /// Copy vertex stage uniforms in and return their dynamic offset
    pub fn push_vertex_shader_uniforms(&self, cbuf: &CommandBuffer, data: &[u8]) -> Result<u32> {
        let mut state = self.state_for(cbuf);

        let block_size = match state.cb_graphics_pipeline.as_ref() {
            Some(p) if p.p_vertex_block_size > 0 => p.p_vertex_block_size,
            _ => {
                log::error!("push_vertex_shader_uniforms requires a pipeline with vertex uniforms");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        self.push_uniforms(ShaderStage::Vertex, &mut state, data, block_size)
    }

    pub fn push_fragment_shader_uniforms(&self, cbuf: &CommandBuffer, data: &[u8]) -> Result<u32> {
        let mut state = self.state_for(cbuf);

        let block_size = match state.cb_graphics_pipeline.as_ref() {
            Some(p) if p.p_fragment_block_size > 0 => p.p_fragment_block_size,
            _ => {
                log::error!(
                    "push_fragment_shader_uniforms requires a pipeline with fragment uniforms"
                );
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        self.push_uniforms(ShaderStage::Fragment, &mut state, data, block_size)
    }

    pub fn push_compute_shader_uniforms(&self, cbuf: &CommandBuffer, data: &[u8]) -> Result<u32> {
        let mut state = self.state_for(cbuf);

        let block_size = match state.cb_compute_pipeline.as_ref() {
            Some(p) if p.p_block_size > 0 => p.p_block_size,
            _ => {
                log::error!("push_compute_shader_uniforms requires a pipeline with uniforms");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        self.push_uniforms(ShaderStage::Compute, &mut state, data, block_size)
    }

    /// Bind the four graphics sets with the stage dynamic offsets
    fn bind_graphics_sets(
        &self,
        state: &CbufState,
        vk_cbuf: vk::CommandBuffer,
        pipeline: &GraphicsPipelineInternal,
        vertex_offset: u32,
        fragment_offset: u32,
    ) {
        let null_to_empty = |set: vk::DescriptorSet| {
            if set == vk::DescriptorSet::null() {
                self.r_empty_desc_set
            } else {
                set
            }
        };

        let vertex_ub_set = state
            .cb_vertex_ub
            .as_ref()
            .map(|ub| ub.ub_set)
            .unwrap_or(self.r_dummy_vertex_ub.ub_set);
        let fragment_ub_set = state
            .cb_fragment_ub
            .as_ref()
            .map(|ub| ub.ub_set)
            .unwrap_or(self.r_dummy_fragment_ub.ub_set);

        let sets = [
            null_to_empty(state.cb_vertex_sampler_set),
            null_to_empty(state.cb_fragment_sampler_set),
            vertex_ub_set,
            fragment_ub_set,
        ];
        let offsets = [vertex_offset, fragment_offset];

        unsafe {
            self.r_dev.dev.cmd_bind_descriptor_sets(
                vk_cbuf,
                vk::PipelineBindPoint::GRAPHICS,
                pipeline.p_layout.gpl_layout,
                0,
                &sets,
                &offsets,
            );
        }
    }

    pub fn draw_primitives(
        &self,
        cbuf: &CommandBuffer,
        vertex_start: u32,
        primitive_count: u32,
        vertex_param_offset: u32,
        fragment_param_offset: u32,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let state = self.state_for(cbuf);

        let pipeline = match state.cb_graphics_pipeline.as_ref() {
            Some(p) => p.clone(),
            None => {
                log::error!("draw_primitives requires a bound graphics pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        self.bind_graphics_sets(
            &state,
            vk_cbuf,
            &pipeline,
            vertex_param_offset,
            fragment_param_offset,
        );

        unsafe {
            self.r_dev.dev.cmd_draw(
                vk_cbuf,
                pipeline.p_primitive_type.vertex_count(primitive_count),
                1,
                vertex_start,
                0,
            );
        }

        Ok(())
    }

    pub fn draw_indexed_primitives(
        &self,
        cbuf: &CommandBuffer,
        base_vertex: u32,
        start_index: u32,
        primitive_count: u32,
        vertex_param_offset: u32,
        fragment_param_offset: u32,
    ) -> Result<()> {
        self.draw_instanced_primitives(
            cbuf,
            base_vertex,
            start_index,
            primitive_count,
            1,
            vertex_param_offset,
            fragment_param_offset,
        )
    }

    pub fn draw_instanced_primitives(
        &self,
        cbuf: &CommandBuffer,
        base_vertex: u32,
        start_index: u32,
        primitive_count: u32,
        instance_count: u32,
        vertex_param_offset: u32,
        fragment_param_offset: u32,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let state = self.state_for(cbuf);

        let pipeline = match state.cb_graphics_pipeline.as_ref() {
            Some(p) => p.clone(),
            None => {
                log::error!("indexed draws require a bound graphics pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        self.bind_graphics_sets(
            &state,
            vk_cbuf,
            &pipeline,
            vertex_param_offset,
            fragment_param_offset,
        );

        unsafe {
            self.r_dev.dev.cmd_draw_indexed(
                vk_cbuf,
                pipeline.p_primitive_type.vertex_count(primitive_count),
                instance_count,
                start_index,
                base_vertex as i32,
                0,
            );
        }

        Ok(())
    }

    pub fn draw_primitives_indirect(
        &self,
        cbuf: &CommandBuffer,
        buffer: &Buffer,
        offset: u64,
        draw_count: u32,
        stride: u32,
        vertex_param_offset: u32,
        fragment_param_offset: u32,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_graphics_pipeline.as_ref() {
            Some(p) => p.clone(),
            None => {
                log::error!("draw_primitives_indirect requires a bound graphics pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        track(&mut state.cb_used_buffers, &buffer.b_internal);
        // a no-op barrier for indirect-usage buffers resting in their
        // default kind; anything else must be fixed up before the pass
        self.transition_buffer(vk_cbuf, &buffer.b_internal, AccessKind::INDIRECT_BUFFER);

        self.bind_graphics_sets(
            &state,
            vk_cbuf,
            &pipeline,
            vertex_param_offset,
            fragment_param_offset,
        );

        unsafe {
            self.r_dev.dev.cmd_draw_indirect(
                vk_cbuf,
                buffer.b_internal.b_buffer,
                offset,
                draw_count,
                stride,
            );
        }

        Ok(())
    }

    /// Dispatch compute work
    ///
    /// After the dispatch the bound compute resources transition back
    /// to their graphics-facing kinds, so a following draw can consume
    /// them without caring that compute produced them.
    pub fn dispatch_compute(
        &self,
        cbuf: &CommandBuffer,
        group_count_x: u32,
        group_count_y: u32,
        group_count_z: u32,
        compute_param_offset: u32,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let pipeline = match state.cb_compute_pipeline.as_ref() {
            Some(p) => p.clone(),
            None => {
                log::error!("dispatch_compute requires a bound compute pipeline");
                return Err(SquallError::NO_PIPELINE_BOUND);
            }
        };

        let null_to_empty = |set: vk::DescriptorSet| {
            if set == vk::DescriptorSet::null() {
                self.r_empty_desc_set
            } else {
                set
            }
        };
        let ub_set = state
            .cb_compute_ub
            .as_ref()
            .map(|ub| ub.ub_set)
            .unwrap_or(self.r_dummy_compute_ub.ub_set);

        let sets = [
            null_to_empty(state.cb_buffer_set),
            null_to_empty(state.cb_image_set),
            ub_set,
        ];
        let offsets = [compute_param_offset];

        unsafe {
            self.r_dev.dev.cmd_bind_descriptor_sets(
                vk_cbuf,
                vk::PipelineBindPoint::COMPUTE,
                pipeline.p_layout.cpl_layout,
                0,
                &sets,
                &offsets,
            );
            self.r_dev
                .dev
                .cmd_dispatch(vk_cbuf, group_count_x, group_count_y, group_count_z);
        }

        // hand the written resources back to the graphics pipeline
        let buffers = std::mem::take(&mut state.cb_bound_compute_buffers);
        for buffer in buffers.iter() {
            self.transition_buffer(vk_cbuf, buffer, buffer.default_access());
        }
        let textures = std::mem::take(&mut state.cb_bound_compute_textures);
        for texture in textures.iter() {
            if texture.t_usage.contains(TextureUsage::SAMPLER) {
                self.transition_texture(
                    vk_cbuf,
                    texture,
                    false,
                    AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
                );
            }
        }

        Ok(())
    }

    pub fn set_viewport(&self, cbuf: &CommandBuffer, viewport: &Viewport) {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let _state = self.state_for(cbuf);

        unsafe {
            self.r_dev.dev.cmd_set_viewport(
                vk_cbuf,
                0,
                &[vk::Viewport {
                    x: viewport.x,
                    y: viewport.y,
                    width: viewport.w,
                    height: viewport.h,
                    min_depth: viewport.min_depth,
                    max_depth: viewport.max_depth,
                }],
            );
        }
    }

    pub fn set_scissor(&self, cbuf: &CommandBuffer, scissor: &Rect) {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let _state = self.state_for(cbuf);

        unsafe {
            self.r_dev.dev.cmd_set_scissor(
                vk_cbuf,
                0,
                &[vk::Rect2D {
                    offset: vk::Offset2D {
                        x: scissor.x,
                        y: scissor.y,
                    },
                    extent: vk::Extent2D {
                        width: scissor.w as u32,
                        height: scissor.h as u32,
                    },
                }],
            );
        }
    }

    /// Clear attachments of the render pass in progress
    pub fn clear(
        &self,
        cbuf: &CommandBuffer,
        clear_rect: &Rect,
        options: ClearOptions,
        colors: &[Vec4],
        depth_stencil: DepthStencilValue,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let state = self.state_for(cbuf);

        if !state.cb_in_render_pass {
            log::error!("clear is only valid inside a render pass");
            return Err(SquallError::INVALID);
        }

        let mut attachments = Vec::new();
        if options.contains(ClearOptions::COLOR) {
            for (i, color) in colors.iter().enumerate() {
                attachments.push(
                    vk::ClearAttachment::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .color_attachment(i as u32)
                        .clear_value(vk::ClearValue {
                            color: vk::ClearColorValue {
                                float32: color.to_array(),
                            },
                        })
                        .build(),
                );
            }
        }
        if options.intersects(ClearOptions::DEPTH | ClearOptions::STENCIL) {
            let mut aspect = vk::ImageAspectFlags::empty();
            if options.contains(ClearOptions::DEPTH) {
                aspect |= vk::ImageAspectFlags::DEPTH;
            }
            if options.contains(ClearOptions::STENCIL) {
                aspect |= vk::ImageAspectFlags::STENCIL;
            }
            attachments.push(
                vk::ClearAttachment::builder()
                    .aspect_mask(aspect)
                    .clear_value(vk::ClearValue {
                        depth_stencil: vk::ClearDepthStencilValue {
                            depth: depth_stencil.depth,
                            stencil: depth_stencil.stencil,
                        },
                    })
                    .build(),
            );
        }

        let rects = [vk::ClearRect::builder()
            .rect(vk::Rect2D {
                offset: vk::Offset2D {
                    x: clear_rect.x,
                    y: clear_rect.y,
                },
                extent: vk::Extent2D {
                    width: clear_rect.w as u32,
                    height: clear_rect.h as u32,
                },
            })
            .base_array_layer(0)
            .layer_count(1)
            .build()];

        unsafe {
            self.r_dev
                .dev
                .cmd_clear_attachments(vk_cbuf, &attachments, &rects);
        }

        Ok(())
    }

    /// Stage `data` on the command buffer's transfer buffer
    fn stage_data(&self, state: &mut CbufState, data: &[u8]) -> Result<(Arc<TransferBuffer>, u64)> {
        if let Some(transfer) = state.cb_transfer.clone() {
            if let Some(offset) = transfer.push(data) {
                return Ok((transfer, offset));
            }
        }

        let transfer = self.r_transfer_pool.acquire(&self.r_dev, data.len() as u64)?;
        let offset = transfer.push(data).unwrap();

        state.cb_transfer = Some(transfer.clone());
        if !state
            .cb_transfer_bufs
            .iter()
            .any(|t| Arc::ptr_eq(t, &transfer))
        {
            state.cb_transfer_bufs.push(transfer.clone());
        }

        Ok((transfer, offset))
    }

    /// Upload bytes into a region of `buffer`
    ///
    /// The copy is ordered on the command buffer; afterwards the
    /// buffer rests in its usage-derived access kind again.
    pub fn set_buffer_data(
        &self,
        cbuf: &CommandBuffer,
        buffer: &Buffer,
        offset_in_bytes: u64,
        data: &[u8],
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let (transfer, src_offset) = self.stage_data(&mut state, data)?;

        track(&mut state.cb_used_buffers, &buffer.b_internal);
        self.transition_buffer(vk_cbuf, &buffer.b_internal, AccessKind::TRANSFER_WRITE);

        let region = vk::BufferCopy::builder()
            .src_offset(src_offset)
            .dst_offset(offset_in_bytes)
            .size(data.len() as u64)
            .build();
        unsafe {
            self.r_dev.dev.cmd_copy_buffer(
                vk_cbuf,
                transfer.tb_buffer,
                buffer.b_internal.b_buffer,
                &[region],
            );
        }

        self.transition_buffer(vk_cbuf, &buffer.b_internal, buffer.b_internal.default_access());

        Ok(())
    }

    /// Upload image data to one texture slice
    pub fn set_texture_data(
        &self,
        cbuf: &CommandBuffer,
        slice: &TextureSlice,
        data: &[u8],
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let (transfer, src_offset) = self.stage_data(&mut state, data)?;
        let texture = &slice.texture.t_internal;

        track(&mut state.cb_used_textures, texture);
        self.transition_texture(vk_cbuf, texture, false, AccessKind::TRANSFER_WRITE);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(src_offset)
            // zero means tightly packed
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(texture.aspect_mask())
                    .mip_level(slice.level)
                    .base_array_layer(slice.layer)
                    .layer_count(1)
                    .build(),
            )
            .image_offset(vk::Offset3D {
                x: slice.rectangle.x,
                y: slice.rectangle.y,
                z: slice.depth as i32,
            })
            .image_extent(vk::Extent3D {
                width: slice.rectangle.w as u32,
                height: slice.rectangle.h as u32,
                depth: 1,
            })
            .build();
        unsafe {
            self.r_dev.dev.cmd_copy_buffer_to_image(
                vk_cbuf,
                transfer.tb_buffer,
                texture.t_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
            );
        }

        if texture.t_usage.contains(TextureUsage::SAMPLER) {
            self.transition_texture(
                vk_cbuf,
                texture,
                false,
                AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
            );
        }

        Ok(())
    }

    /// Upload planar YUV data into three R8 textures
    pub fn set_texture_data_yuv(
        &self,
        cbuf: &CommandBuffer,
        y: &Texture,
        u: &Texture,
        v: &Texture,
        y_width: u32,
        y_height: u32,
        uv_width: u32,
        uv_height: u32,
        data: &[u8],
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let y_len = (y_width * y_height) as usize;
        let uv_len = (uv_width * uv_height) as usize;
        if data.len() < y_len + 2 * uv_len {
            log::error!("YUV data is smaller than the plane dimensions require");
            return Err(SquallError::INVALID);
        }

        let (transfer, base_offset) = self.stage_data(&mut state, data)?;

        let planes = [
            (y, y_width, y_height, 0usize),
            (u, uv_width, uv_height, y_len),
            (v, uv_width, uv_height, y_len + uv_len),
        ];

        for (texture, width, height, plane_offset) in planes.iter() {
            let internal = &texture.t_internal;

            track(&mut state.cb_used_textures, internal);
            self.transition_texture(vk_cbuf, internal, false, AccessKind::TRANSFER_WRITE);

            let region = vk::BufferImageCopy::builder()
                .buffer_offset(base_offset + *plane_offset as u64)
                .buffer_row_length(0)
                .buffer_image_height(0)
                .image_subresource(
                    vk::ImageSubresourceLayers::builder()
                        .aspect_mask(vk::ImageAspectFlags::COLOR)
                        .mip_level(0)
                        .base_array_layer(0)
                        .layer_count(1)
                        .build(),
                )
                .image_offset(vk::Offset3D { x: 0, y: 0, z: 0 })
                .image_extent(vk::Extent3D {
                    width: *width,
                    height: *height,
                    depth: 1,
                })
                .build();
            unsafe {
                self.r_dev.dev.cmd_copy_buffer_to_image(
                    vk_cbuf,
                    transfer.tb_buffer,
                    internal.t_image,
                    vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                    &[region],
                );
            }

            self.transition_texture(
                vk_cbuf,
                internal,
                false,
                AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
            );
        }

        Ok(())
    }

    /// Blit one texture slice onto another, scaling with `filter`
    pub fn copy_texture_to_texture(
        &self,
        cbuf: &CommandBuffer,
        source: &TextureSlice,
        destination: &TextureSlice,
        filter: Filter,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let src = &source.texture.t_internal;
        let dst = &destination.texture.t_internal;

        track(&mut state.cb_used_textures, src);
        track(&mut state.cb_used_textures, dst);

        self.transition_texture(vk_cbuf, src, false, AccessKind::TRANSFER_READ);
        self.transition_texture(vk_cbuf, dst, false, AccessKind::TRANSFER_WRITE);

        let region = vk::ImageBlit::builder()
            .src_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(src.aspect_mask())
                    .mip_level(source.level)
                    .base_array_layer(source.layer)
                    .layer_count(1)
                    .build(),
            )
            .src_offsets([
                vk::Offset3D {
                    x: source.rectangle.x,
                    y: source.rectangle.y,
                    z: source.depth as i32,
                },
                vk::Offset3D {
                    x: source.rectangle.x + source.rectangle.w,
                    y: source.rectangle.y + source.rectangle.h,
                    z: source.depth as i32 + 1,
                },
            ])
            .dst_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(dst.aspect_mask())
                    .mip_level(destination.level)
                    .base_array_layer(destination.layer)
                    .layer_count(1)
                    .build(),
            )
            .dst_offsets([
                vk::Offset3D {
                    x: destination.rectangle.x,
                    y: destination.rectangle.y,
                    z: destination.depth as i32,
                },
                vk::Offset3D {
                    x: destination.rectangle.x + destination.rectangle.w,
                    y: destination.rectangle.y + destination.rectangle.h,
                    z: destination.depth as i32 + 1,
                },
            ])
            .build();

        unsafe {
            self.r_dev.dev.cmd_blit_image(
                vk_cbuf,
                src.t_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                dst.t_image,
                vk::ImageLayout::TRANSFER_DST_OPTIMAL,
                &[region],
                filter.to_vk(),
            );
        }

        if src.t_usage.contains(TextureUsage::SAMPLER) {
            self.transition_texture(vk_cbuf, src, false, AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE);
        }
        if dst.t_usage.contains(TextureUsage::SAMPLER) {
            self.transition_texture(vk_cbuf, dst, false, AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE);
        }

        Ok(())
    }

    /// Copy a texture slice's texels into `buffer`
    ///
    /// The bytes are not valid until the command buffer completes.
    pub fn copy_texture_to_buffer(
        &self,
        cbuf: &CommandBuffer,
        slice: &TextureSlice,
        buffer: &Buffer,
    ) -> Result<()> {
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;
        let mut state = self.state_for(cbuf);

        let texture = &slice.texture.t_internal;

        track(&mut state.cb_used_textures, texture);
        track(&mut state.cb_used_buffers, &buffer.b_internal);

        self.transition_texture(vk_cbuf, texture, false, AccessKind::TRANSFER_READ);
        self.transition_buffer(vk_cbuf, &buffer.b_internal, AccessKind::TRANSFER_WRITE);

        let region = vk::BufferImageCopy::builder()
            .buffer_offset(0)
            .buffer_row_length(0)
            .buffer_image_height(0)
            .image_subresource(
                vk::ImageSubresourceLayers::builder()
                    .aspect_mask(texture.aspect_mask())
                    .mip_level(slice.level)
                    .base_array_layer(slice.layer)
                    .layer_count(1)
                    .build(),
            )
            .image_offset(vk::Offset3D {
                x: slice.rectangle.x,
                y: slice.rectangle.y,
                z: slice.depth as i32,
            })
            .image_extent(vk::Extent3D {
                width: slice.rectangle.w as u32,
                height: slice.rectangle.h as u32,
                depth: 1,
            })
            .build();
        unsafe {
            self.r_dev.dev.cmd_copy_image_to_buffer(
                vk_cbuf,
                texture.t_image,
                vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
                buffer.b_internal.b_buffer,
                &[region],
            );
        }

        if texture.t_usage.contains(TextureUsage::SAMPLER) {
            self.transition_texture(
                vk_cbuf,
                texture,
                false,
                AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
            );
        }
        self.transition_buffer(vk_cbuf, &buffer.b_internal, buffer.b_internal.default_access());

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeTracked {
        refcount: AtomicU32,
    }

    impl Tracked for FakeTracked {
        fn refcount(&self) -> &AtomicU32 {
            &self.refcount
        }
    }

    fn fake() -> Arc<FakeTracked> {
        Arc::new(FakeTracked {
            refcount: AtomicU32::new(0),
        })
    }

    #[test]
    fn tracking_is_deduplicated_per_buffer() {
        let res = fake();
        let mut list = Vec::new();

        track(&mut list, &res);
        track(&mut list, &res);
        track(&mut list, &res);

        assert_eq!(list.len(), 1);
        assert_eq!(res.refcount.load(Ordering::Acquire), 1);
    }

    #[test]
    fn each_command_buffer_holds_one_reference() {
        let res = fake();
        let mut list_a = Vec::new();
        let mut list_b = Vec::new();
        let mut list_c = Vec::new();

        // three command buffers touch the same resource
        track(&mut list_a, &res);
        track(&mut list_b, &res);
        track(&mut list_c, &res);
        assert_eq!(res.refcount.load(Ordering::Acquire), 3);

        release_all(&mut list_a);
        assert_eq!(res.refcount.load(Ordering::Acquire), 2);
        release_all(&mut list_b);
        release_all(&mut list_c);
        assert_eq!(res.refcount.load(Ordering::Acquire), 0);
        assert!(list_c.is_empty());
    }
}
