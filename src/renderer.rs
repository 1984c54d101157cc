// The Squall renderer
//
// This owns the device and every cache and pool the layer uses:
// per-thread command pools, descriptor machinery, uniform and staging
// pools, the attachment caches, claimed windows, and the deferred
// destroy queue. Submission and reclamation both live here.

use ash::extensions::khr;
use ash::vk;

use crate::access::AccessKind;
use crate::buffer::BufferInternal;
use crate::cbuf::{CbufState, CommandBuffer, CommandBufferInternal, CommandPool};
use crate::deletion_queue::DeletionQueue;
use crate::descpool::{DescriptorSetLayoutCache, LayoutKey};
use crate::device::Device;
use crate::display::WindowData;
use crate::image::{SamplerInternal, TextureInternal};
use crate::instance::Instance;
use crate::pipelines::{PipelineLayoutCache, ShaderModuleInternal};
use crate::renderpass::{FramebufferCache, RenderPassCache, RenderTargetCache};
use crate::transfer::TransferPool;
use crate::types::{SamplerCreateInfo, TextureCreateInfo};
use crate::uniform::{ShaderStage, UniformBuffer, UniformBufferPool};
use crate::{
    Buffer, ComputePipeline, GraphicsPipeline, Result, Sampler, ShaderModule, SquallError, Texture,
};
use utils::log;

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::ThreadId;

/// Renderer construction parameters
pub struct CreateInfo {
    pub(crate) debug_mode: bool,
    pub(crate) headless: bool,
}

impl CreateInfo {
    pub fn builder() -> CreateInfoBuilder {
        CreateInfoBuilder {
            debug_mode: cfg!(debug_assertions),
            headless: false,
        }
    }
}

pub struct CreateInfoBuilder {
    debug_mode: bool,
    headless: bool,
}

impl CreateInfoBuilder {
    /// Enable the validation layers and the debug messenger
    pub fn debug_mode(mut self, enable: bool) -> Self {
        self.debug_mode = enable;
        self
    }

    /// Skip all window system integration
    pub fn headless(mut self, enable: bool) -> Self {
        self.headless = enable;
        self
    }

    pub fn build(self) -> CreateInfo {
        CreateInfo {
            debug_mode: self.debug_mode,
            headless: self.headless,
        }
    }
}

/// The device-facing contract
///
/// All resource creation, recording, submission, and presentation
/// goes through here. The renderer is Sync; recording itself is
/// serialized per command buffer by the acquiring thread.
pub struct Renderer {
    pub(crate) r_dev: Arc<Device>,
    r_queue: vk::Queue,
    pub(crate) r_surface_loader: khr::Surface,
    pub(crate) r_swapchain_loader: khr::Swapchain,

    /// Serializes submissions and the completion sweep
    r_submit_lock: Mutex<()>,
    /// Per-thread pools of inactive command buffers
    r_cmd_pools: Mutex<HashMap<ThreadId, CommandPool>>,
    /// Buffers on the GPU timeline, waiting for their fences
    r_submitted: Mutex<Vec<Arc<CommandBufferInternal>>>,

    pub(crate) r_desc_layouts: DescriptorSetLayoutCache,
    pub(crate) r_pipeline_layouts: PipelineLayoutCache,
    pub(crate) r_empty_desc_layout: vk::DescriptorSetLayout,
    /// Stands in for any descriptor set slot a pipeline leaves empty
    pub(crate) r_empty_desc_set: vk::DescriptorSet,
    r_empty_desc_pool: vk::DescriptorPool,

    pub(crate) r_vertex_ubo_layout: vk::DescriptorSetLayout,
    pub(crate) r_fragment_ubo_layout: vk::DescriptorSetLayout,
    pub(crate) r_compute_ubo_layout: vk::DescriptorSetLayout,
    pub(crate) r_vertex_ub_pool: UniformBufferPool,
    pub(crate) r_fragment_ub_pool: UniformBufferPool,
    pub(crate) r_compute_ub_pool: UniformBufferPool,
    /// Bound when a pipeline stage has no uniform block, so the set
    /// layout shape never changes at draw time
    pub(crate) r_dummy_vertex_ub: Arc<UniformBuffer>,
    pub(crate) r_dummy_fragment_ub: Arc<UniformBuffer>,
    pub(crate) r_dummy_compute_ub: Arc<UniformBuffer>,

    pub(crate) r_transfer_pool: TransferPool,
    pub(crate) r_render_passes: RenderPassCache,
    pub(crate) r_framebuffers: FramebufferCache,
    pub(crate) r_render_targets: RenderTargetCache,

    r_windows: Mutex<HashMap<u64, WindowData>>,
    r_next_window: AtomicU64,

    r_destroys: DeletionQueue,
}

impl Renderer {
    /// Create a new Renderer on the default physical device
    pub fn new(info: &CreateInfo) -> Result<Self> {
        let instance = Arc::new(Instance::new(info)?);
        let dev = Arc::new(Device::new(instance.clone())?);

        let queue = dev.get_queue();
        let surface_loader = khr::Surface::new(&instance.loader, &instance.inst);
        let swapchain_loader = khr::Swapchain::new(&instance.inst, &dev.dev);

        let desc_layouts = DescriptorSetLayoutCache::new();

        // the fixed per-stage dynamic uniform layouts are ordinary
        // cache entries, fetched once here
        let vertex_ubo_layout = desc_layouts.fetch(
            &dev.dev,
            LayoutKey {
                lk_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                lk_count: 1,
                lk_stage: ShaderStage::Vertex.to_vk(),
            },
        )?;
        let fragment_ubo_layout = desc_layouts.fetch(
            &dev.dev,
            LayoutKey {
                lk_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                lk_count: 1,
                lk_stage: ShaderStage::Fragment.to_vk(),
            },
        )?;
        let compute_ubo_layout = desc_layouts.fetch(
            &dev.dev,
            LayoutKey {
                lk_type: vk::DescriptorType::UNIFORM_BUFFER_DYNAMIC,
                lk_count: 1,
                lk_stage: ShaderStage::Compute.to_vk(),
            },
        )?;
        let empty_layout = desc_layouts.fetch(
            &dev.dev,
            LayoutKey {
                lk_type: vk::DescriptorType::UNIFORM_BUFFER,
                lk_count: 0,
                lk_stage: vk::ShaderStageFlags::empty(),
            },
        )?;

        // one pool for the single shared empty set
        let sizes = [vk::DescriptorPoolSize::builder()
            .ty(vk::DescriptorType::UNIFORM_BUFFER)
            .descriptor_count(1)
            .build()];
        let pool_info = vk::DescriptorPoolCreateInfo::builder()
            .pool_sizes(&sizes)
            .max_sets(1);
        let empty_pool = unsafe {
            dev.dev
                .create_descriptor_pool(&pool_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?
        };
        let empty_layouts = [empty_layout];
        let set_info = vk::DescriptorSetAllocateInfo::builder()
            .descriptor_pool(empty_pool)
            .set_layouts(&empty_layouts)
            .build();
        let empty_set = unsafe {
            dev.dev
                .allocate_descriptor_sets(&set_info)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?[0]
        };

        let vertex_ub_pool = UniformBufferPool::new(vertex_ubo_layout);
        let fragment_ub_pool = UniformBufferPool::new(fragment_ubo_layout);
        let compute_ub_pool = UniformBufferPool::new(compute_ubo_layout);

        let dummy_vertex_ub = vertex_ub_pool.acquire(&dev)?;
        let dummy_fragment_ub = fragment_ub_pool.acquire(&dev)?;
        let dummy_compute_ub = compute_ub_pool.acquire(&dev)?;

        Ok(Self {
            r_dev: dev,
            r_queue: queue,
            r_surface_loader: surface_loader,
            r_swapchain_loader: swapchain_loader,
            r_submit_lock: Mutex::new(()),
            r_cmd_pools: Mutex::new(HashMap::new()),
            r_submitted: Mutex::new(Vec::new()),
            r_desc_layouts: desc_layouts,
            r_pipeline_layouts: PipelineLayoutCache::new(),
            r_empty_desc_layout: empty_layout,
            r_empty_desc_set: empty_set,
            r_empty_desc_pool: empty_pool,
            r_vertex_ubo_layout: vertex_ubo_layout,
            r_fragment_ubo_layout: fragment_ubo_layout,
            r_compute_ubo_layout: compute_ubo_layout,
            r_vertex_ub_pool: vertex_ub_pool,
            r_fragment_ub_pool: fragment_ub_pool,
            r_compute_ub_pool: compute_ub_pool,
            r_dummy_vertex_ub: dummy_vertex_ub,
            r_dummy_fragment_ub: dummy_fragment_ub,
            r_dummy_compute_ub: dummy_compute_ub,
            r_transfer_pool: TransferPool::new(),
            r_render_passes: RenderPassCache::new(),
            r_framebuffers: FramebufferCache::new(),
            r_render_targets: RenderTargetCache::new(),
            r_windows: Mutex::new(HashMap::new()),
            r_next_window: AtomicU64::new(1),
            r_destroys: DeletionQueue::new(),
        })
    }

    // ------------------------------------------------------------------
    // Resource factories
    // ------------------------------------------------------------------

    pub fn create_buffer(&self, usage: crate::BufferUsage, size: u64) -> Result<Buffer> {
        Ok(Buffer {
            b_internal: BufferInternal::new(self.r_dev.clone(), usage, size)?,
        })
    }

    pub fn create_texture(&self, info: &TextureCreateInfo) -> Result<Texture> {
        Ok(Texture {
            t_internal: TextureInternal::new(self.r_dev.clone(), info)?,
        })
    }

    pub fn create_sampler(&self, info: &SamplerCreateInfo) -> Result<Sampler> {
        Ok(Sampler {
            s_internal: SamplerInternal::new(self.r_dev.clone(), info)?,
        })
    }

    pub fn create_shader_module(&self, bytecode: &[u8]) -> Result<ShaderModule> {
        Ok(ShaderModule {
            sm_internal: ShaderModuleInternal::new(self.r_dev.clone(), bytecode)?,
        })
    }

    // ------------------------------------------------------------------
    // Command buffer lifecycle
    // ------------------------------------------------------------------

    /// Get a command buffer recording on the calling thread
    ///
    /// Command buffers are recycled through per-thread pools. A fixed
    /// buffer skips the one-time-submit hint and may be resubmitted
    /// after its fence completes; it keeps its resource references
    /// for its whole life.
    pub fn acquire_command_buffer(&self, fixed: bool) -> Result<CommandBuffer> {
        let thread = std::thread::current().id();
        let internal = {
            let mut pools = self.r_cmd_pools.lock().unwrap();

            if !pools.contains_key(&thread) {
                let vk_pool = self.r_dev.create_command_pool()?;
                pools.insert(
                    thread,
                    CommandPool {
                        cp_pool: vk_pool,
                        cp_inactive: Vec::new(),
                    },
                );
            }
            let pool = pools.get_mut(&thread).unwrap();

            if pool.cp_inactive.is_empty() {
                // allocate in pairs so the next acquire is free
                let cbufs = self.r_dev.create_command_buffers(pool.cp_pool, 2)?;
                for cbuf in cbufs {
                    pool.cp_inactive.push(Arc::new(CommandBufferInternal {
                        cb_dev: self.r_dev.clone(),
                        cb_cbuf: cbuf,
                        cb_fence: self.r_dev.create_fence(false)?,
                        cb_thread: thread,
                        cb_fixed: AtomicBool::new(false),
                        cb_submitted: AtomicBool::new(false),
                        cb_state: Mutex::new(CbufState::new()),
                    }));
                }
            }

            pool.cp_inactive.pop().unwrap()
        };

        unsafe {
            self.r_dev
                .dev
                .reset_fences(&[internal.cb_fence])
                .or(Err(SquallError::INVALID))?;
            self.r_dev
                .dev
                .reset_command_buffer(
                    internal.cb_cbuf,
                    vk::CommandBufferResetFlags::RELEASE_RESOURCES,
                )
                .or(Err(SquallError::INVALID))?;

            let flags = if fixed {
                vk::CommandBufferUsageFlags::empty()
            } else {
                vk::CommandBufferUsageFlags::ONE_TIME_SUBMIT
            };
            self.r_dev
                .dev
                .begin_command_buffer(
                    internal.cb_cbuf,
                    &vk::CommandBufferBeginInfo::builder().flags(flags),
                )
                .or(Err(SquallError::INVALID))?;
        }

        internal.cb_fixed.store(fixed, Ordering::Release);
        internal.cb_submitted.store(false, Ordering::Release);
        *internal.cb_state.lock().unwrap() = CbufState::new();

        Ok(CommandBuffer {
            cb_internal: internal,
        })
    }

    /// Submit recorded command buffers to the GPU
    ///
    /// Per buffer: pending presents get their images transitioned to
    /// PRESENT, recording ends, the buffer is submitted waiting on
    /// each swapchain's acquire semaphore and signaling its render
    /// semaphore, and the presents are queued. Afterwards completed
    /// buffers are reclaimed and pending destroys run.
    pub fn submit(&self, cbufs: &[CommandBuffer]) -> Result<()> {
        let _guard = self.r_submit_lock.lock().unwrap();

        for cbuf in cbufs.iter() {
            let internal = &cbuf.cb_internal;

            if internal.cb_submitted.load(Ordering::Acquire) {
                log::error!("Command buffer submitted twice without completing");
                return Err(SquallError::INVALID);
            }

            let (wait_semas, signal_semas, presents) = {
                let mut state = internal.cb_state.lock().unwrap();

                // every pending present moves its image to PRESENT as
                // the last recorded commands
                let mut wait_semas = Vec::new();
                let mut signal_semas = Vec::new();
                let presents: Vec<(u64, u32, vk::Semaphore)> = state
                    .cb_presents
                    .iter()
                    .map(|p| (p.pi_window, p.pi_image_index, p.pi_signal_sema))
                    .collect();

                let textures: Vec<_> =
                    state.cb_presents.iter().map(|p| p.pi_texture.clone()).collect();
                for (p, texture) in state.cb_presents.iter().zip(textures.iter()) {
                    wait_semas.push(p.pi_wait_sema);
                    signal_semas.push(p.pi_signal_sema);
                    self.transition_texture(internal.cb_cbuf, texture, false, AccessKind::PRESENT);
                }
                state.cb_presents.clear();

                (wait_semas, signal_semas, presents)
            };

            unsafe {
                self.r_dev
                    .dev
                    .end_command_buffer(internal.cb_cbuf)
                    .or(Err(SquallError::INVALID))?;
            }

            let wait_stages: Vec<vk::PipelineStageFlags> = wait_semas
                .iter()
                .map(|_| vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT)
                .collect();
            let cbufs_raw = [internal.cb_cbuf];
            let submit_info = vk::SubmitInfo::builder()
                .wait_semaphores(&wait_semas)
                .wait_dst_stage_mask(&wait_stages)
                .command_buffers(&cbufs_raw)
                .signal_semaphores(&signal_semas)
                .build();

            unsafe {
                self.r_dev
                    .dev
                    .queue_submit(self.r_queue, &[submit_info], internal.cb_fence)
                    .or_else(|e| {
                        log::error!("vkQueueSubmit failed: {:?}", e);
                        Err(SquallError::INVALID)
                    })?;
            }

            internal.cb_submitted.store(true, Ordering::Release);
            self.r_submitted.lock().unwrap().push(internal.clone());

            // one present per swapchain the buffer drew to
            for (window, image_index, render_finished) in presents {
                self.present_to_window(window, image_index, render_finished);
            }
        }

        self.sweep_completed();
        self.run_pending_destroys();

        Ok(())
    }

    fn present_to_window(&self, window: u64, image_index: u32, render_finished: vk::Semaphore) {
        let mut windows = self.r_windows.lock().unwrap();
        let data = match windows.get_mut(&window) {
            Some(d) => d,
            None => {
                log::error!("Presenting to a window that is no longer claimed");
                return;
            }
        };
        let swapchain = match data.wd_swapchain.as_ref() {
            Some(s) => s,
            None => return,
        };

        let wait_semas = [render_finished];
        let swapchains = [swapchain.sc_swapchain];
        let indices = [image_index];
        let present_info = vk::PresentInfoKHR::builder()
            .wait_semaphores(&wait_semas)
            .swapchains(&swapchains)
            .image_indices(&indices);

        let result = unsafe {
            self.r_swapchain_loader
                .queue_present(self.r_queue, &present_info)
        };
        match result {
            Ok(false) => {}
            // stale swapchain: rebuild it now so the next acquire works
            Ok(true) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                log::debug!("Present found the swapchain out of date, recreating");
                if self.recreate_swapchain(data).is_err() {
                    data.wd_swapchain = None;
                }
            }
            Err(e) => {
                log::error!("vkQueuePresentKHR failed: {:?}", e);
            }
        }
    }

    /// Block until every submitted command buffer has completed, then
    /// reclaim them all and run pending destroys.
    pub fn wait(&self) {
        let _guard = self.r_submit_lock.lock().unwrap();

        let fences: Vec<vk::Fence> = self
            .r_submitted
            .lock()
            .unwrap()
            .iter()
            .map(|cb| cb.cb_fence)
            .collect();

        if !fences.is_empty() {
            unsafe {
                match self.r_dev.dev.wait_for_fences(&fences, true, u64::MAX) {
                    Ok(_) => {}
                    Err(vk::Result::ERROR_DEVICE_LOST) => {
                        log::error!("Device lost while waiting for submissions")
                    }
                    Err(e) => log::error!("vkWaitForFences failed: {:?}", e),
                }
            }
        }

        self.sweep_completed();
        self.run_pending_destroys();
    }

    /// Reclaim every submitted buffer whose fence has signaled
    fn sweep_completed(&self) {
        let mut submitted = self.r_submitted.lock().unwrap();

        let mut remaining = Vec::with_capacity(submitted.len());
        for internal in submitted.drain(..) {
            let signaled = unsafe {
                self.r_dev
                    .dev
                    .get_fence_status(internal.cb_fence)
                    .unwrap_or(false)
            };

            if signaled {
                self.reclaim_cbuf(&internal);
            } else {
                remaining.push(internal);
            }
        }
        *submitted = remaining;
    }

    /// Return a completed buffer's resources and recycle it
    ///
    /// Fixed buffers only clear their submitted flag: their recording
    /// and references stay intact for the next submit.
    fn reclaim_cbuf(&self, internal: &Arc<CommandBufferInternal>) {
        internal.cb_submitted.store(false, Ordering::Release);

        if internal.cb_fixed.load(Ordering::Acquire) {
            return;
        }

        let mut state = internal.cb_state.lock().unwrap();

        internal.release_references(&mut state);

        // uniform buffers go back to their stage pools
        for (stage, ub) in state.cb_bound_ubs.drain(..) {
            match stage {
                ShaderStage::Vertex => self.r_vertex_ub_pool.reclaim(ub),
                ShaderStage::Fragment => self.r_fragment_ub_pool.reclaim(ub),
                ShaderStage::Compute => self.r_compute_ub_pool.reclaim(ub),
            }
        }
        if let Some(ub) = state.cb_vertex_ub.take() {
            self.r_vertex_ub_pool.reclaim(ub);
        }
        if let Some(ub) = state.cb_fragment_ub.take() {
            self.r_fragment_ub_pool.reclaim(ub);
        }
        if let Some(ub) = state.cb_compute_ub.take() {
            self.r_compute_ub_pool.reclaim(ub);
        }

        // descriptor sets recycle into their caches
        for (cache, set) in state.cb_set_returns.drain(..) {
            cache.return_set(set);
        }

        // staging buffers reset and return to the pool
        for transfer in state.cb_transfer_bufs.drain(..) {
            self.r_transfer_pool.reclaim(transfer);
        }

        *state = CbufState::new();
        drop(state);

        let mut pools = self.r_cmd_pools.lock().unwrap();
        if let Some(pool) = pools.get_mut(&internal.cb_thread) {
            pool.cp_inactive.push(internal.clone());
        }
    }

    /// Free queue-destroyed resources nothing references anymore
    fn run_pending_destroys(&self) {
        let render_targets = &self.r_render_targets;
        let framebuffers = &self.r_framebuffers;

        self.r_destroys.sweep(|texture| {
            // tear down every view and framebuffer built on this
            // texture before its image goes away
            let mut dead_views = render_targets.invalidate_texture(texture.t_image);
            dead_views.push(texture.t_view);
            framebuffers.invalidate_views(&dead_views);
        });
    }

    // ------------------------------------------------------------------
    // Deferred destroys
    // ------------------------------------------------------------------

    pub fn queue_destroy_buffer(&self, buffer: Buffer) {
        self.r_destroys.push_buffer(buffer.b_internal);
    }

    pub fn queue_destroy_texture(&self, texture: Texture) {
        self.r_destroys.push_texture(texture.t_internal);
    }

    pub fn queue_destroy_sampler(&self, sampler: Sampler) {
        self.r_destroys.push_sampler(sampler.s_internal);
    }

    pub fn queue_destroy_shader_module(&self, shader: ShaderModule) {
        self.r_destroys.push_shader(shader.sm_internal);
    }

    pub fn queue_destroy_graphics_pipeline(&self, pipeline: GraphicsPipeline) {
        self.r_destroys.push_graphics_pipeline(pipeline.p_internal);
    }

    pub fn queue_destroy_compute_pipeline(&self, pipeline: ComputePipeline) {
        self.r_destroys.push_compute_pipeline(pipeline.p_internal);
    }

    // ------------------------------------------------------------------
    // Readback
    // ------------------------------------------------------------------

    /// Synchronously copy the front of `buffer` into `out`
    ///
    /// Records a copy to staging on a fresh command buffer, submits
    /// it, and waits for everything in flight.
    pub fn get_buffer_data(&self, buffer: &Buffer, out: &mut [u8]) -> Result<()> {
        let cbuf = self.acquire_command_buffer(false)?;
        let vk_cbuf = cbuf.cb_internal.cb_cbuf;

        // the staging buffer stays off the command buffer's transfer
        // list so reclamation cannot reset it before we read it
        let staging = self
            .r_transfer_pool
            .acquire(&self.r_dev, out.len() as u64)?;
        let offset = staging.reserve(out.len() as u64).unwrap();

        {
            let mut state = cbuf.cb_internal.cb_state.lock().unwrap();
            crate::cbuf::track(&mut state.cb_used_buffers, &buffer.b_internal);
        }

        self.transition_buffer(vk_cbuf, &buffer.b_internal, AccessKind::TRANSFER_READ);

        let region = vk::BufferCopy::builder()
            .src_offset(0)
            .dst_offset(offset)
            .size(out.len() as u64)
            .build();
        unsafe {
            self.r_dev.dev.cmd_copy_buffer(
                vk_cbuf,
                buffer.b_internal.b_buffer,
                staging.tb_buffer,
                &[region],
            );
        }

        self.transition_buffer(vk_cbuf, &buffer.b_internal, buffer.b_internal.default_access());

        self.submit(&[cbuf])?;
        self.wait();

        staging.read(offset, out);
        self.r_transfer_pool.reclaim(staging);

        Ok(())
    }
}

impl Drop for Renderer {
    fn drop(&mut self) {
        // drain the GPU first, then free in rough reverse creation order
        self.wait();
        self.r_dev.wait_idle();

        {
            let mut windows = self.r_windows.lock().unwrap();
            for (_, data) in windows.drain() {
                if let Some(swapchain) = data.wd_swapchain {
                    self.destroy_swapchain_data(swapchain);
                }
                unsafe { self.r_surface_loader.destroy_surface(data.wd_surface, None) };
            }
        }

        self.run_pending_destroys();

        self.r_render_targets.destroy();
        self.r_framebuffers.destroy();
        self.r_render_passes.destroy(&self.r_dev.dev);

        self.r_vertex_ub_pool.destroy(&self.r_dev.dev);
        self.r_fragment_ub_pool.destroy(&self.r_dev.dev);
        self.r_compute_ub_pool.destroy(&self.r_dev.dev);

        self.r_pipeline_layouts.destroy(&self.r_dev.dev);
        self.r_desc_layouts.destroy(&self.r_dev.dev);
        unsafe {
            self.r_dev
                .dev
                .destroy_descriptor_pool(self.r_empty_desc_pool, None);
        }

        let mut pools = self.r_cmd_pools.lock().unwrap();
        for (_, pool) in pools.drain() {
            // the fences die with the CommandBufferInternal Arcs
            drop(pool.cp_inactive);
            unsafe { self.r_dev.dev.destroy_command_pool(pool.cp_pool, None) };
        }
    }
}

impl Renderer {
    pub(crate) fn register_window(&self, data: WindowData) -> u64 {
        let id = self.r_next_window.fetch_add(1, Ordering::AcqRel);
        self.r_windows.lock().unwrap().insert(id, data);
        id
    }

    pub(crate) fn take_window(&self, id: u64) -> Option<WindowData> {
        self.r_windows.lock().unwrap().remove(&id)
    }

    pub(crate) fn with_window<R>(
        &self,
        id: u64,
        f: impl FnOnce(&mut WindowData) -> Result<R>,
    ) -> Result<R> {
        let mut windows = self.r_windows.lock().unwrap();
        let data = windows.get_mut(&id).ok_or(SquallError::WINDOW_NOT_CLAIMED)?;
        f(data)
    }
}
