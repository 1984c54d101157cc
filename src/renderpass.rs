// Render pass, framebuffer, and render target caches
//
// All three are keyed structurally and created on miss. Render passes
// live for the renderer's lifetime. Framebuffers are refcounted by the
// command buffers that use them and are torn down eagerly when an
// attachment's texture dies, along with every render target view of
// that texture.

use ash::vk;

use crate::access::AccessKind;
use crate::device::Device;
use crate::image::TextureInternal;
use crate::memory::Allocation;
use crate::{Result, SquallError};
use utils::log;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU8};
use std::sync::{Arc, Mutex};

/// One color attachment's contribution to a render pass key
///
/// Equality is structural over every field, including the bits of
/// every clear channel.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderPassColorKey {
    pub rp_format: vk::Format,
    pub rp_load: vk::AttachmentLoadOp,
    pub rp_store: vk::AttachmentStoreOp,
    /// f32::to_bits of each clear channel
    pub rp_clear: [u32; 4],
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderPassDepthKey {
    pub rp_format: vk::Format,
    pub rp_load: vk::AttachmentLoadOp,
    pub rp_store: vk::AttachmentStoreOp,
    pub rp_stencil_load: vk::AttachmentLoadOp,
    pub rp_stencil_store: vk::AttachmentStoreOp,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderPassKey {
    pub rp_colors: Vec<RenderPassColorKey>,
    pub rp_depth: Option<RenderPassDepthKey>,
    pub rp_samples: vk::SampleCountFlags,
}

impl RenderPassKey {
    fn is_msaa(&self) -> bool {
        self.rp_samples != vk::SampleCountFlags::TYPE_1
    }
}

/// Framebuffers are identified by the exact views they bind
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct FramebufferKey {
    pub fb_colors: Vec<vk::ImageView>,
    /// Parallel to fb_colors; null when the pass is single sampled
    pub fb_msaa: Vec<vk::ImageView>,
    pub fb_depth: vk::ImageView,
    pub fb_width: u32,
    pub fb_height: u32,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub(crate) struct RenderTargetKey {
    pub rt_image: vk::Image,
    pub rt_depth: u32,
    pub rt_layer: u32,
    pub rt_level: u32,
    pub rt_samples: vk::SampleCountFlags,
}

/// The multisample sidecar image owned by an MSAA render target
pub(crate) struct MsaaTarget {
    pub mt_image: vk::Image,
    pub mt_view: vk::ImageView,
    mt_alloc: Allocation,
    /// Access kind of the sidecar, tracked like any other image
    pub mt_access: AtomicU8,
}

/// A cached per-subresource attachment view
///
/// For MSAA targets rendering happens into the sidecar, which the
/// render pass resolves into the base texture on store.
pub(crate) struct RenderTarget {
    rt_dev: Arc<Device>,
    pub rt_view: vk::ImageView,
    pub rt_msaa: Option<MsaaTarget>,
}

impl RenderTarget {
    fn new(
        dev: Arc<Device>,
        texture: &TextureInternal,
        key: &RenderTargetKey,
    ) -> Result<Arc<Self>> {
        // 3D textures select their slice with the depth coordinate
        let base_layer = if texture.t_is_3d {
            key.rt_depth
        } else {
            key.rt_layer
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(texture.t_format.to_vk())
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(texture.aspect_mask())
                    .base_mip_level(key.rt_level)
                    .level_count(1)
                    .base_array_layer(base_layer)
                    .layer_count(1)
                    .build(),
            )
            .image(texture.t_image);

        let view = unsafe {
            dev.dev.create_image_view(&view_info, None).or_else(|e| {
                log::error!("vkCreateImageView failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let msaa = if key.rt_samples != vk::SampleCountFlags::TYPE_1 {
            match Self::create_msaa_target(&dev, texture, key) {
                Ok(m) => Some(m),
                Err(e) => {
                    unsafe { dev.dev.destroy_image_view(view, None) };
                    return Err(e);
                }
            }
        } else {
            None
        };

        Ok(Arc::new(Self {
            rt_dev: dev,
            rt_view: view,
            rt_msaa: msaa,
        }))
    }

    fn create_msaa_target(
        dev: &Arc<Device>,
        texture: &TextureInternal,
        key: &RenderTargetKey,
    ) -> Result<MsaaTarget> {
        let width = std::cmp::max(texture.t_width >> key.rt_level, 1);
        let height = std::cmp::max(texture.t_height >> key.rt_level, 1);

        let create_info = vk::ImageCreateInfo::builder()
            .image_type(vk::ImageType::TYPE_2D)
            .format(texture.t_format.to_vk())
            .extent(vk::Extent3D {
                width,
                height,
                depth: 1,
            })
            .mip_levels(1)
            .array_layers(1)
            .samples(key.rt_samples)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(vk::ImageUsageFlags::COLOR_ATTACHMENT)
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            dev.dev.create_image(&create_info, None).or_else(|e| {
                log::error!("vkCreateImage for multisample target failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let alloc = dev
            .alloc_bind_image(image, vk::MemoryPropertyFlags::DEVICE_LOCAL, false)
            .map_err(|e| {
                unsafe { dev.dev.destroy_image(image, None) };
                e
            })?;

        let view_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(texture.t_format.to_vk())
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(vk::ImageAspectFlags::COLOR)
                    .base_mip_level(0)
                    .level_count(1)
                    .base_array_layer(0)
                    .layer_count(1)
                    .build(),
            )
            .image(image);

        let view = unsafe {
            dev.dev.create_image_view(&view_info, None).or_else(|e| {
                log::error!("vkCreateImageView for multisample target failed: {:?}", e);
                dev.dev.destroy_image(image, None);
                dev.d_allocator.free(&dev.dev, &alloc);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        Ok(MsaaTarget {
            mt_image: image,
            mt_view: view,
            mt_alloc: alloc,
            mt_access: AtomicU8::new(AccessKind::NONE as u8),
        })
    }
}

impl Drop for RenderTarget {
    fn drop(&mut self) {
        unsafe {
            self.rt_dev.dev.destroy_image_view(self.rt_view, None);
            if let Some(msaa) = self.rt_msaa.as_ref() {
                self.rt_dev.dev.destroy_image_view(msaa.mt_view, None);
                self.rt_dev.dev.destroy_image(msaa.mt_image, None);
                self.rt_dev.d_allocator.free(&self.rt_dev.dev, &msaa.mt_alloc);
            }
        }
    }
}

pub(crate) struct FramebufferInternal {
    f_dev: Arc<Device>,
    pub f_framebuffer: vk::Framebuffer,
    /// Every view the framebuffer binds, for invalidation scans
    pub f_views: Vec<vk::ImageView>,
    pub f_refcount: AtomicU32,
}

impl Drop for FramebufferInternal {
    fn drop(&mut self) {
        unsafe {
            self.f_dev.dev.destroy_framebuffer(self.f_framebuffer, None);
        }
    }
}

pub(crate) struct RenderPassCache {
    rc_passes: Mutex<HashMap<RenderPassKey, vk::RenderPass>>,
}

impl RenderPassCache {
    pub fn new() -> Self {
        Self {
            rc_passes: Mutex::new(HashMap::new()),
        }
    }

    /// Two structurally equal keys always yield the same handle
    pub fn fetch(&self, dev: &ash::Device, key: &RenderPassKey) -> Result<vk::RenderPass> {
        let mut passes = self.rc_passes.lock().unwrap();

        if let Some(pass) = passes.get(key) {
            return Ok(*pass);
        }

        let pass = Self::create_pass(dev, key)?;
        passes.insert(key.clone(), pass);
        Ok(pass)
    }

    /// Build a vkRenderPass matching `key`
    ///
    /// Attachments are ordered [color0, msaa0?, color1, msaa1?, ...,
    /// depth], which is also the order clear values are pushed in at
    /// begin time. With MSAA the sidecar is the rendered attachment
    /// and the base view is its resolve destination.
    fn create_pass(dev: &ash::Device, key: &RenderPassKey) -> Result<vk::RenderPass> {
        let mut attachments = Vec::new();
        let mut color_refs = Vec::new();
        let mut resolve_refs = Vec::new();

        for color in key.rp_colors.iter() {
            if key.is_msaa() {
                // resolve destination first to keep the documented order
                attachments.push(
                    vk::AttachmentDescription::builder()
                        .format(color.rp_format)
                        .samples(vk::SampleCountFlags::TYPE_1)
                        .load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .store_op(color.rp_store)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
                resolve_refs.push(
                    vk::AttachmentReference::builder()
                        .attachment((attachments.len() - 1) as u32)
                        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );

                attachments.push(
                    vk::AttachmentDescription::builder()
                        .format(color.rp_format)
                        .samples(key.rp_samples)
                        .load_op(color.rp_load)
                        .store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
                color_refs.push(
                    vk::AttachmentReference::builder()
                        .attachment((attachments.len() - 1) as u32)
                        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
            } else {
                attachments.push(
                    vk::AttachmentDescription::builder()
                        .format(color.rp_format)
                        .samples(vk::SampleCountFlags::TYPE_1)
                        .load_op(color.rp_load)
                        .store_op(color.rp_store)
                        .stencil_load_op(vk::AttachmentLoadOp::DONT_CARE)
                        .stencil_store_op(vk::AttachmentStoreOp::DONT_CARE)
                        .initial_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .final_layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
                color_refs.push(
                    vk::AttachmentReference::builder()
                        .attachment((attachments.len() - 1) as u32)
                        .layout(vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL)
                        .build(),
                );
            }
        }

        let depth_ref = key.rp_depth.as_ref().map(|depth| {
            attachments.push(
                vk::AttachmentDescription::builder()
                    .format(depth.rp_format)
                    .samples(vk::SampleCountFlags::TYPE_1)
                    .load_op(depth.rp_load)
                    .store_op(depth.rp_store)
                    .stencil_load_op(depth.rp_stencil_load)
                    .stencil_store_op(depth.rp_stencil_store)
                    .initial_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .final_layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                    .build(),
            );
            vk::AttachmentReference::builder()
                .attachment((attachments.len() - 1) as u32)
                .layout(vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL)
                .build()
        });

        let mut subpass = vk::SubpassDescription::builder()
            .pipeline_bind_point(vk::PipelineBindPoint::GRAPHICS)
            .color_attachments(&color_refs);
        if key.is_msaa() {
            subpass = subpass.resolve_attachments(&resolve_refs);
        }
        if let Some(depth_ref) = depth_ref.as_ref() {
            subpass = subpass.depth_stencil_attachment(depth_ref);
        }
        let subpasses = [subpass.build()];

        let create_info = vk::RenderPassCreateInfo::builder()
            .attachments(&attachments)
            .subpasses(&subpasses)
            .build();

        unsafe {
            dev.create_render_pass(&create_info, None).or_else(|e| {
                log::error!("vkCreateRenderPass failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })
        }
    }

    pub fn destroy(&self, dev: &ash::Device) {
        let mut passes = self.rc_passes.lock().unwrap();
        for (_, pass) in passes.drain() {
            unsafe { dev.destroy_render_pass(pass, None) };
        }
    }
}

pub(crate) struct FramebufferCache {
    fc_framebuffers: Mutex<HashMap<FramebufferKey, Arc<FramebufferInternal>>>,
}

impl FramebufferCache {
    pub fn new() -> Self {
        Self {
            fc_framebuffers: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetch(
        &self,
        dev: &Arc<Device>,
        key: &FramebufferKey,
        render_pass: vk::RenderPass,
    ) -> Result<Arc<FramebufferInternal>> {
        let mut framebuffers = self.fc_framebuffers.lock().unwrap();

        if let Some(fb) = framebuffers.get(key) {
            return Ok(fb.clone());
        }

        // view order must match the render pass attachment order
        let mut views = Vec::new();
        for (i, color) in key.fb_colors.iter().enumerate() {
            views.push(*color);
            if key.fb_msaa[i] != vk::ImageView::null() {
                views.push(key.fb_msaa[i]);
            }
        }
        if key.fb_depth != vk::ImageView::null() {
            views.push(key.fb_depth);
        }

        let create_info = vk::FramebufferCreateInfo::builder()
            .render_pass(render_pass)
            .attachments(&views)
            .width(key.fb_width)
            .height(key.fb_height)
            .layers(1)
            .build();

        let fb = unsafe {
            dev.dev.create_framebuffer(&create_info, None).or_else(|e| {
                log::error!("vkCreateFramebuffer failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let internal = Arc::new(FramebufferInternal {
            f_dev: dev.clone(),
            f_framebuffer: fb,
            f_views: views,
            f_refcount: AtomicU32::new(0),
        });
        framebuffers.insert(key.clone(), internal.clone());

        Ok(internal)
    }

    /// Drop every cached framebuffer that binds one of `views`
    ///
    /// In-flight command buffers keep their framebuffers alive through
    /// their own references; this only severs the cache's.
    pub fn invalidate_views(&self, views: &[vk::ImageView]) {
        let mut framebuffers = self.fc_framebuffers.lock().unwrap();
        framebuffers.retain(|_, fb| !fb.f_views.iter().any(|v| views.contains(v)));
    }

    pub fn destroy(&self) {
        self.fc_framebuffers.lock().unwrap().clear();
    }
}

pub(crate) struct RenderTargetCache {
    tc_targets: Mutex<HashMap<RenderTargetKey, Arc<RenderTarget>>>,
}

impl RenderTargetCache {
    pub fn new() -> Self {
        Self {
            tc_targets: Mutex::new(HashMap::new()),
        }
    }

    pub fn fetch(
        &self,
        dev: &Arc<Device>,
        texture: &TextureInternal,
        key: &RenderTargetKey,
    ) -> Result<Arc<RenderTarget>> {
        let mut targets = self.tc_targets.lock().unwrap();

        if let Some(target) = targets.get(key) {
            return Ok(target.clone());
        }

        let target = RenderTarget::new(dev.clone(), texture, key)?;
        targets.insert(*key, target.clone());

        Ok(target)
    }

    /// Remove every target viewing `image`, returning the views that
    /// framebuffers may still reference so the caller can purge them.
    pub fn invalidate_texture(&self, image: vk::Image) -> Vec<vk::ImageView> {
        let mut targets = self.tc_targets.lock().unwrap();
        let mut dead_views = Vec::new();

        targets.retain(|key, target| {
            if key.rt_image != image {
                return true;
            }
            dead_views.push(target.rt_view);
            if let Some(msaa) = target.rt_msaa.as_ref() {
                dead_views.push(msaa.mt_view);
            }
            false
        });

        dead_views
    }

    pub fn destroy(&self) {
        self.tc_targets.lock().unwrap().clear();
    }
}

/// A throwaway render pass used only at pipeline creation
///
/// Pipelines need a compatible pass; load and store ops do not affect
/// compatibility so they are DONT_CARE here, and the pass is destroyed
/// as soon as the pipeline exists.
pub(crate) fn create_compatible_render_pass(
    dev: &ash::Device,
    color_formats: &[vk::Format],
    samples: vk::SampleCountFlags,
    depth_format: Option<vk::Format>,
) -> Result<vk::RenderPass> {
    let key = RenderPassKey {
        rp_colors: color_formats
            .iter()
            .map(|f| RenderPassColorKey {
                rp_format: *f,
                rp_load: vk::AttachmentLoadOp::DONT_CARE,
                rp_store: vk::AttachmentStoreOp::DONT_CARE,
                rp_clear: [0; 4],
            })
            .collect(),
        rp_depth: depth_format.map(|f| RenderPassDepthKey {
            rp_format: f,
            rp_load: vk::AttachmentLoadOp::DONT_CARE,
            rp_store: vk::AttachmentStoreOp::DONT_CARE,
            rp_stencil_load: vk::AttachmentLoadOp::DONT_CARE,
            rp_stencil_store: vk::AttachmentStoreOp::DONT_CARE,
        }),
        rp_samples: samples,
    };

    RenderPassCache::create_pass(dev, &key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn color_key(clear: [f32; 4]) -> RenderPassColorKey {
        RenderPassColorKey {
            rp_format: vk::Format::R8G8B8A8_UNORM,
            rp_load: vk::AttachmentLoadOp::CLEAR,
            rp_store: vk::AttachmentStoreOp::STORE,
            rp_clear: [
                clear[0].to_bits(),
                clear[1].to_bits(),
                clear[2].to_bits(),
                clear[3].to_bits(),
            ],
        }
    }

    #[test]
    fn render_pass_keys_are_structural() {
        let a = RenderPassKey {
            rp_colors: vec![color_key([0.25, 0.5, 0.75, 1.0])],
            rp_depth: None,
            rp_samples: vk::SampleCountFlags::TYPE_1,
        };
        let b = RenderPassKey {
            rp_colors: vec![color_key([0.25, 0.5, 0.75, 1.0])],
            rp_depth: None,
            rp_samples: vk::SampleCountFlags::TYPE_1,
        };
        assert_eq!(a, b);

        let mut map = HashMap::new();
        map.insert(a, 1u32);
        assert_eq!(map.get(&b), Some(&1));
    }

    #[test]
    fn clear_color_bits_participate_in_equality() {
        let a = RenderPassKey {
            rp_colors: vec![color_key([0.25, 0.5, 0.75, 1.0])],
            rp_depth: None,
            rp_samples: vk::SampleCountFlags::TYPE_1,
        };
        let b = RenderPassKey {
            rp_colors: vec![color_key([0.25, 0.5, 0.75, 0.0])],
            rp_depth: None,
            rp_samples: vk::SampleCountFlags::TYPE_1,
        };
        assert_ne!(a, b);
    }

    #[test]
    fn framebuffer_keys_compare_views_and_extent() {
        let view_a = vk::ImageView::null();

        let a = FramebufferKey {
            fb_colors: vec![view_a],
            fb_msaa: vec![vk::ImageView::null()],
            fb_depth: vk::ImageView::null(),
            fb_width: 640,
            fb_height: 480,
        };
        let mut b = a.clone();
        assert_eq!(a, b);

        b.fb_width = 320;
        assert_ne!(a, b);
    }
}
