// Textures and samplers
//
// A Texture wraps a vkImage and the one view covering all of it.
// Swapchain images are wrapped in the same type, minus the memory
// region, so render passes and barriers treat them uniformly.

use ash::vk;

use crate::access::AccessKind;
use crate::device::Device;
use crate::memory::Allocation;
use crate::types::{SamplerCreateInfo, TextureCreateInfo, TextureFormat, TextureUsage};
use crate::{Result, SquallError};
use utils::log;

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;

pub(crate) struct TextureInternal {
    t_dev: Arc<Device>,
    pub t_image: vk::Image,
    pub t_view: vk::ImageView,
    /// None for swapchain images, whose memory the swapchain owns
    t_alloc: Option<Allocation>,
    pub t_width: u32,
    pub t_height: u32,
    pub t_depth: u32,
    pub t_layer_count: u32,
    pub t_level_count: u32,
    pub t_format: TextureFormat,
    pub t_usage: TextureUsage,
    pub t_is_cube: bool,
    pub t_is_3d: bool,
    /// Current AccessKind, mutated only by the recording command buffer
    pub t_access: AtomicU8,
    /// Number of command buffers currently referencing us
    pub t_refcount: AtomicU32,
    /// Swapchain images are destroyed with their swapchain, not here
    t_owns_image: bool,
}

impl TextureInternal {
    pub fn new(dev: Arc<Device>, info: &TextureCreateInfo) -> Result<Arc<Self>> {
        let layer_count = if info.is_cube { 6 } else { 1 };
        let is_3d = info.depth > 1;

        if info.is_cube && (is_3d || info.width != info.height) {
            log::error!("Cube textures must be square and two dimensional");
            return Err(SquallError::INVALID);
        }

        let image_type = if is_3d {
            vk::ImageType::TYPE_3D
        } else {
            vk::ImageType::TYPE_2D
        };
        let flags = if info.is_cube {
            vk::ImageCreateFlags::CUBE_COMPATIBLE
        } else if is_3d {
            // render targets carve 2D slice views out of 3D images
            vk::ImageCreateFlags::TYPE_2D_ARRAY_COMPATIBLE
        } else {
            vk::ImageCreateFlags::empty()
        };

        let create_info = vk::ImageCreateInfo::builder()
            .flags(flags)
            .image_type(image_type)
            .format(info.format.to_vk())
            .extent(vk::Extent3D {
                width: info.width,
                height: info.height,
                depth: std::cmp::max(info.depth, 1),
            })
            .mip_levels(info.level_count)
            .array_layers(layer_count)
            .samples(vk::SampleCountFlags::TYPE_1)
            .tiling(vk::ImageTiling::OPTIMAL)
            .usage(info.usage.to_vk())
            .sharing_mode(vk::SharingMode::EXCLUSIVE);

        let image = unsafe {
            dev.dev.create_image(&create_info, None).or_else(|e| {
                log::error!("vkCreateImage failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        let alloc = dev
            .alloc_bind_image(image, vk::MemoryPropertyFlags::DEVICE_LOCAL, false)
            .map_err(|e| {
                unsafe { dev.dev.destroy_image(image, None) };
                e
            })?;

        let view_type = if info.is_cube {
            vk::ImageViewType::CUBE
        } else if is_3d {
            vk::ImageViewType::TYPE_3D
        } else {
            vk::ImageViewType::TYPE_2D
        };

        let view_info = vk::ImageViewCreateInfo::builder()
            .subresource_range(
                vk::ImageSubresourceRange::builder()
                    .aspect_mask(info.format.aspect_mask())
                    .base_mip_level(0)
                    .level_count(info.level_count)
                    .base_array_layer(0)
                    .layer_count(layer_count)
                    .build(),
            )
            .image(image)
            .format(info.format.to_vk())
            .view_type(view_type);

        let view = unsafe {
            dev.dev.create_image_view(&view_info, None).or_else(|e| {
                log::error!("vkCreateImageView failed: {:?}", e);
                dev.dev.destroy_image(image, None);
                dev.d_allocator.free(&dev.dev, &alloc);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        Ok(Arc::new(Self {
            t_dev: dev,
            t_image: image,
            t_view: view,
            t_alloc: Some(alloc),
            t_width: info.width,
            t_height: info.height,
            t_depth: std::cmp::max(info.depth, 1),
            t_layer_count: layer_count,
            t_level_count: info.level_count,
            t_format: info.format,
            t_usage: info.usage,
            t_is_cube: info.is_cube,
            t_is_3d: is_3d,
            t_access: AtomicU8::new(AccessKind::NONE as u8),
            t_refcount: AtomicU32::new(0),
            t_owns_image: true,
        }))
    }

    /// Wrap one image of a swapchain
    ///
    /// Only the view belongs to us. The image is the swapchain's and
    /// dies with it.
    pub fn from_swapchain_image(
        dev: Arc<Device>,
        image: vk::Image,
        vk_format: vk::Format,
        swizzle: vk::ComponentMapping,
        extent: vk::Extent2D,
    ) -> Result<Arc<Self>> {
        let view_info = vk::ImageViewCreateInfo::builder()
            .view_type(vk::ImageViewType::TYPE_2D)
            .format(vk_format)
            .components(swizzle)
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
                log::error!("vkCreateImageView failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        // Squall only creates swapchains in these two formats
        let format = if vk_format == vk::Format::B8G8R8A8_UNORM {
            TextureFormat::B8G8R8A8
        } else {
            TextureFormat::R8G8B8A8
        };

        Ok(Arc::new(Self {
            t_dev: dev,
            t_image: image,
            t_view: view,
            t_alloc: None,
            t_width: extent.width,
            t_height: extent.height,
            t_depth: 1,
            t_layer_count: 1,
            t_level_count: 1,
            t_format: format,
            t_usage: TextureUsage::COLOR_TARGET,
            t_is_cube: false,
            t_is_3d: false,
            t_access: AtomicU8::new(AccessKind::NONE as u8),
            t_refcount: AtomicU32::new(0),
            t_owns_image: false,
        }))
    }

    pub fn get_access(&self) -> AccessKind {
        AccessKind::from_raw(self.t_access.load(Ordering::Acquire))
    }

    pub fn set_access(&self, kind: AccessKind) {
        self.t_access.store(kind as u8, Ordering::Release);
    }

    pub(crate) fn aspect_mask(&self) -> vk::ImageAspectFlags {
        self.t_format.aspect_mask()
    }
}

impl Drop for TextureInternal {
    fn drop(&mut self) {
        unsafe {
            self.t_dev.dev.destroy_image_view(self.t_view, None);
            if self.t_owns_image {
                self.t_dev.dev.destroy_image(self.t_image, None);
            }
        }
        if let Some(alloc) = self.t_alloc.as_ref() {
            self.t_dev.d_allocator.free(&self.t_dev.dev, alloc);
        }
    }
}

/// A texture
///
/// Contents are undefined until data is uploaded or a render pass
/// writes to it.
#[derive(Clone)]
pub struct Texture {
    pub(crate) t_internal: Arc<TextureInternal>,
}

impl Texture {
    pub fn width(&self) -> u32 {
        self.t_internal.t_width
    }

    pub fn height(&self) -> u32 {
        self.t_internal.t_height
    }

    pub fn format(&self) -> TextureFormat {
        self.t_internal.t_format
    }

    pub fn usage(&self) -> TextureUsage {
        self.t_internal.t_usage
    }

    pub fn depth(&self) -> u32 {
        self.t_internal.t_depth
    }

    pub fn level_count(&self) -> u32 {
        self.t_internal.t_level_count
    }

    pub fn layer_count(&self) -> u32 {
        self.t_internal.t_layer_count
    }

    pub fn is_cube(&self) -> bool {
        self.t_internal.t_is_cube
    }
}

pub(crate) struct SamplerInternal {
    s_dev: Arc<Device>,
    pub s_sampler: vk::Sampler,
    pub s_refcount: AtomicU32,
}

impl SamplerInternal {
    pub fn new(dev: Arc<Device>, info: &SamplerCreateInfo) -> Result<Arc<Self>> {
        let create_info = vk::SamplerCreateInfo::builder()
            .mag_filter(info.mag_filter.to_vk())
            .min_filter(info.min_filter.to_vk())
            .mipmap_mode(info.mipmap_mode.to_vk())
            .address_mode_u(info.address_mode_u.to_vk())
            .address_mode_v(info.address_mode_v.to_vk())
            .address_mode_w(info.address_mode_w.to_vk())
            .mip_lod_bias(info.mip_lod_bias)
            .anisotropy_enable(info.anisotropy_enable)
            .max_anisotropy(info.max_anisotropy)
            .compare_enable(info.compare_enable)
            .compare_op(info.compare_op.to_vk())
            .min_lod(info.min_lod)
            .max_lod(info.max_lod)
            .border_color(info.border_color.to_vk())
            .unnormalized_coordinates(false);

        let sampler = unsafe {
            dev.dev.create_sampler(&create_info, None).or_else(|e| {
                log::error!("vkCreateSampler failed: {:?}", e);
                Err(SquallError::COULD_NOT_CREATE_OBJECT)
            })?
        };

        Ok(Arc::new(Self {
            s_dev: dev,
            s_sampler: sampler,
            s_refcount: AtomicU32::new(0),
        }))
    }
}

impl Drop for SamplerInternal {
    fn drop(&mut self) {
        unsafe {
            self.s_dev.dev.destroy_sampler(self.s_sampler, None);
        }
    }
}

#[derive(Clone)]
pub struct Sampler {
    pub(crate) s_internal: Arc<SamplerInternal>,
}
