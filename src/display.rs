// Window claiming and swapchains
//
// Each claimed window owns a surface and a swapchain with one
// image-available and one render-finished semaphore. Acquire hands a
// swapchain image back as an ordinary Texture and registers the
// present on the recording command buffer; the actual present happens
// at submit.

use ash::extensions::khr;
use ash::vk;

use crate::access::AccessKind;
use crate::cbuf::{track, CommandBuffer, PresentIntent};
use crate::image::TextureInternal;
use crate::renderer::{CreateInfo, Renderer};
use crate::types::{PresentMode, TextureFormat};
use crate::{Result, SquallError, Texture};
use utils::log;

use std::ffi::CStr;
use std::marker::PhantomData;
use std::sync::Arc;

/// A claimed window
///
/// Returned by claim_window and passed to the swapchain operations.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub struct Window(pub(crate) u64);

/// The medium a claimed window presents on
pub enum SurfaceType<'a> {
    /// Present to an SDL2 window
    #[cfg(feature = "sdl")]
    SDL2(&'a sdl2::video::Window),
    /// No window system; only offscreen rendering is possible
    Headless(PhantomData<&'a ()>),
}

/// One window system's surface plumbing
///
/// This is the only part of the crate that knows how to talk to the
/// windowing library.
pub(crate) trait Backend: Send {
    fn create_surface(
        &self,
        entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> Result<vk::SurfaceKHR>;

    /// Size of the window's drawable area in pixels
    fn drawable_size(&self) -> (u32, u32);

    fn is_minimized(&self) -> bool;
}

#[cfg(feature = "sdl")]
struct Sdl2Backend {
    sb_window: *mut sdl2::sys::SDL_Window,
}

#[cfg(feature = "sdl")]
unsafe impl Send for Sdl2Backend {}

#[cfg(feature = "sdl")]
impl Backend for Sdl2Backend {
    fn create_surface(
        &self,
        _entry: &ash::Entry,
        inst: &ash::Instance,
    ) -> Result<vk::SurfaceKHR> {
        let mut surface: sdl2::sys::VkSurfaceKHR = 0;
        let ok = unsafe {
            sdl2::sys::SDL_Vulkan_CreateSurface(
                self.sb_window,
                inst.handle().as_raw() as sdl2::sys::VkInstance,
                &mut surface,
            )
        };

        if ok == sdl2::sys::SDL_bool::SDL_FALSE {
            log::error!("SDL_Vulkan_CreateSurface failed");
            return Err(SquallError::VK_SURF_NOT_SUPPORTED);
        }

        Ok(vk::SurfaceKHR::from_raw(surface))
    }

    fn drawable_size(&self) -> (u32, u32) {
        let mut w: i32 = 0;
        let mut h: i32 = 0;
        unsafe { sdl2::sys::SDL_Vulkan_GetDrawableSize(self.sb_window, &mut w, &mut h) };

        (w as u32, h as u32)
    }

    fn is_minimized(&self) -> bool {
        let flags = unsafe { sdl2::sys::SDL_GetWindowFlags(self.sb_window) };
        flags & sdl2::sys::SDL_WindowFlags::SDL_WINDOW_MINIMIZED as u32 != 0
    }
}

/// The instance extensions needed to present on this platform
///
/// Only extensions the loader actually reports are enabled, so
/// running on a surface-less driver still gets a usable instance.
pub(crate) fn extension_names(info: &CreateInfo, entry: &ash::Entry) -> Vec<*const i8> {
    if info.headless {
        return Vec::new();
    }

    let wanted: Vec<&CStr> = vec![
        khr::Surface::name(),
        #[cfg(target_os = "linux")]
        khr::XlibSurface::name(),
        #[cfg(target_os = "linux")]
        khr::XcbSurface::name(),
        #[cfg(target_os = "linux")]
        khr::WaylandSurface::name(),
        #[cfg(target_os = "windows")]
        khr::Win32Surface::name(),
    ];

    let supported = entry
        .enumerate_instance_extension_properties(None)
        .unwrap_or_default();

    wanted
        .into_iter()
        .filter(|want| {
            supported.iter().any(|ext| {
                (unsafe { CStr::from_ptr(ext.extension_name.as_ptr()) }) == *want
            })
        })
        .map(|name| name.as_ptr())
        .collect()
}

/// Pick the swapchain image count: one more than the minimum, at
/// least three for mailbox, clamped to the surface maximum.
pub(crate) fn select_image_count(
    caps: &vk::SurfaceCapabilitiesKHR,
    present_mode: vk::PresentModeKHR,
) -> u32 {
    let mut count = caps.min_image_count + 1;
    if present_mode == vk::PresentModeKHR::MAILBOX {
        count = std::cmp::max(count, 3);
    }
    if caps.max_image_count > 0 {
        count = std::cmp::min(count, caps.max_image_count);
    }

    count
}

/// Clamp the window's drawable size to what the surface allows
pub(crate) fn clamp_extent(
    caps: &vk::SurfaceCapabilitiesKHR,
    drawable: (u32, u32),
) -> vk::Extent2D {
    // the surface dictates the extent unless it leaves it unset
    if caps.current_extent.width != u32::MAX {
        return caps.current_extent;
    }

    vk::Extent2D {
        width: drawable
            .0
            .clamp(caps.min_image_extent.width, caps.max_image_extent.width),
        height: drawable
            .1
            .clamp(caps.min_image_extent.height, caps.max_image_extent.height),
    }
}

pub(crate) struct SwapchainData {
    pub sc_swapchain: vk::SwapchainKHR,
    pub sc_format: vk::Format,
    pub sc_extent: vk::Extent2D,
    pub sc_textures: Vec<Arc<TextureInternal>>,
    /// Signaled by acquire, waited on by the submit that renders
    pub sc_image_available: vk::Semaphore,
    /// Signaled by the submit, waited on by the present
    pub sc_render_finished: vk::Semaphore,
}

pub(crate) struct WindowData {
    pub wd_backend: Box<dyn Backend>,
    pub wd_surface: vk::SurfaceKHR,
    pub wd_present_mode: PresentMode,
    /// None while the window is minimized or creation failed
    pub wd_swapchain: Option<SwapchainData>,
}

impl Renderer {
    /// Claim a window for presentation
    ///
    /// Creates the surface and the initial swapchain. The returned
    /// Window is the key for every other swapchain operation.
    pub fn claim_window(
        &self,
        surface_type: SurfaceType,
        present_mode: PresentMode,
    ) -> Result<Window> {
        let backend: Box<dyn Backend> = match surface_type {
            #[cfg(feature = "sdl")]
            SurfaceType::SDL2(window) => Box::new(Sdl2Backend {
                sb_window: window.raw(),
            }),
            SurfaceType::Headless(_) => {
                log::error!("Cannot claim a window on a headless renderer");
                return Err(SquallError::VK_SURF_NOT_SUPPORTED);
            }
        };

        let surface = backend.create_surface(&self.r_dev.inst.loader, &self.r_dev.inst.inst)?;

        // the one graphics queue must be able to present this surface
        let supported = unsafe {
            self.r_surface_loader
                .get_physical_device_surface_support(
                    self.r_dev.pdev,
                    self.r_dev.graphics_family,
                    surface,
                )
                .unwrap_or(false)
        };
        if !supported {
            unsafe { self.r_surface_loader.destroy_surface(surface, None) };
            return Err(SquallError::VK_SURF_NOT_SUPPORTED);
        }

        let mut data = WindowData {
            wd_backend: backend,
            wd_surface: surface,
            wd_present_mode: present_mode,
            wd_swapchain: None,
        };
        data.wd_swapchain = self.create_swapchain(&data).ok();

        let id = self.register_window(data);
        Ok(Window(id))
    }

    /// Release a window and everything its swapchain owns
    pub fn unclaim_window(&self, window: Window) {
        let data = match self.take_window(window.0) {
            Some(d) => d,
            None => {
                log::error!("unclaim_window on a window that was never claimed");
                return;
            }
        };

        self.r_dev.wait_idle();
        if let Some(swapchain) = data.wd_swapchain {
            self.destroy_swapchain_data(swapchain);
        }
        unsafe { self.r_surface_loader.destroy_surface(data.wd_surface, None) };
    }

    /// The format swapchain textures for this window will have
    pub fn get_swapchain_format(&self, window: Window) -> Result<TextureFormat> {
        self.with_window(window.0, |data| {
            let swapchain = data
                .wd_swapchain
                .as_ref()
                .ok_or(SquallError::WINDOW_MINIMIZED)?;

            Ok(if swapchain.sc_format == vk::Format::B8G8R8A8_UNORM {
                TextureFormat::B8G8R8A8
            } else {
                TextureFormat::R8G8B8A8
            })
        })
    }

    /// Get the next image of the window's swapchain
    ///
    /// Returns None for minimized windows. On an out-of-date or
    /// suboptimal swapchain the swapchain is recreated and the
    /// acquire retried once; a second failure also yields None.
    /// The acquired texture is registered for presentation when
    /// `cbuf` is submitted.
    pub fn acquire_swapchain_texture(
        &self,
        cbuf: &CommandBuffer,
        window: Window,
    ) -> Result<Option<Texture>> {
        self.with_window(window.0, |data| {
            if data.wd_backend.is_minimized() || data.wd_backend.drawable_size() == (0, 0) {
                return Ok(None);
            }

            if data.wd_swapchain.is_none() {
                data.wd_swapchain = Some(match self.create_swapchain(data) {
                    Ok(s) => s,
                    Err(_) => return Ok(None),
                });
            }

            // a window resize does not always surface as OUT_OF_DATE,
            // so compare against the drawable size too
            let drawable = data.wd_backend.drawable_size();
            let extent = data.wd_swapchain.as_ref().unwrap().sc_extent;
            if (extent.width, extent.height) != drawable
                && self.recreate_swapchain(data).is_err()
            {
                return Ok(None);
            }

            let mut index = None;
            for attempt in 0..2 {
                let swapchain = data.wd_swapchain.as_ref().unwrap();
                match unsafe {
                    self.r_swapchain_loader.acquire_next_image(
                        swapchain.sc_swapchain,
                        u64::MAX,
                        swapchain.sc_image_available,
                        vk::Fence::null(),
                    )
                } {
                    Ok((i, false)) => {
                        index = Some(i);
                        break;
                    }
                    // suboptimal or out of date, recreate and go again
                    Ok((_, true)) | Err(vk::Result::ERROR_OUT_OF_DATE_KHR) => {
                        if attempt == 1 {
                            return Ok(None);
                        }
                        log::debug!("Swapchain is out of date, recreating");
                        match self.recreate_swapchain(data) {
                            Ok(()) => continue,
                            Err(_) => return Ok(None),
                        }
                    }
                    Err(e) => {
                        log::error!("vkAcquireNextImageKHR failed: {:?}", e);
                        return Err(SquallError::COULD_NOT_ACQUIRE_NEXT_IMAGE);
                    }
                }
            }
            let index = match index {
                Some(i) => i,
                None => return Ok(None),
            };

            let swapchain = data.wd_swapchain.as_ref().unwrap();
            let texture = swapchain.sc_textures[index as usize].clone();

            self.transition_texture(
                cbuf.cb_internal.cb_cbuf,
                &texture,
                true,
                AccessKind::COLOR_ATTACHMENT_WRITE,
            );

            let mut state = cbuf.cb_internal.cb_state.lock().unwrap();
            track(&mut state.cb_used_textures, &texture);
            state.cb_presents.push(PresentIntent {
                pi_window: window.0,
                pi_image_index: index,
                pi_texture: texture.clone(),
                pi_wait_sema: swapchain.sc_image_available,
                pi_signal_sema: swapchain.sc_render_finished,
            });

            Ok(Some(Texture {
                t_internal: texture,
            }))
        })
    }

    /// create a new vkSwapchain for this window
    ///
    /// Swapchains contain images that can be used for WSI
    /// presentation. The surface format prefers RGBA8, falling back
    /// to BGRA8 with a swizzled view.
    pub(crate) fn create_swapchain(&self, data: &WindowData) -> Result<SwapchainData> {
        let caps = unsafe {
            self.r_surface_loader
                .get_physical_device_surface_capabilities(self.r_dev.pdev, data.wd_surface)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?
        };
        let formats = unsafe {
            self.r_surface_loader
                .get_physical_device_surface_formats(self.r_dev.pdev, data.wd_surface)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?
        };
        let present_modes = unsafe {
            self.r_surface_loader
                .get_physical_device_surface_present_modes(self.r_dev.pdev, data.wd_surface)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?
        };

        let (format, swizzle) = Self::select_surface_format(&formats)?;

        let wanted_mode = data.wd_present_mode.to_vk();
        let present_mode = present_modes
            .iter()
            .copied()
            .find(|&mode| mode == wanted_mode)
            // FIFO support is mandatory
            .unwrap_or(vk::PresentModeKHR::FIFO);

        let extent = clamp_extent(&caps, data.wd_backend.drawable_size());
        if extent.width == 0 || extent.height == 0 {
            return Err(SquallError::WINDOW_MINIMIZED);
        }

        let image_count = select_image_count(&caps, present_mode);

        let transform = if caps
            .supported_transforms
            .contains(vk::SurfaceTransformFlagsKHR::IDENTITY)
        {
            vk::SurfaceTransformFlagsKHR::IDENTITY
        } else {
            caps.current_transform
        };

        let create_info = vk::SwapchainCreateInfoKHR::builder()
            .surface(data.wd_surface)
            .min_image_count(image_count)
            .image_format(format.format)
            .image_color_space(format.color_space)
            .image_extent(extent)
            .image_array_layers(1)
            .image_usage(
                vk::ImageUsageFlags::COLOR_ATTACHMENT
                    | vk::ImageUsageFlags::TRANSFER_SRC
                    | vk::ImageUsageFlags::TRANSFER_DST,
            )
            .image_sharing_mode(vk::SharingMode::EXCLUSIVE)
            .pre_transform(transform)
            .composite_alpha(vk::CompositeAlphaFlagsKHR::OPAQUE)
            .present_mode(present_mode)
            .clipped(true);

        let swapchain = unsafe {
            self.r_swapchain_loader
                .create_swapchain(&create_info, None)
                .or_else(|e| {
                    log::error!("vkCreateSwapchainKHR failed: {:?}", e);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?
        };

        let images = unsafe {
            self.r_swapchain_loader
                .get_swapchain_images(swapchain)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))?
        };
        let mut textures = Vec::with_capacity(images.len());
        for image in images.iter() {
            textures.push(TextureInternal::from_swapchain_image(
                self.r_dev.clone(),
                *image,
                format.format,
                swizzle,
                extent,
            )?);
        }

        let image_available = self.r_dev.create_semaphore()?;
        let render_finished = self.r_dev.create_semaphore()?;

        log::info!(
            "Created a {}x{} swapchain with {} images",
            extent.width,
            extent.height,
            images.len()
        );

        Ok(SwapchainData {
            sc_swapchain: swapchain,
            sc_format: format.format,
            sc_extent: extent,
            sc_textures: textures,
            sc_image_available: image_available,
            sc_render_finished: render_finished,
        })
    }

    fn select_surface_format(
        formats: &[vk::SurfaceFormatKHR],
    ) -> Result<(vk::SurfaceFormatKHR, vk::ComponentMapping)> {
        let identity = vk::ComponentMapping {
            r: vk::ComponentSwizzle::R,
            g: vk::ComponentSwizzle::G,
            b: vk::ComponentSwizzle::B,
            a: vk::ComponentSwizzle::A,
        };

        if let Some(format) = formats
            .iter()
            .find(|f| f.format == vk::Format::R8G8B8A8_UNORM)
        {
            return Ok((*format, identity));
        }

        // BGRA8 shows up everywhere RGBA8 does not; swap the channels
        // in the view so callers still see RGBA
        if let Some(format) = formats
            .iter()
            .find(|f| f.format == vk::Format::B8G8R8A8_UNORM)
        {
            return Ok((
                *format,
                vk::ComponentMapping {
                    r: vk::ComponentSwizzle::B,
                    g: vk::ComponentSwizzle::G,
                    b: vk::ComponentSwizzle::R,
                    a: vk::ComponentSwizzle::A,
                },
            ));
        }

        log::error!("The surface supports neither RGBA8 nor BGRA8");
        Err(SquallError::VK_SURF_NOT_SUPPORTED)
    }

    /// Device-idle, destroy, create
    pub(crate) fn recreate_swapchain(&self, data: &mut WindowData) -> Result<()> {
        self.r_dev.wait_idle();

        if let Some(old) = data.wd_swapchain.take() {
            self.destroy_swapchain_data(old);
        }
        data.wd_swapchain = Some(self.create_swapchain(data)?);

        Ok(())
    }

    pub(crate) fn destroy_swapchain_data(&self, data: SwapchainData) {
        unsafe {
            self.r_dev
                .dev
                .destroy_semaphore(data.sc_image_available, None);
            self.r_dev
                .dev
                .destroy_semaphore(data.sc_render_finished, None);
            // the per-image views die with the texture wrappers
            drop(data.sc_textures);
            self.r_swapchain_loader
                .destroy_swapchain(data.sc_swapchain, None);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn caps(min: u32, max: u32, current: (u32, u32)) -> vk::SurfaceCapabilitiesKHR {
        vk::SurfaceCapabilitiesKHR {
            min_image_count: min,
            max_image_count: max,
            current_extent: vk::Extent2D {
                width: current.0,
                height: current.1,
            },
            min_image_extent: vk::Extent2D {
                width: 1,
                height: 1,
            },
            max_image_extent: vk::Extent2D {
                width: 4096,
                height: 4096,
            },
            ..Default::default()
        }
    }

    #[test]
    fn image_count_prefers_one_extra() {
        let c = caps(2, 8, (640, 480));
        assert_eq!(select_image_count(&c, vk::PresentModeKHR::FIFO), 3);
    }

    #[test]
    fn mailbox_wants_at_least_three_images() {
        let c = caps(1, 8, (640, 480));
        assert_eq!(select_image_count(&c, vk::PresentModeKHR::MAILBOX), 3);
        assert_eq!(select_image_count(&c, vk::PresentModeKHR::FIFO), 2);
    }

    #[test]
    fn image_count_respects_surface_maximum() {
        let c = caps(3, 3, (640, 480));
        assert_eq!(select_image_count(&c, vk::PresentModeKHR::MAILBOX), 3);
    }

    #[test]
    fn extent_follows_surface_when_fixed() {
        let c = caps(2, 0, (800, 600));
        let extent = clamp_extent(&c, (1024, 768));
        assert_eq!((extent.width, extent.height), (800, 600));
    }

    #[test]
    fn extent_clamps_drawable_size_when_free() {
        let c = caps(2, 0, (u32::MAX, u32::MAX));
        let extent = clamp_extent(&c, (8192, 2));
        assert_eq!((extent.width, extent.height), (4096, 2));
    }
}
