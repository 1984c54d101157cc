// Vulkan device representation
//
// This stores per-GPU state: the logical device, the single graphics
// queue family, device limits the rest of the crate cares about, and
// the memory allocator every resource draws from.

use ash::extensions::khr;
use ash::vk;

use crate::instance::Instance;
use crate::memory::{Allocation, MemoryAllocator};
use crate::{Result, SquallError};
use utils::log;

use std::sync::Arc;

/// Squall Device
///
/// This holds all of the Vulkan logic for one GPU. Resources keep an
/// Arc to this so their Drop impls can free what they created.
pub(crate) struct Device {
    pub(crate) inst: Arc<Instance>,
    /// the logical device we are using
    pub(crate) dev: ash::Device,
    /// the physical device selected to render with
    pub(crate) pdev: vk::PhysicalDevice,
    pub(crate) mem_props: vk::PhysicalDeviceMemoryProperties,
    /// The one queue family used for graphics, compute, and transfer
    pub(crate) graphics_family: u32,
    /// Dynamic uniform offsets must be multiples of this
    pub(crate) min_ubo_align: u64,
    /// Sample counts the color framebuffers on this device support
    pub(crate) supported_sample_counts: vk::SampleCountFlags,
    /// Suballocator for all device memory
    pub(crate) d_allocator: MemoryAllocator,
}

impl Device {
    /// Choose a vkPhysicalDevice
    ///
    /// For now we are just going to get the first one.
    fn select_pdev(inst: &ash::Instance) -> Result<vk::PhysicalDevice> {
        let pdevices = unsafe {
            inst.enumerate_physical_devices()
                .or(Err(SquallError::NO_SUITABLE_GPU))?
        };

        pdevices
            .first()
            .copied()
            .ok_or(SquallError::NO_SUITABLE_GPU)
    }

    /// Choose a queue family
    ///
    /// returns an index into the array of queue types. We want one
    /// family that can do everything, so draws, dispatches, and
    /// copies all land on a single timeline.
    fn select_queue_family(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        flags: vk::QueueFlags,
    ) -> Result<u32> {
        // get the properties per queue family
        unsafe { inst.get_physical_device_queue_family_properties(pdev) }
            .iter()
            .enumerate()
            .filter_map(|(index, info)| match info.queue_flags.contains(flags) {
                true => Some(index as u32),
                false => None,
            })
            .next()
            .ok_or(SquallError::NO_SUITABLE_GPU)
    }

    /// Create a vkDevice from a vkPhysicalDevice
    ///
    /// Create a logical device for interfacing with the physical
    /// device. The swapchain extension is the only one we need.
    fn create_device(
        inst: &ash::Instance,
        pdev: vk::PhysicalDevice,
        queue_family: u32,
    ) -> Result<ash::Device> {
        let dev_extension_names = [khr::Swapchain::name().as_ptr()];

        let features = vk::PhysicalDeviceFeatures::builder()
            .fill_mode_non_solid(true)
            .sample_rate_shading(true)
            .build();

        // one graphics queue, so one priority
        let priorities = [1.0];
        let queue_infos = [vk::DeviceQueueCreateInfo::builder()
            .queue_family_index(queue_family)
            .queue_priorities(&priorities)
            .build()];

        let dev_create_info = vk::DeviceCreateInfo::builder()
            .queue_create_infos(&queue_infos)
            .enabled_extension_names(&dev_extension_names)
            .enabled_features(&features)
            .build();

        unsafe {
            inst.create_device(pdev, &dev_create_info, None)
                .or(Err(SquallError::VK_NOT_AVAILABLE))
        }
    }

    /// Create a new Device on the default physical device
    pub fn new(instance: Arc<Instance>) -> Result<Self> {
        let pdev = Self::select_pdev(&instance.inst)?;
        let graphics_family = Self::select_queue_family(
            &instance.inst,
            pdev,
            vk::QueueFlags::GRAPHICS | vk::QueueFlags::COMPUTE,
        )?;
        let mem_props =
            unsafe { instance.inst.get_physical_device_memory_properties(pdev) };
        let props = unsafe { instance.inst.get_physical_device_properties(pdev) };

        let dev = Self::create_device(&instance.inst, pdev, graphics_family)?;
        let allocator = MemoryAllocator::new(&mem_props);

        log::info!(
            "Using device {:?}",
            unsafe { std::ffi::CStr::from_ptr(props.device_name.as_ptr()) }
        );

        Ok(Self {
            inst: instance,
            dev,
            pdev,
            mem_props,
            graphics_family,
            min_ubo_align: props.limits.min_uniform_buffer_offset_alignment,
            supported_sample_counts: props.limits.framebuffer_color_sample_counts,
            d_allocator: allocator,
        })
    }

    pub fn get_queue(&self) -> vk::Queue {
        unsafe { self.dev.get_device_queue(self.graphics_family, 0) }
    }

    /// Returns an index into the array of memory types for the memory
    /// properties
    ///
    /// Memory types specify the location and accessability of memory.
    /// Device local memory is resident on the GPU, while host visible
    /// memory can be read from the system side.
    pub(crate) fn find_memory_type_index(
        &self,
        reqs: &vk::MemoryRequirements,
        flags: vk::MemoryPropertyFlags,
    ) -> Result<u32> {
        for (i, mem_type) in self.mem_props.memory_types.iter().enumerate() {
            // Bit i of memory_type_bits is set if the resource supports
            // the ith memory type in props.
            if (reqs.memory_type_bits >> i) & 1 == 1 && mem_type.property_flags.contains(flags) {
                return Ok(i as u32);
            }
        }

        log::error!("No memory type fits requirements {:?}", flags);
        Err(SquallError::OUT_OF_DEVICE_MEMORY)
    }

    /// Allocate memory for `buffer` and bind it
    pub(crate) fn alloc_bind_buffer(
        &self,
        buffer: vk::Buffer,
        flags: vk::MemoryPropertyFlags,
        dedicated: bool,
    ) -> Result<Allocation> {
        let reqs = unsafe { self.dev.get_buffer_memory_requirements(buffer) };
        let memory_type = self.find_memory_type_index(&reqs, flags)?;
        let host_visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

        let alloc = self.d_allocator.allocate(
            &self.dev,
            memory_type,
            host_visible,
            reqs.size,
            reqs.alignment,
            dedicated,
        )?;

        unsafe {
            self.dev
                .bind_buffer_memory(buffer, alloc.a_memory, alloc.a_offset)
                .or_else(|e| {
                    log::error!("vkBindBufferMemory failed: {:?}", e);
                    self.d_allocator.free(&self.dev, &alloc);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?;
        }

        Ok(alloc)
    }

    /// Allocate memory for `image` and bind it
    pub(crate) fn alloc_bind_image(
        &self,
        image: vk::Image,
        flags: vk::MemoryPropertyFlags,
        dedicated: bool,
    ) -> Result<Allocation> {
        let reqs = unsafe { self.dev.get_image_memory_requirements(image) };
        let memory_type = self.find_memory_type_index(&reqs, flags)?;
        let host_visible = flags.contains(vk::MemoryPropertyFlags::HOST_VISIBLE);

        let alloc = self.d_allocator.allocate(
            &self.dev,
            memory_type,
            host_visible,
            reqs.size,
            reqs.alignment,
            dedicated,
        )?;

        unsafe {
            self.dev
                .bind_image_memory(image, alloc.a_memory, alloc.a_offset)
                .or_else(|e| {
                    log::error!("vkBindImageMemory failed: {:?}", e);
                    self.d_allocator.free(&self.dev, &alloc);
                    Err(SquallError::COULD_NOT_CREATE_OBJECT)
                })?;
        }

        Ok(alloc)
    }

    /// returns a new vkCommandPool for the calling thread's buffers
    pub(crate) fn create_command_pool(&self) -> Result<vk::CommandPool> {
        let pool_create_info = vk::CommandPoolCreateInfo::builder()
            .flags(vk::CommandPoolCreateFlags::RESET_COMMAND_BUFFER)
            .queue_family_index(self.graphics_family);

        unsafe {
            self.dev
                .create_command_pool(&pool_create_info, None)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))
        }
    }

    /// Allocate a vec of primary vkCommandBuffers from `pool`
    pub(crate) fn create_command_buffers(
        &self,
        pool: vk::CommandPool,
        count: u32,
    ) -> Result<Vec<vk::CommandBuffer>> {
        let cbuf_allocate_info = vk::CommandBufferAllocateInfo::builder()
            .command_buffer_count(count)
            .command_pool(pool)
            .level(vk::CommandBufferLevel::PRIMARY);

        unsafe {
            self.dev
                .allocate_command_buffers(&cbuf_allocate_info)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))
        }
    }

    pub(crate) fn create_fence(&self, signaled: bool) -> Result<vk::Fence> {
        let flags = if signaled {
            vk::FenceCreateFlags::SIGNALED
        } else {
            vk::FenceCreateFlags::empty()
        };

        unsafe {
            self.dev
                .create_fence(&vk::FenceCreateInfo::builder().flags(flags), None)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))
        }
    }

    pub(crate) fn create_semaphore(&self) -> Result<vk::Semaphore> {
        unsafe {
            self.dev
                .create_semaphore(&vk::SemaphoreCreateInfo::default(), None)
                .or(Err(SquallError::COULD_NOT_CREATE_OBJECT))
        }
    }

    /// Block until the GPU has finished everything
    pub(crate) fn wait_idle(&self) {
        unsafe {
            if let Err(e) = self.dev.device_wait_idle() {
                // surfaces device loss, there is no recovery from here
                log::error!("vkDeviceWaitIdle failed: {:?}", e);
            }
        }
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        unsafe {
            // first wait for the device to finish working
            self.wait_idle();

            self.d_allocator.destroy(&self.dev);
            self.dev.destroy_device(None);
        }
    }
}
