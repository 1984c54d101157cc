// Squall - a thin Vulkan layer for realtime rendering
//
// Applications describe pipelines, resources, and per-frame command
// streams; Squall turns those into device work. Everything Vulkan
// stays below this crate's public surface.

mod access;
mod buffer;
mod cbuf;
mod deletion_queue;
mod descpool;
mod device;
mod display;
mod image;
mod instance;
mod memory;
mod pipelines;
mod renderer;
mod renderpass;
mod transfer;
mod types;
mod uniform;

pub use crate::buffer::Buffer;
pub use crate::cbuf::CommandBuffer;
pub use crate::display::{SurfaceType, Window};
pub use crate::image::{Sampler, Texture};
pub use crate::pipelines::{ComputePipeline, GraphicsPipeline, ShaderModule};
pub use crate::renderer::{CreateInfo, CreateInfoBuilder, Renderer};
pub use crate::types::*;

extern crate utils;

use thiserror::Error;

/// Errors returned by this crate
///
/// These deliberately carry no Vulkan result codes; the raw code is
/// reported through the logger at the point of failure.
#[allow(non_camel_case_types)]
#[derive(Copy, Clone, Debug, Eq, Error, PartialEq)]
pub enum SquallError {
    #[error("Operation was interrupted")]
    INTERRUPTED,
    #[error("Invalid argument or operation")]
    INVALID,
    #[error("Out of device memory")]
    OUT_OF_DEVICE_MEMORY,
    #[error("The swapchain is out of date and must be recreated")]
    OUT_OF_DATE,
    #[error("Could not acquire the next swapchain image")]
    COULD_NOT_ACQUIRE_NEXT_IMAGE,
    #[error("Presentation to the window failed")]
    PRESENT_FAILED,
    #[error("The window is minimized, there is nothing to present to")]
    WINDOW_MINIMIZED,
    #[error("This window was never claimed by the renderer")]
    WINDOW_NOT_CLAIMED,
    #[error("No suitable physical device was found")]
    NO_SUITABLE_GPU,
    #[error("The device does not expose a graphics queue that can present this surface")]
    VK_SURF_NOT_SUPPORTED,
    #[error("The Vulkan library or required extensions are not available")]
    VK_NOT_AVAILABLE,
    #[error("Could not create a Vulkan object")]
    COULD_NOT_CREATE_OBJECT,
    #[error("The recording thread does not own this command buffer")]
    WRONG_THREAD,
    #[error("A pipeline must be bound for this operation")]
    NO_PIPELINE_BOUND,
}

pub type Result<T> = std::result::Result<T, SquallError>;
