// Resource access tracking
//
// Every buffer and image carries one AccessKind describing how it was
// last used. Transitioning a resource to a new kind consults the table
// below for the pipeline stages, access masks, and image layout on
// both sides of the barrier. All barrier emission in the crate funnels
// through here.

#![allow(non_camel_case_types)]

use ash::vk;

/// How a resource is about to be used
///
/// Read-only kinds come before END_OF_READ, writes and read-writes
/// after it. The discriminant indexes ACCESS_TABLE.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum AccessKind {
    NONE,
    INDEX_BUFFER,
    VERTEX_BUFFER,
    INDIRECT_BUFFER,
    VERTEX_SHADER_READ_UNIFORM_BUFFER,
    VERTEX_SHADER_READ_SAMPLED_IMAGE,
    FRAGMENT_SHADER_READ_UNIFORM_BUFFER,
    FRAGMENT_SHADER_READ_SAMPLED_IMAGE,
    FRAGMENT_SHADER_READ_COLOR_ATTACHMENT,
    FRAGMENT_SHADER_READ_DEPTH_STENCIL_ATTACHMENT,
    COMPUTE_SHADER_READ_UNIFORM_BUFFER,
    COMPUTE_SHADER_READ_SAMPLED_IMAGE,
    COMPUTE_SHADER_READ_OTHER,
    ANY_SHADER_READ_UNIFORM_BUFFER,
    ANY_SHADER_READ_SAMPLED_IMAGE,
    ANY_SHADER_READ_OTHER,
    COLOR_ATTACHMENT_READ,
    DEPTH_STENCIL_ATTACHMENT_READ,
    TRANSFER_READ,
    HOST_READ,
    PRESENT,
    /// Sentinel separating reads from writes, never assigned to a resource
    END_OF_READ,
    VERTEX_SHADER_WRITE,
    FRAGMENT_SHADER_WRITE,
    COLOR_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_WRITE,
    DEPTH_STENCIL_ATTACHMENT_READ_WRITE,
    COMPUTE_SHADER_BUFFER_READ_WRITE,
    COMPUTE_SHADER_STORAGE_IMAGE_READ_WRITE,
    TRANSFER_WRITE,
    HOST_WRITE,
    GENERAL,
}

/// What one access kind means to the GPU
pub(crate) struct AccessInfo {
    pub ai_stage_mask: vk::PipelineStageFlags,
    pub ai_access_mask: vk::AccessFlags,
    pub ai_image_layout: vk::ImageLayout,
}

const fn stages(raw: u32) -> vk::PipelineStageFlags {
    vk::PipelineStageFlags::from_raw(raw)
}

const fn access(raw: u32) -> vk::AccessFlags {
    vk::AccessFlags::from_raw(raw)
}

const ANY_SHADER_STAGES: u32 = vk::PipelineStageFlags::VERTEX_SHADER.as_raw()
    | vk::PipelineStageFlags::FRAGMENT_SHADER.as_raw()
    | vk::PipelineStageFlags::COMPUTE_SHADER.as_raw();

const DEPTH_STENCIL_STAGES: u32 = vk::PipelineStageFlags::EARLY_FRAGMENT_TESTS.as_raw()
    | vk::PipelineStageFlags::LATE_FRAGMENT_TESTS.as_raw();

/// The single source of truth for all barrier code, indexed by the
/// AccessKind discriminant.
const ACCESS_TABLE: [AccessInfo; 32] = [
    // NONE
    AccessInfo {
        ai_stage_mask: stages(0),
        ai_access_mask: access(0),
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // INDEX_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::VERTEX_INPUT,
        ai_access_mask: vk::AccessFlags::INDEX_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // VERTEX_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::VERTEX_INPUT,
        ai_access_mask: vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // INDIRECT_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::DRAW_INDIRECT,
        ai_access_mask: vk::AccessFlags::INDIRECT_COMMAND_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // VERTEX_SHADER_READ_UNIFORM_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
        ai_access_mask: vk::AccessFlags::UNIFORM_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // VERTEX_SHADER_READ_SAMPLED_IMAGE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    },
    // FRAGMENT_SHADER_READ_UNIFORM_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        ai_access_mask: vk::AccessFlags::UNIFORM_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // FRAGMENT_SHADER_READ_SAMPLED_IMAGE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    },
    // FRAGMENT_SHADER_READ_COLOR_ATTACHMENT
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        ai_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ,
        ai_image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    },
    // FRAGMENT_SHADER_READ_DEPTH_STENCIL_ATTACHMENT
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        ai_access_mask: vk::AccessFlags::INPUT_ATTACHMENT_READ,
        ai_image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    },
    // COMPUTE_SHADER_READ_UNIFORM_BUFFER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        ai_access_mask: vk::AccessFlags::UNIFORM_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // COMPUTE_SHADER_READ_SAMPLED_IMAGE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    },
    // COMPUTE_SHADER_READ_OTHER
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // ANY_SHADER_READ_UNIFORM_BUFFER
    AccessInfo {
        ai_stage_mask: stages(ANY_SHADER_STAGES),
        ai_access_mask: vk::AccessFlags::UNIFORM_READ,
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // ANY_SHADER_READ_SAMPLED_IMAGE
    AccessInfo {
        ai_stage_mask: stages(ANY_SHADER_STAGES),
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
    },
    // ANY_SHADER_READ_OTHER
    AccessInfo {
        ai_stage_mask: stages(ANY_SHADER_STAGES),
        ai_access_mask: vk::AccessFlags::SHADER_READ,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // COLOR_ATTACHMENT_READ
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ai_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_READ,
        ai_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    },
    // DEPTH_STENCIL_ATTACHMENT_READ
    AccessInfo {
        ai_stage_mask: stages(DEPTH_STENCIL_STAGES),
        ai_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ,
        ai_image_layout: vk::ImageLayout::DEPTH_STENCIL_READ_ONLY_OPTIMAL,
    },
    // TRANSFER_READ
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::TRANSFER,
        ai_access_mask: vk::AccessFlags::TRANSFER_READ,
        ai_image_layout: vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
    },
    // HOST_READ
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::HOST,
        ai_access_mask: vk::AccessFlags::HOST_READ,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // PRESENT
    AccessInfo {
        ai_stage_mask: stages(0),
        ai_access_mask: access(0),
        ai_image_layout: vk::ImageLayout::PRESENT_SRC_KHR,
    },
    // END_OF_READ
    AccessInfo {
        ai_stage_mask: stages(0),
        ai_access_mask: access(0),
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // VERTEX_SHADER_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::VERTEX_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_WRITE,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // FRAGMENT_SHADER_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::FRAGMENT_SHADER,
        ai_access_mask: vk::AccessFlags::SHADER_WRITE,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // COLOR_ATTACHMENT_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        ai_access_mask: vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        ai_image_layout: vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
    },
    // DEPTH_STENCIL_ATTACHMENT_WRITE
    AccessInfo {
        ai_stage_mask: stages(DEPTH_STENCIL_STAGES),
        ai_access_mask: vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE,
        ai_image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    },
    // DEPTH_STENCIL_ATTACHMENT_READ_WRITE
    AccessInfo {
        ai_stage_mask: stages(DEPTH_STENCIL_STAGES),
        ai_access_mask: access(
            vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_READ.as_raw()
                | vk::AccessFlags::DEPTH_STENCIL_ATTACHMENT_WRITE.as_raw(),
        ),
        ai_image_layout: vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL,
    },
    // COMPUTE_SHADER_BUFFER_READ_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        ai_access_mask: access(
            vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
        ),
        ai_image_layout: vk::ImageLayout::UNDEFINED,
    },
    // COMPUTE_SHADER_STORAGE_IMAGE_READ_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::COMPUTE_SHADER,
        ai_access_mask: access(
            vk::AccessFlags::SHADER_READ.as_raw() | vk::AccessFlags::SHADER_WRITE.as_raw(),
        ),
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // TRANSFER_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::TRANSFER,
        ai_access_mask: vk::AccessFlags::TRANSFER_WRITE,
        ai_image_layout: vk::ImageLayout::TRANSFER_DST_OPTIMAL,
    },
    // HOST_WRITE
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::HOST,
        ai_access_mask: vk::AccessFlags::HOST_WRITE,
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
    // GENERAL
    AccessInfo {
        ai_stage_mask: vk::PipelineStageFlags::ALL_COMMANDS,
        ai_access_mask: access(
            vk::AccessFlags::MEMORY_READ.as_raw() | vk::AccessFlags::MEMORY_WRITE.as_raw(),
        ),
        ai_image_layout: vk::ImageLayout::GENERAL,
    },
];

/// Discriminant-ordered list used to decode the atomic cell that
/// resources store their current kind in.
const ACCESS_KINDS: [AccessKind; 32] = [
    AccessKind::NONE,
    AccessKind::INDEX_BUFFER,
    AccessKind::VERTEX_BUFFER,
    AccessKind::INDIRECT_BUFFER,
    AccessKind::VERTEX_SHADER_READ_UNIFORM_BUFFER,
    AccessKind::VERTEX_SHADER_READ_SAMPLED_IMAGE,
    AccessKind::FRAGMENT_SHADER_READ_UNIFORM_BUFFER,
    AccessKind::FRAGMENT_SHADER_READ_SAMPLED_IMAGE,
    AccessKind::FRAGMENT_SHADER_READ_COLOR_ATTACHMENT,
    AccessKind::FRAGMENT_SHADER_READ_DEPTH_STENCIL_ATTACHMENT,
    AccessKind::COMPUTE_SHADER_READ_UNIFORM_BUFFER,
    AccessKind::COMPUTE_SHADER_READ_SAMPLED_IMAGE,
    AccessKind::COMPUTE_SHADER_READ_OTHER,
    AccessKind::ANY_SHADER_READ_UNIFORM_BUFFER,
    AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE,
    AccessKind::ANY_SHADER_READ_OTHER,
    AccessKind::COLOR_ATTACHMENT_READ,
    AccessKind::DEPTH_STENCIL_ATTACHMENT_READ,
    AccessKind::TRANSFER_READ,
    AccessKind::HOST_READ,
    AccessKind::PRESENT,
    AccessKind::END_OF_READ,
    AccessKind::VERTEX_SHADER_WRITE,
    AccessKind::FRAGMENT_SHADER_WRITE,
    AccessKind::COLOR_ATTACHMENT_WRITE,
    AccessKind::DEPTH_STENCIL_ATTACHMENT_WRITE,
    AccessKind::DEPTH_STENCIL_ATTACHMENT_READ_WRITE,
    AccessKind::COMPUTE_SHADER_BUFFER_READ_WRITE,
    AccessKind::COMPUTE_SHADER_STORAGE_IMAGE_READ_WRITE,
    AccessKind::TRANSFER_WRITE,
    AccessKind::HOST_WRITE,
    AccessKind::GENERAL,
];

impl AccessKind {
    pub fn info(&self) -> &'static AccessInfo {
        &ACCESS_TABLE[*self as usize]
    }

    /// Writes and read-writes need their caches flushed before the
    /// next access; plain reads do not.
    pub fn is_write(&self) -> bool {
        (*self as u8) > (AccessKind::END_OF_READ as u8)
    }

    pub fn from_raw(raw: u8) -> Self {
        ACCESS_KINDS[raw as usize]
    }
}

/// The stage and access masks for a transition between two kinds
///
/// Returns (src_stages, dst_stages, src_access, dst_access). Stages
/// are clamped to TOP_OF_PIPE / BOTTOM_OF_PIPE when the table entry
/// has none, since vkCmdPipelineBarrier rejects empty stage masks.
pub(crate) fn barrier_masks(
    prev: AccessKind,
    next: AccessKind,
) -> (
    vk::PipelineStageFlags,
    vk::PipelineStageFlags,
    vk::AccessFlags,
    vk::AccessFlags,
) {
    let src_access = if prev.is_write() {
        prev.info().ai_access_mask
    } else {
        vk::AccessFlags::empty()
    };

    let mut src_stages = prev.info().ai_stage_mask;
    if src_stages.is_empty() {
        src_stages = vk::PipelineStageFlags::TOP_OF_PIPE;
    }

    let mut dst_stages = next.info().ai_stage_mask;
    if dst_stages.is_empty() {
        dst_stages = vk::PipelineStageFlags::BOTTOM_OF_PIPE;
    }

    (src_stages, dst_stages, src_access, next.info().ai_access_mask)
}

/// Record a buffer memory barrier moving `buffer` from `prev` to `next`
pub(crate) unsafe fn buffer_barrier(
    dev: &ash::Device,
    cbuf: vk::CommandBuffer,
    buffer: vk::Buffer,
    prev: AccessKind,
    next: AccessKind,
) {
    let (src_stages, dst_stages, src_access, dst_access) = barrier_masks(prev, next);

    let barrier = vk::BufferMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .buffer(buffer)
        .offset(0)
        .size(vk::WHOLE_SIZE)
        .build();

    dev.cmd_pipeline_barrier(
        cbuf,
        src_stages,
        dst_stages,
        vk::DependencyFlags::empty(),
        &[],
        &[barrier],
        &[],
    );
}

/// Record an image memory barrier moving a subresource range of
/// `image` from `prev` to `next`
///
/// `discard` drops the old contents by transitioning from UNDEFINED
/// regardless of the previous layout.
pub(crate) unsafe fn image_barrier(
    dev: &ash::Device,
    cbuf: vk::CommandBuffer,
    image: vk::Image,
    aspect_mask: vk::ImageAspectFlags,
    base_layer: u32,
    layer_count: u32,
    base_level: u32,
    level_count: u32,
    discard: bool,
    prev: AccessKind,
    next: AccessKind,
) {
    let (src_stages, dst_stages, src_access, dst_access) = barrier_masks(prev, next);

    let old_layout = if discard {
        vk::ImageLayout::UNDEFINED
    } else {
        prev.info().ai_image_layout
    };

    let barrier = vk::ImageMemoryBarrier::builder()
        .src_access_mask(src_access)
        .dst_access_mask(dst_access)
        .old_layout(old_layout)
        .new_layout(next.info().ai_image_layout)
        .src_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .dst_queue_family_index(vk::QUEUE_FAMILY_IGNORED)
        .image(image)
        .subresource_range(
            vk::ImageSubresourceRange::builder()
                .aspect_mask(aspect_mask)
                .base_array_layer(base_layer)
                .layer_count(layer_count)
                .base_mip_level(base_level)
                .level_count(level_count)
                .build(),
        )
        .build();

    dev.cmd_pipeline_barrier(
        cbuf,
        src_stages,
        dst_stages,
        vk::DependencyFlags::empty(),
        &[],
        &[],
        &[barrier],
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_covers_every_kind() {
        // from_raw and the table must agree on the discriminant order
        for i in 0..ACCESS_KINDS.len() {
            let kind = AccessKind::from_raw(i as u8);
            assert_eq!(kind as usize, i);
            let _ = kind.info();
        }
    }

    #[test]
    fn reads_precede_the_sentinel() {
        assert!(!AccessKind::NONE.is_write());
        assert!(!AccessKind::TRANSFER_READ.is_write());
        assert!(!AccessKind::PRESENT.is_write());
        assert!(!AccessKind::ANY_SHADER_READ_SAMPLED_IMAGE.is_write());

        assert!(AccessKind::TRANSFER_WRITE.is_write());
        assert!(AccessKind::COLOR_ATTACHMENT_WRITE.is_write());
        assert!(AccessKind::COMPUTE_SHADER_BUFFER_READ_WRITE.is_write());
        assert!(AccessKind::GENERAL.is_write());
    }

    #[test]
    fn read_kinds_never_flush_caches() {
        // barriers out of a read-only kind carry no source access mask
        let (_, _, src_access, _) =
            barrier_masks(AccessKind::TRANSFER_READ, AccessKind::COLOR_ATTACHMENT_WRITE);
        assert_eq!(src_access, vk::AccessFlags::empty());

        let (_, _, src_access, _) =
            barrier_masks(AccessKind::TRANSFER_WRITE, AccessKind::TRANSFER_READ);
        assert_eq!(src_access, vk::AccessFlags::TRANSFER_WRITE);
    }

    #[test]
    fn empty_stage_masks_are_clamped() {
        let (src, dst, _, _) = barrier_masks(AccessKind::NONE, AccessKind::PRESENT);
        assert_eq!(src, vk::PipelineStageFlags::TOP_OF_PIPE);
        assert_eq!(dst, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
    }

    #[test]
    fn attachment_kinds_use_attachment_layouts() {
        assert_eq!(
            AccessKind::COLOR_ATTACHMENT_WRITE.info().ai_image_layout,
            vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            AccessKind::DEPTH_STENCIL_ATTACHMENT_READ_WRITE
                .info()
                .ai_image_layout,
            vk::ImageLayout::DEPTH_STENCIL_ATTACHMENT_OPTIMAL
        );
        assert_eq!(
            AccessKind::PRESENT.info().ai_image_layout,
            vk::ImageLayout::PRESENT_SRC_KHR
        );
        assert_eq!(
            AccessKind::COMPUTE_SHADER_STORAGE_IMAGE_READ_WRITE
                .info()
                .ai_image_layout,
            vk::ImageLayout::GENERAL
        );
    }
}
