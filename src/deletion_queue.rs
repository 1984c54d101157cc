// Deferred resource destruction
//
// Queue-destroyed resources park here until no command buffer
// references them. The sweep after each submit and wait drops the
// queue's reference for anything whose refcount reached zero, which
// frees the Vulkan object through the resource's own Drop.

use crate::buffer::BufferInternal;
use crate::image::{SamplerInternal, TextureInternal};
use crate::pipelines::{ComputePipelineInternal, GraphicsPipelineInternal, ShaderModuleInternal};

use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

/// Drop every entry the predicate reports as reclaimable
///
/// Retained entries stay queued for the next sweep.
fn reap<T>(list: &mut Vec<Arc<T>>, reclaimable: impl Fn(&T) -> bool) {
    list.retain(|entry| !reclaimable(entry));
}

struct DeletionLists {
    dq_buffers: Vec<Arc<BufferInternal>>,
    dq_textures: Vec<Arc<TextureInternal>>,
    dq_samplers: Vec<Arc<SamplerInternal>>,
    dq_shaders: Vec<Arc<ShaderModuleInternal>>,
    dq_graphics_pipelines: Vec<Arc<GraphicsPipelineInternal>>,
    dq_compute_pipelines: Vec<Arc<ComputePipelineInternal>>,
}

/// The pending-destroy queue, one list per resource type
pub(crate) struct DeletionQueue {
    dq_internal: Mutex<DeletionLists>,
}

impl DeletionQueue {
    pub fn new() -> Self {
        Self {
            dq_internal: Mutex::new(DeletionLists {
                dq_buffers: Vec::new(),
                dq_textures: Vec::new(),
                dq_samplers: Vec::new(),
                dq_shaders: Vec::new(),
                dq_graphics_pipelines: Vec::new(),
                dq_compute_pipelines: Vec::new(),
            }),
        }
    }

    pub fn push_buffer(&self, buffer: Arc<BufferInternal>) {
        self.dq_internal.lock().unwrap().dq_buffers.push(buffer);
    }

    pub fn push_texture(&self, texture: Arc<TextureInternal>) {
        self.dq_internal.lock().unwrap().dq_textures.push(texture);
    }

    pub fn push_sampler(&self, sampler: Arc<SamplerInternal>) {
        self.dq_internal.lock().unwrap().dq_samplers.push(sampler);
    }

    pub fn push_shader(&self, shader: Arc<ShaderModuleInternal>) {
        self.dq_internal.lock().unwrap().dq_shaders.push(shader);
    }

    pub fn push_graphics_pipeline(&self, pipeline: Arc<GraphicsPipelineInternal>) {
        self.dq_internal
            .lock()
            .unwrap()
            .dq_graphics_pipelines
            .push(pipeline);
    }

    pub fn push_compute_pipeline(&self, pipeline: Arc<ComputePipelineInternal>) {
        self.dq_internal
            .lock()
            .unwrap()
            .dq_compute_pipelines
            .push(pipeline);
    }

    /// Free everything no command buffer references anymore
    ///
    /// `texture_killed` runs for each texture about to be freed, while
    /// its Vulkan objects are still alive, so the renderer can purge
    /// the framebuffers and render targets built on its views first.
    pub fn sweep<F: FnMut(&TextureInternal)>(&self, mut texture_killed: F) {
        let mut lists = self.dq_internal.lock().unwrap();

        reap(&mut lists.dq_buffers, |b| {
            b.b_refcount.load(Ordering::Acquire) == 0
        });
        reap(&mut lists.dq_samplers, |s| {
            s.s_refcount.load(Ordering::Acquire) == 0
        });
        reap(&mut lists.dq_shaders, |s| {
            s.sm_refcount.load(Ordering::Acquire) == 0
        });
        reap(&mut lists.dq_graphics_pipelines, |p| {
            p.p_refcount.load(Ordering::Acquire) == 0
        });
        reap(&mut lists.dq_compute_pipelines, |p| {
            p.p_refcount.load(Ordering::Acquire) == 0
        });

        // textures get the invalidation callback before they drop
        let mut retained = Vec::new();
        for texture in lists.dq_textures.drain(..) {
            if texture.t_refcount.load(Ordering::Acquire) == 0 {
                texture_killed(&texture);
            } else {
                retained.push(texture);
            }
        }
        lists.dq_textures = retained;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct FakeResource {
        refcount: AtomicU32,
        freed: Arc<AtomicU32>,
    }

    impl Drop for FakeResource {
        fn drop(&mut self) {
            self.freed.fetch_add(1, Ordering::AcqRel);
        }
    }

    #[test]
    fn reap_frees_only_unreferenced_entries() {
        let freed = Arc::new(AtomicU32::new(0));
        let mut list = vec![
            Arc::new(FakeResource {
                refcount: AtomicU32::new(0),
                freed: freed.clone(),
            }),
            Arc::new(FakeResource {
                refcount: AtomicU32::new(2),
                freed: freed.clone(),
            }),
        ];

        reap(&mut list, |r| r.refcount.load(Ordering::Acquire) == 0);
        assert_eq!(list.len(), 1);
        assert_eq!(freed.load(Ordering::Acquire), 1);

        // the survivor frees once its references drain
        list[0].refcount.store(0, Ordering::Release);
        reap(&mut list, |r| r.refcount.load(Ordering::Acquire) == 0);
        assert!(list.is_empty());
        assert_eq!(freed.load(Ordering::Acquire), 2);
    }
}
