// GPU memory suballocator
//
// Device memory is carved out of large blocks, one set of blocks per
// Vulkan memory type. Freed regions are coalesced with their neighbors
// immediately, and a size-sorted index across all of a type's blocks
// picks the region to split on the next allocation.

use ash::vk;

use crate::{Result, SquallError};
use utils::log;

use std::sync::Mutex;

/// First block allocated for a memory type. Block sizes double from
/// here until they hit MAX_BLOCK_SIZE.
const STARTING_BLOCK_SIZE: u64 = 64 * 1024 * 1024;
const MAX_BLOCK_SIZE: u64 = 256 * 1024 * 1024;

pub(crate) fn round_up(value: u64, granularity: u64) -> u64 {
    if granularity == 0 {
        return value;
    }
    ((value + granularity - 1) / granularity) * granularity
}

/// Pick the size of a new block and the allocator's next growth size
///
/// The block must fit `required`, rounded up to the starting block
/// granularity. Growth is geometric but capped.
fn grow_block_size(next_size: u64, required: u64) -> (u64, u64) {
    let block_size = std::cmp::max(next_size, round_up(required, STARTING_BLOCK_SIZE));
    let new_next = std::cmp::min(next_size * 2, MAX_BLOCK_SIZE);

    (block_size, new_next)
}

/// One region handed out by the allocator
///
/// This is everything a resource needs to bind its memory and to hand
/// the region back when it dies. `a_map` already includes the region
/// offset and is null for device-local memory.
pub(crate) struct Allocation {
    pub a_memory: vk::DeviceMemory,
    pub a_memory_type: u32,
    pub a_block: usize,
    pub a_offset: u64,
    pub a_size: u64,
    pub a_map: *mut u8,
    pub a_dedicated: bool,
}

unsafe impl Send for Allocation {}
unsafe impl Sync for Allocation {}

/// A single vkDeviceMemory allocation that regions are carved from
struct MemoryBlock {
    mb_mem: vk::DeviceMemory,
    mb_size: u64,
    /// Persistent pointer, mapped once at block creation
    mb_map: *mut u8,
}

// only the raw map pointer keeps the compiler from deriving these
unsafe impl Send for MemoryBlock {}
unsafe impl Sync for MemoryBlock {}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
struct FreeRegion {
    fr_block: usize,
    fr_offset: u64,
    fr_size: u64,
}

/// All non-dedicated blocks for one memory type
///
/// sa_free is the aggregated free-region index for every block of this
/// type, kept sorted by size, largest first.
struct SubAllocator {
    sa_blocks: Vec<MemoryBlock>,
    sa_free: Vec<FreeRegion>,
    sa_next_block_size: u64,
}

impl SubAllocator {
    fn new() -> Self {
        Self {
            sa_blocks: Vec::new(),
            sa_free: Vec::new(),
            sa_next_block_size: STARTING_BLOCK_SIZE,
        }
    }

    /// Insertion sort keeps the index ordered without a tree; the live
    /// region count stays small in practice.
    fn insert_region(&mut self, region: FreeRegion) {
        let pos = self
            .sa_free
            .iter()
            .position(|r| r.fr_size < region.fr_size)
            .unwrap_or(self.sa_free.len());
        self.sa_free.insert(pos, region);
    }

    /// Register a new block and make its entire range allocatable
    fn add_block(&mut self, mem: vk::DeviceMemory, size: u64, map: *mut u8) -> usize {
        self.sa_blocks.push(MemoryBlock {
            mb_mem: mem,
            mb_size: size,
            mb_map: map,
        });
        let index = self.sa_blocks.len() - 1;

        self.release(index, 0, size);

        index
    }

    /// Carve a region out of the largest free region
    ///
    /// Splits off the alignment padding and the tail remainder as new
    /// free regions. Returns None when nothing fits, which is the
    /// caller's cue to allocate a fresh block.
    fn alloc(&mut self, size: u64, align: u64) -> Option<(usize, u64)> {
        if self.sa_free.is_empty() {
            return None;
        }

        // the index is sorted so the front is the largest region
        let region = self.sa_free[0];
        let aligned_offset = round_up(region.fr_offset, align);
        let end = region.fr_offset + region.fr_size;

        if aligned_offset + size > end {
            return None;
        }

        self.sa_free.remove(0);

        if aligned_offset > region.fr_offset {
            self.insert_region(FreeRegion {
                fr_block: region.fr_block,
                fr_offset: region.fr_offset,
                fr_size: aligned_offset - region.fr_offset,
            });
        }
        if aligned_offset + size < end {
            self.insert_region(FreeRegion {
                fr_block: region.fr_block,
                fr_offset: aligned_offset + size,
                fr_size: end - (aligned_offset + size),
            });
        }

        Some((region.fr_block, aligned_offset))
    }

    /// Return a region to the free index
    ///
    /// Both neighbors of the released range are checked; contiguous
    /// regions are pulled out and merged so the index never holds two
    /// adjacent regions of the same block.
    fn release(&mut self, block: usize, offset: u64, size: u64) {
        debug_assert!(offset + size <= self.sa_blocks[block].mb_size);

        let mut offset = offset;
        let mut size = size;

        loop {
            let left = self
                .sa_free
                .iter()
                .position(|r| r.fr_block == block && r.fr_offset + r.fr_size == offset);
            if let Some(i) = left {
                let r = self.sa_free.remove(i);
                offset = r.fr_offset;
                size += r.fr_size;
                continue;
            }

            let right = self
                .sa_free
                .iter()
                .position(|r| r.fr_block == block && offset + size == r.fr_offset);
            if let Some(i) = right {
                let r = self.sa_free.remove(i);
                size += r.fr_size;
                continue;
            }

            break;
        }

        self.insert_region(FreeRegion {
            fr_block: block,
            fr_offset: offset,
            fr_size: size,
        });
    }
}

/// The device-wide allocator
///
/// One coarse mutex guards every block and free-region structure. The
/// caches and pools above this layer have their own locks, so
/// allocator work does not serialize them.
pub(crate) struct MemoryAllocator {
    m_internal: Mutex<Vec<SubAllocator>>,
}

impl MemoryAllocator {
    pub fn new(mem_props: &vk::PhysicalDeviceMemoryProperties) -> Self {
        let types = (0..mem_props.memory_type_count)
            .map(|_| SubAllocator::new())
            .collect();

        Self {
            m_internal: Mutex::new(types),
        }
    }

    /// Allocate a region of device memory
    ///
    /// Dedicated requests bypass the block pool entirely and get their
    /// own vkDeviceMemory sized exactly to the request.
    pub fn allocate(
        &self,
        dev: &ash::Device,
        memory_type: u32,
        host_visible: bool,
        size: u64,
        align: u64,
        dedicated: bool,
    ) -> Result<Allocation> {
        if dedicated {
            let (mem, map) = Self::allocate_device_memory(dev, memory_type, host_visible, size)?;
            return Ok(Allocation {
                a_memory: mem,
                a_memory_type: memory_type,
                a_block: 0,
                a_offset: 0,
                a_size: size,
                a_map: map,
                a_dedicated: true,
            });
        }

        let mut internal = self.m_internal.lock().unwrap();
        let sub = &mut internal[memory_type as usize];

        let (block, offset) = match sub.alloc(size, align) {
            Some(r) => r,
            None => {
                // nothing fits, grow the pool by one block
                let (block_size, next) = grow_block_size(sub.sa_next_block_size, size);
                sub.sa_next_block_size = next;

                let (mem, map) =
                    Self::allocate_device_memory(dev, memory_type, host_visible, block_size)?;
                log::debug!(
                    "Allocated a new {} MB block for memory type {}",
                    block_size >> 20,
                    memory_type
                );

                sub.add_block(mem, block_size, map);
                // a fresh block always has a region large enough
                sub.alloc(size, align).ok_or(SquallError::OUT_OF_DEVICE_MEMORY)?
            }
        };

        let block_map = sub.sa_blocks[block].mb_map;
        let map = if block_map.is_null() {
            std::ptr::null_mut()
        } else {
            unsafe { block_map.add(offset as usize) }
        };

        Ok(Allocation {
            a_memory: sub.sa_blocks[block].mb_mem,
            a_memory_type: memory_type,
            a_block: block,
            a_offset: offset,
            a_size: size,
            a_map: map,
            a_dedicated: false,
        })
    }

    /// Hand a region back to its block
    pub fn free(&self, dev: &ash::Device, alloc: &Allocation) {
        if alloc.a_dedicated {
            unsafe { dev.free_memory(alloc.a_memory, None) };
            return;
        }

        let mut internal = self.m_internal.lock().unwrap();
        internal[alloc.a_memory_type as usize].release(alloc.a_block, alloc.a_offset, alloc.a_size);
    }

    fn allocate_device_memory(
        dev: &ash::Device,
        memory_type: u32,
        host_visible: bool,
        size: u64,
    ) -> Result<(vk::DeviceMemory, *mut u8)> {
        let alloc_info = vk::MemoryAllocateInfo::builder()
            .allocation_size(size)
            .memory_type_index(memory_type);

        let mem = unsafe {
            match dev.allocate_memory(&alloc_info, None) {
                Ok(m) => m,
                Err(e) => {
                    log::error!("vkAllocateMemory of {} bytes failed: {:?}", size, e);
                    return Err(SquallError::OUT_OF_DEVICE_MEMORY);
                }
            }
        };

        // host visible blocks stay mapped for their whole lifetime
        let map = if host_visible {
            unsafe {
                match dev.map_memory(mem, 0, vk::WHOLE_SIZE, vk::MemoryMapFlags::empty()) {
                    Ok(p) => p as *mut u8,
                    Err(e) => {
                        log::error!("vkMapMemory failed: {:?}", e);
                        dev.free_memory(mem, None);
                        return Err(SquallError::OUT_OF_DEVICE_MEMORY);
                    }
                }
            }
        } else {
            std::ptr::null_mut()
        };

        Ok((mem, map))
    }

    /// Free every block. Resources must all be dead by now.
    pub fn destroy(&self, dev: &ash::Device) {
        let mut internal = self.m_internal.lock().unwrap();
        for sub in internal.iter_mut() {
            for block in sub.sa_blocks.iter() {
                unsafe { dev.free_memory(block.mb_mem, None) };
            }
            sub.sa_blocks.clear();
            sub.sa_free.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn suballocator_with_block(size: u64) -> SubAllocator {
        let mut sub = SubAllocator::new();
        sub.add_block(vk::DeviceMemory::null(), size, std::ptr::null_mut());
        sub
    }

    /// No two regions in the free index may be adjacent in the same block
    fn assert_coalesced(sub: &SubAllocator) {
        for a in sub.sa_free.iter() {
            for b in sub.sa_free.iter() {
                assert!(
                    !(a.fr_block == b.fr_block && a.fr_offset + a.fr_size == b.fr_offset),
                    "uncoalesced neighbors: {:?} and {:?}",
                    a,
                    b
                );
            }
        }
    }

    fn assert_sorted(sub: &SubAllocator) {
        for w in sub.sa_free.windows(2) {
            assert!(w[0].fr_size >= w[1].fr_size);
        }
    }

    #[test]
    fn alloc_splits_largest_region() {
        let mut sub = suballocator_with_block(1024);

        let (block, offset) = sub.alloc(256, 1).unwrap();
        assert_eq!((block, offset), (0, 0));
        // the remainder is one free region covering the tail
        assert_eq!(sub.sa_free.len(), 1);
        assert_eq!(sub.sa_free[0].fr_offset, 256);
        assert_eq!(sub.sa_free[0].fr_size, 768);
    }

    #[test]
    fn alloc_respects_alignment() {
        let mut sub = suballocator_with_block(1024);

        sub.alloc(10, 1).unwrap();
        // free region now starts at 10; a 256-aligned alloc must pad
        let (_, offset) = sub.alloc(64, 256).unwrap();
        assert_eq!(offset, 256);

        // the padding [10, 256) must be allocatable
        let (_, pad) = sub.alloc(246, 1).unwrap();
        assert_eq!(pad, 10);
        assert_sorted(&sub);
    }

    #[test]
    fn release_coalesces_neighbors() {
        let mut sub = suballocator_with_block(1024);

        let a = sub.alloc(128, 1).unwrap();
        let b = sub.alloc(128, 1).unwrap();
        let c = sub.alloc(128, 1).unwrap();

        // free the middle one first, then its neighbors
        sub.release(b.0, b.1, 128);
        assert_coalesced(&sub);
        sub.release(a.0, a.1, 128);
        assert_coalesced(&sub);
        sub.release(c.0, c.1, 128);
        assert_coalesced(&sub);

        // everything merged back into one block-sized region
        assert_eq!(sub.sa_free.len(), 1);
        assert_eq!(sub.sa_free[0].fr_offset, 0);
        assert_eq!(sub.sa_free[0].fr_size, 1024);
    }

    #[test]
    fn free_index_stays_sorted() {
        let mut sub = suballocator_with_block(4096);

        let mut allocs = Vec::new();
        for size in [512, 128, 1024, 64, 256].iter() {
            allocs.push((sub.alloc(*size, 1).unwrap(), *size));
            assert_sorted(&sub);
        }

        // free in a scattered order, leaving holes of differing sizes
        for i in [1, 3, 0].iter() {
            let ((block, offset), size) = allocs[*i];
            sub.release(block, offset, size);
            assert_sorted(&sub);
            assert_coalesced(&sub);
        }
    }

    #[test]
    fn alloc_fails_when_nothing_fits() {
        let mut sub = suballocator_with_block(256);

        assert!(sub.alloc(512, 1).is_none());
        let _ = sub.alloc(200, 1).unwrap();
        assert!(sub.alloc(100, 1).is_none());
    }

    #[test]
    fn blocks_grow_geometrically_and_cap() {
        let (size, next) = grow_block_size(STARTING_BLOCK_SIZE, 1024);
        assert_eq!(size, STARTING_BLOCK_SIZE);
        assert_eq!(next, 128 * 1024 * 1024);

        let (size, next) = grow_block_size(next, 1024);
        assert_eq!(size, 128 * 1024 * 1024);
        assert_eq!(next, MAX_BLOCK_SIZE);

        // the next size pins at the cap
        let (_, next) = grow_block_size(next, 1024);
        assert_eq!(next, MAX_BLOCK_SIZE);

        // oversized requests round up to block granularity instead
        let (size, _) = grow_block_size(STARTING_BLOCK_SIZE, 300 * 1024 * 1024);
        assert_eq!(size, 320 * 1024 * 1024);
    }

    #[test]
    fn interleaved_alloc_free_never_leaves_adjacent_regions() {
        let mut sub = suballocator_with_block(1 << 16);
        let mut live = Vec::new();

        // a deterministic alternating workload
        for i in 0..64u64 {
            let size = 64 + (i % 7) * 32;
            if let Some((block, offset)) = sub.alloc(size, 16) {
                live.push((block, offset, size));
            }

            if i % 3 == 0 && !live.is_empty() {
                let (block, offset, size) = live.remove((i as usize * 5) % live.len());
                sub.release(block, offset, size);
                assert_coalesced(&sub);
                assert_sorted(&sub);
            }
        }

        for (block, offset, size) in live.drain(..) {
            sub.release(block, offset, size);
            assert_coalesced(&sub);
            assert_sorted(&sub);
        }

        assert_eq!(sub.sa_free.len(), 1);
        assert_eq!(sub.sa_free[0].fr_size, 1 << 16);
    }
}
