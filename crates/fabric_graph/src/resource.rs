// SPDX-License-Identifier: MIT OR Apache-2.0
//! Frame-pooled, heap-backed resource cache.
//!
//! Resources handed back to the cache are not reusable until the GPU work
//! that last referenced them has completed. Released resources wait in a
//! pending list keyed by command buffer; the buffer's completion handler moves
//! them into the bucket for the frame after the one they were released in, so
//! a resource is never handed out again within the same frame slot.

use crate::device::{
    CommandBuffer, CommandBufferId, GpuDevice, GpuHeap, HeapDescriptor, PixelFormat, ResourceDescriptor,
    ResourceRef, SizeAndAlign, StorageMode,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, Weak};

/// Pool configuration
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceCacheConfig {
    /// Number of frame-indexed buckets
    pub frame_pool_count: usize,
    /// Smallest heap ever created, in bytes
    pub minimum_heap_size: u64,
    /// New heaps hold at least this many copies of the triggering resource
    pub heap_growth_factor: u64,
    /// Heap sizes are rounded up to a multiple of this
    pub heap_size_alignment: u64,
    /// Placement of new heaps
    pub storage_mode: StorageMode,
}

impl Default for ResourceCacheConfig {
    fn default() -> Self {
        Self {
            frame_pool_count: 3,
            minimum_heap_size: 128 * 1024 * 1024,
            heap_growth_factor: 2,
            heap_size_alignment: 256,
            storage_mode: StorageMode::Private,
        }
    }
}

/// Pool counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceCacheStats {
    /// Heaps created
    pub heaps_created: u64,
    /// Acquisitions served from a bucket
    pub resources_reused: u64,
    /// Acquisitions served by a heap
    pub resources_allocated: u64,
    /// Releases that made it back into a bucket
    pub resources_recycled: u64,
}

struct PendingRelease {
    resource: ResourceRef,
    frame_index: usize,
}

struct PoolState {
    storage_mode: StorageMode,
    heaps: Vec<Arc<dyn GpuHeap>>,
    available: Vec<HashMap<ResourceDescriptor, Vec<ResourceRef>>>,
    frame_index: usize,
    pending: HashMap<CommandBufferId, Vec<PendingRelease>>,
    /// Command buffers that already carry our completion handler, until it fires
    watched: HashSet<CommandBufferId>,
    stats: ResourceCacheStats,
}

impl PoolState {
    fn recycle(&mut self, resource: ResourceRef, released_in: usize) {
        if resource.descriptor().storage_mode != self.storage_mode {
            tracing::debug!(resource = resource.id(), "foreign storage mode; not pooled");
            return;
        }
        let bucket = (released_in + 1) % self.available.len();
        self.available[bucket]
            .entry(*resource.descriptor())
            .or_default()
            .push(resource);
        self.stats.resources_recycled += 1;
    }

    fn complete(&mut self, command_buffer: CommandBufferId) {
        self.watched.remove(&command_buffer);
        let Some(released) = self.pending.remove(&command_buffer) else {
            return;
        };
        let count = released.len();
        for release in released {
            self.recycle(release.resource, release.frame_index);
        }
        tracing::debug!(%command_buffer, count, "recycled resources after completion");
    }
}

/// Frame-indexed resource pool over a [`GpuDevice`]
pub struct ResourceCache {
    device: Arc<dyn GpuDevice>,
    config: ResourceCacheConfig,
    state: Arc<Mutex<PoolState>>,
}

impl ResourceCache {
    /// Create a cache with the default configuration
    pub fn new(device: Arc<dyn GpuDevice>) -> Self {
        Self::with_config(device, ResourceCacheConfig::default())
    }

    /// Create a cache with an explicit configuration
    pub fn with_config(device: Arc<dyn GpuDevice>, mut config: ResourceCacheConfig) -> Self {
        config.frame_pool_count = config.frame_pool_count.max(1);
        config.heap_growth_factor = config.heap_growth_factor.max(1);
        config.heap_size_alignment = config.heap_size_alignment.max(1);

        let state = PoolState {
            storage_mode: config.storage_mode,
            heaps: Vec::new(),
            available: (0..config.frame_pool_count).map(|_| HashMap::new()).collect(),
            frame_index: 0,
            pending: HashMap::new(),
            watched: HashSet::new(),
            stats: ResourceCacheStats::default(),
        };
        Self {
            device,
            config,
            state: Arc::new(Mutex::new(state)),
        }
    }

    /// Effective configuration
    pub fn config(&self) -> &ResourceCacheConfig {
        &self.config
    }

    /// Select the bucket for `frame`
    pub fn begin_frame(&self, frame: u64) {
        let index = (frame % self.config.frame_pool_count as u64) as usize;
        self.state.lock().frame_index = index;
    }

    /// Bucket currently served
    pub fn frame_index(&self) -> usize {
        self.state.lock().frame_index
    }

    /// Get a resource of exactly this shape.
    ///
    /// Tries the current bucket, then every existing heap, then a new heap.
    /// Returns `None` when the device cannot provide memory.
    pub fn acquire(&self, descriptor: &ResourceDescriptor) -> Option<ResourceRef> {
        let heaps = {
            let mut state = self.state.lock();
            let index = state.frame_index;
            if let Some(resource) = state.available[index].get_mut(descriptor).and_then(Vec::pop) {
                state.stats.resources_reused += 1;
                return Some(resource);
            }
            state.heaps.clone()
        };

        for heap in &heaps {
            if let Some(resource) = heap.make_resource(descriptor) {
                self.state.lock().stats.resources_allocated += 1;
                return Some(resource);
            }
        }

        let heap_size = self.device.heap_size_and_align(descriptor).and_then(|SizeAndAlign { size, align }| {
            let wanted = size.checked_mul(self.config.heap_growth_factor)?;
            align_up(
                self.config.minimum_heap_size.max(wanted),
                align.max(self.config.heap_size_alignment),
            )
        });
        let Some(heap_size) = heap_size else {
            tracing::warn!(?descriptor, "resource size overflows; nothing allocated");
            return None;
        };
        let Some(heap) = self.device.make_heap(&HeapDescriptor {
            size: heap_size,
            storage_mode: self.config.storage_mode,
        }) else {
            tracing::warn!(?descriptor, heap_size, "heap allocation failed");
            return None;
        };

        let resource = heap.make_resource(descriptor);
        let mut state = self.state.lock();
        state.heaps.push(heap);
        state.stats.heaps_created += 1;
        tracing::debug!(heap_size, heaps = state.heaps.len(), "created resource heap");

        match resource {
            Some(resource) => {
                state.stats.resources_allocated += 1;
                Some(resource)
            }
            None => {
                tracing::warn!(?descriptor, heap_size, "resource does not fit a fresh heap");
                None
            }
        }
    }

    /// Get a 2D image in the configured storage mode
    pub fn acquire_image(&self, width: u32, height: u32, format: PixelFormat) -> Option<ResourceRef> {
        let descriptor =
            ResourceDescriptor::texture_2d(width, height, format).with_storage_mode(self.config.storage_mode);
        self.acquire(&descriptor)
    }

    /// Hand a resource back once `command_buffer` completes.
    ///
    /// The first release against a command buffer registers its completion
    /// handler; later releases only join the pending list.
    pub fn release(&self, resource: ResourceRef, command_buffer: &dyn CommandBuffer) {
        let id = command_buffer.id();
        let register = {
            let mut state = self.state.lock();
            let frame_index = state.frame_index;
            state.pending.entry(id).or_default().push(PendingRelease {
                resource,
                frame_index,
            });
            state.watched.insert(id)
        };

        if register {
            let state: Weak<Mutex<PoolState>> = Arc::downgrade(&self.state);
            command_buffer.add_completed_handler(Box::new(move || {
                if let Some(state) = state.upgrade() {
                    state.lock().complete(id);
                }
            }));
        }
    }

    /// Hand back a resource no in-flight GPU work references
    pub fn release_now(&self, resource: ResourceRef) {
        let mut state = self.state.lock();
        let frame_index = state.frame_index;
        state.recycle(resource, frame_index);
    }

    /// Drop every pooled resource; heaps stay
    pub fn flush_reusable(&self) {
        let mut state = self.state.lock();
        for bucket in &mut state.available {
            bucket.clear();
        }
    }

    /// Drop pooled resources, pending releases and heaps
    pub fn reset(&self) {
        let mut state = self.state.lock();
        for bucket in &mut state.available {
            bucket.clear();
        }
        // In-flight buffers keep their handler registered; see `watched`.
        state.pending.clear();
        state.heaps.clear();
        tracing::debug!("resource cache reset");
    }

    /// Counters so far
    pub fn stats(&self) -> ResourceCacheStats {
        self.state.lock().stats
    }

    /// Pooled resources across all buckets
    pub fn available_count(&self) -> usize {
        self.state
            .lock()
            .available
            .iter()
            .flat_map(HashMap::values)
            .map(Vec::len)
            .sum()
    }

    /// Resources waiting for a command buffer
    pub fn pending_count(&self) -> usize {
        self.state.lock().pending.values().map(Vec::len).sum()
    }

    /// Number of live heaps
    pub fn heap_count(&self) -> usize {
        self.state.lock().heaps.len()
    }
}

impl fmt::Debug for ResourceCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("ResourceCache")
            .field("config", &self.config)
            .field("frame_index", &state.frame_index)
            .field("heaps", &state.heaps.len())
            .field("stats", &state.stats)
            .finish()
    }
}

fn align_up(value: u64, align: u64) -> Option<u64> {
    value.checked_next_multiple_of(align)
}
