// SPDX-License-Identifier: MIT OR Apache-2.0
//! CPU implementation of the device seam.
//!
//! Heaps are bump allocators that only track offsets; resources carry no
//! storage. Command buffers complete when [`SoftwareCommandBuffer::complete`]
//! is called, from whichever thread calls it.

use crate::device::{
    CommandBuffer, CommandBufferId, CompletionHandler, GpuDevice, GpuHeap, GpuResource, HeapDescriptor,
    ResourceDescriptor, ResourceKind, ResourceRef, SizeAndAlign,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

const TEXTURE_ALIGN: u64 = 256;
const BUFFER_ALIGN: u64 = 16;

fn footprint(descriptor: &ResourceDescriptor) -> Option<SizeAndAlign> {
    let align = match descriptor.kind {
        ResourceKind::Texture2D => TEXTURE_ALIGN,
        ResourceKind::Buffer => BUFFER_ALIGN,
    };
    Some(SizeAndAlign {
        size: descriptor.byte_size()?.max(1).checked_next_multiple_of(align)?,
        align,
    })
}

/// A placed resource
#[derive(Debug)]
pub struct SoftwareResource {
    id: u64,
    descriptor: ResourceDescriptor,
    offset: u64,
}

impl SoftwareResource {
    /// Byte offset inside the owning heap
    pub fn offset(&self) -> u64 {
        self.offset
    }
}

impl GpuResource for SoftwareResource {
    fn id(&self) -> u64 {
        self.id
    }

    fn descriptor(&self) -> &ResourceDescriptor {
        &self.descriptor
    }
}

/// Bump-allocated heap
#[derive(Debug)]
pub struct SoftwareHeap {
    size: u64,
    used: Mutex<u64>,
    next_id: Arc<AtomicU64>,
}

impl GpuHeap for SoftwareHeap {
    fn size(&self) -> u64 {
        self.size
    }

    fn used_size(&self) -> u64 {
        *self.used.lock()
    }

    fn make_resource(&self, descriptor: &ResourceDescriptor) -> Option<ResourceRef> {
        let SizeAndAlign { size, align } = footprint(descriptor)?;
        let mut used = self.used.lock();
        let offset = used.checked_next_multiple_of(align)?;
        let end = offset.checked_add(size).filter(|end| *end <= self.size)?;
        *used = end;

        Some(Arc::new(SoftwareResource {
            id: self.next_id.fetch_add(1, Ordering::Relaxed),
            descriptor: *descriptor,
            offset,
        }))
    }
}

/// In-process device
#[derive(Debug, Default)]
pub struct SoftwareDevice {
    max_heap_size: Option<u64>,
    next_resource_id: Arc<AtomicU64>,
    next_command_buffer: AtomicU64,
    heaps_made: AtomicUsize,
}

impl SoftwareDevice {
    /// Create a device without memory limits
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a device that refuses heaps larger than `max_heap_size`
    pub fn with_max_heap_size(max_heap_size: u64) -> Self {
        Self {
            max_heap_size: Some(max_heap_size),
            ..Self::default()
        }
    }

    /// Number of heaps created so far
    pub fn heaps_made(&self) -> usize {
        self.heaps_made.load(Ordering::Relaxed)
    }

    /// A fresh command buffer
    pub fn make_command_buffer(&self) -> Arc<SoftwareCommandBuffer> {
        let id = self.next_command_buffer.fetch_add(1, Ordering::Relaxed);
        Arc::new(SoftwareCommandBuffer::new(CommandBufferId(id)))
    }
}

impl GpuDevice for SoftwareDevice {
    fn heap_size_and_align(&self, descriptor: &ResourceDescriptor) -> Option<SizeAndAlign> {
        footprint(descriptor)
    }

    fn make_heap(&self, descriptor: &HeapDescriptor) -> Option<Arc<dyn GpuHeap>> {
        if self.max_heap_size.is_some_and(|max| descriptor.size > max) {
            return None;
        }
        self.heaps_made.fetch_add(1, Ordering::Relaxed);
        Some(Arc::new(SoftwareHeap {
            size: descriptor.size,
            used: Mutex::new(0),
            next_id: Arc::clone(&self.next_resource_id),
        }))
    }
}

#[derive(Default)]
struct CompletionState {
    completed: bool,
    handlers: Vec<CompletionHandler>,
}

/// Command buffer completed by hand
pub struct SoftwareCommandBuffer {
    id: CommandBufferId,
    state: Mutex<CompletionState>,
}

impl SoftwareCommandBuffer {
    /// Create a pending command buffer
    pub fn new(id: CommandBufferId) -> Self {
        Self {
            id,
            state: Mutex::new(CompletionState::default()),
        }
    }

    /// Mark finished and run every registered handler on this thread
    pub fn complete(&self) {
        let handlers = {
            let mut state = self.state.lock();
            if state.completed {
                return;
            }
            state.completed = true;
            std::mem::take(&mut state.handlers)
        };
        for handler in handlers {
            handler();
        }
    }

    /// Whether [`SoftwareCommandBuffer::complete`] ran
    pub fn is_completed(&self) -> bool {
        self.state.lock().completed
    }

    /// Handlers waiting for completion
    pub fn handler_count(&self) -> usize {
        self.state.lock().handlers.len()
    }
}

impl CommandBuffer for SoftwareCommandBuffer {
    fn id(&self) -> CommandBufferId {
        self.id
    }

    fn add_completed_handler(&self, handler: CompletionHandler) {
        let mut state = self.state.lock();
        if state.completed {
            drop(state);
            handler();
            return;
        }
        state.handlers.push(handler);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::PixelFormat;
    use std::sync::atomic::AtomicBool;

    #[test]
    fn test_heap_bump_allocation() {
        let device = SoftwareDevice::new();
        let heap = device
            .make_heap(&HeapDescriptor {
                size: 1024,
                storage_mode: Default::default(),
            })
            .unwrap();
        let desc = ResourceDescriptor::texture_2d(8, 8, PixelFormat::Rgba8Unorm);

        let first = heap.make_resource(&desc).unwrap();
        let second = heap.make_resource(&desc).unwrap();
        assert_ne!(first.id(), second.id());
        assert_eq!(heap.used_size(), 512);
        assert!(heap.make_resource(&ResourceDescriptor::texture_2d(16, 16, PixelFormat::Rgba8Unorm)).is_none());
    }

    #[test]
    fn test_oversized_resource_has_no_footprint() {
        let device = SoftwareDevice::new();
        let huge = ResourceDescriptor::texture_2d(u32::MAX, u32::MAX, PixelFormat::Rgba32Float);
        assert_eq!(device.heap_size_and_align(&huge), None);

        let heap = device
            .make_heap(&HeapDescriptor {
                size: u64::MAX,
                storage_mode: Default::default(),
            })
            .unwrap();
        assert!(heap.make_resource(&huge).is_none());
        assert_eq!(heap.used_size(), 0);
    }

    #[test]
    fn test_heap_limit() {
        let device = SoftwareDevice::with_max_heap_size(4096);
        let small = HeapDescriptor {
            size: 4096,
            storage_mode: Default::default(),
        };
        let large = HeapDescriptor { size: 8192, ..small };
        assert!(device.make_heap(&small).is_some());
        assert!(device.make_heap(&large).is_none());
        assert_eq!(device.heaps_made(), 1);
    }

    #[test]
    fn test_completion_runs_handlers_once() {
        let device = SoftwareDevice::new();
        let cb = device.make_command_buffer();
        let fired = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&fired);
        cb.add_completed_handler(Box::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));
        assert_eq!(cb.handler_count(), 1);

        cb.complete();
        cb.complete();
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(cb.is_completed());
    }

    #[test]
    fn test_handler_after_completion_runs_immediately() {
        let cb = SoftwareCommandBuffer::new(CommandBufferId(9));
        cb.complete();
        let fired = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&fired);
        cb.add_completed_handler(Box::new(move || flag.store(true, Ordering::SeqCst)));
        assert!(fired.load(Ordering::SeqCst));
    }
}
