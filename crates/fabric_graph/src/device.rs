// SPDX-License-Identifier: MIT OR Apache-2.0
//! Device seam for GPU-resident resources.
//!
//! The resource cache only ever talks to these traits. A real renderer
//! implements them over its graphics API; [`crate::software`] provides a CPU
//! implementation.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::BitOr;
use std::sync::Arc;

/// What a pooled resource is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ResourceKind {
    /// Untyped byte buffer
    Buffer,
    /// 2D texture
    Texture2D,
}

/// Texel or element format
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PixelFormat {
    /// Single 8-bit channel
    R8Unorm,
    /// 8-bit RGBA
    Rgba8Unorm,
    /// 8-bit BGRA
    Bgra8Unorm,
    /// Half float RGBA
    Rgba16Float,
    /// Single float channel
    R32Float,
    /// Float RGBA
    Rgba32Float,
    /// 32-bit depth
    Depth32Float,
}

impl PixelFormat {
    /// Size of one texel in bytes
    pub fn bytes_per_pixel(self) -> u64 {
        match self {
            Self::R8Unorm => 1,
            Self::Rgba8Unorm | Self::Bgra8Unorm | Self::R32Float | Self::Depth32Float => 4,
            Self::Rgba16Float => 8,
            Self::Rgba32Float => 16,
        }
    }
}

/// Usage flags
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TextureUsage(pub u32);

impl TextureUsage {
    /// Sampled in shaders
    pub const SHADER_READ: Self = Self(1);
    /// Written from shaders
    pub const SHADER_WRITE: Self = Self(1 << 1);
    /// Bound as a render target
    pub const RENDER_TARGET: Self = Self(1 << 2);

    /// Whether every flag of `other` is set
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for TextureUsage {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// Where the memory lives
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StorageMode {
    /// GPU only
    #[default]
    Private,
    /// Visible to CPU and GPU
    Shared,
    /// Mirrored, synchronised explicitly
    Managed,
    /// Tile memory only
    Memoryless,
}

/// Exact shape of a resource; pooled resources are matched on equality
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Buffer or texture
    pub kind: ResourceKind,
    /// Width in texels, or length in bytes for buffers
    pub width: u32,
    /// Height in texels, 1 for buffers
    pub height: u32,
    /// Texel format
    pub format: PixelFormat,
    /// Usage flags
    pub usage: TextureUsage,
    /// Memory placement
    pub storage_mode: StorageMode,
    /// MSAA sample count
    pub sample_count: u32,
    /// Mip level count
    pub mip_levels: u32,
}

impl ResourceDescriptor {
    /// A single-sampled 2D texture readable and writable from shaders
    pub fn texture_2d(width: u32, height: u32, format: PixelFormat) -> Self {
        Self {
            kind: ResourceKind::Texture2D,
            width,
            height,
            format,
            usage: TextureUsage::SHADER_READ | TextureUsage::SHADER_WRITE | TextureUsage::RENDER_TARGET,
            storage_mode: StorageMode::Private,
            sample_count: 1,
            mip_levels: 1,
        }
    }

    /// A byte buffer
    pub fn buffer(length: u32) -> Self {
        Self {
            kind: ResourceKind::Buffer,
            width: length,
            height: 1,
            format: PixelFormat::R8Unorm,
            usage: TextureUsage::SHADER_READ,
            storage_mode: StorageMode::Shared,
            sample_count: 1,
            mip_levels: 1,
        }
    }

    /// Replace the usage flags
    pub fn with_usage(mut self, usage: TextureUsage) -> Self {
        self.usage = usage;
        self
    }

    /// Set the mip level count
    pub fn with_mip_levels(mut self, mip_levels: u32) -> Self {
        self.mip_levels = mip_levels.max(1);
        self
    }

    /// Set the sample count
    pub fn with_samples(mut self, sample_count: u32) -> Self {
        self.sample_count = sample_count.max(1);
        self
    }

    /// Set the storage mode
    pub fn with_storage_mode(mut self, storage_mode: StorageMode) -> Self {
        self.storage_mode = storage_mode;
        self
    }

    /// Unpadded size in bytes, mip chain included.
    ///
    /// `None` when the size does not fit in a `u64`.
    pub fn byte_size(&self) -> Option<u64> {
        let texel = self.format.bytes_per_pixel();
        if self.kind == ResourceKind::Buffer {
            return Some(u64::from(self.width));
        }

        let levels = u64::from(self.mip_levels.max(1));
        let mut total: u64 = 0;
        let (mut w, mut h) = (u64::from(self.width.max(1)), u64::from(self.height.max(1)));
        for level in 0..levels {
            total = total.checked_add(w.checked_mul(h)?.checked_mul(texel)?)?;
            if w == 1 && h == 1 {
                // Every remaining level is a single texel.
                total = total.checked_add((levels - level - 1).checked_mul(texel)?)?;
                break;
            }
            w = (w / 2).max(1);
            h = (h / 2).max(1);
        }
        total.checked_mul(u64::from(self.sample_count.max(1)))
    }
}

/// Heap footprint of a resource
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SizeAndAlign {
    /// Bytes the resource occupies in a heap
    pub size: u64,
    /// Required placement alignment
    pub align: u64,
}

/// Parameters for a new heap
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapDescriptor {
    /// Total bytes
    pub size: u64,
    /// Memory placement
    pub storage_mode: StorageMode,
}

/// Identity of a submitted command buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandBufferId(pub u64);

impl fmt::Display for CommandBufferId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cb#{}", self.0)
    }
}

/// A GPU-resident buffer or texture
pub trait GpuResource: fmt::Debug + Send + Sync {
    /// Identity, unique per device
    fn id(&self) -> u64;

    /// Shape the resource was created with
    fn descriptor(&self) -> &ResourceDescriptor;
}

/// Shared handle to a resource
pub type ResourceRef = Arc<dyn GpuResource>;

/// Growable allocation arena
pub trait GpuHeap: fmt::Debug + Send + Sync {
    /// Total bytes
    fn size(&self) -> u64;

    /// Bytes handed out so far
    fn used_size(&self) -> u64;

    /// Place a resource in this heap; `None` when it does not fit
    fn make_resource(&self, descriptor: &ResourceDescriptor) -> Option<ResourceRef>;
}

/// The device resources and heaps come from
pub trait GpuDevice: Send + Sync {
    /// Heap footprint of a resource shape; `None` when it cannot be placed at all
    fn heap_size_and_align(&self, descriptor: &ResourceDescriptor) -> Option<SizeAndAlign>;

    /// Create a heap; `None` when the device is out of memory
    fn make_heap(&self, descriptor: &HeapDescriptor) -> Option<Arc<dyn GpuHeap>>;
}

/// Callback run once a command buffer finished on the GPU
pub type CompletionHandler = Box<dyn FnOnce() + Send + 'static>;

/// A submitted unit of GPU work
pub trait CommandBuffer: Send + Sync {
    /// Identity
    fn id(&self) -> CommandBufferId;

    /// Register a callback for completion. May run on any thread.
    fn add_completed_handler(&self, handler: CompletionHandler);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_descriptor_equality_is_exact() {
        let a = ResourceDescriptor::texture_2d(64, 64, PixelFormat::Rgba8Unorm);
        assert_eq!(a, ResourceDescriptor::texture_2d(64, 64, PixelFormat::Rgba8Unorm));
        assert_ne!(a, a.with_samples(4));
        assert_ne!(a, a.with_mip_levels(2));
        assert_ne!(a, a.with_storage_mode(StorageMode::Shared));
        assert_ne!(a, a.with_usage(TextureUsage::SHADER_READ));
    }

    #[test]
    fn test_byte_size() {
        let tex = ResourceDescriptor::texture_2d(4, 4, PixelFormat::Rgba8Unorm);
        assert_eq!(tex.byte_size(), Some(64));
        assert_eq!(tex.with_mip_levels(3).byte_size(), Some(64 + 16 + 4));
        assert_eq!(tex.with_mip_levels(10).byte_size(), Some(64 + 16 + 4 * 8));
        assert_eq!(tex.with_samples(4).byte_size(), Some(256));
        assert_eq!(ResourceDescriptor::buffer(1000).byte_size(), Some(1000));
    }

    #[test]
    fn test_byte_size_overflow() {
        let huge = ResourceDescriptor::texture_2d(u32::MAX, u32::MAX, PixelFormat::Rgba32Float);
        assert_eq!(huge.byte_size(), None);
        let wide = ResourceDescriptor::texture_2d(u32::MAX, 1, PixelFormat::R8Unorm);
        assert_eq!(wide.with_samples(u32::MAX).byte_size(), Some(u64::from(u32::MAX) * u64::from(u32::MAX)));
    }

    #[test]
    fn test_usage_flags() {
        let usage = TextureUsage::SHADER_READ | TextureUsage::RENDER_TARGET;
        assert!(usage.contains(TextureUsage::SHADER_READ));
        assert!(!usage.contains(TextureUsage::SHADER_WRITE));
    }
}
