// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image producing nodes backed by the frame resource pool.

use crate::context::ExecutionContext;
use crate::device::{PixelFormat, ResourceRef};
use crate::node::{ExecutionMode, Node, NodeIo};
use crate::port::{PortDecl, PortType, PortValue, SharedValue};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;

const MAX_DIMENSION: i64 = 16_384;

/// Register every image node type
pub fn register(registry: &mut NodeRegistry) {
    registry.register("image.solid", "Solid Color", "Image filled with one color", || {
        Box::new(SolidImageNode::new())
    });
}

/// Payload of an image port
#[derive(Debug, Clone)]
pub struct ImageFrame {
    /// Pooled texture holding the pixels
    pub resource: ResourceRef,
    /// Fill color the texture was cleared to, brightness applied
    pub fill: [f32; 4],
}

impl ImageFrame {
    /// Read the frame out of an image port value
    pub fn from_value(value: &PortValue) -> Option<&ImageFrame> {
        match value {
            PortValue::Image(shared) => shared.downcast_ref::<ImageFrame>(),
            _ => None,
        }
    }
}

/// Renders a solid color into a pooled texture.
///
/// Each run hands the previous texture back to the pool against the frame's
/// command buffer before taking a new one.
#[derive(Debug, Default)]
pub struct SolidImageNode {
    current: Option<ResourceRef>,
}

impl SolidImageNode {
    /// Create a solid image node
    pub fn new() -> Self {
        Self::default()
    }
}

impl Node for SolidImageNode {
    fn type_key(&self) -> &str {
        "image.solid"
    }

    fn name(&self) -> &str {
        "Solid Color"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Processor
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::inlet("Width", PortType::Int).with_value(256_i64),
            PortDecl::inlet("Height", PortType::Int).with_value(256_i64),
            PortDecl::inlet("Color", PortType::Color).with_value(PortValue::Color([1.0, 1.0, 1.0, 1.0])),
            PortDecl::inlet("Brightness", PortType::Float).with_value(1.0_f32),
            PortDecl::outlet("Image", PortType::Image),
        ]
    }

    fn execute(&mut self, _ctx: &ExecutionContext, io: &mut NodeIo<'_>, targets: &mut FrameTargets<'_>) {
        let width = io.int_or("Width", 256).clamp(1, MAX_DIMENSION) as u32;
        let height = io.int_or("Height", 256).clamp(1, MAX_DIMENSION) as u32;
        let color = match io.value("Color") {
            Some(PortValue::Color(color)) => *color,
            _ => [1.0; 4],
        };
        let brightness = io.float_or("Brightness", 1.0).max(0.0);
        let fill = [color[0] * brightness, color[1] * brightness, color[2] * brightness, color[3]];

        if let Some(previous) = self.current.take() {
            targets.release(previous);
        }

        match targets.resources().acquire_image(width, height, PixelFormat::Rgba8Unorm) {
            Some(resource) => {
                self.current = Some(resource.clone());
                io.send("Image", Some(PortValue::Image(SharedValue::new(ImageFrame { resource, fill }))));
            }
            None => {
                tracing::warn!(node = %io.node_id(), width, height, "no texture available");
                io.send("Image", None);
            }
        }
    }

    fn teardown(&mut self) {
        self.current = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FrameTiming;
    use crate::graph::Graph;
    use crate::renderer::GraphRenderer;
    use crate::resource::{ResourceCache, ResourceCacheConfig};
    use crate::software::SoftwareDevice;
    use std::sync::Arc;

    fn ctx(frame: u64) -> ExecutionContext {
        ExecutionContext::new(FrameTiming {
            frame_number: frame,
            ..FrameTiming::default()
        })
    }

    #[test]
    fn test_textures_recycle_through_command_buffers() {
        let device = Arc::new(SoftwareDevice::new());
        let config = ResourceCacheConfig {
            minimum_heap_size: 1 << 20,
            ..ResourceCacheConfig::default()
        };
        let cache = Arc::new(ResourceCache::with_config(device.clone(), config));
        let mut renderer = GraphRenderer::new(cache.clone());

        let mut graph = Graph::new("images");
        let solid = graph.add_node(SolidImageNode::new());
        let width = graph.port_id(solid, "Width").unwrap();
        let color = graph.port_id(solid, "Color").unwrap();
        let image = graph.port_id(solid, "Image").unwrap();
        graph.send(width, Some(PortValue::Int(16)));
        graph.send(graph.port_id(solid, "Height").unwrap(), Some(PortValue::Int(16)));
        graph.set_published(image, true);

        let cb0 = device.make_command_buffer();
        renderer.execute(&mut graph, &ctx(0), Some(&*cb0));
        let first = graph.port_value(image).cloned().unwrap();
        let first_id = ImageFrame::from_value(&first).unwrap().resource.id();
        assert_eq!(cache.stats().resources_allocated, 1);

        // Frame 1 releases the first texture against cb1.
        graph.send(color, Some(PortValue::Color([1.0, 0.0, 0.0, 1.0])));
        let cb1 = device.make_command_buffer();
        renderer.execute(&mut graph, &ctx(1), Some(&*cb1));
        assert_eq!(cache.pending_count(), 1);
        cb1.complete();
        assert_eq!(cache.pending_count(), 0);

        // Frame 2 draws from the bucket the first texture was recycled into.
        graph.send(color, Some(PortValue::Color([0.0, 1.0, 0.0, 1.0])));
        let cb2 = device.make_command_buffer();
        renderer.execute(&mut graph, &ctx(2), Some(&*cb2));
        let third = graph.port_value(image).cloned().unwrap();
        let frame = ImageFrame::from_value(&third).unwrap();
        assert_eq!(frame.resource.id(), first_id);
        assert_eq!(frame.fill, [0.0, 1.0, 0.0, 1.0]);
        assert_eq!(cache.stats().resources_reused, 1);
        assert_eq!(cache.stats().resources_allocated, 2);
    }

    #[test]
    fn test_pool_failure_sends_null() {
        let device = Arc::new(SoftwareDevice::with_max_heap_size(1024));
        let config = ResourceCacheConfig {
            minimum_heap_size: 1024,
            ..ResourceCacheConfig::default()
        };
        let cache = Arc::new(ResourceCache::with_config(device, config));
        let mut graph = Graph::new("images");
        let solid = graph.add_node(SolidImageNode::new());
        let image = graph.port_id(solid, "Image").unwrap();
        graph.set_published(image, true);

        GraphRenderer::new(cache).execute(&mut graph, &ctx(0), None);
        assert_eq!(graph.port_value(image), None);
    }
}
