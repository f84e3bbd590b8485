// SPDX-License-Identifier: MIT OR Apache-2.0
//! Sinks and value plumbing.

use crate::context::ExecutionContext;
use crate::node::{ExecutionMode, Node, NodeIo};
use crate::port::{PortDecl, PortType, PortValue};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;
use parking_lot::Mutex;
use std::sync::Arc;

/// Register every utility node type
pub fn register(registry: &mut NodeRegistry) {
    registry.register(
        "utility.sample_and_hold",
        "Sample and Hold",
        "Latches Value while Sample is true",
        || Box::new(SampleAndHoldNode::new()),
    );
    registry.register("utility.preview", "Preview", "Displays its input", || {
        Box::new(PreviewNode::new())
    });
}

/// Copies `Value` to `Held` on passes where `Sample` is true
#[derive(Debug, Clone, Default)]
pub struct SampleAndHoldNode;

impl SampleAndHoldNode {
    /// Create a sample and hold node
    pub fn new() -> Self {
        Self
    }
}

impl Node for SampleAndHoldNode {
    fn type_key(&self) -> &str {
        "utility.sample_and_hold"
    }

    fn name(&self) -> &str {
        "Sample and Hold"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Processor
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::inlet("Value", PortType::Virtual),
            PortDecl::inlet("Sample", PortType::Bool).with_value(false),
            PortDecl::outlet("Held", PortType::Virtual),
        ]
    }

    fn execute(&mut self, _ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        if io.bool_or("Sample", false) {
            let value = io.value("Value").cloned();
            io.send("Held", value);
        }
    }
}

#[derive(Debug, Default)]
struct PreviewState {
    value: Option<PortValue>,
    executions: usize,
}

/// Read side of a [`PreviewNode`], usable after the node moved into a graph
#[derive(Debug, Clone, Default)]
pub struct PreviewProbe {
    state: Arc<Mutex<PreviewState>>,
}

impl PreviewProbe {
    /// Last value the preview received
    pub fn value(&self) -> Option<PortValue> {
        self.state.lock().value.clone()
    }

    /// How many times the preview executed
    pub fn executions(&self) -> usize {
        self.state.lock().executions
    }
}

/// Consumer that records whatever reaches its `Input`
#[derive(Debug, Default)]
pub struct PreviewNode {
    probe: PreviewProbe,
}

impl PreviewNode {
    /// Create a preview node
    pub fn new() -> Self {
        Self::default()
    }

    /// Handle observing this node's input
    pub fn probe(&self) -> PreviewProbe {
        self.probe.clone()
    }
}

impl Node for PreviewNode {
    fn type_key(&self) -> &str {
        "utility.preview"
    }

    fn name(&self) -> &str {
        "Preview"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Consumer
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![PortDecl::inlet("Input", PortType::Virtual)]
    }

    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        let value = io.value("Input").cloned();
        if io.value_did_change("Input") {
            tracing::debug!(node = %io.node_id(), frame = ctx.frame_number(), ?value, "preview");
        }

        let mut state = self.probe.state.lock();
        state.value = value;
        state.executions += 1;
    }

    fn teardown(&mut self) {
        self.probe.state.lock().value = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::Graph;
    use crate::renderer::GraphRenderer;
    use crate::resource::ResourceCache;
    use crate::software::SoftwareDevice;

    #[test]
    fn test_sample_and_hold_latches() {
        let mut graph = Graph::new("hold");
        let hold = graph.add_node(SampleAndHoldNode::new());
        let value = graph.port_id(hold, "Value").unwrap();
        let sample = graph.port_id(hold, "Sample").unwrap();
        let held = graph.port_id(hold, "Held").unwrap();
        graph.set_published(held, true);
        let mut renderer = GraphRenderer::new(Arc::new(ResourceCache::new(Arc::new(SoftwareDevice::new()))));

        graph.send(value, Some(PortValue::Float(1.0)));
        renderer.execute_at(&mut graph, 0.0, None);
        assert_eq!(graph.port_value(held), None);

        graph.send(sample, Some(PortValue::Bool(true)));
        renderer.execute_at(&mut graph, 0.1, None);
        assert_eq!(graph.port_value(held), Some(&PortValue::Float(1.0)));

        graph.send(sample, Some(PortValue::Bool(false)));
        graph.send(value, Some(PortValue::Float(2.0)));
        renderer.execute_at(&mut graph, 0.2, None);
        assert_eq!(graph.port_value(held), Some(&PortValue::Float(1.0)));
    }

    #[test]
    fn test_probe_outlives_move() {
        let node = PreviewNode::new();
        let probe = node.probe();
        let mut graph = Graph::new("preview");
        let preview = graph.add_node(node);
        graph.send(graph.port_id(preview, "Input").unwrap(), Some(PortValue::from("hello")));

        GraphRenderer::new(Arc::new(ResourceCache::new(Arc::new(SoftwareDevice::new()))))
            .execute_at(&mut graph, 0.0, None);
        assert_eq!(probe.value(), Some(PortValue::from("hello")));
        assert_eq!(probe.executions(), 1);
    }
}
