// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in graph played when no document is configured.

use fabric_graph::nodes::image::SolidImageNode;
use fabric_graph::nodes::math::{MathNode, MathOp};
use fabric_graph::nodes::time::CurrentTimeNode;
use fabric_graph::nodes::utility::{PreviewNode, PreviewProbe};
use fabric_graph::{ConnectionError, Graph, NodeId, SubgraphNode};

/// Demo graph and a handle on its preview
pub struct Demo {
    /// The graph
    pub graph: Graph,
    /// Observes the preview consumer
    pub probe: PreviewProbe,
}

fn link(graph: &mut Graph, from: NodeId, outlet: &str, to: NodeId, inlet: &str) -> Result<(), ConnectionError> {
    let (Some(outlet), Some(inlet)) = (graph.port_id(from, outlet), graph.port_id(to, inlet)) else {
        tracing::warn!(outlet, inlet, "demo port missing");
        return Ok(());
    };
    graph.connect(outlet, inlet)?;
    Ok(())
}

/// Nested graph adding ten to its `A` inlet
fn offset_graph() -> Graph {
    let mut inner = Graph::new("Offset");
    let add = inner.add_node(MathNode::new(MathOp::Add).with_operand(10.0));
    for name in ["A", "Result"] {
        if let Some(port) = inner.port_id(add, name) {
            inner.set_published(port, true);
        }
    }
    inner
}

/// Build the demo:
///
/// ```text
/// Counter(+1) <-> itself --> Offset subgraph --> Preview
/// Time --> Multiply(0.5) --> Solid image (Brightness, published)
/// ```
///
/// The counter reads its own previous output, so it counts passes.
pub fn build() -> Result<Demo, ConnectionError> {
    let mut graph = Graph::new("Demo");

    let counter = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
    graph.set_node_name(counter, "Counter");
    let offset = graph.add_node(SubgraphNode::new(offset_graph()));
    let preview_node = PreviewNode::new();
    let probe = preview_node.probe();
    let preview = graph.add_node(preview_node);

    link(&mut graph, counter, "Result", counter, "A")?;
    link(&mut graph, counter, "Result", offset, "A")?;
    link(&mut graph, offset, "Result", preview, "Input")?;

    let time = graph.add_node(CurrentTimeNode::new());
    let scale = graph.add_node(MathNode::new(MathOp::Multiply).with_operand(0.5));
    let image = graph.add_node(SolidImageNode::new());
    link(&mut graph, time, "Time", scale, "A")?;
    link(&mut graph, scale, "Result", image, "Brightness")?;
    if let Some(out) = graph.port_id(image, "Image") {
        graph.set_published(out, true);
    }

    Ok(Demo { graph, probe })
}

#[cfg(test)]
mod tests {
    use super::*;
    use fabric_graph::resource::ResourceCache;
    use fabric_graph::software::SoftwareDevice;
    use fabric_graph::{GraphRenderer, PortValue};
    use std::sync::Arc;

    #[test]
    fn test_demo_counts_passes() {
        let Demo { mut graph, probe } = build().unwrap();
        let mut renderer = GraphRenderer::new(Arc::new(ResourceCache::new(Arc::new(SoftwareDevice::new()))));
        for frame in 0..3 {
            renderer.execute_at(&mut graph, frame as f64 / 60.0, None);
        }
        assert_eq!(probe.value(), Some(PortValue::Float(13.0)));
    }
}
