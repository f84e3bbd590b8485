// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes that own a nested graph.
//!
//! The nested graph's published ports become the owning node's ports. Inner
//! traversal runs in its own feedback scope, so it cannot disturb the parent
//! pass that is executing the owning node.

use crate::context::{ExecutionContext, IterationInfo};
use crate::document::{DecodeError, GraphDocument};
use crate::graph::Graph;
use crate::node::{ExecutionMode, Node, NodeIo};
use crate::port::{PortDecl, PortId, PortKind, PortType};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;

/// Registry key of [`SubgraphNode`]
pub const SUBGRAPH_TYPE: &str = "subgraph";
/// Registry key of [`IteratorNode`]
pub const ITERATOR_TYPE: &str = "subgraph.iterator";

const ITERATIONS_PORT: &str = "Iterations";
const DEFAULT_ITERATIONS: i64 = 2;

/// Most inner passes an [`IteratorNode`] runs per outer pass
pub const MAX_ITERATIONS: u32 = 1024;

/// One published inner port as seen from outside
struct InterfacePort {
    name: String,
    inner: PortId,
    decl: PortDecl,
}

/// The inner graph's published ports, with names made unique
fn interface(graph: &Graph, reserved: &[&str]) -> Vec<InterfacePort> {
    let mut used: Vec<String> = reserved.iter().map(|name| name.to_string()).collect();
    let mut ports = Vec::new();

    for id in graph.published_ports() {
        let Some(port) = graph.port(id) else {
            continue;
        };
        let mut name = port.name().to_string();
        let mut suffix = 2;
        while used.contains(&name) {
            name = format!("{} {suffix}", port.name());
            suffix += 1;
        }
        used.push(name.clone());

        let mut decl = match port.kind() {
            PortKind::Inlet => PortDecl::inlet(name.clone(), port.port_type().clone()),
            PortKind::Outlet => PortDecl::outlet(name.clone(), port.port_type().clone()),
        };
        decl.value = port.value().cloned();
        decl.description = port.description().to_string();
        ports.push(InterfacePort { name, inner: id, decl });
    }
    ports
}

/// Copy outer inlet values onto the inner published inlets
fn push_inputs(graph: &mut Graph, ports: &[InterfacePort], io: &NodeIo<'_>) {
    for port in ports.iter().filter(|p| p.decl.kind == PortKind::Inlet) {
        let value = io.value(&port.name).cloned();
        if graph.port_value(port.inner) != value.as_ref() {
            graph.send(port.inner, value);
        }
    }
}

/// Copy inner published outlet values onto the outer outlets
fn pull_outputs(graph: &Graph, ports: &[InterfacePort], io: &mut NodeIo<'_>) {
    for port in ports.iter().filter(|p| p.decl.kind == PortKind::Outlet) {
        io.send(&port.name, graph.port_value(port.inner).cloned());
    }
}

fn save_graph(graph: &Graph) -> Option<serde_json::Value> {
    match serde_json::to_value(graph.to_document()) {
        Ok(value) => Some(value),
        Err(err) => {
            tracing::warn!(graph = %graph.name, %err, "could not save subgraph");
            None
        }
    }
}

fn load_graph(type_key: &str, state: &serde_json::Value, registry: &NodeRegistry) -> Result<Graph, DecodeError> {
    let document: GraphDocument =
        serde_json::from_value(state.clone()).map_err(|err| DecodeError::InvalidState {
            type_key: type_key.to_string(),
            reason: err.to_string(),
        })?;
    let (graph, errors) = Graph::from_document(&document, registry);
    for err in errors {
        tracing::warn!(graph = %graph.name, %err, "subgraph record skipped");
    }
    Ok(graph)
}

/// A node wrapping a nested graph
#[derive(Debug)]
pub struct SubgraphNode {
    graph: Graph,
}

impl SubgraphNode {
    /// Wrap `graph`
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Inner graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable inner graph. Call [`Graph::refresh_ports`] on the owner after
    /// changing what is published.
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

impl Default for SubgraphNode {
    fn default() -> Self {
        Self::new(Graph::new("Subgraph"))
    }
}

impl Node for SubgraphNode {
    fn type_key(&self) -> &str {
        SUBGRAPH_TYPE
    }

    fn name(&self) -> &str {
        &self.graph.name
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Processor
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        interface(&self.graph, &[]).into_iter().map(|p| p.decl).collect()
    }

    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, targets: &mut FrameTargets<'_>) {
        let ports = interface(&self.graph, &[]);
        push_inputs(&mut self.graph, &ports, io);
        targets.execute_scope(&mut self.graph, ctx);
        pull_outputs(&self.graph, &ports, io);
    }

    fn is_always_dirty(&self) -> bool {
        self.graph.needs_execution()
    }

    fn start_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.start_execution(ctx);
    }

    fn enable_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.enable_execution(ctx);
    }

    fn disable_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.disable_execution(ctx);
    }

    fn stop_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.stop_execution(ctx);
    }

    fn teardown(&mut self) {
        self.graph.teardown();
    }

    fn save_state(&self) -> Option<serde_json::Value> {
        save_graph(&self.graph)
    }

    fn load_state(&mut self, state: &serde_json::Value, registry: &NodeRegistry) -> Result<(), DecodeError> {
        self.graph = load_graph(SUBGRAPH_TYPE, state, registry)?;
        Ok(())
    }

    fn subgraph(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }
}

/// A subgraph executed several times per pass.
///
/// Each run sees [`IterationInfo`] in its context; outlets carry the values of
/// the last run.
#[derive(Debug)]
pub struct IteratorNode {
    graph: Graph,
}

impl IteratorNode {
    /// Wrap `graph`
    pub fn new(graph: Graph) -> Self {
        Self { graph }
    }

    /// Inner graph
    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    /// Mutable inner graph
    pub fn graph_mut(&mut self) -> &mut Graph {
        &mut self.graph
    }
}

impl Default for IteratorNode {
    fn default() -> Self {
        Self::new(Graph::new("Iterator"))
    }
}

impl Node for IteratorNode {
    fn type_key(&self) -> &str {
        ITERATOR_TYPE
    }

    fn name(&self) -> &str {
        &self.graph.name
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Processor
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        let mut ports = vec![PortDecl::inlet(ITERATIONS_PORT, PortType::Int)
            .with_value(DEFAULT_ITERATIONS)
            .with_description("Runs of the inner graph per pass")];
        ports.extend(interface(&self.graph, &[ITERATIONS_PORT]).into_iter().map(|p| p.decl));
        ports
    }

    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, targets: &mut FrameTargets<'_>) {
        let ports = interface(&self.graph, &[ITERATIONS_PORT]);
        push_inputs(&mut self.graph, &ports, io);

        let requested = io.int_or(ITERATIONS_PORT, DEFAULT_ITERATIONS);
        let total = u32::try_from(requested.clamp(0, i64::from(MAX_ITERATIONS))).unwrap_or(MAX_ITERATIONS);
        if i64::from(total) < requested {
            tracing::debug!(node = %io.node_id(), requested, total, "iteration count clamped");
        }
        for current in 0..total {
            let info = IterationInfo {
                iterator_node: io.node_id(),
                total_iterations: total,
                current_iteration: current,
            };
            targets.execute_scope(&mut self.graph, &ctx.with_iteration(info));
        }

        pull_outputs(&self.graph, &ports, io);
    }

    fn is_always_dirty(&self) -> bool {
        self.graph.needs_execution()
    }

    fn start_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.start_execution(ctx);
    }

    fn enable_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.enable_execution(ctx);
    }

    fn disable_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.disable_execution(ctx);
    }

    fn stop_execution(&mut self, ctx: &ExecutionContext) {
        self.graph.stop_execution(ctx);
    }

    fn teardown(&mut self) {
        self.graph.teardown();
    }

    fn save_state(&self) -> Option<serde_json::Value> {
        save_graph(&self.graph)
    }

    fn load_state(&mut self, state: &serde_json::Value, registry: &NodeRegistry) -> Result<(), DecodeError> {
        self.graph = load_graph(ITERATOR_TYPE, state, registry)?;
        Ok(())
    }

    fn subgraph(&self) -> Option<&Graph> {
        Some(&self.graph)
    }

    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        Some(&mut self.graph)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::FrameTiming;
    use crate::node::NodeId;
    use crate::nodes::builtin_registry;
    use crate::nodes::math::{MathNode, MathOp, NumberNode};
    use crate::nodes::time::IterationInfoNode;
    use crate::nodes::utility::{PreviewNode, PreviewProbe};
    use crate::port::PortValue;
    use crate::renderer::GraphRenderer;
    use crate::resource::ResourceCache;
    use crate::software::SoftwareDevice;
    use std::sync::Arc;

    fn renderer() -> GraphRenderer {
        GraphRenderer::new(Arc::new(ResourceCache::new(Arc::new(SoftwareDevice::new()))))
    }

    fn ctx(frame: u64) -> ExecutionContext {
        ExecutionContext::new(FrameTiming {
            frame_number: frame,
            ..FrameTiming::default()
        })
    }

    /// Inner graph computing `A + 10`, with `A` and `Result` published
    fn offset_graph() -> Graph {
        let mut inner = Graph::new("Offset");
        let add = inner.add_node(MathNode::new(MathOp::Add).with_operand(10.0));
        inner.set_published(inner.port_id(add, "A").unwrap(), true);
        inner.set_published(inner.port_id(add, "Result").unwrap(), true);
        inner
    }

    /// Outer graph: Number(5) -> Subgraph -> Preview
    fn outer_graph() -> (Graph, NodeId, NodeId, crate::nodes::utility::PreviewProbe) {
        let mut graph = Graph::new("outer");
        let number = graph.add_node(NumberNode::new(5.0));
        let sub = graph.add_node(SubgraphNode::new(offset_graph()));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = graph.add_node(preview_node);

        graph
            .connect(graph.port_id(number, "Number").unwrap(), graph.port_id(sub, "A").unwrap())
            .unwrap();
        graph
            .connect(graph.port_id(sub, "Result").unwrap(), graph.port_id(preview, "Input").unwrap())
            .unwrap();
        (graph, number, sub, probe)
    }

    #[test]
    fn test_ports_mirror_published_ports() {
        let node = SubgraphNode::new(offset_graph());
        let ports = node.declare_ports();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].name, "A");
        assert_eq!(ports[0].kind, PortKind::Inlet);
        assert_eq!(ports[1].name, "Result");
        assert_eq!(ports[1].kind, PortKind::Outlet);
        assert_eq!(ports[1].port_type, PortType::Float);
    }

    #[test]
    fn test_duplicate_published_names_are_suffixed() {
        let mut inner = Graph::new("twins");
        for _ in 0..2 {
            let add = inner.add_node(MathNode::new(MathOp::Add));
            inner.set_published(inner.port_id(add, "Result").unwrap(), true);
        }
        let names: Vec<String> = SubgraphNode::new(inner).declare_ports().into_iter().map(|p| p.name).collect();
        assert_eq!(names, vec!["Result".to_string(), "Result 2".to_string()]);
    }

    #[test]
    fn test_subgraph_forwards_values() {
        let (mut graph, number, _, probe) = outer_graph();
        let mut renderer = renderer();

        renderer.execute(&mut graph, &ctx(0), None);
        assert_eq!(probe.value(), Some(PortValue::Float(15.0)));

        let value = graph.port_id(number, "Value").unwrap();
        graph.send(value, Some(PortValue::Float(7.0)));
        renderer.execute(&mut graph, &ctx(1), None);
        assert_eq!(probe.value(), Some(PortValue::Float(17.0)));
    }

    #[test]
    fn test_subgraph_idle_when_inner_clean() {
        let (mut graph, _, sub, _) = outer_graph();
        let mut renderer = renderer();
        renderer.execute(&mut graph, &ctx(0), None);

        let report = renderer.execute(&mut graph, &ctx(1), None);
        assert!(!report.did_execute(sub));
        assert!(!graph.node(sub).unwrap().is_always_dirty());
    }

    #[test]
    fn test_refresh_after_publishing() {
        let (mut graph, _, sub, _) = outer_graph();
        let inner_add = {
            let inner = graph.node_mut(sub).unwrap().subgraph_mut().unwrap();
            let add = inner.node_ids().next().unwrap();
            inner.set_published(inner.port_id(add, "B").unwrap(), true);
            add
        };
        assert!(graph.port_id(sub, "B").is_none());

        let a = graph.port_id(sub, "A").unwrap();
        graph.refresh_ports(sub);
        assert!(graph.port_id(sub, "B").is_some());
        assert_eq!(graph.port_id(sub, "A"), Some(a));
        assert!(graph.port(a).unwrap().is_connected());
        assert!(graph.node(sub).unwrap().subgraph().unwrap().contains_node(inner_add));
    }

    #[test]
    fn test_active_subgraph_redirects_edits() {
        let (mut graph, _, sub, _) = outer_graph();
        graph.set_active_subgraph(Some(sub));

        let added = graph.add_node(NumberNode::new(1.0));
        assert!(!graph.contains_node(added));
        assert!(graph.node(added).is_some());
        assert!(graph.active_scope().contains_node(added));
        assert_eq!(graph.active_scope().node_count(), 2);

        graph.undo().unwrap();
        assert!(graph.node(added).is_none());
        assert_eq!(graph.node_count(), 3);

        graph.set_active_subgraph(None);
        assert!(std::ptr::eq(graph.active_scope(), &graph));
    }

    #[test]
    fn test_stale_active_subgraph_falls_back() {
        let (mut graph, number, _, _) = outer_graph();
        graph.set_active_subgraph(Some(number));
        let added = graph.add_node(NumberNode::new(1.0));
        assert!(graph.contains_node(added));
    }

    #[test]
    fn test_subgraph_survives_document_round_trip() {
        let (graph, _, sub, _) = outer_graph();
        let text = graph.to_document().to_ron().unwrap();
        let document = GraphDocument::from_ron(&text).unwrap();
        let (mut restored, errors) = Graph::from_document(&document, &builtin_registry());
        assert!(errors.is_empty());
        assert_eq!(restored.node_type_key(sub), Some(SUBGRAPH_TYPE));
        assert_eq!(restored.port_id(sub, "A"), graph.port_id(sub, "A"));

        renderer().execute(&mut restored, &ctx(0), None);
        let result = restored.port_id(sub, "Result").unwrap();
        assert_eq!(restored.port_value(result), Some(&PortValue::Float(15.0)));
    }

    fn iterator_graph(iterations: i64) -> (Graph, NodeId, PreviewProbe) {
        let mut inner = Graph::new("loop");
        let info = inner.add_node(IterationInfoNode::new());
        let add = inner.add_node(MathNode::new(MathOp::Add));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = inner.add_node(preview_node);
        inner
            .connect(inner.port_id(info, "Index").unwrap(), inner.port_id(add, "A").unwrap())
            .unwrap();
        inner
            .connect(inner.port_id(add, "Result").unwrap(), inner.port_id(preview, "Input").unwrap())
            .unwrap();
        inner.set_published(inner.port_id(add, "Result").unwrap(), true);

        let mut graph = Graph::new("outer");
        let iterator = graph.add_node(IteratorNode::new(inner));
        graph.send(graph.port_id(iterator, ITERATIONS_PORT).unwrap(), Some(PortValue::Int(iterations)));
        graph.force_execution(iterator);
        (graph, iterator, probe)
    }

    #[test]
    fn test_iterator_runs_inner_graph_per_iteration() {
        let (mut graph, iterator, probe) = iterator_graph(3);
        let report = renderer().execute(&mut graph, &ctx(0), None);
        assert!(report.did_execute(iterator));
        assert_eq!(probe.executions(), 3);
        let result = graph.port_id(iterator, "Result").unwrap();
        assert_eq!(graph.port_value(result), Some(&PortValue::Float(2.0)));
    }

    #[test]
    fn test_iteration_count_is_clamped() {
        let (mut graph, iterator, probe) = iterator_graph(i64::MAX);
        renderer().execute(&mut graph, &ctx(0), None);
        assert_eq!(probe.executions(), MAX_ITERATIONS as usize);
        let result = graph.port_id(iterator, "Result").unwrap();
        assert_eq!(graph.port_value(result), Some(&PortValue::Float((MAX_ITERATIONS - 1) as f32)));

        let (mut graph, _, probe) = iterator_graph(-4);
        renderer().execute(&mut graph, &ctx(0), None);
        assert_eq!(probe.executions(), 0);
    }

    #[test]
    fn test_iterations_default() {
        let node = IteratorNode::default();
        let decl = node.declare_ports().into_iter().find(|p| p.name == ITERATIONS_PORT).unwrap();
        assert_eq!(decl.value, Some(PortValue::Int(DEFAULT_ITERATIONS)));
    }
}
