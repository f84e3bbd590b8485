// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-frame scheduler.
//!
//! A pass picks the graph's roots and walks each one's upstream dependencies
//! depth first, executing a node only after everything it depends on. The
//! feedback cache gates every visit, so a node reached again while it is still
//! being visited closes a cycle and reads last frame's value instead.

use crate::context::{ExecutionContext, FrameTiming};
use crate::device::{CommandBuffer, ResourceRef};
use crate::feedback::{FeedbackCache, ProcessingState};
use crate::graph::Graph;
use crate::node::{ExecutionMode, NodeId};
use crate::resource::ResourceCache;
use indexmap::IndexSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// What one execution scope did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Frame the pass ran for
    pub frame_number: u64,
    /// Traversal entry points, in graph order
    pub roots: Vec<NodeId>,
    /// Nodes that executed, in execution order
    pub executed: Vec<NodeId>,
}

impl PassReport {
    /// Whether `node` executed in this pass
    pub fn did_execute(&self, node: NodeId) -> bool {
        self.executed.contains(&node)
    }
}

/// Services available to a node body while it executes
pub struct FrameTargets<'a> {
    resources: &'a ResourceCache,
    command_buffer: Option<&'a dyn CommandBuffer>,
    feedback: &'a mut FeedbackCache,
}

impl<'a> FrameTargets<'a> {
    pub(crate) fn new(
        resources: &'a ResourceCache,
        command_buffer: Option<&'a dyn CommandBuffer>,
        feedback: &'a mut FeedbackCache,
    ) -> Self {
        Self {
            resources,
            command_buffer,
            feedback,
        }
    }

    /// Pooled GPU resources
    pub fn resources(&self) -> &ResourceCache {
        self.resources
    }

    /// Command buffer the frame's GPU work is encoded into
    pub fn command_buffer(&self) -> Option<&dyn CommandBuffer> {
        self.command_buffer
    }

    /// Return a resource to the pool once this frame's GPU work completes
    pub fn release(&self, resource: ResourceRef) {
        match self.command_buffer {
            Some(command_buffer) => self.resources.release(resource, command_buffer),
            None => self.resources.release_now(resource),
        }
    }

    /// Run a nested graph inside its own feedback scope
    pub fn execute_scope(&mut self, graph: &mut Graph, ctx: &ExecutionContext) -> PassReport {
        self.feedback.push_scope();
        let roots = graph.take_roots();
        let mut executed = IndexSet::new();
        for root in &roots {
            self.visit(graph, *root, ctx, &mut executed);
        }
        self.feedback.pop_scope();

        PassReport {
            frame_number: ctx.frame_number(),
            roots,
            executed: executed.into_iter().collect(),
        }
    }

    fn visit(&mut self, graph: &mut Graph, node: NodeId, ctx: &ExecutionContext, executed: &mut IndexSet<NodeId>) {
        match self.feedback.processing_state(node) {
            ProcessingState::Processed => return,
            ProcessingState::Processing => {
                tracing::trace!(%node, "cycle closed; using previous frame");
                return;
            }
            ProcessingState::Unprocessed => {}
        }

        let frame = ctx.frame_number();
        self.feedback.set_processing(node, graph.wiring_mut(), frame);

        for upstream in graph.input_nodes(node) {
            self.visit(graph, upstream, ctx, executed);
        }

        let eligible = graph.is_dirty(node)
            || graph.is_always_dirty(node)
            || matches!(
                graph.execution_mode(node),
                Some(ExecutionMode::Consumer | ExecutionMode::Provider)
            );
        if eligible && !executed.contains(&node) && graph.execute_node(node, ctx, self) {
            graph.mark_clean(node);
            executed.insert(node);
        }

        self.feedback.set_processed(node, graph.wiring(), frame);
    }
}

/// Drives one execution pass per frame
#[derive(Debug)]
pub struct GraphRenderer {
    feedback: FeedbackCache,
    resources: Arc<ResourceCache>,
    last_time: Option<f64>,
    next_frame: u64,
}

impl GraphRenderer {
    /// Create a renderer drawing resources from `resources`
    pub fn new(resources: Arc<ResourceCache>) -> Self {
        Self {
            feedback: FeedbackCache::new(),
            resources,
            last_time: None,
            next_frame: 0,
        }
    }

    /// Resource pool shared with node bodies
    pub fn resources(&self) -> &Arc<ResourceCache> {
        &self.resources
    }

    /// Feedback cache state
    pub fn feedback(&self) -> &FeedbackCache {
        &self.feedback
    }

    /// Frame number the next [`GraphRenderer::execute_at`] call will use
    pub fn next_frame(&self) -> u64 {
        self.next_frame
    }

    /// Run one pass of `graph` with a caller-built context
    pub fn execute(
        &mut self,
        graph: &mut Graph,
        ctx: &ExecutionContext,
        command_buffer: Option<&dyn CommandBuffer>,
    ) -> PassReport {
        let frame = ctx.frame_number();
        self.resources.begin_frame(frame);
        self.feedback.begin_frame(frame);

        let mut targets = FrameTargets::new(&self.resources, command_buffer, &mut self.feedback);
        let report = targets.execute_scope(graph, ctx);
        self.next_frame = frame + 1;

        tracing::trace!(
            frame,
            roots = report.roots.len(),
            executed = report.executed.len(),
            "pass complete"
        );
        report
    }

    /// Run one pass at absolute `time` seconds, deriving the rest of the
    /// timing from the renderer's own counters
    pub fn execute_at(
        &mut self,
        graph: &mut Graph,
        time: f64,
        command_buffer: Option<&dyn CommandBuffer>,
    ) -> PassReport {
        let delta_time = self.last_time.map_or(0.0, |last| (time - last).max(0.0));
        self.last_time = Some(time);

        let timing = FrameTiming {
            time,
            delta_time,
            display_time: None,
            system_time: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs_f64())
                .unwrap_or_default(),
            frame_number: self.next_frame,
        };
        self.execute(graph, &ExecutionContext::new(timing), command_buffer)
    }

    /// Forward `start_execution` to every node
    pub fn start_execution(&mut self, graph: &mut Graph, ctx: &ExecutionContext) {
        tracing::debug!(graph = %graph.name, "start execution");
        graph.start_execution(ctx);
    }

    /// Forward `enable_execution` to every node
    pub fn enable_execution(&mut self, graph: &mut Graph, ctx: &ExecutionContext) {
        graph.enable_execution(ctx);
    }

    /// Forward `disable_execution` to every node
    pub fn disable_execution(&mut self, graph: &mut Graph, ctx: &ExecutionContext) {
        graph.disable_execution(ctx);
    }

    /// Forward `stop_execution` to every node
    pub fn stop_execution(&mut self, graph: &mut Graph, ctx: &ExecutionContext) {
        tracing::debug!(graph = %graph.name, "stop execution");
        graph.stop_execution(ctx);
    }

    /// Tear down every node and drop cached state
    pub fn teardown(&mut self, graph: &mut Graph) {
        graph.teardown();
        self.feedback = FeedbackCache::new();
        self.resources.flush_reusable();
        self.last_time = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::math::{MathNode, MathOp, NumberNode};
    use crate::nodes::utility::PreviewNode;
    use crate::port::PortValue;
    use crate::software::SoftwareDevice;

    fn renderer() -> GraphRenderer {
        GraphRenderer::new(Arc::new(ResourceCache::new(Arc::new(SoftwareDevice::new()))))
    }

    fn ctx(frame: u64) -> ExecutionContext {
        ExecutionContext::new(FrameTiming {
            frame_number: frame,
            ..FrameTiming::default()
        })
    }

    fn link(graph: &mut Graph, from: NodeId, outlet: &str, to: NodeId, inlet: &str) {
        let outlet = graph.port_id(from, outlet).unwrap();
        let inlet = graph.port_id(to, inlet).unwrap();
        graph.connect(outlet, inlet).unwrap();
    }

    #[test]
    fn test_number_add_preview_scenario() {
        let mut graph = Graph::new("scenario");
        let number = graph.add_node(NumberNode::new(5.0));
        let add = graph.add_node(MathNode::new(MathOp::Add).with_operand(3.0));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = graph.add_node(preview_node);
        link(&mut graph, number, "Number", add, "A");
        link(&mut graph, add, "Result", preview, "Input");

        let mut renderer = renderer();
        let report = renderer.execute(&mut graph, &ctx(0), None);
        assert_eq!(report.roots, vec![preview]);
        assert_eq!(report.executed, vec![number, add, preview]);
        assert_eq!(probe.value(), Some(PortValue::Float(8.0)));

        // Nothing changed upstream: the provider and consumer run, the processor does not.
        let report = renderer.execute(&mut graph, &ctx(1), None);
        assert_eq!(report.executed, vec![number, preview]);
        assert_eq!(probe.value(), Some(PortValue::Float(8.0)));
    }

    #[test]
    fn test_disconnect_recomputes_with_zero() {
        let mut graph = Graph::new("scenario");
        let number = graph.add_node(NumberNode::new(5.0));
        let add = graph.add_node(MathNode::new(MathOp::Add).with_operand(3.0));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = graph.add_node(preview_node);
        link(&mut graph, number, "Number", add, "A");
        link(&mut graph, add, "Result", preview, "Input");

        let mut renderer = renderer();
        renderer.execute(&mut graph, &ctx(0), None);

        let out = graph.port_id(number, "Number").unwrap();
        let a = graph.port_id(add, "A").unwrap();
        assert!(graph.disconnect(out, a));
        assert_eq!(graph.port_value(a), None);
        assert!(graph.is_dirty(add));

        let report = renderer.execute(&mut graph, &ctx(1), None);
        assert!(report.did_execute(add));
        assert!(!report.did_execute(number));
        assert_eq!(probe.value(), Some(PortValue::Float(3.0)));
    }

    #[test]
    fn test_diamond_executes_each_node_once() {
        let mut graph = Graph::new("diamond");
        let number = graph.add_node(NumberNode::new(2.0));
        let left = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        let right = graph.add_node(MathNode::new(MathOp::Multiply).with_operand(10.0));
        let join = graph.add_node(MathNode::new(MathOp::Add));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = graph.add_node(preview_node);
        link(&mut graph, number, "Number", left, "A");
        link(&mut graph, number, "Number", right, "A");
        link(&mut graph, left, "Result", join, "A");
        link(&mut graph, right, "Result", join, "B");
        link(&mut graph, join, "Result", preview, "Input");

        let report = renderer().execute(&mut graph, &ctx(0), None);
        assert_eq!(report.executed.len(), 5);
        assert_eq!(report.executed.first(), Some(&number));
        assert_eq!(report.executed.last(), Some(&preview));
        assert_eq!(probe.value(), Some(PortValue::Float(23.0)));
        assert_eq!(probe.executions(), 1);
    }

    #[test]
    fn test_cycle_lags_one_frame() {
        let mut graph = Graph::new("feedback");
        let a = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        let b = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        let preview_node = PreviewNode::new();
        let probe = preview_node.probe();
        let preview = graph.add_node(preview_node);
        link(&mut graph, a, "Result", b, "A");
        link(&mut graph, b, "Result", a, "A");
        link(&mut graph, a, "Result", preview, "Input");

        let b_out = graph.port_id(b, "Result").unwrap();
        let mut renderer = renderer();
        let mut seen = Vec::new();
        for frame in 0..3 {
            let report = renderer.execute(&mut graph, &ctx(frame), None);
            assert_eq!(report.executed, vec![b, a, preview]);
            seen.push(probe.value().and_then(|v| v.as_f32()));
            // b read a's output from the previous pass.
            let a_previous = if frame == 0 { 0.0 } else { seen[frame as usize - 1].unwrap() };
            assert_eq!(graph.port_value(b_out), Some(&PortValue::Float(a_previous + 1.0)));
        }
        assert_eq!(seen, vec![Some(2.0), Some(4.0), Some(6.0)]);
    }

    #[test]
    fn test_feedback_cache_pruned_between_passes() {
        let mut graph = Graph::new("feedback");
        let a = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        let b = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        graph.add_node(PreviewNode::new());
        link(&mut graph, a, "Result", b, "A");
        link(&mut graph, b, "Result", a, "A");
        graph.force_execution(a);

        let mut renderer = renderer();
        renderer.execute(&mut graph, &ctx(0), None);
        graph.force_execution(a);
        renderer.execute(&mut graph, &ctx(1), None);
        assert!(renderer.feedback().has_frame(0));
        graph.force_execution(a);
        renderer.execute(&mut graph, &ctx(2), None);
        assert!(!renderer.feedback().has_frame(0));
        assert!(renderer.feedback().has_frame(1));
        assert!(renderer.feedback().has_frame(2));
    }

    #[test]
    fn test_forced_node_runs_once() {
        let mut graph = Graph::new("forced");
        let add = graph.add_node(MathNode::new(MathOp::Add));
        let mut renderer = renderer();

        let report = renderer.execute(&mut graph, &ctx(0), None);
        assert!(report.roots.is_empty());
        assert!(graph.is_dirty(add));

        graph.force_execution(add);
        let report = renderer.execute(&mut graph, &ctx(1), None);
        assert_eq!(report.executed, vec![add]);
        assert!(!graph.is_dirty(add));

        let report = renderer.execute(&mut graph, &ctx(2), None);
        assert!(report.executed.is_empty());
    }

    #[test]
    fn test_published_outlet_is_root() {
        let mut graph = Graph::new("published");
        let number = graph.add_node(NumberNode::new(4.0));
        let add = graph.add_node(MathNode::new(MathOp::Add).with_operand(1.0));
        link(&mut graph, number, "Number", add, "A");
        let result = graph.port_id(add, "Result").unwrap();
        graph.set_published(result, true);

        let report = renderer().execute(&mut graph, &ctx(0), None);
        assert_eq!(report.roots, vec![add]);
        assert_eq!(graph.port_value(result), Some(&PortValue::Float(5.0)));
    }

    #[test]
    fn test_execute_at_counts_frames() {
        let mut graph = Graph::new("clock");
        let mut renderer = renderer();
        assert_eq!(renderer.execute_at(&mut graph, 1.0, None).frame_number, 0);
        assert_eq!(renderer.execute_at(&mut graph, 1.5, None).frame_number, 1);
        assert_eq!(renderer.next_frame(), 2);
        assert_eq!(renderer.resources().frame_index(), 1);
    }
}
