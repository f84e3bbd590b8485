// SPDX-License-Identifier: MIT OR Apache-2.0
//! Nodes reading the pass clock and iteration position.

use crate::context::ExecutionContext;
use crate::node::{ExecutionMode, Node, NodeIo, TimeMode};
use crate::port::{PortDecl, PortType, PortValue};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;

/// Register every time node type
pub fn register(registry: &mut NodeRegistry) {
    registry.register("time.current", "Current Time", "Seconds since playback started", || {
        Box::new(CurrentTimeNode::new())
    });
    registry.register(
        "iteration.info",
        "Iteration Info",
        "Position inside an iterating subgraph",
        || Box::new(IterationInfoNode::new()),
    );
}

/// Publishes the pass time
#[derive(Debug, Clone, Default)]
pub struct CurrentTimeNode;

impl CurrentTimeNode {
    /// Create a time node
    pub fn new() -> Self {
        Self
    }
}

impl Node for CurrentTimeNode {
    fn type_key(&self) -> &str {
        "time.current"
    }

    fn name(&self) -> &str {
        "Current Time"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Provider
    }

    fn time_mode(&self) -> TimeMode {
        TimeMode::TimeBase
    }

    fn is_always_dirty(&self) -> bool {
        true
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::outlet("Time", PortType::Float).with_description("Seconds since playback started"),
            PortDecl::outlet("Delta", PortType::Float).with_description("Seconds since the previous pass"),
        ]
    }

    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        io.send("Time", Some(PortValue::Float(ctx.timing.time as f32)));
        io.send("Delta", Some(PortValue::Float(ctx.timing.delta_time as f32)));
    }
}

/// Publishes the enclosing iterator's position.
///
/// Outside an iterator it reports a single iteration at index zero.
#[derive(Debug, Clone, Default)]
pub struct IterationInfoNode;

impl IterationInfoNode {
    /// Create an iteration info node
    pub fn new() -> Self {
        Self
    }
}

impl Node for IterationInfoNode {
    fn type_key(&self) -> &str {
        "iteration.info"
    }

    fn name(&self) -> &str {
        "Iteration Info"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Provider
    }

    fn is_always_dirty(&self) -> bool {
        true
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::outlet("Progress", PortType::Float),
            PortDecl::outlet("Index", PortType::Int),
            PortDecl::outlet("Count", PortType::Int),
        ]
    }

    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        let (progress, index, count) = match ctx.iteration {
            Some(info) => (
                info.normalized(),
                i64::from(info.current_iteration),
                i64::from(info.total_iterations),
            ),
            None => (0.0, 0, 1),
        };
        io.send("Progress", Some(PortValue::Float(progress)));
        io.send("Index", Some(PortValue::Int(index)));
        io.send("Count", Some(PortValue::Int(count)));
    }
}
