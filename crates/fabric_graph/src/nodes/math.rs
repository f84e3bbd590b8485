// SPDX-License-Identifier: MIT OR Apache-2.0
//! Numeric constants and binary arithmetic.

use crate::context::ExecutionContext;
use crate::node::{ExecutionMode, Node, NodeIo};
use crate::port::{PortDecl, PortType, PortValue};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;
use serde::{Deserialize, Serialize};

/// Register every math node type
pub fn register(registry: &mut NodeRegistry) {
    registry.register("number", "Number", "Constant number", || Box::new(NumberNode::default()));

    for op in MathOp::ALL {
        registry.register(op.type_key(), op.label(), op.description(), op.constructor());
    }
}

/// A constant that republishes its `Value` inlet every pass
#[derive(Debug, Clone, Default)]
pub struct NumberNode {
    initial: f32,
}

impl NumberNode {
    /// Create a number node starting at `value`
    pub fn new(value: f32) -> Self {
        Self { initial: value }
    }
}

impl Node for NumberNode {
    fn type_key(&self) -> &str {
        "number"
    }

    fn name(&self) -> &str {
        "Number"
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Provider
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::inlet("Value", PortType::Float).with_value(self.initial),
            PortDecl::outlet("Number", PortType::Float),
        ]
    }

    fn execute(&mut self, _ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        let value = io.float_or("Value", 0.0);
        io.send("Number", Some(PortValue::Float(value)));
    }
}

/// Binary operation applied by [`MathNode`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MathOp {
    /// A + B
    Add,
    /// A - B
    Subtract,
    /// A * B
    Multiply,
    /// A / B, zero when B is zero
    Divide,
    /// Smaller of A and B
    Min,
    /// Larger of A and B
    Max,
}

impl MathOp {
    /// Every operation, in registry order
    pub const ALL: [MathOp; 6] = [
        MathOp::Add,
        MathOp::Subtract,
        MathOp::Multiply,
        MathOp::Divide,
        MathOp::Min,
        MathOp::Max,
    ];

    /// Registry key
    pub fn type_key(self) -> &'static str {
        match self {
            MathOp::Add => "math.add",
            MathOp::Subtract => "math.subtract",
            MathOp::Multiply => "math.multiply",
            MathOp::Divide => "math.divide",
            MathOp::Min => "math.min",
            MathOp::Max => "math.max",
        }
    }

    /// Display name
    pub fn label(self) -> &'static str {
        match self {
            MathOp::Add => "Add",
            MathOp::Subtract => "Subtract",
            MathOp::Multiply => "Multiply",
            MathOp::Divide => "Divide",
            MathOp::Min => "Min",
            MathOp::Max => "Max",
        }
    }

    fn description(self) -> &'static str {
        match self {
            MathOp::Add => "Sum of A and B",
            MathOp::Subtract => "A minus B",
            MathOp::Multiply => "Product of A and B",
            MathOp::Divide => "A divided by B",
            MathOp::Min => "Smaller of A and B",
            MathOp::Max => "Larger of A and B",
        }
    }

    fn constructor(self) -> fn() -> Box<dyn Node> {
        match self {
            MathOp::Add => || Box::new(MathNode::new(MathOp::Add)),
            MathOp::Subtract => || Box::new(MathNode::new(MathOp::Subtract)),
            MathOp::Multiply => || Box::new(MathNode::new(MathOp::Multiply)),
            MathOp::Divide => || Box::new(MathNode::new(MathOp::Divide)),
            MathOp::Min => || Box::new(MathNode::new(MathOp::Min)),
            MathOp::Max => || Box::new(MathNode::new(MathOp::Max)),
        }
    }

    /// Apply the operation
    pub fn apply(self, a: f32, b: f32) -> f32 {
        match self {
            MathOp::Add => a + b,
            MathOp::Subtract => a - b,
            MathOp::Multiply => a * b,
            MathOp::Divide => {
                if b == 0.0 {
                    0.0
                } else {
                    a / b
                }
            }
            MathOp::Min => a.min(b),
            MathOp::Max => a.max(b),
        }
    }
}

/// Applies a [`MathOp`] to inlets `A` and `B`. Unset inlets read as zero.
#[derive(Debug, Clone)]
pub struct MathNode {
    op: MathOp,
    operand: f32,
}

impl MathNode {
    /// Create a node applying `op`
    pub fn new(op: MathOp) -> Self {
        Self { op, operand: 0.0 }
    }

    /// Start inlet `B` at `value`
    pub fn with_operand(mut self, value: f32) -> Self {
        self.operand = value;
        self
    }

    /// Operation applied
    pub fn op(&self) -> MathOp {
        self.op
    }
}

impl Node for MathNode {
    fn type_key(&self) -> &str {
        self.op.type_key()
    }

    fn name(&self) -> &str {
        self.op.label()
    }

    fn execution_mode(&self) -> ExecutionMode {
        ExecutionMode::Processor
    }

    fn declare_ports(&self) -> Vec<PortDecl> {
        vec![
            PortDecl::inlet("A", PortType::Float),
            PortDecl::inlet("B", PortType::Float).with_value(self.operand),
            PortDecl::outlet("Result", PortType::Float),
        ]
    }

    fn execute(&mut self, _ctx: &ExecutionContext, io: &mut NodeIo<'_>, _targets: &mut FrameTargets<'_>) {
        let result = self.op.apply(io.float_or("A", 0.0), io.float_or("B", 0.0));
        io.send("Result", Some(PortValue::Float(result)));
    }
}
