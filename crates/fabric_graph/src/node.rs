// SPDX-License-Identifier: MIT OR Apache-2.0
//! Node contract consumed by the scheduler.
//!
//! Node bodies are trait objects owned by a [`Graph`]. Everything the scheduler
//! needs to know about a node beyond its body (ports, dirty flag) lives in the
//! graph's arena and is reached through [`NodeIo`] during execution.

use crate::context::ExecutionContext;
use crate::document::DecodeError;
use crate::graph::Graph;
use crate::port::{PortDecl, PortId, PortValue};
use crate::registry::NodeRegistry;
use crate::renderer::FrameTargets;
use crate::wiring::Wiring;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub Uuid);

impl NodeId {
    /// Create a new random node ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// How the scheduler decides whether a node runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecutionMode {
    /// Produces values; runs whenever a root pulls it
    Provider,
    /// Transforms values; runs only when dirty
    Processor,
    /// Sink; always a root and always runs
    Consumer,
}

/// How a node relates to the frame clock
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TimeMode {
    /// Output does not depend on time
    #[default]
    None,
    /// Runs on idle frames only
    Idle,
    /// Output is a function of the frame time
    TimeBase,
}

/// A unit of computation with typed ports.
///
/// Only `type_key`, `execution_mode`, `declare_ports` and `execute` are
/// required; the rest have no-op defaults.
pub trait Node: Send {
    /// Registry key used to recreate this node from a document
    fn type_key(&self) -> &str;

    /// Default display name
    fn name(&self) -> &str {
        self.type_key()
    }

    /// Scheduling mode
    fn execution_mode(&self) -> ExecutionMode;

    /// Relation to the frame clock
    fn time_mode(&self) -> TimeMode {
        TimeMode::None
    }

    /// Ports in order. Names must be unique within the node.
    fn declare_ports(&self) -> Vec<PortDecl>;

    /// Run the node body for one pass
    fn execute(&mut self, ctx: &ExecutionContext, io: &mut NodeIo<'_>, targets: &mut FrameTargets<'_>);

    /// Whether the node must run every pass regardless of its inputs
    fn is_always_dirty(&self) -> bool {
        false
    }

    /// Called once before the first pass
    fn start_execution(&mut self, _ctx: &ExecutionContext) {}

    /// Called when the owning graph becomes visible
    fn enable_execution(&mut self, _ctx: &ExecutionContext) {}

    /// Called when the owning graph is hidden
    fn disable_execution(&mut self, _ctx: &ExecutionContext) {}

    /// Called after the last pass
    fn stop_execution(&mut self, _ctx: &ExecutionContext) {}

    /// Release everything the node holds
    fn teardown(&mut self) {}

    /// Opaque body state for persistence
    fn save_state(&self) -> Option<serde_json::Value> {
        None
    }

    /// Restore body state written by [`Node::save_state`]
    fn load_state(&mut self, _state: &serde_json::Value, _registry: &NodeRegistry) -> Result<(), DecodeError> {
        Ok(())
    }

    /// Inner graph, for nodes that own one
    fn subgraph(&self) -> Option<&Graph> {
        None
    }

    /// Mutable inner graph, for nodes that own one
    fn subgraph_mut(&mut self) -> Option<&mut Graph> {
        None
    }
}

/// A node body's view of its own ports while it executes
pub struct NodeIo<'a> {
    node: NodeId,
    wiring: &'a mut Wiring,
}

impl<'a> NodeIo<'a> {
    pub(crate) fn new(node: NodeId, wiring: &'a mut Wiring) -> Self {
        Self { node, wiring }
    }

    /// ID of the executing node
    pub fn node_id(&self) -> NodeId {
        self.node
    }

    /// ID of one of the node's ports
    pub fn port_id(&self, name: &str) -> Option<PortId> {
        self.wiring.port_id(self.node, name)
    }

    /// Current value of a port
    pub fn value(&self, name: &str) -> Option<&PortValue> {
        let id = self.port_id(name)?;
        self.wiring.port(id)?.value()
    }

    /// Float value of a port, if it holds something convertible
    pub fn float(&self, name: &str) -> Option<f32> {
        self.value(name).and_then(PortValue::as_f32)
    }

    /// Float value of a port or `default`
    pub fn float_or(&self, name: &str, default: f32) -> f32 {
        self.float(name).unwrap_or(default)
    }

    /// Integer value of a port or `default`
    pub fn int_or(&self, name: &str, default: i64) -> i64 {
        self.value(name).and_then(PortValue::as_i64).unwrap_or(default)
    }

    /// Boolean value of a port or `default`
    pub fn bool_or(&self, name: &str, default: bool) -> bool {
        self.value(name).and_then(PortValue::as_bool).unwrap_or(default)
    }

    /// Whether a port changed since the node last ran
    pub fn value_did_change(&self, name: &str) -> bool {
        self.port_id(name)
            .and_then(|id| self.wiring.port(id))
            .is_some_and(|p| p.value_did_change())
    }

    /// Whether any of the node's inlets changed since it last ran
    pub fn any_input_changed(&self) -> bool {
        self.wiring
            .inlets(self.node)
            .into_iter()
            .any(|id| self.wiring.port(id).is_some_and(|p| p.value_did_change()))
    }

    /// Set a port's value, propagating to connected inlets when it changed
    pub fn send(&mut self, name: &str, value: Option<PortValue>) {
        self.send_with(name, value, false);
    }

    /// Set a port's value and propagate even if it is unchanged
    pub fn send_forced(&mut self, name: &str, value: Option<PortValue>) {
        self.send_with(name, value, true);
    }

    fn send_with(&mut self, name: &str, value: Option<PortValue>, force: bool) {
        match self.port_id(name) {
            Some(id) => {
                self.wiring.send(id, value, force);
            }
            None => tracing::warn!(node = %self.node, port = name, "send to undeclared port"),
        }
    }
}
