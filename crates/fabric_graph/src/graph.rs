// SPDX-License-Identifier: MIT OR Apache-2.0
//! Graph data structure: node bodies plus the port arena that wires them.
//!
//! Topology is never stored separately; it is derived from port connections
//! on demand. Editing operations (add, remove, connect, disconnect, lookup)
//! follow the active subgraph when one is set, and are recorded for undo.

use crate::connection::{Connection, ConnectionError};
use crate::context::ExecutionContext;
use crate::history::{DetachedNode, GraphEdit, History, HistoryError};
use crate::node::{ExecutionMode, Node, NodeId, NodeIo};
use crate::port::{Port, PortDecl, PortId, PortKind, PortValue};
use crate::renderer::FrameTargets;
use crate::wiring::{NodeRecord, Wiring};
use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for a graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GraphId(pub Uuid);

impl GraphId {
    /// Create a new random graph ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for GraphId {
    fn default() -> Self {
        Self::new()
    }
}

/// A node graph
pub struct Graph {
    id: GraphId,
    /// Graph name
    pub name: String,
    wiring: Wiring,
    nodes: IndexMap<NodeId, Box<dyn Node>>,
    /// Nodes the next pass must treat as roots
    forced: IndexSet<NodeId>,
    active_subgraph: Option<NodeId>,
    history: History,
}

impl Graph {
    /// Create a new empty graph
    pub fn new(name: impl Into<String>) -> Self {
        Self::with_id(GraphId::new(), name)
    }

    /// Create an empty graph with a known ID
    pub fn with_id(id: GraphId, name: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            wiring: Wiring::new(),
            nodes: IndexMap::new(),
            forced: IndexSet::new(),
            active_subgraph: None,
            history: History::new(),
        }
    }

    /// Graph ID
    pub fn id(&self) -> GraphId {
        self.id
    }

    // --- nodes -------------------------------------------------------------

    /// Add a node to the active scope
    pub fn add_node(&mut self, node: impl Node + 'static) -> NodeId {
        self.add_boxed_node(Box::new(node))
    }

    /// Add an already boxed node to the active scope
    pub fn add_boxed_node(&mut self, node: Box<dyn Node>) -> NodeId {
        self.with_active_scope(|graph| {
            let id = NodeId::new();
            let name = node.name().to_string();
            graph.insert_node(id, name, node, |_| None);
            graph.history.record(GraphEdit::AddNode { node: id });
            tracing::debug!(node = %id, graph = %graph.name, "node added");
            id
        })
    }

    /// Remove a node from the active scope, disconnecting all of its ports.
    ///
    /// The node body is kept by the undo history, not torn down.
    pub fn remove_node(&mut self, id: NodeId) -> bool {
        self.with_active_scope(|graph| match graph.detach_node(id) {
            Some(detached) => {
                tracing::debug!(node = %id, links = detached.links.len(), "node removed");
                graph.history.record(GraphEdit::RemoveNode(Box::new(detached)));
                true
            }
            None => false,
        })
    }

    /// Look up a node body in the active scope
    pub fn node(&self, id: NodeId) -> Option<&dyn Node> {
        self.active_scope().nodes.get(&id).map(|node| node.as_ref())
    }

    /// Look up a node body in this graph, ignoring the active scope
    pub fn node_mut(&mut self, id: NodeId) -> Option<&mut (dyn Node + 'static)> {
        self.nodes.get_mut(&id).map(|node| node.as_mut())
    }

    /// Whether this graph owns a node
    pub fn contains_node(&self, id: NodeId) -> bool {
        self.nodes.contains_key(&id)
    }

    /// Display name of a node
    pub fn node_name(&self, id: NodeId) -> Option<&str> {
        self.wiring.record(id).map(|r| r.name.as_str())
    }

    /// Rename a node
    pub fn set_node_name(&mut self, id: NodeId, name: impl Into<String>) {
        if let Some(record) = self.wiring.record_mut(id) {
            record.name = name.into();
        }
    }

    /// Registry key of a node
    pub fn node_type_key(&self, id: NodeId) -> Option<&str> {
        self.wiring.record(id).map(|r| r.type_key.as_str())
    }

    /// Node IDs in graph order
    pub fn node_ids(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.nodes.keys().copied()
    }

    /// Node bodies in graph order
    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &dyn Node)> {
        self.nodes.iter().map(|(id, node)| (*id, node.as_ref()))
    }

    /// Get node count
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    // --- ports & connections -----------------------------------------------

    /// Connect an outlet and an inlet in the active scope (either order)
    pub fn connect(&mut self, a: PortId, b: PortId) -> Result<Connection, ConnectionError> {
        self.with_active_scope(|graph| -> Result<Connection, ConnectionError> {
            let connection = match graph.wiring.port(a).map(Port::kind) {
                Some(PortKind::Outlet) => Connection::new(a, b),
                _ => Connection::new(b, a),
            };
            let existed = graph.wiring.is_linked(connection.outlet, connection.inlet);
            let displaced = graph.wiring.connect(a, b)?;
            // Re-linking only re-pushes the value; nothing to undo.
            if existed {
                return Ok(connection);
            }
            graph.history.record(GraphEdit::Connect {
                outlet: connection.outlet,
                inlet: connection.inlet,
                displaced,
            });
            Ok(connection)
        })
    }

    /// Remove a connection in the active scope. Returns whether one existed.
    pub fn disconnect(&mut self, a: PortId, b: PortId) -> bool {
        self.with_active_scope(|graph| {
            let connection = match graph.wiring.port(a).map(Port::kind) {
                Some(PortKind::Outlet) => Connection::new(a, b),
                _ => Connection::new(b, a),
            };
            if !graph.wiring.disconnect(a, b) {
                return false;
            }
            graph.history.record(GraphEdit::Disconnect {
                outlet: connection.outlet,
                inlet: connection.inlet,
            });
            true
        })
    }

    /// Remove every connection of a port in the active scope
    pub fn disconnect_all(&mut self, port: PortId) -> Vec<Connection> {
        self.with_active_scope(|graph| {
            let links = graph.wiring.disconnect_all(port);
            if !links.is_empty() {
                let edits = links
                    .iter()
                    .map(|link| GraphEdit::Disconnect {
                        outlet: link.outlet,
                        inlet: link.inlet,
                    })
                    .collect();
                graph.history.record(GraphEdit::Batch(edits));
            }
            links
        })
    }

    /// All connections, grouped by outlet
    pub fn connections(&self) -> Vec<Connection> {
        self.wiring.connections()
    }

    /// Get connection count
    pub fn connection_count(&self) -> usize {
        self.wiring.ports().filter(|p| p.kind() == PortKind::Inlet).map(|p| p.connections().len()).sum()
    }

    /// Set a port's value, propagating when it changed
    pub fn send(&mut self, port: PortId, value: Option<PortValue>) -> bool {
        self.wiring.send(port, value, false)
    }

    /// Set a port's value and propagate unconditionally
    pub fn send_forced(&mut self, port: PortId, value: Option<PortValue>) -> bool {
        self.wiring.send(port, value, true)
    }

    /// Get a port by ID
    pub fn port(&self, id: PortId) -> Option<&Port> {
        self.wiring.port(id)
    }

    /// Current value of a port
    pub fn port_value(&self, id: PortId) -> Option<&PortValue> {
        self.wiring.port(id)?.value()
    }

    /// Look up a node's port by name
    pub fn port_id(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.wiring.port_id(node, name)
    }

    /// A node's ports in declaration order
    pub fn node_ports(&self, node: NodeId) -> Vec<PortId> {
        self.wiring.node_ports(node)
    }

    /// A node's inlets in declaration order
    pub fn inlets(&self, node: NodeId) -> Vec<PortId> {
        self.wiring.inlets(node)
    }

    /// A node's outlets in declaration order
    pub fn outlets(&self, node: NodeId) -> Vec<PortId> {
        self.wiring.outlets(node)
    }

    /// Every port of the graph
    pub fn ports(&self) -> impl Iterator<Item = &Port> {
        self.wiring.ports()
    }

    /// Publish or unpublish a port. Connected inlets cannot be published.
    pub fn set_published(&mut self, port: PortId, published: bool) -> bool {
        self.wiring.set_published(port, published)
    }

    /// Published ports, in node order
    pub fn published_ports(&self) -> Vec<PortId> {
        self.wiring.published_ports()
    }

    /// Re-declare a node's ports.
    ///
    /// Ports whose name, kind and type are unchanged keep their ID and
    /// connections. Everything else is disconnected and replaced.
    pub fn refresh_ports(&mut self, id: NodeId) -> bool {
        let Some(node) = self.nodes.get(&id) else {
            return false;
        };
        let decls = node.declare_ports();

        for port in self.wiring.node_ports(id) {
            let keep = self.wiring.port(port).is_some_and(|p| {
                decls
                    .iter()
                    .any(|d| d.name == p.name() && d.kind == p.kind() && d.port_type == *p.port_type())
            });
            if !keep {
                self.wiring.remove_port(port);
            }
        }

        let order: HashMap<String, usize> = decls
            .iter()
            .enumerate()
            .map(|(index, decl)| (decl.name.clone(), index))
            .collect();
        for decl in decls {
            if self.wiring.port_id(id, &decl.name).is_none() {
                self.wiring.add_port(id, decl, None);
            }
        }
        if let Some(record) = self.wiring.record_mut(id) {
            let rank = |name: &String| order.get(name).copied().unwrap_or(usize::MAX);
            record.ports.sort_by(|a, _, b, _| rank(a).cmp(&rank(b)));
        }

        self.wiring.mark_dirty(id);
        true
    }

    // --- dirty state & topology ---------------------------------------------

    /// Whether a node needs to run
    pub fn is_dirty(&self, id: NodeId) -> bool {
        self.wiring.is_dirty(id)
    }

    /// Set a node's dirty flag
    pub fn set_dirty(&mut self, id: NodeId, dirty: bool) {
        self.wiring.set_dirty(id, dirty);
    }

    /// Mark a node as needing to run
    pub fn mark_dirty(&mut self, id: NodeId) {
        self.wiring.mark_dirty(id);
    }

    /// Clear a node's dirty flag and its ports' change flags
    pub fn mark_clean(&mut self, id: NodeId) {
        self.wiring.mark_clean(id);
    }

    /// Whether any node of this graph would run on the next pass
    pub fn needs_execution(&self) -> bool {
        self.nodes
            .iter()
            .any(|(id, node)| self.wiring.is_dirty(*id) || node.is_always_dirty())
    }

    /// Nodes feeding `id`
    pub fn input_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.wiring.input_nodes(id)
    }

    /// Nodes fed by `id`
    pub fn output_nodes(&self, id: NodeId) -> Vec<NodeId> {
        self.wiring.output_nodes(id)
    }

    /// Make the next pass treat `id` as a root and run it
    pub fn force_execution(&mut self, id: NodeId) {
        if self.nodes.contains_key(&id) {
            self.forced.insert(id);
            self.wiring.mark_dirty(id);
        }
    }

    // --- active subgraph ------------------------------------------------------

    /// Redirect editing operations into the subgraph owned by `node`
    pub fn set_active_subgraph(&mut self, node: Option<NodeId>) {
        self.active_subgraph = node;
    }

    /// Node whose subgraph editing operations are redirected to
    pub fn active_subgraph(&self) -> Option<NodeId> {
        self.active_subgraph
    }

    /// The graph editing operations currently apply to
    pub fn active_scope(&self) -> &Graph {
        match self
            .active_subgraph
            .and_then(|id| self.nodes.get(&id))
            .and_then(|node| node.subgraph())
        {
            Some(inner) => inner.active_scope(),
            None => self,
        }
    }

    /// Run `f` against the graph editing operations currently apply to.
    ///
    /// A stale active subgraph falls back to this graph.
    pub fn with_active_scope<R>(&mut self, f: impl FnOnce(&mut Graph) -> R) -> R {
        if let Some(id) = self.active_subgraph {
            if let Some(inner) = self.nodes.get_mut(&id).and_then(|node| node.subgraph_mut()) {
                return inner.with_active_scope(f);
            }
        }
        f(self)
    }

    // --- history ------------------------------------------------------------

    /// Undo the last edit in the active scope
    pub fn undo(&mut self) -> Result<(), HistoryError> {
        self.with_active_scope(|graph| -> Result<(), HistoryError> {
            let edit = graph.history.pop_undo()?;
            if let Some(inverse) = edit.revert(graph) {
                graph.history.push_redo(inverse);
            }
            Ok(())
        })
    }

    /// Redo the last undone edit in the active scope
    pub fn redo(&mut self) -> Result<(), HistoryError> {
        self.with_active_scope(|graph| -> Result<(), HistoryError> {
            let edit = graph.history.pop_redo()?;
            if let Some(inverse) = edit.revert(graph) {
                graph.history.push_undo(inverse);
            }
            Ok(())
        })
    }

    /// Undo/redo stacks of this graph
    pub fn history(&self) -> &History {
        &self.history
    }

    // --- lifecycle ----------------------------------------------------------

    /// Forward `start_execution` to every node
    pub fn start_execution(&mut self, ctx: &ExecutionContext) {
        self.nodes.values_mut().for_each(|node| node.start_execution(ctx));
    }

    /// Forward `enable_execution` to every node
    pub fn enable_execution(&mut self, ctx: &ExecutionContext) {
        self.nodes.values_mut().for_each(|node| node.enable_execution(ctx));
    }

    /// Forward `disable_execution` to every node
    pub fn disable_execution(&mut self, ctx: &ExecutionContext) {
        self.nodes.values_mut().for_each(|node| node.disable_execution(ctx));
    }

    /// Forward `stop_execution` to every node
    pub fn stop_execution(&mut self, ctx: &ExecutionContext) {
        self.nodes.values_mut().for_each(|node| node.stop_execution(ctx));
    }

    /// Forward `teardown` to every node
    pub fn teardown(&mut self) {
        self.nodes.values_mut().for_each(|node| node.teardown());
    }

    // --- crate internals ----------------------------------------------------

    pub(crate) fn wiring(&self) -> &Wiring {
        &self.wiring
    }

    pub(crate) fn wiring_mut(&mut self) -> &mut Wiring {
        &mut self.wiring
    }

    /// Insert a node body and create its declared ports.
    ///
    /// `port_id` may supply a persisted ID for a declaration.
    pub(crate) fn insert_node(
        &mut self,
        id: NodeId,
        name: String,
        node: Box<dyn Node>,
        port_id: impl Fn(&PortDecl) -> Option<PortId>,
    ) {
        self.wiring.insert_record(NodeRecord::new(id, node.type_key(), name));
        for decl in node.declare_ports() {
            let known = port_id(&decl);
            self.wiring.add_port(id, decl, known);
        }
        self.nodes.insert(id, node);
    }

    pub(crate) fn detach_node(&mut self, id: NodeId) -> Option<DetachedNode> {
        if self.wiring.record(id).is_none() {
            return None;
        }
        let node = self.nodes.shift_remove(&id)?;

        let mut links = Vec::new();
        for port in self.wiring.node_ports(id) {
            links.extend(self.wiring.disconnect_all(port));
        }
        let (record, ports) = self.wiring.remove_record(id)?;

        self.forced.shift_remove(&id);
        if self.active_subgraph == Some(id) {
            self.active_subgraph = None;
        }
        Some(DetachedNode {
            record,
            node,
            ports,
            links,
        })
    }

    pub(crate) fn attach_node(&mut self, detached: DetachedNode) -> NodeId {
        let DetachedNode {
            record,
            node,
            ports,
            links,
        } = detached;
        let id = record.id;

        self.wiring.reinsert(record, ports);
        self.nodes.insert(id, node);
        for link in links {
            if let Err(err) = self.wiring.connect(link.outlet, link.inlet) {
                tracing::warn!(outlet = %link.outlet, inlet = %link.inlet, %err, "could not restore connection");
            }
        }
        self.wiring.mark_dirty(id);
        id
    }

    pub(crate) fn execution_mode(&self, id: NodeId) -> Option<ExecutionMode> {
        self.nodes.get(&id).map(|node| node.execution_mode())
    }

    pub(crate) fn is_always_dirty(&self, id: NodeId) -> bool {
        self.nodes.get(&id).is_some_and(|node| node.is_always_dirty())
    }

    /// Run one node body against its ports
    pub(crate) fn execute_node(&mut self, id: NodeId, ctx: &ExecutionContext, targets: &mut FrameTargets<'_>) -> bool {
        let Some(node) = self.nodes.get_mut(&id) else {
            return false;
        };
        let mut io = NodeIo::new(id, &mut self.wiring);
        node.execute(ctx, &mut io, targets);
        true
    }

    /// Roots of the next pass: consumers, nodes with a published outlet, and
    /// forced nodes. Consumes the forced set.
    pub(crate) fn take_roots(&mut self) -> Vec<NodeId> {
        let forced = std::mem::take(&mut self.forced);
        self.nodes
            .iter()
            .filter(|(id, node)| {
                node.execution_mode() == ExecutionMode::Consumer
                    || forced.contains(*id)
                    || self
                        .wiring
                        .outlets(**id)
                        .into_iter()
                        .any(|port| self.wiring.port(port).is_some_and(Port::is_published))
            })
            .map(|(id, _)| *id)
            .collect()
    }
}

impl Default for Graph {
    fn default() -> Self {
        Self::new("Untitled")
    }
}

impl fmt::Debug for Graph {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Graph")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("nodes", &self.nodes.len())
            .field("connections", &self.connection_count())
            .field("active_subgraph", &self.active_subgraph)
            .finish()
    }
}
