// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port arena shared by the nodes of one graph.
//!
//! All connection bookkeeping and value propagation happens here. Ports refer
//! to their owning node and to each other by ID only, so there are no
//! reference cycles to manage.

use crate::connection::{Connection, ConnectionError};
use crate::node::NodeId;
use crate::port::{Port, PortDecl, PortId, PortKind, PortValue};
use indexmap::IndexMap;

/// Bookkeeping the graph keeps per node, next to the node body itself
#[derive(Debug, Clone)]
pub(crate) struct NodeRecord {
    pub(crate) id: NodeId,
    pub(crate) type_key: String,
    pub(crate) name: String,
    /// Ports in declaration order, by name
    pub(crate) ports: IndexMap<String, PortId>,
    pub(crate) dirty: bool,
}

impl NodeRecord {
    pub(crate) fn new(id: NodeId, type_key: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id,
            type_key: type_key.into(),
            name: name.into(),
            ports: IndexMap::new(),
            // Fresh nodes always run once.
            dirty: true,
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct Wiring {
    records: IndexMap<NodeId, NodeRecord>,
    ports: IndexMap<PortId, Port>,
}

impl Wiring {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    // --- nodes -----------------------------------------------------------

    pub(crate) fn insert_record(&mut self, record: NodeRecord) {
        self.records.insert(record.id, record);
    }

    pub(crate) fn record(&self, node: NodeId) -> Option<&NodeRecord> {
        self.records.get(&node)
    }

    pub(crate) fn record_mut(&mut self, node: NodeId) -> Option<&mut NodeRecord> {
        self.records.get_mut(&node)
    }

    /// Detach a node's record and ports. Callers disconnect the ports first.
    pub(crate) fn remove_record(&mut self, node: NodeId) -> Option<(NodeRecord, Vec<Port>)> {
        let record = self.records.shift_remove(&node)?;
        let ports = record
            .ports
            .values()
            .filter_map(|id| self.ports.shift_remove(id))
            .collect();
        Some((record, ports))
    }

    /// Re-attach a previously detached node; links are restored separately.
    pub(crate) fn reinsert(&mut self, record: NodeRecord, ports: Vec<Port>) {
        for mut port in ports {
            port.connections.clear();
            self.ports.insert(port.id, port);
        }
        self.records.insert(record.id, record);
    }

    pub(crate) fn is_dirty(&self, node: NodeId) -> bool {
        self.records.get(&node).is_some_and(|r| r.dirty)
    }

    pub(crate) fn set_dirty(&mut self, node: NodeId, dirty: bool) {
        if let Some(record) = self.records.get_mut(&node) {
            record.dirty = dirty;
        }
    }

    pub(crate) fn mark_dirty(&mut self, node: NodeId) {
        self.set_dirty(node, true);
    }

    /// Clear the dirty flag and consume every port's change flag
    pub(crate) fn mark_clean(&mut self, node: NodeId) {
        let Some(record) = self.records.get_mut(&node) else {
            return;
        };
        record.dirty = false;
        for id in record.ports.values() {
            if let Some(port) = self.ports.get_mut(id) {
                port.value_did_change = false;
            }
        }
    }

    // --- ports -----------------------------------------------------------

    pub(crate) fn port(&self, id: PortId) -> Option<&Port> {
        self.ports.get(&id)
    }

    pub(crate) fn ports(&self) -> impl Iterator<Item = &Port> {
        self.ports.values()
    }

    pub(crate) fn port_id(&self, node: NodeId, name: &str) -> Option<PortId> {
        self.records.get(&node)?.ports.get(name).copied()
    }

    pub(crate) fn node_ports(&self, node: NodeId) -> Vec<PortId> {
        self.records
            .get(&node)
            .map(|r| r.ports.values().copied().collect())
            .unwrap_or_default()
    }

    fn ports_of_kind(&self, node: NodeId, kind: PortKind) -> Vec<PortId> {
        self.node_ports(node)
            .into_iter()
            .filter(|id| self.ports.get(id).is_some_and(|p| p.kind == kind))
            .collect()
    }

    pub(crate) fn inlets(&self, node: NodeId) -> Vec<PortId> {
        self.ports_of_kind(node, PortKind::Inlet)
    }

    pub(crate) fn outlets(&self, node: NodeId) -> Vec<PortId> {
        self.ports_of_kind(node, PortKind::Outlet)
    }

    /// Create a port for `node` from its declaration, reusing `id` when given
    pub(crate) fn add_port(&mut self, node: NodeId, decl: PortDecl, id: Option<PortId>) -> Option<PortId> {
        let record = self.records.get_mut(&node)?;
        if record.ports.contains_key(&decl.name) {
            tracing::warn!(node = %node, port = %decl.name, "duplicate port name; declaration ignored");
            return None;
        }

        let id = match id {
            Some(id) if self.ports.contains_key(&id) => {
                tracing::warn!(node = %node, port = %decl.name, %id, "port id already in use; assigning a fresh one");
                PortId::default()
            }
            Some(id) => id,
            None => PortId::default(),
        };
        record.ports.insert(decl.name.clone(), id);
        self.ports.insert(id, Port::from_decl(id, node, decl));
        Some(id)
    }

    /// Disconnect and drop a port
    pub(crate) fn remove_port(&mut self, id: PortId) -> Vec<Connection> {
        let links = self.disconnect_all(id);
        if let Some(port) = self.ports.shift_remove(&id) {
            if let Some(record) = self.records.get_mut(&port.node) {
                record.ports.shift_remove(&port.name);
            }
        }
        links
    }

    /// Overwrite a port's bookkeeping fields; used when restoring documents
    pub(crate) fn restore_port_state(&mut self, id: PortId, published: bool, value: Option<PortValue>) {
        if let Some(port) = self.ports.get_mut(&id) {
            port.published = published;
            if let Some(value) = value.and_then(|v| v.convert_to(&port.port_type)) {
                port.value = Some(value);
            }
        }
    }

    pub(crate) fn set_published(&mut self, id: PortId, published: bool) -> bool {
        let Some(port) = self.ports.get_mut(&id) else {
            return false;
        };
        if published && port.kind == PortKind::Inlet && port.is_connected() {
            tracing::warn!(port = %id, "a connected inlet cannot be published");
            return false;
        }
        port.published = published;
        true
    }

    pub(crate) fn published_ports(&self) -> Vec<PortId> {
        self.records
            .values()
            .flat_map(|r| r.ports.values())
            .filter(|id| self.ports.get(*id).is_some_and(|p| p.published))
            .copied()
            .collect()
    }

    // --- topology ----------------------------------------------------------

    /// Link an outlet and an inlet (either argument order).
    ///
    /// Returns the outlet that previously fed the inlet, if any.
    pub(crate) fn connect(&mut self, a: PortId, b: PortId) -> Result<Option<PortId>, ConnectionError> {
        let (outlet, inlet) = self.orient(a, b)?;

        let (outlet_type, inlet_type) = match (self.ports.get(&outlet), self.ports.get(&inlet)) {
            (Some(o), Some(i)) => (o.port_type.clone(), i.port_type.clone()),
            _ => return Err(ConnectionError::PortNotFound(outlet)),
        };
        if !outlet_type.can_connect_to(&inlet_type) {
            tracing::warn!(%outlet, %inlet, ?outlet_type, ?inlet_type, "incompatible port types; connection ignored");
            return Err(ConnectionError::IncompatibleTypes {
                outlet: outlet_type,
                inlet: inlet_type,
            });
        }

        // Single writer: the inlet lets go of whatever fed it before.
        let previous: Vec<PortId> = self
            .ports
            .get(&inlet)
            .map(|p| p.connections.clone())
            .unwrap_or_default();
        let displaced = previous.iter().copied().find(|p| *p != outlet);
        for prev in previous {
            self.unlink(prev, inlet);
        }

        if let Some(port) = self.ports.get_mut(&inlet) {
            port.connections = vec![outlet];
            port.published = false;
        }
        let value = match self.ports.get_mut(&outlet) {
            Some(port) => {
                if !port.connections.contains(&inlet) {
                    port.connections.push(inlet);
                }
                port.value.clone()
            }
            None => None,
        };

        self.deliver(inlet, value.as_ref(), true);
        tracing::debug!(%outlet, %inlet, "ports connected");
        Ok(displaced)
    }

    /// Whether `outlet` currently feeds `inlet`
    pub(crate) fn is_linked(&self, outlet: PortId, inlet: PortId) -> bool {
        self.ports
            .get(&inlet)
            .is_some_and(|p| p.connections.contains(&outlet))
    }

    /// Remove the link between two ports. Returns whether a link existed.
    pub(crate) fn disconnect(&mut self, a: PortId, b: PortId) -> bool {
        let Ok((outlet, inlet)) = self.orient(a, b) else {
            return false;
        };
        let linked = self.is_linked(outlet, inlet);
        if linked {
            self.unlink(outlet, inlet);
            tracing::debug!(%outlet, %inlet, "ports disconnected");
        }
        linked
    }

    /// Remove every link of a port
    pub(crate) fn disconnect_all(&mut self, id: PortId) -> Vec<Connection> {
        let Some(port) = self.ports.get(&id) else {
            return Vec::new();
        };
        let links: Vec<Connection> = match port.kind {
            PortKind::Inlet => port.connections.iter().map(|o| Connection::new(*o, id)).collect(),
            PortKind::Outlet => port.connections.iter().map(|i| Connection::new(id, *i)).collect(),
        };
        for link in &links {
            self.unlink(link.outlet, link.inlet);
        }
        links
    }

    pub(crate) fn connections(&self) -> Vec<Connection> {
        self.ports
            .values()
            .filter(|p| p.kind == PortKind::Outlet)
            .flat_map(|p| p.connections.iter().map(move |inlet| Connection::new(p.id, *inlet)))
            .collect()
    }

    /// Nodes feeding `node`, in inlet order, without duplicates
    pub(crate) fn input_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbours(node, PortKind::Inlet)
    }

    /// Nodes fed by `node`, in outlet order, without duplicates
    pub(crate) fn output_nodes(&self, node: NodeId) -> Vec<NodeId> {
        self.neighbours(node, PortKind::Outlet)
    }

    fn neighbours(&self, node: NodeId, kind: PortKind) -> Vec<NodeId> {
        let mut found = Vec::new();
        for id in self.ports_of_kind(node, kind) {
            let Some(port) = self.ports.get(&id) else {
                continue;
            };
            for other in &port.connections {
                if let Some(owner) = self.ports.get(other).map(|p| p.node) {
                    if !found.contains(&owner) {
                        found.push(owner);
                    }
                }
            }
        }
        found
    }

    // --- values ------------------------------------------------------------

    /// Set a port's value.
    ///
    /// Outlets propagate to every connected inlet when the value changed (or
    /// when forced). Inlets take the value directly. Returns whether anything
    /// was written.
    pub(crate) fn send(&mut self, id: PortId, value: Option<PortValue>, force: bool) -> bool {
        let Some(port) = self.ports.get_mut(&id) else {
            tracing::warn!(port = %id, "send to unknown port");
            return false;
        };

        if port.kind == PortKind::Inlet {
            let changed = force || port.value.as_ref() != value.as_ref();
            self.deliver(id, value.as_ref(), force);
            return changed;
        }

        let value = value.and_then(|v| {
            let converted = v.convert_to(&port.port_type);
            if converted.is_none() {
                tracing::debug!(port = %id, "outlet value does not match its port type; sending null");
            }
            converted
        });
        if port.value == value && !force {
            return false;
        }

        port.value = value;
        port.value_did_change = true;
        let targets = port.connections.clone();
        let value = port.value.clone();
        for inlet in targets {
            self.deliver(inlet, value.as_ref(), force);
        }
        true
    }

    /// Write an inlet without comparing against its current value.
    ///
    /// The owning node is marked dirty so it sees the value even if equal.
    pub(crate) fn force_set(&mut self, inlet: PortId, value: Option<PortValue>) {
        self.deliver(inlet, value.as_ref(), true);
    }

    fn deliver(&mut self, inlet: PortId, value: Option<&PortValue>, force: bool) {
        let Some(port) = self.ports.get_mut(&inlet) else {
            return;
        };
        let converted = value.and_then(|v| v.convert_to(&port.port_type));
        if port.value != converted || force {
            port.value = converted;
            port.value_did_change = true;
            let owner = port.node;
            self.mark_dirty(owner);
        }
    }

    fn unlink(&mut self, outlet: PortId, inlet: PortId) {
        // The inlet sees null before the link goes away.
        self.deliver(inlet, None, true);

        if let Some(port) = self.ports.get_mut(&inlet) {
            port.connections.retain(|p| *p != outlet);
            port.published = false;
        }
        if let Some(port) = self.ports.get_mut(&outlet) {
            port.connections.retain(|p| *p != inlet);
        }
    }

    /// Order two ports as (outlet, inlet)
    fn orient(&self, a: PortId, b: PortId) -> Result<(PortId, PortId), ConnectionError> {
        let (Some(pa), Some(pb)) = (self.ports.get(&a), self.ports.get(&b)) else {
            let missing = if self.ports.contains_key(&a) { b } else { a };
            tracing::warn!(port = %missing, "cannot connect unknown port");
            return Err(ConnectionError::PortNotFound(missing));
        };
        if pa.kind == pb.kind {
            tracing::warn!(%a, %b, kind = ?pa.kind, "cannot connect ports of the same kind");
            return Err(ConnectionError::KindMismatch(pa.kind));
        }
        Ok(match pa.kind {
            PortKind::Outlet => (a, b),
            PortKind::Inlet => (b, a),
        })
    }
}
