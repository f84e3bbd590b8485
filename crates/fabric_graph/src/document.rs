// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persisted graph topology.
//!
//! A document is an ordered list of node records, each tagged with a registry
//! key, plus a global map from outlet ID to connected inlet IDs. Loading
//! recreates every node first and rebuilds connections afterwards by
//! resolving IDs against the live port table. Anything that fails to resolve
//! is logged and skipped so the rest of the graph still loads.

use crate::graph::{Graph, GraphId};
use crate::node::NodeId;
use crate::port::{PortId, PortKind, PortType, PortValue};
use crate::registry::NodeRegistry;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Current document format version
pub const DOCUMENT_FORMAT_VERSION: u32 = 1;

/// Problems with individual records while rebuilding a graph
#[derive(Debug, Clone, PartialEq, Error)]
pub enum DecodeError {
    /// No constructor registered for a type key
    #[error("Unknown node type: {0}")]
    UnknownNodeType(String),

    /// A node rejected its saved state
    #[error("Invalid state for {type_key} node: {reason}")]
    InvalidState {
        /// Registry key of the node
        type_key: String,
        /// What went wrong
        reason: String,
    },

    /// A connection refers to a port that does not exist
    #[error("Unresolved port: {0}")]
    UnresolvedPort(PortId),
}

/// Document I/O errors
#[derive(Debug, Error)]
pub enum DocumentError {
    /// Serialization failed
    #[error("Serialization error: {0}")]
    Serialize(#[from] ron::Error),

    /// Text is not a valid document
    #[error("Parse error: {0}")]
    Parse(#[from] ron::error::SpannedError),

    /// Written by a newer version
    #[error("Document version {found} is newer than supported version {supported}")]
    UnsupportedVersion {
        /// Version found in the document
        found: u32,
        /// Newest version this build reads
        supported: u32,
    },

    /// File access failed
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Saved port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PortDocument {
    /// Port ID
    pub id: PortId,
    /// Port name
    pub name: String,
    /// Port kind
    pub kind: PortKind,
    /// Data type
    pub port_type: PortType,
    /// Published flag
    #[serde(default)]
    pub published: bool,
    /// Value, when it can be persisted
    #[serde(default)]
    pub value: Option<PortValue>,
}

/// Saved node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NodeDocument {
    /// Node ID
    pub id: NodeId,
    /// Registry key
    pub type_key: String,
    /// Display name
    pub name: String,
    /// Opaque body state
    #[serde(default)]
    pub state: Option<serde_json::Value>,
    /// Ports in declaration order
    #[serde(default)]
    pub ports: Vec<PortDocument>,
}

/// Saved graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GraphDocument {
    /// Format version
    #[serde(default = "default_version")]
    pub version: u32,
    /// Graph ID
    pub id: GraphId,
    /// Graph name
    pub name: String,
    /// Nodes in graph order
    pub nodes: Vec<NodeDocument>,
    /// Outlet ID to connected inlet IDs
    #[serde(default)]
    pub connections: IndexMap<PortId, Vec<PortId>>,
}

fn default_version() -> u32 {
    DOCUMENT_FORMAT_VERSION
}

impl GraphDocument {
    /// Serialize to RON format
    pub fn to_ron(&self) -> Result<String, DocumentError> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        Ok(ron::ser::to_string_pretty(self, config)?)
    }

    /// Deserialize from RON format
    pub fn from_ron(s: &str) -> Result<Self, DocumentError> {
        let document: GraphDocument = ron::from_str(s)?;
        if document.version > DOCUMENT_FORMAT_VERSION {
            return Err(DocumentError::UnsupportedVersion {
                found: document.version,
                supported: DOCUMENT_FORMAT_VERSION,
            });
        }
        Ok(document)
    }

    /// Save to a file
    pub fn save(&self, path: &Path) -> Result<(), DocumentError> {
        std::fs::write(path, self.to_ron()?)?;
        Ok(())
    }

    /// Load from a file
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_ron(&content)
    }
}

impl Graph {
    /// Snapshot the graph's topology and node state
    pub fn to_document(&self) -> GraphDocument {
        let nodes = self
            .nodes()
            .map(|(id, node)| NodeDocument {
                id,
                type_key: node.type_key().to_string(),
                name: self.node_name(id).unwrap_or_default().to_string(),
                state: node.save_state(),
                ports: self
                    .node_ports(id)
                    .into_iter()
                    .filter_map(|port| self.port(port))
                    .map(|port| PortDocument {
                        id: port.id(),
                        name: port.name().to_string(),
                        kind: port.kind(),
                        port_type: port.port_type().clone(),
                        published: port.is_published(),
                        value: port.value().filter(|v| v.is_persistable()).cloned(),
                    })
                    .collect(),
            })
            .collect();

        let connections = self
            .ports()
            .filter(|port| port.kind() == PortKind::Outlet && port.is_connected())
            .map(|port| (port.id(), port.connections().to_vec()))
            .collect();

        GraphDocument {
            version: DOCUMENT_FORMAT_VERSION,
            id: self.id(),
            name: self.name.clone(),
            nodes,
            connections,
        }
    }

    /// Rebuild a graph from a document.
    ///
    /// Records that cannot be restored are skipped and reported; the returned
    /// graph contains everything else.
    pub fn from_document(document: &GraphDocument, registry: &NodeRegistry) -> (Graph, Vec<DecodeError>) {
        let mut graph = Graph::with_id(document.id, document.name.clone());
        let mut errors = Vec::new();

        for record in &document.nodes {
            if graph.contains_node(record.id) {
                tracing::warn!(node = %record.id, "duplicate node record skipped");
                continue;
            }
            let mut node = match registry.create(&record.type_key) {
                Ok(node) => node,
                Err(err) => {
                    tracing::warn!(node = %record.id, %err, "node skipped");
                    errors.push(err);
                    continue;
                }
            };
            if let Some(state) = &record.state {
                if let Err(err) = node.load_state(state, registry) {
                    tracing::warn!(node = %record.id, %err, "node state not restored");
                    errors.push(err);
                }
            }

            // Declared ports win; saved ports contribute their ID and state
            // when name, kind and type still match.
            let saved: HashMap<&str, &PortDocument> =
                record.ports.iter().map(|port| (port.name.as_str(), port)).collect();
            graph.insert_node(record.id, record.name.clone(), node, |decl| {
                saved
                    .get(decl.name.as_str())
                    .filter(|port| port.kind == decl.kind && port.port_type == decl.port_type)
                    .map(|port| port.id)
            });
            for port in &record.ports {
                match graph.port_id(record.id, &port.name) {
                    Some(id) if id == port.id => {
                        graph.wiring_mut().restore_port_state(id, port.published, port.value.clone());
                    }
                    _ => tracing::debug!(node = %record.id, port = %port.name, "saved port no longer declared"),
                }
            }
        }

        for (outlet, inlets) in &document.connections {
            for inlet in inlets {
                let missing = [*outlet, *inlet].into_iter().find(|id| graph.port(*id).is_none());
                if let Some(port) = missing {
                    tracing::warn!(%port, "connection to unknown port skipped");
                    errors.push(DecodeError::UnresolvedPort(port));
                    continue;
                }
                if let Err(err) = graph.wiring_mut().connect(*outlet, *inlet) {
                    tracing::warn!(%outlet, %inlet, %err, "saved connection rejected");
                }
            }
        }

        tracing::debug!(
            graph = %graph.name,
            nodes = graph.node_count(),
            errors = errors.len(),
            "graph restored"
        );
        (graph, errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::builtin_registry;
    use crate::nodes::math::{MathNode, MathOp, NumberNode};
    use crate::nodes::utility::PreviewNode;

    fn sample() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new("sample");
        let number = graph.add_node(NumberNode::new(5.0));
        let add = graph.add_node(MathNode::new(MathOp::Add).with_operand(3.0));
        let preview = graph.add_node(PreviewNode::new());
        let out = graph.port_id(number, "Number").unwrap();
        let a = graph.port_id(add, "A").unwrap();
        graph.connect(out, a).unwrap();
        let result = graph.port_id(add, "Result").unwrap();
        graph.connect(result, graph.port_id(preview, "Input").unwrap()).unwrap();
        graph.set_node_name(add, "Offset");
        (graph, number, add, preview)
    }

    #[test]
    fn test_round_trip_through_ron() {
        let (graph, number, add, preview) = sample();
        let text = graph.to_document().to_ron().unwrap();
        let document = GraphDocument::from_ron(&text).unwrap();
        let (restored, errors) = Graph::from_document(&document, &builtin_registry());

        assert!(errors.is_empty());
        assert_eq!(restored.id(), graph.id());
        assert_eq!(restored.node_ids().collect::<Vec<_>>(), vec![number, add, preview]);
        assert_eq!(restored.node_name(add), Some("Offset"));
        assert_eq!(restored.connections(), graph.connections());
        assert_eq!(restored.input_nodes(add), vec![number]);

        let b = restored.port_id(add, "B").unwrap();
        assert_eq!(b, graph.port_id(add, "B").unwrap());
        assert_eq!(restored.port_value(b), Some(&PortValue::Float(3.0)));
        assert!(!restored.history().can_undo());
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        let (graph, number, add, _) = sample();
        let mut document = graph.to_document();
        let ghost_port = PortId::new();
        document.nodes.insert(
            0,
            NodeDocument {
                id: NodeId::new(),
                type_key: "vendor.capture".into(),
                name: "Camera".into(),
                state: None,
                ports: vec![PortDocument {
                    id: ghost_port,
                    name: "Image".into(),
                    kind: PortKind::Outlet,
                    port_type: PortType::Image,
                    published: false,
                    value: None,
                }],
            },
        );
        let b = graph.port_id(add, "B").unwrap();
        document.connections.insert(ghost_port, vec![b]);

        let (restored, errors) = Graph::from_document(&document, &builtin_registry());
        assert_eq!(
            errors,
            vec![
                DecodeError::UnknownNodeType("vendor.capture".into()),
                DecodeError::UnresolvedPort(ghost_port),
            ]
        );
        assert_eq!(restored.node_count(), 3);
        assert_eq!(restored.input_nodes(add), vec![number]);
    }

    #[test]
    fn test_mismatched_saved_port_gets_fresh_id() {
        let (graph, _, add, _) = sample();
        let mut document = graph.to_document();
        let old_b = graph.port_id(add, "B").unwrap();
        for record in &mut document.nodes {
            for port in &mut record.ports {
                if port.id == old_b {
                    port.port_type = PortType::String;
                    port.value = Some(PortValue::from("three"));
                }
            }
        }

        let (restored, errors) = Graph::from_document(&document, &builtin_registry());
        assert!(errors.is_empty());
        let b = restored.port_id(add, "B").unwrap();
        assert_ne!(b, old_b);
        assert_eq!(restored.port(b).unwrap().port_type(), &PortType::Float);
    }

    #[test]
    fn test_port_id_collision_gets_fresh_id() {
        let mut graph = Graph::new("collision");
        let x = graph.add_node(MathNode::new(MathOp::Add));
        let y = graph.add_node(MathNode::new(MathOp::Add));
        let x_a = graph.port_id(x, "A").unwrap();
        let y_a = graph.port_id(y, "A").unwrap();
        let mut document = graph.to_document();
        for record in &mut document.nodes {
            for port in &mut record.ports {
                if port.id == y_a {
                    port.id = x_a;
                }
            }
        }

        let (mut restored, _) = Graph::from_document(&document, &builtin_registry());
        assert_eq!(restored.port_id(x, "A"), Some(x_a));
        assert_eq!(restored.port(x_a).unwrap().node(), x);
        let fresh = restored.port_id(y, "A").unwrap();
        assert_ne!(fresh, x_a);
        assert_eq!(restored.port(fresh).unwrap().node(), y);

        restored.remove_node(x);
        assert!(restored.port(fresh).is_some());
    }

    #[test]
    fn test_newer_version_rejected() {
        let (graph, ..) = sample();
        let mut document = graph.to_document();
        document.version = DOCUMENT_FORMAT_VERSION + 1;
        let text = document.to_ron().unwrap();
        assert!(matches!(
            GraphDocument::from_ron(&text),
            Err(DocumentError::UnsupportedVersion { .. })
        ));
    }

    #[test]
    fn test_shared_values_are_not_persisted() {
        use crate::port::SharedValue;

        let mut graph = Graph::new("images");
        let preview = graph.add_node(PreviewNode::new());
        let input = graph.port_id(preview, "Input").unwrap();
        graph.send(input, Some(PortValue::Image(SharedValue::new(1_u8))));

        let document = graph.to_document();
        assert!(document.nodes[0].ports[0].value.is_none());
        assert!(document.to_ron().is_ok());
    }
}
