// SPDX-License-Identifier: MIT OR Apache-2.0
//! Factory map from type key to node constructor.

use crate::document::DecodeError;
use crate::node::Node;
use indexmap::IndexMap;

/// Constructor for a default instance of a node type
pub type NodeConstructor = fn() -> Box<dyn Node>;

/// Node type definition
#[derive(Debug, Clone)]
pub struct NodeTypeInfo {
    /// Unique type key
    pub key: String,
    /// Display name
    pub name: String,
    /// Description
    pub description: String,
    /// Creates a default instance
    pub constructor: NodeConstructor,
}

/// Registry of available node types
#[derive(Debug, Default)]
pub struct NodeRegistry {
    types: IndexMap<String, NodeTypeInfo>,
}

impl NodeRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node type; a second registration under the same key replaces the first
    pub fn register(
        &mut self,
        key: impl Into<String>,
        name: impl Into<String>,
        description: impl Into<String>,
        constructor: NodeConstructor,
    ) {
        let key = key.into();
        let info = NodeTypeInfo {
            key: key.clone(),
            name: name.into(),
            description: description.into(),
            constructor,
        };
        if self.types.insert(key.clone(), info).is_some() {
            tracing::debug!(%key, "node type re-registered");
        }
    }

    /// Get a node type by key
    pub fn get(&self, key: &str) -> Option<&NodeTypeInfo> {
        self.types.get(key)
    }

    /// Whether a key is registered
    pub fn contains(&self, key: &str) -> bool {
        self.types.contains_key(key)
    }

    /// Get all registered types
    pub fn types(&self) -> impl Iterator<Item = &NodeTypeInfo> {
        self.types.values()
    }

    /// Get registered type count
    pub fn len(&self) -> usize {
        self.types.len()
    }

    /// Whether nothing is registered
    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    /// Create a default instance of a node type
    pub fn create(&self, key: &str) -> Result<Box<dyn Node>, DecodeError> {
        self.types
            .get(key)
            .map(|info| (info.constructor)())
            .ok_or_else(|| DecodeError::UnknownNodeType(key.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nodes::math::NumberNode;

    fn number() -> Box<dyn Node> {
        Box::new(NumberNode::default())
    }

    #[test]
    fn test_register_and_create() {
        let mut registry = NodeRegistry::new();
        registry.register("number", "Number", "Constant number", number);
        assert!(registry.contains("number"));
        assert_eq!(registry.len(), 1);

        let node = registry.create("number").unwrap();
        assert_eq!(node.type_key(), "number");
    }

    #[test]
    fn test_unknown_key_is_recoverable() {
        let registry = NodeRegistry::new();
        assert!(matches!(
            registry.create("missing"),
            Err(DecodeError::UnknownNodeType(key)) if key == "missing"
        ));
    }
}
