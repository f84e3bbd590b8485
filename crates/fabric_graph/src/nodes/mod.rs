// SPDX-License-Identifier: MIT OR Apache-2.0
//! Built-in node catalogue.

pub mod image;
pub mod math;
pub mod time;
pub mod utility;

use crate::registry::NodeRegistry;
use crate::subgraph::{IteratorNode, SubgraphNode, ITERATOR_TYPE, SUBGRAPH_TYPE};

/// Registry holding every built-in node type
pub fn builtin_registry() -> NodeRegistry {
    let mut registry = NodeRegistry::new();
    math::register(&mut registry);
    time::register(&mut registry);
    utility::register(&mut registry);
    image::register(&mut registry);

    registry.register(SUBGRAPH_TYPE, "Subgraph", "Nested graph exposing its published ports", || {
        Box::new(SubgraphNode::default())
    });
    registry.register(ITERATOR_TYPE, "Iterator", "Nested graph run several times per pass", || {
        Box::new(IteratorNode::default())
    });
    registry
}
