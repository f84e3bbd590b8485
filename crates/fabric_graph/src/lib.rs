// SPDX-License-Identifier: MIT OR Apache-2.0
//! Real-time node graph execution engine.
//!
//! Graphs are built from nodes with typed inlets and outlets. Values are
//! pushed along connections as soon as an outlet changes, and a
//! [`GraphRenderer`] pulls the graph once per frame, executing only what is
//! dirty.
//!
//! ## Architecture
//!
//! - [`port`] and [`connection`]: typed ports, scalar conversion, the
//!   single-writer connection model
//! - [`graph`]: node arena with undo history and an editable active scope
//! - [`renderer`]: depth-first per-frame scheduler
//! - [`feedback`]: one-frame-lag resolution of cycles
//! - [`resource`]: frame-pooled GPU resources recycled on command buffer
//!   completion, over the [`device`] abstraction
//! - [`subgraph`]: nodes owning nested graphs
//! - [`document`]: RON persistence through a [`NodeRegistry`]

pub mod connection;
pub mod context;
pub mod device;
pub mod document;
pub mod feedback;
pub mod graph;
pub mod history;
pub mod node;
pub mod nodes;
pub mod port;
pub mod registry;
pub mod renderer;
pub mod resource;
pub mod software;
pub mod subgraph;
mod wiring;

pub use connection::{Connection, ConnectionError};
pub use context::{ExecutionContext, FrameTiming, IterationInfo};
pub use document::{DecodeError, DocumentError, GraphDocument};
pub use feedback::FeedbackCache;
pub use graph::{Graph, GraphId};
pub use history::{GraphEdit, History, HistoryError};
pub use node::{ExecutionMode, Node, NodeId, NodeIo, TimeMode};
pub use port::{Port, PortDecl, PortId, PortKind, PortType, PortValue, SharedValue};
pub use registry::NodeRegistry;
pub use renderer::{FrameTargets, GraphRenderer, PassReport};
pub use resource::{ResourceCache, ResourceCacheConfig, ResourceCacheStats};
pub use subgraph::{IteratorNode, SubgraphNode};
