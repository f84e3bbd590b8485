// SPDX-License-Identifier: MIT OR Apache-2.0
//! Undo/redo of graph mutations.
//!
//! Every edit knows how to revert itself, and reverting yields the edit that
//! undoes the revert. Undo and redo are therefore the same operation applied
//! to different stacks.

use crate::connection::Connection;
use crate::graph::Graph;
use crate::node::{Node, NodeId};
use crate::port::{Port, PortId};
use crate::wiring::NodeRecord;
use std::collections::VecDeque;
use std::fmt;
use thiserror::Error;

/// Maximum undo history depth
const MAX_HISTORY: usize = 100;

/// History errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    /// Nothing to undo
    #[error("Nothing to undo")]
    NothingToUndo,

    /// Nothing to redo
    #[error("Nothing to redo")]
    NothingToRedo,
}

/// Result type for history operations
pub type Result<T> = std::result::Result<T, HistoryError>;

/// A node taken out of its graph together with everything needed to put it back
pub struct DetachedNode {
    pub(crate) record: NodeRecord,
    pub(crate) node: Box<dyn Node>,
    pub(crate) ports: Vec<Port>,
    pub(crate) links: Vec<Connection>,
}

impl DetachedNode {
    /// ID the node had, and will have again when restored
    pub fn id(&self) -> NodeId {
        self.record.id
    }

    /// Display name
    pub fn name(&self) -> &str {
        &self.record.name
    }

    /// Connections that were severed on removal
    pub fn links(&self) -> &[Connection] {
        &self.links
    }
}

impl fmt::Debug for DetachedNode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DetachedNode")
            .field("id", &self.record.id)
            .field("type_key", &self.record.type_key)
            .field("ports", &self.ports.len())
            .field("links", &self.links)
            .finish()
    }
}

/// A recorded graph mutation
#[derive(Debug)]
pub enum GraphEdit {
    /// A node was added
    AddNode {
        /// The added node
        node: NodeId,
    },
    /// A node was removed
    RemoveNode(Box<DetachedNode>),
    /// Two ports were connected
    Connect {
        /// Source port
        outlet: PortId,
        /// Target port
        inlet: PortId,
        /// Outlet that fed the inlet before
        displaced: Option<PortId>,
    },
    /// Two ports were disconnected
    Disconnect {
        /// Source port
        outlet: PortId,
        /// Target port
        inlet: PortId,
    },
    /// Several edits applied as one step
    Batch(Vec<GraphEdit>),
}

impl GraphEdit {
    /// Human-readable description
    pub fn description(&self) -> String {
        match self {
            Self::AddNode { .. } => "Add node".to_string(),
            Self::RemoveNode(detached) => format!("Remove {}", detached.name()),
            Self::Connect { .. } => "Connect ports".to_string(),
            Self::Disconnect { .. } => "Disconnect ports".to_string(),
            Self::Batch(edits) => format!("{} edits", edits.len()),
        }
    }

    /// Apply the inverse of this edit to `graph` without recording it.
    ///
    /// Returns the edit that reverts what was just done, or `None` when the
    /// graph no longer contains what the edit refers to.
    pub(crate) fn revert(self, graph: &mut Graph) -> Option<GraphEdit> {
        match self {
            Self::AddNode { node } => graph
                .detach_node(node)
                .map(|detached| Self::RemoveNode(Box::new(detached))),
            Self::RemoveNode(detached) => {
                let node = graph.attach_node(*detached);
                Some(Self::AddNode { node })
            }
            Self::Connect {
                outlet,
                inlet,
                displaced,
            } => {
                if !graph.wiring_mut().disconnect(outlet, inlet) {
                    return None;
                }
                if let Some(previous) = displaced {
                    if let Err(err) = graph.wiring_mut().connect(previous, inlet) {
                        tracing::warn!(%previous, %inlet, %err, "could not restore displaced connection");
                    }
                }
                Some(Self::Disconnect { outlet, inlet })
            }
            Self::Disconnect { outlet, inlet } => match graph.wiring_mut().connect(outlet, inlet) {
                Ok(displaced) => Some(Self::Connect {
                    outlet,
                    inlet,
                    displaced,
                }),
                Err(err) => {
                    tracing::warn!(%outlet, %inlet, %err, "could not restore connection");
                    None
                }
            },
            Self::Batch(edits) => {
                let inverse: Vec<GraphEdit> = edits
                    .into_iter()
                    .rev()
                    .filter_map(|edit| edit.revert(graph))
                    .collect();
                Some(Self::Batch(inverse))
            }
        }
    }
}

/// Undo/redo stacks of one graph
#[derive(Debug)]
pub struct History {
    undo_stack: VecDeque<GraphEdit>,
    redo_stack: VecDeque<GraphEdit>,
    max_depth: usize,
}

impl History {
    /// Create a new history with the default depth
    pub fn new() -> Self {
        Self::with_max_depth(MAX_HISTORY)
    }

    /// Create with custom maximum depth
    pub fn with_max_depth(max_depth: usize) -> Self {
        Self {
            undo_stack: VecDeque::new(),
            redo_stack: VecDeque::new(),
            max_depth,
        }
    }

    /// Record a fresh edit; clears the redo stack
    pub(crate) fn record(&mut self, edit: GraphEdit) {
        self.redo_stack.clear();
        self.push_undo(edit);
    }

    pub(crate) fn push_undo(&mut self, edit: GraphEdit) {
        self.undo_stack.push_back(edit);
        while self.undo_stack.len() > self.max_depth {
            self.undo_stack.pop_front();
        }
    }

    pub(crate) fn push_redo(&mut self, edit: GraphEdit) {
        self.redo_stack.push_back(edit);
    }

    pub(crate) fn pop_undo(&mut self) -> Result<GraphEdit> {
        self.undo_stack.pop_back().ok_or(HistoryError::NothingToUndo)
    }

    pub(crate) fn pop_redo(&mut self) -> Result<GraphEdit> {
        self.redo_stack.pop_back().ok_or(HistoryError::NothingToRedo)
    }

    /// Check if undo is available
    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    /// Check if redo is available
    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Get undo stack depth
    pub fn undo_depth(&self) -> usize {
        self.undo_stack.len()
    }

    /// Get redo stack depth
    pub fn redo_depth(&self) -> usize {
        self.redo_stack.len()
    }

    /// Get description of next undo operation
    pub fn undo_description(&self) -> Option<String> {
        self.undo_stack.back().map(GraphEdit::description)
    }

    /// Clear all history
    pub fn clear(&mut self) {
        self.undo_stack.clear();
        self.redo_stack.clear();
    }
}

impl Default for History {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_depth_limit_drops_oldest() {
        let mut history = History::with_max_depth(2);
        for _ in 0..3 {
            history.record(GraphEdit::AddNode { node: NodeId::new() });
        }
        assert_eq!(history.undo_depth(), 2);
    }

    #[test]
    fn test_record_clears_redo() {
        let mut history = History::new();
        history.push_redo(GraphEdit::Batch(Vec::new()));
        assert!(history.can_redo());
        history.record(GraphEdit::Batch(Vec::new()));
        assert!(!history.can_redo());
    }

    #[test]
    fn test_empty_stacks() {
        let mut history = History::new();
        assert_eq!(history.pop_undo().err(), Some(HistoryError::NothingToUndo));
        assert_eq!(history.pop_redo().err(), Some(HistoryError::NothingToRedo));
    }
}
