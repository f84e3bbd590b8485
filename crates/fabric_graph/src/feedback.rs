// SPDX-License-Identifier: MIT OR Apache-2.0
//! Cycle detection and one-frame-lag resolution.
//!
//! Every execution scope keeps a processing state per node. A node reached
//! again while it is still `Processing` closes a cycle; instead of recursing,
//! the inlets fed from that node receive the value its outlets held at the end
//! of the previous frame.

use crate::node::NodeId;
use crate::port::{PortId, PortKind, PortValue};
use crate::wiring::Wiring;
use std::collections::HashMap;

/// Where a node is in the current scope's traversal
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum ProcessingState {
    /// Not visited yet
    #[default]
    Unprocessed,
    /// On the traversal stack
    Processing,
    /// Finished for this pass
    Processed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PortCacheKey {
    port: PortId,
    frame: u64,
}

/// Processing-state stack plus the previous frame's outlet values
#[derive(Debug, Default)]
pub struct FeedbackCache {
    scopes: Vec<HashMap<NodeId, ProcessingState>>,
    values: HashMap<PortCacheKey, PortValue>,
    last_pruned_frame: Option<u64>,
}

impl FeedbackCache {
    /// Create an empty cache
    pub fn new() -> Self {
        Self::default()
    }

    /// Reset processing state and drop values older than `frame - 1`.
    ///
    /// Pruning runs once per frame number.
    pub fn begin_frame(&mut self, frame: u64) {
        self.scopes.clear();
        if self.last_pruned_frame == Some(frame) {
            return;
        }
        self.last_pruned_frame = Some(frame);

        let keep = frame.checked_sub(1);
        let before = self.values.len();
        self.values.retain(|key, _| Some(key.frame) == keep);
        let dropped = before - self.values.len();
        if dropped > 0 {
            tracing::debug!(frame, dropped, retained = self.values.len(), "pruned feedback cache");
        }
    }

    /// Open a fresh processing-state scope
    pub fn push_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    /// Close the innermost scope
    pub fn pop_scope(&mut self) {
        if self.scopes.pop().is_none() {
            tracing::debug!("pop_scope without an open scope");
        }
    }

    /// Number of open scopes
    pub fn scope_depth(&self) -> usize {
        self.scopes.len()
    }

    /// State of `node` in the innermost scope
    pub fn processing_state(&self, node: NodeId) -> ProcessingState {
        self.scopes
            .last()
            .and_then(|scope| scope.get(&node))
            .copied()
            .unwrap_or_default()
    }

    /// Mark `node` as on the traversal stack.
    ///
    /// Inlets fed by a node that is itself `Processing` close a cycle; they
    /// are force-set to that outlet's value from `frame - 1`, or null when
    /// nothing was cached.
    pub(crate) fn set_processing(&mut self, node: NodeId, wiring: &mut Wiring, frame: u64) {
        let Some(scope) = self.scopes.last_mut() else {
            tracing::debug!(%node, "set_processing without an open scope");
            return;
        };
        if scope.get(&node).copied().unwrap_or_default() != ProcessingState::Unprocessed {
            tracing::debug!(%node, "node re-entered while not unprocessed; ignored");
            return;
        }
        scope.insert(node, ProcessingState::Processing);

        let mut injections = Vec::new();
        for inlet in wiring.inlets(node) {
            let Some(outlet) = wiring.port(inlet).and_then(|p| p.connections().first().copied()) else {
                continue;
            };
            let Some(upstream) = wiring.port(outlet).map(|p| p.node()) else {
                continue;
            };
            if scope.get(&upstream) == Some(&ProcessingState::Processing) {
                let cached = frame.checked_sub(1).and_then(|previous| {
                    self.values
                        .get(&PortCacheKey {
                            port: outlet,
                            frame: previous,
                        })
                        .cloned()
                });
                injections.push((inlet, cached));
            }
        }

        for (inlet, value) in injections {
            tracing::trace!(%node, %inlet, hit = value.is_some(), "feedback value injected");
            wiring.force_set(inlet, value);
        }
    }

    /// Mark `node` finished and snapshot its connected outlets for `frame`
    pub(crate) fn set_processed(&mut self, node: NodeId, wiring: &Wiring, frame: u64) {
        match self.scopes.last_mut() {
            Some(scope) => {
                scope.insert(node, ProcessingState::Processed);
            }
            None => {
                tracing::debug!(%node, "set_processed without an open scope");
                return;
            }
        }

        for outlet in wiring.outlets(node) {
            let Some(port) = wiring.port(outlet) else {
                continue;
            };
            if port.kind() != PortKind::Outlet || !port.is_connected() {
                continue;
            }
            let key = PortCacheKey { port: outlet, frame };
            match port.value() {
                Some(value) => {
                    self.values.insert(key, value.clone());
                }
                None => {
                    self.values.remove(&key);
                }
            }
        }
    }

    /// Cached value of `outlet` at the end of `frame`
    pub fn cached_value(&self, outlet: PortId, frame: u64) -> Option<&PortValue> {
        self.values.get(&PortCacheKey { port: outlet, frame })
    }

    /// Number of cached outlet values
    pub fn cached_len(&self) -> usize {
        self.values.len()
    }

    /// Whether anything is cached for `frame`
    pub fn has_frame(&self, frame: u64) -> bool {
        self.values.keys().any(|key| key.frame == frame)
    }
}
