// SPDX-License-Identifier: MIT OR Apache-2.0
//! Per-pass execution context handed to every node.

use crate::node::NodeId;
use crate::port::PortValue;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Clock readings for one pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct FrameTiming {
    /// Seconds since playback started
    pub time: f64,
    /// Seconds since the previous pass
    pub delta_time: f64,
    /// Expected presentation time, when the display reports one
    pub display_time: Option<f64>,
    /// Wall-clock seconds since the Unix epoch
    pub system_time: f64,
    /// Monotonic pass counter
    pub frame_number: u64,
}

/// Position inside an iterating subgraph
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IterationInfo {
    /// Node driving the iteration
    pub iterator_node: NodeId,
    /// Total number of iterations this pass
    pub total_iterations: u32,
    /// Zero-based current iteration
    pub current_iteration: u32,
}

impl IterationInfo {
    /// Progress through the iterations in `0.0..=1.0`
    pub fn normalized(&self) -> f32 {
        if self.total_iterations <= 1 {
            return 0.0;
        }
        self.current_iteration as f32 / (self.total_iterations - 1) as f32
    }
}

/// A single input event delivered with a pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum InputEvent {
    /// Pointer moved to a position in view coordinates
    PointerMoved([f32; 2]),
    /// Pointer button pressed
    PointerDown(u8),
    /// Pointer button released
    PointerUp(u8),
    /// Key pressed
    KeyDown(String),
    /// Key released
    KeyUp(String),
    /// Scroll delta
    Scroll([f32; 2]),
}

/// Events gathered since the previous pass
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventInfo {
    /// Events in arrival order
    pub events: Vec<InputEvent>,
    /// Last known pointer position
    pub pointer_position: Option<[f32; 2]>,
}

/// Everything a node may read about the current pass.
///
/// Immutable for the duration of a pass; iterating subgraphs derive a copy
/// with [`ExecutionContext::with_iteration`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ExecutionContext {
    /// Clock readings
    pub timing: FrameTiming,
    /// Set while inside an iterating subgraph
    pub iteration: Option<IterationInfo>,
    /// Input events, if the host delivers any
    pub events: Option<EventInfo>,
    /// Arbitrary host-provided values
    pub user_info: IndexMap<String, PortValue>,
}

impl ExecutionContext {
    /// Create a context for a pass
    pub fn new(timing: FrameTiming) -> Self {
        Self {
            timing,
            ..Self::default()
        }
    }

    /// Frame number of the pass
    pub fn frame_number(&self) -> u64 {
        self.timing.frame_number
    }

    /// Copy of this context positioned at one iteration
    pub fn with_iteration(&self, iteration: IterationInfo) -> Self {
        Self {
            iteration: Some(iteration),
            ..self.clone()
        }
    }

    /// Attach events
    pub fn with_events(mut self, events: EventInfo) -> Self {
        self.events = Some(events);
        self
    }

    /// Host value by key
    pub fn user_value(&self, key: &str) -> Option<&PortValue> {
        self.user_info.get(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_iteration_normalized() {
        let mut info = IterationInfo {
            iterator_node: NodeId::new(),
            total_iterations: 5,
            current_iteration: 0,
        };
        assert_eq!(info.normalized(), 0.0);
        info.current_iteration = 4;
        assert_eq!(info.normalized(), 1.0);
        info.current_iteration = 2;
        assert_eq!(info.normalized(), 0.5);

        info.total_iterations = 1;
        info.current_iteration = 0;
        assert_eq!(info.normalized(), 0.0);
    }

    #[test]
    fn test_with_iteration_keeps_timing() {
        let ctx = ExecutionContext::new(FrameTiming {
            time: 2.0,
            frame_number: 7,
            ..FrameTiming::default()
        });
        let info = IterationInfo {
            iterator_node: NodeId::new(),
            total_iterations: 3,
            current_iteration: 1,
        };
        let derived = ctx.with_iteration(info);
        assert_eq!(derived.frame_number(), 7);
        assert_eq!(derived.iteration, Some(info));
        assert!(ctx.iteration.is_none());
    }
}
