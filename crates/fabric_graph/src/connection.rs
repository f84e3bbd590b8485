// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connection (edge) view over the symmetric port link lists.
//!
//! A connection is not stored anywhere as its own object: it exists only as
//! the membership of an outlet and an inlet in each other's connection lists.
//! [`Connection`] is the value type used to talk about such a pair.

use crate::port::{PortId, PortKind, PortType};
use serde::{Deserialize, Serialize};

/// A link between one outlet and one inlet
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Connection {
    /// Source (outlet) port
    pub outlet: PortId,
    /// Target (inlet) port
    pub inlet: PortId,
}

impl Connection {
    /// Create a new connection view
    pub fn new(outlet: PortId, inlet: PortId) -> Self {
        Self { outlet, inlet }
    }

    /// Check if this connection involves a specific port
    pub fn involves_port(&self, port_id: PortId) -> bool {
        self.outlet == port_id || self.inlet == port_id
    }
}

/// Error when creating a connection
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConnectionError {
    /// Port not found
    #[error("Port not found: {0}")]
    PortNotFound(PortId),

    /// Both ends are inlets, or both are outlets
    #[error("Cannot connect two {0:?} ports")]
    KindMismatch(PortKind),

    /// No conversion path between the two types
    #[error("Incompatible port types: {outlet:?} -> {inlet:?}")]
    IncompatibleTypes {
        /// Outlet type
        outlet: PortType,
        /// Inlet type
        inlet: PortType,
    },
}
