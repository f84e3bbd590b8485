// SPDX-License-Identifier: MIT OR Apache-2.0
//! Port definitions for node inlets/outlets and the values that flow through them.

use crate::node::NodeId;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

/// Unique identifier for a port
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PortId(pub Uuid);

impl PortId {
    /// Create a new random port ID
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for PortId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Which side of a node a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortKind {
    /// Receives a value from at most one outlet
    Inlet,
    /// Provides a value to any number of inlets
    Outlet,
}

impl PortKind {
    /// The kind a port must have to be connected to this one
    pub fn opposite(self) -> Self {
        match self {
            Self::Inlet => Self::Outlet,
            Self::Outlet => Self::Inlet,
        }
    }
}

/// Data type that can flow through ports
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PortType {
    /// Boolean value
    Bool,
    /// Integer value
    Int,
    /// Floating point value
    Float,
    /// String value
    String,
    /// 2D vector
    Vector2,
    /// 3D vector
    Vector3,
    /// 4D vector
    Vector4,
    /// Color (RGBA)
    Color,
    /// Rotation quaternion
    Quaternion,
    /// 4x4 transform matrix
    Transform,
    /// Geometry handle
    Geometry,
    /// Material handle
    Material,
    /// Shader handle
    Shader,
    /// GPU image
    Image,
    /// Type-erased scalar port; accepts any value
    Virtual,
    /// Homogeneous array
    Array(Box<PortType>),
}

impl PortType {
    /// Whether values of this type take part in scalar conversion
    pub fn is_scalar(&self) -> bool {
        matches!(
            self,
            Self::Bool | Self::Int | Self::Float | Self::String | Self::Virtual
        )
    }

    /// Check if this type can connect to another type
    pub fn can_connect_to(&self, other: &PortType) -> bool {
        if self.is_scalar() && other.is_scalar() {
            return true;
        }

        self == other
    }
}

/// Opaque shared handle for values the engine moves around but never inspects
/// (geometry, materials, shaders, images).
///
/// Two handles are equal only when they point at the same allocation.
#[derive(Clone)]
pub struct SharedValue(Arc<dyn Any + Send + Sync>);

impl SharedValue {
    /// Wrap a value in a new shared handle
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self(Arc::new(value))
    }

    /// Wrap an existing allocation
    pub fn from_arc(value: Arc<dyn Any + Send + Sync>) -> Self {
        Self(value)
    }

    /// Borrow the payload as a concrete type
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref::<T>()
    }

    /// Whether both handles share one allocation
    pub fn ptr_eq(&self, other: &SharedValue) -> bool {
        std::ptr::eq(
            Arc::as_ptr(&self.0) as *const (),
            Arc::as_ptr(&other.0) as *const (),
        )
    }
}

impl PartialEq for SharedValue {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
    }
}

impl fmt::Debug for SharedValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedValue({:p})", Arc::as_ptr(&self.0) as *const ())
    }
}

/// Value that can be stored in a port
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum PortValue {
    /// Boolean
    Bool(bool),
    /// Integer
    Int(i64),
    /// Float
    Float(f32),
    /// String
    String(String),
    /// 2D vector
    Vector2([f32; 2]),
    /// 3D vector
    Vector3([f32; 3]),
    /// 4D vector
    Vector4([f32; 4]),
    /// Color
    Color([f32; 4]),
    /// Quaternion (x, y, z, w)
    Quaternion([f32; 4]),
    /// Column-major 4x4 matrix
    Transform([[f32; 4]; 4]),
    /// Geometry handle
    #[serde(skip)]
    Geometry(SharedValue),
    /// Material handle
    #[serde(skip)]
    Material(SharedValue),
    /// Shader handle
    #[serde(skip)]
    Shader(SharedValue),
    /// Image handle
    #[serde(skip)]
    Image(SharedValue),
    /// Array of values sharing one element type
    Array {
        /// Element type
        element: PortType,
        /// Elements
        values: Vec<PortValue>,
    },
}

impl PortValue {
    /// Get the port type for this value
    pub fn port_type(&self) -> PortType {
        match self {
            Self::Bool(_) => PortType::Bool,
            Self::Int(_) => PortType::Int,
            Self::Float(_) => PortType::Float,
            Self::String(_) => PortType::String,
            Self::Vector2(_) => PortType::Vector2,
            Self::Vector3(_) => PortType::Vector3,
            Self::Vector4(_) => PortType::Vector4,
            Self::Color(_) => PortType::Color,
            Self::Quaternion(_) => PortType::Quaternion,
            Self::Transform(_) => PortType::Transform,
            Self::Geometry(_) => PortType::Geometry,
            Self::Material(_) => PortType::Material,
            Self::Shader(_) => PortType::Shader,
            Self::Image(_) => PortType::Image,
            Self::Array { element, .. } => PortType::Array(Box::new(element.clone())),
        }
    }

    /// Convert this value for delivery into a port of type `target`.
    ///
    /// Only the scalar group (bool, int, float, string) converts; everything
    /// else must match exactly. Virtual targets take any value unchanged.
    pub fn convert_to(&self, target: &PortType) -> Option<PortValue> {
        if *target == PortType::Virtual || self.port_type() == *target {
            return Some(self.clone());
        }

        match (self, target) {
            (Self::Bool(v), PortType::Int) => Some(Self::Int(i64::from(*v))),
            (Self::Bool(v), PortType::Float) => Some(Self::Float(if *v { 1.0 } else { 0.0 })),
            (Self::Bool(v), PortType::String) => Some(Self::String(v.to_string())),
            (Self::Int(v), PortType::Bool) => Some(Self::Bool(*v != 0)),
            (Self::Int(v), PortType::Float) => Some(Self::Float(*v as f32)),
            (Self::Int(v), PortType::String) => Some(Self::String(v.to_string())),
            (Self::Float(v), PortType::Bool) => Some(Self::Bool(*v != 0.0)),
            (Self::Float(v), PortType::Int) => Some(Self::Int(v.trunc() as i64)),
            (Self::Float(v), PortType::String) => Some(Self::String(v.to_string())),
            (Self::String(s), PortType::Bool) => Some(Self::Bool(matches!(
                s.trim().to_ascii_lowercase().as_str(),
                "true" | "1" | "yes"
            ))),
            (Self::String(s), PortType::Int) => s.trim().parse().ok().map(Self::Int),
            (Self::String(s), PortType::Float) => s.trim().parse().ok().map(Self::Float),
            _ => None,
        }
    }

    /// Whether this value survives a round trip through a graph document
    pub fn is_persistable(&self) -> bool {
        match self {
            Self::Geometry(_) | Self::Material(_) | Self::Shader(_) | Self::Image(_) => false,
            Self::Array { values, .. } => values.iter().all(Self::is_persistable),
            _ => true,
        }
    }

    /// Read as a float, converting scalars
    pub fn as_f32(&self) -> Option<f32> {
        match self.convert_to(&PortType::Float)? {
            Self::Float(v) => Some(v),
            _ => None,
        }
    }

    /// Read as an integer, converting scalars
    pub fn as_i64(&self) -> Option<i64> {
        match self.convert_to(&PortType::Int)? {
            Self::Int(v) => Some(v),
            _ => None,
        }
    }

    /// Read as a boolean, converting scalars
    pub fn as_bool(&self) -> Option<bool> {
        match self.convert_to(&PortType::Bool)? {
            Self::Bool(v) => Some(v),
            _ => None,
        }
    }
}

impl From<bool> for PortValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<i64> for PortValue {
    fn from(value: i64) -> Self {
        Self::Int(value)
    }
}

impl From<f32> for PortValue {
    fn from(value: f32) -> Self {
        Self::Float(value)
    }
}

impl From<&str> for PortValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl From<String> for PortValue {
    fn from(value: String) -> Self {
        Self::String(value)
    }
}

/// Declaration of a port a node wants; the graph turns it into a live [`Port`].
#[derive(Debug, Clone, PartialEq)]
pub struct PortDecl {
    /// Port name, unique within its node
    pub name: String,
    /// Port kind
    pub kind: PortKind,
    /// Data type
    pub port_type: PortType,
    /// Initial value
    pub value: Option<PortValue>,
    /// Whether the port starts out published
    pub published: bool,
    /// Human readable description
    pub description: String,
}

impl PortDecl {
    /// Create a new inlet declaration
    pub fn inlet(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Inlet,
            port_type,
            value: None,
            published: false,
            description: String::new(),
        }
    }

    /// Create a new outlet declaration
    pub fn outlet(name: impl Into<String>, port_type: PortType) -> Self {
        Self {
            name: name.into(),
            kind: PortKind::Outlet,
            port_type,
            value: None,
            published: false,
            description: String::new(),
        }
    }

    /// Set the initial value
    pub fn with_value(mut self, value: impl Into<PortValue>) -> Self {
        self.value = Some(value.into());
        self
    }

    /// Mark as published
    pub fn published(mut self) -> Self {
        self.published = true;
        self
    }

    /// Set the description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }
}

/// A live port on a node
#[derive(Debug, Clone)]
pub struct Port {
    pub(crate) id: PortId,
    pub(crate) name: String,
    pub(crate) kind: PortKind,
    pub(crate) port_type: PortType,
    pub(crate) value: Option<PortValue>,
    pub(crate) published: bool,
    pub(crate) connections: Vec<PortId>,
    pub(crate) node: NodeId,
    pub(crate) value_did_change: bool,
    pub(crate) description: String,
}

impl Port {
    /// Create a port owned by `node` from its declaration
    pub(crate) fn from_decl(id: PortId, node: NodeId, decl: PortDecl) -> Self {
        let value = decl.value.and_then(|v| v.convert_to(&decl.port_type));
        Self {
            id,
            name: decl.name,
            kind: decl.kind,
            port_type: decl.port_type,
            value,
            published: decl.published,
            connections: Vec::new(),
            node,
            value_did_change: true,
            description: decl.description,
        }
    }

    /// Port ID
    pub fn id(&self) -> PortId {
        self.id
    }

    /// Port name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Port kind
    pub fn kind(&self) -> PortKind {
        self.kind
    }

    /// Data type, fixed at construction
    pub fn port_type(&self) -> &PortType {
        &self.port_type
    }

    /// Current value
    pub fn value(&self) -> Option<&PortValue> {
        self.value.as_ref()
    }

    /// Whether this port is part of its graph's external interface
    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Connected ports
    pub fn connections(&self) -> &[PortId] {
        &self.connections
    }

    /// Whether any port is connected
    pub fn is_connected(&self) -> bool {
        !self.connections.is_empty()
    }

    /// Owning node
    pub fn node(&self) -> NodeId {
        self.node
    }

    /// Whether the value changed since the owning node was last marked clean
    pub fn value_did_change(&self) -> bool {
        self.value_did_change
    }

    /// Description
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Check if a connection to another port is valid
    pub fn can_connect(&self, other: &Port) -> bool {
        if self.kind == other.kind {
            return false;
        }

        self.port_type.can_connect_to(&other.port_type)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scalar_conversion_table() {
        assert_eq!(PortValue::Bool(true).convert_to(&PortType::Int), Some(PortValue::Int(1)));
        assert_eq!(PortValue::Bool(false).convert_to(&PortType::Float), Some(PortValue::Float(0.0)));
        assert_eq!(
            PortValue::Bool(true).convert_to(&PortType::String),
            Some(PortValue::String("true".into()))
        );
        assert_eq!(PortValue::Int(0).convert_to(&PortType::Bool), Some(PortValue::Bool(false)));
        assert_eq!(PortValue::Int(7).convert_to(&PortType::Float), Some(PortValue::Float(7.0)));
        assert_eq!(PortValue::Float(-2.9).convert_to(&PortType::Int), Some(PortValue::Int(-2)));
        assert_eq!(PortValue::Float(0.5).convert_to(&PortType::Bool), Some(PortValue::Bool(true)));
        assert_eq!(PortValue::from("42").convert_to(&PortType::Int), Some(PortValue::Int(42)));
        assert_eq!(PortValue::from(" 1.5 ").convert_to(&PortType::Float), Some(PortValue::Float(1.5)));
        assert_eq!(PortValue::from("Yes").convert_to(&PortType::Bool), Some(PortValue::Bool(true)));
        assert_eq!(PortValue::from("nope").convert_to(&PortType::Int), None);
    }

    #[test]
    fn test_non_scalars_never_convert() {
        let v = PortValue::Vector4([1.0, 0.0, 0.0, 1.0]);
        assert_eq!(v.convert_to(&PortType::Color), None);
        assert_eq!(v.convert_to(&PortType::Float), None);
        assert_eq!(v.convert_to(&PortType::Virtual), Some(v.clone()));

        let image = PortValue::Image(SharedValue::new(3_u32));
        assert_eq!(image.convert_to(&PortType::Geometry), None);
    }

    #[test]
    fn test_type_compatibility() {
        assert!(PortType::Bool.can_connect_to(&PortType::String));
        assert!(PortType::Virtual.can_connect_to(&PortType::Float));
        assert!(PortType::Image.can_connect_to(&PortType::Image));
        assert!(!PortType::Image.can_connect_to(&PortType::Virtual));
        assert!(!PortType::Vector3.can_connect_to(&PortType::Vector4));
        assert!(!PortType::Array(Box::new(PortType::Float)).can_connect_to(&PortType::Float));
    }

    #[test]
    fn test_shared_value_identity() {
        let a = SharedValue::new(String::from("mesh"));
        let b = a.clone();
        let c = SharedValue::new(String::from("mesh"));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.downcast_ref::<String>().map(String::as_str), Some("mesh"));
    }

    #[test]
    fn test_persistable_values() {
        assert!(PortValue::Float(1.0).is_persistable());
        assert!(!PortValue::Material(SharedValue::new(0_u8)).is_persistable());
        let array = PortValue::Array {
            element: PortType::Image,
            values: vec![PortValue::Image(SharedValue::new(0_u8))],
        };
        assert!(!array.is_persistable());
    }
}
