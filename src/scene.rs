//! Interface to the render-side scene graph
//!
//! The scene graph itself lives outside this crate. The bridge only needs
//! to read and write local transforms of nodes it was bound to at startup.

use std::collections::HashMap;

use crate::motion::math::{Quat, Vec3};

/// Opaque handle to a scene node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct NodeId(pub u32);

/// Operations the bridge performs on scene nodes.
///
/// Called only from the consumer tick, on the thread that owns the scene.
pub trait SceneGraph {
    fn local_rotation(&self, node: NodeId) -> Option<Quat>;
    fn set_local_rotation(&mut self, node: NodeId, rotation: Quat);
    fn local_position(&self, node: NodeId) -> Option<Vec3>;
    fn set_local_position(&mut self, node: NodeId, position: Vec3);

    /// Resolve a node by name.
    fn find_node(&self, name: &str) -> Option<NodeId>;
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Transform {
    pub position: Vec3,
    pub rotation: Quat,
}

/// Flat in-memory transform store keyed by node name.
#[derive(Debug, Default)]
pub struct TransformTree {
    index: HashMap<String, NodeId>,
    names: Vec<String>,
    transforms: Vec<Transform>,
}

impl TransformTree {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a node at the neutral pose, or return the existing one.
    pub fn add_node(&mut self, name: &str) -> NodeId {
        if let Some(id) = self.index.get(name) {
            return *id;
        }
        let id = NodeId(self.transforms.len() as u32);
        self.index.insert(name.to_string(), id);
        self.names.push(name.to_string());
        self.transforms.push(Transform::default());
        id
    }

    pub fn transform(&self, node: NodeId) -> Option<&Transform> {
        self.transforms.get(node.0 as usize)
    }

    pub fn name(&self, node: NodeId) -> Option<&str> {
        self.names.get(node.0 as usize).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.transforms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transforms.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Transform)> {
        self.names.iter().map(String::as_str).zip(self.transforms.iter())
    }
}

impl SceneGraph for TransformTree {
    fn local_rotation(&self, node: NodeId) -> Option<Quat> {
        self.transform(node).map(|t| t.rotation)
    }

    fn set_local_rotation(&mut self, node: NodeId, rotation: Quat) {
        if let Some(t) = self.transforms.get_mut(node.0 as usize) {
            t.rotation = rotation;
        }
    }

    fn local_position(&self, node: NodeId) -> Option<Vec3> {
        self.transform(node).map(|t| t.position)
    }

    fn set_local_position(&mut self, node: NodeId, position: Vec3) {
        if let Some(t) = self.transforms.get_mut(node.0 as usize) {
            t.position = position;
        }
    }

    fn find_node(&self, name: &str) -> Option<NodeId> {
        self.index.get(name).copied()
    }
}
