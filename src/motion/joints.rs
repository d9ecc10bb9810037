//! Joint actuator mapping
//!
//! A joint table is an ordered list of bindings; position `i` in the table
//! corresponds to angle `i` of the incoming frame. The order is a contract
//! with the sender.

use crate::config::JointOverride;
use crate::error::{Error, Result};
use crate::motion::math::{Quat, Vec3};
use crate::motion::pose::source_to_render;
use crate::scene::{NodeId, SceneGraph};

/// Rotation axis of a joint, named in the robot's own frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SourceAxis {
    /// About source X (forward).
    Roll,
    /// About source Y (left).
    Pitch,
    /// About source Z (up).
    Yaw,
}

impl SourceAxis {
    fn render_axis(self) -> Vec3 {
        let source = match self {
            SourceAxis::Roll => Vec3::X,
            SourceAxis::Pitch => Vec3::Y,
            SourceAxis::Yaw => Vec3::Z,
        };
        source_to_render(source)
    }
}

use SourceAxis::{Pitch, Roll, Yaw};

/// Unitree G1 29-DoF body order.
const G1_BODY: [(&str, SourceAxis); 29] = [
    ("left_hip_pitch", Pitch),
    ("left_hip_roll", Roll),
    ("left_hip_yaw", Yaw),
    ("left_knee", Pitch),
    ("left_ankle_pitch", Pitch),
    ("left_ankle_roll", Roll),
    ("right_hip_pitch", Pitch),
    ("right_hip_roll", Roll),
    ("right_hip_yaw", Yaw),
    ("right_knee", Pitch),
    ("right_ankle_pitch", Pitch),
    ("right_ankle_roll", Roll),
    ("waist_yaw", Yaw),
    ("waist_roll", Roll),
    ("waist_pitch", Pitch),
    ("left_shoulder_pitch", Pitch),
    ("left_shoulder_roll", Roll),
    ("left_shoulder_yaw", Yaw),
    ("left_elbow", Pitch),
    ("left_wrist_roll", Roll),
    ("left_wrist_pitch", Pitch),
    ("left_wrist_yaw", Yaw),
    ("right_shoulder_pitch", Pitch),
    ("right_shoulder_roll", Roll),
    ("right_shoulder_yaw", Yaw),
    ("right_elbow", Pitch),
    ("right_wrist_roll", Roll),
    ("right_wrist_pitch", Pitch),
    ("right_wrist_yaw", Yaw),
];

/// Dex3 hands: left hand 0..7, right hand 7..14.
const DEX3_HANDS: [(&str, SourceAxis, f32); 14] = [
    ("left_hand_thumb_0", Yaw, 1.0),
    ("left_hand_thumb_1", Pitch, 1.0),
    ("left_hand_thumb_2", Pitch, 1.0),
    ("left_hand_middle_0", Pitch, 1.0),
    ("left_hand_middle_1", Pitch, 1.0),
    ("left_hand_index_0", Pitch, 1.0),
    ("left_hand_index_1", Pitch, 1.0),
    ("right_hand_thumb_0", Yaw, -1.0),
    ("right_hand_thumb_1", Pitch, -1.0),
    ("right_hand_thumb_2", Pitch, -1.0),
    ("right_hand_middle_0", Pitch, -1.0),
    ("right_hand_middle_1", Pitch, -1.0),
    ("right_hand_index_0", Pitch, -1.0),
    ("right_hand_index_1", Pitch, -1.0),
];

/// One table row.
#[derive(Debug, Clone, PartialEq)]
pub struct JointBinding {
    pub name: String,
    /// Scene node this joint drives; defaults to the joint name.
    pub node: String,
    /// Unit rotation axis in the render frame.
    pub axis: Vec3,
    pub sign: f32,
    /// Resolved handle, `None` while unbound.
    pub target: Option<NodeId>,
}

impl JointBinding {
    pub fn new(name: &str, axis: Vec3, sign: f32) -> Result<Self> {
        let axis = axis
            .try_normalize()
            .ok_or_else(|| Error::Config(format!("joint {} has a zero-length axis", name)))?;
        Ok(Self {
            name: name.to_string(),
            node: name.to_string(),
            axis,
            sign,
            target: None,
        })
    }

    /// Local rotation for `angle` radians.
    pub fn rotation_for(&self, angle: f32) -> Quat {
        Quat::from_axis_angle(self.axis, angle * self.sign)
    }
}

/// Ordered index → joint table.
#[derive(Debug, Clone, Default)]
pub struct JointTable {
    bindings: Vec<JointBinding>,
}

impl JointTable {
    pub fn new(bindings: Vec<JointBinding>) -> Self {
        Self { bindings }
    }

    /// The 29-joint full-body table.
    pub fn g1_body() -> Self {
        Self::new(
            G1_BODY
                .iter()
                .map(|(name, axis)| builtin(name, *axis, 1.0))
                .collect(),
        )
    }

    /// The 14-joint dual-hand table.
    pub fn dex3_hands() -> Self {
        Self::new(
            DEX3_HANDS
                .iter()
                .map(|(name, axis, sign)| builtin(name, *axis, *sign))
                .collect(),
        )
    }

    /// Apply per-joint overrides from configuration. Unknown names are errors.
    pub fn apply_overrides(&mut self, overrides: &[JointOverride]) -> Result<()> {
        for o in overrides {
            let binding = self
                .bindings
                .iter_mut()
                .find(|b| b.name == o.name)
                .ok_or_else(|| Error::Config(format!("unknown joint: {}", o.name)))?;

            if let Some(node) = &o.node {
                binding.node = node.clone();
            }
            if let Some(axis) = o.axis {
                binding.axis = Vec3::from_array(axis).try_normalize().ok_or_else(|| {
                    Error::Config(format!("joint {} has a zero-length axis", o.name))
                })?;
            }
            if let Some(sign) = o.sign {
                binding.sign = sign;
            }
        }
        Ok(())
    }

    /// Resolve every binding's node against the scene. Returns how many bound.
    pub fn bind<S: SceneGraph>(&mut self, scene: &S) -> usize {
        let mut bound = 0;
        for binding in &mut self.bindings {
            binding.target = scene.find_node(&binding.node);
            match binding.target {
                Some(_) => bound += 1,
                None => tracing::debug!("Joint {} has no scene node {}", binding.name, binding.node),
            }
        }
        bound
    }

    pub fn get(&self, index: usize) -> Option<&JointBinding> {
        self.bindings.get(index)
    }

    pub fn index_of(&self, name: &str) -> Option<usize> {
        self.bindings.iter().position(|b| b.name == name)
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &JointBinding> {
        self.bindings.iter()
    }
}

fn builtin(name: &str, axis: SourceAxis, sign: f32) -> JointBinding {
    JointBinding {
        name: name.to_string(),
        node: name.to_string(),
        axis: axis.render_axis(),
        sign,
        target: None,
    }
}

/// Applies decoded angle arrays to scene nodes.
#[derive(Debug, Clone)]
pub struct JointMapper {
    table: JointTable,
    /// 0 snaps; values towards 1 converge slowly.
    smoothing: f32,
}

impl JointMapper {
    pub fn new(table: JointTable, smoothing: f32) -> Self {
        Self {
            table,
            smoothing: smoothing.clamp(0.0, 0.999),
        }
    }

    /// Drive each bound joint towards its angle. Returns joints written.
    ///
    /// Unbound joints, missing scene nodes and non-finite angles are skipped.
    pub fn apply<S: SceneGraph>(&self, angles: &[f32], scene: &mut S) -> usize {
        let mut applied = 0;
        for (binding, &angle) in self.table.bindings.iter().zip(angles) {
            let Some(node) = binding.target else {
                continue;
            };
            if !angle.is_finite() {
                continue;
            }

            let target = binding.rotation_for(angle);
            let rotation = if self.smoothing > 0.0 {
                match scene.local_rotation(node) {
                    Some(current) => current.slerp(target, 1.0 - self.smoothing),
                    None => continue,
                }
            } else {
                target
            };

            scene.set_local_rotation(node, rotation);
            applied += 1;
        }
        applied
    }

    pub fn table(&self) -> &JointTable {
        &self.table
    }

    pub fn table_mut(&mut self) -> &mut JointTable {
        &mut self.table
    }

    pub fn smoothing(&self) -> f32 {
        self.smoothing
    }
}
