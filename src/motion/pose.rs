//! Source (robotics) to render frame conversion
//!
//! The robot reports poses forward-left-up (X forward, Y left, Z up). The
//! render side is right-up-forward (X right, Y up, Z forward):
//!
//! ```text
//! render.x = -source.y
//! render.y =  source.z
//! render.z =  source.x
//! ```

use crate::motion::math::{Quat, Vec3};
use crate::protocol::wire::PoseFrame;

const SOURCE_FORWARD: Vec3 = Vec3::X;
const SOURCE_UP: Vec3 = Vec3::Z;

/// Permute a source-frame vector into the render frame.
pub fn source_to_render(v: Vec3) -> Vec3 {
    Vec3::new(-v.y, v.z, v.x)
}

/// Converts pose samples into render-frame position and orientation.
#[derive(Debug, Clone, Copy)]
pub struct PoseConverter {
    /// Uniform scale applied after the axis permutation.
    pub scale: f32,
    /// Added after scaling, in render coordinates.
    pub offset: Vec3,
}

impl Default for PoseConverter {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: Vec3::ZERO,
        }
    }
}

impl PoseConverter {
    pub fn new(scale: f32, offset: Vec3) -> Self {
        Self { scale, offset }
    }

    /// Convert one pose. Degenerate orientations come back as identity.
    pub fn to_render_frame(&self, position: Vec3, orientation: Quat) -> (Vec3, Quat) {
        let render_position = source_to_render(position) * self.scale + self.offset;

        let forward = source_to_render(orientation.rotate(SOURCE_FORWARD));
        let up = source_to_render(orientation.rotate(SOURCE_UP));
        let render_orientation = Quat::look_rotation(forward, up).unwrap_or(Quat::IDENTITY);

        (render_position, render_orientation)
    }

    pub fn convert_frame(&self, frame: &PoseFrame) -> (Vec3, Quat) {
        self.to_render_frame(
            Vec3::from_array(frame.position),
            Quat::from_wxyz(frame.orientation),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f32::consts::FRAC_PI_2;

    #[test]
    fn test_identity_pose() {
        let converter = PoseConverter::default();
        let (pos, rot) = converter.to_render_frame(Vec3::ZERO, Quat::IDENTITY);
        assert_eq!(pos, Vec3::ZERO);
        assert!(rot.angle_to(Quat::IDENTITY) < 1e-5);
    }

    #[test]
    fn test_position_mapping() {
        let converter = PoseConverter::new(2.0, Vec3::new(0.0, 1.0, 0.0));
        // 1 m forward, 2 m left, 3 m up.
        let (pos, _) = converter.to_render_frame(Vec3::new(1.0, 2.0, 3.0), Quat::IDENTITY);
        assert!(pos.distance(Vec3::new(-4.0, 7.0, 2.0)) < 1e-6);
    }

    #[test]
    fn test_yaw_left_faces_render_left() {
        let converter = PoseConverter::default();
        let yaw = Quat::from_axis_angle(Vec3::Z, FRAC_PI_2);
        let (_, rot) = converter.to_render_frame(Vec3::ZERO, yaw);

        // Turning left about source up looks down render -X, about render Y.
        assert!(rot.rotate(Vec3::Z).distance(Vec3::new(-1.0, 0.0, 0.0)) < 1e-5);
        assert!(rot.rotate(Vec3::Y).distance(Vec3::Y) < 1e-5);
        let expected = Quat::from_axis_angle(Vec3::Y, -FRAC_PI_2);
        assert!(rot.angle_to(expected) < 1e-4);
    }

    #[test]
    fn test_degenerate_orientation_is_identity() {
        let converter = PoseConverter::default();
        let (_, rot) = converter.to_render_frame(Vec3::ZERO, Quat::new(0.0, 0.0, 0.0, 0.0));
        assert_eq!(rot, Quat::IDENTITY);

        let (_, rot) = converter.to_render_frame(Vec3::ZERO, Quat::new(0.0, 1e-4, 0.0, 0.0));
        assert_eq!(rot, Quat::IDENTITY);

        let (_, rot) = converter.to_render_frame(Vec3::ZERO, Quat::new(f32::NAN, 0.0, 0.0, 0.0));
        assert_eq!(rot, Quat::IDENTITY);
    }

    #[test]
    fn test_convert_frame_reads_wxyz() {
        let converter = PoseConverter::default();
        let frame = PoseFrame {
            position: [0.0, 0.0, 1.0],
            orientation: [1.0, 0.0, 0.0, 0.0],
        };
        let (pos, rot) = converter.convert_frame(&frame);
        assert!(pos.distance(Vec3::Y) < 1e-6);
        assert!(rot.angle_to(Quat::IDENTITY) < 1e-5);
    }
}
