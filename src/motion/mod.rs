//! Motion mapping: pose conversion and joint actuation

pub mod joints;
pub mod math;
pub mod pose;

pub use joints::{JointBinding, JointMapper, JointTable};
pub use math::{Quat, Vec3};
pub use pose::{source_to_render, PoseConverter};
