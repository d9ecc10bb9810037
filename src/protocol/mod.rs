//! Wire protocol: packet framing and sequence observation

pub mod sequence;
pub mod wire;

pub use sequence::{SequenceEvent, SequenceTracker};
pub use wire::{
    decode, encode, AudioFrame, BodyJointFrame, HandJointFrame, JointFrame, Packet, PoseFrame,
    WireFrame,
};
