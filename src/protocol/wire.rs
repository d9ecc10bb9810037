//! Fixed-layout binary wire codec
//!
//! Every packet is a single UDP datagram:
//!
//! ```text
//! ┌────────────┬────────────┬──────────────────────────────┐
//! │ magic: u32 │ seq: u32   │ payload (stream specific)    │
//! └────────────┴────────────┴──────────────────────────────┘
//! ```
//!
//! | Stream              | Magic  | Payload                          | Size            |
//! |---------------------|--------|----------------------------------|-----------------|
//! | Joint frame (hands) | `DEX3` | 14 × f32 angles                  | 64 B            |
//! | Joint frame (body)  | `JOIN` | 29 × f32 angles                  | 124 B           |
//! | Pose frame          | `ODOM` | 3 × f32 position, 4 × f32 w,x,y,z | 36 B           |
//! | Audio frame         | `AUD0` | u16 len, u16 reserved, len × i16 | 12 + 2 × len B  |
//!
//! All fields are little-endian. The magic constants are the big-endian
//! reading of their ASCII tag, so `JOIN` is `0x4A4F494E`.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::constants::MAX_FRAME_SAMPLES;
use crate::error::WireError;

/// `[magic:u32][sequence:u32]`
pub const HEADER_LEN: usize = 8;

/// Audio frames carry `[frame_len:u16][reserved:u16]` ahead of the samples.
pub const AUDIO_PREFIX_LEN: usize = HEADER_LEN + 4;

pub const DEX3_MAGIC: u32 = u32::from_be_bytes(*b"DEX3");
pub const JOIN_MAGIC: u32 = u32::from_be_bytes(*b"JOIN");
pub const ODOM_MAGIC: u32 = u32::from_be_bytes(*b"ODOM");
pub const AUD0_MAGIC: u32 = u32::from_be_bytes(*b"AUD0");

pub const HAND_JOINT_COUNT: usize = 14;
pub const BODY_JOINT_COUNT: usize = 29;

/// A payload type with a fixed on-wire layout.
pub trait WireFrame: Sized {
    /// Stream identifier expected in the first four bytes.
    const MAGIC: u32;

    /// Exact packet length this stream accepts, given the raw datagram.
    ///
    /// Fixed-size streams ignore the argument.
    fn expected_len(packet: &[u8]) -> Result<usize, WireError>;

    /// Length of the packet `write_payload` produces, header included.
    fn encoded_len(&self) -> usize;

    /// Read the payload. The buffer is exactly the payload region.
    fn read_payload(payload: &mut &[u8]) -> Self;

    fn write_payload(&self, buf: &mut BytesMut);
}

/// A decoded packet: producer sequence number plus stream payload.
#[derive(Debug, Clone, PartialEq)]
pub struct Packet<P> {
    pub sequence: u32,
    pub payload: P,
}

impl<P> Packet<P> {
    pub fn new(sequence: u32, payload: P) -> Self {
        Self { sequence, payload }
    }
}

/// Validate and decode a datagram atomically.
///
/// The length is checked before the magic, and both before any payload
/// byte is read.
pub fn decode<F: WireFrame>(bytes: &[u8]) -> Result<Packet<F>, WireError> {
    let expected = F::expected_len(bytes)?;
    if bytes.len() != expected {
        return Err(WireError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }

    let mut buf = bytes;
    let magic = buf.get_u32_le();
    if magic != F::MAGIC {
        return Err(WireError::BadMagic {
            expected: F::MAGIC,
            actual: magic,
        });
    }
    let sequence = buf.get_u32_le();
    let payload = F::read_payload(&mut buf);

    Ok(Packet { sequence, payload })
}

/// Encode a packet. The output is always exactly `encoded_len` bytes.
pub fn encode<F: WireFrame>(packet: &Packet<F>) -> Bytes {
    let mut buf = BytesMut::with_capacity(packet.payload.encoded_len());
    buf.put_u32_le(F::MAGIC);
    buf.put_u32_le(packet.sequence);
    packet.payload.write_payload(&mut buf);
    debug_assert_eq!(buf.len(), packet.payload.encoded_len());
    buf.freeze()
}

/// Flat array of joint angles in radians, index order fixed per stream.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct JointFrame<const N: usize, const MAGIC: u32> {
    pub angles: [f32; N],
}

/// Dual-hand stream (`DEX3`), 64 bytes on the wire.
pub type HandJointFrame = JointFrame<HAND_JOINT_COUNT, DEX3_MAGIC>;

/// Full-body stream (`JOIN`), 124 bytes on the wire.
pub type BodyJointFrame = JointFrame<BODY_JOINT_COUNT, JOIN_MAGIC>;

impl<const N: usize, const MAGIC: u32> JointFrame<N, MAGIC> {
    pub const PACKET_LEN: usize = HEADER_LEN + N * 4;

    pub fn new(angles: [f32; N]) -> Self {
        Self { angles }
    }
}

impl<const N: usize, const MAGIC: u32> Default for JointFrame<N, MAGIC> {
    fn default() -> Self {
        Self { angles: [0.0; N] }
    }
}

impl<const N: usize, const MAGIC: u32> WireFrame for JointFrame<N, MAGIC> {
    const MAGIC: u32 = MAGIC;

    fn expected_len(_packet: &[u8]) -> Result<usize, WireError> {
        Ok(Self::PACKET_LEN)
    }

    fn encoded_len(&self) -> usize {
        Self::PACKET_LEN
    }

    fn read_payload(payload: &mut &[u8]) -> Self {
        let mut angles = [0.0f32; N];
        for angle in angles.iter_mut() {
            *angle = payload.get_f32_le();
        }
        Self { angles }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        for angle in &self.angles {
            buf.put_f32_le(*angle);
        }
    }
}

/// Body pose in the source (robotics) frame.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoseFrame {
    /// Meters, forward-left-up.
    pub position: [f32; 3],
    /// Scalar-first quaternion `[w, x, y, z]`.
    pub orientation: [f32; 4],
}

impl PoseFrame {
    pub const PACKET_LEN: usize = HEADER_LEN + 7 * 4;
}

impl Default for PoseFrame {
    fn default() -> Self {
        Self {
            position: [0.0; 3],
            orientation: [1.0, 0.0, 0.0, 0.0],
        }
    }
}

impl WireFrame for PoseFrame {
    const MAGIC: u32 = ODOM_MAGIC;

    fn expected_len(_packet: &[u8]) -> Result<usize, WireError> {
        Ok(Self::PACKET_LEN)
    }

    fn encoded_len(&self) -> usize {
        Self::PACKET_LEN
    }

    fn read_payload(payload: &mut &[u8]) -> Self {
        let mut position = [0.0f32; 3];
        for v in position.iter_mut() {
            *v = payload.get_f32_le();
        }
        let mut orientation = [0.0f32; 4];
        for v in orientation.iter_mut() {
            *v = payload.get_f32_le();
        }
        Self {
            position,
            orientation,
        }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        for v in self.position.iter().chain(self.orientation.iter()) {
            buf.put_f32_le(*v);
        }
    }
}

/// Mono 16-bit PCM frame.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct AudioFrame {
    samples: Vec<i16>,
}

impl AudioFrame {
    /// Wrap samples into a frame, rejecting lengths the header cannot carry.
    pub fn new(samples: Vec<i16>) -> Result<Self, WireError> {
        if samples.len() > MAX_FRAME_SAMPLES {
            return Err(WireError::FrameTooLong(samples.len()));
        }
        Ok(Self { samples })
    }

    pub fn samples(&self) -> &[i16] {
        &self.samples
    }

    pub fn into_samples(self) -> Vec<i16> {
        self.samples
    }

    pub fn packet_len(frame_len: usize) -> usize {
        AUDIO_PREFIX_LEN + frame_len * 2
    }
}

impl WireFrame for AudioFrame {
    const MAGIC: u32 = AUD0_MAGIC;

    fn expected_len(packet: &[u8]) -> Result<usize, WireError> {
        if packet.len() < AUDIO_PREFIX_LEN {
            return Ok(AUDIO_PREFIX_LEN);
        }
        let frame_len = u16::from_le_bytes([packet[HEADER_LEN], packet[HEADER_LEN + 1]]) as usize;
        if frame_len > MAX_FRAME_SAMPLES {
            return Err(WireError::FrameTooLong(frame_len));
        }
        Ok(Self::packet_len(frame_len))
    }

    fn encoded_len(&self) -> usize {
        Self::packet_len(self.samples.len())
    }

    fn read_payload(payload: &mut &[u8]) -> Self {
        let frame_len = payload.get_u16_le() as usize;
        let _reserved = payload.get_u16_le();
        let mut samples = Vec::with_capacity(frame_len);
        for _ in 0..frame_len {
            samples.push(payload.get_i16_le());
        }
        Self { samples }
    }

    fn write_payload(&self, buf: &mut BytesMut) {
        buf.put_u16_le(self.samples.len() as u16);
        buf.put_u16_le(0);
        for sample in &self.samples {
            buf.put_i16_le(*sample);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_packet_sizes() {
        assert_eq!(HandJointFrame::PACKET_LEN, 64);
        assert_eq!(BodyJointFrame::PACKET_LEN, 124);
        assert_eq!(PoseFrame::PACKET_LEN, 36);
        assert_eq!(AudioFrame::packet_len(320), 652);
        assert_eq!(JOIN_MAGIC, 0x4A4F_494E);
    }

    #[test]
    fn test_receive_buffer_holds_every_packet() {
        use crate::constants::MAX_DATAGRAM;

        assert_eq!(AudioFrame::packet_len(MAX_FRAME_SAMPLES), 2060);
        assert!(AudioFrame::packet_len(MAX_FRAME_SAMPLES) <= MAX_DATAGRAM);
        assert!(BodyJointFrame::PACKET_LEN <= MAX_DATAGRAM);
    }

    #[test]
    fn test_body_frame_layout() {
        let mut angles = [0.0f32; BODY_JOINT_COUNT];
        angles[3] = 1.5708;
        let bytes = encode(&Packet::new(1, BodyJointFrame::new(angles)));

        assert_eq!(bytes.len(), 124);
        assert_eq!(&bytes[0..4], &0x4A4F_494Eu32.to_le_bytes());
        assert_eq!(&bytes[4..8], &1u32.to_le_bytes());
        assert_eq!(&bytes[8 + 3 * 4..8 + 4 * 4], &1.5708f32.to_le_bytes());
    }

    #[test]
    fn test_pose_roundtrip() {
        let pose = PoseFrame {
            position: [1.0, -2.5, 0.75],
            orientation: [0.7071, 0.0, 0.0, 0.7071],
        };
        let bytes = encode(&Packet::new(42, pose));
        let decoded = decode::<PoseFrame>(&bytes).unwrap();
        assert_eq!(decoded.sequence, 42);
        assert_eq!(decoded.payload, pose);
    }

    #[test]
    fn test_audio_roundtrip() {
        let frame = AudioFrame::new(vec![0, 1, -1, i16::MAX, i16::MIN]).unwrap();
        let bytes = encode(&Packet::new(u32::MAX, frame.clone()));
        assert_eq!(bytes.len(), 12 + 10);
        assert_eq!(&bytes[10..12], &[0, 0]);

        let decoded = decode::<AudioFrame>(&bytes).unwrap();
        assert_eq!(decoded.sequence, u32::MAX);
        assert_eq!(decoded.payload, frame);
    }

    #[test]
    fn test_audio_declared_length_mismatch() {
        let frame = AudioFrame::new(vec![7; 8]).unwrap();
        let mut bytes = encode(&Packet::new(0, frame)).to_vec();
        bytes.pop();
        assert_eq!(
            decode::<AudioFrame>(&bytes),
            Err(WireError::WrongLength {
                expected: 28,
                actual: 27
            })
        );
    }

    #[test]
    fn test_audio_frame_too_long() {
        assert!(AudioFrame::new(vec![0; MAX_FRAME_SAMPLES + 1]).is_err());

        let mut bytes = vec![0u8; AUDIO_PREFIX_LEN];
        bytes[0..4].copy_from_slice(&AUD0_MAGIC.to_le_bytes());
        bytes[8..10].copy_from_slice(&u16::MAX.to_le_bytes());
        assert!(matches!(
            decode::<AudioFrame>(&bytes),
            Err(WireError::FrameTooLong(_))
        ));
    }

    #[test]
    fn test_stream_magic_mismatch() {
        // A hand frame is a valid datagram, just not for the body stream.
        let hand = encode(&Packet::new(3, HandJointFrame::default()));
        assert!(matches!(
            decode::<BodyJointFrame>(&hand),
            Err(WireError::WrongLength { .. })
        ));

        let mut body = encode(&Packet::new(3, BodyJointFrame::default())).to_vec();
        body[0..4].copy_from_slice(&DEX3_MAGIC.to_le_bytes());
        assert_eq!(
            decode::<BodyJointFrame>(&body),
            Err(WireError::BadMagic {
                expected: JOIN_MAGIC,
                actual: DEX3_MAGIC
            })
        );
    }

    proptest! {
        #[test]
        fn prop_wrong_length_rejected(bytes in prop::collection::vec(any::<u8>(), 0..256)) {
            prop_assume!(bytes.len() != HandJointFrame::PACKET_LEN);
            prop_assert!(decode::<HandJointFrame>(&bytes).is_err());
        }

        #[test]
        fn prop_wrong_magic_rejected(mut bytes in prop::collection::vec(any::<u8>(), PoseFrame::PACKET_LEN), magic in any::<u32>()) {
            prop_assume!(magic != ODOM_MAGIC);
            bytes[0..4].copy_from_slice(&magic.to_le_bytes());
            prop_assert!(decode::<PoseFrame>(&bytes).is_err());
        }

        #[test]
        fn prop_hand_frame_roundtrip(seq in any::<u32>(), angles in prop::array::uniform14(any::<f32>())) {
            let bytes = encode(&Packet::new(seq, HandJointFrame::new(angles)));
            prop_assert_eq!(bytes.len(), HandJointFrame::PACKET_LEN);

            let decoded = decode::<HandJointFrame>(&bytes).unwrap();
            prop_assert_eq!(decoded.sequence, seq);
            for (a, b) in decoded.payload.angles.iter().zip(angles.iter()) {
                prop_assert_eq!(a.to_bits(), b.to_bits());
            }
        }

        #[test]
        fn prop_valid_bytes_reencode_identically(seq in any::<u32>(), samples in prop::collection::vec(any::<i16>(), 0..64)) {
            let bytes = encode(&Packet::new(seq, AudioFrame::new(samples).unwrap()));
            let decoded = decode::<AudioFrame>(&bytes).unwrap();
            prop_assert_eq!(encode(&decoded), bytes);
        }
    }
}
