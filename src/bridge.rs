//! Consumer side: the periodic tick
//!
//! Once per display frame the host calls [`Bridge::tick`]. It takes whatever
//! is new in each mailbox, applies it to the scene and flushes complete audio
//! frames to the uplink. A tick never waits on the network.

use std::net::SocketAddr;

use crate::audio::buffer::RingConsumer;
use crate::audio::packetizer::FramePacketizer;
use crate::config::{AppConfig, NetworkConfig};
use crate::constants::RING_CAPACITY;
use crate::error::Result;
use crate::motion::joints::{JointMapper, JointTable};
use crate::motion::pose::PoseConverter;
use crate::network::ingest::{StreamReceiver, StreamState, StreamStats};
use crate::network::sender::{PacketSender, SenderStats};
use crate::network::udp::SocketOptions;
use crate::protocol::wire::{BodyJointFrame, HandJointFrame, Packet, PoseFrame};
use crate::scene::{NodeId, SceneGraph};
use crate::sync::mailbox::{create_shared_mailbox, SharedMailbox};

/// Microphone ring drained into UDP packets.
pub struct AudioUplink {
    packetizer: FramePacketizer<RING_CAPACITY>,
    sender: PacketSender,
}

#[derive(Debug, Clone, Default)]
pub struct UplinkStats {
    pub frames_emitted: u64,
    pub next_sequence: u32,
    pub pending_samples: usize,
    pub ring_overflows: u64,
    pub sender: SenderStats,
}

impl AudioUplink {
    pub fn new(
        consumer: RingConsumer<RING_CAPACITY>,
        frame_samples: usize,
        sender: PacketSender,
    ) -> Result<Self> {
        Ok(Self {
            packetizer: FramePacketizer::new(consumer, frame_samples)?,
            sender,
        })
    }

    /// Send every complete frame. Send failures drop the frame.
    pub fn pump(&mut self) -> usize {
        let sender = &self.sender;
        self.packetizer.drain(|packet| {
            if let Err(e) = sender.send(&packet) {
                tracing::debug!("Audio uplink send failed: {}", e);
            }
        })
    }

    pub fn stats(&self) -> UplinkStats {
        UplinkStats {
            frames_emitted: self.packetizer.frames_emitted(),
            next_sequence: self.packetizer.next_sequence(),
            pending_samples: self.packetizer.pending(),
            ring_overflows: self.packetizer.overflow_count(),
            sender: self.sender.stats(),
        }
    }
}

/// What one tick applied.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    /// Joints written from a new body frame, if one arrived.
    pub body_joints: Option<usize>,
    pub hand_joints: Option<usize>,
    pub pose_applied: bool,
    pub audio_frames: usize,
}

/// Mailboxes, mappers and the optional audio uplink.
pub struct Bridge {
    body: SharedMailbox<Packet<BodyJointFrame>>,
    hands: SharedMailbox<Packet<HandJointFrame>>,
    pose: SharedMailbox<Packet<PoseFrame>>,
    body_mapper: JointMapper,
    hand_mapper: JointMapper,
    pose_converter: PoseConverter,
    root: Option<NodeId>,
    uplink: Option<AudioUplink>,
    ticks: u64,
}

impl Bridge {
    /// Build joint tables from `config` and bind them against `scene`.
    pub fn from_config<S: SceneGraph>(config: &AppConfig, scene: &S) -> Result<Self> {
        config.validate()?;

        let mut body = JointTable::g1_body();
        body.apply_overrides(&config.joints.body)?;
        let body_bound = body.bind(scene);

        let mut hands = JointTable::dex3_hands();
        hands.apply_overrides(&config.joints.hands)?;
        let hands_bound = hands.bind(scene);

        let root = scene.find_node(&config.pose.root_node);
        if root.is_none() {
            tracing::warn!("Pose root node {} not found, pose frames will be ignored", config.pose.root_node);
        }

        tracing::info!(
            "Bound {}/{} body joints, {}/{} hand joints",
            body_bound,
            body.len(),
            hands_bound,
            hands.len()
        );

        Ok(Self {
            body: create_shared_mailbox(),
            hands: create_shared_mailbox(),
            pose: create_shared_mailbox(),
            body_mapper: JointMapper::new(body, config.joints.smoothing),
            hand_mapper: JointMapper::new(hands, config.joints.smoothing),
            pose_converter: PoseConverter::new(config.pose.scale, config.pose.offset()),
            root,
            uplink: None,
            ticks: 0,
        })
    }

    pub fn set_uplink(&mut self, uplink: AudioUplink) {
        self.uplink = Some(uplink);
    }

    pub fn body_mailbox(&self) -> SharedMailbox<Packet<BodyJointFrame>> {
        self.body.clone()
    }

    pub fn hand_mailbox(&self) -> SharedMailbox<Packet<HandJointFrame>> {
        self.hands.clone()
    }

    pub fn pose_mailbox(&self) -> SharedMailbox<Packet<PoseFrame>> {
        self.pose.clone()
    }

    /// Apply everything new since the last tick.
    pub fn tick<S: SceneGraph>(&mut self, scene: &mut S) -> TickReport {
        self.ticks += 1;
        let mut report = TickReport::default();

        if let Some(packet) = self.pose.take_if_new() {
            if let Some(root) = self.root {
                let (position, rotation) = self.pose_converter.convert_frame(&packet.payload);
                scene.set_local_position(root, position);
                scene.set_local_rotation(root, rotation);
                report.pose_applied = true;
            }
        }

        if let Some(packet) = self.body.take_if_new() {
            report.body_joints = Some(self.body_mapper.apply(&packet.payload.angles, scene));
        }

        if let Some(packet) = self.hands.take_if_new() {
            report.hand_joints = Some(self.hand_mapper.apply(&packet.payload.angles, scene));
        }

        if let Some(uplink) = self.uplink.as_mut() {
            report.audio_frames = uplink.pump();
        }

        report
    }

    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn uplink_stats(&self) -> Option<UplinkStats> {
        self.uplink.as_ref().map(AudioUplink::stats)
    }

    pub fn body_mapper(&self) -> &JointMapper {
        &self.body_mapper
    }

    pub fn hand_mapper(&self) -> &JointMapper {
        &self.hand_mapper
    }
}

/// The three inbound telemetry streams.
pub struct TelemetryStreams {
    body: StreamReceiver<BodyJointFrame>,
    hands: StreamReceiver<HandJointFrame>,
    pose: StreamReceiver<PoseFrame>,
}

impl TelemetryStreams {
    /// Bind and start all streams, publishing into `bridge`'s mailboxes.
    pub fn start(config: &NetworkConfig, bridge: &Bridge) -> Result<Self> {
        let options = SocketOptions {
            read_timeout: Some(config.recv_timeout()),
            recv_buffer_size: config.recv_buffer_size,
            ..SocketOptions::default()
        };

        let mut body = StreamReceiver::bind("body", config.body_addr(), &options, bridge.body_mailbox())?;
        let mut hands =
            StreamReceiver::bind("hands", config.hand_addr(), &options, bridge.hand_mailbox())?;
        let mut pose = StreamReceiver::bind("pose", config.pose_addr(), &options, bridge.pose_mailbox())?;

        body.start()?;
        hands.start()?;
        pose.start()?;

        Ok(Self { body, hands, pose })
    }

    /// Body, hand and pose socket addresses.
    pub fn local_addrs(&self) -> [SocketAddr; 3] {
        [self.body.local_addr(), self.hands.local_addr(), self.pose.local_addr()]
    }

    pub fn stats(&self) -> [(&str, StreamStats); 3] {
        [
            (self.body.name(), self.body.stats()),
            (self.hands.name(), self.hands.stats()),
            (self.pose.name(), self.pose.stats()),
        ]
    }

    /// Close every stream and wait (bounded) for the receive threads.
    /// Close every stream; returns the final body, hand and pose states.
    pub fn close(&mut self) -> [StreamState; 3] {
        let states = [self.body.close(), self.hands.close(), self.pose.close()];
        for state in states {
            if !state.is_terminal() {
                tracing::warn!("Stream did not reach a terminal state: {:?}", state);
            }
        }
        states
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::SampleRing;
    use crate::motion::math::{Quat, Vec3};
    use crate::scene::TransformTree;
    use std::f32::consts::FRAC_PI_2;
    use std::net::UdpSocket;
    use std::time::Duration;

    fn full_scene() -> TransformTree {
        let mut tree = TransformTree::new();
        tree.add_node("pelvis");
        for b in JointTable::g1_body().iter().chain(JointTable::dex3_hands().iter()) {
            tree.add_node(&b.node);
        }
        tree
    }

    #[test]
    fn test_tick_without_data_is_noop() {
        let mut scene = full_scene();
        let mut bridge = Bridge::from_config(&AppConfig::default(), &scene).unwrap();
        assert_eq!(bridge.tick(&mut scene), TickReport::default());
        assert_eq!(bridge.ticks(), 1);
    }

    #[test]
    fn test_tick_applies_latest_only() {
        let mut scene = full_scene();
        let mut bridge = Bridge::from_config(&AppConfig::default(), &scene).unwrap();

        let mut angles = [0.0f32; 29];
        angles[3] = 0.5;
        bridge.body_mailbox().publish(Packet::new(1, BodyJointFrame::new(angles)));
        angles[3] = FRAC_PI_2;
        bridge.body_mailbox().publish(Packet::new(2, BodyJointFrame::new(angles)));

        let report = bridge.tick(&mut scene);
        assert_eq!(report.body_joints, Some(29));
        assert_eq!(report.hand_joints, None);

        let knee = scene.find_node("left_knee").unwrap();
        let axis = bridge.body_mapper().table().get(3).unwrap().axis;
        let expected = Quat::from_axis_angle(axis, FRAC_PI_2);
        assert!(scene.local_rotation(knee).unwrap().angle_to(expected) < 1e-5);

        // Consumed: the next tick sees nothing new.
        assert_eq!(bridge.tick(&mut scene).body_joints, None);
    }

    #[test]
    fn test_pose_drives_root() {
        let mut scene = full_scene();
        let mut bridge = Bridge::from_config(&AppConfig::default(), &scene).unwrap();

        bridge.pose_mailbox().publish(Packet::new(
            7,
            PoseFrame {
                position: [2.0, 0.0, 0.5],
                orientation: [1.0, 0.0, 0.0, 0.0],
            },
        ));
        assert!(bridge.tick(&mut scene).pose_applied);

        let root = scene.find_node("pelvis").unwrap();
        let pos = scene.local_position(root).unwrap();
        assert!(pos.distance(Vec3::new(0.0, 0.5, 2.0)) < 1e-6);
    }

    #[test]
    fn test_missing_root_ignores_pose() {
        let mut scene = TransformTree::new();
        let mut bridge = Bridge::from_config(&AppConfig::default(), &scene).unwrap();
        bridge.pose_mailbox().publish(Packet::new(1, PoseFrame::default()));
        assert!(!bridge.tick(&mut scene).pose_applied);
    }

    #[test]
    fn test_invalid_override_rejected() {
        let scene = full_scene();
        let mut config = AppConfig::default();
        config.joints.body.push(crate::config::JointOverride {
            name: "no_such_joint".to_string(),
            node: None,
            axis: None,
            sign: None,
        });
        assert!(Bridge::from_config(&config, &scene).is_err());
    }

    #[test]
    fn test_uplink_sends_whole_frames() {
        let receiver = UdpSocket::bind("127.0.0.1:0").unwrap();
        receiver.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
        let sender = PacketSender::new(receiver.local_addr().unwrap()).unwrap();

        let (mut producer, consumer) = SampleRing::<RING_CAPACITY>::split();
        let mut uplink = AudioUplink::new(consumer, 4, sender).unwrap();

        for s in 0..10i16 {
            assert!(producer.try_write(s));
        }
        assert_eq!(uplink.pump(), 2);

        let mut buf = [0u8; 64];
        let n = receiver.recv(&mut buf).unwrap();
        assert_eq!(n, 12 + 4 * 2);

        let stats = uplink.stats();
        assert_eq!(stats.frames_emitted, 2);
        assert_eq!(stats.pending_samples, 2);
        assert_eq!(stats.sender.packets_sent, 2);
    }
}
