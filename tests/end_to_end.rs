//! Full-path scenarios over loopback UDP

use std::f32::consts::{FRAC_PI_2, TAU};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, UdpSocket};
use std::thread;
use std::time::{Duration, Instant};

use g1_telemetry_bridge::{
    audio::{LinearResampler, SampleRing},
    bridge::{AudioUplink, Bridge, TelemetryStreams},
    config::AppConfig,
    constants::RING_CAPACITY,
    motion::{JointTable, Quat},
    network::{PacketSender, SocketOptions, StreamReceiver, StreamState},
    protocol::{AudioFrame, Packet},
    scene::{SceneGraph, TransformTree},
    sync::create_shared_mailbox,
};

fn loopback_config() -> AppConfig {
    let mut config = AppConfig::default();
    config.network.bind_ip = IpAddr::V4(Ipv4Addr::LOCALHOST);
    config.network.body_port = 0;
    config.network.hand_port = 0;
    config.network.pose_port = 0;
    config.network.recv_timeout_ms = 20;
    config
}

fn scene_with_joints() -> TransformTree {
    let mut scene = TransformTree::new();
    scene.add_node("pelvis");
    for b in JointTable::g1_body().iter().chain(JointTable::dex3_hands().iter()) {
        scene.add_node(&b.node);
    }
    scene
}

/// Hand-built `JOIN` datagram.
fn join_datagram(sequence: u32, angles: &[f32; 29]) -> Vec<u8> {
    let mut out = Vec::with_capacity(124);
    out.extend_from_slice(&0x4A4F_494Eu32.to_le_bytes());
    out.extend_from_slice(&sequence.to_le_bytes());
    for a in angles {
        out.extend_from_slice(&a.to_le_bytes());
    }
    out
}

#[test]
fn knee_datagram_drives_only_the_knee() {
    let config = loopback_config();
    let mut scene = scene_with_joints();
    let mut bridge = Bridge::from_config(&config, &scene).unwrap();
    let mut streams = TelemetryStreams::start(&config.network, &bridge).unwrap();
    let [body_addr, _, _] = streams.local_addrs();

    let mut angles = [0.0f32; 29];
    angles[3] = 1.5708;
    let datagram = join_datagram(1, &angles);
    assert_eq!(datagram.len(), 124);

    let sender = UdpSocket::bind("127.0.0.1:0").unwrap();
    sender.send_to(&datagram, body_addr).unwrap();

    let deadline = Instant::now() + Duration::from_secs(2);
    let applied = loop {
        if let Some(n) = bridge.tick(&mut scene).body_joints {
            break n;
        }
        assert!(Instant::now() < deadline, "body frame never arrived");
        thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(applied, 29);

    let table = bridge.body_mapper().table();
    for (index, binding) in table.iter().enumerate() {
        let node = scene.find_node(&binding.node).unwrap();
        let rotation = scene.local_rotation(node).unwrap();
        if index == 3 {
            let expected = Quat::from_axis_angle(binding.axis, FRAC_PI_2);
            assert!(rotation.angle_to(expected) < 1e-3, "knee: {:?}", rotation);
            assert!((rotation.angle_to(Quat::IDENTITY) - FRAC_PI_2).abs() < 1e-3);
        } else {
            assert!(rotation.angle_to(Quat::IDENTITY) < 1e-6, "{} moved", binding.name);
        }
    }

    let [(_, body_stats), _, _] = streams.stats();
    assert_eq!(body_stats.accepted, 1);
    assert_eq!(body_stats.last_sequence, 1);

    assert_eq!(streams.close(), [StreamState::Closed; 3]);
}

#[test]
fn sine_resamples_to_uplink_rate() {
    const SOURCE_RATE: u32 = 48_000;
    const AMPLITUDE: f32 = 0.5;

    let input: Vec<f32> = (0..512)
        .map(|i| AMPLITUDE * (TAU * 1000.0 * i as f32 / SOURCE_RATE as f32).sin())
        .collect();

    let mut resampler = LinearResampler::new(SOURCE_RATE, 16_000, 1, 1.0).unwrap();
    let (mut producer, consumer) = SampleRing::<RING_CAPACITY>::split();
    let written = resampler.process(&input, &mut producer);

    assert!((168..=172).contains(&written), "wrote {}", written);
    assert_eq!(consumer.available(), written);

    // Ship the ring over the uplink and decode it on the far side.
    let mailbox = create_shared_mailbox::<Packet<AudioFrame>>();
    let options = SocketOptions {
        read_timeout: Some(Duration::from_millis(20)),
        ..SocketOptions::default()
    };
    let mut receiver = StreamReceiver::bind(
        "audio",
        SocketAddr::from(([127, 0, 0, 1], 0)),
        &options,
        mailbox.clone(),
    )
    .unwrap();
    receiver.start().unwrap();

    let sender = PacketSender::new(receiver.local_addr()).unwrap();
    let mut uplink = AudioUplink::new(consumer, written, sender).unwrap();
    assert_eq!(uplink.pump(), 1);

    let deadline = Instant::now() + Duration::from_secs(2);
    let packet = loop {
        if let Some(p) = mailbox.take_if_new() {
            break p;
        }
        assert!(Instant::now() < deadline, "audio frame never arrived");
        thread::sleep(Duration::from_millis(2));
    };

    assert_eq!(packet.sequence, 0);
    let samples = packet.payload.samples();
    assert_eq!(samples.len(), written);

    let source_peak = AMPLITUDE * f32::from(i16::MAX);
    let peak = samples.iter().map(|s| f32::from(s.saturating_abs())).fold(0.0, f32::max);
    assert!(
        (peak - source_peak).abs() / source_peak < 0.01,
        "peak {} vs {}",
        peak,
        source_peak
    );

    assert_eq!(receiver.close(), StreamState::Closed);
}
