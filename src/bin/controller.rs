//! Controller-side simulator
//!
//! Emits synthetic joint and pose telemetry towards a bridge, receives its
//! audio uplink and answers control requests.
//!
//! Usage: `controller [config.toml] [--target <bridge-ip>]`

use anyhow::{Context, Result};
use std::f32::consts::{PI, TAU};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use g1_telemetry_bridge::{
    config::AppConfig,
    network::{
        control::{ControlServerConfig, ControllerIdentity},
        ControlServer, PacketSender, SocketOptions, StreamReceiver,
    },
    protocol::{encode, AudioFrame, BodyJointFrame, HandJointFrame, Packet, PoseFrame},
    sync::create_shared_mailbox,
};

/// Synthetic motion: every joint swings on its own phase, the body walks a circle.
struct MotionSource {
    started: Instant,
    sequence: u32,
}

impl MotionSource {
    fn new() -> Self {
        Self {
            started: Instant::now(),
            sequence: 0,
        }
    }

    fn next_sequence(&mut self) -> u32 {
        self.sequence = self.sequence.wrapping_add(1);
        self.sequence
    }

    fn body(&self) -> BodyJointFrame {
        let t = self.started.elapsed().as_secs_f32();
        let mut angles = [0.0f32; 29];
        for (i, a) in angles.iter_mut().enumerate() {
            *a = 0.4 * (t * 1.5 + i as f32 * 0.35).sin();
        }
        BodyJointFrame::new(angles)
    }

    fn hands(&self) -> HandJointFrame {
        let t = self.started.elapsed().as_secs_f32();
        let grip = 0.5 * (1.0 - (t * 2.0).cos());
        HandJointFrame::new([grip; 14])
    }

    fn pose(&self) -> PoseFrame {
        let t = self.started.elapsed().as_secs_f32();
        let heading = (t * 0.2) % TAU;
        let (s, c) = heading.sin_cos();
        let half = (heading + PI / 2.0) * 0.5;
        PoseFrame {
            position: [c, s, 0.78],
            orientation: [half.cos(), 0.0, 0.0, half.sin()],
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let target_ip: IpAddr = match args.iter().position(|a| a == "--target") {
        Some(i) => args
            .get(i + 1)
            .context("--target needs an address")?
            .parse()
            .context("invalid --target address")?,
        None => IpAddr::V4(Ipv4Addr::LOCALHOST),
    };
    let config_path = args
        .iter()
        .enumerate()
        .find(|(i, a)| !a.starts_with("--") && (*i == 0 || args[i - 1] != "--target"))
        .map(|(_, a)| PathBuf::from(a));
    let config = AppConfig::load_or_default(config_path.as_deref())?;

    tracing::info!("Starting controller simulator, bridge at {}", target_ip);

    let body_tx = PacketSender::new(SocketAddr::new(target_ip, config.network.body_port))?;
    let hand_tx = PacketSender::new(SocketAddr::new(target_ip, config.network.hand_port))?;
    let pose_tx = PacketSender::new(SocketAddr::new(target_ip, config.network.pose_port))?;

    let audio_mailbox = create_shared_mailbox::<Packet<AudioFrame>>();
    let mut audio_rx = StreamReceiver::bind(
        "audio",
        SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.network.audio_target.port()),
        &SocketOptions {
            read_timeout: Some(config.network.recv_timeout()),
            ..SocketOptions::default()
        },
        audio_mailbox.clone(),
    )?;
    audio_rx.start()?;

    let mut control = ControlServer::start(ControlServerConfig {
        bind: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), config.control.address.port()),
        peer_ip: config.control.peer_ip,
        stage_interval: Duration::from_millis(500),
        identity: ControllerIdentity {
            controller_ip: config.control.address.ip().to_string(),
            robot_ip: target_ip.to_string(),
        },
    })?;

    let mut motion = MotionSource::new();
    let mut tick = tokio::time::interval(config.tick.period());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats = tokio::time::interval(Duration::from_secs(config.tick.stats_interval_secs.max(1)));
    stats.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    let mut audio_samples = 0u64;
    let mut audio_peak = 0i16;

    loop {
        tokio::select! {
            _ = tick.tick() => {
                let seq = motion.next_sequence();
                for (sender, packet) in [
                    (&body_tx, encode(&Packet::new(seq, motion.body()))),
                    (&hand_tx, encode(&Packet::new(seq, motion.hands()))),
                    (&pose_tx, encode(&Packet::new(seq, motion.pose()))),
                ] {
                    if let Err(e) = sender.send(&packet) {
                        tracing::debug!("Telemetry send failed: {}", e);
                    }
                }

                if let Some(packet) = audio_mailbox.take_if_new() {
                    let samples = packet.payload.samples();
                    audio_samples += samples.len() as u64;
                    audio_peak = samples
                        .iter()
                        .map(|s| s.saturating_abs())
                        .fold(audio_peak, i16::max);
                }
            }
            _ = stats.tick() => {
                let s = audio_rx.stats();
                tracing::info!(
                    "Sent {} frames per stream; audio: {} packets, {} malformed, {} gaps, {} samples seen, peak {}",
                    motion.sequence,
                    s.accepted,
                    s.malformed,
                    s.gaps,
                    audio_samples,
                    audio_peak
                );
                audio_peak = 0;
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    audio_rx.close();
    control.stop();

    Ok(())
}
