//! Visualization-side bridge
//!
//! Receives joint and pose telemetry, drives an in-memory transform tree
//! and streams the microphone back to the controller.
//!
//! Usage: `bridge [config.toml] [--list-devices]`

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use g1_telemetry_bridge::{
    audio::{list_input_devices, AudioCapture, SampleRing},
    bridge::{AudioUplink, Bridge, TelemetryStreams},
    config::AppConfig,
    constants::RING_CAPACITY,
    motion::JointTable,
    network::{ControlClient, ControlRequest, PacketSender},
    scene::TransformTree,
};

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

    if args.iter().any(|a| a == "--list-devices") {
        println!("\n=== Available Input Devices ===");
        for device in list_input_devices() {
            let default_marker = if device.is_default { " [DEFAULT]" } else { "" };
            println!("  {}{}:", device.name, default_marker);
            println!("    Sample rates: {:?}", device.sample_rates);
            println!("    Channels: {:?}", device.channels);
        }
        println!();
        return Ok(());
    }

    let config_path = args.iter().find(|a| !a.starts_with("--")).map(PathBuf::from);
    let config = AppConfig::load_or_default(config_path.as_deref())?;

    tracing::info!("Starting G1 telemetry bridge");

    let mut scene = build_scene(&config)?;
    let mut bridge = Bridge::from_config(&config, &scene)?;

    let mut streams = TelemetryStreams::start(&config.network, &bridge)
        .context("failed to start telemetry streams")?;

    let mut capture = if config.audio.enabled {
        start_audio(&config, &mut bridge)
    } else {
        None
    };

    if config.control.enabled {
        let address = config.control.address;
        tokio::task::spawn_blocking(move || ping_controller(address));
    }

    let mut tick = tokio::time::interval(config.tick.period());
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    let mut stats = tokio::time::interval(Duration::from_secs(config.tick.stats_interval_secs.max(1)));
    stats.tick().await;

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    tracing::info!("Bridge running at {} Hz, press Ctrl+C to stop", config.tick.hz);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                bridge.tick(&mut scene);

                if let Some(capture) = capture.as_ref() {
                    while let Some(e) = capture.check_errors() {
                        tracing::warn!("Capture error: {}", e);
                    }
                }
            }
            _ = stats.tick() => {
                log_stats(&bridge, &streams, capture.as_ref());
            }
            _ = &mut shutdown => {
                tracing::info!("Shutting down...");
                break;
            }
        }
    }

    streams.close();
    if let Some(capture) = capture.as_mut() {
        capture.stop();
    }
    log_stats(&bridge, &streams, capture.as_ref());

    Ok(())
}

/// One node per joint plus the pose root.
fn build_scene(config: &AppConfig) -> Result<TransformTree> {
    let mut scene = TransformTree::new();
    scene.add_node(&config.pose.root_node);

    let mut body = JointTable::g1_body();
    body.apply_overrides(&config.joints.body)?;
    let mut hands = JointTable::dex3_hands();
    hands.apply_overrides(&config.joints.hands)?;

    for binding in body.iter().chain(hands.iter()) {
        scene.add_node(&binding.node);
    }
    Ok(scene)
}

/// Capture and uplink are optional; failures leave the bridge running without audio.
fn start_audio(config: &AppConfig, bridge: &mut Bridge) -> Option<AudioCapture> {
    let mut capture = match AudioCapture::new(
        config.audio.input_device.as_deref(),
        config.audio.target_sample_rate,
        config.audio.gain,
    ) {
        Ok(capture) => capture,
        Err(e) => {
            tracing::warn!("Audio capture unavailable: {}", e);
            return None;
        }
    };

    let sender = match PacketSender::new(config.network.audio_target) {
        Ok(sender) => sender,
        Err(e) => {
            tracing::warn!("Audio uplink unavailable: {}", e);
            return None;
        }
    };

    let (producer, consumer) = SampleRing::<RING_CAPACITY>::split();
    match AudioUplink::new(consumer, config.audio.frame_samples, sender) {
        Ok(uplink) => bridge.set_uplink(uplink),
        Err(e) => {
            tracing::warn!("Audio uplink unavailable: {}", e);
            return None;
        }
    }

    if let Err(e) = capture.start(producer) {
        tracing::warn!("Failed to start capture: {}", e);
        return None;
    }

    tracing::info!(
        "Audio uplink to {} ({} Hz, {} samples/frame)",
        config.network.audio_target,
        config.audio.target_sample_rate,
        config.audio.frame_samples
    );
    Some(capture)
}

fn ping_controller(address: std::net::SocketAddr) {
    let client = match ControlClient::connect(address) {
        Ok(client) => client,
        Err(e) => {
            tracing::warn!("Control channel unavailable: {}", e);
            return;
        }
    };

    for command in ["ping", "get_status"] {
        match client.request(&ControlRequest::new(command), Duration::from_secs(2)) {
            Ok(Some(response)) => {
                tracing::info!("Control {}: {:?} {}", command, response.status, response.message)
            }
            Ok(None) => tracing::warn!("Control {}: no response from {}", command, address),
            Err(e) => tracing::warn!("Control {} failed: {}", command, e),
        }
    }
}

fn log_stats(bridge: &Bridge, streams: &TelemetryStreams, capture: Option<&AudioCapture>) {
    for (name, s) in streams.stats() {
        tracing::info!(
            "Stream {}: {} accepted, {} malformed, {} faults, {} gaps, {} reordered, last seq {}",
            name,
            s.accepted,
            s.malformed,
            s.faults,
            s.gaps,
            s.reordered,
            s.last_sequence
        );
    }

    if let Some(uplink) = bridge.uplink_stats() {
        tracing::info!(
            "Audio uplink: {} frames, {} sent, {} send errors, {} ring overflows, {} pending",
            uplink.frames_emitted,
            uplink.sender.packets_sent,
            uplink.sender.send_errors,
            uplink.ring_overflows,
            uplink.pending_samples
        );
    }

    if let Some(capture) = capture {
        tracing::info!(
            "Capture: {} callbacks, {} samples resampled",
            capture.callbacks(),
            capture.samples_written()
        );
    }
}
