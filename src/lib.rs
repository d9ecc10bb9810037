//! # G1 Telemetry Bridge
//!
//! Low-latency UDP bridge between a humanoid robot controller and a
//! visualization host: joint angles and body pose flow in, microphone audio
//! flows out.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────────────┐
//! │                           CONTROLLER                                 │
//! │   JOIN (29 joints)      DEX3 (14 joints)      ODOM (pose)   AUD0 in  │
//! └──────┬───────────────────────┬────────────────────┬───────────▲──────┘
//!        │ UDP                   │ UDP                │ UDP       │ UDP
//!        ▼                       ▼                    ▼           │
//! ┌──────────────────────────────────────────────────────────────┼──────┐
//! │                       VISUALIZATION HOST                      │      │
//! │  ┌────────────┐   ┌────────────┐   ┌────────────┐             │      │
//! │  │ ingest     │   │ ingest     │   │ ingest     │  one thread │      │
//! │  │ thread     │   │ thread     │   │ thread     │  per stream │      │
//! │  └─────┬──────┘   └─────┬──────┘   └─────┬──────┘             │      │
//! │        ▼                ▼                ▼                    │      │
//! │  ┌──────────┐     ┌──────────┐     ┌──────────┐               │      │
//! │  │ Mailbox  │     │ Mailbox  │     │ Mailbox  │  latest wins  │      │
//! │  └────┬─────┘     └────┬─────┘     └────┬─────┘               │      │
//! │       └────────────────┼────────────────┘                     │      │
//! │                        ▼                                      │      │
//! │  ┌─────────────────────────────────────────────────┐          │      │
//! │  │ tick (bridge::Bridge)                           │          │      │
//! │  │   JointMapper ─► scene joints                   │          │      │
//! │  │   PoseConverter ─► scene root                   │          │      │
//! │  │   FramePacketizer ─► PacketSender ──────────────┼──────────┘      │
//! │  └───────────────────────────▲─────────────────────┘                 │
//! │                              │ SPSC SampleRing                       │
//! │  ┌───────────────────────────┴─────────────────────┐                 │
//! │  │ capture callback: LinearResampler (device → 16k)│                 │
//! │  └─────────────────────────────────────────────────┘                 │
//! └──────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audio;
pub mod bridge;
pub mod config;
pub mod error;
pub mod motion;
pub mod network;
pub mod protocol;
pub mod scene;
pub mod sync;

pub use error::{Error, Result};

/// Application-wide constants
pub mod constants {
    use std::time::Duration;

    /// Audio uplink sample rate
    pub const TARGET_SAMPLE_RATE: u32 = 16_000;

    /// Samples per uplink packet (20 ms at 16 kHz)
    pub const FRAME_SAMPLES: usize = 320;

    /// Frames of slack between capture and network tick
    pub const JITTER_WINDOW_FRAMES: usize = 16;

    /// Sample ring capacity
    pub const RING_CAPACITY: usize = FRAME_SAMPLES * JITTER_WINDOW_FRAMES;

    /// Longest accepted audio frame
    pub const MAX_FRAME_SAMPLES: usize = 1024;

    /// Receive buffer; holds the largest audio packet with room to spare
    pub const MAX_DATAGRAM: usize =
        (crate::protocol::wire::AUDIO_PREFIX_LEN + 2 * MAX_FRAME_SAMPLES).next_power_of_two();

    /// Output samples produced per capture callback at most
    pub const RESAMPLE_ITERATION_CAP: usize = 16_384;

    /// How long shutdown waits for a worker thread
    pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_millis(250);

    pub const DEFAULT_CONTROL_PORT: u16 = 5005;
    pub const DEFAULT_BODY_PORT: u16 = 5006;
    pub const DEFAULT_HAND_PORT: u16 = 5007;
    pub const DEFAULT_POSE_PORT: u16 = 5008;
    pub const DEFAULT_AUDIO_PORT: u16 = 5009;
}
