//! Bridge configuration (`config.toml`)
//!
//! Every field has a default, so an empty file, a partial file or no file at
//! all are all valid starting points.

use serde::{Deserialize, Serialize};
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::constants;
use crate::error::{Error, Result};
use crate::motion::math::Vec3;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub network: NetworkConfig,
    pub audio: AudioConfig,
    pub pose: PoseConfig,
    pub joints: JointsConfig,
    pub control: ControlConfig,
    pub tick: TickConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct NetworkConfig {
    /// Address the inbound stream sockets bind to.
    pub bind_ip: IpAddr,
    pub body_port: u16,
    pub hand_port: u16,
    pub pose_port: u16,
    /// Destination of the outbound audio uplink.
    pub audio_target: SocketAddr,
    pub recv_timeout_ms: u64,
    /// Kernel receive buffer size; `None` keeps the OS default.
    pub recv_buffer_size: Option<usize>,
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self {
            bind_ip: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            body_port: constants::DEFAULT_BODY_PORT,
            hand_port: constants::DEFAULT_HAND_PORT,
            pose_port: constants::DEFAULT_POSE_PORT,
            audio_target: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                constants::DEFAULT_AUDIO_PORT,
            ),
            recv_timeout_ms: 100,
            recv_buffer_size: None,
        }
    }
}

impl NetworkConfig {
    pub fn body_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.body_port)
    }

    pub fn hand_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.hand_port)
    }

    pub fn pose_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_ip, self.pose_port)
    }

    pub fn recv_timeout(&self) -> Duration {
        Duration::from_millis(self.recv_timeout_ms)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture the microphone and send the uplink.
    pub enabled: bool,
    /// Input device name; `None` selects the host default.
    pub input_device: Option<String>,
    pub target_sample_rate: u32,
    pub frame_samples: usize,
    pub gain: f32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            input_device: None,
            target_sample_rate: constants::TARGET_SAMPLE_RATE,
            frame_samples: constants::FRAME_SAMPLES,
            gain: 1.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PoseConfig {
    pub scale: f32,
    /// Render-frame offset added after scaling.
    pub offset: [f32; 3],
    /// Scene node that receives the body pose.
    pub root_node: String,
}

impl Default for PoseConfig {
    fn default() -> Self {
        Self {
            scale: 1.0,
            offset: [0.0; 3],
            root_node: "pelvis".to_string(),
        }
    }
}

impl PoseConfig {
    pub fn offset(&self) -> Vec3 {
        Vec3::from_array(self.offset)
    }
}

/// Override for one entry of a built-in joint table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JointOverride {
    pub name: String,
    #[serde(default)]
    pub node: Option<String>,
    #[serde(default)]
    pub axis: Option<[f32; 3]>,
    #[serde(default)]
    pub sign: Option<f32>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointsConfig {
    /// 0 snaps; towards 1 converges slowly.
    pub smoothing: f32,
    pub body: Vec<JointOverride>,
    pub hands: Vec<JointOverride>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ControlConfig {
    pub enabled: bool,
    /// Controller's control socket.
    pub address: SocketAddr,
    /// Only datagrams from this IP are accepted by the controller side.
    pub peer_ip: Option<IpAddr>,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            address: SocketAddr::new(
                IpAddr::V4(Ipv4Addr::LOCALHOST),
                constants::DEFAULT_CONTROL_PORT,
            ),
            peer_ip: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TickConfig {
    pub hz: u32,
    pub stats_interval_secs: u64,
}

impl Default for TickConfig {
    fn default() -> Self {
        Self {
            hz: 60,
            stats_interval_secs: 5,
        }
    }
}

impl TickConfig {
    pub fn period(&self) -> Duration {
        Duration::from_secs_f64(1.0 / f64::from(self.hz.max(1)))
    }
}

impl AppConfig {
    pub const FILE_NAME: &'static str = "config.toml";

    /// Parse and validate a TOML document.
    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(content).map_err(|e| Error::Config(format!("Failed to parse: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from an explicit file. Missing or invalid files are errors.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("Failed to read {}: {}", path.display(), e))
        })?;
        let config = Self::from_toml(&content)
            .map_err(|e| Error::Config(format!("{}: {}", path.display(), e)))?;
        tracing::info!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Explicit path if given, then the per-user config file, then defaults.
    pub fn load_or_default(path: Option<&Path>) -> Result<Self> {
        if let Some(path) = path {
            return Self::load(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load(&path),
            Some(path) => {
                tracing::debug!("No config at {}, using defaults", path.display());
                Ok(Self::default())
            }
            None => Ok(Self::default()),
        }
    }

    /// Per-user location, e.g. `~/.config/g1-telemetry-bridge/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("", "", "g1-telemetry-bridge")
            .map(|dirs| dirs.config_dir().join(Self::FILE_NAME))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.audio.target_sample_rate == 0 {
            return Err(Error::Config("audio.target_sample_rate must be > 0".into()));
        }
        if self.audio.frame_samples == 0
            || self.audio.frame_samples > constants::MAX_FRAME_SAMPLES
            || self.audio.frame_samples > constants::RING_CAPACITY
        {
            return Err(Error::Config(format!(
                "audio.frame_samples must be in 1..={}",
                constants::MAX_FRAME_SAMPLES.min(constants::RING_CAPACITY)
            )));
        }
        if !self.audio.gain.is_finite() || self.audio.gain < 0.0 {
            return Err(Error::Config("audio.gain must be a finite non-negative number".into()));
        }
        if self.tick.hz == 0 {
            return Err(Error::Config("tick.hz must be > 0".into()));
        }
        if self.network.recv_timeout_ms == 0 {
            return Err(Error::Config("network.recv_timeout_ms must be > 0".into()));
        }
        if !(0.0..1.0).contains(&self.joints.smoothing) {
            return Err(Error::Config("joints.smoothing must be in [0, 1)".into()));
        }
        if !self.pose.scale.is_finite() {
            return Err(Error::Config("pose.scale must be finite".into()));
        }

        for o in self.joints.body.iter().chain(self.joints.hands.iter()) {
            if let Some(axis) = o.axis {
                if Vec3::from_array(axis).try_normalize().is_none() {
                    return Err(Error::Config(format!("joint {} has a zero-length axis", o.name)));
                }
            }
            if let Some(sign) = o.sign {
                if !sign.is_finite() {
                    return Err(Error::Config(format!("joint {} has a non-finite sign", o.name)));
                }
            }
        }

        Ok(())
    }
}
