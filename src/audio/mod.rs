//! Audio uplink: capture, resampling, buffering and packetization

pub mod buffer;
pub mod capture;
pub mod device;
pub mod packetizer;
pub mod resample;

pub use buffer::{RingConsumer, RingProducer, SampleRing};
pub use capture::AudioCapture;
pub use device::{find_input_device, list_input_devices, InputDeviceInfo};
pub use packetizer::FramePacketizer;
pub use resample::LinearResampler;
