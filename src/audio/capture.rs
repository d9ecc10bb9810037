//! Microphone capture feeding the uplink ring
//!
//! The cpal stream lives on its own thread (streams are not `Send` on every
//! host). The data callback owns the resampler and the ring producer, so
//! nothing in the real-time path is shared behind a lock.

use cpal::traits::{DeviceTrait, StreamTrait};
use cpal::{SampleFormat, StreamConfig};
use crossbeam_channel::{bounded, Receiver, Sender};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::audio::buffer::RingProducer;
use crate::audio::device::find_input_device;
use crate::audio::resample::LinearResampler;
use crate::constants::SHUTDOWN_JOIN_TIMEOUT;
use crate::error::AudioError;
use crate::network::join_bounded;

/// Stack scratch used to convert integer samples before resampling.
const SCRATCH_SAMPLES: usize = 1024;

/// Capture from one input device into a sample ring.
pub struct AudioCapture {
    device_name: Option<String>,
    config: StreamConfig,
    sample_format: SampleFormat,
    target_rate: u32,
    gain: f32,
    running: Arc<AtomicBool>,
    thread_handle: Option<JoinHandle<()>>,
    error_rx: Option<Receiver<AudioError>>,
    callbacks: Arc<AtomicU64>,
    samples_written: Arc<AtomicU64>,
}

impl AudioCapture {
    /// Resolve the device and its default input format. Nothing runs yet.
    pub fn new(device_name: Option<&str>, target_rate: u32, gain: f32) -> Result<Self, AudioError> {
        let device = find_input_device(device_name)?;
        let default_config = device
            .default_input_config()
            .map_err(|e| AudioError::DeviceNotFound(e.to_string()))?;

        let sample_format = default_config.sample_format();
        if !matches!(sample_format, SampleFormat::F32 | SampleFormat::I16) {
            return Err(AudioError::UnsupportedFormat(format!("{:?}", sample_format)));
        }

        Ok(Self {
            device_name: device_name.map(str::to_string),
            config: default_config.config(),
            sample_format,
            target_rate,
            gain,
            running: Arc::new(AtomicBool::new(false)),
            thread_handle: None,
            error_rx: None,
            callbacks: Arc::new(AtomicU64::new(0)),
            samples_written: Arc::new(AtomicU64::new(0)),
        })
    }

    /// Start the stream, moving the ring's producer half into the callback.
    pub fn start<const N: usize>(&mut self, producer: RingProducer<N>) -> Result<(), AudioError> {
        if self.running.load(Ordering::SeqCst) {
            return Err(AudioError::StreamError("capture already running".to_string()));
        }

        let device = find_input_device(self.device_name.as_deref())?;
        let resampler = LinearResampler::new(
            self.config.sample_rate.0,
            self.target_rate,
            self.config.channels,
            self.gain,
        )?;

        let (error_tx, error_rx) = bounded::<AudioError>(16);
        self.error_rx = Some(error_rx);

        let running = self.running.clone();
        let config = self.config.clone();
        let sample_format = self.sample_format;
        let callbacks = self.callbacks.clone();
        let samples_written = self.samples_written.clone();

        running.store(true, Ordering::SeqCst);

        tracing::info!(
            "Starting capture: {} Hz, {} ch, {:?} -> {} Hz mono",
            config.sample_rate.0,
            config.channels,
            sample_format,
            self.target_rate
        );

        let handle = thread::Builder::new()
            .name("audio-capture".to_string())
            .spawn(move || {
                let stream = match sample_format {
                    SampleFormat::I16 => build_stream_i16(
                        &device,
                        &config,
                        resampler,
                        producer,
                        callbacks,
                        samples_written,
                        error_tx.clone(),
                    ),
                    _ => build_stream_f32(
                        &device,
                        &config,
                        resampler,
                        producer,
                        callbacks,
                        samples_written,
                        error_tx.clone(),
                    ),
                };

                let stream = match stream {
                    Ok(stream) => stream,
                    Err(e) => {
                        tracing::error!("Failed to build capture stream: {}", e);
                        let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                        running.store(false, Ordering::SeqCst);
                        return;
                    }
                };

                if let Err(e) = stream.play() {
                    tracing::error!("Failed to start capture stream: {}", e);
                    let _ = error_tx.try_send(AudioError::StreamError(e.to_string()));
                    running.store(false, Ordering::SeqCst);
                    return;
                }

                while running.load(Ordering::Relaxed) {
                    thread::sleep(Duration::from_millis(10));
                }
                // Dropping the stream stops capture.
            })
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        self.thread_handle = Some(handle);
        Ok(())
    }

    pub fn stop(&mut self) {
        self.running.store(false, Ordering::SeqCst);

        if let Some(handle) = self.thread_handle.take() {
            join_bounded("audio-capture", handle, SHUTDOWN_JOIN_TIMEOUT);
            tracing::info!("Capture stopped");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> u16 {
        self.config.channels
    }

    pub fn callbacks(&self) -> u64 {
        self.callbacks.load(Ordering::Relaxed)
    }

    /// Resampled samples written into the ring.
    pub fn samples_written(&self) -> u64 {
        self.samples_written.load(Ordering::Relaxed)
    }

    /// Next pending stream error, if any.
    pub fn check_errors(&self) -> Option<AudioError> {
        self.error_rx.as_ref().and_then(|rx| rx.try_recv().ok())
    }
}

impl Drop for AudioCapture {
    fn drop(&mut self) {
        self.stop();
    }
}

fn build_stream_f32<const N: usize>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut resampler: LinearResampler,
    mut producer: RingProducer<N>,
    callbacks: Arc<AtomicU64>,
    samples_written: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    device.build_input_stream(
        config,
        move |data: &[f32], _: &cpal::InputCallbackInfo| {
            callbacks.fetch_add(1, Ordering::Relaxed);
            let written = resampler.process(data, &mut producer);
            samples_written.fetch_add(written as u64, Ordering::Relaxed);
        },
        move |err| {
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

fn build_stream_i16<const N: usize>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut resampler: LinearResampler,
    mut producer: RingProducer<N>,
    callbacks: Arc<AtomicU64>,
    samples_written: Arc<AtomicU64>,
    error_tx: Sender<AudioError>,
) -> Result<cpal::Stream, cpal::BuildStreamError> {
    let channels = usize::from(config.channels.max(1));
    // Whole frames only, so each chunk keeps channel alignment.
    let chunk = (SCRATCH_SAMPLES / channels).max(1) * channels;

    device.build_input_stream(
        config,
        move |data: &[i16], _: &cpal::InputCallbackInfo| {
            callbacks.fetch_add(1, Ordering::Relaxed);
            let written = resample_i16(&mut resampler, data, chunk, &mut producer);
            samples_written.fetch_add(written as u64, Ordering::Relaxed);
        },
        move |err| {
            let _ = error_tx.try_send(AudioError::StreamError(err.to_string()));
        },
        None,
    )
}

/// Convert `data` through stack scratch in `chunk`-sized blocks.
///
/// Stops at the first block that overflows the ring, so one callback
/// counts at most one overflow.
fn resample_i16<const N: usize>(
    resampler: &mut LinearResampler,
    data: &[i16],
    chunk: usize,
    producer: &mut RingProducer<N>,
) -> usize {
    let mut scratch = [0f32; SCRATCH_SAMPLES];
    let overflows = producer.overflow_count();
    let mut written = 0;
    for block in data.chunks(chunk.clamp(1, SCRATCH_SAMPLES)) {
        let out = &mut scratch[..block.len()];
        for (dst, &src) in out.iter_mut().zip(block) {
            *dst = f32::from(src) / 32768.0;
        }
        written += resampler.process(out, producer);
        if producer.overflow_count() != overflows {
            break;
        }
    }
    written
}
