//! Streaming linear resampler
//!
//! Converts interleaved capture buffers at the device rate into mono
//! 16-bit samples at the uplink rate, writing straight into the sample
//! ring. Runs inside the capture callback: no allocation, no locking and a
//! hard cap on iterations per call.
//!
//! Phase is carried across calls as a fractional source position `p` in
//! the coordinate frame of the *next* buffer. A negative `p` in `[-1, 0)`
//! means the next output lies between the previous buffer's last sample
//! and the new buffer's first sample.

use crate::audio::buffer::RingProducer;
use crate::constants::RESAMPLE_ITERATION_CAP;
use crate::error::AudioError;

pub struct LinearResampler {
    source_rate: u32,
    target_rate: u32,
    channels: usize,
    /// Source samples advanced per output sample.
    step: f64,
    position: f64,
    /// Last mono sample of the previous buffer.
    previous: f32,
    gain: f32,
}

impl LinearResampler {
    pub fn new(
        source_rate: u32,
        target_rate: u32,
        channels: u16,
        gain: f32,
    ) -> Result<Self, AudioError> {
        if target_rate == 0 {
            return Err(AudioError::UnsupportedFormat(
                "target sample rate must be non-zero".to_string(),
            ));
        }
        let mut resampler = Self {
            source_rate,
            target_rate,
            channels: 1,
            step: 1.0,
            position: 0.0,
            previous: 0.0,
            gain,
        };
        resampler.reconfigure(source_rate, channels)?;
        Ok(resampler)
    }

    /// Change the input format. The only operation that resets phase.
    pub fn reconfigure(&mut self, source_rate: u32, channels: u16) -> Result<(), AudioError> {
        if source_rate == 0 {
            return Err(AudioError::UnsupportedFormat(
                "source sample rate must be non-zero".to_string(),
            ));
        }
        if channels == 0 {
            return Err(AudioError::UnsupportedFormat(
                "channel count must be non-zero".to_string(),
            ));
        }

        self.source_rate = source_rate;
        self.channels = channels as usize;
        self.step = f64::from(source_rate) / f64::from(self.target_rate);
        self.position = 0.0;
        self.previous = 0.0;
        Ok(())
    }

    /// Resample one capture buffer into `ring`.
    ///
    /// Returns the number of samples written. Emission stops early when the
    /// ring fills up; those samples are lost.
    pub fn process<const N: usize>(&mut self, interleaved: &[f32], ring: &mut RingProducer<N>) -> usize {
        let channels = self.channels;
        let frames = interleaved.len() / channels;
        if frames == 0 {
            return 0;
        }

        let mono = |frame: usize| -> f32 {
            let start = frame * channels;
            let sum: f32 = interleaved[start..start + channels].iter().sum();
            sum / channels as f32
        };

        let scale = self.gain * f32::from(i16::MAX);
        let first = mono(0);
        let mut p = self.position;
        let mut emitted = 0usize;
        let mut iterations = 0usize;
        let mut full = false;

        // Outputs straddling the previous buffer and this one.
        while p < 0.0 && iterations < RESAMPLE_ITERATION_CAP {
            iterations += 1;
            let frac = (p + 1.0) as f32;
            let sample = self.previous + (first - self.previous) * frac;
            if !ring.try_write(quantize(sample, scale)) {
                full = true;
                break;
            }
            emitted += 1;
            p += self.step;
        }

        while !full && p >= 0.0 && iterations < RESAMPLE_ITERATION_CAP {
            let base = p.floor();
            let index = base as usize;
            if index + 1 >= frames {
                break;
            }
            iterations += 1;

            let frac = (p - base) as f32;
            let a = mono(index);
            let b = mono(index + 1);
            if !ring.try_write(quantize(a + (b - a) * frac, scale)) {
                full = true;
                break;
            }
            emitted += 1;
            p += self.step;
        }

        self.previous = mono(frames - 1);

        // Rebase into the next buffer's coordinates. A position beyond a
        // short next buffer is skipped by the bounds check above and carried
        // forward, so the output rate holds for any callback size. The upper
        // bound never binds for a finite step.
        p -= frames as f64;
        self.position = if p.is_nan() || p < -1.0 {
            -1.0
        } else {
            p.min(self.step.max(frames as f64))
        };

        emitted
    }

    pub fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    pub fn gain(&self) -> f32 {
        self.gain
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn target_rate(&self) -> u32 {
        self.target_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels as u16
    }

    pub fn step(&self) -> f64 {
        self.step
    }

    /// Pending fractional source position, in next-buffer coordinates.
    pub fn position(&self) -> f64 {
        self.position
    }
}

#[inline]
fn quantize(sample: f32, scale: f32) -> i16 {
    (sample * scale)
        .round()
        .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16
}
