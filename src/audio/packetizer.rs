//! Slices the sample ring into fixed-size audio packets

use bytes::Bytes;

use crate::audio::buffer::RingConsumer;
use crate::constants::MAX_FRAME_SAMPLES;
use crate::error::WireError;
use crate::protocol::wire::{encode, AudioFrame, Packet};

/// Drains whole frames from the ring on each network tick.
///
/// Never emits a partial frame; leftovers stay buffered for the next tick.
pub struct FramePacketizer<const N: usize> {
    consumer: RingConsumer<N>,
    frame_samples: usize,
    next_sequence: u32,
    frames_emitted: u64,
}

impl<const N: usize> FramePacketizer<N> {
    pub fn new(consumer: RingConsumer<N>, frame_samples: usize) -> Result<Self, WireError> {
        if frame_samples == 0 || frame_samples > MAX_FRAME_SAMPLES.min(N) {
            return Err(WireError::FrameTooLong(frame_samples));
        }
        Ok(Self {
            consumer,
            frame_samples,
            next_sequence: 0,
            frames_emitted: 0,
        })
    }

    /// Emit every complete frame currently buffered. Returns frames emitted.
    pub fn drain<F>(&mut self, mut send: F) -> usize
    where
        F: FnMut(Bytes),
    {
        let mut emitted = 0;
        while self.consumer.available() >= self.frame_samples {
            let mut samples = vec![0i16; self.frame_samples];
            let read = self.consumer.read(&mut samples);
            debug_assert_eq!(read, self.frame_samples);

            let frame = match AudioFrame::new(samples) {
                Ok(frame) => frame,
                Err(e) => {
                    tracing::error!("Dropping audio frame: {}", e);
                    continue;
                }
            };

            let sequence = self.next_sequence;
            self.next_sequence = self.next_sequence.wrapping_add(1);
            send(encode(&Packet::new(sequence, frame)));

            emitted += 1;
        }
        self.frames_emitted += emitted as u64;
        emitted
    }

    /// Sequence number the next frame will carry.
    pub fn next_sequence(&self) -> u32 {
        self.next_sequence
    }

    pub fn frames_emitted(&self) -> u64 {
        self.frames_emitted
    }

    pub fn frame_samples(&self) -> usize {
        self.frame_samples
    }

    /// Samples waiting for the next tick.
    pub fn pending(&self) -> usize {
        self.consumer.available()
    }

    pub fn overflow_count(&self) -> u64 {
        self.consumer.overflow_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::SampleRing;
    use crate::protocol::wire::decode;

    #[test]
    fn test_whole_frames_only() {
        let (mut tx, rx) = SampleRing::<64>::split();
        let mut packetizer = FramePacketizer::new(rx, 10).unwrap();

        for s in 0..25 {
            tx.try_write(s);
        }

        let mut packets = Vec::new();
        assert_eq!(packetizer.drain(|p| packets.push(p)), 2);
        assert_eq!(packetizer.pending(), 5);

        let first = decode::<AudioFrame>(&packets[0]).unwrap();
        let second = decode::<AudioFrame>(&packets[1]).unwrap();
        assert_eq!(first.sequence, 0);
        assert_eq!(second.sequence, 1);
        assert_eq!(first.payload.samples(), &(0..10).collect::<Vec<i16>>()[..]);
        assert_eq!(second.payload.samples(), &(10..20).collect::<Vec<i16>>()[..]);
        assert_eq!(packets[0].len(), AudioFrame::packet_len(10));
    }

    #[test]
    fn test_sequence_continues_across_ticks() {
        let (mut tx, rx) = SampleRing::<16>::split();
        let mut packetizer = FramePacketizer::new(rx, 4).unwrap();

        let mut sequences = Vec::new();
        for _ in 0..3 {
            for s in 0..6 {
                tx.try_write(s);
            }
            packetizer.drain(|p| sequences.push(decode::<AudioFrame>(&p).unwrap().sequence));
        }

        // 18 samples in, 4 whole frames out, 2 samples left over.
        assert_eq!(sequences, vec![0, 1, 2, 3]);
        assert_eq!(packetizer.pending(), 2);
        assert_eq!(packetizer.frames_emitted(), 4);
    }

    #[test]
    fn test_rejects_bad_frame_size() {
        let (_tx, rx) = SampleRing::<16>::split();
        assert!(FramePacketizer::new(rx, 32).is_err());
    }
}
