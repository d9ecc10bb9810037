//! Sequence number observation
//!
//! Sequence numbers are diagnostic only. Nothing here gates delivery: a
//! reordered or duplicated packet is still decoded and published.

/// Classification of one observed sequence number relative to the newest seen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceEvent {
    First,
    InOrder,
    /// `n` packets were skipped.
    Gap(u32),
    Reordered,
    Duplicate,
}

/// Tracks the newest sequence number on one stream. Wraps at `u32::MAX`.
#[derive(Debug, Default, Clone)]
pub struct SequenceTracker {
    newest: Option<u32>,
}

impl SequenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn observe(&mut self, sequence: u32) -> SequenceEvent {
        let Some(newest) = self.newest else {
            self.newest = Some(sequence);
            return SequenceEvent::First;
        };

        // Signed distance on the wrapping counter.
        let delta = sequence.wrapping_sub(newest) as i32;
        match delta {
            0 => SequenceEvent::Duplicate,
            1 => {
                self.newest = Some(sequence);
                SequenceEvent::InOrder
            }
            d if d > 1 => {
                self.newest = Some(sequence);
                SequenceEvent::Gap((d - 1) as u32)
            }
            _ => SequenceEvent::Reordered,
        }
    }

    pub fn newest(&self) -> Option<u32> {
        self.newest
    }
}
