//! Input Delay Buffering
//!
//! Each tick the local player's raw pointer sample is appended to a
//! fixed-length ring. The sample actually applied (and transmitted) is
//! read `frame_lag` entries behind the newest one, so the local copy of
//! the player acts on the same input the remote peer will see once the
//! message has crossed the wire.

use std::collections::{BTreeMap, VecDeque};

use serde::{Serialize, Deserialize};

/// One pointer sample.
#[derive(Clone, Copy, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct InputSample {
    /// Pointer X in world coordinates.
    pub x: f64,
    /// Pointer Y in world coordinates.
    pub y: f64,
}

impl InputSample {
    /// Create a sample.
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Fixed-capacity ring of recent samples for one local player.
#[derive(Clone, Debug)]
pub struct InputDelayBuffer {
    samples: VecDeque<InputSample>,
    capacity: usize,
}

impl InputDelayBuffer {
    /// Ring holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Append this tick's sample, evicting the oldest on overflow.
    pub fn push(&mut self, sample: InputSample) {
        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(sample);
    }

    /// Pick the sample to apply this tick.
    ///
    /// `Some(frame_lag)` reads index `len - 1 - frame_lag`, clamped to the
    /// oldest sample. `None` means no network session is active and the
    /// newest sample is applied with zero delay.
    pub fn select(&self, frame_lag: Option<u64>) -> Option<InputSample> {
        let newest = self.samples.len().checked_sub(1)?;
        let lag = frame_lag.unwrap_or(0);
        let lag = usize::try_from(lag).unwrap_or(usize::MAX);
        let index = newest.saturating_sub(lag);
        self.samples.get(index).copied()
    }

    /// Number of buffered samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Ring capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Delay rings for every local player, keyed by player id.
#[derive(Clone, Debug)]
pub struct LocalInputs {
    rings: BTreeMap<String, InputDelayBuffer>,
    capacity: usize,
}

impl LocalInputs {
    /// Empty set of rings, each created with `capacity`.
    pub fn new(capacity: usize) -> Self {
        Self {
            rings: BTreeMap::new(),
            capacity,
        }
    }

    /// Record a sample for a player, creating the ring on first use.
    pub fn record(&mut self, player_id: &str, sample: InputSample) {
        let capacity = self.capacity;
        self.rings
            .entry(player_id.to_string())
            .or_insert_with(|| InputDelayBuffer::new(capacity))
            .push(sample);
    }

    /// Delayed sample for a player (see [`InputDelayBuffer::select`]).
    pub fn select(&self, player_id: &str, frame_lag: Option<u64>) -> Option<InputSample> {
        self.rings.get(player_id)?.select(frame_lag)
    }
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn filled(n: usize, capacity: usize) -> InputDelayBuffer {
        let mut buffer = InputDelayBuffer::new(capacity);
        for i in 0..n {
            buffer.push(InputSample::new(i as f64, -(i as f64)));
        }
        buffer
    }

    #[test]
    fn test_empty_buffer_selects_nothing() {
        let buffer = InputDelayBuffer::new(8);
        assert!(buffer.select(Some(2)).is_none());
        assert!(buffer.select(None).is_none());
    }

    #[test]
    fn test_overflow_evicts_oldest() {
        let buffer = filled(10, 4);
        assert_eq!(buffer.len(), 4);
        // Oldest retained is sample 6
        assert_eq!(buffer.select(Some(100)).unwrap().x, 6.0);
        assert_eq!(buffer.select(Some(0)).unwrap().x, 9.0);
    }

    #[test]
    fn test_select_reads_behind_newest() {
        let buffer = filled(8, 8);
        assert_eq!(buffer.select(Some(0)).unwrap().x, 7.0);
        assert_eq!(buffer.select(Some(3)).unwrap().x, 4.0);
    }

    #[test]
    fn test_select_clamps_to_oldest() {
        let buffer = filled(2, 8);
        assert_eq!(buffer.select(Some(5)).unwrap().x, 0.0);
    }

    #[test]
    fn test_no_session_means_no_delay() {
        let buffer = filled(5, 8);
        assert_eq!(buffer.select(None).unwrap().x, 4.0);
    }

    #[test]
    fn test_zero_capacity_holds_one() {
        let buffer = filled(3, 0);
        assert_eq!(buffer.capacity(), 1);
        assert_eq!(buffer.select(Some(4)).unwrap().x, 2.0);
    }

    #[test]
    fn test_local_inputs_per_player() {
        let mut inputs = LocalInputs::new(4);
        for i in 0..4 {
            inputs.record("p1", InputSample::new(i as f64, 0.0));
        }
        inputs.record("p2", InputSample::new(50.0, 50.0));

        assert_eq!(inputs.select("p1", Some(1)).unwrap().x, 2.0);
        assert_eq!(inputs.select("p2", Some(1)).unwrap().x, 50.0);
        assert!(inputs.select("p3", None).is_none());
    }
}
