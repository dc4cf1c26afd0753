//! Tick-Gated Receive Queue
//!
//! Deferred messages wait here, tagged with the sender's tick, until the
//! local simulation has caught up to within `frame_lag` ticks of it.

use std::collections::VecDeque;

use crate::network::protocol::Envelope;

/// A queued envelope and its arrival order.
#[derive(Debug, Clone, PartialEq)]
pub struct QueueEntry {
    /// The message as received.
    pub envelope: Envelope,
    /// Monotonic arrival counter.
    pub order: u64,
}

impl QueueEntry {
    /// Releasable once `local_tick >= tick - frame_lag`.
    #[inline]
    pub fn is_ready(&self, local_tick: u64, frame_lag: u64) -> bool {
        local_tick.saturating_add(frame_lag) >= self.envelope.tick
    }
}

/// Receive queue owned by a session.
#[derive(Debug, Default)]
pub struct ReceiveQueue {
    entries: VecDeque<QueueEntry>,
    next_order: u64,
}

impl ReceiveQueue {
    /// Empty queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue an arrival; returns its arrival order.
    pub fn push(&mut self, envelope: Envelope) -> u64 {
        let order = self.next_order;
        self.next_order += 1;
        self.entries.push_back(QueueEntry { envelope, order });
        order
    }

    /// Remove and return every ready entry, in arrival order.
    ///
    /// Entries that are not ready keep their relative order. A released
    /// entry is gone from the queue, so it can never be released twice.
    pub fn release(&mut self, local_tick: u64, frame_lag: u64) -> Vec<QueueEntry> {
        let mut ready = Vec::new();
        let mut waiting = VecDeque::with_capacity(self.entries.len());

        for entry in self.entries.drain(..) {
            if entry.is_ready(local_tick, frame_lag) {
                ready.push(entry);
            } else {
                waiting.push_back(entry);
            }
        }

        self.entries = waiting;
        ready
    }

    /// Entries still waiting, oldest arrival first.
    pub fn iter(&self) -> impl Iterator<Item = &QueueEntry> {
        self.entries.iter()
    }

    /// Number of waiting entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is waiting.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop everything (session teardown).
    pub fn clear(&mut self) {
        self.entries.clear();
    }
}
