//! Round-Trip Estimation
//!
//! NTP-style four-timestamp sampling. Every outgoing envelope echoes the
//! send time of the last envelope we received plus the time we received
//! it, so the peer can compute a round trip without a dedicated clock
//! channel:
//!
//! ```text
//!   us    t1 ──────────────┐                 ┌──────────── t4
//!                           \               /
//!   peer                     t2 ── hold ── t3
//!
//!   rtt = (t4 - t1) - (t3 - t2)
//! ```

use std::collections::VecDeque;

use crate::network::protocol::Envelope;

/// Four timestamps of one round trip, in milliseconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ClockSample {
    /// Originate: when we sent (our clock).
    pub t1: f64,
    /// When the peer received it (peer clock).
    pub t2: f64,
    /// When the peer replied (peer clock).
    pub t3: f64,
    /// When we received the reply (our clock).
    pub t4: f64,
}

impl ClockSample {
    /// Sample from an arriving envelope, if it echoes our timestamps.
    pub fn from_arrival(envelope: &Envelope, received_at: f64) -> Option<Self> {
        let t1 = envelope.t1?;
        // A peer that echoed t1 always echoes t2 as well; fall back to
        // its send time so the hold interval counts as zero.
        let t2 = envelope.t2.unwrap_or(envelope.t_send);
        Some(Self {
            t1,
            t2,
            t3: envelope.t_send,
            t4: received_at,
        })
    }

    /// Round-trip time, never negative.
    pub fn rtt(&self) -> f64 {
        let rtt = (self.t4 - self.t1) - (self.t3 - self.t2);
        if rtt.is_finite() {
            rtt.max(0.0)
        } else {
            0.0
        }
    }
}

/// Bounded FIFO of round-trip samples.
///
/// The very first sample ever offered is dropped: it is taken while the
/// connection is still warming up and routinely overstates the trip.
#[derive(Debug, Clone)]
pub struct RttWindow {
    samples: VecDeque<f64>,
    capacity: usize,
    seen: usize,
    half_trip: f64,
}

impl RttWindow {
    /// Window holding at most `capacity` samples (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            samples: VecDeque::with_capacity(capacity),
            capacity,
            seen: 0,
            half_trip: 0.0,
        }
    }

    /// Offer a round-trip time in milliseconds.
    ///
    /// Returns the recomputed half-trip.
    pub fn push(&mut self, rtt: f64) -> f64 {
        self.seen += 1;
        if self.seen == 1 {
            return self.half_trip;
        }

        if self.samples.len() == self.capacity {
            self.samples.pop_front();
        }
        self.samples.push_back(rtt.max(0.0));
        self.half_trip = self.average() / 2.0;
        self.half_trip
    }

    /// Mean of the retained samples (0 when empty).
    pub fn average(&self) -> f64 {
        if self.samples.is_empty() {
            return 0.0;
        }
        self.samples.iter().sum::<f64>() / self.samples.len() as f64
    }

    /// Estimated one-way delay in milliseconds.
    pub fn half_trip(&self) -> f64 {
        self.half_trip
    }

    /// Samples offered so far, including the discarded first one.
    pub fn seen(&self) -> usize {
        self.seen
    }

    /// Retained samples, oldest first.
    pub fn samples(&self) -> impl Iterator<Item = f64> + '_ {
        self.samples.iter().copied()
    }

    /// Number of retained samples.
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    /// True when no sample is retained.
    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Window capacity.
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Timestamps of the latest arrival, echoed on the next send.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ClockStamps {
    /// `tSend` of the latest arrival (peer clock).
    pub last_remote_send: Option<f64>,
    /// When it arrived (our clock).
    pub last_local_receive: Option<f64>,
}

impl ClockStamps {
    /// Record an arrival.
    pub fn record(&mut self, remote_send: f64, local_receive: f64) {
        self.last_remote_send = Some(remote_send);
        self.last_local_receive = Some(local_receive);
    }

    /// `(t1, t2)` for the next outgoing envelope.
    pub fn echo(&self) -> (Option<f64>, Option<f64>) {
        (self.last_remote_send, self.last_local_receive)
    }
}

/// Ticks the remote timeline trails ours: `ceil(half_trip / tick_duration)`.
pub fn frame_lag(half_trip_ms: f64, tick_duration_ms: f64) -> u64 {
    if !(tick_duration_ms > 0.0) || !(half_trip_ms > 0.0) || !half_trip_ms.is_finite() {
        return 0;
    }
    (half_trip_ms / tick_duration_ms).ceil() as u64
}
