//! Clock-Sync Handshake
//!
//! ```text
//!   Initiator                         Responder
//!   Idle ── Syn{seed,seeds} ────────▶ Idle → Sampling (install seeds)
//!   ProbeSent ◀──────────── SynAck ──
//!   Sampling ── Syn ────────────────▶
//!            ◀──────────── SynAck ──        (repeat until N samples)
//!   Synced ── Ack ──────────────────▶ Synced → start now
//!   start after half_trip
//! ```
//!
//! The machine is driven by arrivals and by [`Handshake::poll`]; it never
//! performs I/O itself, it returns the [`HandshakeAction`] the session
//! must carry out.

use serde::{Serialize, Deserialize};

/// Which side of the handshake this peer plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Sends the probes and the seeds (host).
    Initiator,
    /// Answers probes (guest).
    Responder,
}

/// Handshake progress.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum HandshakeState {
    /// Nothing sent or received yet.
    Idle,
    /// First probe out, no sample yet.
    ProbeSent {
        /// Probes sent so far.
        probes: u32,
        /// When the latest probe left (ms).
        sent_at: f64,
    },
    /// Collecting samples (initiator) or answering probes (responder).
    Sampling {
        /// Round-trip samples seen so far.
        samples: usize,
        /// Probes sent so far.
        probes: u32,
        /// When the latest probe left (ms).
        sent_at: f64,
    },
    /// Handshake finished.
    Synced,
    /// Gave up after too many unanswered probes.
    Failed {
        /// Probes sent before giving up.
        probes: u32,
    },
}

/// What the session must do next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandshakeAction {
    /// Nothing.
    Nothing,
    /// Send a `Syn` probe.
    SendProbe,
    /// Reply `SynAck`; `install_seeds` on the first probe.
    Reply {
        /// First probe seen: install its seeds.
        install_seeds: bool,
    },
    /// Send `Ack` and schedule the local start after half-trip.
    Complete,
    /// Start the simulation now.
    Start,
    /// Give up; the connection is unusable.
    Abort,
}

/// Handshake state machine.
#[derive(Debug, Clone)]
pub struct Handshake {
    role: Role,
    state: HandshakeState,
    samples_needed: usize,
    max_probes: u32,
    probe_timeout_ms: f64,
}

impl Handshake {
    /// New machine in `Idle`.
    pub fn new(role: Role, samples_needed: usize, max_probes: u32, probe_timeout_ms: f64) -> Self {
        Self {
            role,
            state: HandshakeState::Idle,
            samples_needed: samples_needed.max(1),
            max_probes: max_probes.max(1),
            probe_timeout_ms,
        }
    }

    /// Role of this peer.
    pub fn role(&self) -> Role {
        self.role
    }

    /// Current state.
    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// True once synced.
    pub fn is_synced(&self) -> bool {
        self.state == HandshakeState::Synced
    }

    /// True after giving up.
    pub fn is_failed(&self) -> bool {
        matches!(self.state, HandshakeState::Failed { .. })
    }

    /// Initiator: send the first probe.
    pub fn begin(&mut self, now: f64) -> HandshakeAction {
        if self.role != Role::Initiator || self.state != HandshakeState::Idle {
            return HandshakeAction::Nothing;
        }
        self.state = HandshakeState::ProbeSent { probes: 1, sent_at: now };
        HandshakeAction::SendProbe
    }

    /// A `Syn` arrived.
    pub fn on_syn(&mut self, now: f64) -> HandshakeAction {
        if self.role != Role::Responder {
            return HandshakeAction::Nothing;
        }
        match self.state {
            HandshakeState::Idle => {
                self.state = HandshakeState::Sampling { samples: 0, probes: 0, sent_at: now };
                HandshakeAction::Reply { install_seeds: true }
            }
            // Retransmitted or late probes are still answered so the
            // initiator can finish sampling.
            HandshakeState::Sampling { .. } | HandshakeState::Synced => {
                HandshakeAction::Reply { install_seeds: false }
            }
            _ => HandshakeAction::Nothing,
        }
    }

    /// A `SynAck` arrived; `samples_seen` counts every round-trip sample
    /// taken so far, including the one this reply produced.
    pub fn on_syn_ack(&mut self, samples_seen: usize, now: f64) -> HandshakeAction {
        if self.role != Role::Initiator {
            return HandshakeAction::Nothing;
        }
        let probes = match self.state {
            HandshakeState::ProbeSent { probes, .. } => probes,
            HandshakeState::Sampling { probes, .. } => probes,
            _ => return HandshakeAction::Nothing,
        };

        if samples_seen >= self.samples_needed {
            self.state = HandshakeState::Synced;
            return HandshakeAction::Complete;
        }

        if probes >= self.max_probes {
            self.state = HandshakeState::Failed { probes };
            return HandshakeAction::Abort;
        }

        self.state = HandshakeState::Sampling {
            samples: samples_seen,
            probes: probes + 1,
            sent_at: now,
        };
        HandshakeAction::SendProbe
    }

    /// An `Ack` arrived.
    pub fn on_ack(&mut self) -> HandshakeAction {
        if self.role != Role::Responder {
            return HandshakeAction::Nothing;
        }
        match self.state {
            HandshakeState::Synced | HandshakeState::Failed { .. } => HandshakeAction::Nothing,
            _ => {
                self.state = HandshakeState::Synced;
                HandshakeAction::Start
            }
        }
    }

    /// Initiator: re-send an unanswered probe, or give up.
    pub fn poll(&mut self, now: f64) -> HandshakeAction {
        if self.role != Role::Initiator {
            return HandshakeAction::Nothing;
        }
        let (probes, sent_at, samples) = match self.state {
            HandshakeState::ProbeSent { probes, sent_at } => (probes, sent_at, None),
            HandshakeState::Sampling { samples, probes, sent_at } => (probes, sent_at, Some(samples)),
            _ => return HandshakeAction::Nothing,
        };

        if now - sent_at < self.probe_timeout_ms {
            return HandshakeAction::Nothing;
        }

        if probes >= self.max_probes {
            self.state = HandshakeState::Failed { probes };
            return HandshakeAction::Abort;
        }

        self.state = match samples {
            None => HandshakeState::ProbeSent { probes: probes + 1, sent_at: now },
            Some(samples) => HandshakeState::Sampling { samples, probes: probes + 1, sent_at: now },
        };
        HandshakeAction::SendProbe
    }

    /// Force the machine into `Failed` (transport closed mid-handshake).
    pub fn fail(&mut self) {
        let probes = match self.state {
            HandshakeState::Synced | HandshakeState::Failed { .. } => return,
            HandshakeState::ProbeSent { probes, .. } | HandshakeState::Sampling { probes, .. } => probes,
            HandshakeState::Idle => 0,
        };
        self.state = HandshakeState::Failed { probes };
    }
}
