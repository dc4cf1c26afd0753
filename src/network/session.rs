//! Peer Session
//!
//! One session per connection. Owns the handshake, the round-trip
//! window and the receive queue; every mutation goes through its
//! methods, all on the caller's thread:
//!
//! - [`PeerSession::on_message`] from the transport's arrival callback
//! - [`PeerSession::drain`] once per local tick, before simulating it
//! - [`PeerSession::end_tick`] once per local tick, after sending
//! - [`PeerSession::poll`] from the outer loop (probe retries, delayed start)

use tracing::{debug, info, warn};
#[cfg(feature = "debug-tracing")]
use tracing::trace;

use crate::core::clock::Clock;
use crate::core::rng::SeedBundle;
use crate::network::config::SessionConfig;
use crate::network::handshake::{Handshake, HandshakeAction, HandshakeState, Role};
use crate::network::host::{DispatchError, SimulationHost};
use crate::network::protocol::{Envelope, Message, ProtocolError, SynPayload};
use crate::network::queue::ReceiveQueue;
use crate::network::reconcile::spawn_remote;
use crate::network::rtt::{frame_lag, ClockSample, ClockStamps, RttWindow};
use crate::network::transport::{Transport, TransportError};

/// Unique session identifier.
pub type SessionId = [u8; 16];

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport usable.
    Open,
    /// Transport closed or handshake failed. Terminal.
    Closed,
}

/// Traffic counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionStats {
    /// Envelopes sent.
    pub sent: u64,
    /// Envelopes decoded successfully.
    pub received: u64,
    /// Arrivals dropped as malformed or of unknown kind.
    pub rejected: u64,
    /// Queued messages applied.
    pub applied: u64,
    /// Queued messages whose handler failed.
    pub failed: u64,
}

/// Synchronization session with the remote peer.
pub struct PeerSession<T: Transport, C: Clock> {
    id: SessionId,
    config: SessionConfig,
    transport: T,
    clock: C,
    handshake: Handshake,
    seeds: SeedBundle,
    stamps: ClockStamps,
    rtt: RttWindow,
    queue: ReceiveQueue,
    local_tick: u64,
    remote_tick: u64,
    connection: ConnectionState,
    pending_start: Option<f64>,
    failure: Option<SessionError>,
    started: bool,
    sent_this_tick: bool,
    stats: SessionStats,
}

impl<T: Transport, C: Clock> PeerSession<T, C> {
    /// Create a session.
    ///
    /// An initiator gets freshly derived seeds; override them with
    /// [`PeerSession::with_seeds`].
    pub fn new(role: Role, config: SessionConfig, transport: T, clock: C) -> Self {
        let id = uuid::Uuid::new_v4().into_bytes();

        let mut master = [0u8; 8];
        master.copy_from_slice(&uuid::Uuid::new_v4().as_bytes()[..8]);
        let seeds = SeedBundle::derive(u64::from_le_bytes(master), config.seed_streams);

        let handshake = Handshake::new(
            role,
            config.handshake_samples,
            config.max_probes,
            config.probe_timeout_ms,
        );
        let rtt = RttWindow::new(config.rtt_window);

        Self {
            id,
            config,
            transport,
            clock,
            handshake,
            seeds,
            stamps: ClockStamps::default(),
            rtt,
            queue: ReceiveQueue::new(),
            local_tick: 0,
            remote_tick: 0,
            connection: ConnectionState::Open,
            pending_start: None,
            failure: None,
            started: false,
            sent_this_tick: false,
            stats: SessionStats::default(),
        }
    }

    /// Use these seeds instead of derived ones (initiator only).
    pub fn with_seeds(mut self, seeds: SeedBundle) -> Self {
        self.seeds = seeds;
        self
    }

    // =========================================================================
    // HANDSHAKE
    // =========================================================================

    /// Initiator: install our seeds locally and send the first probe.
    pub fn connect<H>(&mut self, host: &mut H) -> Result<(), SessionError>
    where
        H: SimulationHost + ?Sized,
    {
        if self.handshake.role() != Role::Initiator {
            return Err(SessionError::InvalidState("only the initiator connects"));
        }
        self.local_tick = host.local_tick();
        let now = self.clock.now_ms();
        match self.handshake.begin(now) {
            HandshakeAction::SendProbe => {
                host.install_seeds(&self.seeds);
                info!(
                    "Session {} probing peer (seed {})",
                    hex::encode(&self.id[..4]),
                    self.seeds.seed
                );
                self.send_probe()
            }
            _ => Err(SessionError::InvalidState("handshake already started")),
        }
    }

    /// Timers: probe retransmission and the initiator's delayed start.
    ///
    /// Also notices a transport that closed underneath us, and reports a
    /// handshake that failed while handling an arrival. Each failure is
    /// returned exactly once.
    pub fn poll<H>(&mut self, host: &mut H) -> Result<(), SessionError>
    where
        H: SimulationHost + ?Sized,
    {
        if let Some(failure) = self.failure.take() {
            return Err(failure);
        }
        if self.connection == ConnectionState::Closed {
            return Ok(());
        }
        if !self.transport.is_open() {
            self.on_transport_closed(host);
            return Err(SessionError::NotConnected);
        }

        let now = self.clock.now_ms();
        match self.handshake.poll(now) {
            HandshakeAction::SendProbe => {
                debug!("Session {} re-sending unanswered probe", hex::encode(&self.id[..4]));
                self.send_probe()?;
            }
            HandshakeAction::Abort => {
                return Err(self.abort_handshake(host));
            }
            _ => {}
        }

        if let Some(start_at) = self.pending_start {
            if now >= start_at {
                self.pending_start = None;
                self.start(host);
            }
        }
        Ok(())
    }

    fn send_probe(&mut self) -> Result<(), SessionError> {
        let payload = SynPayload::from(&self.seeds);
        self.send(Message::Syn(payload))
    }

    fn abort_handshake<H>(&mut self, host: &mut H) -> SessionError
    where
        H: SimulationHost + ?Sized,
    {
        let probes = match self.handshake.state() {
            HandshakeState::Failed { probes } => probes,
            _ => 0,
        };
        warn!(
            "Session {} handshake failed after {} probes",
            hex::encode(&self.id[..4]),
            probes
        );
        self.close(host);
        SessionError::HandshakeFailed { probes }
    }

    fn start<H>(&mut self, host: &mut H)
    where
        H: SimulationHost + ?Sized,
    {
        if self.started {
            return;
        }
        self.started = true;
        info!(
            "Session {} starting simulation (half-trip {:.1} ms, frame lag {})",
            hex::encode(&self.id[..4]),
            self.half_trip(),
            self.frame_lag()
        );
        host.start();
    }

    // =========================================================================
    // RECEIVE
    // =========================================================================

    /// Arrival callback: decode, classify, handle or enqueue.
    ///
    /// Malformed and unknown messages are logged and dropped; the error is
    /// returned for the caller's information only.
    pub fn on_message<H>(&mut self, raw: &str, host: &mut H) -> Result<(), SessionError>
    where
        H: SimulationHost + ?Sized,
    {
        #[cfg(feature = "debug-tracing")]
        trace!("<- {}", raw);

        match Envelope::from_json(raw) {
            Ok(envelope) => {
                self.receive(envelope, host);
                Ok(())
            }
            Err(e) => {
                self.stats.rejected += 1;
                warn!("Session {} dropped message: {}", hex::encode(&self.id[..4]), e);
                Err(SessionError::Protocol(e))
            }
        }
    }

    /// Dispatch an already decoded envelope.
    pub fn receive<H>(&mut self, envelope: Envelope, host: &mut H)
    where
        H: SimulationHost + ?Sized,
    {
        if self.connection == ConnectionState::Closed {
            debug!("Session {} closed, ignoring {}", hex::encode(&self.id[..4]), envelope.kind().name());
            return;
        }

        let now = self.clock.now_ms();
        self.local_tick = host.local_tick();
        self.stats.received += 1;

        // Round-trip bookkeeping for every arrival
        if let Some(sample) = ClockSample::from_arrival(&envelope, now) {
            self.rtt.push(sample.rtt());
        }
        self.stamps.record(envelope.t_send, now);

        if envelope.kind().is_immediate() {
            self.handle_immediate(envelope, host, now);
        } else {
            self.remote_tick = envelope.tick;
            self.queue.push(envelope);
        }
    }

    fn handle_immediate<H>(&mut self, envelope: Envelope, host: &mut H, now: f64)
    where
        H: SimulationHost + ?Sized,
    {
        let result = match envelope.message {
            Message::Syn(payload) => match self.handshake.on_syn(now) {
                HandshakeAction::Reply { install_seeds } => {
                    if install_seeds {
                        let seeds = SeedBundle::from(&payload);
                        info!(
                            "Session {} installing seed {} ({} streams)",
                            hex::encode(&self.id[..4]),
                            seeds.seed,
                            seeds.seeds.len()
                        );
                        host.install_seeds(&seeds);
                        self.seeds = seeds;
                    }
                    self.send(Message::SynAck)
                }
                _ => {
                    debug!("Session {} ignoring Syn", hex::encode(&self.id[..4]));
                    Ok(())
                }
            },
            Message::SynAck => match self.handshake.on_syn_ack(self.rtt.seen(), now) {
                HandshakeAction::SendProbe => self.send_probe(),
                HandshakeAction::Complete => {
                    let result = self.send(Message::Ack);
                    self.pending_start = Some(now + self.half_trip());
                    info!(
                        "Session {} synced, half-trip {:.1} ms",
                        hex::encode(&self.id[..4]),
                        self.half_trip()
                    );
                    result
                }
                HandshakeAction::Abort => {
                    // Surfaced by the next poll
                    let failure = self.abort_handshake(host);
                    self.failure = Some(failure);
                    Ok(())
                }
                _ => Ok(()),
            },
            Message::Ack => {
                if self.handshake.on_ack() == HandshakeAction::Start {
                    self.start(host);
                }
                Ok(())
            }
            Message::Ping => self.send(Message::Pong),
            Message::Pong => Ok(()),
            other => {
                debug!("Deferred kind {} reached the immediate path", other.kind().name());
                Ok(())
            }
        };

        if let Err(e) = result {
            warn!("Session {} immediate handler failed: {}", hex::encode(&self.id[..4]), e);
        }
    }

    // =========================================================================
    // DRAIN
    // =========================================================================

    /// Apply every queued message the local tick has caught up with.
    ///
    /// Returns the number of messages released. Handler failures are
    /// logged and never stop the drain.
    pub fn drain<H>(&mut self, local_tick: u64, host: &mut H) -> usize
    where
        H: SimulationHost + ?Sized,
    {
        self.local_tick = local_tick;
        let lag = self.frame_lag();
        let ready = self.queue.release(local_tick, lag);
        let released = ready.len();

        for entry in ready {
            match self.apply(&entry.envelope, host, lag) {
                Ok(()) => self.stats.applied += 1,
                Err(e) => {
                    self.stats.failed += 1;
                    warn!(
                        "Session {} dropped {} from tick {}: {}",
                        hex::encode(&self.id[..4]),
                        entry.envelope.kind().name(),
                        entry.envelope.tick,
                        e
                    );
                }
            }
        }
        released
    }

    fn apply<H>(&self, envelope: &Envelope, host: &mut H, lag: u64) -> Result<(), DispatchError>
    where
        H: SimulationHost + ?Sized,
    {
        match &envelope.message {
            Message::RawCoords(coords) => host.apply_coords(coords),
            Message::RemoteOrder(order) => host.apply_order(order),
            Message::Notification(notification) => {
                host.notify(notification);
                Ok(())
            }
            Message::AddObject(add) => {
                spawn_remote(host, add, envelope.tick, self.local_tick, lag).map(|_| ())
            }
            Message::GameEvent(event) => host.apply_event(event),
            Message::Chat(chat) => {
                host.chat(&chat.text);
                Ok(())
            }
            // Never queued
            Message::Syn(_) | Message::SynAck | Message::Ack | Message::Ping | Message::Pong => Ok(()),
        }
    }

    // =========================================================================
    // SEND
    // =========================================================================

    /// Stamp and send a message. Fire and forget.
    ///
    /// While disconnected the message is dropped and
    /// [`SessionError::NotConnected`] returned.
    pub fn send(&mut self, message: Message) -> Result<(), SessionError> {
        if !self.is_connected() {
            warn!(
                "Session {} not connected, dropping {}",
                hex::encode(&self.id[..4]),
                message.kind().name()
            );
            return Err(SessionError::NotConnected);
        }

        let (t1, t2) = self.stamps.echo();
        let envelope = Envelope {
            tick: self.local_tick,
            t1,
            t2,
            t_send: self.clock.now_ms(),
            message,
        };
        let payload = envelope.to_json()?;

        #[cfg(feature = "debug-tracing")]
        trace!("-> {}", payload);

        self.transport.send(payload)?;
        self.stats.sent += 1;
        self.sent_this_tick = true;
        Ok(())
    }

    /// Send, then apply the same message locally through `local`.
    ///
    /// `local` runs even when the send fails, so a session that dropped
    /// keeps behaving like single-player.
    pub fn send_with<F>(&mut self, message: Message, local: F) -> Result<(), SessionError>
    where
        F: FnOnce(&Message),
    {
        let result = self.send(message.clone());
        local(&message);
        result
    }

    /// End of a local tick: heartbeat if nothing else went out.
    pub fn end_tick(&mut self) -> Result<(), SessionError> {
        let idle = !self.sent_this_tick;
        self.sent_this_tick = false;

        if self.config.heartbeat && idle && self.started && self.is_connected() {
            self.send(Message::Ping)?;
            self.sent_this_tick = false;
        }
        Ok(())
    }

    // =========================================================================
    // CONNECTION LOSS
    // =========================================================================

    /// The transport reported closed. The host hears about it once.
    pub fn on_transport_closed<H>(&mut self, host: &mut H)
    where
        H: SimulationHost + ?Sized,
    {
        if self.connection == ConnectionState::Closed {
            return;
        }
        warn!("Session {} connection lost", hex::encode(&self.id[..4]));
        self.close(host);
    }

    fn close<H>(&mut self, host: &mut H)
    where
        H: SimulationHost + ?Sized,
    {
        self.connection = ConnectionState::Closed;
        self.handshake.fail();
        self.pending_start = None;
        self.queue.clear();
        host.connection_lost();
    }

    // =========================================================================
    // ACCESSORS
    // =========================================================================

    /// Session identifier.
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// Handshake role.
    pub fn role(&self) -> Role {
        self.handshake.role()
    }

    /// Handshake progress.
    pub fn handshake_state(&self) -> HandshakeState {
        self.handshake.state()
    }

    /// Transport open and session not closed.
    pub fn is_connected(&self) -> bool {
        self.connection == ConnectionState::Open && self.transport.is_open()
    }

    /// True once the local simulation was started by the handshake.
    pub fn is_started(&self) -> bool {
        self.started
    }

    /// Estimated one-way delay (ms).
    pub fn half_trip(&self) -> f64 {
        self.rtt.half_trip()
    }

    /// Round-trip window.
    pub fn rtt_window(&self) -> &RttWindow {
        &self.rtt
    }

    /// Ticks the remote timeline trails ours.
    pub fn frame_lag(&self) -> u64 {
        frame_lag(self.half_trip(), self.config.tick_duration_ms)
    }

    /// Input delay to apply: `None` without an active session.
    pub fn input_lag(&self) -> Option<u64> {
        if self.is_connected() && self.handshake.is_synced() {
            Some(self.frame_lag())
        } else {
            None
        }
    }

    /// Tick of the most recent deferred arrival.
    pub fn remote_tick(&self) -> u64 {
        self.remote_tick
    }

    /// Tick of the last drain.
    pub fn local_tick(&self) -> u64 {
        self.local_tick
    }

    /// Messages waiting in the receive queue.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Receive queue, read-only.
    pub fn queue(&self) -> &ReceiveQueue {
        &self.queue
    }

    /// Seeds shared with the peer.
    pub fn seeds(&self) -> &SeedBundle {
        &self.seeds
    }

    /// Traffic counters.
    pub fn stats(&self) -> SessionStats {
        self.stats
    }

    /// Configuration in use.
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Transport, for arrival polling by the owner.
    pub fn transport(&self) -> &T {
        &self.transport
    }
}

/// Session errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum SessionError {
    /// Not connected; the message was dropped.
    #[error("Not connected")]
    NotConnected,

    /// The handshake gave up.
    #[error("Handshake failed after {probes} probes")]
    HandshakeFailed {
        /// Probes sent.
        probes: u32,
    },

    /// Operation not valid in the current state.
    #[error("Invalid session state: {0}")]
    InvalidState(&'static str),

    /// Transport error.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Protocol error.
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::core::vec2::Vec2;
    use crate::game::entity::{Controller, Entity, EntityState};
    use crate::game::world::SimWorld;
    use crate::network::protocol::{
        AddObject, Chat, EventArgs, GameEvent, RawCoords, Scalar, SpawnParams,
    };
    use crate::network::transport::{LinkEndpoint, SimulatedLink};

    type TestSession = PeerSession<LinkEndpoint, ManualClock>;

    struct Peer {
        session: TestSession,
        world: SimWorld,
    }

    impl Peer {
        fn new(role: Role, endpoint: LinkEndpoint, clock: &ManualClock) -> Self {
            Self::with_config(role, SessionConfig::default(), endpoint, clock)
        }

        fn with_config(role: Role, config: SessionConfig, endpoint: LinkEndpoint, clock: &ManualClock) -> Self {
            let world = SimWorld::new(config.input_ring_capacity);
            Self {
                session: PeerSession::new(role, config, endpoint, clock.clone()),
                world,
            }
        }

        fn pump(&mut self) {
            for raw in self.session.transport().take_arrivals() {
                let _ = self.session.on_message(&raw, &mut self.world);
            }
            self.session.poll(&mut self.world).unwrap();
        }
    }

    fn pair(delay_ms: f64) -> (ManualClock, Peer, Peer) {
        let clock = ManualClock::new(1_000.0);
        let (a, b) = SimulatedLink::pair(&clock, delay_ms);
        let host = Peer::new(Role::Initiator, a, &clock);
        let guest = Peer::new(Role::Responder, b, &clock);
        (clock, host, guest)
    }

    fn seeded_pair(delay_ms: f64, seeds: SeedBundle) -> (ManualClock, Peer, Peer) {
        let clock = ManualClock::new(1_000.0);
        let (a, b) = SimulatedLink::pair(&clock, delay_ms);
        let mut host = Peer::new(Role::Initiator, a.clone(), &clock);
        host.session = PeerSession::new(Role::Initiator, SessionConfig::default(), a, clock.clone())
            .with_seeds(seeds);
        let guest = Peer::new(Role::Responder, b, &clock);
        (clock, host, guest)
    }

    fn handshake(clock: &ManualClock, host: &mut Peer, guest: &mut Peer) -> (f64, f64) {
        host.session.connect(&mut host.world).unwrap();

        let mut guest_started = None;
        let mut host_started = None;
        for _ in 0..20_000 {
            clock.advance(1.0);
            guest.pump();
            host.pump();
            if guest_started.is_none() && guest.world.is_running() {
                guest_started = Some(clock.now_ms());
            }
            if host_started.is_none() && host.world.is_running() {
                host_started = Some(clock.now_ms());
            }
            if guest_started.is_some() && host_started.is_some() {
                break;
            }
        }
        (host_started.unwrap(), guest_started.unwrap())
    }

    fn envelope(tick: u64, message: Message) -> Envelope {
        Envelope { tick, t1: None, t2: None, t_send: 0.0, message }
    }

    fn synced_guest() -> (ManualClock, Peer, Peer) {
        let (clock, mut host, mut guest) = pair(20.0);
        handshake(&clock, &mut host, &mut guest);
        (clock, host, guest)
    }

    #[test]
    fn test_end_to_end_handshake() {
        let (clock, mut host, mut guest) = seeded_pair(30.0, SeedBundle::derive(42, 3));
        let (host_start, guest_start) = handshake(&clock, &mut host, &mut guest);

        // Guest got seed 42
        assert_eq!(guest.world.seeds().unwrap().seed, 42);
        assert_eq!(guest.session.seeds(), host.session.seeds());

        // Half-trip converges on the one-way delay
        assert!((host.session.half_trip() - 30.0).abs() <= 1.0);
        assert!(host.session.handshake_state() == HandshakeState::Synced);
        assert!(guest.session.handshake_state() == HandshakeState::Synced);

        // Both simulations start at (nearly) the same wall-clock moment
        assert!((host_start - guest_start).abs() <= 1.0);

        // Non-networked randomness is identical
        for _ in 0..100 {
            assert_eq!(host.world.rng_mut().next_u64(), guest.world.rng_mut().next_u64());
        }
        for stream in 0..3 {
            assert_eq!(
                host.world.stream_mut(stream).unwrap().next_u64(),
                guest.world.stream_mut(stream).unwrap().next_u64()
            );
        }
    }

    #[test]
    fn test_slow_link_handshake_completes() {
        // Round trip (2200 ms) longer than the Syn resend timeout (2000 ms)
        let (clock, mut host, mut guest) = pair(1_100.0);
        let (host_start, guest_start) = handshake(&clock, &mut host, &mut guest);

        assert_eq!(host.session.handshake_state(), HandshakeState::Synced);
        assert_eq!(guest.session.handshake_state(), HandshakeState::Synced);
        assert!((host.session.half_trip() - 1_100.0).abs() <= 1.0);
        assert!((host_start - guest_start).abs() <= 1.0);
        assert_eq!(host.world.connection_losses, 0);
    }

    #[test]
    fn test_slow_link_tight_budget_reports_failure_once() {
        let clock = ManualClock::new(0.0);
        let (a, b) = SimulatedLink::pair(&clock, 1_100.0);
        let config = SessionConfig {
            max_probes: 5,
            ..Default::default()
        };
        let mut host = Peer::with_config(Role::Initiator, config, a, &clock);
        let mut guest = Peer::new(Role::Responder, b, &clock);

        host.session.connect(&mut host.world).unwrap();
        let mut errors = Vec::new();
        for _ in 0..20_000 {
            clock.advance(1.0);
            guest.pump();
            for raw in host.session.transport().take_arrivals() {
                let _ = host.session.on_message(&raw, &mut host.world);
            }
            if let Err(e) = host.session.poll(&mut host.world) {
                errors.push(e);
            }
        }

        assert_eq!(errors, vec![SessionError::HandshakeFailed { probes: 5 }]);
        assert_eq!(host.session.handshake_state(), HandshakeState::Failed { probes: 5 });
        assert!(!host.session.is_connected());
        assert!(!host.world.is_running());
        assert_eq!(host.world.connection_losses, 1);
    }

    #[test]
    fn test_replies_carry_host_tick() {
        let clock = ManualClock::new(0.0);
        let (endpoint, peer) = SimulatedLink::pair(&clock, 5.0);
        let mut session: TestSession =
            PeerSession::new(Role::Responder, SessionConfig::default(), endpoint, clock.clone());
        let mut world = SimWorld::new(8);
        world.start();
        for _ in 0..7 {
            world.advance();
        }

        session.receive(envelope(3, Message::Ping), &mut world);
        clock.advance(5.0);

        let arrivals = peer.take_arrivals();
        assert_eq!(arrivals.len(), 1);
        let pong = Envelope::from_json(&arrivals[0]).unwrap();
        assert_eq!(pong.message, Message::Pong);
        assert_eq!(pong.tick, 7);
    }

    #[test]
    fn test_handshake_uses_five_probes() {
        let (clock, mut host, mut guest) = pair(10.0);
        handshake(&clock, &mut host, &mut guest);

        assert_eq!(host.session.rtt_window().seen(), 5);
        assert_eq!(host.session.rtt_window().len(), 4);
        assert_eq!(guest.session.stats().sent, 5);
    }

    #[test]
    fn test_immediate_kinds_bypass_queue() {
        let clock = ManualClock::new(0.0);
        let (endpoint, _peer) = SimulatedLink::pair(&clock, 5.0);
        let mut session: TestSession =
            PeerSession::new(Role::Responder, SessionConfig::default(), endpoint, clock.clone());
        let mut world = SimWorld::new(8);

        session.receive(envelope(10, Message::Syn(SynPayload { seed: 1, seeds: vec![] })), &mut world);
        session.receive(envelope(10, Message::SynAck), &mut world);
        session.receive(envelope(10, Message::Ack), &mut world);
        session.receive(envelope(10, Message::Ping), &mut world);
        session.receive(envelope(10, Message::Pong), &mut world);
        session.receive(envelope(10, Message::RawCoords(RawCoords::position("p2", 1.0, 2.0))), &mut world);

        assert_eq!(session.queue_len(), 1);
        assert!(matches!(
            session.queue().iter().next().unwrap().envelope.message,
            Message::RawCoords(_)
        ));
        assert_eq!(session.remote_tick(), 10);
        assert!(world.is_running());
    }

    #[test]
    fn test_malformed_and_unknown_dropped() {
        let (_clock, _host, mut guest) = synced_guest();
        let before = guest.session.queue_len();

        let err = guest.session.on_message("{\"tick\": 3}", &mut guest.world).unwrap_err();
        assert!(matches!(err, SessionError::Protocol(ProtocolError::Malformed(_))));

        let err = guest
            .session
            .on_message(r#"{"type":"Warp","tick":3,"tSend":1.0}"#, &mut guest.world)
            .unwrap_err();
        assert!(matches!(err, SessionError::Protocol(ProtocolError::UnknownKind(_))));

        assert_eq!(guest.session.queue_len(), before);
        assert_eq!(guest.session.stats().rejected, 2);
    }

    #[test]
    fn test_drain_applies_in_order_and_gates() {
        let (_clock, _host, mut guest) = synced_guest();
        let lag = guest.session.frame_lag();
        guest.world.insert(Entity::new("p2", "ship", EntityState::default(), Controller::Remote));

        for (tick, text) in [(10, "a"), (12, "b"), (12, "c")] {
            guest.session.receive(
                envelope(tick, Message::Chat(Chat { text: text.to_string() })),
                &mut guest.world,
            );
        }

        assert_eq!(guest.session.drain(10 - lag - 1, &mut guest.world), 0);
        assert_eq!(guest.session.drain(10 - lag, &mut guest.world), 1);
        assert_eq!(guest.session.drain(12 - lag, &mut guest.world), 2);
        assert_eq!(guest.session.drain(100, &mut guest.world), 0);
        assert_eq!(guest.world.chat_log, vec!["a", "b", "c"]);
    }

    #[test]
    fn test_dangling_event_does_not_stop_drain() {
        let (_clock, _host, mut guest) = synced_guest();
        guest.world.insert(Entity::new("p2", "ship", EntityState::default(), Controller::Remote));

        guest.session.receive(
            envelope(1, Message::GameEvent(GameEvent::new("nobody", "damage", EventArgs::Scalar(Scalar::Number(1.0))))),
            &mut guest.world,
        );
        guest.session.receive(
            envelope(1, Message::GameEvent(GameEvent::new("p2", "damage", EventArgs::Scalar(Scalar::Number(10.0))))),
            &mut guest.world,
        );
        guest.session.receive(envelope(50, Message::Chat(Chat { text: "later".to_string() })), &mut guest.world);

        assert_eq!(guest.session.drain(5, &mut guest.world), 2);
        assert_eq!(guest.session.stats().failed, 1);
        assert_eq!(guest.world.get("p2").unwrap().health, 90.0);
        // The unrelated entry is still waiting
        assert_eq!(guest.session.queue_len(), 1);
    }

    #[test]
    fn test_add_object_is_fast_forwarded() {
        let (_clock, _host, mut guest) = synced_guest();
        let lag = guest.session.frame_lag();
        assert!(lag >= 1);

        guest.world.insert(Entity::new(
            "p2",
            "ship",
            EntityState::new(Vec2::new(50.0, 0.0), Vec2::new(1.0, 0.0)),
            Controller::Remote,
        ));

        let add = AddObject {
            object_type: "missile".to_string(),
            params: SpawnParams {
                id: Some("m-7".to_string()),
                parent: Some("p2".to_string()),
                ..Default::default()
            },
        };
        guest.session.receive(envelope(20, Message::AddObject(add)), &mut guest.world);
        guest.session.drain(20 + lag, &mut guest.world);

        let missile = guest.world.get("m-7").unwrap();
        assert!(missile.visible);
        assert_eq!(missile.state.position, Vec2::new(50.0 + lag as f64, 0.0));
    }

    #[test]
    fn test_clock_fields_stamped_for_receiver() {
        let (clock, mut host, mut guest) = synced_guest();
        clock.advance(5.0);
        host.session.send(Message::Chat(Chat { text: "hi".to_string() })).unwrap();

        clock.advance(20.0);
        let arrivals = guest.session.transport().take_arrivals();
        assert_eq!(arrivals.len(), 1);
        let envelope = Envelope::from_json(&arrivals[0]).unwrap();
        assert!(envelope.t1.is_some());
        assert!(envelope.t2.is_some());

        let before = guest.session.rtt_window().seen();
        guest.session.on_message(&arrivals[0], &mut guest.world).unwrap();
        assert_eq!(guest.session.rtt_window().seen(), before + 1);
        assert_eq!(guest.session.queue_len(), 1);
    }

    #[test]
    fn test_heartbeat_only_on_idle_ticks() {
        let (clock, mut host, mut guest) = synced_guest();
        let sent = host.session.stats().sent;

        host.session.send(Message::Chat(Chat { text: "x".to_string() })).unwrap();
        host.session.end_tick().unwrap();
        assert_eq!(host.session.stats().sent, sent + 1);

        host.session.end_tick().unwrap();
        assert_eq!(host.session.stats().sent, sent + 2);

        // Ping is answered with Pong and neither is queued
        clock.advance(25.0);
        guest.pump();
        assert_eq!(guest.session.queue_len(), 1);
        clock.advance(25.0);
        host.pump();
        assert_eq!(host.session.queue_len(), 0);
    }

    #[test]
    fn test_send_while_disconnected() {
        let (_clock, mut host, mut guest) = synced_guest();
        host.session.transport().close();

        let mut applied = Vec::new();
        let result = host.session.send_with(
            Message::Chat(Chat { text: "anyone?".to_string() }),
            |m| applied.push(m.clone()),
        );
        assert_eq!(result, Err(SessionError::NotConnected));
        assert_eq!(applied.len(), 1);
        assert_eq!(host.session.input_lag(), None);

        // Loss is surfaced once
        assert_eq!(host.session.poll(&mut host.world), Err(SessionError::NotConnected));
        assert_eq!(host.session.poll(&mut host.world), Ok(()));
        host.session.on_transport_closed(&mut host.world);
        assert_eq!(host.world.connection_losses, 1);

        guest.session.on_transport_closed(&mut guest.world);
        assert_eq!(guest.world.connection_losses, 1);
    }

    #[test]
    fn test_handshake_gives_up_without_peer() {
        let clock = ManualClock::new(0.0);
        let (endpoint, _silent) = SimulatedLink::pair(&clock, 10.0);
        let config = SessionConfig {
            probe_timeout_ms: 100.0,
            max_probes: 5,
            ..Default::default()
        };
        let mut session: TestSession = PeerSession::new(Role::Initiator, config, endpoint, clock.clone());
        let mut world = SimWorld::new(8);

        session.connect(&mut world).unwrap();
        let mut outcome = Ok(());
        for _ in 0..10 {
            clock.advance(100.0);
            outcome = session.poll(&mut world);
            if outcome.is_err() {
                break;
            }
        }

        assert_eq!(outcome, Err(SessionError::HandshakeFailed { probes: 5 }));
        assert!(!session.is_connected());
        assert_eq!(world.connection_losses, 1);
        assert!(!world.is_running());
    }

    #[test]
    fn test_responder_cannot_connect() {
        let clock = ManualClock::new(0.0);
        let (endpoint, _other) = SimulatedLink::pair(&clock, 10.0);
        let mut session: TestSession =
            PeerSession::new(Role::Responder, SessionConfig::default(), endpoint, clock);
        let mut world = SimWorld::new(8);
        assert!(matches!(session.connect(&mut world), Err(SessionError::InvalidState(_))));
    }

    #[test]
    fn test_input_lag_follows_session() {
        let (_clock, host, _guest) = synced_guest();
        assert_eq!(host.session.input_lag(), Some(host.session.frame_lag()));

        let clock = ManualClock::new(0.0);
        let (endpoint, _other) = SimulatedLink::pair(&clock, 10.0);
        let fresh: TestSession = PeerSession::new(Role::Initiator, SessionConfig::default(), endpoint, clock);
        assert_eq!(fresh.input_lag(), None);
    }
}
