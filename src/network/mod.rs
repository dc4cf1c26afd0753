//! Network Layer
//!
//! Peer-to-peer synchronization between exactly two simulations.
//! This layer is **non-deterministic** (wall clock, arrival order); it
//! only feeds messages into the simulation at deterministic tick points.
//!
//! ## Module Structure
//!
//! - `protocol`: Envelope and message codec
//! - `rtt`: Round-trip sampling and frame lag
//! - `handshake`: Clock-sync handshake state machine
//! - `queue`: Tick-gated receive queue
//! - `reconcile`: Fast-forward of remotely spawned entities
//! - `host`: Traits the simulation implements
//! - `transport`: Outgoing channel abstraction
//! - `session`: The session tying it all together

pub mod config;
pub mod handshake;
pub mod host;
pub mod protocol;
pub mod queue;
pub mod reconcile;
pub mod rtt;
pub mod session;
pub mod transport;

pub use config::{ConfigError, SessionConfig};
pub use handshake::{Handshake, HandshakeAction, HandshakeState, Role};
pub use host::{DispatchError, EntityFactory, ObjectRegistry, SimulationHost};
pub use protocol::{
    AddObject, Chat, Envelope, EventArgs, GameEvent, Message, MessageKind, Notification,
    ProtocolError, RawCoords, RemoteOrder, Scalar, SpawnParams, SynPayload,
};
pub use queue::{QueueEntry, ReceiveQueue};
pub use reconcile::{fast_forward_ticks, spawn_remote};
pub use rtt::{frame_lag, ClockSample, ClockStamps, RttWindow};
pub use session::{ConnectionState, PeerSession, SessionError, SessionId, SessionStats};
pub use transport::{
    relay_with_delay, ChannelTransport, Datagram, LinkEndpoint, SimulatedLink, Transport,
    TransportError,
};
