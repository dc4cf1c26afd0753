//! Transports
//!
//! The session only needs a fire-and-forget `send` and an open/closed
//! flag; arrivals are pushed into [`PeerSession::on_message`] by whoever
//! owns the receiving side.
//!
//! [`PeerSession::on_message`]: crate::network::session::PeerSession::on_message

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::core::clock::{Clock, ManualClock};

/// Outgoing half of a bidirectional channel.
pub trait Transport {
    /// Send one encoded envelope. Never blocks.
    fn send(&mut self, payload: String) -> Result<(), TransportError>;

    /// Whether the channel is still usable.
    fn is_open(&self) -> bool;
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum TransportError {
    /// The channel has been closed.
    #[error("Transport closed")]
    Closed,

    /// The payload could not be handed to the channel.
    #[error("Send failed: {0}")]
    Send(String),
}

// =============================================================================
// SIMULATED LINK
// =============================================================================

#[derive(Debug, Default)]
struct Wire {
    in_flight: VecDeque<(f64, String)>,
}

#[derive(Debug)]
struct LinkShared {
    open: bool,
}

/// One end of an in-process link with a fixed one-way delay.
///
/// Delivery time is measured on a shared [`ManualClock`], which makes
/// handshake and gating tests exact and repeatable.
#[derive(Debug, Clone)]
pub struct LinkEndpoint {
    outbound: Rc<RefCell<Wire>>,
    inbound: Rc<RefCell<Wire>>,
    shared: Rc<RefCell<LinkShared>>,
    clock: ManualClock,
    delay_ms: f64,
}

/// Factory for linked endpoint pairs.
pub struct SimulatedLink;

impl SimulatedLink {
    /// Two connected endpoints with `delay_ms` one-way delay each way.
    pub fn pair(clock: &ManualClock, delay_ms: f64) -> (LinkEndpoint, LinkEndpoint) {
        let a_to_b = Rc::new(RefCell::new(Wire::default()));
        let b_to_a = Rc::new(RefCell::new(Wire::default()));
        let shared = Rc::new(RefCell::new(LinkShared { open: true }));

        let a = LinkEndpoint {
            outbound: a_to_b.clone(),
            inbound: b_to_a.clone(),
            shared: shared.clone(),
            clock: clock.clone(),
            delay_ms,
        };
        let b = LinkEndpoint {
            outbound: b_to_a,
            inbound: a_to_b,
            shared,
            clock: clock.clone(),
            delay_ms,
        };
        (a, b)
    }
}

impl LinkEndpoint {
    /// Payloads whose delivery time has come, in send order.
    pub fn take_arrivals(&self) -> Vec<String> {
        let now = self.clock.now_ms();
        let mut wire = self.inbound.borrow_mut();
        let mut arrived = Vec::new();
        while let Some((deliver_at, _)) = wire.in_flight.front() {
            if *deliver_at > now {
                break;
            }
            if let Some((_, payload)) = wire.in_flight.pop_front() {
                arrived.push(payload);
            }
        }
        arrived
    }

    /// Messages still travelling towards this endpoint.
    pub fn pending(&self) -> usize {
        self.inbound.borrow().in_flight.len()
    }

    /// Close both directions.
    pub fn close(&self) {
        self.shared.borrow_mut().open = false;
    }
}

impl Transport for LinkEndpoint {
    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        if !self.is_open() {
            return Err(TransportError::Closed);
        }
        let deliver_at = self.clock.now_ms() + self.delay_ms;
        self.outbound.borrow_mut().in_flight.push_back((deliver_at, payload));
        Ok(())
    }

    fn is_open(&self) -> bool {
        self.shared.borrow().open
    }
}

// =============================================================================
// CHANNEL TRANSPORT
// =============================================================================

/// Payload stamped with its send instant, so a relay can add latency
/// without reordering.
#[derive(Debug, Clone)]
pub struct Datagram {
    /// When the payload was handed to the transport.
    pub sent_at: Instant,
    /// Encoded envelope.
    pub payload: String,
}

/// Transport over an unbounded tokio channel.
#[derive(Debug, Clone)]
pub struct ChannelTransport {
    tx: mpsc::UnboundedSender<Datagram>,
}

impl ChannelTransport {
    /// Transport and the receiver its datagrams come out of.
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<Datagram>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl Transport for ChannelTransport {
    fn send(&mut self, payload: String) -> Result<(), TransportError> {
        self.tx
            .send(Datagram { sent_at: Instant::now(), payload })
            .map_err(|_| TransportError::Closed)
    }

    fn is_open(&self) -> bool {
        !self.tx.is_closed()
    }
}

/// Forward datagrams from `rx` to `tx`, each delivered `delay` after it
/// was sent. Ends when either side closes.
pub async fn relay_with_delay(
    mut rx: mpsc::UnboundedReceiver<Datagram>,
    tx: mpsc::UnboundedSender<String>,
    delay: Duration,
) {
    while let Some(datagram) = rx.recv().await {
        let deliver_at = tokio::time::Instant::from_std(datagram.sent_at + delay);
        tokio::time::sleep_until(deliver_at).await;
        if tx.send(datagram.payload).is_err() {
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_link_delivers_after_delay() {
        let clock = ManualClock::new(0.0);
        let (mut a, b) = SimulatedLink::pair(&clock, 30.0);

        a.send("one".to_string()).unwrap();
        clock.advance(10.0);
        a.send("two".to_string()).unwrap();

        clock.advance(19.0);
        assert!(b.take_arrivals().is_empty());

        clock.advance(1.0);
        assert_eq!(b.take_arrivals(), vec!["one".to_string()]);
        assert_eq!(b.pending(), 1);

        clock.advance(10.0);
        assert_eq!(b.take_arrivals(), vec!["two".to_string()]);
        assert!(a.take_arrivals().is_empty());
    }

    #[test]
    fn test_link_close_is_shared() {
        let clock = ManualClock::new(0.0);
        let (mut a, b) = SimulatedLink::pair(&clock, 5.0);

        b.close();
        assert!(!a.is_open());
        assert_eq!(a.send("x".to_string()), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_channel_transport_send_and_close() {
        let (mut transport, mut rx) = ChannelTransport::channel();
        assert!(transport.is_open());

        transport.send("hello".to_string()).unwrap();
        let datagram = rx.recv().await.unwrap();
        assert_eq!(datagram.payload, "hello");

        drop(rx);
        assert!(!transport.is_open());
        assert_eq!(transport.send("late".to_string()), Err(TransportError::Closed));
    }

    #[tokio::test]
    async fn test_relay_preserves_order() {
        let (mut transport, rx) = ChannelTransport::channel();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel();
        let relay = tokio::spawn(relay_with_delay(rx, out_tx, Duration::from_millis(5)));

        for i in 0..3 {
            transport.send(format!("m{}", i)).unwrap();
        }
        drop(transport);

        let mut received = Vec::new();
        while let Some(payload) = out_rx.recv().await {
            received.push(payload);
        }
        assert_eq!(received, vec!["m0", "m1", "m2"]);
        relay.await.unwrap();
    }
}
