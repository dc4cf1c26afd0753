//! Peer Lockstep Demo
//!
//! Runs a host and a guest in one process, connected through channels
//! with artificial latency, and checks that both simulations stayed in
//! lockstep.
//!
//! Usage: `peer-lockstep-demo [config.json]`

use std::time::Duration;

use anyhow::{bail, Context};
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use peer_lockstep::{
    game::{Controller, Entity, EntityState, InputSample},
    network::{
        relay_with_delay, reconcile::spawn_remote, AddObject, ChannelTransport, RawCoords,
        SessionStats, SpawnParams,
    },
    Message, PeerSession, Role, SeedBundle, SessionConfig, SimWorld, SystemClock, Vec2, VERSION,
};

/// One-way latency added by the relays.
const LATENCY: Duration = Duration::from_millis(40);

/// Ticks each peer simulates after the handshake.
const DEMO_TICKS: u64 = 300;

/// Master seed the host shares.
const DEMO_SEED: u64 = 0x5EED_CAFE;

type DemoSession = PeerSession<ChannelTransport, SystemClock>;

/// What one peer saw.
struct PeerReport {
    name: &'static str,
    ticks: u64,
    draws: Vec<u64>,
    half_trip: f64,
    frame_lag: u64,
    entities: usize,
    stats: SessionStats,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Peer Lockstep Demo v{}", VERSION);

    let config = match std::env::args().nth(1) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {}", path))?;
            SessionConfig::from_json(&raw)?
        }
        None => SessionConfig::default(),
    };
    config.validate()?;
    info!(
        "Tick {:.2} ms, latency {} ms, {} ticks",
        config.tick_duration_ms,
        LATENCY.as_millis(),
        DEMO_TICKS
    );

    // Wire: host -> relay -> guest and back
    let (host_transport, host_out) = ChannelTransport::channel();
    let (guest_transport, guest_out) = ChannelTransport::channel();
    let (to_guest, guest_in) = mpsc::unbounded_channel();
    let (to_host, host_in) = mpsc::unbounded_channel();
    tokio::spawn(relay_with_delay(host_out, to_guest, LATENCY));
    tokio::spawn(relay_with_delay(guest_out, to_host, LATENCY));

    let seeds = SeedBundle::derive(DEMO_SEED, config.seed_streams);
    let host = PeerSession::new(Role::Initiator, config.clone(), host_transport, SystemClock::new())
        .with_seeds(seeds);
    let guest = PeerSession::new(Role::Responder, config, guest_transport, SystemClock::new());

    let host_task = tokio::spawn(run_peer("host", host, host_in));
    let guest_task = tokio::spawn(run_peer("guest", guest, guest_in));
    let (host_report, guest_report) = tokio::try_join!(host_task, guest_task)?;
    let (host_report, guest_report) = (host_report?, guest_report?);

    for report in [&host_report, &guest_report] {
        info!(
            "{}: {} ticks, half-trip {:.1} ms, frame lag {}, {} entities, {} sent, {} applied, {} failed",
            report.name,
            report.ticks,
            report.half_trip,
            report.frame_lag,
            report.entities,
            report.stats.sent,
            report.stats.applied,
            report.stats.failed
        );
    }

    // A peer may stop a tick early when the other hangs up first
    let common = host_report.draws.len().min(guest_report.draws.len());
    if host_report.draws[..common] != guest_report.draws[..common] {
        bail!("Simulations diverged: random draws differ");
    }
    info!("Lockstep held: {} identical random draws", common);

    Ok(())
}

fn ship_id(role: Role) -> &'static str {
    match role {
        Role::Initiator => "host-ship",
        Role::Responder => "guest-ship",
    }
}

fn other(role: Role) -> Role {
    match role {
        Role::Initiator => Role::Responder,
        Role::Responder => Role::Initiator,
    }
}

/// Pointer path: each player circles a different centre.
fn pointer(role: Role, tick: u64) -> InputSample {
    let t = tick as f64 * 0.05;
    let centre = match role {
        Role::Initiator => Vec2::new(200.0, 300.0),
        Role::Responder => Vec2::new(600.0, 300.0),
    };
    InputSample::new(centre.x + 80.0 * t.cos(), centre.y + 80.0 * t.sin())
}

async fn run_peer(
    name: &'static str,
    mut session: DemoSession,
    mut inbound: mpsc::UnboundedReceiver<String>,
) -> anyhow::Result<PeerReport> {
    let role = session.role();
    let me = ship_id(role);
    let them = ship_id(other(role));

    let mut world = SimWorld::new(session.config().input_ring_capacity);
    world.insert(Entity::new(me, "ship", EntityState::default(), Controller::Local));
    world.insert(Entity::new(them, "ship", EntityState::default(), Controller::Remote));

    if role == Role::Initiator {
        session.connect(&mut world)?;
    }

    let mut interval =
        tokio::time::interval(Duration::from_secs_f64(session.config().tick_duration_ms / 1000.0));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let mut draws = Vec::with_capacity(DEMO_TICKS as usize);

    loop {
        tokio::select! {
            arrival = inbound.recv() => match arrival {
                // Bad arrivals are logged by the session
                Some(raw) => {
                    let _ = session.on_message(&raw, &mut world);
                }
                None if world.is_running() => {
                    warn!("{} stopping: peer hung up", name);
                    break;
                }
                None => bail!("{} lost the peer before the simulation started", name),
            },
            _ = interval.tick() => {
                if let Err(e) = session.poll(&mut world) {
                    if world.is_running() {
                        warn!("{} stopping: {}", name, e);
                        break;
                    }
                    return Err(e.into());
                }
                if !session.is_connected() {
                    if world.is_running() {
                        warn!("{} stopping: connection closed", name);
                        break;
                    }
                    bail!("{} disconnected before the simulation started", name);
                }
                if !world.is_running() {
                    continue;
                }

                let tick = world.tick();
                session.drain(tick, &mut world);

                world.record_input(me, pointer(role, tick));
                if let Some(sample) = world.apply_local_input(me, session.input_lag()) {
                    let coords = RawCoords::position(me, sample.x, sample.y);
                    if let Err(e) = session.send(Message::RawCoords(coords)) {
                        warn!("{} could not send coords: {}", name, e);
                    }
                }

                if role == Role::Initiator && tick % 60 == 30 {
                    let add = AddObject {
                        object_type: "missile".to_string(),
                        params: SpawnParams {
                            id: Some(format!("missile-{}", tick)),
                            parent: Some(me.to_string()),
                            target: Some(them.to_string()),
                            speed: Some(6.0),
                            ..Default::default()
                        },
                    };
                    let sent = session.send_with(Message::AddObject(add), |message| {
                        if let Message::AddObject(add) = message {
                            if let Err(e) = spawn_remote(&mut world, add, tick, tick, 0) {
                                warn!("{} local spawn failed: {}", name, e);
                            }
                        }
                    });
                    if let Err(e) = sent {
                        warn!("{} could not send spawn: {}", name, e);
                    }
                }

                draws.push(world.rng_mut().next_u64());
                world.advance();
                if let Err(e) = session.end_tick() {
                    warn!("{} stopping: {}", name, e);
                    break;
                }

                if world.tick() >= DEMO_TICKS {
                    break;
                }
            }
        }
    }

    Ok(PeerReport {
        name,
        ticks: world.tick(),
        draws,
        half_trip: session.half_trip(),
        frame_lag: session.frame_lag(),
        entities: world.entity_count(),
        stats: session.stats(),
    })
}
