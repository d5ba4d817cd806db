//! Authoritative simulation
//!
//! Applies inbound packets to the session registry, integrates movement against
//! the shared [`World`], and produces the datagrams to send back. Nothing here
//! touches a socket, so the whole state machine is testable in isolation:
//!
//! `Unknown -> Active` on the first ping or move, `Active -> Active` on every
//! further packet (address refreshed), `Active -> Removed` on leave or timeout.

use crate::persistence::Persistence;
use crate::session_manager::SessionManager;
use log::{debug, info, warn};
use shared::protocol::{self, AllPlayersPayload, Packet, Payload, StatePayload};
use shared::{integrate_move, timestamp_nanos, PlayerState, World, PENDING_INPUT_CAPACITY};
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// How far behind the newest integrated sequence a move may arrive and still
/// count as reordered. Anything further back means the client restarted its
/// sequence counter.
const REORDER_WINDOW: u32 = PENDING_INPUT_CAPACITY as u32;

/// A packet addressed to one peer
#[derive(Debug, Clone, PartialEq)]
pub struct Outgoing {
    pub addr: SocketAddr,
    pub packet: Packet,
}

pub struct Simulation {
    world: World,
    sessions: SessionManager,
    persistence: Box<dyn Persistence>,
    session_timeout: Duration,
    broadcast_sequence: u32,
}

impl Simulation {
    pub fn new(
        world: World,
        sessions: SessionManager,
        persistence: Box<dyn Persistence>,
        session_timeout: Duration,
    ) -> Self {
        Self {
            world,
            sessions,
            persistence,
            session_timeout,
            broadcast_sequence: 0,
        }
    }

    pub fn world(&self) -> &World {
        &self.world
    }

    pub fn sessions(&self) -> &SessionManager {
        &self.sessions
    }

    pub fn position(&self, session_id: u32) -> Option<PlayerState> {
        self.sessions.get(session_id).map(|session| session.state)
    }

    /// Decodes and applies one datagram. Undecodable input changes nothing and gets no reply.
    pub fn handle_datagram(&mut self, bytes: &[u8], addr: SocketAddr, now: Instant) -> Vec<Outgoing> {
        match protocol::decode(bytes) {
            Ok(packet) => self.handle_packet(packet, addr, now),
            Err(e) => {
                warn!("Dropping malformed packet from {}: {}", addr, e);
                Vec::new()
            }
        }
    }

    /// Applies one decoded packet and returns the replies to send
    pub fn handle_packet(&mut self, packet: Packet, addr: SocketAddr, now: Instant) -> Vec<Outgoing> {
        let session_id = packet.header.session_id;
        let sequence = packet.header.sequence;

        let command = match packet.payload {
            Payload::Ping(_) => None,
            Payload::Move(command) => Some(command),
            Payload::Leave(leave) => {
                if let Some(session) = self.sessions.remove(session_id) {
                    info!("Session {} left (reason {})", session_id, leave.reason);
                    self.persistence.queue_persist(session_id, session.state);
                }
                return Vec::new();
            }
            Payload::StateUpdate(_) | Payload::AllPlayersState(_) => {
                warn!(
                    "Unexpected {:?} packet from {}",
                    packet.header.msg_type, addr
                );
                return Vec::new();
            }
        };

        let mut outgoing = Vec::new();

        let created = !self.sessions.contains(session_id);
        if created {
            let restored = self
                .persistence
                .load_player_state(session_id)
                .map(|state| {
                    let (x, y) = self.world.clamp(state.x, state.y);
                    PlayerState::new(x, y)
                })
                .unwrap_or_default();

            if self.sessions.create(session_id, addr, restored, now).is_none() {
                warn!(
                    "Session limit {} reached, dropping packet from session {}",
                    self.sessions.max_sessions(),
                    session_id
                );
                return outgoing;
            }
        }

        let Some(session) = self.sessions.get_mut(session_id) else {
            return outgoing;
        };

        if session.touch(addr, now) {
            debug!("Session {} moved to {}", session_id, addr);
        }

        match command {
            Some(command) => {
                let behind = session.last_sequence.wrapping_sub(sequence);
                if sequence > session.last_sequence || behind >= REORDER_WINDOW {
                    if sequence <= session.last_sequence {
                        info!(
                            "Session {} restarted its sequence at {} (last {})",
                            session_id, sequence, session.last_sequence
                        );
                    }
                    session.state = integrate_move(&self.world, session.state, &command);
                    session.last_sequence = sequence;
                } else {
                    debug!(
                        "Ignoring stale move {} from session {} (last {})",
                        sequence, session_id, session.last_sequence
                    );
                }
            }
            // A ping carrying sequence 0 comes from a client that has not sent a move yet.
            None if sequence == 0 && session.last_sequence != 0 => {
                info!(
                    "Session {} restarted (last sequence {})",
                    session_id, session.last_sequence
                );
                session.last_sequence = 0;
            }
            None => {}
        }

        let ack = session.last_sequence;

        if created {
            let state = session.state;
            outgoing.push(Outgoing {
                addr,
                packet: Packet::new(
                    session_id,
                    self.next_broadcast_sequence(),
                    ack,
                    Payload::StateUpdate(StatePayload {
                        x: state.x,
                        y: state.y,
                        timestamp_ns: timestamp_nanos(),
                    }),
                ),
            });
        }

        outgoing.extend(self.broadcast(session_id, ack));
        outgoing
    }

    /// Builds one `all_players_state` packet and addresses a copy to every session.
    ///
    /// The header names the triggering session and carries its ack; other
    /// recipients use that to skip reconciliation of their own entry.
    fn broadcast(&mut self, trigger: u32, ack: u32) -> Vec<Outgoing> {
        let payload = AllPlayersPayload::new(self.sessions.player_entries());
        let packet = Packet::new(
            trigger,
            self.next_broadcast_sequence(),
            ack,
            Payload::AllPlayersState(payload),
        );

        self.sessions
            .addrs()
            .into_iter()
            .map(|(_, addr)| Outgoing {
                addr,
                packet: packet.clone(),
            })
            .collect()
    }

    fn next_broadcast_sequence(&mut self) -> u32 {
        self.broadcast_sequence = self.broadcast_sequence.wrapping_add(1);
        self.broadcast_sequence
    }

    /// Removes timed-out sessions and persists their final position
    pub fn evict_expired(&mut self, now: Instant) -> Vec<u32> {
        let expired = self.sessions.take_expired(self.session_timeout, now);

        expired
            .into_iter()
            .map(|session| {
                info!("Session {} timed out", session.id);
                self.persistence.queue_persist(session.id, session.state);
                session.id
            })
            .collect()
    }

    /// Queues a save for every live session; used on shutdown
    pub fn persist_all(&mut self) {
        let states: Vec<(u32, PlayerState)> = self
            .sessions
            .iter()
            .map(|session| (session.id, session.state))
            .collect();

        for (session_id, state) in states {
            self.persistence.queue_persist(session_id, state);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;
    use shared::protocol::{encode, MessageType};
    use shared::{Building, Direction, MovementCommand, SESSION_TIMEOUT};
    use std::collections::HashMap;
    use std::sync::{Arc, Mutex};

    #[derive(Default)]
    struct RecordingPersistence {
        stored: HashMap<u32, PlayerState>,
        saved: Arc<Mutex<Vec<(u32, PlayerState)>>>,
    }

    impl Persistence for RecordingPersistence {
        fn load_player_state(&self, session_id: u32) -> Option<PlayerState> {
            self.stored.get(&session_id).copied()
        }

        fn queue_persist(&mut self, session_id: u32, state: PlayerState) -> bool {
            self.saved.lock().unwrap().push((session_id, state));
            true
        }
    }

    fn addr(port: u16) -> SocketAddr {
        SocketAddr::from(([127, 0, 0, 1], port))
    }

    fn simulation(world: World) -> Simulation {
        Simulation::new(
            world,
            SessionManager::new(8),
            Box::new(RecordingPersistence::default()),
            SESSION_TIMEOUT,
        )
    }

    fn recording_simulation(
        stored: HashMap<u32, PlayerState>,
    ) -> (Simulation, Arc<Mutex<Vec<(u32, PlayerState)>>>) {
        let saved = Arc::new(Mutex::new(Vec::new()));
        let persistence = RecordingPersistence {
            stored,
            saved: Arc::clone(&saved),
        };
        let sim = Simulation::new(
            World::empty(800.0, 600.0),
            SessionManager::new(8),
            Box::new(persistence),
            SESSION_TIMEOUT,
        );
        (sim, saved)
    }

    fn broadcasts(outgoing: &[Outgoing]) -> Vec<&Outgoing> {
        outgoing
            .iter()
            .filter(|o| o.packet.header.msg_type == MessageType::AllPlayersState)
            .collect()
    }

    fn move_packet(session_id: u32, sequence: u32, direction: Direction, speed: f32, delta: f32) -> Packet {
        Packet::movement(session_id, sequence, MovementCommand::new(direction, speed, delta))
    }

    #[test]
    fn test_move_from_fresh_session_is_broadcast_with_ack() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        let outgoing = sim.handle_packet(move_packet(1, 17, Direction::Right, 3.0, 0.5), addr(5000), now);

        let sent = broadcasts(&outgoing);
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].addr, addr(5000));
        assert_eq!(sent[0].packet.header.ack, 17);
        assert_eq!(sent[0].packet.header.session_id, 1);
        match &sent[0].packet.payload {
            Payload::AllPlayersState(all) => {
                let entry = all.find(1).unwrap();
                assert_approx_eq!(entry.x, 1.5);
                assert_approx_eq!(entry.y, 0.0);
            }
            other => panic!("Unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_new_session_gets_state_update_first() {
        let mut sim = simulation(World::empty(800.0, 600.0));

        let outgoing = sim.handle_packet(Packet::ping(9, 0, 0), addr(5000), Instant::now());

        assert_eq!(outgoing.len(), 2);
        assert_eq!(outgoing[0].packet.header.msg_type, MessageType::StateUpdate);
        assert_eq!(outgoing[0].addr, addr(5000));
        assert_eq!(outgoing[1].packet.header.msg_type, MessageType::AllPlayersState);

        // A second ping only triggers the broadcast.
        let outgoing = sim.handle_packet(Packet::ping(9, 0, 0), addr(5000), Instant::now());
        assert_eq!(outgoing.len(), 1);
    }

    #[test]
    fn test_broadcast_reaches_every_session() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        sim.handle_packet(Packet::ping(1, 0, 0), addr(5001), now);
        sim.handle_packet(Packet::ping(2, 0, 0), addr(5002), now);
        let outgoing = sim.handle_packet(move_packet(2, 1, Direction::Down, 10.0, 1.0), addr(5002), now);

        let sent = broadcasts(&outgoing);
        assert_eq!(sent.len(), 2);
        let addrs: Vec<SocketAddr> = sent.iter().map(|o| o.addr).collect();
        assert!(addrs.contains(&addr(5001)));
        assert!(addrs.contains(&addr(5002)));
        assert_eq!(sent[0].packet, sent[1].packet);
        assert_eq!(sent[0].packet.header.ack, 1);
        assert_eq!(sim.position(2), Some(PlayerState::new(0.0, 10.0)));
        assert_eq!(sim.position(1), Some(PlayerState::new(0.0, 0.0)));
    }

    #[test]
    fn test_move_into_building_is_not_committed() {
        let world = World {
            width: 800.0,
            height: 600.0,
            buildings: vec![Building::new(60.0, 0.0, 50.0, 50.0)],
        };
        let mut sim = simulation(world);
        let now = Instant::now();

        for sequence in 1..=5 {
            sim.handle_packet(move_packet(1, sequence, Direction::Right, 20.0, 1.0), addr(5000), now);
        }

        // First step reaches x=20; every further step would overlap the building.
        assert_eq!(sim.position(1), Some(PlayerState::new(20.0, 0.0)));
        assert_eq!(sim.sessions().get(1).unwrap().last_sequence, 5);
    }

    #[test]
    fn test_stale_move_is_not_integrated() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        sim.handle_packet(move_packet(1, 5, Direction::Right, 10.0, 1.0), addr(5000), now);
        let outgoing = sim.handle_packet(move_packet(1, 4, Direction::Right, 10.0, 1.0), addr(5000), now);

        assert_eq!(sim.position(1), Some(PlayerState::new(10.0, 0.0)));
        assert_eq!(broadcasts(&outgoing)[0].packet.header.ack, 5);
    }

    #[test]
    fn test_restarted_client_reusing_its_id_can_move() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        for sequence in 1..=500 {
            sim.handle_packet(move_packet(9, sequence, Direction::Right, 10.0, 0.01), addr(5000), now);
        }
        let before = sim.position(9).unwrap();

        let mut last_ack = 0;
        for sequence in 1..=100 {
            let outgoing = sim.handle_packet(move_packet(9, sequence, Direction::Right, 10.0, 0.01), addr(6000), now);
            last_ack = broadcasts(&outgoing)[0].packet.header.ack;
        }

        let after = sim.position(9).unwrap();
        assert!(after.x > before.x + 0.9, "before {:?} after {:?}", before, after);
        assert_eq!(last_ack, 100);
        assert_eq!(sim.sessions().get(9).unwrap().addr, addr(6000));
    }

    #[test]
    fn test_zero_sequence_ping_resets_ack() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        sim.handle_packet(move_packet(4, 3, Direction::Down, 10.0, 1.0), addr(5000), now);
        let outgoing = sim.handle_packet(Packet::ping(4, 0, 0), addr(5000), now);
        assert_eq!(broadcasts(&outgoing)[0].packet.header.ack, 0);

        // The first move of the new run is integrated.
        let outgoing = sim.handle_packet(move_packet(4, 1, Direction::Down, 10.0, 1.0), addr(5000), now);
        assert_eq!(broadcasts(&outgoing)[0].packet.header.ack, 1);
        assert_eq!(sim.position(4), Some(PlayerState::new(0.0, 20.0)));
    }

    #[test]
    fn test_late_move_inside_reorder_window_is_ignored() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        sim.handle_packet(move_packet(1, 200, Direction::Right, 10.0, 1.0), addr(5000), now);
        let outgoing = sim.handle_packet(
            move_packet(1, 200 - REORDER_WINDOW + 1, Direction::Right, 10.0, 1.0),
            addr(5000),
            now,
        );

        assert_eq!(sim.position(1), Some(PlayerState::new(10.0, 0.0)));
        assert_eq!(broadcasts(&outgoing)[0].packet.header.ack, 200);
    }

    #[test]
    fn test_address_is_refreshed() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();

        sim.handle_packet(Packet::ping(1, 0, 0), addr(5000), now);
        let outgoing = sim.handle_packet(Packet::ping(1, 0, 0), addr(6000), now);

        assert_eq!(sim.sessions().get(1).unwrap().addr, addr(6000));
        assert_eq!(broadcasts(&outgoing)[0].addr, addr(6000));
    }

    #[test]
    fn test_malformed_datagram_changes_nothing() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let now = Instant::now();
        sim.handle_packet(move_packet(1, 1, Direction::Right, 10.0, 1.0), addr(5000), now);

        let mut bytes = encode(&move_packet(1, 2, Direction::Right, 10.0, 1.0)).unwrap();
        bytes.truncate(bytes.len() - 1);

        assert!(sim.handle_datagram(&bytes, addr(5000), now).is_empty());
        assert!(sim.handle_datagram(&[0xFF; 3], addr(7000), now).is_empty());
        assert_eq!(sim.position(1), Some(PlayerState::new(10.0, 0.0)));
        assert_eq!(sim.sessions().len(), 1);
    }

    #[test]
    fn test_server_bound_state_packets_are_ignored() {
        let mut sim = simulation(World::empty(800.0, 600.0));
        let packet = Packet::new(
            3,
            1,
            0,
            Payload::StateUpdate(StatePayload {
                x: 100.0,
                y: 100.0,
                timestamp_ns: 0,
            }),
        );

        assert!(sim.handle_packet(packet, addr(5000), Instant::now()).is_empty());
        assert!(sim.sessions().is_empty());
    }

    #[test]
    fn test_leave_removes_and_persists() {
        let (mut sim, saved) = recording_simulation(HashMap::new());
        let now = Instant::now();

        sim.handle_packet(move_packet(4, 1, Direction::Down, 5.0, 1.0), addr(5000), now);
        let outgoing = sim.handle_packet(Packet::leave(4, 2, 0), addr(5000), now);

        assert!(outgoing.is_empty());
        assert!(sim.sessions().is_empty());
        assert_eq!(*saved.lock().unwrap(), vec![(4, PlayerState::new(0.0, 5.0))]);
    }

    #[test]
    fn test_leave_from_unknown_session_is_harmless() {
        let (mut sim, saved) = recording_simulation(HashMap::new());

        assert!(sim.handle_packet(Packet::leave(4, 1, 0), addr(5000), Instant::now()).is_empty());
        assert!(saved.lock().unwrap().is_empty());
    }

    #[test]
    fn test_returning_session_is_restored() {
        let mut stored = HashMap::new();
        stored.insert(8, PlayerState::new(250.0, 125.0));
        let (mut sim, _) = recording_simulation(stored);

        let outgoing = sim.handle_packet(Packet::ping(8, 0, 0), addr(5000), Instant::now());

        assert_eq!(sim.position(8), Some(PlayerState::new(250.0, 125.0)));
        match &outgoing[0].packet.payload {
            Payload::StateUpdate(state) => {
                assert_eq!((state.x, state.y), (250.0, 125.0));
                assert!(state.timestamp_ns > 0);
            }
            other => panic!("Unexpected payload {:?}", other),
        }
    }

    #[test]
    fn test_restored_position_is_clamped() {
        let mut stored = HashMap::new();
        stored.insert(8, PlayerState::new(5000.0, -10.0));
        let (mut sim, _) = recording_simulation(stored);

        sim.handle_packet(Packet::ping(8, 0, 0), addr(5000), Instant::now());

        assert_eq!(sim.position(8), Some(PlayerState::new(800.0, 0.0)));
    }

    #[test]
    fn test_timeout_eviction_persists() {
        let (mut sim, saved) = recording_simulation(HashMap::new());
        let start = Instant::now();

        sim.handle_packet(Packet::ping(1, 0, 0), addr(5001), start);
        sim.handle_packet(Packet::ping(2, 0, 0), addr(5002), start + Duration::from_secs(4));

        let evicted = sim.evict_expired(start + SESSION_TIMEOUT + Duration::from_secs(1));

        assert_eq!(evicted, vec![1]);
        assert!(sim.position(1).is_none());
        assert!(sim.position(2).is_some());
        assert_eq!(saved.lock().unwrap().len(), 1);
    }

    #[test]
    fn test_session_limit_drops_new_sessions() {
        let mut sim = Simulation::new(
            World::empty(800.0, 600.0),
            SessionManager::new(1),
            Box::new(RecordingPersistence::default()),
            SESSION_TIMEOUT,
        );
        let now = Instant::now();

        sim.handle_packet(Packet::ping(1, 0, 0), addr(5001), now);
        let outgoing = sim.handle_packet(Packet::ping(2, 0, 0), addr(5002), now);

        assert!(outgoing.is_empty());
        assert_eq!(sim.sessions().len(), 1);
    }

    #[test]
    fn test_persist_all() {
        let (mut sim, saved) = recording_simulation(HashMap::new());
        let now = Instant::now();

        sim.handle_packet(Packet::ping(1, 0, 0), addr(5001), now);
        sim.handle_packet(Packet::ping(2, 0, 0), addr(5002), now);
        sim.persist_all();

        assert_eq!(saved.lock().unwrap().len(), 2);
        assert_eq!(sim.sessions().len(), 2);
    }
}
