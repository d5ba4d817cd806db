//! Session registry for the authoritative server
//!
//! This module tracks every live session the server knows about:
//! - Lazy creation on the first packet from an unseen session id
//! - Address refresh on every packet so NAT rebinding is tolerated
//! - Canonical player position and the highest integrated input sequence
//! - Timeout detection and removal
//!
//! All access happens from the single server receive loop, so nothing in here
//! is synchronized.

use log::info;
use shared::protocol::PlayerEntry;
use shared::{PlayerState, MAX_PLAYERS};
use std::collections::BTreeMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

/// Server-side record of one connected player
#[derive(Debug, Clone)]
pub struct Session {
    /// Identifier chosen by the client
    pub id: u32,
    /// Address the last packet arrived from
    pub addr: SocketAddr,
    /// Authoritative position
    pub state: PlayerState,
    /// Last time any packet arrived for this session
    pub last_seen: Instant,
    /// Highest move sequence integrated into `state`
    pub last_sequence: u32,
}

impl Session {
    pub fn new(id: u32, addr: SocketAddr, state: PlayerState, now: Instant) -> Self {
        Self {
            id,
            addr,
            state,
            last_seen: now,
            last_sequence: 0,
        }
    }

    /// Records traffic from `addr`. Returns true when the address changed.
    pub fn touch(&mut self, addr: SocketAddr, now: Instant) -> bool {
        self.last_seen = now;
        if self.addr != addr {
            self.addr = addr;
            return true;
        }
        false
    }

    /// Returns true if nothing arrived for longer than `timeout`
    pub fn is_timed_out(&self, timeout: Duration, now: Instant) -> bool {
        now.saturating_duration_since(self.last_seen) > timeout
    }
}

/// Owns all sessions, keyed and ordered by session id
pub struct SessionManager {
    sessions: BTreeMap<u32, Session>,
    max_sessions: usize,
}

impl SessionManager {
    pub fn new(max_sessions: usize) -> Self {
        Self {
            sessions: BTreeMap::new(),
            max_sessions,
        }
    }

    /// Inserts a new session unless the registry is full.
    ///
    /// An existing session with the same id is replaced.
    pub fn create(
        &mut self,
        id: u32,
        addr: SocketAddr,
        state: PlayerState,
        now: Instant,
    ) -> Option<&mut Session> {
        if !self.sessions.contains_key(&id) && self.sessions.len() >= self.max_sessions {
            return None;
        }

        info!(
            "Session {} created from {} at ({}, {})",
            id, addr, state.x, state.y
        );
        self.sessions.insert(id, Session::new(id, addr, state, now));
        self.sessions.get_mut(&id)
    }

    pub fn get(&self, id: u32) -> Option<&Session> {
        self.sessions.get(&id)
    }

    pub fn get_mut(&mut self, id: u32) -> Option<&mut Session> {
        self.sessions.get_mut(&id)
    }

    pub fn contains(&self, id: u32) -> bool {
        self.sessions.contains_key(&id)
    }

    /// Removes a session, returning it so the caller can persist its final state
    pub fn remove(&mut self, id: u32) -> Option<Session> {
        let session = self.sessions.remove(&id)?;
        info!("Session {} removed", id);
        Some(session)
    }

    /// Removes and returns every session that has been silent for longer than `timeout`
    pub fn take_expired(&mut self, timeout: Duration, now: Instant) -> Vec<Session> {
        let expired: Vec<u32> = self
            .sessions
            .values()
            .filter(|session| session.is_timed_out(timeout, now))
            .map(|session| session.id)
            .collect();

        expired
            .into_iter()
            .filter_map(|id| self.remove(id))
            .collect()
    }

    /// Position tuples for the broadcast, capped at `MAX_PLAYERS`
    pub fn player_entries(&self) -> Vec<PlayerEntry> {
        self.sessions
            .values()
            .take(MAX_PLAYERS)
            .map(|session| PlayerEntry {
                session_id: session.id,
                x: session.state.x,
                y: session.state.y,
            })
            .collect()
    }

    /// Every session id with its current address
    pub fn addrs(&self) -> Vec<(u32, SocketAddr)> {
        self.sessions
            .values()
            .map(|session| (session.id, session.addr))
            .collect()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn max_sessions(&self) -> usize {
        self.max_sessions
    }
}
