use crate::data::udpstruct::UdpSession;

use std::collections::HashMap;
use std::net::SocketAddr;

use chrono::prelude::*;

use uuid::Uuid;

/// Client address to session map. Owned by the multiplexer task, which is
/// the only place sessions are created or removed.
#[derive(Default)]
pub struct SessionTable {
    sessions: HashMap<SocketAddr, UdpSession>,
}

impl SessionTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn get_mut(&mut self, client: &SocketAddr) -> Option<&mut UdpSession> {
        self.sessions.get_mut(client)
    }

    /// The session for `client`, but only if it is still the one with `id`.
    pub fn current_mut(&mut self, client: &SocketAddr, id: Uuid) -> Option<&mut UdpSession> {
        self.sessions.get_mut(client).filter(|session| session.id == id)
    }

    /// Stores a new session. An existing entry for the same client is
    /// replaced and handed back so the caller decides when it drops.
    pub fn insert(&mut self, session: UdpSession) -> Option<UdpSession> {
        self.sessions.insert(session.client, session)
    }

    pub fn remove(&mut self, client: &SocketAddr) -> Option<UdpSession> {
        self.sessions.remove(client)
    }

    /// Removes the entry for `client` only if it is the session `id`; a
    /// teardown from an already replaced session leaves the newer one alone.
    pub fn remove_if_current(&mut self, client: &SocketAddr, id: Uuid) -> Option<UdpSession> {
        match self.sessions.get(client) {
            Some(session) if session.id == id => self.sessions.remove(client),
            _ => None,
        }
    }

    pub fn touch(&mut self, client: &SocketAddr, id: Uuid, now: DateTime<Utc>) -> bool {
        match self.current_mut(client, id) {
            Some(session) => {
                session.last_changed = now;
                true
            }
            None => false,
        }
    }

    /// Removes every session whose last activity is at or before `offset`.
    pub fn evict_idle(&mut self, offset: DateTime<Utc>) -> Vec<UdpSession> {
        let to_delete: Vec<SocketAddr> = self
            .sessions
            .values()
            .filter(|session| session.last_changed <= offset)
            .map(|session| session.client)
            .collect();

        to_delete
            .iter()
            .filter_map(|client| self.sessions.remove(client))
            .collect()
    }

    pub fn drain(&mut self) -> Vec<UdpSession> {
        self.sessions.drain().map(|(_, session)| session).collect()
    }
}

/// Counters kept by the multiplexer, reported at shutdown.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct RelayStats {
    pub forwarded_upstream: u64,
    pub forwarded_downstream: u64,
    pub decode_failures: u64,
    pub suspect_readings: u64,
    pub dropped_readings: u64,
    pub dropped_datagrams: u64,
    pub sessions_created: u64,
    pub sessions_closed: u64,
    pub sessions_evicted: u64,
}
