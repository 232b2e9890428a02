//! The session registry (SPEC_FULL.md §4.4): admit/evict clients, and let render
//! loops snapshot the active-participant list without holding the registry lock
//! while they iterate it.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use thiserror::Error;

use super::{ClientId, Session, SessionState};
use crate::telemetry::metrics;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum AdmitError {
    #[error("registry is at capacity")]
    Full,
    #[error("client id {0} is already registered")]
    Duplicate(u32),
}

/// Maps `ClientId -> Arc<Session>` plus the secondary "who has completed
/// `ClientJoin`" list that render loops iterate (SPEC_FULL.md §3, §4.4).
pub struct SessionRegistry {
    max_clients: u32,
    sessions: RwLock<HashMap<ClientId, Arc<Session>>>,
    active: RwLock<Vec<ClientId>>,
}

impl SessionRegistry {
    pub fn new(max_clients: u32) -> Self {
        Self {
            max_clients,
            sessions: RwLock::new(HashMap::new()),
            active: RwLock::new(Vec::new()),
        }
    }

    /// Admits a session that has reached `Ready` and completed `ClientJoin`
    /// (SPEC_FULL.md §4.4 invariant). Rejects with `Full` at capacity before the
    /// session is registered at all, so a rejected handshake never occupies a slot.
    pub fn admit(&self, session: Arc<Session>) -> Result<ClientId, AdmitError> {
        debug_assert!(session.is_join_complete(), "admit called before ClientJoin completed");
        let client_id = session.client_id;
        let mut sessions = self.sessions.write();
        if sessions.len() as u32 >= self.max_clients {
            return Err(AdmitError::Full);
        }
        if sessions.contains_key(&client_id) {
            return Err(AdmitError::Duplicate(client_id.0));
        }
        session.set_state(SessionState::Active);
        sessions.insert(client_id, session);
        drop(sessions);
        self.active.write().push(client_id);
        metrics::global().admissions.inc();
        Ok(client_id)
    }

    /// Removes a client from both maps. Idempotent: evicting an unknown id is a
    /// no-op, since a session may already have been evicted by a concurrent
    /// receive-loop failure by the time a render loop also notices it is closed.
    pub fn evict(&self, client_id: ClientId) {
        let removed = self.sessions.write().remove(&client_id);
        if removed.is_none() {
            return;
        }
        self.active.write().retain(|id| *id != client_id);
        metrics::global().evictions.inc();
    }

    pub fn get(&self, client_id: ClientId) -> Option<Arc<Session>> {
        self.sessions.read().get(&client_id).cloned()
    }

    /// An immutable snapshot of active participants, safe to iterate without
    /// holding the registry lock (SPEC_FULL.md §4.4, §8). A session observed here
    /// may already have been evicted by the time it's used; callers must treat
    /// "send fails" as the expected outcome, never a use-after-free.
    pub fn snapshot_active(&self) -> Vec<Arc<Session>> {
        let ids = self.active.read().clone();
        let sessions = self.sessions.read();
        ids.into_iter().filter_map(|id| sessions.get(&id).cloned()).collect()
    }

    pub fn for_each_active(&self, mut f: impl FnMut(&Arc<Session>)) {
        for session in self.snapshot_active() {
            f(&session);
        }
    }

    pub fn active_count(&self) -> u32 {
        self.active.read().len() as u32
    }

    pub fn max_clients(&self) -> u32 {
        self.max_clients
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{Capabilities, DisplayName};
    use tokio::io::duplex;

    fn admitted_session(id: u32) -> Arc<Session> {
        let (stream, _other) = duplex(1024);
        let (read, write) = tokio::io::split(stream);
        let session = Arc::new(Session::new(ClientId(id), Arc::new(crate::transport::Transport::new(read, write))));
        let caps = Capabilities::from_payload(&crate::protocol::ClientCapabilitiesPayload {
            capabilities: 0,
            color_level: 0,
            color_count: 0,
            render_mode: 0,
            width: 80,
            height: 24,
            palette_type: 0,
            utf8_support: 0,
            desired_fps: 30,
            term_type: String::new(),
            colorterm: String::new(),
            palette_custom: String::new(),
            wants_padding: false,
            detection_reliable: false,
        });
        session.set_join_info(DisplayName::new(format!("client{id}")).unwrap(), caps);
        session
    }

    #[test]
    fn admit_then_snapshot_contains_the_client() {
        let registry = SessionRegistry::new(10);
        let session = admitted_session(1);
        registry.admit(session).unwrap();
        let snapshot = registry.snapshot_active();
        assert_eq!(snapshot.len(), 1);
        assert_eq!(snapshot[0].client_id, ClientId(1));
    }

    #[test]
    fn admission_is_rejected_once_full() {
        let registry = SessionRegistry::new(1);
        registry.admit(admitted_session(1)).unwrap();
        assert_eq!(registry.admit(admitted_session(2)), Err(AdmitError::Full));
    }

    #[test]
    fn duplicate_client_id_is_rejected() {
        let registry = SessionRegistry::new(10);
        registry.admit(admitted_session(1)).unwrap();
        assert_eq!(registry.admit(admitted_session(1)), Err(AdmitError::Duplicate(1)));
    }

    #[test]
    fn eviction_removes_from_both_maps_and_is_idempotent() {
        let registry = SessionRegistry::new(10);
        registry.admit(admitted_session(1)).unwrap();
        registry.evict(ClientId(1));
        assert_eq!(registry.snapshot_active().len(), 0);
        assert!(registry.get(ClientId(1)).is_none());
        registry.evict(ClientId(1)); // idempotent
    }

    #[test]
    fn a_participant_never_appears_twice_and_never_includes_itself_when_removed() {
        let registry = SessionRegistry::new(10);
        for id in 1..=3u32 {
            registry.admit(admitted_session(id)).unwrap();
        }
        let others: Vec<_> = registry
            .snapshot_active()
            .into_iter()
            .filter(|s| s.client_id != ClientId(2))
            .map(|s| s.client_id)
            .collect();
        assert_eq!(others, vec![ClientId(1), ClientId(3)]);
    }
}
