//! Session and session-registry data model (SPEC_FULL.md §3, §4.4). No single
//! teacher module models an admit/evict client-id registry (its `session/mod.rs`
//! drives a WebRTC/WebSocket session *broker* handshake, a different concern); the
//! registry's reader/writer-snapshot shape is grounded in `cache::GridCache`'s
//! snapshot-without-holding-the-lock contract, generalized from per-cell to
//! per-client.

pub mod capabilities;
pub mod registry;

pub use capabilities::{
    Capabilities, ColorLevel, DisplayName, PaletteType, RenderMode, FLAG_AUDIO, FLAG_COLOR, FLAG_DITHER, FLAG_REP, FLAG_STRETCH,
    FLAG_VIDEO,
};
pub use registry::{AdmitError, SessionRegistry};

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

use crate::media::Mailbox;
use crate::transport::Transport;

/// 32-bit, client-assigned, non-security-bearing identifier (SPEC_FULL.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(pub u32);

impl std::fmt::Display for ClientId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// `Session` lifecycle (SPEC_FULL.md §3): `Closed` is terminal, every other state
/// may transition forward but never back to an earlier non-`Closed` state except
/// `Rekeying -> Active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SessionState {
    Handshaking = 0,
    Active = 1,
    Rekeying = 2,
    Closed = 3,
}

impl SessionState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Active,
            2 => SessionState::Rekeying,
            3 => SessionState::Closed,
            _ => SessionState::Handshaking,
        }
    }
}

/// One connected participant: its transport, negotiated capabilities, mailbox, and
/// lifecycle state. Owned by the registry via `Arc`; per-client worker tasks (receive
/// loop, render loop, keepalive loop) hold their own `Arc<Session>` clone rather than
/// a back-reference into the registry, so no cycle exists between registry and
/// session (SPEC_FULL.md §9).
pub struct Session {
    pub client_id: ClientId,
    pub transport: Arc<Transport>,
    pub mailbox: Arc<Mailbox>,
    state: AtomicU8,
    closed: AtomicBool,
    display_name: RwLock<Option<DisplayName>>,
    capabilities: RwLock<Option<Capabilities>>,
}

impl Session {
    pub fn new(client_id: ClientId, transport: Arc<Transport>) -> Self {
        Self {
            client_id,
            transport,
            mailbox: Arc::new(Mailbox::new()),
            state: AtomicU8::new(SessionState::Handshaking as u8),
            closed: AtomicBool::new(false),
            display_name: RwLock::new(None),
            capabilities: RwLock::new(None),
        }
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::Acquire))
    }

    pub fn set_state(&self, state: SessionState) {
        self.state.store(state as u8, Ordering::Release);
        if state == SessionState::Closed {
            self.closed.store(true, Ordering::Release);
        }
    }

    /// Checked at the top of every render/keepalive/receive loop iteration
    /// (SPEC_FULL.md §4.6, §5).
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire) || !self.transport.is_connected()
    }

    pub fn set_join_info(&self, display_name: DisplayName, capabilities: Capabilities) {
        *self.display_name.write() = Some(display_name);
        *self.capabilities.write() = Some(capabilities);
    }

    pub fn display_name(&self) -> Option<DisplayName> {
        self.display_name.read().clone()
    }

    pub fn capabilities(&self) -> Option<Capabilities> {
        self.capabilities.read().clone()
    }

    /// `true` once a session has completed its handshake and sent a valid
    /// `ClientJoin` (SPEC_FULL.md §4.4 admission invariant).
    pub fn is_join_complete(&self) -> bool {
        self.display_name.read().is_some() && self.capabilities.read().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    fn dummy_transport() -> Arc<Transport> {
        let (stream, _other) = duplex(1024);
        let (read, write) = tokio::io::split(stream);
        Arc::new(Transport::new(read, write))
    }

    #[test]
    fn fresh_session_starts_handshaking_and_without_join_info() {
        let session = Session::new(ClientId(1), dummy_transport());
        assert_eq!(session.state(), SessionState::Handshaking);
        assert!(!session.is_join_complete());
    }

    #[test]
    fn closing_a_session_is_observable_via_is_closed() {
        let session = Session::new(ClientId(1), dummy_transport());
        assert!(!session.is_closed());
        session.set_state(SessionState::Closed);
        assert!(session.is_closed());
    }

    #[test]
    fn join_info_round_trips() {
        let session = Session::new(ClientId(7), dummy_transport());
        let name = DisplayName::new("ada").unwrap();
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
        session.set_join_info(name.clone(), caps);
        assert!(session.is_join_complete());
        assert_eq!(session.display_name(), Some(name));
    }
}
