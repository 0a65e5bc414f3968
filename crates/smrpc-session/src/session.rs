//! Session: one side of a logical connection between two runtime instances.

use rand::Rng;
use smrpc_core::wire::SessionEndpoint;

use crate::alloc::Reservation;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Client,
    Server,
}

/// Session state.
///
/// `ConnectInProgress` only exists on the client; a server session is
/// created directly in `Connected`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Connect request sent, waiting for response.
    ConnectInProgress,
    /// Session is connected and ready for data-plane traffic.
    Connected,
    /// Disconnect request sent, waiting for response.
    DisconnectInProgress,
    /// Terminal. Recovery is a brand-new session.
    Error,
}

impl SessionState {
    /// Legal forward transitions. States never regress.
    pub fn can_advance_to(self, next: SessionState) -> bool {
        use SessionState::*;
        matches!(
            (self, next),
            (ConnectInProgress, Connected)
                | (ConnectInProgress, Error)
                | (Connected, DisconnectInProgress)
                | (Connected, Error)
                | (DisconnectInProgress, Error)
        )
    }
}

/// Random starting sequence number for a new session. Drawn from the low
/// 32 bits so the counter cannot wrap.
pub fn generate_start_seq() -> u64 {
    u64::from(rand::thread_rng().gen::<u32>())
}

/// A session owned by exactly one session-table slot.
#[derive(Debug)]
pub struct Session {
    pub role: SessionRole,
    state: SessionState,
    pub client: SessionEndpoint,
    pub server: SessionEndpoint,
    /// Token of the connect request that produced this session.
    pub unique_token: u64,
    /// Receive credits taken from the instance pool at admission.
    pub credits: usize,
    /// Next data-plane sequence number, randomly seeded at creation.
    pub next_seq: u64,
    buffers: Vec<Reservation>,
}

impl Session {
    pub fn new_client(
        client: SessionEndpoint,
        server: SessionEndpoint,
        unique_token: u64,
        credits: usize,
        buffers: Vec<Reservation>,
    ) -> Self {
        Self {
            role: SessionRole::Client,
            state: SessionState::ConnectInProgress,
            client,
            server,
            unique_token,
            credits,
            next_seq: generate_start_seq(),
            buffers,
        }
    }

    pub fn new_server(
        client: SessionEndpoint,
        server: SessionEndpoint,
        unique_token: u64,
        credits: usize,
        buffers: Vec<Reservation>,
    ) -> Self {
        Self {
            role: SessionRole::Server,
            state: SessionState::Connected,
            client,
            server,
            unique_token,
            credits,
            next_seq: generate_start_seq(),
            buffers,
        }
    }

    #[inline]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Move to `next`. Returns false, leaving the state untouched, if the
    /// transition would regress.
    pub fn advance(&mut self, next: SessionState) -> bool {
        if !self.state.can_advance_to(next) {
            return false;
        }
        self.state = next;
        true
    }

    #[inline]
    pub fn is_client(&self) -> bool {
        self.role == SessionRole::Client
    }

    #[inline]
    pub fn is_connected(&self) -> bool {
        self.state == SessionState::Connected
    }

    /// Session number in this instance's table.
    pub fn local_session_num(&self) -> u16 {
        match self.role {
            SessionRole::Client => self.client.session_num,
            SessionRole::Server => self.server.session_num,
        }
    }

    /// The other side of the session.
    pub fn remote(&self) -> &SessionEndpoint {
        match self.role {
            SessionRole::Client => &self.server,
            SessionRole::Server => &self.client,
        }
    }

    /// Bytes of buffer held by this session.
    pub fn reserved_bytes(&self) -> usize {
        self.buffers.iter().map(Reservation::size).sum()
    }

    /// Hand the buffer reservations back for release.
    pub fn take_buffers(&mut self) -> Vec<Reservation> {
        std::mem::take(&mut self.buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smrpc_core::wire::{RoutingInfo, TransportType, INVALID_SESSION_NUM};

    fn ep(rpc_id: u8, session_num: u16) -> SessionEndpoint {
        SessionEndpoint {
            transport_type: TransportType::InfiniBand,
            hostname: "localhost".into(),
            phy_port: 0,
            rpc_id,
            session_num,
            routing_info: RoutingInfo::zeroed(),
        }
    }

    #[test]
    fn state_never_regresses() {
        use SessionState::*;
        assert!(ConnectInProgress.can_advance_to(Connected));
        assert!(Connected.can_advance_to(DisconnectInProgress));
        assert!(!Connected.can_advance_to(ConnectInProgress));
        assert!(!DisconnectInProgress.can_advance_to(Connected));
        assert!(!Error.can_advance_to(Connected));
        assert!(!Error.can_advance_to(Error));
    }

    #[test]
    fn client_session_starts_connecting() {
        let mut s = Session::new_client(ep(1, 4), ep(0, INVALID_SESSION_NUM), 7, 32, Vec::new());
        assert_eq!(s.state(), SessionState::ConnectInProgress);
        assert_eq!(s.local_session_num(), 4);
        assert_eq!(s.remote().rpc_id, 0);

        assert!(s.advance(SessionState::Connected));
        assert!(!s.advance(SessionState::ConnectInProgress));
        assert_eq!(s.state(), SessionState::Connected);
    }

    #[test]
    fn server_session_is_connected_on_creation() {
        let buffers = vec![Reservation::new(4096, 0), Reservation::new(4096, 0)];
        let mut s = Session::new_server(ep(1, 4), ep(0, 9), 7, 32, buffers);
        assert!(s.is_connected());
        assert_eq!(s.local_session_num(), 9);
        assert_eq!(s.reserved_bytes(), 8192);
        assert_eq!(s.take_buffers().len(), 2);
        assert_eq!(s.reserved_bytes(), 0);
    }

    #[test]
    fn start_sequence_is_randomized() {
        let seqs: Vec<u64> = (0..8)
            .map(|n| Session::new_server(ep(1, n), ep(0, n), 7, 32, Vec::new()).next_seq)
            .collect();
        assert!(seqs.iter().all(|&s| s <= u64::from(u32::MAX)));
        assert!(seqs.iter().any(|&s| s != seqs[0]));
    }
}
