//! The session-management state machine.
//!
//! `Rpc` is the per-instance context: it owns the session table, the dedup
//! token map, the receive-credit pool and the handles to the transport,
//! allocator and messenger. Each handler consumes one inbound packet and
//! enqueues at most one outbound packet.

use smrpc_core::config::SmrpcConfig;
use smrpc_core::wire::{
    RoutingInfo, SessionEndpoint, SmErrType, SmEventType, SmPkt, SmPktType, WireError,
    INVALID_SESSION_NUM, MAX_HOSTNAME_LEN,
};

use crate::admission::Admission;
use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::messenger::Messenger;
use crate::session::{Session, SessionRole, SessionState};
use crate::table::SessionTable;
use crate::token_map::TokenMap;
use crate::transport::Transport;

/// Delivered to the application's session-management callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SmEvent {
    pub session_num: u16,
    pub event: SmEventType,
    pub err: SmErrType,
}

/// Application callback. Invoked synchronously from packet handling; it has
/// no access to the `Rpc` that calls it.
pub type SmHandler = Box<dyn FnMut(SmEvent) + Send>;

/// Test hooks that force failure paths.
#[derive(Debug, Clone, Default)]
pub struct FaultInjection {
    /// Make every routing-info resolution fail.
    pub fail_resolve_rinfo: bool,
}

/// Snapshot of the instance's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcStats {
    pub live_sessions: usize,
    pub tombstones: usize,
    pub tokens: usize,
    pub recvs_available: usize,
    pub outstanding_alloc: usize,
}

/// Outcome of a failed request endpoint check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Rejection {
    /// Answer with this error.
    Reply(SmErrType),
    /// Not for this instance. No response.
    Drop,
}

pub struct Rpc<T, A, M> {
    hostname: String,
    rpc_id: u8,
    phy_port: u16,
    transport: T,
    allocator: A,
    messenger: M,
    sessions: SessionTable,
    tokens: TokenMap,
    recvs_available: usize,
    admission: Admission,
    handler: SmHandler,
    pub faults: FaultInjection,
}

impl<T, A, M> Rpc<T, A, M>
where
    T: Transport,
    A: Allocator,
    M: Messenger,
{
    pub fn new(
        config: &SmrpcConfig,
        transport: T,
        allocator: A,
        messenger: M,
        handler: SmHandler,
    ) -> Self {
        let limits = &config.limits;
        Self {
            hostname: config.identity.resolved_hostname(),
            rpc_id: config.identity.rpc_id,
            phy_port: config.identity.phy_port,
            transport,
            allocator,
            messenger,
            sessions: SessionTable::new(limits.max_sessions),
            tokens: TokenMap::new(),
            recvs_available: limits.num_recvs,
            admission: Admission::new(
                limits.session_credits,
                limits.mtu,
                config.identity.numa_node,
            ),
            handler,
            faults: FaultInjection::default(),
        }
    }

    // ── Accessors ─────────────────────────────────────────────────────────────

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn rpc_id(&self) -> u8 {
        self.rpc_id
    }

    pub fn sessions(&self) -> &SessionTable {
        &self.sessions
    }

    pub fn tokens(&self) -> &TokenMap {
        &self.tokens
    }

    pub fn recvs_available(&self) -> usize {
        self.recvs_available
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn allocator(&self) -> &A {
        &self.allocator
    }

    pub fn allocator_mut(&mut self) -> &mut A {
        &mut self.allocator
    }

    pub fn messenger(&self) -> &M {
        &self.messenger
    }

    pub fn messenger_mut(&mut self) -> &mut M {
        &mut self.messenger
    }

    pub fn stats(&self) -> RpcStats {
        RpcStats {
            live_sessions: self.sessions.live_count(),
            tombstones: self.sessions.tombstone_count(),
            tokens: self.tokens.len(),
            recvs_available: self.recvs_available,
            outstanding_alloc: self.allocator.outstanding_allocation_total(),
        }
    }

    /// This instance's endpoint with the given session number.
    fn local_endpoint(&self, session_num: u16) -> SessionEndpoint {
        SessionEndpoint {
            transport_type: self.transport.transport_type(),
            hostname: self.hostname.clone(),
            phy_port: self.phy_port,
            rpc_id: self.rpc_id,
            session_num,
            routing_info: self.transport.fill_local_routing_info(),
        }
    }

    fn is_self(&self, ep: &SessionEndpoint) -> bool {
        ep.hostname == self.hostname && ep.rpc_id == self.rpc_id
    }

    fn notify(&mut self, session_num: u16, event: SmEventType, err: SmErrType) {
        (self.handler)(SmEvent {
            session_num,
            event,
            err,
        });
    }

    fn reply(&mut self, req: &SmPkt, err: SmErrType) {
        self.messenger.send(req.clone().into_resp(err));
    }

    // ── Dispatch ──────────────────────────────────────────────────────────────

    /// Process a drained inbox batch. The batch is empty afterwards.
    pub fn process_batch(&mut self, batch: &mut Vec<SmPkt>) {
        for pkt in batch.drain(..) {
            self.handle_sm_packet(&pkt);
        }
    }

    pub fn handle_sm_packet(&mut self, pkt: &SmPkt) {
        // Requests check their server endpoint in the handlers.
        match pkt.pkt_type {
            SmPktType::ConnectReq => self.handle_connect_request(pkt),
            SmPktType::DisconnectReq => self.handle_disconnect_request(pkt),
            SmPktType::ConnectResp | SmPktType::DisconnectResp if !self.is_self(&pkt.client) => {
                tracing::warn!(
                    pkt_type = %pkt.pkt_type,
                    dest = %pkt.client,
                    "response not addressed to this instance, dropping"
                );
            }
            SmPktType::ConnectResp => self.handle_connect_response(pkt),
            SmPktType::DisconnectResp => self.handle_disconnect_response(pkt),
        }
    }

    /// Contract check shared by the four handlers.
    fn expect_type(&self, pkt: &SmPkt, expected: SmPktType) -> bool {
        debug_assert_eq!(pkt.pkt_type, expected, "packet routed to the wrong handler");
        if pkt.pkt_type != expected {
            tracing::error!(got = %pkt.pkt_type, %expected, "packet routed to the wrong handler");
            return false;
        }
        true
    }

    /// Checks the server endpoint of a request: transport, then identity,
    /// then port.
    fn validate_server_endpoint(&self, req: &SmPkt) -> std::result::Result<(), Rejection> {
        if req.server.transport_type != self.transport.transport_type() {
            return Err(Rejection::Reply(SmErrType::InvalidTransport));
        }
        if !self.is_self(&req.server) {
            return Err(Rejection::Drop);
        }
        if req.server.phy_port != self.phy_port {
            return Err(Rejection::Reply(SmErrType::InvalidRemotePort));
        }
        Ok(())
    }

    /// Answer or drop a request that failed endpoint validation.
    fn reject(&mut self, req: &SmPkt, rejection: Rejection) {
        match rejection {
            Rejection::Reply(err) => {
                tracing::warn!(
                    pkt_type = %req.pkt_type,
                    client = %req.client,
                    %err,
                    "rejecting request"
                );
                self.reply(req, err);
            }
            Rejection::Drop => {
                tracing::warn!(
                    pkt_type = %req.pkt_type,
                    dest = %req.server,
                    "request not addressed to this instance, dropping"
                );
            }
        }
    }

    // ── Server side ───────────────────────────────────────────────────────────

    pub fn handle_connect_request(&mut self, req: &SmPkt) {
        if !self.expect_type(req, SmPktType::ConnectReq) {
            return;
        }
        let token = req.unique_token;

        if let Err(rejection) = self.validate_server_endpoint(req) {
            self.reject(req, rejection);
            return;
        }

        // Retransmitted request: replay the response of the live session.
        // A token whose session has been buried falls through and is
        // admitted as a new request.
        if let Some(session_num) = self.tokens.lookup(token) {
            match self.sessions.get(session_num) {
                Some(s) if s.role == SessionRole::Server && s.unique_token == token => {
                    if s.client != req.client {
                        // Token collision between two clients. Replayed as is.
                        tracing::warn!(
                            session_num,
                            owner = %s.client,
                            client = %req.client,
                            token = hex::encode(token.to_le_bytes()),
                            "connect request token already held by another client"
                        );
                    }
                    tracing::debug!(
                        session_num,
                        token = hex::encode(token.to_le_bytes()),
                        "duplicate connect request, replaying response"
                    );
                    let mut resp = req.clone().into_resp(SmErrType::NoError);
                    resp.server = s.server.clone();
                    self.messenger.send(resp);
                    return;
                }
                _ => {
                    tracing::debug!(
                        session_num,
                        token = hex::encode(token.to_le_bytes()),
                        "token belongs to a buried session, admitting as new"
                    );
                }
            }
        }

        let Self {
            admission,
            recvs_available,
            sessions,
            transport,
            allocator,
            faults,
            ..
        } = self;
        let resolve = || {
            !faults.fail_resolve_rinfo && transport.resolve_routing_info(&req.client.routing_info)
        };
        let admitted = admission.admit(*recvs_available, sessions, resolve, allocator);
        let buffers = match admitted {
            Ok(b) => b,
            Err(err) => {
                tracing::warn!(client = %req.client, %err, "rejecting connect request");
                self.reply(req, err);
                return;
            }
        };

        let session_num = match self.sessions.next_session_num() {
            Some(n) => n,
            None => {
                // Unreachable after a passed table check; undo and refuse.
                for r in buffers {
                    self.allocator.release(r);
                }
                self.reply(req, SmErrType::TooManySessions);
                return;
            }
        };

        let server = self.local_endpoint(session_num);
        let credits = self.admission.session_credits;
        let session =
            Session::new_server(req.client.clone(), server.clone(), token, credits, buffers);
        self.sessions.install(session_num, session);
        self.recvs_available -= credits;
        self.tokens.insert(token, session_num);

        tracing::info!(
            session_num,
            client = %req.client,
            token = hex::encode(token.to_le_bytes()),
            "session established (server)"
        );

        let mut resp = req.clone().into_resp(SmErrType::NoError);
        resp.server = server;
        self.messenger.send(resp);
    }

    pub fn handle_disconnect_request(&mut self, req: &SmPkt) {
        if !self.expect_type(req, SmPktType::DisconnectReq) {
            return;
        }

        if let Err(rejection) = self.validate_server_endpoint(req) {
            self.reject(req, rejection);
            return;
        }

        let session_num = req.server.session_num;
        let owned = matches!(
            self.sessions.get(session_num),
            Some(s) if s.role == SessionRole::Server && s.unique_token == req.unique_token
        );

        if owned {
            self.bury(session_num);
            tracing::info!(session_num, client = %req.client, "session disconnected (server)");
        } else {
            // Our response was lost and the client retried.
            tracing::debug!(
                session_num,
                "disconnect request for a buried session, re-acknowledging"
            );
        }

        self.reply(req, SmErrType::NoError);
    }

    // ── Client side ───────────────────────────────────────────────────────────

    /// Look up the client session a response is for. `None` for stale,
    /// duplicated or misdirected responses.
    fn client_session_for(&self, resp: &SmPkt, expected: SessionState) -> Option<u16> {
        let session_num = resp.client.session_num;
        let Some(session) = self.sessions.get(session_num) else {
            tracing::debug!(
                session_num,
                pkt_type = %resp.pkt_type,
                "no live client session, dropping response"
            );
            return None;
        };
        if session.role != SessionRole::Client || session.unique_token != resp.unique_token {
            tracing::debug!(
                session_num,
                pkt_type = %resp.pkt_type,
                "response token does not match session, dropping"
            );
            return None;
        }
        if session.state() != expected {
            tracing::debug!(
                session_num,
                pkt_type = %resp.pkt_type,
                state = ?session.state(),
                "session not awaiting this response, dropping"
            );
            return None;
        }
        Some(session_num)
    }

    pub fn handle_connect_response(&mut self, resp: &SmPkt) {
        if !self.expect_type(resp, SmPktType::ConnectResp) {
            return;
        }
        let Some(session_num) = self.client_session_for(resp, SessionState::ConnectInProgress)
        else {
            return;
        };
        let Some(session) = self.sessions.get_mut(session_num) else {
            return;
        };

        if !resp.err_type.is_ok() {
            session.advance(SessionState::Error);
            tracing::warn!(
                session_num,
                server = %resp.server,
                err = %resp.err_type,
                "connect failed"
            );
            self.notify(session_num, SmEventType::ConnectFailed, resp.err_type);
            return;
        }

        session.server = resp.server.clone();
        session.advance(SessionState::Connected);
        tracing::info!(session_num, server = %resp.server, "session established (client)");
        self.notify(session_num, SmEventType::Connected, SmErrType::NoError);
    }

    pub fn handle_disconnect_response(&mut self, resp: &SmPkt) {
        if !self.expect_type(resp, SmPktType::DisconnectResp) {
            return;
        }
        let Some(session_num) = self.client_session_for(resp, SessionState::DisconnectInProgress)
        else {
            return;
        };

        if !resp.err_type.is_ok() {
            if let Some(session) = self.sessions.get_mut(session_num) {
                session.advance(SessionState::Error);
            }
            tracing::warn!(session_num, err = %resp.err_type, "disconnect failed");
            self.notify(session_num, SmEventType::DisconnectFailed, resp.err_type);
            return;
        }

        self.bury(session_num);
        tracing::info!(session_num, "session disconnected (client)");
        self.notify(session_num, SmEventType::Disconnected, SmErrType::NoError);
    }

    // ── Local API ─────────────────────────────────────────────────────────────

    /// Open a client session and send its connect request. The outcome
    /// arrives later through the callback.
    pub fn create_session(
        &mut self,
        remote_hostname: &str,
        remote_rpc_id: u8,
        remote_phy_port: u16,
    ) -> Result<u16> {
        if remote_hostname == self.hostname && remote_rpc_id == self.rpc_id {
            return Err(Error::SelfConnect);
        }
        if remote_hostname.len() > MAX_HOSTNAME_LEN {
            return Err(WireError::HostnameTooLong(remote_hostname.len()).into());
        }

        let buffers = self
            .admission
            .admit(self.recvs_available, &self.sessions, || true, &mut self.allocator)
            .map_err(Error::Admission)?;
        let Some(session_num) = self.sessions.next_session_num() else {
            for r in buffers {
                self.allocator.release(r);
            }
            return Err(Error::Admission(SmErrType::TooManySessions));
        };

        let token: u64 = rand::random();
        let client = self.local_endpoint(session_num);
        let server = SessionEndpoint {
            transport_type: self.transport.transport_type(),
            hostname: remote_hostname.to_string(),
            phy_port: remote_phy_port,
            rpc_id: remote_rpc_id,
            session_num: INVALID_SESSION_NUM,
            routing_info: RoutingInfo::zeroed(),
        };

        let credits = self.admission.session_credits;
        let session = Session::new_client(client.clone(), server.clone(), token, credits, buffers);
        self.sessions.install(session_num, session);
        self.recvs_available -= credits;

        tracing::debug!(
            session_num,
            %server,
            token = hex::encode(token.to_le_bytes()),
            "sending connect request"
        );
        self.messenger.send(SmPkt::new(
            SmPktType::ConnectReq,
            SmErrType::NoError,
            token,
            client,
            server,
        ));
        Ok(session_num)
    }

    /// Start tearing down a client session.
    pub fn destroy_session(&mut self, session_num: u16) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_num)
            .ok_or(Error::UnknownSession(session_num))?;
        if session.role != SessionRole::Client {
            return Err(Error::NotClient(session_num));
        }

        match session.state() {
            SessionState::ConnectInProgress => Err(Error::SessionBusy(session_num)),
            SessionState::DisconnectInProgress => Ok(()),
            SessionState::Error => {
                // The server never admitted it, or already forgot it.
                self.bury(session_num);
                tracing::info!(session_num, "errored session buried locally");
                Ok(())
            }
            SessionState::Connected => {
                session.advance(SessionState::DisconnectInProgress);
                let pkt = SmPkt::new(
                    SmPktType::DisconnectReq,
                    SmErrType::NoError,
                    session.unique_token,
                    session.client.clone(),
                    session.server.clone(),
                );
                tracing::debug!(session_num, server = %pkt.server, "sending disconnect request");
                self.messenger.send(pkt);
                Ok(())
            }
        }
    }

    /// Re-send the request of every client session awaiting a response,
    /// with the token it was first sent with. Returns the number of packets sent.
    pub fn retransmit_pending(&mut self) -> usize {
        let pending: Vec<SmPkt> = self
            .sessions
            .iter()
            .filter(|s| s.is_client())
            .filter_map(|s| {
                let pkt_type = match s.state() {
                    SessionState::ConnectInProgress => SmPktType::ConnectReq,
                    SessionState::DisconnectInProgress => SmPktType::DisconnectReq,
                    _ => return None,
                };
                Some(SmPkt::new(
                    pkt_type,
                    SmErrType::NoError,
                    s.unique_token,
                    s.client.clone(),
                    s.server.clone(),
                ))
            })
            .collect();

        let count = pending.len();
        for pkt in pending {
            tracing::trace!(
                session_num = pkt.client.session_num,
                pkt_type = %pkt.pkt_type,
                "retransmitting"
            );
            self.messenger.send(pkt);
        }
        count
    }

    /// Administrative teardown of any live session. No packet is sent.
    pub fn bury_session(&mut self, session_num: u16) -> Result<()> {
        if self.bury(session_num) {
            tracing::info!(session_num, "session buried");
            Ok(())
        } else {
            Err(Error::UnknownSession(session_num))
        }
    }

    /// Fatal local fault: move a live, non-terminal session to Error.
    pub fn fault_session(&mut self, session_num: u16) -> Result<()> {
        let session = self
            .sessions
            .get_mut(session_num)
            .ok_or(Error::UnknownSession(session_num))?;
        if session.advance(SessionState::Error) {
            tracing::warn!(session_num, "session moved to error by local fault");
        }
        Ok(())
    }

    /// Tombstone the slot and hand back everything the session held.
    fn bury(&mut self, session_num: u16) -> bool {
        let Some(mut session) = self.sessions.bury(session_num) else {
            return false;
        };
        for r in session.take_buffers() {
            self.allocator.release(r);
        }
        self.recvs_available += session.credits;
        if session.role == SessionRole::Server
            && self.tokens.lookup(session.unique_token) == Some(session_num)
        {
            self.tokens.remove(session.unique_token);
        }
        true
    }
}
