//! smrpc wire format: session-management packets exchanged over the
//! out-of-band control channel.
//!
//! These types ARE the protocol. The on-wire structs are #[repr(C, packed)]
//! for deterministic layout and use zerocopy derives for allocation-free
//! serialization. Multi-byte integers are little-endian on the wire.
//!
//! The domain types (`SmPkt`, `SessionEndpoint`) are what the state machine
//! works with; `SmPkt::encode` / `SmPkt::decode` convert at the edge.

use std::fmt;

use serde::{Deserialize, Serialize};
use static_assertions::assert_eq_size;
use zerocopy::byteorder::{LittleEndian, U16, U64};
use zerocopy::{AsBytes, FromBytes, FromZeroes};

// ── Constants ─────────────────────────────────────────────────────────────────

/// Reserved session number meaning "not assigned yet".
/// A client fills this into the server endpoint of a ConnectReq.
pub const INVALID_SESSION_NUM: u16 = u16::MAX;

/// Reserved physical port number. Never managed by any runtime instance.
pub const INVALID_PHY_PORT: u16 = u16::MAX;

/// Maximum hostname length in bytes, including no terminator.
pub const MAX_HOSTNAME_LEN: usize = 64;

/// Size of the transport-defined routing blob.
pub const ROUTING_INFO_LEN: usize = 48;

/// Wire size of one session-management packet.
pub const SM_PKT_SIZE: usize = 246;

// ── Enums ─────────────────────────────────────────────────────────────────────

/// Data-plane transport kind. Both ends of a session must agree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum TransportType {
    Invalid = 0x00,
    InfiniBand = 0x01,
    Roce = 0x02,
    Raw = 0x03,
}

impl TryFrom<u8> for TransportType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(TransportType::Invalid),
            0x01 => Ok(TransportType::InfiniBand),
            0x02 => Ok(TransportType::Roce),
            0x03 => Ok(TransportType::Raw),
            other => Err(WireError::UnknownTransport(other)),
        }
    }
}

impl From<TransportType> for u8 {
    fn from(t: TransportType) -> u8 {
        t as u8
    }
}

/// Session-management packet kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SmPktType {
    ConnectReq = 0x01,
    ConnectResp = 0x02,
    DisconnectReq = 0x03,
    DisconnectResp = 0x04,
}

impl SmPktType {
    /// Requests travel client → server, responses server → client.
    pub fn is_req(self) -> bool {
        matches!(self, SmPktType::ConnectReq | SmPktType::DisconnectReq)
    }

    /// The response kind answering this request kind.
    pub fn resp_type(self) -> SmPktType {
        match self {
            SmPktType::ConnectReq | SmPktType::ConnectResp => SmPktType::ConnectResp,
            SmPktType::DisconnectReq | SmPktType::DisconnectResp => SmPktType::DisconnectResp,
        }
    }
}

impl TryFrom<u8> for SmPktType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x01 => Ok(SmPktType::ConnectReq),
            0x02 => Ok(SmPktType::ConnectResp),
            0x03 => Ok(SmPktType::DisconnectReq),
            0x04 => Ok(SmPktType::DisconnectResp),
            other => Err(WireError::UnknownPktType(other)),
        }
    }
}

impl fmt::Display for SmPktType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmPktType::ConnectReq => "connect-request",
            SmPktType::ConnectResp => "connect-response",
            SmPktType::DisconnectReq => "disconnect-request",
            SmPktType::DisconnectResp => "disconnect-response",
        };
        f.write_str(s)
    }
}

/// Outcome carried in every response. Returned to the requester, never thrown.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SmErrType {
    NoError = 0x00,
    TooManySessions = 0x01,
    RecvsExhausted = 0x02,
    OutOfMemory = 0x03,
    RoutingResolutionFailure = 0x04,
    InvalidRemotePort = 0x05,
    InvalidTransport = 0x06,
}

impl SmErrType {
    pub fn is_ok(self) -> bool {
        self == SmErrType::NoError
    }
}

impl TryFrom<u8> for SmErrType {
    type Error = WireError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(SmErrType::NoError),
            0x01 => Ok(SmErrType::TooManySessions),
            0x02 => Ok(SmErrType::RecvsExhausted),
            0x03 => Ok(SmErrType::OutOfMemory),
            0x04 => Ok(SmErrType::RoutingResolutionFailure),
            0x05 => Ok(SmErrType::InvalidRemotePort),
            0x06 => Ok(SmErrType::InvalidTransport),
            other => Err(WireError::UnknownErrType(other)),
        }
    }
}

impl fmt::Display for SmErrType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SmErrType::NoError => "no error",
            SmErrType::TooManySessions => "too many sessions",
            SmErrType::RecvsExhausted => "receive credits exhausted",
            SmErrType::OutOfMemory => "out of memory",
            SmErrType::RoutingResolutionFailure => "routing resolution failure",
            SmErrType::InvalidRemotePort => "invalid remote port",
            SmErrType::InvalidTransport => "invalid transport",
        };
        f.write_str(s)
    }
}

/// Event delivered to the application's session-management callback.
/// Local only, never on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SmEventType {
    Connected,
    ConnectFailed,
    Disconnected,
    DisconnectFailed,
}

// ── Domain types ──────────────────────────────────────────────────────────────

/// Opaque transport-defined routing blob (e.g. QPN + GID for InfiniBand).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct RoutingInfo(pub [u8; ROUTING_INFO_LEN]);

impl RoutingInfo {
    pub fn zeroed() -> Self {
        Self([0u8; ROUTING_INFO_LEN])
    }
}

impl fmt::Debug for RoutingInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RoutingInfo({})", hex::encode(&self.0[..8]))
    }
}

/// One side of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEndpoint {
    pub transport_type: TransportType,
    pub hostname: String,
    pub phy_port: u16,
    pub rpc_id: u8,
    /// Session number on this side, or `INVALID_SESSION_NUM`.
    pub session_num: u16,
    pub routing_info: RoutingInfo,
}

impl fmt::Display for SessionEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.session_num == INVALID_SESSION_NUM {
            write!(f, "[H: {}, R: {}, S: XX]", self.hostname, self.rpc_id)
        } else {
            write!(
                f,
                "[H: {}, R: {}, S: {}]",
                self.hostname, self.rpc_id, self.session_num
            )
        }
    }
}

/// A session-management packet. Plain value, copied freely.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SmPkt {
    pub pkt_type: SmPktType,
    pub err_type: SmErrType,
    /// Chosen by the request originator; identical across retransmissions
    /// and echoed in the response.
    pub unique_token: u64,
    pub client: SessionEndpoint,
    pub server: SessionEndpoint,
}

impl SmPkt {
    pub fn new(
        pkt_type: SmPktType,
        err_type: SmErrType,
        unique_token: u64,
        client: SessionEndpoint,
        server: SessionEndpoint,
    ) -> Self {
        Self {
            pkt_type,
            err_type,
            unique_token,
            client,
            server,
        }
    }

    pub fn is_req(&self) -> bool {
        self.pkt_type.is_req()
    }

    /// Turn a request into its response, keeping token and endpoints.
    pub fn into_resp(mut self, err_type: SmErrType) -> SmPkt {
        self.pkt_type = self.pkt_type.resp_type();
        self.err_type = err_type;
        self
    }

    /// The endpoint this packet is addressed to.
    pub fn destination(&self) -> &SessionEndpoint {
        if self.is_req() {
            &self.server
        } else {
            &self.client
        }
    }

    pub fn encode(&self) -> Result<WireSmPkt, WireError> {
        Ok(WireSmPkt {
            pkt_type: self.pkt_type as u8,
            err_type: self.err_type as u8,
            unique_token: U64::new(self.unique_token),
            client: WireEndpoint::encode(&self.client)?,
            server: WireEndpoint::encode(&self.server)?,
        })
    }

    pub fn decode(bytes: &[u8]) -> Result<SmPkt, WireError> {
        let wire = WireSmPkt::read_from(bytes).ok_or(WireError::BadLength(bytes.len()))?;
        SmPkt::try_from(&wire)
    }
}

impl TryFrom<&WireSmPkt> for SmPkt {
    type Error = WireError;

    fn try_from(wire: &WireSmPkt) -> Result<Self, Self::Error> {
        let client = wire.client;
        let server = wire.server;
        Ok(SmPkt {
            pkt_type: SmPktType::try_from(wire.pkt_type)?,
            err_type: SmErrType::try_from(wire.err_type)?,
            unique_token: wire.unique_token.get(),
            client: client.decode()?,
            server: server.decode()?,
        })
    }
}

// ── On-wire structs ───────────────────────────────────────────────────────────

/// On-wire session endpoint. Hostname is NUL-padded UTF-8.
///
/// Wire size: 118 bytes.
#[derive(Debug, Clone, Copy, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WireEndpoint {
    pub transport_type: u8,
    pub hostname: [u8; MAX_HOSTNAME_LEN],
    pub phy_port: U16<LittleEndian>,
    pub rpc_id: u8,
    pub session_num: U16<LittleEndian>,
    pub routing_info: [u8; ROUTING_INFO_LEN],
}

assert_eq_size!(WireEndpoint, [u8; 118]);

impl WireEndpoint {
    fn encode(ep: &SessionEndpoint) -> Result<Self, WireError> {
        let name = ep.hostname.as_bytes();
        if name.len() > MAX_HOSTNAME_LEN {
            return Err(WireError::HostnameTooLong(name.len()));
        }
        let mut hostname = [0u8; MAX_HOSTNAME_LEN];
        hostname[..name.len()].copy_from_slice(name);

        Ok(Self {
            transport_type: ep.transport_type.into(),
            hostname,
            phy_port: U16::new(ep.phy_port),
            rpc_id: ep.rpc_id,
            session_num: U16::new(ep.session_num),
            routing_info: ep.routing_info.0,
        })
    }

    fn decode(&self) -> Result<SessionEndpoint, WireError> {
        let raw = &self.hostname;
        let end = raw.iter().position(|b| *b == 0).unwrap_or(raw.len());
        let hostname = std::str::from_utf8(&raw[..end])
            .map_err(|_| WireError::InvalidHostname)?
            .to_owned();

        Ok(SessionEndpoint {
            transport_type: TransportType::try_from(self.transport_type)?,
            hostname,
            phy_port: self.phy_port.get(),
            rpc_id: self.rpc_id,
            session_num: self.session_num.get(),
            routing_info: RoutingInfo(self.routing_info),
        })
    }
}

/// On-wire session-management packet. One datagram per packet.
///
/// Wire size: 246 bytes.
#[derive(Debug, Clone, AsBytes, FromBytes, FromZeroes)]
#[repr(C, packed)]
pub struct WireSmPkt {
    pub pkt_type: u8,
    pub err_type: u8,
    pub unique_token: U64<LittleEndian>,
    pub client: WireEndpoint,
    pub server: WireEndpoint,
}

assert_eq_size!(WireSmPkt, [u8; SM_PKT_SIZE]);

// ── Errors ────────────────────────────────────────────────────────────────────

/// Errors that can arise when interpreting wire-format data.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    #[error("unknown packet type byte: 0x{0:02x}")]
    UnknownPktType(u8),

    #[error("unknown error type byte: 0x{0:02x}")]
    UnknownErrType(u8),

    #[error("unknown transport type byte: 0x{0:02x}")]
    UnknownTransport(u8),

    #[error("hostname of {0} bytes exceeds maximum {}", MAX_HOSTNAME_LEN)]
    HostnameTooLong(usize),

    #[error("hostname is not valid UTF-8")]
    InvalidHostname,

    #[error("datagram of {0} bytes is not a session-management packet ({} bytes)", SM_PKT_SIZE)]
    BadLength(usize),
}

// ── Tests ─────────────────────────────────────────────────────────────────────
