//! Transport contract: what session management needs from the data plane.

use smrpc_core::wire::{RoutingInfo, TransportType, ROUTING_INFO_LEN};

pub trait Transport {
    fn transport_type(&self) -> TransportType;

    /// Routing info a peer needs to reach this instance.
    fn fill_local_routing_info(&self) -> RoutingInfo;

    /// Make a peer's routing info usable for sending. `false` if unresolvable.
    fn resolve_routing_info(&mut self, info: &RoutingInfo) -> bool;
}

const LOOPBACK_MAGIC: &[u8; 4] = b"SMRI";

/// In-process transport. Routing info is a tagged copy of the instance's
/// hostname and rpc id; anything without the tag fails to resolve.
#[derive(Debug, Clone)]
pub struct LoopbackTransport {
    transport_type: TransportType,
    local: RoutingInfo,
    resolved: usize,
}

impl LoopbackTransport {
    pub fn new(transport_type: TransportType, hostname: &str, rpc_id: u8) -> Self {
        let mut raw = [0u8; ROUTING_INFO_LEN];
        raw[..4].copy_from_slice(LOOPBACK_MAGIC);
        raw[4] = rpc_id;
        let name = hostname.as_bytes();
        let len = name.len().min(ROUTING_INFO_LEN - 5);
        raw[5..5 + len].copy_from_slice(&name[..len]);

        Self {
            transport_type,
            local: RoutingInfo(raw),
            resolved: 0,
        }
    }

    /// Number of successful resolutions so far.
    pub fn resolved(&self) -> usize {
        self.resolved
    }
}

impl Transport for LoopbackTransport {
    fn transport_type(&self) -> TransportType {
        self.transport_type
    }

    fn fill_local_routing_info(&self) -> RoutingInfo {
        self.local
    }

    fn resolve_routing_info(&mut self, info: &RoutingInfo) -> bool {
        if &info.0[..4] != LOOPBACK_MAGIC {
            return false;
        }
        self.resolved += 1;
        true
    }
}
