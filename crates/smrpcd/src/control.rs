//! UDP control channel: carries session-management packets between hosts.
//!
//! Every instance on a host shares one `udp_port`; a request is sent to
//! `server.hostname:udp_port` and a response to `client.hostname:udp_port`.
//! Inbound packets are handed to the local actor only when their
//! destination rpc_id is ours.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use tokio::net::UdpSocket;
use tokio::sync::{broadcast, mpsc};
use zerocopy::AsBytes;

use smrpc_core::wire::{SmPkt, SM_PKT_SIZE};

pub struct ControlChannel {
    socket: Arc<UdpSocket>,
    rpc_id: u8,
    udp_port: u16,
    inbox: mpsc::Sender<SmPkt>,
    outbound: mpsc::UnboundedReceiver<SmPkt>,
    shutdown: broadcast::Receiver<()>,
}

impl ControlChannel {
    pub fn new(
        socket: Arc<UdpSocket>,
        rpc_id: u8,
        udp_port: u16,
        inbox: mpsc::Sender<SmPkt>,
        outbound: mpsc::UnboundedReceiver<SmPkt>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            socket,
            rpc_id,
            udp_port,
            inbox,
            outbound,
            shutdown,
        }
    }

    pub async fn run(mut self) -> Result<()> {
        let mut buf = vec![0u8; 2 * SM_PKT_SIZE];

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!("control channel shutting down");
                    return Ok(());
                }

                result = self.socket.recv_from(&mut buf) => {
                    let (len, peer_addr) = match result {
                        Ok(r) => r,
                        Err(e) => {
                            tracing::warn!(error = %e, "recv_from failed");
                            continue;
                        }
                    };
                    self.deliver(&buf[..len], peer_addr);
                }

                pkt = self.outbound.recv() => {
                    let Some(pkt) = pkt else {
                        tracing::info!("outbound queue closed, control channel exiting");
                        return Ok(());
                    };
                    if let Err(e) = self.transmit(&pkt).await {
                        tracing::warn!(
                            error = %e,
                            pkt_type = %pkt.pkt_type,
                            dest = %pkt.destination(),
                            "failed to send session-management packet"
                        );
                    }
                }
            }
        }
    }

    fn deliver(&self, datagram: &[u8], peer_addr: SocketAddr) {
        let pkt = match SmPkt::decode(datagram) {
            Ok(p) => p,
            Err(e) => {
                tracing::debug!(error = %e, peer = %peer_addr, "undecodable control datagram");
                return;
            }
        };
        if !is_for(&pkt, self.rpc_id) {
            tracing::trace!(dest = %pkt.destination(), "packet for another instance, ignoring");
            return;
        }
        if let Err(e) = self.inbox.try_send(pkt) {
            // The sender retransmits.
            tracing::warn!(error = %e, peer = %peer_addr, "inbox full, dropping packet");
        }
    }

    async fn transmit(&self, pkt: &SmPkt) -> Result<()> {
        let wire = pkt.encode()?;
        let dest = pkt.destination();
        let addr = tokio::net::lookup_host((dest.hostname.as_str(), self.udp_port))
            .await?
            .next()
            .ok_or_else(|| anyhow::anyhow!("no address for {}", dest.hostname))?;

        self.socket.send_to(wire.as_bytes(), addr).await?;
        tracing::trace!(
            %addr,
            pkt_type = %pkt.pkt_type,
            token = hex::encode(pkt.unique_token.to_le_bytes()),
            "control packet sent"
        );
        Ok(())
    }
}

/// True when the packet's destination instance is `rpc_id`.
fn is_for(pkt: &SmPkt, rpc_id: u8) -> bool {
    pkt.destination().rpc_id == rpc_id
}
