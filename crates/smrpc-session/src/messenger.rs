//! Control-channel messenger contract: unreliable, fire-and-forget sends.

use std::collections::VecDeque;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use smrpc_core::wire::SmPkt;
use tokio::sync::mpsc;

pub trait Messenger {
    /// Enqueue for sending. No delivery guarantee.
    fn send(&mut self, pkt: SmPkt);
}

/// Keeps every sent packet in order, for inspection.
#[derive(Debug, Default)]
pub struct RecordingMessenger {
    sent: VecDeque<SmPkt>,
}

impl RecordingMessenger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Oldest packet not yet popped.
    pub fn pop_sent(&mut self) -> Option<SmPkt> {
        self.sent.pop_front()
    }

    pub fn sent_len(&self) -> usize {
        self.sent.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sent.is_empty()
    }

    pub fn clear(&mut self) {
        self.sent.clear();
    }
}

impl Messenger for RecordingMessenger {
    fn send(&mut self, pkt: SmPkt) {
        self.sent.push_back(pkt);
    }
}

/// Hands packets to whatever owns the receiving end (a UDP sender task,
/// an in-memory router).
#[derive(Debug, Clone)]
pub struct ChannelMessenger {
    tx: mpsc::UnboundedSender<SmPkt>,
}

impl ChannelMessenger {
    pub fn new(tx: mpsc::UnboundedSender<SmPkt>) -> Self {
        Self { tx }
    }

    pub fn channel() -> (Self, mpsc::UnboundedReceiver<SmPkt>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self::new(tx), rx)
    }
}

impl Messenger for ChannelMessenger {
    fn send(&mut self, pkt: SmPkt) {
        if self.tx.send(pkt).is_err() {
            tracing::warn!("control channel closed, dropping session-management packet");
        }
    }
}

/// Drops outbound packets with a fixed probability.
#[derive(Debug)]
pub struct LossyMessenger<M> {
    inner: M,
    drop_prob: f64,
    rng: StdRng,
    dropped: u64,
}

impl<M: Messenger> LossyMessenger<M> {
    pub fn new(inner: M, drop_prob: f64, seed: u64) -> Self {
        Self {
            inner,
            drop_prob,
            rng: StdRng::seed_from_u64(seed),
            dropped: 0,
        }
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    pub fn inner(&self) -> &M {
        &self.inner
    }
}

impl<M: Messenger> Messenger for LossyMessenger<M> {
    fn send(&mut self, pkt: SmPkt) {
        if self.drop_prob > 0.0 && self.rng.gen_bool(self.drop_prob) {
            self.dropped += 1;
            tracing::trace!(
                pkt_type = %pkt.pkt_type,
                token = hex::encode(pkt.unique_token.to_le_bytes()),
                "fault injection: dropped session-management packet"
            );
            return;
        }
        self.inner.send(pkt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use smrpc_core::wire::{
        RoutingInfo, SessionEndpoint, SmErrType, SmPktType, TransportType, INVALID_SESSION_NUM,
    };

    fn pkt(token: u64) -> SmPkt {
        let ep = SessionEndpoint {
            transport_type: TransportType::InfiniBand,
            hostname: "localhost".into(),
            phy_port: 0,
            rpc_id: 0,
            session_num: INVALID_SESSION_NUM,
            routing_info: RoutingInfo::zeroed(),
        };
        SmPkt::new(SmPktType::ConnectReq, SmErrType::NoError, token, ep.clone(), ep)
    }

    #[test]
    fn recording_messenger_is_fifo() {
        let mut m = RecordingMessenger::new();
        m.send(pkt(1));
        m.send(pkt(2));
        assert_eq!(m.sent_len(), 2);
        assert_eq!(m.pop_sent().unwrap().unique_token, 1);
        assert_eq!(m.pop_sent().unwrap().unique_token, 2);
        assert!(m.pop_sent().is_none());
    }

    #[test]
    fn lossy_messenger_extremes() {
        let mut never = LossyMessenger::new(RecordingMessenger::new(), 0.0, 7);
        let mut always = LossyMessenger::new(RecordingMessenger::new(), 1.0, 7);
        for i in 0..50 {
            never.send(pkt(i));
            always.send(pkt(i));
        }
        assert_eq!(never.inner().sent_len(), 50);
        assert_eq!(never.dropped(), 0);
        assert!(always.inner().is_empty());
        assert_eq!(always.dropped(), 50);
    }

    #[tokio::test]
    async fn channel_messenger_forwards() {
        let (mut m, mut rx) = ChannelMessenger::channel();
        m.send(pkt(9));
        assert_eq!(rx.recv().await.unwrap().unique_token, 9);

        drop(rx);
        // Closed receiver is logged, not a panic.
        m.send(pkt(10));
    }
}
