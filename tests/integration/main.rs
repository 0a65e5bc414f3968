//! smrpc integration test harness.
//!
//! Runs several RPC actors in one process, wired together by an in-memory
//! fabric that routes each session-management packet to the inbox of its
//! destination instance, keyed by (hostname, rpc_id). Fabric links can drop
//! packets to exercise retransmission.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use smrpc_core::config::SmrpcConfig;
use smrpc_core::wire::SmPkt;
use smrpc_session::{
    ActorOptions, BudgetAllocator, ChannelMessenger, LossyMessenger, LoopbackTransport, Rpc,
    RpcActor, RpcHandle, SmEvent,
};

mod fault;
mod sessions;

// ── Harness ───────────────────────────────────────────────────────────────────

pub type NodeRpc = Rpc<LoopbackTransport, BudgetAllocator, LossyMessenger<ChannelMessenger>>;

/// Upper bound on any single wait in these tests.
pub const WAIT: Duration = Duration::from_secs(10);

type Routes = Arc<Mutex<HashMap<(String, u8), mpsc::Sender<SmPkt>>>>;

/// In-memory stand-in for the control channel.
pub struct Fabric {
    routes: Routes,
    shutdown: broadcast::Sender<()>,
    retransmit: Duration,
}

/// One runtime instance attached to a fabric.
pub struct Node {
    pub handle: RpcHandle,
    pub events: mpsc::UnboundedReceiver<SmEvent>,
    pub hostname: String,
    pub rpc_id: u8,
    task: JoinHandle<NodeRpc>,
}

impl Fabric {
    pub fn new(retransmit: Duration) -> Self {
        let (shutdown, _) = broadcast::channel(1);
        Self {
            routes: Arc::new(Mutex::new(HashMap::new())),
            shutdown,
            retransmit,
        }
    }

    /// Start an instance. Its outbound packets are dropped with
    /// probability `drop_prob`.
    pub fn spawn_node(&self, config: SmrpcConfig, drop_prob: f64, seed: u64) -> Node {
        let hostname = config.identity.resolved_hostname();
        let rpc_id = config.identity.rpc_id;

        let (messenger, mut outbound) = ChannelMessenger::channel();
        let messenger = LossyMessenger::new(messenger, drop_prob, seed);
        let (event_tx, events) = mpsc::unbounded_channel();
        let rpc = Rpc::new(
            &config,
            LoopbackTransport::new(config.identity.transport, &hostname, rpc_id),
            BudgetAllocator::new(config.limits.alloc_budget),
            messenger,
            Box::new(move |ev: SmEvent| {
                let _ = event_tx.send(ev);
            }),
        );

        let (inbox_tx, inbox) = mpsc::channel(256);
        self.routes
            .lock()
            .unwrap()
            .insert((hostname.clone(), rpc_id), inbox_tx);

        let options = ActorOptions {
            batch_size: 8,
            retransmit: self.retransmit,
        };
        let (actor, handle) = RpcActor::new(rpc, inbox, self.shutdown.subscribe(), options);
        let task = tokio::spawn(actor.run());

        let routes = self.routes.clone();
        tokio::spawn(async move {
            while let Some(pkt) = outbound.recv().await {
                let dest = pkt.destination();
                let key = (dest.hostname.clone(), dest.rpc_id);
                let inbox = routes.lock().unwrap().get(&key).cloned();
                match inbox {
                    Some(tx) => {
                        let _ = tx.send(pkt).await;
                    }
                    None => eprintln!("fabric: no route to {}:{}", key.0, key.1),
                }
            }
        });

        Node {
            handle,
            events,
            hostname,
            rpc_id,
            task,
        }
    }

    /// Stop every node and hand back their final state.
    pub async fn shutdown(self, nodes: Vec<Node>) -> Result<Vec<NodeRpc>> {
        let _ = self.shutdown.send(());
        let mut rpcs = Vec::with_capacity(nodes.len());
        for node in nodes {
            let rpc = tokio::time::timeout(WAIT, node.task)
                .await
                .context("actor did not stop")??;
            rpcs.push(rpc);
        }
        Ok(rpcs)
    }
}

impl Node {
    /// Next session-management event.
    pub async fn next_event(&mut self) -> Result<SmEvent> {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .context("timed out waiting for a session-management event")?
            .context("event channel closed")
    }

    /// Open a session to `peer` and wait for its first event.
    pub async fn connect(&mut self, peer: &Node) -> Result<(u16, SmEvent)> {
        let num = self
            .handle
            .create_session(&peer.hostname, peer.rpc_id, 0)
            .await?;
        let ev = self.next_event().await?;
        Ok((num, ev))
    }
}

pub fn node_config(hostname: &str, rpc_id: u8) -> SmrpcConfig {
    let mut config = SmrpcConfig::default();
    config.identity.hostname = hostname.into();
    config.identity.rpc_id = rpc_id;
    config.limits.session_credits = 8;
    config.limits.num_recvs = 1024;
    config.limits.mtu = 512;
    config
}
