//! RPC actor: runs one `Rpc` on a single task.
//!
//! Inbound session-management packets, local API calls and the retransmit
//! timer are multiplexed onto one loop, so the session table is only ever
//! touched by this task.

use std::time::Duration;

use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::time::MissedTickBehavior;

use smrpc_core::config::ControlConfig;
use smrpc_core::wire::SmPkt;

use crate::alloc::Allocator;
use crate::error::{Error, Result};
use crate::messenger::Messenger;
use crate::rpc::{Rpc, RpcStats};
use crate::transport::Transport;

const COMMAND_QUEUE_DEPTH: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct ActorOptions {
    /// Maximum packets handled per inbox drain.
    pub batch_size: usize,
    /// Period of the retransmit sweep.
    pub retransmit: Duration,
}

impl ActorOptions {
    pub fn from_config(control: &ControlConfig) -> Self {
        Self {
            batch_size: control.batch_size.max(1),
            retransmit: Duration::from_millis(control.retransmit_ms.max(1)),
        }
    }
}

impl Default for ActorOptions {
    fn default() -> Self {
        Self::from_config(&ControlConfig::default())
    }
}

enum Command {
    CreateSession {
        hostname: String,
        rpc_id: u8,
        phy_port: u16,
        reply: oneshot::Sender<Result<u16>>,
    },
    DestroySession {
        session_num: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    BurySession {
        session_num: u16,
        reply: oneshot::Sender<Result<()>>,
    },
    Stats {
        reply: oneshot::Sender<RpcStats>,
    },
    Shutdown,
}

/// Cloneable handle for calling into a running actor.
#[derive(Clone)]
pub struct RpcHandle {
    tx: mpsc::Sender<Command>,
}

impl RpcHandle {
    async fn call<R>(&self, make: impl FnOnce(oneshot::Sender<R>) -> Command) -> Result<R> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| Error::ActorGone)?;
        rx.await.map_err(|_| Error::ActorGone)
    }

    pub async fn create_session(&self, hostname: &str, rpc_id: u8, phy_port: u16) -> Result<u16> {
        let hostname = hostname.to_string();
        self.call(|reply| Command::CreateSession {
            hostname,
            rpc_id,
            phy_port,
            reply,
        })
        .await?
    }

    pub async fn destroy_session(&self, session_num: u16) -> Result<()> {
        self.call(|reply| Command::DestroySession { session_num, reply })
            .await?
    }

    pub async fn bury_session(&self, session_num: u16) -> Result<()> {
        self.call(|reply| Command::BurySession { session_num, reply })
            .await?
    }

    pub async fn stats(&self) -> Result<RpcStats> {
        self.call(|reply| Command::Stats { reply }).await
    }

    /// Ask the actor to stop. Returns once the request is queued.
    pub async fn shutdown(&self) -> Result<()> {
        self.tx
            .send(Command::Shutdown)
            .await
            .map_err(|_| Error::ActorGone)
    }
}

pub struct RpcActor<T, A, M> {
    rpc: Rpc<T, A, M>,
    inbox: mpsc::Receiver<SmPkt>,
    commands: mpsc::Receiver<Command>,
    shutdown: broadcast::Receiver<()>,
    options: ActorOptions,
}

impl<T, A, M> RpcActor<T, A, M>
where
    T: Transport,
    A: Allocator,
    M: Messenger,
{
    pub fn new(
        rpc: Rpc<T, A, M>,
        inbox: mpsc::Receiver<SmPkt>,
        shutdown: broadcast::Receiver<()>,
        options: ActorOptions,
    ) -> (Self, RpcHandle) {
        let (tx, commands) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let actor = Self {
            rpc,
            inbox,
            commands,
            shutdown,
            options,
        };
        (actor, RpcHandle { tx })
    }

    /// Run until shutdown or until the inbox closes. Hands the `Rpc` back.
    pub async fn run(mut self) -> Rpc<T, A, M> {
        let batch_size = self.options.batch_size.max(1);
        let mut batch = Vec::with_capacity(batch_size);
        let mut retransmit = tokio::time::interval(self.options.retransmit);
        retransmit.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // First tick completes immediately.
        retransmit.tick().await;

        tracing::info!(
            hostname = self.rpc.hostname(),
            rpc_id = self.rpc.rpc_id(),
            batch_size,
            "rpc actor started"
        );

        loop {
            tokio::select! {
                _ = self.shutdown.recv() => {
                    tracing::info!(rpc_id = self.rpc.rpc_id(), "rpc actor shutting down");
                    break;
                }

                Some(cmd) = self.commands.recv() => {
                    if !self.handle_command(cmd) {
                        tracing::info!(rpc_id = self.rpc.rpc_id(), "rpc actor stopped by handle");
                        break;
                    }
                }

                n = self.inbox.recv_many(&mut batch, batch_size) => {
                    if n == 0 {
                        let rpc_id = self.rpc.rpc_id();
                        tracing::info!(rpc_id, "inbox closed, rpc actor exiting");
                        break;
                    }
                    tracing::trace!(n, "processing session-management batch");
                    self.rpc.process_batch(&mut batch);
                }

                _ = retransmit.tick() => {
                    let sent = self.rpc.retransmit_pending();
                    if sent > 0 {
                        tracing::debug!(sent, "retransmitted pending requests");
                    }
                }
            }
        }

        self.rpc
    }

    /// Returns false when the actor should stop.
    fn handle_command(&mut self, cmd: Command) -> bool {
        match cmd {
            Command::CreateSession {
                hostname,
                rpc_id,
                phy_port,
                reply,
            } => {
                let _ = reply.send(self.rpc.create_session(&hostname, rpc_id, phy_port));
            }
            Command::DestroySession { session_num, reply } => {
                let _ = reply.send(self.rpc.destroy_session(session_num));
            }
            Command::BurySession { session_num, reply } => {
                let _ = reply.send(self.rpc.bury_session(session_num));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.rpc.stats());
            }
            Command::Shutdown => return false,
        }
        true
    }
}
