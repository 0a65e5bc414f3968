//! smrpcd: session-management daemon for one runtime instance.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

use smrpc_core::config::SmrpcConfig;
use smrpc_core::wire::SmEventType;
use smrpc_session::{
    ActorOptions, BudgetAllocator, ChannelMessenger, LossyMessenger, LoopbackTransport, Rpc,
    RpcActor, SmEvent,
};

mod control;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Load config
    if let Err(e) = SmrpcConfig::write_default_if_missing() {
        tracing::warn!(error = %e, "failed to write default config");
    }
    let config = SmrpcConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "failed to load config, using defaults");
        SmrpcConfig::default()
    });

    let hostname = config.identity.resolved_hostname();
    let rpc_id = config.identity.rpc_id;
    tracing::info!(
        hostname = %hostname,
        rpc_id,
        phy_port = config.identity.phy_port,
        transport = ?config.identity.transport,
        "smrpcd starting"
    );

    // Control socket
    let socket = Arc::new(
        UdpSocket::bind(("0.0.0.0", config.control.udp_port))
            .await
            .context("failed to bind control socket")?,
    );
    tracing::info!(addr = %socket.local_addr()?, "control channel bound");

    // Rpc
    let (messenger, outbound_rx) = ChannelMessenger::channel();
    let messenger = LossyMessenger::new(messenger, config.control.drop_prob, rand::random());
    if config.control.drop_prob > 0.0 {
        tracing::warn!(drop_prob = config.control.drop_prob, "outbound packet loss enabled");
    }
    let transport = LoopbackTransport::new(config.identity.transport, &hostname, rpc_id);
    let allocator = BudgetAllocator::new(config.limits.alloc_budget);
    let rpc = Rpc::new(
        &config,
        transport,
        allocator,
        messenger,
        Box::new(log_sm_event),
    );

    // ── Shutdown channel ─────────────────────────────────────────────────────
    let (shutdown_tx, _) = tokio::sync::broadcast::channel::<()>(1);

    {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown signal received");
            let _ = shutdown.send(());
        });
    }

    // ── Spawn tasks ──────────────────────────────────────────────────────────

    let (inbox_tx, inbox_rx) = mpsc::channel(config.control.batch_size.max(1) * 8);

    let (actor, handle) = RpcActor::new(
        rpc,
        inbox_rx,
        shutdown_tx.subscribe(),
        ActorOptions::from_config(&config.control),
    );
    let actor_task = tokio::spawn(actor.run());

    let control_task = tokio::spawn(
        control::ControlChannel::new(
            socket,
            rpc_id,
            config.control.udp_port,
            inbox_tx,
            outbound_rx,
            shutdown_tx.subscribe(),
        )
        .run(),
    );

    for peer in &config.peers {
        match handle
            .create_session(&peer.hostname, peer.rpc_id, peer.phy_port)
            .await
        {
            Ok(session_num) => tracing::info!(
                session_num,
                peer = %peer.hostname,
                peer_rpc_id = peer.rpc_id,
                "connecting to peer"
            ),
            Err(e) => tracing::warn!(
                error = %e,
                peer = %peer.hostname,
                peer_rpc_id = peer.rpc_id,
                "failed to create session"
            ),
        }
    }

    let stats_printer = {
        let handle = handle.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(10));
            loop {
                interval.tick().await;
                match handle.stats().await {
                    Ok(stats) => tracing::info!(
                        live = stats.live_sessions,
                        tombstones = stats.tombstones,
                        recvs = stats.recvs_available,
                        alloc = stats.outstanding_alloc,
                        "session table snapshot"
                    ),
                    Err(_) => return,
                }
            }
        })
    };

    // ── Wait for exit ────────────────────────────────────────────────────────

    let mut shutdown_rx = shutdown_tx.subscribe();

    tokio::select! {
        _ = shutdown_rx.recv()  => tracing::info!("shutting down"),
        r = actor_task          => tracing::error!("rpc actor exited: {:?}", r.map(|r| r.stats())),
        r = control_task        => tracing::error!("control channel exited: {:?}", r),
        r = stats_printer       => tracing::error!("stats printer exited: {:?}", r),
    }

    Ok(())
}

fn log_sm_event(ev: SmEvent) {
    match ev.event {
        SmEventType::Connected => {
            tracing::info!(session_num = ev.session_num, "session connected")
        }
        SmEventType::Disconnected => {
            tracing::info!(session_num = ev.session_num, "session disconnected")
        }
        SmEventType::ConnectFailed | SmEventType::DisconnectFailed => tracing::warn!(
            session_num = ev.session_num,
            event = ?ev.event,
            err = %ev.err,
            "session-management failure"
        ),
    }
}
