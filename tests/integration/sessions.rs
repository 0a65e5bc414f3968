use crate::*;

use smrpc_core::wire::{SmErrType, SmEventType};
use smrpc_session::Error;

#[tokio::test]
async fn connect_then_disconnect() -> Result<()> {
    let fabric = Fabric::new(Duration::from_millis(20));
    let server = fabric.spawn_node(node_config("node-a", 0), 0.0, 1);
    let mut client = fabric.spawn_node(node_config("node-b", 1), 0.0, 2);

    let (num, ev) = client.connect(&server).await?;
    assert_eq!(ev.session_num, num);
    assert_eq!(ev.event, SmEventType::Connected);
    assert_eq!(ev.err, SmErrType::NoError);

    let stats = server.handle.stats().await?;
    assert_eq!(stats.live_sessions, 1);
    assert_eq!(stats.tokens, 1);
    assert_eq!(stats.outstanding_alloc, 8 * 512);

    client.handle.destroy_session(num).await?;
    let ev = client.next_event().await?;
    assert_eq!(ev.event, SmEventType::Disconnected);
    assert_eq!(ev.session_num, num);

    let stats = server.handle.stats().await?;
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.tokens, 0);
    assert_eq!(stats.recvs_available, 1024);
    assert_eq!(stats.outstanding_alloc, 0);

    let stats = client.handle.stats().await?;
    assert_eq!(stats.live_sessions, 0);
    assert_eq!(stats.tombstones, 1);

    fabric.shutdown(vec![server, client]).await?;
    Ok(())
}

#[tokio::test]
async fn full_server_refuses_new_clients() -> Result<()> {
    let fabric = Fabric::new(Duration::from_millis(20));
    let mut server_config = node_config("node-a", 0);
    server_config.limits.max_sessions = 1;
    let server = fabric.spawn_node(server_config, 0.0, 1);
    let mut first = fabric.spawn_node(node_config("node-b", 1), 0.0, 2);
    let mut second = fabric.spawn_node(node_config("node-c", 1), 0.0, 3);

    let (_, ev) = first.connect(&server).await?;
    assert_eq!(ev.event, SmEventType::Connected);

    let (num, ev) = second.connect(&server).await?;
    assert_eq!(ev.event, SmEventType::ConnectFailed);
    assert_eq!(ev.err, SmErrType::TooManySessions);

    // Errored sessions are cleaned up locally.
    second.handle.destroy_session(num).await?;
    assert_eq!(second.handle.stats().await?.live_sessions, 0);
    assert_eq!(server.handle.stats().await?.live_sessions, 1);

    fabric.shutdown(vec![server, first, second]).await?;
    Ok(())
}

#[tokio::test]
async fn unanswered_session_can_be_buried() -> Result<()> {
    let fabric = Fabric::new(Duration::from_millis(5));
    let client = fabric.spawn_node(node_config("node-b", 1), 0.0, 2);

    let num = client.handle.create_session("nowhere", 0, 0).await?;
    assert!(matches!(
        client.handle.destroy_session(num).await,
        Err(Error::SessionBusy(_))
    ));
    client.handle.bury_session(num).await?;

    let mut rpcs = fabric.shutdown(vec![client]).await?;
    let rpc = rpcs.pop().context("missing node")?;
    assert_eq!(rpc.stats().live_sessions, 0);
    assert_eq!(rpc.stats().outstanding_alloc, 0);
    Ok(())
}
