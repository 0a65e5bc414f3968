use crate::*;

use smrpc_core::wire::SmEventType;

/// Half of all packets in both directions are lost. Retransmission must
/// still produce exactly one server session per client session, and
/// tear every one of them down again.
#[tokio::test]
async fn sessions_survive_packet_loss() -> Result<()> {
    const SESSIONS: usize = 4;

    let fabric = Fabric::new(Duration::from_millis(5));
    let server = fabric.spawn_node(node_config("node-a", 0), 0.5, 11);
    let mut client = fabric.spawn_node(node_config("node-b", 1), 0.5, 12);

    let mut nums = Vec::new();
    for _ in 0..SESSIONS {
        nums.push(
            client
                .handle
                .create_session(&server.hostname, server.rpc_id, 0)
                .await?,
        );
    }
    for _ in 0..SESSIONS {
        let ev = client.next_event().await?;
        assert_eq!(ev.event, SmEventType::Connected, "unexpected event {ev:?}");
    }

    let stats = server.handle.stats().await?;
    assert_eq!(stats.live_sessions, SESSIONS);
    assert_eq!(stats.tokens, SESSIONS);

    for &num in &nums {
        client.handle.destroy_session(num).await?;
    }
    for _ in 0..SESSIONS {
        let ev = client.next_event().await?;
        assert_eq!(ev.event, SmEventType::Disconnected, "unexpected event {ev:?}");
    }

    let rpcs = fabric.shutdown(vec![server, client]).await?;
    for rpc in &rpcs {
        assert_eq!(rpc.stats().live_sessions, 0);
        assert_eq!(rpc.stats().outstanding_alloc, 0);
    }
    assert!(rpcs[0].tokens().is_empty());
    assert!(rpcs[0].messenger().dropped() > 0 || rpcs[1].messenger().dropped() > 0);
    Ok(())
}
