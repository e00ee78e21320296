//! Room join against the loopback stub server.

use std::time::Duration;

use realm_client::{
    presentation::{AvatarRef, AvatarSpawned, JoinFailed},
    sync::{ConnectionState, JoinError, NetworkSyncClient, SyncNotice, SyncSettings},
};
use realm_shared::{
    net::{JoinReply, MAX_ROOM_ID_LEN, ROOM_CAPACITY},
    tile::TileCoordinate,
};
use realm_tests::{bind_ephemeral, demo_game, frames_until, init_tracing, raw_join, DEFAULT_ROOM};

const WAIT: Duration = Duration::from_secs(5);

/// Polls `client` until a join outcome arrives.
async fn join_outcome(client: &mut NetworkSyncClient) -> anyhow::Result<SyncNotice> {
    tokio::time::timeout(WAIT, async {
        loop {
            for notice in client.poll() {
                if matches!(notice, SyncNotice::Joined(_) | SyncNotice::JoinFailed(_)) {
                    return notice;
                }
            }
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await
    .map_err(|_| anyhow::anyhow!("no join outcome"))
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_empty_room_spawns_only_local_avatar() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral().await?;
    let mut game = demo_game(&server.addr(), "alice")?;
    game.events().clear();

    game.join(None)?;
    assert!(frames_until(&mut game, WAIT, |g| g.sync().state() == ConnectionState::Open).await);

    assert_eq!(game.room_id(), Some(DEFAULT_ROOM));
    assert_eq!(game.world().current_room_index(), 0);
    assert_eq!(game.local().current_tile(), TileCoordinate::new(0, 0));
    assert!(game.remotes().is_empty());
    let spawned = game.events().drain::<AvatarSpawned>();
    assert!(spawned.iter().all(|s| s.avatar == AvatarRef::Local));

    // The server sees the channel once the hello lands.
    let deadline = tokio::time::Instant::now() + WAIT;
    while server.sessions(DEFAULT_ROOM).is_empty() && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(server.sessions(DEFAULT_ROOM), vec!["alice".to_string()]);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn join_roster_spawns_existing_peers() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral().await?;
    assert!(matches!(raw_join(&server.addr(), "bob", Some("garden")).await?, JoinReply::Ok(_)));

    let mut game = demo_game(&server.addr(), "alice")?;
    game.join(Some("garden"))?;
    assert!(frames_until(&mut game, WAIT, |g| g.room_id().is_some()).await);

    assert_eq!(game.remotes().len(), 1);
    assert!(game.remotes().get("bob").is_some());
    assert!(game.remotes().get("alice").is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn full_room_is_reported_as_room_full() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral().await?;
    server.fill_room("busy", ROOM_CAPACITY);

    let mut client = NetworkSyncClient::tcp(&server.addr(), SyncSettings::default());
    client.join("alice", Some("busy"))?;
    match join_outcome(&mut client).await? {
        SyncNotice::JoinFailed(e) => assert_eq!(e, JoinError::RoomFull),
        other => panic!("unexpected {other:?}"),
    }
    assert_eq!(client.state(), ConnectionState::Disconnected);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn server_side_room_id_rejection_maps_to_invalid_room_id() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral().await?;
    let mut game = demo_game(&server.addr(), "alice")?;

    game.join(Some("not a room!"))?;
    let deadline = tokio::time::Instant::now() + WAIT;
    while game.events().peek::<JoinFailed>().is_empty() && tokio::time::Instant::now() < deadline {
        game.frame(realm_tests::FRAME);
        tokio::time::sleep(Duration::from_millis(2)).await;
    }
    let failures = game.events().drain::<JoinFailed>();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].error, JoinError::InvalidRoomId);
    assert_eq!(game.room_id(), None);
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn local_validation_fails_before_any_request() -> anyhow::Result<()> {
    init_tracing();
    let server = bind_ephemeral().await?;
    let mut client = NetworkSyncClient::tcp(&server.addr(), SyncSettings::default());

    assert_eq!(client.join("", None), Err(JoinError::MissingIdentity));
    assert_eq!(client.join("   ", None), Err(JoinError::MissingIdentity));
    let long = "r".repeat(MAX_ROOM_ID_LEN + 1);
    assert_eq!(client.join("alice", Some(&long)), Err(JoinError::RoomIdTooLong));
    assert_eq!(client.join("alice", Some("")), Err(JoinError::InvalidRoomId));

    // The server enforces the same limits for clients that skip validation.
    match raw_join(&server.addr(), "alice", Some(&long)).await? {
        JoinReply::Rejected { code, .. } => assert_eq!(code, "room_id_too_long"),
        other => panic!("unexpected {other:?}"),
    }
    match raw_join(&server.addr(), "", None).await? {
        JoinReply::Rejected { code, .. } => assert_eq!(code, "missing_identity"),
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn unreachable_server_is_a_transport_error() -> anyhow::Result<()> {
    init_tracing();
    // Bind and drop to get a port nobody listens on.
    let addr = {
        let server = bind_ephemeral().await?;
        server.addr()
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    let mut client = NetworkSyncClient::tcp(&addr, SyncSettings::default());
    client.join("alice", None)?;
    match join_outcome(&mut client).await? {
        SyncNotice::JoinFailed(JoinError::Transport(_)) => {}
        other => panic!("unexpected {other:?}"),
    }
    Ok(())
}
