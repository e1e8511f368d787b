// tests/integration/registry_test.rs

//! Integration tests for the connection registry: id assignment, session
//! membership, disconnect idempotence and the periodic sweep.

use super::test_helpers::TestContext;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc};
use zircondb::config::Config;
use zircondb::core::Request;
use zircondb::core::Response;
use zircondb::core::auth::TokenHash;
use zircondb::core::registry::sweeper;

fn raw_channel() -> (
    mpsc::Sender<zircondb::core::protocol::ServerMessage>,
    mpsc::Receiver<zircondb::core::protocol::ServerMessage>,
    broadcast::Sender<()>,
) {
    let (push_tx, push_rx) = mpsc::channel(8);
    let (interrupt_tx, _) = broadcast::channel(1);
    (push_tx, push_rx, interrupt_tx)
}

#[tokio::test]
async fn test_connection_ids_are_unique_and_strictly_increasing() {
    let ctx = TestContext::new().await;
    let addr = "127.0.0.1:4444".parse().unwrap();

    let mut previous = 0;
    for _ in 0..16 {
        let (push_tx, _push_rx, interrupt_tx) = raw_channel();
        let conn = ctx.state.registry.connect(addr, push_tx, interrupt_tx);
        assert!(conn.id > previous, "ids must be strictly increasing");
        previous = conn.id;
    }
}

#[tokio::test]
async fn test_session_exists_iff_connection_set_non_empty() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();

    let (conn_id, token) = channel.open_database("hr").await;
    let hash = TokenHash::of(&token);
    let session = ctx
        .state
        .registry
        .session_for_hash(&hash)
        .expect("session must exist while a connection holds the token");
    assert_eq!(session.len(), 1);

    // Reopen attaches a second connection to the same session.
    let response = channel
        .request(None, Some(token.clone()), Request::Reopen)
        .await;
    let second_id = match response {
        Response::DatabaseOpened { connection_id, .. } => connection_id,
        other => panic!("reopen failed: {other:?}"),
    };
    assert_ne!(second_id, conn_id);
    assert_eq!(
        ctx.state.registry.session_for_hash(&hash).unwrap().len(),
        2
    );

    // Removing one connection keeps the session alive.
    ctx.state.disconnect_connection(conn_id);
    assert_eq!(
        ctx.state.registry.session_for_hash(&hash).unwrap().len(),
        1
    );

    // Removing the last one removes the session the instant it empties.
    ctx.state.disconnect_connection(second_id);
    assert!(ctx.state.registry.session_for_hash(&hash).is_none());
}

#[tokio::test]
async fn test_disconnect_is_idempotent() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();

    let (conn_id, _token) = channel.open_database("hr").await;
    assert!(ctx.state.registry.has(conn_id));

    ctx.state.disconnect_connection(conn_id);
    assert!(!ctx.state.registry.has(conn_id));
    // A second disconnect must be a no-op, not a double close.
    ctx.state.disconnect_connection(conn_id);
    assert!(!ctx.state.registry.has(conn_id));
}

#[tokio::test]
async fn test_sweep_removes_connection_with_dead_transport() {
    let ctx = TestContext::new().await;
    let addr = "127.0.0.1:4444".parse().unwrap();

    let (push_tx, push_rx, interrupt_tx) = raw_channel();
    let conn = ctx.state.registry.connect(addr, push_tx, interrupt_tx);
    let id = conn.id;
    drop(conn);

    // Dropping the receiver is how a dead handler (and thus a dead socket)
    // looks from the registry's side.
    drop(push_rx);

    sweeper::sweep(&ctx.state, Duration::from_millis(50)).await;
    assert!(!ctx.state.registry.has(id));
}

#[tokio::test]
async fn test_sweep_skips_healthy_connection_with_request_in_flight() {
    let ctx = TestContext::new().await;
    let addr = "127.0.0.1:4444".parse().unwrap();

    let (push_tx, _push_rx, interrupt_tx) = raw_channel();
    let conn = ctx.state.registry.connect(addr, push_tx, interrupt_tx);

    // Simulate an in-flight request holding the connection lock.
    let guard = conn.acquire().await;
    sweeper::sweep(&ctx.state, Duration::from_millis(20)).await;
    drop(guard);

    assert!(
        ctx.state.registry.has(conn.id),
        "bounded acquire must time out and skip, not remove"
    );
}

#[tokio::test]
async fn test_sweep_force_closes_connection_with_rotted_token() {
    let mut config = Config::default();
    config.security.token_ttl = Duration::from_millis(40);
    let ctx = TestContext::with_config(config).await;
    let mut channel = ctx.channel();

    let (conn_id, token) = channel.open_database("hr").await;
    assert!(ctx.state.registry.has(conn_id));

    // Let the token rot; the transport stays perfectly healthy.
    tokio::time::sleep(Duration::from_millis(80)).await;
    sweeper::sweep(&ctx.state, Duration::from_millis(50)).await;

    assert!(
        !ctx.state.registry.has(conn_id),
        "token rot must win over socket liveness"
    );
    assert!(
        ctx.state
            .registry
            .session_for_hash(&TokenHash::of(&token))
            .is_none()
    );
}

#[tokio::test]
async fn test_expired_token_fails_next_request_then_sweep_removes() {
    let mut config = Config::default();
    config.security.token_ttl = Duration::from_millis(40);
    let ctx = TestContext::with_config(config).await;
    let mut channel = ctx.channel();

    let (conn_id, token) = channel.open_database("hr").await;
    tokio::time::sleep(Duration::from_millis(80)).await;

    // The next request on the connection fails with a security error.
    let response = channel
        .request_expect_close(
            Some(conn_id),
            Some(token.clone()),
            Request::RecordExists { record_id: 1 },
        )
        .await;
    match response {
        Response::Error { code, .. } => {
            assert_eq!(code, zircondb::core::protocol::ErrorCode::Security)
        }
        other => panic!("expected a security error, got {other:?}"),
    }

    // The security path already removed it; a sweep pass stays clean.
    sweeper::sweep(&ctx.state, Duration::from_millis(50)).await;
    assert!(!ctx.state.registry.has(conn_id));
}

#[tokio::test]
async fn test_concurrent_requests_on_one_connection_never_interleave() {
    let ctx = TestContext::new().await;
    let addr = "127.0.0.1:4444".parse().unwrap();
    let (push_tx, _push_rx, interrupt_tx) = raw_channel();
    let conn = ctx.state.registry.connect(addr, push_tx, interrupt_tx);

    use std::sync::atomic::{AtomicBool, Ordering};
    let in_critical = std::sync::Arc::new(AtomicBool::new(false));

    let mut tasks = Vec::new();
    for _ in 0..8 {
        let conn = conn.clone();
        let in_critical = in_critical.clone();
        tasks.push(tokio::spawn(async move {
            let _guard = conn.acquire().await;
            assert!(
                !in_critical.swap(true, Ordering::SeqCst),
                "two requests overlapped inside the connection lock"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
            in_critical.store(false, Ordering::SeqCst);
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }
}
