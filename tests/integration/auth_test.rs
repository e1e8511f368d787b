// tests/integration/auth_test.rs

//! Integration tests for authentication: credentials, token binding,
//! per-request token checks and the authenticated shutdown request.

use super::test_helpers::{TestContext, expect_error};
use zircondb::core::Request;
use zircondb::core::Response;
use zircondb::core::auth::{DatabaseKind, TokenHash};
use zircondb::core::protocol::ErrorCode;

#[tokio::test]
async fn test_connect_with_bad_credentials_closes_channel() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();

    let response = channel
        .request_expect_close(
            None,
            None,
            Request::Connect {
                username: "reader".to_string(),
                password: "wrong".to_string(),
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);
    assert!(ctx.state.registry.is_empty());
}

#[tokio::test]
async fn test_connect_returns_valid_server_token() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();

    let response = channel
        .request(
            None,
            None,
            Request::Connect {
                username: "root".to_string(),
                password: "root_pwd".to_string(),
            },
        )
        .await;
    let (connection_id, token) = match response {
        Response::Connected {
            connection_id,
            token,
        } => (connection_id, token),
        other => panic!("connect failed: {other:?}"),
    };
    assert!(ctx.state.registry.has(connection_id));

    let parsed = ctx.state.token_handler.parse_and_validate(&token).unwrap();
    assert_eq!(parsed.claims.kind, DatabaseKind::Server);
    assert!(
        ctx.state
            .registry
            .session_for_hash(&TokenHash::of(&token))
            .is_some()
    );
}

#[tokio::test]
async fn test_open_database_token_carries_database_claims() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();

    let (_conn, token) = channel.open_database("inventory").await;
    let parsed = ctx.state.token_handler.parse_and_validate(&token).unwrap();
    assert_eq!(parsed.claims.database, "inventory");
    assert_eq!(parsed.claims.kind, DatabaseKind::Document);
}

#[tokio::test]
async fn test_missing_token_on_token_based_connection_is_security_error() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, _token) = channel.open_database("inventory").await;

    let response = channel
        .request_expect_close(Some(conn), None, Request::RecordExists { record_id: 1 })
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);
    assert!(message.contains("missing the session token"));
    assert!(
        !ctx.state.registry.has(conn),
        "a security failure never leaves the connection half-authenticated"
    );
}

#[tokio::test]
async fn test_foreign_token_is_rejected() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, _token) = channel.open_database("inventory").await;

    let foreign = ctx
        .state
        .token_handler
        .mint("inventory", DatabaseKind::Document)
        .unwrap();
    let response = channel
        .request_expect_close(
            Some(conn),
            Some(foreign.to_vec()),
            Request::RecordExists { record_id: 1 },
        )
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);
    assert!(message.contains("does not belong"));
}

#[tokio::test]
async fn test_tampered_token_is_rejected() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("inventory").await;

    let mut tampered = token.clone();
    let last = tampered.len() - 1;
    tampered[last] ^= 0x01;
    let response = channel
        .request_expect_close(
            Some(conn),
            Some(tampered),
            Request::RecordExists { record_id: 1 },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);
}

#[tokio::test]
async fn test_reopen_attaches_new_connection_to_same_session() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("inventory").await;

    let response = channel
        .request(None, Some(token.clone()), Request::Reopen)
        .await;
    let new_conn = match response {
        Response::DatabaseOpened { connection_id, .. } => connection_id,
        other => panic!("reopen failed: {other:?}"),
    };
    assert!(new_conn > conn, "reopen must mint a fresh connection id");

    let session = ctx
        .state
        .registry
        .session_for_hash(&TokenHash::of(&token))
        .unwrap();
    let mut ids = session.connection_ids();
    ids.sort_unstable();
    assert_eq!(ids, vec![conn, new_conn]);

    // The new connection serves requests under the same token.
    let response = channel
        .request(
            Some(new_conn),
            Some(token.clone()),
            Request::RecordExists { record_id: 1 },
        )
        .await;
    assert_eq!(response, Response::Exists { exists: false });
}

#[tokio::test]
async fn test_shutdown_requires_admin_credentials() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("inventory").await;
    let mut shutdown_rx = ctx.state.shutdown_tx.subscribe();

    // A non-admin user is refused and the channel closes.
    let response = channel
        .request_expect_close(
            Some(conn),
            Some(token.clone()),
            Request::Shutdown {
                username: "reader".to_string(),
                password: "reader_pwd".to_string(),
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);

    // Re-open and shut down with the admin user.
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("inventory").await;
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Shutdown {
                username: "root".to_string(),
                password: "root_pwd".to_string(),
            },
        )
        .await;
    assert_eq!(response, Response::ShuttingDown);
    assert!(shutdown_rx.try_recv().is_ok(), "shutdown broadcast fired");
}

#[tokio::test]
async fn test_wrong_admin_password_on_shutdown_closes_channel() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("inventory").await;

    let response = channel
        .request_expect_close(
            Some(conn),
            Some(token),
            Request::Shutdown {
                username: "root".to_string(),
                password: "nope".to_string(),
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Security);
}
