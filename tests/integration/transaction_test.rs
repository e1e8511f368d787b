// tests/integration/transaction_test.rs

//! Integration tests for the transaction protocol: begin/merge/commit/
//! rollback/fetch, temp-id remapping and atomicity.

use super::test_helpers::{TestContext, expect_error};
use zircondb::core::Request;
use zircondb::core::Response;
use zircondb::core::protocol::{
    ErrorCode, QueryKind, RecordOperationKind, RecordOperationRequest,
};

fn create_op(temp_id: i64, payload: &[u8]) -> RecordOperationRequest {
    RecordOperationRequest {
        kind: RecordOperationKind::Create,
        record_id: temp_id,
        payload: payload.to_vec(),
        expected_version: None,
    }
}

fn update_op(record_id: i64, payload: &[u8], expected_version: u64) -> RecordOperationRequest {
    RecordOperationRequest {
        kind: RecordOperationKind::Update,
        record_id,
        payload: payload.to_vec(),
        expected_version: Some(expected_version),
    }
}

async fn storage_row_count(channel: &mut super::test_helpers::TestChannel, conn: u64, token: &[u8]) -> usize {
    let response = channel
        .request(
            Some(conn),
            Some(token.to_vec()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "scan".to_string(),
                page_size: 1000,
            },
        )
        .await;
    match response {
        Response::QueryResult { rows, .. } => rows.len(),
        other => panic!("scan failed: {other:?}"),
    }
}

#[tokio::test]
async fn test_temp_id_remapping_on_commit() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 11,
                operations: vec![create_op(-1, b"first"), create_op(-2, b"second")],
            },
        )
        .await;
    assert!(matches!(response, Response::TxState { tx_id: 11, .. }));

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 11,
                operations: vec![],
            },
        )
        .await;
    let id_map = match response {
        Response::Committed { tx_id, id_map } => {
            assert_eq!(tx_id, 11);
            id_map
        }
        other => panic!("commit failed: {other:?}"),
    };

    // Exactly {-1: realId1, -2: realId2}.
    assert_eq!(id_map.len(), 2);
    assert_eq!(id_map[0].0, -1);
    assert_eq!(id_map[1].0, -2);
    assert_ne!(id_map[0].1, id_map[1].1);
    assert!(id_map.iter().all(|(_, real)| *real > 0));

    // Both records are independently readable afterwards.
    for (temp, real) in &id_map {
        let response = channel
            .request(
                Some(conn),
                Some(token.clone()),
                Request::RecordRead { record_id: *real },
            )
            .await;
        match response {
            Response::Record {
                record_id, payload, ..
            } => {
                assert_eq!(record_id, *real);
                let expected: &[u8] = if *temp == -1 { b"first" } else { b"second" };
                assert_eq!(payload, expected);
            }
            other => panic!("read of committed record failed: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_failed_commit_leaves_storage_unchanged() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    let before = storage_row_count(&mut channel, conn, &token).await;
    assert_eq!(before, 0);

    // [create A, create B, update A with an impossible version] — the
    // update fails at commit, so the creates must be rolled back too.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 5,
                operations: vec![
                    create_op(-1, b"a"),
                    create_op(-2, b"b"),
                    update_op(-1, b"a2", 999),
                ],
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::VersionConflict);

    let after = storage_row_count(&mut channel, conn, &token).await;
    assert_eq!(after, 0, "failed commit must leave no visible change");
}

#[tokio::test]
async fn test_begin_same_id_is_idempotent_continuation() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    for ops in [vec![create_op(-1, b"a")], vec![create_op(-2, b"b")]] {
        let response = channel
            .request(
                Some(conn),
                Some(token.clone()),
                Request::TxBegin {
                    tx_id: 3,
                    operations: ops,
                },
            )
            .await;
        assert!(matches!(response, Response::TxState { tx_id: 3, .. }));
    }

    // Both creates landed in one transaction.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxFetch { tx_id: 3 },
        )
        .await;
    match response {
        Response::TxContents { operations, .. } => assert_eq!(operations.len(), 2),
        other => panic!("fetch failed: {other:?}"),
    }
}

#[tokio::test]
async fn test_begin_with_different_id_is_protocol_error_and_rolls_back() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 3,
                operations: vec![create_op(-1, b"a")],
            },
        )
        .await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 4,
                operations: vec![],
            },
        )
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
    assert!(message.contains("Invalid transaction id"));

    // The partially-merged transaction was discarded.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxFetch { tx_id: 3 },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
}

#[tokio::test]
async fn test_commit_id_mismatch_is_fatal_protocol_error() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 9,
                operations: vec![create_op(-1, b"a")],
            },
        )
        .await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 10,
                operations: vec![],
            },
        )
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
    assert!(message.contains("Invalid transaction id"));

    // Nothing was applied.
    assert_eq!(storage_row_count(&mut channel, conn, &token).await, 0);
}

#[tokio::test]
async fn test_commit_without_begin_implicitly_begins() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 21,
                operations: vec![create_op(-1, b"folded")],
            },
        )
        .await;
    match response {
        Response::Committed { id_map, .. } => assert_eq!(id_map.len(), 1),
        other => panic!("implicit-begin commit failed: {other:?}"),
    }
    assert_eq!(storage_row_count(&mut channel, conn, &token).await, 1);
}

#[tokio::test]
async fn test_multi_message_transaction_merges_in_order() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 2,
                operations: vec![create_op(-1, b"v1")],
            },
        )
        .await;
    // A second message updates the record minted by the first, referencing
    // it by its temporary id.
    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxSendState {
                tx_id: 2,
                operations: vec![update_op(-1, b"v2", 1)],
            },
        )
        .await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 2,
                operations: vec![],
            },
        )
        .await;
    let id_map = match response {
        Response::Committed { id_map, .. } => id_map,
        other => panic!("commit failed: {other:?}"),
    };
    let real = id_map[0].1;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::RecordRead { record_id: real },
        )
        .await;
    match response {
        Response::Record {
            version, payload, ..
        } => {
            assert_eq!(payload, b"v2");
            assert_eq!(version, 2);
        }
        other => panic!("read failed: {other:?}"),
    }
}

#[tokio::test]
async fn test_unresolved_temporary_reference_is_rejected() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 2,
                operations: vec![update_op(-5, b"x", 1)],
            },
        )
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
    assert!(message.contains("unresolved temporary"));

    // The failed merge rolled the transaction back.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxFetch { tx_id: 2 },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
}

#[tokio::test]
async fn test_rollback_discards_pending_operations() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 6,
                operations: vec![create_op(-1, b"gone")],
            },
        )
        .await;
    let response = channel
        .request(Some(conn), Some(token.clone()), Request::TxRollback)
        .await;
    assert_eq!(response, Response::Ok);

    assert_eq!(storage_row_count(&mut channel, conn, &token).await, 0);

    // Rollback with nothing active stays quiet too.
    let response = channel
        .request(Some(conn), Some(token.clone()), Request::TxRollback)
        .await;
    assert_eq!(response, Response::Ok);
}

#[tokio::test]
async fn test_fetch_returns_pending_state_without_altering_it() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxBegin {
                tx_id: 8,
                operations: vec![create_op(-1, b"pending")],
            },
        )
        .await;

    for _ in 0..2 {
        let response = channel
            .request(
                Some(conn),
                Some(token.clone()),
                Request::TxFetch { tx_id: 8 },
            )
            .await;
        match response {
            Response::TxContents {
                tx_id,
                operations,
                id_map,
            } => {
                assert_eq!(tx_id, 8);
                assert_eq!(operations.len(), 1);
                assert_eq!(operations[0].record_id, -1);
                assert!(id_map.is_empty(), "ids are only minted at commit");
            }
            other => panic!("fetch failed: {other:?}"),
        }
    }
}

#[tokio::test]
async fn test_cluster_offline_is_not_masked_as_not_found() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("orders").await;

    ctx.state.memory_storage.set_offline("orders", true);

    // Direct read: the offline condition must surface as its own class.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::RecordRead { record_id: 1 },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::ClusterOffline);

    // Commit-time failure: same distinct condition, full rollback.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::TxCommit {
                tx_id: 30,
                operations: vec![create_op(-1, b"x")],
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::ClusterOffline);

    ctx.state.memory_storage.set_offline("orders", false);
    assert_eq!(storage_row_count(&mut channel, conn, &token).await, 0);
}
