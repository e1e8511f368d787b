// tests/integration/query_test.rs

//! Integration tests for query execution and cursor paging.

use super::test_helpers::{TestContext, TestChannel, expect_error};
use zircondb::core::Request;
use zircondb::core::Response;
use zircondb::core::protocol::{ErrorCode, QueryKind};

async fn seed_records(channel: &mut TestChannel, conn: u64, token: &[u8], count: usize) {
    for i in 0..count {
        let response = channel
            .request(
                Some(conn),
                Some(token.to_vec()),
                Request::RecordCreate {
                    payload: format!("row-{i}").into_bytes(),
                },
            )
            .await;
        assert!(matches!(response, Response::RecordCreated { .. }));
    }
}

fn expect_page(response: Response) -> (u64, usize, bool) {
    match response {
        Response::QueryResult {
            query_id,
            rows,
            has_more,
        } => (query_id, rows.len(), has_more),
        other => panic!("expected a query result, got {other:?}"),
    }
}

#[tokio::test]
async fn test_query_pages_10_10_5_then_empty() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;
    seed_records(&mut channel, conn, &token, 25).await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "scan".to_string(),
                page_size: 10,
            },
        )
        .await;
    let (query_id, len, has_more) = expect_page(response);
    assert_eq!(len, 10);
    assert!(has_more);

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (_, len, has_more) = expect_page(response);
    assert_eq!(len, 10);
    assert!(has_more);

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (_, len, has_more) = expect_page(response);
    assert_eq!(len, 5);
    assert!(!has_more);

    // One final empty page acknowledges the exhaustion.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (_, len, has_more) = expect_page(response);
    assert_eq!(len, 0);
    assert!(!has_more);

    // The acknowledgement released the cursor.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::UnknownQuery);
}

#[tokio::test]
async fn test_close_mid_sequence_makes_page_fail_with_unknown_id() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;
    seed_records(&mut channel, conn, &token, 25).await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "scan".to_string(),
                page_size: 10,
            },
        )
        .await;
    let (query_id, _, _) = expect_page(response);

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryClose { query_id },
        )
        .await;
    assert_eq!(response, Response::Ok);

    // Close is idempotent.
    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryClose { query_id },
        )
        .await;
    assert_eq!(response, Response::Ok);

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (code, message) = expect_error(response);
    assert_eq!(code, ErrorCode::UnknownQuery);
    assert!(message.contains("No query with id"));
}

#[tokio::test]
async fn test_query_exhausted_by_first_page_is_not_registered() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;
    seed_records(&mut channel, conn, &token, 3).await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "scan".to_string(),
                page_size: 10,
            },
        )
        .await;
    let (query_id, len, has_more) = expect_page(response);
    assert_eq!(len, 3);
    assert!(!has_more);

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::QueryNextPage {
                query_id,
                page_size: 10,
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::UnknownQuery);
}

#[tokio::test]
async fn test_scan_limit_and_command_kind() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;
    seed_records(&mut channel, conn, &token, 8).await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Command,
                statement: "scan limit 4".to_string(),
                page_size: 10,
            },
        )
        .await;
    let (_, len, has_more) = expect_page(response);
    assert_eq!(len, 4);
    assert!(!has_more);
}

#[tokio::test]
async fn test_zero_page_size_is_rejected() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "scan".to_string(),
                page_size: 0,
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
}

#[tokio::test]
async fn test_unsupported_statement_is_an_error() {
    let ctx = TestContext::new().await;
    let mut channel = ctx.channel();
    let (conn, token) = channel.open_database("metrics").await;

    let response = channel
        .request(
            Some(conn),
            Some(token.clone()),
            Request::Query {
                kind: QueryKind::Query,
                statement: "select * from nowhere".to_string(),
                page_size: 10,
            },
        )
        .await;
    let (code, _) = expect_error(response);
    assert_eq!(code, ErrorCode::Protocol);
}
