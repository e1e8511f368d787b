// tests/property/transaction_property_test.rs

//! Property-based tests for the transaction coordinator: temp-id remapping
//! and all-or-nothing commits.

use bytes::Bytes;
use proptest::prelude::*;
use std::sync::Arc;
use zircondb::core::ZirconDBError;
use zircondb::core::database::{RecordOperation, ServerTransaction};
use zircondb::core::protocol::RecordOperationKind;
use zircondb::core::storage::{MemoryStorageEngine, StorageEngine};

fn create_op(temp_id: i64, payload: Vec<u8>) -> RecordOperation {
    RecordOperation {
        kind: RecordOperationKind::Create,
        record_id: temp_id,
        payload: Bytes::from(payload),
        expected_version: None,
    }
}

async fn fresh_storage(database: &str) -> Arc<dyn StorageEngine> {
    let storage: Arc<dyn StorageEngine> = Arc::new(MemoryStorageEngine::new());
    storage.open_database(database).await.unwrap();
    storage
}

proptest! {
    #![proptest_config(ProptestConfig {
        cases: 32,
        max_shrink_iters: 200,
        ..ProptestConfig::default()
    })]

    #[test]
    fn prop_commit_maps_every_temp_id_to_a_distinct_permanent_id(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..64), 1..=24)
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = fresh_storage("props").await;
            let mut tx = ServerTransaction::begin(1);

            let ops: Vec<RecordOperation> = payloads
                .iter()
                .enumerate()
                .map(|(i, p)| create_op(-(i as i64) - 1, p.clone()))
                .collect();
            let count = ops.len();
            tx.merge_received(ops).unwrap();

            let id_map = tx.commit(&storage, "props").await.unwrap();

            // Every temp id is mapped, to a distinct permanent id.
            assert_eq!(id_map.len(), count);
            let mut reals: Vec<i64> = id_map.values().copied().collect();
            reals.sort_unstable();
            reals.dedup();
            assert_eq!(reals.len(), count);

            // Every mapped record is readable with its submitted payload.
            for (i, payload) in payloads.iter().enumerate() {
                let real = id_map[&(-(i as i64) - 1)];
                let record = storage.read("props", real).await.unwrap();
                assert_eq!(record.payload.as_ref(), payload.as_slice());
            }
        });
    }

    #[test]
    fn prop_failed_commit_leaves_storage_identical(
        payloads in prop::collection::vec(prop::collection::vec(any::<u8>(), 0..32), 1..=16),
        poison_index in any::<prop::sample::Index>()
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let storage = fresh_storage("props").await;

            // Pre-existing state that must survive the failed commit.
            let keeper = storage
                .create("props", Bytes::from_static(b"keeper"))
                .await
                .unwrap();
            let before = storage.scan("props").await.unwrap();

            let mut tx = ServerTransaction::begin(1);
            let mut ops: Vec<RecordOperation> = payloads
                .iter()
                .enumerate()
                .map(|(i, p)| create_op(-(i as i64) - 1, p.clone()))
                .collect();

            // Poison one created record with an impossible version check.
            let victim = -(poison_index.index(payloads.len()) as i64) - 1;
            ops.push(RecordOperation {
                kind: RecordOperationKind::Update,
                record_id: victim,
                payload: Bytes::from_static(b"poison"),
                expected_version: Some(u64::MAX),
            });
            tx.merge_received(ops).unwrap();

            let err = tx.commit(&storage, "props").await.unwrap_err();
            assert!(matches!(err, ZirconDBError::VersionMismatch { .. }));

            // Round-trip law: failed commit implies no visible change.
            let after = storage.scan("props").await.unwrap();
            assert_eq!(before, after);
            assert_eq!(
                storage.read("props", keeper.record_id).await.unwrap(),
                keeper
            );
        });
    }
}
