// src/core/storage/memory.rs

//! An in-memory `StorageEngine`.
//!
//! This is the default collaborator the server boots with and the engine the
//! test suite runs against. It keeps every database in a sharded concurrent
//! map and can mark a database offline to surface the `ClusterOffline`
//! condition the way a real clustered backend would.

use super::{RecordId, StorageEngine, StoredRecord};
use crate::core::ZirconDBError;
use crate::core::push::{MetadataObserver, PushKind};
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use tracing::debug;

/// One database's record space.
#[derive(Debug)]
struct DatabaseStore {
    next_id: AtomicI64,
    records: DashMap<RecordId, StoredRecord>,
    offline: AtomicBool,
}

impl DatabaseStore {
    fn new() -> Self {
        Self {
            next_id: AtomicI64::new(1),
            records: DashMap::new(),
            offline: AtomicBool::new(false),
        }
    }
}

/// The in-memory storage engine.
#[derive(Default)]
pub struct MemoryStorageEngine {
    databases: DashMap<String, Arc<DatabaseStore>>,
    observer: RwLock<Option<Arc<dyn MetadataObserver>>>,
}

impl MemoryStorageEngine {
    pub fn new() -> Self {
        Default::default()
    }

    /// Registers the change-notification hook. The push manager consumes
    /// metadata events through this observer.
    pub fn set_observer(&self, observer: Arc<dyn MetadataObserver>) {
        *self.observer.write() = Some(observer);
    }

    /// Marks a database offline or back online. While offline, every record
    /// operation against it fails with `ClusterOffline`.
    pub fn set_offline(&self, database: &str, offline: bool) {
        if let Some(store) = self.databases.get(database) {
            store.offline.store(offline, Ordering::SeqCst);
        }
    }

    pub fn database_exists(&self, database: &str) -> bool {
        self.databases.contains_key(database)
    }

    fn store(&self, database: &str) -> Result<Arc<DatabaseStore>, ZirconDBError> {
        let store = self
            .databases
            .get(database)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                ZirconDBError::InvalidState(format!("database '{database}' does not exist"))
            })?;
        if store.offline.load(Ordering::SeqCst) {
            return Err(ZirconDBError::ClusterOffline(format!(
                "database '{database}' cluster is offline"
            )));
        }
        Ok(store)
    }

    fn notify(&self, database: &str, kind: PushKind, payload: Bytes) {
        if let Some(observer) = self.observer.read().clone() {
            observer.metadata_changed(database, kind, payload);
        }
    }
}

#[async_trait]
impl StorageEngine for MemoryStorageEngine {
    async fn open_database(&self, database: &str) -> Result<(), ZirconDBError> {
        let mut created = false;
        self.databases
            .entry(database.to_string())
            .or_insert_with(|| {
                created = true;
                Arc::new(DatabaseStore::new())
            });
        if created {
            debug!("Created in-memory database '{}'", database);
            self.notify(
                database,
                PushKind::StorageConfig,
                Bytes::copy_from_slice(database.as_bytes()),
            );
        }
        Ok(())
    }

    async fn create(&self, database: &str, payload: Bytes) -> Result<StoredRecord, ZirconDBError> {
        let store = self.store(database)?;
        let record_id = store.next_id.fetch_add(1, Ordering::SeqCst);
        let record = StoredRecord {
            record_id,
            version: 1,
            payload,
        };
        store.records.insert(record_id, record.clone());
        Ok(record)
    }

    async fn read(&self, database: &str, rid: RecordId) -> Result<StoredRecord, ZirconDBError> {
        let store = self.store(database)?;
        store
            .records
            .get(&rid)
            .map(|e| e.value().clone())
            .ok_or(ZirconDBError::RecordNotFound(rid))
    }

    async fn update(
        &self,
        database: &str,
        rid: RecordId,
        payload: Bytes,
        expected_version: Option<u64>,
    ) -> Result<StoredRecord, ZirconDBError> {
        let store = self.store(database)?;
        let mut entry = store
            .records
            .get_mut(&rid)
            .ok_or(ZirconDBError::RecordNotFound(rid))?;
        if let Some(expected) = expected_version
            && entry.version != expected
        {
            return Err(ZirconDBError::VersionMismatch {
                record: rid,
                expected,
                actual: entry.version,
            });
        }
        let prior = entry.clone();
        entry.version += 1;
        entry.payload = payload;
        Ok(prior)
    }

    async fn delete(
        &self,
        database: &str,
        rid: RecordId,
        expected_version: Option<u64>,
    ) -> Result<StoredRecord, ZirconDBError> {
        let store = self.store(database)?;
        // Version check and removal happen under the same entry lock.
        match store.records.entry(rid) {
            dashmap::Entry::Occupied(entry) => {
                if let Some(expected) = expected_version
                    && entry.get().version != expected
                {
                    return Err(ZirconDBError::VersionMismatch {
                        record: rid,
                        expected,
                        actual: entry.get().version,
                    });
                }
                Ok(entry.remove())
            }
            dashmap::Entry::Vacant(_) => Err(ZirconDBError::RecordNotFound(rid)),
        }
    }

    async fn exists(&self, database: &str, rid: RecordId) -> Result<bool, ZirconDBError> {
        let store = self.store(database)?;
        Ok(store.records.contains_key(&rid))
    }

    async fn restore(&self, database: &str, record: StoredRecord) -> Result<(), ZirconDBError> {
        // Rollback must succeed even against an offline database, otherwise a
        // failed commit could leave partially applied state behind.
        let store = self
            .databases
            .get(database)
            .map(|e| e.value().clone())
            .ok_or_else(|| {
                ZirconDBError::InvalidState(format!("database '{database}' does not exist"))
            })?;
        store.records.insert(record.record_id, record);
        Ok(())
    }

    async fn scan(&self, database: &str) -> Result<Vec<StoredRecord>, ZirconDBError> {
        let store = self.store(database)?;
        let mut records: Vec<StoredRecord> =
            store.records.iter().map(|e| e.value().clone()).collect();
        records.sort_by_key(|r| r.record_id);
        Ok(records)
    }
}
