// src/core/storage/mod.rs

//! The narrow interface to the storage engine.
//!
//! The wire front end never touches on-disk layout; it sees records only as
//! `(id, version, payload)` triples behind the `StorageEngine` trait. "Not
//! found" and "cluster offline" are distinct error variants so callers can
//! branch on a discriminant instead of inspecting wrapped causes.

mod memory;

pub use memory::MemoryStorageEngine;

use crate::core::ZirconDBError;
use async_trait::async_trait;
use bytes::Bytes;

/// A record identifier. Negative values are client-minted temporary ids that
/// only become real at transaction commit; non-negative values are
/// server-assigned permanent ids.
pub type RecordId = i64;

/// Returns true for a client-minted placeholder id.
pub fn is_temporary(rid: RecordId) -> bool {
    rid < 0
}

/// A record as the front end sees it: identity, optimistic-concurrency
/// version, and an opaque serialized payload.
#[derive(Debug, Clone, PartialEq)]
pub struct StoredRecord {
    pub record_id: RecordId,
    pub version: u64,
    pub payload: Bytes,
}

/// The storage engine contract consumed by the front end.
///
/// Update and delete return the *prior* state of the record so the
/// transaction coordinator can undo applied operations when a later
/// operation in the same commit fails.
#[async_trait]
pub trait StorageEngine: Send + Sync {
    /// Makes sure the named database exists, creating it if needed.
    async fn open_database(&self, database: &str) -> Result<(), ZirconDBError>;

    /// Creates a record, assigning the next permanent id.
    async fn create(&self, database: &str, payload: Bytes) -> Result<StoredRecord, ZirconDBError>;

    async fn read(&self, database: &str, rid: RecordId) -> Result<StoredRecord, ZirconDBError>;

    /// Replaces the payload of an existing record. When `expected_version`
    /// is set, a differing stored version fails with `VersionMismatch`.
    /// Returns the prior state.
    async fn update(
        &self,
        database: &str,
        rid: RecordId,
        payload: Bytes,
        expected_version: Option<u64>,
    ) -> Result<StoredRecord, ZirconDBError>;

    /// Removes a record, subject to the same version check as `update`.
    /// Returns the removed state.
    async fn delete(
        &self,
        database: &str,
        rid: RecordId,
        expected_version: Option<u64>,
    ) -> Result<StoredRecord, ZirconDBError>;

    async fn exists(&self, database: &str, rid: RecordId) -> Result<bool, ZirconDBError>;

    /// Reinstates a record verbatim, version included. Used only by the
    /// transaction coordinator's rollback path.
    async fn restore(&self, database: &str, record: StoredRecord) -> Result<(), ZirconDBError>;

    /// Scans all records of a database in id order. Backs the default query
    /// engine; the sequence is a snapshot, finite and non-restartable.
    async fn scan(&self, database: &str) -> Result<Vec<StoredRecord>, ZirconDBError>;
}
