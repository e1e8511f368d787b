// src/core/errors.rs

//! Defines the primary error type for the entire application.

use crate::core::storage::RecordId;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all possible failures within the server.
/// Using `thiserror` allows for clean error definitions and automatic `From` trait implementations.
#[derive(Error, Debug, Clone)]
pub enum ZirconDBError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Incomplete frame in stream")]
    IncompleteFrame,

    #[error("Frame of {0} bytes exceeds the protocol limit")]
    FrameTooLarge(usize),

    #[error("Wire encoding error: {0}")]
    Encode(String),

    #[error("Wire decoding error: {0}")]
    Decode(String),

    // --- Security-class errors. These always force-close the connection. ---
    #[error("Token security error: {0}")]
    TokenInvalid(String),

    #[error("The token provided is expired")]
    TokenExpired,

    #[error("Invalid username or password")]
    InvalidCredentials,

    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    // --- Protocol-class errors ---
    #[error("No connection with id {0} is registered")]
    UnknownConnection(u64),

    #[error("No database session is open on this connection")]
    DatabaseNotOpen,

    #[error("A database session is already open on this connection")]
    DatabaseAlreadyOpen,

    #[error("Invalid transaction id, expected {expected} but received {received}")]
    InvalidTransactionId { expected: i64, received: i64 },

    #[error("No transaction is active on this session")]
    NoActiveTransaction,

    #[error("Operation references unresolved temporary record id {0}")]
    UnresolvedTemporaryId(RecordId),

    #[error("No query with id '{0}' found, probably expired session")]
    UnknownQueryId(u64),

    // --- Record / storage errors ---
    #[error("Record {0} not found")]
    RecordNotFound(RecordId),

    #[error("Cluster is offline: {0}")]
    ClusterOffline(String),

    #[error("Version conflict on record {record}: expected {expected}, found {actual}")]
    VersionMismatch {
        record: RecordId,
        expected: u64,
        actual: u64,
    },

    // --- Configuration errors ---
    #[error("Unknown configuration key '{0}'")]
    UnknownConfigKey(String),

    #[error("Invalid value for configuration key '{key}': {reason}")]
    InvalidConfigValue { key: String, reason: String },

    #[error("Operation not allowed in the current state: {0}")]
    InvalidState(String),

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl ZirconDBError {
    /// Security failures never leave a connection partially authenticated;
    /// the dispatcher force-closes the connection when this returns true.
    pub fn is_security(&self) -> bool {
        matches!(
            self,
            ZirconDBError::TokenInvalid(_)
                | ZirconDBError::TokenExpired
                | ZirconDBError::InvalidCredentials
                | ZirconDBError::PermissionDenied(_)
        )
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for ZirconDBError {
    fn from(e: std::io::Error) -> Self {
        ZirconDBError::Io(Arc::new(e))
    }
}

impl From<bincode::error::EncodeError> for ZirconDBError {
    fn from(e: bincode::error::EncodeError) -> Self {
        ZirconDBError::Encode(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for ZirconDBError {
    fn from(e: bincode::error::DecodeError) -> Self {
        ZirconDBError::Decode(e.to_string())
    }
}

impl From<serde_json::Error> for ZirconDBError {
    fn from(e: serde_json::Error) -> Self {
        ZirconDBError::Internal(format!("JSON serialization/deserialization error: {e}"))
    }
}
