// src/core/protocol/response.rs

//! Server-to-client messages: request replies and asynchronous pushes.

use super::request::RecordOperationRequest;
use crate::core::ZirconDBError;
use crate::core::push::PushKind;

/// A single result row produced by the query engine. The payload is opaque
/// to the front end.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct ResultRow {
    pub record_id: i64,
    pub payload: Vec<u8>,
}

/// Coarse error classes carried on the wire so client recovery logic can
/// branch on a discriminant rather than parsing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum ErrorCode {
    Security,
    Protocol,
    RecordNotFound,
    ClusterOffline,
    VersionConflict,
    UnknownQuery,
    Config,
    Io,
    Internal,
}

impl From<&ZirconDBError> for ErrorCode {
    fn from(e: &ZirconDBError) -> Self {
        match e {
            ZirconDBError::TokenInvalid(_)
            | ZirconDBError::TokenExpired
            | ZirconDBError::InvalidCredentials
            | ZirconDBError::PermissionDenied(_) => ErrorCode::Security,
            ZirconDBError::UnknownConnection(_)
            | ZirconDBError::DatabaseNotOpen
            | ZirconDBError::DatabaseAlreadyOpen
            | ZirconDBError::InvalidTransactionId { .. }
            | ZirconDBError::NoActiveTransaction
            | ZirconDBError::UnresolvedTemporaryId(_)
            | ZirconDBError::InvalidState(_) => ErrorCode::Protocol,
            ZirconDBError::RecordNotFound(_) => ErrorCode::RecordNotFound,
            ZirconDBError::ClusterOffline(_) => ErrorCode::ClusterOffline,
            ZirconDBError::VersionMismatch { .. } => ErrorCode::VersionConflict,
            ZirconDBError::UnknownQueryId(_) => ErrorCode::UnknownQuery,
            ZirconDBError::UnknownConfigKey(_) | ZirconDBError::InvalidConfigValue { .. } => {
                ErrorCode::Config
            }
            ZirconDBError::Io(_)
            | ZirconDBError::IncompleteFrame
            | ZirconDBError::FrameTooLarge(_) => ErrorCode::Io,
            ZirconDBError::Encode(_) | ZirconDBError::Decode(_) | ZirconDBError::Internal(_) => {
                ErrorCode::Internal
            }
        }
    }
}

/// Replies to requests, one variant per response family.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub enum Response {
    Connected {
        connection_id: u64,
        token: Vec<u8>,
    },
    DatabaseOpened {
        connection_id: u64,
        token: Vec<u8>,
    },
    Ok,
    Record {
        record_id: i64,
        version: u64,
        payload: Vec<u8>,
    },
    RecordCreated {
        record_id: i64,
        version: u64,
    },
    RecordUpdated {
        version: u64,
    },
    Exists {
        exists: bool,
    },
    /// Begin/merge acknowledgement. The id mapping is empty until commit
    /// realizes temporary ids.
    TxState {
        tx_id: i64,
        id_map: Vec<(i64, i64)>,
    },
    Committed {
        tx_id: i64,
        id_map: Vec<(i64, i64)>,
    },
    TxContents {
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
        id_map: Vec<(i64, i64)>,
    },
    QueryResult {
        query_id: u64,
        rows: Vec<ResultRow>,
        has_more: bool,
    },
    Subscribed,
    Unsubscribed,
    LiveSubscribed {
        monitor_id: String,
    },
    ConfigValue {
        value: String,
    },
    ConfigEntries {
        entries: Vec<(String, String)>,
    },
    ShuttingDown,
    Error {
        code: ErrorCode,
        message: String,
    },
}

impl From<ZirconDBError> for Response {
    fn from(e: ZirconDBError) -> Self {
        Response::Error {
            code: ErrorCode::from(&e),
            message: e.to_string(),
        }
    }
}

/// A coalesced metadata push for one (database, kind) mailbox.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct PushEnvelope {
    pub database: String,
    pub kind: PushKind,
    pub payload: Vec<u8>,
}

/// A live-query result delivered to one monitor.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct LiveQueryPush {
    pub monitor_id: String,
    pub payload: Vec<u8>,
}

/// Everything the server can write to a client channel.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub enum ServerMessage {
    Reply(Response),
    Push(PushEnvelope),
    LivePush(LiveQueryPush),
}
