// src/core/protocol/request.rs

//! Client-to-server request messages and their dispatch metadata.

use crate::core::push::PushKind;
use bitflags::bitflags;

bitflags! {
    /// Static per-request properties consulted by the dispatcher and the
    /// registry sweep.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct RequestFlags: u8 {
        /// Safe to retry or interrupt mid-flight; the sweep only hard-kills
        /// connections whose last command carries this flag.
        const IDEMPOTENT = 1 << 0;
        /// Mutates storage or server state.
        const WRITE = 1 << 1;
        /// Valid before any connection is bound to the channel.
        const NO_CONNECTION = 1 << 2;
        /// Requires an open database session on the connection.
        const REQUIRES_DATABASE = 1 << 3;
    }
}

/// One record operation inside a transaction message, as it travels on the
/// wire. Negative `record_id`s are client-minted temporary ids.
#[derive(Debug, Clone, PartialEq, bincode::Encode, bincode::Decode)]
pub struct RecordOperationRequest {
    pub kind: RecordOperationKind,
    pub record_id: i64,
    pub payload: Vec<u8>,
    /// Expected version for optimistic concurrency on update/delete.
    pub expected_version: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum RecordOperationKind {
    Create,
    Update,
    Delete,
}

/// Whether a statement is a read query or a state-changing command. Both go
/// through the same cursor machinery; the split mirrors the client API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, bincode::Encode, bincode::Decode)]
pub enum QueryKind {
    Query,
    Command,
}

/// The outer request frame. Post-handshake requests carry the connection id
/// they address; token-based connections also carry the signed token on
/// every request.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub struct RequestEnvelope {
    pub connection_id: Option<u64>,
    pub token: Option<Vec<u8>>,
    pub request: Request,
}

/// Every request family the front end understands.
#[derive(Debug, Clone, bincode::Encode, bincode::Decode)]
pub enum Request {
    // --- Handshake / session ---
    Connect {
        username: String,
        password: String,
    },
    OpenDatabase {
        database: String,
        username: String,
        password: String,
    },
    /// Re-attaches a token to a brand-new connection on this channel. The
    /// token travels in the envelope.
    Reopen,
    CloseDatabase,

    // --- Single-record CRUD ---
    RecordCreate {
        payload: Vec<u8>,
    },
    RecordRead {
        record_id: i64,
    },
    RecordUpdate {
        record_id: i64,
        payload: Vec<u8>,
        expected_version: u64,
    },
    RecordDelete {
        record_id: i64,
        expected_version: Option<u64>,
    },
    RecordExists {
        record_id: i64,
    },

    // --- Transactions ---
    TxBegin {
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    },
    TxSendState {
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    },
    TxCommit {
        tx_id: i64,
        operations: Vec<RecordOperationRequest>,
    },
    TxRollback,
    TxFetch {
        tx_id: i64,
    },

    // --- Queries ---
    Query {
        kind: QueryKind,
        statement: String,
        page_size: u32,
    },
    QueryNextPage {
        query_id: u64,
        page_size: u32,
    },
    QueryClose {
        query_id: u64,
    },

    // --- Push subscriptions ---
    Subscribe {
        kind: PushKind,
    },
    Unsubscribe {
        kind: PushKind,
    },
    SubscribeLiveQuery {
        statement: String,
    },
    UnsubscribeLiveQuery {
        monitor_id: String,
    },

    // --- Global configuration ---
    ConfigGet {
        key: String,
    },
    ConfigSet {
        key: String,
        value: String,
    },
    ConfigList,

    // --- Server control ---
    Shutdown {
        username: String,
        password: String,
    },
}

impl Request {
    /// The human-readable command name, recorded in connection stats and logs.
    pub fn name(&self) -> &'static str {
        match self {
            Request::Connect { .. } => "connect",
            Request::OpenDatabase { .. } => "open_database",
            Request::Reopen => "reopen",
            Request::CloseDatabase => "close_database",
            Request::RecordCreate { .. } => "record_create",
            Request::RecordRead { .. } => "record_read",
            Request::RecordUpdate { .. } => "record_update",
            Request::RecordDelete { .. } => "record_delete",
            Request::RecordExists { .. } => "record_exists",
            Request::TxBegin { .. } => "tx_begin",
            Request::TxSendState { .. } => "tx_send_state",
            Request::TxCommit { .. } => "tx_commit",
            Request::TxRollback => "tx_rollback",
            Request::TxFetch { .. } => "tx_fetch",
            Request::Query { .. } => "query",
            Request::QueryNextPage { .. } => "query_next_page",
            Request::QueryClose { .. } => "query_close",
            Request::Subscribe { .. } => "subscribe",
            Request::Unsubscribe { .. } => "unsubscribe",
            Request::SubscribeLiveQuery { .. } => "subscribe_live_query",
            Request::UnsubscribeLiveQuery { .. } => "unsubscribe_live_query",
            Request::ConfigGet { .. } => "config_get",
            Request::ConfigSet { .. } => "config_set",
            Request::ConfigList => "config_list",
            Request::Shutdown { .. } => "shutdown",
        }
    }

    pub fn flags(&self) -> RequestFlags {
        match self {
            Request::Connect { .. } | Request::OpenDatabase { .. } | Request::Reopen => {
                RequestFlags::NO_CONNECTION
            }
            Request::CloseDatabase => RequestFlags::empty(),
            Request::RecordCreate { .. } => {
                RequestFlags::WRITE | RequestFlags::REQUIRES_DATABASE
            }
            Request::RecordRead { .. }
            | Request::RecordExists { .. } => {
                RequestFlags::IDEMPOTENT | RequestFlags::REQUIRES_DATABASE
            }
            Request::RecordUpdate { .. } | Request::RecordDelete { .. } => {
                RequestFlags::WRITE | RequestFlags::REQUIRES_DATABASE
            }
            Request::TxBegin { .. }
            | Request::TxSendState { .. }
            | Request::TxCommit { .. }
            | Request::TxRollback => RequestFlags::WRITE | RequestFlags::REQUIRES_DATABASE,
            Request::TxFetch { .. } => {
                RequestFlags::IDEMPOTENT | RequestFlags::REQUIRES_DATABASE
            }
            Request::Query { .. } => RequestFlags::REQUIRES_DATABASE,
            Request::QueryNextPage { .. } | Request::QueryClose { .. } => {
                RequestFlags::REQUIRES_DATABASE
            }
            Request::Subscribe { .. }
            | Request::Unsubscribe { .. }
            | Request::SubscribeLiveQuery { .. }
            | Request::UnsubscribeLiveQuery { .. } => RequestFlags::REQUIRES_DATABASE,
            Request::ConfigGet { .. } | Request::ConfigList => RequestFlags::IDEMPOTENT,
            Request::ConfigSet { .. } => RequestFlags::WRITE,
            Request::Shutdown { .. } => RequestFlags::WRITE,
        }
    }
}
