// src/core/protocol/mod.rs

//! The binary wire protocol: message enums and the framing codec.
//!
//! Only protocol *semantics* are pinned down here; the payload bytes of each
//! frame are a bincode encoding behind a length prefix, and individual field
//! layout is free to evolve with the message types.

mod frame;
mod request;
mod response;

pub use frame::{ClientCodec, MAX_FRAME_SIZE, ServerCodec};
pub use request::{
    QueryKind, RecordOperationKind, RecordOperationRequest, Request, RequestEnvelope, RequestFlags,
};
pub use response::{ErrorCode, LiveQueryPush, PushEnvelope, Response, ResultRow, ServerMessage};
