// src/core/protocol/frame.rs

//! Implements the length-prefixed frame layer and the corresponding
//! `Encoder` and `Decoder` pairs for network communication.
//!
//! Every frame is a big-endian `u32` payload length followed by the bincode
//! encoding of one message. Two codecs share the framing: `ServerCodec`
//! decodes request envelopes and encodes server messages, `ClientCodec` is
//! its mirror image (used by test clients and tooling).

use super::request::RequestEnvelope;
use super::response::ServerMessage;
use crate::core::ZirconDBError;
use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

/// Length of the frame header.
const HEADER_LEN: usize = 4;

/// Protocol-level limit to prevent denial-of-service through giant frames.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024; // 16MB

fn encode_frame<T: bincode::Encode>(item: T, dst: &mut BytesMut) -> Result<(), ZirconDBError> {
    let payload = bincode::encode_to_vec(item, bincode::config::standard())?;
    if payload.len() > MAX_FRAME_SIZE {
        return Err(ZirconDBError::FrameTooLarge(payload.len()));
    }
    dst.reserve(HEADER_LEN + payload.len());
    dst.put_u32(payload.len() as u32);
    dst.extend_from_slice(&payload);
    Ok(())
}

fn decode_frame<T: bincode::Decode<()>>(
    src: &mut BytesMut,
) -> Result<Option<T>, ZirconDBError> {
    if src.len() < HEADER_LEN {
        return Ok(None);
    }
    let len = u32::from_be_bytes([src[0], src[1], src[2], src[3]]) as usize;
    if len > MAX_FRAME_SIZE {
        return Err(ZirconDBError::FrameTooLarge(len));
    }
    if src.len() < HEADER_LEN + len {
        // Not enough bytes buffered yet; ask the framed stream for more.
        src.reserve(HEADER_LEN + len - src.len());
        return Ok(None);
    }
    src.advance(HEADER_LEN);
    let payload = src.split_to(len);
    let (item, consumed) = bincode::decode_from_slice(&payload, bincode::config::standard())?;
    if consumed != len {
        return Err(ZirconDBError::Decode(format!(
            "frame declared {len} bytes but message consumed {consumed}"
        )));
    }
    Ok(Some(item))
}

/// The codec used by the server side of a connection.
#[derive(Debug, Default)]
pub struct ServerCodec;

impl Decoder for ServerCodec {
    type Item = RequestEnvelope;
    type Error = ZirconDBError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<ServerMessage> for ServerCodec {
    type Error = ZirconDBError;

    fn encode(&mut self, item: ServerMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(item, dst)
    }
}

/// The mirror codec used by clients: encodes request envelopes and decodes
/// server messages.
#[derive(Debug, Default)]
pub struct ClientCodec;

impl Decoder for ClientCodec {
    type Item = ServerMessage;
    type Error = ZirconDBError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        decode_frame(src)
    }
}

impl Encoder<RequestEnvelope> for ClientCodec {
    type Error = ZirconDBError;

    fn encode(&mut self, item: RequestEnvelope, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_frame(item, dst)
    }
}
