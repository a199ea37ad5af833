//! Peer wire protocol.
//!
//! Every message travels as one length-prefixed frame:
//!
//! ```text
//! ┌──────────────────┬───────────┬──────────────────────┐
//! │ length: u32 (BE) │ type: u8  │ payload: bincode     │
//! └──────────────────┴───────────┴──────────────────────┘
//!         length = 1 + payload.len()
//! ```
//!
//! Frames over [`MAX_FRAME_BYTES`] are refused before the payload is read,
//! so a peer cannot make us allocate an arbitrary buffer.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::MAX_FRAME_BYTES;
use crate::crypto::Hash;
use crate::storage::Block;
use crate::transaction::Transaction;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("unknown message type {0}")]
    UnknownType(u8),

    #[error("encode failed: {0}")]
    Encode(String),

    #[error("decode failed: {0}")]
    Decode(String),

    #[error("frame of {0} bytes exceeds the limit")]
    FrameTooLarge(usize),

    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

impl CodecError {
    /// True when the peer closed the connection cleanly between frames.
    pub fn is_eof(&self) -> bool {
        matches!(self, CodecError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

// ---------------------------------------------------------------------------
// MessageType
// ---------------------------------------------------------------------------

/// The frame's type byte.
#[repr(u8)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageType {
    Tx = 1,
    Block = 2,
    ChainInfoResponse = 3,
    ChainInfoRequest = 4,
    BlockRequest = 5,
    BlockResponse = 6,
    BlockHashRequest = 7,
    BlockHashResponse = 8,
}

impl TryFrom<u8> for MessageType {
    type Error = CodecError;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        Ok(match byte {
            1 => MessageType::Tx,
            2 => MessageType::Block,
            3 => MessageType::ChainInfoResponse,
            4 => MessageType::ChainInfoRequest,
            5 => MessageType::BlockRequest,
            6 => MessageType::BlockResponse,
            7 => MessageType::BlockHashRequest,
            8 => MessageType::BlockHashResponse,
            other => return Err(CodecError::UnknownType(other)),
        })
    }
}

// ---------------------------------------------------------------------------
// Message
// ---------------------------------------------------------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    /// Gossiped pending transaction.
    Tx(Transaction),
    /// Gossiped freshly sealed block.
    Block(Block),
    /// The sender's tip height.
    ChainInfoResponse { height: u32 },
    ChainInfoRequest,
    BlockRequest { height: u32 },
    BlockResponse { block: Block },
    BlockHashRequest { height: u32 },
    /// Hash of the block at the requested height, plus the responder's tip
    /// height. `hash` is all zeros when the responder has no block there.
    BlockHashResponse { hash: Hash, height: u32 },
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Tx(_) => MessageType::Tx,
            Message::Block(_) => MessageType::Block,
            Message::ChainInfoResponse { .. } => MessageType::ChainInfoResponse,
            Message::ChainInfoRequest => MessageType::ChainInfoRequest,
            Message::BlockRequest { .. } => MessageType::BlockRequest,
            Message::BlockResponse { .. } => MessageType::BlockResponse,
            Message::BlockHashRequest { .. } => MessageType::BlockHashRequest,
            Message::BlockHashResponse { .. } => MessageType::BlockHashResponse,
        }
    }

    fn payload(&self) -> Result<Vec<u8>, CodecError> {
        match self {
            Message::Tx(tx) => to_bytes(tx),
            Message::Block(block) | Message::BlockResponse { block } => to_bytes(block),
            Message::ChainInfoRequest => Ok(Vec::new()),
            Message::ChainInfoResponse { height }
            | Message::BlockRequest { height }
            | Message::BlockHashRequest { height } => to_bytes(height),
            Message::BlockHashResponse { hash, height } => to_bytes(&(hash, height)),
        }
    }

    /// Decode a message body (type byte already split off).
    pub fn decode(kind: MessageType, payload: &[u8]) -> Result<Self, CodecError> {
        Ok(match kind {
            MessageType::Tx => Message::Tx(from_bytes(payload)?),
            MessageType::Block => Message::Block(from_bytes(payload)?),
            MessageType::ChainInfoResponse => Message::ChainInfoResponse {
                height: from_bytes(payload)?,
            },
            MessageType::ChainInfoRequest => Message::ChainInfoRequest,
            MessageType::BlockRequest => Message::BlockRequest {
                height: from_bytes(payload)?,
            },
            MessageType::BlockResponse => Message::BlockResponse {
                block: from_bytes(payload)?,
            },
            MessageType::BlockHashRequest => Message::BlockHashRequest {
                height: from_bytes(payload)?,
            },
            MessageType::BlockHashResponse => {
                let (hash, height) = from_bytes(payload)?;
                Message::BlockHashResponse { hash, height }
            }
        })
    }

    /// Full frame: length prefix, type byte, payload.
    pub fn to_frame(&self) -> Result<Vec<u8>, CodecError> {
        let payload = self.payload()?;
        let body_len = payload.len() + 1;
        if body_len > MAX_FRAME_BYTES {
            return Err(CodecError::FrameTooLarge(body_len));
        }
        let mut frame = Vec::with_capacity(4 + body_len);
        frame.extend_from_slice(&(body_len as u32).to_be_bytes());
        frame.push(self.message_type() as u8);
        frame.extend_from_slice(&payload);
        Ok(frame)
    }
}

fn to_bytes<T: Serialize + ?Sized>(value: &T) -> Result<Vec<u8>, CodecError> {
    bincode::serialize(value).map_err(|e| CodecError::Encode(e.to_string()))
}

fn from_bytes<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    bincode::deserialize(bytes).map_err(|e| CodecError::Decode(e.to_string()))
}

// ---------------------------------------------------------------------------
// Framed I/O
// ---------------------------------------------------------------------------

pub async fn write_frame<W>(writer: &mut W, message: &Message) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.to_frame()?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. An oversized length prefix fails with
/// [`CodecError::FrameTooLarge`] without reading the body.
pub async fn read_frame<R>(reader: &mut R) -> Result<Message, CodecError>
where
    R: AsyncRead + Unpin,
{
    let body_len = reader.read_u32().await? as usize;
    if body_len > MAX_FRAME_BYTES {
        return Err(CodecError::FrameTooLarge(body_len));
    }
    if body_len == 0 {
        return Err(CodecError::Decode("empty frame".to_string()));
    }

    let mut body = vec![0u8; body_len];
    reader.read_exact(&mut body).await?;
    let kind = MessageType::try_from(body[0])?;
    Message::decode(kind, &body[1..])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
