//! Error types for seqwire.

use std::io;

use thiserror::Error;

/// Main error type for all seqwire operations.
#[derive(Debug, Error)]
pub enum RpcError {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// JSON serialization/deserialization error (handshake and JSON codec).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Protocol error (oversized segment, malformed handshake line, etc.).
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A reply body could not be decoded into the caller's reply type.
    #[error("reading body failed: {0}")]
    Decode(String),

    /// The remote service reported a failure for this call.
    #[error("{0}")]
    Remote(String),

    /// The client is closing or shut down; the call was never sent.
    #[error("connection is shut down")]
    Unavailable,

    /// Connection closed (clean end of stream or writer already closed).
    #[error("Connection closed")]
    ConnectionClosed,

    /// Handshake carried the wrong magic number.
    #[error("invalid magic number {0:#x}")]
    BadMagicNumber(u32),

    /// Handshake named a codec tag that is not registered.
    #[error("invalid codec type {0:?}")]
    UnknownCodec(String),
}

impl RpcError {
    /// True if this error is an ordinary end of stream: a clean close at a
    /// frame boundary or a stream truncated mid-segment.
    pub fn is_eof(&self) -> bool {
        match self {
            RpcError::ConnectionClosed => true,
            RpcError::Io(e) => e.kind() == io::ErrorKind::UnexpectedEof,
            _ => false,
        }
    }

    /// Build an equivalent error value.
    ///
    /// Used when one transport failure has to be delivered to every pending
    /// call. Variants wrapping non-`Clone` sources keep their kind and message.
    pub fn duplicate(&self) -> RpcError {
        match self {
            RpcError::Io(e) => RpcError::Io(io::Error::new(e.kind(), e.to_string())),
            RpcError::Json(e) => RpcError::Decode(e.to_string()),
            RpcError::MsgPackEncode(e) => RpcError::Protocol(e.to_string()),
            RpcError::MsgPackDecode(e) => RpcError::Decode(e.to_string()),
            RpcError::Protocol(msg) => RpcError::Protocol(msg.clone()),
            RpcError::Decode(msg) => RpcError::Decode(msg.clone()),
            RpcError::Remote(msg) => RpcError::Remote(msg.clone()),
            RpcError::Unavailable => RpcError::Unavailable,
            RpcError::ConnectionClosed => RpcError::ConnectionClosed,
            RpcError::BadMagicNumber(n) => RpcError::BadMagicNumber(*n),
            RpcError::UnknownCodec(tag) => RpcError::UnknownCodec(tag.clone()),
        }
    }
}

/// Result type alias using RpcError.
pub type Result<T> = std::result::Result<T, RpcError>;
