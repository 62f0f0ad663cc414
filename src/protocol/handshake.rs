//! Connection handshake.
//!
//! Before any frame, the client sends one JSON line naming the protocol magic
//! number and the codec it wants:
//!
//! ```text
//! {"magicNumber":305441741,"codecType":"application/msgpack"}\n
//! ```
//!
//! JSON is used regardless of the negotiated codec, since the server cannot
//! know the codec until it has read this record. The server answers nothing:
//! on success frames start flowing, on failure the connection is closed.
//!
//! # Example
//!
//! ```
//! use seqwire::codec::CodecType;
//! use seqwire::protocol::{Handshake, MAGIC_NUMBER};
//!
//! let handshake = Handshake::new(CodecType::Json);
//! assert_eq!(handshake.magic_number, MAGIC_NUMBER);
//! assert_eq!(handshake.negotiate().unwrap(), CodecType::Json);
//! ```

use serde::{Deserialize, Serialize};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::codec::CodecType;
use crate::error::{RpcError, Result};

/// Magic number identifying a seqwire connection.
pub const MAGIC_NUMBER: u32 = 0x1234_abcd;

/// Maximum length of the handshake line, newline included.
pub const MAX_HANDSHAKE_LEN: u64 = 1024;

/// The handshake record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Handshake {
    /// Must equal [`MAGIC_NUMBER`].
    pub magic_number: u32,
    /// Tag of the codec used for every following frame.
    pub codec_type: String,
}

impl Handshake {
    /// Handshake for `codec` with the standard magic number.
    pub fn new(codec: CodecType) -> Self {
        Self {
            magic_number: MAGIC_NUMBER,
            codec_type: codec.tag().to_string(),
        }
    }

    /// Validate the record and resolve its codec.
    ///
    /// # Errors
    ///
    /// - [`RpcError::BadMagicNumber`] if the magic number is wrong
    /// - [`RpcError::UnknownCodec`] if the codec tag is not registered
    pub fn negotiate(&self) -> Result<CodecType> {
        if self.magic_number != MAGIC_NUMBER {
            return Err(RpcError::BadMagicNumber(self.magic_number));
        }
        CodecType::from_tag(&self.codec_type)
            .ok_or_else(|| RpcError::UnknownCodec(self.codec_type.clone()))
    }
}

impl Default for Handshake {
    fn default() -> Self {
        Self::new(CodecType::default())
    }
}

/// Write the handshake line and flush.
pub async fn write_handshake<W>(writer: &mut W, handshake: &Handshake) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut line = serde_json::to_vec(handshake)?;
    line.push(b'\n');
    writer.write_all(&line).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one handshake line.
///
/// Reads exactly up to and including the newline, so the buffered reader
/// can go on to feed the codec without losing bytes.
///
/// # Errors
///
/// - [`RpcError::ConnectionClosed`] if the stream ends before any byte
/// - [`RpcError::Protocol`] if the line is unterminated or too long
/// - [`RpcError::Json`] if the line is not a handshake record
pub async fn read_handshake<R>(reader: &mut R) -> Result<Handshake>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = Vec::with_capacity(128);
    let n = (&mut *reader)
        .take(MAX_HANDSHAKE_LEN)
        .read_until(b'\n', &mut line)
        .await?;
    if n == 0 {
        return Err(RpcError::ConnectionClosed);
    }
    if line.last() != Some(&b'\n') {
        return Err(RpcError::Protocol(format!(
            "handshake line unterminated after {} bytes",
            n
        )));
    }
    Ok(serde_json::from_slice(&line)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{duplex, BufReader};

    #[test]
    fn test_default_handshake() {
        let handshake = Handshake::default();
        assert_eq!(handshake.magic_number, MAGIC_NUMBER);
        assert_eq!(handshake.codec_type, "application/msgpack");
        assert_eq!(handshake.negotiate().unwrap(), CodecType::MsgPack);
    }

    #[test]
    fn test_wire_format() {
        let json = serde_json::to_string(&Handshake::new(CodecType::Json)).unwrap();
        assert_eq!(
            json,
            r#"{"magicNumber":305441741,"codecType":"application/json"}"#
        );
    }

    #[test]
    fn test_bad_magic_rejected() {
        let handshake = Handshake {
            magic_number: 0xdead_beef,
            codec_type: "application/msgpack".into(),
        };
        assert!(matches!(
            handshake.negotiate(),
            Err(RpcError::BadMagicNumber(0xdead_beef))
        ));
    }

    #[test]
    fn test_unknown_codec_rejected() {
        let handshake = Handshake {
            magic_number: MAGIC_NUMBER,
            codec_type: "application/gob".into(),
        };
        match handshake.negotiate() {
            Err(RpcError::UnknownCodec(tag)) => assert_eq!(tag, "application/gob"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_round_trip_leaves_trailing_bytes() {
        let (mut client, server) = duplex(1024);
        write_handshake(&mut client, &Handshake::default()).await.unwrap();
        client.write_all(b"frames").await.unwrap();
        drop(client);

        let mut reader = BufReader::new(server);
        let handshake = read_handshake(&mut reader).await.unwrap();
        assert_eq!(handshake, Handshake::default());

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"frames");
    }

    #[tokio::test]
    async fn test_empty_stream_is_connection_closed() {
        let (client, server) = duplex(64);
        drop(client);

        let mut reader = BufReader::new(server);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
    }

    #[tokio::test]
    async fn test_oversized_line_rejected() {
        let (mut client, server) = duplex(4096);
        client.write_all(&[b'x'; 2048]).await.unwrap();

        let mut reader = BufReader::new(server);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(matches!(err, RpcError::Protocol(_)));
    }

    #[tokio::test]
    async fn test_garbage_line_rejected() {
        let (mut client, server) = duplex(64);
        client.write_all(b"GET / HTTP/1.1\n").await.unwrap();

        let mut reader = BufReader::new(server);
        let err = read_handshake(&mut reader).await.unwrap_err();
        assert!(matches!(err, RpcError::Json(_)));
    }
}
