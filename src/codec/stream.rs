//! Codec over a byte stream: segment framing for header/body pairs.
//!
//! Every encoded value travels as one segment:
//! ```text
//! ┌──────────┬──────────────────────┐
//! │ Length   │ Codec-encoded value  │
//! │ 4 bytes  │ Length bytes         │
//! │ uint32 BE│                      │
//! └──────────┴──────────────────────┘
//! ```
//!
//! A frame is a header segment immediately followed by a body segment.
//! Because bodies are length-delimited, a body that fails to decode (or one
//! nobody wants) is still consumed in full and the next header starts on a
//! segment boundary.

use bytes::{BufMut, Bytes, BytesMut};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, ReadHalf, WriteHalf};

use super::CodecType;
use crate::error::{RpcError, Result};
use crate::protocol::Header;

/// Size of the segment length prefix.
pub const SEGMENT_PREFIX_SIZE: usize = 4;

/// Default maximum size of one encoded segment (64 MiB).
pub const DEFAULT_MAX_SEGMENT_SIZE: u32 = 64 * 1024 * 1024;

/// Build a codec over a bidirectional stream.
///
/// The stream is split so one task can read while others write.
pub fn new_codec<S>(
    codec: CodecType,
    stream: S,
) -> (CodecReader<ReadHalf<S>>, CodecWriter<WriteHalf<S>>)
where
    S: AsyncRead + AsyncWrite,
{
    let (reader, writer) = tokio::io::split(stream);
    (CodecReader::new(codec, reader), CodecWriter::new(codec, writer))
}

/// Read side of a codec.
pub struct CodecReader<R> {
    reader: R,
    codec: CodecType,
    max_segment_size: u32,
}

impl<R: AsyncRead + Unpin> CodecReader<R> {
    /// Create a reader decoding with `codec`.
    pub fn new(codec: CodecType, reader: R) -> Self {
        Self {
            reader,
            codec,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
        }
    }

    /// Set the maximum accepted segment size.
    pub fn with_max_segment_size(mut self, max_segment_size: u32) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    /// The codec this reader decodes with.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Read the next frame header.
    ///
    /// # Errors
    ///
    /// - [`RpcError::ConnectionClosed`] if the stream ended cleanly before a new frame
    /// - an `UnexpectedEof` I/O error if the stream ended mid-segment
    /// - a decode error if the segment is not a valid header
    pub async fn read_header(&mut self) -> Result<Header> {
        let segment = self.read_segment().await?;
        self.codec.decode(&segment)
    }

    /// Read the body that follows a header and decode it as `T`.
    ///
    /// The body segment is consumed even when decoding fails.
    pub async fn read_body<T: DeserializeOwned>(&mut self) -> Result<T> {
        let segment = self.read_body_bytes().await?;
        self.codec.decode(&segment)
    }

    /// Read the raw body segment that follows a header.
    pub async fn read_body_bytes(&mut self) -> Result<Bytes> {
        match self.read_segment().await {
            Err(RpcError::ConnectionClosed) => Err(missing_body()),
            other => other,
        }
    }

    /// Consume the body that follows a header without decoding it.
    pub async fn discard_body(&mut self) -> Result<()> {
        let len = match self.read_prefix().await {
            Err(RpcError::ConnectionClosed) => return Err(missing_body()),
            other => other?,
        };
        let skipped =
            tokio::io::copy(&mut (&mut self.reader).take(len as u64), &mut tokio::io::sink())
                .await?;
        if skipped != len as u64 {
            return Err(RpcError::Io(std::io::Error::from(
                std::io::ErrorKind::UnexpectedEof,
            )));
        }
        Ok(())
    }

    async fn read_segment(&mut self) -> Result<Bytes> {
        let len = self.read_prefix().await?;
        let mut buf = vec![0u8; len as usize];
        self.reader.read_exact(&mut buf).await?;
        Ok(Bytes::from(buf))
    }

    /// Read and validate a segment length prefix.
    async fn read_prefix(&mut self) -> Result<u32> {
        let mut prefix = [0u8; SEGMENT_PREFIX_SIZE];
        let n = self.reader.read(&mut prefix).await?;
        if n == 0 {
            return Err(RpcError::ConnectionClosed);
        }
        if n < SEGMENT_PREFIX_SIZE {
            self.reader.read_exact(&mut prefix[n..]).await?;
        }

        let len = u32::from_be_bytes(prefix);
        if len > self.max_segment_size {
            return Err(RpcError::Protocol(format!(
                "segment of {} bytes exceeds maximum {}",
                len, self.max_segment_size
            )));
        }
        Ok(len)
    }
}

fn missing_body() -> RpcError {
    RpcError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        "stream ended between header and body",
    ))
}

/// Write side of a codec.
///
/// A frame is encoded into one buffer and written and flushed in one go. Any
/// failure closes the writer, since a partly written frame would poison the
/// stream for the peer. The same holds for a write future dropped before it
/// finished: the next write finds the frame still marked in flight, closes
/// the writer and fails instead of appending to the broken frame.
pub struct CodecWriter<W> {
    writer: W,
    codec: CodecType,
    buf: BytesMut,
    max_segment_size: u32,
    in_flight: bool,
    closed: bool,
}

impl<W: AsyncWrite + Unpin> CodecWriter<W> {
    /// Create a writer encoding with `codec`.
    pub fn new(codec: CodecType, writer: W) -> Self {
        Self {
            writer,
            codec,
            buf: BytesMut::with_capacity(4 * 1024),
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
            in_flight: false,
            closed: false,
        }
    }

    /// Set the maximum segment size this writer will produce.
    pub fn with_max_segment_size(mut self, max_segment_size: u32) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    /// The codec this writer encodes with.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Largest segment this writer will produce.
    #[inline]
    pub fn max_segment_size(&self) -> u32 {
        self.max_segment_size
    }

    /// True once the writer has been closed, explicitly or by a failed write.
    #[inline]
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Encode and write one frame, flushing before returning.
    ///
    /// # Errors
    ///
    /// Returns [`RpcError::ConnectionClosed`] if the writer is already closed.
    /// Encoding and I/O errors are returned after the writer is closed.
    pub async fn write<T: Serialize + ?Sized>(&mut self, header: &Header, body: &T) -> Result<()> {
        if self.closed {
            return Err(RpcError::ConnectionClosed);
        }
        match self.codec.encode(body) {
            Ok(body) => self.write_encoded(header, &body).await,
            Err(e) => {
                self.fail(header, &e).await;
                Err(e)
            }
        }
    }

    /// Write one frame whose body is already encoded with this writer's codec.
    pub async fn write_encoded(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        if self.closed {
            return Err(RpcError::ConnectionClosed);
        }
        if self.in_flight {
            tracing::error!("codec: previous frame was abandoned mid-write, closing");
            self.fail(header, &RpcError::ConnectionClosed).await;
            return Err(RpcError::ConnectionClosed);
        }

        self.in_flight = true;
        let result = self.write_frame(header, body).await;
        self.in_flight = false;
        if let Err(e) = &result {
            self.fail(header, e).await;
        }
        result
    }

    /// Shut down the write half. Idempotent.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.writer.shutdown().await?;
        Ok(())
    }

    async fn fail(&mut self, header: &Header, err: &RpcError) {
        tracing::error!(
            "codec: error writing frame {} ({}): {}",
            header.seq,
            header.service_method,
            err
        );
        self.in_flight = false;
        if let Err(close_err) = self.close().await {
            tracing::debug!("codec: close after failed write: {}", close_err);
        }
    }

    async fn write_frame(&mut self, header: &Header, body: &[u8]) -> Result<()> {
        let header_bytes = self.codec.encode(header)?;

        self.buf.clear();
        self.put_segment(&header_bytes)?;
        self.put_segment(body)?;

        self.writer.write_all(&self.buf).await?;
        self.writer.flush().await?;
        Ok(())
    }

    fn put_segment(&mut self, segment: &[u8]) -> Result<()> {
        let len = u32::try_from(segment.len())
            .ok()
            .filter(|len| *len <= self.max_segment_size)
            .ok_or_else(|| {
                RpcError::Protocol(format!(
                    "segment of {} bytes exceeds maximum {}",
                    segment.len(),
                    self.max_segment_size
                ))
            })?;
        self.buf.reserve(SEGMENT_PREFIX_SIZE + segment.len());
        self.buf.put_u32(len);
        self.buf.put_slice(segment);
        Ok(())
    }
}
