//! Dedicated writer task owning one connection's write side.
//!
//! Every task that writes to a connection queues frames on the same
//! [`FrameSender`]; one task drains the queue into the [`CodecWriter`]:
//!
//! ```text
//! Request 1 ─┐
//! Request 2 ─┼─► FrameSender (mpsc) ─► writer task ─► CodecWriter ─► stream
//! Request N ─┘
//! ```
//!
//! Frames are written whole and in queue order, so they never interleave on
//! the wire. A caller that stops waiting for its write cannot cut a frame
//! short: the frame is already queued and the writer task finishes it.
//! Queueing is synchronous, which lets the client queue a request under the
//! same lock that assigns its sequence number.

use bytes::Bytes;
use serde::Serialize;
use tokio::io::AsyncWrite;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

use crate::codec::{CodecType, CodecWriter};
use crate::error::{Result, RpcError};
use crate::protocol::Header;

/// Completion of one queued frame.
pub(crate) type FrameWritten = oneshot::Receiver<Result<()>>;

enum Command {
    Frame {
        header: Header,
        body: Bytes,
        done: oneshot::Sender<Result<()>>,
    },
    Close {
        done: oneshot::Sender<Result<()>>,
    },
}

/// Cloneable handle for queueing frames on a connection.
///
/// The writer task shuts the stream down once every handle is dropped.
#[derive(Clone)]
pub struct FrameSender {
    tx: mpsc::UnboundedSender<Command>,
    codec: CodecType,
    max_segment_size: u32,
}

/// Spawn the writer task for `writer`.
pub fn spawn_writer_task<W>(writer: CodecWriter<W>) -> (FrameSender, JoinHandle<()>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let sender = FrameSender {
        tx,
        codec: writer.codec(),
        max_segment_size: writer.max_segment_size(),
    };
    let task = tokio::spawn(writer_loop(writer, rx));
    (sender, task)
}

impl FrameSender {
    /// The codec bodies must be encoded with.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.codec
    }

    /// Encode a body for [`enqueue`](Self::enqueue).
    pub(crate) fn encode<T: Serialize + ?Sized>(&self, body: &T) -> Result<Bytes> {
        self.codec.encode(body).map(Bytes::from)
    }

    /// Queue a frame with an encoded body.
    ///
    /// Fails with [`RpcError::ConnectionClosed`] once the writer task is gone.
    pub(crate) fn enqueue(&self, header: Header, body: Bytes) -> Result<FrameWritten> {
        let (done, written) = oneshot::channel();
        self.tx
            .send(Command::Frame { header, body, done })
            .map_err(|_| RpcError::ConnectionClosed)?;
        Ok(written)
    }

    /// Write one frame and wait until it is flushed.
    ///
    /// A body that fails to encode closes the connection, like any other
    /// failed write.
    pub async fn send<T: Serialize + ?Sized>(&self, header: &Header, body: &T) -> Result<()> {
        let body = match self.encode(body) {
            Ok(body) => body,
            Err(e) => {
                tracing::error!("writer: encoding body of {} failed: {}", header, e);
                if let Err(close_err) = self.close().await {
                    tracing::debug!("writer: close after encode failure: {}", close_err);
                }
                return Err(e);
            }
        };
        wait_written(self.enqueue(header.clone(), body)?).await
    }

    /// Send `header` as an error response carrying `message` and a unit body.
    ///
    /// The message is shortened if needed so the header fits in one segment.
    pub async fn send_error(&self, mut header: Header, message: &str) -> Result<()> {
        fit_error(&mut header, message, self.codec, self.max_segment_size);
        self.send(&header, &()).await
    }

    /// Close the write side after every frame queued so far is written.
    ///
    /// Frames queued afterwards fail with [`RpcError::ConnectionClosed`].
    pub async fn close(&self) -> Result<()> {
        let (done, closed) = oneshot::channel();
        if self.tx.send(Command::Close { done }).is_err() {
            return Ok(());
        }
        closed.await.unwrap_or(Ok(()))
    }
}

/// Wait for a queued frame to be written.
pub(crate) async fn wait_written(written: FrameWritten) -> Result<()> {
    written.await.unwrap_or(Err(RpcError::ConnectionClosed))
}

async fn writer_loop<W>(mut writer: CodecWriter<W>, mut rx: mpsc::UnboundedReceiver<Command>)
where
    W: AsyncWrite + Unpin,
{
    while let Some(command) = rx.recv().await {
        match command {
            Command::Frame { header, body, done } => {
                let result = writer.write_encoded(&header, &body).await;
                // The caller may have stopped waiting.
                let _ = done.send(result);
            }
            Command::Close { done } => {
                let _ = done.send(writer.close().await);
            }
        }
        if writer.is_closed() {
            break;
        }
    }

    // Frames still queued are dropped; their callers see ConnectionClosed.
    if let Err(e) = writer.close().await {
        tracing::debug!("writer: close error: {}", e);
    }
}

/// Put `message` in `header.error`, cut at a char boundary until the encoded
/// header fits in `max_segment_size`.
fn fit_error(header: &mut Header, message: &str, codec: CodecType, max_segment_size: u32) {
    let fits = |header: &Header| {
        codec
            .encode(header)
            .map(|encoded| encoded.len() <= max_segment_size as usize)
            .unwrap_or(false)
    };

    let mut end = message.len();
    loop {
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        header.error = message[..end].to_string();
        if end == 0 || fits(header) {
            return;
        }
        end /= 2;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{new_codec, CodecReader};
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_send_writes_frame() {
        let (client, server) = duplex(4096);
        let (_, writer) = new_codec(CodecType::MsgPack, client);
        let (sender, _task) = spawn_writer_task(writer);
        let mut reader = CodecReader::new(CodecType::MsgPack, server);

        sender.send(&Header::new("Foo.Sum", 5), "hello").await.unwrap();

        assert_eq!(reader.read_header().await.unwrap().seq, 5);
        let body: String = reader.read_body().await.unwrap();
        assert_eq!(body, "hello");
    }

    #[tokio::test]
    async fn test_concurrent_senders_never_interleave() {
        // Small pipe so the writer is suspended mid-frame while others queue.
        let (client, server) = duplex(64);
        let (_, writer) = new_codec(CodecType::MsgPack, client);
        let (sender, _task) = spawn_writer_task(writer);
        let mut reader = CodecReader::new(CodecType::MsgPack, server);

        let mut tasks = Vec::new();
        for seq in 0..32u64 {
            let sender = sender.clone();
            tasks.push(tokio::spawn(async move {
                let body = vec![seq as u8; 1000];
                sender
                    .send(&Header::new("Bulk.Put", seq), &body)
                    .await
                    .unwrap();
            }));
        }

        let mut seen = Vec::new();
        for _ in 0..32 {
            let header = reader.read_header().await.unwrap();
            let body: Vec<u8> = reader.read_body().await.unwrap();
            assert_eq!(body.len(), 1000);
            assert!(body.iter().all(|b| *b == header.seq as u8));
            seen.push(header.seq);
        }
        for task in tasks {
            task.await.unwrap();
        }

        seen.sort_unstable();
        assert_eq!(seen, (0..32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_abandoned_send_still_writes_whole_frame() {
        let (client, server) = duplex(64);
        let (_, writer) = new_codec(CodecType::MsgPack, client);
        let (sender, _task) = spawn_writer_task(writer);

        let big = "x".repeat(4096);
        let abandoned = tokio::time::timeout(
            std::time::Duration::from_millis(20),
            sender.send(&Header::new("Foo.Sum", 0), &big),
        )
        .await;
        assert!(abandoned.is_err());

        let next = tokio::spawn({
            let sender = sender.clone();
            async move { sender.send(&Header::new("Foo.Sum", 1), "next").await }
        });

        let mut reader = CodecReader::new(CodecType::MsgPack, server);
        assert_eq!(reader.read_header().await.unwrap().seq, 0);
        let body: String = reader.read_body().await.unwrap();
        assert_eq!(body, big);
        assert_eq!(reader.read_header().await.unwrap().seq, 1);
        let body: String = reader.read_body().await.unwrap();
        assert_eq!(body, "next");
        next.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_close_is_shared_between_clones() {
        let (client, _server) = duplex(4096);
        let (_, writer) = new_codec(CodecType::MsgPack, client);
        let (sender, task) = spawn_writer_task(writer);
        let other = sender.clone();

        sender.close().await.unwrap();
        task.await.unwrap();

        let err = other.send(&Header::new("Foo.Sum", 0), "late").await.unwrap_err();
        assert!(matches!(err, RpcError::ConnectionClosed));
        other.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_dropping_every_sender_shuts_stream() {
        let (client, mut server) = duplex(4096);
        let (_, writer) = new_codec(CodecType::MsgPack, client);
        let (sender, task) = spawn_writer_task(writer);

        drop(sender);
        task.await.unwrap();

        let mut rest = Vec::new();
        tokio::io::AsyncReadExt::read_to_end(&mut server, &mut rest)
            .await
            .unwrap();
        assert!(rest.is_empty());
    }

    #[test]
    fn test_fit_error_shortens_long_message() {
        let message = "é".repeat(300);
        let mut header = Header::new("Foo.Sum", 0);
        fit_error(&mut header, &message, CodecType::MsgPack, 64);

        assert!(header.is_error());
        assert!(message.starts_with(&header.error));
        assert!(CodecType::MsgPack.encode(&header).unwrap().len() <= 64);
    }

    #[test]
    fn test_fit_error_keeps_short_message() {
        let mut header = Header::new("Foo.Sum", 0);
        fit_error(&mut header, "boom", CodecType::Json, 1024);
        assert_eq!(header.error, "boom");
    }
}
