//! Client side: call submission and the receive loop.
//!
//! A [`Client`] owns one connection. Submitting a call allocates the next
//! sequence number, registers a pending call and queues the request on the
//! connection's writer task under one lock, so requests hit the wire in
//! sequence order. A single receive task reads responses and completes the
//! pending call with the matching sequence number. When the connection
//! fails, every call still pending completes with that failure. Dropping
//! the last clone of a client closes the connection.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::Client;
//!
//! let client = Client::dial("127.0.0.1:7000").await?;
//! let reply: String = client.call("Foo.Sum", "seqwire req 0").await?;
//! client.close().await?;
//! ```

mod call;
mod registry;

pub use call::Call;

use std::sync::{Arc, Weak};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::Notify;

use crate::codec::{CodecReader, CodecType, CodecWriter, DEFAULT_MAX_SEGMENT_SIZE};
use crate::error::{Result, RpcError};
use crate::protocol::{write_handshake, Handshake, Header, MAGIC_NUMBER};
use crate::transport::{BoxedReader, BoxedWriter, Transport};
use crate::writer::{spawn_writer_task, wait_written, FrameSender};
use call::reply_channel;
use registry::CallRegistry;

/// Builder for configuring and connecting a [`Client`].
#[derive(Debug, Clone)]
pub struct ClientBuilder {
    codec: CodecType,
    magic_number: u32,
    max_segment_size: u32,
}

impl ClientBuilder {
    /// Create a builder with the default codec and magic number.
    pub fn new() -> Self {
        Self {
            codec: CodecType::default(),
            magic_number: MAGIC_NUMBER,
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
        }
    }

    /// Set the codec requested in the handshake.
    ///
    /// Default: MsgPack
    pub fn codec(mut self, codec: CodecType) -> Self {
        self.codec = codec;
        self
    }

    /// Override the magic number sent in the handshake.
    ///
    /// Only useful for talking to a server speaking a different protocol
    /// revision, or for testing rejection.
    pub fn magic_number(mut self, magic_number: u32) -> Self {
        self.magic_number = magic_number;
        self
    }

    /// Set the largest segment this client will read or write.
    ///
    /// Default: 64 MiB
    pub fn max_segment_size(mut self, max_segment_size: u32) -> Self {
        self.max_segment_size = max_segment_size;
        self
    }

    /// Send the handshake over `stream` and start the receive task.
    pub async fn connect<T: Transport>(self, stream: T) -> Result<Client> {
        let (read_half, mut write_half) = tokio::io::split(stream);

        let handshake = Handshake {
            magic_number: self.magic_number,
            codec_type: self.codec.tag().to_string(),
        };
        write_handshake(&mut write_half, &handshake).await?;

        let reader: BoxedReader = Box::new(read_half);
        let writer: BoxedWriter = Box::new(write_half);
        let reader =
            CodecReader::new(self.codec, reader).with_max_segment_size(self.max_segment_size);
        let writer =
            CodecWriter::new(self.codec, writer).with_max_segment_size(self.max_segment_size);

        let (sender, _writer_task) = spawn_writer_task(writer);
        let closed = Arc::new(Notify::new());
        let inner = Arc::new(ClientInner {
            codec: self.codec,
            sender,
            registry: CallRegistry::new(),
            closed: Arc::clone(&closed),
        });
        tokio::spawn(receive(Arc::downgrade(&inner), closed, reader));

        Ok(Client { inner })
    }

    /// Open a TCP connection to `addr` and [`connect`](Self::connect) over it.
    pub async fn dial<A: ToSocketAddrs>(self, addr: A) -> Result<Client> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        self.connect(stream).await
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

struct ClientInner {
    codec: CodecType,
    sender: FrameSender,
    registry: CallRegistry,
    /// Wakes the receive task on `close` and on drop.
    closed: Arc<Notify>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        self.closed.notify_one();
    }
}

/// Removes a registered call if `go` is dropped before its request is written.
struct Unregister<'a> {
    registry: &'a CallRegistry,
    seq: Option<u64>,
}

impl Unregister<'_> {
    fn disarm(mut self) {
        self.seq = None;
    }
}

impl Drop for Unregister<'_> {
    fn drop(&mut self) {
        if let Some(seq) = self.seq.take() {
            if self.registry.remove(seq).is_some() {
                tracing::debug!("rpc client: call {} abandoned before written", seq);
            }
        }
    }
}

/// RPC client over one connection.
///
/// Cheap to clone; clones share the connection and its calls. Calls may be
/// issued concurrently from any number of tasks.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Client {
    /// Create a new client builder.
    pub fn builder() -> ClientBuilder {
        ClientBuilder::new()
    }

    /// Connect over `stream` with the default configuration.
    pub async fn connect<T: Transport>(stream: T) -> Result<Self> {
        ClientBuilder::new().connect(stream).await
    }

    /// Dial `addr` over TCP with the default configuration.
    pub async fn dial<A: ToSocketAddrs>(addr: A) -> Result<Self> {
        ClientBuilder::new().dial(addr).await
    }

    /// The codec negotiated for this connection.
    #[inline]
    pub fn codec(&self) -> CodecType {
        self.inner.codec
    }

    /// Submit a call without waiting for its reply.
    ///
    /// The request is on the wire when this returns. A write failure does not
    /// fail `go` itself: the returned [`Call`] resolves to that error.
    ///
    /// Dropping the future before it completes unregisters the call. The
    /// request may still be written, and its response is then discarded.
    ///
    /// # Errors
    ///
    /// - [`RpcError::Unavailable`] if the client is closing or shut down
    /// - an encode error if `args` cannot be encoded; nothing is sent
    pub async fn go<A, R>(&self, service_method: &str, args: &A) -> Result<Call<R>>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        let inner = &*self.inner;
        let body = inner.sender.encode(args)?;
        let (slot, rx) = reply_channel::<R>(inner.codec);

        let (seq, written) = inner.registry.register(service_method, slot, |seq| {
            inner.sender.enqueue(Header::new(service_method, seq), body)
        })?;
        let guard = Unregister {
            registry: &inner.registry,
            seq: Some(seq),
        };

        if let Err(e) = wait_written(written).await {
            // The receive task may already have drained it.
            if let Some(pending) = inner.registry.remove(seq) {
                pending.complete(Err(e));
            }
        }
        guard.disarm();

        Ok(Call::new(seq, service_method.to_string(), rx))
    }

    /// Submit a call and wait for its reply.
    pub async fn call<A, R>(&self, service_method: &str, args: &A) -> Result<R>
    where
        A: Serialize + ?Sized,
        R: DeserializeOwned + Send + 'static,
    {
        self.go(service_method, args).await?.await
    }

    /// Close the connection.
    ///
    /// New calls fail with [`RpcError::Unavailable`]; calls still pending
    /// complete with [`RpcError::ConnectionClosed`] unless their response
    /// is already being read.
    ///
    /// # Errors
    ///
    /// [`RpcError::Unavailable`] if the client was already closed.
    pub async fn close(&self) -> Result<()> {
        self.inner.registry.close()?;
        self.inner.closed.notify_one();
        self.inner.sender.close().await
    }

    /// True while the client accepts new calls.
    pub fn is_available(&self) -> bool {
        self.inner.registry.is_available()
    }

    /// Number of calls waiting for a response.
    pub fn pending_calls(&self) -> usize {
        self.inner.registry.pending_count()
    }
}

/// Read responses until the connection fails or the client is closed or
/// dropped.
async fn receive(
    inner: Weak<ClientInner>,
    closed: Arc<Notify>,
    mut reader: CodecReader<BoxedReader>,
) {
    let err = loop {
        let header = tokio::select! {
            _ = closed.notified() => break RpcError::ConnectionClosed,
            header = reader.read_header() => match header {
                Ok(header) => header,
                Err(e) => break e,
            },
        };

        let pending = match inner.upgrade() {
            Some(inner) => inner.registry.remove(header.seq),
            None => break RpcError::ConnectionClosed,
        };
        match pending {
            None => {
                tracing::debug!("rpc client: no pending call for response {}", header);
                if let Err(e) = reader.discard_body().await {
                    break e;
                }
            }
            Some(pending) if header.is_error() => {
                let discarded = reader.discard_body().await;
                pending.complete(Err(RpcError::Remote(header.error)));
                if let Err(e) = discarded {
                    break e;
                }
            }
            Some(pending) => match reader.read_body_bytes().await {
                Ok(body) => pending.complete(Ok(body)),
                Err(e) => {
                    pending.complete(Err(e.duplicate()));
                    break e;
                }
            },
        }
    };

    if err.is_eof() {
        tracing::debug!("rpc client: receive loop stopped: {}", err);
    } else {
        tracing::warn!("rpc client: receive loop stopped: {}", err);
    }
    // A dropped client already released its calls and its writer.
    if let Some(inner) = inner.upgrade() {
        terminate_calls(&inner, err).await;
    }
}

/// Fail every pending call with `err`, then close the write side.
///
/// Registration and queueing share the registry lock, so no call can be
/// registered or queued while the drain runs.
async fn terminate_calls(inner: &ClientInner, err: RpcError) {
    let drained = inner.registry.terminate_all(&err);
    if drained > 0 {
        tracing::debug!("rpc client: failed {} pending calls: {}", drained, err);
    }
    if let Err(e) = inner.sender.close().await {
        tracing::debug!("rpc client: close after receive loop: {}", e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::read_handshake;
    use tokio::io::{duplex, BufReader};

    #[test]
    fn test_builder_defaults() {
        let builder = ClientBuilder::default();
        assert_eq!(builder.codec, CodecType::MsgPack);
        assert_eq!(builder.magic_number, MAGIC_NUMBER);
        assert_eq!(builder.max_segment_size, DEFAULT_MAX_SEGMENT_SIZE);
    }

    #[test]
    fn test_builder_method_chaining() {
        let builder = Client::builder()
            .codec(CodecType::Json)
            .magic_number(0xdead_beef)
            .max_segment_size(1024);

        assert_eq!(builder.codec, CodecType::Json);
        assert_eq!(builder.magic_number, 0xdead_beef);
        assert_eq!(builder.max_segment_size, 1024);
    }

    #[tokio::test]
    async fn test_connect_sends_handshake_then_frames() {
        let (client_side, server_side) = duplex(4096);
        let client = Client::builder()
            .codec(CodecType::Json)
            .connect(client_side)
            .await
            .unwrap();
        assert_eq!(client.codec(), CodecType::Json);

        let mut server = BufReader::new(server_side);
        let handshake = read_handshake(&mut server).await.unwrap();
        assert_eq!(handshake.negotiate().unwrap(), CodecType::Json);

        let call = client.go::<_, String>("Foo.Sum", "hi").await.unwrap();
        assert_eq!(call.seq(), 0);
        assert_eq!(client.pending_calls(), 1);

        let mut reader = CodecReader::new(CodecType::Json, server);
        let header = reader.read_header().await.unwrap();
        assert_eq!(header, Header::new("Foo.Sum", 0));
        let body: String = reader.read_body().await.unwrap();
        assert_eq!(body, "hi");
    }

    #[tokio::test]
    async fn test_close_fails_pending_and_new_calls() {
        let (client_side, _server_side) = duplex(4096);
        let client = Client::connect(client_side).await.unwrap();
        let call = client.go::<_, String>("Foo.Sum", "hi").await.unwrap();

        client.close().await.unwrap();
        assert!(!client.is_available());
        assert!(matches!(call.await, Err(RpcError::ConnectionClosed)));
        assert!(matches!(
            client.go::<_, String>("Foo.Sum", "late").await,
            Err(RpcError::Unavailable)
        ));
        assert!(matches!(client.close().await, Err(RpcError::Unavailable)));
    }

    #[tokio::test]
    async fn test_peer_hangup_fails_pending_calls() {
        let (client_side, server_side) = duplex(4096);
        let client = Client::connect(client_side).await.unwrap();
        let first = client.go::<_, String>("Foo.Sum", "a").await.unwrap();
        let second = client.go::<_, String>("Foo.Sum", "b").await.unwrap();

        drop(server_side);

        assert!(first.await.unwrap_err().is_eof());
        assert!(second.await.unwrap_err().is_eof());
        assert!(!client.is_available());
        assert_eq!(client.pending_calls(), 0);
    }
}
