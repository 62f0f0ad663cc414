//! Server side: per-connection request dispatch.
//!
//! For each connection the server reads the handshake, then loops reading
//! requests. Every decoded request runs on its own task; responses go back
//! through one [`FrameSender`], so they never interleave but may leave in
//! any order. Clients match them by sequence number.
//!
//! ```text
//! stream ─► handshake ─► read loop ─┬─► task(seq 0) ─┐
//!                                   ├─► task(seq 1) ─┼─► FrameSender ─► stream
//!                                   └─► task(seq N) ─┘
//! ```
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use seqwire::server::{EchoService, Server};
//! use tokio::net::TcpListener;
//!
//! let listener = TcpListener::bind("127.0.0.1:0").await?;
//! Arc::new(Server::new(EchoService)).accept(listener).await?;
//! ```

mod request;
mod service;

pub use request::Request;
pub use service::{service_fn, BoxFuture, EchoService, Service, ServiceFn, ServiceResult};

use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWriteExt, BufReader};

use crate::codec::{CodecReader, CodecWriter, DEFAULT_MAX_SEGMENT_SIZE};
use crate::error::{Result, RpcError};
use crate::protocol::{read_handshake, Header};
use crate::transport::{Listener, Transport};
use crate::writer::{spawn_writer_task, FrameSender};
use request::{read_request, ReadError};

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Largest segment accepted from or written to a client.
    pub max_segment_size: u32,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            max_segment_size: DEFAULT_MAX_SEGMENT_SIZE,
        }
    }
}

/// How a connection ended.
#[derive(Debug)]
pub enum ConnectionOutcome {
    /// The handshake was accepted and the read loop ran until the stream ended.
    Closed {
        /// Requests successfully decoded and dispatched.
        requests: u64,
    },
    /// The handshake was rejected; no frame was read or written.
    Rejected(RpcError),
}

/// RPC server dispatching every request to one [`Service`].
pub struct Server<S> {
    service: Arc<S>,
    config: ServerConfig,
}

impl<S: Service> Server<S> {
    /// Create a server with the default configuration.
    pub fn new(service: S) -> Self {
        Self::with_config(service, ServerConfig::default())
    }

    /// Create a server with an explicit configuration.
    pub fn with_config(service: S, config: ServerConfig) -> Self {
        Self {
            service: Arc::new(service),
            config,
        }
    }

    /// Serve one connection until its stream ends.
    ///
    /// Returns once the read loop stops. Requests still executing keep
    /// running and write their responses if the stream is still open.
    pub async fn serve_conn<T: Transport>(&self, stream: T) -> ConnectionOutcome {
        let (read_half, mut write_half) = tokio::io::split(stream);
        let mut reader = BufReader::new(read_half);

        let codec = match read_handshake(&mut reader)
            .await
            .and_then(|handshake| handshake.negotiate())
        {
            Ok(codec) => codec,
            Err(e) => {
                tracing::warn!("rpc server: handshake rejected: {}", e);
                if let Err(shutdown_err) = write_half.shutdown().await {
                    tracing::debug!("rpc server: shutdown after rejection: {}", shutdown_err);
                }
                return ConnectionOutcome::Rejected(e);
            }
        };
        tracing::debug!("rpc server: connection using {}", codec);

        let max_segment_size = self.config.max_segment_size;
        let reader = CodecReader::new(codec, reader).with_max_segment_size(max_segment_size);
        let writer = CodecWriter::new(codec, write_half).with_max_segment_size(max_segment_size);
        let (sender, _writer_task) = spawn_writer_task(writer);
        let requests = self.serve_codec(reader, sender).await;
        ConnectionOutcome::Closed { requests }
    }

    async fn serve_codec<R>(&self, mut reader: CodecReader<R>, sender: FrameSender) -> u64
    where
        R: AsyncRead + Unpin,
    {
        let mut requests = 0u64;
        loop {
            match read_request::<_, S::Args>(&mut reader).await {
                Ok(request) => {
                    requests += 1;
                    tokio::spawn(handle_request(
                        Arc::clone(&self.service),
                        request,
                        sender.clone(),
                    ));
                }
                Err(ReadError::Header(e)) => {
                    if !e.is_eof() {
                        tracing::error!("rpc server: read header error: {}", e);
                    }
                    break;
                }
                Err(ReadError::Body { header, source }) => {
                    tracing::warn!("rpc server: decode body of {} failed: {}", header, source);
                    respond_error(&sender, header, &source.to_string()).await;
                }
                Err(ReadError::Stream { header, source }) if source.is_eof() => {
                    tracing::debug!("rpc server: stream ended inside body of {}", header);
                    break;
                }
                Err(ReadError::Stream { header, source }) => {
                    // The body bytes were not consumed, so nothing after this
                    // point can be parsed as a frame.
                    tracing::warn!("rpc server: read body of {} failed: {}", header, source);
                    respond_error(&sender, header, &source.to_string()).await;
                    break;
                }
            }
        }

        if let Err(e) = sender.close().await {
            tracing::debug!("rpc server: close error: {}", e);
        }
        requests
    }

    /// Accept connections forever, serving each on its own task.
    ///
    /// Returns only when the listener fails.
    pub async fn accept<L: Listener>(self: Arc<Self>, listener: L) -> Result<()> {
        loop {
            let (stream, peer) = match listener.accept().await {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::error!("rpc server: accept error: {}", e);
                    return Err(e.into());
                }
            };
            tracing::debug!("rpc server: accepted connection from {}", peer);

            let server = Arc::clone(&self);
            tokio::spawn(async move {
                match server.serve_conn(stream).await {
                    ConnectionOutcome::Closed { requests } => {
                        tracing::debug!("rpc server: {} closed after {} requests", peer, requests)
                    }
                    ConnectionOutcome::Rejected(e) => {
                        tracing::debug!("rpc server: {} rejected: {}", peer, e)
                    }
                }
            });
        }
    }
}

async fn handle_request<S: Service>(service: Arc<S>, request: Request<S::Args>, sender: FrameSender) {
    let Request { header, args } = request;
    match service.call(&header, args).await {
        Ok(reply) => {
            if let Err(e) = sender.send(&header, &reply).await {
                tracing::error!("rpc server: write response {} error: {}", header, e);
            }
        }
        Err(message) => respond_error(&sender, header, &message).await,
    }
}

async fn respond_error(sender: &FrameSender, header: Header, message: &str) {
    let target = header.to_string();
    if let Err(e) = sender.send_error(header, message).await {
        tracing::error!("rpc server: write response {} error: {}", target, e);
    }
}
