//! # seqwire
//!
//! Minimal RPC transport: many concurrent calls multiplexed over one
//! byte stream, matched to their responses by sequence number.
//!
//! ## Architecture
//!
//! - **Handshake**: one JSON line naming the magic number and the codec
//! - **Frames**: a length-prefixed header segment followed by a
//!   length-prefixed body segment, both encoded with the negotiated codec
//!   (MsgPack by default, or JSON)
//! - **Client**: allocates sequence numbers, keeps pending calls, and runs a
//!   receive task that completes each call exactly once
//! - **Server**: reads requests in a loop and runs each on its own task;
//!   responses are queued on one writer task and may go out in any order
//!
//! ## Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use seqwire::{Client, EchoService, Server};
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> seqwire::Result<()> {
//!     let listener = TcpListener::bind("127.0.0.1:0").await?;
//!     let addr = listener.local_addr()?;
//!     tokio::spawn(Arc::new(Server::new(EchoService)).accept(listener));
//!
//!     let client = Client::dial(addr).await?;
//!     let reply: String = client.call("Foo.Sum", "seqwire req 0").await?;
//!     assert_eq!(reply, "seqwire resp 0");
//!     client.close().await
//! }
//! ```

pub mod client;
pub mod codec;
pub mod error;
pub mod protocol;
pub mod server;
pub mod transport;
pub mod writer;

pub use client::{Call, Client, ClientBuilder};
pub use codec::CodecType;
pub use error::{Result, RpcError};
pub use protocol::{Handshake, Header, MAGIC_NUMBER};
pub use server::{
    service_fn, ConnectionOutcome, EchoService, Server, ServerConfig, Service, ServiceResult,
};
