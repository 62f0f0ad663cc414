//! Echo demo - a server and a client in one process.
//!
//! This example demonstrates:
//! - Serving [`EchoService`] on a TCP listener with the accept loop
//! - Dialing the server and issuing five concurrent calls
//! - Matching each reply back to its call by sequence number
//!
//! Run with logging enabled:
//!
//! ```text
//! RUST_LOG=debug cargo run --example echo
//! ```

use std::sync::Arc;

use seqwire::{Client, EchoService, Server};
use tokio::net::TcpListener;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let listener = TcpListener::bind("127.0.0.1:0").await?;
    let addr = listener.local_addr()?;
    tracing::info!("start rpc server on {}", addr);
    tokio::spawn(Arc::new(Server::new(EchoService)).accept(listener));

    let client = Client::dial(addr).await?;

    let mut tasks = Vec::new();
    for i in 0..5 {
        let client = client.clone();
        tasks.push(tokio::spawn(async move {
            let args = format!("seqwire req {}", i);
            let reply: seqwire::Result<String> = client.call("Foo.Sum", &args).await;
            (i, reply)
        }));
    }

    for task in tasks {
        match task.await? {
            (i, Ok(reply)) => tracing::info!("call {}: reply: {}", i, reply),
            (i, Err(e)) => tracing::error!("call {}: error: {}", i, e),
        }
    }

    client.close().await?;
    Ok(())
}
