//! Pending calls and their completion.
//!
//! The registry stores replies type-erased: each pending call owns a
//! [`ReplySlot`] that decodes the raw body into the caller's reply type and
//! fires the caller's one-shot channel. Completing consumes the slot, so a
//! call can only ever be completed once.

use std::fmt;
use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;
use std::task::{Context, Poll};

use bytes::Bytes;
use serde::de::DeserializeOwned;
use tokio::sync::oneshot;

use crate::codec::CodecType;
use crate::error::{Result, RpcError};

/// Destination for one call's outcome.
pub(crate) trait ReplySlot: Send {
    /// Deliver the raw body (or a failure) to the waiting caller.
    fn complete(self: Box<Self>, outcome: Result<Bytes>);
}

struct TypedReply<R> {
    codec: CodecType,
    tx: oneshot::Sender<Result<R>>,
    _reply: PhantomData<fn() -> R>,
}

impl<R> ReplySlot for TypedReply<R>
where
    R: DeserializeOwned + Send + 'static,
{
    fn complete(self: Box<Self>, outcome: Result<Bytes>) {
        let codec = self.codec;
        let result = outcome.and_then(|body| {
            codec
                .decode::<R>(&body)
                .map_err(|e| RpcError::Decode(e.to_string()))
        });
        // The caller may have dropped its Call; nobody is left to tell.
        let _ = self.tx.send(result);
    }
}

/// Create a reply slot decoding with `codec`, and the receiver it completes.
pub(crate) fn reply_channel<R>(
    codec: CodecType,
) -> (Box<dyn ReplySlot>, oneshot::Receiver<Result<R>>)
where
    R: DeserializeOwned + Send + 'static,
{
    let (tx, rx) = oneshot::channel();
    let slot = TypedReply {
        codec,
        tx,
        _reply: PhantomData,
    };
    (Box::new(slot), rx)
}

/// A registered call awaiting its response.
pub(crate) struct PendingCall {
    pub(crate) seq: u64,
    pub(crate) service_method: String,
    slot: Box<dyn ReplySlot>,
}

impl PendingCall {
    pub(crate) fn new(seq: u64, service_method: String, slot: Box<dyn ReplySlot>) -> Self {
        Self {
            seq,
            service_method,
            slot,
        }
    }

    /// Complete the call, consuming it.
    pub(crate) fn complete(self, outcome: Result<Bytes>) {
        if let Err(e) = &outcome {
            tracing::debug!(
                "rpc client: call {}#{} failed: {}",
                self.service_method,
                self.seq,
                e
            );
        }
        self.slot.complete(outcome);
    }
}

impl fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingCall")
            .field("seq", &self.seq)
            .field("service_method", &self.service_method)
            .finish_non_exhaustive()
    }
}

/// Handle to an in-flight call, returned by [`Client::go`](super::Client::go).
///
/// Resolves to the decoded reply, or to the error the call completed with.
#[must_use = "a call does nothing useful unless awaited"]
pub struct Call<R> {
    seq: u64,
    service_method: String,
    rx: oneshot::Receiver<Result<R>>,
}

impl<R> Call<R> {
    pub(crate) fn new(seq: u64, service_method: String, rx: oneshot::Receiver<Result<R>>) -> Self {
        Self {
            seq,
            service_method,
            rx,
        }
    }

    /// Sequence number assigned to this call.
    #[inline]
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// The `"Service.Method"` this call targets.
    pub fn service_method(&self) -> &str {
        &self.service_method
    }
}

impl<R> Future for Call<R> {
    type Output = Result<R>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|received| received.unwrap_or(Err(RpcError::ConnectionClosed)))
    }
}

impl<R> fmt::Debug for Call<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Call")
            .field("seq", &self.seq)
            .field("service_method", &self.service_method)
            .finish_non_exhaustive()
    }
}
