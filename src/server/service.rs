//! The service seam between the dispatch loop and user code.
//!
//! The dispatch loop decodes the request body as [`Service::Args`], calls the
//! service, and encodes whatever it returns as the response body. An `Err`
//! becomes the response header's error string.
//!
//! # Example
//!
//! ```ignore
//! use seqwire::server::{service_fn, Server};
//!
//! let server = Server::new(service_fn(|header, a: (i32, i32)| async move {
//!     match header.method() {
//!         Some("Sum") => Ok(a.0 + a.1),
//!         _ => Err(format!("unknown method {}", header.service_method)),
//!     }
//! }));
//! ```

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::protocol::Header;

/// Boxed future returned by services and listeners.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Outcome of one service call. The error string is sent back verbatim.
pub type ServiceResult<T> = std::result::Result<T, String>;

/// Request handler shared by every connection of a server.
pub trait Service: Send + Sync + 'static {
    /// Request body type.
    type Args: DeserializeOwned + Send + 'static;
    /// Response body type.
    type Reply: Serialize + Send + Sync + 'static;

    /// Handle one request.
    fn call<'a>(
        &'a self,
        header: &'a Header,
        args: Self::Args,
    ) -> BoxFuture<'a, ServiceResult<Self::Reply>>;
}

/// Replies `"seqwire resp <seq>"` to any string argument.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoService;

impl Service for EchoService {
    type Args = String;
    type Reply = String;

    fn call<'a>(
        &'a self,
        header: &'a Header,
        args: String,
    ) -> BoxFuture<'a, ServiceResult<String>> {
        Box::pin(async move {
            tracing::info!("rpc server: {} args={:?}", header, args);
            Ok(format!("seqwire resp {}", header.seq))
        })
    }
}

/// Service built from an async closure. See [`service_fn`].
pub struct ServiceFn<F, A, R, Fut> {
    f: F,
    _phantom: PhantomData<fn(A) -> (R, Fut)>,
}

/// Build a [`Service`] from `Fn(Header, Args) -> Future<Output = ServiceResult<Reply>>`.
pub fn service_fn<F, A, R, Fut>(f: F) -> ServiceFn<F, A, R, Fut>
where
    F: Fn(Header, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult<R>> + Send + 'static,
{
    ServiceFn {
        f,
        _phantom: PhantomData,
    }
}

impl<F, A, R, Fut> Service for ServiceFn<F, A, R, Fut>
where
    F: Fn(Header, A) -> Fut + Send + Sync + 'static,
    A: DeserializeOwned + Send + 'static,
    R: Serialize + Send + Sync + 'static,
    Fut: Future<Output = ServiceResult<R>> + Send + 'static,
{
    type Args = A;
    type Reply = R;

    fn call<'a>(&'a self, header: &'a Header, args: A) -> BoxFuture<'a, ServiceResult<R>> {
        Box::pin((self.f)(header.clone(), args))
    }
}
