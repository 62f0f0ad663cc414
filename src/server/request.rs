//! Reading one request off a connection.

use tokio::io::AsyncRead;

use crate::codec::CodecReader;
use crate::error::RpcError;
use crate::protocol::Header;

/// A decoded request.
#[derive(Debug, Clone, PartialEq)]
pub struct Request<A> {
    /// Request header as sent by the client.
    pub header: Header,
    /// Decoded request body.
    pub args: A,
}

/// Why a request could not be read.
#[derive(Debug)]
pub(crate) enum ReadError {
    /// No header; the connection is finished.
    Header(RpcError),
    /// Header read, body segment read but not decodable as the args type.
    /// The stream is still aligned and the caller can answer `header`.
    Body { header: Header, source: RpcError },
    /// Header read, body segment not read: the stream ended, or the segment
    /// was rejected before its bytes were consumed. The connection cannot
    /// continue.
    Stream { header: Header, source: RpcError },
}

/// Read the next header and decode its body as `A`.
pub(crate) async fn read_request<R, A>(reader: &mut CodecReader<R>) -> Result<Request<A>, ReadError>
where
    R: AsyncRead + Unpin,
    A: serde::de::DeserializeOwned,
{
    let header = reader.read_header().await.map_err(ReadError::Header)?;
    let body = match reader.read_body_bytes().await {
        Ok(body) => body,
        Err(source) => return Err(ReadError::Stream { header, source }),
    };
    match reader.codec().decode::<A>(&body) {
        Ok(args) => Ok(Request { header, args }),
        Err(source) => Err(ReadError::Body { header, source }),
    }
}
