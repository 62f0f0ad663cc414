//! Frame header.
//!
//! Every frame starts with a codec-encoded header:
//! ```text
//! ┌────────────────┬─────────────┬──────────────┐
//! │ serviceMethod  │ sequenceNum │ error        │
//! │ "Service.Meth" │ uint64      │ "" unless    │
//! │                │             │ call failed  │
//! └────────────────┴─────────────┴──────────────┘
//! ```
//!
//! The client leaves `error` empty; the server fills it in only when it could
//! not decode or execute the call.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Wire-level envelope of one request or response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Target in `"Service.Method"` form.
    #[serde(rename = "serviceMethod")]
    pub service_method: String,
    /// Sequence number correlating a response with its request.
    #[serde(rename = "sequenceNum")]
    pub seq: u64,
    /// Failure message; empty on success.
    #[serde(default)]
    pub error: String,
}

impl Header {
    /// Create a request header with an empty error.
    ///
    /// # Example
    ///
    /// ```
    /// use seqwire::protocol::Header;
    ///
    /// let header = Header::new("Foo.Sum", 0);
    /// assert_eq!(header.service(), Some("Foo"));
    /// assert_eq!(header.method(), Some("Sum"));
    /// assert!(!header.is_error());
    /// ```
    pub fn new(service_method: impl Into<String>, seq: u64) -> Self {
        Self {
            service_method: service_method.into(),
            seq,
            error: String::new(),
        }
    }

    /// True if the header carries a failure message.
    #[inline]
    pub fn is_error(&self) -> bool {
        !self.error.is_empty()
    }

    /// Service part of `"Service.Method"`, if the dot is present.
    pub fn service(&self) -> Option<&str> {
        self.service_method.rsplit_once('.').map(|(service, _)| service)
    }

    /// Method part of `"Service.Method"`, if the dot is present.
    pub fn method(&self) -> Option<&str> {
        self.service_method.rsplit_once('.').map(|(_, method)| method)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.service_method, self.seq)?;
        if self.is_error() {
            write!(f, " error={:?}", self.error)?;
        }
        Ok(())
    }
}
