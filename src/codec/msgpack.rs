//! MsgPack codec using `rmp-serde`.
//!
//! Always encodes with `to_vec_named`: structs go on the wire as maps keyed by
//! field name, so a [`Header`](crate::protocol::Header) is readable by any
//! MessagePack implementation without knowing the Rust field order.
//!
//! # Example
//!
//! ```
//! use seqwire::codec::MsgPackCodec;
//! use serde::{Serialize, Deserialize};
//!
//! #[derive(Serialize, Deserialize, PartialEq, Debug)]
//! struct Args {
//!     a: i64,
//!     b: i64,
//! }
//!
//! let args = Args { a: 1, b: 2 };
//! let encoded = MsgPackCodec::encode(&args).unwrap();
//! let decoded: Args = MsgPackCodec::decode(&encoded).unwrap();
//! assert_eq!(decoded, args);
//! ```

use crate::error::Result;

/// MessagePack codec for headers and bodies.
pub struct MsgPackCodec;

impl MsgPackCodec {
    /// Encode a value to MsgPack bytes (struct-as-map).
    ///
    /// # Errors
    ///
    /// Returns error if the value cannot be serialized.
    #[inline]
    pub fn encode<T: serde::Serialize + ?Sized>(value: &T) -> Result<Vec<u8>> {
        Ok(rmp_serde::to_vec_named(value)?)
    }

    /// Decode MsgPack bytes to a value.
    ///
    /// # Errors
    ///
    /// Returns error if the bytes cannot be deserialized to type T.
    #[inline]
    pub fn decode<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T> {
        Ok(rmp_serde::from_slice(bytes)?)
    }
}
