//! Codec module - wire encodings for frame headers and bodies.
//!
//! Codecs are selected by a string tag negotiated in the handshake:
//!
//! - [`MsgPackCodec`] - `application/msgpack`, the default binary codec
//! - [`JsonCodec`] - `application/json`
//!
//! # Design
//!
//! The set of codecs is closed and known to both peers ahead of the handshake,
//! so the registry is the [`CodecType`] enum rather than a table of trait
//! objects. Each variant dispatches to a marker struct with static
//! `encode`/`decode` methods, keeping serde generics monomorphized.
//!
//! [`new_codec`] builds a [`CodecReader`]/[`CodecWriter`] pair over a stream.
//!
//! # Example
//!
//! ```
//! use seqwire::codec::CodecType;
//!
//! let codec = CodecType::from_tag("application/msgpack").unwrap();
//! let encoded = codec.encode(&"hello").unwrap();
//! let decoded: String = codec.decode(&encoded).unwrap();
//! assert_eq!(decoded, "hello");
//!
//! assert!(CodecType::from_tag("application/gob").is_none());
//! ```

mod json;
mod msgpack;
mod stream;

use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;
pub use stream::{
    new_codec, CodecReader, CodecWriter, DEFAULT_MAX_SEGMENT_SIZE, SEGMENT_PREFIX_SIZE,
};

/// Tag for the MessagePack codec.
pub const MSGPACK_TAG: &str = "application/msgpack";

/// Tag for the JSON codec.
pub const JSON_TAG: &str = "application/json";

/// Registered wire codecs, keyed by their type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CodecType {
    /// MessagePack (struct-as-map).
    #[default]
    MsgPack,
    /// JSON.
    Json,
}

impl CodecType {
    /// Every registered codec.
    pub const ALL: [CodecType; 2] = [CodecType::MsgPack, CodecType::Json];

    /// Look up a codec by its type tag.
    ///
    /// Returns `None` for unregistered tags.
    pub fn from_tag(tag: &str) -> Option<CodecType> {
        Self::ALL.into_iter().find(|c| c.tag() == tag)
    }

    /// The type tag sent in the handshake.
    pub fn tag(self) -> &'static str {
        match self {
            CodecType::MsgPack => MSGPACK_TAG,
            CodecType::Json => JSON_TAG,
        }
    }

    /// Encode a value with this codec.
    #[inline]
    pub fn encode<T: Serialize + ?Sized>(self, value: &T) -> Result<Vec<u8>> {
        match self {
            CodecType::MsgPack => MsgPackCodec::encode(value),
            CodecType::Json => JsonCodec::encode(value),
        }
    }

    /// Decode a value with this codec.
    #[inline]
    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            CodecType::MsgPack => MsgPackCodec::decode(bytes),
            CodecType::Json => JsonCodec::decode(bytes),
        }
    }
}

impl fmt::Display for CodecType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_tag_registered() {
        assert_eq!(CodecType::from_tag(MSGPACK_TAG), Some(CodecType::MsgPack));
        assert_eq!(CodecType::from_tag(JSON_TAG), Some(CodecType::Json));
    }

    #[test]
    fn test_from_tag_unknown() {
        assert_eq!(CodecType::from_tag("application/gob"), None);
        assert_eq!(CodecType::from_tag(""), None);
        assert_eq!(CodecType::from_tag("APPLICATION/JSON"), None);
    }

    #[test]
    fn test_default_is_msgpack() {
        assert_eq!(CodecType::default(), CodecType::MsgPack);
        assert_eq!(CodecType::default().to_string(), MSGPACK_TAG);
    }

    #[test]
    fn test_dispatch_matches_marker_codecs() {
        let value = vec!["a".to_string(), "b".to_string()];
        assert_eq!(
            CodecType::MsgPack.encode(&value).unwrap(),
            MsgPackCodec::encode(&value).unwrap()
        );
        assert_eq!(
            CodecType::Json.encode(&value).unwrap(),
            JsonCodec::encode(&value).unwrap()
        );
    }
}
