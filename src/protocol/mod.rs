//! Protocol module - frame header and connection handshake.
//!
//! - [`Header`]: envelope of every request and response frame
//! - [`Handshake`]: one-time JSON preamble selecting the codec

mod handshake;
mod header;

pub use handshake::{read_handshake, write_handshake, Handshake, MAGIC_NUMBER, MAX_HANDSHAKE_LEN};
pub use header::Header;
