//! Binary token stream codec
//!
//! Decodes a formula's main token stream (plus its trailing array
//! payload) into an [`Expression`](crate::token::Expression) and encodes
//! it back byte-identically. All multi-byte integers are little-endian.

mod decode;
mod encode;
pub(crate) mod reader;

pub use decode::decode;
pub use encode::{encode, Encoded};
