//! mope-core: Shared types for the mutable order-preserving encrypted index
//!
//! A client holding plaintexts and a server holding only deterministic
//! ciphertexts cooperatively maintain a binary search tree. The position of a
//! node in that tree is its order: the path from the root, encoded as a 32-bit
//! order-preserving code (OPC), compares like the hidden plaintexts do.
//!
//! This crate defines the vocabulary both sides share:
//! - [`Ciphertext`], [`Path`], [`Direction`]: tree keys and positions
//! - [`Opc`]: the path codec
//! - [`protocol`]: closed request/response enums and the versioned envelope
//! - [`frame`]: length-prefixed bincode framing over tokio streams
//! - [`transport`]: the one-round-trip [`Transport`] seam and its framed implementation
//!
//! # Leakage Model
//!
//! | Information | Server Knowledge |
//! |-------------|------------------|
//! | Plaintext values | NO - only deterministic ciphertexts |
//! | Equality of two plaintexts | **YES** - deterministic encryption |
//! | Order along an insertion walk | **YES** - each move reveals one comparison |
//! | Global order of stored values | **YES** - after insertion, via OPC |
//! | Key material | NO - stays on the client |
//!
//! Comparisons are only ever made on the client; the server learns the
//! outcome of a comparison through the direction the client moves.

mod ciphertext;
mod config;
mod error;
pub mod frame;
mod opc;
mod path;
pub mod protocol;
mod record;
pub mod transport;

pub use ciphertext::Ciphertext;
pub use config::{TreeConfig, DEFAULT_BALANCE_THRESHOLD};
pub use error::Error;
pub use opc::{Opc, MAX_PATH_LEN};
pub use path::{Direction, Path};
pub use protocol::{Envelope, ErrorReply, InsertRequest, Request, Response, PROTOCOL_VERSION};
pub use record::Record;
pub use transport::{FramedTransport, Transport};

pub type Result<T> = std::result::Result<T, Error>;

/// Identifier of one persisted row (auto-increment in the store)
pub type RecordId = u64;
