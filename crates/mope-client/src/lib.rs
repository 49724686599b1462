//! mope-client: Client for the mutable order-preserving encrypted index
//!
//! Owns the key and does every comparison. The server is handed only
//! ciphertexts and told where in the tree to put them; this crate decides
//! where by walking the tree one node at a time.

pub mod cache;
pub mod cipher;
pub mod config;
pub mod dataset;
pub mod driver;
pub mod error;
pub mod keys;
pub mod repl;
pub mod transport;

pub use cache::{Bounds, ClientCache};
pub use cipher::{AesScheme, Alphabet, CipherError, EncryptionScheme, Ff1Scheme, Sm4Scheme};
pub use config::{CipherKind, ClientArgs, Command};
pub use driver::{DecryptedRecord, IngestSummary, InsertReceipt, NavigationDriver};
pub use error::ClientError;
pub use keys::Key;
pub use transport::{connect, TcpTransport};
