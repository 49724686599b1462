//! mope: mutable order-preserving encrypted index
//!
//! A client encrypts values deterministically and walks a server-held binary
//! tree of ciphertexts, deciding every comparison itself. The server stores
//! each row with the order-preserving code of its node's path, so range
//! predicates run on stored rows without the server learning plaintexts.
//!
//! - [`core`]: shared types, codes and the wire protocol
//! - [`server`]: tree, rebalancing, persistence and the session server
//! - [`client`]: ciphers, cache and the navigation driver

pub use mope_client as client;
pub use mope_core as core;
pub use mope_server as server;
