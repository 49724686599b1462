//! mope-server: Index server for the mutable order-preserving encrypted index
//!
//! Holds the ciphertext tree, applies the structural changes clients request,
//! keeps the tree height bounded by local rebuilds, and persists every
//! node's order-preserving code so range predicates can run on stored rows.

pub mod config;
pub mod error;
pub mod loopback;
pub mod rebalance;
pub mod server;
pub mod service;
pub mod stats;
pub mod store;
pub mod tree;

pub use config::ServerArgs;
pub use error::ServerError;
pub use loopback::Loopback;
pub use rebalance::{max_imbalance, RebalanceOutcome, Rebalancer};
pub use server::{Server, DEFAULT_SESSION_TIMEOUT};
pub use service::IndexService;
pub use stats::{install_prometheus_exporter, InsertStats};
pub use store::{MemoryStore, RedbStore, StoreError, TreeStore};
pub use tree::{IndexTree, NodeId, TreeNode};
