//! Persistence bridge
//!
//! Every insertion is a row `(record id, value, OPC)`. The tree itself is
//! never stored: it is rebuilt from the rows at startup, so the rows must
//! always carry each node's current OPC. Range predicates run directly on the
//! stored OPCs.

mod memory;
mod redb_store;

pub use self::memory::MemoryStore;
pub use self::redb_store::RedbStore;

use mope_core::{Ciphertext, Opc, Record, RecordId};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

/// Row storage behind the index tree
pub trait TreeStore {
    /// Every stored row, in record id order
    fn rows(&self) -> Result<Vec<Record>, StoreError>;

    /// Store a new row and return its id
    fn insert_row(&mut self, value: &Ciphertext, opc: Opc) -> Result<RecordId, StoreError>;

    /// Set the OPC of every row holding `value`; returns rows affected
    fn update_opc(&mut self, value: &Ciphertext, opc: Opc) -> Result<usize, StoreError>;

    /// Store a new row and apply `relabels` as one unit: either all of it is
    /// visible afterwards or none of it is
    fn apply_insert(
        &mut self,
        value: &Ciphertext,
        opc: Opc,
        relabels: &[(Ciphertext, Opc)],
    ) -> Result<RecordId, StoreError>;

    /// Rows holding exactly `value`, in record id order
    fn select_value(&self, value: &Ciphertext) -> Result<Vec<Record>, StoreError>;

    /// Rows with `lo <= opc <= hi` (either bound optional), ordered by OPC
    /// then record id
    fn select_opc_range(&self, lo: Option<Opc>, hi: Option<Opc>) -> Result<Vec<Record>, StoreError>;
}

impl<S: TreeStore + ?Sized> TreeStore for Box<S> {
    fn rows(&self) -> Result<Vec<Record>, StoreError> {
        (**self).rows()
    }

    fn insert_row(&mut self, value: &Ciphertext, opc: Opc) -> Result<RecordId, StoreError> {
        (**self).insert_row(value, opc)
    }

    fn update_opc(&mut self, value: &Ciphertext, opc: Opc) -> Result<usize, StoreError> {
        (**self).update_opc(value, opc)
    }

    fn apply_insert(
        &mut self,
        value: &Ciphertext,
        opc: Opc,
        relabels: &[(Ciphertext, Opc)],
    ) -> Result<RecordId, StoreError> {
        (**self).apply_insert(value, opc, relabels)
    }

    fn select_value(&self, value: &Ciphertext) -> Result<Vec<Record>, StoreError> {
        (**self).select_value(value)
    }

    fn select_opc_range(&self, lo: Option<Opc>, hi: Option<Opc>) -> Result<Vec<Record>, StoreError> {
        (**self).select_opc_range(lo, hi)
    }
}
