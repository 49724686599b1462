//! redb-backed row store
//!
//! ## Tables
//!
//! ```text
//! mope:rows:v0         record id -> (value, OPC)
//! mope:value_index:v0  value     -> record ids   (multimap)
//! mope:opc_index:v0    OPC       -> record ids   (multimap)
//! ```
//! Each call runs in its own write (or read) transaction, so a completed call
//! is durable before the server answers the request that caused it. An insert
//! and the relabels it causes share one write transaction.

use std::path::Path;

use mope_core::{Ciphertext, Opc, Record, RecordId};
use redb::{
    Database, MultimapTableDefinition, ReadTransaction, ReadableMultimapTable, ReadableTable,
    TableDefinition, WriteTransaction,
};

use super::{StoreError, TreeStore};

pub const ROWS_TABLE: TableDefinition<u64, (&[u8], u32)> = TableDefinition::new("mope:rows:v0");

pub const VALUE_INDEX: MultimapTableDefinition<&[u8], u64> =
    MultimapTableDefinition::new("mope:value_index:v0");

pub const OPC_INDEX: MultimapTableDefinition<u32, u64> =
    MultimapTableDefinition::new("mope:opc_index:v0");

/// Rows in an embedded redb database file
pub struct RedbStore {
    db: Database,
}

impl RedbStore {
    /// Open (or create) the database and make sure every table exists
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let db = Database::create(path.as_ref())?;

        let txn = db.begin_write()?;
        {
            txn.open_table(ROWS_TABLE)?;
            txn.open_multimap_table(VALUE_INDEX)?;
            txn.open_multimap_table(OPC_INDEX)?;
        }
        txn.commit()?;

        tracing::debug!(path = %path.as_ref().display(), "Opened row store");
        Ok(Self { db })
    }

    fn read(&self) -> Result<ReadTransaction, StoreError> {
        Ok(self.db.begin_read()?)
    }

    fn fetch(&self, txn: &ReadTransaction, ids: impl IntoIterator<Item = u64>) -> Result<Vec<Record>, StoreError> {
        let rows = txn.open_table(ROWS_TABLE)?;
        let mut records = Vec::new();
        for id in ids {
            if let Some(row) = rows.get(id)? {
                let (value, opc) = row.value();
                records.push(Record::new(id, Ciphertext::from(value), Opc::from_raw(opc)));
            }
        }
        Ok(records)
    }
}

impl TreeStore for RedbStore {
    fn rows(&self) -> Result<Vec<Record>, StoreError> {
        let txn = self.read()?;
        let rows = txn.open_table(ROWS_TABLE)?;

        let mut records = Vec::new();
        for entry in rows.iter()? {
            let (id, row) = entry?;
            let (value, opc) = row.value();
            records.push(Record::new(id.value(), Ciphertext::from(value), Opc::from_raw(opc)));
        }
        Ok(records)
    }

    fn insert_row(&mut self, value: &Ciphertext, opc: Opc) -> Result<RecordId, StoreError> {
        let txn = self.db.begin_write()?;
        let id = write_row(&txn, value, opc)?;
        txn.commit()?;
        Ok(id)
    }

    fn update_opc(&mut self, value: &Ciphertext, opc: Opc) -> Result<usize, StoreError> {
        let txn = self.db.begin_write()?;
        let affected = write_opc(&txn, value, opc)?;
        txn.commit()?;
        Ok(affected)
    }

    fn apply_insert(
        &mut self,
        value: &Ciphertext,
        opc: Opc,
        relabels: &[(Ciphertext, Opc)],
    ) -> Result<RecordId, StoreError> {
        // An error drops `txn` uncommitted, which aborts it
        let txn = self.db.begin_write()?;
        let id = write_row(&txn, value, opc)?;
        for (relabelled, new_opc) in relabels {
            write_opc(&txn, relabelled, *new_opc)?;
        }
        txn.commit()?;
        Ok(id)
    }

    fn select_value(&self, value: &Ciphertext) -> Result<Vec<Record>, StoreError> {
        let txn = self.read()?;
        let ids = txn
            .open_multimap_table(VALUE_INDEX)?
            .get(value.as_bytes())?
            .map(|id| id.map(|id| id.value()))
            .collect::<Result<Vec<u64>, _>>()?;
        self.fetch(&txn, ids)
    }

    fn select_opc_range(&self, lo: Option<Opc>, hi: Option<Opc>) -> Result<Vec<Record>, StoreError> {
        let lo = lo.map_or(u32::MIN, Opc::as_u32);
        let hi = hi.map_or(u32::MAX, Opc::as_u32);
        if lo > hi {
            return Ok(Vec::new());
        }

        let txn = self.read()?;
        let opcs = txn.open_multimap_table(OPC_INDEX)?;
        let mut ids = Vec::new();
        for entry in opcs.range(lo..=hi)? {
            let (_, group) = entry?;
            for id in group {
                ids.push(id?.value());
            }
        }
        self.fetch(&txn, ids)
    }
}

/// Append a row and its index entries; ids continue from the highest stored
fn write_row(txn: &WriteTransaction, value: &Ciphertext, opc: Opc) -> Result<RecordId, StoreError> {
    let mut rows = txn.open_table(ROWS_TABLE)?;
    let id = match rows.last()? {
        Some((last, _)) => last.value() + 1,
        None => 1,
    };
    rows.insert(id, (value.as_bytes(), opc.as_u32()))?;

    txn.open_multimap_table(VALUE_INDEX)?
        .insert(value.as_bytes(), id)?;
    txn.open_multimap_table(OPC_INDEX)?
        .insert(opc.as_u32(), id)?;
    Ok(id)
}

fn write_opc(txn: &WriteTransaction, value: &Ciphertext, opc: Opc) -> Result<usize, StoreError> {
    let values = txn.open_multimap_table(VALUE_INDEX)?;
    let ids = values
        .get(value.as_bytes())?
        .map(|id| id.map(|id| id.value()))
        .collect::<Result<Vec<u64>, _>>()?;

    let mut rows = txn.open_table(ROWS_TABLE)?;
    let mut opcs = txn.open_multimap_table(OPC_INDEX)?;
    for &id in &ids {
        let old = rows.get(id)?.map(|row| row.value().1);
        if let Some(old) = old {
            opcs.remove(old, id)?;
        }
        rows.insert(id, (value.as_bytes(), opc.as_u32()))?;
        opcs.insert(opc.as_u32(), id)?;
    }
    Ok(ids.len())
}
