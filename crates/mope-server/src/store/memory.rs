//! In-memory row store

use std::collections::BTreeMap;

use mope_core::{Ciphertext, Opc, Record, RecordId};

use super::{StoreError, TreeStore};

/// Rows kept in a map; contents vanish with the process
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: BTreeMap<RecordId, (Ciphertext, Opc)>,
    next_id: RecordId,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_id: 1,
        }
    }

    /// Seed with existing rows, e.g. to simulate a restart
    pub fn from_records(records: impl IntoIterator<Item = Record>) -> Self {
        let mut store = Self::new();
        for record in records {
            store.next_id = store.next_id.max(record.id + 1);
            store.rows.insert(record.id, (record.value, record.opc));
        }
        store
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    fn collect<'a>(&'a self, rows: impl Iterator<Item = (&'a RecordId, &'a (Ciphertext, Opc))>) -> Vec<Record> {
        rows.map(|(&id, (value, opc))| Record::new(id, value.clone(), *opc))
            .collect()
    }
}

impl TreeStore for MemoryStore {
    fn rows(&self) -> Result<Vec<Record>, StoreError> {
        Ok(self.collect(self.rows.iter()))
    }

    fn insert_row(&mut self, value: &Ciphertext, opc: Opc) -> Result<RecordId, StoreError> {
        let id = self.next_id;
        self.next_id += 1;
        self.rows.insert(id, (value.clone(), opc));
        Ok(id)
    }

    fn update_opc(&mut self, value: &Ciphertext, opc: Opc) -> Result<usize, StoreError> {
        let mut affected = 0;
        for (stored, stored_opc) in self.rows.values_mut() {
            if stored == value {
                *stored_opc = opc;
                affected += 1;
            }
        }
        Ok(affected)
    }

    fn apply_insert(
        &mut self,
        value: &Ciphertext,
        opc: Opc,
        relabels: &[(Ciphertext, Opc)],
    ) -> Result<RecordId, StoreError> {
        let id = self.insert_row(value, opc)?;
        for (relabelled, new_opc) in relabels {
            self.update_opc(relabelled, *new_opc)?;
        }
        Ok(id)
    }

    fn select_value(&self, value: &Ciphertext) -> Result<Vec<Record>, StoreError> {
        Ok(self.collect(self.rows.iter().filter(|(_, (stored, _))| stored == value)))
    }

    fn select_opc_range(&self, lo: Option<Opc>, hi: Option<Opc>) -> Result<Vec<Record>, StoreError> {
        let mut records = self.collect(self.rows.iter().filter(|(_, (_, opc))| {
            lo.map_or(true, |lo| *opc >= lo) && hi.map_or(true, |hi| *opc <= hi)
        }));
        records.sort_by_key(|record| (record.opc, record.id));
        Ok(records)
    }
}
