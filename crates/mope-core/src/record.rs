//! Persisted rows as they travel over the wire

use serde::{Deserialize, Serialize};

use crate::{Ciphertext, Opc, RecordId};

/// One stored row: every insertion of a plaintext, duplicate or not, is a row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub value: Ciphertext,
    pub opc: Opc,
}

impl Record {
    pub fn new(id: RecordId, value: Ciphertext, opc: Opc) -> Self {
        Self { id, value, opc }
    }
}
