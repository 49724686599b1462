//! Server error types

use std::time::Duration;

use mope_core::{Ciphertext, Direction, ErrorReply, Path};
use thiserror::Error;

use crate::store::StoreError;

#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Unknown ciphertext: {0}")]
    UnknownCiphertext(Ciphertext),

    #[error("No node at path {0:?}")]
    UnknownPath(String),

    #[error("Root already exists; insert must name a parent")]
    RootExists,

    #[error("Insert under {parent} is missing a direction")]
    MissingDirection { parent: Ciphertext },

    #[error("Slot {direction} of {parent} is already occupied")]
    SlotOccupied {
        parent: Ciphertext,
        direction: Direction,
    },

    #[error("Value {0} is already a node; insert it as a duplicate")]
    DuplicateNode(Ciphertext),

    #[error("Path mismatch: client sent {claimed:?}, slot is at {actual:?}")]
    PathMismatch { claimed: String, actual: String },

    #[error("Corrupt tree: {0}")]
    Corrupt(String),

    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("Codec error: {0}")]
    Codec(#[from] mope_core::Error),

    #[error("Session idle for more than {0:?}")]
    IdleTimeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ServerError {
    pub fn path_mismatch(claimed: &Path, actual: &Path) -> Self {
        ServerError::PathMismatch {
            claimed: claimed.to_string(),
            actual: actual.to_string(),
        }
    }

    /// Get the error code for structured replies
    pub fn code(&self) -> &'static str {
        match self {
            ServerError::UnknownCiphertext(_) => "UNKNOWN_CIPHERTEXT",
            ServerError::UnknownPath(_) => "UNKNOWN_PATH",
            ServerError::RootExists
            | ServerError::MissingDirection { .. }
            | ServerError::SlotOccupied { .. }
            | ServerError::DuplicateNode(_)
            | ServerError::PathMismatch { .. } => "PROTOCOL_VIOLATION",
            ServerError::Corrupt(_) => "CORRUPT_TREE",
            ServerError::Storage(_) => "STORAGE_ERROR",
            ServerError::Codec(_) => "CODEC_ERROR",
            ServerError::IdleTimeout(_) => "IDLE_TIMEOUT",
            ServerError::Io(_) => "IO_ERROR",
        }
    }

    /// The in-memory tree may have diverged from the store
    pub fn is_storage(&self) -> bool {
        matches!(self, ServerError::Storage(_))
    }

    pub fn to_reply(&self) -> ErrorReply {
        ErrorReply {
            code: self.code().to_string(),
            message: self.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ServerError>;
