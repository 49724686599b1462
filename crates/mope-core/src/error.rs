//! Core error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Path of length {len} does not fit an OPC (max {max})")]
    PathTooLong { len: usize, max: usize },

    #[error("Invalid OPC {0:#010x}: no terminating bit")]
    InvalidOpc(u32),

    #[error("Invalid OPC encoding: expected 4 bytes, got {0}")]
    InvalidOpcLength(usize),

    #[error("Invalid path character {0:?} (expected '0' or '1')")]
    InvalidPath(char),

    #[error("Frame of {len} bytes exceeds limit of {max}")]
    FrameTooLarge { len: usize, max: usize },

    #[error("Protocol version mismatch: expected v{expected}, got v{actual}")]
    VersionMismatch { expected: u16, actual: u16 },

    #[error("Response id {actual} does not match request id {expected}")]
    CorrelationMismatch { expected: u64, actual: u64 },

    #[error("Connection closed by peer")]
    ConnectionClosed,

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Bincode error: {0}")]
    Bincode(#[from] bincode::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
