//! Client error types

use thiserror::Error;

use crate::cipher::CipherError;

#[derive(Error, Debug)]
pub enum ClientError {
    #[error("Transport error: {0}")]
    Core(#[from] mope_core::Error),

    #[error("Cipher error: {0}")]
    Cipher(#[from] CipherError),

    #[error("Server error: {code} - {message}")]
    Server { code: String, message: String },

    #[error("Unexpected response: expected {expected}, got {actual}")]
    UnexpectedResponse {
        expected: &'static str,
        actual: &'static str,
    },

    #[error("Insert of {0} was not acknowledged")]
    NotAcknowledged(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ClientError>;
