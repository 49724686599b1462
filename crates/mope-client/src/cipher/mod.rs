//! Deterministic encryption capabilities
//!
//! The index only works if equal plaintexts encrypt to equal ciphertexts, so
//! every scheme here is deterministic for a fixed key. Which scheme is used is
//! a client decision; the server only ever sees the output bytes.

mod ecb;
mod ff1;

pub use self::ecb::{AesScheme, EcbScheme, Sm4Scheme};
pub use self::ff1::{Alphabet, Ff1Scheme, MAX_TWEAK_LEN, MIN_DOMAIN_SIZE};

use mope_core::Ciphertext;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum CipherError {
    #[error("Invalid key length: expected 16 bytes, got {0}")]
    InvalidKeyLength(usize),

    #[error("Tweak of {len} bytes exceeds limit of {max}")]
    TweakTooLong { len: usize, max: usize },

    #[error("Invalid tweak: {0}")]
    InvalidTweak(String),

    #[error("Invalid alphabet: {0}")]
    InvalidAlphabet(String),

    #[error("Character {0:?} is not in the alphabet")]
    OutsideAlphabet(char),

    #[error("Domain too small: radix {radix} with length {len} has fewer than {MIN_DOMAIN_SIZE} values")]
    DomainTooSmall { radix: u32, len: usize },

    #[error("Invalid ciphertext length {0}")]
    InvalidCiphertextLength(usize),

    #[error("Bad padding")]
    BadPadding,

    #[error("Decrypted bytes are not UTF-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),
}

/// Keyed deterministic encryption of plaintext strings
pub trait EncryptionScheme: Send + Sync {
    fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError>;

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError>;
}

impl<E: EncryptionScheme + ?Sized> EncryptionScheme for Box<E> {
    fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError> {
        (**self).encrypt(plaintext)
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError> {
        (**self).decrypt(ciphertext)
    }
}
