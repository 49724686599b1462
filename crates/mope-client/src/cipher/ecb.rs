//! 128-bit block ciphers in ECB mode with PKCS#7 padding
//!
//! ECB is exactly what a deterministic index needs (same input, same
//! output), at the price of leaking equal 16-byte blocks within a value.
//! AES-128 and SM4 share the construction.

use aes::cipher::consts::U16;
use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, BlockSizeUser, KeyInit};
use aes::Aes128;
use mope_core::Ciphertext;
use sm4::Sm4;

use super::{CipherError, EncryptionScheme};
use crate::keys::Key;

const BLOCK_LEN: usize = 16;

/// AES-128, ECB, PKCS#7
pub type AesScheme = EcbScheme<Aes128>;

/// SM4 (GB/T 32907-2016), ECB, PKCS#7
pub type Sm4Scheme = EcbScheme<Sm4>;

pub struct EcbScheme<C> {
    cipher: C,
}

impl<C: KeyInit<KeySize = U16>> EcbScheme<C> {
    pub fn new(key: &Key) -> Self {
        let cipher = C::new(&(*key.as_bytes()).into());
        Self { cipher }
    }
}

impl<C> EncryptionScheme for EcbScheme<C>
where
    C: BlockEncrypt + BlockDecrypt + BlockSizeUser<BlockSize = U16> + Send + Sync,
{
    fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError> {
        let bytes = plaintext.as_bytes();
        let pad = BLOCK_LEN - bytes.len() % BLOCK_LEN;

        let mut buf = Vec::with_capacity(bytes.len() + pad);
        buf.extend_from_slice(bytes);
        buf.resize(bytes.len() + pad, pad as u8);

        for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.encrypt_block(GenericArray::from_mut_slice(chunk));
        }

        Ok(Ciphertext::new(buf))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError> {
        let len = ciphertext.len();
        if len == 0 || len % BLOCK_LEN != 0 {
            return Err(CipherError::InvalidCiphertextLength(len));
        }

        let mut buf = ciphertext.as_bytes().to_vec();
        for chunk in buf.chunks_exact_mut(BLOCK_LEN) {
            self.cipher.decrypt_block(GenericArray::from_mut_slice(chunk));
        }

        let pad = buf[len - 1] as usize;
        if pad == 0 || pad > BLOCK_LEN || buf[len - pad..].iter().any(|&b| b as usize != pad) {
            return Err(CipherError::BadPadding);
        }
        buf.truncate(len - pad);

        Ok(String::from_utf8(buf)?)
    }
}
