//! Client key material
//!
//! A key file holds the raw 16 key bytes. Losing it makes every stored
//! ciphertext unreadable, and a different key produces an incompatible
//! ordering, so one index must always be driven with one key.

use std::fmt;
use std::fs;
use std::path::Path;

use rand::RngCore;

use crate::cipher::CipherError;
use crate::error::Result;

pub const KEY_LEN: usize = 16;

#[derive(Clone, PartialEq, Eq)]
pub struct Key([u8; KEY_LEN]);

impl Key {
    pub fn generate() -> Self {
        let mut bytes = [0u8; KEY_LEN];
        rand::thread_rng().fill_bytes(&mut bytes);
        Self(bytes)
    }

    pub fn from_bytes(bytes: &[u8]) -> std::result::Result<Self, CipherError> {
        let bytes: [u8; KEY_LEN] = bytes
            .try_into()
            .map_err(|_| CipherError::InvalidKeyLength(bytes.len()))?;
        Ok(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// Read the key at `path`, creating a fresh one there if it is missing
    pub fn load_or_generate(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        if path.exists() {
            let key = Self::from_bytes(&fs::read(path)?)?;
            tracing::debug!(path = %path.display(), "Loaded key");
            return Ok(key);
        }

        let key = Self::generate();
        if let Some(dir) = path.parent().filter(|dir| !dir.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        fs::write(path, key.as_bytes())?;
        restrict_permissions(path)?;
        tracing::info!(path = %path.display(), "Generated new key");
        Ok(key)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Key(..)")
    }
}
