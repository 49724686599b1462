//! Order-preserving codes
//!
//! ## Encoding
//!
//! An OPC is the path bits (most significant first), one terminating `1`,
//! then zero padding to 32 bits:
//! ```text
//! path "01"  ->  01 1 00000000000000000000000000000  = 0x6000_0000
//! path ""    ->     1 0000000000000000000000000000000 = 0x8000_0000
//! ```
//! Unsigned comparison of two codes matches the in-order position of the
//! nodes they label: a left descendant sorts below its ancestor because the
//! ancestor's terminating `1` meets the descendant's `0` edge, and a right
//! descendant sorts above it because its `1` edge is followed by a further
//! set bit. Codes are stored as 4 bytes big-endian.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{Direction, Error, Path, Result};

/// Deepest path that still leaves room for the terminating bit
pub const MAX_PATH_LEN: usize = 31;

/// 32-bit order-preserving code of a tree position
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Opc(u32);

impl Opc {
    /// Code of the root (empty path)
    pub const ROOT: Opc = Opc(1 << 31);

    /// Encode a path, failing when it is deeper than [`MAX_PATH_LEN`]
    pub fn encode(path: &Path) -> Result<Self> {
        if path.len() > MAX_PATH_LEN {
            return Err(Error::PathTooLong {
                len: path.len(),
                max: MAX_PATH_LEN,
            });
        }

        let mut code = 0u32;
        for (depth, direction) in path.iter().enumerate() {
            if direction.bit() {
                code |= 1 << (31 - depth);
            }
        }
        code |= 1 << (31 - path.len());

        Ok(Self(code))
    }

    /// Decode back to the path: everything above the last set bit
    pub fn decode(self) -> Result<Path> {
        if self.0 == 0 {
            return Err(Error::InvalidOpc(self.0));
        }

        let len = 31 - self.0.trailing_zeros() as usize;
        let edges = (0..len)
            .map(|depth| Direction::from_bit((self.0 >> (31 - depth)) & 1 == 1))
            .collect::<Vec<_>>();

        Ok(Path::from(edges))
    }

    pub fn from_raw(code: u32) -> Self {
        Self(code)
    }

    pub fn as_u32(self) -> u32 {
        self.0
    }

    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }

    pub fn from_be_bytes(bytes: [u8; 4]) -> Self {
        Self(u32::from_be_bytes(bytes))
    }

    /// Parse the 4-byte stored form
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let bytes: [u8; 4] = bytes
            .try_into()
            .map_err(|_| Error::InvalidOpcLength(bytes.len()))?;
        Ok(Self::from_be_bytes(bytes))
    }
}

impl fmt::Display for Opc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:08x}", self.0)
    }
}
