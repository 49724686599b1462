//! Client command-line configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

use crate::cipher::{AesScheme, Alphabet, CipherError, EncryptionScheme, Ff1Scheme, Sm4Scheme};
use crate::error::Result;
use crate::keys::Key;

pub const DEFAULT_SERVER: &str = "127.0.0.1:65432";

#[derive(Parser, Debug, Clone)]
#[command(name = "mope-client")]
#[command(about = "Insert and query values in an order-revealing encrypted index")]
pub struct ClientArgs {
    /// Index server address
    #[arg(long, env = "MOPE_SERVER", default_value = DEFAULT_SERVER)]
    pub server: String,

    /// File holding the 16-byte key; created on first use
    #[arg(long, env = "MOPE_KEY_FILE", default_value = "mope.key")]
    pub key_file: PathBuf,

    #[arg(long, value_enum, default_value_t = CipherKind::Aes)]
    pub cipher: CipherKind,

    /// FF1 alphabet: digits, lowercase, letters, alphanumeric, or literal symbols
    #[arg(long, default_value = "digits")]
    pub alphabet: Alphabet,

    /// FF1 tweak as hex
    #[arg(long, env = "MOPE_TWEAK")]
    pub tweak: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    /// AES-128, any UTF-8 value
    Aes,
    /// SM4, any UTF-8 value
    Sm4,
    /// FF1 format-preserving, values over the chosen alphabet
    Ff1,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Read commands from stdin (the default)
    Repl,
    /// Insert every line of a file
    InsertFile {
        path: PathBuf,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Write random digit strings, one per line
    GenDataset {
        path: PathBuf,
        #[arg(long)]
        count: usize,
        #[arg(long)]
        length: usize,
    },
}

impl ClientArgs {
    pub fn command(&self) -> Command {
        self.command.clone().unwrap_or(Command::Repl)
    }

    pub fn scheme(&self, key: &Key) -> Result<Box<dyn EncryptionScheme>> {
        let scheme: Box<dyn EncryptionScheme> = match self.cipher {
            CipherKind::Aes => Box::new(AesScheme::new(key)),
            CipherKind::Sm4 => Box::new(Sm4Scheme::new(key)),
            CipherKind::Ff1 => {
                let tweak = match &self.tweak {
                    Some(tweak) => hex::decode(tweak.trim_start_matches("0x"))
                        .map_err(|e| CipherError::InvalidTweak(e.to_string()))?,
                    None => Vec::new(),
                };
                Box::new(Ff1Scheme::new(key, self.alphabet.clone(), tweak)?)
            }
        };
        Ok(scheme)
    }
}
