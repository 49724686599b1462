//! FF1 format-preserving encryption (NIST SP 800-38G) over AES-128
//!
//! Plaintexts are strings over an [`Alphabet`]; ciphertexts are strings of
//! the same length over the same alphabet, shipped to the server as UTF-8.

use std::fmt;
use std::str::FromStr;

use aes::cipher::{BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use mope_core::Ciphertext;
use num::{BigUint, Integer, Zero};

use super::{CipherError, EncryptionScheme};
use crate::keys::Key;

/// Smallest message space FF1 is allowed to operate on
pub const MIN_DOMAIN_SIZE: u64 = 1_000_000;

pub const MAX_TWEAK_LEN: usize = 256;

const MAX_RADIX: usize = 1 << 16;
const ROUNDS: u8 = 10;
const BLOCK_LEN: usize = 16;

const DIGITS: &str = "0123456789";
const LOWERCASE: &str = "abcdefghijklmnopqrstuvwxyz";
const LETTERS: &str = "abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";
const ALPHANUMERIC: &str = "0123456789abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

/// Ordered symbol set; a symbol's numeral is its position
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    symbols: Vec<char>,
}

impl Alphabet {
    pub fn new(symbols: &str) -> Result<Self, CipherError> {
        let symbols: Vec<char> = symbols.chars().collect();
        if symbols.len() < 2 || symbols.len() > MAX_RADIX {
            return Err(CipherError::InvalidAlphabet(format!(
                "needs between 2 and {MAX_RADIX} symbols, got {}",
                symbols.len()
            )));
        }
        for (i, c) in symbols.iter().enumerate() {
            if symbols[..i].contains(c) {
                return Err(CipherError::InvalidAlphabet(format!("repeated symbol {c:?}")));
            }
        }
        Ok(Self { symbols })
    }

    pub fn digits() -> Self {
        Self::preset(DIGITS)
    }

    pub fn lowercase() -> Self {
        Self::preset(LOWERCASE)
    }

    pub fn letters() -> Self {
        Self::preset(LETTERS)
    }

    pub fn alphanumeric() -> Self {
        Self::preset(ALPHANUMERIC)
    }

    fn preset(symbols: &str) -> Self {
        Self {
            symbols: symbols.chars().collect(),
        }
    }

    pub fn radix(&self) -> u32 {
        self.symbols.len() as u32
    }

    fn numerals(&self, text: &str) -> Result<Vec<u32>, CipherError> {
        text.chars()
            .map(|c| {
                self.symbols
                    .iter()
                    .position(|&s| s == c)
                    .map(|i| i as u32)
                    .ok_or(CipherError::OutsideAlphabet(c))
            })
            .collect()
    }

    fn render(&self, numerals: &[u32]) -> String {
        numerals.iter().map(|&n| self.symbols[n as usize]).collect()
    }
}

impl FromStr for Alphabet {
    type Err = CipherError;

    /// A preset name, or the literal symbols of a custom alphabet
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "digits" => Ok(Self::digits()),
            "lowercase" => Ok(Self::lowercase()),
            "letters" => Ok(Self::letters()),
            "alphanumeric" => Ok(Self::alphanumeric()),
            custom => Self::new(custom),
        }
    }
}

impl fmt::Display for Alphabet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbols: String = self.symbols.iter().collect();
        f.write_str(&symbols)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mode {
    Encrypt,
    Decrypt,
}

pub struct Ff1Scheme {
    cipher: Aes128,
    alphabet: Alphabet,
    tweak: Vec<u8>,
}

impl Ff1Scheme {
    pub fn new(key: &Key, alphabet: Alphabet, tweak: Vec<u8>) -> Result<Self, CipherError> {
        if tweak.len() > MAX_TWEAK_LEN {
            return Err(CipherError::TweakTooLong {
                len: tweak.len(),
                max: MAX_TWEAK_LEN,
            });
        }
        Ok(Self {
            cipher: Aes128::new(&(*key.as_bytes()).into()),
            alphabet,
            tweak,
        })
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    fn check_domain(&self, len: usize) -> Result<(), CipherError> {
        let radix = self.alphabet.radix();
        let domain = BigUint::from(radix).pow(len as u32);
        if len < 2 || domain < BigUint::from(MIN_DOMAIN_SIZE) {
            return Err(CipherError::DomainTooSmall { radix, len });
        }
        Ok(())
    }

    fn transform(&self, text: &str, mode: Mode) -> Result<String, CipherError> {
        let numerals = self.alphabet.numerals(text)?;
        self.check_domain(numerals.len())?;
        let out = self.feistel(&numerals, mode);
        Ok(self.alphabet.render(&out))
    }

    fn feistel(&self, numerals: &[u32], mode: Mode) -> Vec<u32> {
        let radix = self.alphabet.radix();
        let n = numerals.len();
        let u = n / 2;
        let v = n - u;
        let (mut a, mut b) = (numerals[..u].to_vec(), numerals[u..].to_vec());

        let big_radix = BigUint::from(radix);
        let max_half = big_radix.pow(v as u32) - 1u32;
        let b_len = max_half.bits().div_ceil(8) as usize;
        let d = 4 * b_len.div_ceil(4) + 4;
        let header = self.header(radix, u, n);

        let rounds: Vec<u8> = match mode {
            Mode::Encrypt => (0..ROUNDS).collect(),
            Mode::Decrypt => (0..ROUNDS).rev().collect(),
        };

        for i in rounds {
            let source = if mode == Mode::Encrypt { &b } else { &a };
            let mut block = header.to_vec();
            block.extend(self.round_input(i, &num_radix(source, radix), b_len));

            let r = self.cbc_mac(&block);
            let y = BigUint::from_bytes_be(&self.expand(r, d));

            let m = if i % 2 == 0 { u } else { v };
            let modulus = big_radix.pow(m as u32);

            match mode {
                Mode::Encrypt => {
                    let c = (num_radix(&a, radix) + y) % &modulus;
                    a = std::mem::replace(&mut b, str_radix(c, radix, m));
                }
                Mode::Decrypt => {
                    let c = (num_radix(&b, radix) + &modulus - y % &modulus) % &modulus;
                    b = std::mem::replace(&mut a, str_radix(c, radix, m));
                }
            }
        }

        a.extend(b);
        a
    }

    /// P: the fixed first block of every round's PRF input
    fn header(&self, radix: u32, u: usize, n: usize) -> [u8; BLOCK_LEN] {
        let mut p = [0u8; BLOCK_LEN];
        p[..3].copy_from_slice(&[1, 2, 1]);
        p[3..6].copy_from_slice(&radix.to_be_bytes()[1..]);
        p[6] = ROUNDS;
        p[7] = (u % 256) as u8;
        p[8..12].copy_from_slice(&(n as u32).to_be_bytes());
        p[12..16].copy_from_slice(&(self.tweak.len() as u32).to_be_bytes());
        p
    }

    /// Q: tweak, zero pad to a block boundary, round index, half as b bytes
    fn round_input(&self, round: u8, half: &BigUint, b_len: usize) -> Vec<u8> {
        let t = self.tweak.len();
        let pad = (BLOCK_LEN - (t + b_len + 1) % BLOCK_LEN) % BLOCK_LEN;

        let mut q = Vec::with_capacity(t + pad + 1 + b_len);
        q.extend_from_slice(&self.tweak);
        q.resize(t + pad, 0);
        q.push(round);

        let bytes = half.to_bytes_be();
        q.resize(q.len() + b_len.saturating_sub(bytes.len()), 0);
        q.extend_from_slice(&bytes);
        q
    }

    fn cbc_mac(&self, data: &[u8]) -> Block {
        let mut y = Block::default();
        for chunk in data.chunks_exact(BLOCK_LEN) {
            for (acc, byte) in y.iter_mut().zip(chunk) {
                *acc ^= byte;
            }
            self.cipher.encrypt_block(&mut y);
        }
        y
    }

    /// S: R followed by AES(R xor j) blocks, cut to d bytes
    fn expand(&self, r: Block, d: usize) -> Vec<u8> {
        let mut s = r.to_vec();
        for j in 1..d.div_ceil(BLOCK_LEN) {
            let mut block = r;
            for (byte, mask) in block.iter_mut().zip((j as u128).to_be_bytes()) {
                *byte ^= mask;
            }
            self.cipher.encrypt_block(&mut block);
            s.extend_from_slice(&block);
        }
        s.truncate(d);
        s
    }
}

impl EncryptionScheme for Ff1Scheme {
    fn encrypt(&self, plaintext: &str) -> Result<Ciphertext, CipherError> {
        let out = self.transform(plaintext, Mode::Encrypt)?;
        Ok(Ciphertext::new(out.into_bytes()))
    }

    fn decrypt(&self, ciphertext: &Ciphertext) -> Result<String, CipherError> {
        let text = String::from_utf8(ciphertext.as_bytes().to_vec())?;
        self.transform(&text, Mode::Decrypt)
    }
}

fn num_radix(numerals: &[u32], radix: u32) -> BigUint {
    numerals
        .iter()
        .fold(BigUint::zero(), |acc, &digit| acc * radix + digit)
}

fn str_radix(mut value: BigUint, radix: u32, len: usize) -> Vec<u32> {
    let radix = BigUint::from(radix);
    let mut out = vec![0u32; len];
    for slot in out.iter_mut().rev() {
        let (quotient, digit) = value.div_rem(&radix);
        *slot = digit.to_u32_digits().first().copied().unwrap_or(0);
        value = quotient;
    }
    out
}
