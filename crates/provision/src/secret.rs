//! Random password generation

use rand::Rng;
use std::fmt;
use std::str::FromStr;

use crate::error::{ProvisionError, Result};

/// Default password length
pub const DEFAULT_LENGTH: usize = 8;

/// Default alphabet: a numeric PIN the operator can type on a phone
pub const DIGITS: &str = "0123456789";

/// A non-empty set of characters to draw from
///
/// Repeated characters are collapsed so that every distinct character has
/// the same chance of being picked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alphabet {
    chars: Vec<char>,
}

impl Alphabet {
    pub fn new(chars: &str) -> Result<Self> {
        let mut set: Vec<char> = Vec::new();
        for c in chars.chars() {
            if !set.contains(&c) {
                set.push(c);
            }
        }

        if set.is_empty() {
            return Err(ProvisionError::InvalidConfiguration(
                "alphabet must contain at least one character".to_string(),
            ));
        }
        Ok(Self { chars: set })
    }

    pub fn digits() -> Self {
        Self {
            chars: DIGITS.chars().collect(),
        }
    }

    pub fn len(&self) -> usize {
        self.chars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chars.is_empty()
    }

    pub fn contains(&self, c: char) -> bool {
        self.chars.contains(&c)
    }

    pub fn chars(&self) -> &[char] {
        &self.chars
    }

    fn pick<R: Rng + ?Sized>(&self, rng: &mut R) -> char {
        self.chars[rng.gen_range(0..self.chars.len())]
    }
}

impl Default for Alphabet {
    fn default() -> Self {
        Self::digits()
    }
}

impl FromStr for Alphabet {
    type Err = ProvisionError;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// A generated password
///
/// Immutable once created. `Debug` never prints the plaintext so a
/// credential can sit inside logged structs safely.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    plaintext: String,
}

impl Credential {
    /// Wrap an existing password, e.g. to rewrite the sinks with a known value
    pub fn from_plaintext(plaintext: impl Into<String>) -> Result<Self> {
        let plaintext = plaintext.into();
        if plaintext.is_empty() {
            return Err(ProvisionError::InvalidConfiguration(
                "credential cannot be empty".to_string(),
            ));
        }
        Ok(Self { plaintext })
    }

    pub fn plaintext(&self) -> &str {
        &self.plaintext
    }

    /// Length in characters
    pub fn len(&self) -> usize {
        self.plaintext.chars().count()
    }

    pub fn is_empty(&self) -> bool {
        self.plaintext.is_empty()
    }

    /// Bytes as stored on disk, with the optional terminator appended
    pub fn encode(&self, terminator: Option<u8>) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.plaintext.len() + 1);
        bytes.extend_from_slice(self.plaintext.as_bytes());
        if let Some(byte) = terminator {
            bytes.push(byte);
        }
        bytes
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("len", &self.len())
            .finish_non_exhaustive()
    }
}

/// Generate a password of `length` characters drawn from `alphabet`
pub fn generate(length: usize, alphabet: &str) -> Result<Credential> {
    SecretPolicy::new(length, alphabet)?.generate()
}

/// Like [`generate`], with a caller-supplied random source
pub fn generate_with<R: Rng + ?Sized>(rng: &mut R, length: usize, alphabet: &str) -> Result<Credential> {
    SecretPolicy::new(length, alphabet)?.generate_with(rng)
}

/// Validated length and alphabet, ready to generate from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecretPolicy {
    length: usize,
    alphabet: Alphabet,
}

impl Default for SecretPolicy {
    fn default() -> Self {
        Self {
            length: DEFAULT_LENGTH,
            alphabet: Alphabet::digits(),
        }
    }
}

impl SecretPolicy {
    pub fn new(length: usize, alphabet: &str) -> Result<Self> {
        if length == 0 {
            return Err(ProvisionError::InvalidConfiguration(
                "length must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            length,
            alphabet: Alphabet::new(alphabet)?,
        })
    }

    pub fn length(&self) -> usize {
        self.length
    }

    pub fn alphabet(&self) -> &Alphabet {
        &self.alphabet
    }

    pub fn generate(&self) -> Result<Credential> {
        self.generate_with(&mut rand::thread_rng())
    }

    pub fn generate_with<R: Rng + ?Sized>(&self, rng: &mut R) -> Result<Credential> {
        let plaintext: String = (0..self.length).map(|_| self.alphabet.pick(rng)).collect();
        tracing::debug!(length = self.length, alphabet = self.alphabet.len(), "generated credential");
        Credential::from_plaintext(plaintext)
    }
}
