//! Content digest identity.

use std::fmt;
use std::str::FromStr;

use sha2::{Digest as _, Sha256};

use crate::error::Error;

/// Hash algorithms a [`Digest`] can be tagged with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Algorithm {
    /// SHA-256, the only algorithm registries are required to support.
    Sha256,
}

impl Algorithm {
    /// The canonical lowercase tag used in textual digests.
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::Sha256 => "sha256",
        }
    }

    /// The expected length of the lowercase hex payload.
    fn hex_len(&self) -> usize {
        match self {
            Algorithm::Sha256 => 64,
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Canonical content hash identity, `<algorithm>:<hex>`.
///
/// Used both as a storage key and as an integrity check; equality is equality
/// of the canonical textual form.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Digest {
    algorithm: Algorithm,
    hex: String,
}

impl Digest {
    /// Compute the digest of a byte slice.
    pub fn of_bytes(data: &[u8]) -> Self {
        Self {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(Sha256::digest(data)),
        }
    }

    /// The algorithm tag.
    pub fn algorithm(&self) -> Algorithm {
        self.algorithm
    }

    /// The lowercase hex payload.
    pub fn hex(&self) -> &str {
        &self.hex
    }
}

impl FromStr for Digest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (algorithm, hex) = s
            .split_once(':')
            .ok_or_else(|| Error::DigestInvalid(s.to_string()))?;

        let algorithm = match algorithm {
            "sha256" => Algorithm::Sha256,
            _ => return Err(Error::DigestInvalid(s.to_string())),
        };

        if hex.len() != algorithm.hex_len()
            || !hex.bytes().all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b))
        {
            return Err(Error::DigestInvalid(s.to_string()));
        }

        Ok(Self {
            algorithm,
            hex: hex.to_string(),
        })
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.algorithm, self.hex)
    }
}

/// Incremental digest computation over a stream of chunks, so upload data
/// never has to be re-buffered just to be hashed.
#[derive(Debug, Default)]
pub struct DigestSink {
    hasher: Sha256,
    length: u64,
}

impl DigestSink {
    /// Create an empty sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a chunk of content.
    pub fn update(&mut self, chunk: &[u8]) {
        self.hasher.update(chunk);
        self.length += chunk.len() as u64;
    }

    /// The number of bytes fed so far.
    pub fn length(&self) -> u64 {
        self.length
    }

    /// Finish, producing the digest of everything fed.
    pub fn finish(self) -> Digest {
        Digest {
            algorithm: Algorithm::Sha256,
            hex: hex::encode(self.hasher.finalize()),
        }
    }
}
