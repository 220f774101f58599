//! Repository names and manifest references.

use std::fmt;
use std::str::FromStr;

use crate::digest::Digest;
use crate::error::Error;

/// A validated repository name.
///
/// Lowercase alphanumeric path segments separated by `/`, where each segment
/// may be internally separated by `.`, `_` or `-`. Composite (multi-segment)
/// names are first-class.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RepoName(String);

impl RepoName {
    /// The textual name.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn segment_valid(segment: &str) -> bool {
        if segment.is_empty() {
            return false;
        }
        let bytes = segment.as_bytes();
        let alnum = |b: u8| b.is_ascii_lowercase() || b.is_ascii_digit();
        if !alnum(bytes[0]) || !alnum(bytes[bytes.len() - 1]) {
            return false;
        }
        let mut previous_was_separator = false;
        for &b in bytes {
            if alnum(b) {
                previous_was_separator = false;
            } else if matches!(b, b'.' | b'_' | b'-') {
                if previous_was_separator {
                    return false;
                }
                previous_was_separator = true;
            } else {
                return false;
            }
        }
        true
    }
}

impl FromStr for RepoName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if !s.is_empty() && s.split('/').all(Self::segment_valid) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::NameInvalid(s.to_string()))
        }
    }
}

impl fmt::Display for RepoName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A reference addressing a manifest within a repository.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Reference {
    /// An opaque, mutable label.
    Tag(String),

    /// An immutable, self-verifying content digest.
    Digest(Digest),
}

impl Reference {
    /// Whether this reference is a tag.
    pub fn is_tag(&self) -> bool {
        matches!(self, Reference::Tag(_))
    }

    fn tag_valid(tag: &str) -> bool {
        if tag.is_empty() || tag.len() > 128 {
            return false;
        }
        let bytes = tag.as_bytes();
        let word = |b: u8| b.is_ascii_alphanumeric() || b == b'_';
        word(bytes[0])
            && bytes[1..]
                .iter()
                .all(|&b| word(b) || matches!(b, b'.' | b'-'))
    }
}

impl FromStr for Reference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.contains(':') {
            Ok(Reference::Digest(s.parse()?))
        } else if Self::tag_valid(s) {
            Ok(Reference::Tag(s.to_string()))
        } else {
            Err(Error::TagInvalid(s.to_string()))
        }
    }
}

impl fmt::Display for Reference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Reference::Tag(tag) => f.write_str(tag),
            Reference::Digest(digest) => digest.fmt(f),
        }
    }
}
