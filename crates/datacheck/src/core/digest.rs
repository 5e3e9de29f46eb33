//! Row digests.

use std::fmt;

/// One row reduced to its identity and a content fingerprint.
///
/// `key` is the comma-joined text of the key columns; `checksum` is the
/// CRC-32 (IEEE) of the compared columns' text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowDigest {
    pub key: String,
    pub checksum: u32,
}

impl RowDigest {
    pub fn new(key: impl Into<String>, checksum: u32) -> Self {
        Self {
            key: key.into(),
            checksum,
        }
    }

    /// Digest of raw row text, hashed locally.
    pub fn from_row_text(key: impl Into<String>, text: &[u8]) -> Self {
        Self::new(key, crc32fast::hash(text))
    }
}

/// Which copy of the data a query runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Source,
    Target,
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Side::Source => write!(f, "source"),
            Side::Target => write!(f, "target"),
        }
    }
}
