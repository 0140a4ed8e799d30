//! Core type definitions for the Safe Browsing client
//!
//! These types are shared by the chunk codec, the storage contract and the
//! matching engine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// SHA-256 digest of a URL expression.
pub type FullHash = [u8; 32];

// =============================================================================
// Chunk Kinds
// =============================================================================

/// Kind of a list chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum ChunkKind {
    /// Adds prefixes (or whole hosts) to a list
    Add,
    /// Cancels entries previously added by an add chunk
    Sub,
}

impl ChunkKind {
    /// Wire tag: `a` or `s`.
    pub const fn tag(self) -> u8 {
        match self {
            Self::Add => b'a',
            Self::Sub => b's',
        }
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Add => "a",
            Self::Sub => "s",
        }
    }
}

impl TryFrom<u8> for ChunkKind {
    type Error = ();

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            b'a' => Ok(Self::Add),
            b's' => Ok(Self::Sub),
            _ => Err(()),
        }
    }
}

impl fmt::Display for ChunkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

bitflags::bitflags! {
    /// Set of chunk kinds, used for bulk storage operations.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct ChunkKinds: u8 {
        const ADD = 1 << 0;
        const SUB = 1 << 1;

        const ALL = Self::ADD.bits() | Self::SUB.bits();
    }
}

impl ChunkKinds {
    /// Check whether a single kind is part of the set.
    pub fn includes(self, kind: ChunkKind) -> bool {
        match kind {
            ChunkKind::Add => self.contains(Self::ADD),
            ChunkKind::Sub => self.contains(Self::SUB),
        }
    }
}

impl From<ChunkKind> for ChunkKinds {
    fn from(kind: ChunkKind) -> Self {
        match kind {
            ChunkKind::Add => Self::ADD,
            ChunkKind::Sub => Self::SUB,
        }
    }
}

// =============================================================================
// Host Keys
// =============================================================================

/// First four bytes of the SHA-256 of a host key variant such as `b.c.com/`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
pub struct HostKey(pub [u8; 4]);

impl HostKey {
    /// Build from the leading bytes of a digest. Returns None if too short.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let key: [u8; 4] = bytes.get(..4)?.try_into().ok()?;
        Some(Self(key))
    }

    #[inline]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Display for HostKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for b in self.0 {
            write!(f, "{b:02x}")?;
        }
        Ok(())
    }
}

// =============================================================================
// Request Kinds
// =============================================================================

/// Remote request families that carry their own timeout and backoff state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestKind {
    /// List downloads
    Data,
    /// Full-hash confirmations
    Lookup,
}

impl RequestKind {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Data => "data",
            Self::Lookup => "lookup",
        }
    }

    /// Config key holding the unix time before which no request may be sent.
    pub fn timeout_key(self) -> String {
        format!("Timeout_{}", self.as_str())
    }

    /// Config key holding the consecutive failure count.
    pub fn backoff_key(self) -> String {
        format!("BackoffCount_{}", self.as_str())
    }
}

// =============================================================================
// Lookup Results
// =============================================================================

/// A confirmed listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMatch {
    /// List the URL was found on
    pub list: String,
    /// Add chunk that carried the matching prefix
    pub add_chunk: u32,
    /// Confirmed full hash
    pub full_hash: FullHash,
}

/// Outcome of a lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    NotListed,
    Listed(ListMatch),
}

impl Verdict {
    pub fn is_listed(&self) -> bool {
        matches!(self, Self::Listed(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_chunk_kind_tags() {
        assert_eq!(ChunkKind::try_from(b'a'), Ok(ChunkKind::Add));
        assert_eq!(ChunkKind::try_from(b's'), Ok(ChunkKind::Sub));
        assert!(ChunkKind::try_from(b'x').is_err());
        assert_eq!(ChunkKind::Sub.tag(), b's');
    }

    #[test]
    fn test_chunk_kinds_includes() {
        assert!(ChunkKinds::ALL.includes(ChunkKind::Add));
        assert!(ChunkKinds::ALL.includes(ChunkKind::Sub));
        assert!(!ChunkKinds::ADD.includes(ChunkKind::Sub));
    }

    #[test]
    fn test_host_key_display() {
        let key = HostKey([0xde, 0xad, 0x00, 0x01]);
        assert_eq!(key.to_string(), "dead0001");
        assert_eq!(HostKey::from_slice(&[1, 2, 3, 4, 5]), Some(HostKey([1, 2, 3, 4])));
        assert_eq!(HostKey::from_slice(&[1, 2]), None);
    }

    #[test]
    fn test_request_kind_keys() {
        assert_eq!(RequestKind::Data.timeout_key(), "Timeout_data");
        assert_eq!(RequestKind::Lookup.backoff_key(), "BackoffCount_lookup");
    }
}
