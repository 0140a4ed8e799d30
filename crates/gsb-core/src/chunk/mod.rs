//! Add/Sub Chunk Codec
//!
//! Lists are distributed as numbered chunks. An add chunk lists host keys
//! and the prefixes under them; a sub chunk cancels prefixes (or whole
//! hosts) that an earlier add chunk introduced.
//!
//! # Entry shapes
//!
//! | kind | count | meaning |
//! |------|-------|---------|
//! | add  | 0     | every URL on the host is listed |
//! | add  | n     | n prefixes under the host |
//! | sub  | 0     | cancels the host-level add from `add_chunk` |
//! | sub  | n     | n (add chunk, prefix) cancellations |

pub mod codec;
pub mod format;

use serde::{Deserialize, Serialize};

use crate::types::{ChunkKind, HostKey};

pub use codec::{decode, encode, encode_chunk, parse_chunk_stream};

/// Error type for chunk decoding and encoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkError {
    #[error("Chunk data truncated: needed {needed} bytes, {available} available")]
    Truncated { needed: usize, available: usize },
    #[error("Invalid chunk header: {0}")]
    InvalidHeader(String),
    #[error("Unknown chunk type: {0:?}")]
    UnknownKind(char),
    #[error("Invalid hash length: {0}")]
    InvalidHashLen(usize),
    #[error("Entry for {host_key} has {count} prefixes, at most 255 allowed")]
    TooManyPrefixes { host_key: HostKey, count: usize },
    #[error("Prefix of {actual} bytes in a chunk with hash length {expected}")]
    PrefixLength { expected: usize, actual: usize },
    #[error("Entry for {0} is missing its add chunk number")]
    MissingAddChunk(HostKey),
}

/// A prefix inside an entry. Sub prefixes name the add chunk they cancel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixEntry {
    pub add_chunk: Option<u32>,
    pub prefix: Vec<u8>,
}

impl PrefixEntry {
    pub fn add(prefix: impl Into<Vec<u8>>) -> Self {
        Self { add_chunk: None, prefix: prefix.into() }
    }

    pub fn sub(add_chunk: u32, prefix: impl Into<Vec<u8>>) -> Self {
        Self { add_chunk: Some(add_chunk), prefix: prefix.into() }
    }
}

/// One host key and the prefixes listed (or cancelled) under it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    pub host_key: HostKey,
    /// Add chunk cancelled by a host-level sub entry
    pub add_chunk: Option<u32>,
    pub prefixes: Vec<PrefixEntry>,
}

impl ChunkEntry {
    /// Host-level add: every URL under the host.
    pub fn add_host(host_key: HostKey) -> Self {
        Self { host_key, add_chunk: None, prefixes: Vec::new() }
    }

    /// Host-level sub: cancels the host-level add of `add_chunk`.
    pub fn sub_host(host_key: HostKey, add_chunk: u32) -> Self {
        Self { host_key, add_chunk: Some(add_chunk), prefixes: Vec::new() }
    }

    pub fn with_prefixes(host_key: HostKey, prefixes: Vec<PrefixEntry>) -> Self {
        Self { host_key, add_chunk: None, prefixes }
    }

    /// Wire count. Saturates; `encode` rejects entries above 255.
    pub fn count(&self) -> u8 {
        self.prefixes.len().min(u8::MAX as usize) as u8
    }

    pub fn is_host_level(&self) -> bool {
        self.prefixes.is_empty()
    }
}

/// A decoded chunk.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Chunk {
    pub list: String,
    pub kind: ChunkKind,
    pub number: u32,
    pub hash_len: usize,
    /// Body length declared in the header
    pub byte_length: u32,
    pub entries: Vec<ChunkEntry>,
}
