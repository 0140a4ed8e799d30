//! Chunk Wire Format Constants
//!
//! A chunk stream is a sequence of `<a|s>:<number>:<hashLen>:<byteLength>\n`
//! headers, each followed by exactly `byteLength` body bytes. Multi-byte
//! integers in chunk bodies are big-endian.

/// Bytes in a host key
pub const HOST_KEY_SIZE: usize = 4;

/// Bytes in an add chunk number reference
pub const ADD_CHUNK_SIZE: usize = 4;

/// Shortest prefix a chunk may carry
pub const MIN_HASH_LEN: usize = 4;

/// Longest prefix a chunk may carry (a full SHA-256 digest)
pub const MAX_HASH_LEN: usize = 32;

/// Header field separator
pub const FIELD_SEPARATOR: u8 = b':';

/// Header terminator
pub const HEADER_TERMINATOR: u8 = b'\n';

/// Number of fields in a chunk header
pub const HEADER_FIELDS: usize = 4;

// =============================================================================
// Entry Layouts
// =============================================================================

/// Add entry: `hostKey[4] count[1] prefix[hashLen] * count`
pub mod add_entry {
    /// u8[4] host key
    pub const HOST_KEY: usize = 0;
    /// u8 prefix count
    pub const COUNT: usize = 4;
    /// first prefix
    pub const PREFIXES: usize = 5;
}

/// Sub entry: `hostKey[4] count[1]`, then either `addChunk[4]` when count is
/// zero or `(addChunk[4] prefix[hashLen]) * count`
pub mod sub_entry {
    /// u8[4] host key
    pub const HOST_KEY: usize = 0;
    /// u8 prefix count
    pub const COUNT: usize = 4;
    /// u32 add chunk (count == 0) or first pair
    pub const BODY: usize = 5;
}

/// Fixed bytes at the start of every entry
pub const ENTRY_HEADER_SIZE: usize = HOST_KEY_SIZE + 1;

/// Read a big-endian u32.
#[inline]
pub fn read_u32_be(data: &[u8], offset: usize) -> u32 {
    u32::from_be_bytes([
        data[offset],
        data[offset + 1],
        data[offset + 2],
        data[offset + 3],
    ])
}

/// Whether a hash length is legal for a chunk.
#[inline]
pub fn valid_hash_len(len: usize) -> bool {
    (MIN_HASH_LEN..=MAX_HASH_LEN).contains(&len)
}
