//! Chunk body and stream codec.

use log::debug;

use super::format::*;
use super::{Chunk, ChunkEntry, ChunkError, PrefixEntry};
use crate::types::{ChunkKind, HostKey};

// =============================================================================
// Decoding
// =============================================================================

/// Decode a chunk body. Fails if the body ends inside an entry.
pub fn decode(kind: ChunkKind, hash_len: usize, data: &[u8]) -> Result<Vec<ChunkEntry>, ChunkError> {
    if !valid_hash_len(hash_len) {
        return Err(ChunkError::InvalidHashLen(hash_len));
    }

    let mut entries = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        ensure(data, pos, ENTRY_HEADER_SIZE)?;
        let host_key = read_host_key(data, pos + add_entry::HOST_KEY);
        let count = data[pos + add_entry::COUNT] as usize;

        match kind {
            ChunkKind::Add => {
                let start = pos + add_entry::PREFIXES;
                ensure(data, start, count * hash_len)?;
                let prefixes = data[start..start + count * hash_len]
                    .chunks_exact(hash_len)
                    .map(PrefixEntry::add)
                    .collect();
                entries.push(ChunkEntry::with_prefixes(host_key, prefixes));
                pos = start + count * hash_len;
            }
            ChunkKind::Sub if count == 0 => {
                let start = pos + sub_entry::BODY;
                ensure(data, start, ADD_CHUNK_SIZE)?;
                entries.push(ChunkEntry::sub_host(host_key, read_u32_be(data, start)));
                pos = start + ADD_CHUNK_SIZE;
            }
            ChunkKind::Sub => {
                let start = pos + sub_entry::BODY;
                let stride = ADD_CHUNK_SIZE + hash_len;
                ensure(data, start, count * stride)?;
                let prefixes = data[start..start + count * stride]
                    .chunks_exact(stride)
                    .map(|pair| PrefixEntry::sub(read_u32_be(pair, 0), &pair[ADD_CHUNK_SIZE..]))
                    .collect();
                entries.push(ChunkEntry::with_prefixes(host_key, prefixes));
                pos = start + count * stride;
            }
        }
    }

    Ok(entries)
}

/// Split a chunk stream into decoded chunks.
pub fn parse_chunk_stream(list: &str, data: &[u8]) -> Result<Vec<Chunk>, ChunkError> {
    let mut chunks = Vec::new();
    let mut pos = 0;

    while pos < data.len() {
        let header_len = data[pos..]
            .iter()
            .position(|&b| b == HEADER_TERMINATOR)
            .ok_or_else(|| ChunkError::InvalidHeader("missing header terminator".to_string()))?;
        let header = std::str::from_utf8(&data[pos..pos + header_len])
            .map_err(|_| ChunkError::InvalidHeader("header is not ASCII".to_string()))?;

        let (kind, number, hash_len, byte_length) = parse_header(header)?;
        pos += header_len + 1;

        let body_len = byte_length as usize;
        if data.len() - pos < body_len {
            return Err(ChunkError::Truncated {
                needed: body_len,
                available: data.len() - pos,
            });
        }

        let entries = decode(kind, hash_len, &data[pos..pos + body_len])?;
        debug!(
            "Decoded {}:{} for {} ({} entries, {} bytes)",
            kind,
            number,
            list,
            entries.len(),
            body_len
        );
        chunks.push(Chunk {
            list: list.to_string(),
            kind,
            number,
            hash_len,
            byte_length,
            entries,
        });
        pos += body_len;
    }

    Ok(chunks)
}

fn parse_header(header: &str) -> Result<(ChunkKind, u32, usize, u32), ChunkError> {
    let invalid = || ChunkError::InvalidHeader(header.to_string());

    let fields: Vec<&str> = header.split(FIELD_SEPARATOR as char).collect();
    if fields.len() != HEADER_FIELDS {
        return Err(invalid());
    }

    let kind = match fields[0].as_bytes() {
        [tag] => ChunkKind::try_from(*tag).map_err(|_| ChunkError::UnknownKind(*tag as char))?,
        _ => return Err(invalid()),
    };
    let number = fields[1].parse().map_err(|_| invalid())?;
    let hash_len = fields[2].parse().map_err(|_| invalid())?;
    let byte_length = fields[3].parse().map_err(|_| invalid())?;
    Ok((kind, number, hash_len, byte_length))
}

#[inline]
fn ensure(data: &[u8], offset: usize, len: usize) -> Result<(), ChunkError> {
    if offset + len > data.len() {
        return Err(ChunkError::Truncated {
            needed: offset + len,
            available: data.len(),
        });
    }
    Ok(())
}

#[inline]
fn read_host_key(data: &[u8], offset: usize) -> HostKey {
    HostKey([data[offset], data[offset + 1], data[offset + 2], data[offset + 3]])
}

// =============================================================================
// Encoding
// =============================================================================

/// Encode entries into a chunk body.
pub fn encode(kind: ChunkKind, hash_len: usize, entries: &[ChunkEntry]) -> Result<Vec<u8>, ChunkError> {
    if !valid_hash_len(hash_len) {
        return Err(ChunkError::InvalidHashLen(hash_len));
    }

    let mut out = Vec::new();
    for entry in entries {
        if entry.prefixes.len() > u8::MAX as usize {
            return Err(ChunkError::TooManyPrefixes {
                host_key: entry.host_key,
                count: entry.prefixes.len(),
            });
        }
        out.extend_from_slice(entry.host_key.as_bytes());
        out.push(entry.prefixes.len() as u8);

        if kind == ChunkKind::Sub && entry.prefixes.is_empty() {
            let add_chunk = entry.add_chunk.ok_or(ChunkError::MissingAddChunk(entry.host_key))?;
            out.extend_from_slice(&add_chunk.to_be_bytes());
            continue;
        }

        for p in &entry.prefixes {
            if p.prefix.len() != hash_len {
                return Err(ChunkError::PrefixLength {
                    expected: hash_len,
                    actual: p.prefix.len(),
                });
            }
            if kind == ChunkKind::Sub {
                let add_chunk = p.add_chunk.ok_or(ChunkError::MissingAddChunk(entry.host_key))?;
                out.extend_from_slice(&add_chunk.to_be_bytes());
            }
            out.extend_from_slice(&p.prefix);
        }
    }
    Ok(out)
}

/// Encode a chunk with its header.
pub fn encode_chunk(chunk: &Chunk) -> Result<Vec<u8>, ChunkError> {
    let body = encode(chunk.kind, chunk.hash_len, &chunk.entries)?;
    let mut out = format!("{}:{}:{}:{}\n", chunk.kind, chunk.number, chunk.hash_len, body.len()).into_bytes();
    out.extend_from_slice(&body);
    Ok(out)
}
