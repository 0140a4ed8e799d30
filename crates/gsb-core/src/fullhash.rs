//! Full-hash confirmation wire format
//!
//! Request: `<prefixLen>:<totalBytes>\n` followed by the raw prefixes.
//! Response: zero or more `<list>:<addChunk>:<len>\n` headers, each followed
//! by `len` bytes of concatenated 32-byte hashes. An empty body means no
//! prefix matched.

use crate::chunk::ChunkError;
use crate::types::FullHash;

/// Bytes in a full hash.
pub const FULL_HASH_SIZE: usize = 32;

/// A full hash the service holds for a list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FullHashRecord {
    pub list: String,
    pub add_chunk: u32,
    pub hash: FullHash,
}

/// Build a request body. All prefixes must have length `prefix_len`.
pub fn encode_request(prefix_len: usize, prefixes: &[&[u8]]) -> Result<Vec<u8>, ChunkError> {
    if let Some(bad) = prefixes.iter().find(|p| p.len() != prefix_len) {
        return Err(ChunkError::PrefixLength {
            expected: prefix_len,
            actual: bad.len(),
        });
    }
    let total = prefix_len * prefixes.len();
    let mut body = format!("{prefix_len}:{total}\n").into_bytes();
    body.reserve(total);
    for p in prefixes {
        body.extend_from_slice(p);
    }
    Ok(body)
}

/// Parse a response body.
pub fn parse_response(body: &[u8]) -> Result<Vec<FullHashRecord>, ChunkError> {
    let mut records = Vec::new();
    let mut pos = 0;

    while pos < body.len() {
        let header_len = body[pos..]
            .iter()
            .position(|&b| b == b'\n')
            .ok_or_else(|| ChunkError::InvalidHeader("missing header terminator".to_string()))?;
        let header = std::str::from_utf8(&body[pos..pos + header_len])
            .map_err(|_| ChunkError::InvalidHeader("header is not ASCII".to_string()))?;
        let invalid = || ChunkError::InvalidHeader(header.to_string());

        let mut fields = header.rsplitn(3, ':');
        let len: usize = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;
        let add_chunk: u32 = fields.next().and_then(|f| f.parse().ok()).ok_or_else(invalid)?;
        let list = fields.next().filter(|l| !l.is_empty()).ok_or_else(invalid)?;
        if len % FULL_HASH_SIZE != 0 {
            return Err(invalid());
        }

        pos += header_len + 1;
        if body.len() - pos < len {
            return Err(ChunkError::Truncated {
                needed: len,
                available: body.len() - pos,
            });
        }

        for hash in body[pos..pos + len].chunks_exact(FULL_HASH_SIZE) {
            let mut full = [0u8; FULL_HASH_SIZE];
            full.copy_from_slice(hash);
            records.push(FullHashRecord {
                list: list.to_string(),
                add_chunk,
                hash: full,
            });
        }
        pos += len;
    }

    Ok(records)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_request() {
        let body = encode_request(4, &[&[1u8, 2, 3, 4][..], &[5, 6, 7, 8][..]]).unwrap();
        assert_eq!(&body[..5], b"4:8\n\x01");
        assert_eq!(body.len(), 4 + 8);
        assert!(encode_request(4, &[&[1u8, 2][..]]).is_err());
    }

    #[test]
    fn test_parse_response() {
        let mut body = b"goog-malware-shavar:17:64\n".to_vec();
        body.extend_from_slice(&[1u8; 32]);
        body.extend_from_slice(&[2u8; 32]);
        body.extend_from_slice(b"googpub-phish-shavar:3:32\n");
        body.extend_from_slice(&[3u8; 32]);

        let records = parse_response(&body).unwrap();
        assert_eq!(records.len(), 3);
        assert_eq!(records[0].list, "goog-malware-shavar");
        assert_eq!(records[1].add_chunk, 17);
        assert_eq!(records[1].hash, [2u8; 32]);
        assert_eq!(records[2].list, "googpub-phish-shavar");
        assert!(parse_response(b"").unwrap().is_empty());
    }

    #[test]
    fn test_parse_response_errors() {
        assert!(matches!(parse_response(b"l:1:32\nshort"), Err(ChunkError::Truncated { .. })));
        assert!(matches!(parse_response(b"l:1:31\n"), Err(ChunkError::InvalidHeader(_))));
        assert!(matches!(parse_response(b"l:x:32\n"), Err(ChunkError::InvalidHeader(_))));
        assert!(matches!(parse_response(b":1:0\n"), Err(ChunkError::InvalidHeader(_))));
    }
}
