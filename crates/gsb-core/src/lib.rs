//! Safe Browsing Core Library
//!
//! This crate provides the lookup side of a Safe Browsing v2 list client:
//! URL canonicalization, host key and prefix derivation, the add/sub chunk
//! wire codec, the storage contract the update orchestrator writes through,
//! and the matching engine that answers "is this URL listed?".
//!
//! # Architecture
//!
//! Lists are synchronized as add/sub chunks of hashed URL prefixes. A lookup
//! canonicalizes the URL, hashes its host keys, consults local storage and
//! only escalates ambiguous prefix hits to a remote full-hash confirmation.
//! Raw URLs never leave the process.
//!
//! # Modules
//!
//! - `url`: URL canonicalization
//! - `hash`: SHA-256 host keys and prefix variants
//! - `chunk`: add/sub chunk stream codec
//! - `fullhash`: full-hash request/response wire format
//! - `ranges`: chunk range compression and parsing
//! - `storage`: storage contract and in-memory adapter
//! - `remote`: transport contract for the remote service
//! - `backoff`: persisted per-request-type backoff
//! - `matcher`: the lookup engine
//! - `types`: shared type definitions

pub mod backoff;
pub mod chunk;
pub mod clock;
pub mod config;
pub mod error;
pub mod fullhash;
pub mod hash;
pub mod matcher;
pub mod ranges;
pub mod remote;
pub mod storage;
pub mod types;
pub mod url;

// Re-export commonly used types
pub use chunk::{Chunk, ChunkEntry, ChunkError, PrefixEntry};
pub use clock::{Clock, SystemClock};
pub use config::ClientConfig;
pub use error::{Error, Result};
pub use hash::{host_keys, prefixes, HostKeyVariant, PrefixVariant};
pub use matcher::{FailPolicy, Matcher};
pub use ranges::{ChunkRange, ListRangeSet};
pub use remote::{Request, Response, Transport, TransportError};
pub use storage::{MemoryStore, SaveOutcome, Storage, StorageError};
pub use types::{ChunkKind, ChunkKinds, FullHash, HostKey, ListMatch, RequestKind, Verdict};
pub use url::{canonicalize, canonicalize_bytes, CanonicalForm};
