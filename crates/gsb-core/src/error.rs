//! Error taxonomy shared by the lookup engine and the update orchestrator.

use crate::chunk::ChunkError;
use crate::ranges::RangeError;
use crate::remote::TransportError;
use crate::storage::StorageError;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Client error.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Input that cannot be interpreted at all. Canonicalization never raises it.
    #[error("Malformed input: {0}")]
    MalformedInput(String),
    /// The remote service sent something that breaks the wire format.
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),
    /// MAC missing or mismatched.
    #[error("Authentication failure: {0}")]
    AuthenticationFailure(String),
    /// Non-success HTTP status.
    #[error("Remote service returned HTTP {status}")]
    Remote { status: u16 },
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Storage failure: {0}")]
    Storage(#[from] StorageError),
    /// Requests of this kind are suspended until the backoff elapses.
    #[error("Backing off for another {remaining}s")]
    Backoff { remaining: u64 },
    /// A lookup could not be confirmed either way.
    #[error("Lookup indeterminate: {0}")]
    Indeterminate(Box<Error>),
}

impl Error {
    /// Wrap a confirmation failure so callers can apply a fail policy.
    pub fn indeterminate(inner: Error) -> Self {
        match inner {
            Self::Indeterminate(_) => inner,
            other => Self::Indeterminate(Box::new(other)),
        }
    }

    pub fn is_indeterminate(&self) -> bool {
        matches!(self, Self::Indeterminate(_))
    }
}

impl From<ChunkError> for Error {
    fn from(e: ChunkError) -> Self {
        Self::ProtocolViolation(e.to_string())
    }
}

impl From<RangeError> for Error {
    fn from(e: RangeError) -> Self {
        Self::ProtocolViolation(e.to_string())
    }
}
