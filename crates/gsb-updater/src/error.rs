use gsb_core::chunk::ChunkError;
use gsb_core::ranges::RangeError;
use gsb_core::{Error, StorageError, TransportError};

/// Error type for update runs.
#[derive(Debug, thiserror::Error)]
pub enum UpdateError {
    #[error(transparent)]
    Core(#[from] Error),
    #[error("Invalid directive on line {line}: {reason}")]
    Directive { line: usize, reason: String },
    #[error("Invalid key exchange response: {0}")]
    KeyExchange(String),
}

impl UpdateError {
    pub fn protocol(reason: impl Into<String>) -> Self {
        Self::Core(Error::ProtocolViolation(reason.into()))
    }

    pub fn authentication(reason: impl Into<String>) -> Self {
        Self::Core(Error::AuthenticationFailure(reason.into()))
    }

    /// MAC missing or mismatched.
    pub fn is_authentication(&self) -> bool {
        matches!(self, Self::Core(Error::AuthenticationFailure(_)))
    }

    pub fn is_protocol_violation(&self) -> bool {
        matches!(self, Self::Core(Error::ProtocolViolation(_)) | Self::Directive { .. })
    }
}

impl From<StorageError> for UpdateError {
    fn from(e: StorageError) -> Self {
        Self::Core(e.into())
    }
}

impl From<TransportError> for UpdateError {
    fn from(e: TransportError) -> Self {
        Self::Core(e.into())
    }
}

impl From<ChunkError> for UpdateError {
    fn from(e: ChunkError) -> Self {
        Self::Core(e.into())
    }
}

impl From<RangeError> for UpdateError {
    fn from(e: RangeError) -> Self {
        Self::Core(e.into())
    }
}
