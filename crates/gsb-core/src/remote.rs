//! Transport contract for the remote list service
//!
//! The engine never builds URLs or speaks HTTP itself. It hands a `Request`
//! to a `Transport`, which knows the endpoints, query parameters and timeout,
//! and gets back a status code and raw body.

/// Error type for transports.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    #[error("Request timed out")]
    Timeout,
    #[error("Connection failed: {0}")]
    Connection(String),
    #[error("{0}")]
    Other(String),
}

/// A request to the remote service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request<'a> {
    /// POST list ranges, receive update directives
    Downloads {
        body: &'a [u8],
        /// Wrapped MAC key, sent when responses are to be authenticated
        wrapped_key: Option<&'a str>,
    },
    /// POST hash prefixes, receive full hashes
    FullHash { body: &'a [u8] },
    /// Fetch a fresh MAC key pair
    NewKey,
    /// GET a chunk stream named by a redirect directive
    Redirect { url: &'a str },
}

impl Request<'_> {
    /// Short name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Downloads { .. } => "downloads",
            Self::FullHash { .. } => "gethash",
            Self::NewKey => "newkey",
            Self::Redirect { .. } => "redirect",
        }
    }
}

/// Status and body of a completed exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Vec<u8>,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Blocking exchange with the remote service. Implementations must enforce
/// a timeout.
pub trait Transport: Send + Sync {
    fn send(&self, request: &Request<'_>) -> Result<Response, TransportError>;
}

impl<T: Transport + ?Sized> Transport for &T {
    fn send(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        (**self).send(request)
    }
}
