//! HTTP transport
//!
//! Blocking [`Transport`] over reqwest. Each exchange runs on a private tokio
//! runtime so the protocol core stays synchronous.

use log::debug;
use tokio::runtime::Runtime;

use gsb_core::{ClientConfig, Request, Response, Transport, TransportError};

pub struct HttpTransport {
    runtime: Runtime,
    http: reqwest::Client,
    data_url: String,
    key_url: String,
    query: String,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self, TransportError> {
        let runtime = Runtime::new().map_err(|e| TransportError::Other(format!("failed to start runtime: {e}")))?;
        let mut builder = reqwest::Client::builder().timeout(config.timeout());
        if let Some(proxy) = &config.proxy {
            let proxy = reqwest::Proxy::all(proxy.as_str())
                .map_err(|e| TransportError::Other(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder
            .build()
            .map_err(|e| TransportError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            runtime,
            http,
            data_url: config.data_url.trim_end_matches('/').to_string(),
            key_url: config.key_url.trim_end_matches('/').to_string(),
            query: config.query_string(),
        })
    }

    /// URL a request is sent to.
    pub fn endpoint(&self, request: &Request<'_>) -> String {
        match request {
            Request::Downloads { wrapped_key: Some(key), .. } => {
                format!("{}/downloads?{}&wrkey={key}", self.data_url, self.query)
            }
            Request::Downloads { wrapped_key: None, .. } => format!("{}/downloads?{}", self.data_url, self.query),
            Request::FullHash { .. } => format!("{}/gethash?{}", self.data_url, self.query),
            Request::NewKey => format!("{}/newkey?{}", self.key_url, self.query),
            Request::Redirect { url } => url.to_string(),
        }
    }

    async fn exchange(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        let url = self.endpoint(request);
        let builder = match request {
            Request::Downloads { body, .. } | Request::FullHash { body } => self.http.post(&url).body(body.to_vec()),
            Request::NewKey | Request::Redirect { .. } => self.http.get(&url),
        };

        let response = builder.send().await.map_err(classify)?;
        let status = response.status().as_u16();
        let body = response.bytes().await.map_err(classify)?;
        debug!("{} {url} -> {status} ({} bytes)", request.name(), body.len());
        Ok(Response::new(status, body.to_vec()))
    }
}

impl Transport for HttpTransport {
    fn send(&self, request: &Request<'_>) -> Result<Response, TransportError> {
        self.runtime.block_on(self.exchange(request))
    }
}

fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() {
        TransportError::Connection(e.to_string())
    } else {
        TransportError::Other(e.to_string())
    }
}
