//! Client configuration

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings shared by the update orchestrator, the matching engine and the
/// HTTP transport. Every field has a default, so a config file only needs
/// the fields it changes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Subscribed lists
    pub lists: Vec<String>,
    pub api_key: String,
    /// Value of the `client` query parameter
    pub client: String,
    pub app_version: String,
    pub protocol_version: String,
    /// Base URL for downloads and full-hash requests
    pub data_url: String,
    /// Base URL for key exchange
    pub key_url: String,
    /// Authenticate update responses with a MAC
    pub use_mac: bool,
    /// HTTP timeout in seconds
    pub timeout_secs: u64,
    /// Proxy all requests go through, e.g. `http://127.0.0.1:3128`
    pub proxy: Option<String>,
    /// How long confirmed full hashes are trusted without asking again
    pub full_hash_ttl_secs: u64,
    /// Update interval used when the server does not send `n:`
    pub default_update_interval_secs: u64,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            lists: vec!["goog-malware-shavar".to_string(), "googpub-phish-shavar".to_string()],
            api_key: String::new(),
            client: "api".to_string(),
            app_version: env!("CARGO_PKG_VERSION").to_string(),
            protocol_version: "2.2".to_string(),
            data_url: "http://safebrowsing.clients.google.com/safebrowsing".to_string(),
            key_url: "https://sb-ssl.google.com/safebrowsing".to_string(),
            use_mac: false,
            timeout_secs: 30,
            proxy: None,
            full_hash_ttl_secs: 45 * 60,
            default_update_interval_secs: 30 * 60,
        }
    }
}

impl ClientConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Query string common to every request.
    pub fn query_string(&self) -> String {
        format!(
            "client={}&apikey={}&appver={}&pver={}",
            self.client, self.api_key, self.app_version, self.protocol_version
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: ClientConfig =
            serde_json::from_str(r#"{"api_key": "k", "lists": ["test-shavar"], "use_mac": true}"#).unwrap();
        assert_eq!(config.lists, vec!["test-shavar"]);
        assert!(config.use_mac);
        assert_eq!(config.protocol_version, "2.2");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.proxy, None);

        let config: ClientConfig = serde_json::from_str(r#"{"proxy": "http://127.0.0.1:3128"}"#).unwrap();
        assert_eq!(config.proxy.as_deref(), Some("http://127.0.0.1:3128"));
    }

    #[test]
    fn test_query_string() {
        let config = ClientConfig {
            api_key: "KEY".to_string(),
            app_version: "1.0".to_string(),
            ..Default::default()
        };
        assert_eq!(config.query_string(), "client=api&apikey=KEY&appver=1.0&pver=2.2");
    }
}
