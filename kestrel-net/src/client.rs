//! HTTP client construction

use reqwest::Client;
use std::time::Duration;
use thiserror::Error;

/// HTTP client configuration
#[derive(Debug, Clone)]
pub struct HttpConfig {
    /// Request timeout in seconds
    pub timeout_secs: u64,
    /// User agent sent with every request
    pub user_agent: String,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 20,
            user_agent: format!("kestrel/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl HttpConfig {
    pub fn with_timeout(mut self, timeout_secs: u64) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

/// Errors from fetching pages
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("Failed to build HTTP client: {0}")]
    ClientBuild(String),

    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{url} returned status {status}")]
    Status { url: String, status: u16 },

    #[error("Malformed page from {url}: {reason}")]
    Malformed { url: String, reason: String },
}

impl FetchError {
    /// Connection errors, timeouts and non-2xx statuses.
    ///
    /// These end the current run but leave the data untouched; the run can be
    /// resumed by hand.
    pub fn is_transport(&self) -> bool {
        matches!(self, FetchError::Transport { .. } | FetchError::Status { .. })
    }
}

/// Create an HTTP client for API harvesting
pub fn create_client(config: &HttpConfig) -> Result<Client, FetchError> {
    Client::builder()
        .timeout(Duration::from_secs(config.timeout_secs))
        .user_agent(config.user_agent.as_str())
        .build()
        .map_err(|e| FetchError::ClientBuild(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout_secs, 20);
        assert!(config.user_agent.starts_with("kestrel/"));
    }

    #[test]
    fn test_transport_classification() {
        let status = FetchError::Status {
            url: "http://example.test".to_string(),
            status: 503,
        };
        let malformed = FetchError::Malformed {
            url: "http://example.test".to_string(),
            reason: "missing field `results`".to_string(),
        };
        assert!(status.is_transport());
        assert!(!malformed.is_transport());
    }

    #[test]
    fn test_create_client() {
        assert!(create_client(&HttpConfig::default().with_timeout(5)).is_ok());
    }
}
