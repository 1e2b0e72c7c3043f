//! Paginated JSON listings
//!
//! Fetches one page of a `{count, results, next}` listing.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::{create_client, FetchError, HttpConfig};

/// One page of a cursor-linked listing
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Page {
    /// Total number of items across all pages
    pub count: u64,
    /// Items on this page, in listing order
    pub results: Vec<Value>,
    /// URL of the following page; absent or null on the last page
    #[serde(default)]
    pub next: Option<String>,
}

impl Page {
    pub fn has_next(&self) -> bool {
        self.next.as_deref().is_some_and(|url| !url.is_empty())
    }
}

/// Something that can fetch a page by URL
#[async_trait]
pub trait PageSource: Send + Sync {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError>;
}

/// Fetches pages over HTTP
pub struct HttpPageSource {
    client: Client,
}

impl HttpPageSource {
    pub fn new(config: &HttpConfig) -> Result<Self, FetchError> {
        Ok(Self {
            client: create_client(config)?,
        })
    }
}

#[async_trait]
impl PageSource for HttpPageSource {
    async fn fetch(&self, url: &str) -> Result<Page, FetchError> {
        debug!("GET {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|source| FetchError::Transport {
                url: url.to_string(),
                source,
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("{} returned status: {}", url, status);
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let body = response.bytes().await.map_err(|source| FetchError::Transport {
            url: url.to_string(),
            source,
        })?;

        parse_page(url, &body)
    }
}

/// Decode a listing page body
pub fn parse_page(url: &str, body: &[u8]) -> Result<Page, FetchError> {
    serde_json::from_slice(body).map_err(|e| FetchError::Malformed {
        url: url.to_string(),
        reason: e.to_string(),
    })
}
