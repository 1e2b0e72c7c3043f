//! Source registry
//!
//! Every origin Kestrel knows how to harvest is a variant of [`Source`].
//! Collection endpoints and feature extraction dispatch on the variant, so an
//! unknown source is rejected when it is parsed, not halfway through a run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::DEFAULT_PAGE_SIZE;

/// Errors from core model handling
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("Unknown source: {0} (expected one of: {names})", names = Source::names().join(", "))]
    UnknownSource(String),
}

/// A known external data origin
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    /// FOIA requests filed through MuckRock
    MuckrockFoia,
}

impl Source {
    /// All known sources
    pub const ALL: &'static [Source] = &[Source::MuckrockFoia];

    /// Stable identifier, as stored and as typed on the command line
    pub fn as_str(&self) -> &'static str {
        match self {
            Source::MuckrockFoia => "muckrock_foia",
        }
    }

    /// Identifiers of all known sources
    pub fn names() -> Vec<&'static str> {
        Self::ALL.iter().map(Source::as_str).collect()
    }

    /// Paginated API endpoint for this source
    // https://help.muckrock.com/API-19ef8892696381e88627c50e4ee90ed4
    pub fn endpoint(&self) -> Endpoint {
        match self {
            Source::MuckrockFoia => Endpoint {
                base_url: "https://www.muckrock.com/api_v1/foia/".to_string(),
                page_size: DEFAULT_PAGE_SIZE,
                ordering: "-datetime_submitted".to_string(),
            },
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Source {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|source| source.as_str() == s)
            .ok_or_else(|| CoreError::UnknownSource(s.to_string()))
    }
}

/// A cursor-linked, page-numbered JSON listing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Listing URL without query parameters
    pub base_url: String,
    /// Items per page
    pub page_size: u32,
    /// Ordering parameter (newest first)
    pub ordering: String,
}

impl Endpoint {
    /// Build the URL of the first page to fetch.
    ///
    /// Later pages are reached by following the `next` link in each response.
    pub fn start_url(&self, resume_page: Option<u32>) -> String {
        let mut url = format!(
            "{}?format=json&ordering={}&page_size={}",
            self.base_url, self.ordering, self.page_size
        );
        if let Some(page) = resume_page {
            url.push_str(&format!("&page={}", page));
        }
        url
    }

    /// Number of items that precede `resume_page`
    pub fn resume_offset(&self, resume_page: Option<u32>) -> u64 {
        match resume_page {
            Some(page) if page > 1 => u64::from(page - 1) * u64::from(self.page_size),
            _ => 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_source_round_trip() {
        for source in Source::ALL {
            let parsed: Source = source.as_str().parse().unwrap();
            assert_eq!(parsed, *source);
            assert_eq!(parsed.to_string(), source.as_str());
        }
    }

    #[test]
    fn test_unknown_source() {
        let err = "documentcloud".parse::<Source>().unwrap_err();
        let message = err.to_string();
        assert!(message.contains("documentcloud"));
        assert!(message.contains("muckrock_foia"));
    }

    #[test]
    fn test_serde_identifier() {
        let json = serde_json::to_string(&Source::MuckrockFoia).unwrap();
        assert_eq!(json, "\"muckrock_foia\"");
    }

    #[test]
    fn test_start_url() {
        let endpoint = Source::MuckrockFoia.endpoint();
        assert_eq!(
            endpoint.start_url(None),
            "https://www.muckrock.com/api_v1/foia/?format=json&ordering=-datetime_submitted&page_size=100"
        );
        assert!(endpoint.start_url(Some(7)).ends_with("&page_size=100&page=7"));
    }

    #[test]
    fn test_resume_offset() {
        let endpoint = Source::MuckrockFoia.endpoint();
        assert_eq!(endpoint.resume_offset(None), 0);
        assert_eq!(endpoint.resume_offset(Some(1)), 0);
        assert_eq!(endpoint.resume_offset(Some(3)), 200);
    }
}
