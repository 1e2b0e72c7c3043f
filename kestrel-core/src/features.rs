//! Feature extraction for classification
//!
//! Records are reduced to a short text (source specific), then to a sparse
//! hashed bag of unigrams and bigrams.

use regex::Regex;
use scraper::{node::Node, Html};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::LazyLock;

use crate::{Source, FEATURE_DIM};

static TOKEN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\w+").unwrap());

/// Sparse, L2-normalised feature vector over `FEATURE_DIM` hashed buckets
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    /// `(bucket, weight)` pairs sorted by bucket, no duplicates
    entries: Vec<(u32, f64)>,
}

impl FeatureVector {
    /// Build from `(bucket, weight)` pairs; duplicate buckets are summed.
    pub fn from_pairs(pairs: impl IntoIterator<Item = (u32, f64)>) -> Self {
        let mut merged: BTreeMap<u32, f64> = BTreeMap::new();
        for (bucket, weight) in pairs {
            *merged.entry(bucket).or_insert(0.0) += weight;
        }
        Self {
            entries: merged.into_iter().collect(),
        }
    }

    pub fn entries(&self) -> &[(u32, f64)] {
        &self.entries
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Scale to unit L2 norm (no-op for the zero vector)
    pub fn normalized(mut self) -> Self {
        let norm = self.entries.iter().map(|(_, w)| w * w).sum::<f64>().sqrt();
        if norm > 0.0 {
            for (_, w) in &mut self.entries {
                *w /= norm;
            }
        }
        self
    }
}

/// Turns a record payload into a feature vector
pub trait FeatureExtractor: Send + Sync {
    fn extract(&self, source: Source, response: &Value) -> FeatureVector;
}

/// Default extractor: source text, hashed unigrams and bigrams
#[derive(Debug, Clone, Copy, Default)]
pub struct TextFeatures;

impl FeatureExtractor for TextFeatures {
    fn extract(&self, source: Source, response: &Value) -> FeatureVector {
        hash_features(&extract_text(source, response))
    }
}

/// Pull the classifiable text out of a source payload
pub fn extract_text(source: Source, response: &Value) -> String {
    let fields: &[&str] = match source {
        Source::MuckrockFoia => &["title", "requested_docs"],
    };

    let parts: Vec<String> = fields
        .iter()
        .filter_map(|field| response.get(*field).and_then(Value::as_str))
        .map(strip_html)
        .filter(|text| !text.is_empty())
        .collect();

    parts.join(" ")
}

/// Hash a text into unigram and bigram term frequencies
pub fn hash_features(text: &str) -> FeatureVector {
    let lowered = text.to_lowercase();
    let tokens: Vec<&str> = TOKEN_RE.find_iter(&lowered).map(|m| m.as_str()).collect();

    let unigrams = tokens.iter().map(|t| (bucket(t.as_bytes()), 1.0));
    let bigrams = tokens.windows(2).map(|pair| {
        let joined = format!("{} {}", pair[0], pair[1]);
        (bucket(joined.as_bytes()), 1.0)
    });

    FeatureVector::from_pairs(unigrams.chain(bigrams)).normalized()
}

fn bucket(bytes: &[u8]) -> u32 {
    (fnv1a(bytes) % u64::from(FEATURE_DIM)) as u32
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut h: u64 = 0xcbf29ce484222325;
    for &b in bytes {
        h ^= u64::from(b);
        h = h.wrapping_mul(0x100000001b3);
    }
    h
}

/// Keep only the text nodes of an HTML fragment, skipping script/style
fn strip_html(fragment: &str) -> String {
    if !fragment.contains('<') {
        return normalize_whitespace(fragment);
    }

    let document = Html::parse_fragment(fragment);
    let mut parts = Vec::new();

    for node_ref in document.root_element().descendants() {
        if let Node::Text(text) = node_ref.value() {
            let in_excluded = node_ref.ancestors().any(|ancestor| {
                ancestor
                    .value()
                    .as_element()
                    .map(|el| matches!(el.name(), "script" | "style"))
                    .unwrap_or(false)
            });
            let trimmed = text.trim();
            if !in_excluded && !trimmed.is_empty() {
                parts.push(trimmed.to_string());
            }
        }
    }

    normalize_whitespace(&parts.join(" "))
}

fn normalize_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_extract_text_muckrock() {
        let response = json!({
            "id": 1,
            "title": "Police   body camera contracts",
            "requested_docs": "<p>All <b>contracts</b> with vendors</p><script>x()</script>",
            "status": "done",
        });

        let text = extract_text(Source::MuckrockFoia, &response);
        assert_eq!(text, "Police body camera contracts All contracts with vendors");
    }

    #[test]
    fn test_extract_text_missing_fields() {
        let text = extract_text(Source::MuckrockFoia, &json!({"id": 1, "title": null}));
        assert!(text.is_empty());
        assert!(hash_features(&text).is_empty());
    }

    #[test]
    fn test_hash_features_normalized() {
        let features = hash_features("Purchase orders and purchase contracts");
        let norm: f64 = features.entries().iter().map(|(_, w)| w * w).sum();
        assert!((norm - 1.0).abs() < 1e-9);
        assert!(features.entries().iter().all(|(b, _)| *b < FEATURE_DIM));
        assert!(features.entries().windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn test_hash_features_case_insensitive() {
        assert_eq!(hash_features("Invoice Records"), hash_features("invoice records"));
    }

    #[test]
    fn test_from_pairs_merges_duplicates() {
        let v = FeatureVector::from_pairs([(3, 1.0), (1, 2.0), (3, 0.5)]);
        assert_eq!(v.entries(), &[(1, 2.0), (3, 1.5)]);
    }
}
