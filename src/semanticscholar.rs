//! Semantic Scholar API Client
//!
//! Looks up single papers including their reference and citation lists.
//!
//! API Details:
//! - Paper endpoint: GET /v1/paper/{id}, where id is a DOI or a paper ID
//! - `include_unknown_references=true` also lists references that could not
//!   be resolved to a paper
//! - Rate limit: roughly one request per second without API key, so callers
//!   sleep between requests

use crate::error::{Result, SokError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::time::Duration;
use tracing::{debug, warn};

/// Semantic Scholar API base URL
const SS_API_BASE: &str = "https://api.semanticscholar.org/v1";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperAuthor {
    #[serde(rename = "authorId", default, skip_serializing_if = "Option::is_none")]
    pub author_id: Option<String>,
    #[serde(default)]
    pub name: String,
}

/// A reference or citation entry of a paper
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaperRef {
    #[serde(rename = "paperId", default, skip_serializing_if = "Option::is_none")]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<u16>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub venue: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub doi: Option<String>,
    #[serde(default)]
    pub authors: Vec<PaperAuthor>,
}

impl PaperRef {
    /// Paper ID, or for unresolved entries a SHA-256 digest of the entry.
    ///
    /// The digest is computed over the JSON with sorted keys, so it is stable
    /// across runs.
    pub fn identifier(&self) -> String {
        if let Some(paper_id) = &self.paper_id {
            return paper_id.clone();
        }
        // serde_json::Value maps keep keys sorted.
        let canonical = serde_json::to_value(self)
            .and_then(|value| serde_json::to_string(&value))
            .unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        digest.iter().map(|b| format!("{b:02x}")).collect()
    }

    /// DOI, treating the literal `None` some entries carry as missing
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref().filter(|d| !d.is_empty() && *d != "None")
    }
}

/// A paper with its reference and citation lists
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Paper {
    #[serde(rename = "paperId", default)]
    pub paper_id: Option<String>,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub year: Option<u16>,
    #[serde(default)]
    pub venue: Option<String>,
    #[serde(default)]
    pub doi: Option<String>,
    #[serde(rename = "abstract", default)]
    pub abstract_text: Option<String>,
    #[serde(default)]
    pub authors: Vec<PaperAuthor>,
    #[serde(default)]
    pub references: Vec<PaperRef>,
    #[serde(default)]
    pub citations: Vec<PaperRef>,
}

impl Paper {
    pub fn doi(&self) -> Option<&str> {
        self.doi.as_deref().filter(|d| !d.is_empty() && *d != "None")
    }
}

/// Access to Semantic Scholar, implemented over HTTP by
/// [`SemanticScholarClient`].
#[async_trait]
pub trait SemanticScholarApi: Send + Sync {
    async fn paper(&self, identifier: &str, include_unknown_references: bool) -> Result<Paper>;
}

pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl SemanticScholarClient {
    pub fn new(api_key: Option<String>) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("sokman/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SokError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: SS_API_BASE.to_string(),
            api_key,
        })
    }

    fn paper_url(&self, identifier: &str) -> String {
        // DOIs contain slashes, which the endpoint expects verbatim.
        let identifier = urlencoding::encode(identifier.trim()).replace("%2F", "/");
        format!("{}/paper/{}", self.base_url, identifier)
    }
}

#[async_trait]
impl SemanticScholarApi for SemanticScholarClient {
    async fn paper(&self, identifier: &str, include_unknown_references: bool) -> Result<Paper> {
        let url = self.paper_url(identifier);
        debug!(url = %url, include_unknown_references, "Semantic Scholar request");

        let mut request = self.client.get(&url);
        if include_unknown_references {
            request = request.query(&[("include_unknown_references", "true")]);
        }
        if let Some(key) = &self.api_key {
            request = request.header("x-api-key", key);
        }

        let response = request.send().await?;
        let status = response.status();

        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            warn!(retry_after, "Semantic Scholar rate limit hit");
            return Err(SokError::RateLimited(retry_after));
        }
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), error = %error_text, "API error");
            return Err(SokError::Api {
                code: status.as_u16(),
                message: format!("Semantic Scholar API error for {}: {} - {}", identifier, status, error_text),
            });
        }

        response.json().await.map_err(|e| {
            SokError::Parse(format!("Failed to parse Semantic Scholar response: {}", e))
        })
    }
}
