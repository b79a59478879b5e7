//! DBLP API client.
//!
//! Endpoints used:
//! - Search: `GET /search/publ/api?q=..&f=..&h=..&c=0&format=json` (max 1000 hits per request)
//! - Record: `GET /rec/{key}.xml`
//! - BibTeX: `GET /rec/{key}.bib?param=0`
//!
//! Cite keys are stored with a `DBLP:` prefix; DBLP keys themselves
//! (e.g. `conf/ccs/EgeleBFK13`) never carry it.

use crate::dump;
use crate::error::{Result, SokError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;

/// DBLP base URL
pub const DBLP_BASE: &str = "https://dblp.org";

/// Prefix marking cite keys that come from DBLP
pub const CITE_KEY_PREFIX: &str = "DBLP:";

/// Upper bound DBLP accepts for `h`
pub const MAX_HITS: usize = 1000;

pub fn strip_cite_key_prefix(value: &str) -> &str {
    value.strip_prefix(CITE_KEY_PREFIX).unwrap_or(value)
}

/// Drop a single trailing period, which DBLP appends to every title.
pub fn clean_title(value: &str) -> String {
    value.strip_suffix('.').unwrap_or(value).to_string()
}

/// Keep the digits of the part after the last `:` (`16:10` -> 10).
fn strip_issue_from_page(value: &str) -> Result<u32> {
    let digits: String = value
        .rsplit(':')
        .next()
        .unwrap_or(value)
        .chars()
        .filter(char::is_ascii_digit)
        .collect();
    digits
        .parse()
        .map_err(|_| SokError::Parse(format!("Unexpected page value: {value}")))
}

/// Parse a DBLP `pages` value into `(first, last)`.
///
/// Observed shapes: `1-10`, `1`, `16:1-16:10`, `I-X, 1-66`, `186-`.
pub fn parse_pages(raw: &str) -> Result<(u32, u32)> {
    let last_range = raw.rsplit(", ").next().unwrap_or(raw);
    let parts: Vec<&str> = last_range.split('-').collect();
    match parts.as_slice() {
        [first, last] if !last.is_empty() => {
            Ok((strip_issue_from_page(first)?, strip_issue_from_page(last)?))
        }
        [page, ""] | [page] => {
            let page = strip_issue_from_page(page)?;
            Ok((page, page))
        }
        _ => Err(SokError::Parse(format!("Unexpected value for <pages>: {raw}"))),
    }
}

/// A DBLP record, as returned by the search API, the record API or the dump.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationResult {
    /// DBLP key without prefix
    pub key: String,
    pub title: String,
    pub year: u16,
    pub venue: Option<String>,
    pub pages: Option<(u32, u32)>,
    pub authors: Vec<String>,
    /// Electronic edition links (`ee`)
    pub urls: Vec<String>,
}

impl PublicationResult {
    pub fn cite_key(&self) -> String {
        format!("{CITE_KEY_PREFIX}{}", self.key)
    }

    /// DOI taken from the first `doi.org` link.
    pub fn doi(&self) -> Option<String> {
        self.urls.iter().find_map(|raw| {
            let url = Url::parse(raw).ok()?;
            if !url.host_str()?.ends_with("doi.org") {
                return None;
            }
            let path = url.path().trim_start_matches('/');
            let doi = urlencoding::decode(path).ok()?.into_owned();
            (!doi.is_empty()).then_some(doi)
        })
    }

    /// Heuristic: arXiv preprints are not peer reviewed; conference papers,
    /// journal articles and dissertations are. Everything else is unknown.
    pub fn is_peer_reviewed(&self) -> Option<bool> {
        if self.key.starts_with("journals/corr/abs-") {
            return Some(false);
        }
        if ["phd/", "conf/", "journals/"]
            .iter()
            .any(|prefix| self.key.starts_with(prefix))
        {
            return Some(true);
        }
        None
    }

    pub fn first_page(&self) -> Option<u32> {
        self.pages.map(|(first, _)| first)
    }

    pub fn last_page(&self) -> Option<u32> {
        self.pages.map(|(_, last)| last)
    }
}

/// One page of search results
#[derive(Debug, Clone, Default)]
pub struct SearchPage {
    /// The query as normalized by DBLP
    pub query: String,
    pub results: Vec<PublicationResult>,
    pub total: usize,
}

/// Access to DBLP, implemented over HTTP by [`DblpClient`].
#[async_trait]
pub trait DblpApi: Send + Sync {
    /// Fetch up to `limit` hits starting at `offset`.
    async fn search_page(&self, term: &str, offset: usize, limit: usize) -> Result<SearchPage>;

    /// Fetch a single record by DBLP key (without prefix).
    async fn record(&self, key: &str) -> Result<PublicationResult>;

    /// BibTeX entry for a DBLP key (without prefix).
    async fn bibtex(&self, key: &str) -> Result<String>;
}

/// Search DBLP for `term`.
///
/// Returns the first `limit` hits; with `all` set, keeps requesting further
/// pages of `limit` hits until DBLP's total is reached.
pub async fn search(api: &dyn DblpApi, term: &str, limit: usize, all: bool) -> Result<SearchPage> {
    if !(1..=MAX_HITS).contains(&limit) {
        return Err(SokError::Validation(format!(
            "Invalid value for 'limit': {limit}; allowed range is 1 - {MAX_HITS}"
        )));
    }

    let mut outcome = api.search_page(term, 0, limit).await?;
    info!(
        query = %outcome.query,
        received = outcome.results.len(),
        total = outcome.total,
        "DBLP search"
    );

    while all && outcome.results.len() < outcome.total {
        let offset = outcome.results.len();
        let page = api.search_page(term, offset, limit).await?;
        if page.results.is_empty() {
            warn!(offset, total = outcome.total, "DBLP returned an empty page, stopping");
            break;
        }
        debug!(offset, received = page.results.len(), "Fetched further DBLP page");
        outcome.results.extend(page.results);
    }

    let mut seen = BTreeSet::new();
    outcome.results.retain(|r| seen.insert(r.key.clone()));
    Ok(outcome)
}

/// HTTP client for the DBLP API
pub struct DblpClient {
    client: Client,
    base_url: String,
}

impl DblpClient {
    pub fn new() -> Result<Self> {
        Self::with_base_url(DBLP_BASE)
    }

    pub fn with_base_url(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .user_agent(concat!("sokman/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SokError::Config(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    fn record_url(&self, key: &str, extension: &str) -> String {
        let path: Vec<String> = key
            .split('/')
            .map(|segment| urlencoding::encode(segment).into_owned())
            .collect();
        format!("{}/rec/{}.{}", self.base_url, path.join("/"), extension)
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response> {
        debug!(url = %url, "DBLP request");
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(SokError::RateLimited(retry_after));
        }
        if !status.is_success() {
            return Err(SokError::Api {
                code: status.as_u16(),
                message: format!("DBLP request {} failed: {}", url, status),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl DblpApi for DblpClient {
    async fn search_page(&self, term: &str, offset: usize, limit: usize) -> Result<SearchPage> {
        let url = format!(
            "{}/search/publ/api?q={}&f={}&h={}&c=0&format=json",
            self.base_url,
            urlencoding::encode(term),
            offset,
            limit
        );
        let body: SearchResponse = self.get(&url).await?.json().await.map_err(|e| {
            SokError::Parse(format!("Failed to parse DBLP search response: {}", e))
        })?;
        Ok(body.into_page())
    }

    async fn record(&self, key: &str) -> Result<PublicationResult> {
        let url = self.record_url(key, "xml");
        let xml = self.get(&url).await?.text().await?;
        let wanted = BTreeSet::from([key.to_string()]);
        let mut records = dump::parse_records(xml.as_bytes(), &wanted)?;
        match records.len() {
            1 => Ok(records.remove(0)),
            n => Err(SokError::Parse(format!(
                "expected exactly one DBLP record for {key}, got {n}"
            ))),
        }
    }

    async fn bibtex(&self, key: &str) -> Result<String> {
        let url = format!("{}?param=0", self.record_url(key, "bib"));
        let response = self.get(&url).await?;
        // DBLP answers unknown keys with an HTML error page and status 200.
        let is_bibtex = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("application/x-bibtex"));
        if !is_bibtex {
            return Err(SokError::Parse(format!("{url} did not return BibTeX")));
        }
        Ok(response.text().await?)
    }
}

// === DBLP search response types ===

#[derive(Debug, Deserialize)]
struct SearchResponse {
    result: SearchResult,
}

#[derive(Debug, Deserialize)]
struct SearchResult {
    #[serde(default)]
    query: String,
    hits: Hits,
}

#[derive(Debug, Deserialize)]
struct Hits {
    #[serde(rename = "@total")]
    total: Count,
    #[serde(default)]
    hit: Vec<Hit>,
}

/// DBLP reports counts as strings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Count {
    Number(usize),
    Text(String),
}

impl Count {
    fn value(&self) -> usize {
        match self {
            Count::Number(n) => *n,
            Count::Text(s) => s.trim().parse().unwrap_or(0),
        }
    }
}

#[derive(Debug, Deserialize)]
struct Hit {
    info: HitInfo,
}

#[derive(Debug, Deserialize)]
struct HitInfo {
    key: String,
    title: StringOrSeq,
    year: Count,
    #[serde(default)]
    venue: Option<StringOrSeq>,
    #[serde(default)]
    pages: Option<String>,
    #[serde(default)]
    authors: Option<HitAuthors>,
    #[serde(default)]
    ee: Option<StringOrSeq>,
    #[serde(default)]
    doi: Option<String>,
}

#[derive(Debug, Deserialize)]
struct HitAuthors {
    #[serde(default)]
    author: OneOrMany<HitAuthor>,
}

/// A single author is not a list.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum OneOrMany<T> {
    One(T),
    Many(Vec<T>),
}

impl<T> Default for OneOrMany<T> {
    fn default() -> Self {
        OneOrMany::Many(Vec::new())
    }
}

impl<T> OneOrMany<T> {
    fn into_vec(self) -> Vec<T> {
        match self {
            OneOrMany::One(value) => vec![value],
            OneOrMany::Many(values) => values,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum HitAuthor {
    Name(String),
    Entry { text: String },
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum StringOrSeq {
    String(String),
    Seq(Vec<String>),
}

impl StringOrSeq {
    fn into_vec(self) -> Vec<String> {
        match self {
            StringOrSeq::String(s) => vec![s],
            StringOrSeq::Seq(list) => list,
        }
    }
}

impl SearchResponse {
    fn into_page(self) -> SearchPage {
        let total = self.result.hits.total.value();
        let results = self
            .result
            .hits
            .hit
            .into_iter()
            .map(|hit| hit.info.into_result())
            .collect();
        SearchPage {
            query: self.result.query,
            results,
            total,
        }
    }
}

impl HitInfo {
    fn into_result(self) -> PublicationResult {
        let pages = self.pages.as_deref().and_then(|raw| match parse_pages(raw) {
            Ok(pages) => Some(pages),
            Err(e) => {
                warn!(key = %self.key, error = %e, "Ignoring pages");
                None
            }
        });

        let authors = self
            .authors
            .map(|a| a.author.into_vec())
            .unwrap_or_default()
            .into_iter()
            .map(|author| match author {
                HitAuthor::Name(name) => dump::unescape(&name),
                HitAuthor::Entry { text } => dump::unescape(&text),
            })
            .collect();

        let mut urls = self.ee.map(StringOrSeq::into_vec).unwrap_or_default();
        if let Some(doi) = self.doi {
            let doi_url = format!("https://doi.org/{doi}");
            if !urls.contains(&doi_url) {
                urls.push(doi_url);
            }
        }

        let year = u16::try_from(self.year.value()).unwrap_or_default();
        PublicationResult {
            title: clean_title(&dump::unescape(&self.title.into_vec().join(" "))),
            year,
            venue: self.venue.map(|v| v.into_vec().join(", ")),
            pages,
            authors,
            urls,
            key: self.key,
        }
    }
}
