//! Records stored in the SoK database.

use crate::error::{Result, SokError};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

static PAPER_ID_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-f0-9]{40}$").expect("Invalid paper ID regex"));

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tag {
    pub id: i64,
    pub name: String,
    /// Classification criteria shown to whoever assigns the tag
    #[serde(default)]
    pub criteria: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExclusionCriterion {
    pub id: i64,
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// Where a publication was found (e.g. `DBLP`)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Source {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchTerm {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Publication {
    pub id: i64,
    pub cite_key: String,
    pub title: String,
    pub year: u16,
    pub venue: Option<String>,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    /// `None` when unknown
    pub peer_reviewed: Option<bool>,
    pub classified: bool,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
    pub doi: Option<String>,
    /// Master publication this one is a variant (e.g. preprint) of
    pub variant_of: Option<i64>,
}

impl Publication {
    pub fn page_count(&self) -> Option<i64> {
        match (self.first_page, self.last_page) {
            (Some(first), Some(last)) => Some(1 + i64::from(last) - i64::from(first)),
            _ => None,
        }
    }
}

impl fmt::Display for Publication {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.cite_key)
    }
}

/// Values for inserting a publication.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NewPublication {
    pub cite_key: String,
    pub title: String,
    pub year: u16,
    pub venue: Option<String>,
    pub abstract_text: Option<String>,
    pub peer_reviewed: Option<bool>,
    pub first_page: Option<u32>,
    pub last_page: Option<u32>,
    pub doi: Option<String>,
}

/// Semantic Scholar paper ID attached to a publication
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SemanticScholarId {
    pub id: i64,
    pub paper_id: String,
    pub publication_id: i64,
}

/// Semantic Scholar paper IDs are 40 lower-case hex characters.
pub fn validate_paper_id(paper_id: &str) -> Result<()> {
    if PAPER_ID_REGEX.is_match(paper_id) {
        Ok(())
    } else {
        Err(SokError::Validation(format!(
            "invalid Semantic Scholar paper ID: {paper_id}"
        )))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationAuthor {
    pub publication_id: i64,
    pub author_id: i64,
    pub position: u16,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationTag {
    pub publication_id: i64,
    pub tag_id: i64,
    pub comment: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationSource {
    pub publication_id: i64,
    pub source_id: i64,
    pub search_term_id: i64,
}

/// `publication` cites `reference`; `identifier` is the label in the
/// reference list (e.g. `[12]`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationReference {
    pub publication_id: i64,
    pub reference_id: i64,
    pub identifier: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicationExclusion {
    pub publication_id: i64,
    pub criterion_id: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TagImplication {
    pub tag_id: i64,
    pub implied_id: i64,
}

/// Mapping stage of a publication.
///
/// A relevant publication without any stage is shown as `-`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    /// Has at least one exclusion criterion
    Excluded,
    /// Found directly by a search term
    Primary,
    /// Referenced by a primary publication (backward snowballing)
    Secondary,
    /// References a primary publication (forward snowballing)
    Tertiary,
}

impl Stage {
    pub fn as_str(self) -> &'static str {
        match self {
            Stage::Excluded => "excluded",
            Stage::Primary => "primary",
            Stage::Secondary => "secondary",
            Stage::Tertiary => "tertiary",
        }
    }

    pub fn label(stage: Option<Stage>) -> &'static str {
        stage.map(Stage::as_str).unwrap_or("-")
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Stage selector for listings; `None` selects publications without a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageFilter(pub Option<Stage>);

impl FromStr for StageFilter {
    type Err = SokError;

    fn from_str(s: &str) -> Result<Self> {
        let stage = match s.trim().to_lowercase().as_str() {
            "excluded" => Some(Stage::Excluded),
            "primary" => Some(Stage::Primary),
            "secondary" => Some(Stage::Secondary),
            "tertiary" => Some(Stage::Tertiary),
            "-" | "none" => None,
            other => {
                return Err(SokError::Validation(format!("unknown stage: {other}")));
            }
        };
        Ok(StageFilter(stage))
    }
}

/// `yes`/`no` flag as used by listings.
pub fn parse_yes_no(s: &str) -> Result<bool> {
    match s.trim().to_lowercase().as_str() {
        "yes" | "y" | "true" => Ok(true),
        "no" | "n" | "false" => Ok(false),
        other => Err(SokError::Validation(format!("expected yes or no, got: {other}"))),
    }
}

/// Peer review status; `unknown` maps to `None`.
pub fn parse_review_status(s: &str) -> Result<Option<bool>> {
    match s.trim().to_lowercase().as_str() {
        "unknown" | "-" => Ok(None),
        other => parse_yes_no(other).map(Some),
    }
}

/// Publication with the annotations shown in listings
#[derive(Debug, Clone, Serialize)]
pub struct PublicationSummary {
    #[serde(flatten)]
    pub publication: Publication,
    /// Relevant publications citing this one
    pub citation_count: i64,
    /// Relevant publications this one references
    pub references_count: i64,
    pub page_count: Option<i64>,
    pub stage: Option<Stage>,
}

/// Name plus publication counts, used for authors, tags, terms, sources and criteria
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NamedCount {
    pub id: i64,
    pub name: String,
    pub publications: i64,
    /// Relevant publications (authors) or transitive publications (tags)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub secondary: Option<i64>,
}
