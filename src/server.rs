//! JSON admin API for reviewing and classifying publications.

use crate::commands::cite::cite;
use crate::commands::mergetags::resolve_tag;
use crate::db::{Database, PublicationFilter};
use crate::error::SokError;
use crate::models::{
    parse_review_status, Author, ExclusionCriterion, NamedCount, Publication, PublicationSummary,
    Stage, StageFilter,
};
use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Deserializer, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::Mutex;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

pub type SharedDb = Arc<Mutex<Database>>;

/// Error body `{"error": "..."}` with a status derived from the error kind
#[derive(Debug)]
pub struct ApiError(SokError);

impl From<SokError> for ApiError {
    fn from(e: SokError) -> Self {
        Self(e)
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SokError::NotFound(_) => StatusCode::NOT_FOUND,
            SokError::Validation(_) | SokError::Parse(_) => StatusCode::BAD_REQUEST,
            e if e.is_integrity() => StatusCode::CONFLICT,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "Request failed");
        }
        (status, Json(ErrorBody { error: self.0.to_string() })).into_response()
    }
}

type ApiResult<T> = std::result::Result<Json<T>, ApiError>;

pub fn router(db: Database) -> Router {
    let state: SharedDb = Arc::new(Mutex::new(db));
    Router::new()
        .route("/health", get(health_handler))
        .route("/api/publications", get(list_publications))
        .route(
            "/api/publications/{id}",
            get(publication_detail).patch(update_publication),
        )
        .route("/api/publications/{id}/tags", post(tag_publication))
        .route("/api/publications/{id}/exclusions", post(exclude_publication))
        .route("/api/authors", get(authors))
        .route("/api/tags", get(tags))
        .route("/api/search-terms", get(search_terms))
        .route("/api/sources", get(sources))
        .route("/api/exclusion-criteria", get(exclusion_criteria))
        .route("/api/cite", post(cite_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub async fn serve(db: Database, host: &str, port: u16) -> crate::Result<()> {
    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .map_err(|e| SokError::Config(format!("Invalid host:port {host}:{port}: {e}")))?;
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "Admin API listening");
    axum::serve(listener, router(db)).await?;
    Ok(())
}

async fn health_handler() -> &'static str {
    "OK"
}

/// Query string of the publication listing
#[derive(Debug, Default, Deserialize)]
pub struct ListQuery {
    stage: Option<String>,
    relevant: Option<bool>,
    classified: Option<bool>,
    /// `yes`, `no` or `unknown`
    peer_reviewed: Option<String>,
    variant: Option<bool>,
    q: Option<String>,
    min_citations: Option<i64>,
}

impl ListQuery {
    fn filter(self) -> crate::Result<PublicationFilter> {
        Ok(PublicationFilter {
            stage: self.stage.as_deref().map(str::parse::<StageFilter>).transpose()?,
            relevant: self.relevant,
            classified: self.classified,
            peer_reviewed: self
                .peer_reviewed
                .as_deref()
                .map(parse_review_status)
                .transpose()?,
            variant: self.variant,
            query: self.q.filter(|q| !q.is_empty()),
            min_citations: self.min_citations,
        })
    }
}

async fn list_publications(
    State(db): State<SharedDb>,
    Query(query): Query<ListQuery>,
) -> ApiResult<Vec<PublicationSummary>> {
    let filter = query.filter()?;
    let db = db.lock().await;
    Ok(Json(db.summaries(&filter)?))
}

#[derive(Debug, Serialize)]
struct RelatedPublication {
    id: i64,
    cite_key: String,
    title: String,
    identifier: Option<String>,
}

impl From<(Publication, Option<String>)> for RelatedPublication {
    fn from((p, identifier): (Publication, Option<String>)) -> Self {
        Self { id: p.id, cite_key: p.cite_key, title: p.title, identifier }
    }
}

#[derive(Debug, Serialize)]
struct SourceRef {
    source: String,
    search_term: String,
}

#[derive(Debug, Serialize)]
struct TagRef {
    id: i64,
    name: String,
    comment: Option<String>,
}

#[derive(Debug, Serialize)]
struct PublicationDetail {
    #[serde(flatten)]
    publication: Publication,
    stage: Option<Stage>,
    /// Peer reviewed itself or cited, transitively, by a peer-reviewed publication
    peer_reviewed_or_cited: bool,
    authors: Vec<Author>,
    references: Vec<RelatedPublication>,
    citations: Vec<RelatedPublication>,
    sources: Vec<SourceRef>,
    tags: Vec<TagRef>,
    exclusions: Vec<ExclusionCriterion>,
    semantic_scholar: Vec<String>,
}

fn detail(db: &Database, id: i64) -> crate::Result<PublicationDetail> {
    let publication = db.publication(id)?;
    Ok(PublicationDetail {
        stage: db.stage(id)?,
        peer_reviewed_or_cited: db.is_peer_reviewed_or_cited_by_peer_reviewed(id)?,
        authors: db.publication_authors(id)?,
        references: db.references(id)?.into_iter().map(Into::into).collect(),
        citations: db.citations(id)?.into_iter().map(Into::into).collect(),
        sources: db
            .publication_sources(id)?
            .into_iter()
            .map(|(source, term)| SourceRef { source: source.name, search_term: term.name })
            .collect(),
        tags: db
            .publication_tags(id)?
            .into_iter()
            .map(|(tag, comment)| TagRef { id: tag.id, name: tag.name, comment })
            .collect(),
        exclusions: db.exclusions(id)?,
        semantic_scholar: db.paper_ids(id)?,
        publication,
    })
}

async fn publication_detail(
    State(db): State<SharedDb>,
    Path(id): Path<i64>,
) -> ApiResult<PublicationDetail> {
    let db = db.lock().await;
    Ok(Json(detail(&db, id)?))
}

/// Distinguishes an absent field from an explicit `null`.
fn nullable<'de, D, T>(deserializer: D) -> std::result::Result<Option<Option<T>>, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de>,
{
    Option::<T>::deserialize(deserializer).map(Some)
}

/// Editable fields; absent fields stay unchanged, `null` clears.
#[derive(Debug, Default, Deserialize)]
pub struct PublicationPatch {
    classified: Option<bool>,
    #[serde(default, deserialize_with = "nullable")]
    peer_reviewed: Option<Option<bool>>,
    #[serde(default, deserialize_with = "nullable")]
    doi: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    venue: Option<Option<String>>,
    #[serde(default, rename = "abstract", deserialize_with = "nullable")]
    abstract_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable")]
    variant_of: Option<Option<i64>>,
}

async fn update_publication(
    State(db): State<SharedDb>,
    Path(id): Path<i64>,
    Json(patch): Json<PublicationPatch>,
) -> ApiResult<PublicationDetail> {
    let db = db.lock().await;
    let mut publication = db.publication(id)?;
    if let Some(classified) = patch.classified {
        publication.classified = classified;
    }
    if let Some(peer_reviewed) = patch.peer_reviewed {
        publication.peer_reviewed = peer_reviewed;
    }
    if let Some(doi) = patch.doi {
        publication.doi = doi;
    }
    if let Some(venue) = patch.venue {
        publication.venue = venue;
    }
    if let Some(abstract_text) = patch.abstract_text {
        publication.abstract_text = abstract_text;
    }
    if let Some(variant_of) = patch.variant_of {
        if let Some(master) = variant_of {
            db.publication(master).map_err(|_| {
                SokError::Validation(format!("variant_of: no publication #{master}"))
            })?;
        }
        publication.variant_of = variant_of;
    }
    db.update_publication(&publication)?;
    info!(publication = %publication, "Updated publication");
    Ok(Json(detail(&db, id)?))
}

#[derive(Debug, Deserialize)]
pub struct TagRequest {
    /// Tag id, name or unique name fragment
    tag: String,
    comment: Option<String>,
}

async fn tag_publication(
    State(db): State<SharedDb>,
    Path(id): Path<i64>,
    Json(req): Json<TagRequest>,
) -> ApiResult<PublicationDetail> {
    let db = db.lock().await;
    let publication = db.publication(id)?;
    let tag = resolve_tag(&db, &req.tag)?;
    let comment = req.comment.as_deref().filter(|c| !c.is_empty());
    if !db.tag_publication(publication.id, tag.id, comment)? {
        db.set_publication_tag_comment(publication.id, tag.id, comment)?;
    }
    info!(publication = %publication, tag = %tag.name, "Tagged publication");
    Ok(Json(detail(&db, id)?))
}

#[derive(Debug, Deserialize)]
pub struct ExclusionRequest {
    criterion: String,
    /// Replaces the criterion's description when given
    description: Option<String>,
}

async fn exclude_publication(
    State(db): State<SharedDb>,
    Path(id): Path<i64>,
    Json(req): Json<ExclusionRequest>,
) -> ApiResult<PublicationDetail> {
    let db = db.lock().await;
    let publication = db.publication(id)?;
    let criterion = req.criterion.trim();
    if criterion.is_empty() {
        return Err(SokError::Validation("criterion must not be empty".to_string()).into());
    }
    db.atomic(|| {
        let (criterion, _) = db.get_or_create_exclusion_criterion(criterion)?;
        if let Some(description) = req.description.as_deref() {
            db.set_exclusion_criterion_description(criterion.id, description.trim())?;
        }
        db.exclude(publication.id, criterion.id)
    })?;
    info!(publication = %publication, criterion, "Excluded publication");
    Ok(Json(detail(&db, id)?))
}

async fn authors(State(db): State<SharedDb>) -> ApiResult<Vec<NamedCount>> {
    Ok(Json(db.lock().await.author_counts()?))
}

async fn tags(State(db): State<SharedDb>) -> ApiResult<Vec<NamedCount>> {
    Ok(Json(db.lock().await.tag_counts()?))
}

async fn search_terms(State(db): State<SharedDb>) -> ApiResult<Vec<NamedCount>> {
    Ok(Json(db.lock().await.search_term_counts()?))
}

async fn sources(State(db): State<SharedDb>) -> ApiResult<Vec<NamedCount>> {
    Ok(Json(db.lock().await.source_counts()?))
}

async fn exclusion_criteria(State(db): State<SharedDb>) -> ApiResult<Vec<NamedCount>> {
    Ok(Json(db.lock().await.exclusion_criterion_counts()?))
}

#[derive(Debug, Deserialize)]
pub struct CiteRequest {
    ids: Vec<i64>,
}

#[derive(Debug, Serialize)]
pub struct CiteResponse {
    cite: String,
}

async fn cite_handler(
    State(db): State<SharedDb>,
    Json(req): Json<CiteRequest>,
) -> ApiResult<CiteResponse> {
    let db = db.lock().await;
    Ok(Json(CiteResponse { cite: cite(&db, &req.ids)? }))
}
