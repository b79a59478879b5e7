//! SQLite persistence for publications, authors, tags and their relations.

use crate::error::{OptionExt, Result, SokError};
use crate::models::{
    validate_paper_id, Author, ExclusionCriterion, NamedCount, NewPublication, Publication,
    PublicationReference, PublicationSummary, PublicationTag, SearchTerm, Source, Stage,
    StageFilter, Tag,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::{BTreeSet, HashSet, VecDeque};
use std::path::Path;
use tracing::debug;

/// Name of the source used for DBLP search results
pub const SOURCE_DBLP: &str = "DBLP";
/// Name of the source used for snowballed publications
pub const SOURCE_SEMANTIC_SCHOLAR: &str = "Semantic Scholar";

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS authors (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS tags (
    id       INTEGER PRIMARY KEY AUTOINCREMENT,
    name     TEXT NOT NULL UNIQUE,
    criteria TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS tag_implications (
    tag_id     INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    implied_id INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    PRIMARY KEY (tag_id, implied_id),
    CHECK (tag_id <> implied_id)
);

CREATE TABLE IF NOT EXISTS exclusion_criteria (
    id          INTEGER PRIMARY KEY AUTOINCREMENT,
    name        TEXT NOT NULL UNIQUE,
    description TEXT NOT NULL DEFAULT ''
);

CREATE TABLE IF NOT EXISTS sources (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS search_terms (
    id   INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL UNIQUE
);

CREATE TABLE IF NOT EXISTS publications (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    cite_key      TEXT NOT NULL UNIQUE,
    title         TEXT NOT NULL,
    year          INTEGER NOT NULL CHECK (year >= 0),
    venue         TEXT,
    abstract      TEXT,
    peer_reviewed INTEGER,
    classified    INTEGER NOT NULL DEFAULT 0,
    first_page    INTEGER CHECK (first_page >= 0),
    last_page     INTEGER CHECK (last_page >= 0),
    doi           TEXT UNIQUE,
    variant_of    INTEGER REFERENCES publications(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS semantic_scholar (
    id             INTEGER PRIMARY KEY AUTOINCREMENT,
    paper_id       TEXT NOT NULL UNIQUE CHECK (length(paper_id) = 40),
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE
);

CREATE TABLE IF NOT EXISTS publication_authors (
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    author_id      INTEGER NOT NULL REFERENCES authors(id) ON DELETE CASCADE,
    position       INTEGER NOT NULL CHECK (position >= 0),
    UNIQUE (publication_id, author_id),
    UNIQUE (publication_id, position)
);

CREATE TABLE IF NOT EXISTS publication_tags (
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    tag_id         INTEGER NOT NULL REFERENCES tags(id) ON DELETE CASCADE,
    comment        TEXT,
    UNIQUE (publication_id, tag_id)
);

CREATE TABLE IF NOT EXISTS publication_sources (
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    source_id      INTEGER NOT NULL REFERENCES sources(id) ON DELETE CASCADE,
    search_term_id INTEGER NOT NULL REFERENCES search_terms(id) ON DELETE CASCADE,
    UNIQUE (publication_id, source_id, search_term_id)
);

CREATE TABLE IF NOT EXISTS publication_references (
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    reference_id   INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    identifier     TEXT,
    UNIQUE (publication_id, reference_id),
    UNIQUE (publication_id, identifier)
);

CREATE TABLE IF NOT EXISTS publication_exclusions (
    publication_id INTEGER NOT NULL REFERENCES publications(id) ON DELETE CASCADE,
    criterion_id   INTEGER NOT NULL REFERENCES exclusion_criteria(id) ON DELETE CASCADE,
    PRIMARY KEY (publication_id, criterion_id)
);

CREATE INDEX IF NOT EXISTS idx_references_reference ON publication_references(reference_id);
CREATE INDEX IF NOT EXISTS idx_sources_search_term ON publication_sources(search_term_id);
CREATE INDEX IF NOT EXISTS idx_semantic_scholar_publication ON semantic_scholar(publication_id);
";

const PUBLICATION_COLUMNS: &str = "p.id, p.cite_key, p.title, p.year, p.venue, p.abstract, \
     p.peer_reviewed, p.classified, p.first_page, p.last_page, p.doi, p.variant_of";

/// `p` is relevant: it has no exclusion criteria.
const RELEVANT_P: &str =
    "NOT EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = p.id)";

/// Stage of publication `p` as `excluded`, `primary`, `secondary`, `tertiary` or NULL.
const STAGE_P: &str = "
CASE
    WHEN EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = p.id)
        THEN 'excluded'
    WHEN EXISTS (SELECT 1 FROM publication_sources s WHERE s.publication_id = p.id)
        THEN 'primary'
    WHEN EXISTS (
        SELECT 1 FROM publication_references r
        WHERE r.reference_id = p.id
          AND NOT EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = r.publication_id)
          AND EXISTS (SELECT 1 FROM publication_sources s WHERE s.publication_id = r.publication_id)
    ) THEN 'secondary'
    WHEN EXISTS (
        SELECT 1 FROM publication_references r
        WHERE r.publication_id = p.id
          AND NOT EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = r.reference_id)
          AND EXISTS (SELECT 1 FROM publication_sources s WHERE s.publication_id = r.reference_id)
    ) THEN 'tertiary'
    ELSE NULL
END";

const CITATION_COUNT_P: &str = "(
    SELECT COUNT(DISTINCT r.publication_id) FROM publication_references r
    WHERE r.reference_id = p.id
      AND NOT EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = r.publication_id)
)";

const REFERENCES_COUNT_P: &str = "(
    SELECT COUNT(DISTINCT r.reference_id) FROM publication_references r
    WHERE r.publication_id = p.id
      AND NOT EXISTS (SELECT 1 FROM publication_exclusions e WHERE e.publication_id = r.reference_id)
)";

fn publication_from_row(row: &Row<'_>) -> rusqlite::Result<Publication> {
    Ok(Publication {
        id: row.get(0)?,
        cite_key: row.get(1)?,
        title: row.get(2)?,
        year: row.get(3)?,
        venue: row.get(4)?,
        abstract_text: row.get(5)?,
        peer_reviewed: row.get(6)?,
        classified: row.get(7)?,
        first_page: row.get(8)?,
        last_page: row.get(9)?,
        doi: row.get(10)?,
        variant_of: row.get(11)?,
    })
}

fn stage_from_sql(value: Option<String>) -> Option<Stage> {
    match value.as_deref() {
        Some("excluded") => Some(Stage::Excluded),
        Some("primary") => Some(Stage::Primary),
        Some("secondary") => Some(Stage::Secondary),
        Some("tertiary") => Some(Stage::Tertiary),
        _ => None,
    }
}

fn tag_from_row(row: &Row<'_>) -> rusqlite::Result<Tag> {
    Ok(Tag {
        id: row.get(0)?,
        name: row.get(1)?,
        criteria: row.get(2)?,
    })
}

/// Empty DOIs are stored as NULL so the unique constraint only covers real values.
pub(crate) fn normalize_doi(doi: Option<&str>) -> Option<String> {
    doi.map(str::trim)
        .filter(|d| !d.is_empty() && *d != "None")
        .map(str::to_string)
}

/// Selection applied to publication listings
#[derive(Debug, Clone, Default)]
pub struct PublicationFilter {
    pub stage: Option<StageFilter>,
    pub relevant: Option<bool>,
    pub classified: Option<bool>,
    /// `Some(None)` selects publications whose review status is unknown
    pub peer_reviewed: Option<Option<bool>>,
    pub variant: Option<bool>,
    /// Case-insensitive substring of cite key, DOI or title
    pub query: Option<String>,
    pub min_citations: Option<i64>,
}

impl PublicationFilter {
    fn matches(&self, summary: &PublicationSummary) -> bool {
        let p = &summary.publication;
        if let Some(StageFilter(stage)) = self.stage {
            if summary.stage != stage {
                return false;
            }
        }
        if let Some(relevant) = self.relevant {
            if relevant == (summary.stage == Some(Stage::Excluded)) {
                return false;
            }
        }
        if let Some(classified) = self.classified {
            if p.classified != classified {
                return false;
            }
        }
        if let Some(peer_reviewed) = self.peer_reviewed {
            if p.peer_reviewed != peer_reviewed {
                return false;
            }
        }
        if let Some(variant) = self.variant {
            if p.variant_of.is_some() != variant {
                return false;
            }
        }
        if let Some(min) = self.min_citations {
            if summary.citation_count < min {
                return false;
            }
        }
        if let Some(query) = self.query.as_deref().map(str::to_lowercase) {
            let hit = p.cite_key.to_lowercase().contains(&query)
                || p.title.to_lowercase().contains(&query)
                || p
                    .doi
                    .as_deref()
                    .is_some_and(|d| d.to_lowercase().contains(&query));
            if !hit {
                return false;
            }
        }
        true
    }
}

/// SQLite-backed store.
///
/// Holds a single connection; callers that share it across tasks wrap the
/// whole `Database` in a mutex so that [`Database::atomic`] sections are not
/// interleaved with foreign statements.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (or create) the database at `path` and ensure all tables exist.
    pub fn open(path: &Path) -> Result<Self> {
        debug!(path = %path.display(), "Opening database");
        Self::init(Connection::open(path)?)
    }

    /// Ephemeral database, used by tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA busy_timeout = 5000;
             PRAGMA foreign_keys = ON;",
        )?;
        conn.execute_batch(SCHEMA)?;
        conn.execute(
            "INSERT OR IGNORE INTO sources (name) VALUES (?1), (?2)",
            params![SOURCE_DBLP, SOURCE_SEMANTIC_SCHOLAR],
        )?;
        Ok(Self { conn })
    }

    pub(crate) fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Run `f` inside a savepoint; all of its writes are rolled back if it fails.
    ///
    /// Savepoints nest, so atomic sections may call each other.
    pub fn atomic<T>(&self, f: impl FnOnce() -> Result<T>) -> Result<T> {
        self.conn.execute_batch("SAVEPOINT sokman_atomic")?;
        match f() {
            Ok(value) => {
                self.conn.execute_batch("RELEASE sokman_atomic")?;
                Ok(value)
            }
            Err(e) => {
                self.conn
                    .execute_batch("ROLLBACK TO sokman_atomic; RELEASE sokman_atomic")?;
                Err(e)
            }
        }
    }

    // ---------------------------------------------------------------------
    // Named entities
    // ---------------------------------------------------------------------

    fn get_or_create_named(&self, table: &str, name: &str) -> Result<(i64, bool)> {
        let existing: Option<i64> = self
            .conn
            .query_row(
                &format!("SELECT id FROM {table} WHERE name = ?1"),
                params![name],
                |row| row.get(0),
            )
            .optional()?;
        if let Some(id) = existing {
            return Ok((id, false));
        }
        if name.trim().is_empty() {
            return Err(SokError::Validation(format!("{table}: name must not be empty")));
        }
        self.conn
            .execute(&format!("INSERT INTO {table} (name) VALUES (?1)"), params![name])?;
        Ok((self.conn.last_insert_rowid(), true))
    }

    pub fn get_or_create_author(&self, name: &str) -> Result<(Author, bool)> {
        let (id, created) = self.get_or_create_named("authors", name)?;
        Ok((Author { id, name: name.to_string() }, created))
    }

    pub fn get_or_create_search_term(&self, name: &str) -> Result<(SearchTerm, bool)> {
        let (id, created) = self.get_or_create_named("search_terms", name)?;
        Ok((SearchTerm { id, name: name.to_string() }, created))
    }

    pub fn source_by_name(&self, name: &str) -> Result<Source> {
        self.conn
            .query_row(
                "SELECT id, name FROM sources WHERE name = ?1",
                params![name],
                |row| Ok(Source { id: row.get(0)?, name: row.get(1)? }),
            )
            .optional()?
            .ok_or_not_found(|| format!("source '{name}'"))
    }

    pub fn search_terms(&self) -> Result<Vec<SearchTerm>> {
        let mut stmt = self.conn.prepare("SELECT id, name FROM search_terms ORDER BY id")?;
        let terms = stmt
            .query_map([], |row| Ok(SearchTerm { id: row.get(0)?, name: row.get(1)? }))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(terms)
    }

    pub fn get_or_create_exclusion_criterion(
        &self,
        name: &str,
    ) -> Result<(ExclusionCriterion, bool)> {
        let (id, created) = self.get_or_create_named("exclusion_criteria", name)?;
        let description = self.conn.query_row(
            "SELECT description FROM exclusion_criteria WHERE id = ?1",
            params![id],
            |row| row.get(0),
        )?;
        Ok((ExclusionCriterion { id, name: name.to_string(), description }, created))
    }

    pub fn set_exclusion_criterion_description(&self, id: i64, description: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE exclusion_criteria SET description = ?2 WHERE id = ?1",
            params![id, description],
        )?;
        Ok(())
    }

    // ---------------------------------------------------------------------
    // Publications
    // ---------------------------------------------------------------------

    pub fn insert_publication(&self, new: &NewPublication) -> Result<Publication> {
        if new.cite_key.trim().is_empty() {
            return Err(SokError::Validation("cite key must not be empty".to_string()));
        }
        if let (Some(first), Some(last)) = (new.first_page, new.last_page) {
            if last < first {
                return Err(SokError::Validation(format!(
                    "{}: last page {last} precedes first page {first}",
                    new.cite_key
                )));
            }
        }
        self.conn.execute(
            "INSERT INTO publications
                (cite_key, title, year, venue, abstract, peer_reviewed, first_page, last_page, doi)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                new.cite_key,
                new.title,
                new.year,
                new.venue,
                new.abstract_text,
                new.peer_reviewed,
                new.first_page,
                new.last_page,
                normalize_doi(new.doi.as_deref()),
            ],
        )?;
        self.publication(self.conn.last_insert_rowid())
    }

    /// Return the publication with `new.cite_key`, inserting it if unknown.
    pub fn get_or_create_publication(&self, new: &NewPublication) -> Result<(Publication, bool)> {
        if let Some(existing) = self.publication_by_cite_key(&new.cite_key)? {
            return Ok((existing, false));
        }
        Ok((self.insert_publication(new)?, true))
    }

    pub fn publication(&self, id: i64) -> Result<Publication> {
        self.conn
            .query_row(
                &format!("SELECT {PUBLICATION_COLUMNS} FROM publications p WHERE p.id = ?1"),
                params![id],
                publication_from_row,
            )
            .optional()?
            .ok_or_not_found(|| format!("publication #{id}"))
    }

    pub fn publication_by_cite_key(&self, cite_key: &str) -> Result<Option<Publication>> {
        Ok(self
            .conn
            .query_row(
                &format!("SELECT {PUBLICATION_COLUMNS} FROM publications p WHERE p.cite_key = ?1"),
                params![cite_key],
                publication_from_row,
            )
            .optional()?)
    }

    /// DOIs compare case-insensitively.
    pub fn publication_by_doi(&self, doi: &str) -> Result<Option<Publication>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {PUBLICATION_COLUMNS} FROM publications p WHERE lower(p.doi) = lower(?1)"
                ),
                params![doi.trim()],
                publication_from_row,
            )
            .optional()?)
    }

    fn publications_where(&self, condition: &str) -> Result<Vec<Publication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publications p WHERE {condition} ORDER BY p.id"
        ))?;
        let publications = stmt
            .query_map([], publication_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(publications)
    }

    pub fn publications(&self) -> Result<Vec<Publication>> {
        self.publications_where("1")
    }

    /// Publications that are a variant of another one
    pub fn variants(&self) -> Result<Vec<Publication>> {
        self.publications_where("p.variant_of IS NOT NULL")
    }

    pub fn publications_missing_doi(&self) -> Result<Vec<Publication>> {
        self.publications_where("p.doi IS NULL")
    }

    /// Publications with a DOI but without a Semantic Scholar paper ID
    pub fn publications_missing_paper_id(&self) -> Result<Vec<Publication>> {
        self.publications_where(
            "p.doi IS NOT NULL
             AND NOT EXISTS (SELECT 1 FROM semantic_scholar s WHERE s.publication_id = p.id)",
        )
    }

    /// Relevant publications with at least one Semantic Scholar paper ID
    pub fn publications_for_snowballing(&self) -> Result<Vec<Publication>> {
        self.publications_where(&format!(
            "{RELEVANT_P}
             AND EXISTS (SELECT 1 FROM semantic_scholar s WHERE s.publication_id = p.id)"
        ))
    }

    pub fn cite_keys_with_prefix(&self, prefix: &str) -> Result<BTreeSet<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT DISTINCT cite_key FROM publications WHERE substr(cite_key, 1, length(?1)) = ?1")?;
        let keys = stmt
            .query_map(params![prefix], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(keys)
    }

    /// Write back the editable fields of `publication`.
    pub fn update_publication(&self, publication: &Publication) -> Result<()> {
        if publication.variant_of == Some(publication.id) {
            return Err(SokError::Validation(format!(
                "{publication} cannot be a variant of itself"
            )));
        }
        let updated = self.conn.execute(
            "UPDATE publications SET
                title = ?2, year = ?3, venue = ?4, abstract = ?5, peer_reviewed = ?6,
                classified = ?7, first_page = ?8, last_page = ?9, doi = ?10, variant_of = ?11
             WHERE id = ?1",
            params![
                publication.id,
                publication.title,
                publication.year,
                publication.venue,
                publication.abstract_text,
                publication.peer_reviewed,
                publication.classified,
                publication.first_page,
                publication.last_page,
                normalize_doi(publication.doi.as_deref()),
                publication.variant_of,
            ],
        )?;
        if updated == 0 {
            return Err(SokError::NotFound(format!("publication #{}", publication.id)));
        }
        Ok(())
    }

    pub fn set_doi(&self, publication_id: i64, doi: &str) -> Result<()> {
        let mut publication = self.publication(publication_id)?;
        publication.doi = Some(doi.to_string());
        self.update_publication(&publication)
    }

    pub fn is_relevant(&self, publication_id: i64) -> Result<bool> {
        let excluded: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM publication_exclusions WHERE publication_id = ?1)",
            params![publication_id],
            |row| row.get(0),
        )?;
        Ok(!excluded)
    }

    pub fn stage(&self, publication_id: i64) -> Result<Option<Stage>> {
        let value: Option<String> = self
            .conn
            .query_row(
                &format!("SELECT {STAGE_P} FROM publications p WHERE p.id = ?1"),
                params![publication_id],
                |row| row.get(0),
            )
            .optional()?
            .ok_or_not_found(|| format!("publication #{publication_id}"))?;
        Ok(stage_from_sql(value))
    }

    /// All publications with counts and stage, narrowed by `filter`.
    pub fn summaries(&self, filter: &PublicationFilter) -> Result<Vec<PublicationSummary>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLUMNS}, {CITATION_COUNT_P}, {REFERENCES_COUNT_P}, {STAGE_P}
             FROM publications p ORDER BY p.id"
        ))?;
        let rows = stmt.query_map([], |row| {
            let publication = publication_from_row(row)?;
            let page_count = publication.page_count();
            Ok(PublicationSummary {
                publication,
                citation_count: row.get(12)?,
                references_count: row.get(13)?,
                page_count,
                stage: stage_from_sql(row.get(14)?),
            })
        })?;

        let mut summaries = Vec::new();
        for row in rows {
            let summary = row?;
            if filter.matches(&summary) {
                summaries.push(summary);
            }
        }
        Ok(summaries)
    }

    /// True if the publication, or any publication citing it (transitively), is peer reviewed.
    pub fn is_peer_reviewed_or_cited_by_peer_reviewed(&self, publication_id: i64) -> Result<bool> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([publication_id]);
        while let Some(id) = queue.pop_front() {
            if !visited.insert(id) {
                continue;
            }
            if self.publication(id)?.peer_reviewed == Some(true) {
                return Ok(true);
            }
            queue.extend(self.citations(id)?.into_iter().map(|(p, _)| p.id));
        }
        Ok(false)
    }

    // ---------------------------------------------------------------------
    // Authors
    // ---------------------------------------------------------------------

    /// Assign `author` at `position`. Returns `false` if exactly this assignment exists.
    pub fn assign_author(&self, publication_id: i64, author_id: i64, position: u16) -> Result<bool> {
        let exists: bool = self.conn.query_row(
            "SELECT EXISTS (SELECT 1 FROM publication_authors
                WHERE publication_id = ?1 AND author_id = ?2 AND position = ?3)",
            params![publication_id, author_id, position],
            |row| row.get(0),
        )?;
        if exists {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO publication_authors (publication_id, author_id, position) VALUES (?1, ?2, ?3)",
            params![publication_id, author_id, position],
        )?;
        Ok(true)
    }

    /// Authors of a publication in byline order
    pub fn publication_authors(&self, publication_id: i64) -> Result<Vec<Author>> {
        let mut stmt = self.conn.prepare(
            "SELECT a.id, a.name FROM publication_authors pa
             JOIN authors a ON a.id = pa.author_id
             WHERE pa.publication_id = ?1 ORDER BY pa.position",
        )?;
        let authors = stmt
            .query_map(params![publication_id], |row| {
                Ok(Author { id: row.get(0)?, name: row.get(1)? })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(authors)
    }

    // ---------------------------------------------------------------------
    // Sources
    // ---------------------------------------------------------------------

    pub fn add_publication_source(
        &self,
        publication_id: i64,
        source_id: i64,
        search_term_id: i64,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO publication_sources (publication_id, source_id, search_term_id)
             VALUES (?1, ?2, ?3)",
            params![publication_id, source_id, search_term_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn publication_sources(&self, publication_id: i64) -> Result<Vec<(Source, SearchTerm)>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.id, s.name, t.id, t.name FROM publication_sources ps
             JOIN sources s ON s.id = ps.source_id
             JOIN search_terms t ON t.id = ps.search_term_id
             WHERE ps.publication_id = ?1 ORDER BY s.name, t.name",
        )?;
        let rows = stmt
            .query_map(params![publication_id], |row| {
                Ok((
                    Source { id: row.get(0)?, name: row.get(1)? },
                    SearchTerm { id: row.get(2)?, name: row.get(3)? },
                ))
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Cite keys of relevant publications found with `search_term_id`
    pub fn relevant_cite_keys_for_search_term(&self, search_term_id: i64) -> Result<BTreeSet<String>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT DISTINCT p.cite_key FROM publications p
             JOIN publication_sources ps ON ps.publication_id = p.id
             WHERE ps.search_term_id = ?1 AND {RELEVANT_P}"
        ))?;
        let keys = stmt
            .query_map(params![search_term_id], |row| row.get(0))?
            .collect::<rusqlite::Result<BTreeSet<String>>>()?;
        Ok(keys)
    }

    // ---------------------------------------------------------------------
    // References
    // ---------------------------------------------------------------------

    /// Record that `publication_id` cites `reference_id`. Returns `false` if already known.
    pub fn add_reference(
        &self,
        publication_id: i64,
        reference_id: i64,
        identifier: Option<&str>,
    ) -> Result<bool> {
        if self.reference(publication_id, reference_id)?.is_some() {
            return Ok(false);
        }
        self.conn.execute(
            "INSERT INTO publication_references (publication_id, reference_id, identifier)
             VALUES (?1, ?2, ?3)",
            params![publication_id, reference_id, identifier],
        )?;
        Ok(true)
    }

    pub fn reference(
        &self,
        publication_id: i64,
        reference_id: i64,
    ) -> Result<Option<PublicationReference>> {
        Ok(self
            .conn
            .query_row(
                "SELECT publication_id, reference_id, identifier FROM publication_references
                 WHERE publication_id = ?1 AND reference_id = ?2",
                params![publication_id, reference_id],
                |row| {
                    Ok(PublicationReference {
                        publication_id: row.get(0)?,
                        reference_id: row.get(1)?,
                        identifier: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    /// Edges pointing at `reference_id`
    pub fn references_to(&self, reference_id: i64) -> Result<Vec<PublicationReference>> {
        let mut stmt = self.conn.prepare(
            "SELECT publication_id, reference_id, identifier FROM publication_references
             WHERE reference_id = ?1 ORDER BY publication_id",
        )?;
        let rows = stmt
            .query_map(params![reference_id], |row| {
                Ok(PublicationReference {
                    publication_id: row.get(0)?,
                    reference_id: row.get(1)?,
                    identifier: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    fn linked_publications(
        &self,
        join_column: &str,
        filter_column: &str,
        id: i64,
        relevant_only: bool,
    ) -> Result<Vec<(Publication, Option<String>)>> {
        let relevant = if relevant_only {
            format!("AND {RELEVANT_P}")
        } else {
            String::new()
        };
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLUMNS}, r.identifier FROM publication_references r
             JOIN publications p ON p.id = r.{join_column}
             WHERE r.{filter_column} = ?1 {relevant}
             ORDER BY r.identifier, p.id"
        ))?;
        let rows = stmt
            .query_map(params![id], |row| Ok((publication_from_row(row)?, row.get(12)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Publications cited by `publication_id`, with their reference identifiers
    pub fn references(&self, publication_id: i64) -> Result<Vec<(Publication, Option<String>)>> {
        self.linked_publications("reference_id", "publication_id", publication_id, false)
    }

    /// Publications citing `publication_id`
    pub fn citations(&self, publication_id: i64) -> Result<Vec<(Publication, Option<String>)>> {
        self.linked_publications("publication_id", "reference_id", publication_id, false)
    }

    pub fn relevant_references(&self, publication_id: i64) -> Result<Vec<Publication>> {
        Ok(self
            .linked_publications("reference_id", "publication_id", publication_id, true)?
            .into_iter()
            .map(|(p, _)| p)
            .collect())
    }

    // ---------------------------------------------------------------------
    // Semantic Scholar
    // ---------------------------------------------------------------------

    /// Attach a paper ID. Returns `false` if this exact pair is known; a paper ID
    /// attached to a different publication is an integrity error.
    pub fn add_semantic_scholar(&self, paper_id: &str, publication_id: i64) -> Result<bool> {
        validate_paper_id(paper_id)?;
        let existing: Option<i64> = self
            .conn
            .query_row(
                "SELECT publication_id FROM semantic_scholar WHERE paper_id = ?1",
                params![paper_id],
                |row| row.get(0),
            )
            .optional()?;
        match existing {
            Some(id) if id == publication_id => Ok(false),
            Some(id) => Err(SokError::Validation(format!(
                "paper ID {paper_id} already belongs to publication #{id}"
            ))),
            None => {
                self.conn.execute(
                    "INSERT INTO semantic_scholar (paper_id, publication_id) VALUES (?1, ?2)",
                    params![paper_id, publication_id],
                )?;
                Ok(true)
            }
        }
    }

    pub fn publication_by_paper_id(&self, paper_id: &str) -> Result<Option<Publication>> {
        Ok(self
            .conn
            .query_row(
                &format!(
                    "SELECT {PUBLICATION_COLUMNS} FROM semantic_scholar s
                     JOIN publications p ON p.id = s.publication_id
                     WHERE s.paper_id = ?1"
                ),
                params![paper_id],
                publication_from_row,
            )
            .optional()?)
    }

    pub fn paper_ids(&self, publication_id: i64) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT paper_id FROM semantic_scholar WHERE publication_id = ?1 ORDER BY id")?;
        let ids = stmt
            .query_map(params![publication_id], |row| row.get(0))?
            .collect::<rusqlite::Result<Vec<String>>>()?;
        Ok(ids)
    }

    // ---------------------------------------------------------------------
    // Exclusion criteria
    // ---------------------------------------------------------------------

    pub fn exclude(&self, publication_id: i64, criterion_id: i64) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO publication_exclusions (publication_id, criterion_id) VALUES (?1, ?2)",
            params![publication_id, criterion_id],
        )?;
        Ok(inserted > 0)
    }

    pub fn exclusions(&self, publication_id: i64) -> Result<Vec<ExclusionCriterion>> {
        let mut stmt = self.conn.prepare(
            "SELECT c.id, c.name, c.description FROM publication_exclusions pe
             JOIN exclusion_criteria c ON c.id = pe.criterion_id
             WHERE pe.publication_id = ?1 ORDER BY c.name",
        )?;
        let rows = stmt
            .query_map(params![publication_id], |row| {
                Ok(ExclusionCriterion {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ---------------------------------------------------------------------
    // Tags
    // ---------------------------------------------------------------------

    pub fn get_or_create_tag(&self, name: &str) -> Result<(Tag, bool)> {
        let (id, created) = self.get_or_create_named("tags", name)?;
        Ok((self.tag(id)?, created))
    }

    pub fn tag(&self, id: i64) -> Result<Tag> {
        self.conn
            .query_row(
                "SELECT id, name, criteria FROM tags WHERE id = ?1",
                params![id],
                tag_from_row,
            )
            .optional()?
            .ok_or_not_found(|| format!("tag #{id}"))
    }

    pub fn tag_by_name(&self, name: &str) -> Result<Option<Tag>> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, name, criteria FROM tags WHERE name = ?1",
                params![name],
                tag_from_row,
            )
            .optional()?)
    }

    /// Tags whose name contains `needle`, ignoring case
    pub fn tags_containing(&self, needle: &str) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, criteria FROM tags
             WHERE instr(lower(name), lower(?1)) > 0 ORDER BY name",
        )?;
        let tags = stmt
            .query_map(params![needle], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    pub fn set_tag_criteria(&self, tag_id: i64, criteria: &str) -> Result<()> {
        self.conn.execute(
            "UPDATE tags SET criteria = ?2 WHERE id = ?1",
            params![tag_id, criteria],
        )?;
        Ok(())
    }

    /// Record that `tag_id` implies `implied_id`.
    pub fn add_tag_implication(&self, tag_id: i64, implied_id: i64) -> Result<bool> {
        if tag_id == implied_id {
            return Err(SokError::Validation("a tag cannot imply itself".to_string()));
        }
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO tag_implications (tag_id, implied_id) VALUES (?1, ?2)",
            params![tag_id, implied_id],
        )?;
        Ok(inserted > 0)
    }

    fn tags_via(&self, sql: &str, id: i64) -> Result<Vec<Tag>> {
        let mut stmt = self.conn.prepare(sql)?;
        let tags = stmt
            .query_map(params![id], tag_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Tags that imply `tag_id` (its children in the tag DAG)
    pub fn implied_by(&self, tag_id: i64) -> Result<Vec<Tag>> {
        self.tags_via(
            "SELECT t.id, t.name, t.criteria FROM tag_implications i
             JOIN tags t ON t.id = i.tag_id WHERE i.implied_id = ?1 ORDER BY t.name",
            tag_id,
        )
    }

    /// Tags implied by `tag_id`
    pub fn implies(&self, tag_id: i64) -> Result<Vec<Tag>> {
        self.tags_via(
            "SELECT t.id, t.name, t.criteria FROM tag_implications i
             JOIN tags t ON t.id = i.implied_id WHERE i.tag_id = ?1 ORDER BY t.name",
            tag_id,
        )
    }

    /// Tag a publication. Returns `false` if already tagged.
    pub fn tag_publication(
        &self,
        publication_id: i64,
        tag_id: i64,
        comment: Option<&str>,
    ) -> Result<bool> {
        let inserted = self.conn.execute(
            "INSERT OR IGNORE INTO publication_tags (publication_id, tag_id, comment) VALUES (?1, ?2, ?3)",
            params![publication_id, tag_id, comment],
        )?;
        Ok(inserted > 0)
    }

    pub fn publication_tag(&self, publication_id: i64, tag_id: i64) -> Result<Option<PublicationTag>> {
        Ok(self
            .conn
            .query_row(
                "SELECT publication_id, tag_id, comment FROM publication_tags
                 WHERE publication_id = ?1 AND tag_id = ?2",
                params![publication_id, tag_id],
                |row| {
                    Ok(PublicationTag {
                        publication_id: row.get(0)?,
                        tag_id: row.get(1)?,
                        comment: row.get(2)?,
                    })
                },
            )
            .optional()?)
    }

    pub fn set_publication_tag_comment(
        &self,
        publication_id: i64,
        tag_id: i64,
        comment: Option<&str>,
    ) -> Result<()> {
        self.conn.execute(
            "UPDATE publication_tags SET comment = ?3 WHERE publication_id = ?1 AND tag_id = ?2",
            params![publication_id, tag_id, comment],
        )?;
        Ok(())
    }

    pub fn untag_publication(&self, publication_id: i64, tag_id: i64) -> Result<bool> {
        let deleted = self.conn.execute(
            "DELETE FROM publication_tags WHERE publication_id = ?1 AND tag_id = ?2",
            params![publication_id, tag_id],
        )?;
        Ok(deleted > 0)
    }

    /// Publications carrying `tag_id` directly
    pub fn tagged_publications(&self, tag_id: i64) -> Result<Vec<Publication>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {PUBLICATION_COLUMNS} FROM publication_tags pt
             JOIN publications p ON p.id = pt.publication_id
             WHERE pt.tag_id = ?1 ORDER BY p.id"
        ))?;
        let publications = stmt
            .query_map(params![tag_id], publication_from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(publications)
    }

    pub fn publication_tags(&self, publication_id: i64) -> Result<Vec<(Tag, Option<String>)>> {
        let mut stmt = self.conn.prepare(
            "SELECT t.id, t.name, t.criteria, pt.comment FROM publication_tags pt
             JOIN tags t ON t.id = pt.tag_id
             WHERE pt.publication_id = ?1 ORDER BY t.name",
        )?;
        let tags = stmt
            .query_map(params![publication_id], |row| Ok((tag_from_row(row)?, row.get(3)?)))?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(tags)
    }

    /// Relevant publications tagged with `tag_id` or with any tag implying it,
    /// transitively. Implication cycles are visited once.
    pub fn transitive_publications(&self, tag_id: i64) -> Result<BTreeSet<i64>> {
        let mut visited = HashSet::new();
        let mut stack = vec![tag_id];
        let mut publications = BTreeSet::new();
        let mut stmt = self.conn.prepare(&format!(
            "SELECT p.id FROM publication_tags pt
             JOIN publications p ON p.id = pt.publication_id
             WHERE pt.tag_id = ?1 AND {RELEVANT_P}"
        ))?;
        while let Some(id) = stack.pop() {
            if !visited.insert(id) {
                continue;
            }
            for publication_id in stmt.query_map(params![id], |row| row.get::<_, i64>(0))? {
                publications.insert(publication_id?);
            }
            stack.extend(self.implied_by(id)?.into_iter().map(|t| t.id));
        }
        Ok(publications)
    }

    // ---------------------------------------------------------------------
    // Listings with counts
    // ---------------------------------------------------------------------

    fn named_counts(&self, sql: &str) -> Result<Vec<NamedCount>> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map([], |row| {
                Ok(NamedCount {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    publications: row.get(2)?,
                    secondary: row.get(3)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    /// Authors with their publication and relevant publication counts
    pub fn author_counts(&self) -> Result<Vec<NamedCount>> {
        self.named_counts(&format!(
            "SELECT a.id, a.name,
                (SELECT COUNT(DISTINCT pa.publication_id) FROM publication_authors pa WHERE pa.author_id = a.id),
                (SELECT COUNT(DISTINCT p.id) FROM publication_authors pa
                    JOIN publications p ON p.id = pa.publication_id
                    WHERE pa.author_id = a.id AND {RELEVANT_P})
             FROM authors a ORDER BY a.name"
        ))
    }

    /// Tags with direct and transitive publication counts
    pub fn tag_counts(&self) -> Result<Vec<NamedCount>> {
        let mut rows = self.named_counts(
            "SELECT t.id, t.name,
                (SELECT COUNT(*) FROM publication_tags pt WHERE pt.tag_id = t.id),
                NULL
             FROM tags t ORDER BY t.name",
        )?;
        for row in &mut rows {
            row.secondary = Some(self.transitive_publications(row.id)?.len() as i64);
        }
        Ok(rows)
    }

    /// Search terms with the number of relevant publications they found
    pub fn search_term_counts(&self) -> Result<Vec<NamedCount>> {
        self.named_counts(&format!(
            "SELECT t.id, t.name,
                (SELECT COUNT(DISTINCT p.id) FROM publication_sources ps
                    JOIN publications p ON p.id = ps.publication_id
                    WHERE ps.search_term_id = t.id AND {RELEVANT_P}),
                NULL
             FROM search_terms t ORDER BY t.name"
        ))
    }

    pub fn source_counts(&self) -> Result<Vec<NamedCount>> {
        self.named_counts(
            "SELECT s.id, s.name,
                (SELECT COUNT(DISTINCT ps.publication_id) FROM publication_sources ps WHERE ps.source_id = s.id),
                NULL
             FROM sources s ORDER BY s.name",
        )
    }

    pub fn exclusion_criterion_counts(&self) -> Result<Vec<NamedCount>> {
        self.named_counts(
            "SELECT c.id, c.name,
                (SELECT COUNT(*) FROM publication_exclusions pe WHERE pe.criterion_id = c.id),
                NULL
             FROM exclusion_criteria c ORDER BY c.name",
        )
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn new_publication(cite_key: &str) -> NewPublication {
        NewPublication {
            cite_key: cite_key.to_string(),
            title: format!("Title of {cite_key}"),
            year: 2020,
            ..Default::default()
        }
    }

    pub(crate) fn insert(db: &Database, cite_key: &str) -> Publication {
        db.insert_publication(&new_publication(cite_key)).unwrap()
    }

    /// Attach the DBLP source with a search term, making the publication primary.
    pub(crate) fn make_primary(db: &Database, publication_id: i64) {
        let source = db.source_by_name(SOURCE_DBLP).unwrap();
        let (term, _) = db.get_or_create_search_term("crypto misuse").unwrap();
        db.add_publication_source(publication_id, source.id, term.id).unwrap();
    }

    pub(crate) fn exclude(db: &Database, publication_id: i64) {
        let (criterion, _) = db.get_or_create_exclusion_criterion("off topic").unwrap();
        db.exclude(publication_id, criterion.id).unwrap();
    }

    #[test]
    fn open_creates_tables_and_seeds_sources() {
        let db = Database::open_in_memory().unwrap();
        let tables: i64 = db
            .conn()
            .query_row(
                "SELECT COUNT(*) FROM sqlite_master WHERE type = 'table' AND name LIKE 'publication%'",
                [],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(tables, 6);
        assert_eq!(db.source_by_name(SOURCE_DBLP).unwrap().name, "DBLP");
        assert!(db.source_by_name("Google Scholar").is_err());
    }

    #[test]
    fn open_is_idempotent_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sok.sqlite3");
        {
            let db = Database::open(&path).unwrap();
            insert(&db, "DBLP:conf/a/A20");
        }
        let db = Database::open(&path).unwrap();
        assert!(db.publication_by_cite_key("DBLP:conf/a/A20").unwrap().is_some());
        assert_eq!(db.source_counts().unwrap().len(), 2);
    }

    #[test]
    fn get_or_create_author_no_duplicates() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db.get_or_create_author("Alice Example").unwrap();
        assert!(created);
        let (second, created) = db.get_or_create_author("Alice Example").unwrap();
        assert!(!created);
        assert_eq!(first, second);
        assert!(db.get_or_create_author("  ").is_err());
    }

    #[test]
    fn cite_key_and_doi_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_publication("DBLP:conf/a/A20");
        new.doi = Some("10.1/x".to_string());
        db.insert_publication(&new).unwrap();

        let err = db.insert_publication(&new).unwrap_err();
        assert!(err.is_integrity());

        let mut other = new_publication("DBLP:conf/b/B20");
        other.doi = Some("10.1/x".to_string());
        assert!(db.insert_publication(&other).unwrap_err().is_integrity());

        // Empty DOIs do not collide.
        let mut empty_a = new_publication("a");
        empty_a.doi = Some(String::new());
        let mut empty_b = new_publication("b");
        empty_b.doi = Some(String::new());
        assert!(db.insert_publication(&empty_a).unwrap().doi.is_none());
        assert!(db.insert_publication(&empty_b).is_ok());
    }

    #[test]
    fn publication_by_doi_ignores_case() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_publication("k");
        new.doi = Some("10.1145/ABC".to_string());
        let inserted = db.insert_publication(&new).unwrap();
        let found = db.publication_by_doi("10.1145/abc").unwrap().unwrap();
        assert_eq!(found.id, inserted.id);
    }

    #[test]
    fn rejects_inverted_pages() {
        let db = Database::open_in_memory().unwrap();
        let mut new = new_publication("k");
        new.first_page = Some(10);
        new.last_page = Some(5);
        assert!(matches!(db.insert_publication(&new), Err(SokError::Validation(_))));
    }

    #[test]
    fn get_or_create_publication_returns_existing() {
        let db = Database::open_in_memory().unwrap();
        let (first, created) = db.get_or_create_publication(&new_publication("k")).unwrap();
        assert!(created);
        let (second, created) = db.get_or_create_publication(&new_publication("k")).unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }

    #[test]
    fn author_positions_are_unique() {
        let db = Database::open_in_memory().unwrap();
        let p = insert(&db, "k");
        let (alice, _) = db.get_or_create_author("Alice").unwrap();
        let (bob, _) = db.get_or_create_author("Bob").unwrap();

        assert!(db.assign_author(p.id, bob.id, 1).unwrap());
        assert!(db.assign_author(p.id, alice.id, 0).unwrap());
        assert!(!db.assign_author(p.id, alice.id, 0).unwrap());
        assert!(db.assign_author(p.id, alice.id, 2).unwrap_err().is_integrity());

        let names: Vec<String> = db
            .publication_authors(p.id)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(names, vec!["Alice", "Bob"]);
    }

    #[test]
    fn references_and_citations() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "a");
        let b = insert(&db, "b");
        assert!(db.add_reference(a.id, b.id, Some("[1]")).unwrap());
        assert!(!db.add_reference(a.id, b.id, Some("[2]")).unwrap());

        let refs = db.references(a.id).unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].0.id, b.id);
        assert_eq!(refs[0].1.as_deref(), Some("[1]"));
        assert_eq!(db.citations(b.id).unwrap()[0].0.id, a.id);

        exclude(&db, b.id);
        assert!(db.relevant_references(a.id).unwrap().is_empty());
    }

    #[test]
    fn reference_identifier_unique_per_publication() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "a");
        let b = insert(&db, "b");
        let c = insert(&db, "c");
        db.add_reference(a.id, b.id, Some("[1]")).unwrap();
        assert!(db.add_reference(a.id, c.id, Some("[1]")).unwrap_err().is_integrity());
        // NULL identifiers never collide.
        db.add_reference(b.id, a.id, None).unwrap();
        db.add_reference(b.id, c.id, None).unwrap();
    }

    #[test]
    fn stage_covers_all_values() {
        let db = Database::open_in_memory().unwrap();
        let primary = insert(&db, "primary");
        let secondary = insert(&db, "secondary");
        let tertiary = insert(&db, "tertiary");
        let excluded = insert(&db, "excluded");
        let none = insert(&db, "none");

        make_primary(&db, primary.id);
        db.add_reference(primary.id, secondary.id, None).unwrap();
        db.add_reference(tertiary.id, primary.id, None).unwrap();
        make_primary(&db, excluded.id);
        exclude(&db, excluded.id);
        // Linked only to an excluded primary: no stage.
        db.add_reference(excluded.id, none.id, None).unwrap();

        assert_eq!(db.stage(primary.id).unwrap(), Some(Stage::Primary));
        assert_eq!(db.stage(secondary.id).unwrap(), Some(Stage::Secondary));
        assert_eq!(db.stage(tertiary.id).unwrap(), Some(Stage::Tertiary));
        assert_eq!(db.stage(excluded.id).unwrap(), Some(Stage::Excluded));
        assert_eq!(db.stage(none.id).unwrap(), None);
        assert!(matches!(db.stage(999), Err(SokError::NotFound(_))));
    }

    #[test]
    fn summaries_count_relevant_links() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "a");
        let b = insert(&db, "b");
        let c = insert(&db, "c");
        make_primary(&db, a.id);
        db.add_reference(a.id, c.id, None).unwrap();
        db.add_reference(b.id, c.id, None).unwrap();
        exclude(&db, b.id);

        let all = db.summaries(&PublicationFilter::default()).unwrap();
        let c_summary = all.iter().find(|s| s.publication.id == c.id).unwrap();
        assert_eq!(c_summary.citation_count, 1);
        assert_eq!(c_summary.stage, Some(Stage::Secondary));
        let a_summary = all.iter().find(|s| s.publication.id == a.id).unwrap();
        assert_eq!(a_summary.references_count, 1);

        let relevant = db
            .summaries(&PublicationFilter { relevant: Some(true), ..Default::default() })
            .unwrap();
        assert_eq!(relevant.len(), 2);

        let unstaged = db
            .summaries(&PublicationFilter {
                stage: Some(StageFilter(Some(Stage::Excluded))),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(unstaged.len(), 1);
        assert_eq!(unstaged[0].publication.id, b.id);

        let queried = db
            .summaries(&PublicationFilter { query: Some("TITLE OF C".into()), ..Default::default() })
            .unwrap();
        assert_eq!(queried.len(), 1);
    }

    #[test]
    fn atomic_rolls_back_on_error() {
        let db = Database::open_in_memory().unwrap();
        let result: Result<()> = db.atomic(|| {
            insert(&db, "a");
            Err(SokError::Aborted)
        });
        assert!(result.is_err());
        assert!(db.publication_by_cite_key("a").unwrap().is_none());

        db.atomic(|| {
            insert(&db, "b");
            let inner: Result<()> = db.atomic(|| {
                insert(&db, "c");
                Err(SokError::Aborted)
            });
            assert!(inner.is_err());
            Ok(())
        })
        .unwrap();
        assert!(db.publication_by_cite_key("b").unwrap().is_some());
        assert!(db.publication_by_cite_key("c").unwrap().is_none());
    }

    #[test]
    fn semantic_scholar_ids() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "a");
        let b = insert(&db, "b");
        let paper_id = "a".repeat(40);
        assert!(db.add_semantic_scholar(&paper_id, a.id).unwrap());
        assert!(!db.add_semantic_scholar(&paper_id, a.id).unwrap());
        assert!(db.add_semantic_scholar(&paper_id, b.id).is_err());
        assert!(db.add_semantic_scholar("not-an-id", b.id).is_err());
        assert_eq!(db.publication_by_paper_id(&paper_id).unwrap().unwrap().id, a.id);
        assert_eq!(db.publications_for_snowballing().unwrap().len(), 1);
        exclude(&db, a.id);
        assert!(db.publications_for_snowballing().unwrap().is_empty());
    }

    #[test]
    fn transitive_publications_follow_implications_and_stop_on_cycles() {
        let db = Database::open_in_memory().unwrap();
        let (root, _) = db.get_or_create_tag("Misuse").unwrap();
        let (child, _) = db.get_or_create_tag("API Misuse").unwrap();
        let (grandchild, _) = db.get_or_create_tag("Crypto API Misuse").unwrap();
        db.add_tag_implication(child.id, root.id).unwrap();
        db.add_tag_implication(grandchild.id, child.id).unwrap();
        db.add_tag_implication(root.id, grandchild.id).unwrap();

        let a = insert(&db, "a");
        let b = insert(&db, "b");
        let c = insert(&db, "c");
        db.tag_publication(a.id, root.id, None).unwrap();
        db.tag_publication(b.id, grandchild.id, Some("section 3")).unwrap();
        db.tag_publication(c.id, grandchild.id, None).unwrap();
        exclude(&db, c.id);

        let publications = db.transitive_publications(root.id).unwrap();
        assert_eq!(publications, BTreeSet::from([a.id, b.id]));

        let counts = db.tag_counts().unwrap();
        let misuse = counts.iter().find(|t| t.name == "Misuse").unwrap();
        assert_eq!(misuse.publications, 1);
        assert_eq!(misuse.secondary, Some(2));

        assert!(db.add_tag_implication(root.id, root.id).is_err());
    }

    #[test]
    fn peer_review_propagates_through_citations() {
        let db = Database::open_in_memory().unwrap();
        let mut reviewed = new_publication("reviewed");
        reviewed.peer_reviewed = Some(true);
        let reviewed = db.insert_publication(&reviewed).unwrap();
        let middle = insert(&db, "middle");
        let leaf = insert(&db, "leaf");
        let lonely = insert(&db, "lonely");
        db.add_reference(reviewed.id, middle.id, None).unwrap();
        db.add_reference(middle.id, leaf.id, None).unwrap();
        db.add_reference(leaf.id, middle.id, None).unwrap();

        assert!(db.is_peer_reviewed_or_cited_by_peer_reviewed(leaf.id).unwrap());
        assert!(!db.is_peer_reviewed_or_cited_by_peer_reviewed(lonely.id).unwrap());
    }

    #[test]
    fn author_and_search_term_counts() {
        let db = Database::open_in_memory().unwrap();
        let a = insert(&db, "a");
        let b = insert(&db, "b");
        let (alice, _) = db.get_or_create_author("Alice").unwrap();
        db.assign_author(a.id, alice.id, 0).unwrap();
        db.assign_author(b.id, alice.id, 0).unwrap();
        make_primary(&db, a.id);
        make_primary(&db, b.id);
        exclude(&db, b.id);

        let authors = db.author_counts().unwrap();
        assert_eq!(authors[0].publications, 2);
        assert_eq!(authors[0].secondary, Some(1));

        let terms = db.search_term_counts().unwrap();
        assert_eq!(terms[0].publications, 1);
        assert_eq!(
            db.relevant_cite_keys_for_search_term(terms[0].id).unwrap(),
            BTreeSet::from(["a".to_string()])
        );
    }

    #[test]
    fn update_publication_validates_variant() {
        let db = Database::open_in_memory().unwrap();
        let master = insert(&db, "master");
        let mut preprint = insert(&db, "preprint");
        preprint.variant_of = Some(master.id);
        preprint.classified = true;
        db.update_publication(&preprint).unwrap();
        assert_eq!(db.variants().unwrap()[0].id, preprint.id);

        preprint.variant_of = Some(preprint.id);
        assert!(db.update_publication(&preprint).is_err());
    }
}
