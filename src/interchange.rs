//! JSON export and import of the complete dataset.
//!
//! Row ids are kept, so a dump loaded into an empty database reproduces the
//! exported one exactly.

use crate::db::{normalize_doi, Database};
use crate::error::{Result, SokError};
use crate::models::{
    Author, ExclusionCriterion, Publication, PublicationAuthor, PublicationExclusion,
    PublicationReference, PublicationSource, PublicationTag, SearchTerm, SemanticScholarId,
    Source, Tag, TagImplication,
};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, Row};
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::info;

/// Format version written into every dump
pub const DATASET_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dataset {
    pub version: u32,
    pub exported_at: DateTime<Utc>,
    pub authors: Vec<Author>,
    pub tags: Vec<Tag>,
    pub tag_implications: Vec<TagImplication>,
    pub exclusion_criteria: Vec<ExclusionCriterion>,
    pub sources: Vec<Source>,
    pub search_terms: Vec<SearchTerm>,
    pub publications: Vec<Publication>,
    pub semantic_scholar: Vec<SemanticScholarId>,
    pub publication_authors: Vec<PublicationAuthor>,
    pub publication_tags: Vec<PublicationTag>,
    pub publication_sources: Vec<PublicationSource>,
    pub publication_references: Vec<PublicationReference>,
    pub publication_exclusions: Vec<PublicationExclusion>,
}

fn select<T>(
    conn: &Connection,
    sql: &str,
    f: impl FnMut(&Row<'_>) -> rusqlite::Result<T>,
) -> Result<Vec<T>> {
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], f)?.collect::<rusqlite::Result<Vec<_>>>()?;
    Ok(rows)
}

/// Read every table into a [`Dataset`].
pub fn export(db: &Database) -> Result<Dataset> {
    let conn = db.conn();
    let dataset = Dataset {
        version: DATASET_VERSION,
        exported_at: Utc::now(),
        authors: select(conn, "SELECT id, name FROM authors ORDER BY id", |r| {
            Ok(Author { id: r.get(0)?, name: r.get(1)? })
        })?,
        tags: select(conn, "SELECT id, name, criteria FROM tags ORDER BY id", |r| {
            Ok(Tag { id: r.get(0)?, name: r.get(1)?, criteria: r.get(2)? })
        })?,
        tag_implications: select(
            conn,
            "SELECT tag_id, implied_id FROM tag_implications ORDER BY tag_id, implied_id",
            |r| Ok(TagImplication { tag_id: r.get(0)?, implied_id: r.get(1)? }),
        )?,
        exclusion_criteria: select(
            conn,
            "SELECT id, name, description FROM exclusion_criteria ORDER BY id",
            |r| Ok(ExclusionCriterion { id: r.get(0)?, name: r.get(1)?, description: r.get(2)? }),
        )?,
        sources: select(conn, "SELECT id, name FROM sources ORDER BY id", |r| {
            Ok(Source { id: r.get(0)?, name: r.get(1)? })
        })?,
        search_terms: select(conn, "SELECT id, name FROM search_terms ORDER BY id", |r| {
            Ok(SearchTerm { id: r.get(0)?, name: r.get(1)? })
        })?,
        publications: db.publications()?,
        semantic_scholar: select(
            conn,
            "SELECT id, paper_id, publication_id FROM semantic_scholar ORDER BY id",
            |r| Ok(SemanticScholarId { id: r.get(0)?, paper_id: r.get(1)?, publication_id: r.get(2)? }),
        )?,
        publication_authors: select(
            conn,
            "SELECT publication_id, author_id, position FROM publication_authors
             ORDER BY publication_id, position",
            |r| Ok(PublicationAuthor { publication_id: r.get(0)?, author_id: r.get(1)?, position: r.get(2)? }),
        )?,
        publication_tags: select(
            conn,
            "SELECT publication_id, tag_id, comment FROM publication_tags
             ORDER BY publication_id, tag_id",
            |r| Ok(PublicationTag { publication_id: r.get(0)?, tag_id: r.get(1)?, comment: r.get(2)? }),
        )?,
        publication_sources: select(
            conn,
            "SELECT publication_id, source_id, search_term_id FROM publication_sources
             ORDER BY publication_id, source_id, search_term_id",
            |r| Ok(PublicationSource { publication_id: r.get(0)?, source_id: r.get(1)?, search_term_id: r.get(2)? }),
        )?,
        publication_references: select(
            conn,
            "SELECT publication_id, reference_id, identifier FROM publication_references
             ORDER BY publication_id, reference_id",
            |r| Ok(PublicationReference { publication_id: r.get(0)?, reference_id: r.get(1)?, identifier: r.get(2)? }),
        )?,
        publication_exclusions: select(
            conn,
            "SELECT publication_id, criterion_id FROM publication_exclusions
             ORDER BY publication_id, criterion_id",
            |r| Ok(PublicationExclusion { publication_id: r.get(0)?, criterion_id: r.get(1)? }),
        )?,
    };
    info!(
        publications = dataset.publications.len(),
        authors = dataset.authors.len(),
        tags = dataset.tags.len(),
        "Exported dataset"
    );
    Ok(dataset)
}

/// Load `dataset` into a database without publications.
///
/// Existing lookup rows (authors, tags, sources, ...) are replaced. Either
/// everything is loaded or nothing is.
pub fn import(db: &Database, dataset: &Dataset) -> Result<()> {
    if dataset.version != DATASET_VERSION {
        return Err(SokError::Validation(format!(
            "unsupported dataset version {} (expected {DATASET_VERSION})",
            dataset.version
        )));
    }
    let conn = db.conn();
    let existing: i64 = conn.query_row("SELECT COUNT(*) FROM publications", [], |r| r.get(0))?;
    if existing > 0 {
        return Err(SokError::Validation(format!(
            "database already holds {existing} publications"
        )));
    }

    db.atomic(|| {
        conn.execute_batch(
            "DELETE FROM tag_implications;
             DELETE FROM tags;
             DELETE FROM authors;
             DELETE FROM exclusion_criteria;
             DELETE FROM search_terms;
             DELETE FROM sources;",
        )?;

        for a in &dataset.authors {
            conn.execute("INSERT INTO authors (id, name) VALUES (?1, ?2)", params![a.id, a.name])?;
        }
        for t in &dataset.tags {
            conn.execute(
                "INSERT INTO tags (id, name, criteria) VALUES (?1, ?2, ?3)",
                params![t.id, t.name, t.criteria],
            )?;
        }
        for i in &dataset.tag_implications {
            conn.execute(
                "INSERT INTO tag_implications (tag_id, implied_id) VALUES (?1, ?2)",
                params![i.tag_id, i.implied_id],
            )?;
        }
        for c in &dataset.exclusion_criteria {
            conn.execute(
                "INSERT INTO exclusion_criteria (id, name, description) VALUES (?1, ?2, ?3)",
                params![c.id, c.name, c.description],
            )?;
        }
        for s in &dataset.sources {
            conn.execute("INSERT INTO sources (id, name) VALUES (?1, ?2)", params![s.id, s.name])?;
        }
        for s in &dataset.search_terms {
            conn.execute(
                "INSERT INTO search_terms (id, name) VALUES (?1, ?2)",
                params![s.id, s.name],
            )?;
        }

        // Variants may point at later rows, so link them in a second pass.
        for p in &dataset.publications {
            conn.execute(
                "INSERT INTO publications (id, cite_key, title, year, venue, abstract, peer_reviewed,
                     classified, first_page, last_page, doi)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
                params![
                    p.id,
                    p.cite_key,
                    p.title,
                    p.year,
                    p.venue,
                    p.abstract_text,
                    p.peer_reviewed,
                    p.classified,
                    p.first_page,
                    p.last_page,
                    normalize_doi(p.doi.as_deref())
                ],
            )?;
        }
        for p in dataset.publications.iter().filter(|p| p.variant_of.is_some()) {
            conn.execute(
                "UPDATE publications SET variant_of = ?2 WHERE id = ?1",
                params![p.id, p.variant_of],
            )?;
        }

        for s in &dataset.semantic_scholar {
            conn.execute(
                "INSERT INTO semantic_scholar (id, paper_id, publication_id) VALUES (?1, ?2, ?3)",
                params![s.id, s.paper_id, s.publication_id],
            )?;
        }
        for a in &dataset.publication_authors {
            conn.execute(
                "INSERT INTO publication_authors (publication_id, author_id, position) VALUES (?1, ?2, ?3)",
                params![a.publication_id, a.author_id, a.position],
            )?;
        }
        for t in &dataset.publication_tags {
            conn.execute(
                "INSERT INTO publication_tags (publication_id, tag_id, comment) VALUES (?1, ?2, ?3)",
                params![t.publication_id, t.tag_id, t.comment],
            )?;
        }
        for s in &dataset.publication_sources {
            conn.execute(
                "INSERT INTO publication_sources (publication_id, source_id, search_term_id) VALUES (?1, ?2, ?3)",
                params![s.publication_id, s.source_id, s.search_term_id],
            )?;
        }
        for r in &dataset.publication_references {
            conn.execute(
                "INSERT INTO publication_references (publication_id, reference_id, identifier) VALUES (?1, ?2, ?3)",
                params![r.publication_id, r.reference_id, r.identifier],
            )?;
        }
        for e in &dataset.publication_exclusions {
            conn.execute(
                "INSERT INTO publication_exclusions (publication_id, criterion_id) VALUES (?1, ?2)",
                params![e.publication_id, e.criterion_id],
            )?;
        }
        Ok(())
    })?;

    info!(publications = dataset.publications.len(), "Loaded dataset");
    Ok(())
}

/// Write a dump as pretty JSON.
pub fn write_dataset(dataset: &Dataset, out: &mut dyn Write) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, dataset)?;
    writeln!(out)?;
    Ok(())
}

pub fn read_dataset(path: &Path) -> Result<Dataset> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{exclude, insert, make_primary};
    use crate::db::SOURCE_DBLP;

    fn populated() -> Database {
        let db = Database::open_in_memory().unwrap();
        let master = insert(&db, "master");
        let mut preprint = insert(&db, "preprint");
        let excluded = insert(&db, "excluded");
        make_primary(&db, master.id);
        exclude(&db, excluded.id);

        preprint.variant_of = Some(master.id);
        db.update_publication(&preprint).unwrap();
        db.add_reference(excluded.id, preprint.id, Some("[3]")).unwrap();
        db.add_semantic_scholar(&"ab".repeat(20), master.id).unwrap();

        let (author, _) = db.get_or_create_author("Ann Smith").unwrap();
        db.assign_author(master.id, author.id, 0).unwrap();
        let (parent, _) = db.get_or_create_tag("Misuse").unwrap();
        let (child, _) = db.get_or_create_tag("Static").unwrap();
        db.add_tag_implication(child.id, parent.id).unwrap();
        db.tag_publication(master.id, child.id, Some("uses taint")).unwrap();
        db
    }

    #[test]
    fn export_then_import_reproduces_dataset() {
        let db = populated();
        let dataset = export(&db).unwrap();
        assert_eq!(dataset.publications.len(), 3);
        assert_eq!(dataset.sources.len(), 2);

        let target = Database::open_in_memory().unwrap();
        import(&target, &dataset).unwrap();
        let mut reloaded = export(&target).unwrap();
        reloaded.exported_at = dataset.exported_at;
        assert_eq!(reloaded, dataset);

        let preprint = target.publication_by_cite_key("preprint").unwrap().unwrap();
        assert!(preprint.variant_of.is_some());
        assert!(target.source_by_name(SOURCE_DBLP).is_ok());
    }

    #[test]
    fn import_refuses_non_empty_database() {
        let db = populated();
        let dataset = export(&db).unwrap();
        let err = import(&db, &dataset).unwrap_err();
        assert!(matches!(err, SokError::Validation(_)));
    }

    #[test]
    fn failed_import_leaves_database_untouched() {
        let db = populated();
        let mut dataset = export(&db).unwrap();
        dataset.publication_authors[0].author_id = 999;

        let target = Database::open_in_memory().unwrap();
        assert!(import(&target, &dataset).is_err());
        assert!(target.publications().unwrap().is_empty());
        assert_eq!(target.search_terms().unwrap().len(), 0);
        assert!(target.source_by_name(SOURCE_DBLP).is_ok());
    }

    #[test]
    fn dataset_file_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dump.json");
        let dataset = export(&populated()).unwrap();
        let mut out = Vec::new();
        write_dataset(&dataset, &mut out).unwrap();
        assert!(out.ends_with(b"}\n"));
        std::fs::write(&path, &out).unwrap();
        assert_eq!(read_dataset(&path).unwrap(), dataset);
    }

    #[test]
    fn import_normalizes_dois() {
        let mut dataset = export(&populated()).unwrap();
        dataset.publications[0].doi = Some(" 10.1/Master ".to_string());
        dataset.publications[1].doi = Some("None".to_string());
        dataset.publications[2].doi = Some(String::new());

        let target = Database::open_in_memory().unwrap();
        import(&target, &dataset).unwrap();
        let master = target.publication_by_doi("10.1/master").unwrap().unwrap();
        assert_eq!(master.cite_key, "master");
        assert_eq!(master.doi.as_deref(), Some("10.1/Master"));
        let dois: Vec<Option<String>> = target.publications().unwrap().into_iter().map(|p| p.doi).collect();
        assert_eq!(dois.iter().filter(|d| d.is_none()).count(), 2);
    }
}
