//! `search`: query DBLP and interactively import hits.

use super::{assign_authors, attach_source, free_doi, store_authors};
use crate::choices::DblpChoices;
use crate::db::{Database, SOURCE_DBLP};
use crate::dblp::{self, DblpApi, PublicationResult};
use crate::error::Result;
use crate::models::{NewPublication, Publication, SearchTerm, Source};
use crate::prompt::Prompter;
use crate::semanticscholar::{Paper, SemanticScholarApi};
use std::collections::BTreeSet;
use std::io::Write;
use tracing::{info, warn};

pub const QUESTION: &str = "Import? [y/N], Show abstract? [a]:";

#[derive(Debug, Clone)]
pub struct SearchOptions {
    pub term: String,
    /// Hits per request, 1 - 1000
    pub limit: usize,
    /// Request further pages until DBLP's total is reached
    pub all: bool,
}

#[derive(Debug, Default)]
pub struct SearchReport {
    /// Query as normalized by DBLP, stored as search term
    pub query: String,
    pub total: usize,
    pub received: usize,
    /// Known publications the search term was attached to
    pub known: usize,
    pub imported: Vec<String>,
    pub rejected: Vec<String>,
}

pub(crate) fn display_result(result: &PublicationResult, out: &mut dyn Write) -> Result<()> {
    writeln!(out)?;
    writeln!(out, "{}", result.cite_key())?;
    if !result.authors.is_empty() {
        writeln!(out, "  {}", result.authors.join(", "))?;
    }
    writeln!(out, "  {} ({})", result.title, result.year)?;
    Ok(())
}

fn store_result(
    db: &Database,
    result: &PublicationResult,
    source: &Source,
    term: &SearchTerm,
    paper_id: Option<&str>,
    out: &mut dyn Write,
) -> Result<Publication> {
    db.atomic(|| {
        let authors = store_authors(db, &result.authors, out)?;
        let new = NewPublication {
            cite_key: result.cite_key(),
            title: result.title.clone(),
            year: result.year,
            venue: result.venue.clone(),
            peer_reviewed: result.is_peer_reviewed(),
            first_page: result.first_page(),
            last_page: result.last_page(),
            doi: free_doi(db, result.doi().as_deref(), None, out)?,
            ..Default::default()
        };
        let publication = db.insert_publication(&new)?;
        writeln!(out, "Added publication: {}", publication)?;
        assign_authors(db, &publication, &authors, out)?;

        if let Some(paper_id) = paper_id {
            match db.publication_by_paper_id(paper_id)? {
                Some(owner) => warn!(paper_id, owner = %owner, "Semantic Scholar ID already assigned"),
                None => {
                    db.add_semantic_scholar(paper_id, publication.id)?;
                    writeln!(out, "Added Semantic Scholar '{}' to publication '{}'", paper_id, publication)?;
                }
            }
        }

        attach_source(db, &publication, source, term, out)?;
        Ok(publication)
    })
}

/// Look up the Semantic Scholar entry for a DOI; failures only lose the abstract.
async fn lookup_paper(ss: &dyn SemanticScholarApi, doi: Option<String>) -> Option<Paper> {
    let doi = doi?;
    match ss.paper(&doi, false).await {
        Ok(paper) => Some(paper),
        Err(e) => {
            warn!(doi = %doi, error = %e, "Semantic Scholar lookup failed");
            None
        }
    }
}

/// Search DBLP for `options.term` and ask about every unknown hit.
pub async fn run(
    db: &Database,
    dblp_api: &dyn DblpApi,
    ss: &dyn SemanticScholarApi,
    prompter: &mut dyn Prompter,
    choices: &mut DblpChoices,
    out: &mut dyn Write,
    options: &SearchOptions,
) -> Result<SearchReport> {
    let source = db.source_by_name(SOURCE_DBLP)?;
    let page = dblp::search(dblp_api, &options.term, options.limit, options.all).await?;
    writeln!(out, "Found {}/{} publication(s)", page.results.len(), page.total)?;

    let (term, created) = db.get_or_create_search_term(&page.query)?;
    if created {
        writeln!(out, "Created search term: {}", term.name)?;
    }

    let mut report = SearchReport {
        query: page.query.clone(),
        total: page.total,
        received: page.results.len(),
        ..Default::default()
    };

    let mut known = BTreeSet::new();
    for result in &page.results {
        if let Some(publication) = db.publication_by_cite_key(&result.cite_key())? {
            attach_source(db, &publication, &source, &term, out)?;
            known.insert(publication.cite_key);
        }
    }
    report.known = known.len();

    for result in &page.results {
        let cite_key = result.cite_key();
        if known.contains(&cite_key) || choices.is_rejected(&page.query, &cite_key) {
            continue;
        }

        display_result(result, out)?;
        let paper = lookup_paper(ss, result.doi()).await;

        loop {
            match prompter.ask(QUESTION)?.as_str() {
                "y" | "yes" => {
                    let paper_id = paper.as_ref().and_then(|p| p.paper_id.as_deref());
                    store_result(db, result, &source, &term, paper_id, out)?;
                    known.insert(cite_key.clone());
                    report.imported.push(cite_key);
                    break;
                }
                "" | "n" | "no" => {
                    choices.reject(&page.query, &cite_key)?;
                    report.rejected.push(cite_key);
                    break;
                }
                "a" => match paper.as_ref().and_then(|p| p.abstract_text.as_deref()) {
                    Some(text) => writeln!(out, "{text}")?,
                    None => writeln!(out, "No abstract available.")?,
                },
                _ => {}
            }
        }
    }

    info!(
        query = %report.query,
        imported = report.imported.len(),
        rejected = report.rejected.len(),
        "Search finished"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dblp::tests::{result, FakeDblp};
    use crate::models::Stage;
    use crate::prompt::ScriptedPrompter;
    use crate::semanticscholar::tests::{paper_id, FakeSemanticScholar};
    use std::collections::HashMap;

    fn options() -> SearchOptions {
        SearchOptions {
            term: "crypto* misuse".to_string(),
            limit: 1000,
            all: false,
        }
    }

    #[tokio::test]
    async fn imports_accepted_and_remembers_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let choices_path = dir.path().join(".choices.dblp.json");
        let db = Database::open_in_memory().unwrap();
        db.insert_publication(&crate::db::tests::new_publication("DBLP:conf/known/K20"))
            .unwrap();

        let mut accepted = result("conf/ccs/A21", &["Ann Smith", "Bob Jones"]);
        accepted.urls = vec!["https://doi.org/10.1/a".to_string()];
        let dblp_api = FakeDblp {
            query: "crypto* misuse*".to_string(),
            results: vec![
                result("conf/known/K20", &["K"]),
                accepted,
                result("journals/corr/abs-2101-1", &["Carl"]),
            ],
            ..Default::default()
        };
        let ss = FakeSemanticScholar {
            papers: HashMap::from([(
                "10.1/a".to_string(),
                Paper {
                    paper_id: Some(paper_id(1)),
                    abstract_text: Some("An abstract.".to_string()),
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        let mut prompter = ScriptedPrompter::new(["a", "y", ""]);
        let mut choices = DblpChoices::open(&choices_path, false).unwrap();
        let mut out = Vec::new();
        let report = run(&db, &dblp_api, &ss, &mut prompter, &mut choices, &mut out, &options())
            .await
            .unwrap();

        assert_eq!(report.query, "crypto* misuse*");
        assert_eq!(report.known, 1);
        assert_eq!(report.imported, vec!["DBLP:conf/ccs/A21"]);
        assert_eq!(report.rejected, vec!["DBLP:journals/corr/abs-2101-1"]);
        let output = String::from_utf8(out).unwrap();
        assert!(output.contains("An abstract."));

        let imported = db.publication_by_cite_key("DBLP:conf/ccs/A21").unwrap().unwrap();
        assert_eq!(imported.doi.as_deref(), Some("10.1/a"));
        assert_eq!(imported.peer_reviewed, Some(true));
        let authors: Vec<String> = db
            .publication_authors(imported.id)
            .unwrap()
            .into_iter()
            .map(|a| a.name)
            .collect();
        assert_eq!(authors, vec!["Ann Smith", "Bob Jones"]);
        assert_eq!(db.paper_ids(imported.id).unwrap(), vec![paper_id(1)]);
        assert_eq!(db.stage(imported.id).unwrap(), Some(Stage::Primary));

        let known = db.publication_by_cite_key("DBLP:conf/known/K20").unwrap().unwrap();
        assert_eq!(db.stage(known.id).unwrap(), Some(Stage::Primary));

        // A second run asks about nothing: one hit is stored, one remembered.
        let mut prompter = ScriptedPrompter::new(Vec::<String>::new());
        let mut choices = DblpChoices::open(&choices_path, false).unwrap();
        let report = run(&db, &dblp_api, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options())
            .await
            .unwrap();
        assert!(report.imported.is_empty());
        assert!(prompter.questions.is_empty());
    }

    #[tokio::test]
    async fn accepted_result_with_taken_doi_is_stored_without_doi() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let mut owner = crate::db::tests::new_publication("owner");
        owner.doi = Some("10.1/a".to_string());
        db.insert_publication(&owner).unwrap();

        let mut accepted = result("conf/ccs/A21", &["Ann Smith"]);
        accepted.urls = vec!["https://doi.org/10.1/a".to_string()];
        let dblp_api = FakeDblp {
            query: "q".to_string(),
            results: vec![accepted],
            ..Default::default()
        };
        let ss = FakeSemanticScholar::default();
        let mut prompter = ScriptedPrompter::new(["y"]);
        let mut choices = DblpChoices::open(dir.path().join("c.json"), false).unwrap();
        let mut out = Vec::new();
        let report = run(&db, &dblp_api, &ss, &mut prompter, &mut choices, &mut out, &options())
            .await
            .unwrap();

        assert_eq!(report.imported, vec!["DBLP:conf/ccs/A21"]);
        let imported = db.publication_by_cite_key("DBLP:conf/ccs/A21").unwrap().unwrap();
        assert_eq!(imported.doi, None);
        assert_eq!(db.publication_by_doi("10.1/a").unwrap().unwrap().cite_key, "owner");
        assert!(String::from_utf8(out).unwrap().contains("Dropped DOI '10.1/a'"));
    }

    #[tokio::test]
    async fn end_of_input_aborts() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let dblp_api = FakeDblp {
            query: "q".to_string(),
            results: vec![result("conf/x/Y21", &["A"])],
            ..Default::default()
        };
        let ss = FakeSemanticScholar::default();
        let mut prompter = ScriptedPrompter::default();
        let mut choices = DblpChoices::open(dir.path().join("c.json"), false).unwrap();
        let err = run(&db, &dblp_api, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options())
            .await
            .unwrap_err();
        assert!(matches!(err, crate::error::SokError::Aborted));
        assert!(db.publications().unwrap().is_empty());
    }
}
