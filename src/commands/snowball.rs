//! `snowball`: follow references and citations through Semantic Scholar.

use super::{assign_authors, free_doi, store_authors};
use crate::choices::SemanticScholarChoices;
use crate::db::Database;
use crate::error::{Result, SokError};
use crate::models::{NewPublication, Publication};
use crate::prompt::Prompter;
use crate::semanticscholar::{Paper, PaperRef, SemanticScholarApi};
use std::io::Write;
use std::time::Duration;
use tracing::{debug, info, warn};

#[derive(Debug, Clone)]
pub struct SnowballOptions {
    pub references: bool,
    pub citations: bool,
    /// Pause after every fetched paper
    pub throttle: Duration,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct SnowballReport {
    pub publications: usize,
    /// New reference edges between stored publications
    pub linked: usize,
    pub imported: Vec<String>,
    pub ignored: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// The entry is cited by the base publication
    Reference,
    /// The entry cites the base publication
    Citation,
}

/// Cite key for snowballed publications: first author's last name, year and
/// first word of the title, lower-cased (e.g. `smith2020deep`).
pub fn generate_cite_key(first_author: Option<&str>, year: Option<u16>, title: &str) -> String {
    let last_name = first_author
        .and_then(|name| name.split_whitespace().last())
        .unwrap_or_default();
    let first_word = title.split_whitespace().next().unwrap_or_default();
    let year = year.map(|y| y.to_string()).unwrap_or_default();
    format!("{last_name}{year}{first_word}")
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Key stem for a listing entry. Titles without letters and entries without
/// authors or year fall back to the paper id prefix, else `anon`.
fn cite_key_stem(first_author: Option<&str>, year: Option<u16>, title: &str, paper_id: Option<&str>) -> String {
    let key = generate_cite_key(first_author, year, title);
    if !key.is_empty() {
        return key;
    }
    match paper_id.map(str::trim).filter(|id| !id.is_empty()) {
        Some(id) => id.chars().take(8).collect(),
        None => "anon".to_string(),
    }
}

enum CiteKey {
    Free(String),
    /// A publication with the same title already owns the key
    Known(Publication),
}

/// Walk `base`, `basea` .. `basez` and stop at the first free key or at the
/// publication that already carries `title`.
fn resolve_cite_key(db: &Database, base: &str, title: &str) -> Result<CiteKey> {
    let candidates = std::iter::once(base.to_string()).chain(('a'..='z').map(|suffix| format!("{base}{suffix}")));
    for candidate in candidates {
        match db.publication_by_cite_key(&candidate)? {
            None => return Ok(CiteKey::Free(candidate)),
            Some(existing) if existing.title == title => return Ok(CiteKey::Known(existing)),
            Some(_) => {}
        }
    }
    Err(SokError::Validation(format!("no free cite key left for '{base}'")))
}

fn unique_cite_key(db: &Database, base: &str, title: &str) -> Result<String> {
    Ok(match resolve_cite_key(db, base, title)? {
        CiteKey::Free(key) => key,
        CiteKey::Known(existing) => existing.cite_key,
    })
}

fn display(entry: &PaperRef, out: &mut dyn Write) -> Result<()> {
    writeln!(out)?;
    let authors: Vec<&str> = entry.authors.iter().map(|a| a.name.as_str()).collect();
    writeln!(out, "  {}", authors.join(", "))?;
    match entry.year {
        Some(year) => writeln!(out, "  {} ({})", entry.title, year)?,
        None => writeln!(out, "  {}", entry.title)?,
    }
    if let Some(venue) = entry.venue.as_deref().filter(|v| !v.is_empty()) {
        writeln!(out, "  {venue}")?;
    }
    if let Some(doi) = entry.doi() {
        writeln!(out, "  {doi}")?;
    }
    if let Some(paper_id) = &entry.paper_id {
        writeln!(out, "  {paper_id}")?;
    }
    Ok(())
}

struct Snowball<'a> {
    db: &'a Database,
    ss: &'a dyn SemanticScholarApi,
    prompter: &'a mut dyn Prompter,
    choices: &'a mut SemanticScholarChoices,
    out: &'a mut dyn Write,
    report: SnowballReport,
}

impl Snowball<'_> {
    fn link(&mut self, base: &Publication, other: &Publication, direction: Direction) -> Result<()> {
        let (citing, cited) = match direction {
            Direction::Reference => (base, other),
            Direction::Citation => (other, base),
        };
        if self.db.add_reference(citing.id, cited.id, None)? {
            self.report.linked += 1;
            match direction {
                Direction::Reference => writeln!(self.out, "Added reference: {}", cited)?,
                Direction::Citation => writeln!(self.out, "Added citation: {}", citing)?,
            }
        } else {
            debug!(citing = %citing, cited = %cited, "Reference already known");
        }
        Ok(())
    }

    /// Link entries that are already stored; returns false for unknown ones.
    ///
    /// Entries without a paper ID are matched by DOI, then by generated cite
    /// key and title, so imported ones are not offered again.
    fn link_known(&mut self, base: &Publication, entry: &PaperRef, direction: Direction) -> Result<bool> {
        let paper_id = entry.paper_id.as_deref();
        if let Some(paper_id) = paper_id {
            if let Some(existing) = self.db.publication_by_paper_id(paper_id)? {
                self.link(base, &existing, direction)?;
                return Ok(true);
            }
        }
        if let Some(publication) = entry.doi().map(|doi| self.db.publication_by_doi(doi)).transpose()?.flatten() {
            if let Some(paper_id) = paper_id {
                self.db.add_semantic_scholar(paper_id, publication.id)?;
                writeln!(self.out, "New Semantic Scholar entry: {paper_id}")?;
            }
            self.link(base, &publication, direction)?;
            return Ok(true);
        }
        if paper_id.is_some() {
            return Ok(false);
        }
        let first_author = entry.authors.first().map(|a| a.name.as_str());
        let stem = cite_key_stem(first_author, entry.year, &entry.title, None);
        match resolve_cite_key(self.db, &stem, &entry.title) {
            Ok(CiteKey::Known(existing)) => {
                self.link(base, &existing, direction)?;
                Ok(true)
            }
            Ok(CiteKey::Free(_)) | Err(SokError::Validation(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    fn store(&mut self, base: &Publication, paper: &Paper, direction: Direction) -> Result<Publication> {
        let db = self.db;
        let out = &mut *self.out;
        let publication = db.atomic(|| {
            let names: Vec<String> = paper.authors.iter().map(|a| a.name.clone()).collect();
            let authors = store_authors(db, &names, out)?;

            let base_key = cite_key_stem(
                names.first().map(String::as_str),
                paper.year,
                &paper.title,
                paper.paper_id.as_deref(),
            );
            let cite_key = unique_cite_key(db, &base_key, &paper.title)?;
            let new = NewPublication {
                cite_key,
                title: paper.title.clone(),
                year: paper.year.unwrap_or_default(),
                venue: paper.venue.clone().filter(|v| !v.is_empty()),
                abstract_text: paper.abstract_text.clone(),
                peer_reviewed: Some(false),
                doi: free_doi(db, paper.doi(), None, out)?,
                ..Default::default()
            };
            let (publication, created) = db.get_or_create_publication(&new)?;
            if created {
                writeln!(out, "Added publication: {}", publication)?;
            } else {
                writeln!(out, "Publication '{}' already known", publication)?;
            }
            assign_authors(db, &publication, &authors, out)?;

            if let Some(paper_id) = paper.paper_id.as_deref() {
                if db.add_semantic_scholar(paper_id, publication.id)? {
                    writeln!(out, "New Semantic Scholar entry: {paper_id}")?;
                }
            }
            Ok(publication)
        })?;
        self.link(base, &publication, direction)?;
        Ok(publication)
    }

    async fn handle_entries(&mut self, base: &Publication, entries: &[PaperRef], direction: Direction) -> Result<()> {
        if !entries.is_empty() {
            let title = match direction {
                Direction::Reference => "References",
                Direction::Citation => "Citations",
            };
            writeln!(self.out, "--- {title} ---")?;
        }

        for entry in entries {
            if self.link_known(base, entry, direction)? {
                continue;
            }
            let identifier = entry.identifier();
            if self.choices.is_rejected(&identifier) {
                continue;
            }

            display(entry, self.out)?;
            let question = if entry.paper_id.is_some() {
                "Ignore? [Y/n], Show abstract [a]:"
            } else {
                "Ignore? [Y/n]:"
            };

            loop {
                match self.prompter.ask(question)?.as_str() {
                    "" | "y" | "yes" => {
                        self.choices.reject(&identifier)?;
                        self.report.ignored += 1;
                        break;
                    }
                    "a" => {
                        if let Some(paper_id) = entry.paper_id.as_deref() {
                            let paper = self.ss.paper(paper_id, false).await?;
                            match paper.abstract_text.as_deref() {
                                Some(text) => writeln!(self.out, "{text}")?,
                                None => writeln!(self.out, "No abstract available.")?,
                            }
                        }
                    }
                    "n" | "no" => {
                        // Unresolved entries are imported from what the listing carries.
                        let paper = match entry.paper_id.as_deref() {
                            Some(paper_id) => self.ss.paper(paper_id, false).await?,
                            None => Paper {
                                title: entry.title.clone(),
                                year: entry.year,
                                venue: entry.venue.clone(),
                                doi: entry.doi().map(str::to_string),
                                authors: entry.authors.clone(),
                                ..Default::default()
                            },
                        };
                        match self.store(base, &paper, direction) {
                            Ok(publication) => self.report.imported.push(publication.cite_key),
                            Err(SokError::Validation(message)) => {
                                warn!(entry = %identifier, %message, "Skipping entry");
                                writeln!(self.out, "Skipped: {message}")?;
                            }
                            Err(e) => return Err(e),
                        }
                        break;
                    }
                    _ => {}
                }
            }
        }
        Ok(())
    }
}

/// Snowball every relevant publication that has a Semantic Scholar ID.
pub async fn run(
    db: &Database,
    ss: &dyn SemanticScholarApi,
    prompter: &mut dyn Prompter,
    choices: &mut SemanticScholarChoices,
    out: &mut dyn Write,
    options: &SnowballOptions,
) -> Result<SnowballReport> {
    let publications = db.publications_for_snowballing()?;
    info!(publications = publications.len(), "Snowballing");

    let mut snowball = Snowball {
        db,
        ss,
        prompter,
        choices,
        out,
        report: SnowballReport::default(),
    };

    for publication in &publications {
        writeln!(snowball.out, "=== Publication {} ===", publication)?;
        snowball.report.publications += 1;
        for paper_id in db.paper_ids(publication.id)? {
            let paper = ss.paper(&paper_id, false).await?;
            if options.references {
                snowball
                    .handle_entries(publication, &paper.references, Direction::Reference)
                    .await?;
            }
            if options.citations {
                snowball
                    .handle_entries(publication, &paper.citations, Direction::Citation)
                    .await?;
            }
            if !options.throttle.is_zero() {
                tokio::time::sleep(options.throttle).await;
            }
        }
    }

    if snowball.report.imported.is_empty() {
        warn!("No publications imported");
    }
    Ok(snowball.report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::tests::{insert, make_primary};
    use crate::models::Stage;
    use crate::prompt::ScriptedPrompter;
    use crate::semanticscholar::tests::{paper_id, FakeSemanticScholar};
    use crate::semanticscholar::PaperAuthor;
    use std::collections::HashMap;

    fn entry(id: Option<u8>, title: &str, doi: Option<&str>) -> PaperRef {
        PaperRef {
            paper_id: id.map(paper_id),
            title: title.to_string(),
            year: Some(2019),
            doi: doi.map(str::to_string),
            authors: vec![PaperAuthor { author_id: None, name: "Jane van Doe".to_string() }],
            ..Default::default()
        }
    }

    fn options() -> SnowballOptions {
        SnowballOptions {
            references: true,
            citations: true,
            throttle: Duration::ZERO,
        }
    }

    #[test]
    fn test_generate_cite_key() {
        assert_eq!(
            generate_cite_key(Some("Ann Smith"), Some(2020), "Deep Misuse Detection"),
            "smith2020deep"
        );
        assert_eq!(generate_cite_key(Some("Plato"), None, "Republic"), "platorepublic");
        assert_eq!(generate_cite_key(None, Some(2001), "Crypto: a study"), "2001crypto");
    }

    #[test]
    fn cite_key_stem_never_empty() {
        assert_eq!(cite_key_stem(None, None, "\u{2014}", None), "anon");
        assert_eq!(cite_key_stem(None, None, "\u{2014}", Some(&paper_id(7))), "07070707");
        assert_eq!(cite_key_stem(Some("Ann Smith"), Some(2020), "Deep", Some(&paper_id(7))), "smith2020deep");
    }

    #[test]
    fn unique_cite_key_suffixes_taken_keys() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "k");
        assert_eq!(unique_cite_key(&db, "k", "A brand new title").unwrap(), "ka");
        // Same title means the same publication.
        assert_eq!(unique_cite_key(&db, "k", "Title of k").unwrap(), "k");
        assert_eq!(unique_cite_key(&db, "free", "Anything").unwrap(), "free");
    }

    #[test]
    fn unique_cite_key_fails_when_suffixes_run_out() {
        let db = Database::open_in_memory().unwrap();
        insert(&db, "k");
        for suffix in 'a'..='z' {
            insert(&db, &format!("k{suffix}"));
        }
        let err = unique_cite_key(&db, "k", "A brand new title").unwrap_err();
        assert!(matches!(err, SokError::Validation(_)));
        // A title that owns the last key is still found.
        assert_eq!(unique_cite_key(&db, "k", "Title of kz").unwrap(), "kz");
    }

    #[tokio::test]
    async fn unusable_entry_does_not_stop_the_run() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let base = insert(&db, "base");
        db.add_semantic_scholar(&paper_id(1), base.id).unwrap();
        // Every suffix of the second entry's key is taken by other titles.
        insert(&db, "doe2019taken");
        for suffix in 'a'..='z' {
            insert(&db, &format!("doe2019taken{suffix}"));
        }
        let dash = PaperRef {
            title: "\u{2014}".to_string(),
            ..Default::default()
        };
        let later = PaperRef {
            year: Some(2020),
            ..entry(None, "Later paper", None)
        };
        let ss = FakeSemanticScholar {
            papers: HashMap::from([(
                paper_id(1),
                Paper {
                    references: vec![dash, entry(None, "Taken title", None), later],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        let mut prompter = ScriptedPrompter::new(["n", "n", "n"]);
        let mut choices = SemanticScholarChoices::open(dir.path().join("ss.json"), false).unwrap();
        let options = SnowballOptions { citations: false, ..options() };
        let mut out = Vec::new();
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut out, &options)
            .await
            .unwrap();

        assert_eq!(report.imported, vec!["anon", "doe2020later"]);
        assert_eq!(prompter.questions.len(), 3);
        assert!(String::from_utf8(out).unwrap().contains("Skipped: no free cite key left"));
        assert!(db.publication_by_cite_key("anon").unwrap().is_some());
        let later = db.publication_by_cite_key("doe2020later").unwrap().unwrap();
        assert!(db.reference(base.id, later.id).unwrap().is_some());
    }

    #[tokio::test]
    async fn links_known_and_imports_accepted() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let base = insert(&db, "base");
        make_primary(&db, base.id);
        db.add_semantic_scholar(&paper_id(1), base.id).unwrap();

        let by_id = insert(&db, "by-id");
        db.add_semantic_scholar(&paper_id(2), by_id.id).unwrap();
        let mut by_doi = insert(&db, "by-doi");
        by_doi.doi = Some("10.1/doi".to_string());
        db.update_publication(&by_doi).unwrap();

        let imported_paper = Paper {
            paper_id: Some(paper_id(5)),
            title: "Finding crypto misuse".to_string(),
            year: Some(2019),
            authors: vec![PaperAuthor { author_id: None, name: "Jane van Doe".to_string() }],
            abstract_text: Some("Abstract five.".to_string()),
            ..Default::default()
        };
        let base_paper = Paper {
            paper_id: Some(paper_id(1)),
            references: vec![
                entry(Some(2), "By id", None),
                entry(Some(3), "By doi", Some("10.1/DOI")),
                entry(Some(4), "Ignored", None),
            ],
            citations: vec![
                entry(Some(5), "Finding crypto misuse", None),
                entry(None, "Unresolved", None),
            ],
            ..Default::default()
        };
        let ss = FakeSemanticScholar {
            papers: HashMap::from([
                (paper_id(1), base_paper),
                (paper_id(2), Paper::default()),
                (paper_id(3), Paper::default()),
                (paper_id(5), imported_paper),
            ]),
            ..Default::default()
        };

        // Ignore #4, show abstract of #5 then import it, ignore the unresolved one.
        let mut prompter = ScriptedPrompter::new(["y", "a", "n", ""]);
        let mut choices =
            SemanticScholarChoices::open(dir.path().join("ss.json"), false).unwrap();
        let mut out = Vec::new();
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut out, &options())
            .await
            .unwrap();

        // by-id has a paper ID too, by-doi only gets one during the run.
        assert_eq!(report.publications, 2);
        assert_eq!(report.imported, vec!["doe2019finding"]);
        assert_eq!(report.ignored, 2);
        assert_eq!(report.linked, 3);
        assert!(String::from_utf8(out).unwrap().contains("Abstract five."));

        assert!(db.reference(base.id, by_id.id).unwrap().is_some());
        assert!(db.reference(base.id, by_doi.id).unwrap().is_some());
        assert_eq!(db.paper_ids(by_doi.id).unwrap(), vec![paper_id(3)]);

        let citing = db.publication_by_cite_key("doe2019finding").unwrap().unwrap();
        assert!(db.reference(citing.id, base.id).unwrap().is_some());
        assert_eq!(citing.peer_reviewed, Some(false));
        assert_eq!(db.stage(citing.id).unwrap(), Some(Stage::Tertiary));
        assert_eq!(db.stage(by_id.id).unwrap(), Some(Stage::Secondary));

        // Remembered choices and stored links leave nothing to ask.
        let mut prompter = ScriptedPrompter::default();
        let mut choices =
            SemanticScholarChoices::open(dir.path().join("ss.json"), false).unwrap();
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options())
            .await
            .unwrap();
        assert!(prompter.questions.is_empty());
        assert_eq!(report.linked, 0);
    }

    #[tokio::test]
    async fn unresolved_entry_imported_from_listing() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let base = insert(&db, "base");
        db.add_semantic_scholar(&paper_id(1), base.id).unwrap();
        let ss = FakeSemanticScholar {
            papers: HashMap::from([(
                paper_id(1),
                Paper {
                    references: vec![entry(None, "Old paper", None)],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        let mut prompter = ScriptedPrompter::new(["n"]);
        let mut choices = SemanticScholarChoices::open(dir.path().join("ss.json"), false).unwrap();
        let options = SnowballOptions { citations: false, ..options() };
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options)
            .await
            .unwrap();
        assert_eq!(report.imported, vec!["doe2019old"]);
        assert_eq!(prompter.questions, vec!["Ignore? [Y/n]:"]);
        let old = db.publication_by_cite_key("doe2019old").unwrap().unwrap();
        assert!(db.reference(base.id, old.id).unwrap().is_some());

        // The imported entry is recognized by key and title on the next run.
        let mut prompter = ScriptedPrompter::default();
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options)
            .await
            .unwrap();
        assert!(prompter.questions.is_empty());
        assert!(report.imported.is_empty());
        assert_eq!(report.linked, 0);
    }

    #[tokio::test]
    async fn unresolved_entry_matched_by_doi() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_in_memory().unwrap();
        let base = insert(&db, "base");
        db.add_semantic_scholar(&paper_id(1), base.id).unwrap();
        let mut known = insert(&db, "known");
        known.doi = Some("10.1/known".to_string());
        db.update_publication(&known).unwrap();
        let ss = FakeSemanticScholar {
            papers: HashMap::from([(
                paper_id(1),
                Paper {
                    citations: vec![entry(None, "Other title", Some("10.1/KNOWN"))],
                    ..Default::default()
                },
            )]),
            ..Default::default()
        };

        let mut prompter = ScriptedPrompter::default();
        let mut choices = SemanticScholarChoices::open(dir.path().join("ss.json"), false).unwrap();
        let report = run(&db, &ss, &mut prompter, &mut choices, &mut Vec::<u8>::new(), &options())
            .await
            .unwrap();
        assert!(prompter.questions.is_empty());
        assert_eq!(report.linked, 1);
        assert!(db.reference(known.id, base.id).unwrap().is_some());
        assert!(db.paper_ids(known.id).unwrap().is_empty());
    }
}
