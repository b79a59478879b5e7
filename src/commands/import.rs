//! `import`: add DBLP records by cite key.

use super::{assign_authors, attach_source, free_doi, store_authors};
use crate::db::{Database, SOURCE_DBLP};
use crate::dblp::{strip_cite_key_prefix, DblpApi, PublicationResult, CITE_KEY_PREFIX};
use crate::dump::DumpReader;
use crate::error::{Result, SokError};
use crate::models::{NewPublication, Publication};
use std::collections::BTreeSet;
use std::io::Write;
use std::time::Instant;
use tracing::{info, warn};

/// Where records for unknown keys come from
pub enum RecordSource<'a> {
    /// One request per key against `/rec/{key}.xml`
    Api(&'a dyn DblpApi),
    /// A single pass over the local dump
    Dump(&'a DumpReader),
}

async fn fetch(source: &RecordSource<'_>, keys: &BTreeSet<String>) -> Result<Vec<PublicationResult>> {
    match source {
        RecordSource::Api(api) => {
            let mut results = Vec::with_capacity(keys.len());
            for key in keys {
                results.push(api.record(key).await?);
            }
            Ok(results)
        }
        RecordSource::Dump(dump) => {
            let keys: Vec<&String> = keys.iter().collect();
            dump.records(&keys)
        }
    }
}

/// Import `cite_keys`, attaching the DBLP source with `search_term` if given.
///
/// Keys already in the database are reused; unknown keys need the `DBLP:`
/// prefix. All writes happen in one atomic section.
pub async fn run(
    db: &Database,
    source: RecordSource<'_>,
    cite_keys: &[String],
    search_term: Option<&str>,
    out: &mut dyn Write,
) -> Result<Vec<Publication>> {
    let requested: BTreeSet<&str> = cite_keys.iter().map(String::as_str).collect();

    let mut publications = Vec::new();
    let mut missing = BTreeSet::new();
    for key in requested {
        match db.publication_by_cite_key(key)? {
            Some(publication) => publications.push(publication),
            None if key.starts_with(CITE_KEY_PREFIX) => {
                missing.insert(strip_cite_key_prefix(key).to_string());
            }
            None => return Err(SokError::Validation(format!("Invalid cite key: {key}"))),
        }
    }

    let results = if missing.is_empty() {
        Vec::new()
    } else {
        let start = Instant::now();
        let results = fetch(&source, &missing).await?;
        info!(
            requested = missing.len(),
            found = results.len(),
            elapsed = ?start.elapsed(),
            "Fetched DBLP records"
        );
        let found: BTreeSet<&str> = results.iter().map(|r| r.key.as_str()).collect();
        for key in missing.iter().filter(|k| !found.contains(k.as_str())) {
            warn!(key = %key, "DBLP record not found");
        }
        results
    };

    db.atomic(|| {
        let dblp = db.source_by_name(SOURCE_DBLP)?;
        let term = match search_term {
            Some(name) => {
                let (term, created) = db.get_or_create_search_term(name)?;
                if created {
                    writeln!(out, "Created search term: {}", term.name)?;
                }
                Some(term)
            }
            None => None,
        };

        for result in &results {
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
            let (publication, created) = db.get_or_create_publication(&new)?;
            if created {
                writeln!(out, "Added publication: {}", publication)?;
            } else {
                writeln!(out, "Publication '{}' already known", publication)?;
            }
            assign_authors(db, &publication, &authors, out)?;
            publications.push(publication);
        }

        if let Some(term) = &term {
            for publication in &publications {
                attach_source(db, publication, &dblp, term, out)?;
            }
        }
        Ok(())
    })?;

    Ok(publications)
}
